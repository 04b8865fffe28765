use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;

use market_assets::app::{App, ProgressEvent, ProgressSink};
use market_assets::config::{Credentials, PipelineConfig};
use market_assets::domain::{ArchiveKind, Locator};
use market_assets::driver::DriverStatus;
use market_assets::error::AssetError;
use market_assets::fetch::{ExtractOutcome, FetchOutcome, Fetcher};
use market_assets::http::Transport;

/// Serves its bodies in order, repeating the last one, and records what was
/// asked.
struct StaticTransport {
    bodies: Vec<Vec<u8>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl StaticTransport {
    fn new(body: impl Into<Vec<u8>>) -> Self {
        Self::sequence(vec![body.into()])
    }

    fn sequence(bodies: Vec<Vec<u8>>) -> Self {
        Self {
            bodies,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn respond(&self, url: &Locator, login: Option<String>) -> Vec<u8> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((url.to_string(), login));
        let idx = (calls.len() - 1).min(self.bodies.len() - 1);
        self.bodies[idx].clone()
    }
}

impl Transport for StaticTransport {
    fn download(
        &self,
        url: &Locator,
        credentials: Option<&Credentials>,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64, AssetError> {
        let body = self.respond(url, credentials.map(|login| login.username.clone()));
        let half = body.len() / 2;
        let total = Some(body.len() as u64);
        sink.event(ProgressEvent::transfer(url.as_str(), half as u64, total));
        fs::write(destination, &body).unwrap();
        sink.event(ProgressEvent::transfer(url.as_str(), body.len() as u64, total));
        Ok(body.len() as u64)
    }

    fn fetch_text(&self, url: &Locator) -> Result<String, AssetError> {
        let body = self.respond(url, None);
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn tar_gz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn utf8_dir(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
}

fn url(value: &str) -> Locator {
    value.parse().unwrap()
}

#[test]
fn fetch_file_skips_existing_target() {
    let temp = tempfile::tempdir().unwrap();
    let target = utf8_dir(&temp).join("wiki_stocks.csv");
    fs::write(&target, "code,name\n").unwrap();
    let transport = StaticTransport::new("replaced");

    let outcome = Fetcher::new(&transport)
        .fetch_file(&url("https://data.test/stocks.csv"), &target, &NoopSink)
        .unwrap();

    assert_eq!(outcome, FetchOutcome::AlreadyPresent);
    assert_eq!(transport.call_count(), 0);
    assert_eq!(fs::read_to_string(&target).unwrap(), "code,name\n");
}

#[test]
fn fetch_file_writes_complete_payload() {
    let temp = tempfile::tempdir().unwrap();
    let target = utf8_dir(&temp).join("wiki_stocks.csv");
    let transport = StaticTransport::new("code,name\nAAPL,Apple\n");

    let outcome = Fetcher::new(&transport)
        .fetch_file(&url("https://data.test/stocks.csv"), &target, &NoopSink)
        .unwrap();

    assert_eq!(outcome, FetchOutcome::Downloaded { bytes: 21 });
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        "code,name\nAAPL,Apple\n"
    );
    let leftovers = fs::read_dir(temp.path()).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[test]
fn archive_entry_is_relocated_and_scratch_removed() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_dir(&temp);
    let target = root.join("wiki_prices.csv");
    let archive = zip_bytes(&[("WIKI_PRICES_abc.csv", b"ticker,date\nA,2018-01-02\n")]);
    let transport = StaticTransport::new(archive);

    let outcome = Fetcher::new(&transport)
        .fetch_archive_entry(&url("https://data.test/prices.zip"), &target, &NoopSink)
        .unwrap();

    assert_matches!(outcome, FetchOutcome::Downloaded { .. });
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        "ticker,date\nA,2018-01-02\n"
    );
    assert!(!root.join("wiki_prices_zipped.zip").exists());
    assert!(!root.join("wiki_prices_unzipped").exists());

    let again = Fetcher::new(&transport)
        .fetch_archive_entry(&url("https://data.test/prices.zip"), &target, &NoopSink)
        .unwrap();
    assert_eq!(again, FetchOutcome::AlreadyPresent);
    assert_eq!(transport.call_count(), 1);
}

#[test]
fn archive_entry_replaces_leftovers_from_failed_attempt() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_dir(&temp);
    let target = root.join("wiki_prices.csv");
    fs::write(root.join("wiki_prices_zipped.zip"), "<html>maintenance</html>").unwrap();
    fs::create_dir_all(root.join("wiki_prices_unzipped")).unwrap();
    fs::write(root.join("wiki_prices_unzipped").join("AAA_stale.csv"), "old\n").unwrap();
    let transport = StaticTransport::new(zip_bytes(&[("WIKI_PRICES_new.csv", b"ticker,date\n")]));

    Fetcher::new(&transport)
        .fetch_archive_entry(&url("https://data.test/prices.zip"), &target, &NoopSink)
        .unwrap();

    assert_eq!(transport.call_count(), 1);
    assert_eq!(fs::read_to_string(&target).unwrap(), "ticker,date\n");
    assert!(!root.join("wiki_prices_zipped.zip").exists());
    assert!(!root.join("wiki_prices_unzipped").exists());
}

#[test]
fn failed_archive_entry_is_fetched_again() {
    let temp = tempfile::tempdir().unwrap();
    let target = utf8_dir(&temp).join("wiki_prices.csv");
    let transport = StaticTransport::sequence(vec![
        b"<html>maintenance</html>".to_vec(),
        zip_bytes(&[("WIKI_PRICES.csv", b"ticker,date\n")]),
    ]);
    let fetcher = Fetcher::new(&transport);
    let source = url("https://data.test/prices.zip");

    let err = fetcher
        .fetch_archive_entry(&source, &target, &NoopSink)
        .unwrap_err();
    assert_matches!(err, AssetError::Extraction(_));

    let outcome = fetcher
        .fetch_archive_entry(&source, &target, &NoopSink)
        .unwrap();
    assert_matches!(outcome, FetchOutcome::Downloaded { .. });
    assert_eq!(transport.call_count(), 2);
    assert_eq!(fs::read_to_string(&target).unwrap(), "ticker,date\n");
}

#[test]
fn archive_entry_rejects_non_archive() {
    let temp = tempfile::tempdir().unwrap();
    let target = utf8_dir(&temp).join("wiki_prices.csv");
    let transport = StaticTransport::new("<html>maintenance</html>");

    let err = Fetcher::new(&transport)
        .fetch_archive_entry(&url("https://data.test/prices.zip"), &target, &NoopSink)
        .unwrap_err();

    assert_matches!(err, AssetError::Extraction(_));
    assert!(!target.exists());
}

#[test]
fn extract_gated_on_marker() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_dir(&temp);
    let marker = root.join("bundle").join("README");
    let archive = root.join("bundle.zip");
    let transport = StaticTransport::new(zip_bytes(&[("bundle/README", b"hello")]));
    let fetcher = Fetcher::new(&transport);
    let source = url("https://data.test/bundle.zip");

    let outcome = fetcher
        .fetch_and_extract(&source, &archive, &root, &marker, &NoopSink)
        .unwrap();
    assert_eq!(outcome, ExtractOutcome::Extracted(ArchiveKind::Zip));
    assert!(marker.exists());
    assert!(!archive.exists());

    let outcome = fetcher
        .fetch_and_extract(&source, &archive, &root, &marker, &NoopSink)
        .unwrap();
    assert_eq!(outcome, ExtractOutcome::AlreadyPresent);
    assert_eq!(transport.call_count(), 1);
}

#[test]
fn missing_marker_keeps_archive() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_dir(&temp);
    let marker = root.join("expected.bin");
    let archive = root.join("bundle.tar.gz");
    let transport = StaticTransport::new(tar_gz_bytes(&[("other.bin", b"x")]));

    let outcome = Fetcher::new(&transport)
        .fetch_and_extract(
            &url("https://data.test/bundle.tar.gz"),
            &archive,
            &root,
            &marker,
            &NoopSink,
        )
        .unwrap();

    assert_eq!(outcome, ExtractOutcome::MarkerMissing(ArchiveKind::TarGz));
    assert!(archive.exists());
    assert!(root.join("other.bin").exists());
}

#[test]
fn large_download_reports_progress_and_unpacks() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_dir(&temp);
    let target = root.join("nasdaq100_min.zip");
    let transport = StaticTransport::new(zip_bytes(&[("nasdaq100/AAPL.csv", b"ts,px\n")]));
    let sink = RecordingSink::default();
    let login = Credentials {
        username: "analyst".to_string(),
        password: Some("secret".to_string()),
    };

    let outcome = Fetcher::new(&transport)
        .fetch_large(
            &url("https://data.test/nasdaq100_min.zip"),
            Some(&login),
            &target,
            &root,
            &sink,
        )
        .unwrap();

    assert_matches!(outcome, FetchOutcome::Downloaded { bytes } if bytes > 0);
    assert!(root.join("nasdaq100").join("AAPL.csv").exists());

    let events = sink.events.lock().unwrap();
    let transfers = events
        .iter()
        .filter_map(|event| event.transfer)
        .collect::<Vec<_>>();
    assert_eq!(transfers.len(), 2);
    assert!(transfers[0].downloaded < transfers[1].downloaded);
    assert_eq!(transfers[1].total, Some(transfers[1].downloaded));

    let calls = transport.calls.lock().unwrap();
    assert_eq!(calls[0].1.as_deref(), Some("analyst"));
}

fn write_settings(dir: &Utf8Path, body: serde_json::Value) -> PipelineConfig {
    let settings = dir.join("settings.json");
    fs::write(&settings, body.to_string()).unwrap();
    PipelineConfig::new(dir.join("data"), settings.into_std_path_buf())
}

#[test]
fn driver_install_and_skip() {
    let temp = tempfile::tempdir().unwrap();
    let config = write_settings(
        &utf8_dir(&temp),
        serde_json::json!({ "geckodriver_url": "https://driver.test/geckodriver.tar.gz" }),
    );
    let binary_name = if cfg!(windows) {
        "geckodriver.exe"
    } else {
        "geckodriver"
    };
    let transport = StaticTransport::new(tar_gz_bytes(&[(binary_name, b"#!/bin/sh\n")]));
    let app = App::new(config, transport);

    let result = app.setup(&NoopSink).unwrap();
    assert_eq!(result.driver, DriverStatus::Installed);

    let dir = app.data_dir();
    assert!(dir.driver_path().exists());
    assert!(!dir.driver_dir().join("geckodriver_tarfile.tar.gz").exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(dir.driver_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    let status = app.install_driver(&NoopSink).unwrap();
    assert_eq!(status, DriverStatus::AlreadyInstalled);
    assert_eq!(app.transport().call_count(), 1);
}

#[test]
fn driver_archive_without_binary() {
    let temp = tempfile::tempdir().unwrap();
    let config = write_settings(
        &utf8_dir(&temp),
        serde_json::json!({ "geckodriver_url": "https://driver.test/geckodriver.tar.gz" }),
    );
    let transport = StaticTransport::new(tar_gz_bytes(&[("LICENSE", b"MPL")]));
    let app = App::new(config, transport);

    let status = app.install_driver(&NoopSink).unwrap();
    assert_eq!(status, DriverStatus::UnpackFailed);
    let dir = app.data_dir();
    assert!(dir.driver_dir().join("geckodriver_tarfile.tar.gz").exists());
    assert!(dir.driver_dir().join("LICENSE").exists());
}

#[test]
fn driver_retry_after_unpack_failure_downloads_again() {
    let temp = tempfile::tempdir().unwrap();
    let config = write_settings(
        &utf8_dir(&temp),
        serde_json::json!({ "geckodriver_url": "https://driver.test/geckodriver.tar.gz" }),
    );
    let binary_name = if cfg!(windows) {
        "geckodriver.exe"
    } else {
        "geckodriver"
    };
    let transport = StaticTransport::sequence(vec![
        tar_gz_bytes(&[("LICENSE", b"MPL")]),
        tar_gz_bytes(&[(binary_name, b"#!/bin/sh\n")]),
    ]);
    let app = App::new(config, transport);

    assert_eq!(
        app.install_driver(&NoopSink).unwrap(),
        DriverStatus::UnpackFailed
    );
    assert_eq!(app.install_driver(&NoopSink).unwrap(), DriverStatus::Installed);
    assert_eq!(app.transport().call_count(), 2);
    assert!(app.data_dir().driver_path().exists());
}

#[test]
fn algoseek_download_uses_login() {
    let temp = tempfile::tempdir().unwrap();
    let config = write_settings(
        &utf8_dir(&temp),
        serde_json::json!({
            "algoseek_data": "https://algoseek.test/nasdaq100_min.zip?sig=abc",
            "login": { "username": "analyst", "password": "secret" },
        }),
    );
    let transport = StaticTransport::new(zip_bytes(&[("minute/AAPL.csv", b"ts,px\n")]));
    let app = App::new(config, transport);

    let result = app.download_algoseek(&NoopSink).unwrap();
    assert!(result.downloaded);
    assert!(result.path.ends_with("nasdaq100_min.zip"));
    assert!(app.data_dir().root().join("minute").join("AAPL.csv").exists());

    let again = app.download_algoseek(&NoopSink).unwrap();
    assert!(!again.downloaded);
    let calls = app.transport().calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.as_deref(), Some("analyst"));
}
