use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::Credentials;
use crate::domain::{ArchiveKind, Locator};
use crate::error::AssetError;
use crate::fs_util;
use crate::http::Transport;
use crate::store::DataDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    AlreadyPresent,
    Downloaded { bytes: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    AlreadyPresent,
    Extracted(ArchiveKind),
    /// The archive unpacked but the marker path is still absent. Extracted
    /// files and the archive are left in place.
    MarkerMissing(ArchiveKind),
}

pub struct Fetcher<'a, T: Transport> {
    transport: &'a T,
}

impl<'a, T: Transport> Fetcher<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    pub fn fetch_file(
        &self,
        url: &Locator,
        target: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<FetchOutcome, AssetError> {
        if target.as_std_path().exists() {
            info!(%target, "already present, skipping download");
            sink.event(ProgressEvent::message(format!(
                "phase=Fetch; {} already present",
                display_name(target)
            )));
            return Ok(FetchOutcome::AlreadyPresent);
        }

        let bytes = self.download_atomic(url, None, target, sink)?;
        sink.event(ProgressEvent::message(format!(
            "phase=Fetch; downloaded {}",
            display_name(target)
        )));
        Ok(FetchOutcome::Downloaded { bytes })
    }

    /// The archive is removed only when the marker shows up.
    pub fn fetch_and_extract(
        &self,
        url: &Locator,
        archive_path: &Utf8Path,
        extract_dir: &Utf8Path,
        marker: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<ExtractOutcome, AssetError> {
        if marker.as_std_path().exists() {
            info!(%marker, "marker present, skipping archive fetch");
            return Ok(ExtractOutcome::AlreadyPresent);
        }

        self.fresh_archive(url, archive_path, sink)?;
        let kind = fs_util::extract_archive(archive_path.as_std_path(), extract_dir.as_std_path())?;
        sink.event(ProgressEvent::message(format!(
            "phase=Extract; unpacked {kind} archive into {}",
            display_name(extract_dir)
        )));

        if marker.as_std_path().exists() {
            DataDir::remove_file_if_exists(archive_path.as_std_path())?;
            Ok(ExtractOutcome::Extracted(kind))
        } else {
            warn!(%marker, %extract_dir, "archive unpacked but expected entry is missing");
            Ok(ExtractOutcome::MarkerMissing(kind))
        }
    }

    pub fn fetch_archive_entry(
        &self,
        url: &Locator,
        target: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<FetchOutcome, AssetError> {
        if target.as_std_path().exists() {
            info!(%target, "already present, skipping archive download");
            sink.event(ProgressEvent::message(format!(
                "phase=Fetch; {} already present",
                display_name(target)
            )));
            return Ok(FetchOutcome::AlreadyPresent);
        }

        let (archive_path, scratch_dir) = scratch_paths(target)?;
        let bytes = self.fresh_archive(url, &archive_path, sink)?;

        DataDir::remove_dir_if_exists(scratch_dir.as_std_path())?;
        fs_util::extract_archive(archive_path.as_std_path(), scratch_dir.as_std_path())?;
        sink.event(ProgressEvent::message(format!(
            "phase=Extract; unpacked {}",
            display_name(&archive_path)
        )));

        let entry = fs_util::first_file(scratch_dir.as_std_path())?.ok_or_else(|| {
            AssetError::Extraction(format!("{} contains no files", archive_path))
        })?;
        fs::rename(&entry, target.as_std_path()).map_err(|err| {
            AssetError::Filesystem(format!("move {} -> {target}: {err}", entry.display()))
        })?;
        DataDir::remove_dir_if_exists(scratch_dir.as_std_path())?;
        DataDir::remove_file_if_exists(archive_path.as_std_path())?;

        sink.event(ProgressEvent::message(format!(
            "phase=Fetch; unzipped and stored {}",
            display_name(target)
        )));
        Ok(FetchOutcome::Downloaded { bytes })
    }

    pub fn fetch_large(
        &self,
        url: &Locator,
        credentials: Option<&Credentials>,
        target: &Utf8Path,
        extract_into: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<FetchOutcome, AssetError> {
        if target.as_std_path().exists() {
            info!(%target, "already present, skipping large download");
            return Ok(FetchOutcome::AlreadyPresent);
        }

        let bytes = self.download_atomic(url, credentials, target, sink)?;
        let kind = fs_util::extract_archive(target.as_std_path(), extract_into.as_std_path())?;
        sink.event(ProgressEvent::message(format!(
            "phase=Extract; unpacked {kind} archive {}",
            display_name(target)
        )));
        Ok(FetchOutcome::Downloaded { bytes })
    }

    // An archive left by a failed attempt is kept until the next attempt
    // replaces it.
    fn fresh_archive(
        &self,
        url: &Locator,
        archive_path: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64, AssetError> {
        if archive_path.as_std_path().exists() {
            warn!(%archive_path, "discarding archive from an earlier attempt");
            DataDir::remove_file_if_exists(archive_path.as_std_path())?;
        }
        self.download_atomic(url, None, archive_path, sink)
    }

    fn download_atomic(
        &self,
        url: &Locator,
        credentials: Option<&Credentials>,
        target: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64, AssetError> {
        info!(%url, %target, "downloading");
        sink.event(ProgressEvent::message(format!("phase=Fetch; requesting {url}")));
        let temp = DataDir::temp_sibling(target)?;
        let bytes = self
            .transport
            .download(url, credentials, temp.path(), sink)?;
        DataDir::persist(temp, target)?;
        Ok(bytes)
    }
}

fn scratch_paths(target: &Utf8Path) -> Result<(Utf8PathBuf, Utf8PathBuf), AssetError> {
    let parent = target
        .parent()
        .ok_or_else(|| AssetError::Filesystem(format!("invalid destination path: {target}")))?;
    let stem = target
        .file_stem()
        .ok_or_else(|| AssetError::Filesystem(format!("invalid destination path: {target}")))?;
    Ok((
        parent.join(format!("{stem}_zipped.zip")),
        parent.join(format!("{stem}_unzipped")),
    ))
}

fn display_name(path: &Utf8Path) -> &str {
    path.file_name().unwrap_or(path.as_str())
}
