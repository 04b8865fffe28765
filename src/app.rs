use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::assets::AssetStore;
use crate::config::{ConfigResolver, PipelineConfig};
use crate::domain::Locator;
use crate::driver::{DriverInstaller, DriverStatus};
use crate::error::AssetError;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::http::Transport;
use crate::normalize::{
    self, MACRO_SERIES, NormalizedTable, TableSummary, macro_start,
};
use crate::store::DataDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssembleAction {
    AlreadyPresent,
    Created,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssembleResult {
    pub action: AssembleAction,
    pub store_path: String,
    pub tables: Vec<TableSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupResult {
    pub data_dir: String,
    pub driver: DriverStatus,
    pub driver_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub path: String,
    pub downloaded: bool,
    pub bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectResult {
    pub store_path: String,
    pub created_at: String,
    pub tables: Vec<TableSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub downloaded: u64,
    pub total: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
    pub transfer: Option<Transfer>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
            transfer: None,
        }
    }

    pub fn transfer(label: &str, downloaded: u64, total: Option<u64>) -> Self {
        Self {
            message: label.to_string(),
            elapsed: None,
            transfer: Some(Transfer { downloaded, total }),
        }
    }

    pub fn timed(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            message: message.into(),
            elapsed: Some(elapsed),
            transfer: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<T: Transport> {
    config: PipelineConfig,
    dir: DataDir,
    transport: T,
}

impl<T: Transport> App<T> {
    pub fn new(config: PipelineConfig, transport: T) -> Self {
        let dir = DataDir::new(config.data_dir.clone());
        Self {
            config,
            dir,
            transport,
        }
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.dir
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn resolver(&self) -> ConfigResolver {
        self.config.resolver()
    }

    pub fn setup(&self, sink: &dyn ProgressSink) -> Result<SetupResult, AssetError> {
        self.dir.ensure_root()?;
        let installer = DriverInstaller::new(&self.dir, &self.transport);
        let status = installer.install(&self.resolver(), sink)?;
        Ok(SetupResult {
            data_dir: self.dir.root().to_string(),
            driver: status,
            driver_path: self.dir.driver_path().to_string(),
        })
    }

    pub fn install_driver(&self, sink: &dyn ProgressSink) -> Result<DriverStatus, AssetError> {
        self.dir.ensure_root()?;
        DriverInstaller::new(&self.dir, &self.transport).install(&self.resolver(), sink)
    }

    pub fn assemble(&self, sink: &dyn ProgressSink) -> Result<AssembleResult, AssetError> {
        let store_path = self.dir.assets_path();
        if self.dir.exists(&store_path) {
            info!(path = %store_path, "asset store present, nothing to do");
            sink.event(ProgressEvent::message(
                "phase=Store; asset store already present",
            ));
            return Ok(AssembleResult {
                action: AssembleAction::AlreadyPresent,
                store_path: store_path.to_string(),
                tables: Vec::new(),
            });
        }

        let lock = self.dir.lock()?;
        info!(lock = %lock.path(), "assembling asset store");
        // A concurrent run may have finished between the check and the lock.
        if self.dir.exists(&store_path) {
            return Ok(AssembleResult {
                action: AssembleAction::AlreadyPresent,
                store_path: store_path.to_string(),
                tables: Vec::new(),
            });
        }

        let start = Instant::now();
        let resolver = self.resolver();
        let fetcher = Fetcher::new(&self.transport);

        let prices_path = self.dir.wiki_prices_path();
        fetcher.fetch_archive_entry(&resolver.wiki_prices_url()?, &prices_path, sink)?;

        let stocks_path = self.dir.wiki_stocks_path();
        fetcher.fetch_file(&resolver.wiki_stocks_url()?, &stocks_path, sink)?;

        let fred = self.fetch_macro(&resolver, sink)?;
        let constituents = self.fetch_constituents(&resolver, sink)?;

        sink.event(ProgressEvent::message("phase=Normalize; parsing price history"));
        let prices = normalize::normalize_prices(prices_path.as_std_path())?;
        sink.event(ProgressEvent::message("phase=Normalize; parsing ticker metadata"));
        let stocks = normalize::normalize_stocks(stocks_path.as_std_path())?;

        let tables = vec![fred, constituents, prices, stocks];
        sink.event(ProgressEvent::message("phase=Store; writing asset store"));
        let store = AssetStore::create(&store_path, &tables)?;
        sink.event(ProgressEvent::timed(
            format!("phase=Store; wrote {} tables", store.keys().len()),
            start.elapsed(),
        ));

        Ok(AssembleResult {
            action: AssembleAction::Created,
            store_path: store_path.to_string(),
            tables: tables.iter().map(NormalizedTable::summary).collect(),
        })
    }

    pub fn download_algoseek(&self, sink: &dyn ProgressSink) -> Result<DownloadResult, AssetError> {
        self.dir.ensure_root()?;
        let resolver = self.resolver();
        let url = resolver.algoseek_url()?;
        let login = resolver.login()?;
        let file_name = url
            .file_name()
            .ok_or_else(|| AssetError::ConfigParse(format!("cannot derive file name from {url}")))?;
        let target = self.dir.download_path(file_name);

        let outcome = Fetcher::new(&self.transport).fetch_large(
            &url,
            login.as_ref(),
            &target,
            self.dir.root(),
            sink,
        )?;
        let bytes = match outcome {
            FetchOutcome::Downloaded { bytes } => Some(bytes),
            FetchOutcome::AlreadyPresent => None,
        };
        Ok(DownloadResult {
            path: target.to_string(),
            downloaded: bytes.is_some(),
            bytes,
        })
    }

    pub fn inspect(&self) -> Result<InspectResult, AssetError> {
        let store = AssetStore::open(&self.dir.assets_path())?;
        let manifest = store.manifest();
        Ok(InspectResult {
            store_path: store.path().to_string(),
            created_at: manifest.created_at.clone(),
            tables: manifest
                .tables
                .iter()
                .map(|entry| TableSummary {
                    key: entry.key.to_string(),
                    index: entry.index.clone(),
                    columns: entry.columns.clone(),
                    rows: entry.rows,
                })
                .collect(),
        })
    }

    fn fetch_macro(
        &self,
        resolver: &ConfigResolver,
        sink: &dyn ProgressSink,
    ) -> Result<NormalizedTable, AssetError> {
        let url = fred_series_url(&resolver.fred_url()?, MACRO_SERIES, macro_start())?;
        sink.event(ProgressEvent::message(format!(
            "phase=Fetch; requesting FRED series {MACRO_SERIES}"
        )));
        let body = self.transport.fetch_text(&url)?;
        let table = normalize::normalize_macro(&body, macro_start())?;
        if table.height() == 0 {
            warn!(%url, "FRED series returned no observations");
        }
        sink.event(ProgressEvent::message(format!(
            "phase=Normalize; FRED {MACRO_SERIES} ({} observations)",
            table.height()
        )));
        Ok(table)
    }

    fn fetch_constituents(
        &self,
        resolver: &ConfigResolver,
        sink: &dyn ProgressSink,
    ) -> Result<NormalizedTable, AssetError> {
        let url = resolver.constituents_url()?;
        sink.event(ProgressEvent::message(
            "phase=Fetch; requesting S&P 500 constituents",
        ));
        let html = self.transport.fetch_text(&url)?;
        let table = normalize::normalize_constituents(&html)?;
        sink.event(ProgressEvent::message(format!(
            "phase=Normalize; S&P 500 constituents ({} tickers)",
            table.height()
        )));
        Ok(table)
    }
}

pub fn fred_series_url(
    base: &Locator,
    series: &str,
    start: chrono::NaiveDate,
) -> Result<Locator, AssetError> {
    let separator = if base.as_str().contains('?') { '&' } else { '?' };
    format!(
        "{}{separator}id={series}&cosd={}",
        base.as_str(),
        start.format("%Y-%m-%d")
    )
    .parse()
}
