use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::Locator;
use crate::error::AssetError;

pub const WIKI_PRICES_KEY: &str = "wiki_url";
pub const WIKI_STOCKS_KEY: &str = "wiki_stocks_url";
pub const GECKODRIVER_KEY: &str = "geckodriver_url";
pub const ALGOSEEK_KEY: &str = "algoseek_data";
pub const LOGIN_KEY: &str = "login";
pub const FRED_KEY: &str = "fred_url";
pub const CONSTITUENTS_KEY: &str = "constituents_url";
pub const TIMEOUT_KEY: &str = "timeout_secs";

pub const DEFAULT_FRED_URL: &str = "https://fred.stlouisfed.org/graph/fredgraph.csv";
pub const DEFAULT_CONSTITUENTS_URL: &str =
    "https://en.wikipedia.org/wiki/List_of_S%26P_500_companies";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: Utf8PathBuf,
    pub settings_path: PathBuf,
}

impl PipelineConfig {
    pub fn new(data_dir: impl Into<Utf8PathBuf>, settings_path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            settings_path: settings_path.into(),
        }
    }

    pub fn resolver(&self) -> ConfigResolver {
        ConfigResolver::new(self.settings_path.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// Reads locators from the settings JSON. The file is re-read on every call so
/// edits made between steps are picked up.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    path: PathBuf,
}

impl ConfigResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn resolve(&self, key: &str) -> Result<Locator, AssetError> {
        let settings = self.load()?;
        let value = settings
            .get(key)
            .ok_or_else(|| AssetError::MissingConfigKey(key.to_string()))?;
        Self::locator_from(key, value)
    }

    pub fn resolve_or(&self, key: &str, default: &str) -> Result<Locator, AssetError> {
        let settings = self.load()?;
        match settings.get(key) {
            Some(value) => Self::locator_from(key, value),
            None => default.parse(),
        }
    }

    pub fn wiki_prices_url(&self) -> Result<Locator, AssetError> {
        self.resolve(WIKI_PRICES_KEY)
    }

    pub fn wiki_stocks_url(&self) -> Result<Locator, AssetError> {
        self.resolve(WIKI_STOCKS_KEY)
    }

    pub fn geckodriver_url(&self) -> Result<Locator, AssetError> {
        self.resolve(GECKODRIVER_KEY)
    }

    pub fn algoseek_url(&self) -> Result<Locator, AssetError> {
        self.resolve(ALGOSEEK_KEY)
    }

    pub fn fred_url(&self) -> Result<Locator, AssetError> {
        self.resolve_or(FRED_KEY, DEFAULT_FRED_URL)
    }

    pub fn constituents_url(&self) -> Result<Locator, AssetError> {
        self.resolve_or(CONSTITUENTS_KEY, DEFAULT_CONSTITUENTS_URL)
    }

    pub fn login(&self) -> Result<Option<Credentials>, AssetError> {
        let settings = self.load()?;
        match settings.get(LOGIN_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|err| AssetError::ConfigParse(format!("{LOGIN_KEY}: {err}"))),
        }
    }

    pub fn timeout_secs(&self) -> Result<Option<u64>, AssetError> {
        let settings = self.load()?;
        match settings.get(TIMEOUT_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| {
                AssetError::ConfigParse(format!("{TIMEOUT_KEY} must be a positive integer"))
            }),
        }
    }

    fn load(&self) -> Result<Map<String, Value>, AssetError> {
        if !self.path.exists() {
            return Err(AssetError::MissingConfig(self.path.clone()));
        }
        let content =
            fs::read_to_string(&self.path).map_err(|_| AssetError::ConfigRead(self.path.clone()))?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|err| AssetError::ConfigParse(err.to_string()))?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(AssetError::ConfigParse(
                "settings root must be a JSON object".to_string(),
            )),
        }
    }

    fn locator_from(key: &str, value: &Value) -> Result<Locator, AssetError> {
        value
            .as_str()
            .ok_or_else(|| AssetError::ConfigParse(format!("{key} must be a string")))?
            .parse()
    }
}
