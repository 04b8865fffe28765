use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AssetError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator(String);

impl Locator {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> Option<&str> {
        let without_query = self.0.split(['?', '#']).next().unwrap_or_default();
        without_query
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && !name.contains(':'))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Locator {
    type Err = AssetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(AssetError::ConfigParse("empty locator".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableKey {
    #[serde(rename = "sp500/fred")]
    Sp500Fred,
    #[serde(rename = "sp500/stocks")]
    Sp500Stocks,
    #[serde(rename = "quandl/wiki/prices")]
    WikiPrices,
    #[serde(rename = "quandl/wiki/stocks")]
    WikiStocks,
}

impl TableKey {
    pub const ALL: [TableKey; 4] = [
        TableKey::Sp500Fred,
        TableKey::Sp500Stocks,
        TableKey::WikiPrices,
        TableKey::WikiStocks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableKey::Sp500Fred => "sp500/fred",
            TableKey::Sp500Stocks => "sp500/stocks",
            TableKey::WikiPrices => "quandl/wiki/prices",
            TableKey::WikiStocks => "quandl/wiki/stocks",
        }
    }

    pub fn source_name(&self) -> &'static str {
        match self {
            TableKey::Sp500Fred => "fred",
            TableKey::Sp500Stocks => "sp500 constituents",
            TableKey::WikiPrices => "wiki prices",
            TableKey::WikiStocks => "wiki stocks",
        }
    }

    pub fn member_name(&self) -> String {
        format!("{}.parquet", self.as_str())
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TableKey {
    type Err = AssetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_matches('/');
        TableKey::ALL
            .into_iter()
            .find(|key| key.as_str() == normalized)
            .ok_or_else(|| AssetError::Store(format!("unknown table key: {value}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    pub fn sniff(header: &[u8]) -> Option<Self> {
        if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
            Some(ArchiveKind::Zip)
        } else if header.starts_with(&[0x1f, 0x8b]) {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveKind::Zip => write!(f, "zip"),
            ArchiveKind::TarGz => write!(f, "tar.gz"),
        }
    }
}
