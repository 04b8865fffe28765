use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AssetError {
    #[error("missing settings file at {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read settings file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON settings: {0}")]
    ConfigParse(String),

    #[error("settings key not found: {0}")]
    #[diagnostic(help("add \"{0}\" to the settings JSON object"))]
    MissingConfigKey(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("{url} returned status {status}: {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("archive extraction failed: {0}")]
    Extraction(String),

    #[error("failed to normalize {source_name}: {message}")]
    Normalization {
        source_name: String,
        message: String,
    },

    #[error("asset store error: {0}")]
    Store(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("assembly lock at {path} is held by {holder}")]
    #[diagnostic(help("if {holder} is no longer running, delete {path}"))]
    Locked { path: String, holder: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    Config,
    Fetch,
    Extraction,
    Normalization,
    Other,
}

impl AssetError {
    pub fn normalization(source_name: impl Into<String>, message: impl ToString) -> Self {
        AssetError::Normalization {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn stage(&self) -> ErrorStage {
        match self {
            AssetError::MissingConfig(_)
            | AssetError::ConfigRead(_)
            | AssetError::ConfigParse(_)
            | AssetError::MissingConfigKey(_) => ErrorStage::Config,
            AssetError::Http(_) | AssetError::HttpStatus { .. } => ErrorStage::Fetch,
            AssetError::Extraction(_) => ErrorStage::Extraction,
            AssetError::Normalization { .. } => ErrorStage::Normalization,
            AssetError::Store(_) | AssetError::Filesystem(_) | AssetError::Locked { .. } => {
                ErrorStage::Other
            }
        }
    }
}
