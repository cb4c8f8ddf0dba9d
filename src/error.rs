use std::path::PathBuf;
use thiserror::Error;

/// Failure observed by the consuming side of a transfer.
///
/// Producer-side problems never surface here except through
/// [`StreamError::Aborted`]; everything else is contained and logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Stream aborted by application")]
    Aborted,

    #[error("Stream replaced by a newer registration of the same id")]
    Replaced,
}

#[derive(Error, Debug)]
pub enum HandoffError {
    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HandoffError>;
