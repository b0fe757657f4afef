use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MofError {
    #[error("invalid collection selection: {0}")]
    InvalidSelection(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("failed to decode {0}")]
    Decode(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
