use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RepackError {
    #[error("failed to open archive {path}: {message}")]
    ArchiveOpen { path: PathBuf, message: String },

    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("progress store error: {0}")]
    Persistence(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("metadata request failed: {0}")]
    MetadataHttp(String),

    #[error("metadata source returned status {status}: {message}")]
    MetadataStatus { status: u16, message: String },

    #[error("sidecar embed failed for {path}: {message}")]
    SidecarEmbed { path: PathBuf, message: String },

    #[error("invalid input path: {0}")]
    InvalidInput(PathBuf),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
