use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EtlError {
    #[error("malformed source URL: {0}")]
    MalformedSourceUrl(String),

    #[error("failed to fetch source file: {0}")]
    Fetch(String),

    #[error("source fetch returned status {status}: {message}")]
    FetchStatus { status: u16, message: String },

    #[error("unreadable source file: {0}")]
    FileFormat(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("upload returned status {status}: {message}")]
    UploadStatus { status: u16, message: String },

    #[error("blob storage request failed: {0}")]
    Storage(String),

    #[error("blob storage returned status {status}: {message}")]
    StorageStatus { status: u16, message: String },

    #[error("failed to serialize artifact: {0}")]
    Serialization(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("reference tool failed: {0}")]
    ReferenceTool(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),
}

impl EtlError {
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            EtlError::Fetch(_)
                | EtlError::FetchStatus { .. }
                | EtlError::Upload(_)
                | EtlError::UploadStatus { .. }
                | EtlError::Storage(_)
                | EtlError::StorageStatus { .. }
        )
    }
}
