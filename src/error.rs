use std::io;
use std::path::PathBuf;

/// Error type for every fallible deployer operation
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Artifact request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Downloading artifact failed (status code: {status}), URL: {url}")]
    UpstreamStatus { status: u16, url: String },

    #[error("Invalid artifact URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to read archive: {0}")]
    ArchiveError(#[from] zip::result::ZipError),

    #[error("Refusing to extract unsafe archive entry '{0}'")]
    UnsafeEntry(String),

    #[error("Extraction failed at '{}': {source}", path.display())]
    ExtractionFailed { path: PathBuf, source: io::Error },

    #[error("Post-deploy command failed to start: {0}")]
    CommandSpawnFailed(io::Error),

    #[error("Post-deploy command failed: {0}")]
    CommandFailed(String),

    #[error("Pipeline task aborted: {0}")]
    TaskAborted(#[from] tokio::task::JoinError),

    #[error("Deployment queue is closed")]
    QueueClosed,
}

/// Helper type for Results that use DeployError
pub type Result<T> = std::result::Result<T, DeployError>;
