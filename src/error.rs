use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("episode {title:?} has no destination path")]
    MissingPath { title: String },

    #[error("transfer failed for {title:?}: {reason}")]
    Transfer { title: String, reason: String },

    #[error("transfer for {title:?} did not start within {secs}s")]
    StartTimeout { title: String, secs: u64 },
}

impl WatchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
