use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalsyncError {
    #[error("Invalid cluster configuration: {0}")]
    Config(String),

    #[error("Corrupt persisted state in {}: {source}", path.display())]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CalsyncError>;
