use thiserror::Error;

use crate::validate::BatchRejection;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error(transparent)]
    Rejected(#[from] BatchRejection),

    #[error("Batch not found: {0}")]
    BatchNotFound(crate::core::task::BatchId),

    #[error("Coordinator unavailable: {0}")]
    Coordinator(String),
}

pub type Result<T> = std::result::Result<T, Error>;
