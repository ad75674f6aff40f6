use thiserror::Error;

/// Errors from the configuration and report-writing surfaces.
///
/// Index mutations and queries are total functions and never produce these;
/// `remove()` signals not-found through its boolean return instead.
#[derive(Error, Debug)]
pub enum GridError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GridError>;
