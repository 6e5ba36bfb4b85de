use thiserror::Error;

/// Common error type for statsight components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration file not found: {path}")]
    NotFound { path: String },

    #[error("Failed to parse configuration document: {0}")]
    Parse(String),

    #[error("Malformed configuration document: {0}")]
    Malformed(String),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<json5::Error> for Error {
    fn from(e: json5::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

/// Result type alias using statsight's Error.
pub type Result<T> = std::result::Result<T, Error>;
