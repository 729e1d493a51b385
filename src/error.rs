//! Error type shared by the library.

use crate::board::Color;

/// Main error type for the reviewer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("illegal move: {color} {coord}")]
    IllegalMove { color: Color, coord: String },

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("malformed history: {0}")]
    MalformedHistory(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;
