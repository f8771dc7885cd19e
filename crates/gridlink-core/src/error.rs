use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridlinkError {
    #[error("Invalid grid dimensions: {columns}x{rows}")]
    InvalidDimensions { columns: usize, rows: usize },

    #[error("Coordinate ({x}, {y}) outside {columns}x{rows} grid")]
    OutOfRange {
        x: usize,
        y: usize,
        columns: usize,
        rows: usize,
    },

    #[error("Index {index} outside grid of {len} cells")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Level payload has {actual} values, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Level {level} at index {index} exceeds 15")]
    LevelOutOfRange { index: usize, level: u8 },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Transport unavailable")]
    TransportUnavailable,

    #[error("Connection lost (close code {code})")]
    ConnectionLost { code: u16 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GridlinkError>;
