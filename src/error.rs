//! Error type for the fallible edges of the engine: config files, history
//! encoding, image I/O and raw buffer validation.
//!
//! Interactive operations never return these. A degenerate marquee or a
//! missing layer simply leaves the previous state in place.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// A raw BGRA buffer did not match its declared dimensions.
    #[error("Buffer size mismatch: {width}x{height} needs {expected} bytes, got {actual}")]
    BufferSizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<Box<bincode::ErrorKind>> for SelectionError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        SelectionError::Serialize(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SelectionError>;
