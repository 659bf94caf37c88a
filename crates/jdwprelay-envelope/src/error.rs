/// Errors that can occur during envelope encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The frame header contains an invalid magic number.
    #[error("invalid envelope magic (expected 0x4A52 \"JR\")")]
    InvalidMagic,

    /// The JSON head exceeds the configured maximum size.
    #[error("envelope head too large ({size} bytes, max {max})")]
    HeadTooLarge { size: usize, max: usize },

    /// The content exceeds the configured maximum size.
    #[error("envelope content too large ({size} bytes, max {max})")]
    ContentTooLarge { size: usize, max: usize },

    /// The head could not be serialized or parsed.
    #[error("envelope head json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing envelopes.
    #[error("envelope I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete envelope was received.
    #[error("connection closed (incomplete envelope)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;
