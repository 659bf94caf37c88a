/// Errors that can occur on the local byte-stream transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to attach to the debuggee at the specified address.
    #[error("failed to attach to {address}: {source}")]
    Attach {
        address: String,
        source: std::io::Error,
    },

    /// Failed to bind a listener to the specified address.
    #[error("failed to listen on {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The JDWP handshake string did not match.
    #[error("JDWP handshake failed: {0}")]
    Handshake(String),

    /// The packet header declares a length that cannot be valid.
    #[error("invalid packet length {0}")]
    InvalidPacketLength(usize),

    /// The packet exceeds the configured maximum size.
    #[error("packet too large ({size} bytes, max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// No connection is attached or accepted.
    #[error("transport not connected")]
    NotConnected,

    /// `accept` was called without a listener.
    #[error("transport not listening")]
    NotListening,

    /// The connection was closed (by the remote side or by `close`).
    #[error("connection closed")]
    ConnectionClosed,

    /// The listener has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
