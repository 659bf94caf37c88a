use std::fmt;
use std::io;

use jdwprelay_envelope::EnvelopeError;
use jdwprelay_session::{ChannelError, SessionError};
use jdwprelay_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const CHANNEL_ERROR: i32 = 4;
pub const PROTOCOL_VIOLATION: i32 = 20;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const UNAVAILABLE: i32 = 69;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: &io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => UNAVAILABLE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: &TransportError) -> CliError {
    match err {
        TransportError::Attach { source, .. }
        | TransportError::Bind { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Handshake(_)
        | TransportError::InvalidPacketLength(_)
        | TransportError::PacketTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        TransportError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn envelope_error(context: &str, err: &EnvelopeError) -> CliError {
    match err {
        EnvelopeError::Io(source) => io_error(context, source),
        EnvelopeError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn channel_error(context: &str, err: &ChannelError) -> CliError {
    match err {
        ChannelError::Bind { source, .. } | ChannelError::Io(source) => io_error(context, source),
        ChannelError::Connect { .. } | ChannelError::NetworkUnavailable => {
            CliError::new(UNAVAILABLE, format!("{context}: {err}"))
        }
        ChannelError::Envelope(inner) => envelope_error(context, inner),
        ChannelError::NoHosts => CliError::usage(format!("{context}: {err}")),
        other => CliError::new(CHANNEL_ERROR, format!("{context}: {other}")),
    }
}

pub fn session_error(context: &str, err: &SessionError) -> CliError {
    match err {
        SessionError::Transport(inner) => transport_error(context, inner),
        SessionError::Channel(inner) => channel_error(context, inner),
        SessionError::DeliveryTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        SessionError::PeerUnknown { .. }
        | SessionError::PeerMismatch { .. }
        | SessionError::PeerChanged { .. }
        | SessionError::MissingPeerIdentity(_) => {
            CliError::new(PROTOCOL_VIOLATION, format!("{context}: {err}"))
        }
        SessionError::InvalidState { .. }
        | SessionError::DuplicatePending(_)
        | SessionError::AlreadyAcknowledged(_) => {
            CliError::new(INTERNAL, format!("{context}: {err}"))
        }
        SessionError::Spawn(source) => io_error(context, source),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn delivery_timeout_maps_to_timeout_code() {
        let err = session_error(
            "relay failed",
            &SessionError::DeliveryTimeout {
                id: "7".to_string(),
                age: Duration::from_secs(61),
            },
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("relay failed: "));
    }

    #[test]
    fn peer_violations_map_to_protocol_code() {
        let err = session_error(
            "relay failed",
            &SessionError::PeerChanged {
                current: "a".to_string(),
                announced: "b".to_string(),
            },
        );
        assert_eq!(err.code, PROTOCOL_VIOLATION);
    }

    #[test]
    fn refused_attach_is_unavailable() {
        let err = transport_error(
            "attach failed",
            &TransportError::Attach {
                address: "127.0.0.1:1".to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            },
        );
        assert_eq!(err.code, UNAVAILABLE);
    }

    #[test]
    fn nested_channel_errors_unwrap() {
        let err = session_error(
            "start failed",
            &SessionError::Channel(ChannelError::Envelope(EnvelopeError::InvalidMagic)),
        );
        assert_eq!(err.code, DATA_INVALID);
    }
}
