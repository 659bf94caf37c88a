use std::time::Duration;

use jdwprelay_envelope::MessageType;

use crate::session::SessionState;

/// Errors raised by a messaging channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel has no hooks installed; call `link` first.
    #[error("channel not linked")]
    NotLinked,

    /// `link` was called on a channel that is already linked.
    #[error("channel already linked")]
    AlreadyLinked,

    /// The owner reported that the network is unavailable.
    #[error("network unavailable")]
    NetworkUnavailable,

    /// No host is configured for the channel.
    #[error("no hosts configured")]
    NoHosts,

    /// Every connect attempt to every configured host failed.
    #[error("failed to connect to {hosts} after {attempts} attempt(s): {source}")]
    Connect {
        hosts: String,
        attempts: u32,
        source: std::io::Error,
    },

    /// Failed to bind a hub listener.
    #[error("failed to listen on {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    /// Envelope encode/decode error.
    #[error("envelope error: {0}")]
    Envelope(#[from] jdwprelay_envelope::EnvelopeError),

    /// An I/O error occurred on the channel.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote end of the channel went away.
    #[error("channel closed")]
    Closed,
}

/// Errors raised by a relay session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Local byte-stream transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] jdwprelay_transport::TransportError),

    /// Messaging channel failure.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Tunneled data arrived before the peer identity was known.
    #[error("data envelope {id} received before the peer handshake")]
    PeerUnknown { id: String },

    /// A goodbye named a host other than the current peer.
    #[error("goodbye from {actual} does not match peer {}", .expected.as_deref().unwrap_or("<none>"))]
    PeerMismatch {
        expected: Option<String>,
        actual: String,
    },

    /// A handshake announced a different identity than the recorded peer.
    #[error("peer {current} re-announced as {announced}")]
    PeerChanged { current: String, announced: String },

    /// A control envelope carried no sender identity.
    #[error("{0} envelope carries no other_side_id")]
    MissingPeerIdentity(MessageType),

    /// An envelope stayed unacknowledged past the sweep threshold.
    #[error("envelope {id} unacknowledged for {age:?}")]
    DeliveryTimeout { id: String, age: Duration },

    /// An envelope with the same id is still awaiting acknowledgment.
    #[error("envelope {0} is already pending")]
    DuplicatePending(String),

    /// The id was already acknowledged and cannot be sent again.
    #[error("envelope {0} was already acknowledged")]
    AlreadyAcknowledged(String),

    /// The operation is not valid in the current lifecycle state.
    #[error("cannot {operation} in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Failed to spawn a worker thread.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl SessionError {
    /// Whether the error ends the session.
    ///
    /// Protocol violations and delivery timeouts are fatal. Transport and
    /// channel failures end only the loop that hit them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::PeerUnknown { .. }
                | SessionError::PeerMismatch { .. }
                | SessionError::PeerChanged { .. }
                | SessionError::MissingPeerIdentity(_)
                | SessionError::DeliveryTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_violations_are_fatal() {
        assert!(SessionError::PeerUnknown { id: "1".into() }.is_fatal());
        assert!(SessionError::PeerMismatch {
            expected: Some("a".into()),
            actual: "b".into()
        }
        .is_fatal());
        assert!(SessionError::DeliveryTimeout {
            id: "3".into(),
            age: Duration::from_secs(61)
        }
        .is_fatal());
        assert!(!SessionError::Channel(ChannelError::Closed).is_fatal());
        assert!(!SessionError::DuplicatePending("x".into()).is_fatal());
        assert!(!SessionError::AlreadyAcknowledged("x".into()).is_fatal());
    }

    #[test]
    fn mismatch_message_names_both_sides() {
        let err = SessionError::PeerMismatch {
            expected: None,
            actual: "intruder".into(),
        };
        assert_eq!(
            err.to_string(),
            "goodbye from intruder does not match peer <none>"
        );
    }
}
