use jdwprelay_envelope::Envelope;

use crate::error::{ChannelError, SessionError};

/// Capabilities the owning application supplies to a relay session.
pub trait SessionHooks: Send + Sync {
    /// Whether the network is usable. The channel checks this before connecting.
    fn network_available(&self) -> bool {
        true
    }

    /// Build the handshake announcing `self_id` to `to_id` (empty when the
    /// peer is not known yet).
    fn handshake_envelope(&self, self_id: &str, to_id: &str) -> Envelope;

    fn heartbeat_envelope(&self, self_id: &str) -> Envelope {
        Envelope::heartbeat(self_id)
    }

    /// Called for every reported failure. Fatal errors arrive exactly once.
    fn on_error(&self, error: &SessionError);

    /// Called the first time a peer identity is observed.
    fn on_peer_handshake(&self, peer_id: &str);

    /// Called after the peer's goodbye has been validated and the session closed.
    fn on_peer_goodbye(&self, peer_id: &str);
}

/// Hooks a messaging channel queries from whatever it is linked to.
pub trait ChannelHooks: Send + Sync {
    fn network_available(&self) -> bool;

    /// Envelope sent right after the link is (re)established.
    fn handshake_envelope(&self) -> Envelope;

    fn heartbeat_envelope(&self) -> Envelope;

    /// Inbound delivery of one envelope addressed to this side.
    fn deliver(&self, envelope: Envelope);

    /// The link failed outside of any `send` call.
    fn on_link_error(&self, error: ChannelError);
}

/// Handshake hook that uses the stock [`Envelope::handshake`] layout.
pub fn default_handshake(self_id: &str, to_id: &str) -> Envelope {
    Envelope::handshake(self_id, to_id)
}
