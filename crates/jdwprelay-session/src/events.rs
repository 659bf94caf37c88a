use jdwprelay_envelope::Envelope;

/// Topics the dispatch table produces for the session wrapper.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Tunneled data or a delivery acknowledgment.
    DataMessageReceived(Envelope),
    /// The peer announced itself. `peer_id` is `extend.other_side_id`.
    PeerHandshakeReceived { peer_id: Option<String> },
    /// The peer is leaving. `peer_id` is `extend.other_side_id`.
    PeerGoodbyeReceived { peer_id: Option<String> },
}

impl SessionEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            SessionEvent::DataMessageReceived(_) => "data_message_received",
            SessionEvent::PeerHandshakeReceived { .. } => "peer_handshake_received",
            SessionEvent::PeerGoodbyeReceived { .. } => "peer_goodbye_received",
        }
    }
}
