use std::sync::{Arc, Weak};

use jdwprelay_envelope::{Envelope, MessageType};
use jdwprelay_transport::{SocketTransport, TransportConfig};
use tracing::debug;

use crate::config::{ChannelConfig, SessionConfig};
use crate::dispatch::DispatchTable;
use crate::error::{ChannelError, Result, SessionError};
use crate::events::SessionEvent;
use crate::hooks::{ChannelHooks, SessionHooks};
use crate::session::{RelaySession, SessionInner};
use crate::stream_channel::StreamChannel;

/// Binds a relay session to its messaging channel.
///
/// The channel sees only [`ChannelHooks`]; inbound envelopes go through the
/// dispatch table and the resulting events drive the session.
pub struct SessionWrapper {
    session: Weak<SessionInner>,
    self_id: String,
    dispatch: DispatchTable,
}

impl SessionWrapper {
    pub(crate) fn new(session: Weak<SessionInner>, self_id: String, dispatch: DispatchTable) -> Self {
        Self {
            session,
            self_id,
            dispatch,
        }
    }

    pub fn dispatch_table(&self) -> &DispatchTable {
        &self.dispatch
    }

    fn session(&self) -> Option<RelaySession> {
        self.session.upgrade().map(RelaySession::from_inner)
    }

    fn handle(&self, session: &RelaySession, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::DataMessageReceived(envelope) => session.on_receive_from_remote(envelope),
            SessionEvent::PeerHandshakeReceived { peer_id } => {
                let peer_id = peer_id.ok_or(SessionError::MissingPeerIdentity(MessageType::Handshake))?;
                if session.observe_handshake(&peer_id)? {
                    session.hooks().on_peer_handshake(&peer_id);
                    if session.config().answer_handshake {
                        session.send_handshake()?;
                    }
                }
                Ok(())
            }
            SessionEvent::PeerGoodbyeReceived { peer_id } => {
                let peer_id = peer_id.ok_or(SessionError::MissingPeerIdentity(MessageType::Goodbye))?;
                session.goodbye(&peer_id)?;
                session.hooks().on_peer_goodbye(&peer_id);
                Ok(())
            }
        }
    }
}

impl ChannelHooks for SessionWrapper {
    fn network_available(&self) -> bool {
        self.session()
            .is_some_and(|session| session.hooks().network_available())
    }

    fn handshake_envelope(&self) -> Envelope {
        match self.session() {
            Some(session) => session.build_handshake(),
            None => Envelope::handshake(&self.self_id, ""),
        }
    }

    fn heartbeat_envelope(&self) -> Envelope {
        match self.session() {
            Some(session) => session.hooks().heartbeat_envelope(&self.self_id),
            None => Envelope::heartbeat(&self.self_id),
        }
    }

    fn deliver(&self, envelope: Envelope) {
        let Some(session) = self.session() else {
            debug!(id = %envelope.id, "session gone, dropping envelope");
            return;
        };
        if session.state().is_terminal() {
            debug!(id = %envelope.id, state = %session.state(), "session ended, dropping envelope");
            return;
        }

        debug!(
            id = %envelope.id,
            from = %envelope.from_id,
            msg_type = %envelope.msg_type,
            "envelope received"
        );
        if let Some(event) = self.dispatch.dispatch(envelope) {
            if let Err(err) = self.handle(&session, event) {
                session.report(err);
            }
        }
    }

    fn on_link_error(&self, error: ChannelError) {
        if let Some(session) = self.session() {
            if !session.state().is_terminal() {
                session.report(error.into());
            }
        }
    }
}

/// A session bound to a [`StreamChannel`] and a JDWP [`SocketTransport`].
pub fn stream_session(
    self_id: impl Into<String>,
    channel_config: ChannelConfig,
    transport_config: TransportConfig,
    session_config: SessionConfig,
    hooks: Arc<dyn SessionHooks>,
) -> RelaySession {
    RelaySession::builder(
        self_id,
        Arc::new(StreamChannel::new(channel_config)),
        Arc::new(SocketTransport::new(transport_config)),
        hooks,
    )
    .with_config(session_config)
    .build()
}
