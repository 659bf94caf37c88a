use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use jdwprelay_envelope::{Envelope, MessageType};
use tracing::debug;

use crate::events::SessionEvent;

/// Turns one inbound envelope into a session event, or consumes it.
pub type Handler = Arc<dyn Fn(Envelope) -> Option<SessionEvent> + Send + Sync>;

/// Maps inbound message types to handlers.
///
/// [`DispatchTable::default`] installs the built-in handlers; envelopes of a
/// type with no handler are dropped.
#[derive(Clone)]
pub struct DispatchTable {
    handlers: HashMap<MessageType, Handler>,
}

impl DispatchTable {
    /// A table with no handlers at all.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Install or replace the handler for `msg_type`, returning the previous one.
    pub fn register<F>(&mut self, msg_type: MessageType, handler: F) -> Option<Handler>
    where
        F: Fn(Envelope) -> Option<SessionEvent> + Send + Sync + 'static,
    {
        self.handlers.insert(msg_type, Arc::new(handler))
    }

    pub fn remove(&mut self, msg_type: MessageType) -> Option<Handler> {
        self.handlers.remove(&msg_type)
    }

    pub fn handles(&self, msg_type: MessageType) -> bool {
        self.handlers.contains_key(&msg_type)
    }

    /// Run the handler for the envelope's type.
    pub fn dispatch(&self, envelope: Envelope) -> Option<SessionEvent> {
        match self.handlers.get(&envelope.msg_type) {
            Some(handler) => handler(envelope),
            None => {
                debug!(
                    id = %envelope.id,
                    from = %envelope.from_id,
                    msg_type = %envelope.msg_type,
                    "no handler for message type, dropping"
                );
                None
            }
        }
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.register(MessageType::Handshake, |envelope| {
            Some(SessionEvent::PeerHandshakeReceived {
                peer_id: envelope.other_side_id().map(str::to_string),
            })
        });
        table.register(MessageType::Goodbye, |envelope| {
            Some(SessionEvent::PeerGoodbyeReceived {
                peer_id: envelope.other_side_id().map(str::to_string),
            })
        });
        table.register(MessageType::SingleChat, |envelope| {
            Some(SessionEvent::DataMessageReceived(envelope))
        });
        table.register(MessageType::ServerSentReport, |envelope| {
            Some(SessionEvent::DataMessageReceived(envelope))
        });
        table
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().map(|ty| ty.code()).collect();
        types.sort_unstable();
        f.debug_struct("DispatchTable")
            .field("handlers", &types)
            .finish()
    }
}
