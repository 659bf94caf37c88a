use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Reserved content marking an envelope as a delivery acknowledgment.
pub const DELIVERY_ACK: &[u8] = b"~OK~";

/// `extend` key carrying the sender's logical peer identity.
pub const OTHER_SIDE_ID: &str = "other_side_id";

/// Application-level message kind.
///
/// Codes follow the chat system the relay rides on. Tunneled bytes travel as
/// [`MessageType::SingleChat`]; delivery acknowledgments are `SingleChat`
/// envelopes carrying [`DELIVERY_ACK`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Handshake,
    Heartbeat,
    Goodbye,
    ClientReceivedReport,
    ServerSentReport,
    SingleChat,
    GroupChat,
    Other(u16),
}

impl MessageType {
    /// Tunneled data.
    pub const DATA: MessageType = MessageType::SingleChat;

    pub fn code(self) -> u16 {
        match self {
            MessageType::Handshake => 1001,
            MessageType::Heartbeat => 1002,
            MessageType::Goodbye => 1003,
            MessageType::ClientReceivedReport => 1009,
            MessageType::ServerSentReport => 1010,
            MessageType::SingleChat => 2001,
            MessageType::GroupChat => 3001,
            MessageType::Other(code) => code,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Handshake => "HANDSHAKE",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::Goodbye => "GOODBYE",
            MessageType::ClientReceivedReport => "CLIENT_MSG_RECEIVED_STATUS_REPORT",
            MessageType::ServerSentReport => "SERVER_MSG_SENT_STATUS_REPORT",
            MessageType::SingleChat => "SINGLE_CHAT",
            MessageType::GroupChat => "GROUP_CHAT",
            MessageType::Other(_) => "OTHER",
        }
    }
}

impl From<u16> for MessageType {
    fn from(code: u16) -> Self {
        match code {
            1001 => MessageType::Handshake,
            1002 => MessageType::Heartbeat,
            1003 => MessageType::Goodbye,
            1009 => MessageType::ClientReceivedReport,
            1010 => MessageType::ServerSentReport,
            2001 => MessageType::SingleChat,
            3001 => MessageType::GroupChat,
            other => MessageType::Other(other),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Other(code) => write!(f, "OTHER({code})"),
            known => f.write_str(known.name()),
        }
    }
}

/// One addressed unit exchanged over the messaging channel.
#[derive(Clone, PartialEq)]
pub struct Envelope {
    /// Unique id; the acknowledgment correlation key.
    pub id: String,
    pub from_id: String,
    /// Empty until the peer identity is known.
    pub to_id: String,
    pub msg_type: MessageType,
    /// Creation time in milliseconds since the Unix epoch. Diagnostics only.
    pub timestamp: u64,
    pub extend: Map<String, Value>,
    /// `None` for pure control envelopes.
    pub content: Option<Bytes>,
}

impl Envelope {
    /// Create an envelope with a fresh id and the current timestamp.
    pub fn new(msg_type: MessageType, from_id: impl Into<String>, to_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            msg_type,
            timestamp: now_millis(),
            extend: Map::new(),
            content: None,
        }
    }

    /// A `DATA` envelope carrying tunneled bytes.
    pub fn data(from_id: &str, to_id: &str, content: impl Into<Bytes>) -> Self {
        Self::new(MessageType::DATA, from_id, to_id).with_content(content)
    }

    /// A handshake announcing `from_id` as the sender's identity.
    pub fn handshake(from_id: &str, to_id: &str) -> Self {
        Self::new(MessageType::Handshake, from_id, to_id).with_extend(OTHER_SIDE_ID, from_id)
    }

    /// A bare heartbeat.
    pub fn heartbeat(from_id: &str) -> Self {
        Self::new(MessageType::Heartbeat, from_id, "")
    }

    /// A goodbye announcing `from_id` as the departing identity.
    pub fn goodbye(from_id: &str, to_id: &str) -> Self {
        Self::new(MessageType::Goodbye, from_id, to_id).with_extend(OTHER_SIDE_ID, from_id)
    }

    /// The acknowledgment for this envelope: same id, sentinel content.
    pub fn delivery_ack(&self, from_id: &str, to_id: &str) -> Self {
        Self {
            id: self.id.clone(),
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            msg_type: MessageType::DATA,
            timestamp: now_millis(),
            extend: Map::new(),
            content: Some(Bytes::from_static(DELIVERY_ACK)),
        }
    }

    pub fn with_content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_extend(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extend.insert(key.to_string(), value.into());
        self
    }

    /// Whether the content is the reserved acknowledgment sentinel.
    pub fn is_delivery_ack(&self) -> bool {
        self.content.as_deref() == Some(DELIVERY_ACK)
    }

    /// The sender's logical identity carried in `extend`.
    pub fn other_side_id(&self) -> Option<&str> {
        self.extend
            .get(OTHER_SIDE_ID)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn content_len(&self) -> usize {
        self.content.as_ref().map_or(0, Bytes::len)
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Envelope");
        dbg.field("id", &self.id)
            .field("from_id", &self.from_id)
            .field("to_id", &self.to_id)
            .field("msg_type", &self.msg_type)
            .field("timestamp", &self.timestamp)
            .field("extend", &self.extend);
        match &self.content {
            Some(_) if self.is_delivery_ack() => dbg.field("content", &"<delivery-ack>"),
            Some(content) => dbg.field("content", &format_args!("<{} bytes>", content.len())),
            None => dbg.field("content", &Option::<Bytes>::None),
        };
        dbg.finish()
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
