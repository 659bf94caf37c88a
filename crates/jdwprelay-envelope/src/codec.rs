use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::{Envelope, MessageType};
use crate::error::{EnvelopeError, Result};

/// Frame header: magic (2) + head length (4) + content length (4) = 10 bytes.
pub const HEADER_SIZE: usize = 10;

/// Magic bytes: "JR" (0x4A 0x52).
pub const MAGIC: [u8; 2] = [0x4A, 0x52];

/// Content length marking an envelope without content.
const NO_CONTENT: u32 = u32::MAX;

/// Default maximum head size: 64 KiB.
pub const DEFAULT_MAX_HEAD: usize = 64 * 1024;

/// Default maximum content size: 16 MiB.
pub const DEFAULT_MAX_CONTENT: usize = 16 * 1024 * 1024;

/// Default write timeout for TCP links: 10 seconds.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the envelope codec.
#[derive(Debug, Clone)]
pub struct EnvelopeConfig {
    /// Maximum JSON head size in bytes. Default: 64 KiB.
    pub max_head_size: usize,
    /// Maximum content size in bytes. Default: 16 MiB.
    pub max_content_size: usize,
    /// Upper bound on one blocked socket write before the link counts as
    /// broken. Reads stay untimed; an idle link is healthy.
    pub write_timeout: Option<Duration>,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            max_head_size: DEFAULT_MAX_HEAD,
            max_content_size: DEFAULT_MAX_CONTENT,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireHead {
    id: String,
    from_id: String,
    #[serde(default)]
    to_id: String,
    msg_type: u16,
    #[serde(default)]
    timestamp: u64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    extend: Map<String, Value>,
}

/// Encode an envelope into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────────┬──────────────────┬────────────┬──────────┐
/// │ Magic (2B) │ Head length  │ Content length   │ Head       │ Content  │
/// │ "JR"       │ (4B LE)      │ (4B LE, MAX=none)│ (JSON)     │ (bytes)  │
/// └────────────┴──────────────┴──────────────────┴────────────┴──────────┘
/// ```
pub fn encode_envelope(envelope: &Envelope, dst: &mut BytesMut) -> Result<()> {
    let head = serde_json::to_vec(&WireHead {
        id: envelope.id.clone(),
        from_id: envelope.from_id.clone(),
        to_id: envelope.to_id.clone(),
        msg_type: envelope.msg_type.code(),
        timestamp: envelope.timestamp,
        extend: envelope.extend.clone(),
    })?;

    let content_len = match &envelope.content {
        Some(content) if content.len() >= NO_CONTENT as usize => {
            return Err(EnvelopeError::ContentTooLarge {
                size: content.len(),
                max: NO_CONTENT as usize - 1,
            });
        }
        Some(content) => content.len() as u32,
        None => NO_CONTENT,
    };

    dst.reserve(HEADER_SIZE + head.len() + envelope.content_len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(head.len() as u32);
    dst.put_u32_le(content_len);
    dst.put_slice(&head);
    if let Some(content) = &envelope.content {
        dst.put_slice(content);
    }
    Ok(())
}

/// Decode an envelope from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete envelope yet.
/// On success, consumes the envelope bytes from the buffer.
pub fn decode_envelope(src: &mut BytesMut, config: &EnvelopeConfig) -> Result<Option<Envelope>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(EnvelopeError::InvalidMagic);
    }

    let head_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    let raw_content_len = u32::from_le_bytes([src[6], src[7], src[8], src[9]]);
    let content_len = match raw_content_len {
        NO_CONTENT => None,
        len => Some(len as usize),
    };

    if head_len > config.max_head_size {
        return Err(EnvelopeError::HeadTooLarge {
            size: head_len,
            max: config.max_head_size,
        });
    }
    if let Some(len) = content_len {
        if len > config.max_content_size {
            return Err(EnvelopeError::ContentTooLarge {
                size: len,
                max: config.max_content_size,
            });
        }
    }

    let total = HEADER_SIZE + head_len + content_len.unwrap_or(0);
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let head_bytes = src.split_to(head_len);
    let content = content_len.map(|len| src.split_to(len).freeze());
    let head: WireHead = serde_json::from_slice(&head_bytes)?;

    Ok(Some(Envelope {
        id: head.id,
        from_id: head.from_id,
        to_id: head.to_id,
        msg_type: MessageType::from(head.msg_type),
        timestamp: head.timestamp,
        extend: head.extend,
        content,
    }))
}

/// `tokio_util` codec over the same wire format.
#[cfg(feature = "async")]
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec {
    config: EnvelopeConfig,
}

#[cfg(feature = "async")]
impl EnvelopeCodec {
    pub fn new(config: EnvelopeConfig) -> Self {
        Self { config }
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = EnvelopeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        decode_envelope(src, &self.config)
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Encoder<Envelope> for EnvelopeCodec {
    type Error = EnvelopeError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<()> {
        if item.content_len() > self.config.max_content_size {
            return Err(EnvelopeError::ContentTooLarge {
                size: item.content_len(),
                max: self.config.max_content_size,
            });
        }
        encode_envelope(&item, dst)
    }
}
