//! Envelope model and wire codec for the relay's messaging channel.
//!
//! An [`Envelope`] is the unit the two relay peers exchange. On a byte
//! stream every envelope is framed with:
//! - A 2-byte magic number ("JR") for stream synchronization
//! - A 4-byte little-endian length of the JSON head
//! - A 4-byte little-endian content length (`u32::MAX` = no content)
//!
//! followed by the head and the raw content bytes.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use codec::EnvelopeCodec;
pub use codec::{
    decode_envelope, encode_envelope, EnvelopeConfig, DEFAULT_MAX_CONTENT, DEFAULT_MAX_HEAD,
    DEFAULT_WRITE_TIMEOUT, HEADER_SIZE,
};
pub use envelope::{Envelope, MessageType, DELIVERY_ACK, OTHER_SIDE_ID};
pub use error::{EnvelopeError, Result};
pub use reader::EnvelopeReader;
pub use writer::EnvelopeWriter;
