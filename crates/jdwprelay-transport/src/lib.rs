//! Local byte-stream transport for the JDWP relay.
//!
//! This is the lowest layer of jdwprelay: the debuggee (or debugger) side of
//! the tunnel. It hands out whole JDWP packets, one per call, over:
//! - a TCP socket speaking the JDWP socket transport ([`SocketTransport`])
//! - an in-process pipe for tests and embedding ([`MemoryTransport`])
//!
//! Everything above this layer only sees the [`LocalTransport`] trait.

pub mod error;
pub mod memory;
pub mod packet;
pub mod socket;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{MemoryPeer, MemoryTransport};
pub use packet::{
    PacketHeader, PacketReader, PacketWriter, DEFAULT_MAX_PACKET, HEADER_SIZE, JDWP_HANDSHAKE,
};
pub use socket::{SocketTransport, TransportConfig};
pub use traits::LocalTransport;
