//! Reliable relay session for tunneling a JDWP byte-stream over an
//! asynchronous envelope channel.
//!
//! A [`RelaySession`] reads packets from a local transport, sends each one to
//! the remote peer as a `DATA` envelope and tracks it until the peer's
//! delivery acknowledgment arrives. Inbound data is acknowledged and written
//! to the local transport. A sweeper fails the whole session when an
//! acknowledgment is overdue.

pub mod channel;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod hooks;
pub mod hub;
pub mod loopback;
pub mod pending;
mod pump;
pub mod session;
pub mod stream_channel;
mod sweeper;
pub mod wrapper;

pub use channel::MessageChannel;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChannelConfig, SessionConfig};
pub use dispatch::{DispatchTable, Handler};
pub use error::{ChannelError, Result, SessionError};
pub use events::SessionEvent;
pub use hooks::{default_handshake, ChannelHooks, SessionHooks};
pub use hub::Hub;
pub use loopback::LoopbackChannel;
pub use pending::{Admission, PendingAckTable};
pub use session::{RelaySession, SessionBuilder, SessionState};
pub use stream_channel::StreamChannel;
pub use wrapper::{stream_session, SessionWrapper};
