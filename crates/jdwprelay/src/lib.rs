//! Tunnel a JDWP debugging session between two hosts.
//!
//! A debugger on one machine and a JVM on another each run a relay session.
//! The sessions exchange JDWP packets wrapped in envelopes over a messaging
//! channel, acknowledge every delivery and fail fast when an acknowledgment
//! is overdue.
//!
//! # Crate Structure
//!
//! - [`transport`]: local JDWP socket transport (attach to a JVM or accept a debugger)
//! - [`envelope`]: envelope model and wire codec
//! - [`session`]: relay session, dispatch, channels and the routing hub (behind `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use jdwprelay_transport::*;
}

/// Re-export envelope types.
pub mod envelope {
    pub use jdwprelay_envelope::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use jdwprelay_session::*;
}
