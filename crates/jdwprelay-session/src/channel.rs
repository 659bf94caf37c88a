use std::sync::Arc;

use jdwprelay_envelope::Envelope;

use crate::error::ChannelError;
use crate::hooks::ChannelHooks;

/// An asynchronous, best-effort envelope link to the other relay peer.
///
/// `send` may be called from several threads at once. Inbound envelopes are
/// handed to [`ChannelHooks::deliver`] on the channel's own thread.
pub trait MessageChannel: Send + Sync {
    /// Register `self_id` and start receiving envelopes.
    fn link(&self, self_id: &str, hooks: Arc<dyn ChannelHooks>) -> Result<(), ChannelError>;

    /// Stop receiving and release the link. Unlinking twice is a no-op.
    ///
    /// May be called from the channel's own delivery thread.
    fn unlink(&self) -> Result<(), ChannelError>;

    /// Send one envelope. Does not wait for any acknowledgment.
    fn send(&self, envelope: &Envelope) -> Result<(), ChannelError>;

    fn is_linked(&self) -> bool;

    /// Channel name for diagnostics.
    fn channel_name(&self) -> &'static str;
}
