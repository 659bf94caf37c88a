use bytes::Bytes;

use crate::error::Result;

/// A duplex, packet-oriented local transport.
///
/// The relay session owns one transport for its whole lifetime and drives it
/// from several threads at once: the stream pump blocks in
/// [`read_packet`](LocalTransport::read_packet) while the inbound path calls
/// [`write_packet`](LocalTransport::write_packet) and teardown calls
/// [`close`](LocalTransport::close). Implementations must therefore take
/// `&self` and synchronize internally. `close` must unblock a pending read.
pub trait LocalTransport: Send + Sync {
    /// Connect to a listening debuggee and perform the transport handshake.
    fn attach(&self, address: &str) -> Result<()>;

    /// Bind a listener for an incoming debugger connection.
    ///
    /// Returns the bound address (useful when binding port 0).
    fn start_listening(&self, address: &str) -> Result<String>;

    /// Accept one connection on the listener and perform the handshake (blocking).
    fn accept(&self) -> Result<()>;

    /// Drop the listener. A pending `accept` fails with `Shutdown`.
    fn stop_listening(&self) -> Result<()>;

    /// Close the current connection. Closing an already closed transport is a no-op.
    fn close(&self) -> Result<()>;

    /// Whether a connection is currently established.
    fn is_open(&self) -> bool;

    /// Read exactly one packet (blocking).
    fn read_packet(&self) -> Result<Bytes>;

    /// Write exactly one packet.
    fn write_packet(&self, packet: &[u8]) -> Result<()>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}
