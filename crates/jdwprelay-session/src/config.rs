use std::time::Duration;

use jdwprelay_envelope::EnvelopeConfig;

/// Reconnect interval used when [`ChannelConfig::reconnect_interval`] is zero.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
/// Connect timeout used when [`ChannelConfig::connect_timeout`] is zero.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Heartbeat interval used while in the foreground when the configured one is zero.
pub const DEFAULT_FOREGROUND_HEARTBEAT: Duration = Duration::from_secs(8);
/// Heartbeat interval used while in the background when the configured one is zero.
pub const DEFAULT_BACKGROUND_HEARTBEAT: Duration = Duration::from_secs(30);
/// Resend attempts used when [`ChannelConfig::resend_count`] is zero.
pub const DEFAULT_RESEND_COUNT: u32 = 1;
/// Pause between resend attempts when [`ChannelConfig::resend_interval`] is zero.
pub const DEFAULT_RESEND_INTERVAL: Duration = Duration::from_millis(500);

/// Configuration for a messaging channel.
///
/// Zero values mean "use the channel default".
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Candidate hub addresses (`host:port`), tried in order.
    pub hosts: Vec<String>,
    /// Extra connect rounds after the first one fails.
    pub reconnect_count: u32,
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
    pub foreground_heartbeat_interval: Duration,
    pub background_heartbeat_interval: Duration,
    /// Times an envelope is re-sent over a fresh connection after a write failure.
    pub resend_count: u32,
    pub resend_interval: Duration,
    /// Envelope framing limits for the channel's byte stream.
    pub envelope: EnvelopeConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            reconnect_count: 1,
            reconnect_interval: Duration::ZERO,
            connect_timeout: Duration::ZERO,
            foreground_heartbeat_interval: Duration::ZERO,
            background_heartbeat_interval: Duration::ZERO,
            resend_count: 0,
            resend_interval: Duration::ZERO,
            envelope: EnvelopeConfig::default(),
        }
    }
}

impl ChannelConfig {
    /// Channel config for a single hub address.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            hosts: vec![host.into()],
            ..Self::default()
        }
    }

    pub fn effective_reconnect_interval(&self) -> Duration {
        or_default(self.reconnect_interval, DEFAULT_RECONNECT_INTERVAL)
    }

    pub fn effective_connect_timeout(&self) -> Duration {
        or_default(self.connect_timeout, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn effective_heartbeat_interval(&self, background: bool) -> Duration {
        if background {
            or_default(
                self.background_heartbeat_interval,
                DEFAULT_BACKGROUND_HEARTBEAT,
            )
        } else {
            or_default(
                self.foreground_heartbeat_interval,
                DEFAULT_FOREGROUND_HEARTBEAT,
            )
        }
    }

    pub fn effective_resend_count(&self) -> u32 {
        if self.resend_count == 0 {
            DEFAULT_RESEND_COUNT
        } else {
            self.resend_count
        }
    }

    pub fn effective_resend_interval(&self) -> Duration {
        or_default(self.resend_interval, DEFAULT_RESEND_INTERVAL)
    }
}

/// Configuration for a relay session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the overtime sweeper wakes. Default: 1 s.
    pub sweep_interval: Duration,
    /// Age after which an unacknowledged envelope fails the session. Default: 60 s.
    pub overtime_threshold: Duration,
    /// Send the handshake as part of `start()`. Default: `false`.
    pub handshake_on_start: bool,
    /// Answer the first handshake from a peer with our own. Default: `true`.
    pub answer_handshake: bool,
    /// Identity the initial handshake is addressed to before the peer is known.
    pub initial_peer: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(1),
            overtime_threshold: Duration::from_secs(60),
            handshake_on_start: false,
            answer_handshake: true,
            initial_peer: None,
        }
    }
}

fn or_default(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}
