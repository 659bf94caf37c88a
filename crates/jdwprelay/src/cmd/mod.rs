use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use jdwprelay_envelope::Envelope;
use jdwprelay_session::{
    default_handshake, ChannelConfig, RelaySession, SessionConfig, SessionError, SessionHooks,
};

use crate::exit::{session_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_event, OutputFormat, RelayEvent};

pub mod attach;
pub mod hub;
pub mod listen;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the envelope routing hub.
    Hub(HubArgs),
    /// JVM side: attach to a debuggee's JDWP socket and relay it.
    Attach(AttachArgs),
    /// Debugger side: accept a local debugger and relay it to a peer.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Hub(args) => hub::run(args, format),
        Command::Attach(args) => attach::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct HubArgs {
    /// Address to listen on (e.g. 0.0.0.0:7800).
    pub address: String,
}

/// Options shared by both relay sides.
#[derive(Args, Debug)]
pub struct RelayArgs {
    /// This side's relay identity.
    #[arg(long, env = "JDWPRELAY_ID")]
    pub id: String,
    /// Hub addresses, tried in order (comma-separated).
    #[arg(long, env = "JDWPRELAY_HUB", value_delimiter = ',', required = true)]
    pub hub: Vec<String>,
    /// Extra connect rounds when every hub refuses.
    #[arg(long, default_value = "1")]
    pub reconnect_count: u32,
    /// Hub connect timeout (e.g. 10s, 500ms).
    #[arg(long, value_parser = parse_duration)]
    pub connect_timeout: Option<Duration>,
    /// Heartbeat interval on the hub link.
    #[arg(long, value_parser = parse_duration)]
    pub heartbeat: Option<Duration>,
    /// Re-send attempts for an envelope whose write failed.
    #[arg(long, default_value = "1")]
    pub resend_count: u32,
    /// Fail the session when an envelope stays unacknowledged this long.
    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    pub overtime: Duration,
}

impl RelayArgs {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            hosts: self.hub.clone(),
            reconnect_count: self.reconnect_count,
            connect_timeout: self.connect_timeout.unwrap_or_default(),
            foreground_heartbeat_interval: self.heartbeat.unwrap_or_default(),
            resend_count: self.resend_count,
            ..ChannelConfig::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            overtime_threshold: self.overtime,
            ..SessionConfig::default()
        }
    }

    pub fn linked_event(&self) -> RelayEvent {
        RelayEvent::Linked {
            self_id: self.id.clone(),
            hub: self.hub.join(","),
        }
    }
}

#[derive(Args, Debug)]
pub struct AttachArgs {
    #[command(flatten)]
    pub relay: RelayArgs,
    /// JDWP address of the debuggee (started with server=y).
    #[arg(long)]
    pub jvm: String,
    /// Announce this side to a known peer instead of waiting for its handshake.
    #[arg(long)]
    pub peer: Option<String>,
    /// Timeout for connecting to the debuggee.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub attach_timeout: Duration,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub relay: RelayArgs,
    /// Identity of the JVM-side relay.
    #[arg(long)]
    pub peer: String,
    /// Local address the debugger attaches to.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub address: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// What the session hooks forward to the supervising command.
pub enum Notice {
    Event(RelayEvent),
    Fatal(RelayEvent, CliError),
}

/// Session hooks that forward callbacks to the command loop.
pub struct EventHooks {
    tx: Sender<Notice>,
}

impl EventHooks {
    pub fn channel() -> (Arc<EventHooks>, Receiver<Notice>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(EventHooks { tx }), rx)
    }

    fn notify(&self, notice: Notice) {
        let _ = self.tx.send(notice);
    }
}

impl SessionHooks for EventHooks {
    fn handshake_envelope(&self, self_id: &str, to_id: &str) -> Envelope {
        default_handshake(self_id, to_id)
    }

    fn on_error(&self, error: &SessionError) {
        let fatal = error.is_fatal();
        let event = RelayEvent::Error {
            message: error.to_string(),
            fatal,
        };
        if fatal {
            self.notify(Notice::Fatal(event, session_error("relay failed", error)));
        } else {
            self.notify(Notice::Event(event));
        }
    }

    fn on_peer_handshake(&self, peer_id: &str) {
        self.notify(Notice::Event(RelayEvent::PeerHandshake {
            peer_id: peer_id.to_string(),
        }));
    }

    fn on_peer_goodbye(&self, peer_id: &str) {
        self.notify(Notice::Event(RelayEvent::PeerGoodbye {
            peer_id: peer_id.to_string(),
        }));
    }
}

/// Print session notices until the peer says goodbye, the session fails or
/// Ctrl-C is pressed, then shut the session down.
pub fn supervise(
    session: &RelaySession,
    notices: Receiver<Notice>,
    running: &AtomicBool,
    format: OutputFormat,
) -> CliResult<i32> {
    let outcome = loop {
        if !running.load(Ordering::SeqCst) {
            tracing::info!("interrupted, leaving session");
            break Ok(SUCCESS);
        }
        match notices.recv_timeout(Duration::from_millis(200)) {
            Ok(Notice::Event(event)) => {
                let done = matches!(event, RelayEvent::PeerGoodbye { .. });
                print_event(&event, format);
                if done {
                    break Ok(SUCCESS);
                }
            }
            Ok(Notice::Fatal(event, err)) => {
                print_event(&event, format);
                break Err(err);
            }
            Err(RecvTimeoutError::Timeout) => {
                if session.state().is_terminal() {
                    break Ok(SUCCESS);
                }
            }
            Err(RecvTimeoutError::Disconnected) => break Ok(SUCCESS),
        }
    };

    session.shutdown();
    print_event(
        &RelayEvent::Closed {
            state: session.state().to_string(),
        },
        format,
    );
    outcome
}

pub fn install_ctrlc_handler<F>(on_interrupt: F) -> CliResult<()>
where
    F: FnMut() + Send + 'static,
{
    ctrlc::set_handler(on_interrupt)
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Flag cleared by Ctrl-C.
pub fn interrupt_flag() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    install_ctrlc_handler(move || flag.store(false, Ordering::SeqCst))?;
    Ok(running)
}

/// Parse `5s`, `500ms`, `2m` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = input.strip_suffix('m') {
        (num, 60_000)
    } else {
        (input, 1_000)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration value: {input}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(Duration::from_millis(value.saturating_mul(millis)))
}
