use jdwprelay_session::stream_session;
use jdwprelay_transport::TransportConfig;

use crate::cmd::{interrupt_flag, supervise, AttachArgs, EventHooks};
use crate::exit::{session_error, CliResult};
use crate::output::{print_event, OutputFormat, RelayEvent};

pub fn run(args: AttachArgs, format: OutputFormat) -> CliResult<i32> {
    let running = interrupt_flag()?;
    let (hooks, notices) = EventHooks::channel();

    let mut session_config = args.relay.session_config();
    session_config.initial_peer = args.peer.clone();
    session_config.handshake_on_start = args.peer.is_some();

    let transport_config = TransportConfig {
        attach_timeout: Some(args.attach_timeout),
        ..TransportConfig::default()
    };

    let session = stream_session(
        args.relay.id.clone(),
        args.relay.channel_config(),
        transport_config,
        session_config,
        hooks,
    );

    // The debuggee must be attached before the link comes up, so the first
    // tunneled packet always has somewhere to go.
    session
        .attach_local(&args.jvm)
        .map_err(|err| session_error("attach failed", &err))?;
    print_event(
        &RelayEvent::Attached {
            address: args.jvm.clone(),
        },
        format,
    );

    if let Err(err) = session.start() {
        session.shutdown();
        return Err(session_error("link failed", &err));
    }
    print_event(&args.relay.linked_event(), format);

    supervise(&session, notices, &running, format)
}
