use jdwprelay_session::stream_session;
use jdwprelay_transport::TransportConfig;

use crate::cmd::{interrupt_flag, supervise, EventHooks, ListenArgs};
use crate::exit::{session_error, CliResult};
use crate::output::{print_event, OutputFormat, RelayEvent};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let running = interrupt_flag()?;
    let (hooks, notices) = EventHooks::channel();

    let mut session_config = args.relay.session_config();
    session_config.initial_peer = Some(args.peer.clone());

    let session = stream_session(
        args.relay.id.clone(),
        args.relay.channel_config(),
        TransportConfig::default(),
        session_config,
        hooks,
    );

    let setup = session
        .start()
        .map_err(|err| session_error("link failed", &err))
        .and_then(|()| {
            print_event(&args.relay.linked_event(), format);
            session
                .send_handshake()
                .map_err(|err| session_error("handshake failed", &err))
        })
        .and_then(|()| {
            session
                .start_listening(&args.address)
                .map_err(|err| session_error("listen failed", &err))
        });

    match setup {
        Ok(address) => {
            print_event(&RelayEvent::Listening { address }, format);
            supervise(&session, notices, &running, format)
        }
        Err(err) => {
            session.shutdown();
            Err(err)
        }
    }
}
