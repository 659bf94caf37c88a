use std::sync::Arc;

use jdwprelay_session::Hub;

use crate::cmd::{install_ctrlc_handler, HubArgs};
use crate::exit::{channel_error, CliResult, SUCCESS};
use crate::output::{print_event, OutputFormat, RelayEvent};

pub fn run(args: HubArgs, format: OutputFormat) -> CliResult<i32> {
    let hub = Arc::new(
        Hub::bind(&args.address).map_err(|err| channel_error("hub bind failed", &err))?,
    );

    let stopping = Arc::clone(&hub);
    install_ctrlc_handler(move || stopping.stop())?;

    print_event(
        &RelayEvent::HubListening {
            address: hub.local_addr().to_string(),
        },
        format,
    );

    hub.serve()
        .map_err(|err| channel_error("hub failed", &err))?;
    Ok(SUCCESS)
}
