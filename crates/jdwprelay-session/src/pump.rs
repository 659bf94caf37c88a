use jdwprelay_envelope::Envelope;
use tracing::{debug, info};

use crate::session::RelaySession;

/// Stream pump: local packets become `DATA` envelopes for the peer.
///
/// Waits for the peer identity first so no envelope leaves unaddressed.
/// The first read or send error is reported and ends the loop; a read that
/// fails after the local side was detached ends it quietly.
pub(crate) fn run(session: RelaySession) {
    let Some(peer) = session.wait_for_peer() else {
        debug!("stream pump stopped before the peer was known");
        return;
    };
    debug!(peer = %peer, "stream pump started");

    while session.is_running() {
        let packet = match session.transport().read_packet() {
            Ok(packet) => packet,
            Err(err) => {
                if session.is_running() {
                    session.report(err.into());
                    session.local_loop_ended();
                } else {
                    debug!(error = %err, "local read ended after detach");
                }
                break;
            }
        };

        let envelope = Envelope::data(session.self_id(), &peer, packet);
        if let Err(err) = session.send_to_remote(&envelope) {
            if session.is_running() {
                session.report(err);
                session.local_loop_ended();
            }
            break;
        }
    }
    debug!("stream pump stopped");
}

/// Listening mode: accept the debugger, then pump.
pub(crate) fn accept_and_run(session: RelaySession) {
    match session.transport().accept() {
        Ok(()) => {
            info!("debugger connected");
            run(session);
        }
        Err(err) => {
            if session.is_listening() && session.is_running() {
                session.report(err.into());
                session.local_loop_ended();
            } else {
                debug!(error = %err, "accept abandoned");
            }
        }
    }
}
