use std::thread;

use tracing::debug;

use crate::session::RelaySession;

/// Overtime sweeper: wakes every `sweep_interval` while the session runs and
/// fails it on the first envelope left unacknowledged past the threshold.
///
/// Teardown unparks the thread, so it exits without waiting out the interval.
pub(crate) fn run(session: RelaySession) {
    let interval = session.config().sweep_interval;
    debug!(?interval, "overtime sweeper started");

    while session.is_running() {
        thread::park_timeout(interval);
        if !session.is_running() {
            break;
        }
        if session.sweep_once() {
            break;
        }
    }
    debug!("overtime sweeper stopped");
}
