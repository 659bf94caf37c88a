use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use jdwprelay_envelope::Envelope;
use jdwprelay_transport::LocalTransport;
use tracing::{debug, error, info, warn};

use crate::channel::MessageChannel;
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::dispatch::DispatchTable;
use crate::error::{Result, SessionError};
use crate::hooks::{ChannelHooks, SessionHooks};
use crate::pending::{Admission, PendingAckTable};
use crate::wrapper::SessionWrapper;
use crate::{pump, sweeper};

const PEER_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Lifecycle of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Linked,
    Handshaking,
    Active,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::Linked => "linked",
            SessionState::Handshaking => "handshaking",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }

    /// `Closed` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assembles a [`RelaySession`] from its collaborators.
pub struct SessionBuilder {
    self_id: String,
    channel: Arc<dyn MessageChannel>,
    transport: Arc<dyn LocalTransport>,
    hooks: Arc<dyn SessionHooks>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    dispatch: DispatchTable,
}

impl SessionBuilder {
    pub fn new(
        self_id: impl Into<String>,
        channel: Arc<dyn MessageChannel>,
        transport: Arc<dyn LocalTransport>,
        hooks: Arc<dyn SessionHooks>,
    ) -> Self {
        Self {
            self_id: self_id.into(),
            channel,
            transport,
            hooks,
            config: SessionConfig::default(),
            clock: Arc::new(SystemClock),
            dispatch: DispatchTable::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the time source used for acknowledgment ages.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the inbound dispatch table.
    pub fn with_dispatch(mut self, dispatch: DispatchTable) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn build(self) -> RelaySession {
        let inner = Arc::new_cyclic(|weak| SessionInner {
            wrapper: Arc::new(SessionWrapper::new(
                weak.clone(),
                self.self_id.clone(),
                self.dispatch,
            )),
            self_id: self.self_id,
            config: self.config,
            channel: self.channel,
            transport: self.transport,
            hooks: self.hooks,
            clock: self.clock,
            state: Mutex::new(SessionState::Init),
            peer: Mutex::new(None),
            peer_known: Condvar::new(),
            running: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            pending: PendingAckTable::new(),
            workers: Mutex::new(Vec::new()),
        });
        RelaySession { inner }
    }
}

pub(crate) struct SessionInner {
    self_id: String,
    config: SessionConfig,
    channel: Arc<dyn MessageChannel>,
    transport: Arc<dyn LocalTransport>,
    hooks: Arc<dyn SessionHooks>,
    clock: Arc<dyn Clock>,
    wrapper: Arc<SessionWrapper>,
    state: Mutex<SessionState>,
    peer: Mutex<Option<String>>,
    peer_known: Condvar,
    running: AtomicBool,
    listening: AtomicBool,
    pending: PendingAckTable,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// One tunnel between a local JDWP byte-stream and a remote relay peer.
///
/// Cloning yields another handle to the same session. Background loops hold
/// a handle too, so call [`shutdown`](RelaySession::shutdown) to release them.
#[derive(Clone)]
pub struct RelaySession {
    inner: Arc<SessionInner>,
}

impl RelaySession {
    pub fn builder(
        self_id: impl Into<String>,
        channel: Arc<dyn MessageChannel>,
        transport: Arc<dyn LocalTransport>,
        hooks: Arc<dyn SessionHooks>,
    ) -> SessionBuilder {
        SessionBuilder::new(self_id, channel, transport, hooks)
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub fn self_id(&self) -> &str {
        &self.inner.self_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.inner.state)
    }

    /// The peer identity learned from its handshake.
    pub fn peer_id(&self) -> Option<String> {
        lock(&self.inner.peer).clone()
    }

    /// Number of sent envelopes still waiting for an acknowledgment.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.inner.pending.contains(id)
    }

    /// Whether the local loops are allowed to run.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    pub(crate) fn hooks(&self) -> &Arc<dyn SessionHooks> {
        &self.inner.hooks
    }

    pub(crate) fn transport(&self) -> &Arc<dyn LocalTransport> {
        &self.inner.transport
    }

    /// Link the messaging channel: `INIT -> LINKED`.
    ///
    /// The handshake is only sent here when `handshake_on_start` is set;
    /// otherwise call [`send_handshake`](RelaySession::send_handshake).
    pub fn start(&self) -> Result<()> {
        {
            let mut state = lock(&self.inner.state);
            if *state != SessionState::Init {
                return Err(SessionError::InvalidState {
                    operation: "start",
                    state: *state,
                });
            }
            *state = SessionState::Linked;
        }

        let hooks: Arc<dyn ChannelHooks> = self.inner.wrapper.clone();
        if let Err(err) = self.inner.channel.link(&self.inner.self_id, hooks) {
            self.transition(&[SessionState::Linked], SessionState::Init);
            return Err(err.into());
        }
        info!(
            self_id = %self.inner.self_id,
            channel = self.inner.channel.channel_name(),
            "session linked"
        );

        if self.inner.config.handshake_on_start {
            self.send_handshake()?;
        }
        Ok(())
    }

    /// Send the owner's handshake envelope to the peer (or the configured
    /// initial peer).
    pub fn send_handshake(&self) -> Result<()> {
        let state = self.state();
        if !matches!(
            state,
            SessionState::Linked | SessionState::Handshaking | SessionState::Active
        ) {
            return Err(SessionError::InvalidState {
                operation: "send handshake",
                state,
            });
        }

        let envelope = self.build_handshake();
        self.inner.channel.send(&envelope)?;
        debug!(id = %envelope.id, to = %envelope.to_id, "handshake sent");
        Ok(())
    }

    pub(crate) fn build_handshake(&self) -> Envelope {
        let to_id = self
            .peer_id()
            .or_else(|| self.inner.config.initial_peer.clone())
            .unwrap_or_default();
        let envelope = self
            .inner
            .hooks
            .handshake_envelope(&self.inner.self_id, &to_id);
        self.transition(&[SessionState::Linked], SessionState::Handshaking);
        envelope
    }

    /// Tell the peer we are leaving: sends `GOODBYE` and enters `CLOSING`.
    ///
    /// The local side stays up until the owner calls
    /// [`shutdown`](RelaySession::shutdown).
    pub fn stop(&self) -> Result<()> {
        let state = self.state();
        let peer = match (state, self.peer_id()) {
            (
                SessionState::Linked | SessionState::Handshaking | SessionState::Active,
                Some(peer),
            ) => peer,
            _ => {
                return Err(SessionError::InvalidState {
                    operation: "stop",
                    state,
                })
            }
        };

        self.inner
            .channel
            .send(&Envelope::goodbye(&self.inner.self_id, &peer))?;
        self.transition(
            &[
                SessionState::Linked,
                SessionState::Handshaking,
                SessionState::Active,
            ],
            SessionState::Closing,
        );
        info!(peer = %peer, "goodbye sent");
        Ok(())
    }

    /// Full owner-driven teardown. Idempotent.
    pub fn shutdown(&self) {
        let state = self.state();
        if matches!(
            state,
            SessionState::Linked | SessionState::Handshaking | SessionState::Active
        ) {
            if let Some(peer) = self.peer_id() {
                if let Err(err) = self
                    .inner
                    .channel
                    .send(&Envelope::goodbye(&self.inner.self_id, &peer))
                {
                    warn!(peer = %peer, error = %err, "failed to send goodbye");
                }
            }
        }

        self.close();
        debug!(self_id = %self.inner.self_id, state = %self.state(), "session shut down");
    }

    /// Attach the local transport to a listening debuggee and start the
    /// stream pump and overtime sweeper.
    pub fn attach_local(&self, address: &str) -> Result<()> {
        self.ensure_local_idle("attach local")?;
        self.inner.transport.attach(address)?;
        self.inner.running.store(true, Ordering::SeqCst);

        let spawned = self
            .spawn_worker("jdwprelay-pump", pump::run)
            .and_then(|()| self.spawn_worker("jdwprelay-sweeper", sweeper::run));
        if let Err(err) = spawned {
            self.detach_local();
            return Err(err);
        }

        info!(
            address,
            transport = self.inner.transport.transport_name(),
            "local transport attached"
        );
        Ok(())
    }

    /// Stop the local loops and close the local transport. Idempotent.
    ///
    /// Also drops a pending debugger listener.
    pub fn detach_local(&self) {
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        self.stop_listening();
        if let Err(err) = self.inner.transport.close() {
            warn!(error = %err, "failed to close local transport");
        }
        self.inner.peer_known.notify_all();
        self.join_workers();
        if was_running {
            info!(self_id = %self.inner.self_id, "local transport detached");
        }
    }

    /// Bind a listener for the debugger and relay its connection once accepted.
    ///
    /// Returns the bound address. The sweeper starts immediately; the pump
    /// starts when the debugger connects.
    pub fn start_listening(&self, address: &str) -> Result<String> {
        self.ensure_local_idle("start listening")?;
        let bound = self.inner.transport.start_listening(address)?;
        self.inner.listening.store(true, Ordering::SeqCst);
        self.inner.running.store(true, Ordering::SeqCst);

        let spawned = self
            .spawn_worker("jdwprelay-sweeper", sweeper::run)
            .and_then(|()| self.spawn_worker("jdwprelay-accept", pump::accept_and_run));
        if let Err(err) = spawned {
            self.detach_local();
            return Err(err);
        }

        info!(address = %bound, "listening for debugger");
        Ok(bound)
    }

    /// Drop the debugger listener. An accepted connection keeps running.
    pub fn stop_listening(&self) {
        if self.inner.listening.swap(false, Ordering::SeqCst) {
            if let Err(err) = self.inner.transport.stop_listening() {
                warn!(error = %err, "failed to stop listening");
            }
        }
    }

    /// Send one envelope to the peer, tracking it for acknowledgment iff it
    /// carries content. Never waits for the acknowledgment.
    pub fn send_to_remote(&self, envelope: &Envelope) -> Result<()> {
        let tracked = envelope.content.is_some();
        if tracked {
            match self.inner.pending.insert(&envelope.id, self.inner.clock.now()) {
                Admission::Tracked => {}
                Admission::AlreadyPending => {
                    return Err(SessionError::DuplicatePending(envelope.id.clone()))
                }
                Admission::AlreadyAcknowledged => {
                    return Err(SessionError::AlreadyAcknowledged(envelope.id.clone()))
                }
            }
        }

        if let Err(err) = self.inner.channel.send(envelope) {
            if tracked {
                self.inner.pending.discard(&envelope.id);
            }
            return Err(err.into());
        }
        debug!(
            id = %envelope.id,
            to = %envelope.to_id,
            size = envelope.content_len(),
            "envelope sent"
        );
        Ok(())
    }

    /// Inbound data path: acknowledgments clear the pending table, data is
    /// acknowledged and written to the local transport.
    pub fn on_receive_from_remote(&self, envelope: Envelope) -> Result<()> {
        if envelope.is_delivery_ack() {
            match self.inner.pending.acknowledge(&envelope.id) {
                Some(sent_at) => debug!(
                    id = %envelope.id,
                    rtt = ?self.inner.clock.now().saturating_duration_since(sent_at),
                    "delivery acknowledged"
                ),
                None => debug!(id = %envelope.id, "acknowledgment for unknown or settled envelope"),
            }
            return Ok(());
        }

        let Some(content) = envelope.content.as_ref() else {
            debug!(id = %envelope.id, "envelope without content ignored");
            return Ok(());
        };
        let peer = self.peer_id().ok_or_else(|| SessionError::PeerUnknown {
            id: envelope.id.clone(),
        })?;

        let ack = envelope.delivery_ack(&self.inner.self_id, &peer);
        self.inner.channel.send(&ack)?;
        self.inner.transport.write_packet(content)?;
        debug!(id = %envelope.id, size = content.len(), "delivered to local transport");
        Ok(())
    }

    /// Validate the peer's goodbye and close the session.
    pub fn goodbye(&self, host_id: &str) -> Result<()> {
        let peer = self.peer_id();
        if peer.as_deref() != Some(host_id) {
            return Err(SessionError::PeerMismatch {
                expected: peer,
                actual: host_id.to_string(),
            });
        }

        info!(peer = host_id, "peer said goodbye");
        self.close();
        Ok(())
    }

    /// Record the identity announced by a peer handshake.
    ///
    /// Returns `true` the first time. Re-announcing the same identity is a
    /// no-op; a different identity is [`SessionError::PeerChanged`].
    pub fn observe_handshake(&self, peer_id: &str) -> Result<bool> {
        {
            let mut peer = lock(&self.inner.peer);
            match peer.as_deref() {
                Some(current) if current == peer_id => return Ok(false),
                Some(current) => {
                    return Err(SessionError::PeerChanged {
                        current: current.to_string(),
                        announced: peer_id.to_string(),
                    })
                }
                None => *peer = Some(peer_id.to_string()),
            }
        }
        self.inner.peer_known.notify_all();
        self.transition(
            &[
                SessionState::Init,
                SessionState::Linked,
                SessionState::Handshaking,
            ],
            SessionState::Active,
        );
        info!(peer = peer_id, "peer handshake observed");
        Ok(true)
    }

    /// Check the pending table once. Returns `true` if the session failed.
    ///
    /// A session that is no longer running has nothing left to sweep.
    pub fn sweep_once(&self) -> bool {
        if !self.is_running() || self.state().is_terminal() {
            return false;
        }
        let overdue = self
            .inner
            .pending
            .first_overdue(self.inner.clock.now(), self.inner.config.overtime_threshold);
        match overdue {
            Some((id, age)) => {
                self.fail(SessionError::DeliveryTimeout { id, age });
                true
            }
            None => false,
        }
    }

    /// Route an error: fatal ones fail the session, the rest go to `on_error`.
    pub(crate) fn report(&self, error: SessionError) {
        if error.is_fatal() {
            self.fail(error);
        } else {
            warn!(self_id = %self.inner.self_id, error = %error, "session error");
            self.inner.hooks.on_error(&error);
        }
    }

    /// The single fatal path. Runs at most once per session, and never after
    /// the session closed.
    pub(crate) fn fail(&self, error: SessionError) {
        {
            let mut state = lock(&self.inner.state);
            if state.is_terminal() {
                debug!(state = state.as_str(), error = %error, "session already ended");
                return;
            }
            *state = SessionState::Failed;
        }

        error!(self_id = %self.inner.self_id, error = %error, "session failed");
        self.inner.hooks.on_error(&error);

        if let Some(peer) = self.peer_id() {
            if let Err(err) = self
                .inner
                .channel
                .send(&Envelope::goodbye(&self.inner.self_id, &peer))
            {
                debug!(peer = %peer, error = %err, "goodbye after failure not sent");
            }
        }
        self.teardown();
    }

    /// Block until the peer is known. `None` once the session stops running.
    pub(crate) fn wait_for_peer(&self) -> Option<String> {
        let mut peer = lock(&self.inner.peer);
        loop {
            if let Some(id) = peer.as_ref() {
                return Some(id.clone());
            }
            if !self.is_running() {
                return None;
            }
            peer = match self.inner.peer_known.wait_timeout(peer, PEER_WAIT_SLICE) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Local loop ended on its own: clear `running` so the owner can re-attach.
    pub(crate) fn local_loop_ended(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Err(err) = self.inner.transport.close() {
            debug!(error = %err, "local transport close after loop end");
        }
        for handle in lock(&self.inner.workers).iter() {
            handle.thread().unpark();
        }
    }

    /// Enter `CLOSED` first, so a racing sweep or fatal report sees a
    /// terminal session, then drop what was pending and tear down.
    fn close(&self) {
        self.transition(
            &[
                SessionState::Init,
                SessionState::Linked,
                SessionState::Handshaking,
                SessionState::Active,
                SessionState::Closing,
            ],
            SessionState::Closed,
        );
        self.inner.pending.clear();
        self.teardown();
    }

    fn teardown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.stop_listening();
        if let Err(err) = self.inner.transport.close() {
            warn!(error = %err, "failed to close local transport");
        }
        if let Err(err) = self.inner.channel.unlink() {
            warn!(error = %err, "failed to unlink channel");
        }
        self.inner.peer_known.notify_all();
        self.join_workers();
    }

    fn ensure_local_idle(&self, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state.is_terminal() || state == SessionState::Closing || self.is_running() {
            return Err(SessionError::InvalidState { operation, state });
        }
        // Reap loops left over from a previous attach.
        self.join_workers();
        Ok(())
    }

    fn spawn_worker(&self, name: &str, body: fn(RelaySession)) -> Result<()> {
        let session = self.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(session))?;
        lock(&self.inner.workers).push(handle);
        Ok(())
    }

    fn join_workers(&self) {
        let handles: Vec<_> = lock(&self.inner.workers).drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("session worker panicked");
            }
        }
    }

    fn transition(&self, from: &[SessionState], to: SessionState) -> bool {
        let mut state = lock(&self.inner.state);
        if from.contains(&*state) {
            debug!(from = state.as_str(), to = to.as_str(), "session state change");
            *state = to;
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySession")
            .field("self_id", &self.inner.self_id)
            .field("peer_id", &self.peer_id())
            .field("state", &self.state())
            .field("running", &self.is_running())
            .field("pending", &self.pending_len())
            .finish()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
