use std::io::ErrorKind;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use jdwprelay_envelope::{Envelope, EnvelopeError, EnvelopeReader, EnvelopeWriter};
use tracing::{debug, info, warn};

use crate::channel::MessageChannel;
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::hooks::ChannelHooks;
use crate::session::lock;

/// Envelope channel over a TCP connection to a relay hub.
///
/// On link it connects to the first reachable host, writes the handshake
/// envelope (which registers this identity at the hub), then runs a reader
/// thread feeding [`ChannelHooks::deliver`] and a heartbeat thread.
pub struct StreamChannel {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    config: ChannelConfig,
    linked: AtomicBool,
    background: AtomicBool,
    generation: AtomicU64,
    hooks: Mutex<Option<Arc<dyn ChannelHooks>>>,
    writer: Mutex<Option<EnvelopeWriter<TcpStream>>>,
    control: Mutex<Option<TcpStream>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl StreamChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                config,
                linked: AtomicBool::new(false),
                background: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                hooks: Mutex::new(None),
                writer: Mutex::new(None),
                control: Mutex::new(None),
                heartbeat: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Switch between the foreground and background heartbeat intervals.
    pub fn set_background(&self, background: bool) {
        self.inner.background.store(background, Ordering::SeqCst);
        if let Some(handle) = lock(&self.inner.heartbeat).as_ref() {
            handle.thread().unpark();
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.inner
            .config
            .effective_heartbeat_interval(self.inner.background.load(Ordering::SeqCst))
    }
}

impl StreamInner {
    fn hooks(&self) -> Result<Arc<dyn ChannelHooks>, ChannelError> {
        lock(&self.hooks).clone().ok_or(ChannelError::NotLinked)
    }

    fn connect(&self, hooks: &dyn ChannelHooks) -> Result<TcpStream, ChannelError> {
        if self.config.hosts.is_empty() {
            return Err(ChannelError::NoHosts);
        }

        let rounds = self.config.reconnect_count + 1;
        let timeout = self.config.effective_connect_timeout();
        let mut last_err = None;
        for round in 0..rounds {
            if round > 0 {
                thread::sleep(self.config.effective_reconnect_interval());
            }
            if !hooks.network_available() {
                return Err(ChannelError::NetworkUnavailable);
            }
            for host in &self.config.hosts {
                match connect_host(host, timeout) {
                    Ok(stream) => {
                        info!(host = %host, attempt = round + 1, "channel connected");
                        return Ok(stream);
                    }
                    Err(err) => {
                        warn!(host = %host, attempt = round + 1, error = %err, "channel connect failed");
                        last_err = Some(err);
                    }
                }
            }
        }

        Err(ChannelError::Connect {
            hosts: self.config.hosts.join(","),
            attempts: rounds,
            source: last_err
                .unwrap_or_else(|| std::io::Error::new(ErrorKind::NotConnected, "no host tried")),
        })
    }

    /// Connect, send the handshake and start a reader for the new connection.
    fn establish(self: &Arc<Self>, hooks: &Arc<dyn ChannelHooks>) -> Result<(), ChannelError> {
        let stream = self.connect(hooks.as_ref())?;
        let _ = stream.set_nodelay(true);

        let reader = EnvelopeReader::with_config(stream.try_clone()?, self.config.envelope.clone());
        let mut writer =
            EnvelopeWriter::with_config_tcp(stream.try_clone()?, self.config.envelope.clone())?;
        writer.write_envelope(&hooks.handshake_envelope())?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(old) = lock(&self.control).replace(stream) {
            let _ = old.shutdown(Shutdown::Both);
        }
        *lock(&self.writer) = Some(writer);

        let inner = Arc::clone(self);
        let hooks = Arc::clone(hooks);
        thread::Builder::new()
            .name("jdwprelay-channel-reader".to_string())
            .spawn(move || inner.read_loop(reader, hooks, generation))?;
        Ok(())
    }

    fn read_loop(
        &self,
        mut reader: EnvelopeReader<TcpStream>,
        hooks: Arc<dyn ChannelHooks>,
        generation: u64,
    ) {
        loop {
            match reader.read_envelope() {
                Ok(envelope) => hooks.deliver(envelope),
                Err(err) => {
                    let current = self.linked.load(Ordering::SeqCst)
                        && self.generation.load(Ordering::SeqCst) == generation;
                    if current {
                        warn!(error = %err, "channel read failed");
                        hooks.on_link_error(match err {
                            EnvelopeError::ConnectionClosed => ChannelError::Closed,
                            other => other.into(),
                        });
                    } else {
                        debug!(error = %err, "stale channel reader stopped");
                    }
                    break;
                }
            }
        }
    }

    fn heartbeat_loop(&self, hooks: Arc<dyn ChannelHooks>) {
        while self.linked.load(Ordering::SeqCst) {
            let background = self.background.load(Ordering::SeqCst);
            thread::park_timeout(self.config.effective_heartbeat_interval(background));
            if !self.linked.load(Ordering::SeqCst) {
                break;
            }
            if let Err(err) = self.write(&hooks.heartbeat_envelope()) {
                debug!(error = %err, "heartbeat not sent");
            }
        }
    }

    fn write(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        let mut writer = lock(&self.writer);
        let writer = writer.as_mut().ok_or(ChannelError::NotLinked)?;
        writer.write_envelope(envelope)?;
        Ok(())
    }

    /// Reconnect and re-send an envelope whose write failed.
    fn resend(self: &Arc<Self>, envelope: &Envelope, first: ChannelError) -> Result<(), ChannelError> {
        let hooks = self.hooks()?;
        let mut last = first;
        for attempt in 1..=self.config.effective_resend_count() {
            if !self.linked.load(Ordering::SeqCst) || !is_link_failure(&last) {
                break;
            }
            warn!(id = %envelope.id, attempt, error = %last, "send failed, reconnecting");
            thread::sleep(self.config.effective_resend_interval());
            match self.establish(&hooks).and_then(|()| self.write(envelope)) {
                Ok(()) => return Ok(()),
                Err(err) => last = err,
            }
        }
        Err(last)
    }
}

impl MessageChannel for StreamChannel {
    fn link(&self, self_id: &str, hooks: Arc<dyn ChannelHooks>) -> Result<(), ChannelError> {
        if self.inner.linked.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::AlreadyLinked);
        }
        *lock(&self.inner.hooks) = Some(Arc::clone(&hooks));

        if let Err(err) = self.inner.establish(&hooks) {
            self.inner.linked.store(false, Ordering::SeqCst);
            *lock(&self.inner.hooks) = None;
            return Err(err);
        }

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("jdwprelay-heartbeat".to_string())
            .spawn(move || inner.heartbeat_loop(hooks));
        match spawned {
            Ok(handle) => *lock(&self.inner.heartbeat) = Some(handle),
            Err(err) => {
                let _ = self.unlink();
                return Err(err.into());
            }
        }

        info!(self_id, "stream channel linked");
        Ok(())
    }

    fn unlink(&self) -> Result<(), ChannelError> {
        if !self.inner.linked.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(stream) = lock(&self.inner.control).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        lock(&self.inner.writer).take();
        lock(&self.inner.hooks).take();

        if let Some(handle) = lock(&self.inner.heartbeat).take() {
            handle.thread().unpark();
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("heartbeat thread panicked");
            }
        }
        info!("stream channel unlinked");
        Ok(())
    }

    fn send(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        if !self.inner.linked.load(Ordering::SeqCst) {
            return Err(ChannelError::NotLinked);
        }
        match self.inner.write(envelope) {
            Ok(()) => Ok(()),
            Err(err) => self.inner.resend(envelope, err),
        }
    }

    fn is_linked(&self) -> bool {
        self.inner.linked.load(Ordering::SeqCst)
    }

    fn channel_name(&self) -> &'static str {
        "stream"
    }
}

fn connect_host(host: &str, timeout: Duration) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for addr in host.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            ErrorKind::AddrNotAvailable,
            format!("{host} resolved to no addresses"),
        )
    }))
}

fn is_link_failure(err: &ChannelError) -> bool {
    matches!(
        err,
        ChannelError::Io(_)
            | ChannelError::Closed
            | ChannelError::Envelope(EnvelopeError::Io(_))
            | ChannelError::Envelope(EnvelopeError::ConnectionClosed)
    )
}
