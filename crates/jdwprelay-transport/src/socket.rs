use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::packet::{
    handshake_acceptor, handshake_initiator, PacketReader, PacketWriter, DEFAULT_MAX_PACKET,
};
use crate::traits::LocalTransport;

/// Configuration for the socket transport.
///
/// `None` timeouts block indefinitely, matching the JDWP socket transport's
/// behavior for a zero timeout.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout for establishing the TCP connection on `attach`.
    pub attach_timeout: Option<Duration>,
    /// Timeout for the JDWP handshake after connect/accept.
    pub handshake_timeout: Option<Duration>,
    /// Maximum packet size in bytes. Default: 16 MiB.
    pub max_packet_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            attach_timeout: None,
            handshake_timeout: Some(Duration::from_secs(10)),
            max_packet_size: DEFAULT_MAX_PACKET,
        }
    }
}

/// JDWP socket transport over TCP.
///
/// Supports both roles: `attach` connects to a debuggee listening with
/// `server=y`, `start_listening` + `accept` waits for a debugger to attach.
pub struct SocketTransport {
    config: TransportConfig,
    listener: Mutex<Option<TcpListener>>,
    listener_addr: Mutex<Option<SocketAddr>>,
    listening: AtomicBool,
    reader: Mutex<Option<PacketReader<TcpStream>>>,
    writer: Mutex<Option<PacketWriter<TcpStream>>>,
    control: Mutex<Option<TcpStream>>,
}

impl SocketTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            listener: Mutex::new(None),
            listener_addr: Mutex::new(None),
            listening: AtomicBool::new(false),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            control: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn install(&self, stream: TcpStream) -> Result<()> {
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;
        let _ = stream.set_nodelay(true);

        let reader_stream = stream.try_clone()?;
        let control_stream = stream.try_clone()?;

        *lock(&self.reader) = Some(PacketReader::with_max_packet_size(
            reader_stream,
            self.config.max_packet_size,
        ));
        *lock(&self.writer) = Some(PacketWriter::with_max_packet_size(
            stream,
            self.config.max_packet_size,
        ));
        *lock(&self.control) = Some(control_stream);
        Ok(())
    }
}

impl Default for SocketTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl LocalTransport for SocketTransport {
    fn attach(&self, address: &str) -> Result<()> {
        let attach_err = |source: std::io::Error| TransportError::Attach {
            address: address.to_string(),
            source,
        };

        let mut stream = match self.config.attach_timeout {
            Some(timeout) => {
                let addr = resolve(address).map_err(attach_err)?;
                TcpStream::connect_timeout(&addr, timeout).map_err(attach_err)?
            }
            None => TcpStream::connect(address).map_err(attach_err)?,
        };

        stream.set_read_timeout(self.config.handshake_timeout)?;
        stream.set_write_timeout(self.config.handshake_timeout)?;
        handshake_initiator(&mut stream)?;

        self.install(stream)?;
        info!(address, "attached to debuggee");
        Ok(())
    }

    fn start_listening(&self, address: &str) -> Result<String> {
        let listener = TcpListener::bind(address).map_err(|source| TransportError::Bind {
            address: address.to_string(),
            source,
        })?;
        let local = listener.local_addr()?;

        *lock(&self.listener) = Some(listener);
        *lock(&self.listener_addr) = Some(local);
        self.listening.store(true, Ordering::SeqCst);

        info!(address = %local, "listening for debugger");
        Ok(local.to_string())
    }

    fn accept(&self) -> Result<()> {
        let listener = match lock(&self.listener).as_ref() {
            Some(listener) => listener.try_clone()?,
            None => return Err(TransportError::NotListening),
        };

        let (mut stream, peer) = listener.accept().map_err(TransportError::Accept)?;
        if !self.listening.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        debug!(%peer, "accepted debugger connection");

        stream.set_read_timeout(self.config.handshake_timeout)?;
        stream.set_write_timeout(self.config.handshake_timeout)?;
        handshake_acceptor(&mut stream)?;

        self.install(stream)
    }

    fn stop_listening(&self) -> Result<()> {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let addr = lock(&self.listener_addr).take();
        lock(&self.listener).take();

        // A blocked accept() only returns on a new connection; poke it.
        if let Some(addr) = addr {
            if let Err(err) = TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
                debug!(error = %err, "listener wake-up connect failed");
            }
        }
        debug!("stopped listening");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let Some(control) = lock(&self.control).take() else {
            return Ok(());
        };

        let shutdown = control.shutdown(Shutdown::Both);
        lock(&self.writer).take();
        lock(&self.reader).take();

        match shutdown {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => {
                warn!(error = %err, "socket shutdown failed");
                Err(TransportError::Io(err))
            }
        }
    }

    fn is_open(&self) -> bool {
        lock(&self.control).is_some()
    }

    fn read_packet(&self) -> Result<Bytes> {
        let mut reader = lock(&self.reader);
        match reader.as_mut() {
            Some(reader) => reader.read_packet(),
            None => Err(TransportError::NotConnected),
        }
    }

    fn write_packet(&self, packet: &[u8]) -> Result<()> {
        let mut writer = lock(&self.writer);
        match writer.as_mut() {
            Some(writer) => writer.write_packet(packet),
            None => Err(TransportError::NotConnected),
        }
    }

    fn transport_name(&self) -> &'static str {
        "dt_socket"
    }
}

fn resolve(address: &str) -> std::io::Result<SocketAddr> {
    address.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no address resolved for {address}"),
        )
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
