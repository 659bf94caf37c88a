use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::LocalTransport;

enum Inbound {
    Packet(Bytes),
    Closed(u64),
}

/// In-process transport: the relay reads packets the [`MemoryPeer`] sends and
/// the peer observes every packet the relay writes.
///
/// Addresses are recorded but otherwise ignored; `attach` and `accept` open
/// the pipe immediately.
pub struct MemoryTransport {
    inbound_rx: Mutex<Receiver<Inbound>>,
    inbound_tx: Sender<Inbound>,
    outbound_tx: Sender<Bytes>,
    open: AtomicBool,
    listening: AtomicBool,
    generation: AtomicU64,
    addresses: Arc<Mutex<Vec<String>>>,
}

/// The far end of a [`MemoryTransport`] (the simulated JVM or debugger).
pub struct MemoryPeer {
    inbound_tx: Sender<Inbound>,
    outbound_rx: Receiver<Bytes>,
    addresses: Arc<Mutex<Vec<String>>>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let (inbound_tx, inbound_rx) = mpsc::channel();
        let (outbound_tx, outbound_rx) = mpsc::channel();
        let addresses = Arc::new(Mutex::new(Vec::new()));

        let transport = MemoryTransport {
            inbound_rx: Mutex::new(inbound_rx),
            inbound_tx: inbound_tx.clone(),
            outbound_tx,
            open: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            addresses: Arc::clone(&addresses),
        };
        let peer = MemoryPeer {
            inbound_tx,
            outbound_rx,
            addresses,
        };
        (transport, peer)
    }

    fn open(&self, address: &str) {
        lock(&self.addresses).push(address.to_string());
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
    }
}

impl MemoryPeer {
    /// Queue a packet for the relay's next `read_packet`.
    pub fn send(&self, packet: impl Into<Bytes>) {
        let _ = self.inbound_tx.send(Inbound::Packet(packet.into()));
    }

    /// Wait for the next packet the relay wrote.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Bytes> {
        match self.outbound_rx.recv_timeout(timeout) {
            Ok(packet) => Some(packet),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Addresses passed to `attach`/`start_listening`, in call order.
    pub fn addresses(&self) -> Vec<String> {
        lock(&self.addresses).clone()
    }
}

impl LocalTransport for MemoryTransport {
    fn attach(&self, address: &str) -> Result<()> {
        self.open(address);
        debug!(address, "memory transport attached");
        Ok(())
    }

    fn start_listening(&self, address: &str) -> Result<String> {
        lock(&self.addresses).push(address.to_string());
        self.listening.store(true, Ordering::SeqCst);
        Ok(address.to_string())
    }

    fn accept(&self) -> Result<()> {
        if !self.listening.load(Ordering::SeqCst) {
            return Err(TransportError::NotListening);
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_listening(&self) -> Result<()> {
        self.listening.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            let generation = self.generation.load(Ordering::SeqCst);
            let _ = self.inbound_tx.send(Inbound::Closed(generation));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn read_packet(&self) -> Result<Bytes> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        let rx = lock(&self.inbound_rx);
        loop {
            match rx.recv() {
                Ok(Inbound::Packet(packet)) => return Ok(packet),
                Ok(Inbound::Closed(generation)) => {
                    // Stale markers from an earlier connection are skipped.
                    if generation == self.generation.load(Ordering::SeqCst) {
                        return Err(TransportError::ConnectionClosed);
                    }
                }
                Err(_) => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    fn write_packet(&self, packet: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        self.outbound_tx
            .send(Bytes::copy_from_slice(packet))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
