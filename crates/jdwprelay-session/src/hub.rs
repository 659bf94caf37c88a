use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use jdwprelay_envelope::{
    Envelope, EnvelopeConfig, EnvelopeError, EnvelopeReader, EnvelopeWriter, MessageType,
};
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::session::lock;

/// Envelopes held for one identity that has not connected yet.
pub const MAX_HELD_PER_PEER: usize = 1024;

/// Distinct absent identities the hub holds envelopes for.
pub const MAX_HELD_PEERS: usize = 256;

type SharedWriter = Arc<Mutex<EnvelopeWriter<TcpStream>>>;

#[derive(Default)]
struct Routes {
    peers: HashMap<String, SharedWriter>,
    held: HashMap<String, VecDeque<Envelope>>,
}

/// Minimal envelope router between relay peers.
///
/// A connection registers its identity with its first envelope, which must be
/// a `HANDSHAKE`. After that every envelope is forwarded by `to_id`;
/// heartbeats stop here.
pub struct Hub {
    listener: TcpListener,
    local_addr: SocketAddr,
    routes: Arc<Mutex<Routes>>,
    running: AtomicBool,
    config: EnvelopeConfig,
}

impl Hub {
    pub fn bind(address: &str) -> Result<Self, ChannelError> {
        let bind_err = |source| ChannelError::Bind {
            address: address.to_string(),
            source,
        };
        let listener = TcpListener::bind(address).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        Ok(Self {
            listener,
            local_addr,
            routes: Arc::new(Mutex::new(Routes::default())),
            running: AtomicBool::new(true),
            config: EnvelopeConfig::default(),
        })
    }

    pub fn with_envelope_config(mut self, config: EnvelopeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Identities currently connected, sorted.
    pub fn connected_peers(&self) -> Vec<String> {
        let mut peers: Vec<_> = lock(&self.routes).peers.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Envelopes waiting for `peer_id` to connect.
    pub fn held_count(&self, peer_id: &str) -> usize {
        lock(&self.routes).held.get(peer_id).map_or(0, VecDeque::len)
    }

    /// Number of absent identities with held envelopes.
    pub fn held_identities(&self) -> usize {
        lock(&self.routes).held.len()
    }

    /// Accept and route connections until [`stop`](Hub::stop) is called.
    pub fn serve(&self) -> Result<(), ChannelError> {
        info!(address = %self.local_addr, "hub listening");
        while self.running.load(Ordering::SeqCst) {
            let (stream, remote) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    return Err(err.into());
                }
            };
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let routes = Arc::clone(&self.routes);
            let config = self.config.clone();
            thread::Builder::new()
                .name("jdwprelay-hub-conn".to_string())
                .spawn(move || serve_connection(stream, remote, routes, config))?;
        }
        info!("hub stopped");
        Ok(())
    }

    /// Stop serving and drop every registered connection.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Wake a blocked accept.
        let _ = TcpStream::connect(self.local_addr);

        let mut routes = lock(&self.routes);
        for (id, writer) in routes.peers.drain() {
            debug!(peer = %id, "dropping hub connection");
            let _ = lock(&writer).get_ref().shutdown(Shutdown::Both);
        }
        routes.held.clear();
    }
}

fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    routes: Arc<Mutex<Routes>>,
    config: EnvelopeConfig,
) {
    let reader_stream = match stream.try_clone() {
        Ok(clone) => clone,
        Err(err) => {
            warn!(%remote, error = %err, "failed to clone hub connection");
            return;
        }
    };
    let mut reader = EnvelopeReader::with_config(reader_stream, config.clone());
    let writer = match EnvelopeWriter::with_config_tcp(stream, config) {
        Ok(writer) => writer,
        Err(err) => {
            warn!(%remote, error = %err, "failed to configure hub connection");
            return;
        }
    };
    let writer: SharedWriter = Arc::new(Mutex::new(writer));

    let first = match reader.read_envelope() {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(%remote, error = %err, "connection closed before registering");
            return;
        }
    };
    if first.msg_type != MessageType::Handshake || first.from_id.is_empty() {
        warn!(%remote, msg_type = %first.msg_type, "first envelope must be a handshake, closing");
        let _ = lock(&writer).get_ref().shutdown(Shutdown::Both);
        return;
    }

    let id = first.from_id.clone();
    register(&routes, &id, &writer);
    info!(peer = %id, %remote, "peer registered");
    if !first.to_id.is_empty() {
        route(&routes, first);
    }

    loop {
        match reader.read_envelope() {
            Ok(envelope) if envelope.msg_type == MessageType::Heartbeat => {}
            Ok(envelope) if envelope.to_id.is_empty() => {
                debug!(peer = %id, id = %envelope.id, "unaddressed envelope dropped");
            }
            Ok(envelope) => route(&routes, envelope),
            Err(EnvelopeError::ConnectionClosed) => break,
            Err(err) => {
                warn!(peer = %id, error = %err, "hub read failed");
                break;
            }
        }
    }

    unregister(&routes, &id, &writer);
    info!(peer = %id, "peer disconnected");
}

fn register(routes: &Mutex<Routes>, id: &str, writer: &SharedWriter) {
    let mut table = lock(routes);
    let replaced = table.peers.insert(id.to_string(), Arc::clone(writer));
    let held = table.held.remove(id);
    // Forwarding to this writer waits until the held backlog is written.
    let mut guard = lock(writer);
    drop(table);

    if let Some(old) = replaced {
        warn!(peer = id, "identity re-registered, replacing previous connection");
        let _ = lock(&old).get_ref().shutdown(Shutdown::Both);
    }

    if let Some(held) = held {
        debug!(peer = id, count = held.len(), "flushing held envelopes");
        for envelope in held {
            if let Err(err) = guard.write_envelope(&envelope) {
                warn!(peer = id, error = %err, "failed to flush held envelope");
                break;
            }
        }
    }
}

fn unregister(routes: &Mutex<Routes>, id: &str, writer: &SharedWriter) {
    let mut routes = lock(routes);
    if routes
        .peers
        .get(id)
        .is_some_and(|current| Arc::ptr_eq(current, writer))
    {
        routes.peers.remove(id);
    }
}

fn route(routes: &Mutex<Routes>, envelope: Envelope) {
    let target = {
        let mut routes = lock(routes);
        match routes.peers.get(&envelope.to_id) {
            Some(writer) => Arc::clone(writer),
            None => {
                if routes.held.len() >= MAX_HELD_PEERS
                    && !routes.held.contains_key(&envelope.to_id)
                {
                    warn!(peer = %envelope.to_id, id = %envelope.id, "too many absent peers, dropping envelope");
                    return;
                }
                let held = routes.held.entry(envelope.to_id.clone()).or_default();
                if held.len() >= MAX_HELD_PER_PEER {
                    warn!(peer = %envelope.to_id, "held queue full, dropping oldest envelope");
                    held.pop_front();
                }
                debug!(peer = %envelope.to_id, id = %envelope.id, "peer not connected, holding envelope");
                held.push_back(envelope);
                return;
            }
        }
    };

    let mut writer = lock(&target);
    if let Err(err) = writer.write_envelope(&envelope) {
        warn!(peer = %envelope.to_id, id = %envelope.id, error = %err, "forward failed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use bytes::Bytes;

    use super::*;

    fn spawn_hub() -> Arc<Hub> {
        let hub = Arc::new(Hub::bind("127.0.0.1:0").unwrap());
        let serving = Arc::clone(&hub);
        thread::spawn(move || serving.serve().unwrap());
        hub
    }

    fn client(hub: &Hub, id: &str, to: &str) -> (EnvelopeReader<TcpStream>, EnvelopeWriter<TcpStream>) {
        let stream = TcpStream::connect(hub.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let reader = EnvelopeReader::new(stream.try_clone().unwrap());
        let mut writer = EnvelopeWriter::new(stream);
        writer.write_envelope(&Envelope::handshake(id, to)).unwrap();
        (reader, writer)
    }

    fn wait_for(hub: &Hub, peers: &[&str]) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while hub.connected_peers() != peers {
            assert!(Instant::now() < deadline, "peers never registered");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn routes_by_to_id_and_consumes_heartbeats() {
        let hub = spawn_hub();
        let (_a_reader, mut a_writer) = client(&hub, "a", "");
        let (mut b_reader, _b_writer) = client(&hub, "b", "");
        wait_for(&hub, &["a", "b"]);

        a_writer.write_envelope(&Envelope::heartbeat("a")).unwrap();
        let data = Envelope::data("a", "b", Bytes::from_static(b"payload"));
        a_writer.write_envelope(&data).unwrap();

        let got = b_reader.read_envelope().unwrap();
        assert_eq!(got.id, data.id);
        hub.stop();
    }

    #[test]
    fn holds_envelopes_until_target_registers() {
        let hub = spawn_hub();
        let (_a_reader, _a_writer) = client(&hub, "a", "b");
        wait_for(&hub, &["a"]);

        let deadline = Instant::now() + Duration::from_secs(2);
        while hub.held_count("b") == 0 {
            assert!(Instant::now() < deadline, "handshake never held");
            thread::sleep(Duration::from_millis(5));
        }

        let (mut b_reader, _b_writer) = client(&hub, "b", "");
        let held = b_reader.read_envelope().unwrap();
        assert_eq!(held.msg_type, MessageType::Handshake);
        assert_eq!(held.other_side_id(), Some("a"));
        assert_eq!(hub.held_count("b"), 0);
        hub.stop();
    }

    #[test]
    fn absent_identities_are_capped() {
        let hub = spawn_hub();
        let (_a_reader, mut a_writer) = client(&hub, "a", "");
        wait_for(&hub, &["a"]);

        for n in 0..MAX_HELD_PEERS {
            let data = Envelope::data("a", &format!("p{n}"), Bytes::from_static(b"x"));
            a_writer.write_envelope(&data).unwrap();
        }
        a_writer
            .write_envelope(&Envelope::data("a", "overflow", Bytes::from_static(b"x")))
            .unwrap();
        a_writer
            .write_envelope(&Envelope::data("a", "p0", Bytes::from_static(b"y")))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while hub.held_count("p0") < 2 {
            assert!(Instant::now() < deadline, "envelopes never held");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(hub.held_identities(), MAX_HELD_PEERS);
        assert_eq!(hub.held_count("overflow"), 0);
        hub.stop();
    }

    #[test]
    fn held_envelopes_precede_live_traffic() {
        let hub = spawn_hub();
        let (_a_reader, mut a_writer) = client(&hub, "a", "");
        wait_for(&hub, &["a"]);

        let early = Envelope::data("a", "b", Bytes::from_static(b"early"));
        a_writer.write_envelope(&early).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while hub.held_count("b") == 0 {
            assert!(Instant::now() < deadline, "envelope never held");
            thread::sleep(Duration::from_millis(5));
        }

        let (mut b_reader, _b_writer) = client(&hub, "b", "");
        wait_for(&hub, &["a", "b"]);
        let late = Envelope::data("a", "b", Bytes::from_static(b"late"));
        a_writer.write_envelope(&late).unwrap();

        assert_eq!(b_reader.read_envelope().unwrap().id, early.id);
        assert_eq!(b_reader.read_envelope().unwrap().id, late.id);
        hub.stop();
    }

    #[test]
    fn non_handshake_first_envelope_is_rejected() {
        let hub = spawn_hub();
        let stream = TcpStream::connect(hub.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut reader = EnvelopeReader::new(stream.try_clone().unwrap());
        let mut writer = EnvelopeWriter::new(stream);
        writer.write_envelope(&Envelope::heartbeat("x")).unwrap();

        assert!(matches!(
            reader.read_envelope(),
            Err(EnvelopeError::ConnectionClosed)
        ));
        assert!(hub.connected_peers().is_empty());
        hub.stop();
    }

    #[test]
    fn disconnect_unregisters_identity() {
        let hub = spawn_hub();
        {
            let (_reader, _writer) = client(&hub, "a", "");
            wait_for(&hub, &["a"]);
        }
        wait_for(&hub, &[]);
        hub.stop();
    }
}
