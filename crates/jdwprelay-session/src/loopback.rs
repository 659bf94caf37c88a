use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use jdwprelay_envelope::{Envelope, MessageType};
use tracing::debug;

use crate::channel::MessageChannel;
use crate::error::ChannelError;
use crate::hooks::ChannelHooks;
use crate::session::lock;

enum Delivery {
    Envelope(Envelope),
    Stop(u64),
}

/// In-process channel: two endpoints wired back to back.
///
/// Each endpoint delivers inbound envelopes on its own thread, like a real
/// network channel would. Envelopes sent while the far end is unlinked queue
/// up until it links.
pub struct LoopbackChannel {
    inbound_tx: Sender<Delivery>,
    inbound_rx: Arc<Mutex<Receiver<Delivery>>>,
    outbound_tx: Sender<Delivery>,
    linked: AtomicBool,
    generation: AtomicU64,
    sent: Mutex<Vec<Envelope>>,
}

impl LoopbackChannel {
    /// Two connected endpoints.
    pub fn pair() -> (LoopbackChannel, LoopbackChannel) {
        let (a_tx, a_rx) = mpsc::channel();
        let (b_tx, b_rx) = mpsc::channel();
        let a = LoopbackChannel::endpoint(a_tx.clone(), a_rx, b_tx.clone());
        let b = LoopbackChannel::endpoint(b_tx, b_rx, a_tx);
        (a, b)
    }

    fn endpoint(
        inbound_tx: Sender<Delivery>,
        inbound_rx: Receiver<Delivery>,
        outbound_tx: Sender<Delivery>,
    ) -> Self {
        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            outbound_tx,
            linked: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Deliver `envelope` to this endpoint as if the far end had sent it.
    pub fn inject(&self, envelope: Envelope) {
        let _ = self.inbound_tx.send(Delivery::Envelope(envelope));
    }

    /// Every envelope sent through this endpoint, in order.
    pub fn sent(&self) -> Vec<Envelope> {
        lock(&self.sent).clone()
    }

    pub fn sent_of_type(&self, msg_type: MessageType) -> Vec<Envelope> {
        lock(&self.sent)
            .iter()
            .filter(|envelope| envelope.msg_type == msg_type)
            .cloned()
            .collect()
    }
}

impl MessageChannel for LoopbackChannel {
    fn link(&self, self_id: &str, hooks: Arc<dyn ChannelHooks>) -> Result<(), ChannelError> {
        if self.linked.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::AlreadyLinked);
        }
        if !hooks.network_available() {
            self.linked.store(false, Ordering::SeqCst);
            return Err(ChannelError::NetworkUnavailable);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inbound = Arc::clone(&self.inbound_rx);
        let spawned = thread::Builder::new()
            .name(format!("jdwprelay-loopback-{self_id}"))
            .spawn(move || {
                let inbound = lock(&inbound);
                while let Ok(delivery) = inbound.recv() {
                    match delivery {
                        Delivery::Envelope(envelope) => hooks.deliver(envelope),
                        Delivery::Stop(stop) if stop == generation => break,
                        Delivery::Stop(_) => {}
                    }
                }
            });
        if let Err(err) = spawned {
            self.linked.store(false, Ordering::SeqCst);
            return Err(err.into());
        }

        debug!(self_id, "loopback channel linked");
        Ok(())
    }

    fn unlink(&self) -> Result<(), ChannelError> {
        if !self.linked.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let _ = self.inbound_tx.send(Delivery::Stop(generation));
        debug!("loopback channel unlinked");
        Ok(())
    }

    fn send(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        if !self.linked.load(Ordering::SeqCst) {
            return Err(ChannelError::NotLinked);
        }
        lock(&self.sent).push(envelope.clone());
        self.outbound_tx
            .send(Delivery::Envelope(envelope.clone()))
            .map_err(|_| ChannelError::Closed)
    }

    fn is_linked(&self) -> bool {
        self.linked.load(Ordering::SeqCst)
    }

    fn channel_name(&self) -> &'static str {
        "loopback"
    }
}
