//! In-process transport.
//!
//! Every peer that joins a [`LoopbackNetwork`] gets a bounded inbox.
//! Sending broadcasts the encoded packet to every other peer's inbox;
//! receiving drains the local inbox either on demand or from a background
//! thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use super::{BandwidthMonitor, Packet, Transport, TransportContext, TransportOperation, TransportSettings};
use crate::context::{ContextState, ThreadSafeContext};
use crate::error::{lock_err, MadaraError, MadaraResult, ThreadError, TransportError};
use crate::filters::{KnowledgeRecordFilters, Variables};
use crate::knowledge_base::KnowledgeBase;
use crate::record::KnowledgeMap;

const RECEIVE_POLL: Duration = Duration::from_millis(50);

type Inboxes = Arc<RwLock<HashMap<String, Sender<Vec<u8>>>>>;

/// A set of in-process peers.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    peers: Inboxes,
}

impl LoopbackNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer named `id` and returns its transport. Joining again
    /// with the same id replaces the previous inbox.
    pub fn join(&self, id: impl Into<String>, settings: TransportSettings) -> MadaraResult<LoopbackTransport> {
        let id = id.into();
        let (tx, rx) = bounded(settings.queue_capacity.max(1));
        self.peers
            .write()
            .map_err(|_| lock_err("loopback.peers"))?
            .insert(id.clone(), tx);
        tracing::debug!(peer = %id, "joined loopback network");
        Ok(LoopbackTransport {
            send_bandwidth: BandwidthMonitor::new(settings.bandwidth_window),
            receive_bandwidth: BandwidthMonitor::new(settings.bandwidth_window),
            id,
            settings,
            peers: Arc::clone(&self.peers),
            inbox: rx,
            closed: AtomicBool::new(false),
            receiver: Mutex::new(None),
        })
    }

    /// Joins with the knowledge base's id, starts a receive thread for it
    /// and attaches the transport.
    pub fn attach(&self, knowledge: &KnowledgeBase, settings: TransportSettings) -> MadaraResult<Arc<LoopbackTransport>> {
        let transport = Arc::new(self.join(knowledge.id(), settings)?);
        transport.start_receiving(knowledge.context())?;
        knowledge.attach_transport(Arc::clone(&transport) as Arc<dyn Transport>)?;
        Ok(transport)
    }

    /// Ids of the joined peers.
    pub fn peers(&self) -> MadaraResult<Vec<String>> {
        let peers = self.peers.read().map_err(|_| lock_err("loopback.peers"))?;
        let mut ids: Vec<String> = peers.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One peer on a [`LoopbackNetwork`].
#[derive(Debug)]
pub struct LoopbackTransport {
    id: String,
    settings: TransportSettings,
    peers: Inboxes,
    inbox: Receiver<Vec<u8>>,
    send_bandwidth: BandwidthMonitor,
    receive_bandwidth: BandwidthMonitor,
    closed: AtomicBool,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackTransport {
    /// Transport settings.
    #[must_use]
    pub const fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Bytes per second sent over the bandwidth window.
    #[must_use]
    pub fn send_bandwidth(&self) -> u64 {
        self.send_bandwidth.bytes_per_second()
    }

    /// Bytes per second received over the bandwidth window.
    #[must_use]
    pub fn receive_bandwidth(&self) -> u64 {
        self.receive_bandwidth.bytes_per_second()
    }

    /// Returns true once [`Transport::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn transport_context(&self, operation: TransportOperation, domain: &str, originator: &str) -> TransportContext {
        let mut context = TransportContext::new(operation, domain, originator);
        context.set_send_bandwidth(self.send_bandwidth.bytes_per_second());
        context.set_receive_bandwidth(self.receive_bandwidth.bytes_per_second());
        context
    }

    /// Runs record filters then aggregate filters over a batch.
    fn filter_batch(
        filters: &KnowledgeRecordFilters,
        updates: &KnowledgeMap,
        transport: &mut TransportContext,
        variables: &mut Variables<'_>,
    ) -> KnowledgeMap {
        let mut batch = KnowledgeMap::new();
        for (name, record) in updates {
            let filtered = filters.filter(record, name, transport, variables);
            if filtered.is_uncreated() {
                tracing::debug!(variable = %name, "filter dropped update");
                continue;
            }
            batch.insert(name.clone(), filtered);
        }
        batch.extend(transport.take_records());
        filters.filter_aggregate(&mut batch, transport, variables);
        batch
    }

    fn broadcast(&self, bytes: &[u8]) -> MadaraResult<()> {
        let peers = self.peers.read().map_err(|_| lock_err("loopback.peers"))?;
        for (peer, inbox) in peers.iter().filter(|(peer, _)| **peer != self.id) {
            match inbox.try_send(bytes.to_vec()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let err = TransportError::QueueFull {
                        peer: peer.clone(),
                        capacity: self.settings.queue_capacity,
                    };
                    tracing::warn!(error = %err, "dropping packet for peer");
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!(peer = %peer, "peer inbox closed");
                }
            }
        }
        Ok(())
    }

    /// Drains the inbox, applying every packet to `context`. Returns the
    /// number of records applied.
    pub fn receive_pending(&self, context: &ThreadSafeContext) -> MadaraResult<usize> {
        let mut applied = 0;
        while let Ok(bytes) = self.inbox.try_recv() {
            applied += self.process(context, bytes)?;
        }
        Ok(applied)
    }

    /// Decodes, filters and applies one packet. Malformed or foreign
    /// packets are logged and dropped.
    pub fn process(&self, context: &ThreadSafeContext, mut bytes: Vec<u8>) -> MadaraResult<usize> {
        self.receive_bandwidth.add(bytes.len());
        let filters = &self.settings.receive_filters;

        if let Err(err) = filters.filter_decode(&mut bytes, self.settings.max_packet_size) {
            tracing::warn!(transport = %self.id, error = %err, "dropping packet that failed to decode");
            return Ok(0);
        }
        let packet: Packet = match serde_json::from_slice(&bytes) {
            Ok(packet) => packet,
            Err(err) => {
                let err = TransportError::Deserialization { message: err.to_string() };
                tracing::warn!(transport = %self.id, error = %err, "dropping malformed packet");
                return Ok(0);
            }
        };
        if packet.domain != self.settings.domain {
            tracing::debug!(transport = %self.id, domain = %packet.domain, "ignoring packet from another domain");
            return Ok(0);
        }
        if packet.originator == self.id {
            return Ok(0);
        }

        let mut transport = self.transport_context(TransportOperation::Receiving, &packet.domain, &packet.originator);
        transport.set_message_time(packet.timestamp);

        let mut guard = context.lock()?;
        let batch = {
            let mut variables = Variables::with_settings(&mut guard, self.settings.update);
            Self::filter_batch(filters, &packet.updates, &mut transport, &mut variables)
        };

        let mut applied = 0;
        for (name, record) in &batch {
            let status = guard.update_record_from_external(name, record, &self.settings.update);
            if status.is_applied() {
                applied += 1;
            } else {
                tracing::debug!(variable = %name, code = status.code(), "update not applied");
            }
        }
        tracing::debug!(
            transport = %self.id,
            originator = %packet.originator,
            received = packet.updates.len(),
            applied,
            "applied packet"
        );
        Ok(applied)
    }

    /// Spawns the background receive thread.
    pub fn start_receiving(self: &Arc<Self>, context: Arc<ThreadSafeContext>) -> MadaraResult<()> {
        let mut slot = self.receiver.lock().map_err(|_| lock_err("loopback.receiver"))?;
        if slot.is_some() {
            return Err(ThreadError::AlreadyRunning {
                name: format!("madara-recv-{}", self.id),
            }
            .into());
        }

        let transport = Arc::clone(self);
        let name = format!("madara-recv-{}", self.id);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || transport.receive_loop(&context))
            .map_err(|err| ThreadError::SpawnFailed {
                name,
                message: err.to_string(),
            })?;
        *slot = Some(handle);
        Ok(())
    }

    fn receive_loop(&self, context: &ThreadSafeContext) {
        while !self.is_closed() {
            match self.inbox.recv_timeout(RECEIVE_POLL) {
                Ok(bytes) => {
                    if let Err(err) = self.process(context, bytes) {
                        tracing::error!(transport = %self.id, error = %err, "receive failed");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!(transport = %self.id, "receive thread stopped");
    }
}

impl Transport for LoopbackTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn send_data(&self, state: &mut ContextState, updates: &KnowledgeMap) -> MadaraResult<usize> {
        if self.is_closed() {
            return Err(TransportError::Disconnected { id: self.id.clone() }.into());
        }

        let clock = state.clock();
        let mut transport = self.transport_context(TransportOperation::Sending, &self.settings.domain, &self.id);
        let filters = &self.settings.send_filters;
        let batch = {
            let mut variables = Variables::with_settings(state, self.settings.update);
            Self::filter_batch(filters, updates, &mut transport, &mut variables)
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let packet = Packet {
            domain: self.settings.domain.clone(),
            originator: self.id.clone(),
            clock,
            timestamp: Utc::now().timestamp(),
            updates: batch,
        };
        let mut bytes = serde_json::to_vec(&packet).map_err(|err| TransportError::Serialization { message: err.to_string() })?;
        filters
            .filter_encode(&mut bytes, self.settings.max_packet_size)
            .map_err(MadaraError::from)?;

        self.broadcast(&bytes)?;
        self.send_bandwidth.add(bytes.len());
        tracing::debug!(transport = %self.id, records = packet.updates.len(), bytes = bytes.len(), "sent packet");
        Ok(bytes.len())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut peers) = self.peers.write() {
            peers.remove(&self.id);
        }
        let handle = self.receiver.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        tracing::debug!(transport = %self.id, "transport closed");
    }
}
