//! Moving knowledge between knowledge bases.
//!
//! A transport takes the batch of modified records produced by an
//! evaluation, runs the send filters over it, serializes it as JSON and
//! encodes the bytes with the buffer filters. Receiving reverses each step
//! and applies the surviving records with
//! [`ContextState::update_record_from_external`], which arbitrates by
//! quality and Lamport clock.

mod bandwidth;
mod context;
mod loopback;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use bandwidth::BandwidthMonitor;
pub use context::{TransportContext, TransportOperation};
pub use loopback::{LoopbackNetwork, LoopbackTransport};

use crate::context::ContextState;
use crate::error::MadaraResult;
use crate::filters::KnowledgeRecordFilters;
use crate::record::KnowledgeMap;
use crate::settings::KnowledgeUpdateSettings;

/// Default largest encoded packet.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Packets from other domains are ignored.
    pub domain: String,
    /// Packets queued per peer before sends start failing.
    pub queue_capacity: usize,
    /// Sliding window for bandwidth figures.
    pub bandwidth_window: Duration,
    /// Largest encoded packet, after buffer filters.
    pub max_packet_size: usize,
    /// Settings used when applying received records.
    pub update: KnowledgeUpdateSettings,
    /// Filters run on outgoing records.
    #[serde(skip)]
    pub send_filters: KnowledgeRecordFilters,
    /// Filters run on incoming records.
    #[serde(skip)]
    pub receive_filters: KnowledgeRecordFilters,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            domain: "KaRL".to_string(),
            queue_capacity: 1024,
            bandwidth_window: Duration::from_secs(10),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            update: KnowledgeUpdateSettings::default(),
            send_filters: KnowledgeRecordFilters::default(),
            receive_filters: KnowledgeRecordFilters::default(),
        }
    }
}

/// Wire format of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Sender's domain.
    pub domain: String,
    /// Sender's id.
    pub originator: String,
    /// Sender's global clock when the packet was built.
    pub clock: u64,
    /// Creation time in Unix seconds.
    pub timestamp: i64,
    /// The records.
    pub updates: KnowledgeMap,
}

/// Sends batches of records to peers.
pub trait Transport: Send + Sync {
    /// Unique id of this endpoint; used as the packet originator.
    fn id(&self) -> &str;

    /// Filters, encodes and sends `updates`. The caller holds the context
    /// lock. Returns the number of bytes sent, 0 if nothing survived the
    /// filters.
    fn send_data(&self, state: &mut ContextState, updates: &KnowledgeMap) -> MadaraResult<usize>;

    /// Stops sending and receiving.
    fn close(&self);
}
