//! Per-packet metadata handed to filters.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::record::{KnowledgeMap, KnowledgeRecord};

/// What the transport is doing when a filter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i64)]
pub enum TransportOperation {
    /// Not inside a send or receive.
    #[default]
    Idle = 0,
    /// Building an outgoing packet.
    Sending = 1,
    /// Applying an incoming packet.
    Receiving = 2,
    /// Forwarding a packet from another peer.
    Rebroadcasting = 3,
}

impl TransportOperation {
    /// Numeric code passed to filters.
    #[must_use]
    pub const fn code(self) -> i64 {
        self as i64
    }
}

/// Metadata about the packet being filtered, plus any records filters ask
/// to attach to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportContext {
    operation: TransportOperation,
    receive_bandwidth: u64,
    send_bandwidth: u64,
    message_time: i64,
    current_time: i64,
    domain: String,
    originator: String,
    endpoint: String,
    records: KnowledgeMap,
}

impl Default for TransportContext {
    fn default() -> Self {
        Self::new(TransportOperation::Idle, "", "")
    }
}

impl TransportContext {
    /// Creates a context stamped with the current time.
    pub fn new(operation: TransportOperation, domain: impl Into<String>, originator: impl Into<String>) -> Self {
        let now = Utc::now().timestamp();
        Self {
            operation,
            receive_bandwidth: 0,
            send_bandwidth: 0,
            message_time: now,
            current_time: now,
            domain: domain.into(),
            originator: originator.into(),
            endpoint: String::new(),
            records: KnowledgeMap::new(),
        }
    }

    /// Current operation.
    #[must_use]
    pub const fn operation(&self) -> TransportOperation {
        self.operation
    }

    /// Sets the operation.
    pub fn set_operation(&mut self, operation: TransportOperation) {
        self.operation = operation;
    }

    /// Received bytes per second over the monitor window.
    #[must_use]
    pub const fn receive_bandwidth(&self) -> u64 {
        self.receive_bandwidth
    }

    /// Sets the receive bandwidth.
    pub fn set_receive_bandwidth(&mut self, bandwidth: u64) {
        self.receive_bandwidth = bandwidth;
    }

    /// Sent bytes per second over the monitor window.
    #[must_use]
    pub const fn send_bandwidth(&self) -> u64 {
        self.send_bandwidth
    }

    /// Sets the send bandwidth.
    pub fn set_send_bandwidth(&mut self, bandwidth: u64) {
        self.send_bandwidth = bandwidth;
    }

    /// When the packet was created, in Unix seconds.
    #[must_use]
    pub const fn message_time(&self) -> i64 {
        self.message_time
    }

    /// Sets the packet creation time.
    pub fn set_message_time(&mut self, time: i64) {
        self.message_time = time;
    }

    /// When the context was stamped, in Unix seconds.
    #[must_use]
    pub const fn current_time(&self) -> i64 {
        self.current_time
    }

    /// Sets the stamp time.
    pub fn set_current_time(&mut self, time: i64) {
        self.current_time = time;
    }

    /// Network domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Sets the domain.
    pub fn set_domain(&mut self, domain: impl Into<String>) {
        self.domain = domain.into();
    }

    /// Id of the knowledge base that produced the packet.
    #[must_use]
    pub fn originator(&self) -> &str {
        &self.originator
    }

    /// Sets the originator.
    pub fn set_originator(&mut self, originator: impl Into<String>) {
        self.originator = originator.into();
    }

    /// Peer endpoint, if the transport has one.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sets the endpoint.
    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        self.endpoint = endpoint.into();
    }

    /// Attaches an extra record to the packet.
    pub fn add_record(&mut self, name: impl Into<String>, record: KnowledgeRecord) {
        self.records.insert(name.into(), record);
    }

    /// Records attached by filters.
    #[must_use]
    pub const fn get_records(&self) -> &KnowledgeMap {
        &self.records
    }

    /// Removes the attached records and returns them.
    pub fn take_records(&mut self) -> KnowledgeMap {
        std::mem::take(&mut self.records)
    }

    /// Drops the attached records.
    pub fn clear_records(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_codes() {
        assert_eq!(TransportOperation::Idle.code(), 0);
        assert_eq!(TransportOperation::Sending.code(), 1);
        assert_eq!(TransportOperation::Receiving.code(), 2);
        assert_eq!(TransportOperation::Rebroadcasting.code(), 3);
    }

    #[test]
    fn test_attached_records() {
        let mut context = TransportContext::new(TransportOperation::Sending, "KaRL", "kb1");
        context.add_record("extra", KnowledgeRecord::from(1));
        assert_eq!(context.get_records().len(), 1);
        assert_eq!(context.take_records().len(), 1);
        assert!(context.get_records().is_empty());
        context.add_record("extra", KnowledgeRecord::from(2));
        context.clear_records();
        assert!(context.get_records().is_empty());
    }
}
