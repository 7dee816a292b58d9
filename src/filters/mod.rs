//! Hooks for records and buffers crossing the transport boundary.
//!
//! Three kinds of filter are chained here:
//!
//! - record filters, registered per record type and run in registration
//!   order on each record;
//! - aggregate filters, run once per packet over the whole batch;
//! - buffer filters, byte transforms applied to the serialized packet.
//!   Encoding runs them in registration order and decoding in reverse.
//!
//! A record filter drops an update by returning an uncreated record.

mod buffer;
mod variables;

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub use buffer::{BufferFilter, ChecksumFilter, StreamCipherFilter, XorBufferFilter};
pub use variables::Variables;

use crate::error::FilterError;
use crate::logger::LogLevel;
use crate::record::{KnowledgeMap, KnowledgeRecord, RecordType};
use crate::transport::TransportContext;

/// Arguments passed to external functions and record filters.
pub type FunctionArguments = Vec<KnowledgeRecord>;

/// A Rust function callable from KaRL.
pub type ExternalFunction = Arc<dyn Fn(&mut FunctionArguments, &mut Variables<'_>) -> KnowledgeRecord + Send + Sync>;

/// A per-record filter. Receives the fixed argument layout described by
/// the `*_ARG` constants.
pub type RecordFilter = ExternalFunction;

/// A whole-batch filter.
pub type AggregateFilter = Arc<dyn Fn(&mut KnowledgeMap, &TransportContext, &mut Variables<'_>) + Send + Sync>;

/// Index of the record being filtered.
pub const RECORD_ARG: usize = 0;
/// Index of the variable name.
pub const NAME_ARG: usize = 1;
/// Index of the transport operation code.
pub const OPERATION_ARG: usize = 2;
/// Index of the send bandwidth.
pub const SEND_BANDWIDTH_ARG: usize = 3;
/// Index of the receive bandwidth.
pub const RECEIVE_BANDWIDTH_ARG: usize = 4;
/// Index of the message timestamp.
pub const MESSAGE_TIME_ARG: usize = 5;
/// Index of the current timestamp.
pub const CURRENT_TIME_ARG: usize = 6;
/// Index of the network domain.
pub const DOMAIN_ARG: usize = 7;
/// Index of the packet originator.
pub const ORIGINATOR_ARG: usize = 8;
/// Number of fixed arguments. Name/value pairs appended past this are
/// attached to the transport context.
pub const TOTAL_ARGUMENTS: usize = 9;

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Filter chains for one direction of a transport.
#[derive(Clone, Default)]
pub struct KnowledgeRecordFilters {
    filters: BTreeMap<RecordType, Vec<RecordFilter>>,
    aggregate_filters: Vec<AggregateFilter>,
    buffer_filters: Vec<Arc<dyn BufferFilter>>,
}

impl fmt::Debug for KnowledgeRecordFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeRecordFilters")
            .field("filtered_types", &self.filters.keys().collect::<Vec<_>>())
            .field("aggregate_filters", &self.aggregate_filters.len())
            .field(
                "buffer_filters",
                &self.buffer_filters.iter().map(|b| b.id()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl KnowledgeRecordFilters {
    /// Creates empty chains.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `filter` to the chain of every type in `types`.
    pub fn add(&mut self, types: u32, filter: RecordFilter) {
        for record_type in RecordType::from_mask(types) {
            self.filters.entry(record_type).or_default().push(Arc::clone(&filter));
        }
    }

    /// Appends an aggregate filter.
    pub fn add_aggregate(&mut self, filter: AggregateFilter) {
        self.aggregate_filters.push(filter);
    }

    /// Appends a buffer filter.
    pub fn add_buffer(&mut self, filter: Arc<dyn BufferFilter>) {
        self.buffer_filters.push(filter);
    }

    /// Removes the chains of every type in `types`.
    pub fn clear(&mut self, types: u32) {
        for record_type in RecordType::from_mask(types) {
            self.filters.remove(&record_type);
        }
    }

    /// Removes every aggregate filter.
    pub fn clear_aggregate_filters(&mut self) {
        self.aggregate_filters.clear();
    }

    /// Removes every buffer filter.
    pub fn clear_buffer_filters(&mut self) {
        self.buffer_filters.clear();
    }

    /// Number of types with a record filter chain.
    #[must_use]
    pub fn get_number_of_filtered_types(&self) -> usize {
        self.filters.len()
    }

    /// Number of aggregate filters.
    #[must_use]
    pub fn get_number_of_aggregate_filters(&self) -> usize {
        self.aggregate_filters.len()
    }

    /// Number of buffer filters.
    #[must_use]
    pub fn get_number_of_buffer_filters(&self) -> usize {
        self.buffer_filters.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.aggregate_filters.is_empty() && self.buffer_filters.is_empty()
    }

    /// Prints the chain lengths through the context's print sink.
    pub fn print_num_filters(&self, variables: &Variables<'_>) {
        variables.print("Printing Knowledge Record Filter Chains by Type...", LogLevel::ALWAYS);
        for (record_type, chain) in &self.filters {
            variables.print(
                &format!("{} = {} chained filters", record_type.code(), chain.len()),
                LogLevel::ALWAYS,
            );
        }
        variables.print(
            &format!("{} aggregate filters", self.aggregate_filters.len()),
            LogLevel::ALWAYS,
        );
        variables.print(
            &format!("{} buffer filters", self.buffer_filters.len()),
            LogLevel::ALWAYS,
        );
    }

    /// Runs the chain for `record`'s type. Returns the filtered record;
    /// uncreated means drop the update.
    pub fn filter(
        &self,
        record: &KnowledgeRecord,
        name: &str,
        transport: &mut TransportContext,
        variables: &mut Variables<'_>,
    ) -> KnowledgeRecord {
        let Some(chain) = self.filters.get(&record.record_type()) else {
            return record.clone();
        };

        let mut result = record.clone();
        for (position, filter) in chain.iter().enumerate() {
            let mut arguments = Self::arguments(&result, name, transport);
            let output = catch_unwind(AssertUnwindSafe(|| filter(&mut arguments, variables)));
            match output {
                Ok(filtered) => result = filtered,
                Err(_) => {
                    tracing::error!(variable = name, position, "record filter panicked; skipping it");
                    continue;
                }
            }
            Self::attach_extras(&arguments, transport);
        }
        result
    }

    fn arguments(record: &KnowledgeRecord, name: &str, transport: &TransportContext) -> FunctionArguments {
        let mut arguments = vec![KnowledgeRecord::new(); TOTAL_ARGUMENTS];
        arguments[RECORD_ARG] = record.clone();
        if !name.is_empty() {
            arguments[NAME_ARG] = KnowledgeRecord::from(name);
        }
        arguments[OPERATION_ARG] = KnowledgeRecord::from(transport.operation().code());
        arguments[SEND_BANDWIDTH_ARG] = KnowledgeRecord::from(clamp_i64(transport.send_bandwidth()));
        arguments[RECEIVE_BANDWIDTH_ARG] = KnowledgeRecord::from(clamp_i64(transport.receive_bandwidth()));
        arguments[MESSAGE_TIME_ARG] = KnowledgeRecord::from(transport.message_time());
        arguments[CURRENT_TIME_ARG] = KnowledgeRecord::from(transport.current_time());
        arguments[DOMAIN_ARG] = KnowledgeRecord::from(transport.domain());
        arguments[ORIGINATOR_ARG] = KnowledgeRecord::from(transport.originator());
        arguments
    }

    fn attach_extras(arguments: &FunctionArguments, transport: &mut TransportContext) {
        let Some(extras) = arguments.get(TOTAL_ARGUMENTS..) else {
            return;
        };
        for (offset, pair) in extras.chunks_exact(2).enumerate() {
            let (name, value) = (&pair[0], &pair[1]);
            if !name.is_string_type() {
                tracing::error!(
                    index = TOTAL_ARGUMENTS + offset * 2,
                    "filter added a record without a string name; ignoring the remaining extras"
                );
                break;
            }
            tracing::debug!(name = %name, "filter attached a record to the packet");
            transport.add_record(name.to_string(), value.clone());
        }
    }

    /// Runs every aggregate filter over the batch.
    pub fn filter_aggregate(&self, records: &mut KnowledgeMap, transport: &TransportContext, variables: &mut Variables<'_>) {
        for (position, filter) in self.aggregate_filters.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| filter(records, transport, variables)));
            if outcome.is_err() {
                tracing::error!(position, "aggregate filter panicked; skipping it");
            }
        }
    }

    /// Applies buffer filters front to back. Returns the new size.
    pub fn filter_encode(&self, buffer: &mut Vec<u8>, max_size: usize) -> Result<usize, FilterError> {
        for filter in &self.buffer_filters {
            filter.encode(buffer, max_size)?;
            Self::check_size(filter.as_ref(), buffer, max_size)?;
        }
        Ok(buffer.len())
    }

    /// Applies buffer filters back to front. Returns the new size.
    pub fn filter_decode(&self, buffer: &mut Vec<u8>, max_size: usize) -> Result<usize, FilterError> {
        for filter in self.buffer_filters.iter().rev() {
            filter.decode(buffer, max_size)?;
            Self::check_size(filter.as_ref(), buffer, max_size)?;
        }
        Ok(buffer.len())
    }

    fn check_size(filter: &dyn BufferFilter, buffer: &[u8], max_size: usize) -> Result<(), FilterError> {
        if buffer.len() > max_size {
            return Err(FilterError::BufferTooLarge {
                filter: filter.id().to_string(),
                size: buffer.len(),
                max_size,
            });
        }
        Ok(())
    }
}
