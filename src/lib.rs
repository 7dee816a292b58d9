//! # MADARA - Distributed Knowledge and Reasoning
//!
//! A thread-safe knowledge base of typed records that local threads and
//! networked peers read, write and synchronize through the KaRL expression
//! language.
//!
//! ## Core Concepts
//!
//! - **KnowledgeRecord**: a typed value plus quality and Lamport clock
//! - **ThreadSafeContext**: the locked variable store that arbitrates writes
//! - **CompiledExpression**: a parsed KaRL program, pruned and evaluated
//!   against a context
//! - **KnowledgeRecordFilters**: hooks on records and buffers crossing a
//!   transport
//! - **KnowledgeBase**: a context plus the transports that publish it
//!
//! ## Usage
//!
//! ```rust,ignore
//! use madara::{EvalSettings, KnowledgeBase};
//!
//! let kb = KnowledgeBase::new();
//! kb.evaluate_str("agent.0.x = 5; ++agent.0.moves", &EvalSettings::default())?;
//! assert_eq!(kb.get("agent.0.moves")?.to_integer(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Values and settings
pub mod error;
pub mod logger;
pub mod record;
pub mod settings;

// Store and language
pub mod context;
pub mod expression;

// Boundary
pub mod filters;
pub mod knowledge_base;
pub mod threads;
pub mod transport;

pub use context::{ContextGuard, ContextState, ThreadSafeContext, VariableReference};
pub use error::{KarlError, MadaraError, MadaraResult, UpdateStatus};
pub use expression::{CompiledExpression, ComponentNode, PrintVisitor, Visitor};
pub use filters::{BufferFilter, ExternalFunction, FunctionArguments, KnowledgeRecordFilters, Variables};
pub use knowledge_base::KnowledgeBase;
pub use logger::{LogLevel, Logger, MemorySink, PrintSink};
pub use record::{KnowledgeMap, KnowledgeRecord, RecordType, RecordValue};
pub use settings::{EvalSettings, KnowledgeReferenceSettings, KnowledgeUpdateSettings, WaitSettings};
pub use threads::{BaseThread, Threader};
pub use transport::{LoopbackNetwork, Transport, TransportContext, TransportSettings};
