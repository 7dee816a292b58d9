//! Error types for MADARA.
//!
//! All errors are strongly typed using thiserror. Quality-gate rejections
//! are not errors: they are reported through [`UpdateStatus`] so that
//! distributed write arbitration stays on the normal return path.

use thiserror::Error;

/// KaRL language errors.
///
/// Compile errors are raised while building or pruning an expression tree.
/// Runtime errors are raised while evaluating one. Both abort only the
/// expression at hand.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KarlError {
    #[error("KARL COMPILE ERROR: {operation}: {reason}")]
    Compile {
        operation: String,
        reason: String,
    },

    #[error("KARL RUNTIME ERROR: {operation}: {reason}")]
    Runtime {
        operation: String,
        reason: String,
    },
}

impl KarlError {
    /// Creates a compile-time error.
    #[must_use]
    pub fn compile(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Compile {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Creates a runtime error.
    #[must_use]
    pub fn runtime(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Runtime {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Returns the operation that raised the error.
    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            Self::Compile { operation, .. } | Self::Runtime { operation, .. } => operation,
        }
    }
}

/// Worker thread lifecycle errors.
#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("Thread name cannot be empty")]
    EmptyName,

    #[error("Thread '{name}' is already running")]
    AlreadyRunning {
        name: String,
    },

    #[error("Thread '{name}' not found")]
    NotFound {
        name: String,
    },

    #[error("Failed to spawn thread '{name}': {message}")]
    SpawnFailed {
        name: String,
        message: String,
    },
}

/// Buffer filter errors.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Filter '{filter}' produced {size} bytes, exceeding the maximum of {max_size}")]
    BufferTooLarge {
        filter: String,
        size: usize,
        max_size: usize,
    },

    #[error("Filter '{filter}' rejected a corrupted buffer: {reason}")]
    Corrupted {
        filter: String,
        reason: String,
    },
}

/// Transport errors for peer-to-peer knowledge exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to serialize packet: {message}")]
    Serialization {
        message: String,
    },

    #[error("Failed to deserialize packet: {message}")]
    Deserialization {
        message: String,
    },

    #[error("Transport '{id}' is disconnected")]
    Disconnected {
        id: String,
    },

    #[error("Peer '{peer}' queue is full (capacity: {capacity})")]
    QueueFull {
        peer: String,
        capacity: usize,
    },
}

/// Top-level error type for MADARA.
#[derive(Debug, Error)]
pub enum MadaraError {
    #[error("{0}")]
    Karl(#[from] KarlError),

    #[error("Variable '{name}' is uninitialized")]
    Uninitialized {
        name: String,
    },

    #[error("Thread error: {0}")]
    Thread(#[from] ThreadError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MadaraError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an uninitialized-access error.
    #[must_use]
    pub fn uninitialized(name: impl Into<String>) -> Self {
        Self::Uninitialized { name: name.into() }
    }

    /// Returns true if this is a KaRL language error.
    #[must_use]
    pub const fn is_karl(&self) -> bool {
        matches!(self, Self::Karl(_))
    }

    /// Returns true if this is a KaRL compile error.
    #[must_use]
    pub const fn is_compile_error(&self) -> bool {
        matches!(self, Self::Karl(KarlError::Compile { .. }))
    }

    /// Returns true if this is a KaRL runtime error.
    #[must_use]
    pub const fn is_runtime_error(&self) -> bool {
        matches!(self, Self::Karl(KarlError::Runtime { .. }))
    }

    /// Returns true if this is an uninitialized-access error.
    #[must_use]
    pub const fn is_uninitialized(&self) -> bool {
        matches!(self, Self::Uninitialized { .. })
    }

    /// Returns true if this is a thread lifecycle error.
    #[must_use]
    pub const fn is_thread(&self) -> bool {
        matches!(self, Self::Thread(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for MADARA operations.
pub type MadaraResult<T> = Result<T, MadaraError>;

/// Outcome of a write against the knowledge context.
///
/// Rejections are the normal result of quality or clock arbitration and
/// leave the stored record untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateStatus {
    /// The write was applied.
    Applied,
    /// The stored value already matched; nothing changed.
    Unchanged,
    /// The key was empty or could not be resolved.
    InvalidKey,
    /// The stored quality outranks the writer.
    Rejected,
    /// Same quality, but the incoming clock is older.
    Stale,
}

impl UpdateStatus {
    /// Returns the numeric status code (0, 0, -1, -2, -3).
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Applied | Self::Unchanged => 0,
            Self::InvalidKey => -1,
            Self::Rejected => -2,
            Self::Stale => -3,
        }
    }

    /// Returns true if the write changed the stored record.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

pub(crate) fn lock_err(context: &'static str) -> MadaraError {
    MadaraError::internal(format!("poisoned lock: {context}"))
}
