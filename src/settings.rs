//! Settings passed into every context and expression operation.
//!
//! These are plain configuration values. Each has a `Default` that matches
//! the process-wide defaults, and all of them load from JSON through serde.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Settings for reads and reference resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeReferenceSettings {
    /// Expand `{var}` interpolation in keys before lookup.
    pub expand_variables: bool,
    /// Fail with an uninitialized error instead of returning an uncreated
    /// record.
    pub exception_on_uninitialized: bool,
}

impl KnowledgeReferenceSettings {
    /// Process-wide defaults.
    pub const DEFAULT: Self = Self {
        expand_variables: true,
        exception_on_uninitialized: false,
    };

    /// Defaults with variable expansion turned off.
    pub const NO_EXPAND: Self = Self {
        expand_variables: false,
        exception_on_uninitialized: false,
    };
}

impl Default for KnowledgeReferenceSettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Settings for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeUpdateSettings {
    /// Expand `{var}` interpolation in keys before lookup.
    pub expand_variables: bool,
    /// Fail reads of uncreated variables.
    pub exception_on_uninitialized: bool,
    /// Ignore the quality gate.
    pub always_overwrite: bool,
    /// Treat global variables as locals (never mark them for sending).
    pub treat_globals_as_locals: bool,
    /// Treat `.`-prefixed locals as globals (mark them for sending).
    pub treat_locals_as_globals: bool,
    /// Wake threads blocked in `wait` after a write.
    pub signal_updates: bool,
    /// Record local changes for checkpointing.
    pub track_local_changes: bool,
    /// Lamport clock advance per accepted write.
    pub clock_increment: u64,
}

impl KnowledgeUpdateSettings {
    /// Process-wide defaults.
    pub const DEFAULT: Self = Self {
        expand_variables: true,
        exception_on_uninitialized: false,
        always_overwrite: false,
        treat_globals_as_locals: false,
        treat_locals_as_globals: false,
        signal_updates: true,
        track_local_changes: false,
        clock_increment: 1,
    };

    /// The read-side view of these settings.
    #[must_use]
    pub const fn reference(&self) -> KnowledgeReferenceSettings {
        KnowledgeReferenceSettings {
            expand_variables: self.expand_variables,
            exception_on_uninitialized: self.exception_on_uninitialized,
        }
    }
}

impl Default for KnowledgeUpdateSettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Settings for evaluating a compiled expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalSettings {
    /// Write settings applied by the expression.
    #[serde(flatten)]
    pub update: KnowledgeUpdateSettings,
    /// Leave modified variables queued instead of sending after evaluation.
    pub delay_sending_modifieds: bool,
    /// Statement expanded and printed before evaluation.
    pub pre_print_statement: String,
    /// Statement expanded and printed after evaluation.
    pub post_print_statement: String,
    /// When non-empty, only these modified variables are sent.
    pub send_list: BTreeSet<String>,
}

impl EvalSettings {
    /// Eval settings with the given write settings.
    #[must_use]
    pub fn with_update(update: KnowledgeUpdateSettings) -> Self {
        Self {
            update,
            ..Self::default()
        }
    }
}

/// Settings for blocking on an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    /// Evaluation settings used for each poll.
    #[serde(flatten)]
    pub eval: EvalSettings,
    /// Seconds between re-evaluations. Zero or less waits only for change
    /// signals.
    pub poll_frequency: f64,
    /// Seconds before giving up. Negative waits forever.
    pub max_wait_time: f64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            eval: EvalSettings::default(),
            poll_frequency: 0.1,
            max_wait_time: -1.0,
        }
    }
}

impl WaitSettings {
    /// Wait settings with the given poll interval and timeout.
    #[must_use]
    pub fn new(poll_frequency: f64, max_wait_time: f64) -> Self {
        Self {
            poll_frequency,
            max_wait_time,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let update = KnowledgeUpdateSettings::default();
        assert!(!update.always_overwrite);
        assert!(update.signal_updates);
        assert_eq!(update.clock_increment, 1);
        assert!(update.reference().expand_variables);

        let wait = WaitSettings::default();
        assert!(wait.max_wait_time < 0.0);
        assert!((wait.poll_frequency - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{
            "always_overwrite": true,
            "clock_increment": 5,
            "delay_sending_modifieds": true,
            "max_wait_time": 2.5
        }"#;
        let wait: WaitSettings = serde_json::from_str(json).unwrap();

        assert!(wait.eval.update.always_overwrite);
        assert_eq!(wait.eval.update.clock_increment, 5);
        assert!(wait.eval.delay_sending_modifieds);
        assert!((wait.max_wait_time - 2.5).abs() < f64::EPSILON);
        assert!(wait.eval.update.signal_updates);
    }
}
