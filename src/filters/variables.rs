//! Context access for external functions and filters.

use crate::context::ContextState;
use crate::error::{MadaraResult, UpdateStatus};
use crate::logger::LogLevel;
use crate::record::{KnowledgeMap, KnowledgeRecord};
use crate::settings::KnowledgeUpdateSettings;

/// A view of the locked context handed to user callbacks.
///
/// Callbacks already run under the context lock, so every operation here
/// works on the borrowed state directly and never locks again.
#[derive(Debug)]
pub struct Variables<'a> {
    state: &'a mut ContextState,
    settings: KnowledgeUpdateSettings,
}

impl<'a> Variables<'a> {
    /// Wraps `state` with default update settings.
    pub fn new(state: &'a mut ContextState) -> Self {
        Self::with_settings(state, KnowledgeUpdateSettings::default())
    }

    /// Wraps `state`, applying `settings` to every write.
    pub fn with_settings(state: &'a mut ContextState, settings: KnowledgeUpdateSettings) -> Self {
        Self { state, settings }
    }

    /// Reads a variable, uncreated if absent.
    pub fn get(&self, key: &str) -> MadaraResult<KnowledgeRecord> {
        self.state.get(key, &self.settings.reference())
    }

    /// Writes a variable.
    pub fn set(&mut self, key: &str, value: impl Into<KnowledgeRecord>) -> UpdateStatus {
        self.state.set(key, value, &self.settings)
    }

    /// Increments a variable, returning the new value.
    pub fn inc(&mut self, key: &str) -> KnowledgeRecord {
        self.state.inc(key, &self.settings)
    }

    /// Decrements a variable, returning the new value.
    pub fn dec(&mut self, key: &str) -> KnowledgeRecord {
        self.state.dec(key, &self.settings)
    }

    /// Returns true if the variable holds a value.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.state.exists(key, &self.settings.reference())
    }

    /// Compiles and evaluates KaRL source.
    pub fn evaluate(&mut self, source: &str) -> MadaraResult<KnowledgeRecord> {
        self.state.evaluate_str(source, &self.settings)
    }

    /// Substitutes `{name}` with variable values.
    pub fn expand_statement(&self, statement: &str) -> MadaraResult<String> {
        self.state.expand_statement(statement)
    }

    /// Expands and prints `statement` at `level`.
    pub fn print(&self, statement: &str, level: LogLevel) {
        self.state.print(statement, level);
    }

    /// Existing variables whose names start with `prefix`.
    #[must_use]
    pub fn to_map(&self, prefix: &str) -> KnowledgeMap {
        self.state.to_map(prefix)
    }

    /// The underlying state, for operations this view does not wrap.
    pub fn state(&mut self) -> &mut ContextState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variables_read_write() {
        let mut state = ContextState::default();
        let mut vars = Variables::new(&mut state);
        assert!(vars.set("a", 4).is_applied());
        assert_eq!(vars.inc("a").to_integer(), 5);
        assert!(vars.exists("a"));
        assert_eq!(vars.evaluate("a * 2").unwrap().to_integer(), 10);
        assert_eq!(vars.expand_statement("a={a}").unwrap(), "a=5");
        assert_eq!(vars.to_map("a").len(), 1);
    }

    #[test]
    fn test_variables_honor_settings() {
        let mut state = ContextState::default();
        let settings = KnowledgeUpdateSettings {
            track_local_changes: true,
            ..KnowledgeUpdateSettings::default()
        };
        let mut vars = Variables::with_settings(&mut state, settings);
        vars.set(".local", 1);
        assert!(state.get_local_modified().contains_key(".local"));
    }
}
