//! Thread-safe knowledge context.
//!
//! [`ThreadSafeContext`] owns the variable store behind one mutex and a
//! condition variable that is signaled after writes. Callers either use the
//! one-shot wrappers below or take the lock once with [`ThreadSafeContext::lock`]
//! and work against the [`ContextState`] it dereferences to.

mod slots;
mod state;

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub use slots::{SlotKey, VariableReference};
pub use state::ContextState;

use crate::error::{lock_err, MadaraResult, UpdateStatus};
use crate::expression::CompiledExpression;
use crate::filters::ExternalFunction;
use crate::logger::{LogLevel, Logger};
use crate::record::{KnowledgeMap, KnowledgeRecord};
use crate::settings::{KnowledgeReferenceSettings, KnowledgeUpdateSettings, WaitSettings};

/// Exclusive access to the context state.
///
/// Dropping the guard releases the lock and wakes waiters if any write
/// made under it asked for a signal.
pub struct ContextGuard<'a> {
    guard: Option<MutexGuard<'a, ContextState>>,
    changed: &'a Condvar,
}

impl Deref for ContextGuard<'_> {
    type Target = ContextState;

    fn deref(&self) -> &ContextState {
        self.guard.as_deref().unwrap_or_else(|| unreachable!("context guard used after release"))
    }
}

impl DerefMut for ContextGuard<'_> {
    fn deref_mut(&mut self) -> &mut ContextState {
        self.guard.as_deref_mut().unwrap_or_else(|| unreachable!("context guard used after release"))
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            let signal = guard.take_signal();
            drop(guard);
            if signal {
                self.changed.notify_all();
            }
        }
    }
}

/// Shared variable store with change notification.
#[derive(Debug, Default)]
pub struct ThreadSafeContext {
    state: Mutex<ContextState>,
    changed: Condvar,
}

impl ThreadSafeContext {
    /// Creates an empty context printing through a default logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty context printing through `logger`.
    #[must_use]
    pub fn with_logger(logger: Arc<Logger>) -> Self {
        Self {
            state: Mutex::new(ContextState::new(logger)),
            changed: Condvar::new(),
        }
    }

    /// Takes the context lock.
    pub fn lock(&self) -> MadaraResult<ContextGuard<'_>> {
        let guard = self.state.lock().map_err(|_| lock_err("context.lock"))?;
        Ok(ContextGuard {
            guard: Some(guard),
            changed: &self.changed,
        })
    }

    /// Releases the lock held by `guard` until the context is signaled or
    /// `timeout` elapses, then reacquires it.
    pub fn wait_for_change(&self, guard: &mut ContextGuard<'_>, timeout: Option<Duration>) -> MadaraResult<()> {
        let Some(mut inner) = guard.guard.take() else {
            return Ok(());
        };
        if inner.take_signal() {
            self.changed.notify_all();
        }
        let inner = match timeout {
            Some(timeout) => {
                self.changed
                    .wait_timeout(inner, timeout)
                    .map_err(|_| lock_err("context.wait"))?
                    .0
            }
            None => self.changed.wait(inner).map_err(|_| lock_err("context.wait"))?,
        };
        guard.guard = Some(inner);
        Ok(())
    }

    /// Wakes every thread blocked in [`Self::wait`].
    pub fn signal(&self) {
        self.changed.notify_all();
    }

    fn with<T>(&self, f: impl FnOnce(&mut ContextState) -> T) -> MadaraResult<T> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }

    /// Reads a variable.
    pub fn get(&self, key: &str, settings: &KnowledgeReferenceSettings) -> MadaraResult<KnowledgeRecord> {
        self.lock()?.get(key, settings)
    }

    /// Reads a variable through a reference.
    pub fn get_by_ref(&self, reference: &VariableReference, settings: &KnowledgeReferenceSettings) -> MadaraResult<KnowledgeRecord> {
        self.lock()?.get_by_ref(reference, settings)
    }

    /// Resolves a reference, creating the variable slot if needed.
    pub fn get_ref(&self, key: &str, settings: &KnowledgeReferenceSettings) -> MadaraResult<Option<VariableReference>> {
        self.with(|s| s.get_ref(key, settings))
    }

    /// Returns true if the variable holds a value.
    pub fn exists(&self, key: &str, settings: &KnowledgeReferenceSettings) -> MadaraResult<bool> {
        self.with(|s| s.exists(key, settings))
    }

    /// Writes a variable.
    pub fn set(&self, key: &str, value: impl Into<KnowledgeRecord>, settings: &KnowledgeUpdateSettings) -> MadaraResult<UpdateStatus> {
        self.with(|s| s.set(key, value, settings))
    }

    /// Writes a variable through a reference.
    pub fn set_by_ref(
        &self,
        reference: &VariableReference,
        value: impl Into<KnowledgeRecord>,
        settings: &KnowledgeUpdateSettings,
    ) -> MadaraResult<UpdateStatus> {
        self.with(|s| s.set_by_ref(reference, value, settings))
    }

    /// Writes one array element.
    pub fn set_index(
        &self,
        key: &str,
        index: usize,
        value: impl Into<KnowledgeRecord>,
        settings: &KnowledgeUpdateSettings,
    ) -> MadaraResult<UpdateStatus> {
        self.lock()?.set_index(key, index, value, settings)
    }

    /// Reads one array element.
    pub fn retrieve_index(&self, key: &str, index: usize, settings: &KnowledgeReferenceSettings) -> MadaraResult<KnowledgeRecord> {
        self.lock()?.retrieve_index(key, index, settings)
    }

    /// Increments a variable.
    pub fn inc(&self, key: &str, settings: &KnowledgeUpdateSettings) -> MadaraResult<KnowledgeRecord> {
        self.with(|s| s.inc(key, settings))
    }

    /// Decrements a variable.
    pub fn dec(&self, key: &str, settings: &KnowledgeUpdateSettings) -> MadaraResult<KnowledgeRecord> {
        self.with(|s| s.dec(key, settings))
    }

    /// See [`ContextState::set_if_unequal`].
    pub fn set_if_unequal(
        &self,
        key: &str,
        value: &KnowledgeRecord,
        quality: u32,
        clock: u64,
        settings: &KnowledgeUpdateSettings,
    ) -> MadaraResult<UpdateStatus> {
        self.with(|s| s.set_if_unequal(key, value, quality, clock, settings))
    }

    /// See [`ContextState::update_record_from_external`].
    pub fn update_record_from_external(
        &self,
        key: &str,
        record: &KnowledgeRecord,
        settings: &KnowledgeUpdateSettings,
    ) -> MadaraResult<UpdateStatus> {
        self.with(|s| s.update_record_from_external(key, record, settings))
    }

    /// Raises (or forces) a variable's quality.
    pub fn set_quality(&self, key: &str, quality: u32, force: bool, settings: &KnowledgeReferenceSettings) -> MadaraResult<u32> {
        self.with(|s| s.set_quality(key, quality, force, settings))
    }

    /// Sets the write quality of a variable.
    pub fn set_write_quality(&self, key: &str, quality: u32, settings: &KnowledgeReferenceSettings) -> MadaraResult<()> {
        self.with(|s| s.set_write_quality(key, quality, settings))
    }

    /// Stored quality of a variable.
    pub fn get_quality(&self, key: &str, settings: &KnowledgeReferenceSettings) -> MadaraResult<u32> {
        self.with(|s| s.get_quality(key, settings))
    }

    /// Write quality of a variable.
    pub fn get_write_quality(&self, key: &str, settings: &KnowledgeReferenceSettings) -> MadaraResult<u32> {
        self.with(|s| s.get_write_quality(key, settings))
    }

    /// Global clock.
    pub fn clock(&self) -> MadaraResult<u64> {
        self.with(|s| s.clock())
    }

    /// Raises the global clock.
    pub fn set_clock(&self, clock: u64) -> MadaraResult<u64> {
        self.with(|s| s.set_clock(clock))
    }

    /// Advances the global clock.
    pub fn inc_clock(&self, settings: &KnowledgeUpdateSettings) -> MadaraResult<u64> {
        self.with(|s| s.inc_clock(settings))
    }

    /// Clock of one variable.
    pub fn variable_clock(&self, key: &str, settings: &KnowledgeReferenceSettings) -> MadaraResult<u64> {
        self.with(|s| s.variable_clock(key, settings))
    }

    /// Raises the clock of one variable.
    pub fn set_variable_clock(&self, key: &str, clock: u64, settings: &KnowledgeReferenceSettings) -> MadaraResult<u64> {
        self.with(|s| s.set_variable_clock(key, clock, settings))
    }

    /// Erases a variable's value.
    pub fn clear(&self, key: &str, settings: &KnowledgeReferenceSettings) -> MadaraResult<bool> {
        self.with(|s| s.clear(key, settings))
    }

    /// Removes a variable.
    pub fn delete_variable(&self, key: &str, settings: &KnowledgeReferenceSettings) -> MadaraResult<bool> {
        self.with(|s| s.delete_variable(key, settings))
    }

    /// Removes every variable.
    pub fn clear_all(&self) -> MadaraResult<()> {
        self.with(ContextState::clear_all)
    }

    /// Names of every variable holding a value.
    pub fn keys(&self) -> MadaraResult<Vec<String>> {
        self.with(|s| s.keys())
    }

    /// Snapshot of the variables starting with `prefix`.
    pub fn to_map(&self, prefix: &str) -> MadaraResult<KnowledgeMap> {
        self.with(|s| s.to_map(prefix))
    }

    /// Global changes pending send.
    pub fn get_modifieds(&self) -> MadaraResult<KnowledgeMap> {
        self.with(|s| s.get_modifieds())
    }

    /// Locally tracked changes.
    pub fn get_local_modified(&self) -> MadaraResult<KnowledgeMap> {
        self.with(|s| s.get_local_modified())
    }

    /// Clears pending global changes.
    pub fn reset_modified(&self) -> MadaraResult<()> {
        self.with(ContextState::reset_modified)
    }

    /// Marks every global variable as changed.
    pub fn apply_modified(&self) -> MadaraResult<()> {
        self.with(ContextState::apply_modified)
    }

    /// Debug listing of pending global changes.
    pub fn debug_modifieds(&self) -> MadaraResult<String> {
        self.with(|s| s.debug_modifieds())
    }

    /// Expands `{var}` references in a statement.
    pub fn expand_statement(&self, statement: &str) -> MadaraResult<String> {
        self.lock()?.expand_statement(statement)
    }

    /// Expands and prints a statement.
    pub fn print(&self, statement: &str, level: LogLevel) -> MadaraResult<()> {
        self.with(|s| s.print(statement, level))
    }

    /// The print sink.
    pub fn logger(&self) -> MadaraResult<Arc<Logger>> {
        self.with(|s| Arc::clone(s.logger()))
    }

    /// Registers an external KaRL function.
    pub fn define_function(&self, name: impl Into<String>, function: ExternalFunction) -> MadaraResult<()> {
        self.with(|s| s.define_function(name, function))
    }

    /// Parses without pruning.
    pub fn parse(&self, source: &str) -> MadaraResult<CompiledExpression> {
        self.lock()?.parse(source)
    }

    /// Parses and prunes an expression.
    pub fn compile(&self, source: &str) -> MadaraResult<CompiledExpression> {
        self.lock()?.compile(source)
    }

    /// Evaluates a compiled expression under one lock.
    pub fn evaluate(&self, expression: &mut CompiledExpression, settings: &KnowledgeUpdateSettings) -> MadaraResult<KnowledgeRecord> {
        let mut guard = self.lock()?;
        expression.evaluate(&mut guard, settings)
    }

    /// Blocks until `expression` evaluates to true or the wait times out.
    /// Returns the last evaluation result.
    pub fn wait(&self, expression: &mut CompiledExpression, settings: &WaitSettings) -> MadaraResult<KnowledgeRecord> {
        self.wait_with(expression, settings, |_| Ok(()))
    }

    /// Like [`Self::wait`], running `after_eval` under the lock after every
    /// evaluation.
    pub fn wait_with<F>(&self, expression: &mut CompiledExpression, settings: &WaitSettings, mut after_eval: F) -> MadaraResult<KnowledgeRecord>
    where
        F: FnMut(&mut ContextState) -> MadaraResult<()>,
    {
        let started = Instant::now();
        // Negative, NaN or unrepresentably long limits mean no deadline.
        let deadline = Duration::try_from_secs_f64(settings.max_wait_time)
            .ok()
            .and_then(|limit| started.checked_add(limit));
        let poll = Duration::try_from_secs_f64(settings.poll_frequency)
            .ok()
            .filter(|p| !p.is_zero());
        let update = &settings.eval.update;

        let mut guard = self.lock()?;
        if !settings.eval.pre_print_statement.is_empty() {
            guard.print(&settings.eval.pre_print_statement, LogLevel::ALWAYS);
        }

        let mut last = expression.evaluate(&mut guard, update)?;
        after_eval(&mut guard)?;
        let mut polls = 0_u64;

        while last.is_false() {
            let now = Instant::now();
            let remaining = match deadline {
                Some(deadline) if now >= deadline => break,
                Some(deadline) => Some(deadline - now),
                None => None,
            };
            let timeout = match (poll, remaining) {
                (Some(poll), Some(remaining)) => Some(poll.min(remaining)),
                (poll, remaining) => poll.or(remaining),
            };

            self.wait_for_change(&mut guard, timeout)?;
            polls += 1;
            last = expression.evaluate(&mut guard, update)?;
            after_eval(&mut guard)?;
        }

        tracing::debug!(
            expression = expression.source(),
            polls,
            satisfied = last.is_true(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "wait finished"
        );

        if !settings.eval.post_print_statement.is_empty() {
            guard.print(&settings.eval.post_print_statement, LogLevel::ALWAYS);
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wrappers_share_state() {
        let context = ThreadSafeContext::new();
        let settings = KnowledgeUpdateSettings::default();
        context.set("x", 3, &settings).unwrap();
        assert_eq!(context.inc("x", &settings).unwrap().to_integer(), 4);
        assert_eq!(context.get("x", &KnowledgeReferenceSettings::DEFAULT).unwrap().to_integer(), 4);
        assert_eq!(context.clock().unwrap(), 2);
    }

    #[test]
    fn test_guard_groups_operations() {
        let context = ThreadSafeContext::new();
        {
            let mut guard = context.lock().unwrap();
            guard.set("a", 1, &KnowledgeUpdateSettings::default());
            guard.set("b", 2, &KnowledgeUpdateSettings::default());
        }
        assert_eq!(context.keys().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_wait_times_out() {
        let context = ThreadSafeContext::new();
        let mut expression = context.compile("never").unwrap();
        let started = Instant::now();
        let result = context.wait(&mut expression, &WaitSettings::new(0.01, 0.05)).unwrap();

        assert!(result.is_false());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_wait_accepts_unbounded_limits() {
        let context = ThreadSafeContext::new();
        let mut expression = context.compile("1").unwrap();
        for limit in [f64::INFINITY, f64::MAX, f64::NAN] {
            let result = context.wait(&mut expression, &WaitSettings::new(0.1, limit)).unwrap();
            assert!(result.is_true());
        }
    }

    #[test]
    fn test_wait_wakes_on_write() {
        let context = Arc::new(ThreadSafeContext::new());
        let writer = Arc::clone(&context);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set("ready", 1, &KnowledgeUpdateSettings::default()).unwrap();
        });

        let mut expression = context.compile("ready").unwrap();
        let result = context.wait(&mut expression, &WaitSettings::new(0.0, 5.0)).unwrap();
        handle.join().unwrap();

        assert!(result.is_true());
    }

    #[test]
    fn test_wait_runs_after_eval() {
        let context = ThreadSafeContext::new();
        let mut expression = context.compile("++count >= 3").unwrap();
        let mut calls = 0;
        let result = context
            .wait_with(&mut expression, &WaitSettings::new(0.001, 1.0), |_| {
                calls += 1;
                Ok(())
            })
            .unwrap();

        assert!(result.is_true());
        assert_eq!(calls, 3);
    }
}
