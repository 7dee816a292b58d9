//! The application-facing knowledge base.
//!
//! A [`KnowledgeBase`] couples a [`ThreadSafeContext`] with the transports
//! that publish its changes. Writes made through it are sent to every
//! attached transport right away unless the settings ask to delay sending,
//! in which case they stay queued until the next [`KnowledgeBase::send_modifieds`].

use std::fmt;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::context::{ContextState, ThreadSafeContext};
use crate::error::{lock_err, MadaraResult, UpdateStatus};
use crate::expression::CompiledExpression;
use crate::filters::ExternalFunction;
use crate::logger::{LogLevel, Logger};
use crate::record::{KnowledgeMap, KnowledgeRecord};
use crate::settings::{EvalSettings, KnowledgeReferenceSettings, WaitSettings};
use crate::transport::Transport;

type Transports = Arc<RwLock<Vec<Arc<dyn Transport>>>>;

/// A shareable handle to one knowledge base. Clones share the context and
/// the transports.
#[derive(Clone)]
pub struct KnowledgeBase {
    id: Arc<str>,
    context: Arc<ThreadSafeContext>,
    transports: Transports,
}

impl fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transports = self
            .transports
            .read()
            .map(|t| t.iter().map(|t| t.id().to_string()).collect::<Vec<_>>())
            .unwrap_or_default();
        f.debug_struct("KnowledgeBase")
            .field("id", &self.id)
            .field("transports", &transports)
            .finish_non_exhaustive()
    }
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends the pending modifieds of `state` over `transports` and clears
/// them. Does nothing when no transport is attached or sending is delayed.
fn send_pending(state: &mut ContextState, transports: &[Arc<dyn Transport>], settings: &EvalSettings) -> MadaraResult<usize> {
    if transports.is_empty() || settings.delay_sending_modifieds {
        return Ok(0);
    }
    let mut modified = state.get_modifieds();
    if !settings.send_list.is_empty() {
        modified.retain(|name, _| settings.send_list.contains(name));
    }
    if modified.is_empty() {
        return Ok(0);
    }

    let mut sent = 0;
    for transport in transports {
        match transport.send_data(state, &modified) {
            Ok(bytes) => sent += bytes,
            Err(err) => tracing::warn!(transport = transport.id(), error = %err, "send failed"),
        }
    }
    if settings.send_list.is_empty() {
        state.reset_modified();
    } else {
        for name in modified.keys() {
            state.reset_modified_key(name);
        }
    }
    Ok(sent)
}

impl KnowledgeBase {
    /// Creates a knowledge base with a fresh id and a default logger.
    #[must_use]
    pub fn new() -> Self {
        Self::with_context(Arc::new(ThreadSafeContext::new()))
    }

    /// Creates a knowledge base printing through `logger`.
    #[must_use]
    pub fn with_logger(logger: Arc<Logger>) -> Self {
        Self::with_context(Arc::new(ThreadSafeContext::with_logger(logger)))
    }

    /// Wraps an existing context.
    #[must_use]
    pub fn with_context(context: Arc<ThreadSafeContext>) -> Self {
        Self {
            id: Arc::from(Uuid::new_v4().to_string()),
            context,
            transports: Arc::default(),
        }
    }

    /// Unique id, used as the originator of sent packets.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The shared context.
    #[must_use]
    pub fn context(&self) -> Arc<ThreadSafeContext> {
        Arc::clone(&self.context)
    }

    /// The print sink.
    pub fn logger(&self) -> MadaraResult<Arc<Logger>> {
        self.context.logger()
    }

    // ----- transports -----

    /// Adds a transport; later sends go through it too.
    pub fn attach_transport(&self, transport: Arc<dyn Transport>) -> MadaraResult<()> {
        let mut transports = self.transports.write().map_err(|_| lock_err("knowledge_base.transports"))?;
        tracing::debug!(kb = %self.id, transport = transport.id(), "transport attached");
        transports.push(transport);
        Ok(())
    }

    /// Number of attached transports.
    pub fn transport_count(&self) -> MadaraResult<usize> {
        Ok(self.transports.read().map_err(|_| lock_err("knowledge_base.transports"))?.len())
    }

    /// Closes and detaches every transport.
    pub fn close_transports(&self) -> MadaraResult<()> {
        let closed: Vec<_> = self
            .transports
            .write()
            .map_err(|_| lock_err("knowledge_base.transports"))?
            .drain(..)
            .collect();
        for transport in closed {
            transport.close();
        }
        Ok(())
    }

    fn transports(&self) -> MadaraResult<Vec<Arc<dyn Transport>>> {
        Ok(self.transports.read().map_err(|_| lock_err("knowledge_base.transports"))?.clone())
    }

    /// Sends every pending global change. Returns the bytes sent.
    pub fn send_modifieds(&self) -> MadaraResult<usize> {
        self.send_modifieds_with(&EvalSettings::default())
    }

    /// Sends pending changes allowed by `settings.send_list`.
    pub fn send_modifieds_with(&self, settings: &EvalSettings) -> MadaraResult<usize> {
        let transports = self.transports()?;
        let mut guard = self.context.lock()?;
        send_pending(&mut guard, &transports, settings)
    }

    fn after_write<T>(&self, result: T, settings: &EvalSettings) -> MadaraResult<T> {
        self.send_modifieds_with(settings)?;
        Ok(result)
    }

    // ----- variables -----

    /// Reads a variable; uncreated if absent.
    pub fn get(&self, key: &str) -> MadaraResult<KnowledgeRecord> {
        self.context.get(key, &KnowledgeReferenceSettings::DEFAULT)
    }

    /// Reads a variable with explicit settings.
    pub fn get_with(&self, key: &str, settings: &KnowledgeReferenceSettings) -> MadaraResult<KnowledgeRecord> {
        self.context.get(key, settings)
    }

    /// Writes a variable and sends the change.
    pub fn set(&self, key: &str, value: impl Into<KnowledgeRecord>) -> MadaraResult<UpdateStatus> {
        self.set_with(key, value, &EvalSettings::default())
    }

    /// Writes a variable under `settings`.
    pub fn set_with(&self, key: &str, value: impl Into<KnowledgeRecord>, settings: &EvalSettings) -> MadaraResult<UpdateStatus> {
        let status = self.context.set(key, value, &settings.update)?;
        self.after_write(status, settings)
    }

    /// Writes one array element and sends the change.
    pub fn set_index(&self, key: &str, index: usize, value: impl Into<KnowledgeRecord>) -> MadaraResult<UpdateStatus> {
        let settings = EvalSettings::default();
        let status = self.context.set_index(key, index, value, &settings.update)?;
        self.after_write(status, &settings)
    }

    /// Reads one array element.
    pub fn retrieve_index(&self, key: &str, index: usize) -> MadaraResult<KnowledgeRecord> {
        self.context.retrieve_index(key, index, &KnowledgeReferenceSettings::DEFAULT)
    }

    /// Increments a variable and sends the change.
    pub fn inc(&self, key: &str) -> MadaraResult<KnowledgeRecord> {
        let settings = EvalSettings::default();
        let value = self.context.inc(key, &settings.update)?;
        self.after_write(value, &settings)
    }

    /// Decrements a variable and sends the change.
    pub fn dec(&self, key: &str) -> MadaraResult<KnowledgeRecord> {
        let settings = EvalSettings::default();
        let value = self.context.dec(key, &settings.update)?;
        self.after_write(value, &settings)
    }

    /// Returns true if the variable holds a value.
    pub fn exists(&self, key: &str) -> MadaraResult<bool> {
        self.context.exists(key, &KnowledgeReferenceSettings::DEFAULT)
    }

    /// Erases a variable's value.
    pub fn clear(&self, key: &str) -> MadaraResult<bool> {
        self.context.clear(key, &KnowledgeReferenceSettings::DEFAULT)
    }

    /// Removes a variable.
    pub fn delete_variable(&self, key: &str) -> MadaraResult<bool> {
        self.context.delete_variable(key, &KnowledgeReferenceSettings::DEFAULT)
    }

    /// Existing variables whose names start with `prefix`.
    pub fn to_map(&self, prefix: &str) -> MadaraResult<KnowledgeMap> {
        self.context.to_map(prefix)
    }

    /// Sets the write quality used for this knowledge base's writes to
    /// `key`.
    pub fn set_write_quality(&self, key: &str, quality: u32) -> MadaraResult<()> {
        self.context.set_write_quality(key, quality, &KnowledgeReferenceSettings::DEFAULT)
    }

    // ----- KaRL -----

    /// Parses and prunes KaRL source.
    pub fn compile(&self, source: &str) -> MadaraResult<CompiledExpression> {
        self.context.compile(source)
    }

    /// Registers a Rust function callable from KaRL.
    pub fn define_function(&self, name: impl Into<String>, function: ExternalFunction) -> MadaraResult<()> {
        self.context.define_function(name, function)
    }

    /// Evaluates under one lock: pre-print, evaluate, post-print, then
    /// send the resulting changes.
    pub fn evaluate(&self, expression: &mut CompiledExpression, settings: &EvalSettings) -> MadaraResult<KnowledgeRecord> {
        let transports = self.transports()?;
        let mut guard = self.context.lock()?;
        if !settings.pre_print_statement.is_empty() {
            guard.print(&settings.pre_print_statement, LogLevel::ALWAYS);
        }
        let result = expression.evaluate(&mut guard, &settings.update)?;
        if !settings.post_print_statement.is_empty() {
            guard.print(&settings.post_print_statement, LogLevel::ALWAYS);
        }
        send_pending(&mut guard, &transports, settings)?;
        Ok(result)
    }

    /// Compiles and evaluates `source`.
    pub fn evaluate_str(&self, source: &str, settings: &EvalSettings) -> MadaraResult<KnowledgeRecord> {
        let mut expression = self.compile(source)?;
        self.evaluate(&mut expression, settings)
    }

    /// Blocks until `expression` is true or the wait times out, sending
    /// changes after every poll. Returns the last result.
    pub fn wait(&self, expression: &mut CompiledExpression, settings: &WaitSettings) -> MadaraResult<KnowledgeRecord> {
        let transports = self.transports()?;
        self.context.wait_with(expression, settings, |state| {
            send_pending(state, &transports, &settings.eval).map(|_| ())
        })
    }

    /// Substitutes `{name}` with variable values.
    pub fn expand_statement(&self, statement: &str) -> MadaraResult<String> {
        self.context.expand_statement(statement)
    }

    /// Expands and prints `statement` at `level`.
    pub fn print(&self, statement: &str, level: LogLevel) -> MadaraResult<()> {
        self.context.print(statement, level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemorySink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every batch it is asked to send.
    #[derive(Default)]
    struct RecordingTransport {
        batches: Mutex<Vec<KnowledgeMap>>,
        closed: AtomicUsize,
    }

    impl Transport for RecordingTransport {
        fn id(&self) -> &str {
            "recording"
        }

        fn send_data(&self, _state: &mut ContextState, updates: &KnowledgeMap) -> MadaraResult<usize> {
            self.batches.lock().unwrap().push(updates.clone());
            Ok(updates.len())
        }

        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn with_recorder() -> (KnowledgeBase, Arc<RecordingTransport>) {
        let kb = KnowledgeBase::new();
        let transport = Arc::new(RecordingTransport::default());
        kb.attach_transport(Arc::clone(&transport) as Arc<dyn Transport>).unwrap();
        (kb, transport)
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(KnowledgeBase::new().id(), KnowledgeBase::new().id());
        let kb = KnowledgeBase::new();
        assert_eq!(kb.clone().id(), kb.id());
    }

    #[test]
    fn test_set_sends_globals_only() {
        let (kb, transport) = with_recorder();
        kb.set("x", 1).unwrap();
        kb.set(".local", 2).unwrap();
        let batches = transport.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].contains_key("x"));
    }

    #[test]
    fn test_evaluate_sends_one_batch() {
        let (kb, transport) = with_recorder();
        kb.evaluate_str("a = 1; b = 2; .c = 3", &EvalSettings::default()).unwrap();
        let batches = transport.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_delayed_sending_queues_changes() {
        let (kb, transport) = with_recorder();
        let delayed = EvalSettings {
            delay_sending_modifieds: true,
            ..EvalSettings::default()
        };
        kb.evaluate_str("a = 1", &delayed).unwrap();
        kb.evaluate_str("b = 2", &delayed).unwrap();
        assert!(transport.batches.lock().unwrap().is_empty());

        kb.send_modifieds().unwrap();
        let batches = transport.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[test]
    fn test_send_list_limits_batch() {
        let (kb, transport) = with_recorder();
        let settings = EvalSettings {
            send_list: ["b".to_string()].into_iter().collect(),
            ..EvalSettings::default()
        };
        kb.evaluate_str("a = 1; b = 2", &settings).unwrap();
        assert_eq!(transport.batches.lock().unwrap()[0].len(), 1);
        // "a" is still pending.
        kb.send_modifieds().unwrap();
        assert!(transport.batches.lock().unwrap()[1].contains_key("a"));
    }

    #[test]
    fn test_pre_and_post_print() {
        let sink = Arc::new(MemorySink::new());
        let kb = KnowledgeBase::with_logger(Arc::new(Logger::with_sink(LogLevel::Error, sink.clone())));
        let settings = EvalSettings {
            pre_print_statement: "before x={x}".to_string(),
            post_print_statement: "after x={x}".to_string(),
            ..EvalSettings::default()
        };
        kb.evaluate_str("x = 9", &settings).unwrap();
        let lines: Vec<String> = sink.lines().into_iter().map(|(_, line)| line).collect();
        assert_eq!(lines, vec!["before x=".to_string(), "after x=9".to_string()]);
    }

    #[test]
    fn test_close_transports() {
        let (kb, transport) = with_recorder();
        kb.close_transports().unwrap();
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
        assert_eq!(kb.transport_count().unwrap(), 0);
    }

    #[test]
    fn test_wait_sends_after_each_poll() {
        let (kb, transport) = with_recorder();
        let mut expression = kb.compile("++polls >= 3").unwrap();
        let result = kb.wait(&mut expression, &WaitSettings::new(0.01, 5.0)).unwrap();
        assert!(result.is_true());
        assert_eq!(transport.batches.lock().unwrap().len(), 3);
    }
}
