//! Lock-free view of the knowledge context.
//!
//! Every method here assumes the caller already holds the context lock.
//! [`ThreadSafeContext`](super::ThreadSafeContext) hands out `&mut
//! ContextState` through its guard; expression evaluation and filters work
//! directly against it so that one evaluation is one critical section.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::convert::Infallible;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::slots::{SlotArena, VariableReference};
use crate::error::{KarlError, MadaraError, MadaraResult, UpdateStatus};
use crate::expression::{parser, CompiledExpression};
use crate::filters::ExternalFunction;
use crate::logger::{LogLevel, Logger};
use crate::record::{DoubleFormat, KnowledgeMap, KnowledgeRecord};
use crate::settings::{KnowledgeReferenceSettings, KnowledgeUpdateSettings};

#[derive(Debug)]
struct Variable {
    name: Arc<str>,
    record: KnowledgeRecord,
}

/// Variables, clock and change tracking guarded by the context lock.
pub struct ContextState {
    variables: SlotArena<Variable>,
    index: HashMap<Arc<str>, super::slots::SlotKey>,
    clock: u64,
    changed: BTreeSet<Arc<str>>,
    local_changed: BTreeSet<Arc<str>>,
    signal_pending: bool,
    logger: Arc<Logger>,
    double_format: DoubleFormat,
    rng: StdRng,
    functions: HashMap<String, ExternalFunction>,
}

impl fmt::Debug for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextState")
            .field("variables", &self.variables.len())
            .field("clock", &self.clock)
            .field("changed", &self.changed)
            .field("local_changed", &self.local_changed)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Default for ContextState {
    fn default() -> Self {
        Self::new(Arc::new(Logger::default()))
    }
}

impl ContextState {
    /// Creates an empty state printing through `logger`.
    #[must_use]
    pub fn new(logger: Arc<Logger>) -> Self {
        Self {
            variables: SlotArena::default(),
            index: HashMap::new(),
            clock: 0,
            changed: BTreeSet::new(),
            local_changed: BTreeSet::new(),
            signal_pending: false,
            logger,
            double_format: DoubleFormat::default(),
            rng: StdRng::from_entropy(),
            functions: HashMap::new(),
        }
    }

    // ----- references -----

    fn create_ref(&mut self, name: &str) -> VariableReference {
        if let Some((shared, slot)) = self.index.get_key_value(name) {
            return VariableReference::new(Arc::clone(shared), *slot);
        }
        let name: Arc<str> = Arc::from(name);
        let slot = self.variables.insert(Variable {
            name: Arc::clone(&name),
            record: KnowledgeRecord::new(),
        });
        self.index.insert(Arc::clone(&name), slot);
        VariableReference::new(name, slot)
    }

    /// Expands `{var}` interpolation in `key`. Malformed keys are returned
    /// unchanged.
    #[must_use]
    pub fn expand_key<'k>(&self, key: &'k str) -> Cow<'k, str> {
        if !key.contains('{') && !key.contains('}') {
            return Cow::Borrowed(key);
        }
        match self.expand_statement(key) {
            Ok(expanded) => Cow::Owned(expanded),
            Err(err) => {
                tracing::warn!(key, error = %err, "variable key expansion failed, using key verbatim");
                Cow::Borrowed(key)
            }
        }
    }

    fn effective_key<'k>(&self, key: &'k str, settings: &KnowledgeReferenceSettings) -> Cow<'k, str> {
        if settings.expand_variables {
            self.expand_key(key)
        } else {
            Cow::Borrowed(key)
        }
    }

    /// Resolves `key` to a reusable reference, creating the slot if needed.
    ///
    /// Returns `None` for an empty key.
    pub fn get_ref(&mut self, key: &str, settings: &KnowledgeReferenceSettings) -> Option<VariableReference> {
        let key = self.effective_key(key, settings).into_owned();
        if key.is_empty() {
            return None;
        }
        Some(self.create_ref(&key))
    }

    /// Looks up an existing slot without creating one or expanding the key.
    #[must_use]
    pub fn find_ref(&self, key: &str) -> Option<VariableReference> {
        self.index
            .get_key_value(key)
            .map(|(name, slot)| VariableReference::new(Arc::clone(name), *slot))
    }

    /// Returns true if `reference` still points at a live slot.
    #[must_use]
    pub fn is_valid(&self, reference: &VariableReference) -> bool {
        self.variables.contains(reference.slot())
    }

    /// Re-resolves a stale reference by name. Live references are left
    /// untouched.
    pub fn refresh(&mut self, reference: &mut VariableReference) {
        if !self.is_valid(reference) {
            *reference = self.create_ref(reference.name());
        }
    }

    /// Borrows the record behind a reference.
    #[must_use]
    pub fn record(&self, reference: &VariableReference) -> Option<&KnowledgeRecord> {
        self.variables.get(reference.slot()).map(|v| &v.record)
    }

    /// Mutably borrows the record behind a reference. Changes made through
    /// this borrow are not marked or signaled.
    pub fn record_mut(&mut self, reference: &VariableReference) -> Option<&mut KnowledgeRecord> {
        self.variables.get_mut(reference.slot()).map(|v| &mut v.record)
    }

    // ----- reads -----

    fn checked(name: &str, record: Option<&KnowledgeRecord>, settings: &KnowledgeReferenceSettings) -> MadaraResult<KnowledgeRecord> {
        match record {
            Some(record) if record.exists() => Ok(record.clone()),
            _ if settings.exception_on_uninitialized => Err(MadaraError::uninitialized(name)),
            _ => Ok(KnowledgeRecord::new()),
        }
    }

    /// Returns a copy of the named record, or an uncreated record if absent.
    pub fn get(&self, key: &str, settings: &KnowledgeReferenceSettings) -> MadaraResult<KnowledgeRecord> {
        let key = self.effective_key(key, settings);
        let record = self
            .index
            .get(&*key)
            .and_then(|slot| self.variables.get(*slot))
            .map(|v| &v.record);
        Self::checked(&key, record, settings)
    }

    /// Returns a copy of the referenced record.
    pub fn get_by_ref(&self, reference: &VariableReference, settings: &KnowledgeReferenceSettings) -> MadaraResult<KnowledgeRecord> {
        Self::checked(reference.name(), self.record(reference), settings)
    }

    /// Returns true if the variable holds a value.
    #[must_use]
    pub fn exists(&self, key: &str, settings: &KnowledgeReferenceSettings) -> bool {
        let key = self.effective_key(key, settings);
        self.index
            .get(&*key)
            .and_then(|slot| self.variables.get(*slot))
            .is_some_and(|v| v.record.exists())
    }

    /// Reads one element of an array variable.
    pub fn retrieve_index(&self, key: &str, index: usize, settings: &KnowledgeReferenceSettings) -> MadaraResult<KnowledgeRecord> {
        Ok(self.get(key, settings)?.retrieve_index(index))
    }

    /// Reads one element of a referenced array variable.
    pub fn retrieve_index_by_ref(
        &self,
        reference: &VariableReference,
        index: usize,
        settings: &KnowledgeReferenceSettings,
    ) -> MadaraResult<KnowledgeRecord> {
        Ok(self.get_by_ref(reference, settings)?.retrieve_index(index))
    }

    // ----- writes -----

    fn mark_and_signal(&mut self, name: Arc<str>, settings: &KnowledgeUpdateSettings) {
        let is_local = name.starts_with('.') && !settings.treat_locals_as_globals;
        if is_local || settings.treat_globals_as_locals {
            if settings.track_local_changes {
                self.local_changed.insert(name);
            }
        } else {
            if settings.track_local_changes {
                self.local_changed.insert(Arc::clone(&name));
            }
            self.changed.insert(name);
        }
        if settings.signal_updates {
            self.signal_pending = true;
        }
    }

    /// Applies `mutate` to the referenced record if the quality gate allows
    /// it, then advances clocks and marks the variable.
    fn write_with(
        &mut self,
        reference: &VariableReference,
        settings: &KnowledgeUpdateSettings,
        mutate: impl FnOnce(&mut KnowledgeRecord),
    ) -> UpdateStatus {
        let written = self.try_write_with(reference, settings, |record| {
            mutate(record);
            Ok::<(), Infallible>(())
        });
        match written {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }

    /// Like [`Self::write_with`] for mutations that can fail. A failed
    /// mutation leaves clocks, quality and modified tracking untouched.
    fn try_write_with<E>(
        &mut self,
        reference: &VariableReference,
        settings: &KnowledgeUpdateSettings,
        mutate: impl FnOnce(&mut KnowledgeRecord) -> Result<(), E>,
    ) -> Result<UpdateStatus, E> {
        let increment = settings.clock_increment;
        let Some(variable) = self.variables.get_mut(reference.slot()) else {
            return Ok(UpdateStatus::InvalidKey);
        };
        let record = &mut variable.record;
        if !settings.always_overwrite && record.write_quality < record.quality {
            return Ok(UpdateStatus::Rejected);
        }

        mutate(record)?;
        record.quality = record.write_quality;
        record.clock = record.clock.saturating_add(increment);
        let record_clock = record.clock;
        let name = Arc::clone(&variable.name);

        self.clock = self.clock.saturating_add(increment).max(record_clock);
        self.mark_and_signal(name, settings);
        Ok(UpdateStatus::Applied)
    }

    /// Writes a value through a reference, subject to the quality gate.
    pub fn set_by_ref(
        &mut self,
        reference: &VariableReference,
        value: impl Into<KnowledgeRecord>,
        settings: &KnowledgeUpdateSettings,
    ) -> UpdateStatus {
        let value = value.into();
        self.write_with(reference, settings, |record| record.set_value_from(&value))
    }

    /// Writes a value by name, subject to the quality gate.
    pub fn set(&mut self, key: &str, value: impl Into<KnowledgeRecord>, settings: &KnowledgeUpdateSettings) -> UpdateStatus {
        match self.get_ref(key, &settings.reference()) {
            Some(reference) => self.set_by_ref(&reference, value, settings),
            None => UpdateStatus::InvalidKey,
        }
    }

    /// Writes one array element through a reference. An index at or past
    /// [`MAX_ARRAY_SIZE`](crate::record::MAX_ARRAY_SIZE) is a runtime error.
    pub fn set_index_by_ref(
        &mut self,
        reference: &VariableReference,
        index: usize,
        value: impl Into<KnowledgeRecord>,
        settings: &KnowledgeUpdateSettings,
    ) -> MadaraResult<UpdateStatus> {
        let value = value.into();
        Ok(self.try_write_with(reference, settings, |record| record.set_index(index, &value))?)
    }

    /// Writes one array element by name.
    pub fn set_index(
        &mut self,
        key: &str,
        index: usize,
        value: impl Into<KnowledgeRecord>,
        settings: &KnowledgeUpdateSettings,
    ) -> MadaraResult<UpdateStatus> {
        match self.get_ref(key, &settings.reference()) {
            Some(reference) => self.set_index_by_ref(&reference, index, value, settings),
            None => Ok(UpdateStatus::InvalidKey),
        }
    }

    fn current(&self, reference: &VariableReference) -> KnowledgeRecord {
        self.record(reference).cloned().unwrap_or_default()
    }

    /// Increments through a reference and returns the resulting record.
    /// A rejected write returns the unchanged record.
    pub fn inc_by_ref(&mut self, reference: &VariableReference, settings: &KnowledgeUpdateSettings) -> KnowledgeRecord {
        self.write_with(reference, settings, KnowledgeRecord::inc);
        self.current(reference)
    }

    /// Decrements through a reference and returns the resulting record.
    pub fn dec_by_ref(&mut self, reference: &VariableReference, settings: &KnowledgeUpdateSettings) -> KnowledgeRecord {
        self.write_with(reference, settings, KnowledgeRecord::dec);
        self.current(reference)
    }

    /// Increments by name.
    pub fn inc(&mut self, key: &str, settings: &KnowledgeUpdateSettings) -> KnowledgeRecord {
        match self.get_ref(key, &settings.reference()) {
            Some(reference) => self.inc_by_ref(&reference, settings),
            None => KnowledgeRecord::new(),
        }
    }

    /// Decrements by name.
    pub fn dec(&mut self, key: &str, settings: &KnowledgeUpdateSettings) -> KnowledgeRecord {
        match self.get_ref(key, &settings.reference()) {
            Some(reference) => self.dec_by_ref(&reference, settings),
            None => KnowledgeRecord::new(),
        }
    }

    /// Increments one array element and returns the element.
    pub fn inc_index_by_ref(
        &mut self,
        reference: &VariableReference,
        index: usize,
        settings: &KnowledgeUpdateSettings,
    ) -> MadaraResult<KnowledgeRecord> {
        self.try_write_with(reference, settings, |record| record.inc_index(index).map(drop))?;
        Ok(self.current(reference).retrieve_index(index))
    }

    /// Decrements one array element and returns the element.
    pub fn dec_index_by_ref(
        &mut self,
        reference: &VariableReference,
        index: usize,
        settings: &KnowledgeUpdateSettings,
    ) -> MadaraResult<KnowledgeRecord> {
        self.try_write_with(reference, settings, |record| record.dec_index(index).map(drop))?;
        Ok(self.current(reference).retrieve_index(index))
    }

    /// Writes `value` with an explicit quality and clock, unless the stored
    /// record outranks it or already holds the same value.
    pub fn set_if_unequal(
        &mut self,
        key: &str,
        value: &KnowledgeRecord,
        quality: u32,
        clock: u64,
        settings: &KnowledgeUpdateSettings,
    ) -> UpdateStatus {
        let Some(reference) = self.get_ref(key, &settings.reference()) else {
            return UpdateStatus::InvalidKey;
        };
        let Some(variable) = self.variables.get_mut(reference.slot()) else {
            return UpdateStatus::InvalidKey;
        };
        let record = &mut variable.record;
        if quality < record.quality {
            return UpdateStatus::Rejected;
        }
        if quality == record.quality && clock < record.clock {
            return UpdateStatus::Stale;
        }

        record.quality = quality;
        record.clock = clock;
        self.clock = self.clock.max(clock);
        if record.same_value(value) {
            return UpdateStatus::Unchanged;
        }
        record.set_value_from(value);
        let name = Arc::clone(&variable.name);
        self.mark_and_signal(name, settings);
        UpdateStatus::Applied
    }

    /// Applies a record received from a peer.
    ///
    /// Lower quality is rejected, equal quality with an older clock is
    /// stale. Accepted records are copied wholesale (keeping the local
    /// write quality), advance the global clock past the incoming clock and
    /// are not marked for re-sending.
    pub fn update_record_from_external(
        &mut self,
        key: &str,
        incoming: &KnowledgeRecord,
        settings: &KnowledgeUpdateSettings,
    ) -> UpdateStatus {
        if key.is_empty() {
            return UpdateStatus::InvalidKey;
        }
        let reference = self.create_ref(key);
        let Some(variable) = self.variables.get_mut(reference.slot()) else {
            return UpdateStatus::InvalidKey;
        };
        let record = &mut variable.record;
        if incoming.quality < record.quality {
            return UpdateStatus::Rejected;
        }
        if incoming.quality == record.quality && incoming.clock < record.clock {
            return UpdateStatus::Stale;
        }

        let write_quality = record.write_quality;
        *record = incoming.clone();
        record.write_quality = write_quality;
        if incoming.clock >= self.clock {
            self.clock = incoming.clock.saturating_add(1);
        }
        if settings.track_local_changes {
            self.local_changed.insert(Arc::clone(&variable.name));
        }
        if settings.signal_updates {
            self.signal_pending = true;
        }
        UpdateStatus::Applied
    }

    /// Raises (or with `force`, sets) the stored quality. Returns the
    /// resulting quality.
    pub fn set_quality(&mut self, key: &str, quality: u32, force: bool, settings: &KnowledgeReferenceSettings) -> u32 {
        let Some(reference) = self.get_ref(key, settings) else {
            return 0;
        };
        self.record_mut(&reference).map_or(0, |record| {
            if force || quality > record.quality {
                record.quality = quality;
            }
            record.quality
        })
    }

    /// Sets the quality this writer applies to the variable.
    pub fn set_write_quality(&mut self, key: &str, quality: u32, settings: &KnowledgeReferenceSettings) {
        if let Some(reference) = self.get_ref(key, settings) {
            if let Some(record) = self.record_mut(&reference) {
                record.write_quality = quality;
            }
        }
    }

    /// Stored quality of a variable.
    #[must_use]
    pub fn get_quality(&self, key: &str, settings: &KnowledgeReferenceSettings) -> u32 {
        self.lookup(key, settings).map_or(0, |r| r.quality)
    }

    /// Write quality of a variable.
    #[must_use]
    pub fn get_write_quality(&self, key: &str, settings: &KnowledgeReferenceSettings) -> u32 {
        self.lookup(key, settings).map_or(0, |r| r.write_quality)
    }

    fn lookup(&self, key: &str, settings: &KnowledgeReferenceSettings) -> Option<&KnowledgeRecord> {
        let key = self.effective_key(key, settings);
        self.index
            .get(&*key)
            .and_then(|slot| self.variables.get(*slot))
            .map(|v| &v.record)
    }

    // ----- clocks -----

    /// Global Lamport clock.
    #[must_use]
    pub const fn clock(&self) -> u64 {
        self.clock
    }

    /// Raises the global clock to `clock`. Never moves it backwards.
    pub fn set_clock(&mut self, clock: u64) -> u64 {
        self.clock = self.clock.max(clock);
        self.clock
    }

    /// Advances the global clock by the configured increment.
    pub fn inc_clock(&mut self, settings: &KnowledgeUpdateSettings) -> u64 {
        self.clock = self.clock.saturating_add(settings.clock_increment);
        self.clock
    }

    /// Clock of one variable.
    #[must_use]
    pub fn variable_clock(&self, key: &str, settings: &KnowledgeReferenceSettings) -> u64 {
        self.lookup(key, settings).map_or(0, |r| r.clock)
    }

    /// Raises the clock of one variable. Never moves it backwards.
    pub fn set_variable_clock(&mut self, key: &str, clock: u64, settings: &KnowledgeReferenceSettings) -> u64 {
        let Some(reference) = self.get_ref(key, settings) else {
            return 0;
        };
        self.set_variable_clock_by_ref(&reference, clock)
    }

    /// Raises the clock of a referenced variable.
    pub fn set_variable_clock_by_ref(&mut self, reference: &VariableReference, clock: u64) -> u64 {
        self.record_mut(reference).map_or(0, |record| {
            record.clock = record.clock.max(clock);
            record.clock
        })
    }

    /// Advances the clock of one variable by the configured increment.
    pub fn inc_variable_clock(&mut self, key: &str, settings: &KnowledgeUpdateSettings) -> u64 {
        let Some(reference) = self.get_ref(key, &settings.reference()) else {
            return 0;
        };
        self.record_mut(&reference).map_or(0, |record| {
            record.clock = record.clock.saturating_add(settings.clock_increment);
            record.clock
        })
    }

    // ----- removal and iteration -----

    /// Erases the value of a variable. The slot and any references to it
    /// stay valid. Returns true if the variable existed.
    pub fn clear(&mut self, key: &str, settings: &KnowledgeReferenceSettings) -> bool {
        let key = self.effective_key(key, settings).into_owned();
        let Some(reference) = self.find_ref(&key) else {
            return false;
        };
        self.changed.remove(key.as_str());
        self.local_changed.remove(key.as_str());
        self.record_mut(&reference).is_some_and(|record| {
            let existed = record.exists();
            record.clear_value();
            existed
        })
    }

    /// Removes a variable entirely. Outstanding references become stale.
    /// Returns true if a slot was removed.
    pub fn delete_variable(&mut self, key: &str, settings: &KnowledgeReferenceSettings) -> bool {
        let key = self.effective_key(key, settings).into_owned();
        let Some(slot) = self.index.remove(key.as_str()) else {
            return false;
        };
        self.changed.remove(key.as_str());
        self.local_changed.remove(key.as_str());
        self.variables.remove(slot).is_some()
    }

    /// Removes every variable. The clock is kept.
    pub fn clear_all(&mut self) {
        self.variables.clear();
        self.index.clear();
        self.changed.clear();
        self.local_changed.clear();
    }

    /// Names of every variable holding a value, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .index
            .iter()
            .filter(|(_, slot)| self.variables.get(**slot).is_some_and(|v| v.record.exists()))
            .map(|(name, _)| name.to_string())
            .collect();
        keys.sort();
        keys
    }

    /// Snapshot of every variable whose name starts with `prefix`.
    #[must_use]
    pub fn to_map(&self, prefix: &str) -> KnowledgeMap {
        self.index
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .filter_map(|(name, slot)| {
                self.variables
                    .get(*slot)
                    .filter(|v| v.record.exists())
                    .map(|v| (name.to_string(), v.record.clone()))
            })
            .collect()
    }

    // ----- modified tracking -----

    fn snapshot<'a>(&self, names: impl Iterator<Item = &'a Arc<str>>) -> KnowledgeMap {
        names
            .filter_map(|name| {
                self.index
                    .get(name)
                    .and_then(|slot| self.variables.get(*slot))
                    .map(|v| (name.to_string(), v.record.clone()))
            })
            .collect()
    }

    /// Global variables changed since the last reset.
    #[must_use]
    pub fn get_modifieds(&self) -> KnowledgeMap {
        self.snapshot(self.changed.iter())
    }

    /// Variables recorded by local change tracking.
    #[must_use]
    pub fn get_local_modified(&self) -> KnowledgeMap {
        self.snapshot(self.local_changed.iter())
    }

    /// Forgets every pending global change.
    pub fn reset_modified(&mut self) {
        self.changed.clear();
    }

    /// Forgets one pending global change.
    pub fn reset_modified_key(&mut self, key: &str) {
        self.changed.remove(key);
    }

    /// Forgets every local change.
    pub fn reset_local_modified(&mut self) {
        self.local_changed.clear();
    }

    /// Marks every existing global variable as changed.
    pub fn apply_modified(&mut self) {
        let names: Vec<Arc<str>> = self
            .index
            .iter()
            .filter(|(name, slot)| !name.starts_with('.') && self.variables.get(**slot).is_some_and(|v| v.record.exists()))
            .map(|(name, _)| Arc::clone(name))
            .collect();
        self.changed.extend(names);
    }

    /// Marks the named existing variables as changed.
    pub fn add_modifieds<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            if let Some((shared, _)) = self.index.get_key_value(name.as_ref()) {
                self.changed.insert(Arc::clone(shared));
            }
        }
    }

    /// Marks a referenced variable as changed under `settings`.
    pub fn mark_modified(&mut self, reference: &VariableReference, settings: &KnowledgeUpdateSettings) {
        if self.is_valid(reference) {
            self.mark_and_signal(reference.shared_name(), settings);
        }
    }

    /// One `name=value` line per pending global change.
    #[must_use]
    pub fn debug_modifieds(&self) -> String {
        let mut out = String::new();
        for (name, record) in self.get_modifieds() {
            let _ = writeln!(out, "{name}={}", self.render(&record, ", "));
        }
        out
    }

    pub(crate) fn take_signal(&mut self) -> bool {
        std::mem::take(&mut self.signal_pending)
    }

    // ----- text -----

    /// Renders a record with the context's double formatting.
    #[must_use]
    pub fn render(&self, record: &KnowledgeRecord, delimiter: &str) -> String {
        record.to_string_formatted(delimiter, &self.double_format)
    }

    /// Replaces every `{name}` in `statement` with the value of variable
    /// `name`. Braces nest; inner names are expanded first.
    pub fn expand_statement(&self, statement: &str) -> MadaraResult<String> {
        let mut out = String::with_capacity(statement.len());
        let mut depth = 0usize;
        let mut open = 0usize;

        for (pos, ch) in statement.char_indices() {
            match ch {
                '{' => {
                    if depth == 0 {
                        open = pos;
                    }
                    depth += 1;
                }
                '}' => {
                    if depth == 0 {
                        return Err(KarlError::runtime(
                            "expand_statement",
                            format!("closing brace without an opening brace in '{statement}'"),
                        )
                        .into());
                    }
                    depth -= 1;
                    if depth == 0 {
                        let inner = self.expand_statement(&statement[open + 1..pos])?;
                        let value = self.get(inner.trim(), &KnowledgeReferenceSettings::NO_EXPAND)?;
                        out.push_str(&self.render(&value, ", "));
                    }
                }
                _ if depth == 0 => out.push(ch),
                _ => {}
            }
        }

        if depth != 0 {
            return Err(KarlError::runtime("expand_statement", format!("unbalanced braces in '{statement}'")).into());
        }
        Ok(out)
    }

    /// Expands `statement` and writes it to the logger at `level`.
    pub fn print(&self, statement: &str, level: LogLevel) {
        if !self.logger.enabled(level) {
            return;
        }
        match self.expand_statement(statement) {
            Ok(text) => self.logger.log(level, &text),
            Err(err) => {
                tracing::warn!(error = %err, "print statement expansion failed");
                self.logger.log(level, statement);
            }
        }
    }

    /// The print sink.
    #[must_use]
    pub const fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    /// Double formatting used for rendering.
    #[must_use]
    pub const fn double_format(&self) -> DoubleFormat {
        self.double_format
    }

    /// Replaces the double formatting.
    pub fn set_double_format(&mut self, format: DoubleFormat) {
        self.double_format = format;
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub(crate) fn reseed(&mut self) {
        self.rng = StdRng::from_entropy();
    }

    // ----- functions and compilation -----

    /// Registers an external function callable from KaRL as `name(args)`.
    pub fn define_function(&mut self, name: impl Into<String>, function: ExternalFunction) {
        self.functions.insert(name.into(), function);
    }

    /// Looks up an external function.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<ExternalFunction> {
        self.functions.get(name).cloned()
    }

    /// Builds an expression tree without pruning it.
    pub fn parse(&mut self, source: &str) -> MadaraResult<CompiledExpression> {
        parser::parse(source, self).map(|root| CompiledExpression::new(source, root))
    }

    /// Builds and prunes an expression tree.
    pub fn compile(&mut self, source: &str) -> MadaraResult<CompiledExpression> {
        let mut expression = self.parse(source)?;
        expression.prune(self)?;
        Ok(expression)
    }

    /// Compiles and evaluates `source` once.
    pub fn evaluate_str(&mut self, source: &str, settings: &KnowledgeUpdateSettings) -> MadaraResult<KnowledgeRecord> {
        let mut expression = self.compile(source)?;
        expression.evaluate(self, settings)
    }
}
