//! Named worker threads driven by knowledge variables.
//!
//! Each thread started by a [`Threader`] is steered through variables in a
//! private control knowledge base:
//!
//! | variable            | meaning                                   |
//! |---------------------|-------------------------------------------|
//! | `<name>.started`    | set to 1 once `init` has run              |
//! | `<name>.paused`     | non-zero skips `run` until cleared        |
//! | `<name>.terminated` | non-zero ends the loop                    |
//! | `<name>.finished`   | set to 1 after `cleanup`                  |
//! | `<name>.hertz`      | run frequency; read again every iteration |
//!
//! A negative frequency runs the thread once, zero runs it back to back and
//! a positive value paces `run` at that many calls per second.

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::context::{ThreadSafeContext, VariableReference};
use crate::error::{lock_err, MadaraResult, ThreadError};
use crate::knowledge_base::KnowledgeBase;
use crate::record::KnowledgeRecord;
use crate::settings::{KnowledgeReferenceSettings, KnowledgeUpdateSettings};

const PAUSE_POLL: Duration = Duration::from_millis(10);

/// Work run on a [`Threader`] thread.
pub trait BaseThread: Send + 'static {
    /// Called once on the new thread before the first `run`.
    fn init(&mut self, _data: &KnowledgeBase) {}

    /// One unit of work.
    fn run(&mut self);

    /// Called once after the loop ends.
    fn cleanup(&mut self) {}
}

/// Threader defaults.
#[derive(Debug, Clone)]
pub struct ThreaderConfig {
    /// Prepended to thread names for the OS thread name.
    pub name_prefix: String,
}

impl Default for ThreaderConfig {
    fn default() -> Self {
        Self {
            name_prefix: "madara-".to_string(),
        }
    }
}

/// Runs and controls named [`BaseThread`]s.
#[derive(Debug)]
pub struct Threader {
    data: KnowledgeBase,
    control: KnowledgeBase,
    config: ThreaderConfig,
    threads: Mutex<HashMap<String, JoinHandle<()>>>,
}

struct ControlVars {
    started: VariableReference,
    paused: VariableReference,
    terminated: VariableReference,
    finished: VariableReference,
    hertz: VariableReference,
}

impl ControlVars {
    fn new(context: &ThreadSafeContext, name: &str) -> MadaraResult<Self> {
        let mut guard = context.lock()?;
        let mut resolve = |suffix: &str| {
            let key = format!("{name}.{suffix}");
            guard
                .get_ref(&key, &KnowledgeReferenceSettings::NO_EXPAND)
                .ok_or(ThreadError::EmptyName)
        };
        Ok(Self {
            started: resolve("started")?,
            paused: resolve("paused")?,
            terminated: resolve("terminated")?,
            finished: resolve("finished")?,
            hertz: resolve("hertz")?,
        })
    }
}

/// How often `run` is called.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Pace {
    Once,
    Continuous,
    Every(Duration),
}

impl Pace {
    fn from_hertz(hertz: f64) -> Self {
        if hertz < 0.0 || hertz.is_nan() {
            Self::Once
        } else if hertz == 0.0 {
            Self::Continuous
        } else {
            Duration::try_from_secs_f64(1.0 / hertz).map_or(Self::Continuous, Self::Every)
        }
    }
}

fn read(context: &ThreadSafeContext, reference: &VariableReference) -> KnowledgeRecord {
    context
        .get_by_ref(reference, &KnowledgeReferenceSettings::NO_EXPAND)
        .unwrap_or_default()
}

fn write(context: &ThreadSafeContext, reference: &VariableReference, value: impl Into<KnowledgeRecord>) {
    let settings = KnowledgeUpdateSettings {
        always_overwrite: true,
        ..KnowledgeUpdateSettings::DEFAULT
    };
    if let Err(err) = context.set_by_ref(reference, value, &settings) {
        tracing::error!(variable = reference.name(), error = %err, "control variable write failed");
    }
}

fn worker(name: &str, mut thread: Box<dyn BaseThread>, data: &KnowledgeBase, control: &ThreadSafeContext, vars: &ControlVars) {
    thread.init(data);
    write(control, &vars.started, 1);
    tracing::debug!(thread = name, "thread started");

    let mut hertz = read(control, &vars.hertz).to_double();
    let mut pace = Pace::from_hertz(hertz);
    let mut next = Instant::now();

    while read(control, &vars.terminated).is_false() {
        let paused = read(control, &vars.paused).is_true();
        if !paused {
            thread.run();
            if pace == Pace::Once {
                break;
            }
        }

        let requested = read(control, &vars.hertz).to_double();
        if requested.to_bits() != hertz.to_bits() {
            hertz = requested;
            pace = Pace::from_hertz(hertz);
            next = Instant::now();
            tracing::debug!(thread = name, hertz, "thread frequency changed");
        }

        match pace {
            Pace::Every(period) => {
                next += period;
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                } else {
                    next = now;
                }
            }
            Pace::Once | Pace::Continuous if paused => thread::sleep(PAUSE_POLL),
            Pace::Once | Pace::Continuous => {}
        }
    }

    thread.cleanup();
    write(control, &vars.finished, 1);
    tracing::debug!(thread = name, "thread finished");
}

impl Threader {
    /// Creates a threader whose threads work on `data`.
    #[must_use]
    pub fn new(data: KnowledgeBase) -> Self {
        Self::with_config(data, ThreaderConfig::default())
    }

    /// Creates a threader with explicit settings.
    #[must_use]
    pub fn with_config(data: KnowledgeBase, config: ThreaderConfig) -> Self {
        Self {
            data,
            control: KnowledgeBase::new(),
            config,
            threads: Mutex::new(HashMap::new()),
        }
    }

    /// The knowledge base holding the control variables.
    #[must_use]
    pub const fn control(&self) -> &KnowledgeBase {
        &self.control
    }

    /// Runs `thread` once.
    pub fn run(&self, name: &str, thread: Box<dyn BaseThread>, paused: bool) -> MadaraResult<()> {
        self.run_hz(-1.0, name, thread, paused)
    }

    /// Runs `thread` at `hertz` until terminated.
    pub fn run_hz(&self, hertz: f64, name: &str, thread: Box<dyn BaseThread>, paused: bool) -> MadaraResult<()> {
        if name.is_empty() {
            return Err(ThreadError::EmptyName.into());
        }
        let mut threads = self.threads.lock().map_err(|_| lock_err("threader.threads"))?;
        if let Some(existing) = threads.get(name) {
            if !existing.is_finished() {
                return Err(ThreadError::AlreadyRunning { name: name.to_string() }.into());
            }
            if let Some(done) = threads.remove(name) {
                let _ = done.join();
            }
        }

        let control = self.control.context();
        let vars = ControlVars::new(&control, name)?;
        write(&control, &vars.started, 0);
        write(&control, &vars.finished, 0);
        write(&control, &vars.terminated, 0);
        write(&control, &vars.paused, i64::from(paused));
        write(&control, &vars.hertz, hertz);

        let data = self.data.clone();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(format!("{}{name}", self.config.name_prefix))
            .spawn(move || worker(&thread_name, thread, &data, &control, &vars))
            .map_err(|err| ThreadError::SpawnFailed {
                name: name.to_string(),
                message: err.to_string(),
            })?;
        threads.insert(name.to_string(), handle);
        Ok(())
    }

    fn set_control(&self, name: &str, suffix: &str, value: impl Into<KnowledgeRecord>) -> MadaraResult<()> {
        let settings = KnowledgeUpdateSettings {
            always_overwrite: true,
            ..KnowledgeUpdateSettings::DEFAULT
        };
        self.control.context().set(&format!("{name}.{suffix}"), value, &settings)?;
        Ok(())
    }

    fn names(&self) -> MadaraResult<Vec<String>> {
        Ok(self
            .threads
            .lock()
            .map_err(|_| lock_err("threader.threads"))?
            .keys()
            .cloned()
            .collect())
    }

    /// Pauses one thread.
    pub fn pause(&self, name: &str) -> MadaraResult<()> {
        self.set_control(name, "paused", 1)
    }

    /// Pauses every thread.
    pub fn pause_all(&self) -> MadaraResult<()> {
        self.names()?.iter().try_for_each(|name| self.pause(name))
    }

    /// Resumes one thread.
    pub fn resume(&self, name: &str) -> MadaraResult<()> {
        self.set_control(name, "paused", 0)
    }

    /// Resumes every thread.
    pub fn resume_all(&self) -> MadaraResult<()> {
        self.names()?.iter().try_for_each(|name| self.resume(name))
    }

    /// Changes a running thread's frequency.
    pub fn set_hertz(&self, name: &str, hertz: f64) -> MadaraResult<()> {
        self.set_control(name, "hertz", hertz)
    }

    /// Asks one thread to stop after its current iteration.
    pub fn terminate(&self, name: &str) -> MadaraResult<()> {
        self.set_control(name, "terminated", 1)
    }

    /// Asks every thread to stop.
    pub fn terminate_all(&self) -> MadaraResult<()> {
        self.names()?.iter().try_for_each(|name| self.terminate(name))
    }

    /// Blocks until the named thread exits.
    pub fn wait(&self, name: &str) -> MadaraResult<()> {
        let handle = self
            .threads
            .lock()
            .map_err(|_| lock_err("threader.threads"))?
            .remove(name)
            .ok_or_else(|| ThreadError::NotFound { name: name.to_string() })?;
        if handle.join().is_err() {
            tracing::error!(thread = name, "thread panicked");
        }
        Ok(())
    }

    /// Blocks until every thread exits.
    pub fn wait_all(&self) -> MadaraResult<()> {
        self.names()?.iter().try_for_each(|name| self.wait(name))
    }

    /// Returns true once the named thread has run `cleanup`.
    pub fn is_finished(&self, name: &str) -> MadaraResult<bool> {
        Ok(self.control.get(&format!("{name}.finished"))?.is_true())
    }
}

impl Drop for Threader {
    fn drop(&mut self) {
        if self.terminate_all().is_ok() {
            let _ = self.wait_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        runs: Arc<AtomicUsize>,
    }

    impl BaseThread for Counter {
        fn run(&mut self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter() -> (Box<dyn BaseThread>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (Box::new(Counter { runs: Arc::clone(&runs) }), runs)
    }

    #[test]
    fn test_pace_from_hertz() {
        assert_eq!(Pace::from_hertz(-1.0), Pace::Once);
        assert_eq!(Pace::from_hertz(0.0), Pace::Continuous);
        assert_eq!(Pace::from_hertz(4.0), Pace::Every(Duration::from_millis(250)));
    }

    #[test]
    fn test_one_shot_runs_once() {
        let threader = Threader::new(KnowledgeBase::new());
        let (thread, runs) = counter();
        threader.run("once", thread, false).unwrap();
        threader.wait("once").unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(threader.is_finished("once").unwrap());
    }

    #[test]
    fn test_empty_name_rejected() {
        let threader = Threader::new(KnowledgeBase::new());
        let (thread, _) = counter();
        let err = threader.run("", thread, false).unwrap_err();
        assert!(matches!(err, crate::error::MadaraError::Thread(ThreadError::EmptyName)));
    }

    #[test]
    fn test_duplicate_live_name_rejected() {
        let threader = Threader::new(KnowledgeBase::new());
        let (first, _) = counter();
        let (second, _) = counter();
        threader.run_hz(100.0, "dup", first, false).unwrap();
        let err = threader.run_hz(100.0, "dup", second, false).unwrap_err();
        assert!(matches!(
            err,
            crate::error::MadaraError::Thread(ThreadError::AlreadyRunning { .. })
        ));
        threader.terminate("dup").unwrap();
        threader.wait("dup").unwrap();
    }

    #[test]
    fn test_wait_unknown_thread() {
        let threader = Threader::new(KnowledgeBase::new());
        assert!(threader.wait("ghost").unwrap_err().is_thread());
    }
}
