//! Builtin `#name(args)` calls.
//!
//! Every call is described once in [`CALLS`]: its accepted spellings, its
//! argument count range and its help text. Arity is checked when the node
//! is pruned and again when it is evaluated, since pruning is optional.

use std::path::{Path, MAIN_SEPARATOR};
use std::sync::OnceLock;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use regex::{Captures, Regex};

use super::node::{prune_child, ComponentNode};
use crate::context::ContextState;
use crate::error::{KarlError, MadaraResult};
use crate::logger::LogLevel;
use crate::record::{DoubleStyle, KnowledgeRecord, RecordType};
use crate::settings::KnowledgeUpdateSettings;

/// Every builtin system call. See [`SystemCallKind::help`] for usage.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemCallKind {
    ClearVariable,
    Cos,
    DeleteVariable,
    Eval,
    ExpandEnv,
    ExpandStatement,
    Fragment,
    GetClock,
    GetTime,
    GetTimeSeconds,
    Isinf,
    LogLevel,
    Pow,
    Print,
    PrintSystemCalls,
    RandDouble,
    RandInt,
    ReadFile,
    SetClock,
    SetFixed,
    SetPrecision,
    SetScientific,
    Sin,
    Size,
    Sleep,
    Sqrt,
    Tan,
    ToBuffer,
    ToDouble,
    ToDoubles,
    ToHostDirs,
    ToInteger,
    ToIntegers,
    ToString,
    Type,
    WriteFile,
}

struct CallEntry {
    kind: SystemCallKind,
    names: &'static [&'static str],
    min_args: usize,
    max_args: usize,
    help: &'static str,
}

const fn call(
    kind: SystemCallKind,
    names: &'static [&'static str],
    min_args: usize,
    max_args: usize,
    help: &'static str,
) -> CallEntry {
    CallEntry {
        kind,
        names,
        min_args,
        max_args,
        help,
    }
}

/// Ordered like [`SystemCallKind`] so a kind indexes its own entry.
const CALLS: &[CallEntry] = &[
    call(SystemCallKind::ClearVariable, &["#clear_var", "#clear_variable", "#clear"], 1, 1,
        "#clear_var(name): erases the value of the named variable, keeping the variable"),
    call(SystemCallKind::Cos, &["#cos"], 1, 1, "#cos(x): cosine of x in radians"),
    call(SystemCallKind::DeleteVariable, &["#delete_variable", "#delete_var"], 1, 1,
        "#delete_variable(name): removes the named variable from the context"),
    call(SystemCallKind::Eval, &["#eval", "#evaluate"], 1, 1,
        "#eval(source): compiles and evaluates a KaRL string"),
    call(SystemCallKind::ExpandEnv, &["#expand_env", "#expand_envs"], 1, 1,
        "#expand_env(text): replaces $(NAME) with environment variable NAME"),
    call(SystemCallKind::ExpandStatement, &["#expand_statement", "#expand"], 1, 1,
        "#expand_statement(text): replaces {name} with the value of variable name"),
    call(SystemCallKind::Fragment, &["#fragment"], 3, 3,
        "#fragment(value, first, last): inclusive slice of a string, array or file"),
    call(SystemCallKind::GetClock, &["#get_clock"], 0, 1,
        "#get_clock([var]): global clock, or the clock of var"),
    call(SystemCallKind::GetTime, &["#get_time"], 0, 0, "#get_time(): wall clock in nanoseconds"),
    call(SystemCallKind::GetTimeSeconds, &["#get_time_seconds"], 0, 0, "#get_time_seconds(): wall clock in seconds"),
    call(SystemCallKind::Isinf, &["#isinf"], 1, 1, "#isinf(x): 1 if x is infinite"),
    call(SystemCallKind::LogLevel, &["#log_level"], 0, 1,
        "#log_level([level]): returns the print level, setting it first if given"),
    call(SystemCallKind::Pow, &["#pow"], 2, 2, "#pow(base, exponent): base raised to exponent"),
    call(SystemCallKind::Print, &["#print"], 1, 2, "#print(text[, level]): prints text at level (default 0)"),
    call(SystemCallKind::PrintSystemCalls, &["#print_system_calls"], 0, 1,
        "#print_system_calls([name]): prints help for one or every system call"),
    call(SystemCallKind::RandDouble, &["#rand_double"], 0, 3,
        "#rand_double([floor, ceiling, update_seed]): random double in [floor, ceiling), default [0, 1)"),
    call(SystemCallKind::RandInt, &["#rand_int"], 0, 3,
        "#rand_int([floor, ceiling, update_seed]): random integer in [floor, ceiling]"),
    call(SystemCallKind::ReadFile, &["#read_file"], 1, 2,
        "#read_file(path[, type]): loads a file as a text, xml, jpeg or binary record"),
    call(SystemCallKind::SetClock, &["#set_clock"], 1, 2,
        "#set_clock([var, ]value): raises the global clock or the clock of var"),
    call(SystemCallKind::SetFixed, &["#set_fixed"], 0, 0, "#set_fixed(): prints doubles in fixed notation"),
    call(SystemCallKind::SetPrecision, &["#set_precision"], 1, 1,
        "#set_precision(digits): digits after the decimal point, negative to reset"),
    call(SystemCallKind::SetScientific, &["#set_scientific"], 0, 0,
        "#set_scientific(): prints doubles in scientific notation"),
    call(SystemCallKind::Sin, &["#sin"], 1, 1, "#sin(x): sine of x in radians"),
    call(SystemCallKind::Size, &["#size"], 1, 1, "#size(value): elements, characters or bytes in value"),
    call(SystemCallKind::Sleep, &["#sleep"], 1, 1, "#sleep(seconds): blocks the evaluating thread"),
    call(SystemCallKind::Sqrt, &["#sqrt"], 1, 1, "#sqrt(x): square root of x"),
    call(SystemCallKind::Tan, &["#tan"], 1, 1, "#tan(x): tangent of x in radians"),
    call(SystemCallKind::ToBuffer, &["#to_buffer"], 1, 1, "#to_buffer(value): value as a binary record"),
    call(SystemCallKind::ToDouble, &["#to_double"], 1, 1, "#to_double(value): value as a double"),
    call(SystemCallKind::ToDoubles, &["#to_doubles"], 1, 1, "#to_doubles(value): value as a double array"),
    call(SystemCallKind::ToHostDirs, &["#to_host_dirs"], 1, 1,
        "#to_host_dirs(path): rewrites / and \\ to the host path separator"),
    call(SystemCallKind::ToInteger, &["#to_integer"], 1, 1, "#to_integer(value): value as an integer"),
    call(SystemCallKind::ToIntegers, &["#to_integers"], 1, 1, "#to_integers(value): value as an integer array"),
    call(SystemCallKind::ToString, &["#to_string"], 1, 2,
        "#to_string(value[, delimiter]): value as a string, arrays joined by delimiter (default \", \")"),
    call(SystemCallKind::Type, &["#type"], 1, 1, "#type(value): type code of value"),
    call(SystemCallKind::WriteFile, &["#write_file"], 2, 2,
        "#write_file(path, value): writes value to path, returning the bytes written or -1"),
];

impl SystemCallKind {
    /// Looks up a call by any accepted spelling, including the leading `#`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        CALLS.iter().find(|entry| entry.names.contains(&name)).map(|entry| entry.kind)
    }

    fn entry(self) -> &'static CallEntry {
        &CALLS[self as usize]
    }

    /// Canonical spelling.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.entry().names[0]
    }

    /// Inclusive argument count range.
    #[must_use]
    pub fn arity(self) -> (usize, usize) {
        let entry = self.entry();
        (entry.min_args, entry.max_args)
    }

    /// One-line usage text.
    #[must_use]
    pub fn help(self) -> &'static str {
        self.entry().help
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Compile,
    Runtime,
}

fn check_arity(kind: SystemCallKind, count: usize, phase: Phase) -> Result<(), KarlError> {
    let (min, max) = kind.arity();
    if (min..=max).contains(&count) {
        return Ok(());
    }
    let expected = match (min, max) {
        (0, 0) => "requires no arguments".to_string(),
        (1, 1) => "requires 1 argument".to_string(),
        (a, b) if a == b => format!("requires {a} arguments"),
        (a, b) => format!("requires {a} to {b} arguments"),
    };
    let reason = format!("{expected}, got {count}");
    Err(match phase {
        Phase::Compile => KarlError::compile(kind.name(), reason),
        Phase::Runtime => KarlError::runtime(kind.name(), reason),
    })
}

fn non_negative(value: &KnowledgeRecord) -> usize {
    usize::try_from(value.to_integer()).unwrap_or(0)
}

fn saturating_i64(value: impl TryInto<i64>) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

fn read_file(path: &str, hint: Option<RecordType>) -> std::io::Result<KnowledgeRecord> {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let kind = hint.unwrap_or(match extension.as_deref() {
        Some("txt" | "text" | "karl" | "kb") => RecordType::TextFile,
        Some("xml") => RecordType::Xml,
        Some("jpg" | "jpeg") => RecordType::ImageJpeg,
        _ => RecordType::UnknownFile,
    });
    Ok(match kind {
        RecordType::TextFile | RecordType::String => KnowledgeRecord::text_file(std::fs::read_to_string(path)?),
        RecordType::Xml => KnowledgeRecord::xml(std::fs::read_to_string(path)?),
        RecordType::ImageJpeg => KnowledgeRecord::jpeg(std::fs::read(path)?),
        _ => KnowledgeRecord::file(std::fs::read(path)?),
    })
}

static ENV_TOKEN: OnceLock<Regex> = OnceLock::new();

fn expand_env(text: &str) -> String {
    ENV_TOKEN
        .get_or_init(|| Regex::new(r"\$\(([^)]*)\)").expect("literal pattern compiles"))
        .replace_all(text, |caps: &Captures<'_>| std::env::var(&caps[1]).unwrap_or_default())
        .into_owned()
}

/// A builtin call and its argument expressions.
#[derive(Debug)]
pub struct SystemCallNode {
    kind: SystemCallKind,
    args: Vec<ComponentNode>,
}

impl SystemCallNode {
    pub(crate) fn new(name: &str, args: Vec<ComponentNode>) -> MadaraResult<Self> {
        let kind = SystemCallKind::from_name(name)
            .ok_or_else(|| KarlError::compile(name, "unknown system call; see #print_system_calls()"))?;
        Ok(Self { kind, args })
    }

    /// Which builtin this is.
    #[must_use]
    pub const fn kind(&self) -> SystemCallKind {
        self.kind
    }

    /// Argument expressions.
    #[must_use]
    pub fn args(&self) -> &[ComponentNode] {
        &self.args
    }

    pub(crate) fn prune(&mut self, state: &mut ContextState) -> MadaraResult<KnowledgeRecord> {
        check_arity(self.kind, self.args.len(), Phase::Compile)?;
        let mut unused = false;
        for arg in &mut self.args {
            prune_child(arg, &mut unused, state)?;
        }
        Ok(KnowledgeRecord::new())
    }

    fn arg(&mut self, index: usize, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<KnowledgeRecord> {
        match self.args.get_mut(index) {
            Some(arg) => arg.evaluate(state, settings),
            None => Err(KarlError::runtime(self.kind.name(), format!("missing argument {index}")).into()),
        }
    }

    fn optional(&mut self, index: usize, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<Option<KnowledgeRecord>> {
        match self.args.get_mut(index) {
            Some(arg) => arg.evaluate(state, settings).map(Some),
            None => Ok(None),
        }
    }

    fn text(&mut self, index: usize, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<String> {
        let value = self.arg(index, state, settings)?;
        Ok(state.render(&value, ", "))
    }

    fn double(&mut self, index: usize, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<f64> {
        Ok(self.arg(index, state, settings)?.to_double())
    }

    #[allow(clippy::too_many_lines)]
    pub(crate) fn evaluate(&mut self, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<KnowledgeRecord> {
        check_arity(self.kind, self.args.len(), Phase::Runtime)?;
        let reads = settings.reference();

        let result = match self.kind {
            SystemCallKind::ClearVariable => {
                let name = self.text(0, state, settings)?;
                KnowledgeRecord::from(state.clear(&name, &reads))
            }
            SystemCallKind::DeleteVariable => {
                let name = self.text(0, state, settings)?;
                KnowledgeRecord::from(state.delete_variable(&name, &reads))
            }
            SystemCallKind::Cos => KnowledgeRecord::from(self.double(0, state, settings)?.cos()),
            SystemCallKind::Sin => KnowledgeRecord::from(self.double(0, state, settings)?.sin()),
            SystemCallKind::Tan => KnowledgeRecord::from(self.double(0, state, settings)?.tan()),
            SystemCallKind::Sqrt => KnowledgeRecord::from(self.double(0, state, settings)?.sqrt()),
            SystemCallKind::Pow => {
                let base = self.double(0, state, settings)?;
                KnowledgeRecord::from(base.powf(self.double(1, state, settings)?))
            }
            SystemCallKind::Isinf => KnowledgeRecord::from(self.double(0, state, settings)?.is_infinite()),
            SystemCallKind::Eval => {
                let source = self.text(0, state, settings)?;
                let mut expression = state.compile(&source)?;
                expression.evaluate(state, settings)?
            }
            SystemCallKind::ExpandStatement => {
                let statement = self.text(0, state, settings)?;
                KnowledgeRecord::from(state.expand_statement(&statement)?)
            }
            SystemCallKind::ExpandEnv => KnowledgeRecord::from(expand_env(&self.text(0, state, settings)?)),
            SystemCallKind::Fragment => {
                let value = self.arg(0, state, settings)?;
                let first = non_negative(&self.arg(1, state, settings)?);
                let last = non_negative(&self.arg(2, state, settings)?);
                value.fragment(first, last)
            }
            SystemCallKind::GetClock => match self.optional(0, state, settings)? {
                Some(value) => KnowledgeRecord::from(saturating_i64(value.clock)),
                None => KnowledgeRecord::from(saturating_i64(state.clock())),
            },
            SystemCallKind::SetClock => self.set_clock(state, settings)?,
            SystemCallKind::GetTime => KnowledgeRecord::from(Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)),
            SystemCallKind::GetTimeSeconds => KnowledgeRecord::from(Utc::now().timestamp()),
            SystemCallKind::LogLevel => {
                if let Some(level) = self.optional(0, state, settings)? {
                    state.logger().set_level(LogLevel::from_integer(level.to_integer()));
                }
                KnowledgeRecord::from(i64::from(state.logger().level().as_u8()))
            }
            SystemCallKind::Print => {
                let text = self.text(0, state, settings)?;
                let level = self
                    .optional(1, state, settings)?
                    .map_or(LogLevel::ALWAYS, |l| LogLevel::from_integer(l.to_integer()));
                state.logger().log(level, &text);
                KnowledgeRecord::from(0)
            }
            SystemCallKind::PrintSystemCalls => {
                let text = match self.optional(0, state, settings)? {
                    Some(name) => {
                        let name = state.render(&name, ", ");
                        let name = if name.starts_with('#') { name } else { format!("#{name}") };
                        SystemCallKind::from_name(&name)
                            .map_or_else(|| format!("no system call named {name}\n"), |kind| format!("{}\n", kind.help()))
                    }
                    None => CALLS.iter().map(|entry| format!("{}\n", entry.help)).collect(),
                };
                state.logger().log(LogLevel::ALWAYS, &text);
                KnowledgeRecord::from(0)
            }
            SystemCallKind::RandDouble => {
                let floor = self.optional(0, state, settings)?.map_or(0.0, |v| v.to_double());
                let ceiling = self.optional(1, state, settings)?.map_or(1.0, |v| v.to_double());
                if self.optional(2, state, settings)?.map_or(true, |v| v.is_true()) {
                    state.reseed();
                }
                if floor < ceiling && (ceiling - floor).is_finite() {
                    KnowledgeRecord::from(state.rng().gen_range(floor..ceiling))
                } else if floor.is_finite() && ceiling.is_finite() && floor >= ceiling {
                    KnowledgeRecord::from(floor)
                } else {
                    return Err(KarlError::runtime(
                        "#rand_double",
                        format!("cannot draw from the range [{floor}, {ceiling})"),
                    )
                    .into());
                }
            }
            SystemCallKind::RandInt => {
                let floor = self.optional(0, state, settings)?.map_or(0, |v| v.to_integer());
                let ceiling = self
                    .optional(1, state, settings)?
                    .map_or(i64::from(i32::MAX), |v| v.to_integer());
                if self.optional(2, state, settings)?.map_or(true, |v| v.is_true()) {
                    state.reseed();
                }
                if floor < ceiling {
                    KnowledgeRecord::from(state.rng().gen_range(floor..=ceiling))
                } else {
                    KnowledgeRecord::from(floor)
                }
            }
            SystemCallKind::ReadFile => {
                let path = self.text(0, state, settings)?;
                let hint = self
                    .optional(1, state, settings)?
                    .and_then(|v| u32::try_from(v.to_integer()).ok())
                    .and_then(RecordType::from_code);
                read_file(&path, hint).unwrap_or_else(|err| {
                    tracing::warn!(path = %path, error = %err, "#read_file failed");
                    KnowledgeRecord::new()
                })
            }
            SystemCallKind::WriteFile => {
                let path = self.text(0, state, settings)?;
                let bytes = self.arg(1, state, settings)?.to_buffer();
                match std::fs::write(&path, &bytes) {
                    Ok(()) => KnowledgeRecord::from(saturating_i64(bytes.len())),
                    Err(err) => {
                        tracing::warn!(path = %path, error = %err, "#write_file failed");
                        KnowledgeRecord::from(-1)
                    }
                }
            }
            SystemCallKind::SetFixed | SystemCallKind::SetScientific => {
                let mut format = state.double_format();
                format.style = if self.kind == SystemCallKind::SetFixed {
                    DoubleStyle::Fixed
                } else {
                    DoubleStyle::Scientific
                };
                state.set_double_format(format);
                KnowledgeRecord::from(0)
            }
            SystemCallKind::SetPrecision => {
                let digits = self.arg(0, state, settings)?.to_integer();
                let mut format = state.double_format();
                format.precision = usize::try_from(digits).ok();
                state.set_double_format(format);
                KnowledgeRecord::from(digits)
            }
            SystemCallKind::Size => KnowledgeRecord::from(saturating_i64(self.arg(0, state, settings)?.size())),
            SystemCallKind::Sleep => {
                let seconds = self.double(0, state, settings)?;
                match Duration::try_from_secs_f64(seconds) {
                    Ok(duration) if !duration.is_zero() => {
                        std::thread::sleep(duration);
                        KnowledgeRecord::from(seconds)
                    }
                    _ => KnowledgeRecord::from(0.0),
                }
            }
            SystemCallKind::ToBuffer => KnowledgeRecord::file(self.arg(0, state, settings)?.to_buffer()),
            SystemCallKind::ToDouble => KnowledgeRecord::from(self.double(0, state, settings)?),
            SystemCallKind::ToDoubles => KnowledgeRecord::from(self.arg(0, state, settings)?.to_doubles()),
            SystemCallKind::ToInteger => KnowledgeRecord::from(self.arg(0, state, settings)?.to_integer()),
            SystemCallKind::ToIntegers => KnowledgeRecord::from(self.arg(0, state, settings)?.to_integers()),
            SystemCallKind::ToString => {
                let value = self.arg(0, state, settings)?;
                let delimiter = match self.optional(1, state, settings)? {
                    Some(d) => d.to_string_with(""),
                    None => ", ".to_string(),
                };
                KnowledgeRecord::from(state.render(&value, &delimiter))
            }
            SystemCallKind::ToHostDirs => {
                let path = self.text(0, state, settings)?;
                KnowledgeRecord::from(path.replace(['/', '\\'], &MAIN_SEPARATOR.to_string()))
            }
            SystemCallKind::Type => KnowledgeRecord::from(self.arg(0, state, settings)?.type_code()),
        };
        Ok(result)
    }

    fn set_clock(&mut self, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<KnowledgeRecord> {
        let clock_arg = self.args.len() - 1;
        let clock = u64::try_from(self.arg(clock_arg, state, settings)?.to_integer()).unwrap_or(0);
        if clock_arg == 0 {
            return Ok(KnowledgeRecord::from(saturating_i64(state.set_clock(clock))));
        }
        let updated = match self.args.first_mut() {
            Some(ComponentNode::Variable(variable)) => {
                let reference = variable.resolve(state, settings)?;
                state.set_variable_clock_by_ref(&reference, clock)
            }
            _ => {
                let name = self.text(0, state, settings)?;
                state.set_variable_clock(&name, clock, &settings.reference())
            }
        };
        Ok(KnowledgeRecord::from(saturating_i64(updated)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order_matches_kinds() {
        for (index, entry) in CALLS.iter().enumerate() {
            assert_eq!(entry.kind as usize, index, "{}", entry.names[0]);
            assert!(entry.min_args <= entry.max_args);
            assert!(entry.help.starts_with(entry.names[0]));
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!(SystemCallKind::from_name("#delete_var"), Some(SystemCallKind::DeleteVariable));
        assert_eq!(SystemCallKind::from_name("#evaluate"), Some(SystemCallKind::Eval));
        assert_eq!(SystemCallKind::from_name("#expand"), Some(SystemCallKind::ExpandStatement));
        assert_eq!(SystemCallKind::from_name("#nope"), None);
    }

    #[test]
    fn test_arity_messages() {
        let err = check_arity(SystemCallKind::DeleteVariable, 0, Phase::Compile).unwrap_err();
        assert!(err.to_string().contains("KARL COMPILE ERROR"));
        assert!(err.to_string().contains("requires 1 argument"));

        let err = check_arity(SystemCallKind::RandDouble, 4, Phase::Runtime).unwrap_err();
        assert!(err.to_string().contains("KARL RUNTIME ERROR"));
        assert!(err.to_string().contains("requires 0 to 3 arguments"));

        let err = check_arity(SystemCallKind::GetTime, 1, Phase::Compile).unwrap_err();
        assert!(err.to_string().contains("requires no arguments"));

        assert!(check_arity(SystemCallKind::ToString, 2, Phase::Compile).is_ok());
    }

    #[test]
    fn test_expand_env() {
        std::env::set_var("MADARA_SYSCALL_TEST_HOME", "/opt/agent");
        assert_eq!(
            expand_env("$(MADARA_SYSCALL_TEST_HOME)/kb and $(MADARA_SYSCALL_TEST_MISSING)!"),
            "/opt/agent/kb and !"
        );
    }
}
