//! Knowledge records.
//!
//! A [`KnowledgeRecord`] is a tagged value plus the arbitration metadata the
//! context uses to settle conflicting writes: `quality`, `write_quality`
//! and a Lamport `clock`. A record holding [`RecordValue::Uncreated`] is the
//! "no value" sentinel.
//!
//! Strings, arrays and file blobs are reference counted. Cloning a record is
//! cheap and index mutation copies the payload only when it is shared.

mod ops;
pub mod types;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::KarlError;

pub use types::RecordType;

/// Name to record mapping used for batches and snapshots.
pub type KnowledgeMap = BTreeMap<String, KnowledgeRecord>;

/// Record payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RecordValue {
    /// No value.
    #[default]
    Uncreated,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(Arc<str>),
    /// XML document.
    Xml(Arc<str>),
    /// Text file contents.
    TextFile(Arc<str>),
    /// Array of integers.
    IntegerArray(Arc<Vec<i64>>),
    /// Array of doubles.
    DoubleArray(Arc<Vec<f64>>),
    /// JPEG image bytes.
    ImageJpeg(Arc<Vec<u8>>),
    /// Opaque file bytes.
    UnknownFile(Arc<Vec<u8>>),
}

impl RecordValue {
    /// The type of this payload.
    #[must_use]
    pub const fn record_type(&self) -> RecordType {
        match self {
            Self::Uncreated => RecordType::Uninitialized,
            Self::Integer(_) => RecordType::Integer,
            Self::Double(_) => RecordType::Double,
            Self::String(_) => RecordType::String,
            Self::Xml(_) => RecordType::Xml,
            Self::TextFile(_) => RecordType::TextFile,
            Self::IntegerArray(_) => RecordType::IntegerArray,
            Self::DoubleArray(_) => RecordType::DoubleArray,
            Self::ImageJpeg(_) => RecordType::ImageJpeg,
            Self::UnknownFile(_) => RecordType::UnknownFile,
        }
    }
}

/// How doubles are rendered as text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoubleStyle {
    /// Shortest representation that round-trips.
    #[default]
    General,
    /// Fixed-point notation.
    Fixed,
    /// Scientific notation.
    Scientific,
}

/// Double formatting options shared by `#to_string`, `#print` and expansion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoubleFormat {
    /// Digits after the decimal point. `None` keeps the natural precision.
    pub precision: Option<usize>,
    /// Notation.
    pub style: DoubleStyle,
}

impl DoubleFormat {
    /// Renders `value` according to this format.
    #[must_use]
    pub fn render(&self, value: f64) -> String {
        match (self.style, self.precision) {
            (DoubleStyle::General, None) => format!("{value}"),
            (DoubleStyle::General | DoubleStyle::Fixed, Some(p)) => format!("{value:.p$}"),
            (DoubleStyle::Fixed, None) => format!("{value:.6}"),
            (DoubleStyle::Scientific, p) => format!("{value:.*e}", p.unwrap_or(6)),
        }
    }
}

/// A typed value with quality and clock metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    value: RecordValue,
    /// Priority of the last accepted write.
    #[serde(default)]
    pub quality: u32,
    /// Priority this writer applies on its next write.
    #[serde(default)]
    pub write_quality: u32,
    /// Lamport clock at the last accepted write.
    #[serde(default)]
    pub clock: u64,
}

impl KnowledgeRecord {
    /// Creates an uncreated record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record from a payload.
    #[must_use]
    pub fn from_value(value: RecordValue) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    /// Creates an XML record.
    #[must_use]
    pub fn xml(text: impl AsRef<str>) -> Self {
        Self::from_value(RecordValue::Xml(Arc::from(text.as_ref())))
    }

    /// Creates a text file record.
    #[must_use]
    pub fn text_file(text: impl AsRef<str>) -> Self {
        Self::from_value(RecordValue::TextFile(Arc::from(text.as_ref())))
    }

    /// Creates a JPEG record.
    #[must_use]
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self::from_value(RecordValue::ImageJpeg(Arc::new(bytes)))
    }

    /// Creates an opaque file record.
    #[must_use]
    pub fn file(bytes: Vec<u8>) -> Self {
        Self::from_value(RecordValue::UnknownFile(Arc::new(bytes)))
    }

    /// The payload.
    #[must_use]
    pub const fn value(&self) -> &RecordValue {
        &self.value
    }

    /// Replaces the payload, keeping quality and clock.
    pub fn set_value(&mut self, value: RecordValue) {
        self.value = value;
    }

    /// Copies the payload of `other`, keeping this record's metadata.
    pub fn set_value_from(&mut self, other: &Self) {
        self.value = other.value.clone();
    }

    /// Resets the payload to uncreated.
    pub fn clear_value(&mut self) {
        self.value = RecordValue::Uncreated;
    }

    /// The record type.
    #[must_use]
    pub const fn record_type(&self) -> RecordType {
        self.value.record_type()
    }

    /// The record type code.
    #[must_use]
    pub const fn type_code(&self) -> u32 {
        self.record_type().code()
    }

    /// Returns true if the record holds a value.
    #[must_use]
    pub const fn exists(&self) -> bool {
        !matches!(self.value, RecordValue::Uncreated)
    }

    /// Returns true if the record is the uncreated sentinel.
    #[must_use]
    pub const fn is_uncreated(&self) -> bool {
        matches!(self.value, RecordValue::Uncreated)
    }

    /// Integer scalar or integer array.
    #[must_use]
    pub const fn is_integer_type(&self) -> bool {
        matches!(self.value, RecordValue::Integer(_) | RecordValue::IntegerArray(_))
    }

    /// Double scalar or double array.
    #[must_use]
    pub const fn is_double_type(&self) -> bool {
        matches!(self.value, RecordValue::Double(_) | RecordValue::DoubleArray(_))
    }

    /// String, XML or text file.
    #[must_use]
    pub const fn is_string_type(&self) -> bool {
        matches!(
            self.value,
            RecordValue::String(_) | RecordValue::Xml(_) | RecordValue::TextFile(_)
        )
    }

    /// Integer or double array.
    #[must_use]
    pub const fn is_array_type(&self) -> bool {
        matches!(self.value, RecordValue::IntegerArray(_) | RecordValue::DoubleArray(_))
    }

    /// Any file type.
    #[must_use]
    pub const fn is_file_type(&self) -> bool {
        matches!(
            self.value,
            RecordValue::Xml(_)
                | RecordValue::TextFile(_)
                | RecordValue::ImageJpeg(_)
                | RecordValue::UnknownFile(_)
        )
    }

    /// JPEG or opaque file.
    #[must_use]
    pub const fn is_binary_file_type(&self) -> bool {
        matches!(self.value, RecordValue::ImageJpeg(_) | RecordValue::UnknownFile(_))
    }

    fn text(&self) -> Option<&str> {
        match &self.value {
            RecordValue::String(s) | RecordValue::Xml(s) | RecordValue::TextFile(s) => Some(s),
            _ => None,
        }
    }

    fn bytes(&self) -> Option<&[u8]> {
        match &self.value {
            RecordValue::ImageJpeg(b) | RecordValue::UnknownFile(b) => Some(b),
            _ => None,
        }
    }

    /// Converts to an integer.
    ///
    /// Strings are parsed, arrays yield their first element and anything
    /// without a numeric reading yields 0.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_integer(&self) -> i64 {
        match &self.value {
            RecordValue::Integer(i) => *i,
            RecordValue::Double(d) => *d as i64,
            RecordValue::String(s) | RecordValue::Xml(s) | RecordValue::TextFile(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .or_else(|_| s.parse::<f64>().map(|d| d as i64))
                    .unwrap_or(0)
            }
            RecordValue::IntegerArray(a) => a.first().copied().unwrap_or(0),
            RecordValue::DoubleArray(a) => a.first().map_or(0, |d| *d as i64),
            RecordValue::Uncreated | RecordValue::ImageJpeg(_) | RecordValue::UnknownFile(_) => 0,
        }
    }

    /// Converts to a double using the same rules as [`Self::to_integer`].
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_double(&self) -> f64 {
        match &self.value {
            RecordValue::Integer(i) => *i as f64,
            RecordValue::Double(d) => *d,
            RecordValue::String(s) | RecordValue::Xml(s) | RecordValue::TextFile(s) => {
                s.trim().parse::<f64>().unwrap_or(0.0)
            }
            RecordValue::IntegerArray(a) => a.first().map_or(0.0, |i| *i as f64),
            RecordValue::DoubleArray(a) => a.first().copied().unwrap_or(0.0),
            RecordValue::Uncreated | RecordValue::ImageJpeg(_) | RecordValue::UnknownFile(_) => 0.0,
        }
    }

    /// Converts to a vector of integers.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_integers(&self) -> Vec<i64> {
        match &self.value {
            RecordValue::Uncreated | RecordValue::ImageJpeg(_) | RecordValue::UnknownFile(_) => Vec::new(),
            RecordValue::IntegerArray(a) => a.as_ref().clone(),
            RecordValue::DoubleArray(a) => a.iter().map(|d| *d as i64).collect(),
            _ => vec![self.to_integer()],
        }
    }

    /// Converts to a vector of doubles.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_doubles(&self) -> Vec<f64> {
        match &self.value {
            RecordValue::Uncreated | RecordValue::ImageJpeg(_) | RecordValue::UnknownFile(_) => Vec::new(),
            RecordValue::IntegerArray(a) => a.iter().map(|i| *i as f64).collect(),
            RecordValue::DoubleArray(a) => a.as_ref().clone(),
            _ => vec![self.to_double()],
        }
    }

    /// Converts to raw bytes. Text and blobs copy their contents, other
    /// values copy their string rendering.
    #[must_use]
    pub fn to_buffer(&self) -> Vec<u8> {
        if let Some(bytes) = self.bytes() {
            return bytes.to_vec();
        }
        if let Some(text) = self.text() {
            return text.as_bytes().to_vec();
        }
        self.to_string_with(", ").into_bytes()
    }

    /// Renders the value, joining array elements with `delimiter`.
    #[must_use]
    pub fn to_string_with(&self, delimiter: &str) -> String {
        self.to_string_formatted(delimiter, &DoubleFormat::default())
    }

    /// Renders the value with explicit double formatting.
    #[must_use]
    pub fn to_string_formatted(&self, delimiter: &str, format: &DoubleFormat) -> String {
        match &self.value {
            RecordValue::Uncreated => String::new(),
            RecordValue::Integer(i) => i.to_string(),
            RecordValue::Double(d) => format.render(*d),
            RecordValue::String(s) | RecordValue::Xml(s) | RecordValue::TextFile(s) => s.to_string(),
            RecordValue::IntegerArray(a) => a
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(delimiter),
            RecordValue::DoubleArray(a) => a
                .iter()
                .map(|d| format.render(*d))
                .collect::<Vec<_>>()
                .join(delimiter),
            RecordValue::ImageJpeg(b) | RecordValue::UnknownFile(b) => format!("binary:size={}", b.len()),
        }
    }

    /// Number of elements, characters or bytes. Scalars have size 1.
    #[must_use]
    pub fn size(&self) -> usize {
        match &self.value {
            RecordValue::Uncreated => 0,
            RecordValue::Integer(_) | RecordValue::Double(_) => 1,
            RecordValue::String(s) | RecordValue::Xml(s) | RecordValue::TextFile(s) => s.len(),
            RecordValue::IntegerArray(a) => a.len(),
            RecordValue::DoubleArray(a) => a.len(),
            RecordValue::ImageJpeg(b) | RecordValue::UnknownFile(b) => b.len(),
        }
    }

    /// KaRL truthiness.
    #[must_use]
    pub fn is_true(&self) -> bool {
        match &self.value {
            RecordValue::Uncreated => false,
            RecordValue::Integer(i) => *i != 0,
            RecordValue::Double(d) => *d != 0.0,
            _ => self.size() > 0,
        }
    }

    /// Negation of [`Self::is_true`].
    #[must_use]
    pub fn is_false(&self) -> bool {
        !self.is_true()
    }

    /// Returns true if both payloads have the same type and contents.
    #[must_use]
    pub fn same_value(&self, other: &Self) -> bool {
        self.value == other.value
    }

    /// Reads one array element. Non-arrays and out-of-range indices yield an
    /// uncreated record.
    #[must_use]
    pub fn retrieve_index(&self, index: usize) -> Self {
        match &self.value {
            RecordValue::IntegerArray(a) => a.get(index).map_or_else(Self::new, |i| Self::from(*i)),
            RecordValue::DoubleArray(a) => a.get(index).map_or_else(Self::new, |d| Self::from(*d)),
            _ => Self::new(),
        }
    }

    fn promote_to_doubles(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let doubles = match &self.value {
            RecordValue::DoubleArray(_) => return,
            RecordValue::IntegerArray(a) => a.iter().map(|i| *i as f64).collect(),
            _ => Vec::new(),
        };
        self.value = RecordValue::DoubleArray(Arc::new(doubles));
    }

    fn ensure_array(&mut self) {
        if !self.is_array_type() {
            self.value = RecordValue::IntegerArray(Arc::new(Vec::new()));
        }
    }

    /// Writes one array element, growing the array with zeros as needed.
    ///
    /// A non-array becomes an integer array; a double value promotes the
    /// array to doubles. Indices at or beyond [`MAX_ARRAY_SIZE`], or a
    /// growth the allocator refuses, leave the record untouched.
    pub fn set_index(&mut self, index: usize, value: &Self) -> Result<(), KarlError> {
        check_index("set_index", index)?;
        let previous = self.value.clone();
        if value.is_double_type() {
            self.promote_to_doubles();
        } else {
            self.ensure_array();
        }
        let written = match &mut self.value {
            RecordValue::DoubleArray(a) => {
                let a = Arc::make_mut(a);
                grow(a, index, 0.0).map(|()| a[index] = value.to_double())
            }
            RecordValue::IntegerArray(a) => {
                let a = Arc::make_mut(a);
                grow(a, index, 0).map(|()| a[index] = value.to_integer())
            }
            _ => Ok(()),
        };
        if written.is_err() {
            self.value = previous;
        }
        written
    }

    #[allow(clippy::cast_precision_loss)]
    fn step_index(&mut self, index: usize, delta: i64) -> Result<Self, KarlError> {
        check_index("step_index", index)?;
        let previous = self.value.clone();
        self.ensure_array();
        let stepped = match &mut self.value {
            RecordValue::DoubleArray(a) => {
                let a = Arc::make_mut(a);
                grow(a, index, 0.0).map(|()| a[index] += delta as f64)
            }
            RecordValue::IntegerArray(a) => {
                let a = Arc::make_mut(a);
                grow(a, index, 0).map(|()| a[index] = a[index].wrapping_add(delta))
            }
            _ => Ok(()),
        };
        if let Err(err) = stepped {
            self.value = previous;
            return Err(err);
        }
        Ok(self.retrieve_index(index))
    }

    /// Increments one array element and returns its new value.
    pub fn inc_index(&mut self, index: usize) -> Result<Self, KarlError> {
        self.step_index(index, 1)
    }

    /// Decrements one array element and returns its new value.
    pub fn dec_index(&mut self, index: usize) -> Result<Self, KarlError> {
        self.step_index(index, -1)
    }

    fn step(&mut self, delta: i64) {
        self.value = match &self.value {
            #[allow(clippy::cast_precision_loss)]
            RecordValue::Double(d) => RecordValue::Double(d + delta as f64),
            _ => RecordValue::Integer(self.to_integer().wrapping_add(delta)),
        };
    }

    /// Adds one. Doubles stay doubles, everything else becomes an integer.
    pub fn inc(&mut self) {
        self.step(1);
    }

    /// Subtracts one.
    pub fn dec(&mut self) {
        self.step(-1);
    }

    /// Returns the inclusive `[first, last]` slice of a string, array or
    /// blob. Scalars are returned unchanged.
    #[must_use]
    pub fn fragment(&self, first: usize, last: usize) -> Self {
        fn range(len: usize, first: usize, last: usize) -> std::ops::Range<usize> {
            let end = last.saturating_add(1).min(len);
            first.min(end)..end
        }
        fn slice_text(s: &str, first: usize, last: usize) -> Arc<str> {
            let chars: Vec<char> = s.chars().collect();
            Arc::from(chars[range(chars.len(), first, last)].iter().collect::<String>())
        }
        let value = match &self.value {
            RecordValue::String(s) => RecordValue::String(slice_text(s, first, last)),
            RecordValue::Xml(s) => RecordValue::Xml(slice_text(s, first, last)),
            RecordValue::TextFile(s) => RecordValue::TextFile(slice_text(s, first, last)),
            RecordValue::IntegerArray(a) => RecordValue::IntegerArray(Arc::new(a[range(a.len(), first, last)].to_vec())),
            RecordValue::DoubleArray(a) => RecordValue::DoubleArray(Arc::new(a[range(a.len(), first, last)].to_vec())),
            RecordValue::ImageJpeg(b) | RecordValue::UnknownFile(b) => {
                RecordValue::UnknownFile(Arc::new(b[range(b.len(), first, last)].to_vec()))
            }
            other => other.clone(),
        };
        Self::from_value(value)
    }
}

impl fmt::Display for KnowledgeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(", "))
    }
}

impl From<RecordValue> for KnowledgeRecord {
    fn from(value: RecordValue) -> Self {
        Self::from_value(value)
    }
}

impl From<i64> for KnowledgeRecord {
    fn from(v: i64) -> Self {
        Self::from_value(RecordValue::Integer(v))
    }
}

impl From<i32> for KnowledgeRecord {
    fn from(v: i32) -> Self {
        Self::from(i64::from(v))
    }
}

impl From<u32> for KnowledgeRecord {
    fn from(v: u32) -> Self {
        Self::from(i64::from(v))
    }
}

impl From<bool> for KnowledgeRecord {
    fn from(v: bool) -> Self {
        Self::from(i64::from(v))
    }
}

impl From<f64> for KnowledgeRecord {
    fn from(v: f64) -> Self {
        Self::from_value(RecordValue::Double(v))
    }
}

impl From<&str> for KnowledgeRecord {
    fn from(v: &str) -> Self {
        Self::from_value(RecordValue::String(Arc::from(v)))
    }
}

impl From<String> for KnowledgeRecord {
    fn from(v: String) -> Self {
        Self::from_value(RecordValue::String(Arc::from(v)))
    }
}

impl From<Vec<i64>> for KnowledgeRecord {
    fn from(v: Vec<i64>) -> Self {
        Self::from_value(RecordValue::IntegerArray(Arc::new(v)))
    }
}

impl From<&[i64]> for KnowledgeRecord {
    fn from(v: &[i64]) -> Self {
        Self::from(v.to_vec())
    }
}

impl From<Vec<f64>> for KnowledgeRecord {
    fn from(v: Vec<f64>) -> Self {
        Self::from_value(RecordValue::DoubleArray(Arc::new(v)))
    }
}

impl From<&[f64]> for KnowledgeRecord {
    fn from(v: &[f64]) -> Self {
        Self::from(v.to_vec())
    }
}

impl From<Vec<u8>> for KnowledgeRecord {
    fn from(v: Vec<u8>) -> Self {
        Self::file(v)
    }
}

/// Largest array length a write may grow an array to.
pub const MAX_ARRAY_SIZE: usize = 1 << 24;

fn check_index(operation: &str, index: usize) -> Result<(), KarlError> {
    if index >= MAX_ARRAY_SIZE {
        return Err(KarlError::runtime(
            operation,
            format!("index {index} exceeds the array limit of {MAX_ARRAY_SIZE}"),
        ));
    }
    Ok(())
}

fn grow<T: Clone>(array: &mut Vec<T>, index: usize, fill: T) -> Result<(), KarlError> {
    if array.len() <= index {
        array
            .try_reserve(index + 1 - array.len())
            .map_err(|e| KarlError::runtime("grow", format!("cannot grow array to {}: {e}", index + 1)))?;
        array.resize(index + 1, fill);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_uncreated() {
        let record = KnowledgeRecord::new();
        assert!(record.is_uncreated());
        assert_eq!(record.record_type(), RecordType::Uninitialized);
        assert_eq!(record.to_string_with(", "), "");
        assert!(record.is_false());
        assert_eq!(record.size(), 0);
    }

    #[test]
    fn test_string_conversions() {
        let record = KnowledgeRecord::from(" 42 ");
        assert_eq!(record.to_integer(), 42);
        assert_eq!(record.to_double(), 42.0);

        let record = KnowledgeRecord::from("2.75");
        assert_eq!(record.to_integer(), 2);
        assert_eq!(record.to_double(), 2.75);

        assert_eq!(KnowledgeRecord::from("abc").to_integer(), 0);
    }

    #[test]
    fn test_array_conversions() {
        let record = KnowledgeRecord::from(vec![3_i64, 4, 5]);
        assert_eq!(record.to_integer(), 3);
        assert_eq!(record.to_doubles(), vec![3.0, 4.0, 5.0]);
        assert_eq!(record.to_string_with(";"), "3;4;5");
        assert_eq!(record.size(), 3);

        let empty = KnowledgeRecord::from(Vec::<f64>::new());
        assert_eq!(empty.to_double(), 0.0);
        assert!(empty.is_false());
    }

    #[test]
    fn test_binary_rendering() {
        let record = KnowledgeRecord::jpeg(vec![0xff, 0xd8, 0xff]);
        assert_eq!(record.to_string_with(", "), "binary:size=3");
        assert!(record.is_binary_file_type());
        assert_eq!(record.to_buffer(), vec![0xff, 0xd8, 0xff]);
    }

    #[test]
    fn test_double_format() {
        let fixed = DoubleFormat {
            precision: Some(2),
            style: DoubleStyle::Fixed,
        };
        assert_eq!(fixed.render(3.14159), "3.14");

        let sci = DoubleFormat {
            precision: Some(1),
            style: DoubleStyle::Scientific,
        };
        assert_eq!(sci.render(1500.0), "1.5e3");
        assert_eq!(DoubleFormat::default().render(2.5), "2.5");
    }

    #[test]
    fn test_set_index_grows_and_converts() {
        let mut record = KnowledgeRecord::from(7);
        record.set_index(2, &KnowledgeRecord::from(9)).unwrap();
        assert_eq!(record.to_integers(), vec![0, 0, 9]);

        record.set_index(0, &KnowledgeRecord::from(1.5)).unwrap();
        assert_eq!(record.record_type(), RecordType::DoubleArray);
        assert_eq!(record.to_doubles(), vec![1.5, 0.0, 9.0]);
    }

    #[test]
    fn test_set_index_copies_on_write() {
        let original = KnowledgeRecord::from(vec![1_i64, 2, 3]);
        let mut copy = original.clone();
        copy.set_index(1, &KnowledgeRecord::from(20)).unwrap();

        assert_eq!(original.to_integers(), vec![1, 2, 3]);
        assert_eq!(copy.to_integers(), vec![1, 20, 3]);
    }

    #[test]
    fn test_retrieve_index_out_of_range() {
        let record = KnowledgeRecord::from(vec![1.0, 2.0]);
        assert_eq!(record.retrieve_index(1).to_double(), 2.0);
        assert!(record.retrieve_index(5).is_uncreated());
        assert!(KnowledgeRecord::from(5).retrieve_index(0).is_uncreated());
    }

    #[test]
    fn test_inc_dec_index() {
        let mut record = KnowledgeRecord::new();
        assert_eq!(record.inc_index(3).unwrap().to_integer(), 1);
        assert_eq!(record.dec_index(3).unwrap().to_integer(), 0);
        assert_eq!(record.size(), 4);
    }

    #[test]
    fn test_index_beyond_limit_leaves_record_unchanged() {
        let mut record = KnowledgeRecord::from(5);
        let err = record.set_index(usize::MAX, &KnowledgeRecord::from(1.5)).unwrap_err();
        assert!(err.to_string().contains("array limit"));
        assert_eq!(record.record_type(), RecordType::Integer);
        assert_eq!(record.to_integer(), 5);

        let mut array = KnowledgeRecord::from(vec![1_i64, 2]);
        assert!(array.inc_index(MAX_ARRAY_SIZE).is_err());
        assert_eq!(array.to_integers(), vec![1, 2]);
    }

    #[test]
    fn test_inc_dec() {
        let mut record = KnowledgeRecord::new();
        record.inc();
        record.inc();
        assert_eq!(record.to_integer(), 2);

        let mut record = KnowledgeRecord::from(1.5);
        record.dec();
        assert_eq!(record.to_double(), 0.5);
    }

    #[test]
    fn test_fragment() {
        let record = KnowledgeRecord::from("hello world");
        assert_eq!(record.fragment(0, 4).to_string_with(""), "hello");
        assert_eq!(record.fragment(6, 100).to_string_with(""), "world");

        let record = KnowledgeRecord::from(vec![1_i64, 2, 3, 4]);
        assert_eq!(record.fragment(1, 2).to_integers(), vec![2, 3]);
        assert_eq!(record.fragment(9, 12).size(), 0);
    }

    #[test]
    fn test_truthiness() {
        assert!(KnowledgeRecord::from(-1).is_true());
        assert!(KnowledgeRecord::from(0).is_false());
        assert!(KnowledgeRecord::from(0.1).is_true());
        assert!(KnowledgeRecord::from("x").is_true());
        assert!(KnowledgeRecord::from("").is_false());
    }

    #[test]
    fn test_serde_shape() {
        let record = KnowledgeRecord::from(vec![1_i64, 2]);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"integer_array\""));

        let back: KnowledgeRecord = serde_json::from_str(&json).unwrap();
        assert!(back.same_value(&record));
    }
}
