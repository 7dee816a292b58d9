//! Knowledge record type codes and bitmasks.
//!
//! Each concrete type occupies one bit so that filters can be registered for
//! several types at once by OR-ing codes together.

use serde::{Deserialize, Serialize};

/// No value.
pub const UNINITIALIZED: u32 = 0;
/// 64-bit signed integer.
pub const INTEGER: u32 = 1;
/// UTF-8 string.
pub const STRING: u32 = 2;
/// 64-bit float.
pub const DOUBLE: u32 = 4;
/// Opaque file contents.
pub const UNKNOWN_FILE_TYPE: u32 = 8;
/// XML document.
pub const XML: u32 = 16;
/// Text file contents.
pub const TEXT_FILE: u32 = 32;
/// Array of integers.
pub const INTEGER_ARRAY: u32 = 64;
/// Array of doubles.
pub const DOUBLE_ARRAY: u32 = 128;
/// JPEG image.
pub const IMAGE_JPEG: u32 = 256;

/// Both array types.
pub const ALL_ARRAYS: u32 = INTEGER_ARRAY | DOUBLE_ARRAY;
/// Integer scalars and arrays.
pub const ALL_INTEGERS: u32 = INTEGER | INTEGER_ARRAY;
/// Double scalars and arrays.
pub const ALL_DOUBLES: u32 = DOUBLE | DOUBLE_ARRAY;
/// Everything that is not a file.
pub const ALL_PRIMITIVE_TYPES: u32 = INTEGER | STRING | DOUBLE | INTEGER_ARRAY | DOUBLE_ARRAY;
/// Every file type.
pub const ALL_FILE_TYPES: u32 = UNKNOWN_FILE_TYPE | XML | TEXT_FILE | IMAGE_JPEG;
/// Image types.
pub const ALL_IMAGES: u32 = IMAGE_JPEG;
/// Types whose payload is text.
pub const ALL_TEXT_FORMATS: u32 = XML | TEXT_FILE | STRING;
/// Every concrete type.
pub const ALL_TYPES: u32 = ALL_PRIMITIVE_TYPES | ALL_FILE_TYPES;

/// The type of a knowledge record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum RecordType {
    /// No value.
    Uninitialized = UNINITIALIZED,
    /// 64-bit signed integer.
    Integer = INTEGER,
    /// UTF-8 string.
    String = STRING,
    /// 64-bit float.
    Double = DOUBLE,
    /// Opaque file contents.
    UnknownFile = UNKNOWN_FILE_TYPE,
    /// XML document.
    Xml = XML,
    /// Text file contents.
    TextFile = TEXT_FILE,
    /// Array of integers.
    IntegerArray = INTEGER_ARRAY,
    /// Array of doubles.
    DoubleArray = DOUBLE_ARRAY,
    /// JPEG image.
    ImageJpeg = IMAGE_JPEG,
}

impl RecordType {
    /// Every concrete (non-uninitialized) type, in code order.
    pub const CONCRETE: [Self; 9] = [
        Self::Integer,
        Self::String,
        Self::Double,
        Self::UnknownFile,
        Self::Xml,
        Self::TextFile,
        Self::IntegerArray,
        Self::DoubleArray,
        Self::ImageJpeg,
    ];

    /// Numeric type code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Looks up a type by its code.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            UNINITIALIZED => Some(Self::Uninitialized),
            INTEGER => Some(Self::Integer),
            STRING => Some(Self::String),
            DOUBLE => Some(Self::Double),
            UNKNOWN_FILE_TYPE => Some(Self::UnknownFile),
            XML => Some(Self::Xml),
            TEXT_FILE => Some(Self::TextFile),
            INTEGER_ARRAY => Some(Self::IntegerArray),
            DOUBLE_ARRAY => Some(Self::DoubleArray),
            IMAGE_JPEG => Some(Self::ImageJpeg),
            _ => None,
        }
    }

    /// Returns true if `mask` includes this type.
    #[must_use]
    pub const fn in_mask(self, mask: u32) -> bool {
        let code = self.code();
        code != 0 && mask & code == code
    }

    /// Expands a bitmask into the concrete types it names.
    pub fn from_mask(mask: u32) -> impl Iterator<Item = Self> {
        Self::CONCRETE.into_iter().filter(move |t| t.in_mask(mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for t in RecordType::CONCRETE {
            assert_eq!(RecordType::from_code(t.code()), Some(t));
        }
        assert_eq!(RecordType::from_code(3), None);
    }

    #[test]
    fn test_mask_expansion() {
        let types: Vec<_> = RecordType::from_mask(ALL_INTEGERS).collect();
        assert_eq!(types, vec![RecordType::Integer, RecordType::IntegerArray]);

        assert_eq!(RecordType::from_mask(ALL_TYPES).count(), 9);
        assert!(!RecordType::Uninitialized.in_mask(ALL_TYPES));
    }
}
