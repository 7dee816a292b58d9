//! KaRL arithmetic and comparison over knowledge records.

use std::cmp::Ordering;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};
use std::sync::Arc;

use super::{KnowledgeRecord, RecordValue};

#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int(i64),
    Dbl(f64),
}

impl Numeric {
    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Dbl(d) => d,
        }
    }

    fn compare(self, other: Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

type IntOp = fn(i64, i64) -> Option<i64>;
type DblOp = fn(f64, f64) -> f64;

fn apply(lhs: Numeric, rhs: Numeric, int_op: IntOp, dbl_op: DblOp) -> Numeric {
    match (lhs, rhs) {
        (Numeric::Int(a), Numeric::Int(b)) => {
            int_op(a, b).map_or_else(|| Numeric::Dbl(dbl_op(lhs.as_f64(), rhs.as_f64())), Numeric::Int)
        }
        _ => Numeric::Dbl(dbl_op(lhs.as_f64(), rhs.as_f64())),
    }
}

fn elements(record: &KnowledgeRecord) -> Option<Vec<Numeric>> {
    match record.value() {
        RecordValue::IntegerArray(a) => Some(a.iter().copied().map(Numeric::Int).collect()),
        RecordValue::DoubleArray(a) => Some(a.iter().copied().map(Numeric::Dbl).collect()),
        _ => None,
    }
}

fn scalar(record: &KnowledgeRecord) -> Numeric {
    match record.value() {
        RecordValue::Integer(i) => Numeric::Int(*i),
        RecordValue::Double(d) => Numeric::Dbl(*d),
        RecordValue::String(s) | RecordValue::Xml(s) | RecordValue::TextFile(s) => {
            s.trim().parse::<i64>().map_or_else(|_| Numeric::Dbl(record.to_double()), Numeric::Int)
        }
        RecordValue::IntegerArray(a) => Numeric::Int(a.first().copied().unwrap_or(0)),
        RecordValue::DoubleArray(a) => Numeric::Dbl(a.first().copied().unwrap_or(0.0)),
        RecordValue::Uncreated | RecordValue::ImageJpeg(_) | RecordValue::UnknownFile(_) => Numeric::Int(0),
    }
}

fn from_numeric(n: Numeric) -> KnowledgeRecord {
    match n {
        Numeric::Int(i) => KnowledgeRecord::from(i),
        Numeric::Dbl(d) => KnowledgeRecord::from(d),
    }
}

fn from_elements(values: Vec<Numeric>) -> KnowledgeRecord {
    if values.iter().all(|v| matches!(v, Numeric::Int(_))) {
        let ints = values
            .into_iter()
            .map(|v| match v {
                Numeric::Int(i) => i,
                Numeric::Dbl(_) => 0,
            })
            .collect();
        KnowledgeRecord::from_value(RecordValue::IntegerArray(Arc::new(ints)))
    } else {
        let doubles = values.into_iter().map(Numeric::as_f64).collect();
        KnowledgeRecord::from_value(RecordValue::DoubleArray(Arc::new(doubles)))
    }
}

fn arithmetic(lhs: &KnowledgeRecord, rhs: &KnowledgeRecord, int_op: IntOp, dbl_op: DblOp) -> KnowledgeRecord {
    match (elements(lhs), elements(rhs)) {
        (None, None) => from_numeric(apply(scalar(lhs), scalar(rhs), int_op, dbl_op)),
        (Some(a), Some(b)) => from_elements(
            a.into_iter()
                .zip(b)
                .map(|(x, y)| apply(x, y, int_op, dbl_op))
                .collect(),
        ),
        (Some(a), None) => {
            let y = scalar(rhs);
            from_elements(a.into_iter().map(|x| apply(x, y, int_op, dbl_op)).collect())
        }
        (None, Some(b)) => {
            let x = scalar(lhs);
            from_elements(b.into_iter().map(|y| apply(x, y, int_op, dbl_op)).collect())
        }
    }
}

impl KnowledgeRecord {
    /// KaRL ordering: text compares lexicographically against text, all
    /// other pairs compare numerically.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.text(), other.text()) {
            return Some(a.cmp(b));
        }
        scalar(self).compare(scalar(other))
    }
}

impl PartialEq for KnowledgeRecord {
    fn eq(&self, other: &Self) -> bool {
        match (self.value(), other.value()) {
            (RecordValue::Uncreated, RecordValue::Uncreated) => true,
            (RecordValue::ImageJpeg(a) | RecordValue::UnknownFile(a), RecordValue::ImageJpeg(b) | RecordValue::UnknownFile(b)) => {
                a == b
            }
            _ => match (elements(self), elements(other)) {
                (Some(a), Some(b)) => {
                    a.len() == b.len()
                        && a.iter()
                            .zip(&b)
                            .all(|(x, y)| x.compare(*y) == Some(Ordering::Equal))
                }
                _ => self.compare(other) == Some(Ordering::Equal),
            },
        }
    }
}

impl PartialOrd for KnowledgeRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other)
    }
}

impl PartialEq<i64> for KnowledgeRecord {
    fn eq(&self, other: &i64) -> bool {
        *self == Self::from(*other)
    }
}

impl PartialEq<f64> for KnowledgeRecord {
    fn eq(&self, other: &f64) -> bool {
        *self == Self::from(*other)
    }
}

impl PartialEq<&str> for KnowledgeRecord {
    fn eq(&self, other: &&str) -> bool {
        *self == Self::from(*other)
    }
}

impl Add for &KnowledgeRecord {
    type Output = KnowledgeRecord;

    /// Text on either side concatenates; otherwise numeric addition.
    fn add(self, rhs: Self) -> KnowledgeRecord {
        if self.is_string_type() || rhs.is_string_type() {
            let mut joined = self.to_string_with(", ");
            joined.push_str(&rhs.to_string_with(", "));
            return KnowledgeRecord::from(joined);
        }
        arithmetic(self, rhs, |a, b| Some(a.wrapping_add(b)), |a, b| a + b)
    }
}

impl Sub for &KnowledgeRecord {
    type Output = KnowledgeRecord;

    fn sub(self, rhs: Self) -> KnowledgeRecord {
        arithmetic(self, rhs, |a, b| Some(a.wrapping_sub(b)), |a, b| a - b)
    }
}

impl Mul for &KnowledgeRecord {
    type Output = KnowledgeRecord;

    fn mul(self, rhs: Self) -> KnowledgeRecord {
        arithmetic(self, rhs, |a, b| Some(a.wrapping_mul(b)), |a, b| a * b)
    }
}

impl Div for &KnowledgeRecord {
    type Output = KnowledgeRecord;

    /// Integer division by zero falls back to floating point (inf or NaN).
    fn div(self, rhs: Self) -> KnowledgeRecord {
        arithmetic(
            self,
            rhs,
            |a, b| if b == 0 { None } else { Some(a.wrapping_div(b)) },
            |a, b| a / b,
        )
    }
}

impl Rem for &KnowledgeRecord {
    type Output = KnowledgeRecord;

    fn rem(self, rhs: Self) -> KnowledgeRecord {
        arithmetic(
            self,
            rhs,
            |a, b| if b == 0 { None } else { Some(a.wrapping_rem(b)) },
            |a, b| a % b,
        )
    }
}

impl Neg for &KnowledgeRecord {
    type Output = KnowledgeRecord;

    fn neg(self) -> KnowledgeRecord {
        let negate = |n: Numeric| match n {
            Numeric::Int(i) => Numeric::Int(i.wrapping_neg()),
            Numeric::Dbl(d) => Numeric::Dbl(-d),
        };
        match elements(self) {
            Some(values) => from_elements(values.into_iter().map(negate).collect()),
            None => from_numeric(negate(scalar(self))),
        }
    }
}

macro_rules! forward_owned {
    ($($trait:ident $method:ident),*) => {
        $(
            impl $trait for KnowledgeRecord {
                type Output = KnowledgeRecord;

                fn $method(self, rhs: Self) -> KnowledgeRecord {
                    (&self).$method(&rhs)
                }
            }
        )*
    };
}

forward_owned!(Add add, Sub sub, Mul mul, Div div, Rem rem);

impl Neg for KnowledgeRecord {
    type Output = KnowledgeRecord;

    fn neg(self) -> KnowledgeRecord {
        -&self
    }
}
