//! Row values handed to match engines, and the bin keys derived from them.

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::ops::Deref;

/// One typed cell of a row.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Box<str>),
    Array(Box<[Value]>),
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

/// 2^63 as an f64; the first float above every i64.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn float_as_exact_int(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && (-I64_LIMIT..I64_LIMIT).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

impl Number {
    fn eq(self, other: Number) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            (Number::Float(a), Number::Float(b)) => a == b,
            (Number::Int(i), Number::Float(f)) | (Number::Float(f), Number::Int(i)) => {
                float_as_exact_int(f) == Some(i)
            }
        }
    }
}

impl Value {
    fn number(&self) -> Option<Number> {
        match *self {
            Value::Byte(v) => Some(Number::Int(v as i64)),
            Value::Short(v) => Some(Number::Int(v as i64)),
            Value::Int(v) => Some(Number::Int(v as i64)),
            Value::Long(v) => Some(Number::Int(v)),
            Value::Float(v) => Some(Number::Float(v as f64)),
            Value::Double(v) => Some(Number::Float(v)),
            _ => None,
        }
    }

    /// Numeric value widened to f64, or `None` for non-numeric kinds.
    pub fn as_f64(&self) -> Option<f64> {
        match self.number()? {
            Number::Int(v) => Some(v as f64),
            Number::Float(v) => Some(v),
        }
    }

    /// Integer value, for integer kinds and exactly integral floats.
    pub fn as_i64(&self) -> Option<i64> {
        match self.number()? {
            Number::Int(v) => Some(v),
            Number::Float(v) => float_as_exact_int(v),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Equality under numeric widening.
    ///
    /// Integer kinds compare as i64 and floating kinds as f64. An integer
    /// equals a float only when the float is exactly that integer. Null and
    /// NaN equal nothing, themselves included.
    pub fn widened_eq(&self, other: &Value) -> bool {
        if let (Some(a), Some(b)) = (self.number(), other.number()) {
            return a.eq(b);
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.widened_eq(y))
            }
            _ => false,
        }
    }

    /// Feed the canonical form into `hasher`, such that values equal under
    /// [`Value::widened_eq`] hash alike. Returns false for values that can
    /// never be equal to anything.
    fn hash_canonical<H: Hasher>(&self, hasher: &mut H) -> bool {
        if let Some(n) = self.number() {
            match n {
                Number::Int(i) => {
                    0u8.hash(hasher);
                    i.hash(hasher);
                }
                Number::Float(f) if f.is_nan() => return false,
                Number::Float(f) => match float_as_exact_int(f) {
                    Some(i) => {
                        0u8.hash(hasher);
                        i.hash(hasher);
                    }
                    None => {
                        1u8.hash(hasher);
                        f.to_bits().hash(hasher);
                    }
                },
            }
            return true;
        }
        match self {
            Value::Bool(b) => {
                2u8.hash(hasher);
                b.hash(hasher);
            }
            Value::Str(s) => {
                3u8.hash(hasher);
                s.hash(hasher);
            }
            Value::Array(items) => {
                4u8.hash(hasher);
                items.len().hash(hasher);
                for item in items.iter() {
                    if !item.hash_canonical(hasher) {
                        return false;
                    }
                }
            }
            _ => return false,
        }
        true
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v.into_boxed_slice())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Short(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
            Value::Array(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// The match-relevant cells of one row. Immutable once built.
#[derive(Debug, Clone)]
pub struct Tuple(Box<[Value]>);

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values.into_boxed_slice())
    }

    pub fn from_f64s(values: &[f64]) -> Self {
        Self(values.iter().map(|&v| Value::Double(v)).collect())
    }

    /// Element `i` as f64, if present and numeric.
    pub fn f64_at(&self, i: usize) -> Option<f64> {
        self.0.get(i)?.as_f64()
    }

    /// All elements as finite f64s written to `out`; false if any fails.
    pub fn finite_f64s_into(&self, out: &mut [f64]) -> bool {
        if self.0.len() < out.len() {
            return false;
        }
        for (slot, value) in out.iter_mut().zip(self.0.iter()) {
            match value.as_f64() {
                Some(v) if v.is_finite() => *slot = v,
                _ => return false,
            }
        }
        true
    }

    /// Hash of the canonical element form, or `None` if some element can
    /// never compare equal.
    pub fn canonical_hash(&self) -> Option<u64> {
        let mut hasher = DefaultHasher::new();
        self.0.len().hash(&mut hasher);
        for value in self.0.iter() {
            if !value.hash_canonical(&mut hasher) {
                return None;
            }
        }
        Some(hasher.finish())
    }
}

impl Deref for Tuple {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

/// Expected content of a tuple element or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    Integer,
    Any,
}

/// Metadata describing one tuple element, parameter or score.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueInfo {
    pub name: String,
    pub kind: ValueKind,
    pub unit: Option<String>,
    pub ucd: Option<String>,
    pub description: String,
}

impl ValueInfo {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            unit: None,
            ucd: None,
            description: String::new(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_ucd(mut self, ucd: impl Into<String>) -> Self {
        self.ucd = Some(ucd.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A named value together with its metadata.
#[derive(Debug, Clone)]
pub struct DescribedValue {
    pub info: ValueInfo,
    pub value: Value,
}

impl DescribedValue {
    pub fn new(info: ValueInfo, value: impl Into<Value>) -> Self {
        Self {
            info,
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }
}

/// Key grouping tuples that might match.
///
/// The derived ordering is the one rows are sorted by before pairing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinKey {
    /// Sky pixel index at the engine's resolution.
    Pixel(u64),
    /// Quantised N-dimensional cell.
    Cell(Box<[i64]>),
    /// Exact-equality hash.
    Hash(u64),
}
