use crate::common::Document;
use crate::model::Record;
use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};

/// Compare two floats for equality with NaN treated as equal to itself.
#[inline]
fn num_eq_float(a: f64, b: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        true
    } else {
        a == b
    }
}

/// Compare two floats with a total order. NaN sorts above everything.
#[inline]
fn num_cmp_float(a: f64, b: f64) -> std::cmp::Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
    }
}

/// Dynamic value held by a record property, a result row field, or a
/// store query/update document.
///
/// # Variants
/// - `Null`: absence of a value
/// - `Bool`, `I64`, `F64`, `String`, `Bytes`: scalar payloads; integers
///   and floats compare equal across variants when numerically equal
///   (`I64(2) == F64(2.0)`), matching the property model's numeric
///   widening rule
/// - `Array`: ordered collection, backs list-kind collection properties
/// - `Map`: value-keyed mapping, backs keyed collection properties
/// - `Document`: ordered field map (rows, nested documents, queries)
/// - `Record`: a related entity attached by relation loading
///
/// # Characteristics
/// - **Comparable**: total order by variant rank then payload, so values
///   can serve as map keys and produce deterministic output
/// - **Default**: defaults to `Null`
#[derive(Clone, Default)]
pub enum Value {
    /// Represents a null value.
    #[default]
    Null,
    /// Represents a boolean value.
    Bool(bool),
    /// Represents a signed 64-bit integer value.
    I64(i64),
    /// Represents a 64-bit floating point value.
    F64(f64),
    /// Represents a string value.
    String(String),
    /// Represents binary data. It cannot be used in conditions.
    Bytes(Vec<u8>),
    /// Represents an ordered array of values.
    Array(Vec<Value>),
    /// Represents a value-keyed map.
    Map(BTreeMap<Value, Value>),
    /// Represents an ordered field map.
    Document(Document),
    /// Represents a related entity record.
    Record(Record),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::I64(_) => 2,
            Value::F64(_) => 3,
            Value::String(_) => 4,
            Value::Bytes(_) => 5,
            Value::Array(_) => 6,
            Value::Map(_) => 7,
            Value::Document(_) => 8,
            Value::Record(_) => 9,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::I64(_) | Value::F64(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Value::Document(_))
    }

    pub fn is_record(&self) -> bool {
        matches!(self, Value::Record(_))
    }

    /// Truthiness used by `is(p)`/`has(p)`: a value is empty when it is
    /// null, `false`, numeric zero, or an empty string/container.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::I64(i) => *i == 0,
            Value::F64(f) => *f == 0.0,
            Value::String(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Map(m) => m.is_empty(),
            Value::Document(d) => d.is_empty(),
            Value::Record(r) => r.len() == 0,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(f) => Some(*f),
            _ => None,
        }
    }

    /// Numeric view of the value regardless of integer/float variant.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::I64(i) => Some(*i as f64),
            Value::F64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<Value, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Renders a scalar value as a result-map key. Identifier values of
    /// any scalar variant map to a stable string form.
    pub fn render_key(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::I64(i) => i.to_string(),
            Value::F64(f) => f.to_string(),
            Value::String(s) => s.clone(),
            other => format!("{}", other),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I64(i) => write!(f, "{}", i),
            Value::F64(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Document(d) => write!(f, "{}", d),
            Value::Record(r) => write!(f, "{}({})", r.model().name(), r.identifier_value()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        // numeric widening: integers and floats compare by value
        if self.is_number() && other.is_number() {
            if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
                return num_eq_float(a, b);
            }
        }

        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Document(a), Value::Document(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        if self.is_number() && other.is_number() {
            if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
                return num_cmp_float(a, b);
            }
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (Value::Document(a), Value::Document(b)) => a.cmp(b),
            (Value::Record(a), Value::Record(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I64(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::I64(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::I64(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F64(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<BTreeMap<Value, Value>> for Value {
    fn from(v: BTreeMap<Value, Value>) -> Self {
        Value::Map(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_widening_makes_int_and_float_equal() {
        assert_eq!(Value::I64(2), Value::F64(2.0));
        assert_ne!(Value::I64(2), Value::F64(2.5));
        assert_eq!(Value::F64(0.0), Value::I64(0));
    }

    #[test]
    fn nan_equals_nan_for_total_order() {
        assert_eq!(Value::F64(f64::NAN), Value::F64(f64::NAN));
        assert_eq!(
            Value::F64(f64::NAN).cmp(&Value::F64(1.0)),
            std::cmp::Ordering::Greater
        );
    }

    #[test]
    fn emptiness_follows_truthiness() {
        assert!(Value::Null.is_empty());
        assert!(Value::Bool(false).is_empty());
        assert!(Value::I64(0).is_empty());
        assert!(Value::String(String::new()).is_empty());
        assert!(Value::Array(vec![]).is_empty());
        assert!(!Value::I64(5).is_empty());
        assert!(!Value::String("x".into()).is_empty());
    }

    #[test]
    fn render_key_is_stable_across_scalar_variants() {
        assert_eq!(Value::I64(42).render_key(), "42");
        assert_eq!(Value::String("abc".into()).render_key(), "abc");
        assert_eq!(Value::Bool(true).render_key(), "true");
    }

    #[test]
    fn values_order_by_rank_across_variants() {
        assert!(Value::Null < Value::Bool(false));
        assert!(Value::Bool(true) < Value::I64(i64::MIN));
        assert!(Value::String("z".into()) < Value::Array(vec![]));
    }

    #[test]
    fn map_keys_accept_mixed_numeric_forms() {
        let mut map = BTreeMap::new();
        map.insert(Value::I64(1), Value::from("one"));
        // same numeric key, float form: overwrites
        map.insert(Value::F64(1.0), Value::from("uno"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Value::I64(1)), Some(&Value::from("uno")));
    }

    #[test]
    fn from_option_maps_none_to_null() {
        let v: Value = Option::<i64>::None.into();
        assert!(v.is_null());
        let v: Value = Some("x").into();
        assert_eq!(v, Value::from("x"));
    }
}
