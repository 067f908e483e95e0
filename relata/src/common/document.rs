use indexmap::IndexMap;

use crate::common::Value;
use crate::errors::{ErrorKind, RelataError, RelataResult};
use std::fmt::{Debug, Display, Formatter};

/// An insertion-ordered map of field names to [Value]s.
///
/// `Document` is the common currency of both backends: a relational
/// result row, a document-store record, a store query (equality fields
/// plus operator values such as `{"$in": [..]}`), and a partial-update
/// description (`$set`/`$unset` sections) are all documents.
///
/// Field order is preserved because it is load-bearing: relational
/// INSERT column lists and bound parameter order are derived by
/// iterating a document.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Document {
    data: IndexMap<String, Value>,
}

impl PartialOrd for Document {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Document {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.data.iter().cmp(other.data.iter())
    }
}

impl Document {
    /// Creates a new empty document.
    pub fn new() -> Self {
        Document {
            data: IndexMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Associates `value` with `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty.
    pub fn put<T: Into<Value>>(&mut self, key: &str, value: T) -> RelataResult<()> {
        if key.is_empty() {
            log::error!("Document does not support empty key");
            return Err(RelataError::new(
                "Document does not support empty key",
                ErrorKind::InvalidOperation,
            ));
        }
        self.data.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Returns the value associated with `key`, or [Value::Null] if the
    /// document contains no mapping for it.
    pub fn get(&self, key: &str) -> Value {
        self.data.get(key).cloned().unwrap_or(Value::Null)
    }

    pub fn get_ref(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Removes `key` and returns its value if present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    /// Copies every field of `other` into this document, overwriting
    /// fields that already exist.
    pub fn merge(&mut self, other: &Document) {
        for (k, v) in other.iter() {
            self.data.insert(k.clone(), v.clone());
        }
    }

    /// Returns the fields whose names start with `prefix_`, with the
    /// prefix stripped. Used to split joined rows into per-alias rows.
    pub fn strip_prefix(&self, prefix: &str) -> Document {
        let marker = format!("{}_", prefix);
        let mut result = Document::new();
        for (k, v) in self.iter() {
            if let Some(stripped) = k.strip_prefix(&marker) {
                result.data.insert(stripped.to_string(), v.clone());
            }
        }
        result
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Document {
            data: iter.into_iter().collect(),
        }
    }
}

/// Builds a [Document] from `"key" => value` pairs.
///
/// ```ignore
/// let row = doc! { "id" => 1, "title" => "A" };
/// assert_eq!(row.get("title"), Value::from("A"));
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::common::Document::new() };
    ( $( $key:expr => $value:expr ),+ $(,)? ) => {{
        let mut document = $crate::common::Document::new();
        $(
            document
                .put($key, $value)
                .expect("doc! keys must be non-empty");
        )+
        document
    }};
}
