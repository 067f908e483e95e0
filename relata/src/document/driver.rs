use std::sync::Arc;

use dashmap::DashMap;

use crate::common::{atomic, Atomic, Document, ReadExecutor, Value, WriteExecutor};
use crate::errors::{ErrorKind, RelataError, RelataResult};

/// Sort directions for [FindOptions].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Ordering and paging knobs for [DocumentCollection::find].
#[derive(Clone, Debug, Default)]
pub struct FindOptions {
    pub sort: Vec<(String, SortOrder)>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

impl FindOptions {
    pub fn sorted_by(field: &str, order: SortOrder) -> Self {
        FindOptions {
            sort: vec![(field.to_string(), order)],
            ..Default::default()
        }
    }
}

/// A partial update: fields to write and fields to drop.
#[derive(Clone, Debug, Default)]
pub struct UpdateSpec {
    pub set: Document,
    pub unset: Vec<String>,
}

impl UpdateSpec {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// Splits a change document into writes and drops: null values
    /// become field removals.
    pub fn from_changes(changes: &Document) -> RelataResult<UpdateSpec> {
        let mut spec = UpdateSpec::default();
        for (field, value) in changes.iter() {
            if value.is_null() {
                spec.unset.push(field.clone());
            } else {
                spec.set.put(field, value.clone())?;
            }
        }
        Ok(spec)
    }
}

/// Connection-level access to a document backend. Collections are
/// created on first use.
pub trait DocumentStore: Send + Sync {
    fn collection(&self, name: &str) -> RelataResult<Arc<dyn DocumentCollection>>;

    /// Runs a named database command. The first field of the document
    /// names the command, the rest are its arguments; the raw response
    /// document is returned as-is.
    fn command(&self, command: &Document) -> RelataResult<Document>;
}

/// One named collection of documents.
///
/// Queries are documents themselves: a field paired with a plain value
/// matches by equality, a field paired with an operator document
/// (`$in`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$exists`) matches by
/// that operator. All fields of a query must match.
pub trait DocumentCollection: Send + Sync {
    fn find(&self, query: &Document, options: &FindOptions) -> RelataResult<Vec<Document>>;

    fn find_one(&self, query: &Document) -> RelataResult<Option<Document>>;

    fn count(&self, query: &Document) -> RelataResult<u64>;

    fn insert(&self, document: &Document) -> RelataResult<()>;

    /// Applies the update to matching documents, to all of them when
    /// `multi` is set and the first one otherwise. Returns the number
    /// of updated documents.
    fn update(&self, query: &Document, update: &UpdateSpec, multi: bool) -> RelataResult<u64>;

    /// Deletes matching documents, all of them when `multi` is set and
    /// the first one otherwise. Returns the number of deleted
    /// documents.
    fn delete(&self, query: &Document, multi: bool) -> RelataResult<u64>;

    /// Distinct values of a field over the matching documents, in
    /// first-seen order. Documents missing the field contribute
    /// nothing.
    fn distinct(&self, field: &str, query: &Document) -> RelataResult<Vec<Value>>;
}

/// True when `document` satisfies every field of `query`.
pub fn matches(document: &Document, query: &Document) -> bool {
    query.iter().all(|(field, condition)| {
        let actual = document.get(field);
        match condition.as_document() {
            Some(operators) if is_operator_document(operators) => {
                operators.iter().all(|(op, operand)| {
                    apply_operator(document, field, &actual, op, operand)
                })
            }
            _ => &actual == condition,
        }
    })
}

fn is_operator_document(document: &Document) -> bool {
    !document.is_empty() && document.keys().all(|k| k.starts_with('$'))
}

fn apply_operator(
    document: &Document,
    field: &str,
    actual: &Value,
    op: &str,
    operand: &Value,
) -> bool {
    match op {
        "$in" => operand
            .as_array()
            .map(|candidates| candidates.contains(actual))
            .unwrap_or(false),
        "$ne" => actual != operand,
        "$gt" => actual > operand,
        "$gte" => actual >= operand,
        "$lt" => actual < operand,
        "$lte" => actual <= operand,
        "$exists" => {
            let exists = document.contains(field);
            exists == !operand.is_empty()
        }
        _ => false,
    }
}

/// In-memory document store with real matching semantics, used by the
/// test suites and as the reference for the query contract above.
///
/// Commands received through [DocumentStore::command] are recorded and
/// can be inspected with [MemoryDocumentStore::commands]. `distinct`,
/// `group` and `mapReduce` are interpreted; anything else is an error.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<DashMap<String, Arc<MemoryCollection>>>,
    commands: Arc<Atomic<Vec<Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        MemoryDocumentStore {
            collections: Arc::new(DashMap::new()),
            commands: Arc::new(atomic(Vec::new())),
        }
    }

    /// Every command document received so far, in order.
    pub fn commands(&self) -> Vec<Document> {
        self.commands.read_with(|commands| commands.clone())
    }

    fn query_argument(command: &Document, field: &str) -> Document {
        command.get(field).as_document().cloned().unwrap_or_default()
    }

    fn run_distinct(&self, command: &Document, collection: &str) -> RelataResult<Document> {
        let field = command.get("key");
        let field = field.as_str().unwrap_or_default();
        let query = Self::query_argument(command, "query");
        let values = self.collection(collection)?.distinct(field, &query)?;
        let mut result = Document::new();
        result.put("values", values)?;
        result.put("ok", 1)?;
        Ok(result)
    }

    /// Groups the documents matching `cond` by the `key` field(s).
    /// Reduce sources are not executed here: each group carries its
    /// key fields and the grouped documents under `items`.
    fn run_group(&self, spec: &Document) -> RelataResult<Document> {
        let ns = spec.get("ns");
        let ns = ns.as_str().unwrap_or_default();
        let key_fields: Vec<String> = match spec.get("key") {
            Value::String(field) => vec![field],
            Value::Document(fields) => fields.keys().cloned().collect(),
            _ => Vec::new(),
        };
        let cond = Self::query_argument(spec, "cond");
        let documents = self
            .collection(ns)?
            .find(&cond, &FindOptions::default())?;
        let total = documents.len();
        let mut groups: Vec<(Vec<Value>, Vec<Document>)> = Vec::new();
        for document in documents {
            let key: Vec<Value> = key_fields.iter().map(|f| document.get(f)).collect();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(document),
                None => groups.push((key, vec![document])),
            }
        }
        let mut retval = Vec::new();
        for (key, members) in &groups {
            let mut entry = Document::new();
            for (field, value) in key_fields.iter().zip(key) {
                entry.put(field, value.clone())?;
            }
            entry.put(
                "items",
                members.iter().cloned().map(Value::from).collect::<Vec<_>>(),
            )?;
            retval.push(Value::from(entry));
        }
        let mut result = Document::new();
        result.put("retval", retval)?;
        result.put("count", total as i64)?;
        result.put("keys", groups.len() as i64)?;
        result.put("ok", 1)?;
        Ok(result)
    }

    /// The map/reduce sources are opaque here; the matching documents
    /// come back unprocessed under `results`.
    fn run_map_reduce(&self, command: &Document, collection: &str) -> RelataResult<Document> {
        let query = Self::query_argument(command, "query");
        let documents = self
            .collection(collection)?
            .find(&query, &FindOptions::default())?;
        let mut result = Document::new();
        result.put(
            "results",
            documents.into_iter().map(Value::from).collect::<Vec<_>>(),
        )?;
        result.put("ok", 1)?;
        Ok(result)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn collection(&self, name: &str) -> RelataResult<Arc<dyn DocumentCollection>> {
        let collection = self
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::new()))
            .value()
            .clone();
        Ok(collection)
    }

    fn command(&self, command: &Document) -> RelataResult<Document> {
        let recorded = command.clone();
        self.commands.write_with(|commands| commands.push(recorded));
        let (name, argument) = match command.iter().next() {
            Some((name, argument)) => (name.clone(), argument.clone()),
            None => {
                log::error!("empty database command");
                return Err(RelataError::new(
                    "empty database command",
                    ErrorKind::InvalidOperation,
                ));
            }
        };
        match name.as_str() {
            "distinct" => self.run_distinct(command, argument.as_str().unwrap_or_default()),
            "group" => self.run_group(&argument.as_document().cloned().unwrap_or_default()),
            "mapReduce" => self.run_map_reduce(command, argument.as_str().unwrap_or_default()),
            other => {
                log::error!("unsupported database command '{}'", other);
                Err(RelataError::new(
                    &format!("unsupported database command '{}'", other),
                    ErrorKind::InvalidOperation,
                ))
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryCollection {
    documents: Atomic<Vec<Document>>,
}

impl MemoryCollection {
    fn new() -> Self {
        MemoryCollection {
            documents: atomic(Vec::new()),
        }
    }
}

impl DocumentCollection for MemoryCollection {
    fn find(&self, query: &Document, options: &FindOptions) -> RelataResult<Vec<Document>> {
        let mut found = self.documents.read_with(|docs| {
            docs.iter()
                .filter(|doc| matches(doc, query))
                .cloned()
                .collect::<Vec<_>>()
        });
        if !options.sort.is_empty() {
            found.sort_by(|a, b| {
                for (field, order) in &options.sort {
                    let ordering = a.get(field).cmp(&b.get(field));
                    let ordering = match order {
                        SortOrder::Ascending => ordering,
                        SortOrder::Descending => ordering.reverse(),
                    };
                    if ordering != std::cmp::Ordering::Equal {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let mut found = found.split_off(skip.min(found.len()));
        if let Some(limit) = options.limit {
            found.truncate(limit as usize);
        }
        Ok(found)
    }

    fn find_one(&self, query: &Document) -> RelataResult<Option<Document>> {
        Ok(self.documents.read_with(|docs| {
            docs.iter().find(|doc| matches(doc, query)).cloned()
        }))
    }

    fn count(&self, query: &Document) -> RelataResult<u64> {
        Ok(self
            .documents
            .read_with(|docs| docs.iter().filter(|doc| matches(doc, query)).count())
            as u64)
    }

    fn insert(&self, document: &Document) -> RelataResult<()> {
        let document = document.clone();
        self.documents.write_with(|docs| docs.push(document));
        Ok(())
    }

    fn update(&self, query: &Document, update: &UpdateSpec, multi: bool) -> RelataResult<u64> {
        let update = update.clone();
        Ok(self.documents.write_with(|docs| {
            let mut updated = 0u64;
            for doc in docs.iter_mut() {
                if !matches(doc, query) {
                    continue;
                }
                doc.merge(&update.set);
                for field in &update.unset {
                    doc.remove(field);
                }
                updated += 1;
                if !multi {
                    break;
                }
            }
            updated
        }))
    }

    fn delete(&self, query: &Document, multi: bool) -> RelataResult<u64> {
        Ok(self.documents.write_with(|docs| {
            if multi {
                let before = docs.len();
                docs.retain(|doc| !matches(doc, query));
                (before - docs.len()) as u64
            } else {
                match docs.iter().position(|doc| matches(doc, query)) {
                    Some(index) => {
                        docs.remove(index);
                        1
                    }
                    None => 0,
                }
            }
        }))
    }

    fn distinct(&self, field: &str, query: &Document) -> RelataResult<Vec<Value>> {
        Ok(self.documents.read_with(|docs| {
            let mut values: Vec<Value> = Vec::new();
            for doc in docs.iter().filter(|doc| matches(doc, query)) {
                let value = doc.get(field);
                if !value.is_null() && !values.contains(&value) {
                    values.push(value);
                }
            }
            values
        }))
    }
}
