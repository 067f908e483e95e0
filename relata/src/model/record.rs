use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::common::{Document, Value};
use crate::errors::{ErrorKind, RelataError, RelataResult};
use crate::model::{
    CollectionKind, EntityModel, PropertyMeta, PropertyType, RemovePolicy, UniquePolicy,
};

/// A dynamic-property entity instance.
///
/// A record holds its current property values and a snapshot of the
/// values last seen in storage. The snapshot drives persistence: a
/// record with an empty snapshot is new, and [Record::dirty_columns]
/// diffs the current values against it to produce the minimal write.
#[derive(Clone)]
pub struct Record {
    model: Arc<EntityModel>,
    properties: IndexMap<String, Value>,
    snapshot: IndexMap<String, Value>,
}

impl Record {
    /// Creates a fresh, unsaved record of the given model.
    pub fn new(model: Arc<EntityModel>) -> Self {
        Record {
            model,
            properties: IndexMap::new(),
            snapshot: IndexMap::new(),
        }
    }

    /// Hydrates a record from a document. When `is_new` is false the
    /// document is also captured as the storage snapshot, marking the
    /// record as persisted. Fields the model does not declare are
    /// ignored.
    pub fn from_document(
        model: Arc<EntityModel>,
        document: &Document,
        is_new: bool,
    ) -> RelataResult<Record> {
        let mut record = Record::new(model);
        for (key, value) in document.iter() {
            if record.model.is_property(key) {
                record.set_unchecked(key, value.clone())?;
            }
        }
        if !is_new {
            record.capture_snapshot();
        }
        Ok(record)
    }

    pub fn model(&self) -> &Arc<EntityModel> {
        &self.model
    }

    /// Number of properties currently set.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Value of the primary key property, [Value::Null] if unset.
    pub fn identifier_value(&self) -> Value {
        self.properties
            .get(self.model.identifier())
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn meta(&self, name: &str) -> RelataResult<&PropertyMeta> {
        let resolved = self.model.resolve(name);
        match self.model.property(resolved) {
            Some(meta) => Ok(meta),
            None => {
                log::error!(
                    "property '{}' is not defined on entity '{}'",
                    name,
                    self.model.name()
                );
                Err(RelataError::new(
                    &format!(
                        "property '{}' is not defined on entity '{}'",
                        name,
                        self.model.name()
                    ),
                    ErrorKind::UndefinedProperty,
                ))
            }
        }
    }

    /// Returns the current value of a property, falling back to its
    /// declared default and then to [Value::Null].
    ///
    /// # Errors
    ///
    /// Returns an error if the model does not declare the property.
    pub fn get(&self, name: &str) -> RelataResult<Value> {
        let meta = self.meta(name)?;
        if let Some(value) = self.properties.get(meta.name()) {
            return Ok(value.clone());
        }
        Ok(meta.default().cloned().unwrap_or(Value::Null))
    }

    /// Sets a property after readonly and type checks. Assigning
    /// [Value::Null] clears the property, with the same guards as
    /// [Record::clear].
    pub fn set<T: Into<Value>>(&mut self, name: &str, value: T) -> RelataResult<()> {
        let value = value.into();
        if value.is_null() {
            return self.clear(name);
        }
        let meta = self.meta(name)?.clone();
        if meta.is_readonly() {
            log::error!(
                "property '{}' on entity '{}' is readonly",
                name,
                self.model.name()
            );
            return Err(RelataError::new(
                &format!(
                    "property '{}' on entity '{}' is readonly",
                    name,
                    self.model.name()
                ),
                ErrorKind::ReadonlyProperty,
            ));
        }
        self.store(&meta, value)
    }

    /// Sets a property bypassing the readonly check. Used when
    /// hydrating from storage.
    pub fn set_unchecked<T: Into<Value>>(&mut self, name: &str, value: T) -> RelataResult<()> {
        let meta = self.meta(name)?.clone();
        self.store(&meta, value.into())
    }

    fn store(&mut self, meta: &PropertyMeta, value: Value) -> RelataResult<()> {
        if value.is_null() {
            self.properties.shift_remove(meta.name());
            return Ok(());
        }
        let coerced = coerce_property(meta, value, self.model.name())?;
        self.properties.insert(meta.name().to_string(), coerced);
        Ok(())
    }

    /// Clears a property, unless the model flags it readonly or
    /// required. Hydration paths that need to drop guarded values go
    /// through [Record::set_unchecked] with null instead.
    pub fn clear(&mut self, name: &str) -> RelataResult<()> {
        let meta = self.meta(name)?;
        if meta.is_readonly() || meta.is_required() {
            let kind = if meta.is_readonly() {
                ErrorKind::ReadonlyProperty
            } else {
                ErrorKind::RequiredProperty
            };
            log::error!(
                "property '{}' on entity '{}' cannot be cleared",
                name,
                self.model.name()
            );
            return Err(RelataError::new(
                &format!(
                    "property '{}' on entity '{}' cannot be cleared",
                    name,
                    self.model.name()
                ),
                kind,
            ));
        }
        let key = meta.name().to_string();
        self.properties.shift_remove(&key);
        Ok(())
    }

    /// True if the property is set, not counting declared defaults.
    pub fn has(&self, name: &str) -> bool {
        let resolved = self.model.resolve(name);
        self.properties.contains_key(resolved)
    }

    /// Truthiness of a property: false for unknown properties, null,
    /// false, zero and empty collections.
    pub fn is(&self, name: &str) -> bool {
        match self.get(name) {
            Ok(value) => !value.is_empty(),
            Err(_) => false,
        }
    }

    /// Adds an item to a collection property. The property may be
    /// addressed by its singular alias. Returns false when the
    /// collection's uniqueness policy skipped the item.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or non-collection properties, and
    /// for keyed collections without a key field when no explicit key
    /// is available.
    pub fn add<T: Into<Value>>(&mut self, name: &str, item: T) -> RelataResult<bool> {
        let meta = self.collection_meta(name)?;
        let item = coerce_scalar(meta.property_type(), meta.name(), item.into(), self.model.name())?;
        match meta.collection_kind() {
            CollectionKind::List => self.add_to_list(&meta, item),
            CollectionKind::Keyed => {
                let key = match meta.unique_policy() {
                    UniquePolicy::ByKey(field) => item_field(&item, field)?,
                    _ => {
                        log::error!(
                            "keyed collection '{}' on entity '{}' needs an explicit key",
                            meta.name(),
                            self.model.name()
                        );
                        return Err(RelataError::new(
                            &format!(
                                "keyed collection '{}' on entity '{}' needs an explicit key",
                                meta.name(),
                                self.model.name()
                            ),
                            ErrorKind::InvalidOperation,
                        ));
                    }
                };
                self.add_keyed_item(&meta, key, item)
            }
            CollectionKind::None => unreachable!("checked by collection_meta"),
        }
    }

    /// Adds an item to a keyed collection under an explicit key,
    /// replacing any previous item with the same key.
    pub fn add_keyed<K: Into<Value>, T: Into<Value>>(
        &mut self,
        name: &str,
        key: K,
        item: T,
    ) -> RelataResult<bool> {
        let meta = self.collection_meta(name)?;
        if meta.collection_kind() != &CollectionKind::Keyed {
            log::error!(
                "collection '{}' on entity '{}' is not keyed",
                meta.name(),
                self.model.name()
            );
            return Err(RelataError::new(
                &format!(
                    "collection '{}' on entity '{}' is not keyed",
                    meta.name(),
                    self.model.name()
                ),
                ErrorKind::NotACollection,
            ));
        }
        let item = coerce_scalar(meta.property_type(), meta.name(), item.into(), self.model.name())?;
        self.add_keyed_item(&meta, key.into(), item)
    }

    fn add_to_list(&mut self, meta: &PropertyMeta, item: Value) -> RelataResult<bool> {
        let list = self.list_mut(meta.name());
        match meta.unique_policy() {
            UniquePolicy::ByValue if list.contains(&item) => Ok(false),
            UniquePolicy::ByKey(field) => {
                let key = item_field(&item, field)?;
                if let Some(existing) = list
                    .iter_mut()
                    .find(|v| item_field(v, field).map(|k| k == key).unwrap_or(false))
                {
                    *existing = item;
                    Ok(false)
                } else {
                    list.push(item);
                    Ok(true)
                }
            }
            _ => {
                list.push(item);
                Ok(true)
            }
        }
    }

    fn add_keyed_item(&mut self, meta: &PropertyMeta, key: Value, item: Value) -> RelataResult<bool> {
        if meta.unique_policy() == &UniquePolicy::ByValue {
            let map = self.map_mut(meta.name());
            if map.values().any(|v| v == &item) {
                return Ok(false);
            }
        }
        let map = self.map_mut(meta.name());
        let replaced = map.insert(key, item).is_some();
        Ok(!replaced)
    }

    /// Removes items from a collection property according to its
    /// removal policy. Returns true when anything was removed.
    pub fn remove_item<T: Into<Value>>(&mut self, name: &str, value: T) -> RelataResult<bool> {
        let meta = self.collection_meta(name)?;
        let value = value.into();
        let removed = match (meta.collection_kind(), meta.remove_rule()) {
            (CollectionKind::List, RemovePolicy::ByValue) => {
                let list = self.list_mut(meta.name());
                let before = list.len();
                list.retain(|v| v != &value);
                before != list.len()
            }
            (CollectionKind::List, RemovePolicy::ByField(field)) => {
                let field = field.clone();
                let list = self.list_mut(meta.name());
                let before = list.len();
                list.retain(|v| item_field(v, &field).map(|k| k != value).unwrap_or(true));
                before != list.len()
            }
            (CollectionKind::Keyed, RemovePolicy::ByKey) => {
                self.map_mut(meta.name()).remove(&value).is_some()
            }
            (CollectionKind::Keyed, RemovePolicy::ByValue) => {
                let map = self.map_mut(meta.name());
                let before = map.len();
                map.retain(|_, v| v != &value);
                before != map.len()
            }
            (CollectionKind::Keyed, RemovePolicy::ByField(field)) => {
                let field = field.clone();
                let map = self.map_mut(meta.name());
                let before = map.len();
                map.retain(|_, v| item_field(v, &field).map(|k| k != value).unwrap_or(true));
                before != map.len()
            }
            (CollectionKind::List, RemovePolicy::ByKey) | (CollectionKind::None, _) => {
                log::error!(
                    "removal policy does not apply to collection '{}' on entity '{}'",
                    meta.name(),
                    self.model.name()
                );
                return Err(RelataError::new(
                    &format!(
                        "removal policy does not apply to collection '{}' on entity '{}'",
                        meta.name(),
                        self.model.name()
                    ),
                    ErrorKind::InvalidOperation,
                ));
            }
        };
        Ok(removed)
    }

    fn collection_meta(&self, name: &str) -> RelataResult<PropertyMeta> {
        let meta = self.meta(name)?;
        if !meta.is_collection() {
            log::error!(
                "property '{}' on entity '{}' is not a collection",
                name,
                self.model.name()
            );
            return Err(RelataError::new(
                &format!(
                    "property '{}' on entity '{}' is not a collection",
                    name,
                    self.model.name()
                ),
                ErrorKind::NotACollection,
            ));
        }
        Ok(meta.clone())
    }

    fn list_mut(&mut self, name: &str) -> &mut Vec<Value> {
        let entry = self
            .properties
            .entry(name.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(list) => list,
            other => {
                *other = Value::Array(Vec::new());
                match other {
                    Value::Array(list) => list,
                    _ => unreachable!(),
                }
            }
        }
    }

    fn map_mut(&mut self, name: &str) -> &mut std::collections::BTreeMap<Value, Value> {
        let entry = self
            .properties
            .entry(name.to_string())
            .or_insert_with(|| Value::Map(Default::default()));
        match entry {
            Value::Map(map) => map,
            other => {
                *other = Value::Map(Default::default());
                match other {
                    Value::Map(map) => map,
                    _ => unreachable!(),
                }
            }
        }
    }

    /// Renders the record as a document, skipping excluded properties.
    /// Related records are rendered recursively when `recursive` is
    /// true and reduced to their identifier otherwise.
    pub fn to_document(&self, recursive: bool) -> Document {
        let mut document = Document::new();
        for meta in self.model.properties() {
            if meta.is_excluded() {
                continue;
            }
            let value = match self.properties.get(meta.name()) {
                Some(value) => value.clone(),
                None => match meta.default() {
                    Some(default) => default.clone(),
                    None => continue,
                },
            };
            let rendered = render_value(value, recursive);
            // put cannot fail for declared property names
            let _ = document.put(meta.name(), rendered);
        }
        document
    }

    /// Current values of column-backed properties.
    pub fn column_values(&self) -> Document {
        let mut document = Document::new();
        for column in self.model.columns() {
            if let Some(value) = self.properties.get(column) {
                let _ = document.put(column, render_value(value.clone(), false));
            }
        }
        document
    }

    /// True until the record has been loaded from or saved to storage.
    pub fn is_new(&self) -> bool {
        self.snapshot.is_empty()
    }

    /// Last value of a column as seen in storage.
    pub fn database_property(&self, name: &str) -> Option<&Value> {
        self.snapshot.get(name)
    }

    pub fn set_database_property<T: Into<Value>>(&mut self, name: &str, value: T) {
        self.snapshot.insert(name.to_string(), value.into());
    }

    /// Copies the current column values into the storage snapshot,
    /// marking the record as persisted and clean.
    pub fn capture_snapshot(&mut self) {
        self.snapshot.clear();
        for column in self.model.columns() {
            let value = self
                .properties
                .get(column)
                .map(|v| render_value(v.clone(), false))
                .unwrap_or(Value::Null);
            self.snapshot.insert(column.clone(), value);
        }
    }

    /// Drops the storage snapshot. The record reverts to new and a
    /// subsequent save inserts instead of updating.
    pub fn clear_database_properties(&mut self) {
        self.snapshot.clear();
    }

    /// Columns whose current value differs from the storage snapshot.
    /// A cleared column appears with an explicit [Value::Null].
    pub fn dirty_columns(&self) -> Document {
        let mut dirty = Document::new();
        for column in self.model.columns() {
            let current = self
                .properties
                .get(column)
                .map(|v| render_value(v.clone(), false))
                .unwrap_or(Value::Null);
            let stored = self.snapshot.get(column).cloned().unwrap_or(Value::Null);
            if current != stored {
                let _ = dirty.put(column, current);
            }
        }
        dirty
    }
}

/// Reduces relation values for storage or rendering: a record becomes
/// its identifier (or its own document when `recursive`), containers
/// are mapped element-wise.
fn render_value(value: Value, recursive: bool) -> Value {
    match value {
        Value::Record(record) => {
            if recursive {
                Value::Document(record.to_document(true))
            } else {
                record.identifier_value()
            }
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| render_value(v, recursive)).collect())
        }
        Value::Map(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, render_value(v, recursive)))
                .collect(),
        ),
        other => other,
    }
}

fn item_field(item: &Value, field: &str) -> RelataResult<Value> {
    let value = match item {
        Value::Record(record) => record.get(field)?,
        Value::Document(document) => document.get(field),
        Value::Map(map) => map
            .get(&Value::from(field))
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    };
    if value.is_null() {
        log::error!("collection item has no usable '{}' field", field);
        return Err(RelataError::new(
            &format!("collection item has no usable '{}' field", field),
            ErrorKind::TypeMismatch,
        ));
    }
    Ok(value)
}

fn coerce_property(meta: &PropertyMeta, value: Value, entity: &str) -> RelataResult<Value> {
    if meta.is_collection() {
        return coerce_collection(meta, value, entity);
    }
    coerce_scalar(meta.property_type(), meta.name(), value, entity)
}

fn coerce_collection(meta: &PropertyMeta, value: Value, entity: &str) -> RelataResult<Value> {
    // single items reach collections through add(), set() takes the
    // whole collection at once
    match (meta.collection_kind(), value) {
        (CollectionKind::List, Value::Array(items)) => {
            let coerced = items
                .into_iter()
                .map(|v| coerce_scalar(meta.property_type(), meta.name(), v, entity))
                .collect::<RelataResult<Vec<_>>>()?;
            Ok(Value::Array(coerced))
        }
        (CollectionKind::Keyed, Value::Map(map)) => {
            let coerced = map
                .into_iter()
                .map(|(k, v)| {
                    coerce_scalar(meta.property_type(), meta.name(), v, entity).map(|v| (k, v))
                })
                .collect::<RelataResult<_>>()?;
            Ok(Value::Map(coerced))
        }
        (CollectionKind::None, value) => {
            coerce_scalar(meta.property_type(), meta.name(), value, entity)
        }
        (kind, value) => {
            log::error!(
                "value {:?} is not a valid {:?} collection for property '{}' of entity '{}'",
                value,
                kind,
                meta.name(),
                entity
            );
            Err(RelataError::new(
                &format!(
                    "value {:?} is not a valid {:?} collection for property '{}' of entity '{}'",
                    value,
                    kind,
                    meta.name(),
                    entity
                ),
                ErrorKind::TypeMismatch,
            ))
        }
    }
}

fn coerce_scalar(
    property_type: &PropertyType,
    name: &str,
    value: Value,
    entity: &str,
) -> RelataResult<Value> {
    let mismatch = |value: &Value| {
        log::error!(
            "value {:?} does not fit property '{}' of entity '{}'",
            value,
            name,
            entity
        );
        RelataError::new(
            &format!(
                "value {:?} does not fit property '{}' of entity '{}'",
                value, name, entity
            ),
            ErrorKind::TypeMismatch,
        )
    };
    match property_type {
        PropertyType::Any => Ok(value),
        PropertyType::Bool => match value {
            Value::Bool(_) => Ok(value),
            Value::I64(n) => Ok(Value::Bool(n != 0)),
            Value::F64(x) => Ok(Value::Bool(x != 0.0)),
            other => Err(mismatch(&other)),
        },
        PropertyType::Int => match value {
            Value::I64(_) => Ok(value),
            Value::Bool(b) => Ok(Value::I64(b as i64)),
            Value::F64(x) => Ok(Value::I64(x as i64)),
            Value::String(ref s) => Ok(Value::I64(s.parse::<i64>()?)),
            other => Err(mismatch(&other)),
        },
        PropertyType::Float => match value {
            Value::F64(_) => Ok(value),
            Value::I64(n) => Ok(Value::F64(n as f64)),
            Value::Bool(b) => Ok(Value::F64(b as i64 as f64)),
            Value::String(ref s) => Ok(Value::F64(s.parse::<f64>()?)),
            other => Err(mismatch(&other)),
        },
        PropertyType::Str => match value {
            Value::String(_) => Ok(value),
            Value::I64(n) => Ok(Value::String(n.to_string())),
            Value::F64(x) => Ok(Value::String(x.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(mismatch(&other)),
        },
        PropertyType::Bytes => match value {
            Value::Bytes(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        PropertyType::Entity(target) => match value {
            Value::Record(ref record) => {
                if record.model().name() == target {
                    Ok(value)
                } else {
                    Err(mismatch(&value))
                }
            }
            // a bare value is kept as the related identifier
            Value::I64(_) | Value::String(_) | Value::Document(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.model.name() == other.model.name() && self.properties == other.properties
    }
}

impl Eq for Record {}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.model
            .name()
            .cmp(other.model.name())
            .then_with(|| self.properties.iter().cmp(other.properties.iter()))
    }
}

impl Debug for Record {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.model.name(), self.to_document(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::model::{Junction, RelationDef};

    fn post_model() -> Arc<EntityModel> {
        Arc::new(
            EntityModel::builder("post")
                .table("posts")
                .property(PropertyMeta::new("title", PropertyType::Str).required())
                .property(PropertyMeta::new("views", PropertyType::Int).default_value(0))
                .property(PropertyMeta::new("secret", PropertyType::Str).exclude())
                .property(
                    PropertyMeta::new("tags", PropertyType::Any)
                        .collection(CollectionKind::List)
                        .single_alias("tag")
                        .unique(UniquePolicy::ByValue),
                )
                .property(
                    PropertyMeta::new("author", PropertyType::Entity("user".into())).relation(
                        RelationDef::new("user", "author_id", "id", Junction::Single),
                    ),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn unknown_property_is_an_error() {
        let record = Record::new(post_model());
        let err = record.get("nope").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UndefinedProperty);
    }

    #[test]
    fn get_falls_back_to_default_then_null() {
        let record = Record::new(post_model());
        assert_eq!(record.get("views").unwrap(), Value::I64(0));
        assert_eq!(record.get("title").unwrap(), Value::Null);
        assert!(!record.has("views"));
    }

    #[test]
    fn readonly_identifier_rejects_set_but_not_set_unchecked() {
        let mut record = Record::new(post_model());
        let err = record.set("id", 5).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ReadonlyProperty);
        record.set_unchecked("id", 5).unwrap();
        assert_eq!(record.identifier_value(), Value::I64(5));
    }

    #[test]
    fn int_property_coerces_strings_and_rejects_garbage() {
        let mut record = Record::new(post_model());
        record.set("views", "42").unwrap();
        assert_eq!(record.get("views").unwrap(), Value::I64(42));
        let err = record.set("views", "not a number").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::TypeMismatch);
    }

    #[test]
    fn null_assignment_clears_the_property() {
        let mut record = Record::new(post_model());
        record.set("views", 7).unwrap();
        assert!(record.has("views"));
        record.set("views", Value::Null).unwrap();
        assert!(!record.has("views"));
    }

    #[test]
    fn required_properties_resist_clearing() {
        let mut record = Record::new(post_model());
        record.set("title", "hello").unwrap();
        let err = record.clear("title").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::RequiredProperty);
        assert!(record.has("title"));
    }

    #[test]
    fn add_through_alias_honors_uniqueness() {
        let mut record = Record::new(post_model());
        assert!(record.add("tag", "rust").unwrap());
        assert!(record.add("tag", "db").unwrap());
        assert!(!record.add("tag", "rust").unwrap());
        assert_eq!(
            record.get("tags").unwrap(),
            Value::Array(vec![Value::from("rust"), Value::from("db")])
        );
    }

    #[test]
    fn by_key_collections_replace_on_duplicate_key() {
        let model = Arc::new(
            EntityModel::builder("post")
                .table("posts")
                .property(
                    PropertyMeta::new("ratings", PropertyType::Any)
                        .collection(CollectionKind::List)
                        .unique(UniquePolicy::ByKey("id".into())),
                )
                .build()
                .unwrap(),
        );
        let mut record = Record::new(model);
        assert!(record
            .add("ratings", doc! { "id" => 1, "name" => "old" })
            .unwrap());
        // same key: the later item wins in place
        assert!(!record
            .add("ratings", doc! { "id" => 1, "name" => "new" })
            .unwrap());
        let items = record.get("ratings").unwrap();
        let items = items.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].as_document().unwrap().get("name"),
            Value::from("new")
        );
    }

    #[test]
    fn add_rejects_non_collection_property() {
        let mut record = Record::new(post_model());
        let err = record.add("title", "x").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NotACollection);
    }

    #[test]
    fn remove_item_by_value() {
        let mut record = Record::new(post_model());
        record.add("tag", "rust").unwrap();
        record.add("tag", "db").unwrap();
        assert!(record.remove_item("tag", "rust").unwrap());
        assert!(!record.remove_item("tag", "rust").unwrap());
        assert_eq!(
            record.get("tags").unwrap(),
            Value::Array(vec![Value::from("db")])
        );
    }

    #[test]
    fn entity_property_accepts_matching_record_or_bare_id() {
        let user_model = Arc::new(
            EntityModel::builder("user")
                .property(PropertyMeta::new("name", PropertyType::Str))
                .build()
                .unwrap(),
        );
        let mut author = Record::new(user_model);
        author.set_unchecked("id", 7).unwrap();

        let mut post = Record::new(post_model());
        post.set("author", Value::Record(author)).unwrap();
        post.set("author", 7).unwrap();

        let stranger = Record::new(post_model());
        let err = post.set("author", Value::Record(stranger)).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::TypeMismatch);
    }

    #[test]
    fn hydration_marks_record_persisted_and_clean() {
        let doc = doc! { "id" => 1, "title" => "hello", "views" => 3 };
        let record = Record::from_document(post_model(), &doc, false).unwrap();
        assert!(!record.is_new());
        assert!(record.dirty_columns().is_empty());
        assert_eq!(
            record.database_property("title"),
            Some(&Value::from("hello"))
        );
    }

    #[test]
    fn dirty_columns_diff_against_snapshot() {
        let doc = doc! { "id" => 1, "title" => "hello", "views" => 3 };
        let mut record = Record::from_document(post_model(), &doc, false).unwrap();
        record.set("title", "changed").unwrap();
        record.clear("views").unwrap();
        let dirty = record.dirty_columns();
        assert_eq!(dirty.len(), 2);
        assert_eq!(dirty.get("title"), Value::from("changed"));
        assert_eq!(dirty.get("views"), Value::Null);
    }

    #[test]
    fn clearing_the_snapshot_reverts_to_new() {
        let doc = doc! { "id" => 1, "title" => "hello" };
        let mut record = Record::from_document(post_model(), &doc, false).unwrap();
        record.clear_database_properties();
        assert!(record.is_new());
    }

    #[test]
    fn to_document_skips_excluded_and_reduces_relations() {
        let user_model = Arc::new(
            EntityModel::builder("user")
                .property(PropertyMeta::new("name", PropertyType::Str))
                .build()
                .unwrap(),
        );
        let mut author = Record::new(user_model);
        author.set_unchecked("id", 7).unwrap();
        author.set("name", "Ada").unwrap();

        let mut post = Record::new(post_model());
        post.set("title", "hello").unwrap();
        post.set("secret", "hidden").unwrap();
        post.set("author", Value::Record(author)).unwrap();

        let flat = post.to_document(false);
        assert!(!flat.contains("secret"));
        assert_eq!(flat.get("author"), Value::I64(7));
        assert_eq!(flat.get("views"), Value::I64(0));

        let deep = post.to_document(true);
        let nested = deep.get("author");
        let nested = nested.as_document().unwrap();
        assert_eq!(nested.get("name"), Value::from("Ada"));
    }
}
