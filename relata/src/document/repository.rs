use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::common::{Document, Value};
use crate::document::{
    DocumentCollection, DocumentStore, FindOptions, UpdateSpec,
};
use crate::errors::{ErrorKind, RelataError, RelataResult};
use crate::model::{EntityHooks, EntityModel, Junction, ModelRegistry, Record, RelationDef};
use crate::relational::UnlinkTarget;

/// Typed repository over one entity model on a document store.
///
/// The persistence contract mirrors the relational repository: loaded
/// records carry their storage snapshot, [DocRepository::save] writes
/// only the fields that changed (dropped fields become removals), and
/// the `*_by` operations in raw mode bypass records and hooks.
/// Identifiers are generated client-side when a new record has none.
///
/// Hooks come from the registry at construction time, keyed by the
/// model name, and can be overridden per repository with
/// [DocRepository::with_hooks].
#[derive(Clone)]
pub struct DocRepository {
    model: Arc<EntityModel>,
    registry: ModelRegistry,
    store: Arc<dyn DocumentStore>,
    collection: Arc<dyn DocumentCollection>,
    hooks: Arc<dyn EntityHooks>,
}

impl DocRepository {
    pub fn new(
        model: Arc<EntityModel>,
        registry: ModelRegistry,
        store: Arc<dyn DocumentStore>,
    ) -> RelataResult<Self> {
        let collection = store.collection(model.table())?;
        let hooks = registry.hooks_for(model.name());
        Ok(DocRepository {
            model,
            registry,
            store,
            collection,
            hooks,
        })
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn EntityHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn model(&self) -> &Arc<EntityModel> {
        &self.model
    }

    /// Builds a record from the given fields. With `is_new` false the
    /// record is treated as already persisted: its storage snapshot is
    /// seeded and the post-load hook runs.
    pub fn create(&self, data: &Document, is_new: bool) -> RelataResult<Record> {
        if is_new {
            Record::from_document(self.model.clone(), data, true)
        } else {
            self.hydrate(data)
        }
    }

    /// Hydrates a document set into persisted records, keyed by the
    /// stringified identifier. Documents sharing an identifier
    /// collapse to the last one.
    pub fn build(&self, documents: &[Document]) -> RelataResult<IndexMap<String, Record>> {
        let mut result = IndexMap::new();
        for document in documents {
            let record = self.hydrate(document)?;
            result.insert(record.identifier_value().render_key(), record);
        }
        Ok(result)
    }

    /// Finds every record matching the query, keyed by the
    /// stringified identifier.
    pub fn find(
        &self,
        query: &Document,
        options: &FindOptions,
    ) -> RelataResult<IndexMap<String, Record>> {
        let documents = self.collection.find(query, options)?;
        self.build(&documents)
    }

    pub fn find_all(&self, options: &FindOptions) -> RelataResult<IndexMap<String, Record>> {
        self.find(&Document::new(), options)
    }

    pub fn find_one(&self, query: &Document) -> RelataResult<Option<Record>> {
        match self.collection.find_one(query)? {
            Some(document) => Ok(Some(self.hydrate(&document)?)),
            None => Ok(None),
        }
    }

    pub fn find_by_id<T: Into<Value>>(&self, id: T) -> RelataResult<Option<Record>> {
        self.find_one(&self.identity_query_for(id.into())?)
    }

    pub fn count(&self, query: &Document) -> RelataResult<u64> {
        self.collection.count(query)
    }

    /// Persists the record: a full insert when it is new, otherwise a
    /// partial update writing changed fields and dropping cleared
    /// ones. A new record without an identifier gets a generated UUID.
    ///
    /// Returns false when the pre-save hook vetoed the operation.
    pub fn save(&self, record: &mut Record) -> RelataResult<bool> {
        self.ensure_model(record)?;
        let is_update = !record.is_new();
        if !self.hooks.pre_save(record, is_update)? {
            return Ok(false);
        }
        self.check_required(record)?;
        if !is_update {
            if self.model.is_auto_id() && record.identifier_value().is_null() {
                let id = uuid::Uuid::new_v4().to_string();
                record.set_unchecked(self.model.identifier(), id)?;
            }
            self.collection.insert(&record.column_values())?;
            record.capture_snapshot();
        } else {
            let dirty = record.dirty_columns();
            if !dirty.is_empty() {
                let spec = UpdateSpec::from_changes(&dirty)?;
                let query = self.identity_query(record)?;
                self.collection.update(&query, &spec, false)?;
                record.capture_snapshot();
            }
        }
        self.hooks.post_save(record, is_update)?;
        Ok(true)
    }

    /// Deletes the record's document and its junction documents.
    /// Afterwards the record reverts to new.
    ///
    /// Returns false for unsaved records and when the pre-remove hook
    /// vetoed the operation.
    pub fn remove(&self, record: &mut Record) -> RelataResult<bool> {
        self.ensure_model(record)?;
        if record.is_new() {
            return Ok(false);
        }
        if !self.hooks.pre_remove(record)? {
            return Ok(false);
        }
        let id = record.identifier_value();
        for (_, def) in self.model.relations() {
            if let Junction::Table(junction) = &def.junction {
                let junction_collection = self.store.collection(junction)?;
                let mut query = Document::new();
                query.put(&def.local_key, id.clone())?;
                junction_collection.delete(&query, true)?;
            }
        }
        self.collection.delete(&self.identity_query(record)?, false)?;
        record.clear_database_properties();
        self.hooks.post_remove(record)?;
        Ok(true)
    }

    /// Applies `changes` to every matching document. In raw mode this
    /// is a bulk partial update without loading records or running
    /// hooks; null values in `changes` drop the field. Otherwise each
    /// matching record is loaded, changed and saved individually, so
    /// hooks and property checks apply.
    pub fn update_by(
        &self,
        query: &Document,
        changes: &Document,
        raw: bool,
    ) -> RelataResult<u64> {
        if raw {
            let spec = UpdateSpec::from_changes(changes)?;
            if spec.is_empty() {
                return Ok(0);
            }
            return self.collection.update(query, &spec, true);
        }
        let mut records = self.find(query, &FindOptions::default())?;
        let mut touched = 0;
        for record in records.values_mut() {
            for (field, value) in changes.iter() {
                record.set(field, value.clone())?;
            }
            if self.save(record)? {
                touched += 1;
            }
        }
        Ok(touched)
    }

    /// Deletes every matching document. In raw mode this is a bulk
    /// delete without hooks or junction cleanup. Otherwise each
    /// matching record is removed through [DocRepository::remove],
    /// with hooks and junction cascades.
    pub fn remove_by(&self, query: &Document, raw: bool) -> RelataResult<u64> {
        if raw {
            return self.collection.delete(query, true);
        }
        let mut records = self.find(query, &FindOptions::default())?;
        let mut removed = 0;
        for record in records.values_mut() {
            if self.remove(record)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Adds `delta` to a numeric property of a persisted record with a
    /// partial update, keeping the storage snapshot in sync. A missing
    /// property starts at zero. Returns the new value.
    pub fn increment(&self, record: &mut Record, field: &str, delta: i64) -> RelataResult<i64> {
        self.ensure_model(record)?;
        if record.is_new() {
            log::error!(
                "cannot increment '{}' on an unsaved '{}' record",
                field,
                self.model.name()
            );
            return Err(RelataError::new(
                &format!(
                    "cannot increment '{}' on an unsaved '{}' record",
                    field,
                    self.model.name()
                ),
                ErrorKind::InvalidOperation,
            ));
        }
        let current = record.get(field)?.as_i64().unwrap_or(0);
        let next = current + delta;
        let mut spec = UpdateSpec::default();
        spec.set.put(field, next)?;
        self.collection
            .update(&self.identity_query(record)?, &spec, false)?;
        record.set_unchecked(field, next)?;
        record.set_database_property(field, next);
        Ok(next)
    }

    /// Distinct values of a field over the matching documents.
    pub fn distinct(&self, field: &str, query: &Document) -> RelataResult<Vec<Value>> {
        self.collection.distinct(field, query)
    }

    /// Runs a named database command against the backing store and
    /// returns its raw response.
    pub fn command(&self, command: &Document) -> RelataResult<Document> {
        self.store.command(command)
    }

    /// Groups documents server-side through the `group` command. `cmd`
    /// follows the command's wire shape (`key`, `cond`, `initial`,
    /// `$reduce`); the collection namespace is filled in when absent.
    /// The response comes back untouched.
    pub fn group(&self, cmd: &Document) -> RelataResult<Document> {
        let mut cmd = cmd.clone();
        if !cmd.contains("ns") {
            cmd.put("ns", self.model.table())?;
        }
        let mut command = Document::new();
        command.put("group", cmd)?;
        self.store.command(&command)
    }

    /// Server-side map/reduce with inline output. `map`, `reduce` and
    /// `finalize` are source strings handed to the backend verbatim;
    /// no client-side interpretation is attempted.
    pub fn map_reduce(
        &self,
        map: &str,
        reduce: &str,
        finalize: Option<&str>,
        query: &Document,
    ) -> RelataResult<Document> {
        let mut command = Document::new();
        command.put("mapReduce", self.model.table())?;
        command.put("map", map)?;
        command.put("reduce", reduce)?;
        if let Some(finalize) = finalize {
            command.put("finalize", finalize)?;
        }
        if !query.is_empty() {
            command.put("query", query.clone())?;
        }
        let mut out = Document::new();
        out.put("inline", 1)?;
        command.put("out", out)?;
        self.store.command(&command)
    }

    /// Loads the records a relation points at.
    pub fn load_related(
        &self,
        record: &Record,
        relation: &str,
        query: &Document,
        options: &FindOptions,
    ) -> RelataResult<Vec<Record>> {
        let (_, def, target, target_collection) = self.relation_parts(relation)?;
        match &def.junction {
            Junction::Embedded => {
                let ids = Self::embedded_ids(record, &def.local_key)?;
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let mut in_clause = Document::new();
                in_clause.put("$in", ids)?;
                let mut filter = query.clone();
                filter.put(target.identifier(), in_clause)?;
                let documents = target_collection.find(&filter, options)?;
                documents
                    .iter()
                    .map(|doc| Record::from_document(target.clone(), doc, false))
                    .collect()
            }
            Junction::Single | Junction::None => {
                let local = record.get(&def.local_key)?;
                if local.is_null() {
                    return Ok(Vec::new());
                }
                let mut filter = query.clone();
                filter.put(&def.foreign_key, local)?;
                let documents = target_collection.find(&filter, options)?;
                documents
                    .iter()
                    .map(|doc| Record::from_document(target.clone(), doc, false))
                    .collect()
            }
            Junction::Table(junction) => {
                let local = record.identifier_value();
                if local.is_null() {
                    return Ok(Vec::new());
                }
                let junction_collection = self.store.collection(junction)?;
                let mut junction_query = Document::new();
                junction_query.put(&def.local_key, local)?;
                let links = junction_collection.find(&junction_query, &FindOptions::default())?;
                let foreign_ids: Vec<Value> = links
                    .iter()
                    .map(|link| link.get(&def.foreign_key))
                    .filter(|id| !id.is_null())
                    .collect();
                if foreign_ids.is_empty() {
                    return Ok(Vec::new());
                }
                let mut filter = query.clone();
                let mut in_clause = Document::new();
                in_clause.put("$in", foreign_ids)?;
                filter.put(target.identifier(), in_clause)?;
                let documents = target_collection.find(&filter, options)?;
                documents
                    .iter()
                    .map(|doc| Record::from_document(target.clone(), doc, false))
                    .collect()
            }
        }
    }

    /// Counts the records a relation points at. With `save_as` the
    /// count is also stored on the record under that property, which
    /// the model must declare as transient.
    pub fn count_related(
        &self,
        record: &mut Record,
        relation: &str,
        save_as: Option<&str>,
    ) -> RelataResult<u64> {
        let (_, def, _, target_collection) = self.relation_parts(relation)?;
        let count = match &def.junction {
            Junction::Embedded => Self::embedded_ids(record, &def.local_key)?.len() as u64,
            Junction::Single | Junction::None => {
                let local = record.get(&def.local_key)?;
                if local.is_null() {
                    0
                } else {
                    let mut query = Document::new();
                    query.put(&def.foreign_key, local)?;
                    target_collection.count(&query)?
                }
            }
            Junction::Table(junction) => {
                let local = record.identifier_value();
                if local.is_null() {
                    0
                } else {
                    let junction_collection = self.store.collection(junction)?;
                    let mut query = Document::new();
                    query.put(&def.local_key, local)?;
                    junction_collection.count(&query)?
                }
            }
        };
        if let Some(property) = save_as {
            record.set_unchecked(property, count as i64)?;
        }
        Ok(count)
    }

    /// Connects `related` to the record through the relation: sets the
    /// foreign key for single and one-to-many relations, inserts a
    /// junction document for many-to-many ones unless that pair
    /// already exists, appends to the embedded id array for embedded
    /// ones. Unsaved sides are saved first.
    pub fn link_related(
        &self,
        record: &mut Record,
        relation: &str,
        related: &mut Record,
    ) -> RelataResult<()> {
        let (prop, _, target, _) = self.relation_parts(relation)?;
        if record.is_new() && !self.save(record)? {
            return Err(self.link_error(&prop, "the record could not be saved"));
        }
        if related.is_new() {
            let repository =
                DocRepository::new(target, self.registry.clone(), self.store.clone())?;
            if !repository.save(related)? {
                return Err(self.link_error(&prop, "the related record could not be saved"));
            }
        }
        self.link_related_id(record, relation, related.identifier_value())
    }

    /// Like [DocRepository::link_related] for a related document known
    /// only by identifier. Never saves anything first.
    pub fn link_related_id(
        &self,
        record: &mut Record,
        relation: &str,
        related_id: Value,
    ) -> RelataResult<()> {
        let (prop, def, target, target_collection) = self.relation_parts(relation)?;
        if related_id.is_null() {
            return Err(self.link_error(&prop, "the related record has no identifier"));
        }
        if record.is_new() {
            return Err(self.link_error(&prop, "the record is not persisted"));
        }
        match &def.junction {
            Junction::Single => {
                let mut spec = UpdateSpec::default();
                spec.set.put(&def.local_key, related_id.clone())?;
                self.collection
                    .update(&self.identity_query(record)?, &spec, false)?;
                record.set_unchecked(&def.local_key, related_id.clone())?;
                record.set_database_property(&def.local_key, related_id);
            }
            Junction::None => {
                let local = record.get(&def.local_key)?;
                let mut spec = UpdateSpec::default();
                spec.set.put(&def.foreign_key, local)?;
                let mut query = Document::new();
                query.put(target.identifier(), related_id)?;
                target_collection.update(&query, &spec, false)?;
            }
            Junction::Table(junction) => {
                let junction_collection = self.store.collection(junction)?;
                let mut pair = Document::new();
                pair.put(&def.local_key, record.identifier_value())?;
                pair.put(&def.foreign_key, related_id)?;
                if junction_collection.count(&pair)? == 0 {
                    junction_collection.insert(&pair)?;
                }
            }
            Junction::Embedded => {
                let mut ids = Self::embedded_ids(record, &def.local_key)?;
                if !ids.contains(&related_id) {
                    ids.push(related_id);
                    let mut spec = UpdateSpec::default();
                    spec.set.put(&def.local_key, ids.clone())?;
                    self.collection
                        .update(&self.identity_query(record)?, &spec, false)?;
                    record.set_unchecked(&def.local_key, ids.clone())?;
                    record.set_database_property(&def.local_key, ids);
                }
            }
        }
        Ok(())
    }

    /// Disconnects one or all related records from the record. With
    /// `delete` the related documents themselves are deleted instead
    /// of merely detached.
    pub fn unlink_related(
        &self,
        record: &mut Record,
        relation: &str,
        target_spec: UnlinkTarget,
        delete: bool,
    ) -> RelataResult<()> {
        let (prop, def, target, target_collection) = self.relation_parts(relation)?;
        if record.is_new() {
            return Err(self.link_error(&prop, "the record is not persisted"));
        }
        match &def.junction {
            Junction::Single => {
                let old = record.get(&def.local_key)?;
                let spec = UpdateSpec {
                    set: Document::new(),
                    unset: vec![def.local_key.clone()],
                };
                self.collection
                    .update(&self.identity_query(record)?, &spec, false)?;
                record.set_unchecked(&def.local_key, Value::Null)?;
                record.set_database_property(&def.local_key, Value::Null);
                if delete && !old.is_null() {
                    let mut query = Document::new();
                    query.put(target.identifier(), old)?;
                    target_collection.delete(&query, false)?;
                }
            }
            Junction::None => {
                let local = record.get(&def.local_key)?;
                let mut query = Document::new();
                query.put(&def.foreign_key, local)?;
                if let UnlinkTarget::Id(id) = &target_spec {
                    query.put(target.identifier(), id.clone())?;
                }
                if delete {
                    target_collection.delete(&query, true)?;
                } else {
                    let spec = UpdateSpec {
                        set: Document::new(),
                        unset: vec![def.foreign_key.clone()],
                    };
                    target_collection.update(&query, &spec, true)?;
                }
            }
            Junction::Table(junction) => {
                let junction_collection = self.store.collection(junction)?;
                let mut query = Document::new();
                query.put(&def.local_key, record.identifier_value())?;
                if let UnlinkTarget::Id(id) = &target_spec {
                    query.put(&def.foreign_key, id.clone())?;
                }
                let dropped: Vec<Value> = if delete {
                    junction_collection
                        .find(&query, &FindOptions::default())?
                        .iter()
                        .map(|link| link.get(&def.foreign_key))
                        .filter(|id| !id.is_null())
                        .collect()
                } else {
                    Vec::new()
                };
                junction_collection.delete(&query, true)?;
                if !dropped.is_empty() {
                    let mut in_clause = Document::new();
                    in_clause.put("$in", dropped)?;
                    let mut filter = Document::new();
                    filter.put(target.identifier(), in_clause)?;
                    target_collection.delete(&filter, true)?;
                }
            }
            Junction::Embedded => {
                let ids = Self::embedded_ids(record, &def.local_key)?;
                let (kept, dropped): (Vec<Value>, Vec<Value>) = match &target_spec {
                    UnlinkTarget::Id(id) => ids.into_iter().partition(|v| v != id),
                    UnlinkTarget::All => (Vec::new(), ids),
                };
                let mut spec = UpdateSpec::default();
                spec.set.put(&def.local_key, kept.clone())?;
                self.collection
                    .update(&self.identity_query(record)?, &spec, false)?;
                record.set_unchecked(&def.local_key, kept.clone())?;
                record.set_database_property(&def.local_key, kept);
                if delete && !dropped.is_empty() {
                    let mut in_clause = Document::new();
                    in_clause.put("$in", dropped)?;
                    let mut filter = Document::new();
                    filter.put(target.identifier(), in_clause)?;
                    target_collection.delete(&filter, true)?;
                }
            }
        }
        Ok(())
    }

    /// Finds matching records with the named relations resolved, one
    /// extra query per relation (two for junction relations). The
    /// result is keyed by the stringified identifier.
    pub fn find_with_relations(
        &self,
        query: &Document,
        relations: &[&str],
        options: &FindOptions,
    ) -> RelataResult<IndexMap<String, Record>> {
        let mut result = self.find(query, options)?;
        if result.is_empty() {
            return Ok(result);
        }
        for relation in relations {
            self.resolve_relation(&mut result, relation)?;
        }
        Ok(result)
    }

    fn resolve_relation(
        &self,
        result: &mut IndexMap<String, Record>,
        relation: &str,
    ) -> RelataResult<()> {
        let (prop, def, target, target_collection) = self.relation_parts(relation)?;
        match &def.junction {
            Junction::Single | Junction::None => {
                let mut roots: IndexMap<String, Vec<String>> = IndexMap::new();
                let mut keys = Vec::new();
                for (key, record) in result.iter() {
                    let value = record.get(&def.local_key)?;
                    if value.is_null() {
                        continue;
                    }
                    let rendered = value.render_key();
                    if !roots.contains_key(&rendered) {
                        keys.push(value);
                    }
                    roots.entry(rendered).or_default().push(key.clone());
                }
                if keys.is_empty() {
                    return Ok(());
                }
                let mut in_clause = Document::new();
                in_clause.put("$in", keys)?;
                let mut filter = Document::new();
                filter.put(&def.foreign_key, in_clause)?;
                for doc in target_collection.find(&filter, &FindOptions::default())? {
                    let related = Record::from_document(target.clone(), &doc, false)?;
                    let link = doc.get(&def.foreign_key).render_key();
                    if let Some(root_keys) = roots.get(&link) {
                        for root_key in root_keys {
                            if let Some(root) = result.get_mut(root_key) {
                                if def.is_single() {
                                    root.set_unchecked(&prop, Value::Record(related.clone()))?;
                                } else {
                                    root.add(&prop, Value::Record(related.clone()))?;
                                }
                            }
                        }
                    }
                }
            }
            Junction::Table(junction) => {
                let ids: Vec<Value> = result
                    .values()
                    .map(Record::identifier_value)
                    .filter(|id| !id.is_null())
                    .collect();
                if ids.is_empty() {
                    return Ok(());
                }
                let junction_collection = self.store.collection(junction)?;
                let mut in_clause = Document::new();
                in_clause.put("$in", ids)?;
                let mut junction_query = Document::new();
                junction_query.put(&def.local_key, in_clause)?;
                let links = junction_collection.find(&junction_query, &FindOptions::default())?;
                let foreign_ids: Vec<Value> = links
                    .iter()
                    .map(|link| link.get(&def.foreign_key))
                    .filter(|id| !id.is_null())
                    .collect();
                if foreign_ids.is_empty() {
                    return Ok(());
                }
                let mut in_clause = Document::new();
                in_clause.put("$in", foreign_ids)?;
                let mut filter = Document::new();
                filter.put(target.identifier(), in_clause)?;
                let mut related_by_id: IndexMap<String, Record> = IndexMap::new();
                for doc in target_collection.find(&filter, &FindOptions::default())? {
                    let related = Record::from_document(target.clone(), &doc, false)?;
                    related_by_id.insert(doc.get(target.identifier()).render_key(), related);
                }
                for link in links {
                    let root_key = link.get(&def.local_key).render_key();
                    let related_key = link.get(&def.foreign_key).render_key();
                    if let (Some(root), Some(related)) =
                        (result.get_mut(&root_key), related_by_id.get(&related_key))
                    {
                        root.add(&prop, Value::Record(related.clone()))?;
                    }
                }
            }
            Junction::Embedded => {
                let mut seen = HashSet::new();
                let mut wanted = Vec::new();
                for record in result.values() {
                    for id in Self::embedded_ids(record, &def.local_key)? {
                        if seen.insert(id.render_key()) {
                            wanted.push(id);
                        }
                    }
                }
                if wanted.is_empty() {
                    return Ok(());
                }
                let mut in_clause = Document::new();
                in_clause.put("$in", wanted)?;
                let mut filter = Document::new();
                filter.put(target.identifier(), in_clause)?;
                let mut related_by_id: IndexMap<String, Record> = IndexMap::new();
                for doc in target_collection.find(&filter, &FindOptions::default())? {
                    let related = Record::from_document(target.clone(), &doc, false)?;
                    related_by_id.insert(doc.get(target.identifier()).render_key(), related);
                }
                for root in result.values_mut() {
                    let ids = Self::embedded_ids(root, &def.local_key)?;
                    for id in ids {
                        if let Some(related) = related_by_id.get(&id.render_key()) {
                            root.add(&prop, Value::Record(related.clone()))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// The identifiers held by an embedded relation's id array. A null
    /// field yields no ids, a scalar counts as a one-element array.
    fn embedded_ids(record: &Record, field: &str) -> RelataResult<Vec<Value>> {
        Ok(match record.get(field)? {
            Value::Array(ids) => ids.into_iter().filter(|id| !id.is_null()).collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        })
    }

    fn hydrate(&self, document: &Document) -> RelataResult<Record> {
        let mut record = Record::from_document(self.model.clone(), document, false)?;
        self.hooks.post_load(&mut record)?;
        Ok(record)
    }

    fn ensure_model(&self, record: &Record) -> RelataResult<()> {
        if record.model().name() != self.model.name() {
            log::error!(
                "record of entity '{}' passed to the '{}' repository",
                record.model().name(),
                self.model.name()
            );
            return Err(RelataError::new(
                &format!(
                    "record of entity '{}' passed to the '{}' repository",
                    record.model().name(),
                    self.model.name()
                ),
                ErrorKind::InvalidEntityClass,
            ));
        }
        Ok(())
    }

    fn check_required(&self, record: &Record) -> RelataResult<()> {
        for meta in self.model.properties() {
            if meta.is_required() && record.get(meta.name())?.is_empty() {
                log::error!(
                    "required property '{}' of entity '{}' is empty",
                    meta.name(),
                    self.model.name()
                );
                return Err(RelataError::new(
                    &format!(
                        "required property '{}' of entity '{}' is empty",
                        meta.name(),
                        self.model.name()
                    ),
                    ErrorKind::RequiredProperty,
                ));
            }
        }
        Ok(())
    }

    fn identity_query(&self, record: &Record) -> RelataResult<Document> {
        let id = record.identifier_value();
        if id.is_null() {
            log::error!(
                "persisted '{}' record has no identifier",
                self.model.name()
            );
            return Err(RelataError::new(
                &format!("persisted '{}' record has no identifier", self.model.name()),
                ErrorKind::InvalidOperation,
            ));
        }
        self.identity_query_for(id)
    }

    fn identity_query_for(&self, id: Value) -> RelataResult<Document> {
        let mut query = Document::new();
        query.put(self.model.identifier(), id)?;
        Ok(query)
    }

    fn relation_parts(
        &self,
        name: &str,
    ) -> RelataResult<(String, RelationDef, Arc<EntityModel>, Arc<dyn DocumentCollection>)> {
        let resolved = self.model.resolve(name).to_string();
        let def = self.model.relation(&resolved)?.clone();
        let target = self.registry.get(&def.target)?;
        let collection = self.store.collection(target.table())?;
        Ok((resolved, def, target, collection))
    }

    fn link_error(&self, relation: &str, reason: &str) -> RelataError {
        log::error!(
            "cannot link relation '{}' of entity '{}': {}",
            relation,
            self.model.name(),
            reason
        );
        RelataError::new(
            &format!(
                "cannot link relation '{}' of entity '{}': {}",
                relation,
                self.model.name(),
                reason
            ),
            ErrorKind::InvalidOperation,
        )
    }
}
