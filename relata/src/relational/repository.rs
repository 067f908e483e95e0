use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::common::{Document, Value};
use crate::errors::{ErrorKind, RelataError, RelataResult};
use crate::model::{EntityHooks, EntityModel, Junction, ModelRegistry, Record, RelationDef};
use crate::relational::{
    delete_sql, insert_sql, update_sql, with_transaction, Condition, Conditions, QueryOptions,
    SelectQuery, SqlDriver,
};

/// A computed pseudo-property filled from a `GROUP BY` aggregate, for
/// example a comment count per post. The root model must declare the
/// property as transient.
#[derive(Clone, Debug)]
pub struct Aggregate {
    /// Transient property on the root model that receives the result.
    pub property: String,
    /// Table the aggregate runs over.
    pub table: String,
    /// Column of `table` referencing the root identifier.
    pub foreign_key: String,
    /// Aggregate expression, for example `COUNT(*)` or `MAX(created)`.
    pub expression: String,
}

impl Aggregate {
    pub fn new(property: &str, table: &str, foreign_key: &str, expression: &str) -> Self {
        Aggregate {
            property: property.to_string(),
            table: table.to_string(),
            foreign_key: foreign_key.to_string(),
            expression: expression.to_string(),
        }
    }
}

/// Typed repository over one entity model on a relational connection.
///
/// All storage access of an entity goes through its repository: the
/// loaders hydrate [Record]s with their storage snapshot in place, and
/// [SqlRepository::save] / [SqlRepository::remove] run the lifecycle
/// hooks around the minimal write derived from that snapshot. The
/// `*_by` operations in raw mode bypass records and hooks entirely
/// and are the bulk escape hatch.
///
/// Hooks come from the registry at construction time, keyed by the
/// model name, and can be overridden per repository with
/// [SqlRepository::with_hooks].
#[derive(Clone)]
pub struct SqlRepository {
    model: Arc<EntityModel>,
    registry: ModelRegistry,
    driver: Arc<dyn SqlDriver>,
    hooks: Arc<dyn EntityHooks>,
}

impl SqlRepository {
    pub fn new(
        model: Arc<EntityModel>,
        registry: ModelRegistry,
        driver: Arc<dyn SqlDriver>,
    ) -> Self {
        let hooks = registry.hooks_for(model.name());
        SqlRepository {
            model,
            registry,
            driver,
            hooks,
        }
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

    /// Hydrates a row set into persisted records, keyed by the
    /// stringified identifier. Rows sharing an identifier collapse to
    /// the last one.
    pub fn build(&self, rows: &[Document]) -> RelataResult<IndexMap<String, Record>> {
        let mut result = IndexMap::new();
        for row in rows {
            let record = self.hydrate(row)?;
            result.insert(record.identifier_value().render_key(), record);
        }
        Ok(result)
    }

    /// Loads every record matching the conditions, keyed by the
    /// stringified identifier.
    pub fn load(
        &self,
        conditions: &Conditions,
        options: &QueryOptions,
    ) -> RelataResult<IndexMap<String, Record>> {
        let columns = self.model.columns().join(", ");
        let (sql, params) = SelectQuery::new(&columns, self.model.table())
            .conditions(conditions.clone())
            .options(options)
            .build();
        let rows = self.driver.query(&sql, &params)?;
        self.build(&rows)
    }

    pub fn load_one(&self, conditions: &Conditions) -> RelataResult<Option<Record>> {
        let options = QueryOptions {
            limit: Some(1),
            ..Default::default()
        };
        let mut records = self.load(conditions, &options)?;
        Ok(records.shift_remove_index(0).map(|(_, record)| record))
    }

    pub fn load_by_id<T: Into<Value>>(&self, id: T) -> RelataResult<Option<Record>> {
        self.load_one(&Conditions::from(Condition::eq(
            self.model.identifier(),
            id.into(),
        )))
    }

    pub fn count(&self, conditions: &Conditions) -> RelataResult<u64> {
        let (sql, params) = SelectQuery::new("COUNT(*)", self.model.table())
            .conditions(conditions.clone())
            .build();
        let values = self.driver.query_column(&sql, &params)?;
        Ok(values
            .first()
            .and_then(Value::as_i64)
            .map(|n| n.max(0) as u64)
            .unwrap_or(0))
    }

    /// Persists the record: an INSERT of the set columns when the
    /// record is new, otherwise an UPDATE of the columns that changed
    /// since it was loaded. A clean persisted record issues no write.
    ///
    /// Returns false when the pre-save hook vetoed the operation, or
    /// when an UPDATE matched no row because the record vanished from
    /// storage in the meantime.
    pub fn save(&self, record: &mut Record) -> RelataResult<bool> {
        self.ensure_model(record)?;
        let is_update = !record.is_new();
        if !self.hooks.pre_save(record, is_update)? {
            return Ok(false);
        }
        self.check_required(record)?;
        if !is_update {
            self.insert(record)?;
        } else {
            let dirty = record.dirty_columns();
            if !dirty.is_empty() {
                let conditions = self.identity_conditions(record)?;
                let (sql, params) = update_sql(self.model.table(), &dirty, &conditions);
                if self.driver.execute(&sql, &params)? == 0 {
                    return Ok(false);
                }
                record.capture_snapshot();
            }
        }
        self.hooks.post_save(record, is_update)?;
        Ok(true)
    }

    fn insert(&self, record: &mut Record) -> RelataResult<()> {
        let values = record.column_values();
        if values.is_empty() {
            log::error!(
                "cannot insert an empty '{}' record",
                self.model.name()
            );
            return Err(RelataError::new(
                &format!("cannot insert an empty '{}' record", self.model.name()),
                ErrorKind::InvalidOperation,
            ));
        }
        let (sql, params) = insert_sql(self.model.table(), &values);
        self.driver.execute(&sql, &params)?;
        if self.model.is_auto_id() && record.identifier_value().is_null() {
            let id = self.driver.last_insert_id()?;
            if !id.is_null() {
                record.set_unchecked(self.model.identifier(), id)?;
            }
        }
        record.capture_snapshot();
        Ok(())
    }

    /// Deletes the record, first clearing its junction table rows.
    /// Both deletes run in one transaction. Afterwards the record
    /// reverts to new and can be saved again.
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
        with_transaction(self.driver.as_ref(), || {
            for (_, def) in self.model.relations() {
                if let Junction::Table(junction) = &def.junction {
                    let conditions =
                        Conditions::from(Condition::Eq(def.local_key.clone(), id.clone()));
                    let (sql, params) = delete_sql(junction, &conditions);
                    self.driver.execute(&sql, &params)?;
                }
            }
            let conditions = self.identity_conditions(record)?;
            let (sql, params) = delete_sql(self.model.table(), &conditions);
            self.driver.execute(&sql, &params)?;
            Ok(())
        })?;
        record.clear_database_properties();
        self.hooks.post_remove(record)?;
        Ok(true)
    }

    /// Applies `changes` to every matching row. In raw mode this is a
    /// single UPDATE without loading records or running hooks.
    /// Otherwise each matching record is loaded, changed and saved
    /// individually, so hooks and property checks apply. Returns the
    /// number of affected rows.
    pub fn update_by(
        &self,
        conditions: &Conditions,
        changes: &Document,
        raw: bool,
    ) -> RelataResult<u64> {
        if changes.is_empty() {
            return Ok(0);
        }
        if raw {
            let (sql, params) = update_sql(self.model.table(), changes, conditions);
            return self.driver.execute(&sql, &params);
        }
        let mut records = self.load(conditions, &QueryOptions::default())?;
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

    /// Deletes every matching row. In raw mode this is a single DELETE
    /// without hooks or junction cleanup. Otherwise each matching
    /// record is removed through [SqlRepository::remove], with hooks
    /// and junction cascades.
    pub fn remove_by(&self, conditions: &Conditions, raw: bool) -> RelataResult<u64> {
        if raw {
            let (sql, params) = delete_sql(self.model.table(), conditions);
            return self.driver.execute(&sql, &params);
        }
        let mut records = self.load(conditions, &QueryOptions::default())?;
        let mut removed = 0;
        for record in records.values_mut() {
            if self.remove(record)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Deletes junction rows whose owning record no longer exists, for
    /// every junction relation of the model. Returns the number of
    /// rows removed.
    pub fn clean_ref_tables(&self) -> RelataResult<u64> {
        let mut removed = 0;
        for (_, def) in self.model.relations() {
            let junction = match &def.junction {
                Junction::Table(junction) => junction,
                _ => continue,
            };
            let (sql, params) = SelectQuery::new(
                &format!("{}.{}", junction, def.local_key),
                junction,
            )
            .join(&format!(
                "LEFT JOIN {} o ON o.{} = {}.{}",
                self.model.table(),
                self.model.identifier(),
                junction,
                def.local_key
            ))
            .conditions(Conditions::from(Condition::raw(&format!(
                "o.{} IS NULL",
                self.model.identifier()
            ))))
            .build();
            let mut seen = HashSet::new();
            let orphans = self
                .driver
                .query_column(&sql, &params)?
                .into_iter()
                .filter(|id| !id.is_null() && seen.insert(id.render_key()))
                .collect::<Vec<_>>();
            if orphans.is_empty() {
                continue;
            }
            let (sql, params) = delete_sql(
                junction,
                &Conditions::from(Condition::InList(def.local_key.clone(), orphans)),
            );
            removed += self.driver.execute(&sql, &params)?;
        }
        Ok(removed)
    }

    /// Loads the records a relation points at. Extra conditions are
    /// rendered against the target table (alias `b` for junction
    /// relations).
    pub fn load_related(
        &self,
        record: &Record,
        relation: &str,
        conditions: &Conditions,
        options: &QueryOptions,
    ) -> RelataResult<Vec<Record>> {
        let (prop, def, target) = self.relation_parts(relation)?;
        match &def.junction {
            Junction::Single | Junction::None => {
                let local = self.local_value(record, &def)?;
                if local.is_null() {
                    return Ok(Vec::new());
                }
                let mut filter = Conditions::from(Condition::Eq(def.foreign_key.clone(), local));
                filter.extend(conditions.clone());
                let columns = target.columns().join(", ");
                let (sql, params) = SelectQuery::new(&columns, target.table())
                    .conditions(filter)
                    .options(options)
                    .build();
                let rows = self.driver.query(&sql, &params)?;
                rows.iter()
                    .map(|row| Record::from_document(target.clone(), row, false))
                    .collect()
            }
            Junction::Table(junction) => {
                let local = record.identifier_value();
                if local.is_null() {
                    return Ok(Vec::new());
                }
                let columns = target
                    .columns()
                    .iter()
                    .map(|c| format!("b.{}", c))
                    .join(", ");
                let mut filter = Conditions::from(Condition::Eq(
                    format!("{}.{}", junction, def.local_key),
                    local,
                ));
                filter.extend(conditions.clone());
                let (sql, params) = SelectQuery::new(&columns, junction)
                    .join(&format!(
                        "INNER JOIN {} b ON b.{} = {}.{}",
                        target.table(),
                        target.identifier(),
                        junction,
                        def.foreign_key
                    ))
                    .conditions(filter)
                    .options(options)
                    .build();
                let rows = self.driver.query(&sql, &params)?;
                rows.iter()
                    .map(|row| Record::from_document(target.clone(), row, false))
                    .collect()
            }
            Junction::Embedded => Err(self.embedded_unsupported(&prop)),
        }
    }

    pub fn load_related_one(
        &self,
        record: &Record,
        relation: &str,
    ) -> RelataResult<Option<Record>> {
        let options = QueryOptions {
            limit: Some(1),
            ..Default::default()
        };
        Ok(self
            .load_related(record, relation, &Conditions::new(), &options)?
            .into_iter()
            .next())
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
        let (prop, def, target) = self.relation_parts(relation)?;
        let (sql, params) = match &def.junction {
            Junction::Single | Junction::None => {
                let local = self.local_value(record, &def)?;
                if local.is_null() {
                    return Ok(0);
                }
                SelectQuery::new("COUNT(*)", target.table())
                    .conditions(Conditions::from(Condition::Eq(
                        def.foreign_key.clone(),
                        local,
                    )))
                    .build()
            }
            Junction::Table(junction) => {
                let local = record.identifier_value();
                if local.is_null() {
                    return Ok(0);
                }
                SelectQuery::new("COUNT(*)", junction)
                    .conditions(Conditions::from(Condition::Eq(
                        def.local_key.clone(),
                        local,
                    )))
                    .build()
            }
            Junction::Embedded => return Err(self.embedded_unsupported(&prop)),
        };
        let values = self.driver.query_column(&sql, &params)?;
        let count = values
            .first()
            .and_then(Value::as_i64)
            .map(|n| n.max(0) as u64)
            .unwrap_or(0);
        if let Some(property) = save_as {
            record.set_unchecked(property, count as i64)?;
        }
        Ok(count)
    }

    /// Connects `related` to the record through the relation: sets the
    /// foreign key for single and one-to-many relations, inserts a
    /// junction row for many-to-many ones unless that pair already
    /// exists. Unsaved sides are saved first.
    pub fn link_related(
        &self,
        record: &mut Record,
        relation: &str,
        related: &mut Record,
    ) -> RelataResult<()> {
        let (prop, _, target) = self.relation_parts(relation)?;
        if record.is_new() && !self.save(record)? {
            return Err(self.link_error(&prop, "the record could not be saved"));
        }
        if related.is_new() {
            let repository =
                SqlRepository::new(target, self.registry.clone(), self.driver.clone());
            if !repository.save(related)? {
                return Err(self.link_error(&prop, "the related record could not be saved"));
            }
        }
        self.link_related_id(record, relation, related.identifier_value())
    }

    /// Like [SqlRepository::link_related] for a related row known only
    /// by identifier. Never saves anything first.
    pub fn link_related_id(
        &self,
        record: &mut Record,
        relation: &str,
        related_id: Value,
    ) -> RelataResult<()> {
        let (prop, def, target) = self.relation_parts(relation)?;
        if related_id.is_null() {
            return Err(self.link_error(&prop, "the related record has no identifier"));
        }
        if record.is_new() {
            return Err(self.link_error(&prop, "the record is not persisted"));
        }
        match &def.junction {
            Junction::Single => {
                let mut changes = Document::new();
                changes.put(&def.local_key, related_id.clone())?;
                let conditions = self.identity_conditions(record)?;
                let (sql, params) = update_sql(self.model.table(), &changes, &conditions);
                self.driver.execute(&sql, &params)?;
                record.set_unchecked(&def.local_key, related_id.clone())?;
                record.set_database_property(&def.local_key, related_id);
            }
            Junction::None => {
                let local = self.local_value(record, &def)?;
                let mut changes = Document::new();
                changes.put(&def.foreign_key, local)?;
                let conditions = Conditions::from(Condition::Eq(
                    target.identifier().to_string(),
                    related_id,
                ));
                let (sql, params) = update_sql(target.table(), &changes, &conditions);
                self.driver.execute(&sql, &params)?;
            }
            Junction::Table(junction) => {
                let pair = Conditions::from(Condition::Eq(
                    def.local_key.clone(),
                    record.identifier_value(),
                ))
                .and(Condition::Eq(def.foreign_key.clone(), related_id.clone()));
                let (sql, params) = SelectQuery::new("COUNT(*)", junction)
                    .conditions(pair)
                    .build();
                let existing = self
                    .driver
                    .query_column(&sql, &params)?
                    .first()
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                if existing == 0 {
                    let mut row = Document::new();
                    row.put(&def.local_key, record.identifier_value())?;
                    row.put(&def.foreign_key, related_id)?;
                    let (sql, params) = insert_sql(junction, &row);
                    self.driver.execute(&sql, &params)?;
                }
            }
            Junction::Embedded => return Err(self.embedded_unsupported(&prop)),
        }
        Ok(())
    }

    /// Disconnects one or all related records from the record. With
    /// `delete` the related rows themselves are deleted instead of
    /// merely detached.
    pub fn unlink_related(
        &self,
        record: &mut Record,
        relation: &str,
        target_spec: UnlinkTarget,
        delete: bool,
    ) -> RelataResult<()> {
        let (prop, def, target) = self.relation_parts(relation)?;
        if record.is_new() {
            return Err(self.link_error(&prop, "the record is not persisted"));
        }
        match &def.junction {
            Junction::Single => {
                let old = self.local_value(record, &def)?;
                let mut changes = Document::new();
                changes.put(&def.local_key, Value::Null)?;
                let conditions = self.identity_conditions(record)?;
                let (sql, params) = update_sql(self.model.table(), &changes, &conditions);
                self.driver.execute(&sql, &params)?;
                record.set_unchecked(&def.local_key, Value::Null)?;
                record.set_database_property(&def.local_key, Value::Null);
                if delete && !old.is_null() {
                    let conditions =
                        Conditions::from(Condition::Eq(target.identifier().to_string(), old));
                    let (sql, params) = delete_sql(target.table(), &conditions);
                    self.driver.execute(&sql, &params)?;
                }
            }
            Junction::None => {
                let local = self.local_value(record, &def)?;
                let mut conditions =
                    Conditions::from(Condition::Eq(def.foreign_key.clone(), local));
                if let UnlinkTarget::Id(id) = &target_spec {
                    conditions.push(Condition::Eq(target.identifier().to_string(), id.clone()));
                }
                if delete {
                    let (sql, params) = delete_sql(target.table(), &conditions);
                    self.driver.execute(&sql, &params)?;
                } else {
                    let mut changes = Document::new();
                    changes.put(&def.foreign_key, Value::Null)?;
                    let (sql, params) = update_sql(target.table(), &changes, &conditions);
                    self.driver.execute(&sql, &params)?;
                }
            }
            Junction::Table(junction) => {
                let related_ids = if delete {
                    match &target_spec {
                        UnlinkTarget::Id(id) => vec![id.clone()],
                        UnlinkTarget::All => {
                            let (sql, params) = SelectQuery::new(&def.foreign_key, junction)
                                .conditions(Conditions::from(Condition::Eq(
                                    def.local_key.clone(),
                                    record.identifier_value(),
                                )))
                                .build();
                            self.driver.query_column(&sql, &params)?
                        }
                    }
                } else {
                    Vec::new()
                };
                let mut conditions = Conditions::from(Condition::Eq(
                    def.local_key.clone(),
                    record.identifier_value(),
                ));
                if let UnlinkTarget::Id(id) = &target_spec {
                    conditions.push(Condition::Eq(def.foreign_key.clone(), id.clone()));
                }
                let (sql, params) = delete_sql(junction, &conditions);
                self.driver.execute(&sql, &params)?;
                if !related_ids.is_empty() {
                    let conditions = Conditions::from(Condition::InList(
                        target.identifier().to_string(),
                        related_ids,
                    ));
                    let (sql, params) = delete_sql(target.table(), &conditions);
                    self.driver.execute(&sql, &params)?;
                }
            }
            Junction::Embedded => return Err(self.embedded_unsupported(&prop)),
        }
        Ok(())
    }

    /// Loads matching records with the named relations and aggregates
    /// resolved, one query per relation. The result is keyed by the
    /// stringified identifier; records sharing an identifier collapse
    /// to the last one.
    pub fn load_with_relations(
        &self,
        conditions: &Conditions,
        relations: &[&str],
        aggregates: &[Aggregate],
        options: &QueryOptions,
    ) -> RelataResult<IndexMap<String, Record>> {
        let mut result = self.load(conditions, options)?;
        if result.is_empty() {
            return Ok(result);
        }
        for relation in relations {
            self.resolve_relation(&mut result, relation)?;
        }
        for aggregate in aggregates {
            self.resolve_aggregate(&mut result, aggregate)?;
        }
        Ok(result)
    }

    fn resolve_relation(
        &self,
        result: &mut IndexMap<String, Record>,
        relation: &str,
    ) -> RelataResult<()> {
        let (prop, def, target) = self.relation_parts(relation)?;
        match &def.junction {
            Junction::Single => {
                let (roots, keys) = Self::roots_by_column(result, &def.local_key)?;
                if roots.is_empty() {
                    return Ok(());
                }
                let columns = target.columns().join(", ");
                let (sql, params) = SelectQuery::new(&columns, target.table())
                    .conditions(Conditions::from(Condition::InList(
                        def.foreign_key.clone(),
                        keys,
                    )))
                    .build();
                for row in self.driver.query(&sql, &params)? {
                    let related = Record::from_document(target.clone(), &row, false)?;
                    let link = row.get(&def.foreign_key).render_key();
                    if let Some(root_keys) = roots.get(&link) {
                        for root_key in root_keys {
                            if let Some(root) = result.get_mut(root_key) {
                                root.set_unchecked(&prop, Value::Record(related.clone()))?;
                            }
                        }
                    }
                }
            }
            Junction::None => {
                let (roots, keys) = Self::roots_by_column(result, &def.local_key)?;
                if roots.is_empty() {
                    return Ok(());
                }
                let columns = target.columns().join(", ");
                let (sql, params) = SelectQuery::new(&columns, target.table())
                    .conditions(Conditions::from(Condition::InList(
                        def.foreign_key.clone(),
                        keys,
                    )))
                    .build();
                for row in self.driver.query(&sql, &params)? {
                    let related = Record::from_document(target.clone(), &row, false)?;
                    let link = row.get(&def.foreign_key).render_key();
                    if let Some(root_keys) = roots.get(&link) {
                        for root_key in root_keys {
                            if let Some(root) = result.get_mut(root_key) {
                                root.add(&prop, Value::Record(related.clone()))?;
                            }
                        }
                    }
                }
            }
            Junction::Table(junction) => {
                let ids = result
                    .values()
                    .map(Record::identifier_value)
                    .filter(|id| !id.is_null())
                    .collect::<Vec<_>>();
                if ids.is_empty() {
                    return Ok(());
                }
                let columns = format!(
                    "{}.{} _link, {}",
                    junction,
                    def.local_key,
                    target.prefixed_columns("b")
                );
                let (sql, params) = SelectQuery::new(&columns, junction)
                    .join(&format!(
                        "INNER JOIN {} b ON b.{} = {}.{}",
                        target.table(),
                        target.identifier(),
                        junction,
                        def.foreign_key
                    ))
                    .conditions(Conditions::from(Condition::InList(
                        format!("{}.{}", junction, def.local_key),
                        ids,
                    )))
                    .build();
                for row in self.driver.query(&sql, &params)? {
                    let link = row.get("_link").render_key();
                    let related =
                        Record::from_document(target.clone(), &row.strip_prefix("b"), false)?;
                    if let Some(root) = result.get_mut(&link) {
                        root.add(&prop, Value::Record(related))?;
                    }
                }
            }
            Junction::Embedded => return Err(self.embedded_unsupported(&prop)),
        }
        Ok(())
    }

    fn resolve_aggregate(
        &self,
        result: &mut IndexMap<String, Record>,
        aggregate: &Aggregate,
    ) -> RelataResult<()> {
        let ids = result
            .values()
            .map(Record::identifier_value)
            .filter(|id| !id.is_null())
            .collect::<Vec<_>>();
        if ids.is_empty() {
            return Ok(());
        }
        let columns = format!("{}, {} _value", aggregate.foreign_key, aggregate.expression);
        let (sql, params) = SelectQuery::new(&columns, &aggregate.table)
            .conditions(Conditions::from(Condition::InList(
                aggregate.foreign_key.clone(),
                ids,
            )))
            .group_by(&aggregate.foreign_key)
            .build();
        for row in self.driver.query(&sql, &params)? {
            let link = row.get(&aggregate.foreign_key).render_key();
            if let Some(root) = result.get_mut(&link) {
                root.set_unchecked(&aggregate.property, row.get("_value"))?;
            }
        }
        Ok(())
    }

    /// Loads matching records with the named relations resolved in a
    /// single LEFT-JOIN query. The root table is aliased `a` and the
    /// relations `b`, `c`, .. in order, so conditions and ordering
    /// must reference those aliases. With a limit or offset a
    /// pre-query first selects the identifier window, keeping paging
    /// exact despite the row fan-out of the joins.
    pub fn load_with_relations_joined(
        &self,
        conditions: &Conditions,
        relations: &[&str],
        options: &QueryOptions,
    ) -> RelataResult<IndexMap<String, Record>> {
        let mut parts = Vec::new();
        for (index, relation) in relations.iter().enumerate() {
            let (prop, def, target) = self.relation_parts(relation)?;
            parts.push((prop, def, target, alias_for(index + 1)));
        }

        let mut columns = self.model.prefixed_columns("a");
        let mut joins = Vec::new();
        for (prop, def, target, alias) in &parts {
            columns.push_str(", ");
            columns.push_str(&target.prefixed_columns(alias));
            match &def.junction {
                Junction::Embedded => {
                    return Err(self.embedded_unsupported(prop));
                }
                Junction::Single | Junction::None => {
                    joins.push(format!(
                        "LEFT JOIN {} {} ON {}.{} = a.{}",
                        target.table(),
                        alias,
                        alias,
                        def.foreign_key,
                        def.local_key
                    ));
                }
                Junction::Table(junction) => {
                    let junction_alias = format!("j_{}", alias);
                    joins.push(format!(
                        "LEFT JOIN {} {} ON {}.{} = a.{}",
                        junction,
                        junction_alias,
                        junction_alias,
                        def.local_key,
                        self.model.identifier()
                    ));
                    joins.push(format!(
                        "LEFT JOIN {} {} ON {}.{} = {}.{}",
                        target.table(),
                        alias,
                        alias,
                        target.identifier(),
                        junction_alias,
                        def.foreign_key
                    ));
                }
            }
        }
        let from = format!("{} a", self.model.table());

        let (main_conditions, main_options) =
            if options.limit.is_some() || options.offset.is_some() {
                let id_column = format!("a.{}", self.model.identifier());
                let mut window = SelectQuery::new(&format!("DISTINCT {}", id_column), &from)
                    .conditions(conditions.clone())
                    .options(options);
                for join in &joins {
                    window = window.join(join);
                }
                let (sql, params) = window.build();
                let ids = self.driver.query_column(&sql, &params)?;
                if ids.is_empty() {
                    return Ok(IndexMap::new());
                }
                let remaining = QueryOptions {
                    order_by: options.order_by.clone(),
                    ..Default::default()
                };
                (
                    Conditions::from(Condition::InList(id_column, ids)),
                    remaining,
                )
            } else {
                (conditions.clone(), options.clone())
            };

        let mut query = SelectQuery::new(&columns, &from)
            .conditions(main_conditions)
            .options(&main_options);
        for join in &joins {
            query = query.join(join);
        }
        let (sql, params) = query.build();
        let rows = self.driver.query(&sql, &params)?;

        let mut result: IndexMap<String, Record> = IndexMap::new();
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        for row in rows {
            let root_doc = row.strip_prefix("a");
            let root_id = root_doc.get(self.model.identifier());
            if root_id.is_null() {
                continue;
            }
            let root_key = root_id.render_key();
            if !result.contains_key(&root_key) {
                result.insert(root_key.clone(), self.hydrate(&root_doc)?);
            }
            for (prop, def, target, alias) in &parts {
                let related_doc = row.strip_prefix(alias);
                let related_id = related_doc.get(target.identifier());
                if related_id.is_null() {
                    continue;
                }
                let related = Record::from_document(target.clone(), &related_doc, false)?;
                let root = match result.get_mut(&root_key) {
                    Some(root) => root,
                    None => continue,
                };
                if def.is_single() {
                    root.set_unchecked(prop, Value::Record(related))?;
                } else if seen.insert((root_key.clone(), prop.clone(), related_id.render_key())) {
                    root.add(prop, Value::Record(related))?;
                }
            }
        }
        Ok(result)
    }

    fn hydrate(&self, row: &Document) -> RelataResult<Record> {
        let mut record = Record::from_document(self.model.clone(), row, false)?;
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

    fn identity_conditions(&self, record: &Record) -> RelataResult<Conditions> {
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
        Ok(Conditions::from(Condition::Eq(
            self.model.identifier().to_string(),
            id,
        )))
    }

    fn relation_parts(
        &self,
        name: &str,
    ) -> RelataResult<(String, RelationDef, Arc<EntityModel>)> {
        let resolved = self.model.resolve(name).to_string();
        let def = self.model.relation(&resolved)?.clone();
        let target = self.registry.get(&def.target)?;
        Ok((resolved, def, target))
    }

    fn local_value(&self, record: &Record, def: &RelationDef) -> RelataResult<Value> {
        record.get(&def.local_key)
    }

    fn embedded_unsupported(&self, relation: &str) -> RelataError {
        log::error!(
            "relation '{}' of entity '{}' embeds its identifiers, which only document stores support",
            relation,
            self.model.name()
        );
        RelataError::new(
            &format!(
                "relation '{}' of entity '{}' embeds its identifiers, which only document stores support",
                relation,
                self.model.name()
            ),
            ErrorKind::InvalidOperation,
        )
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

    /// Root keys grouped by the stringified value of one of their
    /// columns, plus the distinct original values for parameter
    /// binding. Roots with a null value in that column are skipped.
    fn roots_by_column(
        result: &IndexMap<String, Record>,
        column: &str,
    ) -> RelataResult<(IndexMap<String, Vec<String>>, Vec<Value>)> {
        let mut roots: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut values = Vec::new();
        for (key, record) in result {
            let value = record.get(column)?;
            if value.is_null() {
                continue;
            }
            let rendered = value.render_key();
            if !roots.contains_key(&rendered) {
                values.push(value);
            }
            roots.entry(rendered).or_default().push(key.clone());
        }
        Ok((roots, values))
    }
}

/// Which related rows an unlink targets.
#[derive(Clone, Debug)]
pub enum UnlinkTarget {
    All,
    Id(Value),
}

impl UnlinkTarget {
    pub fn record(record: &Record) -> Self {
        UnlinkTarget::Id(record.identifier_value())
    }
}

fn alias_for(index: usize) -> String {
    if index < 26 {
        ((b'a' + index as u8) as char).to_string()
    } else {
        format!("t{}", index)
    }
}
