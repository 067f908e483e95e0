use std::collections::HashMap;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::common::Value;
use crate::errors::{ErrorKind, RelataError, RelataResult};

/// Declared type of an entity property. Values assigned to the
/// property are coerced to this type where a lossless conversion
/// exists and rejected otherwise.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PropertyType {
    /// No coercion, any value is accepted as-is.
    #[default]
    Any,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    /// A reference to another entity, by model name. Accepts either a
    /// [crate::common::Record] of that model or a bare identifier value.
    Entity(String),
}

/// Shape of a multi-valued property.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CollectionKind {
    /// Single-valued.
    #[default]
    None,
    /// An ordered list of values.
    List,
    /// A map of values addressed by key.
    Keyed,
}

/// Uniqueness rule applied when an item is added to a collection
/// property.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum UniquePolicy {
    /// Duplicate items are allowed.
    #[default]
    Duplicates,
    /// An item equal to an existing one is silently skipped.
    ByValue,
    /// Items are keyed by the named field of the added value; adding a
    /// second item with the same key replaces the first.
    ByKey(String),
}

/// Rule used to locate the item to drop when removing from a
/// collection property.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RemovePolicy {
    /// Drop items equal to the given value.
    #[default]
    ByValue,
    /// Drop the map entry whose key equals the given value.
    ByKey,
    /// Drop items whose named field equals the given value.
    ByField(String),
}

/// How two related entity tables are connected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Junction {
    /// The foreign key lives on the related table (one-to-many).
    #[default]
    None,
    /// The foreign key lives on this table (one-to-one, many-to-one).
    Single,
    /// The local key holds an array of related identifiers, stored
    /// inline on this record. Document stores only.
    Embedded,
    /// Rows are connected through the named junction table
    /// (many-to-many).
    Table(String),
}

/// Describes how a relation property reaches its target entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationDef {
    /// Model name of the related entity.
    pub target: String,
    /// Column on this side of the connection.
    pub local_key: String,
    /// Column on the related side of the connection.
    pub foreign_key: String,
    pub junction: Junction,
}

impl RelationDef {
    pub fn new(target: &str, local_key: &str, foreign_key: &str, junction: Junction) -> Self {
        RelationDef {
            target: target.to_string(),
            local_key: local_key.to_string(),
            foreign_key: foreign_key.to_string(),
            junction,
        }
    }

    /// True if at most one related record can exist.
    pub fn is_single(&self) -> bool {
        self.junction == Junction::Single
    }
}

/// Declarative description of a single entity property.
///
/// Build one fluently and hand it to [EntityModelBuilder::property]:
///
/// ```ignore
/// PropertyMeta::new("title", PropertyType::Str).required()
/// ```
#[derive(Clone, Debug)]
pub struct PropertyMeta {
    name: String,
    property_type: PropertyType,
    readonly: bool,
    required: bool,
    collection: CollectionKind,
    unique: UniquePolicy,
    remove: RemovePolicy,
    single_alias: Option<String>,
    exclude: bool,
    default: Option<Value>,
    is_column: bool,
    relation: Option<RelationDef>,
}

impl PropertyMeta {
    pub fn new(name: &str, property_type: PropertyType) -> Self {
        PropertyMeta {
            name: name.to_string(),
            property_type,
            readonly: false,
            required: false,
            collection: CollectionKind::None,
            unique: UniquePolicy::Duplicates,
            remove: RemovePolicy::ByValue,
            single_alias: None,
            exclude: false,
            default: None,
            is_column: true,
            relation: None,
        }
    }

    /// The property can only be written through
    /// [crate::common::Record::set_unchecked], i.e. when hydrating from
    /// storage.
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// The property must be non-empty before the record is persisted.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn collection(mut self, kind: CollectionKind) -> Self {
        self.collection = kind;
        self
    }

    pub fn unique(mut self, policy: UniquePolicy) -> Self {
        self.unique = policy;
        self
    }

    pub fn remove_policy(mut self, policy: RemovePolicy) -> Self {
        self.remove = policy;
        self
    }

    /// Registers a singular alias for a collection property, so that
    /// `add("tag", ..)` targets the `tags` collection.
    pub fn single_alias(mut self, alias: &str) -> Self {
        self.single_alias = Some(alias.to_string());
        self
    }

    /// The property is skipped by [crate::common::Record::to_document].
    pub fn exclude(mut self) -> Self {
        self.exclude = true;
        self
    }

    pub fn default_value<T: Into<Value>>(mut self, value: T) -> Self {
        self.default = Some(value.into());
        self
    }

    /// The property is not backed by a storage column. Implied for
    /// collection and relation properties.
    pub fn transient(mut self) -> Self {
        self.is_column = false;
        self
    }

    pub fn relation(mut self, def: RelationDef) -> Self {
        self.relation = Some(def);
        self.is_column = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property_type(&self) -> &PropertyType {
        &self.property_type
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn collection_kind(&self) -> &CollectionKind {
        &self.collection
    }

    pub fn is_collection(&self) -> bool {
        self.collection != CollectionKind::None
    }

    pub fn unique_policy(&self) -> &UniquePolicy {
        &self.unique
    }

    pub fn remove_rule(&self) -> &RemovePolicy {
        &self.remove
    }

    pub fn alias(&self) -> Option<&str> {
        self.single_alias.as_deref()
    }

    pub fn is_excluded(&self) -> bool {
        self.exclude
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn is_column(&self) -> bool {
        self.is_column
    }

    pub fn relation_def(&self) -> Option<&RelationDef> {
        self.relation.as_ref()
    }
}

/// Immutable per-entity metadata shared by every record of the same
/// model.
///
/// All derived lookups, the column list, the alias table and the
/// relation index, are computed once when the model is built and read
/// straight off the struct afterwards.
#[derive(Debug)]
pub struct EntityModel {
    name: String,
    table: String,
    identifier: String,
    auto_id: bool,
    properties: IndexMap<String, PropertyMeta>,
    columns: Vec<String>,
    aliases: HashMap<String, String>,
    relations: Vec<String>,
}

impl EntityModel {
    pub fn builder(name: &str) -> EntityModelBuilder {
        EntityModelBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table (relational) or collection (document store) the entity is
    /// persisted in.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Primary key column name.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether the identifier is assigned on insert: relational
    /// drivers report it through `last_insert_id`, document stores
    /// generate one client-side. Models with a natural key leave this
    /// off and must set the identifier themselves.
    pub fn is_auto_id(&self) -> bool {
        self.auto_id
    }

    pub fn property(&self, name: &str) -> Option<&PropertyMeta> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyMeta> {
        self.properties.values()
    }

    /// Resolves a singular alias to its collection property name, or
    /// returns the name unchanged if it is not an alias.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn is_property(&self, name: &str) -> bool {
        self.properties.contains_key(self.resolve(name))
    }

    /// Column-backed property names, in declaration order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Renders the column list for a SELECT with a table alias, each
    /// column exposed under an alias-prefixed name:
    /// `a.id a_id, a.title a_title`.
    pub fn prefixed_columns(&self, prefix: &str) -> String {
        self.columns
            .iter()
            .map(|c| format!("{}.{} {}_{}", prefix, c, prefix, c))
            .join(", ")
    }

    /// Names of properties that carry a relation descriptor.
    pub fn relations(&self) -> impl Iterator<Item = (&str, &RelationDef)> {
        self.relations.iter().map(|name| {
            let meta = &self.properties[name];
            (meta.name(), meta.relation_def().unwrap())
        })
    }

    pub fn relation(&self, name: &str) -> RelataResult<&RelationDef> {
        match self.property(self.resolve(name)).and_then(PropertyMeta::relation_def) {
            Some(def) => Ok(def),
            None => {
                log::error!("no relation '{}' on entity '{}'", name, self.name);
                Err(RelataError::new(
                    &format!("no relation '{}' on entity '{}'", name, self.name),
                    ErrorKind::UnknownRelation,
                ))
            }
        }
    }
}

/// Builder for [EntityModel]. Validates the declaration and
/// precomputes the derived lookups in [EntityModelBuilder::build].
pub struct EntityModelBuilder {
    name: String,
    table: Option<String>,
    identifier: String,
    auto_id: bool,
    properties: IndexMap<String, PropertyMeta>,
}

impl EntityModelBuilder {
    fn new(name: &str) -> Self {
        EntityModelBuilder {
            name: name.to_string(),
            table: None,
            identifier: "id".to_string(),
            auto_id: false,
            properties: IndexMap::new(),
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn identifier(mut self, column: &str) -> Self {
        self.identifier = column.to_string();
        self
    }

    /// Marks the identifier as storage-assigned (auto-increment
    /// column or generated document id).
    pub fn auto_id(mut self) -> Self {
        self.auto_id = true;
        self
    }

    pub fn property(mut self, meta: PropertyMeta) -> Self {
        self.properties.insert(meta.name().to_string(), meta);
        self
    }

    /// # Errors
    ///
    /// Fails when a singular alias collides with a property name or
    /// another alias, or when the identifier is not a declared
    /// column-backed property.
    pub fn build(mut self) -> RelataResult<EntityModel> {
        if !self.properties.contains_key(&self.identifier) {
            self.properties.insert(
                self.identifier.clone(),
                PropertyMeta::new(&self.identifier, PropertyType::Any).readonly(),
            );
            let idx = self.properties.len() - 1;
            self.properties.move_index(idx, 0);
        }

        let mut aliases = HashMap::new();
        for meta in self.properties.values() {
            if let Some(alias) = meta.alias() {
                if self.properties.contains_key(alias) || aliases.contains_key(alias) {
                    log::error!(
                        "alias '{}' on entity '{}' collides with an existing name",
                        alias,
                        self.name
                    );
                    return Err(RelataError::new(
                        &format!(
                            "alias '{}' on entity '{}' collides with an existing name",
                            alias, self.name
                        ),
                        ErrorKind::InvalidEntityClass,
                    ));
                }
                aliases.insert(alias.to_string(), meta.name().to_string());
            }
        }

        let columns = self
            .properties
            .values()
            .filter(|meta| meta.is_column())
            .map(|meta| meta.name().to_string())
            .collect::<Vec<_>>();

        let relations = self
            .properties
            .values()
            .filter(|meta| meta.relation_def().is_some())
            .map(|meta| meta.name().to_string())
            .collect::<Vec<_>>();

        let table = self.table.unwrap_or_else(|| self.name.clone());
        Ok(EntityModel {
            name: self.name,
            table,
            identifier: self.identifier,
            auto_id: self.auto_id,
            properties: self.properties,
            columns,
            aliases,
            relations,
        })
    }
}
