use std::fmt::Write;

use itertools::Itertools;
use smallvec::SmallVec;

use crate::common::{Document, Value};

/// A single filter clause. Every variant except [Condition::Raw]
/// renders with `?` placeholders and carries its operands in the
/// bound-parameter channel.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// `column = ?`, or `column IS NULL` when the operand is null.
    Eq(String, Value),
    /// `column <> ?`, or `column IS NOT NULL` when the operand is null.
    Ne(String, Value),
    /// `column IN (?, ?, ..)`. An empty list matches nothing.
    InList(String, Vec<Value>),
    /// A verbatim SQL fragment with its bound operands. The caller
    /// vouches for the fragment itself; the values still travel
    /// through the parameter channel, appended in order.
    Raw(String, Vec<Value>),
}

impl Condition {
    pub fn eq<T: Into<Value>>(column: &str, value: T) -> Self {
        Condition::Eq(column.to_string(), value.into())
    }

    pub fn ne<T: Into<Value>>(column: &str, value: T) -> Self {
        Condition::Ne(column.to_string(), value.into())
    }

    pub fn in_list<T: Into<Value>>(column: &str, values: Vec<T>) -> Self {
        Condition::InList(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        )
    }

    pub fn raw(sql: &str) -> Self {
        Condition::Raw(sql.to_string(), Vec::new())
    }

    /// A raw fragment whose `?` placeholders bind the given values.
    pub fn raw_with<T: Into<Value>>(sql: &str, values: Vec<T>) -> Self {
        Condition::Raw(
            sql.to_string(),
            values.into_iter().map(Into::into).collect(),
        )
    }

    fn render(&self, sql: &mut String, params: &mut Vec<Value>) {
        match self {
            Condition::Eq(column, Value::Null) => {
                let _ = write!(sql, "{} IS NULL", column);
            }
            Condition::Eq(column, value) => {
                let _ = write!(sql, "{} = ?", column);
                params.push(value.clone());
            }
            Condition::Ne(column, Value::Null) => {
                let _ = write!(sql, "{} IS NOT NULL", column);
            }
            Condition::Ne(column, value) => {
                let _ = write!(sql, "{} <> ?", column);
                params.push(value.clone());
            }
            Condition::InList(_, values) if values.is_empty() => {
                sql.push_str("1 = 0");
            }
            Condition::InList(column, values) => {
                let placeholders = values.iter().map(|_| "?").join(", ");
                let _ = write!(sql, "{} IN ({})", column, placeholders);
                params.extend(values.iter().cloned());
            }
            Condition::Raw(fragment, values) => {
                sql.push_str(fragment);
                params.extend(values.iter().cloned());
            }
        }
    }
}

/// A conjunction of [Condition]s.
#[derive(Clone, Debug, Default)]
pub struct Conditions {
    items: SmallVec<[Condition; 4]>,
}

impl Conditions {
    pub fn new() -> Self {
        Conditions::default()
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.items.push(condition);
        self
    }

    pub fn push(&mut self, condition: Condition) {
        self.items.push(condition);
    }

    pub fn extend(&mut self, other: Conditions) {
        self.items.extend(other.items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Renders the clauses joined by `AND`, without the `WHERE`
    /// keyword. Returns an empty string for an empty set.
    pub fn render(&self, params: &mut Vec<Value>) -> String {
        let mut sql = String::new();
        for (i, condition) in self.items.iter().enumerate() {
            if i > 0 {
                sql.push_str(" AND ");
            }
            condition.render(&mut sql, params);
        }
        sql
    }
}

impl From<Condition> for Conditions {
    fn from(condition: Condition) -> Self {
        Conditions::new().and(condition)
    }
}

/// Ordering, paging and grouping knobs shared by the loaders.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    pub order_by: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl QueryOptions {
    pub fn order_by(order: &str) -> Self {
        QueryOptions {
            order_by: Some(order.to_string()),
            ..Default::default()
        }
    }

    pub fn page(limit: u64, offset: u64) -> Self {
        QueryOptions {
            limit: Some(limit),
            offset: Some(offset),
            ..Default::default()
        }
    }
}

/// Assembles a SELECT statement and its bound parameters.
#[derive(Clone, Debug, Default)]
pub struct SelectQuery {
    columns: String,
    from: String,
    joins: Vec<String>,
    conditions: Conditions,
    group_by: Option<String>,
    order_by: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl SelectQuery {
    pub fn new(columns: &str, from: &str) -> Self {
        SelectQuery {
            columns: columns.to_string(),
            from: from.to_string(),
            ..Default::default()
        }
    }

    pub fn join(mut self, clause: &str) -> Self {
        self.joins.push(clause.to_string());
        self
    }

    pub fn conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn group_by(mut self, group: &str) -> Self {
        self.group_by = Some(group.to_string());
        self
    }

    pub fn options(mut self, options: &QueryOptions) -> Self {
        self.order_by = options.order_by.clone();
        self.limit = options.limit;
        self.offset = options.offset;
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("SELECT {} FROM {}", self.columns, self.from);
        for join in &self.joins {
            let _ = write!(sql, " {}", join);
        }
        let filter = self.conditions.render(&mut params);
        if !filter.is_empty() {
            let _ = write!(sql, " WHERE {}", filter);
        }
        if let Some(group) = &self.group_by {
            let _ = write!(sql, " GROUP BY {}", group);
        }
        if let Some(order) = &self.order_by {
            let _ = write!(sql, " ORDER BY {}", order);
        }
        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {}", limit);
        }
        if let Some(offset) = self.offset {
            let _ = write!(sql, " OFFSET {}", offset);
        }
        (sql, params)
    }
}

/// Renders `INSERT INTO table (a, b) VALUES (?, ?)` from a document's
/// fields, in document order.
pub fn insert_sql(table: &str, values: &Document) -> (String, Vec<Value>) {
    let columns = values.keys().join(", ");
    let placeholders = values.keys().map(|_| "?").join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table, columns, placeholders
    );
    let params = values.iter().map(|(_, v)| v.clone()).collect();
    (sql, params)
}

/// Renders `UPDATE table SET a = ?, b = ? WHERE ..`. Null values are
/// bound as parameters like any other value.
pub fn update_sql(table: &str, changes: &Document, conditions: &Conditions) -> (String, Vec<Value>) {
    let assignments = changes.keys().map(|c| format!("{} = ?", c)).join(", ");
    let mut params: Vec<Value> = changes.iter().map(|(_, v)| v.clone()).collect();
    let mut sql = format!("UPDATE {} SET {}", table, assignments);
    let filter = conditions.render(&mut params);
    if !filter.is_empty() {
        let _ = write!(sql, " WHERE {}", filter);
    }
    (sql, params)
}

pub fn delete_sql(table: &str, conditions: &Conditions) -> (String, Vec<Value>) {
    let mut params = Vec::new();
    let mut sql = format!("DELETE FROM {}", table);
    let filter = conditions.render(&mut params);
    if !filter.is_empty() {
        let _ = write!(sql, " WHERE {}", filter);
    }
    (sql, params)
}
