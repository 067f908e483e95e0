use std::collections::VecDeque;

use crate::common::{atomic, Atomic, Document, ReadExecutor, Value, WriteExecutor};
use crate::errors::{ErrorKind, RelataError, RelataResult};

/// Connection-level access to a relational backend.
///
/// Implementations wrap a concrete database client. Errors raised by
/// the underlying client are surfaced verbatim with
/// [ErrorKind::Driver] and are never translated by the layers above.
pub trait SqlDriver: Send + Sync + std::fmt::Debug {
    /// Runs a statement that returns no rows. Returns the number of
    /// affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> RelataResult<u64>;

    /// Runs a query and returns the result rows as documents keyed by
    /// result column name.
    fn query(&self, sql: &str, params: &[Value]) -> RelataResult<Vec<Document>>;

    /// Runs a query and returns the first column of every row.
    fn query_column(&self, sql: &str, params: &[Value]) -> RelataResult<Vec<Value>>;

    /// Identifier generated by the most recent INSERT on this
    /// connection.
    fn last_insert_id(&self) -> RelataResult<Value>;

    fn begin(&self) -> RelataResult<()>;
    fn commit(&self) -> RelataResult<()>;
    fn rollback(&self) -> RelataResult<()>;
}

/// Runs `body` inside a transaction, committing on success and rolling
/// back on error. A rollback failure is logged and the original error
/// is returned.
pub fn with_transaction<T, F>(driver: &dyn SqlDriver, body: F) -> RelataResult<T>
where
    F: FnOnce() -> RelataResult<T>,
{
    driver.begin()?;
    match body() {
        Ok(value) => {
            driver.commit()?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = driver.rollback() {
                log::error!("rollback failed: {}", rollback_error);
            }
            Err(error)
        }
    }
}

/// A canned response for [MockSqlDriver].
#[derive(Clone, Debug)]
pub enum MockResponse {
    Rows(Vec<Document>),
    Column(Vec<Value>),
    Affected(u64),
    Error(String),
}

/// Scripted in-memory driver used by the test suites.
///
/// Responses queued with the `expect_*` methods are consumed in order.
/// A call with no matching queued response falls back to an empty
/// result (or one affected row), so scripts only need to describe the
/// statements they care about. Every statement, including transaction
/// control, is recorded and can be inspected with
/// [MockSqlDriver::statements].
#[derive(Clone, Debug, Default)]
pub struct MockSqlDriver {
    queue: Atomic<VecDeque<MockResponse>>,
    statements: Atomic<Vec<(String, Vec<Value>)>>,
    last_insert_id: Atomic<Value>,
}

impl MockSqlDriver {
    pub fn new() -> Self {
        MockSqlDriver {
            queue: atomic(VecDeque::new()),
            statements: atomic(Vec::new()),
            last_insert_id: atomic(Value::Null),
        }
    }

    pub fn expect_rows(&self, rows: Vec<Document>) -> &Self {
        self.queue.write_with(|q| q.push_back(MockResponse::Rows(rows)));
        self
    }

    pub fn expect_column(&self, values: Vec<Value>) -> &Self {
        self.queue
            .write_with(|q| q.push_back(MockResponse::Column(values)));
        self
    }

    pub fn expect_affected(&self, count: u64) -> &Self {
        self.queue
            .write_with(|q| q.push_back(MockResponse::Affected(count)));
        self
    }

    pub fn expect_error(&self, message: &str) -> &Self {
        self.queue
            .write_with(|q| q.push_back(MockResponse::Error(message.to_string())));
        self
    }

    pub fn set_last_insert_id<T: Into<Value>>(&self, id: T) {
        let id = id.into();
        self.last_insert_id.write_with(|v| *v = id);
    }

    /// Every statement issued so far, with its bound parameters.
    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.statements.read_with(|s| s.clone())
    }

    /// Just the SQL texts, for coarse assertions.
    pub fn statement_texts(&self) -> Vec<String> {
        self.statements
            .read_with(|s| s.iter().map(|(sql, _)| sql.clone()).collect())
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.statements
            .write_with(|s| s.push((sql.to_string(), params.to_vec())));
    }

    fn next_response(&self) -> Option<MockResponse> {
        self.queue.write_with(|q| q.pop_front())
    }

    fn driver_error(message: &str) -> RelataError {
        log::error!("{}", message);
        RelataError::new(message, ErrorKind::Driver)
    }
}

impl SqlDriver for MockSqlDriver {
    fn execute(&self, sql: &str, params: &[Value]) -> RelataResult<u64> {
        self.record(sql, params);
        match self.next_response() {
            Some(MockResponse::Affected(count)) => Ok(count),
            Some(MockResponse::Error(message)) => Err(Self::driver_error(&message)),
            Some(other) => {
                // put it back for the next read call
                self.queue.write_with(|q| q.push_front(other));
                Ok(1)
            }
            None => Ok(1),
        }
    }

    fn query(&self, sql: &str, params: &[Value]) -> RelataResult<Vec<Document>> {
        self.record(sql, params);
        match self.next_response() {
            Some(MockResponse::Rows(rows)) => Ok(rows),
            Some(MockResponse::Error(message)) => Err(Self::driver_error(&message)),
            Some(other) => {
                self.queue.write_with(|q| q.push_front(other));
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    fn query_column(&self, sql: &str, params: &[Value]) -> RelataResult<Vec<Value>> {
        self.record(sql, params);
        match self.next_response() {
            Some(MockResponse::Column(values)) => Ok(values),
            Some(MockResponse::Rows(rows)) => Ok(rows
                .iter()
                .filter_map(|row| row.iter().next().map(|(_, v)| v.clone()))
                .collect()),
            Some(MockResponse::Error(message)) => Err(Self::driver_error(&message)),
            Some(other) => {
                self.queue.write_with(|q| q.push_front(other));
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    fn last_insert_id(&self) -> RelataResult<Value> {
        Ok(self.last_insert_id.read_with(|v| v.clone()))
    }

    fn begin(&self) -> RelataResult<()> {
        self.record("BEGIN", &[]);
        Ok(())
    }

    fn commit(&self) -> RelataResult<()> {
        self.record("COMMIT", &[]);
        Ok(())
    }

    fn rollback(&self) -> RelataResult<()> {
        self.record("ROLLBACK", &[]);
        Ok(())
    }
}
