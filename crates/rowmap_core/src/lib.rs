//! rowmap core: shared data types, store ports and the error type.
//!
//! Adapters (in-memory, remote clients) implement the ports declared here;
//! the engine crate only ever talks to a store through them.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

mod value;

pub use value::{FromValue, Value};

/// Commit and read timestamps, microseconds since the Unix epoch.
pub type Timestamp = u64;

pub fn now_micros() -> Timestamp {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64
}

// -----------------------
// Keys
// -----------------------

/// Ordered tuple of scalar values identifying one row of a table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Key(Vec<Value>);

/// Builds a [`Key`] from anything convertible into [`Value`].
#[macro_export]
macro_rules! key {
    ($($part:expr),* $(,)?) => {
        $crate::Key::new(vec![$($crate::Value::from($part)),*])
    };
}

impl Key {
    pub fn new(parts: Vec<Value>) -> Self {
        Self(parts)
    }

    pub fn of(part: impl Into<Value>) -> Self {
        Self(vec![part.into()])
    }

    /// Appends a part, for building composite keys.
    pub fn and(mut self, part: impl Into<Value>) -> Self {
        self.0.push(part.into());
        self
    }

    pub fn parts(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every part of `self` matches the leading parts of `other`.
    pub fn is_prefix_of(&self, other: &Key) -> bool {
        self.len() <= other.len()
            && self.0.iter().zip(other.0.iter()).all(|(a, b)| a.total_cmp(b) == Ordering::Equal)
    }

    /// Compares the leading `bound.len()` parts of `self` with `bound`.
    fn cmp_prefix(&self, bound: &Key) -> Ordering {
        for (i, b) in bound.0.iter().enumerate() {
            match self.0.get(i) {
                Some(a) => {
                    let ord = a.total_cmp(b);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                None => return Ordering::Less,
            }
        }
        Ordering::Equal
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let ord = a.total_cmp(b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for part in &self.0 {
            part.hash_into(state);
        }
    }
}

impl From<Vec<Value>> for Key {
    fn from(parts: Vec<Value>) -> Self {
        Self(parts)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{part}")?;
        }
        write!(f, "]")
    }
}

/// Range of keys. Bounds may be prefixes: a bound of length n is compared
/// against the first n parts of a key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: Key,
    pub start_closed: bool,
    pub end: Key,
    pub end_closed: bool,
}

impl KeyRange {
    pub fn closed_closed(start: Key, end: Key) -> Self {
        Self { start, start_closed: true, end, end_closed: true }
    }

    pub fn closed_open(start: Key, end: Key) -> Self {
        Self { start, start_closed: true, end, end_closed: false }
    }

    pub fn open_closed(start: Key, end: Key) -> Self {
        Self { start, start_closed: false, end, end_closed: true }
    }

    pub fn open_open(start: Key, end: Key) -> Self {
        Self { start, start_closed: false, end, end_closed: false }
    }

    /// Every key starting with `prefix`.
    pub fn prefix(prefix: Key) -> Self {
        Self::closed_closed(prefix.clone(), prefix)
    }

    pub fn contains(&self, key: &Key) -> bool {
        let lower = key.cmp_prefix(&self.start);
        let lower_ok = if self.start_closed { lower != Ordering::Less } else { lower == Ordering::Greater };
        if !lower_ok {
            return false;
        }
        let upper = key.cmp_prefix(&self.end);
        if self.end_closed { upper != Ordering::Greater } else { upper == Ordering::Less }
    }
}

/// A set of keys and key ranges, or every key of a table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    all: bool,
    keys: Vec<Key>,
    ranges: Vec<KeyRange>,
}

impl KeySet {
    pub fn all() -> Self {
        Self { all: true, ..Self::default() }
    }

    pub fn single(key: Key) -> Self {
        Self { keys: vec![key], ..Self::default() }
    }

    pub fn from_keys<I: IntoIterator<Item = Key>>(keys: I) -> Self {
        Self { keys: keys.into_iter().collect(), ..Self::default() }
    }

    pub fn range(range: KeyRange) -> Self {
        Self { ranges: vec![range], ..Self::default() }
    }

    pub fn add_key(mut self, key: Key) -> Self {
        self.keys.push(key);
        self
    }

    pub fn add_range(mut self, range: KeyRange) -> Self {
        self.ranges.push(range);
        self
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn ranges(&self) -> &[KeyRange] {
        &self.ranges
    }

    pub fn has_ranges(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// True when the set can match no key at all.
    pub fn is_empty(&self) -> bool {
        !self.all && self.keys.is_empty() && self.ranges.is_empty()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.all || self.keys.iter().any(|k| k == key) || self.ranges.iter().any(|r| r.contains(key))
    }
}

// -----------------------
// Rows
// -----------------------

/// Ordered (column, value) pairs of one result or mutation row.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    fields: Vec<(String, Value)>,
    #[serde(default)]
    partial: bool,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Row::set`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Sets a column, replacing an existing value in place.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.fields.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.fields.get(index).map(|(_, v)| v)
    }

    /// Typed column access. A column missing from a partial row falls back
    /// to the type's absent value; otherwise a missing column is an error.
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T, StoreError> {
        match self.get_value(column) {
            Some(v) => T::from_value(v).map_err(|e| match e {
                StoreError::Mapping(msg) => StoreError::Mapping(format!("column {column}: {msg}")),
                other => other,
            }),
            None if self.partial => T::absent()
                .ok_or_else(|| StoreError::Mapping(format!("column {column} absent from partial row"))),
            None => Err(StoreError::Mapping(format!("column {column} not found in row"))),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get_value(column).is_some()
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(name, _)| name == column)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Overlays `other` on top of `self`, column by column.
    pub fn merge(&mut self, other: &Row) {
        for (name, value) in &other.fields {
            self.set(name.clone(), value.clone());
        }
    }

    /// Copy restricted to `columns`, in the requested order. Unknown columns are skipped.
    pub fn project(&self, columns: &[String]) -> Row {
        let mut out = Row::new();
        for column in columns {
            if let Some(v) = self.get_value(column) {
                out.fields.push((column.clone(), v.clone()));
            }
        }
        out
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn mark_partial(&mut self) {
        self.partial = true;
    }

    pub fn to_map_value(&self) -> Value {
        Value::Map(self.fields.iter().cloned().collect())
    }

    /// Row from a `Value::Map`; anything else is a mapping error.
    pub fn from_map_value(value: &Value) -> Result<Row, StoreError> {
        match value {
            Value::Map(map) => Ok(Row { fields: map.clone().into_iter().collect(), partial: false }),
            other => Err(StoreError::Mapping(format!("expected STRUCT, got {}", other.type_name()))),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.set(name, value);
        }
        row
    }
}

// -----------------------
// Statements
// -----------------------

/// SQL text plus named parameters referenced as `@name`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    sql: String,
    params: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_tag: Option<String>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: BTreeMap::new(), request_tag: None }
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn bind_json(self, name: impl Into<String>, value: &serde_json::Value) -> Result<Self, StoreError> {
        let name = name.into();
        let v = Value::from_json(value)
            .ok_or_else(|| StoreError::InvalidArgument(format!("parameter {name}: unsupported JSON value")))?;
        Ok(self.bind(name, v))
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Tags the statement; `None` keeps the current tag.
    pub fn with_request_tag(mut self, tag: Option<&str>) -> Self {
        if let Some(tag) = tag {
            self.request_tag = Some(tag.to_string());
        }
        self
    }

    pub fn request_tag(&self) -> Option<&str> {
        self.request_tag.as_deref()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

// -----------------------
// Mutations
// -----------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    Insert,
    Update,
    InsertOrUpdate,
}

/// A single buffered change. Write mutations carry the row key explicitly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    Write { op: WriteOp, table: String, key: Key, row: Row },
    Delete { table: String, keys: KeySet },
}

impl Mutation {
    pub fn insert(table: impl Into<String>, key: Key, row: Row) -> Self {
        Mutation::Write { op: WriteOp::Insert, table: table.into(), key, row }
    }

    pub fn update(table: impl Into<String>, key: Key, row: Row) -> Self {
        Mutation::Write { op: WriteOp::Update, table: table.into(), key, row }
    }

    pub fn insert_or_update(table: impl Into<String>, key: Key, row: Row) -> Self {
        Mutation::Write { op: WriteOp::InsertOrUpdate, table: table.into(), key, row }
    }

    pub fn delete(table: impl Into<String>, keys: KeySet) -> Self {
        Mutation::Delete { table: table.into(), keys }
    }

    pub fn table(&self) -> &str {
        match self {
            Mutation::Write { table, .. } | Mutation::Delete { table, .. } => table,
        }
    }
}

// -----------------------
// Read configuration
// -----------------------

/// Which snapshot a read observes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum TimestampBound {
    #[default]
    Strong,
    ExactStaleness(Duration),
    MaxStaleness(Duration),
    ReadTimestamp(Timestamp),
    MinReadTimestamp(Timestamp),
}

/// How often a store lets a read/write transaction be re-run after an abort.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 10, backoff: Duration::from_millis(5) }
    }
}

/// Direct keyed read of a table (or of a secondary index over it).
#[derive(Clone, Copy, Debug)]
pub struct ReadRequest<'a> {
    pub table: &'a str,
    pub keys: &'a KeySet,
    pub columns: &'a [String],
    pub index: Option<&'a str>,
    pub limit: Option<u64>,
    /// Caller-supplied tag passed through to the store for request attribution.
    pub request_tag: Option<&'a str>,
}

impl<'a> ReadRequest<'a> {
    pub fn new(table: &'a str, keys: &'a KeySet, columns: &'a [String]) -> Self {
        Self { table, keys, columns, index: None, limit: None, request_tag: None }
    }

    pub fn with_index(mut self, index: Option<&'a str>) -> Self {
        self.index = index;
        self
    }

    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_request_tag(mut self, tag: Option<&'a str>) -> Self {
        self.request_tag = tag;
        self
    }
}

// -----------------------
// Store Ports
// -----------------------

/// Read access pinned to one snapshot (or to one transaction's view).
pub trait ReadContext: Send {
    /// Rows for the keys of `request.keys`, in key order. Absent keys are skipped.
    fn read(&mut self, request: &ReadRequest<'_>) -> Result<Vec<Row>, StoreError>;

    fn execute_query(&mut self, statement: &Statement) -> Result<Vec<Row>, StoreError>;
}

pub trait ReadOnlyTransaction: ReadContext {
    fn read_timestamp(&self) -> Timestamp;

    fn as_read_context(&mut self) -> &mut dyn ReadContext;

    fn close(self: Box<Self>);
}

/// Serializable transaction. Reads observe the transaction's own buffered writes.
pub trait ReadWriteTransaction: ReadContext {
    fn buffer(&mut self, mutations: Vec<Mutation>) -> Result<(), StoreError>;

    fn execute_update(&mut self, statement: &Statement) -> Result<u64, StoreError>;

    fn as_read_context(&mut self) -> &mut dyn ReadContext;

    /// Fails with [`StoreError::Aborted`] when a conflicting commit happened after the snapshot.
    fn commit(self: Box<Self>) -> Result<Timestamp, StoreError>;

    fn rollback(self: Box<Self>);
}

pub trait StoreClient: Send + Sync + 'static {
    fn single_use(&self, bound: TimestampBound) -> Result<Box<dyn ReadContext>, StoreError>;

    fn begin_read_only(&self, bound: TimestampBound) -> Result<Box<dyn ReadOnlyTransaction>, StoreError>;

    fn begin_read_write(&self) -> Result<Box<dyn ReadWriteTransaction>, StoreError>;

    /// Applies all mutations atomically at one commit timestamp.
    fn write(&self, mutations: Vec<Mutation>) -> Result<Timestamp, StoreError>;

    /// Returns a lower bound of the rows affected.
    fn execute_partitioned_update(&self, statement: &Statement) -> Result<u64, StoreError>;

    fn retry_policy(&self) -> RetryPolicy;
}

pub trait DatabaseAdmin: Send + Sync + 'static {
    fn table_exists(&self, table: &str) -> Result<bool, StoreError>;

    fn update_ddl(&self, statements: &[String]) -> Result<(), StoreError>;
}

// -----------------------
// Errors
// -----------------------

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("transaction aborted: {0}")]
    Aborted(String),
    #[error("transaction misuse: {0}")]
    TransactionMisuse(String),
    #[error("mapping error: {0}")]
    Mapping(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("storage: {0}")]
    Storage(String),
}

impl StoreError {
    /// Only serialization conflicts are worth re-running a transaction for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Aborted(_))
    }
}

/// SQL identifier check shared by descriptors and DDL parsing.
pub fn validate_identifier(s: &str) -> Result<(), StoreError> {
    if s.is_empty() || s.len() > 128 {
        return Err(StoreError::InvalidArgument(format!("identifier length: {s:?}")));
    }
    if s.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(StoreError::InvalidArgument(format!("identifier starts with a digit: {s}")));
    }
    if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::InvalidArgument(format!("identifier charset: {s}")));
    }
    Ok(())
}
