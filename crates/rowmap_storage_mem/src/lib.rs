//! In-memory multi-version store implementing the rowmap store ports.
//!
//! Every commit installs a new version of each touched row at a strictly
//! increasing timestamp. Reads resolve against a snapshot timestamp;
//! read/write transactions validate their footprint at commit time and
//! abort on conflict.

pub mod exec;

mod ddl;
mod table;
mod txn;
mod view;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rowmap_core::{
    DatabaseAdmin, Mutation, ReadContext, ReadOnlyTransaction, ReadWriteTransaction, RetryPolicy, Statement,
    StoreClient, StoreError, Timestamp, TimestampBound,
};

pub use table::{IndexSchema, TableSchema};

use ddl::Catalog;
use exec::{parse_ddl, parse_sql};
use table::State;
use txn::{plan_dml, ReadWriteTxn, SnapshotRead};
use view::{Footprint, Pending, View};

/// Store settings. Every field has a default, so `{}` is a valid config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemStoreConfig {
    /// Attempts a read/write transaction gets before its abort is surfaced.
    pub max_commit_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Reject reads and writes on tables never declared through DDL.
    pub strict_schema: bool,
}

impl Default for MemStoreConfig {
    fn default() -> Self {
        Self { max_commit_attempts: 10, retry_backoff_ms: 5, strict_schema: false }
    }
}

impl MemStoreConfig {
    pub fn from_json_str(json: &str) -> Result<Self, StoreError> {
        serde_json::from_str(json).map_err(|e| StoreError::InvalidArgument(format!("store config: {e}")))
    }
}

pub(crate) struct Inner {
    state: Mutex<State>,
    pub(crate) config: MemStoreConfig,
}

impl Inner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("store state poisoned")
    }
}

/// Cloneable handle; clones share the same data.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_config(MemStoreConfig::default())
    }

    pub fn with_config(config: MemStoreConfig) -> Self {
        Self { inner: Arc::new(Inner { state: Mutex::new(State::default()), config }) }
    }

    pub fn config(&self) -> &MemStoreConfig {
        &self.inner.config
    }

    /// Timestamp of the most recent commit (0 before the first one).
    pub fn last_commit_timestamp(&self) -> Timestamp {
        self.inner.lock().last_commit
    }

    pub fn table_schema(&self, table: &str) -> Option<TableSchema> {
        self.inner.lock().schemas.get(table).cloned()
    }

    pub fn index_schema(&self, index: &str) -> Option<IndexSchema> {
        self.inner.lock().indexes.get(index).cloned()
    }
}

impl StoreClient for InMemoryStore {
    fn single_use(&self, bound: TimestampBound) -> Result<Box<dyn ReadContext>, StoreError> {
        let ts = self.inner.lock().read_ts(bound)?;
        Ok(Box::new(SnapshotRead::new(Arc::clone(&self.inner), ts)))
    }

    fn begin_read_only(&self, bound: TimestampBound) -> Result<Box<dyn ReadOnlyTransaction>, StoreError> {
        let ts = self.inner.lock().read_ts(bound)?;
        log::trace!("read-only transaction at {ts} ({bound:?})");
        Ok(Box::new(SnapshotRead::new(Arc::clone(&self.inner), ts)))
    }

    fn begin_read_write(&self) -> Result<Box<dyn ReadWriteTransaction>, StoreError> {
        let ts = self.inner.lock().read_ts(TimestampBound::Strong)?;
        log::trace!("read/write transaction at {ts}");
        Ok(Box::new(ReadWriteTxn::new(Arc::clone(&self.inner), ts)))
    }

    fn write(&self, mutations: Vec<Mutation>) -> Result<Timestamp, StoreError> {
        let mut state = self.inner.lock();
        let ts = state.last_commit;
        let mut pending = Pending::new();
        let mut footprint = Footprint::default();
        for mutation in &mutations {
            View::stage(&state, ts, self.inner.config.strict_schema, &mut pending, mutation, &mut footprint)?;
        }
        let commit_ts = state.install(pending);
        log::debug!("applied {} mutation(s) at {commit_ts}", mutations.len());
        Ok(commit_ts)
    }

    fn execute_partitioned_update(&self, statement: &Statement) -> Result<u64, StoreError> {
        let parsed = parse_sql(statement.sql())?;
        if !parsed.is_dml() {
            return Err(StoreError::InvalidArgument("partitioned DML accepts UPDATE or DELETE only".into()));
        }
        let strict = self.inner.config.strict_schema;
        let mut state = self.inner.lock();
        let ts = state.last_commit;
        let mut footprint = Footprint::default();
        let (mutations, count) = {
            let view = View::new(&state, ts, strict);
            plan_dml(&view, &parsed, statement, &mut footprint)?
        };
        let mut pending = Pending::new();
        for mutation in &mutations {
            View::stage(&state, ts, strict, &mut pending, mutation, &mut footprint)?;
        }
        if !pending.is_empty() {
            state.install(pending);
        }
        log::debug!("partitioned DML on {} affected {count} row(s)", parsed.table());
        Ok(count)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.inner.config.max_commit_attempts.max(1),
            backoff: Duration::from_millis(self.inner.config.retry_backoff_ms),
        }
    }
}

impl DatabaseAdmin for InMemoryStore {
    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().has_table(table))
    }

    /// Applies a DDL batch atomically: if one statement fails none take effect.
    fn update_ddl(&self, statements: &[String]) -> Result<(), StoreError> {
        let parsed = statements
            .iter()
            .map(|s| parse_ddl(s))
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = self.inner.lock();
        let mut catalog = Catalog::new(&state.schemas, &state.indexes);
        for stmt in parsed {
            catalog.apply(stmt)?;
        }
        for table in &catalog.dropped {
            state.tables.remove(table);
        }
        state.schemas = catalog.schemas;
        state.indexes = catalog.indexes;
        log::info!("applied {} DDL statement(s)", statements.len());
        Ok(())
    }
}
