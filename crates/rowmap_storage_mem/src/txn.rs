//! Snapshot reads and optimistic read/write transactions

use std::sync::Arc;

use rowmap_core::{
    KeySet, Mutation, ReadContext, ReadOnlyTransaction, ReadRequest, ReadWriteTransaction, Row, Statement,
    StoreError, Timestamp,
};

use crate::exec::{ast::SqlStatement, executor::Executor, parse_sql};
use crate::table::State;
use crate::view::{Footprint, Pending, View};
use crate::Inner;

fn trace_request(target: &str, tag: Option<&str>, ts: Timestamp) {
    if let Some(tag) = tag {
        log::trace!("[{tag}] read at {ts}: {target}");
    }
}

/// Reads pinned at one timestamp. Serves single-use reads and read-only transactions.
pub(crate) struct SnapshotRead {
    inner: Arc<Inner>,
    ts: Timestamp,
}

impl SnapshotRead {
    pub fn new(inner: Arc<Inner>, ts: Timestamp) -> Self {
        Self { inner, ts }
    }
}

impl ReadContext for SnapshotRead {
    fn read(&mut self, request: &ReadRequest<'_>) -> Result<Vec<Row>, StoreError> {
        trace_request(request.table, request.request_tag, self.ts);
        let state = self.inner.lock();
        View::new(&state, self.ts, self.inner.config.strict_schema).read(request, &mut Footprint::default())
    }

    fn execute_query(&mut self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        trace_request(statement.sql(), statement.request_tag(), self.ts);
        let parsed = parse_sql(statement.sql())?;
        let state = self.inner.lock();
        let view = View::new(&state, self.ts, self.inner.config.strict_schema);
        Executor::new(&view, statement.params()).select(&parsed, &mut Footprint::default())
    }
}

impl ReadOnlyTransaction for SnapshotRead {
    fn read_timestamp(&self) -> Timestamp {
        self.ts
    }

    fn as_read_context(&mut self) -> &mut dyn ReadContext {
        self
    }

    fn close(self: Box<Self>) {}
}

/// Serializable transaction: reads at `read_ts`, buffers writes, and validates
/// at commit that nothing it observed or wrote changed in between.
pub(crate) struct ReadWriteTxn {
    inner: Arc<Inner>,
    read_ts: Timestamp,
    pending: Pending,
    footprint: Footprint,
}

impl ReadWriteTxn {
    pub fn new(inner: Arc<Inner>, read_ts: Timestamp) -> Self {
        Self { inner, read_ts, pending: Pending::new(), footprint: Footprint::default() }
    }

    fn conflict(&self, state: &State) -> Option<String> {
        let written = self
            .pending
            .iter()
            .flat_map(|(table, rows)| rows.keys().map(move |key| (table, key)));
        let read = self.footprint.keys.iter().map(|(table, key)| (table, key));
        for (table, key) in read.chain(written) {
            let changed = state
                .tables
                .get(table)
                .and_then(|t| t.last_write(key))
                .is_some_and(|ts| ts > self.read_ts);
            if changed {
                return Some(format!("row {key} of table {table} changed since {}", self.read_ts));
            }
        }
        for table in &self.footprint.tables {
            if state.tables.get(table).is_some_and(|t| t.last_modified > self.read_ts) {
                return Some(format!("table {table} changed since {}", self.read_ts));
            }
        }
        None
    }
}

impl ReadContext for ReadWriteTxn {
    fn read(&mut self, request: &ReadRequest<'_>) -> Result<Vec<Row>, StoreError> {
        trace_request(request.table, request.request_tag, self.read_ts);
        let state = self.inner.lock();
        View::new(&state, self.read_ts, self.inner.config.strict_schema)
            .with_pending(&self.pending)
            .read(request, &mut self.footprint)
    }

    fn execute_query(&mut self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        trace_request(statement.sql(), statement.request_tag(), self.read_ts);
        let parsed = parse_sql(statement.sql())?;
        let state = self.inner.lock();
        let view = View::new(&state, self.read_ts, self.inner.config.strict_schema).with_pending(&self.pending);
        Executor::new(&view, statement.params()).select(&parsed, &mut self.footprint)
    }
}

impl ReadWriteTransaction for ReadWriteTxn {
    fn buffer(&mut self, mutations: Vec<Mutation>) -> Result<(), StoreError> {
        let state = self.inner.lock();
        // the whole group applies or none of it does
        let mut staged = self.pending.clone();
        for mutation in &mutations {
            View::stage(
                &state,
                self.read_ts,
                self.inner.config.strict_schema,
                &mut staged,
                mutation,
                &mut self.footprint,
            )?;
        }
        self.pending = staged;
        Ok(())
    }

    fn execute_update(&mut self, statement: &Statement) -> Result<u64, StoreError> {
        let parsed = parse_sql(statement.sql())?;
        let state = self.inner.lock();
        let strict = self.inner.config.strict_schema;
        let (mutations, count) = {
            let view = View::new(&state, self.read_ts, strict).with_pending(&self.pending);
            plan_dml(&view, &parsed, statement, &mut self.footprint)?
        };
        let mut staged = self.pending.clone();
        for mutation in &mutations {
            View::stage(&state, self.read_ts, strict, &mut staged, mutation, &mut self.footprint)?;
        }
        self.pending = staged;
        Ok(count)
    }

    fn as_read_context(&mut self) -> &mut dyn ReadContext {
        self
    }

    fn commit(self: Box<Self>) -> Result<Timestamp, StoreError> {
        let inner = Arc::clone(&self.inner);
        let mut state = inner.lock();
        if let Some(reason) = self.conflict(&state) {
            log::debug!("read/write transaction at {} aborted: {reason}", self.read_ts);
            return Err(StoreError::Aborted(reason));
        }
        if self.pending.is_empty() {
            return Ok(state.last_commit.max(self.read_ts));
        }
        let ts = state.install(self.pending);
        log::debug!("committed read/write transaction at {ts}");
        Ok(ts)
    }

    fn rollback(self: Box<Self>) {
        log::trace!("rolled back read/write transaction at {}", self.read_ts);
    }
}

/// Turns a DML statement into mutations plus its affected-row count.
pub(crate) fn plan_dml(
    view: &View<'_>,
    parsed: &SqlStatement,
    statement: &Statement,
    footprint: &mut Footprint,
) -> Result<(Vec<Mutation>, u64), StoreError> {
    let executor = Executor::new(view, statement.params());
    match parsed {
        SqlStatement::Update(u) => {
            let rows = executor.update(parsed, footprint)?;
            let count = rows.len() as u64;
            let mutations = rows
                .into_iter()
                .map(|(key, row)| Mutation::update(u.table.clone(), key, row))
                .collect();
            Ok((mutations, count))
        }
        SqlStatement::Delete(d) => {
            let keys = executor.delete(parsed, footprint)?;
            let count = keys.len() as u64;
            let mutations = if keys.is_empty() {
                Vec::new()
            } else {
                vec![Mutation::delete(d.table.clone(), KeySet::from_keys(keys))]
            };
            Ok((mutations, count))
        }
        SqlStatement::Select(_) => {
            Err(StoreError::InvalidArgument("expected a DML statement, got SELECT".into()))
        }
    }
}
