//! Versioned tables and the schema catalog (in-memory MVCC)

use std::collections::BTreeMap;

use rowmap_core::{Key, Row, StoreError, Timestamp, TimestampBound};

/// One committed image of a row. `row == None` is a tombstone.
#[derive(Clone, Debug)]
pub(crate) struct Version {
    pub ts: Timestamp,
    pub row: Option<Row>,
}

/// All committed versions of every row of one table, oldest first per key.
#[derive(Clone, Debug, Default)]
pub(crate) struct Table {
    pub rows: BTreeMap<Key, Vec<Version>>,
    pub last_modified: Timestamp,
}

impl Table {
    /// Row visible at `ts`, if any.
    pub fn get_at(&self, key: &Key, ts: Timestamp) -> Option<&Row> {
        visible(self.rows.get(key)?, ts)
    }

    /// Live rows at `ts`, in key order.
    pub fn scan_at(&self, ts: Timestamp) -> impl Iterator<Item = (&Key, &Row)> {
        self.rows
            .iter()
            .filter_map(move |(key, versions)| visible(versions, ts).map(|row| (key, row)))
    }

    /// Commit timestamp of the newest version of `key`, tombstones included.
    pub fn last_write(&self, key: &Key) -> Option<Timestamp> {
        self.rows.get(key).and_then(|versions| versions.last()).map(|v| v.ts)
    }

    pub fn install(&mut self, key: Key, row: Option<Row>, ts: Timestamp) {
        self.rows.entry(key).or_default().push(Version { ts, row });
        self.last_modified = ts;
    }
}

fn visible(versions: &[Version], ts: Timestamp) -> Option<&Row> {
    versions
        .iter()
        .rev()
        .find(|v| v.ts <= ts)
        .and_then(|v| v.row.as_ref())
}

/// Columns and key layout declared by `CREATE TABLE`.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    pub parent: Option<String>,
    pub on_delete_cascade: bool,
}

impl TableSchema {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexSchema {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
}

/// Everything guarded by the store lock.
#[derive(Debug, Default)]
pub(crate) struct State {
    pub tables: BTreeMap<String, Table>,
    pub schemas: BTreeMap<String, TableSchema>,
    pub indexes: BTreeMap<String, IndexSchema>,
    pub last_commit: Timestamp,
    /// Highest timestamp handed out to a reader; commits land after it.
    pub max_read_ts: Timestamp,
}

impl State {
    /// Next commit timestamp: strictly increasing and never behind the wall clock.
    pub fn next_commit_ts(&self) -> Timestamp {
        self.last_commit.max(self.max_read_ts).saturating_add(1).max(rowmap_core::now_micros())
    }

    /// Snapshot timestamp for a read under `bound`. Timestamps past both the
    /// clock and the last commit are rejected so commits never jump ahead.
    pub fn read_ts(&mut self, bound: TimestampBound) -> Result<Timestamp, StoreError> {
        let horizon = self.last_commit.max(rowmap_core::now_micros());
        let ts = match bound {
            TimestampBound::Strong | TimestampBound::MaxStaleness(_) => self.last_commit,
            TimestampBound::MinReadTimestamp(min) => self.last_commit.max(min),
            TimestampBound::ExactStaleness(d) => {
                rowmap_core::now_micros().saturating_sub(d.as_micros() as u64)
            }
            TimestampBound::ReadTimestamp(ts) => ts,
        };
        if ts > horizon {
            return Err(StoreError::InvalidArgument(format!(
                "read timestamp {ts} is in the future (now {horizon})"
            )));
        }
        self.max_read_ts = self.max_read_ts.max(ts);
        Ok(ts)
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.schemas.contains_key(table) || self.tables.contains_key(table)
    }

    /// Tables declared `INTERLEAVE IN PARENT table`.
    pub fn children_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a TableSchema> + 'a {
        self.schemas.values().filter(move |s| s.parent.as_deref() == Some(table))
    }

    /// Applies staged changes at one commit timestamp.
    pub fn install(&mut self, changes: BTreeMap<String, BTreeMap<Key, Option<Row>>>) -> Timestamp {
        let ts = self.next_commit_ts();
        for (table, rows) in changes {
            let t = self.tables.entry(table).or_default();
            for (key, row) in rows {
                t.install(key, row, ts);
            }
        }
        self.last_commit = ts;
        ts
    }
}
