//! Snapshot views over the store state, optionally overlaid with a
//! transaction's staged changes, plus mutation staging.

use std::collections::{BTreeMap, BTreeSet};

use rowmap_core::{Key, KeySet, Mutation, ReadRequest, Row, StoreError, Timestamp, Value, WriteOp};

use crate::table::{State, TableSchema};

/// Staged row images per table. `None` deletes the row.
pub(crate) type Pending = BTreeMap<String, BTreeMap<Key, Option<Row>>>;

/// What a transaction observed: point-read keys and fully scanned tables.
#[derive(Debug, Default)]
pub(crate) struct Footprint {
    pub keys: BTreeSet<(String, Key)>,
    pub tables: BTreeSet<String>,
}

impl Footprint {
    pub fn key(&mut self, table: &str, key: &Key) {
        self.keys.insert((table.to_string(), key.clone()));
    }

    pub fn table(&mut self, table: &str) {
        self.tables.insert(table.to_string());
    }
}

pub(crate) struct View<'a> {
    state: &'a State,
    ts: Timestamp,
    pending: Option<&'a Pending>,
    strict: bool,
}

impl<'a> View<'a> {
    pub fn new(state: &'a State, ts: Timestamp, strict: bool) -> Self {
        Self { state, ts, pending: None, strict }
    }

    pub fn with_pending(mut self, pending: &'a Pending) -> Self {
        self.pending = Some(pending);
        self
    }

    pub fn schema(&self, table: &str) -> Option<&'a TableSchema> {
        self.state.schemas.get(table)
    }

    /// Unknown tables read as empty unless the store enforces its schema.
    pub fn check_table(&self, table: &str) -> Result<(), StoreError> {
        if self.strict && !self.state.schemas.contains_key(table) {
            return Err(StoreError::NotFound(format!("table {table}")));
        }
        Ok(())
    }

    pub fn get(&self, table: &str, key: &Key) -> Option<Row> {
        if let Some(staged) = self.pending.and_then(|p| p.get(table)).and_then(|rows| rows.get(key)) {
            return staged.clone();
        }
        self.state.tables.get(table)?.get_at(key, self.ts).cloned()
    }

    /// Live rows of `table` in key order.
    pub fn scan(&self, table: &str) -> Vec<(Key, Row)> {
        let mut rows: BTreeMap<Key, Row> = match self.state.tables.get(table) {
            Some(t) => t.scan_at(self.ts).map(|(k, r)| (k.clone(), r.clone())).collect(),
            None => BTreeMap::new(),
        };
        if let Some(staged) = self.pending.and_then(|p| p.get(table)) {
            for (key, row) in staged {
                match row {
                    Some(row) => {
                        rows.insert(key.clone(), row.clone());
                    }
                    None => {
                        rows.remove(key);
                    }
                }
            }
        }
        rows.into_iter().collect()
    }

    /// Keyed (or index) read. Records what it touched in `footprint`.
    pub fn read(&self, request: &ReadRequest<'_>, footprint: &mut Footprint) -> Result<Vec<Row>, StoreError> {
        if let Some(index) = request.index {
            return self.read_index(index, request, footprint);
        }
        self.check_table(request.table)?;

        let keys = request.keys;
        let mut found: BTreeMap<Key, Row> = BTreeMap::new();
        if keys.is_all() || keys.has_ranges() {
            footprint.table(request.table);
            for (key, row) in self.scan(request.table) {
                if keys.contains(&key) {
                    found.insert(key, row);
                }
            }
        } else {
            for key in keys.keys() {
                footprint.key(request.table, key);
                if let Some(row) = self.get(request.table, key) {
                    found.insert(key.clone(), row);
                }
            }
        }

        let limit = request.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        found
            .into_values()
            .take(limit)
            .map(|row| self.project(request.table, &row, request.columns))
            .collect()
    }

    fn read_index(&self, index: &str, request: &ReadRequest<'_>, footprint: &mut Footprint) -> Result<Vec<Row>, StoreError> {
        let schema = self
            .state
            .indexes
            .get(index)
            .ok_or_else(|| StoreError::NotFound(format!("index {index}")))?;
        if schema.table != request.table {
            return Err(StoreError::InvalidArgument(format!(
                "index {index} belongs to table {}, not {}",
                schema.table, request.table
            )));
        }
        footprint.table(&schema.table);

        let mut hits: Vec<(Key, Key, Row)> = Vec::new();
        for (key, row) in self.scan(&schema.table) {
            let index_key = Key::new(
                schema
                    .columns
                    .iter()
                    .map(|c| row.get_value(c).cloned().unwrap_or(Value::Null))
                    .collect(),
            );
            if request.keys.contains(&index_key) {
                hits.push((index_key, key, row));
            }
        }
        hits.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let limit = request.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        hits.into_iter()
            .take(limit)
            .map(|(_, _, row)| self.project(&schema.table, &row, request.columns))
            .collect()
    }

    /// Row restricted to `columns`. Declared columns missing from the row read as NULL.
    pub fn project(&self, table: &str, row: &Row, columns: &[String]) -> Result<Row, StoreError> {
        if columns.is_empty() {
            return Ok(row.clone());
        }
        let schema = self.schema(table);
        let mut out = Row::new();
        for column in columns {
            match row.get_value(column) {
                Some(v) => out.set(column.clone(), v.clone()),
                None => {
                    if let Some(s) = schema {
                        if !s.has_column(column) {
                            return Err(StoreError::InvalidArgument(format!("table {table} has no column {column}")));
                        }
                    }
                    out.set(column.clone(), Value::Null);
                }
            }
        }
        Ok(out)
    }

    /// Stages one mutation on top of `pending`.
    pub fn stage(
        state: &State,
        ts: Timestamp,
        strict: bool,
        pending: &mut Pending,
        mutation: &Mutation,
        footprint: &mut Footprint,
    ) -> Result<(), StoreError> {
        let changes = {
            let view = View::new(state, ts, strict).with_pending(pending);
            match mutation {
                Mutation::Write { op, table, key, row } => {
                    vec![(table.clone(), key.clone(), Some(view.plan_write(*op, table, key, row)?))]
                }
                Mutation::Delete { table, keys } => view.plan_delete(table, keys, footprint)?,
            }
        };
        for (table, key, row) in changes {
            pending.entry(table).or_default().insert(key, row);
        }
        Ok(())
    }

    fn plan_write(&self, op: WriteOp, table: &str, key: &Key, row: &Row) -> Result<Row, StoreError> {
        self.check_table(table)?;
        check_key(table, key)?;

        let mut row = row.clone();
        if let Some(schema) = self.schema(table) {
            if key.len() != schema.primary_key.len() {
                return Err(StoreError::InvalidArgument(format!(
                    "table {table} expects {} key parts, got {}",
                    schema.primary_key.len(),
                    key.len()
                )));
            }
            if let Some(unknown) = row.columns().find(|c| !schema.has_column(c)) {
                return Err(StoreError::InvalidArgument(format!("table {table} has no column {unknown}")));
            }
            for (column, part) in schema.primary_key.iter().zip(key.parts()) {
                row.set(column.clone(), part.clone());
            }
        }

        let existing = self.get(table, key);
        let image = match (op, existing) {
            (WriteOp::Insert, Some(_)) => {
                return Err(StoreError::AlreadyExists(format!("row {key} in table {table}")))
            }
            (WriteOp::Update, None) => return Err(StoreError::NotFound(format!("row {key} in table {table}"))),
            (WriteOp::Update | WriteOp::InsertOrUpdate, Some(mut current)) => {
                current.merge(&row);
                current
            }
            (WriteOp::Insert | WriteOp::InsertOrUpdate, None) => {
                self.check_parent(table, key)?;
                row
            }
        };
        Ok(image)
    }

    /// Interleaved rows need their parent row to exist.
    fn check_parent(&self, table: &str, key: &Key) -> Result<(), StoreError> {
        let Some(parent) = self.schema(table).and_then(|s| s.parent.as_deref()) else {
            return Ok(());
        };
        let Some(parent_schema) = self.schema(parent) else {
            return Ok(());
        };
        let parent_key = Key::new(key.parts()[..parent_schema.primary_key.len().min(key.len())].to_vec());
        if self.get(parent, &parent_key).is_none() {
            return Err(StoreError::NotFound(format!("parent row {parent_key} in table {parent}")));
        }
        Ok(())
    }

    /// Deletes matching rows plus interleaved descendants declared ON DELETE CASCADE.
    pub fn plan_delete(
        &self,
        table: &str,
        keys: &KeySet,
        footprint: &mut Footprint,
    ) -> Result<Vec<(String, Key, Option<Row>)>, StoreError> {
        self.check_table(table)?;
        let targets: Vec<Key> = if keys.is_all() || keys.has_ranges() {
            footprint.table(table);
            self.scan(table).into_iter().map(|(k, _)| k).filter(|k| keys.contains(k)).collect()
        } else {
            keys.keys().iter().filter(|k| self.get(table, k).is_some()).cloned().collect()
        };

        let mut out = Vec::new();
        for key in targets {
            self.collect_delete(table, key, &mut out, footprint)?;
        }
        Ok(out)
    }

    fn collect_delete(
        &self,
        table: &str,
        key: Key,
        out: &mut Vec<(String, Key, Option<Row>)>,
        footprint: &mut Footprint,
    ) -> Result<(), StoreError> {
        for child in self.state.children_of(table) {
            footprint.table(&child.name);
            let rows: Vec<Key> = self
                .scan(&child.name)
                .into_iter()
                .map(|(k, _)| k)
                .filter(|k| key.is_prefix_of(k))
                .collect();
            if rows.is_empty() {
                continue;
            }
            if !child.on_delete_cascade {
                return Err(StoreError::InvalidState(format!(
                    "row {key} of table {table} still has rows in interleaved table {}",
                    child.name
                )));
            }
            for child_key in rows {
                self.collect_delete(&child.name, child_key, out, footprint)?;
            }
        }
        out.push((table.to_string(), key, None));
        Ok(())
    }
}

fn check_key(table: &str, key: &Key) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidArgument(format!("empty key for table {table}")));
    }
    if let Some(bad) = key.parts().iter().find(|p| !p.is_scalar()) {
        return Err(StoreError::InvalidArgument(format!("{} is not a valid key part", bad.type_name())));
    }
    Ok(())
}
