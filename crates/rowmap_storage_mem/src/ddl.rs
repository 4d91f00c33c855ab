//! Schema changes: CREATE/DROP TABLE and INDEX applied to the catalog

use std::collections::BTreeMap;

use rowmap_core::{validate_identifier, StoreError};

use crate::exec::ast::{CreateIndex, CreateTable, DdlStatement};
use crate::table::{IndexSchema, TableSchema};

/// Working copy of the catalog; changes only land if every statement applies.
#[derive(Clone, Debug, Default)]
pub(crate) struct Catalog {
    pub schemas: BTreeMap<String, TableSchema>,
    pub indexes: BTreeMap<String, IndexSchema>,
    pub dropped: Vec<String>,
}

impl Catalog {
    pub fn new(schemas: &BTreeMap<String, TableSchema>, indexes: &BTreeMap<String, IndexSchema>) -> Self {
        Self { schemas: schemas.clone(), indexes: indexes.clone(), dropped: Vec::new() }
    }

    pub fn apply(&mut self, stmt: DdlStatement) -> Result<(), StoreError> {
        match stmt {
            DdlStatement::CreateTable(t) => self.create_table(t),
            DdlStatement::CreateIndex(i) => self.create_index(i),
            DdlStatement::DropTable(name) => self.drop_table(&name),
            DdlStatement::DropIndex(name) => self
                .indexes
                .remove(&name)
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound(format!("index {name}"))),
        }
    }

    fn create_table(&mut self, t: CreateTable) -> Result<(), StoreError> {
        validate_identifier(&t.name)?;
        if self.schemas.contains_key(&t.name) {
            return Err(StoreError::AlreadyExists(format!("table {}", t.name)));
        }
        for column in &t.columns {
            validate_identifier(column)?;
        }
        if t.primary_key.is_empty() {
            return Err(StoreError::InvalidArgument(format!("table {} has no primary key", t.name)));
        }
        if let Some(missing) = t.primary_key.iter().find(|k| !t.columns.contains(k)) {
            return Err(StoreError::InvalidArgument(format!(
                "primary key column {missing} is not a column of {}",
                t.name
            )));
        }
        if let Some(parent) = &t.parent {
            let parent_schema = self
                .schemas
                .get(parent)
                .ok_or_else(|| StoreError::NotFound(format!("parent table {parent}")))?;
            let is_prefix = parent_schema.primary_key.len() < t.primary_key.len()
                && parent_schema.primary_key.iter().zip(&t.primary_key).all(|(a, b)| a == b);
            if !is_prefix {
                return Err(StoreError::InvalidArgument(format!(
                    "primary key of {} must start with the primary key of {parent}",
                    t.name
                )));
            }
        }
        self.schemas.insert(
            t.name.clone(),
            TableSchema {
                name: t.name,
                columns: t.columns,
                primary_key: t.primary_key,
                parent: t.parent,
                on_delete_cascade: t.on_delete_cascade,
            },
        );
        Ok(())
    }

    fn create_index(&mut self, i: CreateIndex) -> Result<(), StoreError> {
        validate_identifier(&i.name)?;
        if self.indexes.contains_key(&i.name) {
            return Err(StoreError::AlreadyExists(format!("index {}", i.name)));
        }
        let schema = self
            .schemas
            .get(&i.table)
            .ok_or_else(|| StoreError::NotFound(format!("table {}", i.table)))?;
        if let Some(missing) = i.columns.iter().find(|c| !schema.has_column(c)) {
            return Err(StoreError::InvalidArgument(format!("table {} has no column {missing}", i.table)));
        }
        self.indexes.insert(i.name.clone(), IndexSchema { name: i.name, table: i.table, columns: i.columns });
        Ok(())
    }

    fn drop_table(&mut self, name: &str) -> Result<(), StoreError> {
        if !self.schemas.contains_key(name) {
            return Err(StoreError::NotFound(format!("table {name}")));
        }
        if let Some(child) = self.schemas.values().find(|s| s.parent.as_deref() == Some(name)) {
            return Err(StoreError::InvalidState(format!(
                "table {name} still has interleaved table {}",
                child.name
            )));
        }
        if let Some(index) = self.indexes.values().find(|i| i.table == name) {
            return Err(StoreError::InvalidState(format!("table {name} still has index {}", index.name)));
        }
        self.schemas.remove(name);
        self.dropped.push(name.to_string());
        Ok(())
    }
}
