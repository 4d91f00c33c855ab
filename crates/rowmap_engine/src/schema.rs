//! DDL generation from entity descriptors and the admin wrapper that runs it

use std::collections::BTreeSet;
use std::sync::Arc;

use rowmap_core::{DatabaseAdmin, StoreError};

use crate::mapping::{Column, EntityDescriptor};

/// Builds `CREATE TABLE` / `DROP TABLE` statements for mapped types.
pub struct SchemaUtils;

impl SchemaUtils {
    fn column_ddl(column: &Column) -> String {
        let mut ddl = format!("{} {}", column.name, column.column_type.ddl());
        if !column.nullable {
            ddl.push_str(" NOT NULL");
        }
        ddl
    }

    fn table_ddl(desc: &EntityDescriptor, parent: Option<&EntityDescriptor>) -> String {
        let columns: Vec<String> = desc.all_columns().map(Self::column_ddl).collect();
        let mut ddl = format!(
            "CREATE TABLE {} ( {} ) PRIMARY KEY ( {} )",
            desc.table(),
            columns.join(" , "),
            desc.key_column_names().join(" , ")
        );
        if let Some(parent) = parent {
            ddl.push_str(&format!(", INTERLEAVE IN PARENT {} ON DELETE CASCADE", parent.table()));
        }
        ddl
    }

    /// Stand-alone table for `desc`; relations are not followed.
    pub fn create_table_ddl(desc: &EntityDescriptor) -> String {
        Self::table_ddl(desc, None)
    }

    /// `desc` followed by its interleaved descendants, parents first. Child
    /// tables are interleaved with `ON DELETE CASCADE`.
    pub fn create_table_ddl_cascade(desc: &EntityDescriptor) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        Self::collect_create(desc, None, &mut seen, &mut out);
        out
    }

    fn collect_create<'d>(
        desc: &'d EntityDescriptor,
        parent: Option<&EntityDescriptor>,
        seen: &mut BTreeSet<&'d str>,
        out: &mut Vec<String>,
    ) {
        if !seen.insert(desc.table()) {
            return;
        }
        out.push(Self::table_ddl(desc, parent));
        for relation in desc.relations() {
            Self::collect_create(relation.child, Some(desc), seen, out);
        }
    }

    pub fn drop_table_ddl(desc: &EntityDescriptor) -> String {
        format!("DROP TABLE {}", desc.table())
    }

    /// Drops `desc` and its interleaved descendants, deepest children first.
    pub fn drop_table_ddl_cascade(desc: &EntityDescriptor) -> Vec<String> {
        let mut tables = Vec::new();
        let mut seen = BTreeSet::new();
        Self::collect_tables(desc, &mut seen, &mut tables);
        tables.iter().rev().map(|table| format!("DROP TABLE {table}")).collect()
    }

    fn collect_tables<'d>(desc: &'d EntityDescriptor, seen: &mut BTreeSet<&'d str>, out: &mut Vec<&'d str>) {
        if !seen.insert(desc.table()) {
            return;
        }
        out.push(desc.table());
        for relation in desc.relations() {
            Self::collect_tables(relation.child, seen, out);
        }
    }
}

/// Schema administration over a [`DatabaseAdmin`] port.
#[derive(Clone)]
pub struct DatabaseAdminTemplate {
    admin: Arc<dyn DatabaseAdmin>,
}

impl DatabaseAdminTemplate {
    pub fn new(admin: Arc<dyn DatabaseAdmin>) -> Self {
        Self { admin }
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        self.admin.table_exists(table)
    }

    /// Applies `statements` as one schema change; nothing is applied if any fails.
    pub fn execute_ddl_strings(&self, statements: &[String]) -> Result<(), StoreError> {
        if statements.is_empty() {
            return Ok(());
        }
        log::info!("applying {} DDL statement(s)", statements.len());
        for statement in statements {
            log::debug!("ddl: {statement}");
        }
        self.admin.update_ddl(statements)
    }

    /// Creates the tables of `desc` and its interleaved descendants that do
    /// not exist yet. Returns the names of the tables created.
    pub fn create_tables_if_missing(&self, desc: &EntityDescriptor) -> Result<Vec<String>, StoreError> {
        let mut tables = Vec::new();
        SchemaUtils::collect_tables(desc, &mut BTreeSet::new(), &mut tables);
        let ddl = SchemaUtils::create_table_ddl_cascade(desc);

        let mut missing = Vec::new();
        let mut created = Vec::new();
        for (table, statement) in tables.into_iter().zip(ddl) {
            if !self.table_exists(table)? {
                missing.push(statement);
                created.push(table.to_string());
            }
        }
        self.execute_ddl_strings(&missing)?;
        Ok(created)
    }
}
