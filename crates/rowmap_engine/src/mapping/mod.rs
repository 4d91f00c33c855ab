//! Entity mapping: per-type descriptors and row conversion.
//!
//! A type opts in by implementing [`Entity`]: it hands out a `'static`
//! [`EntityDescriptor`] (usually built once behind a `OnceLock`) and converts
//! itself to and from a [`Row`] keyed by column name. Interleaved child
//! collections travel inside the row as an array of structs stored under the
//! relation's property name.

pub mod mutation;

use std::collections::BTreeSet;

use rowmap_core::{validate_identifier, Key, Row, StoreError, Value};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int64,
    Float64,
    String,
    Bytes,
    Array(Box<ColumnType>),
}

impl ColumnType {
    /// Type as written in `CREATE TABLE`.
    pub fn ddl(&self) -> String {
        match self {
            ColumnType::Bool => "BOOL".into(),
            ColumnType::Int64 => "INT64".into(),
            ColumnType::Float64 => "FLOAT64".into(),
            ColumnType::String => "STRING(MAX)".into(),
            ColumnType::Bytes => "BYTES(MAX)".into(),
            ColumnType::Array(inner) => format!("ARRAY<{}>", inner.ddl()),
        }
    }
}

/// One mapped column: store name, entity property name, type and nullability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub property: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl Column {
    /// Nullable column whose property shares its name.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        Self { property: name.clone(), name, column_type, nullable: true }
    }

    pub fn property(mut self, property: impl Into<String>) -> Self {
        self.property = property.into();
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fetch {
    /// Loaded together with the parent by every read and query.
    Eager,
    /// Loaded on demand through `Template::read_interleaved`.
    Lazy,
}

/// Child table interleaved under the parent, exposed as a collection property.
#[derive(Clone, Debug)]
pub struct Relation {
    pub property: String,
    pub child: &'static EntityDescriptor,
    pub fetch: Fetch,
}

#[derive(Debug)]
pub struct EntityDescriptor {
    table: String,
    key_columns: Vec<Column>,
    columns: Vec<Column>,
    where_clause: Option<String>,
    relations: Vec<Relation>,
}

impl EntityDescriptor {
    pub fn builder(table: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            table: table.into(),
            key_columns: Vec::new(),
            columns: Vec::new(),
            where_clause: None,
            relations: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Key columns in key order.
    pub fn key_columns(&self) -> &[Column] {
        &self.key_columns
    }

    /// Non-key columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Key columns followed by the other columns.
    pub fn all_columns(&self) -> impl Iterator<Item = &Column> {
        self.key_columns.iter().chain(self.columns.iter())
    }

    pub fn column_names(&self) -> Vec<String> {
        self.all_columns().map(|c| c.name.clone()).collect()
    }

    pub fn key_column_names(&self) -> Vec<String> {
        self.key_columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn where_clause(&self) -> Option<&str> {
        self.where_clause.as_deref()
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, property: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.property == property)
    }

    pub fn column_for_property(&self, property: &str) -> Option<&Column> {
        self.all_columns().find(|c| c.property == property)
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.column_for_property(property).is_some() || self.relation(property).is_some()
    }

    /// A row filter or an eager child collection can only be honored by a SQL query.
    pub fn requires_sql_read(&self) -> bool {
        self.where_clause.is_some() || self.relations.iter().any(|r| r.fetch == Fetch::Eager)
    }

    /// Rejects keys that cannot address exactly one row of this table.
    pub fn validate_key(&self, key: &Key) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument(format!("empty key for {}", self.table)));
        }
        if key.len() != self.key_columns.len() {
            return Err(StoreError::InvalidArgument(format!(
                "{} expects {} key part(s), got {}",
                self.table,
                self.key_columns.len(),
                key.len()
            )));
        }
        if let Some(part) = key.parts().iter().find(|p| !p.is_scalar()) {
            return Err(StoreError::InvalidArgument(format!(
                "{} cannot be a key part of {}",
                part.type_name(),
                self.table
            )));
        }
        Ok(())
    }

    /// Key carried by an entity row.
    pub fn key_of(&self, row: &Row) -> Result<Key, StoreError> {
        let mut parts = Vec::with_capacity(self.key_columns.len());
        for column in &self.key_columns {
            let part = row.get_value(&column.name).ok_or_else(|| {
                StoreError::InvalidArgument(format!("{} row lacks key column {}", self.table, column.name))
            })?;
            parts.push(part.clone());
        }
        let key = Key::new(parts);
        self.validate_key(&key)?;
        Ok(key)
    }
}

pub struct EntityDescriptorBuilder {
    table: String,
    key_columns: Vec<Column>,
    columns: Vec<Column>,
    where_clause: Option<String>,
    relations: Vec<Relation>,
}

impl EntityDescriptorBuilder {
    /// Adds the next key column; key columns are never nullable.
    pub fn key(mut self, column: Column) -> Self {
        self.key_columns.push(column.not_null());
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// SQL condition every read of this type must satisfy.
    pub fn where_clause(mut self, condition: impl Into<String>) -> Self {
        self.where_clause = Some(condition.into());
        self
    }

    pub fn interleaved(mut self, property: impl Into<String>, child: &'static EntityDescriptor, fetch: Fetch) -> Self {
        self.relations.push(Relation { property: property.into(), child, fetch });
        self
    }

    pub fn build(self) -> Result<EntityDescriptor, StoreError> {
        validate_identifier(&self.table)?;
        if self.key_columns.is_empty() {
            return Err(StoreError::InvalidArgument(format!("{} declares no key column", self.table)));
        }

        let mut names = BTreeSet::new();
        let mut properties = BTreeSet::new();
        for column in self.key_columns.iter().chain(self.columns.iter()) {
            validate_identifier(&column.name)?;
            if !names.insert(column.name.as_str()) {
                return Err(StoreError::InvalidArgument(format!("{}: duplicate column {}", self.table, column.name)));
            }
            if !properties.insert(column.property.as_str()) {
                return Err(StoreError::InvalidArgument(format!(
                    "{}: duplicate property {}",
                    self.table, column.property
                )));
            }
        }

        for relation in &self.relations {
            if !properties.insert(relation.property.as_str()) {
                return Err(StoreError::InvalidArgument(format!(
                    "{}: duplicate property {}",
                    self.table, relation.property
                )));
            }
            let child_keys = &relation.child.key_columns;
            let prefixed = child_keys.len() > self.key_columns.len()
                && self.key_columns.iter().zip(child_keys).all(|(p, c)| p.name == c.name);
            if !prefixed {
                return Err(StoreError::InvalidArgument(format!(
                    "key of interleaved table {} must start with the key columns of {}",
                    relation.child.table, self.table
                )));
            }
        }

        Ok(EntityDescriptor {
            table: self.table,
            key_columns: self.key_columns,
            columns: self.columns,
            where_clause: self.where_clause,
            relations: self.relations,
        })
    }
}

/// Application record type stored as one row of `descriptor().table()`.
pub trait Entity: Sized {
    fn descriptor() -> &'static EntityDescriptor;

    /// Column values keyed by column name. Child collections go under their
    /// relation property, see [`children_to_value`].
    fn to_row(&self) -> Row;

    fn from_row(row: &Row) -> Result<Self, StoreError>;
}

/// Encodes interleaved children for [`Entity::to_row`].
pub fn children_to_value<C: Entity>(children: &[C]) -> Value {
    Value::Array(children.iter().map(|c| c.to_row().to_map_value()).collect())
}

/// Decodes interleaved children in [`Entity::from_row`]. A collection that was
/// not loaded (lazy or not selected) decodes as empty.
pub fn children_from_row<C: Entity>(row: &Row, property: &str) -> Result<Vec<C>, StoreError> {
    match row.get_value(property) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| Row::from_map_value(item).and_then(|r| C::from_row(&r)))
            .collect(),
        Some(other) => Err(StoreError::Mapping(format!(
            "property {property}: expected ARRAY of STRUCT, got {}",
            other.type_name()
        ))),
    }
}

/// Columns and eager relations selected by include/exclude property sets.
#[derive(Debug)]
pub(crate) struct Selection {
    pub columns: Vec<String>,
    pub relations: Vec<&'static Relation>,
    pub partial: bool,
}

impl Selection {
    pub fn resolve(
        desc: &'static EntityDescriptor,
        include: Option<&BTreeSet<String>>,
        exclude: Option<&BTreeSet<String>>,
    ) -> Result<Self, StoreError> {
        for property in include.into_iter().chain(exclude).flatten() {
            if !desc.has_property(property) {
                return Err(StoreError::InvalidArgument(format!(
                    "{} has no property {property}",
                    desc.table()
                )));
            }
        }
        let wanted = |property: &str| {
            include.map_or(true, |set| set.contains(property)) && !exclude.is_some_and(|set| set.contains(property))
        };

        // key columns are always read
        let mut columns = desc.key_column_names();
        columns.extend(desc.columns().iter().filter(|c| wanted(&c.property)).map(|c| c.name.clone()));
        let relations = desc
            .relations()
            .iter()
            .filter(|r| r.fetch == Fetch::Eager && wanted(&r.property))
            .collect();
        let partial = include.is_some() || exclude.is_some_and(|set| !set.is_empty());
        Ok(Self { columns, relations, partial })
    }

    pub fn all(desc: &'static EntityDescriptor) -> Self {
        Self {
            columns: desc.column_names(),
            relations: desc.relations().iter().filter(|r| r.fetch == Fetch::Eager).collect(),
            partial: false,
        }
    }
}
