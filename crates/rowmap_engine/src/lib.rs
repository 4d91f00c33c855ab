//! Rowmap engine (library)
//! Entity-mapping and transaction-scoped data-access façade over a keyed
//! relational store. The store itself sits behind the `rowmap_core` ports;
//! the `mem` feature wires in the in-memory implementation.

pub mod config;
pub mod events;
pub mod mapping;
pub mod options;
pub mod schema;
pub mod sql;
pub mod template;

mod tx;

pub use config::TemplateConfig;
pub use events::{TemplateEvent, TemplateListener};
pub use mapping::{children_from_row, children_to_value, Column, ColumnType, Entity, EntityDescriptor, Fetch, Relation};
pub use options::{Direction, PageableQueryOptions, QueryOptions, ReadOptions, Sort};
pub use schema::{DatabaseAdminTemplate, SchemaUtils};
pub use template::{resolve_read_path, ReadPath, Template};

// Re-export the core vocabulary so applications depend on one crate
pub use rowmap_core::{
    key, DatabaseAdmin, FromValue, Key, KeyRange, KeySet, Mutation, ReadContext, ReadOnlyTransaction, ReadRequest,
    ReadWriteTransaction, RetryPolicy, Row, Statement, StoreClient, StoreError, Timestamp, TimestampBound, Value, WriteOp,
};

#[cfg(feature = "mem")]
pub use rowmap_storage_mem::{InMemoryStore, MemStoreConfig};
