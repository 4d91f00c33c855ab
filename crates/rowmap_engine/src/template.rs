//! The data-access façade: CRUD, queries and transaction scoping over a store client.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::Arc;

use rowmap_core::{
    Key, KeySet, Mutation, ReadContext, ReadRequest, Row, Statement, StoreClient, StoreError, TimestampBound, Value,
    WriteOp,
};

use crate::config::TemplateConfig;
use crate::events::{TemplateEvent, TemplateListener};
use crate::mapping::mutation::{delete_mutations, write_mutations};
use crate::mapping::{Entity, EntityDescriptor, Selection};
use crate::options::{PageableQueryOptions, QueryOptions, ReadOptions};
use crate::sql;
use crate::tx::TxScope;

/// How a key-set read reaches the store.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadPath {
    /// Keyed read through `ReadContext::read`.
    Direct,
    /// Generated SQL query, for types with a where clause or eager children.
    Sql(QueryOptions),
}

/// Picks the read path for `desc`. There is no fallback between the two:
/// options or keys the SQL path cannot express are an error.
pub fn resolve_read_path(desc: &EntityDescriptor, options: &ReadOptions, keys: &KeySet) -> Result<ReadPath, StoreError> {
    if !desc.requires_sql_read() {
        return Ok(ReadPath::Direct);
    }
    let query = options.to_query_options().map_err(|e| match e {
        StoreError::InvalidArgument(msg) => StoreError::InvalidArgument(format!(
            "{} requires a query-driven read (where clause or eager relation): {msg}",
            desc.table()
        )),
        other => other,
    })?;
    if keys.has_ranges() {
        return Err(StoreError::InvalidArgument(format!(
            "{} requires a query-driven read (where clause or eager relation), which cannot express key ranges",
            desc.table()
        )));
    }
    Ok(ReadPath::Sql(query))
}

fn unbound() -> StoreError {
    StoreError::InvalidState("no transaction bound".into())
}

#[derive(Clone, Copy)]
enum WriteKind {
    Save,
    Delete,
}

/// Entity data-access façade.
///
/// Cloning is cheap. An ambient template runs every call in its own implicit
/// transaction; the templates handed to `perform_read_write_transaction` and
/// `perform_read_only_transaction` callbacks are bound to that transaction.
#[derive(Clone)]
pub struct Template {
    client: Arc<dyn StoreClient>,
    config: Arc<TemplateConfig>,
    listeners: Arc<Vec<Arc<dyn TemplateListener>>>,
    scope: Arc<TxScope>,
}

impl Template {
    pub fn new(client: Arc<dyn StoreClient>) -> Self {
        Self::with_config(client, TemplateConfig::default())
    }

    pub fn with_config(client: Arc<dyn StoreClient>, config: TemplateConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
            listeners: Arc::new(Vec::new()),
            scope: Arc::new(TxScope::Ambient),
        }
    }

    /// Template over a fresh in-memory store.
    #[cfg(feature = "mem")]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(rowmap_storage_mem::InMemoryStore::new()))
    }

    pub fn add_listener(&mut self, listener: Arc<dyn TemplateListener>) {
        Arc::make_mut(&mut self.listeners).push(listener);
    }

    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<dyn StoreClient> {
        &self.client
    }

    /// True when bound to a caller transaction.
    pub fn in_transaction(&self) -> bool {
        self.scope.is_bound()
    }

    fn bind(&self, scope: TxScope) -> Template {
        Template { scope: Arc::new(scope), ..self.clone() }
    }

    fn emit(&self, event: TemplateEvent<'_>) {
        for listener in self.listeners.iter() {
            listener.on_event(&event);
        }
    }

    /// Runs `f` on the bound transaction, or on a fresh context at `bound`.
    /// `consistent` asks for a snapshot that spans several calls of `f`.
    fn with_read<T>(
        &self,
        bound: TimestampBound,
        consistent: bool,
        f: impl FnOnce(&mut dyn ReadContext) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if self.scope.is_bound() {
            return self.scope.with_bound_read(f).unwrap_or_else(|| Err(unbound()));
        }
        if consistent {
            let mut tx = self.client.begin_read_only(bound)?;
            let result = f(tx.as_read_context());
            tx.close();
            result
        } else {
            let mut ctx = self.client.single_use(bound)?;
            f(&mut *ctx)
        }
    }

    fn apply(&self, kind: WriteKind, table: &str, mutations: Vec<Mutation>) -> Result<(), StoreError> {
        if mutations.is_empty() {
            return Ok(());
        }
        self.emit(match kind {
            WriteKind::Save => TemplateEvent::BeforeSave { table, mutations: &mutations },
            WriteKind::Delete => TemplateEvent::BeforeDelete { table, mutations: &mutations },
        });
        if self.scope.is_bound() {
            self.scope.with_read_write(|tx| tx.buffer(mutations.clone())).unwrap_or_else(|| Err(unbound()))?;
        } else {
            let ts = self.client.write(mutations.clone())?;
            log::debug!("{table}: {} mutation(s) committed at {ts}", mutations.len());
        }
        self.emit(match kind {
            WriteKind::Save => TemplateEvent::AfterSave { table, mutations: &mutations },
            WriteKind::Delete => TemplateEvent::AfterDelete { table, mutations: &mutations },
        });
        Ok(())
    }

    // -----------------------
    // Reads
    // -----------------------

    pub fn read<T: Entity>(&self, key: &Key) -> Result<Option<T>, StoreError> {
        self.read_with(key, None)
    }

    pub fn read_with<T: Entity>(&self, key: &Key, options: Option<&ReadOptions>) -> Result<Option<T>, StoreError> {
        T::descriptor().validate_key(key)?;
        Ok(self.read_key_set(&KeySet::single(key.clone()), options)?.into_iter().next())
    }

    /// Direct keyed read of the key columns; the type's where clause does not apply.
    pub fn exists_by_id<T: Entity>(&self, key: &Key) -> Result<bool, StoreError> {
        let desc = T::descriptor();
        desc.validate_key(key)?;
        let keys = KeySet::single(key.clone());
        let columns = desc.key_column_names();
        let rows = self.with_read(self.config.read_bound, false, |ctx| {
            ctx.read(&ReadRequest::new(desc.table(), &keys, &columns))
        })?;
        Ok(!rows.is_empty())
    }

    pub fn read_key_set<T: Entity>(&self, keys: &KeySet, options: Option<&ReadOptions>) -> Result<Vec<T>, StoreError> {
        let desc = T::descriptor();
        let defaults = ReadOptions::default();
        let options = options.unwrap_or(&defaults);
        // index reads are keyed by index columns
        if options.index.is_none() {
            for key in keys.keys() {
                desc.validate_key(key)?;
            }
        }
        let path = resolve_read_path(desc, options, keys)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let (rows, selection, allow_partial) = match &path {
            ReadPath::Direct => {
                let selection = Selection::resolve(
                    desc,
                    options.include_properties.as_ref(),
                    options.exclude_properties.as_ref(),
                )?;
                let request = ReadRequest::new(desc.table(), keys, &selection.columns)
                    .with_index(options.index.as_deref())
                    .with_limit(options.limit)
                    .with_request_tag(options.request_tag.as_deref());
                let bound = options.timestamp_bound.unwrap_or(self.config.read_bound);
                let rows = self.with_read(bound, false, |ctx| ctx.read(&request))?;
                (rows, selection, options.allow_partial_read)
            }
            ReadPath::Sql(query) => {
                let selection =
                    Selection::resolve(desc, query.include_properties.as_ref(), query.exclude_properties.as_ref())?;
                let tag = query.request_tag.as_deref();
                let statement =
                    sql::key_set_select(desc, &selection.columns, keys, options.limit)?.with_request_tag(tag);
                log::debug!("{}: query-driven read: {statement}", desc.table());
                let bound = query.timestamp_bound.unwrap_or(self.config.read_bound);
                let rows = self.with_read(bound, !selection.relations.is_empty(), |ctx| {
                    let rows = ctx.execute_query(&statement)?;
                    attach_children(ctx, desc, &selection, rows, tag)
                })?;
                (rows, selection, query.allow_partial_read)
            }
        };
        self.emit(TemplateEvent::AfterRead { table: desc.table(), keys, rows: rows.len() });
        let partial = selection.partial || allow_partial || self.config.allow_partial_read;
        to_entities(rows, partial)
    }

    pub fn read_all<T: Entity>(&self, options: Option<&ReadOptions>) -> Result<Vec<T>, StoreError> {
        self.read_key_set(&KeySet::all(), options)
    }

    /// Maps every result row through `f`, in store order.
    pub fn query_map<R>(
        &self,
        mut f: impl FnMut(&Row) -> Result<R, StoreError>,
        statement: &Statement,
        options: Option<&QueryOptions>,
    ) -> Result<Vec<R>, StoreError> {
        let with_tag = tagged(statement, options.and_then(|o| o.request_tag.as_deref()));
        let statement: &Statement = &with_tag;
        let bound = options.and_then(|o| o.timestamp_bound).unwrap_or(self.config.query_bound);
        let mut rows = self.with_read(bound, false, |ctx| ctx.execute_query(statement))?;
        self.emit(TemplateEvent::AfterQuery { statement, rows: rows.len() });
        if options.is_some_and(|o| o.allow_partial_read) || self.config.allow_partial_read {
            rows.iter_mut().for_each(Row::mark_partial);
        }
        rows.iter().map(|row| f(row)).collect()
    }

    /// Maps every result row to `T`, loading eager children.
    pub fn query<T: Entity>(&self, statement: &Statement, options: Option<&QueryOptions>) -> Result<Vec<T>, StoreError> {
        let desc = T::descriptor();
        let defaults = QueryOptions::default();
        let options = options.unwrap_or(&defaults);
        let selection =
            Selection::resolve(desc, options.include_properties.as_ref(), options.exclude_properties.as_ref())?;
        let tag = options.request_tag.as_deref();
        let with_tag = tagged(statement, tag);
        let statement: &Statement = &with_tag;
        let bound = options.timestamp_bound.unwrap_or(self.config.query_bound);
        let rows = self.with_read(bound, !selection.relations.is_empty(), |ctx| {
            let rows = ctx.execute_query(statement)?;
            attach_children(ctx, desc, &selection, rows, tag)
        })?;
        self.emit(TemplateEvent::AfterQuery { statement, rows: rows.len() });
        let partial = selection.partial || options.allow_partial_read || self.config.allow_partial_read;
        to_entities(rows, partial)
    }

    /// Whole table with the where clause, sort orders and paging applied.
    pub fn query_all<T: Entity>(&self, options: Option<&PageableQueryOptions>) -> Result<Vec<T>, StoreError> {
        let desc = T::descriptor();
        let query = options.map(|p| &p.query);
        let selection = Selection::resolve(
            desc,
            query.and_then(|q| q.include_properties.as_ref()),
            query.and_then(|q| q.exclude_properties.as_ref()),
        )?;
        let tag = query.and_then(|q| q.request_tag.as_deref());
        let statement = sql::select_all(desc, &selection.columns, options)?.with_request_tag(tag);
        let bound = query.and_then(|q| q.timestamp_bound).unwrap_or(self.config.query_bound);
        let rows = self.with_read(bound, !selection.relations.is_empty(), |ctx| {
            let rows = ctx.execute_query(&statement)?;
            attach_children(ctx, desc, &selection, rows, tag)
        })?;
        self.emit(TemplateEvent::AfterQuery { statement: &statement, rows: rows.len() });
        let partial = selection.partial
            || query.is_some_and(|q| q.allow_partial_read)
            || self.config.allow_partial_read;
        to_entities(rows, partial)
    }

    /// Children of `parent` under a lazy (or eager) relation, loaded on demand.
    pub fn read_interleaved<P: Entity, C: Entity>(&self, parent: &P, property: &str) -> Result<Vec<C>, StoreError> {
        let parent_desc = P::descriptor();
        let relation = parent_desc
            .relation(property)
            .ok_or_else(|| StoreError::InvalidArgument(format!("{} has no relation {property}", parent_desc.table())))?;
        let child_desc = C::descriptor();
        if !std::ptr::eq(relation.child, child_desc) {
            return Err(StoreError::InvalidArgument(format!(
                "relation {property} holds {}, not {}",
                relation.child.table(),
                child_desc.table()
            )));
        }
        let parent_key = parent_desc.key_of(&parent.to_row())?;
        let selection = Selection::all(child_desc);
        let statement = sql::child_select(child_desc, &selection.columns, &parent_key);
        let rows = self.with_read(self.config.read_bound, !selection.relations.is_empty(), |ctx| {
            let rows = ctx.execute_query(&statement)?;
            attach_children(ctx, child_desc, &selection, rows, None)
        })?;
        self.emit(TemplateEvent::AfterQuery { statement: &statement, rows: rows.len() });
        to_entities(rows, self.config.allow_partial_read)
    }

    pub fn count<T: Entity>(&self) -> Result<u64, StoreError> {
        let desc = T::descriptor();
        let statement = sql::count(desc);
        let rows = self.with_read(self.config.read_bound, false, |ctx| ctx.execute_query(&statement))?;
        match rows.first().and_then(|r| r.value_at(0)) {
            Some(Value::Int(n)) if *n >= 0 => Ok(*n as u64),
            other => Err(StoreError::Mapping(format!("{}: unexpected COUNT result {other:?}", desc.table()))),
        }
    }

    // -----------------------
    // Writes
    // -----------------------

    fn write_entities<'e, T: Entity + 'e>(
        &self,
        entities: impl IntoIterator<Item = &'e T>,
        op: WriteOp,
        include: Option<&BTreeSet<String>>,
    ) -> Result<(), StoreError> {
        let desc = T::descriptor();
        let mut mutations = Vec::new();
        for entity in entities {
            mutations.extend(write_mutations(desc, &entity.to_row(), op, include)?);
        }
        self.apply(WriteKind::Save, desc.table(), mutations)
    }

    pub fn insert<T: Entity>(&self, entity: &T) -> Result<(), StoreError> {
        self.write_entities([entity], WriteOp::Insert, None)
    }

    /// One atomic mutation group for the whole batch.
    pub fn insert_all<'e, T: Entity + 'e>(&self, entities: impl IntoIterator<Item = &'e T>) -> Result<(), StoreError> {
        self.write_entities(entities, WriteOp::Insert, None)
    }

    pub fn update<T: Entity>(&self, entity: &T) -> Result<(), StoreError> {
        self.update_with(entity, None)
    }

    /// `include`: `None` writes all properties, `Some(empty)` only checks the
    /// row exists, `Some(set)` writes exactly `set`.
    pub fn update_with<T: Entity>(&self, entity: &T, include: Option<&BTreeSet<String>>) -> Result<(), StoreError> {
        self.write_entities([entity], WriteOp::Update, include)
    }

    pub fn update_all<'e, T: Entity + 'e>(&self, entities: impl IntoIterator<Item = &'e T>) -> Result<(), StoreError> {
        self.write_entities(entities, WriteOp::Update, None)
    }

    pub fn upsert<T: Entity>(&self, entity: &T) -> Result<(), StoreError> {
        self.upsert_with(entity, None)
    }

    pub fn upsert_with<T: Entity>(&self, entity: &T, include: Option<&BTreeSet<String>>) -> Result<(), StoreError> {
        self.write_entities([entity], WriteOp::InsertOrUpdate, include)
    }

    pub fn upsert_all<'e, T: Entity + 'e>(&self, entities: impl IntoIterator<Item = &'e T>) -> Result<(), StoreError> {
        self.write_entities(entities, WriteOp::InsertOrUpdate, None)
    }

    pub fn delete<T: Entity>(&self, key: &Key) -> Result<(), StoreError> {
        T::descriptor().validate_key(key)?;
        self.delete_key_set::<T>(&KeySet::single(key.clone()))
    }

    pub fn delete_entity<T: Entity>(&self, entity: &T) -> Result<(), StoreError> {
        self.delete_all([entity])
    }

    pub fn delete_all<'e, T: Entity + 'e>(&self, entities: impl IntoIterator<Item = &'e T>) -> Result<(), StoreError> {
        let desc = T::descriptor();
        let mut keys = Vec::new();
        for entity in entities {
            keys.push(desc.key_of(&entity.to_row())?);
        }
        self.delete_key_set::<T>(&KeySet::from_keys(keys))
    }

    /// Deletes the matching rows and their interleaved children.
    pub fn delete_key_set<T: Entity>(&self, keys: &KeySet) -> Result<(), StoreError> {
        let desc = T::descriptor();
        self.apply(WriteKind::Delete, desc.table(), delete_mutations(desc, keys))
    }

    // -----------------------
    // DML
    // -----------------------

    /// Runs in the bound read/write transaction, or in an implicit one.
    pub fn execute_dml_statement(&self, statement: &Statement) -> Result<u64, StoreError> {
        if !self.scope.is_bound() {
            return self.perform_read_write_transaction(|tx| tx.execute_dml_statement(statement));
        }
        self.emit(TemplateEvent::BeforeExecuteDml { statement });
        let count = self
            .scope
            .with_read_write(|tx| tx.execute_update(statement))
            .unwrap_or_else(|| Err(unbound()))?;
        self.emit(TemplateEvent::AfterExecuteDml { statement, rows_affected: count });
        Ok(count)
    }

    /// Partitioned DML runs outside of any transaction; the count is a lower bound.
    pub fn execute_partitioned_dml_statement(&self, statement: &Statement) -> Result<u64, StoreError> {
        if self.scope.is_bound() {
            return Err(StoreError::InvalidArgument(
                "partitioned DML cannot run inside a transaction".into(),
            ));
        }
        self.emit(TemplateEvent::BeforeExecuteDml { statement });
        let count = self.client.execute_partitioned_update(statement)?;
        log::debug!("partitioned DML affected at least {count} row(s)");
        self.emit(TemplateEvent::AfterExecuteDml { statement, rows_affected: count });
        Ok(count)
    }

    // -----------------------
    // Transactions
    // -----------------------

    /// Runs `operations` in a read/write transaction and commits on `Ok`.
    /// Aborted attempts are re-run from scratch up to the store's retry policy;
    /// any other error rolls back and is returned as-is.
    pub fn perform_read_write_transaction<T>(
        &self,
        mut operations: impl FnMut(&Template) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if self.scope.is_bound() {
            return Err(StoreError::TransactionMisuse(
                "cannot start a read/write transaction inside another transaction".into(),
            ));
        }
        let policy = self.client.retry_policy();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let bound = self.bind(TxScope::read_write(self.client.begin_read_write()?));
            let outcome = operations(&bound);
            let tx = bound.scope.take_read_write()?;
            let err = match outcome {
                Ok(value) => match tx.commit() {
                    Ok(ts) => {
                        log::debug!("read/write transaction committed at {ts} (attempt {attempt})");
                        return Ok(value);
                    }
                    Err(e) => e,
                },
                Err(e) => {
                    tx.rollback();
                    e
                }
            };
            if !err.is_retryable() || attempt >= policy.max_attempts {
                return Err(err);
            }
            log::warn!("read/write transaction aborted (attempt {attempt}/{}): {err}", policy.max_attempts);
            if !policy.backoff.is_zero() {
                std::thread::sleep(policy.backoff);
            }
        }
    }

    /// Runs `operations` on one snapshot taken at the options' timestamp bound.
    /// The snapshot is closed whatever `operations` returns.
    pub fn perform_read_only_transaction<T>(
        &self,
        operations: impl FnOnce(&Template) -> Result<T, StoreError>,
        options: Option<&ReadOptions>,
    ) -> Result<T, StoreError> {
        if self.scope.is_bound() {
            return Err(StoreError::TransactionMisuse(
                "cannot start a read-only transaction inside another transaction".into(),
            ));
        }
        let bound = options.and_then(|o| o.timestamp_bound).unwrap_or(self.config.read_bound);
        let template = self.bind(TxScope::read_only(self.client.begin_read_only(bound)?));
        let result = operations(&template);
        template.scope.take_read_only()?.close();
        result
    }
}

/// Loads eager relations of every row and embeds them under the relation property.
fn attach_children(
    ctx: &mut dyn ReadContext,
    desc: &EntityDescriptor,
    selection: &Selection,
    mut rows: Vec<Row>,
    tag: Option<&str>,
) -> Result<Vec<Row>, StoreError> {
    if selection.relations.is_empty() {
        return Ok(rows);
    }
    for row in &mut rows {
        let key = desc.key_of(row)?;
        for relation in &selection.relations {
            let child_selection = Selection::all(relation.child);
            let statement = sql::child_select(relation.child, &child_selection.columns, &key).with_request_tag(tag);
            let children = ctx.execute_query(&statement)?;
            let children = attach_children(ctx, relation.child, &child_selection, children, tag)?;
            row.set(
                relation.property.clone(),
                Value::Array(children.iter().map(Row::to_map_value).collect()),
            );
        }
    }
    Ok(rows)
}

/// `statement` carrying `tag`, cloned only when there is a tag to add.
fn tagged<'s>(statement: &'s Statement, tag: Option<&str>) -> Cow<'s, Statement> {
    match tag {
        Some(_) => Cow::Owned(statement.clone().with_request_tag(tag)),
        None => Cow::Borrowed(statement),
    }
}

fn to_entities<T: Entity>(rows: Vec<Row>, partial: bool) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|mut row| {
            if partial {
                row.mark_partial();
            }
            T::from_row(&row)
        })
        .collect()
}
