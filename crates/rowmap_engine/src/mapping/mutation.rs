//! Mutation factory: entity rows and key sets to store mutations

use std::collections::BTreeSet;

use rowmap_core::{KeyRange, KeySet, Mutation, Row, StoreError, Value, WriteOp};

use super::EntityDescriptor;

/// Write mutations for one entity row, parent first, then its interleaved
/// children (recursively).
///
/// `include`: `None` writes every mapped property, `Some(set)` writes exactly
/// those properties. Key columns are always written.
pub fn write_mutations(
    desc: &EntityDescriptor,
    row: &Row,
    op: WriteOp,
    include: Option<&BTreeSet<String>>,
) -> Result<Vec<Mutation>, StoreError> {
    if let Some(set) = include {
        if let Some(unknown) = set.iter().find(|p| !desc.has_property(p)) {
            return Err(StoreError::InvalidArgument(format!("{} has no property {unknown}", desc.table())));
        }
    }
    let wanted = |property: &str| include.map_or(true, |set| set.contains(property));

    let key = desc.key_of(row)?;
    let mut out_row = Row::new();
    for column in desc.key_columns() {
        if let Some(v) = row.get_value(&column.name) {
            out_row.set(column.name.clone(), v.clone());
        }
    }
    for column in desc.columns().iter().filter(|c| wanted(&c.property)) {
        if let Some(v) = row.get_value(&column.name) {
            out_row.set(column.name.clone(), v.clone());
        }
    }

    let mut mutations = vec![Mutation::Write { op, table: desc.table().to_string(), key: key.clone(), row: out_row }];

    for relation in desc.relations().iter().filter(|r| wanted(&r.property)) {
        let items = match row.get_value(&relation.property) {
            None | Some(Value::Null) => continue,
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(StoreError::Mapping(format!(
                    "property {}: expected ARRAY of STRUCT, got {}",
                    relation.property,
                    other.type_name()
                )))
            }
        };
        for item in items {
            let child_row = Row::from_map_value(item)?;
            let child_key = relation.child.key_of(&child_row)?;
            if !key.is_prefix_of(&child_key) {
                return Err(StoreError::InvalidArgument(format!(
                    "child key {child_key} of {} does not start with parent key {key}",
                    relation.child.table()
                )));
            }
            mutations.extend(write_mutations(relation.child, &child_row, op, None)?);
        }
    }
    Ok(mutations)
}

/// Delete mutations for `keys`, children first so interleaved rows never
/// outlive their parent. Explicit keys become prefix ranges on child tables;
/// ranges apply unchanged since their bounds compare as prefixes.
pub fn delete_mutations(desc: &EntityDescriptor, keys: &KeySet) -> Vec<Mutation> {
    if keys.is_empty() {
        return Vec::new();
    }
    let mut mutations = Vec::new();
    if !desc.relations().is_empty() {
        let child_keys = if keys.is_all() {
            KeySet::all()
        } else {
            let mut set = KeySet::default();
            for key in keys.keys() {
                set = set.add_range(KeyRange::prefix(key.clone()));
            }
            for range in keys.ranges() {
                set = set.add_range(range.clone());
            }
            set
        };
        let mut seen = BTreeSet::new();
        for relation in desc.relations() {
            // one child table can back several properties
            if seen.insert(relation.child.table()) {
                mutations.extend(delete_mutations(relation.child, &child_keys));
            }
        }
    }
    mutations.push(Mutation::delete(desc.table(), keys.clone()));
    mutations
}
