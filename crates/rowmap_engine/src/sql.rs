//! SQL statements the façade builds for the query-driven read path

use rowmap_core::{Key, KeySet, Statement, StoreError};

use crate::mapping::EntityDescriptor;
use crate::options::{Direction, PageableQueryOptions};

fn select_head(desc: &EntityDescriptor, columns: &[String]) -> String {
    let projection = if columns.is_empty() { "*".to_string() } else { columns.join(", ") };
    format!("SELECT {projection} FROM {}", desc.table())
}

fn with_conditions(mut sql: String, conditions: &[String]) -> String {
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql
}

/// `SELECT cols FROM t WHERE (key disjunction) AND (where clause) [LIMIT n]`.
/// Key ranges have no SQL rendering here.
pub fn key_set_select(
    desc: &EntityDescriptor,
    columns: &[String],
    keys: &KeySet,
    limit: Option<u64>,
) -> Result<Statement, StoreError> {
    if keys.has_ranges() {
        return Err(StoreError::InvalidArgument(format!(
            "key ranges cannot be read through a query on {}",
            desc.table()
        )));
    }
    let mut conditions = Vec::new();
    let mut params = Vec::new();
    if !keys.is_all() {
        let key_columns = desc.key_columns();
        let mut disjuncts = Vec::with_capacity(keys.keys().len());
        for (i, key) in keys.keys().iter().enumerate() {
            let mut conjuncts = Vec::with_capacity(key.len());
            for (j, (column, part)) in key_columns.iter().zip(key.parts()).enumerate() {
                let name = format!("k{i}_{j}");
                conjuncts.push(format!("{} = @{name}", column.name));
                params.push((name, part.clone()));
            }
            disjuncts.push(format!("({})", conjuncts.join(" AND ")));
        }
        if disjuncts.is_empty() {
            conditions.push("FALSE".to_string());
        } else {
            conditions.push(format!("({})", disjuncts.join(" OR ")));
        }
    }
    if let Some(condition) = desc.where_clause() {
        conditions.push(format!("({condition})"));
    }

    let mut sql = with_conditions(select_head(desc, columns), &conditions);
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok(params.into_iter().fold(Statement::new(sql), |s, (name, v)| s.bind(name, v)))
}

/// Rows of `child` under one parent: equality on the parent's key columns
/// plus the child's own where clause.
pub fn child_select(child: &EntityDescriptor, columns: &[String], parent_key: &Key) -> Statement {
    let mut conditions = Vec::new();
    let mut params = Vec::new();
    for (i, (column, part)) in child.key_columns().iter().zip(parent_key.parts()).enumerate() {
        let name = format!("p{i}");
        conditions.push(format!("{} = @{name}", column.name));
        params.push((name, part.clone()));
    }
    if let Some(condition) = child.where_clause() {
        conditions.push(format!("({condition})"));
    }
    let sql = with_conditions(select_head(child, columns), &conditions);
    params.into_iter().fold(Statement::new(sql), |s, (name, v)| s.bind(name, v))
}

/// Whole-table select honoring the where clause, sort orders and paging.
pub fn select_all(
    desc: &EntityDescriptor,
    columns: &[String],
    pageable: Option<&PageableQueryOptions>,
) -> Result<Statement, StoreError> {
    let conditions: Vec<String> = desc.where_clause().map(|c| format!("({c})")).into_iter().collect();
    let mut sql = with_conditions(select_head(desc, columns), &conditions);

    if let Some(p) = pageable {
        if !p.sort.is_empty() {
            let mut orders = Vec::with_capacity(p.sort.len());
            for sort in &p.sort {
                let column = desc.column_for_property(&sort.property).ok_or_else(|| {
                    StoreError::InvalidArgument(format!("cannot sort {} by unknown property {}", desc.table(), sort.property))
                })?;
                let direction = match sort.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                orders.push(format!("{} {direction}", column.name));
            }
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }
        if let Some(limit) = p.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = p.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }
    Ok(Statement::new(sql))
}

pub fn count(desc: &EntityDescriptor) -> Statement {
    Statement::new(format!("SELECT COUNT(1) FROM {}", desc.table()))
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use rowmap_core::{key, KeyRange, Value};

    use super::*;
    use crate::mapping::{Column, ColumnType};
    use crate::options::Sort;

    fn orders() -> &'static EntityDescriptor {
        static DESC: OnceLock<EntityDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            EntityDescriptor::builder("orders")
                .key(Column::new("region", ColumnType::String))
                .key(Column::new("id", ColumnType::Int64))
                .column(Column::new("total", ColumnType::Float64).property("amount"))
                .where_clause("total > 0")
                .build()
                .unwrap()
        })
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn key_set_select_binds_every_key_part() {
        let keys = KeySet::from_keys([key!("eu", 1), key!("us", 2)]);
        let statement = key_set_select(orders(), &cols(&["region", "id"]), &keys, Some(5)).unwrap();
        assert_eq!(
            statement.sql(),
            "SELECT region, id FROM orders WHERE ((region = @k0_0 AND id = @k0_1) OR (region = @k1_0 AND id = @k1_1)) \
             AND (total > 0) LIMIT 5"
        );
        assert_eq!(statement.param("k1_1"), Some(&Value::Int(2)));
    }

    #[test]
    fn key_set_select_edge_cases() {
        let all = key_set_select(orders(), &[], &KeySet::all(), None).unwrap();
        assert_eq!(all.sql(), "SELECT * FROM orders WHERE (total > 0)");

        let none = key_set_select(orders(), &[], &KeySet::default(), None).unwrap();
        assert_eq!(none.sql(), "SELECT * FROM orders WHERE FALSE AND (total > 0)");

        let ranged = KeySet::range(KeyRange::prefix(key!("eu")));
        assert!(key_set_select(orders(), &[], &ranged, None).is_err());
    }

    #[test]
    fn child_select_matches_parent_key_prefix() {
        let statement = child_select(orders(), &cols(&["id"]), &key!("eu"));
        assert_eq!(statement.sql(), "SELECT id FROM orders WHERE region = @p0 AND (total > 0)");
        assert_eq!(statement.param("p0"), Some(&Value::String("eu".into())));
    }

    #[test]
    fn select_all_maps_sort_properties_to_columns() {
        let pageable = PageableQueryOptions::page(2, 10).sort(Sort::desc("amount")).sort(Sort::asc("id"));
        let statement = select_all(orders(), &cols(&["id"]), Some(&pageable)).unwrap();
        assert_eq!(
            statement.sql(),
            "SELECT id FROM orders WHERE (total > 0) ORDER BY total DESC, id ASC LIMIT 10 OFFSET 20"
        );
        assert_eq!(count(orders()).sql(), "SELECT COUNT(1) FROM orders");
    }
}
