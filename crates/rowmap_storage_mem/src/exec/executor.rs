//! Executor: evaluates parsed statements against a view

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rowmap_core::{Key, Row, StoreError, Value};

use super::ast::*;
use crate::view::{Footprint, View};

pub(crate) struct Executor<'v, 'a> {
    view: &'v View<'a>,
    parameters: &'v BTreeMap<String, Value>,
}

impl<'v, 'a> Executor<'v, 'a> {
    pub fn new(view: &'v View<'a>, parameters: &'v BTreeMap<String, Value>) -> Self {
        Self { view, parameters }
    }

    fn check_parameters(&self, stmt: &SqlStatement) -> Result<(), StoreError> {
        let mut missing: Vec<String> = stmt
            .extract_parameters()
            .into_iter()
            .filter(|p| !self.parameters.contains_key(p))
            .collect();
        missing.sort();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::InvalidArgument(format!("missing parameters: @{}", missing.join(", @"))))
        }
    }

    pub fn select(&self, stmt: &SqlStatement, footprint: &mut Footprint) -> Result<Vec<Row>, StoreError> {
        self.check_parameters(stmt)?;
        let SqlStatement::Select(select) = stmt else {
            return Err(StoreError::InvalidArgument("expected a SELECT statement".into()));
        };
        self.view.check_table(&select.table)?;
        footprint.table(&select.table);

        let mut rows = Vec::new();
        for (_, row) in self.view.scan(&select.table) {
            if self.matches(&select.table, select.filter.as_ref(), &row)? {
                rows.push(row);
            }
        }

        if let Projection::Count = select.projection {
            return Ok(vec![Row::new().with("count", rows.len() as i64)]);
        }

        if !select.order_by.is_empty() {
            for item in &select.order_by {
                self.column(&select.table, &item.column, &Row::new())?;
            }
            // stable: ties keep primary key order
            rows.sort_by(|a, b| {
                for item in &select.order_by {
                    let l = a.get_value(&item.column).unwrap_or(&Value::Null);
                    let r = b.get_value(&item.column).unwrap_or(&Value::Null);
                    let ord = sort_cmp(l, r);
                    let ord = if item.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let offset = match &select.offset {
            Some(e) => self.count_arg(e, "OFFSET")?,
            None => 0,
        };
        let limit = match &select.limit {
            Some(e) => self.count_arg(e, "LIMIT")?,
            None => usize::MAX,
        };

        rows.into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| match &select.projection {
                Projection::Columns(columns) => self.view.project(&select.table, &row, columns),
                _ => Ok(self.full_row(&select.table, row)),
            })
            .collect()
    }

    /// `SELECT *` lists declared columns in declaration order.
    fn full_row(&self, table: &str, row: Row) -> Row {
        match self.view.schema(table) {
            Some(schema) => schema
                .columns
                .iter()
                .map(|c| (c.clone(), row.get_value(c).cloned().unwrap_or(Value::Null)))
                .collect(),
            None => row,
        }
    }

    /// New row images for an UPDATE.
    pub fn update(&self, stmt: &SqlStatement, footprint: &mut Footprint) -> Result<Vec<(Key, Row)>, StoreError> {
        self.check_parameters(stmt)?;
        let SqlStatement::Update(update) = stmt else {
            return Err(StoreError::InvalidArgument("expected an UPDATE statement".into()));
        };
        self.view.check_table(&update.table)?;
        if let Some(schema) = self.view.schema(&update.table) {
            for (column, _) in &update.assignments {
                if schema.primary_key.contains(column) {
                    return Err(StoreError::InvalidArgument(format!("cannot update key column {column}")));
                }
                if !schema.has_column(column) {
                    return Err(StoreError::InvalidArgument(format!(
                        "table {} has no column {column}",
                        update.table
                    )));
                }
            }
        }
        footprint.table(&update.table);

        let mut out = Vec::new();
        for (key, row) in self.view.scan(&update.table) {
            if !self.matches(&update.table, update.filter.as_ref(), &row)? {
                continue;
            }
            let mut next = row.clone();
            for (column, expr) in &update.assignments {
                next.set(column.clone(), self.eval(&update.table, expr, &row)?);
            }
            out.push((key, next));
        }
        Ok(out)
    }

    /// Keys matched by a DELETE.
    pub fn delete(&self, stmt: &SqlStatement, footprint: &mut Footprint) -> Result<Vec<Key>, StoreError> {
        self.check_parameters(stmt)?;
        let SqlStatement::Delete(delete) = stmt else {
            return Err(StoreError::InvalidArgument("expected a DELETE statement".into()));
        };
        self.view.check_table(&delete.table)?;
        footprint.table(&delete.table);

        let mut out = Vec::new();
        for (key, row) in self.view.scan(&delete.table) {
            if self.matches(&delete.table, delete.filter.as_ref(), &row)? {
                out.push(key);
            }
        }
        Ok(out)
    }

    fn matches(&self, table: &str, filter: Option<&Expr>, row: &Row) -> Result<bool, StoreError> {
        match filter {
            None => Ok(true),
            Some(expr) => match self.eval(table, expr, row)? {
                Value::Bool(b) => Ok(b),
                Value::Null => Ok(false),
                other => Err(StoreError::InvalidArgument(format!(
                    "WHERE clause must be BOOL, got {}",
                    other.type_name()
                ))),
            },
        }
    }

    fn count_arg(&self, expr: &Expr, clause: &str) -> Result<usize, StoreError> {
        match self.eval("", expr, &Row::new())? {
            Value::Int(n) if n >= 0 => Ok(n as usize),
            other => Err(StoreError::InvalidArgument(format!("{clause} expects a non-negative INT64, got {other}"))),
        }
    }

    fn column(&self, table: &str, name: &str, row: &Row) -> Result<Value, StoreError> {
        if let Some(v) = row.get_value(name) {
            return Ok(v.clone());
        }
        match self.view.schema(table) {
            Some(schema) if !schema.has_column(name) => {
                Err(StoreError::InvalidArgument(format!("unrecognized name: {name}")))
            }
            _ => Ok(Value::Null),
        }
    }

    fn eval(&self, table: &str, expr: &Expr, row: &Row) -> Result<Value, StoreError> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::String(s) => Value::String(s.clone()),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Null => Value::Null,
            }),
            Expr::Column(name) => self.column(table, name, row),
            Expr::Parameter(name) => self
                .parameters
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::InvalidArgument(format!("missing parameter @{name}"))),
            Expr::BinaryOp(left, op, right) => {
                let l = self.eval(table, left, row)?;
                let r = self.eval(table, right, row)?;
                eval_binary_op(&l, op, &r)
            }
            Expr::UnaryOp(op, operand) => {
                let v = self.eval(table, operand, row)?;
                match (op, v) {
                    (_, Value::Null) => Ok(Value::Null),
                    (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnOp::Neg, Value::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| StoreError::InvalidArgument("INT64 overflow".into())),
                    (UnOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (op, other) => Err(StoreError::InvalidArgument(format!(
                        "cannot apply {:?} to {}",
                        op,
                        other.type_name()
                    ))),
                }
            }
            Expr::IsNull(operand) => Ok(Value::Bool(self.eval(table, operand, row)?.is_null())),
            Expr::IsNotNull(operand) => Ok(Value::Bool(!self.eval(table, operand, row)?.is_null())),
            Expr::InList { expr, list, negated } => {
                let needle = self.eval(table, expr, row)?;
                if needle.is_null() {
                    return Ok(Value::Null);
                }
                let mut saw_null = false;
                for item in list {
                    match eval_binary_op(&needle, &BinOp::Eq, &self.eval(table, item, row)?)? {
                        Value::Bool(true) => return Ok(Value::Bool(!negated)),
                        Value::Null => saw_null = true,
                        _ => {}
                    }
                }
                Ok(if saw_null { Value::Null } else { Value::Bool(*negated) })
            }
        }
    }
}

fn type_error(l: &Value, op: &BinOp, r: &Value) -> StoreError {
    StoreError::InvalidArgument(format!("no matching signature for {} {:?} {}", l.type_name(), op, r.type_name()))
}

/// Comparison with INT64/FLOAT64 coercion. `None` when the types don't compare.
fn sql_cmp(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(_), Value::Int(_))
        | (Value::Bool(_), Value::Bool(_))
        | (Value::String(_), Value::String(_))
        | (Value::Bytes(_), Value::Bytes(_))
        | (Value::Array(_), Value::Array(_)) => Some(l.total_cmp(r)),
        _ => None,
    }
}

/// ORDER BY ordering: NULLs first, numbers compared across INT64/FLOAT64.
fn sort_cmp(l: &Value, r: &Value) -> Ordering {
    sql_cmp(l, r).unwrap_or_else(|| l.total_cmp(r))
}

fn eval_binary_op(l: &Value, op: &BinOp, r: &Value) -> Result<Value, StoreError> {
    match op {
        BinOp::And => match (l, r) {
            (Value::Bool(false), _) | (_, Value::Bool(false)) => Ok(Value::Bool(false)),
            (Value::Bool(true), Value::Bool(true)) => Ok(Value::Bool(true)),
            (Value::Null | Value::Bool(_), Value::Null | Value::Bool(_)) => Ok(Value::Null),
            _ => Err(type_error(l, op, r)),
        },
        BinOp::Or => match (l, r) {
            (Value::Bool(true), _) | (_, Value::Bool(true)) => Ok(Value::Bool(true)),
            (Value::Bool(false), Value::Bool(false)) => Ok(Value::Bool(false)),
            (Value::Null | Value::Bool(_), Value::Null | Value::Bool(_)) => Ok(Value::Null),
            _ => Err(type_error(l, op, r)),
        },
        _ if l.is_null() || r.is_null() => Ok(Value::Null),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = sql_cmp(l, r).ok_or_else(|| type_error(l, op, r))?;
            Ok(Value::Bool(match op {
                BinOp::Eq => ord == Ordering::Equal,
                BinOp::Ne => ord != Ordering::Equal,
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Le => ord != Ordering::Greater,
                BinOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => arithmetic(l, op, r),
    }
}

fn arithmetic(l: &Value, op: &BinOp, r: &Value) -> Result<Value, StoreError> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => {
            let out = match op {
                BinOp::Add => a.checked_add(*b),
                BinOp::Sub => a.checked_sub(*b),
                BinOp::Mul => a.checked_mul(*b),
                _ => {
                    if *b == 0 {
                        return Err(StoreError::InvalidArgument("division by zero".into()));
                    }
                    // INT64 / INT64 yields FLOAT64
                    return Ok(Value::Float(*a as f64 / *b as f64));
                }
            };
            out.map(Value::Int)
                .ok_or_else(|| StoreError::InvalidArgument("INT64 overflow".into()))
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let a = as_f64(l);
            let b = as_f64(r);
            match op {
                BinOp::Add => Ok(Value::Float(a + b)),
                BinOp::Sub => Ok(Value::Float(a - b)),
                BinOp::Mul => Ok(Value::Float(a * b)),
                _ => {
                    if b == 0.0 {
                        Err(StoreError::InvalidArgument("division by zero".into()))
                    } else {
                        Ok(Value::Float(a / b))
                    }
                }
            }
        }
        _ => Err(type_error(l, op, r)),
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_propagates_through_comparisons() {
        assert_eq!(eval_binary_op(&Value::Null, &BinOp::Eq, &Value::Int(1)).unwrap(), Value::Null);
        assert_eq!(
            eval_binary_op(&Value::Null, &BinOp::And, &Value::Bool(false)).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(eval_binary_op(&Value::Null, &BinOp::Or, &Value::Bool(true)).unwrap(), Value::Bool(true));
        assert_eq!(eval_binary_op(&Value::Null, &BinOp::Or, &Value::Bool(false)).unwrap(), Value::Null);
    }

    #[test]
    fn numbers_compare_across_types() {
        assert_eq!(
            eval_binary_op(&Value::Int(2), &BinOp::Lt, &Value::Float(2.5)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(eval_binary_op(&Value::Int(7), &BinOp::Div, &Value::Int(2)).unwrap(), Value::Float(3.5));
        assert!(eval_binary_op(&Value::Int(1), &BinOp::Div, &Value::Int(0)).is_err());
        assert!(eval_binary_op(&Value::Int(i64::MAX), &BinOp::Add, &Value::Int(1)).is_err());
    }

    #[test]
    fn mismatched_types_are_rejected() {
        let err = eval_binary_op(&Value::String("a".into()), &BinOp::Eq, &Value::Int(1)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn sort_puts_nulls_first() {
        let mut values = vec![Value::Int(3), Value::Null, Value::Float(1.5), Value::Int(2)];
        values.sort_by(sort_cmp);
        assert_eq!(values, vec![Value::Null, Value::Float(1.5), Value::Int(2), Value::Int(3)]);
    }
}
