//! AST for the SQL subset served by the in-memory store (SELECT/UPDATE/DELETE + DDL)

use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlStatement {
    Select(Select),
    Update(Update),
    Delete(Delete),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub projection: Projection,
    pub table: String,
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Star,
    Columns(Vec<String>),
    Count,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Column(String),
    Parameter(String), // @name
    BinaryOp(Box<Expr>, BinOp, Box<Expr>),
    UnaryOp(UnOp, Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    InList { expr: Box<Expr>, list: Vec<Expr>, negated: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinOp {
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical
    And,
    Or,
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

// -----------------------
// DDL
// -----------------------

#[derive(Debug, Clone, PartialEq)]
pub enum DdlStatement {
    CreateTable(CreateTable),
    CreateIndex(CreateIndex),
    DropTable(String),
    DropIndex(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub name: String,
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    pub parent: Option<String>,
    pub on_delete_cascade: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndex {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
}

impl SqlStatement {
    pub fn table(&self) -> &str {
        match self {
            SqlStatement::Select(s) => &s.table,
            SqlStatement::Update(u) => &u.table,
            SqlStatement::Delete(d) => &d.table,
        }
    }

    pub fn is_dml(&self) -> bool {
        !matches!(self, SqlStatement::Select(_))
    }

    /// All parameter names referenced by this statement
    pub fn extract_parameters(&self) -> HashSet<String> {
        let mut params = HashSet::new();
        match self {
            SqlStatement::Select(s) => {
                for e in s.filter.iter().chain(s.limit.iter()).chain(s.offset.iter()) {
                    e.collect_parameters(&mut params);
                }
            }
            SqlStatement::Update(u) => {
                for (_, e) in &u.assignments {
                    e.collect_parameters(&mut params);
                }
                if let Some(f) = &u.filter {
                    f.collect_parameters(&mut params);
                }
            }
            SqlStatement::Delete(d) => {
                if let Some(f) = &d.filter {
                    f.collect_parameters(&mut params);
                }
            }
        }
        params
    }
}

impl Expr {
    pub fn collect_parameters(&self, params: &mut HashSet<String>) {
        match self {
            Expr::Parameter(name) => {
                params.insert(name.clone());
            }
            Expr::BinaryOp(left, _, right) => {
                left.collect_parameters(params);
                right.collect_parameters(params);
            }
            Expr::UnaryOp(_, operand) | Expr::IsNull(operand) | Expr::IsNotNull(operand) => {
                operand.collect_parameters(params);
            }
            Expr::InList { expr, list, .. } => {
                expr.collect_parameters(params);
                for item in list {
                    item.collect_parameters(params);
                }
            }
            Expr::Literal(_) | Expr::Column(_) => {}
        }
    }
}
