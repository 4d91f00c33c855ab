//! SQL subset: parsing and evaluation against a snapshot view

pub mod ast;
pub mod parser;
pub(crate) mod executor;

pub use parser::{parse_ddl, parse_sql};
