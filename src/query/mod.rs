//! SQL front end: tokenizing, parsing, expression binding and `SELECT`
//! execution.
//!
//! Statements are parsed into a purely syntactic [`ast`] and bound to a table
//! schema only when they run, so unknown tables and columns surface as
//! [`QueryError::Semantic`] at execution time.

pub(crate) mod ast;
mod error;
pub(crate) mod expression;
mod lexer;
pub(crate) mod parser;
pub(crate) mod select;

pub use error::QueryError;
pub(crate) use error::QueryResult;
