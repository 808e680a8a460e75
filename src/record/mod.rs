//! Scalar values, table schemas and result rows.

mod row;
mod schema;
mod value;

pub use row::Row;
pub use schema::{Column, TableSchema};
pub use value::{DataType, Value};
