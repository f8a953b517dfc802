//! Declarative table schemas and their validator.
//!
//! Schemas are normally authored as code units exposing a `schema` symbol
//! built with `DataFrameSchema(...)`; the types here are what those
//! constructors produce.

pub mod arrow;
pub mod types;
pub mod validate;

pub use self::arrow::{coerce, map_to_arrow_type};
pub use types::{Check, CheckKind, ColumnSchema, DType, Strictness, TableSchema};
pub use validate::{validate, FailureCase, SchemaErrors};
