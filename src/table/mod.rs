//! In-memory tables.
//!
//! A table is an Arrow [`RecordBatch`]: ordered rows, named typed columns.
//! [`Cell`] is the row-at-a-time view used wherever a single value has to be
//! inspected (schema checks, database sinks, interpreter callbacks).

pub mod cell;
pub mod dates;

use arrow::record_batch::RecordBatch;

pub use cell::{array_from_cells, broadcast, cell_at, column_cells, Cell};

/// Tabular dataset flowing through a pipeline.
pub type Table = RecordBatch;

/// Render the first `limit` rows of a table for terminal output.
pub fn preview(table: &Table, limit: usize) -> Result<String, arrow::error::ArrowError> {
    let head = table.slice(0, limit.min(table.num_rows()));
    Ok(arrow::util::pretty::pretty_format_batches(&[head])?.to_string())
}
