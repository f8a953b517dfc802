// src/load/duck.rs
//! DuckDB output: one database file per `db`, one table per `table`.

use arrow::record_batch::RecordBatch;
use duckdb::{
    types::{TimeUnit, Value},
    Connection, ToSql,
};
use std::{fs, path::PathBuf};
use tracing::debug;

use super::{io_error, quote_ident, sql_types, WriteError, WriteMode, WriteRequest};
use crate::table::{
    column_cells,
    dates::{date_to_days, datetime_to_micros},
    Cell,
};

pub(super) fn write(batch: &RecordBatch, request: &WriteRequest) -> Result<PathBuf, WriteError> {
    fs::create_dir_all(&request.output_dir).map_err(io_error(&request.output_dir))?;
    let path = request.db_file("duckdb");
    let conn = Connection::open(&path)?;
    let table = quote_ident(&request.table);

    let columns = batch
        .schema()
        .fields()
        .iter()
        .map(|f| format!("{} {}", quote_ident(f.name()), sql_types(f.data_type()).0))
        .collect::<Vec<_>>()
        .join(", ");
    if request.mode == WriteMode::Overwrite {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", table))?;
    }
    conn.execute_batch(&format!("CREATE TABLE IF NOT EXISTS {} ({});", table, columns))?;

    let cells = batch
        .columns()
        .iter()
        .map(|c| column_cells(c.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    let mut appender = conn.appender(&request.table)?;
    for row in 0..batch.num_rows() {
        let values: Vec<Value> = cells.iter().map(|column| to_value(&column[row])).collect();
        let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        appender.append_row(params.as_slice())?;
    }
    appender.flush()?;
    debug!(path = %path.display(), rows = batch.num_rows(), "duckdb rows appended");
    Ok(path)
}

fn to_value(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Bool(b) => Value::Boolean(*b),
        Cell::Int(i) => Value::BigInt(*i),
        Cell::Float(f) => Value::Double(*f),
        Cell::Str(s) => Value::Text(s.clone()),
        Cell::Date(d) => Value::Date32(date_to_days(*d)),
        Cell::Datetime(dt) => Value::Timestamp(TimeUnit::Microsecond, datetime_to_micros(*dt)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::{write_table, Sink};
    use arrow::{
        array::{ArrayRef, BooleanArray, Date32Array, Float64Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn batch() -> anyhow::Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("name", DataType::Utf8, true),
            Field::new("amount", DataType::Float64, true),
            Field::new("paid", DataType::Boolean, true),
            Field::new("day", DataType::Date32, true),
        ]));
        Ok(RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![Some("a"), None])) as ArrayRef,
                Arc::new(Float64Array::from(vec![1.5, 2.0])),
                Arc::new(BooleanArray::from(vec![true, false])),
                Arc::new(Date32Array::from(vec![19_723, 19_724])),
            ],
        )?)
    }

    #[test]
    fn creates_then_appends_then_replaces() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let request = WriteRequest::new(dir.path(), "sales", "orders");
        let path = write_table(&batch()?, Sink::DuckDb, &request)?;
        assert_eq!(path, dir.path().join("sales.duckdb"));
        write_table(&batch()?, Sink::DuckDb, &request)?;

        let count = |path: &PathBuf| -> anyhow::Result<i64> {
            let conn = Connection::open(path)?;
            Ok(conn.query_row("SELECT COUNT(*) FROM orders", [], |r| r.get(0))?)
        };
        assert_eq!(count(&path)?, 4);

        write_table(&batch()?, Sink::DuckDb, &request.clone().with_mode(WriteMode::Overwrite))?;
        assert_eq!(count(&path)?, 2);

        let conn = Connection::open(&path)?;
        let (day, nulls): (String, i64) = conn.query_row(
            "SELECT CAST(MIN(day) AS VARCHAR), COUNT(*) FILTER (WHERE name IS NULL) FROM orders",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        assert_eq!((day.as_str(), nulls), ("2024-01-01", 1));
        Ok(())
    }
}
