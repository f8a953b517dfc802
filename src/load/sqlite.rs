// src/load/sqlite.rs
//! SQLite output.

use arrow::record_batch::RecordBatch;
use rusqlite::{params_from_iter, types::Value, Connection};
use std::{fs, path::PathBuf};
use tracing::debug;

use super::{io_error, quote_ident, sql_types, temporal_text, WriteError, WriteMode, WriteRequest};
use crate::table::{column_cells, Cell};

pub(super) fn write(batch: &RecordBatch, request: &WriteRequest) -> Result<PathBuf, WriteError> {
    fs::create_dir_all(&request.output_dir).map_err(io_error(&request.output_dir))?;
    let path = request.db_file("sqlite");
    let mut conn = Connection::open(&path)?;
    let table = quote_ident(&request.table);
    let schema = batch.schema();

    let definitions = schema
        .fields()
        .iter()
        .map(|f| format!("{} {}", quote_ident(f.name()), sql_types(f.data_type()).1))
        .collect::<Vec<_>>()
        .join(", ");
    let names = schema
        .fields()
        .iter()
        .map(|f| quote_ident(f.name()))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=schema.fields().len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");

    let cells = batch
        .columns()
        .iter()
        .map(|c| column_cells(c.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    let tx = conn.transaction()?;
    if request.mode == WriteMode::Overwrite {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", table))?;
    }
    tx.execute_batch(&format!("CREATE TABLE IF NOT EXISTS {} ({});", table, definitions))?;
    {
        let mut insert = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table, names, placeholders
        ))?;
        for row in 0..batch.num_rows() {
            insert.execute(params_from_iter(cells.iter().map(|column| to_value(&column[row]))))?;
        }
    }
    tx.commit()?;
    debug!(path = %path.display(), rows = batch.num_rows(), "sqlite rows inserted");
    Ok(path)
}

fn to_value(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Bool(b) => Value::Integer(i64::from(*b)),
        Cell::Int(i) => Value::Integer(*i),
        Cell::Float(f) if f.is_nan() => Value::Null,
        Cell::Float(f) => Value::Real(*f),
        Cell::Str(s) => Value::Text(s.clone()),
        other => temporal_text(other).map_or(Value::Null, Value::Text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::{write_table, Sink};
    use arrow::{
        array::{ArrayRef, Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn batch(ids: Vec<Option<i64>>) -> anyhow::Result<RecordBatch> {
        let n = ids.len();
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("label", DataType::Utf8, true),
        ]));
        Ok(RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids)) as ArrayRef,
                Arc::new(StringArray::from(vec!["set1"; n])),
            ],
        )?)
    }

    fn rows(path: &PathBuf) -> anyhow::Result<Vec<(Option<i64>, String)>> {
        let conn = Connection::open(path)?;
        let mut stmt = conn.prepare("SELECT id, label FROM orders ORDER BY rowid")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    #[test]
    fn appends_and_overwrites() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let request = WriteRequest::new(dir.path(), "sales", "orders");
        let path = write_table(&batch(vec![Some(1), None])?, Sink::Sqlite, &request)?;
        assert_eq!(path, dir.path().join("sales.sqlite"));
        write_table(&batch(vec![Some(3)])?, Sink::Sqlite, &request)?;
        assert_eq!(
            rows(&path)?,
            vec![
                (Some(1), "set1".to_string()),
                (None, "set1".to_string()),
                (Some(3), "set1".to_string()),
            ]
        );

        let overwrite = request.clone().with_mode(WriteMode::Overwrite);
        write_table(&batch(vec![Some(7)])?, Sink::Sqlite, &overwrite)?;
        assert_eq!(rows(&path)?, vec![(Some(7), "set1".to_string())]);
        Ok(())
    }

    #[test]
    fn rejects_unsafe_table_names() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let request = WriteRequest::new(dir.path(), "sales", "orders; DROP TABLE x");
        let err = write_table(&batch(vec![Some(1)])?, Sink::Sqlite, &request).unwrap_err();
        assert!(matches!(err, WriteError::InvalidTableName(_)));
        assert!(!dir.path().join("sales.sqlite").exists());
        Ok(())
    }
}
