// src/load/delimited.rs
//! CSV and TSV output.

use arrow::{csv::WriterBuilder, record_batch::RecordBatch};
use std::{
    fs::{self, OpenOptions},
    io::BufWriter,
    path::PathBuf,
};

use super::{io_error, WriteError, WriteMode, WriteRequest};

pub(super) fn write(
    batch: &RecordBatch,
    request: &WriteRequest,
    delimiter: u8,
    extension: &str,
) -> Result<PathBuf, WriteError> {
    let db_dir = request.db_dir();
    fs::create_dir_all(&db_dir).map_err(io_error(&db_dir))?;
    let path = db_dir.join(format!("{}.{}", request.table, extension));

    let appending = request.mode == WriteMode::Append
        && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
    let file = if appending {
        OpenOptions::new().append(true).open(&path)
    } else {
        OpenOptions::new().write(true).create(true).truncate(true).open(&path)
    }
    .map_err(io_error(&path))?;

    let mut writer = WriterBuilder::new()
        .with_header(!appending)
        .with_delimiter(delimiter)
        .with_datetime_format("%Y-%m-%d %H:%M:%S".to_string())
        .with_timestamp_format("%Y-%m-%d %H:%M:%S".to_string())
        .build(BufWriter::new(file));
    writer.write(batch)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::{write_table, Sink};
    use arrow::{
        array::{ArrayRef, Date32Array, Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn batch(ids: Vec<i64>) -> anyhow::Result<RecordBatch> {
        let n = ids.len();
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
            Field::new("day", DataType::Date32, true),
        ]));
        Ok(RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids)) as ArrayRef,
                Arc::new(StringArray::from(vec!["x"; n])),
                Arc::new(Date32Array::from(vec![19_723; n])),
            ],
        )?)
    }

    #[test]
    fn tsv_append_writes_one_header() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let request = WriteRequest::new(dir.path(), "sales", "orders");
        let path = write_table(&batch(vec![1])?, Sink::Tsv, &request)?;
        assert_eq!(path, dir.path().join("sales").join("orders.tsv"));
        write_table(&batch(vec![2])?, Sink::Tsv, &request)?;
        assert_eq!(
            fs::read_to_string(&path)?,
            indoc! {"
                id\tname\tday
                1\tx\t2024-01-01
                2\tx\t2024-01-01
            "}
        );
        Ok(())
    }

    #[test]
    fn csv_overwrite_replaces_contents() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let request = WriteRequest::new(dir.path(), "sales", "orders");
        write_table(&batch(vec![1, 2])?, Sink::Csv, &request)?;
        let path = write_table(
            &batch(vec![3])?,
            Sink::Csv,
            &request.clone().with_mode(WriteMode::Overwrite),
        )?;
        assert_eq!(fs::read_to_string(path)?, "id,name,day\n3,x,2024-01-01\n");
        Ok(())
    }
}
