// src/load/parquet_files.rs
//! Parquet output: one file per table, or hive-style partition directories.

use arrow::{
    array::UInt32Array,
    compute::{self, concat_batches},
    record_batch::RecordBatch,
};
use chrono::Utc;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::Compression,
    file::properties::WriterProperties,
};
use std::{
    collections::HashMap,
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};
use tracing::debug;

use super::{io_error, WriteError, WriteMode, WriteRequest};
use crate::table::{column_cells, Cell};

/// Directory name used for missing partition values.
const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

pub(super) fn write(batch: &RecordBatch, request: &WriteRequest) -> Result<PathBuf, WriteError> {
    let db_dir = request.db_dir();
    fs::create_dir_all(&db_dir).map_err(io_error(&db_dir))?;
    if request.partition_cols.is_empty() {
        write_flat(batch, request, &db_dir)
    } else {
        write_partitioned(batch, request, &db_dir)
    }
}

fn write_flat(batch: &RecordBatch, request: &WriteRequest, db_dir: &Path) -> Result<PathBuf, WriteError> {
    let path = db_dir.join(format!("{}.parquet", request.table));
    let combined = match request.mode {
        WriteMode::Append if path.exists() => {
            let existing = read_file(&path)?;
            debug!(existing = existing.num_rows(), new = batch.num_rows(), "appending to parquet file");
            append(&existing, batch)?
        }
        _ => batch.clone(),
    };
    write_file(&path, &combined)?;
    Ok(path)
}

fn write_partitioned(
    batch: &RecordBatch,
    request: &WriteRequest,
    db_dir: &Path,
) -> Result<PathBuf, WriteError> {
    let schema = batch.schema();
    let mut key_columns = Vec::with_capacity(request.partition_cols.len());
    for name in &request.partition_cols {
        let array = batch
            .column_by_name(name)
            .ok_or_else(|| WriteError::MissingPartitionColumn(name.clone()))?;
        key_columns.push((name, column_cells(array.as_ref())?));
    }

    let table_dir = db_dir.join(&request.table);
    if request.mode == WriteMode::Overwrite && table_dir.exists() {
        debug!(dir = %table_dir.display(), "clearing partitioned table");
        fs::remove_dir_all(&table_dir).map_err(io_error(&table_dir))?;
    }

    // partition directory -> row indices, in order of first appearance
    let mut groups: Vec<(PathBuf, Vec<u32>)> = Vec::new();
    let mut index: HashMap<PathBuf, usize> = HashMap::new();
    for row in 0..batch.num_rows() {
        let mut dir = table_dir.clone();
        for (name, cells) in &key_columns {
            dir.push(format!("{}={}", name, partition_value(&cells[row])));
        }
        let slot = *index.entry(dir.clone()).or_insert_with(|| {
            groups.push((dir, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(row as u32);
    }

    let keep: Vec<usize> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| !request.partition_cols.contains(f.name()))
        .map(|(i, _)| i)
        .collect();
    let values = batch.project(&keep)?;
    let stamp = Utc::now().format("%Y%m%d%H%M%S%6f");
    for (n, (dir, rows)) in groups.into_iter().enumerate() {
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        let rows = UInt32Array::from(rows);
        let columns = values
            .columns()
            .iter()
            .map(|c| compute::take(c.as_ref(), &rows, None))
            .collect::<Result<Vec<_>, _>>()?;
        let part = RecordBatch::try_new(values.schema(), columns)?;
        let path = dir.join(format!("part-{}-{}.parquet", stamp, n));
        write_file(&path, &part)?;
        debug!(path = %path.display(), rows = part.num_rows(), "partition written");
    }
    Ok(table_dir)
}

/// Directory-safe text of one partition key.
fn partition_value(cell: &Cell) -> String {
    if cell.is_null() {
        return NULL_PARTITION.to_string();
    }
    cell.to_string()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '=' | ':' => '_',
            other => other,
        })
        .collect()
}

/// Old rows followed by new rows; new columns are cast to the stored types.
fn append(existing: &RecordBatch, new: &RecordBatch) -> Result<RecordBatch, WriteError> {
    let names = |b: &RecordBatch| -> Vec<String> {
        b.schema().fields().iter().map(|f| f.name().clone()).collect()
    };
    if names(existing) != names(new) {
        return Err(WriteError::SchemaMismatch {
            existing: names(existing),
            new: names(new),
        });
    }
    let schema = existing.schema();
    let columns = new
        .columns()
        .iter()
        .zip(schema.fields())
        .map(|(c, f)| compute::cast(c.as_ref(), f.data_type()))
        .collect::<Result<Vec<_>, _>>()?;
    let new = RecordBatch::try_new(schema.clone(), columns)?;
    Ok(concat_batches(&schema, [existing, &new])?)
}

pub(crate) fn read_file(path: &Path) -> Result<RecordBatch, WriteError> {
    let file = File::open(path).map_err(io_error(path))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

fn write_file(path: &Path, batch: &RecordBatch) -> Result<(), WriteError> {
    let file = File::create(path).map_err(io_error(path))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(BufWriter::new(file), batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{ArrayRef, Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn batch(ids: Vec<i64>, labels: Vec<&str>) -> anyhow::Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("data_label", DataType::Utf8, true),
        ]));
        Ok(RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids)) as ArrayRef,
                Arc::new(StringArray::from(labels)),
            ],
        )?)
    }

    #[test]
    fn flat_append_keeps_old_rows() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let request = WriteRequest::new(dir.path(), "sales", "orders");
        let path = write(&batch(vec![1, 2], vec!["a", "a"])?, &request)?;
        assert_eq!(path, dir.path().join("sales").join("orders.parquet"));
        write(&batch(vec![3], vec!["b"])?, &request)?;
        let stored = read_file(&path)?;
        assert_eq!(column_cells(stored.column(0).as_ref())?, vec![Cell::Int(1), Cell::Int(2), Cell::Int(3)]);

        write(
            &batch(vec![9], vec!["c"])?,
            &request.clone().with_mode(WriteMode::Overwrite),
        )?;
        assert_eq!(read_file(&path)?.num_rows(), 1);
        Ok(())
    }

    #[test]
    fn partitions_follow_hive_layout() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let request = WriteRequest::new(dir.path(), "sales", "orders")
            .with_partitions(vec!["data_label".to_string()]);
        let table_dir = write(&batch(vec![1, 2, 3], vec!["set1", "set2", "set1"])?, &request)?;
        assert_eq!(table_dir, dir.path().join("sales").join("orders"));

        let part_rows = |label: &str| -> anyhow::Result<usize> {
            let mut rows = 0;
            for entry in fs::read_dir(table_dir.join(format!("data_label={}", label)))? {
                let part = read_file(&entry?.path())?;
                assert_eq!(part.num_columns(), 1);
                rows += part.num_rows();
            }
            Ok(rows)
        };
        assert_eq!(part_rows("set1")?, 2);
        assert_eq!(part_rows("set2")?, 1);

        write(&batch(vec![4], vec!["set2"])?, &request)?;
        assert_eq!(part_rows("set2")?, 2);

        write(&batch(vec![5], vec!["set3"])?, &request.clone().with_mode(WriteMode::Overwrite))?;
        assert!(!table_dir.join("data_label=set1").exists());
        assert_eq!(part_rows("set3")?, 1);
        Ok(())
    }

    #[test]
    fn missing_partition_column_is_an_error() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let request = WriteRequest::new(dir.path(), "sales", "orders")
            .with_partitions(vec!["region".to_string()]);
        let err = write(&batch(vec![1], vec!["a"])?, &request).unwrap_err();
        assert_eq!(err.to_string(), "partition column 'region' is not in the table");
        Ok(())
    }

    #[test]
    fn append_rejects_different_columns() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let request = WriteRequest::new(dir.path(), "sales", "orders");
        write(&batch(vec![1], vec!["a"])?, &request)?;
        let other = batch(vec![2], vec!["b"])?.project(&[0])?;
        assert!(matches!(
            write(&other, &request),
            Err(WriteError::SchemaMismatch { .. })
        ));
        Ok(())
    }
}
