// src/extract/mod.rs
//! Reading input tables from disk.

use arrow::{
    compute::concat_batches,
    csv::{reader::Format, ReaderBuilder},
    datatypes::SchemaRef,
    error::ArrowError,
    ipc::reader::FileReader,
    record_batch::RecordBatch,
};
use parquet::{arrow::arrow_reader::ParquetRecordBatchReaderBuilder, errors::ParquetError};
use std::{
    fmt,
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Bytes looked at when sniffing text files.
const SNIFF_BYTES: usize = 2048;
const BATCH_SIZE: usize = 8192;
const DELIMITERS: [u8; 4] = [b',', b';', b'|', b'\t'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Csv,
    CsvGz,
    Tsv,
    Excel,
    Parquet,
    Feather,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileType::Csv => "csv",
            FileType::CsvGz => "csv.gz",
            FileType::Tsv => "tsv",
            FileType::Excel => "excel",
            FileType::Parquet => "parquet",
            FileType::Feather => "feather",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("unsupported file type for {}: {reason}", .path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },
    #[error("cannot read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot decode {}", .path.display())]
    Arrow {
        path: PathBuf,
        #[source]
        source: ArrowError,
    },
    #[error("cannot decode {}", .path.display())]
    Parquet {
        path: PathBuf,
        #[source]
        source: ParquetError,
    },
}

/// Work out what kind of table file `path` is: extension first, then magic
/// bytes, then the delimiter of the first text lines.
pub fn detect_file_type(path: &Path) -> Result<FileType, ReadError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let by_extension = [
        (".csv.gz", FileType::CsvGz),
        (".tsv.gz", FileType::CsvGz),
        (".csv", FileType::Csv),
        (".tsv", FileType::Tsv),
        (".xlsx", FileType::Excel),
        (".xls", FileType::Excel),
        (".parquet", FileType::Parquet),
        (".feather", FileType::Feather),
        (".arrow", FileType::Feather),
    ];
    if let Some((_, kind)) = by_extension.iter().find(|(ext, _)| name.ends_with(ext)) {
        return Ok(*kind);
    }

    let sample = read_sample(path)?;
    if sample.starts_with(b"PAR1") {
        return Ok(FileType::Parquet);
    }
    if sample.starts_with(b"PK") {
        return Ok(FileType::Excel);
    }
    if sample.starts_with(b"ARROW1") {
        return Ok(FileType::Feather);
    }
    match sniff_delimiter(&sample) {
        Some(b'\t') => Ok(FileType::Tsv),
        Some(_) => Ok(FileType::Csv),
        None => Err(ReadError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: "could not determine the file type".to_string(),
        }),
    }
}

fn read_sample(path: &Path) -> Result<Vec<u8>, ReadError> {
    let mut file = File::open(path).map_err(io_error(path))?;
    let mut sample = Vec::with_capacity(SNIFF_BYTES);
    file.by_ref()
        .take(SNIFF_BYTES as u64)
        .read_to_end(&mut sample)
        .map_err(io_error(path))?;
    Ok(sample)
}

/// The delimiter that splits the sampled lines into the same number of
/// fields, preferring the one producing the most fields.
pub fn sniff_delimiter(sample: &[u8]) -> Option<u8> {
    let text = String::from_utf8_lossy(sample);
    let mut lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    // the sample may cut the last line short
    if sample.len() >= SNIFF_BYTES && lines.len() > 1 {
        lines.pop();
    }
    let first = lines.first()?;
    DELIMITERS
        .iter()
        .copied()
        .filter_map(|d| {
            let count = first.bytes().filter(|&b| b == d).count();
            let consistent = lines
                .iter()
                .all(|l| l.bytes().filter(|&b| b == d).count() == count);
            (count > 0 && consistent).then_some((d, count))
        })
        .max_by_key(|&(_, count)| count)
        .map(|(d, _)| d)
}

/// Read a whole table file into one batch.
#[instrument(level = "debug")]
pub fn read_table(path: &Path) -> Result<RecordBatch, ReadError> {
    if !path.exists() {
        return Err(ReadError::NotFound(path.to_path_buf()));
    }
    let kind = detect_file_type(path)?;
    debug!(%kind, "detected file type");
    let batch = match kind {
        FileType::Csv => {
            let sample = read_sample(path)?;
            read_delimited(path, sniff_delimiter(&sample).unwrap_or(b','))?
        }
        FileType::Tsv => read_delimited(path, b'\t')?,
        FileType::Parquet => read_parquet(path)?,
        FileType::Feather => read_feather(path)?,
        FileType::Excel | FileType::CsvGz => {
            return Err(ReadError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: format!("{} input is not supported", kind),
            })
        }
    };
    info!(
        path = %path.display(),
        rows = batch.num_rows(),
        columns = batch.num_columns(),
        "read table"
    );
    Ok(batch)
}

fn arrow_error(path: &Path) -> impl Fn(ArrowError) -> ReadError + '_ {
    move |source| ReadError::Arrow {
        path: path.to_path_buf(),
        source,
    }
}

fn io_error(path: &Path) -> impl Fn(io::Error) -> ReadError + '_ {
    move |source| ReadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn collect(path: &Path, schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<RecordBatch, ReadError> {
    concat_batches(&schema, &batches).map_err(arrow_error(path))
}

fn read_delimited(path: &Path, delimiter: u8) -> Result<RecordBatch, ReadError> {
    let mut file = File::open(path).map_err(io_error(path))?;
    let format = Format::default()
        .with_header(true)
        .with_delimiter(delimiter);
    let (schema, _) = format
        .infer_schema(&mut file, None)
        .map_err(arrow_error(path))?;
    file.seek(SeekFrom::Start(0)).map_err(io_error(path))?;
    let schema = Arc::new(schema);
    let reader = ReaderBuilder::new(schema.clone())
        .with_format(format)
        .with_batch_size(BATCH_SIZE)
        .build(file)
        .map_err(arrow_error(path))?;
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(arrow_error(path))?;
    collect(path, schema, batches)
}

fn read_parquet(path: &Path) -> Result<RecordBatch, ReadError> {
    let parquet_error = |source| ReadError::Parquet {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_error(path))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(parquet_error)?;
    let schema = builder.schema().clone();
    let reader = builder
        .with_batch_size(BATCH_SIZE)
        .build()
        .map_err(parquet_error)?;
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(arrow_error(path))?;
    collect(path, schema, batches)
}

fn read_feather(path: &Path) -> Result<RecordBatch, ReadError> {
    let file = File::open(path).map_err(io_error(path))?;
    let reader = FileReader::try_new(file, None).map_err(arrow_error(path))?;
    let schema = reader.schema();
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(arrow_error(path))?;
    collect(path, schema, batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{column_cells, Cell};
    use arrow::{
        array::{Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
        ipc::writer::FileWriter,
    };
    use indoc::indoc;
    use parquet::arrow::ArrowWriter;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn sample_batch() -> anyhow::Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        Ok(RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("a"), None])),
            ],
        )?)
    }

    #[test]
    fn detects_by_extension_then_content() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let check = |name: &str, bytes: &[u8]| -> anyhow::Result<FileType> {
            let path = dir.path().join(name);
            fs::write(&path, bytes)?;
            Ok(detect_file_type(&path)?)
        };
        assert_eq!(check("a.CSV", b"")?, FileType::Csv);
        assert_eq!(check("a.csv.gz", b"")?, FileType::CsvGz);
        assert_eq!(check("a.xlsx", b"")?, FileType::Excel);
        assert_eq!(check("blob", b"PAR1....")?, FileType::Parquet);
        assert_eq!(check("book", b"PK\x03\x04")?, FileType::Excel);
        assert_eq!(check("rows", b"a\tb\n1\t2\n")?, FileType::Tsv);
        assert_eq!(check("rows2", b"a;b\n1;2\n")?, FileType::Csv);
        assert!(matches!(
            check("mystery", b"just words"),
            Err(e) if e.to_string().contains("could not determine")
        ));
        Ok(())
    }

    #[test]
    fn sniffs_consistent_delimiters() {
        assert_eq!(sniff_delimiter(b"a;b;c\n1;2;3\n"), Some(b';'));
        assert_eq!(sniff_delimiter(b"a|b\n1|2\n"), Some(b'|'));
        // commas inside a single field count for less than a steady separator
        assert_eq!(sniff_delimiter(b"a;b\n1,5;2\n"), Some(b';'));
        assert_eq!(sniff_delimiter(b"plain\ntext\n"), None);
    }

    #[test]
    fn reads_csv_with_inferred_types() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("purchases.csv");
        fs::write(
            &path,
            indoc! {"
                id;amount;currency;bought
                1;10.5;USD;2024-01-05
                2;;EUR;2024-02-11
            "},
        )?;
        let batch = read_table(&path)?;
        assert_eq!(batch.num_rows(), 2);
        let schema = batch.schema();
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Float64);
        assert_eq!(schema.field(2).data_type(), &DataType::Utf8);
        assert_eq!(
            column_cells(batch.column(1).as_ref())?,
            vec![Cell::Float(10.5), Cell::Null]
        );
        Ok(())
    }

    #[test]
    fn late_float_widens_the_whole_column() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("late.csv");
        let mut text = String::from("id,amount\n");
        for i in 0..1200 {
            text.push_str(&format!("{},{}\n", i, i * 2));
        }
        text.push_str("1200,3.5\n");
        fs::write(&path, text)?;

        let batch = read_table(&path)?;
        assert_eq!(batch.num_rows(), 1201);
        assert_eq!(batch.schema().field(1).data_type(), &DataType::Float64);
        let amounts = column_cells(batch.column(1).as_ref())?;
        assert_eq!(amounts[1], Cell::Float(2.0));
        assert_eq!(amounts[1200], Cell::Float(3.5));
        Ok(())
    }

    #[test]
    fn reads_parquet_and_feather() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let batch = sample_batch()?;

        let parquet_path = dir.path().join("t.parquet");
        let mut writer = ArrowWriter::try_new(File::create(&parquet_path)?, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        assert_eq!(read_table(&parquet_path)?.columns(), batch.columns());

        let feather_path = dir.path().join("t.feather");
        let mut writer = FileWriter::try_new(File::create(&feather_path)?, &batch.schema())?;
        writer.write(&batch)?;
        writer.finish()?;
        assert_eq!(read_table(&feather_path)?.columns(), batch.columns());
        Ok(())
    }

    #[test]
    fn missing_and_unsupported_files() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let missing = read_table(&dir.path().join("none.csv")).unwrap_err();
        assert!(matches!(missing, ReadError::NotFound(_)));

        let book = dir.path().join("book.xlsx");
        fs::write(&book, b"PK")?;
        let err = read_table(&book).unwrap_err();
        assert!(err.to_string().contains("excel input is not supported"));
        Ok(())
    }
}
