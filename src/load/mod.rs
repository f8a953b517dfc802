// src/load/mod.rs
//! Writing result tables to their destination.

mod delimited;
mod duck;
mod parquet_files;
mod sqlite;

use arrow::{datatypes::DataType, error::ArrowError, record_batch::RecordBatch};
use clap::ValueEnum;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fmt, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{info, instrument};

use crate::table::Cell;

static TABLE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Where a result table goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Sink {
    #[default]
    Parquet,
    #[serde(alias = "duck")]
    #[value(name = "duckdb", alias = "duck")]
    DuckDb,
    Sqlite,
    Tsv,
    Csv,
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sink::Parquet => "parquet",
            Sink::DuckDb => "duckdb",
            Sink::Sqlite => "sqlite",
            Sink::Tsv => "tsv",
            Sink::Csv => "csv",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Overwrite,
    #[default]
    Append,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteMode::Overwrite => "overwrite",
            WriteMode::Append => "append",
        })
    }
}

/// Destination of one write.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub output_dir: PathBuf,
    pub db: String,
    pub table: String,
    pub mode: WriteMode,
    /// Hive-style partition columns; parquet only.
    pub partition_cols: Vec<String>,
}

impl WriteRequest {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        db: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            db: db.into(),
            table: table.into(),
            mode: WriteMode::default(),
            partition_cols: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_partitions(mut self, cols: Vec<String>) -> Self {
        self.partition_cols = cols;
        self
    }

    /// `<out>/<db>`
    fn db_dir(&self) -> PathBuf {
        self.output_dir.join(&self.db)
    }

    /// `<out>/<db>.<extension>`
    fn db_file(&self, extension: &str) -> PathBuf {
        self.output_dir.join(format!("{}.{}", self.db, extension))
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("invalid table name '{0}': expected letters, digits and underscores, not starting with a digit")]
    InvalidTableName(String),
    #[error("database name must not be empty")]
    EmptyDatabaseName,
    #[error("partition column '{0}' is not in the table")]
    MissingPartitionColumn(String),
    #[error("cannot append: existing table has columns {existing:?}, new rows have {new:?}")]
    SchemaMismatch {
        existing: Vec<String>,
        new: Vec<String>,
    },
    #[error("I/O error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Arrow(#[from] ArrowError),
    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error(transparent)]
    DuckDb(#[from] duckdb::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub(crate) fn io_error(path: &Path) -> impl Fn(io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Table names end up in file names and SQL statements.
pub fn validate_table_name(name: &str) -> Result<(), WriteError> {
    if TABLE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(WriteError::InvalidTableName(name.to_string()))
    }
}

/// Double-quoted SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column type shared by the SQL sinks, `(duckdb, sqlite)`.
pub(crate) fn sql_types(data_type: &DataType) -> (&'static str, &'static str) {
    match data_type {
        DataType::Boolean => ("BOOLEAN", "INTEGER"),
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => ("BIGINT", "INTEGER"),
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            ("UBIGINT", "INTEGER")
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => ("DOUBLE", "REAL"),
        DataType::Date32 | DataType::Date64 => ("DATE", "TEXT"),
        DataType::Timestamp(..) => ("TIMESTAMP", "TEXT"),
        _ => ("VARCHAR", "TEXT"),
    }
}

/// SQLite has no date type; dates and timestamps are stored as ISO text.
pub(crate) fn temporal_text(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        Cell::Datetime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        _ => None,
    }
}

/// Write `batch` through `sink`; returns the file or directory written.
#[instrument(skip(batch, request), fields(db = %request.db, table = %request.table, mode = %request.mode))]
pub fn write_table(
    batch: &RecordBatch,
    sink: Sink,
    request: &WriteRequest,
) -> Result<PathBuf, WriteError> {
    validate_table_name(&request.table)?;
    if request.db.trim().is_empty() {
        return Err(WriteError::EmptyDatabaseName);
    }
    let destination = match sink {
        Sink::Parquet => parquet_files::write(batch, request)?,
        Sink::DuckDb => duck::write(batch, request)?,
        Sink::Sqlite => sqlite::write(batch, request)?,
        Sink::Tsv => delimited::write(batch, request, b'\t', "tsv")?,
        Sink::Csv => delimited::write(batch, request, b',', "csv")?,
    };
    info!(
        %sink,
        rows = batch.num_rows(),
        destination = %destination.display(),
        "table written"
    );
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn table_names_are_identifiers() {
        assert!(validate_table_name("purchases_2024").is_ok());
        assert!(validate_table_name("_staging").is_ok());
        for bad in ["", "2024", "drop table", "a;b", "x-y"] {
            assert!(
                matches!(validate_table_name(bad), Err(WriteError::InvalidTableName(_))),
                "{:?} accepted",
                bad
            );
        }
    }

    #[test]
    fn sinks_parse_from_config_names() -> anyhow::Result<()> {
        #[derive(Deserialize)]
        struct Holder {
            sink: Sink,
            mode: WriteMode,
        }
        let h: Holder = toml::from_str("sink = \"duckdb\"\nmode = \"overwrite\"")?;
        assert_eq!((h.sink, h.mode), (Sink::DuckDb, WriteMode::Overwrite));
        let h: Holder = toml::from_str("sink = \"duck\"\nmode = \"append\"")?;
        assert_eq!(h.sink, Sink::DuckDb);
        assert_eq!(Sink::from_str("sqlite", true).ok(), Some(Sink::Sqlite));
        Ok(())
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("order"), "\"order\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
