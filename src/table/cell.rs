// src/table/cell.rs
use arrow::{
    array::{
        Array, ArrayRef, AsArray, BooleanArray, Date32Array, Float64Array, Int64Array,
        StringArray, TimestampMicrosecondArray,
    },
    datatypes::{
        DataType, Date32Type, Date64Type, Float32Type, Float64Type, Int16Type, Int32Type,
        Int64Type, Int8Type, TimeUnit, TimestampMicrosecondType, TimestampMillisecondType,
        TimestampNanosecondType, TimestampSecondType, UInt16Type, UInt32Type, UInt64Type,
        UInt8Type,
    },
    error::ArrowError,
};
use chrono::{NaiveDate, NaiveDateTime};
use std::{cmp::Ordering, fmt, sync::Arc};

use super::dates::{date_to_days, datetime_to_micros};

/// A single table value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    Datetime(NaiveDateTime),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Null or a float NaN, the way pandas counts missing values.
    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Cell::Datetime(dt) => Some(*dt),
            Cell::Date(d) => d.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "bool",
            Cell::Int(_) => "int64",
            Cell::Float(_) => "float64",
            Cell::Str(_) => "str",
            Cell::Date(_) => "date",
            Cell::Datetime(_) => "datetime64",
        }
    }

    /// Ordering across compatible kinds: numbers with numbers, strings with
    /// strings, dates with timestamps. `None` for anything else.
    pub fn compare(&self, other: &Cell) -> Option<Ordering> {
        match (self, other) {
            (Cell::Int(a), Cell::Int(b)) => Some(a.cmp(b)),
            (Cell::Str(a), Cell::Str(b)) => Some(a.cmp(b)),
            (Cell::Bool(a), Cell::Bool(b)) => Some(a.cmp(b)),
            _ => {
                if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
                    return a.partial_cmp(&b);
                }
                match (self.as_datetime(), other.as_datetime()) {
                    (Some(a), Some(b)) => Some(a.cmp(&b)),
                    _ => None,
                }
            }
        }
    }

    /// Equality used by membership checks: numeric kinds compare by value.
    pub fn loose_eq(&self, other: &Cell) -> bool {
        match (self, other) {
            (Cell::Null, Cell::Null) => true,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

/// Python-style float rendering: integral values keep a trailing `.0`.
pub fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        f.to_string()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "null"),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(v) => write!(f, "{}", format_float(*v)),
            Cell::Str(s) => write!(f, "{}", s),
            Cell::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Cell::Datetime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

fn missing(kind: &str, row: usize) -> ArrowError {
    ArrowError::ComputeError(format!("{} value at row {} is out of range", kind, row))
}

/// Read one value out of an Arrow array.
pub fn cell_at(array: &dyn Array, row: usize) -> Result<Cell, ArrowError> {
    if array.is_null(row) {
        return Ok(Cell::Null);
    }
    let cell = match array.data_type() {
        DataType::Null => Cell::Null,
        DataType::Boolean => Cell::Bool(array.as_boolean().value(row)),
        DataType::Int8 => Cell::Int(array.as_primitive::<Int8Type>().value(row) as i64),
        DataType::Int16 => Cell::Int(array.as_primitive::<Int16Type>().value(row) as i64),
        DataType::Int32 => Cell::Int(array.as_primitive::<Int32Type>().value(row) as i64),
        DataType::Int64 => Cell::Int(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => Cell::Int(array.as_primitive::<UInt8Type>().value(row) as i64),
        DataType::UInt16 => Cell::Int(array.as_primitive::<UInt16Type>().value(row) as i64),
        DataType::UInt32 => Cell::Int(array.as_primitive::<UInt32Type>().value(row) as i64),
        DataType::UInt64 => {
            let v = array.as_primitive::<UInt64Type>().value(row);
            i64::try_from(v)
                .map(Cell::Int)
                .unwrap_or(Cell::Float(v as f64))
        }
        DataType::Float32 => Cell::Float(array.as_primitive::<Float32Type>().value(row) as f64),
        DataType::Float64 => Cell::Float(array.as_primitive::<Float64Type>().value(row)),
        DataType::Utf8 => Cell::Str(array.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Cell::Str(array.as_string::<i64>().value(row).to_string()),
        DataType::Date32 => Cell::Date(
            array
                .as_primitive::<Date32Type>()
                .value_as_date(row)
                .ok_or_else(|| missing("date", row))?,
        ),
        DataType::Date64 => Cell::Date(
            array
                .as_primitive::<Date64Type>()
                .value_as_date(row)
                .ok_or_else(|| missing("date", row))?,
        ),
        DataType::Timestamp(unit, _) => {
            let dt = match unit {
                TimeUnit::Second => array
                    .as_primitive::<TimestampSecondType>()
                    .value_as_datetime(row),
                TimeUnit::Millisecond => array
                    .as_primitive::<TimestampMillisecondType>()
                    .value_as_datetime(row),
                TimeUnit::Microsecond => array
                    .as_primitive::<TimestampMicrosecondType>()
                    .value_as_datetime(row),
                TimeUnit::Nanosecond => array
                    .as_primitive::<TimestampNanosecondType>()
                    .value_as_datetime(row),
            };
            Cell::Datetime(dt.ok_or_else(|| missing("timestamp", row))?)
        }
        other => {
            return Err(ArrowError::NotYetImplemented(format!(
                "reading {} values",
                other
            )))
        }
    };
    Ok(cell)
}

/// All values of a column, in row order.
pub fn column_cells(array: &dyn Array) -> Result<Vec<Cell>, ArrowError> {
    (0..array.len()).map(|row| cell_at(array, row)).collect()
}

#[derive(Clone, Copy, PartialEq)]
enum Kind {
    Bool,
    Int,
    Float,
    Str,
    Date,
    Datetime,
}

fn kind_of(cell: &Cell) -> Option<Kind> {
    match cell {
        Cell::Null => None,
        Cell::Bool(_) => Some(Kind::Bool),
        Cell::Int(_) => Some(Kind::Int),
        Cell::Float(_) => Some(Kind::Float),
        Cell::Str(_) => Some(Kind::Str),
        Cell::Date(_) => Some(Kind::Date),
        Cell::Datetime(_) => Some(Kind::Datetime),
    }
}

/// Widest kind able to hold every value; mixed kinds fall back to strings.
fn unify(cells: &[Cell]) -> Kind {
    let mut acc: Option<Kind> = None;
    for kind in cells.iter().filter_map(kind_of) {
        acc = Some(match (acc, kind) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(Kind::Int), Kind::Float) | (Some(Kind::Float), Kind::Int) => Kind::Float,
            (Some(Kind::Date), Kind::Datetime) | (Some(Kind::Datetime), Kind::Date) => {
                Kind::Datetime
            }
            _ => Kind::Str,
        });
    }
    acc.unwrap_or(Kind::Str)
}

/// Build an Arrow array from values, inferring the column type.
pub fn array_from_cells(cells: &[Cell]) -> ArrayRef {
    match unify(cells) {
        Kind::Bool => Arc::new(
            cells
                .iter()
                .map(|c| match c {
                    Cell::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        ),
        Kind::Int => Arc::new(
            cells
                .iter()
                .map(|c| match c {
                    Cell::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        Kind::Float => Arc::new(cells.iter().map(Cell::as_f64).collect::<Float64Array>()),
        Kind::Date => Arc::new(
            cells
                .iter()
                .map(|c| match c {
                    Cell::Date(d) => Some(date_to_days(*d)),
                    _ => None,
                })
                .collect::<Date32Array>(),
        ),
        Kind::Datetime => Arc::new(
            cells
                .iter()
                .map(|c| c.as_datetime().map(datetime_to_micros))
                .collect::<TimestampMicrosecondArray>(),
        ),
        Kind::Str => Arc::new(
            cells
                .iter()
                .map(|c| match c {
                    Cell::Null => None,
                    other => Some(other.to_string()),
                })
                .collect::<StringArray>(),
        ),
    }
}

/// A column repeating `cell` `len` times.
pub fn broadcast(cell: &Cell, len: usize) -> ArrayRef {
    array_from_cells(&vec![cell.clone(); len])
}
