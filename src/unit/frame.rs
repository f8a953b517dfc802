// src/unit/frame.rs
//! Table and column operations of the transform language.
//!
//! Whole-column arithmetic, comparisons, masks, sorting and stacking run on
//! Arrow compute kernels; anything the kernels have no type for falls back
//! to a cell-by-cell evaluation with the scalar rules of the interpreter.

use arrow::{
    array::{
        new_null_array, Array, ArrayRef, AsArray, BooleanArray, Int64Array, StringArray,
        UInt32Array,
    },
    compute::{
        self,
        kernels::{cmp, numeric},
    },
    datatypes::{DataType, Field, Schema},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use chrono::{Datelike, NaiveDate, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    fmt::Write,
    sync::Arc,
};

use super::{
    ast::{BinOp, CmpOp, UnaryOp},
    builtins::{dtype_of, round_half_even},
    interp::{normalize_index, scalar_binary, slice_indices, Interpreter, RuntimeError},
    value::{Accessor, Args, Series, Value},
};
use crate::{
    schema::{arrow::dtype_name, coerce, DType},
    table::{
        array_from_cells, broadcast, cell_at, column_cells,
        dates::{parse_datetime, parse_with_format},
        Cell, Table,
    },
};

pub const TABLE_METHODS: &[&str] = &[
    "copy",
    "rename",
    "drop",
    "assign",
    "head",
    "tail",
    "sort_values",
    "drop_duplicates",
    "fillna",
    "astype",
    "merge",
    "reset_index",
    "dropna",
    "isna",
    "isnull",
    "notna",
    "notnull",
];

pub const SERIES_METHODS: &[&str] = &[
    "isna", "isnull", "notna", "notnull", "fillna", "astype", "apply", "map", "isin", "between",
    "sum", "min", "max", "mean", "count", "any", "all", "unique", "nunique", "tolist", "to_list",
    "round", "abs", "head", "tail", "copy", "rename",
];

pub const STR_METHODS: &[&str] = &[
    "lower", "upper", "title", "strip", "lstrip", "rstrip", "replace", "contains", "startswith",
    "endswith", "len", "slice", "extract", "zfill",
];

pub const DT_METHODS: &[&str] = &["strftime"];

const DT_PROPERTIES: &[&str] = &[
    "date", "year", "month", "day", "hour", "minute", "second", "weekday", "dayofweek",
];

/// `\1`-style group references in a replacement string.
static GROUP_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\(\d+)").unwrap());

fn type_error(message: impl Into<String>) -> RuntimeError {
    RuntimeError::Type(message.into())
}

fn key_error(name: &str) -> RuntimeError {
    RuntimeError::Key(Value::str(name).repr())
}

fn table_from(columns: Vec<(String, ArrayRef)>, rows: usize) -> Result<Table, RuntimeError> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(name, array.data_type().clone(), true))
        .collect();
    let arrays = columns.into_iter().map(|(_, array)| array).collect();
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        arrays,
        &options,
    )?)
}

fn table_columns(table: &Table) -> Vec<(String, ArrayRef)> {
    table
        .schema()
        .fields()
        .iter()
        .zip(table.columns())
        .map(|(field, array)| (field.name().clone(), array.clone()))
        .collect()
}

fn column_names(table: &Table) -> Vec<String> {
    table
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect()
}

fn column(table: &Table, name: &str) -> Result<Series, RuntimeError> {
    table
        .column_by_name(name)
        .map(|array| Series::new(name, array.clone()))
        .ok_or_else(|| key_error(name))
}

fn project(table: &Table, names: &[String]) -> Result<Table, RuntimeError> {
    let missing: Vec<Value> = names
        .iter()
        .filter(|n| table.column_by_name(n).is_none())
        .map(Value::str)
        .collect();
    if !missing.is_empty() {
        return Err(RuntimeError::Key(format!(
            "{} not in index",
            Value::List(missing).repr()
        )));
    }
    let columns = names
        .iter()
        .map(|n| column(table, n).map(|s| (s.name, s.array)))
        .collect::<Result<_, _>>()?;
    table_from(columns, table.num_rows())
}

fn row_indices(rows: &[usize]) -> UInt32Array {
    rows.iter().map(|&i| i as u32).collect::<Vec<u32>>().into()
}

fn take_rows(table: &Table, rows: &[usize]) -> Result<Table, RuntimeError> {
    let indices = row_indices(rows);
    let columns = table
        .columns()
        .iter()
        .map(|array| compute::take(array.as_ref(), &indices, None))
        .collect::<Result<Vec<_>, _>>()?;
    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    Ok(RecordBatch::try_new_with_options(
        table.schema(),
        columns,
        &options,
    )?)
}

fn take_series(series: &Series, rows: &[usize]) -> Result<Series, RuntimeError> {
    let array = compute::take(series.array.as_ref(), &row_indices(rows), None)?;
    Ok(Series::new(&series.name, array))
}

fn bool_mask(mask: &Series, len: usize) -> Result<BooleanArray, RuntimeError> {
    let Some(flags) = mask.array.as_boolean_opt() else {
        return Err(RuntimeError::Key(format!(
            "a {} column cannot be used as a row mask",
            dtype_name(mask.array.data_type())
        )));
    };
    if flags.len() != len {
        return Err(RuntimeError::Value(format!(
            "Item wrong length {} instead of {}.",
            flags.len(),
            len
        )));
    }
    Ok(flags.clone())
}

fn filter_rows(table: &Table, mask: &Series) -> Result<Table, RuntimeError> {
    let mask = bool_mask(mask, table.num_rows())?;
    Ok(compute::filter_record_batch(table, &mask)?)
}

fn scalar_cells(values: &[Value], what: &str) -> Result<Vec<Cell>, RuntimeError> {
    values
        .iter()
        .map(|v| {
            v.to_cell().ok_or_else(|| {
                type_error(format!(
                    "{} must hold scalar values, not '{}'",
                    what,
                    v.type_name()
                ))
            })
        })
        .collect()
}

fn bool_series(name: &str, flags: impl IntoIterator<Item = Option<bool>>) -> Series {
    Series::new(name, Arc::new(flags.into_iter().collect::<BooleanArray>()))
}

fn int_series(name: &str, values: impl IntoIterator<Item = Option<i64>>) -> Series {
    Series::new(name, Arc::new(values.into_iter().collect::<Int64Array>()))
}

fn str_series(name: &str, values: impl IntoIterator<Item = Option<String>>) -> Series {
    Series::new(name, Arc::new(values.into_iter().collect::<StringArray>()))
}

/// `obj[index]` on tables, columns and their accessors.
pub fn get_item(object: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match (object, index) {
        (Value::Table(t), Value::Str(name)) => Ok(Value::Series(column(t, name)?)),
        (Value::Table(t), Value::List(_)) => Ok(Value::Table(project(
            t,
            &index.expect_names("column selection")?,
        )?)),
        (Value::Table(t), Value::Series(mask)) => Ok(Value::Table(filter_rows(t, mask)?)),
        (Value::Table(t), Value::Slice(lo, hi, step)) => {
            let rows = slice_indices(t.num_rows(), *lo, *hi, *step)?;
            Ok(Value::Table(take_rows(t, &rows)?))
        }
        (Value::Table(_), other) => Err(key_error(&other.to_string())),
        (Value::Series(s), Value::Series(mask)) => {
            let mask = bool_mask(mask, s.len())?;
            let array = compute::filter(s.array.as_ref(), &mask)?;
            Ok(Value::Series(Series::new(&s.name, array)))
        }
        (Value::Series(s), Value::Slice(lo, hi, step)) => {
            let rows = slice_indices(s.len(), *lo, *hi, *step)?;
            Ok(Value::Series(take_series(s, &rows)?))
        }
        (Value::Series(s), Value::List(items)) => {
            let rows = items
                .iter()
                .map(|v| {
                    normalize_index(v.expect_int("positions")?, s.len())
                        .ok_or_else(|| RuntimeError::Index("positional indexer is out-of-bounds".into()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Series(take_series(s, &rows)?))
        }
        (Value::Series(s), other) => {
            let row = normalize_index(other.expect_int("Series index")?, s.len())
                .ok_or_else(|| RuntimeError::Key(other.repr()))?;
            Ok(Value::from_cell(cell_at(s.array.as_ref(), row)?))
        }
        (Value::Accessor(accessor), _) => match accessor.as_ref() {
            Accessor::Loc(t) => loc(t, index),
            Accessor::Str(s) => str_index(s, index),
            Accessor::Dt(_) => Err(type_error("'DatetimeProperties' object is not subscriptable")),
        },
        (other, _) => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `df.loc[rows]`, `df.loc[rows, cols]`
fn loc(table: &Table, index: &Value) -> Result<Value, RuntimeError> {
    let (rows, cols) = match index {
        Value::Tuple(items) if items.len() == 2 => (&items[0], Some(&items[1])),
        other => (other, None),
    };
    let selected = match rows {
        Value::Slice(None, None, None) => table.clone(),
        Value::Series(mask) => filter_rows(table, mask)?,
        Value::List(flags) if flags.iter().all(|f| matches!(f, Value::Bool(_))) => {
            let mask = bool_series("", flags.iter().map(|f| Some(matches!(f, Value::Bool(true)))));
            filter_rows(table, &mask)?
        }
        other => {
            return Err(type_error(format!(
                "unsupported .loc row selector of type '{}'",
                other.type_name()
            )))
        }
    };
    match cols {
        None | Some(Value::Slice(None, None, None)) => Ok(Value::Table(selected)),
        Some(Value::Str(name)) => Ok(Value::Series(column(&selected, name)?)),
        Some(names) => Ok(Value::Table(project(
            &selected,
            &names.expect_names(".loc column selector")?,
        )?)),
    }
}

/// `s.str[i]`, `s.str[a:b]`
fn str_index(series: &Series, index: &Value) -> Result<Value, RuntimeError> {
    let mut out = Vec::with_capacity(series.len());
    for cell in series.cells()? {
        let Cell::Str(s) = cell else {
            out.push(None);
            continue;
        };
        let chars: Vec<char> = s.chars().collect();
        out.push(match index {
            Value::Slice(lo, hi, step) => Some(
                slice_indices(chars.len(), *lo, *hi, *step)?
                    .into_iter()
                    .map(|i| chars[i])
                    .collect(),
            ),
            other => normalize_index(other.expect_int("string position")?, chars.len())
                .map(|i| chars[i].to_string()),
        });
    }
    Ok(Value::Series(str_series(&series.name, out)))
}

fn with_column(table: Table, name: &str, value: Value) -> Result<Table, RuntimeError> {
    let rows = table.num_rows();
    let fresh = table.num_columns() == 0;
    let length_error = |got: usize| {
        RuntimeError::Value(format!(
            "Length of values ({}) does not match length of index ({})",
            got, rows
        ))
    };
    let array = match value {
        Value::Series(s) if fresh || s.len() == rows => s.array,
        Value::Series(s) => return Err(length_error(s.len())),
        Value::List(items) | Value::Tuple(items) => {
            if !fresh && items.len() != rows {
                return Err(length_error(items.len()));
            }
            array_from_cells(&scalar_cells(&items, "a column")?)
        }
        scalar => match scalar.to_cell() {
            Some(cell) => broadcast(&cell, rows),
            None => {
                return Err(type_error(format!(
                    "cannot store a '{}' in a column",
                    scalar.type_name()
                )))
            }
        },
    };
    let rows = if fresh { array.len() } else { rows };
    let mut columns = table_columns(&table);
    match columns.iter_mut().find(|(n, _)| n == name) {
        Some(slot) => slot.1 = array,
        None => columns.push((name.to_string(), array)),
    }
    table_from(columns, rows)
}

/// `df[key] = value`
pub fn set_column(table: Table, key: &Value, value: Value) -> Result<Value, RuntimeError> {
    let name = key.expect_str("column name")?;
    Ok(Value::Table(with_column(table, name, value)?))
}

/// Name and length of the columnar side of an operation.
fn series_shape(l: &Value, r: &Value, symbol: &str) -> Result<(String, usize), RuntimeError> {
    match (l, r) {
        (Value::Series(s), _) | (_, Value::Series(s)) => Ok((s.name.clone(), s.len())),
        _ => Err(type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            symbol,
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn operand(value: &Value, len: usize, symbol: &str) -> Result<ArrayRef, RuntimeError> {
    let mismatch = |got: usize| {
        RuntimeError::Value(format!(
            "operands could not be broadcast together with lengths {} and {}",
            len, got
        ))
    };
    match value {
        Value::Series(s) if s.len() == len => Ok(s.array.clone()),
        Value::Series(s) => Err(mismatch(s.len())),
        Value::List(items) if items.len() == len => {
            Ok(array_from_cells(&scalar_cells(items, "an operand list")?))
        }
        Value::List(items) => Err(mismatch(items.len())),
        other => other
            .to_cell()
            .map(|cell| broadcast(&cell, len))
            .ok_or_else(|| {
                type_error(format!(
                    "unsupported operand type(s) for {}: 'Series' and '{}'",
                    symbol,
                    other.type_name()
                ))
            }),
    }
}

/// Arithmetic and bitwise operators with at least one column operand.
pub fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
    let (name, len) = series_shape(l, r, op.symbol())?;
    let la = operand(l, len, op.symbol())?;
    let ra = operand(r, len, op.symbol())?;
    if matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) {
        if let (Some(a), Some(b)) = (la.as_boolean_opt(), ra.as_boolean_opt()) {
            let out = match op {
                BinOp::BitAnd => compute::and_kleene(a, b)?,
                BinOp::BitOr => compute::or_kleene(a, b)?,
                _ => cmp::neq(a, b)?,
            };
            return Ok(Value::Series(Series::new(name, Arc::new(out))));
        }
    }
    let out = match numeric_kernel(op, &la, &ra)? {
        Some(array) => array,
        None => cellwise_binary(op, &la, &ra)?,
    };
    Ok(Value::Series(Series::new(name, out)))
}

fn numeric_kernel(op: BinOp, l: &ArrayRef, r: &ArrayRef) -> Result<Option<ArrayRef>, RuntimeError> {
    if !matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div) {
        return Ok(None);
    }
    let (l, r) = match (l.data_type(), r.data_type()) {
        (DataType::Int64, DataType::Int64) if op != BinOp::Div => (l.clone(), r.clone()),
        (a, b) if a.is_numeric() && b.is_numeric() => (
            compute::cast(l.as_ref(), &DataType::Float64)?,
            compute::cast(r.as_ref(), &DataType::Float64)?,
        ),
        _ => return Ok(None),
    };
    let out = match op {
        BinOp::Add => numeric::add(&l, &r)?,
        BinOp::Sub => numeric::sub(&l, &r)?,
        BinOp::Mul => numeric::mul(&l, &r)?,
        _ => numeric::div(&l, &r)?,
    };
    Ok(Some(out))
}

fn cellwise_binary(op: BinOp, l: &ArrayRef, r: &ArrayRef) -> Result<ArrayRef, RuntimeError> {
    let left = column_cells(l.as_ref())?;
    let right = column_cells(r.as_ref())?;
    let mut out = Vec::with_capacity(left.len());
    for (a, b) in left.into_iter().zip(right) {
        if a.is_missing() || b.is_missing() {
            out.push(Cell::Null);
            continue;
        }
        let v = scalar_binary(op, &Value::from_cell(a), &Value::from_cell(b))?;
        out.push(v.to_cell().unwrap_or(Cell::Null));
    }
    Ok(array_from_cells(&out))
}

/// Bring two arrays to a type the comparison kernels accept, if there is one.
fn comparable(l: &ArrayRef, r: &ArrayRef) -> Result<Option<(ArrayRef, ArrayRef)>, RuntimeError> {
    let (lt, rt) = (l.data_type(), r.data_type());
    let pair = match (lt, rt) {
        (a, b) if a == b => (l.clone(), r.clone()),
        (a, b) if a.is_numeric() && b.is_numeric() => (
            compute::cast(l.as_ref(), &DataType::Float64)?,
            compute::cast(r.as_ref(), &DataType::Float64)?,
        ),
        (DataType::Date32 | DataType::Utf8, DataType::Timestamp(..))
        | (DataType::Utf8, DataType::Date32) => (compute::cast(l.as_ref(), rt)?, r.clone()),
        (DataType::Timestamp(..), DataType::Date32 | DataType::Utf8)
        | (DataType::Date32, DataType::Utf8) => (l.clone(), compute::cast(r.as_ref(), lt)?),
        _ => return Ok(None),
    };
    Ok(Some(pair))
}

/// Comparisons with at least one column operand. Missing values compare
/// unequal to everything.
pub fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
    let (name, len) = series_shape(l, r, op.symbol())?;
    let la = operand(l, len, op.symbol())?;
    let ra = operand(r, len, op.symbol())?;
    let out = match comparable(&la, &ra)? {
        Some((a, b)) => match op {
            CmpOp::Eq => cmp::eq(&a, &b)?,
            CmpOp::NotEq => cmp::neq(&a, &b)?,
            CmpOp::Lt => cmp::lt(&a, &b)?,
            CmpOp::LtE => cmp::lt_eq(&a, &b)?,
            CmpOp::Gt => cmp::gt(&a, &b)?,
            CmpOp::GtE => cmp::gt_eq(&a, &b)?,
            other => {
                return Err(type_error(format!(
                    "'{}' is not supported for Series",
                    other.symbol()
                )))
            }
        },
        None => cellwise_compare(op, &la, &ra)?,
    };
    let fill = op == CmpOp::NotEq;
    Ok(Value::Series(bool_series(
        &name,
        out.iter().map(|v| Some(v.unwrap_or(fill))),
    )))
}

fn cellwise_compare(op: CmpOp, l: &ArrayRef, r: &ArrayRef) -> Result<BooleanArray, RuntimeError> {
    let left = column_cells(l.as_ref())?;
    let right = column_cells(r.as_ref())?;
    let mut out = Vec::with_capacity(left.len());
    for (a, b) in left.iter().zip(&right) {
        if a.is_missing() || b.is_missing() {
            out.push(None);
            continue;
        }
        let flag = match op {
            CmpOp::Eq => a.loose_eq(b),
            CmpOp::NotEq => !a.loose_eq(b),
            _ => {
                let ordering = a.compare(b).ok_or_else(|| {
                    type_error(format!(
                        "'{}' not supported between instances of '{}' and '{}'",
                        op.symbol(),
                        a.type_name(),
                        b.type_name()
                    ))
                })?;
                match op {
                    CmpOp::Lt => ordering == Ordering::Less,
                    CmpOp::LtE => ordering != Ordering::Greater,
                    CmpOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }
            }
        };
        out.push(Some(flag));
    }
    Ok(out.into_iter().collect())
}

/// `-s`, `+s`, `~s`
pub fn unary(op: UnaryOp, series: &Series) -> Result<Value, RuntimeError> {
    let array = match op {
        UnaryOp::Invert => match series.array.as_boolean_opt() {
            Some(flags) => Arc::new(compute::not(flags)?) as ArrayRef,
            None => {
                return Err(type_error(format!(
                    "bad operand type for unary ~: '{}' column",
                    dtype_name(series.array.data_type())
                )))
            }
        },
        UnaryOp::Neg if series.array.data_type().is_numeric() => {
            numeric::neg(series.array.as_ref())?
        }
        UnaryOp::Pos if series.array.data_type().is_numeric() => series.array.clone(),
        _ => {
            return Err(type_error(format!(
                "bad operand type for unary operator: '{}' column",
                dtype_name(series.array.data_type())
            )))
        }
    };
    Ok(Value::Series(Series::new(&series.name, array)))
}

/// Properties of tables, columns and accessors. `None` when `name` is a
/// method or unknown, leaving the lookup to the caller.
pub fn attribute(value: &Value, name: &str) -> Result<Option<Value>, RuntimeError> {
    let found = match value {
        Value::Table(t) => match name {
            "columns" => Value::List(column_names(t).into_iter().map(Value::Str).collect()),
            "shape" => Value::Tuple(vec![
                Value::Int(t.num_rows() as i64),
                Value::Int(t.num_columns() as i64),
            ]),
            "empty" => Value::Bool(t.num_rows() == 0 || t.num_columns() == 0),
            "size" => Value::Int((t.num_rows() * t.num_columns()) as i64),
            "index" => Value::List((0..t.num_rows() as i64).map(Value::Int).collect()),
            "dtypes" => Value::Dict(
                t.schema()
                    .fields()
                    .iter()
                    .map(|f| (Value::str(f.name()), Value::Str(dtype_name(f.data_type()))))
                    .collect(),
            ),
            "loc" => Value::Accessor(Box::new(Accessor::Loc(t.clone()))),
            _ if TABLE_METHODS.contains(&name) => return Ok(None),
            _ => match t.column_by_name(name) {
                Some(array) => Value::Series(Series::new(name, array.clone())),
                None => return Ok(None),
            },
        },
        Value::Series(s) => match name {
            "name" => Value::str(&s.name),
            "dtype" => Value::Str(dtype_name(s.array.data_type())),
            "shape" => Value::Tuple(vec![Value::Int(s.len() as i64)]),
            "size" => Value::Int(s.len() as i64),
            "empty" => Value::Bool(s.is_empty()),
            "values" => Value::List(s.values()?),
            "str" => match s.array.data_type() {
                DataType::Utf8 | DataType::LargeUtf8 | DataType::Null => {
                    Value::Accessor(Box::new(Accessor::Str(s.clone())))
                }
                _ => {
                    return Err(RuntimeError::Attribute(
                        "Can only use .str accessor with string values!".into(),
                    ))
                }
            },
            "dt" => match s.array.data_type() {
                DataType::Date32 | DataType::Date64 | DataType::Timestamp(..) => {
                    Value::Accessor(Box::new(Accessor::Dt(s.clone())))
                }
                _ => {
                    return Err(RuntimeError::Attribute(
                        "Can only use .dt accessor with datetimelike values".into(),
                    ))
                }
            },
            _ => return Ok(None),
        },
        Value::Accessor(accessor) => match accessor.as_ref() {
            Accessor::Dt(s) if DT_PROPERTIES.contains(&name) => Value::Series(dt_property(s, name)?),
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };
    Ok(Some(found))
}

fn dt_property(series: &Series, name: &str) -> Result<Series, RuntimeError> {
    let stamps: Vec<_> = series
        .cells()?
        .iter()
        .map(Cell::as_datetime)
        .collect();
    if name == "date" {
        let cells: Vec<Cell> = stamps
            .iter()
            .map(|dt| dt.map_or(Cell::Null, |dt| Cell::Date(dt.date())))
            .collect();
        return Ok(Series::new(&series.name, array_from_cells(&cells)));
    }
    let part = |dt: chrono::NaiveDateTime| -> i64 {
        match name {
            "year" => i64::from(dt.year()),
            "month" => i64::from(dt.month()),
            "day" => i64::from(dt.day()),
            "hour" => i64::from(dt.hour()),
            "minute" => i64::from(dt.minute()),
            "second" => i64::from(dt.second()),
            _ => i64::from(dt.weekday().num_days_from_monday()),
        }
    };
    Ok(int_series(&series.name, stamps.into_iter().map(|dt| dt.map(part))))
}

fn n_arg(args: &mut Args) -> Result<i64, RuntimeError> {
    match args.next("n") {
        Some(v) => v.expect_int("n"),
        None => Ok(5),
    }
}

/// Row range kept by `head(n)` / `tail(n)`; negative `n` counts from the
/// other end.
fn head_tail_range(rows: usize, n: i64, head: bool) -> (usize, usize) {
    let k = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX).min(rows);
    match (head, n >= 0) {
        (true, true) => (0, k),
        (true, false) => (0, rows - k),
        (false, true) => (rows - k, k),
        (false, false) => (k, rows - k),
    }
}

fn row_keys(table: &Table, names: &[String]) -> Result<Vec<String>, RuntimeError> {
    let columns = names
        .iter()
        .map(|n| column(table, n)?.cells())
        .collect::<Result<Vec<_>, _>>()?;
    Ok((0..table.num_rows())
        .map(|row| {
            let key: Vec<&Cell> = columns.iter().map(|c| &c[row]).collect();
            format!("{:?}", key)
        })
        .collect())
}

fn fill_cells(array: &ArrayRef, fill: &Cell) -> Result<ArrayRef, RuntimeError> {
    let cells = column_cells(array.as_ref())?;
    if !cells.iter().any(Cell::is_missing) {
        return Ok(array.clone());
    }
    let filled: Vec<Cell> = cells
        .into_iter()
        .map(|c| if c.is_missing() { fill.clone() } else { c })
        .collect();
    Ok(array_from_cells(&filled))
}

fn missing_mask(array: &ArrayRef, negate: bool) -> Result<BooleanArray, RuntimeError> {
    Ok(column_cells(array.as_ref())?
        .iter()
        .map(|c| Some(c.is_missing() != negate))
        .collect())
}

fn required_dtype(value: &Value) -> Result<DType, RuntimeError> {
    dtype_of(value)?.ok_or_else(|| type_error("astype() needs a dtype"))
}

/// `df.<name>(args)`
pub fn table_method(
    interp: &mut Interpreter,
    table: &Table,
    name: &str,
    mut args: Args,
) -> Result<Value, RuntimeError> {
    let func = format!("DataFrame.{}", name);
    args.keyword("inplace");
    let rows = table.num_rows();
    let result = match name {
        "copy" | "reset_index" => {
            args.keyword("deep");
            args.keyword("drop");
            table.clone()
        }
        "head" | "tail" => {
            let n = n_arg(&mut args)?;
            let (offset, len) = head_tail_range(rows, n, name == "head");
            table.slice(offset, len)
        }
        "rename" => {
            let mapping = match args.keyword("columns") {
                Some(Value::Dict(pairs)) => pairs,
                Some(other) => {
                    return Err(type_error(format!(
                        "rename(columns=...) expects a dict, not '{}'",
                        other.type_name()
                    )))
                }
                None => return Err(type_error("rename() needs columns={old: new}")),
            };
            args.keyword("errors");
            let mut columns = table_columns(table);
            for (old, new) in &mapping {
                let old = old.expect_str("column name")?;
                if let Some(slot) = columns.iter_mut().find(|(n, _)| n == old) {
                    slot.0 = new.expect_str("column name")?.to_string();
                }
            }
            table_from(columns, rows)?
        }
        "drop" => {
            let labels = match args.keyword("columns") {
                Some(v) => v.expect_names("columns")?,
                None => {
                    let labels = args.required(&func, "labels")?;
                    match args.keyword("axis") {
                        Some(Value::Int(1)) => {}
                        Some(Value::Str(s)) if s == "columns" => {}
                        _ => return Err(type_error("only column drops (axis=1) are supported")),
                    }
                    labels.expect_names("labels")?
                }
            };
            let ignore = matches!(args.keyword("errors"), Some(Value::Str(s)) if s == "ignore");
            let names = column_names(table);
            let missing: Vec<Value> = labels
                .iter()
                .filter(|l| !names.contains(l))
                .map(Value::str)
                .collect();
            if !missing.is_empty() && !ignore {
                return Err(RuntimeError::Key(format!(
                    "{} not found in axis",
                    Value::List(missing).repr()
                )));
            }
            let kept: Vec<String> = names.into_iter().filter(|n| !labels.contains(n)).collect();
            project(table, &kept)?
        }
        "assign" => {
            let mut current = table.clone();
            for (column_name, value) in std::mem::take(&mut args.keywords) {
                let value = match value {
                    f @ (Value::Function(_) | Value::Builtin(_) | Value::Method { .. }) => {
                        interp.call(&f, Args::new(vec![Value::Table(current.clone())]))?
                    }
                    other => other,
                };
                current = with_column(current, &column_name, value)?;
            }
            current
        }
        "sort_values" => {
            let by = args.required(&func, "by")?.expect_names("by")?;
            let ascending = match args.keyword("ascending") {
                None => vec![true; by.len()],
                Some(Value::List(flags)) => flags
                    .iter()
                    .map(Value::truthy)
                    .collect::<Result<Vec<_>, _>>()?,
                Some(flag) => vec![flag.truthy()?; by.len()],
            };
            if ascending.len() != by.len() {
                return Err(RuntimeError::Value(format!(
                    "Length of ascending ({}) != length of by ({})",
                    ascending.len(),
                    by.len()
                )));
            }
            let na_first = match args.keyword("na_position") {
                Some(v) => v.expect_str("na_position")? == "first",
                None => false,
            };
            args.keyword("kind");
            args.keyword("ignore_index");
            let order = sort_order(table, &by, &ascending, na_first)?;
            take_rows(table, &order)?
        }
        "drop_duplicates" => {
            let subset = match args.option("subset") {
                Some(v) => v.expect_names("subset")?,
                None => column_names(table),
            };
            let keep = match args.keyword("keep") {
                None => "first".to_string(),
                Some(Value::Bool(false)) => "none".to_string(),
                Some(v) => v.expect_str("keep")?.to_string(),
            };
            args.keyword("ignore_index");
            let keys = row_keys(table, &subset)?;
            let kept: Vec<usize> = match keep.as_str() {
                "first" => {
                    let mut seen = HashSet::new();
                    (0..rows).filter(|&i| seen.insert(&keys[i])).collect()
                }
                "last" => {
                    let mut seen = HashSet::new();
                    let mut kept: Vec<usize> =
                        (0..rows).rev().filter(|&i| seen.insert(&keys[i])).collect();
                    kept.reverse();
                    kept
                }
                "none" => {
                    let mut counts: HashMap<&String, usize> = HashMap::new();
                    for key in &keys {
                        *counts.entry(key).or_default() += 1;
                    }
                    (0..rows).filter(|&i| counts[&keys[i]] == 1).collect()
                }
                other => {
                    return Err(RuntimeError::Value(format!(
                        "keep must be 'first', 'last' or False, not '{}'",
                        other
                    )))
                }
            };
            take_rows(table, &kept)?
        }
        "fillna" => {
            let value = args.required(&func, "value")?;
            let mut columns = table_columns(table);
            for (column_name, array) in columns.iter_mut() {
                let fill = match &value {
                    Value::Dict(pairs) => {
                        match pairs.iter().find(|(k, _)| k.py_eq(&Value::str(column_name.as_str()))) {
                            Some((_, v)) => v.clone(),
                            None => continue,
                        }
                    }
                    other => other.clone(),
                };
                let fill = fill
                    .to_cell()
                    .ok_or_else(|| type_error("fillna() value must be a scalar or a dict"))?;
                *array = fill_cells(array, &fill)?;
            }
            table_from(columns, rows)?
        }
        "astype" => {
            let dtype = args.required(&func, "dtype")?;
            args.keyword("errors");
            let mut columns = table_columns(table);
            for (column_name, array) in columns.iter_mut() {
                let target = match &dtype {
                    Value::Dict(pairs) => {
                        match pairs.iter().find(|(k, _)| k.py_eq(&Value::str(column_name.as_str()))) {
                            Some((_, v)) => required_dtype(v)?,
                            None => continue,
                        }
                    }
                    other => required_dtype(other)?,
                };
                *array = coerce(array, target)?;
            }
            table_from(columns, rows)?
        }
        "merge" => {
            let right = match args.required(&func, "right")? {
                Value::Table(t) => t,
                other => {
                    return Err(type_error(format!(
                        "Can only merge Series or DataFrame objects, a '{}' was passed",
                        other.type_name()
                    )))
                }
            };
            let how = match args.keyword("how") {
                Some(v) => v.expect_str("how")?.to_string(),
                None => "inner".to_string(),
            };
            let on = match args.option("on") {
                Some(v) => v.expect_names("on")?,
                None => {
                    let right_names = column_names(&right);
                    column_names(table)
                        .into_iter()
                        .filter(|n| right_names.contains(n))
                        .collect()
                }
            };
            let suffixes = match args.keyword("suffixes") {
                Some(v) => {
                    let parts = v.expect_names("suffixes")?;
                    match parts.as_slice() {
                        [l, r] => (l.clone(), r.clone()),
                        _ => return Err(RuntimeError::Value("suffixes must have two entries".into())),
                    }
                }
                None => ("_x".to_string(), "_y".to_string()),
            };
            merge(table, &right, &on, &how, &suffixes)?
        }
        "dropna" => {
            let subset = match args.option("subset") {
                Some(v) => v.expect_names("subset")?,
                None => column_names(table),
            };
            let all = match args.keyword("how") {
                Some(v) => v.expect_str("how")? == "all",
                None => false,
            };
            let columns = subset
                .iter()
                .map(|n| column(table, n)?.cells())
                .collect::<Result<Vec<_>, _>>()?;
            let kept: Vec<usize> = (0..rows)
                .filter(|&row| {
                    let mut missing = columns.iter().map(|c| c[row].is_missing());
                    if all {
                        !missing.all(|m| m)
                    } else {
                        !missing.any(|m| m)
                    }
                })
                .collect();
            take_rows(table, &kept)?
        }
        "isna" | "isnull" | "notna" | "notnull" => {
            let negate = name.starts_with("not");
            let columns = table_columns(table)
                .into_iter()
                .map(|(n, array)| Ok((n, Arc::new(missing_mask(&array, negate)?) as ArrayRef)))
                .collect::<Result<Vec<_>, RuntimeError>>()?;
            table_from(columns, rows)?
        }
        other => {
            return Err(RuntimeError::Attribute(format!(
                "'DataFrame' object has no attribute '{}'",
                other
            )))
        }
    };
    args.done(&func)?;
    Ok(Value::Table(result))
}

/// Stable row order for `sort_values`.
fn sort_order(
    table: &Table,
    by: &[String],
    ascending: &[bool],
    na_first: bool,
) -> Result<Vec<usize>, RuntimeError> {
    let keys = by
        .iter()
        .map(|n| column(table, n)?.cells())
        .collect::<Result<Vec<_>, _>>()?;
    let mut order: Vec<usize> = (0..table.num_rows()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| {
        for (cells, asc) in keys.iter().zip(ascending) {
            let (x, y) = (&cells[a], &cells[b]);
            let ordering = match (x.is_missing(), y.is_missing()) {
                (true, true) => Ordering::Equal,
                (true, false) if na_first => Ordering::Less,
                (true, false) => Ordering::Greater,
                (false, true) if na_first => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => match x.compare(y) {
                    Some(o) if *asc => o,
                    Some(o) => o.reverse(),
                    None => {
                        failure.get_or_insert_with(|| {
                            type_error(format!(
                                "'<' not supported between instances of '{}' and '{}'",
                                x.type_name(),
                                y.type_name()
                            ))
                        });
                        Ordering::Equal
                    }
                },
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(order),
    }
}

/// Hash join on equal key values.
fn merge(
    left: &Table,
    right: &Table,
    on: &[String],
    how: &str,
    (left_suffix, right_suffix): &(String, String),
) -> Result<Table, RuntimeError> {
    if on.is_empty() {
        return Err(RuntimeError::Value(
            "No common columns to perform merge on".into(),
        ));
    }
    let left_keys = row_keys(left, on)?;
    let right_keys = row_keys(right, on)?;
    let mut by_key: HashMap<&String, Vec<usize>> = HashMap::new();
    for (row, key) in right_keys.iter().enumerate() {
        by_key.entry(key).or_default().push(row);
    }

    let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
    match how {
        "inner" | "left" | "outer" => {
            let mut matched = vec![false; right.num_rows()];
            for (l, key) in left_keys.iter().enumerate() {
                match by_key.get(key) {
                    Some(rows) => {
                        for &r in rows {
                            matched[r] = true;
                            pairs.push((Some(l), Some(r)));
                        }
                    }
                    None if how != "inner" => pairs.push((Some(l), None)),
                    None => {}
                }
            }
            if how == "outer" {
                pairs.extend((0..right.num_rows()).filter(|&r| !matched[r]).map(|r| (None, Some(r))));
            }
        }
        "right" => {
            let mut left_by_key: HashMap<&String, Vec<usize>> = HashMap::new();
            for (row, key) in left_keys.iter().enumerate() {
                left_by_key.entry(key).or_default().push(row);
            }
            for (r, key) in right_keys.iter().enumerate() {
                match left_by_key.get(key) {
                    Some(rows) => pairs.extend(rows.iter().map(|&l| (Some(l), Some(r)))),
                    None => pairs.push((None, Some(r))),
                }
            }
        }
        other => {
            return Err(RuntimeError::Value(format!(
                "how must be one of 'inner', 'left', 'right', 'outer', not '{}'",
                other
            )))
        }
    }

    let take_side = |table: &Table, name: &str, side: &dyn Fn(&(Option<usize>, Option<usize>)) -> Option<usize>| -> Result<ArrayRef, RuntimeError> {
        let indices: UInt32Array = pairs.iter().map(|p| side(p).map(|i| i as u32)).collect();
        let array = column(table, name)?.array;
        Ok(compute::take(array.as_ref(), &indices, None)?)
    };
    let left_side = |p: &(Option<usize>, Option<usize>)| p.0;
    let right_side = |p: &(Option<usize>, Option<usize>)| p.1;

    let left_names = column_names(left);
    let right_names = column_names(right);
    let mut columns: Vec<(String, ArrayRef)> = Vec::new();
    for name in &left_names {
        if on.contains(name) {
            let from_left = column_cells(take_side(left, name, &left_side)?.as_ref())?;
            let from_right = column_cells(take_side(right, name, &right_side)?.as_ref())?;
            let merged: Vec<Cell> = from_left
                .into_iter()
                .zip(from_right)
                .map(|(l, r)| if l.is_null() { r } else { l })
                .collect();
            columns.push((name.clone(), array_from_cells(&merged)));
        } else {
            let label = if right_names.contains(name) {
                format!("{}{}", name, left_suffix)
            } else {
                name.clone()
            };
            columns.push((label, take_side(left, name, &left_side)?));
        }
    }
    for name in right_names.iter().filter(|n| !on.contains(n)) {
        let label = if left_names.contains(name) {
            format!("{}{}", name, right_suffix)
        } else {
            name.clone()
        };
        columns.push((label, take_side(right, name, &right_side)?));
    }
    table_from(columns, pairs.len())
}

/// `s.<name>(args)`
pub fn series_method(
    interp: &mut Interpreter,
    series: &Series,
    name: &str,
    mut args: Args,
) -> Result<Value, RuntimeError> {
    let func = format!("Series.{}", name);
    args.keyword("inplace");
    let cells = series.cells()?;
    let present = || cells.iter().filter(|c| !c.is_missing());
    let result = match name {
        "isna" | "isnull" | "notna" | "notnull" => Value::Series(Series::new(
            &series.name,
            Arc::new(missing_mask(&series.array, name.starts_with("not"))?),
        )),
        "fillna" => {
            let value = args.required(&func, "value")?;
            let fill = value
                .to_cell()
                .ok_or_else(|| type_error("fillna() value must be a scalar"))?;
            Value::Series(Series::new(&series.name, fill_cells(&series.array, &fill)?))
        }
        "astype" => {
            let dtype = required_dtype(&args.required(&func, "dtype")?)?;
            args.keyword("errors");
            Value::Series(Series::new(&series.name, coerce(&series.array, dtype)?))
        }
        "apply" | "map" => {
            let mapper = args.required(&func, "func")?;
            let skip_missing = matches!(args.keyword("na_action"), Some(Value::Str(s)) if s == "ignore");
            let mut out = Vec::with_capacity(cells.len());
            for cell in &cells {
                if skip_missing && cell.is_missing() {
                    out.push(Cell::Null);
                    continue;
                }
                let value = Value::from_cell(cell.clone());
                let mapped = match &mapper {
                    Value::Dict(pairs) => pairs
                        .iter()
                        .find(|(k, _)| k.py_eq(&value))
                        .map_or(Value::None, |(_, v)| v.clone()),
                    f => interp.call(f, Args::new(vec![value]))?,
                };
                out.push(mapped.to_cell().ok_or_else(|| {
                    type_error(format!(
                        "{}() must produce scalars, got '{}'",
                        name,
                        mapped.type_name()
                    ))
                })?);
            }
            Value::Series(Series::new(&series.name, array_from_cells(&out)))
        }
        "isin" => {
            let values = args.required(&func, "values")?;
            let allowed = scalar_cells(&interp.iterate(&values)?, "isin() values")?;
            Value::Series(bool_series(
                &series.name,
                cells
                    .iter()
                    .map(|c| Some(!c.is_null() && allowed.iter().any(|a| c.loose_eq(a)))),
            ))
        }
        "between" => {
            let low = args.required(&func, "left")?;
            let high = args.required(&func, "right")?;
            let inclusive = match args.keyword("inclusive") {
                Some(v) => v.expect_str("inclusive")?.to_string(),
                None => "both".to_string(),
            };
            let (low, high) = match (low.to_cell(), high.to_cell()) {
                (Some(l), Some(h)) => (l, h),
                _ => return Err(type_error("between() bounds must be scalars")),
            };
            let (lo_ok, hi_ok) = match inclusive.as_str() {
                "both" => (true, true),
                "left" => (true, false),
                "right" => (false, true),
                _ => (false, false),
            };
            Value::Series(bool_series(
                &series.name,
                cells.iter().map(|c| {
                    let above = match c.compare(&low) {
                        Some(Ordering::Greater) => true,
                        Some(Ordering::Equal) => lo_ok,
                        _ => false,
                    };
                    let below = match c.compare(&high) {
                        Some(Ordering::Less) => true,
                        Some(Ordering::Equal) => hi_ok,
                        _ => false,
                    };
                    Some(above && below)
                }),
            ))
        }
        "sum" => {
            let mut int_total: i64 = 0;
            let mut float_total: Option<f64> = None;
            for cell in present() {
                match cell {
                    Cell::Int(i) => int_total = int_total.saturating_add(*i),
                    Cell::Bool(b) => int_total += i64::from(*b),
                    Cell::Float(f) => *float_total.get_or_insert(0.0) += f,
                    other => {
                        return Err(type_error(format!(
                            "cannot sum a {} column",
                            other.type_name()
                        )))
                    }
                }
            }
            match float_total {
                Some(f) => Value::Float(f + int_total as f64),
                None => Value::Int(int_total),
            }
        }
        "min" | "max" => {
            let want = if name == "min" {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut best: Option<&Cell> = None;
            for cell in present() {
                best = match best {
                    Some(b) if cell.compare(b) != Some(want) => Some(b),
                    _ => Some(cell),
                };
            }
            best.cloned().map_or(Value::Float(f64::NAN), Value::from_cell)
        }
        "mean" => {
            let numbers: Vec<f64> = present().filter_map(Cell::as_f64).collect();
            if numbers.is_empty() {
                Value::Float(f64::NAN)
            } else {
                Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        "count" => Value::Int(present().count() as i64),
        "any" => Value::Bool(present().any(|c| !matches!(c, Cell::Bool(false) | Cell::Int(0)))),
        "all" => Value::Bool(present().all(|c| !matches!(c, Cell::Bool(false) | Cell::Int(0)))),
        "unique" | "nunique" => {
            let mut seen = HashSet::new();
            let mut distinct = Vec::new();
            for cell in &cells {
                if (name == "unique" || !cell.is_missing()) && seen.insert(format!("{:?}", cell)) {
                    distinct.push(Value::from_cell(cell.clone()));
                }
            }
            if name == "unique" {
                Value::List(distinct)
            } else {
                Value::Int(distinct.len() as i64)
            }
        }
        "tolist" | "to_list" => Value::List(series.values()?),
        "round" => {
            let digits = match args.next("decimals") {
                Some(v) => v.expect_int("decimals")?,
                None => 0,
            };
            let rounded: Vec<Cell> = cells
                .iter()
                .map(|c| match c {
                    Cell::Float(f) => Cell::Float(round_half_even(*f, digits)),
                    other => other.clone(),
                })
                .collect();
            Value::Series(Series::new(&series.name, array_from_cells(&rounded)))
        }
        "abs" => {
            let out: Vec<Cell> = cells
                .iter()
                .map(|c| match c {
                    Cell::Int(i) => Ok(Cell::Int(i.abs())),
                    Cell::Float(f) => Ok(Cell::Float(f.abs())),
                    Cell::Null => Ok(Cell::Null),
                    other => Err(type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))),
                })
                .collect::<Result<_, _>>()?;
            Value::Series(Series::new(&series.name, array_from_cells(&out)))
        }
        "head" | "tail" => {
            let n = n_arg(&mut args)?;
            let (offset, len) = head_tail_range(series.len(), n, name == "head");
            Value::Series(Series::new(&series.name, series.array.slice(offset, len)))
        }
        "copy" => {
            args.keyword("deep");
            Value::Series(series.clone())
        }
        "rename" => {
            let new_name = args.required(&func, "index")?;
            Value::Series(Series::new(new_name.expect_str("name")?, series.array.clone()))
        }
        other => {
            return Err(RuntimeError::Attribute(format!(
                "'Series' object has no attribute '{}'",
                other
            )))
        }
    };
    args.done(&func)?;
    Ok(result)
}

fn str_arg(args: &mut Args, func: &str, name: &str) -> Result<String, RuntimeError> {
    Ok(args.required(func, name)?.expect_str(name)?.to_string())
}

fn optional_str(args: &mut Args, name: &str) -> Result<Option<String>, RuntimeError> {
    match args.option(name) {
        Some(v) => Ok(Some(v.expect_str(name)?.to_string())),
        None => Ok(None),
    }
}

fn optional_int(args: &mut Args, name: &str) -> Result<Option<i64>, RuntimeError> {
    args.option(name).map(|v| v.expect_int(name)).transpose()
}

fn compile(pattern: &str, case: bool) -> Result<Regex, RuntimeError> {
    let pattern = if case {
        pattern.to_string()
    } else {
        format!("(?i){}", pattern)
    };
    Regex::new(&pattern).map_err(|e| RuntimeError::Value(format!("invalid pattern: {}", e)))
}

/// `s.str.<name>(args)`
pub fn str_method(series: &Series, name: &str, mut args: Args) -> Result<Value, RuntimeError> {
    let func = format!("str.{}", name);
    let cells = series.cells()?;
    let texts: Vec<Option<&str>> = cells
        .iter()
        .map(|c| match c {
            Cell::Str(s) => Some(s.as_str()),
            _ => None,
        })
        .collect();
    let map_str = |f: &dyn Fn(&str) -> String| -> Series {
        str_series(&series.name, texts.iter().map(|t| t.map(f)))
    };
    let result = match name {
        "lower" => map_str(&|s| s.to_lowercase()),
        "upper" => map_str(&|s| s.to_uppercase()),
        "title" => map_str(&|s| {
            let mut out = String::with_capacity(s.len());
            let mut start = true;
            for c in s.chars() {
                if c.is_alphabetic() {
                    if start {
                        out.extend(c.to_uppercase());
                    } else {
                        out.extend(c.to_lowercase());
                    }
                    start = false;
                } else {
                    out.push(c);
                    start = true;
                }
            }
            out
        }),
        "strip" | "lstrip" | "rstrip" => {
            let chars: Option<Vec<char>> = optional_str(&mut args, "to_strip")?.map(|s| s.chars().collect());
            let pred = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            match name {
                "strip" => map_str(&|s| s.trim_matches(pred).to_string()),
                "lstrip" => map_str(&|s| s.trim_start_matches(pred).to_string()),
                _ => map_str(&|s| s.trim_end_matches(pred).to_string()),
            }
        }
        "zfill" => {
            let width = usize::try_from(args.required(&func, "width")?.expect_int("width")?).unwrap_or(0);
            map_str(&|s| {
                let len = s.chars().count();
                if len >= width {
                    return s.to_string();
                }
                let pad = "0".repeat(width - len);
                match s.strip_prefix(['-', '+']) {
                    Some(rest) => format!("{}{}{}", &s[..1], pad, rest),
                    None => format!("{}{}", pad, s),
                }
            })
        }
        "replace" => {
            let pat = str_arg(&mut args, &func, "pat")?;
            let repl = str_arg(&mut args, &func, "repl")?;
            let regex = args.flag("regex", false)?;
            let case = args.flag("case", true)?;
            args.keyword("n");
            if regex || !case {
                let source = if regex { pat } else { regex::escape(&pat) };
                let re = compile(&source, case)?;
                let repl = GROUP_REF.replace_all(&repl, "$${$1}").into_owned();
                map_str(&|s| re.replace_all(s, repl.as_str()).into_owned())
            } else {
                map_str(&|s| s.replace(&pat, &repl))
            }
        }
        "contains" | "startswith" | "endswith" => {
            let pat = str_arg(&mut args, &func, "pat")?;
            let case = args.flag("case", true)?;
            let regex = name == "contains" && args.flag("regex", true)?;
            let na = match args.keyword("na") {
                Some(Value::None) | None => None,
                Some(v) => Some(v.truthy()?),
            };
            let test: Box<dyn Fn(&str) -> bool> = match name {
                "contains" => {
                    let source = if regex { pat } else { regex::escape(&pat) };
                    let re = compile(&source, case)?;
                    Box::new(move |s: &str| re.is_match(s))
                }
                "startswith" => Box::new(move |s: &str| s.starts_with(pat.as_str())),
                _ => Box::new(move |s: &str| s.ends_with(pat.as_str())),
            };
            bool_series(&series.name, texts.iter().map(|t| t.map(|s| test(s)).or(na)))
        }
        "len" => int_series(
            &series.name,
            texts.iter().map(|t| t.map(|s| s.chars().count() as i64)),
        ),
        "slice" => {
            let start = optional_int(&mut args, "start")?;
            let stop = optional_int(&mut args, "stop")?;
            let step = optional_int(&mut args, "step")?;
            let mut out = Vec::with_capacity(texts.len());
            for text in &texts {
                out.push(match text {
                    Some(s) => {
                        let chars: Vec<char> = s.chars().collect();
                        Some(
                            slice_indices(chars.len(), start, stop, step)?
                                .into_iter()
                                .map(|i| chars[i])
                                .collect::<String>(),
                        )
                    }
                    None => None,
                });
            }
            str_series(&series.name, out)
        }
        "extract" => {
            let pat = str_arg(&mut args, &func, "pat")?;
            let expand = args.flag("expand", true)?;
            args.keyword("flags");
            args.done(&func)?;
            return extract(series, &texts, &pat, expand);
        }
        other => {
            return Err(RuntimeError::Attribute(format!(
                "'StringMethods' object has no attribute '{}'",
                other
            )))
        }
    };
    args.done(&func)?;
    Ok(Value::Series(result))
}

/// First match of each capture group; one column per group.
fn extract(series: &Series, texts: &[Option<&str>], pattern: &str, expand: bool) -> Result<Value, RuntimeError> {
    let re = compile(pattern, true)?;
    let groups = re.captures_len() - 1;
    if groups == 0 {
        return Err(RuntimeError::Value(
            "pattern contains no capture groups".into(),
        ));
    }
    let names: Vec<String> = re
        .capture_names()
        .skip(1)
        .enumerate()
        .map(|(i, n)| n.map_or_else(|| i.to_string(), str::to_string))
        .collect();
    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(texts.len()); groups];
    for text in texts {
        let captures = text.and_then(|s| re.captures(s));
        for (g, column) in columns.iter_mut().enumerate() {
            column.push(
                captures
                    .as_ref()
                    .and_then(|c| c.get(g + 1))
                    .map(|m| m.as_str().to_string()),
            );
        }
    }
    if !expand && groups == 1 {
        let values = columns.pop().unwrap_or_default();
        return Ok(Value::Series(str_series(&series.name, values)));
    }
    let arrays = names
        .into_iter()
        .zip(columns)
        .map(|(n, values)| (n.clone(), str_series(&n, values).array))
        .collect();
    Ok(Value::Table(table_from(arrays, texts.len())?))
}

/// `s.dt.<name>(args)`
pub fn dt_method(series: &Series, name: &str, mut args: Args) -> Result<Value, RuntimeError> {
    let func = format!("dt.{}", name);
    if name != "strftime" {
        return Err(RuntimeError::Attribute(format!(
            "'DatetimeProperties' object has no attribute '{}'",
            name
        )));
    }
    let format = str_arg(&mut args, &func, "date_format")?;
    args.done(&func)?;
    let mut out = Vec::with_capacity(series.len());
    for cell in series.cells()? {
        out.push(match cell.as_datetime() {
            Some(dt) => {
                let mut text = String::new();
                write!(text, "{}", dt.format(&format)).map_err(|_| {
                    RuntimeError::Value(format!("invalid format string '{}'", format))
                })?;
                Some(text)
            }
            None => None,
        });
    }
    Ok(Value::Series(str_series(&series.name, out)))
}

fn column_values(interp: &Interpreter, value: &Value) -> Result<Option<ArrayRef>, RuntimeError> {
    match value {
        Value::Series(s) => Ok(Some(s.array.clone())),
        Value::List(_) | Value::Tuple(_) => Ok(Some(array_from_cells(&scalar_cells(
            &interp.iterate(value)?,
            "a column",
        )?))),
        _ => Ok(None),
    }
}

/// `DataFrame(data, columns=...)`
pub fn new_table(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let data = args.next("data");
    let index_len = match args.option("index") {
        Some(v) => Some(interp.iterate(&v)?.len()),
        None => None,
    };
    let selection = match args.option("columns") {
        Some(v) => Some(v.expect_names("columns")?),
        None => None,
    };
    args.done("DataFrame")?;

    let table = match data {
        None | Some(Value::None) => table_from(Vec::new(), index_len.unwrap_or(0))?,
        Some(Value::Table(t)) => t,
        Some(Value::Dict(pairs)) => {
            let mut arrays = Vec::with_capacity(pairs.len());
            for (key, value) in &pairs {
                arrays.push((key.to_string(), column_values(interp, value)?, value));
            }
            let rows = match arrays.iter().find_map(|(_, a, _)| a.as_ref().map(|a| a.len())) {
                Some(n) => n,
                None => index_len.ok_or_else(|| {
                    RuntimeError::Value(
                        "If using all scalar values, you must pass an index".into(),
                    )
                })?,
            };
            let mut columns = Vec::with_capacity(arrays.len());
            for (name, array, value) in arrays {
                let array = match array {
                    Some(a) if a.len() == rows => a,
                    Some(_) => {
                        return Err(RuntimeError::Value(
                            "All arrays must be of the same length".into(),
                        ))
                    }
                    None => match value.to_cell() {
                        Some(cell) => broadcast(&cell, rows),
                        None => {
                            return Err(type_error(format!(
                                "cannot build a column from '{}'",
                                value.type_name()
                            )))
                        }
                    },
                };
                columns.push((name, array));
            }
            table_from(columns, rows)?
        }
        Some(Value::List(records)) => from_records(&records, selection.as_deref())?,
        Some(other) => {
            return Err(type_error(format!(
                "DataFrame constructor not properly called with '{}'",
                other.type_name()
            )))
        }
    };
    match selection {
        Some(names) if names != column_names(&table) => {
            let columns = names
                .iter()
                .map(|n| match table.column_by_name(n) {
                    Some(a) => (n.clone(), a.clone()),
                    None => (n.clone(), new_null_array(&DataType::Utf8, table.num_rows())),
                })
                .collect();
            Ok(Value::Table(table_from(columns, table.num_rows())?))
        }
        _ => Ok(Value::Table(table)),
    }
}

/// Rows given as dicts, or as lists matched up with `columns`.
fn from_records(records: &[Value], names: Option<&[String]>) -> Result<Table, RuntimeError> {
    let mut order: Vec<String> = names.map(<[String]>::to_vec).unwrap_or_default();
    let mut rows: Vec<Vec<(String, Cell)>> = Vec::with_capacity(records.len());
    for record in records {
        let mut row = Vec::new();
        match record {
            Value::Dict(pairs) => {
                for (k, v) in pairs {
                    let key = k.to_string();
                    if names.is_none() && !order.contains(&key) {
                        order.push(key.clone());
                    }
                    row.push((key, scalar_cells(std::slice::from_ref(v), "a record")?.remove(0)));
                }
            }
            Value::List(items) | Value::Tuple(items) => {
                if names.is_none() {
                    for i in order.len()..items.len() {
                        order.push(i.to_string());
                    }
                }
                for (i, v) in items.iter().enumerate() {
                    let key = order.get(i).cloned().unwrap_or_else(|| i.to_string());
                    row.push((key, scalar_cells(std::slice::from_ref(v), "a record")?.remove(0)));
                }
            }
            other => {
                return Err(type_error(format!(
                    "DataFrame records must be dicts or lists, not '{}'",
                    other.type_name()
                )))
            }
        }
        rows.push(row);
    }
    let columns = order
        .iter()
        .map(|name| {
            let cells: Vec<Cell> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .find(|(k, _)| k == name)
                        .map_or(Cell::Null, |(_, c)| c.clone())
                })
                .collect();
            (name.clone(), array_from_cells(&cells))
        })
        .collect();
    table_from(columns, records.len())
}

/// `Series(data, name=..., dtype=...)`
pub fn new_series(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let data = args.next("data").unwrap_or(Value::List(Vec::new()));
    args.next("index");
    let dtype = match args.option("dtype") {
        Some(v) => dtype_of(&v)?,
        None => None,
    };
    let name = match args.option("name") {
        Some(v) => v.to_string(),
        None => String::new(),
    };
    args.done("Series")?;
    let array = match column_values(interp, &data)? {
        Some(array) => array,
        None => match data.to_cell() {
            Some(cell) => broadcast(&cell, 1),
            None => {
                return Err(type_error(format!(
                    "cannot build a Series from '{}'",
                    data.type_name()
                )))
            }
        },
    };
    let array = match dtype {
        Some(dtype) => coerce(&array, dtype)?,
        None => array,
    };
    Ok(Value::Series(Series::new(name, array)))
}

/// Smallest type both columns convert to without loss of meaning.
fn common_type(a: &DataType, b: &DataType) -> DataType {
    match (a, b) {
        (a, b) if a == b => a.clone(),
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        (a, b) if a.is_numeric() && b.is_numeric() => DataType::Float64,
        (DataType::Date32, t @ DataType::Timestamp(..))
        | (t @ DataType::Timestamp(..), DataType::Date32) => t.clone(),
        _ => DataType::Utf8,
    }
}

/// Stack tables (union of columns, missing cells null) or columns.
pub fn concat(items: Vec<Value>) -> Result<Value, RuntimeError> {
    if items.is_empty() {
        return Err(RuntimeError::Value("No objects to concatenate".into()));
    }
    if items.iter().all(|v| matches!(v, Value::Series(_))) {
        let series: Vec<&Series> = items
            .iter()
            .filter_map(|v| match v {
                Value::Series(s) => Some(s),
                _ => None,
            })
            .collect();
        let target = series
            .iter()
            .map(|s| s.array.data_type().clone())
            .reduce(|a, b| common_type(&a, &b))
            .unwrap_or(DataType::Null);
        let arrays = series
            .iter()
            .map(|s| compute::cast(s.array.as_ref(), &target))
            .collect::<Result<Vec<_>, _>>()?;
        let refs: Vec<&dyn Array> = arrays.iter().map(|a| a.as_ref()).collect();
        return Ok(Value::Series(Series::new(
            &series[0].name,
            compute::concat(&refs)?,
        )));
    }
    let mut tables = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Table(t) => tables.push(t),
            other => {
                return Err(type_error(format!(
                    "cannot concatenate object of type '{}'; only Series and DataFrame objs are valid",
                    other.type_name()
                )))
            }
        }
    }
    let mut names: Vec<String> = Vec::new();
    let mut types: Vec<DataType> = Vec::new();
    for table in &tables {
        for field in table.schema().fields() {
            match names.iter().position(|n| n == field.name()) {
                Some(i) => types[i] = common_type(&types[i], field.data_type()),
                None => {
                    names.push(field.name().clone());
                    types.push(field.data_type().clone());
                }
            }
        }
    }
    let rows: usize = tables.iter().map(RecordBatch::num_rows).sum();
    let mut columns = Vec::with_capacity(names.len());
    for (name, target) in names.iter().zip(&types) {
        let parts = tables
            .iter()
            .map(|t| match t.column_by_name(name) {
                Some(array) => compute::cast(array.as_ref(), target),
                None => Ok(new_null_array(target, t.num_rows())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let refs: Vec<&dyn Array> = parts.iter().map(|a| a.as_ref()).collect();
        columns.push((name.clone(), compute::concat(&refs)?));
    }
    Ok(Value::Table(table_from(columns, rows)?))
}

/// `to_datetime(arg, format=..., errors=...)`
pub fn to_datetime(arg: Value, format: Option<&str>, coerce_errors: bool) -> Result<Value, RuntimeError> {
    let parse = |s: &str| match format {
        Some(f) => parse_with_format(s, f),
        None => parse_datetime(s),
    };
    let unparsable = |s: &str| {
        RuntimeError::Value(match format {
            Some(f) => format!("time data '{}' does not match format '{}'", s, f),
            None => format!("Unknown datetime string format, unable to parse: {}", s),
        })
    };
    match arg {
        Value::Str(s) => match parse(&s) {
            Some(dt) => Ok(Value::Datetime(dt)),
            None if coerce_errors => Ok(Value::None),
            None => Err(unparsable(&s)),
        },
        Value::Datetime(_) => Ok(arg),
        Value::Date(d) => Ok(d.and_hms_opt(0, 0, 0).map_or(Value::None, Value::Datetime)),
        Value::Series(series) => {
            let mut out = Vec::with_capacity(series.len());
            for cell in series.cells()? {
                out.push(match cell {
                    Cell::Null => Cell::Null,
                    Cell::Str(s) => match parse(&s) {
                        Some(dt) => Cell::Datetime(dt),
                        None if coerce_errors => Cell::Null,
                        None => return Err(unparsable(&s)),
                    },
                    other => match other.as_datetime() {
                        Some(dt) => Cell::Datetime(dt),
                        None if coerce_errors => Cell::Null,
                        None => {
                            return Err(type_error(format!(
                                "cannot convert a {} value to datetime",
                                other.type_name()
                            )))
                        }
                    },
                });
            }
            let array = if out.iter().all(Cell::is_null) {
                compute::cast(
                    array_from_cells(&out).as_ref(),
                    &DataType::Timestamp(arrow::datatypes::TimeUnit::Microsecond, None),
                )?
            } else {
                array_from_cells(&out)
            };
            Ok(Value::Series(Series::new(series.name, array)))
        }
        Value::Dict(pairs) => {
            let mut parts = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                let cells = match v {
                    Value::Series(s) => s.cells()?,
                    Value::List(items) => scalar_cells(&items, "a date part")?,
                    other => {
                        return Err(type_error(format!(
                            "date parts must be columns, not '{}'",
                            other.type_name()
                        )))
                    }
                };
                parts.push((k.to_string(), cells));
            }
            assemble(parts, coerce_errors)
        }
        Value::Table(table) => {
            let parts = table_columns(&table)
                .into_iter()
                .map(|(n, a)| Ok((n, column_cells(a.as_ref())?)))
                .collect::<Result<Vec<_>, RuntimeError>>()?;
            assemble(parts, coerce_errors)
        }
        other => Err(type_error(format!(
            "cannot convert '{}' to datetime",
            other.type_name()
        ))),
    }
}

/// Build timestamps from year/month/day[/hour/minute/second] columns.
fn assemble(parts: Vec<(String, Vec<Cell>)>, coerce_errors: bool) -> Result<Value, RuntimeError> {
    let find = |unit: &str| {
        parts
            .iter()
            .find(|(n, _)| {
                let n = n.to_ascii_lowercase();
                n == unit || n == format!("{}s", unit)
            })
            .map(|(_, cells)| cells)
    };
    let missing: Vec<&str> = ["year", "month", "day"]
        .into_iter()
        .filter(|u| find(*u).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(RuntimeError::Value(format!(
            "to assemble mappings requires at least that [year, month, day] be specified: [{}] is missing",
            missing.join(",")
        )));
    }
    let units: Vec<Option<&Vec<Cell>>> = ["year", "month", "day", "hour", "minute", "second"]
        .into_iter()
        .map(find)
        .collect();
    let rows = units[0].map_or(0, Vec::len);
    let mut out = Vec::with_capacity(rows);
    for row in 0..rows {
        let mut fields = [0i64; 6];
        let mut null = false;
        for (slot, unit) in fields.iter_mut().zip(&units) {
            match unit.and_then(|cells| cells.get(row)) {
                Some(Cell::Int(i)) => *slot = *i,
                Some(Cell::Float(f)) if f.fract() == 0.0 => *slot = *f as i64,
                Some(Cell::Str(s)) => match s.trim().parse() {
                    Ok(i) => *slot = i,
                    Err(_) => null = true,
                },
                None => {}
                Some(_) => null = true,
            }
        }
        let stamp = if null {
            None
        } else {
            i32::try_from(fields[0])
                .ok()
                .zip(u32::try_from(fields[1]).ok())
                .zip(u32::try_from(fields[2]).ok())
                .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y, m, d))
                .and_then(|d| {
                    d.and_hms_opt(
                        u32::try_from(fields[3]).ok()?,
                        u32::try_from(fields[4]).ok()?,
                        u32::try_from(fields[5]).ok()?,
                    )
                })
        };
        match stamp {
            Some(dt) => out.push(Cell::Datetime(dt)),
            None if null || coerce_errors => out.push(Cell::Null),
            None => {
                return Err(RuntimeError::Value(format!(
                    "cannot assemble the datetimes: {}-{}-{} is out of range",
                    fields[0], fields[1], fields[2]
                )))
            }
        }
    }
    Ok(Value::Series(Series::new("", array_from_cells(&out))))
}

/// `isna(obj)` / `notna(obj)` for scalars, columns and tables.
pub fn is_na(value: &Value, negate: bool) -> Result<Value, RuntimeError> {
    match value {
        Value::Series(s) => Ok(Value::Series(Series::new(
            &s.name,
            Arc::new(missing_mask(&s.array, negate)?),
        ))),
        Value::Table(t) => {
            let columns = table_columns(t)
                .into_iter()
                .map(|(n, a)| Ok((n, Arc::new(missing_mask(&a, negate)?) as ArrayRef)))
                .collect::<Result<Vec<_>, RuntimeError>>()?;
            Ok(Value::Table(table_from(columns, t.num_rows())?))
        }
        Value::None => Ok(Value::Bool(!negate)),
        Value::Float(f) => Ok(Value::Bool(f.is_nan() != negate)),
        other if other.is_scalar() => Ok(Value::Bool(negate)),
        other => Err(type_error(format!(
            "isna() is not defined for '{}'",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{
        interp::{global, Output},
        parse::parse_module,
        value::Globals,
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::{cell::RefCell, rc::Rc};

    fn run(source: &str) -> Result<(Globals, Vec<String>), RuntimeError> {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let globals = Globals::default();
        let body = parse_module(source).map_err(|e| RuntimeError::Syntax(e.to_string()))?;
        Interpreter::new(Output::Captured(lines.clone())).run_module(&body, &globals)?;
        let printed = lines.borrow().clone();
        Ok((globals, printed))
    }

    fn table(globals: &Globals, name: &str) -> Table {
        match global(globals, name) {
            Some(Value::Table(t)) => t,
            other => panic!("{} is not a table: {:?}", name, other),
        }
    }

    fn cells(t: &Table, name: &str) -> Vec<Cell> {
        column_cells(t.column_by_name(name).unwrap().as_ref()).unwrap()
    }

    #[test]
    fn builds_and_filters_tables() -> Result<(), RuntimeError> {
        let (globals, printed) = run(indoc! {r#"
            import pandas as pd
            df = pd.DataFrame({"id": [1, 2, 3, 4], "price": [10.0, None, 30.5, 4.0], "cur": "USD"})
            cheap = df[df["price"] < 20]
            picked = df.loc[df["id"] >= 3, ["id", "price"]]
            print(df.shape, list(df.columns), len(cheap), picked.shape)
        "#})?;
        assert_eq!(printed, vec!["(4, 3) ['id', 'price', 'cur'] 2 (2, 2)"]);
        let cheap = table(&globals, "cheap");
        assert_eq!(cells(&cheap, "id"), vec![Cell::Int(1), Cell::Int(4)]);
        assert_eq!(
            cells(&cheap, "cur"),
            vec![Cell::Str("USD".into()), Cell::Str("USD".into())]
        );
        Ok(())
    }

    #[test]
    fn column_assignment_rebinds_only_the_target() -> Result<(), RuntimeError> {
        let (globals, _) = run(indoc! {r#"
            import pandas as pd
            df = pd.DataFrame({"a": [1, 2, 3]})
            original = df
            df["b"] = df["a"] * 2 + 1
            df["c"] = "x"
            df["ratio"] = df["a"] / 2
        "#})?;
        let df = table(&globals, "df");
        assert_eq!(cells(&df, "b"), vec![Cell::Int(3), Cell::Int(5), Cell::Int(7)]);
        assert_eq!(cells(&df, "ratio")[0], Cell::Float(0.5));
        assert_eq!(table(&globals, "original").num_columns(), 1);
        Ok(())
    }

    #[test]
    fn masks_combine_and_treat_missing_as_false() -> Result<(), RuntimeError> {
        let (globals, printed) = run(indoc! {r#"
            import pandas as pd
            df = pd.DataFrame({"n": [1, None, 3, 4]})
            both = df[(df["n"] > 1) & ~(df["n"] == 4)]
            print(df["n"].isna().tolist(), (df["n"] != 1).tolist(), len(both))
        "#})?;
        assert_eq!(
            printed,
            vec!["[False, True, False, False] [False, True, True, True] 1"]
        );
        assert_eq!(cells(&table(&globals, "both"), "n"), vec![Cell::Int(3)]);
        Ok(())
    }

    #[test]
    fn table_methods() -> Result<(), RuntimeError> {
        let (globals, printed) = run(indoc! {r#"
            import pandas as pd
            df = pd.DataFrame({"k": ["b", "a", "b", "c"], "v": [2, 1, 2, None]})
            out = (
                df.drop_duplicates()
                .sort_values("k", ascending=False)
                .rename(columns={"v": "value"})
                .fillna(0)
                .reset_index(drop=True)
            )
            print(out["k"].tolist(), out["value"].tolist())
            print(df.head(2).shape, df.tail(1)["k"].tolist(), df.drop(columns=["v"]).shape)
            print(df.dropna().shape, df["v"].sum(), df["v"].mean(), df["k"].unique())
            a = df.assign(w=lambda d: d["v"] * 10, z=1)
            print(a["w"].tolist(), a["z"].tolist())
        "#})?;
        assert_eq!(
            printed,
            vec![
                "['c', 'b', 'a'] [0, 2, 1]",
                "(2, 2) ['c'] (4, 1)",
                "(3, 2) 5 1.6666666666666667 ['b', 'a', 'c']",
                "[20, 10, 20, None] [1, 1, 1, 1]",
            ]
        );
        assert_eq!(table(&globals, "out").num_rows(), 3);
        Ok(())
    }

    #[test]
    fn merges_on_shared_keys() -> Result<(), RuntimeError> {
        let (globals, _) = run(indoc! {r#"
            import pandas as pd
            left = pd.DataFrame({"id": [1, 2, 3], "name": ["a", "b", "c"], "x": [1, 1, 1]})
            right = pd.DataFrame({"id": [2, 3, 4], "x": [5, 6, 7]})
            inner = left.merge(right, on="id")
            outer = left.merge(right, on="id", how="left")
        "#})?;
        let inner = table(&globals, "inner");
        assert_eq!(
            column_names(&inner),
            vec!["id", "name", "x_x", "x_y"]
        );
        assert_eq!(cells(&inner, "x_y"), vec![Cell::Int(5), Cell::Int(6)]);
        let outer = table(&globals, "outer");
        assert_eq!(outer.num_rows(), 3);
        assert_eq!(cells(&outer, "x_y")[0], Cell::Null);
        Ok(())
    }

    #[test]
    fn string_and_date_accessors() -> Result<(), RuntimeError> {
        let (_, printed) = run(indoc! {r#"
            import pandas as pd
            s = pd.Series([" Ab-12 ", "cd-7", None], name="code")
            print(s.str.strip().str.upper().tolist(), s.str.contains("-1").tolist())
            print(s.str.extract(r"(\d+)", expand=False).tolist(), s.str.len().tolist())
            d = pd.to_datetime(pd.Series(["2024-01-31", "2023-12-01"]))
            print(d.dt.year.tolist(), d.dt.strftime("%m/%d").tolist(), d.dt.date.tolist())
            parts = pd.to_datetime({"year": [2024], "month": [2], "day": [29]})
            print(parts.tolist())
        "#})?;
        assert_eq!(
            printed,
            vec![
                "['AB-12', 'CD-7', None] [True, False, None]",
                "['12', '7', None] [7, 4, None]",
                "[2024, 2023] ['01/31', '12/01'] [datetime.date(2024, 1, 31), datetime.date(2023, 12, 1)]",
                "[datetime.datetime(2024, 2, 29, 0, 0, 0)]",
            ]
        );
        Ok(())
    }

    #[test]
    fn concat_unions_columns() -> Result<(), RuntimeError> {
        let (globals, _) = run(indoc! {r#"
            import pandas as pd
            a = pd.DataFrame({"x": [1], "y": ["p"]})
            b = pd.DataFrame({"x": [2.5], "z": [True]})
            both = pd.concat([a, b], ignore_index=True)
        "#})?;
        let both = table(&globals, "both");
        assert_eq!(column_names(&both), vec!["x", "y", "z"]);
        assert_eq!(cells(&both, "x"), vec![Cell::Float(1.0), Cell::Float(2.5)]);
        assert_eq!(cells(&both, "y"), vec![Cell::Str("p".into()), Cell::Null]);
        Ok(())
    }

    #[test]
    fn length_mismatch_is_reported() {
        let err = run(indoc! {r#"
            import pandas as pd
            df = pd.DataFrame({"a": [1, 2]})
            df["b"] = [1, 2, 3]
        "#})
        .err()
        .expect("the unit should fail");
        assert_eq!(
            err.to_string(),
            "ValueError: Length of values (3) does not match length of index (2)"
        );
    }

    #[test]
    fn tables_have_no_truth_value() {
        let err = run(indoc! {r#"
            import pandas as pd
            df = pd.DataFrame({"a": [1]})
            if df["a"] > 0:
                pass
        "#})
        .err()
        .expect("the unit should fail");
        assert!(err.to_string().contains("is ambiguous"));
    }
}
