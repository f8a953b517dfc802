// src/schema/arrow.rs

use arrow::{
    array::{Array, ArrayRef},
    compute::{cast_with_options, CastOptions},
    datatypes::{DataType, TimeUnit},
    error::ArrowError,
    util::display::FormatOptions,
};

use super::types::DType;
use crate::table::{array_from_cells, column_cells, dates::parse_datetime, Cell};

/// Map a declared dtype onto the Arrow type its values are stored as.
///
/// - str      → Utf8
/// - int64    → Int64
/// - float64  → Float64
/// - bool     → Boolean
/// - date     → Date32
/// - datetime → Timestamp(µs, no zone)
/// - object   → no fixed type
pub fn map_to_arrow_type(dtype: DType) -> Option<DataType> {
    match dtype {
        DType::Str => Some(DataType::Utf8),
        DType::Int64 => Some(DataType::Int64),
        DType::Float64 => Some(DataType::Float64),
        DType::Bool => Some(DataType::Boolean),
        DType::Date => Some(DataType::Date32),
        DType::Datetime => Some(DataType::Timestamp(TimeUnit::Microsecond, None)),
        DType::Object => None,
    }
}

/// Whether a stored Arrow type satisfies a declared dtype without coercion.
pub fn matches(dtype: DType, actual: &DataType) -> bool {
    match dtype {
        DType::Str => matches!(actual, DataType::Utf8 | DataType::LargeUtf8),
        DType::Int64 => actual.is_integer(),
        DType::Float64 => matches!(actual, DataType::Float32 | DataType::Float64),
        DType::Bool => actual == &DataType::Boolean,
        DType::Date => matches!(actual, DataType::Date32 | DataType::Date64),
        DType::Datetime => matches!(actual, DataType::Timestamp(_, _)),
        DType::Object => true,
    }
}

/// Pandas-style dtype name for an Arrow type, used in failure reports.
pub fn dtype_name(actual: &DataType) -> String {
    match actual {
        DataType::Utf8 | DataType::LargeUtf8 => "str".to_string(),
        DataType::Boolean => "bool".to_string(),
        DataType::Date32 | DataType::Date64 => "date".to_string(),
        DataType::Timestamp(_, _) => "datetime64[ns]".to_string(),
        DataType::Null => "object".to_string(),
        other if other.is_integer() => "int64".to_string(),
        other if other.is_floating() => "float64".to_string(),
        other => other.to_string(),
    }
}

/// Convert a column to a declared dtype. Values that cannot be converted are
/// an error rather than silently becoming null.
pub fn coerce(array: &ArrayRef, dtype: DType) -> Result<ArrayRef, ArrowError> {
    let Some(target) = map_to_arrow_type(dtype) else {
        return Ok(array.clone());
    };
    let from_text = matches!(array.data_type(), DataType::Utf8 | DataType::LargeUtf8);
    if from_text && matches!(dtype, DType::Date | DType::Datetime) {
        return parse_temporal(array, dtype);
    }
    let options = CastOptions {
        safe: false,
        format_options: FormatOptions::default(),
    };
    cast_with_options(array.as_ref(), &target, &options)
}

/// Text → date/timestamp using the lenient layouts of `table::dates`.
fn parse_temporal(array: &ArrayRef, dtype: DType) -> Result<ArrayRef, ArrowError> {
    let cells = column_cells(array.as_ref())?
        .into_iter()
        .enumerate()
        .map(|(row, cell)| match cell {
            Cell::Str(s) => {
                let dt = parse_datetime(&s).ok_or_else(|| {
                    ArrowError::CastError(format!("cannot parse '{}' at row {} as a date", s, row))
                })?;
                Ok(match dtype {
                    DType::Date => Cell::Date(dt.date()),
                    _ => Cell::Datetime(dt),
                })
            }
            other => Ok(other),
        })
        .collect::<Result<Vec<_>, ArrowError>>()?;
    let parsed = array_from_cells(&cells);
    match (dtype, parsed.data_type()) {
        // An all-null column infers as text; give it the declared type.
        (DType::Date, DataType::Date32) | (DType::Datetime, DataType::Timestamp(_, _)) => {
            Ok(parsed)
        }
        _ => Ok(arrow::array::new_null_array(
            &map_to_arrow_type(dtype).unwrap_or(DataType::Utf8),
            parsed.len(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use std::sync::Arc;

    #[test]
    fn integers_match_any_width() {
        assert!(matches(DType::Int64, &DataType::Int32));
        assert!(!matches(DType::Int64, &DataType::Float64));
        assert!(matches(DType::Object, &DataType::Utf8));
    }

    #[test]
    fn coerces_text_to_numbers() {
        let array: ArrayRef = Arc::new(StringArray::from(vec![Some("1"), None, Some("3")]));
        let out = coerce(&array, DType::Int64).unwrap();
        let out = out.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(out.iter().collect::<Vec<_>>(), vec![Some(1), None, Some(3)]);
    }

    #[test]
    fn invalid_text_is_an_error() {
        let array: ArrayRef = Arc::new(StringArray::from(vec!["1", "x"]));
        assert!(coerce(&array, DType::Int64).is_err());
    }

    #[test]
    fn coerces_text_dates() {
        let array: ArrayRef = Arc::new(StringArray::from(vec!["2024/01/02", "2024-01-03"]));
        let out = coerce(&array, DType::Date).unwrap();
        assert_eq!(out.data_type(), &DataType::Date32);
        let array: ArrayRef = Arc::new(StringArray::from(vec!["yesterday"]));
        assert!(coerce(&array, DType::Datetime).is_err());
    }
}
