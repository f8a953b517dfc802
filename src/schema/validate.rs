// src/schema/validate.rs

use arrow::{
    array::{new_null_array, ArrayRef},
    datatypes::{DataType, Field, Schema as ArrowSchema},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};
use tracing::{debug, warn};

use super::{
    arrow::{coerce, dtype_name, map_to_arrow_type, matches},
    types::{ColumnSchema, Strictness, TableSchema},
};
use crate::table::{column_cells, Cell};

/// Failure cases listed in an error message before truncating.
const MAX_REPORTED: usize = 20;

/// One violated constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureCase {
    /// `None` for table-level checks.
    pub column: Option<String>,
    pub check: String,
    pub row: Option<usize>,
    pub value: Option<String>,
}

impl FailureCase {
    fn table(check: impl Into<String>, value: Option<String>) -> Self {
        Self {
            column: None,
            check: check.into(),
            row: None,
            value,
        }
    }

    fn column(column: &str, check: impl Into<String>) -> Self {
        Self {
            column: Some(column.to_string()),
            check: check.into(),
            row: None,
            value: None,
        }
    }

    fn at(mut self, row: usize, value: &Cell) -> Self {
        self.row = Some(row);
        self.value = Some(value.to_string());
        self
    }
}

impl fmt::Display for FailureCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(c) => write!(f, "column '{}': {}", c, self.check)?,
            None => write!(f, "table: {}", self.check)?,
        }
        if let Some(row) = self.row {
            write!(f, " (row {}", row)?;
            if let Some(v) = &self.value {
                write!(f, ", value {}", v)?;
            }
            write!(f, ")")?;
        } else if let Some(v) = &self.value {
            write!(f, " ({})", v)?;
        }
        Ok(())
    }
}

/// Every failure found while validating a table against a schema.
#[derive(Debug, Clone)]
pub struct SchemaErrors {
    pub schema: String,
    pub failures: Vec<FailureCase>,
}

impl SchemaErrors {
    /// Failures for one column.
    pub fn for_column<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a FailureCase> {
        self.failures
            .iter()
            .filter(move |f| f.column.as_deref() == Some(column))
    }
}

impl fmt::Display for SchemaErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "schema '{}' failed validation with {} failure case(s)",
            self.schema,
            self.failures.len()
        )?;
        for case in self.failures.iter().take(MAX_REPORTED) {
            write!(f, "\n  - {}", case)?;
        }
        if self.failures.len() > MAX_REPORTED {
            write!(f, "\n  … {} more", self.failures.len() - MAX_REPORTED)?;
        }
        Ok(())
    }
}

impl std::error::Error for SchemaErrors {}

/// Validate `table` against `schema`, collecting every failure.
///
/// On success the returned table carries coerced column types and, for
/// `strict = "filter"`, only the schema's columns.
#[tracing::instrument(level = "debug", skip_all, fields(schema = %schema.display_name()))]
pub fn validate(table: &RecordBatch, schema: &TableSchema) -> Result<RecordBatch, SchemaErrors> {
    let mut failures = Vec::new();
    let rows = table.num_rows();

    let mut columns: Vec<(Field, ArrayRef)> = table
        .schema()
        .fields()
        .iter()
        .zip(table.columns())
        .map(|(f, a)| (f.as_ref().clone(), a.clone()))
        .collect();

    // 1) required columns, optionally filled with nulls
    for col in &schema.columns {
        if columns.iter().any(|(f, _)| f.name() == &col.name) {
            continue;
        }
        if schema.add_missing_columns && col.nullable {
            let dt = col
                .dtype
                .and_then(map_to_arrow_type)
                .unwrap_or(DataType::Utf8);
            columns.push((Field::new(&col.name, dt.clone(), true), new_null_array(&dt, rows)));
        } else if col.required {
            failures.push(FailureCase::table(
                "column_in_dataframe",
                Some(col.name.clone()),
            ));
        }
    }

    // 2) columns the schema does not know about
    match schema.strict {
        Strictness::Allow => {}
        Strictness::Reject => {
            for (field, _) in &columns {
                if schema.column(field.name()).is_none() {
                    failures.push(FailureCase::table(
                        "column_in_schema",
                        Some(field.name().clone()),
                    ));
                }
            }
        }
        Strictness::Filter => columns.retain(|(f, _)| schema.column(f.name()).is_some()),
    }

    // 3) relative order of the schema's columns
    if schema.ordered {
        let positions: Vec<(usize, &str)> = columns
            .iter()
            .filter_map(|(f, _)| {
                schema
                    .columns
                    .iter()
                    .position(|c| &c.name == f.name())
                    .map(|p| (p, f.name().as_str()))
            })
            .collect();
        if let Some(pair) = positions.windows(2).find(|w| w[0].0 > w[1].0) {
            failures.push(FailureCase::table(
                "column_ordered",
                Some(pair[1].1.to_string()),
            ));
        }
    }

    // 4) per-column dtype, nullability, uniqueness and value checks
    for (field, array) in columns.iter_mut() {
        let Some(col) = schema.column(field.name()) else {
            continue;
        };
        if let Some(converted) = check_column(col, array, schema.coerce, &mut failures) {
            *field = Field::new(field.name(), converted.data_type().clone(), true);
            *array = converted;
        }
    }

    // 5) uniqueness across a column combination
    if !schema.unique.is_empty() {
        check_unique_rows(&columns, &schema.unique, &mut failures);
    }

    if !failures.is_empty() {
        return Err(SchemaErrors {
            schema: schema.display_name().to_string(),
            failures,
        });
    }

    let (fields, arrays): (Vec<Field>, Vec<ArrayRef>) = columns.into_iter().unzip();
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    RecordBatch::try_new_with_options(Arc::new(ArrowSchema::new(fields)), arrays, &options).map_err(
        |e| SchemaErrors {
            schema: schema.display_name().to_string(),
            failures: vec![FailureCase::table("build_table", Some(e.to_string()))],
        },
    )
}

/// Validate one column. Returns the coerced array when its type changed.
fn check_column(
    col: &ColumnSchema,
    array: &ArrayRef,
    coerce_all: bool,
    failures: &mut Vec<FailureCase>,
) -> Option<ArrayRef> {
    let mut converted = None;
    if let Some(dtype) = col.dtype {
        if !matches(dtype, array.data_type()) {
            if coerce_all || col.coerce {
                match coerce(array, dtype) {
                    Ok(a) => converted = Some(a),
                    Err(e) => {
                        let mut case = FailureCase::column(&col.name, format!("coerce_dtype('{}')", dtype));
                        case.value = Some(e.to_string());
                        failures.push(case);
                        return None;
                    }
                }
            } else {
                let mut case = FailureCase::column(&col.name, format!("dtype('{}')", dtype));
                case.value = Some(dtype_name(array.data_type()));
                failures.push(case);
                return None;
            }
        }
    }

    let current = converted.as_ref().unwrap_or(array);
    let cells = match column_cells(current.as_ref()) {
        Ok(cells) => cells,
        Err(e) => {
            let mut case = FailureCase::column(&col.name, "readable");
            case.value = Some(e.to_string());
            failures.push(case);
            return converted;
        }
    };

    if !col.nullable {
        for (row, cell) in cells.iter().enumerate().filter(|(_, c)| c.is_missing()) {
            failures.push(FailureCase::column(&col.name, "not_nullable").at(row, cell));
        }
    }

    if col.unique {
        let mut seen: HashMap<String, usize> = HashMap::new();
        for (row, cell) in cells.iter().enumerate().filter(|(_, c)| !c.is_missing()) {
            let key = format!("{:?}", cell);
            if seen.insert(key, row).is_some() {
                failures.push(FailureCase::column(&col.name, "field_uniqueness").at(row, cell));
            }
        }
    }

    for check in &col.checks {
        let mut failed = 0usize;
        for (row, cell) in cells.iter().enumerate() {
            let ok = if cell.is_missing() {
                check.ignore_na
            } else {
                check.passes(cell)
            };
            if ok {
                continue;
            }
            failed += 1;
            if !check.raise_warning {
                failures.push(FailureCase::column(&col.name, check.to_string()).at(row, cell));
            }
        }
        if failed > 0 && check.raise_warning {
            warn!(column = %col.name, check = %check, failed, "check failed (warning only)");
        } else {
            debug!(column = %col.name, check = %check, failed, "check evaluated");
        }
    }

    converted
}

fn check_unique_rows(columns: &[(Field, ArrayRef)], names: &[String], failures: &mut Vec<FailureCase>) {
    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        match columns.iter().find(|(f, _)| f.name() == name) {
            Some((_, array)) => match column_cells(array.as_ref()) {
                Ok(cells) => selected.push(cells),
                Err(_) => return,
            },
            None => {
                failures.push(FailureCase::table(
                    "multiple_fields_uniqueness",
                    Some(format!("missing column '{}'", name)),
                ));
                return;
            }
        }
    }
    let rows = selected.first().map_or(0, Vec::len);
    let mut seen = HashSet::new();
    for row in 0..rows {
        let key: Vec<String> = selected.iter().map(|c| format!("{:?}", c[row])).collect();
        if !seen.insert(key) {
            let rendered: Vec<String> = selected.iter().map(|c| c[row].to_string()).collect();
            let mut case = FailureCase::table(
                format!("multiple_fields_uniqueness({})", names.join(", ")),
                Some(format!("({})", rendered.join(", "))),
            );
            case.row = Some(row);
            failures.push(case);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{Check, CheckKind, DType};
    use arrow::array::{Float64Array, Int64Array, StringArray};
    use pretty_assertions::assert_eq;

    fn sample() -> RecordBatch {
        RecordBatch::try_from_iter(vec![
            (
                "id",
                Arc::new(StringArray::from(vec![Some("1"), Some("2"), Some("2")])) as ArrayRef,
            ),
            (
                "price",
                Arc::new(Float64Array::from(vec![Some(10.0), None, Some(-1.0)])) as ArrayRef,
            ),
            (
                "currency",
                Arc::new(StringArray::from(vec!["USD", "EUR", "GBP"])) as ArrayRef,
            ),
        ])
        .unwrap()
    }

    fn column(name: &str, dtype: DType) -> ColumnSchema {
        let mut c = ColumnSchema::new(name);
        c.dtype = Some(dtype);
        c
    }

    #[test]
    fn passing_table_is_coerced() {
        let mut id = column("id", DType::Int64);
        id.coerce = true;
        let mut price = column("price", DType::Float64);
        price.nullable = true;
        let schema = TableSchema {
            name: Some("ok".into()),
            columns: vec![id, price],
            ..Default::default()
        };
        let out = validate(&sample(), &schema).unwrap();
        assert_eq!(out.num_columns(), 3);
        let ids = out.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.values().to_vec(), vec![1, 2, 2]);
    }

    #[test]
    fn collects_every_failure() {
        let mut id = column("id", DType::Str);
        id.unique = true;
        let mut price = column("price", DType::Float64);
        price
            .checks
            .push(Check::new(CheckKind::GreaterOrEqual(Cell::Int(0))));
        let mut currency = column("currency", DType::Str);
        currency.checks.push(Check::new(CheckKind::IsIn(vec![
            Cell::Str("USD".into()),
            Cell::Str("EUR".into()),
        ])));
        let schema = TableSchema {
            name: Some("strict".into()),
            columns: vec![id, price, currency, ColumnSchema::new("missing")],
            ..Default::default()
        };

        let err = validate(&sample(), &schema).unwrap_err();
        let checks: Vec<(Option<String>, String, Option<usize>)> = err
            .failures
            .iter()
            .map(|f| (f.column.clone(), f.check.clone(), f.row))
            .collect();
        assert_eq!(
            checks,
            vec![
                (None, "column_in_dataframe".to_string(), None),
                (Some("id".into()), "field_uniqueness".to_string(), Some(2)),
                (Some("price".into()), "not_nullable".to_string(), Some(1)),
                (
                    Some("price".into()),
                    "greater_than_or_equal_to(0)".to_string(),
                    Some(2)
                ),
                (
                    Some("currency".into()),
                    "isin(['USD', 'EUR'])".to_string(),
                    Some(2)
                ),
            ]
        );
        assert!(err.to_string().contains("schema 'strict' failed validation with 5"));
    }

    #[test]
    fn nan_counts_as_missing() {
        let batch = RecordBatch::try_from_iter(vec![(
            "ratio",
            Arc::new(Float64Array::from(vec![1.0, f64::NAN, f64::NAN])) as ArrayRef,
        )])
        .unwrap();
        let mut ratio = column("ratio", DType::Float64);
        ratio.unique = true;
        ratio
            .checks
            .push(Check::new(CheckKind::GreaterOrEqual(Cell::Int(0))));
        let schema = TableSchema {
            columns: vec![ratio.clone()],
            ..Default::default()
        };
        let err = validate(&batch, &schema).unwrap_err();
        let rows: Vec<(String, Option<usize>)> = err
            .for_column("ratio")
            .map(|f| (f.check.clone(), f.row))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("not_nullable".to_string(), Some(1)),
                ("not_nullable".to_string(), Some(2)),
            ]
        );
        assert_eq!(err.for_column("other").count(), 0);

        ratio.nullable = true;
        let schema = TableSchema {
            columns: vec![ratio],
            ..Default::default()
        };
        assert_eq!(validate(&batch, &schema).unwrap().num_rows(), 3);
    }

    #[test]
    fn dtype_mismatch_without_coercion() {
        let schema = TableSchema {
            columns: vec![column("id", DType::Int64)],
            ..Default::default()
        };
        let err = validate(&sample(), &schema).unwrap_err();
        assert_eq!(err.failures[0].check, "dtype('int64')");
        assert_eq!(err.failures[0].value.as_deref(), Some("str"));
    }

    #[test]
    fn strictness_modes() {
        let mut id = column("id", DType::Str);
        id.nullable = true;
        let mut schema = TableSchema {
            columns: vec![id],
            strict: Strictness::Reject,
            ..Default::default()
        };
        let err = validate(&sample(), &schema).unwrap_err();
        assert_eq!(err.failures.len(), 2);
        assert!(err.failures.iter().all(|f| f.check == "column_in_schema"));

        schema.strict = Strictness::Filter;
        let out = validate(&sample(), &schema).unwrap();
        assert_eq!(out.num_columns(), 1);
        assert_eq!(out.schema().field(0).name(), "id");
    }

    #[test]
    fn ordered_and_warning_checks() {
        let mut price = column("price", DType::Float64);
        price.nullable = true;
        let mut check = Check::new(CheckKind::GreaterOrEqual(Cell::Int(0)));
        check.raise_warning = true;
        price.checks.push(check);
        let schema = TableSchema {
            columns: vec![price.clone(), column("id", DType::Str)],
            ordered: true,
            ..Default::default()
        };
        let err = validate(&sample(), &schema).unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].check, "column_ordered");

        let schema = TableSchema {
            columns: vec![price],
            ..Default::default()
        };
        assert!(validate(&sample(), &schema).is_ok());
    }

    #[test]
    fn table_level_uniqueness_and_missing_columns() {
        let schema = TableSchema {
            unique: vec!["id".into()],
            add_missing_columns: true,
            columns: vec![{
                let mut c = column("note", DType::Str);
                c.nullable = true;
                c
            }],
            ..Default::default()
        };
        let err = validate(&sample(), &schema).unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].row, Some(2));

        let schema = TableSchema {
            add_missing_columns: true,
            columns: schema.columns.clone(),
            ..Default::default()
        };
        let out = validate(&sample(), &schema).unwrap();
        assert_eq!(out.num_columns(), 4);
        assert_eq!(out.column(3).null_count(), 3);
    }
}
