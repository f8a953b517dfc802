// src/schema/types.rs

use regex::Regex;
use std::fmt;

use crate::table::{cell::format_float, Cell};

/// Declared column type, spelled the way schema units spell it
/// (`str`, `"int64"`, `"datetime64[ns]"`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Str,
    Int64,
    Float64,
    Bool,
    Date,
    Datetime,
    /// `object`: any type is accepted and nothing is coerced.
    Object,
}

impl DType {
    /// Parse a dtype spelling. Unknown spellings are `None`.
    pub fn parse(spelling: &str) -> Option<DType> {
        let s = spelling.trim().to_ascii_lowercase();
        let dtype = match s.as_str() {
            "str" | "string" | "utf8" => DType::Str,
            "int" | "int64" | "int32" | "int16" | "int8" | "integer" => DType::Int64,
            "float" | "float64" | "float32" | "double" => DType::Float64,
            "bool" | "boolean" => DType::Bool,
            "date" => DType::Date,
            "object" | "any" => DType::Object,
            _ if s.starts_with("datetime") || s.starts_with("timestamp") => DType::Datetime,
            _ => return None,
        };
        Some(dtype)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Str => "str",
            DType::Int64 => "int64",
            DType::Float64 => "float64",
            DType::Bool => "bool",
            DType::Date => "date",
            DType::Datetime => "datetime64[ns]",
            DType::Object => "object",
        };
        f.write_str(name)
    }
}

/// What a value check tests.
#[derive(Debug, Clone)]
pub enum CheckKind {
    Equal(Cell),
    NotEqual(Cell),
    Greater(Cell),
    GreaterOrEqual(Cell),
    Less(Cell),
    LessOrEqual(Cell),
    InRange {
        min: Cell,
        max: Cell,
        include_min: bool,
        include_max: bool,
    },
    IsIn(Vec<Cell>),
    NotIn(Vec<Cell>),
    StrMatches(Regex),
    StrContains(Regex),
    StrStartsWith(String),
    StrEndsWith(String),
    StrLength {
        min: Option<usize>,
        max: Option<usize>,
    },
}

/// A per-value constraint attached to a column.
#[derive(Debug, Clone)]
pub struct Check {
    pub kind: CheckKind,
    /// Nulls pass the check untested.
    pub ignore_na: bool,
    /// Failures are logged as warnings instead of failing validation.
    pub raise_warning: bool,
}

impl Check {
    pub fn new(kind: CheckKind) -> Self {
        Self {
            kind,
            ignore_na: true,
            raise_warning: false,
        }
    }

    /// Whether a non-null value satisfies the check.
    pub fn passes(&self, cell: &Cell) -> bool {
        use std::cmp::Ordering::*;
        match &self.kind {
            CheckKind::Equal(v) => cell.loose_eq(v),
            CheckKind::NotEqual(v) => !cell.loose_eq(v),
            CheckKind::Greater(v) => cell.compare(v) == Some(Greater),
            CheckKind::GreaterOrEqual(v) => matches!(cell.compare(v), Some(Greater | Equal)),
            CheckKind::Less(v) => cell.compare(v) == Some(Less),
            CheckKind::LessOrEqual(v) => matches!(cell.compare(v), Some(Less | Equal)),
            CheckKind::InRange {
                min,
                max,
                include_min,
                include_max,
            } => {
                let lower = match cell.compare(min) {
                    Some(Greater) => true,
                    Some(Equal) => *include_min,
                    _ => false,
                };
                let upper = match cell.compare(max) {
                    Some(Less) => true,
                    Some(Equal) => *include_max,
                    _ => false,
                };
                lower && upper
            }
            CheckKind::IsIn(values) => values.iter().any(|v| cell.loose_eq(v)),
            CheckKind::NotIn(values) => !values.iter().any(|v| cell.loose_eq(v)),
            CheckKind::StrMatches(re) => match cell {
                Cell::Str(s) => re.find(s).is_some_and(|m| m.start() == 0),
                _ => false,
            },
            CheckKind::StrContains(re) => match cell {
                Cell::Str(s) => re.is_match(s),
                _ => false,
            },
            CheckKind::StrStartsWith(prefix) => {
                matches!(cell, Cell::Str(s) if s.starts_with(prefix.as_str()))
            }
            CheckKind::StrEndsWith(suffix) => {
                matches!(cell, Cell::Str(s) if s.ends_with(suffix.as_str()))
            }
            CheckKind::StrLength { min, max } => match cell {
                Cell::Str(s) => {
                    let n = s.chars().count();
                    min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m)
                }
                _ => false,
            },
        }
    }
}

fn literal(cell: &Cell) -> String {
    match cell {
        Cell::Str(s) => format!("'{}'", s),
        Cell::Float(f) => format_float(*f),
        Cell::Null => "None".to_string(),
        Cell::Bool(true) => "True".to_string(),
        Cell::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}

fn literal_list(cells: &[Cell]) -> String {
    let items: Vec<String> = cells.iter().map(literal).collect();
    format!("[{}]", items.join(", "))
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CheckKind::Equal(v) => write!(f, "equal_to({})", literal(v)),
            CheckKind::NotEqual(v) => write!(f, "not_equal_to({})", literal(v)),
            CheckKind::Greater(v) => write!(f, "greater_than({})", literal(v)),
            CheckKind::GreaterOrEqual(v) => {
                write!(f, "greater_than_or_equal_to({})", literal(v))
            }
            CheckKind::Less(v) => write!(f, "less_than({})", literal(v)),
            CheckKind::LessOrEqual(v) => write!(f, "less_than_or_equal_to({})", literal(v)),
            CheckKind::InRange { min, max, .. } => {
                write!(f, "in_range({}, {})", literal(min), literal(max))
            }
            CheckKind::IsIn(values) => write!(f, "isin({})", literal_list(values)),
            CheckKind::NotIn(values) => write!(f, "notin({})", literal_list(values)),
            CheckKind::StrMatches(re) => write!(f, "str_matches('{}')", re.as_str()),
            CheckKind::StrContains(re) => write!(f, "str_contains('{}')", re.as_str()),
            CheckKind::StrStartsWith(s) => write!(f, "str_startswith('{}')", s),
            CheckKind::StrEndsWith(s) => write!(f, "str_endswith('{}')", s),
            CheckKind::StrLength { min, max } => {
                let bound = |b: &Option<usize>| b.map_or("None".to_string(), |n| n.to_string());
                write!(f, "str_length({}, {})", bound(min), bound(max))
            }
        }
    }
}

/// Constraints for one column.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: Option<DType>,
    pub nullable: bool,
    pub unique: bool,
    pub coerce: bool,
    pub required: bool,
    pub checks: Vec<Check>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl ColumnSchema {
    /// Column with the schema defaults: required, not nullable, no checks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype: None,
            nullable: false,
            unique: false,
            coerce: false,
            required: true,
            checks: Vec::new(),
            title: None,
            description: None,
        }
    }
}

/// How columns not named by the schema are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    #[default]
    Allow,
    Reject,
    /// Extra columns are dropped from the validated table.
    Filter,
}

/// Declarative constraints for a whole table.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    pub name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub columns: Vec<ColumnSchema>,
    pub strict: Strictness,
    pub ordered: bool,
    pub coerce: bool,
    /// Column combination that must be unique across rows.
    pub unique: Vec<String>,
    pub add_missing_columns: bool,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed schema>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_spellings() {
        assert_eq!(DType::parse("datetime64[ns]"), Some(DType::Datetime));
        assert_eq!(DType::parse("Int64"), Some(DType::Int64));
        assert_eq!(DType::parse("object"), Some(DType::Object));
        assert_eq!(DType::parse("complex"), None);
    }

    #[test]
    fn range_bounds_respect_inclusivity() {
        let check = Check::new(CheckKind::InRange {
            min: Cell::Int(0),
            max: Cell::Int(10),
            include_min: true,
            include_max: false,
        });
        assert!(check.passes(&Cell::Int(0)));
        assert!(check.passes(&Cell::Float(9.5)));
        assert!(!check.passes(&Cell::Int(10)));
        assert!(!check.passes(&Cell::Str("5".into())));
    }

    #[test]
    fn str_matches_anchors_at_start() {
        let check = Check::new(CheckKind::StrMatches(Regex::new(r"\d{3}").unwrap()));
        assert!(check.passes(&Cell::Str("123abc".into())));
        assert!(!check.passes(&Cell::Str("abc123".into())));
    }

    #[test]
    fn checks_render_their_arguments() {
        let check = Check::new(CheckKind::IsIn(vec![
            Cell::Str("USD".into()),
            Cell::Str("EUR".into()),
        ]));
        assert_eq!(check.to_string(), "isin(['USD', 'EUR'])");
        let check = Check::new(CheckKind::GreaterOrEqual(Cell::Int(0)));
        assert_eq!(check.to_string(), "greater_than_or_equal_to(0)");
    }
}
