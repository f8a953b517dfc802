// src/unit/value.rs
//! Runtime values of the transform language.

use arrow::array::{Array, ArrayRef};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::{cell::RefCell, cmp::Ordering, collections::HashMap, fmt, rc::Rc};

use super::{
    ast::FunctionDef,
    interp::{Interpreter, RuntimeError},
};
use crate::{
    schema::{arrow::dtype_name, Check, ColumnSchema, DType, TableSchema},
    signature::{Parameter, Signature},
    table::{cell::format_float, column_cells, preview, Cell, Table},
};

/// Top-level names of one loaded unit.
pub type Globals = Rc<RefCell<HashMap<String, Value>>>;

/// Rows printed when a table is rendered.
const TABLE_REPR_ROWS: usize = 20;

/// A named column detached from its table.
#[derive(Debug, Clone)]
pub struct Series {
    pub name: String,
    pub array: ArrayRef,
}

impl Series {
    pub fn new(name: impl Into<String>, array: ArrayRef) -> Self {
        Self {
            name: name.into(),
            array,
        }
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    pub fn cells(&self) -> Result<Vec<Cell>, RuntimeError> {
        Ok(column_cells(self.array.as_ref())?)
    }

    pub fn values(&self) -> Result<Vec<Value>, RuntimeError> {
        Ok(self.cells()?.into_iter().map(Value::from_cell).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    Exception,
    ValueError,
    TypeError,
    KeyError,
    RuntimeError,
}

impl ExceptionKind {
    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::Exception => "Exception",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::KeyError => "KeyError",
            ExceptionKind::RuntimeError => "RuntimeError",
        }
    }
}

/// Classes the prelude exposes by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Int,
    Float,
    Str,
    Bool,
    List,
    Dict,
    Tuple,
    DataFrame,
    Series,
    Any,
    Callable,
    Optional,
    Union,
    Date,
    Datetime,
    Timestamp,
    Check,
    Exception(ExceptionKind),
}

impl TypeTag {
    /// Canonical name, as rendered in signatures.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Str => "str",
            TypeTag::Bool => "bool",
            TypeTag::List => "list",
            TypeTag::Dict => "dict",
            TypeTag::Tuple => "tuple",
            TypeTag::DataFrame => "DataFrame",
            TypeTag::Series => "Series",
            TypeTag::Any => "Any",
            TypeTag::Callable => "Callable",
            TypeTag::Optional => "Optional",
            TypeTag::Union => "Union",
            TypeTag::Date => "date",
            TypeTag::Datetime => "datetime",
            TypeTag::Timestamp => "Timestamp",
            TypeTag::Check => "Check",
            TypeTag::Exception(kind) => kind.name(),
        }
    }

    /// Column dtype a class stands for when used as `Column(dtype)`.
    pub fn dtype(self) -> Option<DType> {
        let dtype = match self {
            TypeTag::Int => DType::Int64,
            TypeTag::Float => DType::Float64,
            TypeTag::Str => DType::Str,
            TypeTag::Bool => DType::Bool,
            TypeTag::Date => DType::Date,
            TypeTag::Datetime | TypeTag::Timestamp => DType::Datetime,
            TypeTag::Any => DType::Object,
            _ => return None,
        };
        Some(dtype)
    }
}

/// A user-defined function or lambda together with everything evaluated
/// when its `def` ran.
#[derive(Clone)]
pub struct Function {
    pub def: Rc<FunctionDef>,
    /// One slot per parameter.
    pub defaults: Vec<Option<Value>>,
    /// One slot per parameter, already rendered to canonical names.
    pub annotations: Vec<Option<String>>,
    pub return_annotation: Option<String>,
    /// Enclosing function locals captured when the `def` ran.
    pub closure: Rc<HashMap<String, Value>>,
    /// `None` while the function is stored in its own unit's namespace;
    /// re-attached whenever it is read back out.
    pub globals: Option<Globals>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn signature(&self) -> Signature {
        let parameters = self
            .def
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| Parameter {
                name: p.name.clone(),
                kind: p.kind,
                default: self.defaults.get(i).and_then(|d| d.as_ref().map(Value::repr)),
                annotation: self.annotations.get(i).cloned().flatten(),
            })
            .collect();
        Signature {
            parameters,
            return_annotation: self.return_annotation.clone(),
        }
    }

    pub fn detached(&self) -> Function {
        Function {
            globals: None,
            ..self.clone()
        }
    }

    pub fn attached(&self, globals: &Globals) -> Function {
        Function {
            globals: Some(globals.clone()),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.def.name)
            .field("line", &self.def.line)
            .finish()
    }
}

pub type BuiltinFn = fn(&mut Interpreter, Args) -> Result<Value, RuntimeError>;

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

/// `series.str`, `series.dt`, `df.loc`
#[derive(Debug, Clone)]
pub enum Accessor {
    Str(Series),
    Dt(Series),
    Loc(Table),
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    Datetime(NaiveDateTime),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Insertion-ordered pairs.
    Dict(Vec<(Value, Value)>),
    Slice(Option<i64>, Option<i64>, Option<i64>),
    Table(Table),
    Series(Series),
    Accessor(Box<Accessor>),
    Schema(Rc<TableSchema>),
    Column(Rc<ColumnSchema>),
    Check(Rc<Check>),
    Dtype(DType),
    Function(Rc<Function>),
    Builtin(Builtin),
    Method {
        receiver: Box<Value>,
        name: String,
    },
    Type(TypeTag),
    /// Subscripted typing construct such as `Optional[int]`.
    TypeHint(String),
    Module(&'static str),
    Exception {
        kind: ExceptionKind,
        message: String,
    },
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn type_name(&self) -> String {
        let name = match self {
            Value::None => "NoneType",
            Value::Ellipsis => "ellipsis",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Date(_) => "date",
            Value::Datetime(_) => "datetime",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Slice(..) => "slice",
            Value::Table(_) => "DataFrame",
            Value::Series(_) => "Series",
            Value::Accessor(a) => match **a {
                Accessor::Str(_) => "StringMethods",
                Accessor::Dt(_) => "DatetimeProperties",
                Accessor::Loc(_) => "_LocIndexer",
            },
            Value::Schema(_) => "DataFrameSchema",
            Value::Column(_) => "Column",
            Value::Check(_) => "Check",
            Value::Dtype(_) => "DataType",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method { .. } => "method",
            Value::Type(_) | Value::TypeHint(_) => "type",
            Value::Module(_) => "module",
            Value::Exception { kind, .. } => kind.name(),
        };
        name.to_string()
    }

    /// Truth value; tables and series have none.
    pub fn truthy(&self) -> Result<bool, RuntimeError> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(v) | Value::Tuple(v) => !v.is_empty(),
            Value::Dict(d) => !d.is_empty(),
            Value::Table(_) | Value::Series(_) => {
                return Err(RuntimeError::Value(format!(
                    "The truth value of a {} is ambiguous. Use a.empty, a.any() or a.all().",
                    self.type_name()
                )))
            }
            _ => true,
        })
    }

    pub fn from_cell(cell: Cell) -> Value {
        match cell {
            Cell::Null => Value::None,
            Cell::Bool(b) => Value::Bool(b),
            Cell::Int(i) => Value::Int(i),
            Cell::Float(f) => Value::Float(f),
            Cell::Str(s) => Value::Str(s),
            Cell::Date(d) => Value::Date(d),
            Cell::Datetime(dt) => Value::Datetime(dt),
        }
    }

    /// Scalar values as table cells; `None` for anything else.
    pub fn to_cell(&self) -> Option<Cell> {
        Some(match self {
            Value::None => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Int(i) => Cell::Int(*i),
            Value::Float(f) if f.is_nan() => Cell::Null,
            Value::Float(f) => Cell::Float(*f),
            Value::Str(s) => Cell::Str(s.clone()),
            Value::Date(d) => Cell::Date(*d),
            Value::Datetime(dt) => Cell::Datetime(*dt),
            _ => return None,
        })
    }

    pub fn is_scalar(&self) -> bool {
        self.to_cell().is_some()
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn expect_int(&self, what: &str) -> Result<i64, RuntimeError> {
        self.as_int().ok_or_else(|| {
            RuntimeError::Type(format!("{} must be an integer, not '{}'", what, self.type_name()))
        })
    }

    pub fn expect_str(&self, what: &str) -> Result<&str, RuntimeError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(RuntimeError::Type(format!(
                "{} must be a string, not '{}'",
                what,
                other.type_name()
            ))),
        }
    }

    /// Strings, or lists/tuples of strings.
    pub fn expect_names(&self, what: &str) -> Result<Vec<String>, RuntimeError> {
        match self {
            Value::Str(s) => Ok(vec![s.clone()]),
            Value::List(items) | Value::Tuple(items) => items
                .iter()
                .map(|v| v.expect_str(what).map(str::to_string))
                .collect(),
            other => Err(RuntimeError::Type(format!(
                "{} must be a column name or a list of names, not '{}'",
                what,
                other.type_name()
            ))),
        }
    }

    /// Name of a declared type, as shown in a signature.
    pub fn annotation_name(&self) -> String {
        match self {
            Value::Type(tag) => tag.name().to_string(),
            Value::TypeHint(hint) => hint.clone(),
            Value::Str(s) => s.clone(),
            Value::None => "None".to_string(),
            Value::Dtype(d) => d.to_string(),
            Value::Module(m) => (*m).to_string(),
            other => other.repr(),
        }
    }

    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) | (Value::Ellipsis, Value::Ellipsis) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Datetime(a), Value::Datetime(b)) => a == b,
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter().any(|(k2, v2)| k.py_eq(k2) && v.py_eq(v2))
                    })
            }
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Dtype(a), Value::Dtype(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(&a.def, &b.def),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Ordering where the language defines one.
    pub fn py_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Datetime(a), Value::Datetime(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.py_cmp(y)? {
                        Ordering::Equal => continue,
                        other => return Some(other),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// `repr(value)`
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => quote(s),
            Value::Date(d) => format!("datetime.date({}, {}, {})", d.year(), d.month(), d.day()),
            Value::Datetime(dt) => format!(
                "datetime.datetime({}, {}, {}, {}, {}, {})",
                dt.year(),
                dt.month(),
                dt.day(),
                dt.hour(),
                dt.minute(),
                dt.second()
            ),
            Value::List(items) => format!("[{}]", join_repr(items)),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", join_repr(items)),
            Value::Dict(pairs) => {
                let rendered: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", rendered.join(", "))
            }
            Value::Dtype(d) => format!("DataType({})", d),
            Value::Exception { kind, message } => format!("{}({})", kind.name(), quote(message)),
            other => other.to_string(),
        }
    }
}

fn join_repr(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

fn quote(s: &str) -> String {
    let q = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(q);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == q => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(q);
    out
}

fn render_series(f: &mut fmt::Formatter<'_>, series: &Series) -> fmt::Result {
    match column_cells(series.array.as_ref()) {
        Ok(cells) => {
            let width = cells.len().saturating_sub(1).to_string().len();
            for (i, cell) in cells.iter().take(TABLE_REPR_ROWS).enumerate() {
                let shown = match cell {
                    Cell::Null => "NaN".to_string(),
                    other => other.to_string(),
                };
                writeln!(f, "{:<width$}    {}", i, shown, width = width)?;
            }
            if cells.len() > TABLE_REPR_ROWS {
                writeln!(f, "...")?;
            }
        }
        Err(e) => writeln!(f, "<unreadable: {}>", e)?,
    }
    write!(
        f,
        "Name: {}, dtype: {}",
        series.name,
        dtype_name(series.array.data_type())
    )
}

/// `str(value)`
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Ellipsis => write!(f, "Ellipsis"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Datetime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            Value::List(_) | Value::Tuple(_) | Value::Dict(_) => write!(f, "{}", self.repr()),
            Value::Slice(a, b, c) => {
                let part = |p: &Option<i64>| p.map_or("None".to_string(), |v| v.to_string());
                write!(f, "slice({}, {}, {})", part(a), part(b), part(c))
            }
            Value::Table(t) => match preview(t, TABLE_REPR_ROWS) {
                Ok(rendered) => write!(
                    f,
                    "{}\n[{} rows x {} columns]",
                    rendered,
                    t.num_rows(),
                    t.num_columns()
                ),
                Err(e) => write!(f, "<DataFrame: {}>", e),
            },
            Value::Series(s) => render_series(f, s),
            Value::Accessor(_) => write!(f, "<{} object>", self.type_name()),
            Value::Schema(s) => write!(
                f,
                "<Schema DataFrameSchema(name={}, columns=[{}])>",
                s.display_name(),
                s.column_names().join(", ")
            ),
            Value::Column(c) => write!(
                f,
                "<Schema Column(name={}, type={})>",
                c.name,
                c.dtype.map_or("None".to_string(), |d| d.to_string())
            ),
            Value::Check(c) => write!(f, "<Check {}>", c),
            Value::Dtype(d) => write!(f, "{}", d),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name),
            Value::Method { receiver, name } => {
                write!(f, "<bound method {}.{}>", receiver.type_name(), name)
            }
            Value::Type(tag) => write!(f, "<class '{}'>", tag.name()),
            Value::TypeHint(hint) => write!(f, "{}", hint),
            Value::Module(name) => write!(f, "<module '{}'>", name),
            Value::Exception { message, .. } => write!(f, "{}", message),
        }
    }
}

/// Arguments of one call.
#[derive(Debug, Default, Clone)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn with_keyword(mut self, name: impl Into<String>, value: Value) -> Self {
        self.keywords.push((name.into(), value));
        self
    }

    /// Next positional argument, else the keyword `name`.
    pub fn next(&mut self, name: &str) -> Option<Value> {
        if self.positional.is_empty() {
            self.keyword(name)
        } else {
            Some(self.positional.remove(0))
        }
    }

    pub fn keyword(&mut self, name: &str) -> Option<Value> {
        let at = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(at).1)
    }

    /// Keyword `name`, treating an explicit `None` as absent.
    pub fn option(&mut self, name: &str) -> Option<Value> {
        match self.next(name) {
            Some(Value::None) | None => None,
            some => some,
        }
    }

    pub fn flag(&mut self, name: &str, default: bool) -> Result<bool, RuntimeError> {
        match self.keyword(name) {
            Some(v) => v.truthy(),
            None => Ok(default),
        }
    }

    pub fn required(&mut self, func: &str, name: &str) -> Result<Value, RuntimeError> {
        self.next(name).ok_or_else(|| {
            RuntimeError::Type(format!(
                "{}() missing required argument: '{}'",
                func, name
            ))
        })
    }

    pub fn rest(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.positional)
    }

    /// Fail on anything not consumed.
    pub fn done(self, func: &str) -> Result<(), RuntimeError> {
        if let Some((name, _)) = self.keywords.first() {
            return Err(RuntimeError::Type(format!(
                "{}() got an unexpected keyword argument '{}'",
                func, name
            )));
        }
        if !self.positional.is_empty() {
            return Err(RuntimeError::Type(format!(
                "{}() got {} unexpected positional argument(s)",
                func,
                self.positional.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reprs_follow_python() {
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::str("a\nb").repr(), "'a\\nb'");
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(
            Value::Dict(vec![(Value::str("k"), Value::Float(2.0))]).repr(),
            "{'k': 2.0}"
        );
        assert_eq!(Value::None.repr(), "None");
        assert_eq!(Value::Bool(true).to_string(), "True");
    }

    #[test]
    fn numeric_equality_crosses_kinds() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::str("1").py_eq(&Value::Int(1)));
        assert_eq!(
            Value::Int(2).py_cmp(&Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::str("a").py_cmp(&Value::Int(1)), None);
    }

    #[test]
    fn tables_have_no_truth_value() {
        let series = Series::new("x", crate::table::array_from_cells(&[Cell::Int(1)]));
        assert!(Value::Series(series).truthy().is_err());
        assert!(!Value::List(vec![]).truthy().unwrap());
    }

    #[test]
    fn args_prefer_positionals_then_keywords() {
        let mut args = Args::new(vec![Value::Int(1)]).with_keyword("b", Value::Int(2));
        assert!(matches!(args.next("a"), Some(Value::Int(1))));
        assert!(matches!(args.next("b"), Some(Value::Int(2))));
        assert!(args.next("c").is_none());
        assert!(args.done("f").is_ok());

        let args = Args::default().with_keyword("bogus", Value::None);
        assert!(args.done("f").unwrap_err().to_string().contains("'bogus'"));
    }
}
