// src/unit/builtins.rs
//! The fixed prelude: builtin functions, importable modules, methods on
//! plain values, and the schema constructors.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;
use std::{cmp::Ordering, collections::HashMap, rc::Rc};

use super::{
    frame,
    interp::{dict_insert, scalar_binary, Interpreter, RuntimeError},
    value::{Accessor, Args, Builtin, BuiltinFn, ExceptionKind, TypeTag, Value},
};
use crate::{
    schema::{self, Check, CheckKind, ColumnSchema, DType, Strictness, TableSchema},
    table::{dates::parse_datetime, Cell},
    unit::ast::BinOp,
};

fn builtin(name: &'static str, func: BuiltinFn) -> Value {
    Value::Builtin(Builtin { name, func })
}

fn type_error(message: impl Into<String>) -> RuntimeError {
    RuntimeError::Type(message.into())
}

/// Names visible in every unit without an import.
pub fn prelude() -> HashMap<&'static str, Value> {
    let mut names = HashMap::new();
    for (name, func) in [
        ("print", b_print as BuiltinFn),
        ("len", b_len),
        ("range", b_range),
        ("min", b_min),
        ("max", b_max),
        ("sum", b_sum),
        ("sorted", b_sorted),
        ("enumerate", b_enumerate),
        ("zip", b_zip),
        ("abs", b_abs),
        ("round", b_round),
        ("isinstance", b_isinstance),
        ("any", b_any),
        ("all", b_all),
        ("repr", b_repr),
        ("concat", b_concat),
        ("to_datetime", b_to_datetime),
        ("isna", b_isna),
        ("notna", b_notna),
        ("DataFrameSchema", b_dataframe_schema),
        ("Column", b_column),
    ] {
        names.insert(name, builtin(name, func));
    }
    for tag in [
        TypeTag::Str,
        TypeTag::Int,
        TypeTag::Float,
        TypeTag::Bool,
        TypeTag::List,
        TypeTag::Dict,
        TypeTag::Tuple,
        TypeTag::DataFrame,
        TypeTag::Series,
        TypeTag::Any,
        TypeTag::Callable,
        TypeTag::Optional,
        TypeTag::Timestamp,
        TypeTag::Datetime,
        TypeTag::Date,
        TypeTag::Check,
        TypeTag::Exception(ExceptionKind::Exception),
        TypeTag::Exception(ExceptionKind::ValueError),
        TypeTag::Exception(ExceptionKind::TypeError),
        TypeTag::Exception(ExceptionKind::KeyError),
        TypeTag::Exception(ExceptionKind::RuntimeError),
    ] {
        names.insert(tag.name(), Value::Type(tag));
    }
    names
}

/// Resolve an importable module.
pub fn import(module: &str) -> Result<Value, RuntimeError> {
    let name = match module {
        "pandas" => "pandas",
        "pandera" => "pandera",
        "pandera.pandas" => "pandera.pandas",
        "typing" => "typing",
        "datetime" => "datetime",
        other => {
            return Err(RuntimeError::Import(format!(
                "No module named '{}'",
                other
            )))
        }
    };
    Ok(Value::Module(name))
}

/// A name exported by an importable module.
pub fn module_attr(module: &str, name: &str) -> Option<Value> {
    let value = match (module, name) {
        ("pandas", "DataFrame") => Value::Type(TypeTag::DataFrame),
        ("pandas", "Series") => Value::Type(TypeTag::Series),
        ("pandas", "Timestamp") => Value::Type(TypeTag::Timestamp),
        ("pandas", "concat") => builtin("concat", b_concat),
        ("pandas", "to_datetime") => builtin("to_datetime", b_to_datetime),
        ("pandas", "isna" | "isnull") => builtin("isna", b_isna),
        ("pandas", "notna" | "notnull") => builtin("notna", b_notna),
        ("pandas", "NA" | "NaT") => Value::None,
        ("pandera", "pandas") => Value::Module("pandera.pandas"),
        ("pandera" | "pandera.pandas", _) => pandera_attr(name)?,
        ("typing", "Any") => Value::Type(TypeTag::Any),
        ("typing", "Callable") => Value::Type(TypeTag::Callable),
        ("typing", "Optional") => Value::Type(TypeTag::Optional),
        ("typing", "Union") => Value::Type(TypeTag::Union),
        ("typing", "List") => Value::Type(TypeTag::List),
        ("typing", "Dict") => Value::Type(TypeTag::Dict),
        ("typing", "Tuple") => Value::Type(TypeTag::Tuple),
        ("datetime", "datetime") => Value::Type(TypeTag::Datetime),
        ("datetime", "date") => Value::Type(TypeTag::Date),
        _ => return None,
    };
    Some(value)
}

fn pandera_attr(name: &str) -> Option<Value> {
    let value = match name {
        "DataFrameSchema" => builtin("DataFrameSchema", b_dataframe_schema),
        "Column" => builtin("Column", b_column),
        "Check" => Value::Type(TypeTag::Check),
        "String" => Value::Dtype(DType::Str),
        "Int" | "Int64" => Value::Dtype(DType::Int64),
        "Float" | "Float64" => Value::Dtype(DType::Float64),
        "Bool" => Value::Dtype(DType::Bool),
        "Date" => Value::Dtype(DType::Date),
        "DateTime" | "Timestamp" => Value::Dtype(DType::Datetime),
        "Object" => Value::Dtype(DType::Object),
        _ => return None,
    };
    Some(value)
}

const STR_METHODS: &[&str] = &[
    "lower", "upper", "strip", "lstrip", "rstrip", "replace", "startswith", "endswith", "split",
    "join", "title", "isdigit", "format",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "clear", "sort", "reverse", "copy", "index",
    "count",
];
const LIST_MUTATORS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "clear", "sort", "reverse",
];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "copy", "update", "pop", "setdefault", "clear",
];
const DICT_MUTATORS: &[&str] = &["update", "pop", "setdefault", "clear"];
const DATE_METHODS: &[&str] = &["strftime", "isoformat", "date", "weekday"];

fn has_method(value: &Value, name: &str) -> bool {
    let methods: &[&str] = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Date(_) | Value::Datetime(_) => DATE_METHODS,
        Value::Table(_) => frame::TABLE_METHODS,
        Value::Series(_) => frame::SERIES_METHODS,
        Value::Accessor(a) => match a.as_ref() {
            Accessor::Str(_) => frame::STR_METHODS,
            Accessor::Dt(_) => frame::DT_METHODS,
            Accessor::Loc(_) => &[],
        },
        Value::Schema(_) => &["validate"],
        _ => &[],
    };
    methods.contains(&name)
}

/// `value.name`
pub fn get_attr(value: Value, name: &str) -> Result<Value, RuntimeError> {
    let missing = |value: &Value| {
        RuntimeError::Attribute(format!(
            "'{}' object has no attribute '{}'",
            value.type_name(),
            name
        ))
    };
    if let Some(found) = frame::attribute(&value, name)? {
        return Ok(found);
    }
    if has_method(&value, name) {
        return Ok(Value::Method {
            receiver: Box::new(value),
            name: name.to_string(),
        });
    }
    match &value {
        Value::Module(module) => module_attr(module, name).ok_or_else(|| {
            RuntimeError::Attribute(format!("module '{}' has no attribute '{}'", module, name))
        }),
        Value::Type(tag) => type_attr(*tag, name).ok_or_else(|| {
            RuntimeError::Attribute(format!(
                "type object '{}' has no attribute '{}'",
                tag.name(),
                name
            ))
        }),
        Value::Date(d) => date_field(d.year(), d.month(), d.day(), None, name).ok_or_else(|| missing(&value)),
        Value::Datetime(dt) => {
            date_field(dt.year(), dt.month(), dt.day(), Some(*dt), name).ok_or_else(|| missing(&value))
        }
        Value::Schema(schema) => schema_attr(schema, name).ok_or_else(|| missing(&value)),
        Value::Column(column) => column_attr(column, name).ok_or_else(|| missing(&value)),
        Value::Exception { message, .. } if name == "args" => {
            Ok(Value::Tuple(vec![Value::Str(message.clone())]))
        }
        _ => Err(missing(&value)),
    }
}

fn date_field(year: i32, month: u32, day: u32, time: Option<NaiveDateTime>, name: &str) -> Option<Value> {
    let v = match name {
        "year" => i64::from(year),
        "month" => i64::from(month),
        "day" => i64::from(day),
        "hour" => i64::from(time?.hour()),
        "minute" => i64::from(time?.minute()),
        "second" => i64::from(time?.second()),
        _ => return None,
    };
    Some(Value::Int(v))
}

fn type_attr(tag: TypeTag, name: &str) -> Option<Value> {
    let value = match (tag, name) {
        (TypeTag::Datetime | TypeTag::Timestamp, "now") => builtin("now", dt_now),
        (TypeTag::Datetime, "today") => builtin("today", dt_now),
        (TypeTag::Datetime, "strptime") => builtin("strptime", dt_strptime),
        (TypeTag::Datetime | TypeTag::Date, "fromisoformat") => builtin("fromisoformat", dt_fromisoformat),
        (TypeTag::Date, "today") => builtin("today", date_today),
        (TypeTag::Check, _) => check_constructor(name)?,
        _ => return None,
    };
    Some(value)
}

fn schema_attr(schema: &TableSchema, name: &str) -> Option<Value> {
    let opt = |s: &Option<String>| s.clone().map_or(Value::None, Value::Str);
    let value = match name {
        "columns" => Value::Dict(
            schema
                .columns
                .iter()
                .map(|c| (Value::str(&c.name), Value::Column(Rc::new(c.clone()))))
                .collect(),
        ),
        "name" => opt(&schema.name),
        "title" => opt(&schema.title),
        "description" => opt(&schema.description),
        "coerce" => Value::Bool(schema.coerce),
        "ordered" => Value::Bool(schema.ordered),
        "strict" => match schema.strict {
            Strictness::Allow => Value::Bool(false),
            Strictness::Reject => Value::Bool(true),
            Strictness::Filter => Value::str("filter"),
        },
        "unique" => match schema.unique.as_slice() {
            [] => Value::None,
            names => Value::List(names.iter().map(Value::str).collect()),
        },
        _ => return None,
    };
    Some(value)
}

fn column_attr(column: &ColumnSchema, name: &str) -> Option<Value> {
    let value = match name {
        "name" => Value::str(&column.name),
        "dtype" => column.dtype.map_or(Value::None, Value::Dtype),
        "nullable" => Value::Bool(column.nullable),
        "unique" => Value::Bool(column.unique),
        "coerce" => Value::Bool(column.coerce),
        "required" => Value::Bool(column.required),
        "checks" => Value::List(
            column
                .checks
                .iter()
                .map(|c| Value::Check(Rc::new(c.clone())))
                .collect(),
        ),
        "title" => column.title.clone().map_or(Value::None, Value::Str),
        "description" => column.description.clone().map_or(Value::None, Value::Str),
        _ => return None,
    };
    Some(value)
}

/// Whether `receiver.name(args)` updates the receiver, which the caller then
/// rebinds.
pub fn mutates(receiver: &Value, name: &str, args: &Args) -> bool {
    match receiver {
        Value::List(_) => LIST_MUTATORS.contains(&name),
        Value::Dict(_) => DICT_MUTATORS.contains(&name),
        Value::Table(_) | Value::Series(_) => args
            .keywords
            .iter()
            .any(|(k, v)| k == "inplace" && matches!(v, Value::Bool(true))),
        _ => false,
    }
}

/// Run an updating method. Returns the updated receiver and the call result.
pub fn call_mutating(
    interp: &mut Interpreter,
    receiver: Value,
    name: &str,
    mut args: Args,
) -> Result<(Value, Value), RuntimeError> {
    match receiver {
        Value::List(mut items) => {
            let result = list_mutate(interp, &mut items, name, args)?;
            Ok((Value::List(items), result))
        }
        Value::Dict(mut pairs) => {
            let result = dict_mutate(&mut pairs, name, args)?;
            Ok((Value::Dict(pairs), result))
        }
        receiver @ (Value::Table(_) | Value::Series(_)) => {
            args.keyword("inplace");
            let updated = call_method(interp, &receiver, name, args)?;
            Ok((updated, Value::None))
        }
        other => Err(type_error(format!(
            "'{}' object has no in-place method '{}'",
            other.type_name(),
            name
        ))),
    }
}

fn list_mutate(interp: &mut Interpreter, items: &mut Vec<Value>, name: &str, mut args: Args) -> Result<Value, RuntimeError> {
    let func = format!("list.{}", name);
    let result = match name {
        "append" => {
            items.push(args.required(&func, "object")?);
            Value::None
        }
        "extend" => {
            let more = args.required(&func, "iterable")?;
            items.extend(interp.iterate(&more)?);
            Value::None
        }
        "insert" => {
            let at = args.required(&func, "index")?.expect_int("index")?;
            let value = args.required(&func, "object")?;
            let len = items.len() as i64;
            let at = if at < 0 { (at + len).max(0) } else { at.min(len) };
            items.insert(at as usize, value);
            Value::None
        }
        "pop" => {
            let at = match args.next("index") {
                Some(v) => v.expect_int("index")?,
                None => -1,
            };
            let i = super::interp::normalize_index(at, items.len())
                .ok_or_else(|| RuntimeError::Index("pop index out of range".into()))?;
            items.remove(i)
        }
        "remove" => {
            let target = args.required(&func, "value")?;
            let i = items
                .iter()
                .position(|v| v.py_eq(&target))
                .ok_or_else(|| RuntimeError::Value("list.remove(x): x not in list".into()))?;
            items.remove(i);
            Value::None
        }
        "clear" => {
            items.clear();
            Value::None
        }
        "sort" => {
            let key = args.keyword("key");
            let reverse = args.flag("reverse", false)?;
            *items = sort_values(interp, std::mem::take(items), key, reverse)?;
            Value::None
        }
        "reverse" => {
            items.reverse();
            Value::None
        }
        other => return Err(type_error(format!("unknown list method '{}'", other))),
    };
    args.done(&func)?;
    Ok(result)
}

fn dict_mutate(pairs: &mut Vec<(Value, Value)>, name: &str, mut args: Args) -> Result<Value, RuntimeError> {
    let func = format!("dict.{}", name);
    let result = match name {
        "update" => {
            if let Some(other) = args.next("other") {
                match other {
                    Value::Dict(more) => {
                        for (k, v) in more {
                            dict_insert(pairs, k, v);
                        }
                    }
                    other => {
                        return Err(type_error(format!(
                            "'{}' object is not a mapping",
                            other.type_name()
                        )))
                    }
                }
            }
            for (k, v) in std::mem::take(&mut args.keywords) {
                dict_insert(pairs, Value::Str(k), v);
            }
            Value::None
        }
        "pop" => {
            let key = args.required(&func, "key")?;
            let default = args.next("default");
            match pairs.iter().position(|(k, _)| k.py_eq(&key)) {
                Some(i) => pairs.remove(i).1,
                None => default.ok_or_else(|| RuntimeError::Key(key.repr()))?,
            }
        }
        "setdefault" => {
            let key = args.required(&func, "key")?;
            let default = args.next("default").unwrap_or(Value::None);
            match pairs.iter().find(|(k, _)| k.py_eq(&key)) {
                Some((_, v)) => v.clone(),
                None => {
                    pairs.push((key, default.clone()));
                    default
                }
            }
        }
        "clear" => {
            pairs.clear();
            Value::None
        }
        other => return Err(type_error(format!("unknown dict method '{}'", other))),
    };
    args.done(&func)?;
    Ok(result)
}

/// `receiver.name(args)` for methods that do not update the receiver.
pub fn call_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: Args) -> Result<Value, RuntimeError> {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args),
        Value::List(items) => match name {
            "copy" => {
                args.done("list.copy")?;
                Ok(Value::List(items.clone()))
            }
            "index" | "count" => {
                let mut args = args;
                let target = args.required(name, "value")?;
                args.done(name)?;
                if name == "count" {
                    return Ok(Value::Int(items.iter().filter(|v| v.py_eq(&target)).count() as i64));
                }
                items
                    .iter()
                    .position(|v| v.py_eq(&target))
                    .map(|i| Value::Int(i as i64))
                    .ok_or_else(|| RuntimeError::Value(format!("{} is not in list", target.repr())))
            }
            _ => Err(type_error(format!(
                "list.{}() updates the list in place and needs a named receiver",
                name
            ))),
        },
        Value::Dict(pairs) => dict_method(pairs, name, args),
        Value::Date(_) | Value::Datetime(_) => date_method(receiver, name, args),
        Value::Table(table) => frame::table_method(interp, table, name, args),
        Value::Series(series) => frame::series_method(interp, series, name, args),
        Value::Accessor(accessor) => match accessor.as_ref() {
            Accessor::Str(series) => frame::str_method(series, name, args),
            Accessor::Dt(series) => frame::dt_method(series, name, args),
            Accessor::Loc(_) => Err(type_error("'_LocIndexer' object is not callable")),
        },
        Value::Schema(schema) if name == "validate" => {
            let mut args = args;
            let table = match args.required("validate", "check_obj")? {
                Value::Table(t) => t,
                other => {
                    return Err(type_error(format!(
                        "validate() expects a DataFrame, not '{}'",
                        other.type_name()
                    )))
                }
            };
            args.keyword("lazy");
            args.done("validate")?;
            Ok(Value::Table(schema::validate(&table, schema)?))
        }
        other => Err(RuntimeError::Attribute(format!(
            "'{}' object has no attribute '{}'",
            other.type_name(),
            name
        ))),
    }
}

fn str_method(interp: &mut Interpreter, s: &str, name: &str, mut args: Args) -> Result<Value, RuntimeError> {
    let func = format!("str.{}", name);
    let result = match name {
        "lower" => Value::str(s.to_lowercase()),
        "upper" => Value::str(s.to_uppercase()),
        "title" => Value::str(title_case(s)),
        "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        "strip" | "lstrip" | "rstrip" => {
            let chars = args.option("chars");
            let set: Option<Vec<char>> = match &chars {
                Some(v) => Some(v.expect_str("chars")?.chars().collect()),
                None => None,
            };
            let pred = |c: char| match &set {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            Value::str(match name {
                "strip" => s.trim_matches(pred),
                "lstrip" => s.trim_start_matches(pred),
                _ => s.trim_end_matches(pred),
            })
        }
        "replace" => {
            let old = args.required(&func, "old")?;
            let new = args.required(&func, "new")?;
            Value::str(s.replace(old.expect_str("old")?, new.expect_str("new")?))
        }
        "startswith" | "endswith" => {
            let affix = args.required(&func, "prefix")?;
            let candidates = match &affix {
                Value::Tuple(items) => items.clone(),
                other => vec![other.clone()],
            };
            let mut hit = false;
            for c in &candidates {
                let c = c.expect_str(&func)?;
                hit |= if name == "startswith" {
                    s.starts_with(c)
                } else {
                    s.ends_with(c)
                };
            }
            Value::Bool(hit)
        }
        "split" => {
            let sep = args.option("sep");
            let parts: Vec<Value> = match &sep {
                Some(sep) => s.split(sep.expect_str("sep")?).map(Value::str).collect(),
                None => s.split_whitespace().map(Value::str).collect(),
            };
            Value::List(parts)
        }
        "join" => {
            let iterable = args.required(&func, "iterable")?;
            let mut parts = Vec::new();
            for item in interp.iterate(&iterable)? {
                parts.push(item.expect_str("sequence item")?.to_string());
            }
            Value::str(parts.join(s))
        }
        "format" => {
            let mut out = String::new();
            let mut positional = args.rest().into_iter();
            let mut rest = s;
            while let Some(open) = rest.find('{') {
                out.push_str(&rest[..open]);
                let close = rest[open..]
                    .find('}')
                    .ok_or_else(|| RuntimeError::Value("Single '{' encountered in format string".into()))?;
                let field = &rest[open + 1..open + close];
                let value = if field.is_empty() {
                    positional.next()
                } else {
                    args.keyword(field)
                };
                let value = value.ok_or_else(|| RuntimeError::Index(format!("missing format argument '{}'", field)))?;
                out.push_str(&value.to_string());
                rest = &rest[open + close + 1..];
            }
            out.push_str(rest);
            args.keywords.clear();
            Value::str(out)
        }
        other => return Err(type_error(format!("unknown str method '{}'", other))),
    };
    args.done(&func)?;
    Ok(result)
}

fn title_case(s: &str) -> String {
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
}

fn dict_method(pairs: &[(Value, Value)], name: &str, mut args: Args) -> Result<Value, RuntimeError> {
    let func = format!("dict.{}", name);
    let result = match name {
        "get" => {
            let key = args.required(&func, "key")?;
            let default = args.next("default").unwrap_or(Value::None);
            pairs
                .iter()
                .find(|(k, _)| k.py_eq(&key))
                .map_or(default, |(_, v)| v.clone())
        }
        "keys" => Value::List(pairs.iter().map(|(k, _)| k.clone()).collect()),
        "values" => Value::List(pairs.iter().map(|(_, v)| v.clone()).collect()),
        "items" => Value::List(
            pairs
                .iter()
                .map(|(k, v)| Value::Tuple(vec![k.clone(), v.clone()]))
                .collect(),
        ),
        "copy" => Value::Dict(pairs.to_vec()),
        other => {
            return Err(type_error(format!(
                "dict.{}() updates the dict in place and needs a named receiver",
                other
            )))
        }
    };
    args.done(&func)?;
    Ok(result)
}

fn date_method(receiver: &Value, name: &str, mut args: Args) -> Result<Value, RuntimeError> {
    let func = format!("datetime.{}", name);
    let dt = match receiver {
        Value::Date(d) => d.and_hms_opt(0, 0, 0),
        Value::Datetime(dt) => Some(*dt),
        _ => None,
    }
    .ok_or_else(|| type_error("expected a date"))?;
    let result = match name {
        "strftime" => {
            let fmt = args.required(&func, "format")?;
            Value::str(dt.format(fmt.expect_str("format")?).to_string())
        }
        "isoformat" => match receiver {
            Value::Date(d) => Value::str(d.format("%Y-%m-%d").to_string()),
            _ => Value::str(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
        },
        "date" => Value::Date(dt.date()),
        "weekday" => Value::Int(i64::from(dt.weekday().num_days_from_monday())),
        other => return Err(type_error(format!("unknown datetime method '{}'", other))),
    };
    args.done(&func)?;
    Ok(result)
}

/// Sort with the language's ordering; incomparable items are an error.
pub fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> Result<Vec<Value>, RuntimeError> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let k = match &key {
            Some(Value::None) | None => item.clone(),
            Some(f) => interp.call(f, Args::new(vec![item.clone()]))?,
        };
        keyed.push((k, item));
    }
    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| match a.py_cmp(b) {
        Some(o) => o,
        None => {
            failure.get_or_insert_with(|| {
                type_error(format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    a.type_name(),
                    b.type_name()
                ))
            });
            Ordering::Equal
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    if reverse {
        keyed.reverse();
    }
    Ok(keyed.into_iter().map(|(_, v)| v).collect())
}

/// `Type(args)`
pub fn construct(interp: &mut Interpreter, tag: TypeTag, mut args: Args) -> Result<Value, RuntimeError> {
    let func = tag.name();
    let value = match tag {
        TypeTag::Int => match args.next("x") {
            None => Value::Int(0),
            Some(Value::Float(f)) if f.is_finite() => Value::Int(f.trunc() as i64),
            Some(Value::Str(s)) => s.trim().parse().map(Value::Int).map_err(|_| {
                RuntimeError::Value(format!("invalid literal for int() with base 10: {}", Value::Str(s.clone()).repr()))
            })?,
            Some(v) => Value::Int(v.as_int().ok_or_else(|| {
                type_error(format!("int() argument must be a string or a number, not '{}'", v.type_name()))
            })?),
        },
        TypeTag::Float => match args.next("x") {
            None => Value::Float(0.0),
            Some(Value::Str(s)) => {
                let t = s.trim().to_ascii_lowercase();
                let parsed = match t.as_str() {
                    "nan" => Some(f64::NAN),
                    "inf" | "infinity" => Some(f64::INFINITY),
                    "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                    _ => t.parse().ok(),
                };
                Value::Float(parsed.ok_or_else(|| {
                    RuntimeError::Value(format!("could not convert string to float: {}", Value::Str(s.clone()).repr()))
                })?)
            }
            Some(v) => Value::Float(v.as_f64().ok_or_else(|| {
                type_error(format!("float() argument must be a string or a number, not '{}'", v.type_name()))
            })?),
        },
        TypeTag::Str => Value::Str(args.next("object").map_or(String::new(), |v| v.to_string())),
        TypeTag::Bool => Value::Bool(match args.next("x") {
            Some(v) => v.truthy()?,
            None => false,
        }),
        TypeTag::List | TypeTag::Tuple => {
            let items = match args.next("iterable") {
                Some(v) => interp.iterate(&v)?,
                None => Vec::new(),
            };
            if tag == TypeTag::List {
                Value::List(items)
            } else {
                Value::Tuple(items)
            }
        }
        TypeTag::Dict => {
            let mut pairs = Vec::new();
            if let Some(source) = args.next("mapping") {
                match source {
                    Value::Dict(more) => pairs = more,
                    other => {
                        for item in interp.iterate(&other)? {
                            match interp.iterate(&item)?.as_slice() {
                                [k, v] => dict_insert(&mut pairs, k.clone(), v.clone()),
                                _ => {
                                    return Err(RuntimeError::Value(
                                        "dictionary update sequence element has wrong length".into(),
                                    ))
                                }
                            }
                        }
                    }
                }
            }
            for (k, v) in std::mem::take(&mut args.keywords) {
                dict_insert(&mut pairs, Value::Str(k), v);
            }
            Value::Dict(pairs)
        }
        TypeTag::DataFrame => return frame::new_table(interp, args),
        TypeTag::Series => return frame::new_series(interp, args),
        TypeTag::Date => {
            let y = args.required(func, "year")?.expect_int("year")?;
            let m = args.required(func, "month")?.expect_int("month")?;
            let d = args.required(func, "day")?.expect_int("day")?;
            Value::Date(ymd(y, m, d)?)
        }
        TypeTag::Datetime => {
            let y = args.required(func, "year")?.expect_int("year")?;
            let m = args.required(func, "month")?.expect_int("month")?;
            let d = args.required(func, "day")?.expect_int("day")?;
            let mut time = [0u32; 3];
            for (slot, name) in time.iter_mut().zip(["hour", "minute", "second"]) {
                if let Some(v) = args.next(name) {
                    *slot = u32::try_from(v.expect_int(name)?)
                        .map_err(|_| RuntimeError::Value(format!("{} out of range", name)))?;
                }
            }
            let date = ymd(y, m, d)?;
            Value::Datetime(
                date.and_hms_opt(time[0], time[1], time[2])
                    .ok_or_else(|| RuntimeError::Value("time out of range".into()))?,
            )
        }
        TypeTag::Timestamp => match args.required(func, "ts_input")? {
            Value::Str(s) => Value::Datetime(parse_datetime(&s).ok_or_else(|| {
                RuntimeError::Value(format!("could not convert string to Timestamp: '{}'", s))
            })?),
            Value::Datetime(dt) => Value::Datetime(dt),
            Value::Date(d) => Value::Datetime(d.and_hms_opt(0, 0, 0).unwrap_or_default()),
            other => {
                return Err(type_error(format!(
                    "cannot convert '{}' to Timestamp",
                    other.type_name()
                )))
            }
        },
        TypeTag::Exception(kind) => {
            let parts: Vec<String> = args.rest().iter().map(Value::to_string).collect();
            Value::Exception {
                kind,
                message: parts.join(", "),
            }
        }
        TypeTag::Check => {
            return Err(type_error(
                "custom Check functions are not supported; use a built-in check such as Check.isin",
            ))
        }
        TypeTag::Any | TypeTag::Callable | TypeTag::Optional | TypeTag::Union => {
            return Err(type_error(format!("cannot instantiate {}", tag.name())))
        }
    };
    args.done(func)?;
    Ok(value)
}

fn ymd(y: i64, m: i64, d: i64) -> Result<NaiveDate, RuntimeError> {
    i32::try_from(y)
        .ok()
        .zip(u32::try_from(m).ok())
        .zip(u32::try_from(d).ok())
        .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y, m, d))
        .ok_or_else(|| RuntimeError::Value(format!("day is out of range for month: {}-{}-{}", y, m, d)))
}

fn dt_now(_: &mut Interpreter, args: Args) -> Result<Value, RuntimeError> {
    args.done("now")?;
    Ok(Value::Datetime(Local::now().naive_local()))
}

fn date_today(_: &mut Interpreter, args: Args) -> Result<Value, RuntimeError> {
    args.done("today")?;
    Ok(Value::Date(Local::now().date_naive()))
}

fn dt_strptime(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let text = args.required("strptime", "date_string")?;
    let fmt = args.required("strptime", "format")?;
    args.done("strptime")?;
    let (text, fmt) = (text.expect_str("date_string")?, fmt.expect_str("format")?);
    crate::table::dates::parse_with_format(text, fmt)
        .map(Value::Datetime)
        .ok_or_else(|| {
            RuntimeError::Value(format!("time data '{}' does not match format '{}'", text, fmt))
        })
}

fn dt_fromisoformat(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let text = args.required("fromisoformat", "date_string")?;
    args.done("fromisoformat")?;
    let text = text.expect_str("date_string")?;
    parse_datetime(text)
        .map(Value::Datetime)
        .ok_or_else(|| RuntimeError::Value(format!("Invalid isoformat string: '{}'", text)))
}

fn b_print(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let sep = match args.keyword("sep") {
        Some(Value::None) | None => " ".to_string(),
        Some(v) => v.expect_str("sep")?.to_string(),
    };
    let end = match args.keyword("end") {
        Some(Value::None) | None => "\n".to_string(),
        Some(v) => v.expect_str("end")?.to_string(),
    };
    let parts: Vec<String> = args.rest().iter().map(Value::to_string).collect();
    args.done("print")?;
    let mut line = parts.join(&sep);
    if let Some(extra) = end.strip_suffix('\n') {
        line.push_str(extra);
    } else {
        line.push_str(&end);
    }
    interp.print(line);
    Ok(Value::None)
}

fn b_len(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let v = args.required("len", "obj")?;
    args.done("len")?;
    let n = match &v {
        Value::Str(s) => s.chars().count(),
        Value::List(items) | Value::Tuple(items) => items.len(),
        Value::Dict(pairs) => pairs.len(),
        Value::Table(t) => t.num_rows(),
        Value::Series(s) => s.len(),
        other => {
            return Err(type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(n as i64))
}

fn b_range(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let bounds: Vec<i64> = args
        .rest()
        .iter()
        .map(|v| v.expect_int("range() argument"))
        .collect::<Result<_, _>>()?;
    args.done("range")?;
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(type_error("range expected 1 to 3 integer arguments")),
    };
    if step == 0 {
        return Err(RuntimeError::Value("range() arg 3 must not be zero".into()));
    }
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(Value::Int(i));
        i += step;
    }
    Ok(Value::List(out))
}

fn extreme(interp: &mut Interpreter, mut args: Args, func: &str, want: Ordering) -> Result<Value, RuntimeError> {
    let key = args.keyword("key");
    let default = args.keyword("default");
    let positional = args.rest();
    args.done(func)?;
    let items = match positional.as_slice() {
        [single] => interp.iterate(single)?,
        _ => positional,
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(f) => interp.call(f, Args::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => {
                let ord = k.py_cmp(best_key).ok_or_else(|| {
                    type_error(format!(
                        "'{}' not supported between instances of '{}' and '{}'",
                        if want == Ordering::Less { "<" } else { ">" },
                        k.type_name(),
                        best_key.type_name()
                    ))
                })?;
                ord == want
            }
        };
        if replace {
            best = Some((k, item));
        }
    }
    match (best, default) {
        (Some((_, v)), _) => Ok(v),
        (None, Some(d)) => Ok(d),
        (None, None) => Err(RuntimeError::Value(format!(
            "{}() arg is an empty sequence",
            func
        ))),
    }
}

fn b_min(interp: &mut Interpreter, args: Args) -> Result<Value, RuntimeError> {
    extreme(interp, args, "min", Ordering::Less)
}

fn b_max(interp: &mut Interpreter, args: Args) -> Result<Value, RuntimeError> {
    extreme(interp, args, "max", Ordering::Greater)
}

fn b_sum(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let iterable = args.required("sum", "iterable")?;
    let start = args.next("start").unwrap_or(Value::Int(0));
    args.done("sum")?;
    if let Value::Series(s) = &iterable {
        return frame::series_method(interp, s, "sum", Args::default());
    }
    interp
        .iterate(&iterable)?
        .iter()
        .try_fold(start, |acc, v| scalar_binary(BinOp::Add, &acc, v))
}

fn b_sorted(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let iterable = args.required("sorted", "iterable")?;
    let key = args.keyword("key");
    let reverse = args.flag("reverse", false)?;
    args.done("sorted")?;
    let items = interp.iterate(&iterable)?;
    Ok(Value::List(sort_values(interp, items, key, reverse)?))
}

fn b_enumerate(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let iterable = args.required("enumerate", "iterable")?;
    let start = match args.next("start") {
        Some(v) => v.expect_int("start")?,
        None => 0,
    };
    args.done("enumerate")?;
    Ok(Value::List(
        interp
            .iterate(&iterable)?
            .into_iter()
            .zip(start..)
            .map(|(v, i)| Value::Tuple(vec![Value::Int(i), v]))
            .collect(),
    ))
}

fn b_zip(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let sources = args.rest();
    args.keyword("strict");
    args.done("zip")?;
    let columns: Vec<Vec<Value>> = sources
        .iter()
        .map(|s| interp.iterate(s))
        .collect::<Result<_, _>>()?;
    let n = columns.iter().map(Vec::len).min().unwrap_or(0);
    Ok(Value::List(
        (0..n)
            .map(|i| Value::Tuple(columns.iter().map(|c| c[i].clone()).collect()))
            .collect(),
    ))
}

fn b_abs(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let v = args.required("abs", "x")?;
    args.done("abs")?;
    match v {
        Value::Int(i) => Ok(Value::Int(i.abs())),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Series(s) => frame::series_method(interp, &s, "abs", Args::default()),
        other => Err(type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

pub fn round_half_even(f: f64, digits: i64) -> f64 {
    let scale = 10f64.powi(digits.clamp(-300, 300) as i32);
    (f * scale).round_ties_even() / scale
}

fn b_round(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let v = args.required("round", "number")?;
    let digits = args.option("ndigits");
    args.done("round")?;
    match (v, digits) {
        (Value::Series(s), digits) => {
            let args = Args::new(digits.into_iter().collect());
            frame::series_method(interp, &s, "round", args)
        }
        (Value::Float(f), None) => Ok(Value::Int(f.round_ties_even() as i64)),
        (Value::Float(f), Some(d)) => Ok(Value::Float(round_half_even(f, d.expect_int("ndigits")?))),
        (v @ (Value::Int(_) | Value::Bool(_)), _) => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (other, _) => Err(type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn is_instance(value: &Value, tag: TypeTag) -> bool {
    match tag {
        TypeTag::Any => true,
        TypeTag::Int => matches!(value, Value::Int(_) | Value::Bool(_)),
        TypeTag::Float => matches!(value, Value::Float(_)),
        TypeTag::Str => matches!(value, Value::Str(_)),
        TypeTag::Bool => matches!(value, Value::Bool(_)),
        TypeTag::List => matches!(value, Value::List(_)),
        TypeTag::Dict => matches!(value, Value::Dict(_)),
        TypeTag::Tuple => matches!(value, Value::Tuple(_)),
        TypeTag::DataFrame => matches!(value, Value::Table(_)),
        TypeTag::Series => matches!(value, Value::Series(_)),
        TypeTag::Date => matches!(value, Value::Date(_) | Value::Datetime(_)),
        TypeTag::Datetime | TypeTag::Timestamp => matches!(value, Value::Datetime(_)),
        TypeTag::Check => matches!(value, Value::Check(_)),
        TypeTag::Callable => matches!(
            value,
            Value::Function(_) | Value::Builtin(_) | Value::Method { .. } | Value::Type(_)
        ),
        TypeTag::Exception(kind) => match value {
            Value::Exception { kind: k, .. } => kind == ExceptionKind::Exception || *k == kind,
            _ => false,
        },
        TypeTag::Optional | TypeTag::Union => false,
    }
}

fn b_isinstance(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let value = args.required("isinstance", "obj")?;
    let class = args.required("isinstance", "class_or_tuple")?;
    args.done("isinstance")?;
    let tags = match class {
        Value::Type(tag) => vec![tag],
        Value::Tuple(items) => items
            .into_iter()
            .map(|v| match v {
                Value::Type(tag) => Ok(tag),
                other => Err(other),
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|other| {
                type_error(format!(
                    "isinstance() arg 2 must be a type or tuple of types, not '{}'",
                    other.type_name()
                ))
            })?,
        other => {
            return Err(type_error(format!(
                "isinstance() arg 2 must be a type or tuple of types, not '{}'",
                other.type_name()
            )))
        }
    };
    Ok(Value::Bool(tags.into_iter().any(|t| is_instance(&value, t))))
}

fn b_any(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let iterable = args.required("any", "iterable")?;
    args.done("any")?;
    for v in interp.iterate(&iterable)? {
        if v.truthy()? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn b_all(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let iterable = args.required("all", "iterable")?;
    args.done("all")?;
    for v in interp.iterate(&iterable)? {
        if !v.truthy()? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn b_repr(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let v = args.required("repr", "obj")?;
    args.done("repr")?;
    Ok(Value::Str(v.repr()))
}

fn b_concat(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let objs = args.required("concat", "objs")?;
    if let Some(axis) = args.keyword("axis") {
        if !matches!(axis, Value::Int(0)) && !matches!(&axis, Value::Str(s) if s == "index") {
            return Err(RuntimeError::Value("only row-wise concat (axis=0) is supported".into()));
        }
    }
    args.keyword("ignore_index");
    args.keyword("sort");
    args.done("concat")?;
    let items = interp.iterate(&objs)?;
    frame::concat(items)
}

fn b_to_datetime(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let arg = args.required("to_datetime", "arg")?;
    let format = match args.option("format") {
        Some(v) => Some(v.expect_str("format")?.to_string()),
        None => None,
    };
    let coerce = match args.keyword("errors") {
        Some(v) => v.expect_str("errors")? == "coerce",
        None => false,
    };
    args.keyword("dayfirst");
    args.done("to_datetime")?;
    frame::to_datetime(arg, format.as_deref(), coerce)
}

fn b_isna(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let v = args.required("isna", "obj")?;
    args.done("isna")?;
    frame::is_na(&v, false)
}

fn b_notna(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let v = args.required("notna", "obj")?;
    args.done("notna")?;
    frame::is_na(&v, true)
}

pub fn dtype_of(value: &Value) -> Result<Option<DType>, RuntimeError> {
    match value {
        Value::None => Ok(None),
        Value::Dtype(d) => Ok(Some(*d)),
        Value::Type(tag) => tag
            .dtype()
            .map(Some)
            .ok_or_else(|| type_error(format!("'{}' is not a column dtype", tag.name()))),
        Value::Str(s) => DType::parse(s)
            .map(Some)
            .ok_or_else(|| type_error(format!("data type '{}' not understood", s))),
        other => Err(type_error(format!(
            "data type '{}' not understood",
            other.type_name()
        ))),
    }
}

fn opt_string(value: Option<Value>, what: &str) -> Result<Option<String>, RuntimeError> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(v) => Ok(Some(v.expect_str(what)?.to_string())),
    }
}

/// `Column(dtype, checks, nullable, unique, coerce, required, ...)`
fn b_column(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let mut column = ColumnSchema::new("");
    column.dtype = match args.next("dtype") {
        Some(v) => dtype_of(&v)?,
        None => None,
    };
    column.checks = match args.next("checks") {
        None | Some(Value::None) => Vec::new(),
        Some(Value::Check(c)) => vec![(*c).clone()],
        Some(Value::List(items)) => items
            .into_iter()
            .map(|v| match v {
                Value::Check(c) => Ok((*c).clone()),
                other => Err(type_error(format!(
                    "checks must be Check objects, not '{}'",
                    other.type_name()
                ))),
            })
            .collect::<Result<_, _>>()?,
        Some(other) => {
            return Err(type_error(format!(
                "checks must be a Check or a list of Checks, not '{}'",
                other.type_name()
            )))
        }
    };
    column.nullable = args.flag("nullable", false)?;
    column.unique = args.flag("unique", false)?;
    column.coerce = args.flag("coerce", false)?;
    column.required = args.flag("required", true)?;
    if args.flag("regex", false)? {
        return Err(type_error("regex column selectors are not supported"));
    }
    if let Some(name) = opt_string(args.keyword("name"), "name")? {
        column.name = name;
    }
    column.title = opt_string(args.keyword("title"), "title")?;
    column.description = opt_string(args.keyword("description"), "description")?;
    for ignored in ["metadata", "drop_invalid_rows", "report_duplicates", "default"] {
        args.keyword(ignored);
    }
    args.done("Column")?;
    Ok(Value::Column(Rc::new(column)))
}

/// `DataFrameSchema(columns, strict, ordered, coerce, unique, ...)`
fn b_dataframe_schema(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let mut schema = TableSchema::default();
    match args.next("columns") {
        None | Some(Value::None) => {}
        Some(Value::Dict(pairs)) => {
            for (key, value) in pairs {
                let name = key.expect_str("column name")?.to_string();
                let mut column = match value {
                    Value::Column(c) => (*c).clone(),
                    other => {
                        return Err(type_error(format!(
                            "column '{}' must be a Column, not '{}'",
                            name,
                            other.type_name()
                        )))
                    }
                };
                column.name = name;
                schema.columns.push(column);
            }
        }
        Some(other) => {
            return Err(type_error(format!(
                "columns must be a dict of Column objects, not '{}'",
                other.type_name()
            )))
        }
    }
    match args.keyword("checks") {
        None | Some(Value::None) => {}
        Some(Value::List(items)) if items.is_empty() => {}
        Some(_) => return Err(type_error("dataframe-level checks are not supported")),
    }
    schema.coerce = args.flag("coerce", false)?;
    schema.strict = match args.keyword("strict") {
        None => Strictness::Allow,
        Some(Value::Str(s)) if s == "filter" => Strictness::Filter,
        Some(Value::Str(s)) => {
            return Err(RuntimeError::Value(format!(
                "strict must be True, False or 'filter', not '{}'",
                s
            )))
        }
        Some(v) if v.truthy()? => Strictness::Reject,
        Some(_) => Strictness::Allow,
    };
    schema.ordered = args.flag("ordered", false)?;
    schema.unique = match args.keyword("unique") {
        None | Some(Value::None) => Vec::new(),
        Some(v) => v.expect_names("unique")?,
    };
    schema.add_missing_columns = args.flag("add_missing_columns", false)?;
    schema.name = opt_string(args.keyword("name"), "name")?;
    schema.title = opt_string(args.keyword("title"), "title")?;
    schema.description = opt_string(args.keyword("description"), "description")?;
    for ignored in [
        "index",
        "dtype",
        "metadata",
        "drop_invalid_rows",
        "report_duplicates",
        "unique_column_names",
    ] {
        args.keyword(ignored);
    }
    args.done("DataFrameSchema")?;
    Ok(Value::Schema(Rc::new(schema)))
}

fn check_constructor(name: &str) -> Option<Value> {
    let func: BuiltinFn = match name {
        "eq" | "equal_to" => check_equal,
        "ne" | "not_equal_to" => check_not_equal,
        "gt" | "greater_than" => check_greater,
        "ge" | "greater_than_or_equal_to" => check_greater_equal,
        "lt" | "less_than" => check_less,
        "le" | "less_than_or_equal_to" => check_less_equal,
        "in_range" | "between" => check_in_range,
        "isin" => check_isin,
        "notin" => check_notin,
        "str_matches" => check_str_matches,
        "str_contains" => check_str_contains,
        "str_startswith" => check_str_startswith,
        "str_endswith" => check_str_endswith,
        "str_length" => check_str_length,
        _ => return None,
    };
    Some(Value::Builtin(Builtin {
        name: "Check",
        func,
    }))
}

fn cell_arg(args: &mut Args, func: &str, name: &str) -> Result<Cell, RuntimeError> {
    let v = args.required(func, name)?;
    v.to_cell()
        .ok_or_else(|| type_error(format!("{}() expects a scalar, not '{}'", func, v.type_name())))
}

fn cells_arg(interp: &mut Interpreter, args: &mut Args, func: &str) -> Result<Vec<Cell>, RuntimeError> {
    let values = args.required(func, "allowed_values")?;
    interp
        .iterate(&values)?
        .iter()
        .map(|v| {
            v.to_cell()
                .ok_or_else(|| type_error(format!("{}() values must be scalars", func)))
        })
        .collect()
}

fn regex_arg(args: &mut Args, func: &str) -> Result<Regex, RuntimeError> {
    let pattern = args.required(func, "pattern")?;
    Regex::new(pattern.expect_str("pattern")?)
        .map_err(|e| RuntimeError::Value(format!("invalid pattern: {}", e)))
}

fn finish_check(kind: CheckKind, mut args: Args, func: &str) -> Result<Value, RuntimeError> {
    let mut check = Check::new(kind);
    check.ignore_na = args.flag("ignore_na", true)?;
    check.raise_warning = args.flag("raise_warning", false)?;
    for ignored in ["name", "error", "title", "description", "element_wise", "n_failure_cases"] {
        args.keyword(ignored);
    }
    args.done(func)?;
    Ok(Value::Check(Rc::new(check)))
}

fn check_equal(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let v = cell_arg(&mut args, "equal_to", "value")?;
    finish_check(CheckKind::Equal(v), args, "equal_to")
}

fn check_not_equal(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let v = cell_arg(&mut args, "not_equal_to", "value")?;
    finish_check(CheckKind::NotEqual(v), args, "not_equal_to")
}

fn check_greater(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let v = cell_arg(&mut args, "greater_than", "min_value")?;
    finish_check(CheckKind::Greater(v), args, "greater_than")
}

fn check_greater_equal(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let v = cell_arg(&mut args, "greater_than_or_equal_to", "min_value")?;
    finish_check(CheckKind::GreaterOrEqual(v), args, "greater_than_or_equal_to")
}

fn check_less(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let v = cell_arg(&mut args, "less_than", "max_value")?;
    finish_check(CheckKind::Less(v), args, "less_than")
}

fn check_less_equal(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let v = cell_arg(&mut args, "less_than_or_equal_to", "max_value")?;
    finish_check(CheckKind::LessOrEqual(v), args, "less_than_or_equal_to")
}

fn check_in_range(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let min = cell_arg(&mut args, "in_range", "min_value")?;
    let max = cell_arg(&mut args, "in_range", "max_value")?;
    let include_min = args.flag("include_min", true)?;
    let include_max = args.flag("include_max", true)?;
    finish_check(
        CheckKind::InRange {
            min,
            max,
            include_min,
            include_max,
        },
        args,
        "in_range",
    )
}

fn check_isin(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let values = cells_arg(interp, &mut args, "isin")?;
    finish_check(CheckKind::IsIn(values), args, "isin")
}

fn check_notin(interp: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let values = cells_arg(interp, &mut args, "notin")?;
    finish_check(CheckKind::NotIn(values), args, "notin")
}

fn check_str_matches(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let re = regex_arg(&mut args, "str_matches")?;
    finish_check(CheckKind::StrMatches(re), args, "str_matches")
}

fn check_str_contains(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let re = regex_arg(&mut args, "str_contains")?;
    finish_check(CheckKind::StrContains(re), args, "str_contains")
}

fn check_str_startswith(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let prefix = args.required("str_startswith", "string")?;
    let prefix = prefix.expect_str("string")?.to_string();
    finish_check(CheckKind::StrStartsWith(prefix), args, "str_startswith")
}

fn check_str_endswith(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let suffix = args.required("str_endswith", "string")?;
    let suffix = suffix.expect_str("string")?.to_string();
    finish_check(CheckKind::StrEndsWith(suffix), args, "str_endswith")
}

fn check_str_length(_: &mut Interpreter, mut args: Args) -> Result<Value, RuntimeError> {
    let mut bound = |name: &str| -> Result<Option<usize>, RuntimeError> {
        match args.option(name) {
            None => Ok(None),
            Some(v) => usize::try_from(v.expect_int(name)?)
                .map(Some)
                .map_err(|_| RuntimeError::Value(format!("{} must not be negative", name))),
        }
    };
    let min = bound("min_value")?;
    let max = bound("max_value")?;
    if min.is_none() && max.is_none() {
        return Err(RuntimeError::Value(
            "str_length requires at least one of min_value and max_value".into(),
        ));
    }
    finish_check(CheckKind::StrLength { min, max }, args, "str_length")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{interp::{global, Output}, parse::parse_module, value::Globals};
    use indoc::indoc;
    use std::cell::RefCell;

    fn run(source: &str) -> (Globals, Vec<String>) {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let globals = Globals::default();
        Interpreter::new(Output::Captured(lines.clone()))
            .run_module(&parse_module(source).unwrap(), &globals)
            .unwrap();
        let printed = lines.borrow().clone();
        (globals, printed)
    }

    #[test]
    fn builds_schemas_from_pandera_calls() {
        let (globals, _) = run(indoc! {r#"
            import pandera.pandas as pa
            from pandera.pandas import Column, Check, DataFrameSchema

            schema = DataFrameSchema(
                {
                    "id": Column(int, unique=True),
                    "currency": Column(str, Check.isin(["USD", "EUR"]), nullable=True),
                    "price": Column("float64", [Check.ge(0), Check.lt(1000, raise_warning=True)]),
                    "code": pa.Column(pa.String, Check.str_matches(r"^[A-Z]{3}$")),
                },
                strict="filter",
                coerce=True,
                unique=["id", "currency"],
                name="purchases",
            )
        "#});
        let Some(Value::Schema(schema)) = global(&globals, "schema") else {
            panic!("schema missing");
        };
        assert_eq!(schema.column_names(), vec!["id", "currency", "price", "code"]);
        assert_eq!(schema.strict, Strictness::Filter);
        assert!(schema.coerce);
        assert_eq!(schema.unique, vec!["id".to_string(), "currency".to_string()]);
        assert_eq!(schema.display_name(), "purchases");

        let price = schema.column("price").unwrap();
        assert_eq!(price.dtype, Some(DType::Float64));
        assert_eq!(price.checks.len(), 2);
        assert!(price.checks[1].raise_warning);
        assert_eq!(price.checks[0].to_string(), "greater_than_or_equal_to(0)");

        let currency = schema.column("currency").unwrap();
        assert!(currency.nullable);
        assert_eq!(currency.checks[0].to_string(), "isin(['USD', 'EUR'])");
        assert_eq!(schema.column("id").unwrap().dtype, Some(DType::Int64));
        assert_eq!(schema.column("code").unwrap().dtype, Some(DType::Str));
    }

    #[test]
    fn schema_objects_expose_their_columns() {
        let (_, printed) = run(indoc! {r#"
            from pandera import Column, DataFrameSchema
            s = DataFrameSchema({"a": Column(int), "b": Column(str, nullable=True)})
            print(list(s.columns), s.columns["b"].nullable, s.strict)
        "#});
        assert_eq!(printed, vec!["['a', 'b'] True False"]);
    }

    #[test]
    fn string_and_collection_helpers() {
        let (_, printed) = run(indoc! {r#"
            words = "  Hello, World  ".strip().lower().split(", ")
            print(words, "-".join(words), "{} + {x}".format(1, x=2))
            print(sorted([3, 1, 2], reverse=True), max([1, 5, 3]), min("b", "a"), sum([1, 2.5]))
            print(list(enumerate(["a", "b"], start=1)), list(zip([1, 2], "xy")))
            print(isinstance(True, int), isinstance(1.0, (int, str)), round(2.5), round(3.14159, 2))
        "#});
        assert_eq!(
            printed,
            vec![
                "['hello', 'world'] hello-world 1 + 2",
                "[3, 2, 1] 5 a 3.5",
                "[(1, 'a'), (2, 'b')] [(1, 'x'), (2, 'y')]",
                "True False 2 3.14",
            ]
        );
    }

    #[test]
    fn dates_and_conversions() {
        let (_, printed) = run(indoc! {r#"
            from datetime import datetime, date
            d = datetime.strptime("2024-03-05 10:30:00", "%Y-%m-%d %H:%M:%S")
            print(d.year, d.hour, d.strftime("%d/%m/%Y"), d.date(), date(2024, 1, 2).isoformat())
            print(int("42"), float("1.5"), str(3), bool(""), int(7.9))
        "#});
        assert_eq!(
            printed,
            vec!["2024 10 05/03/2024 2024-03-05 2024-01-02", "42 1.5 3 False 7"]
        );
    }

    #[test]
    fn custom_checks_are_rejected() {
        let body = parse_module("from pandera import Check\nc = Check(lambda s: s > 0)\n").unwrap();
        let err = Interpreter::new(Output::Captured(Rc::default()))
            .run_module(&body, &Globals::default())
            .unwrap_err();
        assert!(err.to_string().contains("custom Check functions are not supported"));
    }
}
