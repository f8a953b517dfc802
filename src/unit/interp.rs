// src/unit/interp.rs
//! Tree-walking evaluator for parsed code units.

use arrow::error::ArrowError;
use std::{cell::RefCell, cmp::Ordering, collections::HashMap, rc::Rc};
use thiserror::Error;
use tracing::trace;

use super::{
    ast::{Argument, BinOp, CmpOp, Expr, FStringPart, FunctionDef, Stmt, Target, UnaryOp},
    builtins, frame,
    value::{Args, Function, Globals, Value},
};
use crate::{schema::SchemaErrors, signature::ParameterKind};

/// Nested user-function calls allowed before giving up.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("NameError: name '{0}' is not defined")]
    Name(String),
    #[error("TypeError: {0}")]
    Type(String),
    #[error("ValueError: {0}")]
    Value(String),
    #[error("KeyError: {0}")]
    Key(String),
    #[error("IndexError: {0}")]
    Index(String),
    #[error("AttributeError: {0}")]
    Attribute(String),
    #[error("ZeroDivisionError: {0}")]
    ZeroDivision(String),
    #[error("ImportError: {0}")]
    Import(String),
    #[error("AssertionError{}", message_suffix(.0))]
    Assertion(String),
    /// A `raise` statement in user code.
    #[error("{0}")]
    Raised(String),
    #[error("SyntaxError: {0}")]
    Syntax(String),
    #[error("RecursionError: maximum recursion depth exceeded")]
    Recursion,
    #[error("{0}")]
    Arrow(#[from] ArrowError),
    #[error(transparent)]
    Schema(#[from] SchemaErrors),
    #[error("{error}\n  in {function}() defined at line {line}")]
    InFunction {
        function: String,
        line: usize,
        error: Box<RuntimeError>,
    },
}

fn message_suffix(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {}", message)
    }
}

impl RuntimeError {
    /// The error as raised, without the call frames it crossed.
    pub fn root(&self) -> &RuntimeError {
        match self {
            RuntimeError::InFunction { error, .. } => error.root(),
            other => other,
        }
    }
}

/// Where `print` goes.
#[derive(Debug, Clone, Default)]
pub enum Output {
    #[default]
    Stdout,
    Captured(Rc<RefCell<Vec<String>>>),
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

struct Frame {
    /// `None` at module level, where names live in `globals`.
    locals: Option<HashMap<String, Value>>,
    closure: Rc<HashMap<String, Value>>,
    globals: Globals,
}

impl Frame {
    fn module(globals: Globals) -> Self {
        Self {
            locals: None,
            closure: Rc::default(),
            globals,
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.locals.as_ref().and_then(|l| l.get(name)) {
            return Some(v.clone());
        }
        if let Some(v) = self.closure.get(name) {
            return Some(v.clone());
        }
        global(&self.globals, name)
    }

    /// Value bound in this frame's own scope.
    fn peek(&self, name: &str) -> Option<Value> {
        match &self.locals {
            Some(locals) => locals.get(name).cloned(),
            None => global(&self.globals, name),
        }
    }

    fn bind(&mut self, name: String, value: Value) {
        match &mut self.locals {
            Some(locals) => {
                locals.insert(name, value);
            }
            None => {
                let value = detach(value, &self.globals);
                self.globals.borrow_mut().insert(name, value);
            }
        }
    }

    fn unbind(&mut self, name: &str) {
        match &mut self.locals {
            Some(locals) => {
                locals.remove(name);
            }
            None => {
                self.globals.borrow_mut().remove(name);
            }
        }
    }
}

/// Functions stored in their own namespace drop the back-reference to it.
fn detach(value: Value, globals: &Globals) -> Value {
    match value {
        Value::Function(f) if f.globals.as_ref().is_some_and(|g| Rc::ptr_eq(g, globals)) => {
            Value::Function(Rc::new(f.detached()))
        }
        other => other,
    }
}

/// Read a top-level name of a unit.
pub fn global(globals: &Globals, name: &str) -> Option<Value> {
    let value = globals.borrow().get(name).cloned()?;
    Some(match value {
        Value::Function(f) if f.globals.is_none() => Value::Function(Rc::new(f.attached(globals))),
        other => other,
    })
}

pub struct Interpreter {
    output: Output,
    prelude: HashMap<&'static str, Value>,
    depth: usize,
}

impl Interpreter {
    pub fn new(output: Output) -> Self {
        Self {
            output,
            prelude: builtins::prelude(),
            depth: 0,
        }
    }

    pub fn print(&mut self, line: String) {
        match &self.output {
            Output::Stdout => println!("{}", line),
            Output::Captured(lines) => lines.borrow_mut().push(line),
        }
    }

    /// Execute a unit's top-level statements into `globals`.
    pub fn run_module(&mut self, body: &[Stmt], globals: &Globals) -> Result<(), RuntimeError> {
        let mut frame = Frame::module(globals.clone());
        match self.exec_block(body, &mut frame)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(RuntimeError::Syntax("'return' outside function".into())),
            Flow::Break | Flow::Continue => {
                Err(RuntimeError::Syntax("'break' or 'continue' outside loop".into()))
            }
        }
    }

    pub fn call(&mut self, callee: &Value, args: Args) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(f) => self.call_function(f, args),
            Value::Builtin(b) => (b.func)(self, args),
            Value::Method { receiver, name } => builtins::call_method(self, receiver, name, args),
            Value::Type(tag) => builtins::construct(self, *tag, args),
            other => Err(RuntimeError::Type(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    pub fn call_function(&mut self, f: &Rc<Function>, args: Args) -> Result<Value, RuntimeError> {
        if self.depth >= MAX_DEPTH {
            return Err(RuntimeError::Recursion);
        }
        trace!(function = f.name(), "call");
        let wrap = |error: RuntimeError| RuntimeError::InFunction {
            function: f.name().to_string(),
            line: f.def.line,
            error: Box::new(error),
        };
        let locals = bind_arguments(f, args).map_err(wrap)?;
        let mut frame = Frame {
            locals: Some(locals),
            closure: f.closure.clone(),
            globals: f.globals.clone().unwrap_or_default(),
        };
        self.depth += 1;
        let flow = self.exec_block(&f.def.body, &mut frame);
        self.depth -= 1;
        match flow.map_err(wrap)? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::None),
        }
    }

    pub fn iterate(&self, value: &Value) -> Result<Vec<Value>, RuntimeError> {
        match value {
            Value::List(items) | Value::Tuple(items) => Ok(items.clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Dict(pairs) => Ok(pairs.iter().map(|(k, _)| k.clone()).collect()),
            Value::Series(s) => s.values(),
            Value::Table(t) => Ok(t
                .schema()
                .fields()
                .iter()
                .map(|f| Value::str(f.name()))
                .collect()),
            other => Err(RuntimeError::Type(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    fn lookup(&self, name: &str, frame: &Frame) -> Result<Value, RuntimeError> {
        frame
            .lookup(name)
            .or_else(|| self.prelude.get(name).cloned())
            .ok_or_else(|| RuntimeError::Name(name.to_string()))
    }

    fn exec_block(&mut self, body: &[Stmt], frame: &mut Frame) -> Result<Flow, RuntimeError> {
        for stmt in body {
            match self.exec(stmt, frame)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, frame: &mut Frame) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::Expr(e) => {
                self.eval(e, frame)?;
            }
            Stmt::Assign { targets, value } => {
                let value = self.eval(value, frame)?;
                for target in targets {
                    self.assign(target, value.clone(), frame)?;
                }
            }
            Stmt::AugAssign { target, op, value } => {
                let current = match target {
                    Target::Name(name) => self.lookup(name, frame)?,
                    Target::Item { name, index } => {
                        let container = self.lookup(name, frame)?;
                        let key = self.eval(index, frame)?;
                        self.get_item(&container, &key)?
                    }
                    Target::Unpack(_) => {
                        return Err(RuntimeError::Syntax(
                            "illegal expression for augmented assignment".into(),
                        ))
                    }
                };
                let rhs = self.eval(value, frame)?;
                let updated = self.binary(*op, current, rhs)?;
                self.assign(target, updated, frame)?;
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(e) => self.eval(e, frame)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test, frame)?.truthy()? {
                        return self.exec_block(body, frame);
                    }
                }
                return self.exec_block(orelse, frame);
            }
            Stmt::For { target, iter, body } => {
                let iterable = self.eval(iter, frame)?;
                for item in self.iterate(&iterable)? {
                    self.assign(target, item, frame)?;
                    match self.exec_block(body, frame)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Pass => {}
            Stmt::FunctionDef(def) => {
                let function = self.make_function(def, frame)?;
                frame.bind(def.name.clone(), function);
            }
            Stmt::Import { module, alias } => {
                let imported = builtins::import(module)?;
                match alias {
                    Some(alias) => frame.bind(alias.clone(), imported),
                    None => {
                        let top = module.split('.').next().unwrap_or(module);
                        frame.bind(top.to_string(), builtins::import(top)?);
                    }
                }
            }
            Stmt::ImportFrom { module, names } => {
                builtins::import(module)?;
                for (name, alias) in names {
                    let value = builtins::module_attr(module, name).ok_or_else(|| {
                        RuntimeError::Import(format!(
                            "cannot import name '{}' from '{}'",
                            name, module
                        ))
                    })?;
                    frame.bind(alias.clone().unwrap_or_else(|| name.clone()), value);
                }
            }
            Stmt::Raise(value) => {
                let message = match value {
                    None => "RuntimeError: No active exception to reraise".to_string(),
                    Some(e) => match self.eval(e, frame)? {
                        Value::Exception { kind, message } if message.is_empty() => {
                            kind.name().to_string()
                        }
                        Value::Exception { kind, message } => {
                            format!("{}: {}", kind.name(), message)
                        }
                        Value::Type(tag) => tag.name().to_string(),
                        other => {
                            return Err(RuntimeError::Type(format!(
                                "exceptions must derive from BaseException, not '{}'",
                                other.type_name()
                            )))
                        }
                    },
                };
                return Err(RuntimeError::Raised(message));
            }
            Stmt::Assert { test, msg } => {
                if !self.eval(test, frame)?.truthy()? {
                    let message = match msg {
                        Some(m) => self.eval(m, frame)?.to_string(),
                        None => String::new(),
                    };
                    return Err(RuntimeError::Assertion(message));
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &Target, value: Value, frame: &mut Frame) -> Result<(), RuntimeError> {
        match target {
            Target::Name(name) => frame.bind(name.clone(), value),
            Target::Item { name, index } => {
                let container = self.lookup(name, frame)?;
                let key = self.eval(index, frame)?;
                let updated = self.set_item(container, key, value)?;
                frame.bind(name.clone(), updated);
            }
            Target::Unpack(targets) => {
                let items = self.iterate(&value)?;
                match items.len().cmp(&targets.len()) {
                    Ordering::Greater => {
                        return Err(RuntimeError::Value(format!(
                            "too many values to unpack (expected {})",
                            targets.len()
                        )))
                    }
                    Ordering::Less => {
                        return Err(RuntimeError::Value(format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )))
                    }
                    Ordering::Equal => {}
                }
                for (t, v) in targets.iter().zip(items) {
                    self.assign(t, v, frame)?;
                }
            }
        }
        Ok(())
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>, frame: &mut Frame) -> Result<Value, RuntimeError> {
        let mut defaults = Vec::with_capacity(def.params.len());
        let mut annotations = Vec::with_capacity(def.params.len());
        for p in &def.params {
            defaults.push(match &p.default {
                Some(e) => Some(self.eval(e, frame)?),
                None => None,
            });
            annotations.push(match &p.annotation {
                Some(e) => Some(signature_annotation(&self.eval(e, frame)?)),
                None => None,
            });
        }
        let return_annotation = match &def.returns {
            Some(e) => Some(signature_annotation(&self.eval(e, frame)?)),
            None => None,
        };
        let closure = match &frame.locals {
            Some(locals) => {
                let mut captured = (*frame.closure).clone();
                captured.extend(locals.iter().map(|(k, v)| (k.clone(), v.clone())));
                Rc::new(captured)
            }
            None => frame.closure.clone(),
        };
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            annotations,
            return_annotation,
            closure,
            globals: Some(frame.globals.clone()),
        })))
    }

    fn eval_all(&mut self, exprs: &[Expr], frame: &mut Frame) -> Result<Vec<Value>, RuntimeError> {
        exprs.iter().map(|e| self.eval(e, frame)).collect()
    }

    fn eval(&mut self, expr: &Expr, frame: &mut Frame) -> Result<Value, RuntimeError> {
        let value = match expr {
            Expr::None => Value::None,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Int(i) => Value::Int(*i),
            Expr::Float(f) => Value::Float(*f),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Ellipsis => Value::Ellipsis,
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Text(t) => out.push_str(t),
                        FStringPart::Value(e) => out.push_str(&self.eval(e, frame)?.to_string()),
                    }
                }
                Value::Str(out)
            }
            Expr::Name(name) => self.lookup(name, frame)?,
            Expr::List(items) => Value::List(self.eval_all(items, frame)?),
            Expr::Tuple(items) => Value::Tuple(self.eval_all(items, frame)?),
            Expr::Dict(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = self.eval(k, frame)?;
                    let value = self.eval(v, frame)?;
                    dict_insert(&mut out, key, value);
                }
                Value::Dict(out)
            }
            Expr::Attribute { object, name } => {
                let object = self.eval(object, frame)?;
                builtins::get_attr(object, name)?
            }
            Expr::Subscript { object, index } => {
                let object = self.eval(object, frame)?;
                let index = self.eval(index, frame)?;
                self.get_item(&object, &index)?
            }
            Expr::Slice { lower, upper, step } => Value::Slice(
                self.slice_bound(lower.as_deref(), frame)?,
                self.slice_bound(upper.as_deref(), frame)?,
                self.slice_bound(step.as_deref(), frame)?,
            ),
            Expr::Call { func, args } => self.eval_call(func, args, frame)?,
            Expr::Binary { op, left, right } => {
                let l = self.eval(left, frame)?;
                let r = self.eval(right, frame)?;
                self.binary(*op, l, r)?
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand, frame)?;
                unary(*op, v)?
            }
            Expr::BoolOp { and, left, right } => {
                let l = self.eval(left, frame)?;
                if l.truthy()? == *and {
                    self.eval(right, frame)?
                } else {
                    l
                }
            }
            Expr::Compare { left, rest } => {
                let mut l = self.eval(left, frame)?;
                let mut result = Value::Bool(true);
                for (i, (op, right)) in rest.iter().enumerate() {
                    let r = self.eval(right, frame)?;
                    result = self.compare(*op, &l, &r)?;
                    if i + 1 < rest.len() && !result.truthy()? {
                        return Ok(result);
                    }
                    l = r;
                }
                result
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval(test, frame)?.truthy()? {
                    self.eval(body, frame)?
                } else {
                    self.eval(orelse, frame)?
                }
            }
            Expr::Lambda(def) => self.make_function(def, frame)?,
            Expr::ListComp {
                element,
                target,
                iter,
                conditions,
            } => {
                let iterable = self.eval(iter, frame)?;
                let items = self.iterate(&iterable)?;
                let mut names = Vec::new();
                target_names(target, &mut names);
                let saved: Vec<(String, Option<Value>)> =
                    names.into_iter().map(|n| {
                        let old = frame.peek(&n);
                        (n, old)
                    }).collect();
                let result = self.comprehension(element, target, items, conditions, frame);
                for (name, old) in saved {
                    match old {
                        Some(v) => frame.bind(name, v),
                        None => frame.unbind(&name),
                    }
                }
                Value::List(result?)
            }
        };
        Ok(value)
    }

    fn comprehension(
        &mut self,
        element: &Expr,
        target: &Target,
        items: Vec<Value>,
        conditions: &[Expr],
        frame: &mut Frame,
    ) -> Result<Vec<Value>, RuntimeError> {
        let mut out = Vec::new();
        'items: for item in items {
            self.assign(target, item, frame)?;
            for condition in conditions {
                if !self.eval(condition, frame)?.truthy()? {
                    continue 'items;
                }
            }
            out.push(self.eval(element, frame)?);
        }
        Ok(out)
    }

    fn slice_bound(&mut self, bound: Option<&Expr>, frame: &mut Frame) -> Result<Option<i64>, RuntimeError> {
        match bound {
            None => Ok(None),
            Some(e) => match self.eval(e, frame)? {
                Value::None => Ok(None),
                v => v.expect_int("slice indices").map(Some),
            },
        }
    }

    fn eval_args(&mut self, args: &[Argument], frame: &mut Frame) -> Result<Args, RuntimeError> {
        let mut out = Args::default();
        for arg in args {
            match arg {
                Argument::Positional(e) => out.positional.push(self.eval(e, frame)?),
                Argument::Keyword(name, e) => out.keywords.push((name.clone(), self.eval(e, frame)?)),
                Argument::Star(e) => {
                    let spread = self.eval(e, frame)?;
                    out.positional.extend(self.iterate(&spread)?);
                }
                Argument::DoubleStar(e) => match self.eval(e, frame)? {
                    Value::Dict(pairs) => {
                        for (k, v) in pairs {
                            let key = k.expect_str("keywords")?.to_string();
                            out.keywords.push((key, v));
                        }
                    }
                    other => {
                        return Err(RuntimeError::Type(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Ok(out)
    }

    fn eval_call(&mut self, func: &Expr, args: &[Argument], frame: &mut Frame) -> Result<Value, RuntimeError> {
        if let Expr::Attribute { object, name } = func {
            if let Expr::Name(receiver_name) = object.as_ref() {
                let receiver = self.lookup(receiver_name, frame)?;
                let call_args = self.eval_args(args, frame)?;
                if builtins::mutates(&receiver, name, &call_args) {
                    let (updated, result) = builtins::call_mutating(self, receiver, name, call_args)?;
                    frame.bind(receiver_name.clone(), updated);
                    return Ok(result);
                }
                let method = builtins::get_attr(receiver, name)?;
                return self.call(&method, call_args);
            }
        }
        let callee = self.eval(func, frame)?;
        let call_args = self.eval_args(args, frame)?;
        self.call(&callee, call_args)
    }

    pub fn get_item(&mut self, object: &Value, index: &Value) -> Result<Value, RuntimeError> {
        match object {
            Value::List(items) | Value::Tuple(items) => match index {
                Value::Slice(lo, hi, step) => {
                    let picked: Vec<Value> = slice_indices(items.len(), *lo, *hi, *step)?
                        .into_iter()
                        .map(|i| items[i].clone())
                        .collect();
                    Ok(match object {
                        Value::Tuple(_) => Value::Tuple(picked),
                        _ => Value::List(picked),
                    })
                }
                other => {
                    let i = normalize_index(other.expect_int("indices")?, items.len())
                        .ok_or_else(|| RuntimeError::Index(format!("{} index out of range", object.type_name())))?;
                    Ok(items[i].clone())
                }
            },
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                match index {
                    Value::Slice(lo, hi, step) => Ok(Value::Str(
                        slice_indices(chars.len(), *lo, *hi, *step)?
                            .into_iter()
                            .map(|i| chars[i])
                            .collect(),
                    )),
                    other => {
                        let i = normalize_index(other.expect_int("string indices")?, chars.len())
                            .ok_or_else(|| RuntimeError::Index("string index out of range".into()))?;
                        Ok(Value::Str(chars[i].to_string()))
                    }
                }
            }
            Value::Dict(pairs) => pairs
                .iter()
                .find(|(k, _)| k.py_eq(index))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| RuntimeError::Key(index.repr())),
            Value::Table(_) | Value::Series(_) | Value::Accessor(_) => {
                frame::get_item(object, index)
            }
            Value::Type(tag) => Ok(Value::TypeHint(format!("{}[{}]", tag.name(), hint_args(index)))),
            Value::TypeHint(hint) => Ok(Value::TypeHint(format!("{}[{}]", hint, hint_args(index)))),
            other => Err(RuntimeError::Type(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn set_item(&mut self, container: Value, key: Value, value: Value) -> Result<Value, RuntimeError> {
        match container {
            Value::List(mut items) => {
                let i = normalize_index(key.expect_int("list indices")?, items.len())
                    .ok_or_else(|| RuntimeError::Index("list assignment index out of range".into()))?;
                items[i] = value;
                Ok(Value::List(items))
            }
            Value::Dict(mut pairs) => {
                dict_insert(&mut pairs, key, value);
                Ok(Value::Dict(pairs))
            }
            Value::Table(table) => frame::set_column(table, &key, value),
            other => Err(RuntimeError::Type(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn binary(&mut self, op: BinOp, l: Value, r: Value) -> Result<Value, RuntimeError> {
        if is_columnar(&l) || is_columnar(&r) {
            return frame::binary(op, &l, &r);
        }
        scalar_binary(op, &l, &r)
    }

    fn compare(&mut self, op: CmpOp, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        match op {
            CmpOp::In => return Ok(Value::Bool(contains(r, l)?)),
            CmpOp::NotIn => return Ok(Value::Bool(!contains(r, l)?)),
            CmpOp::Is => return Ok(Value::Bool(identical(l, r))),
            CmpOp::IsNot => return Ok(Value::Bool(!identical(l, r))),
            _ => {}
        }
        if is_columnar(l) || is_columnar(r) {
            return frame::compare(op, l, r);
        }
        scalar_compare(op, l, r).map(Value::Bool)
    }
}

fn is_columnar(v: &Value) -> bool {
    matches!(v, Value::Series(_) | Value::Table(_))
}

fn target_names(target: &Target, out: &mut Vec<String>) {
    match target {
        Target::Name(n) | Target::Item { name: n, .. } => out.push(n.clone()),
        Target::Unpack(ts) => ts.iter().for_each(|t| target_names(t, out)),
    }
}

/// String annotations keep their quotes, so `'DataFrame'` never equals the type.
fn signature_annotation(value: &Value) -> String {
    match value {
        Value::Str(_) => value.repr(),
        other => other.annotation_name(),
    }
}

fn hint_args(index: &Value) -> String {
    match index {
        Value::Tuple(items) => items
            .iter()
            .map(hint_args)
            .collect::<Vec<_>>()
            .join(", "),
        Value::List(items) => format!(
            "[{}]",
            items.iter().map(hint_args).collect::<Vec<_>>().join(", ")
        ),
        other => other.annotation_name(),
    }
}

/// Insert or replace, keeping first-insertion order.
pub fn dict_insert(pairs: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    match pairs.iter_mut().find(|(k, _)| k.py_eq(&key)) {
        Some(slot) => slot.1 = value,
        None => pairs.push((key, value)),
    }
}

pub fn normalize_index(i: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let i = if i < 0 { i + len } else { i };
    (0..len).contains(&i).then_some(i as usize)
}

/// Positions selected by `[lo:hi:step]` over `len` items.
pub fn slice_indices(
    len: usize,
    lo: Option<i64>,
    hi: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<usize>, RuntimeError> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(RuntimeError::Value("slice step cannot be zero".into()));
    }
    let n = len as i64;
    let clamp = |v: i64, low: i64, high: i64| {
        let v = if v < 0 { v + n } else { v };
        v.clamp(low, high)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = lo.map_or(0, |v| clamp(v, 0, n));
        let stop = hi.map_or(n, |v| clamp(v, 0, n));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = lo.map_or(n - 1, |v| clamp(v, -1, n - 1));
        let stop = hi.map_or(-1, |v| clamp(v, -1, n - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

fn contains(container: &Value, item: &Value) -> Result<bool, RuntimeError> {
    match container {
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
        Value::Str(s) => Ok(s.contains(item.expect_str("'in <string>' operand")?)),
        Value::Dict(pairs) => Ok(pairs.iter().any(|(k, _)| k.py_eq(item))),
        Value::Table(t) => Ok(match item {
            Value::Str(name) => t.schema().column_with_name(name).is_some(),
            _ => false,
        }),
        Value::Series(s) => Ok(s.values()?.iter().any(|v| v.py_eq(item))),
        other => Err(RuntimeError::Type(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn identical(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::None, Value::None) | (Value::Ellipsis, Value::Ellipsis) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Type(a), Value::Type(b)) => a == b,
        (Value::Module(a), Value::Module(b)) => a == b,
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(&a.def, &b.def),
        _ => false,
    }
}

fn unsupported_operands(symbol: &str, l: &Value, r: &Value) -> RuntimeError {
    RuntimeError::Type(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        symbol,
        l.type_name(),
        r.type_name()
    ))
}

pub fn scalar_compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, RuntimeError> {
    match op {
        CmpOp::Eq => return Ok(l.py_eq(r)),
        CmpOp::NotEq => return Ok(!l.py_eq(r)),
        _ => {}
    }
    let ordering = l.py_cmp(r).ok_or_else(|| {
        RuntimeError::Type(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            l.type_name(),
            r.type_name()
        ))
    })?;
    Ok(match op {
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::LtE => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

/// Arithmetic on non-columnar values.
pub fn scalar_binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
    match (op, l, r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{}{}", a, b))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            return Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            return Ok(Value::Tuple(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let times = usize::try_from(n.as_int().unwrap_or(0)).unwrap_or(0);
            return Ok(Value::Str(s.repeat(times)));
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if n.as_int().is_some() =>
        {
            let times = usize::try_from(n.as_int().unwrap_or(0)).unwrap_or(0);
            let mut out = Vec::with_capacity(items.len() * times);
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            return Ok(Value::List(out));
        }
        (BinOp::BitAnd, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(*a && *b)),
        (BinOp::BitOr, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(*a || *b)),
        (BinOp::BitXor, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(a != b)),
        _ => {}
    }

    if let (Some(a), Some(b), false) = (l.as_int(), r.as_int(), op == BinOp::Div) {
        return int_arith(op, a, b).ok_or_else(|| match op {
            BinOp::FloorDiv | BinOp::Mod if b == 0 => {
                RuntimeError::ZeroDivision("integer division or modulo by zero".into())
            }
            _ => RuntimeError::Value(format!("integer overflow in {}", op.symbol())),
        });
    }
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => float_arith(op, a, b).ok_or_else(|| match op {
            BinOp::Div | BinOp::FloorDiv | BinOp::Mod => {
                RuntimeError::ZeroDivision("division by zero".into())
            }
            _ => unsupported_operands(op.symbol(), l, r),
        }),
        _ => Err(unsupported_operands(op.symbol(), l, r)),
    }
}

fn int_arith(op: BinOp, a: i64, b: i64) -> Option<Value> {
    let v = match op {
        BinOp::Add => a.checked_add(b)?,
        BinOp::Sub => a.checked_sub(b)?,
        BinOp::Mul => a.checked_mul(b)?,
        BinOp::FloorDiv => {
            if b == 0 {
                return None;
            }
            let q = a.checked_div(b)?;
            if a.checked_rem(b)? != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return None;
            }
            let m = a.checked_rem(b)?;
            if m != 0 && ((m < 0) != (b < 0)) {
                m + b
            } else {
                m
            }
        }
        BinOp::Pow => {
            return match u32::try_from(b) {
                Ok(exp) => a.checked_pow(exp).map(Value::Int),
                Err(_) => Some(Value::Float((a as f64).powf(b as f64))),
            }
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::Div => return float_arith(op, a as f64, b as f64),
    };
    Some(Value::Int(v))
}

fn float_arith(op: BinOp, a: f64, b: f64) -> Option<Value> {
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div if b == 0.0 => return None,
        BinOp::Div => a / b,
        BinOp::FloorDiv if b == 0.0 => return None,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod if b == 0.0 => return None,
        BinOp::Mod => a - b * (a / b).floor(),
        BinOp::Pow => a.powf(b),
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => return None,
    };
    Some(Value::Float(v))
}

fn unary(op: UnaryOp, v: Value) -> Result<Value, RuntimeError> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy()?)),
        (_, Value::Series(s)) => frame::unary(op, &s),
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::Value("integer overflow in negation".into())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-i64::from(b))),
        (UnaryOp::Pos, v @ (Value::Int(_) | Value::Float(_))) => Ok(v),
        (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(i64::from(b))),
        (UnaryOp::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Int(!i64::from(b))),
        (op, v) => Err(RuntimeError::Type(format!(
            "bad operand type for unary {}: '{}'",
            match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                _ => "~",
            },
            v.type_name()
        ))),
    }
}

/// Python argument binding: positionals, keywords, defaults, `*args`, `**kwargs`.
fn bind_arguments(f: &Function, args: Args) -> Result<HashMap<String, Value>, RuntimeError> {
    let name = f.name();
    let params = &f.def.params;
    let mut locals = HashMap::with_capacity(params.len());
    let given = args.positional.len();
    let mut positional = args.positional.into_iter();
    let mut keywords = args.keywords;
    let take_keyword = |keywords: &mut Vec<(String, Value)>, key: &str| {
        keywords
            .iter()
            .position(|(k, _)| k == key)
            .map(|at| keywords.remove(at).1)
    };
    let mut var_positional = false;
    let mut var_keyword = None;

    for (i, p) in params.iter().enumerate() {
        let default = || f.defaults.get(i).cloned().flatten();
        match p.kind {
            ParameterKind::PositionalOnly | ParameterKind::PositionalOrKeyword => {
                let value = match positional.next() {
                    Some(v) => {
                        if p.kind == ParameterKind::PositionalOrKeyword
                            && keywords.iter().any(|(k, _)| k == &p.name)
                        {
                            return Err(RuntimeError::Type(format!(
                                "{}() got multiple values for argument '{}'",
                                name, p.name
                            )));
                        }
                        v
                    }
                    None => {
                        let by_name = if p.kind == ParameterKind::PositionalOrKeyword {
                            take_keyword(&mut keywords, &p.name)
                        } else {
                            None
                        };
                        by_name.or_else(default).ok_or_else(|| {
                            RuntimeError::Type(format!(
                                "{}() missing required positional argument: '{}'",
                                name, p.name
                            ))
                        })?
                    }
                };
                locals.insert(p.name.clone(), value);
            }
            ParameterKind::VarPositional => {
                var_positional = true;
                locals.insert(p.name.clone(), Value::Tuple(positional.by_ref().collect()));
            }
            ParameterKind::KeywordOnly => {
                let value = take_keyword(&mut keywords, &p.name)
                    .or_else(default)
                    .ok_or_else(|| {
                        RuntimeError::Type(format!(
                            "{}() missing required keyword-only argument: '{}'",
                            name, p.name
                        ))
                    })?;
                locals.insert(p.name.clone(), value);
            }
            ParameterKind::VarKeyword => var_keyword = Some(p.name.clone()),
        }
    }

    let extra = positional.count();
    if extra > 0 && !var_positional {
        return Err(RuntimeError::Type(format!(
            "{}() takes {} positional argument(s) but {} were given",
            name,
            params
                .iter()
                .filter(|p| matches!(
                    p.kind,
                    ParameterKind::PositionalOnly | ParameterKind::PositionalOrKeyword
                ))
                .count(),
            given
        )));
    }
    match var_keyword {
        Some(kw_name) => {
            let pairs = keywords.into_iter().map(|(k, v)| (Value::Str(k), v)).collect();
            locals.insert(kw_name, Value::Dict(pairs));
        }
        None => {
            if let Some((k, _)) = keywords.first() {
                return Err(RuntimeError::Type(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    name, k
                )));
            }
        }
    }
    Ok(locals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::parse::parse_module;
    use indoc::indoc;

    fn run(source: &str) -> (Globals, Rc<RefCell<Vec<String>>>) {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let globals = Globals::default();
        let body = parse_module(source).unwrap();
        Interpreter::new(Output::Captured(lines.clone()))
            .run_module(&body, &globals)
            .unwrap();
        (globals, lines)
    }

    fn run_err(source: &str) -> RuntimeError {
        let body = parse_module(source).unwrap();
        Interpreter::new(Output::Captured(Rc::default()))
            .run_module(&body, &Globals::default())
            .unwrap_err()
    }

    #[test]
    fn control_flow_and_arithmetic() {
        let (globals, lines) = run(indoc! {"
            total = 0
            for i in range(10):
                if i % 2 == 0:
                    continue
                elif i > 7:
                    break
                total += i
            print(total, 7 // -2, -7 % 3, 2 ** 10, 1 / 4)
        "});
        assert_eq!(lines.borrow().as_slice(), ["16 -4 2 1024 0.25"]);
        assert!(matches!(global(&globals, "total"), Some(Value::Int(16))));
    }

    #[test]
    fn functions_bind_like_python() {
        let (_, lines) = run(indoc! {"
            def f(a, b=2, *rest, key=None, **extra):
                return [a, b, list(rest), key, sorted(extra)]

            print(f(1))
            print(f(1, 3, 4, 5, key='k', z=1, y=2))
            add = lambda x, y=10: x + y
            print(add(1), add(1, y=1))
        "});
        assert_eq!(
            lines.borrow().as_slice(),
            [
                "[1, 2, [], None, []]",
                "[1, 3, [4, 5], 'k', ['y', 'z']]",
                "11 2"
            ]
        );
    }

    #[test]
    fn binding_errors_name_the_function() {
        let err = run_err("def f(x):\n    return x\nf(1, 2)\n");
        assert!(err.to_string().contains("f() takes 1 positional argument(s) but 2 were given"));
        let err = run_err("def f(*, k):\n    return k\nf()\n");
        assert!(err.to_string().contains("missing required keyword-only argument: 'k'"));
    }

    #[test]
    fn containers_have_value_semantics() {
        let (_, lines) = run(indoc! {"
            a = [1, 2]
            b = a
            b.append(3)
            d = {'x': 1}
            d['y'] = 2
            d.update(z=3)
            print(a, b, d, d.get('missing', 0))
            print([n * n for n in range(5) if n % 2], a[-1], 'hello'[1:3], b[::-1])
        "});
        assert_eq!(
            lines.borrow().as_slice(),
            [
                "[1, 2] [1, 2, 3] {'x': 1, 'y': 2, 'z': 3} 0",
                "[1, 9] 2 el [3, 2, 1]"
            ]
        );
    }

    #[test]
    fn closures_capture_enclosing_locals() {
        let (_, lines) = run(indoc! {"
            def outer(n):
                def inner(x):
                    return x + n
                return inner
            add5 = outer(5)
            print(add5(1), f'{add5(2)}!')
        "});
        assert_eq!(lines.borrow().as_slice(), ["6 7!"]);
    }

    #[test]
    fn raise_and_assert_surface_messages() {
        let err = run_err("def check(v):\n    raise ValueError(f'bad {v}')\ncheck(3)\n");
        assert_eq!(err.root().to_string(), "ValueError: bad 3");
        assert!(err.to_string().contains("in check() defined at line 1"));

        let err = run_err("assert 1 == 2, 'numbers differ'\n");
        assert_eq!(err.to_string(), "AssertionError: numbers differ");
        assert!(matches!(run_err("print(undefined)\n"), RuntimeError::Name(n) if n == "undefined"));
    }

    #[test]
    fn recursion_is_bounded() {
        let err = run_err("def f(n):\n    return f(n + 1)\nf(0)\n");
        assert!(matches!(err.root(), RuntimeError::Recursion));
    }

    #[test]
    fn unknown_modules_fail_to_import() {
        let err = run_err("import numpy as np\n");
        assert_eq!(err.to_string(), "ImportError: No module named 'numpy'");
        let err = run_err("from pandas import read_sql\n");
        assert!(err.to_string().contains("cannot import name 'read_sql'"));
    }

    #[test]
    fn top_level_functions_do_not_keep_their_namespace_alive() {
        let (globals, _) = run("def f():\n    return 1\n");
        let weak = Rc::downgrade(&globals);
        let f = global(&globals, "f").unwrap();
        drop(globals);
        assert!(weak.upgrade().is_some());
        drop(f);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn floor_division_of_the_smallest_int_overflows() {
        for op in ["//", "%"] {
            let err = run_err(&format!("x = -9223372036854775807 - 1\ny = x {} -1\n", op));
            assert_eq!(err.root().to_string(), format!("ValueError: integer overflow in {}", op));
        }
        let err = run_err("y = 7 // 0\n");
        assert!(matches!(err.root(), RuntimeError::ZeroDivision(_)));
    }

    #[test]
    fn slices_clamp_like_python() {
        assert_eq!(slice_indices(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(5, None, Some(100), Some(2)).unwrap(), vec![0, 2, 4]);
        assert_eq!(slice_indices(3, None, None, Some(-1)).unwrap(), vec![2, 1, 0]);
        assert!(slice_indices(3, None, None, Some(0)).is_err());
    }
}
