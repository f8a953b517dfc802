// src/unit/parse.rs
//! tree-sitter-python concrete syntax → [`ast`](super::ast).
//!
//! Everything outside the supported subset is rejected here, so a unit that
//! parses never hits an unknown construct while executing.

use std::rc::Rc;
use thiserror::Error;
use tree_sitter::{Node, Parser};

use super::ast::{
    Argument, BinOp, CmpOp, Expr, FStringPart, FunctionDef, ParamDef, Stmt, Target, UnaryOp,
};
use crate::signature::ParameterKind;

#[derive(Debug, Error)]
pub enum SyntaxError {
    #[error("python grammar unavailable: {0}")]
    Grammar(String),
    #[error("invalid syntax at line {line}, column {column} near `{snippet}`")]
    Invalid {
        line: usize,
        column: usize,
        snippet: String,
    },
    #[error("line {line}: {construct} is not supported in code units")]
    Unsupported { line: usize, construct: String },
    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },
}

/// Parse a unit's source into statements.
pub fn parse_module(source: &str) -> Result<Vec<Stmt>, SyntaxError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| SyntaxError::Grammar(e.to_string()))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| SyntaxError::Grammar("parser produced no tree".to_string()))?;
    let root = tree.root_node();
    if root.has_error() {
        let bad = find_error(root).unwrap_or(root);
        let pos = bad.start_position();
        let snippet: String = source[bad.start_byte()..]
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(40)
            .collect();
        return Err(SyntaxError::Invalid {
            line: pos.row + 1,
            column: pos.column + 1,
            snippet,
        });
    }
    let postponed_annotations = has_future_annotations(root, source);
    Compiler {
        source,
        postponed_annotations,
    }
    .block(root)
}

/// `from __future__ import annotations` keeps every annotation as its source text.
fn has_future_annotations(root: Node<'_>, source: &str) -> bool {
    named(root)
        .into_iter()
        .filter(|n| n.kind() == "future_import_statement")
        .flat_map(|n| by_field(n, "name"))
        .any(|name| {
            let name = match name.kind() {
                "aliased_import" => name.child_by_field_name("name").unwrap_or(name),
                _ => name,
            };
            &source[name.byte_range()] == "annotations"
        })
}

fn find_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(find_error)
}

fn is_extra(node: &Node<'_>) -> bool {
    matches!(node.kind(), "comment" | "line_continuation")
}

fn named(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| !is_extra(c))
        .collect()
}

fn all(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).filter(|c| !is_extra(c)).collect()
}

fn by_field<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

struct Compiler<'s> {
    source: &'s str,
    postponed_annotations: bool,
}

impl<'s> Compiler<'s> {
    fn text(&self, node: Node<'_>) -> &'s str {
        &self.source[node.byte_range()]
    }

    fn line(node: Node<'_>) -> usize {
        node.start_position().row + 1
    }

    fn unsupported(node: Node<'_>, construct: impl Into<String>) -> SyntaxError {
        SyntaxError::Unsupported {
            line: Self::line(node),
            construct: construct.into(),
        }
    }

    fn malformed(node: Node<'_>, message: impl Into<String>) -> SyntaxError {
        SyntaxError::Malformed {
            line: Self::line(node),
            message: message.into(),
        }
    }

    fn field<'t>(node: Node<'t>, name: &str) -> Result<Node<'t>, SyntaxError> {
        node.child_by_field_name(name)
            .ok_or_else(|| Self::malformed(node, format!("{} without `{}`", node.kind(), name)))
    }

    fn first_named<'t>(node: Node<'t>) -> Result<Node<'t>, SyntaxError> {
        named(node)
            .into_iter()
            .next()
            .ok_or_else(|| Self::malformed(node, format!("empty {}", node.kind())))
    }

    fn block(&self, node: Node<'_>) -> Result<Vec<Stmt>, SyntaxError> {
        let mut out = Vec::new();
        for child in named(node) {
            out.extend(self.statement(child)?);
        }
        Ok(out)
    }

    fn statement(&self, node: Node<'_>) -> Result<Vec<Stmt>, SyntaxError> {
        let stmt = match node.kind() {
            "expression_statement" => {
                let children = named(node);
                match children.as_slice() {
                    [only] if only.kind() == "assignment" => return self.assignment(*only),
                    [only] if only.kind() == "augmented_assignment" => {
                        self.augmented_assignment(*only)?
                    }
                    [only] => Stmt::Expr(self.expr(*only)?),
                    many => Stmt::Expr(Expr::Tuple(
                        many.iter()
                            .map(|c| self.expr(*c))
                            .collect::<Result<_, _>>()?,
                    )),
                }
            }
            "return_statement" => Stmt::Return(match named(node).into_iter().next() {
                Some(value) => Some(self.expr(value)?),
                None => None,
            }),
            "pass_statement" => Stmt::Pass,
            "break_statement" => Stmt::Break,
            "continue_statement" => Stmt::Continue,
            "if_statement" => self.if_statement(node)?,
            "for_statement" => {
                if node.child_by_field_name("alternative").is_some() {
                    return Err(Self::unsupported(node, "for-else"));
                }
                if all(node).first().is_some_and(|c| c.kind() == "async") {
                    return Err(Self::unsupported(node, "async for"));
                }
                Stmt::For {
                    target: self.target(Self::field(node, "left")?)?,
                    iter: self.expr(Self::field(node, "right")?)?,
                    body: self.block(Self::field(node, "body")?)?,
                }
            }
            "function_definition" => Stmt::FunctionDef(Rc::new(self.function(node)?)),
            "import_statement" => return self.import(node),
            "import_from_statement" => self.import_from(node)?,
            "future_import_statement" => return Ok(Vec::new()),
            "raise_statement" => {
                let value = match node.child_by_field_name("cause") {
                    Some(_) => return Err(Self::unsupported(node, "raise … from")),
                    None => named(node).into_iter().next(),
                };
                Stmt::Raise(match value {
                    Some(v) => Some(self.expr(v)?),
                    None => None,
                })
            }
            "assert_statement" => {
                let parts = named(node);
                let test = parts
                    .first()
                    .ok_or_else(|| Self::malformed(node, "assert without a condition"))?;
                Stmt::Assert {
                    test: self.expr(*test)?,
                    msg: match parts.get(1) {
                        Some(m) => Some(self.expr(*m)?),
                        None => None,
                    },
                }
            }
            "class_definition" => return Err(Self::unsupported(node, "class definitions")),
            "decorated_definition" => return Err(Self::unsupported(node, "decorators")),
            "while_statement" => return Err(Self::unsupported(node, "while loops")),
            "try_statement" => return Err(Self::unsupported(node, "try statements")),
            "with_statement" => return Err(Self::unsupported(node, "with statements")),
            "global_statement" | "nonlocal_statement" => {
                return Err(Self::unsupported(node, "global/nonlocal declarations"))
            }
            other => return Err(Self::unsupported(node, format!("`{}`", other))),
        };
        Ok(vec![stmt])
    }

    fn if_statement(&self, node: Node<'_>) -> Result<Stmt, SyntaxError> {
        let mut branches = vec![(
            self.expr(Self::field(node, "condition")?)?,
            self.block(Self::field(node, "consequence")?)?,
        )];
        let mut orelse = Vec::new();
        for alt in by_field(node, "alternative") {
            match alt.kind() {
                "elif_clause" => branches.push((
                    self.expr(Self::field(alt, "condition")?)?,
                    self.block(Self::field(alt, "consequence")?)?,
                )),
                "else_clause" => orelse = self.block(Self::field(alt, "body")?)?,
                other => return Err(Self::unsupported(alt, format!("`{}`", other))),
            }
        }
        Ok(Stmt::If { branches, orelse })
    }

    fn assignment(&self, node: Node<'_>) -> Result<Vec<Stmt>, SyntaxError> {
        let mut targets = vec![self.target(Self::field(node, "left")?)?];
        let Some(mut value) = node.child_by_field_name("right") else {
            // bare annotation: `x: int`
            return Ok(Vec::new());
        };
        while value.kind() == "assignment" {
            targets.push(self.target(Self::field(value, "left")?)?);
            value = Self::field(value, "right")?;
        }
        Ok(vec![Stmt::Assign {
            targets,
            value: self.expr(value)?,
        }])
    }

    fn augmented_assignment(&self, node: Node<'_>) -> Result<Stmt, SyntaxError> {
        let op_node = Self::field(node, "operator")?;
        let op = BinOp::from_symbol(self.text(op_node))
            .ok_or_else(|| Self::unsupported(op_node, format!("`{}`", self.text(op_node))))?;
        Ok(Stmt::AugAssign {
            target: self.target(Self::field(node, "left")?)?,
            op,
            value: self.expr(Self::field(node, "right")?)?,
        })
    }

    fn target(&self, node: Node<'_>) -> Result<Target, SyntaxError> {
        match node.kind() {
            "identifier" | "keyword_identifier" => Ok(Target::Name(self.text(node).to_string())),
            "subscript" => {
                let object = Self::field(node, "value")?;
                if object.kind() != "identifier" {
                    return Err(Self::unsupported(node, "item assignment on an expression"));
                }
                Ok(Target::Item {
                    name: self.text(object).to_string(),
                    index: Box::new(self.subscript_index(node)?),
                })
            }
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list" => Ok(
                Target::Unpack(
                    named(node)
                        .into_iter()
                        .map(|c| self.target(c))
                        .collect::<Result<_, _>>()?,
                ),
            ),
            "parenthesized_expression" => self.target(Self::first_named(node)?),
            "attribute" => Err(Self::unsupported(node, "attribute assignment")),
            other => Err(Self::unsupported(node, format!("assignment to `{}`", other))),
        }
    }

    fn function(&self, node: Node<'_>) -> Result<FunctionDef, SyntaxError> {
        if all(node).first().is_some_and(|c| c.kind() == "async") {
            return Err(Self::unsupported(node, "async functions"));
        }
        if node.child_by_field_name("type_parameters").is_some() {
            return Err(Self::unsupported(node, "type parameters"));
        }
        let returns = match node.child_by_field_name("return_type") {
            Some(ty) => Some(self.annotation(ty)?),
            None => None,
        };
        Ok(FunctionDef {
            name: self.text(Self::field(node, "name")?).to_string(),
            params: self.parameters(Self::field(node, "parameters")?)?,
            returns,
            body: self.block(Self::field(node, "body")?)?,
            line: Self::line(node),
        })
    }

    fn annotation(&self, node: Node<'_>) -> Result<Expr, SyntaxError> {
        let node = if node.kind() == "type" {
            Self::first_named(node)?
        } else {
            node
        };
        if self.postponed_annotations {
            Ok(Expr::Str(self.text(node).to_string()))
        } else {
            self.expr(node)
        }
    }

    fn splat_name(&self, node: Node<'_>) -> Result<String, SyntaxError> {
        let inner = Self::first_named(node)?;
        if inner.kind() != "identifier" {
            return Err(Self::unsupported(node, "splat of a non-name"));
        }
        Ok(self.text(inner).to_string())
    }

    fn parameters(&self, node: Node<'_>) -> Result<Vec<ParamDef>, SyntaxError> {
        let mut params: Vec<ParamDef> = Vec::new();
        let mut keyword_only = false;
        let plain = |keyword_only: bool| {
            if keyword_only {
                ParameterKind::KeywordOnly
            } else {
                ParameterKind::PositionalOrKeyword
            }
        };

        for child in named(node) {
            let param = match child.kind() {
                "identifier" => ParamDef {
                    name: self.text(child).to_string(),
                    kind: plain(keyword_only),
                    annotation: None,
                    default: None,
                },
                "typed_parameter" => {
                    let inner = Self::first_named(child)?;
                    let annotation = Some(self.annotation(Self::field(child, "type")?)?);
                    match inner.kind() {
                        "identifier" => ParamDef {
                            name: self.text(inner).to_string(),
                            kind: plain(keyword_only),
                            annotation,
                            default: None,
                        },
                        "list_splat_pattern" => {
                            keyword_only = true;
                            ParamDef {
                                name: self.splat_name(inner)?,
                                kind: ParameterKind::VarPositional,
                                annotation,
                                default: None,
                            }
                        }
                        "dictionary_splat_pattern" => ParamDef {
                            name: self.splat_name(inner)?,
                            kind: ParameterKind::VarKeyword,
                            annotation,
                            default: None,
                        },
                        other => return Err(Self::unsupported(inner, format!("`{}` parameter", other))),
                    }
                }
                "default_parameter" | "typed_default_parameter" => {
                    let name = Self::field(child, "name")?;
                    if name.kind() != "identifier" {
                        return Err(Self::unsupported(child, "tuple parameters"));
                    }
                    ParamDef {
                        name: self.text(name).to_string(),
                        kind: plain(keyword_only),
                        annotation: match child.child_by_field_name("type") {
                            Some(ty) => Some(self.annotation(ty)?),
                            None => None,
                        },
                        default: Some(self.expr(Self::field(child, "value")?)?),
                    }
                }
                "list_splat_pattern" => {
                    keyword_only = true;
                    ParamDef {
                        name: self.splat_name(child)?,
                        kind: ParameterKind::VarPositional,
                        annotation: None,
                        default: None,
                    }
                }
                "dictionary_splat_pattern" => ParamDef {
                    name: self.splat_name(child)?,
                    kind: ParameterKind::VarKeyword,
                    annotation: None,
                    default: None,
                },
                "keyword_separator" => {
                    keyword_only = true;
                    continue;
                }
                "positional_separator" => {
                    for p in params
                        .iter_mut()
                        .filter(|p| p.kind == ParameterKind::PositionalOrKeyword)
                    {
                        p.kind = ParameterKind::PositionalOnly;
                    }
                    continue;
                }
                other => return Err(Self::unsupported(child, format!("`{}` parameter", other))),
            };
            params.push(param);
        }
        Ok(params)
    }

    fn import(&self, node: Node<'_>) -> Result<Vec<Stmt>, SyntaxError> {
        by_field(node, "name")
            .into_iter()
            .map(|name| match name.kind() {
                "dotted_name" => Ok(Stmt::Import {
                    module: self.text(name).to_string(),
                    alias: None,
                }),
                "aliased_import" => Ok(Stmt::Import {
                    module: self.text(Self::field(name, "name")?).to_string(),
                    alias: Some(self.text(Self::field(name, "alias")?).to_string()),
                }),
                other => Err(Self::unsupported(name, format!("`{}` import", other))),
            })
            .collect()
    }

    fn import_from(&self, node: Node<'_>) -> Result<Stmt, SyntaxError> {
        let module = Self::field(node, "module_name")?;
        if module.kind() == "relative_import" {
            return Err(Self::unsupported(node, "relative imports"));
        }
        if named(node).iter().any(|c| c.kind() == "wildcard_import") {
            return Err(Self::unsupported(node, "wildcard imports"));
        }
        let names = by_field(node, "name")
            .into_iter()
            .map(|name| match name.kind() {
                "dotted_name" => Ok((self.text(name).to_string(), None)),
                "aliased_import" => Ok((
                    self.text(Self::field(name, "name")?).to_string(),
                    Some(self.text(Self::field(name, "alias")?).to_string()),
                )),
                other => Err(Self::unsupported(name, format!("`{}` import", other))),
            })
            .collect::<Result<_, _>>()?;
        Ok(Stmt::ImportFrom {
            module: self.text(module).to_string(),
            names,
        })
    }

    fn exprs(&self, nodes: Vec<Node<'_>>) -> Result<Vec<Expr>, SyntaxError> {
        nodes.into_iter().map(|n| self.expr(n)).collect()
    }

    fn boxed(&self, node: Node<'_>) -> Result<Box<Expr>, SyntaxError> {
        Ok(Box::new(self.expr(node)?))
    }

    fn expr(&self, node: Node<'_>) -> Result<Expr, SyntaxError> {
        let expr = match node.kind() {
            "identifier" | "keyword_identifier" => Expr::Name(self.text(node).to_string()),
            "integer" => self.integer(node)?,
            "float" => {
                let text = self.text(node).replace('_', "");
                if text.ends_with(['j', 'J']) {
                    return Err(Self::unsupported(node, "complex numbers"));
                }
                Expr::Float(
                    text.parse()
                        .map_err(|_| Self::malformed(node, format!("bad float `{}`", text)))?,
                )
            }
            "true" => Expr::Bool(true),
            "false" => Expr::Bool(false),
            "none" => Expr::None,
            "ellipsis" => Expr::Ellipsis,
            "string" => self.string(node)?,
            "concatenated_string" => {
                let mut parts = Vec::new();
                for piece in named(node) {
                    match self.string(piece)? {
                        Expr::Str(s) => parts.push(FStringPart::Text(s)),
                        Expr::FString(more) => parts.extend(more),
                        _ => return Err(Self::malformed(piece, "expected a string")),
                    }
                }
                fstring_or_str(parts)
            }
            "list" => {
                let items = named(node);
                if items.iter().any(|c| c.kind() == "list_splat") {
                    return Err(Self::unsupported(node, "unpacking in list displays"));
                }
                Expr::List(self.exprs(items)?)
            }
            "tuple" | "expression_list" => Expr::Tuple(self.exprs(named(node))?),
            "dictionary" => {
                let mut pairs = Vec::new();
                for pair in named(node) {
                    if pair.kind() != "pair" {
                        return Err(Self::unsupported(pair, "unpacking in dict displays"));
                    }
                    pairs.push((
                        self.expr(Self::field(pair, "key")?)?,
                        self.expr(Self::field(pair, "value")?)?,
                    ));
                }
                Expr::Dict(pairs)
            }
            "parenthesized_expression" => self.expr(Self::first_named(node)?)?,
            "attribute" => Expr::Attribute {
                object: self.boxed(Self::field(node, "object")?)?,
                name: self.text(Self::field(node, "attribute")?).to_string(),
            },
            "subscript" => Expr::Subscript {
                object: self.boxed(Self::field(node, "value")?)?,
                index: Box::new(self.subscript_index(node)?),
            },
            "slice" => self.slice(node)?,
            "call" => self.call(node)?,
            "binary_operator" => {
                let op_node = Self::field(node, "operator")?;
                let symbol = self.text(op_node);
                let op = match symbol {
                    "<<" | ">>" | "@" => {
                        return Err(Self::unsupported(op_node, format!("`{}`", symbol)))
                    }
                    other => BinOp::from_symbol(other)
                        .ok_or_else(|| Self::unsupported(op_node, format!("`{}`", other)))?,
                };
                Expr::Binary {
                    op,
                    left: self.boxed(Self::field(node, "left")?)?,
                    right: self.boxed(Self::field(node, "right")?)?,
                }
            }
            "unary_operator" => {
                let op = match self.text(Self::field(node, "operator")?) {
                    "-" => UnaryOp::Neg,
                    "+" => UnaryOp::Pos,
                    "~" => UnaryOp::Invert,
                    other => return Err(Self::unsupported(node, format!("unary `{}`", other))),
                };
                Expr::Unary {
                    op,
                    operand: self.boxed(Self::field(node, "argument")?)?,
                }
            }
            "not_operator" => Expr::Unary {
                op: UnaryOp::Not,
                operand: self.boxed(Self::field(node, "argument")?)?,
            },
            "boolean_operator" => Expr::BoolOp {
                and: self.text(Self::field(node, "operator")?) == "and",
                left: self.boxed(Self::field(node, "left")?)?,
                right: self.boxed(Self::field(node, "right")?)?,
            },
            "comparison_operator" => self.comparison(node)?,
            "conditional_expression" => {
                let parts = named(node);
                let [body, test, orelse] = parts.as_slice() else {
                    return Err(Self::malformed(node, "conditional expression needs three parts"));
                };
                Expr::IfElse {
                    test: self.boxed(*test)?,
                    body: self.boxed(*body)?,
                    orelse: self.boxed(*orelse)?,
                }
            }
            "lambda" => {
                let params = match node.child_by_field_name("parameters") {
                    Some(p) => self.parameters(p)?,
                    None => Vec::new(),
                };
                Expr::Lambda(Rc::new(FunctionDef {
                    name: "<lambda>".to_string(),
                    params,
                    returns: None,
                    body: vec![Stmt::Return(Some(self.expr(Self::field(node, "body")?)?))],
                    line: Self::line(node),
                }))
            }
            "list_comprehension" => self.comprehension(node)?,
            other => return Err(Self::unsupported(node, format!("`{}`", other))),
        };
        Ok(expr)
    }

    fn integer(&self, node: Node<'_>) -> Result<Expr, SyntaxError> {
        let text = self.text(node).replace('_', "").to_ascii_lowercase();
        if text.ends_with(['j', 'l']) {
            return Err(Self::unsupported(node, "integer suffixes"));
        }
        let parsed = if let Some(hex) = text.strip_prefix("0x") {
            i64::from_str_radix(hex, 16)
        } else if let Some(oct) = text.strip_prefix("0o") {
            i64::from_str_radix(oct, 8)
        } else if let Some(bin) = text.strip_prefix("0b") {
            i64::from_str_radix(bin, 2)
        } else {
            text.parse()
        };
        parsed
            .map(Expr::Int)
            .map_err(|_| Self::malformed(node, format!("integer `{}` out of range", text)))
    }

    fn subscript_index(&self, node: Node<'_>) -> Result<Expr, SyntaxError> {
        let mut indexes = self.exprs(by_field(node, "subscript"))?;
        match indexes.len() {
            0 => Err(Self::malformed(node, "empty subscript")),
            1 => Ok(indexes.remove(0)),
            _ => Ok(Expr::Tuple(indexes)),
        }
    }

    fn slice(&self, node: Node<'_>) -> Result<Expr, SyntaxError> {
        let mut parts: [Option<Box<Expr>>; 3] = [None, None, None];
        let mut slot = 0;
        for child in all(node) {
            if child.kind() == ":" {
                slot += 1;
            } else if child.is_named() {
                if slot > 2 {
                    return Err(Self::malformed(node, "slice with too many parts"));
                }
                parts[slot] = Some(self.boxed(child)?);
            }
        }
        let [lower, upper, step] = parts;
        Ok(Expr::Slice { lower, upper, step })
    }

    fn call(&self, node: Node<'_>) -> Result<Expr, SyntaxError> {
        let func = self.boxed(Self::field(node, "function")?)?;
        let arguments = Self::field(node, "arguments")?;
        if arguments.kind() != "argument_list" {
            return Err(Self::unsupported(arguments, "generator arguments"));
        }
        let mut args = Vec::new();
        for arg in named(arguments) {
            args.push(match arg.kind() {
                "keyword_argument" => Argument::Keyword(
                    self.text(Self::field(arg, "name")?).to_string(),
                    self.expr(Self::field(arg, "value")?)?,
                ),
                "list_splat" => Argument::Star(self.expr(Self::first_named(arg)?)?),
                "dictionary_splat" => Argument::DoubleStar(self.expr(Self::first_named(arg)?)?),
                "parenthesized_list_splat" => {
                    return Err(Self::unsupported(arg, "parenthesized unpacking"))
                }
                _ => Argument::Positional(self.expr(arg)?),
            });
        }
        Ok(Expr::Call { func, args })
    }

    fn comparison(&self, node: Node<'_>) -> Result<Expr, SyntaxError> {
        let mut operands = Vec::new();
        let mut operators = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        for child in all(node) {
            if child.is_named() {
                if !pending.is_empty() {
                    operators.push(pending.join(" "));
                    pending.clear();
                }
                operands.push(self.expr(child)?);
            } else {
                pending.push(child.kind());
            }
        }
        if operands.len() < 2 || operators.len() != operands.len() - 1 {
            return Err(Self::malformed(node, "incomplete comparison"));
        }
        let mut operands = operands.into_iter();
        let left = Box::new(
            operands
                .next()
                .ok_or_else(|| Self::malformed(node, "comparison without operands"))?,
        );
        let rest = operators
            .iter()
            .zip(operands)
            .map(|(symbol, right)| {
                CmpOp::from_symbol(symbol)
                    .map(|op| (op, right))
                    .ok_or_else(|| Self::unsupported(node, format!("`{}`", symbol)))
            })
            .collect::<Result<_, _>>()?;
        Ok(Expr::Compare { left, rest })
    }

    fn comprehension(&self, node: Node<'_>) -> Result<Expr, SyntaxError> {
        let element = self.boxed(Self::field(node, "body")?)?;
        let mut source = None;
        let mut conditions = Vec::new();
        for clause in named(node).into_iter().skip(1) {
            match clause.kind() {
                "for_in_clause" => {
                    if source.is_some() {
                        return Err(Self::unsupported(clause, "nested comprehensions"));
                    }
                    source = Some((
                        self.target(Self::field(clause, "left")?)?,
                        self.expr(Self::field(clause, "right")?)?,
                    ));
                }
                "if_clause" => conditions.push(self.expr(Self::first_named(clause)?)?),
                other => return Err(Self::unsupported(clause, format!("`{}`", other))),
            }
        }
        let (target, iter) =
            source.ok_or_else(|| Self::malformed(node, "comprehension without `for`"))?;
        Ok(Expr::ListComp {
            element,
            target,
            iter: Box::new(iter),
            conditions,
        })
    }

    fn string(&self, node: Node<'_>) -> Result<Expr, SyntaxError> {
        let text = self.text(node);
        let prefix: String = text
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();
        if prefix.contains('b') {
            return Err(Self::unsupported(node, "bytes literals"));
        }
        let raw = prefix.contains('r');
        if !prefix.contains('f') {
            let body = strip_quotes(&text[prefix.len()..])
                .ok_or_else(|| Self::malformed(node, "unterminated string"))?;
            return Ok(Expr::Str(if raw { body.to_string() } else { unescape(body) }));
        }

        let mut parts = Vec::new();
        for child in named(node) {
            match child.kind() {
                "string_content" => {
                    let content = self.text(child).replace("{{", "{").replace("}}", "}");
                    parts.push(FStringPart::Text(if raw { content } else { unescape(&content) }));
                }
                "interpolation" => {
                    if child.child_by_field_name("format_specifier").is_some()
                        || child.child_by_field_name("type_conversion").is_some()
                    {
                        return Err(Self::unsupported(child, "f-string format specs"));
                    }
                    parts.push(FStringPart::Value(
                        self.expr(Self::field(child, "expression")?)?,
                    ));
                }
                "escape_interpolation" => {
                    let t = self.text(child);
                    parts.push(FStringPart::Text(t[..1].to_string()));
                }
                _ => {}
            }
        }
        Ok(fstring_or_str(parts))
    }
}

fn fstring_or_str(parts: Vec<FStringPart>) -> Expr {
    if parts.iter().all(|p| matches!(p, FStringPart::Text(_))) {
        let text = parts
            .into_iter()
            .map(|p| match p {
                FStringPart::Text(t) => t,
                FStringPart::Value(_) => String::new(),
            })
            .collect();
        Expr::Str(text)
    } else {
        Expr::FString(parts)
    }
}

fn strip_quotes(quoted: &str) -> Option<&str> {
    for q in ["\"\"\"", "'''", "\"", "'"] {
        if quoted.len() >= 2 * q.len() && quoted.starts_with(q) && quoted.ends_with(q) {
            return Some(&quoted[q.len()..quoted.len() - q.len()]);
        }
    }
    None
}

/// Resolve backslash escapes the way the host language does; unknown escapes
/// keep their backslash.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\n') => {}
            Some(kind @ ('x' | 'u' | 'U')) => {
                let width = match kind {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => {
                        out.push('\\');
                        out.push(kind);
                        out.push_str(&digits);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn only_function(source: &str) -> FunctionDef {
        match parse_module(source).unwrap().into_iter().next() {
            Some(Stmt::FunctionDef(f)) => (*f).clone(),
            other => panic!("expected a function, got {:?}", other),
        }
    }

    #[test]
    fn parameter_kinds_follow_markers() {
        let f = only_function("def f(a, /, b, *args, c=1, **kw): pass\n");
        let kinds: Vec<(String, ParameterKind, bool)> = f
            .params
            .iter()
            .map(|p| (p.name.clone(), p.kind, p.default.is_some()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("a".into(), ParameterKind::PositionalOnly, false),
                ("b".into(), ParameterKind::PositionalOrKeyword, false),
                ("args".into(), ParameterKind::VarPositional, false),
                ("c".into(), ParameterKind::KeywordOnly, true),
                ("kw".into(), ParameterKind::VarKeyword, false),
            ]
        );
    }

    #[test]
    fn typed_variadics_keep_annotations() {
        let f = only_function(indoc! {"
            def transform(*dfs: DataFrame, **kwargs) -> DataFrame:
                return dfs[0]
        "});
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[0].kind, ParameterKind::VarPositional);
        assert!(matches!(&f.params[0].annotation, Some(Expr::Name(n)) if n == "DataFrame"));
        assert_eq!(f.params[1].kind, ParameterKind::VarKeyword);
        assert!(f.params[1].annotation.is_none());
        assert!(matches!(&f.returns, Some(Expr::Name(n)) if n == "DataFrame"));
    }

    #[test]
    fn future_annotations_keep_source_text() {
        let f = only_function(indoc! {"
            from __future__ import annotations

            def transform(*dfs: pd.DataFrame, **kwargs) -> pd.DataFrame:
                return dfs[0]
        "});
        assert!(matches!(&f.params[0].annotation, Some(Expr::Str(t)) if t == "pd.DataFrame"));
        assert!(matches!(&f.returns, Some(Expr::Str(t)) if t == "pd.DataFrame"));

        let f = only_function("from __future__ import division\ndef f(x: int): pass\n");
        assert!(matches!(&f.params[0].annotation, Some(Expr::Name(n)) if n == "int"));
    }

    #[test]
    fn bare_star_makes_keyword_only() {
        let f = only_function("def f(a, *, b: int = 2): pass\n");
        assert_eq!(f.params[1].kind, ParameterKind::KeywordOnly);
        assert!(f.params[1].annotation.is_some());
    }

    #[test]
    fn rejects_unsupported_constructs() {
        let err = parse_module("class Transformer:\n    pass\n").unwrap_err();
        assert!(matches!(err, SyntaxError::Unsupported { line: 1, .. }));
        let err = parse_module("while True:\n    pass\n").unwrap_err();
        assert!(err.to_string().contains("while loops"));
    }

    #[test]
    fn reports_syntax_errors_with_position() {
        let err = parse_module("x = 1\ndef broken(:\n    pass\n").unwrap_err();
        match err {
            SyntaxError::Invalid { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn strings_and_escapes() {
        let stmts = parse_module(indoc! {r#"
            a = "tab\there"
            b = r"\d+"
            c = 'x' "y"
        "#})
        .unwrap();
        let values: Vec<String> = stmts
            .iter()
            .filter_map(|s| match s {
                Stmt::Assign {
                    value: Expr::Str(v),
                    ..
                } => Some(v.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec!["tab\there", r"\d+", "xy"]);
    }

    #[test]
    fn chained_comparisons_and_membership() {
        let stmts = parse_module("ok = 0 < x <= 10\nmissing = k not in d\n").unwrap();
        match &stmts[0] {
            Stmt::Assign {
                value: Expr::Compare { rest, .. },
                ..
            } => {
                let ops: Vec<CmpOp> = rest.iter().map(|(op, _)| *op).collect();
                assert_eq!(ops, vec![CmpOp::Lt, CmpOp::LtE]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &stmts[1] {
            Stmt::Assign {
                value: Expr::Compare { rest, .. },
                ..
            } => assert_eq!(rest[0].0, CmpOp::NotIn),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn imports_bind_aliases() {
        let stmts = parse_module("import pandas as pd\nfrom pandera.pandas import Column, Check as C\n").unwrap();
        assert!(matches!(&stmts[0], Stmt::Import { module, alias: Some(a) } if module == "pandas" && a == "pd"));
        match &stmts[1] {
            Stmt::ImportFrom { module, names } => {
                assert_eq!(module, "pandera.pandas");
                assert_eq!(
                    names,
                    &vec![("Column".to_string(), None), ("Check".to_string(), Some("C".to_string()))]
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
