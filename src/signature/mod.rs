//! Structural signatures of loaded callables.
//!
//! A [`Signature`] is a plain, serializable descriptor of a function's
//! parameters and declared return type. Two callables are compatible when
//! their descriptors are equal; nothing is inferred or coerced.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::unit::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    PositionalOnly,
    PositionalOrKeyword,
    /// `*args`
    VarPositional,
    KeywordOnly,
    /// `**kwargs`
    VarKeyword,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
    /// Rendered default value, if the parameter has one.
    pub default: Option<String>,
    /// Canonical name of the declared type.
    pub annotation: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            annotation: None,
        }
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ParameterKind::VarPositional => write!(f, "*")?,
            ParameterKind::VarKeyword => write!(f, "**")?,
            _ => {}
        }
        write!(f, "{}", self.name)?;
        if let Some(annotation) = &self.annotation {
            write!(f, ": {}", annotation)?;
        }
        match (&self.default, &self.annotation) {
            (Some(d), Some(_)) => write!(f, " = {}", d),
            (Some(d), None) => write!(f, "={}", d),
            (None, _) => Ok(()),
        }
    }
}

/// Ordered parameters plus the declared return type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub parameters: Vec<Parameter>,
    pub return_annotation: Option<String>,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rendered = Vec::with_capacity(self.parameters.len() + 2);
        let mut star_seen = false;
        for (i, p) in self.parameters.iter().enumerate() {
            if p.kind == ParameterKind::VarPositional {
                star_seen = true;
            }
            if p.kind == ParameterKind::KeywordOnly && !star_seen {
                rendered.push("*".to_string());
                star_seen = true;
            }
            rendered.push(p.to_string());
            let next_positional_only = self
                .parameters
                .get(i + 1)
                .is_some_and(|n| n.kind == ParameterKind::PositionalOnly);
            if p.kind == ParameterKind::PositionalOnly && !next_positional_only {
                rendered.push("/".to_string());
            }
        }
        write!(f, "({})", rendered.join(", "))?;
        if let Some(ret) = &self.return_annotation {
            write!(f, " -> {}", ret)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("'{0}' object is not a function with an inspectable signature")]
    NotCallable(String),
}

/// Describe a loaded callable. Only functions and lambdas defined in a code
/// unit carry a declared signature.
pub fn extract(value: &Value) -> Result<Signature, SignatureError> {
    match value {
        Value::Function(function) => Ok(function.signature()),
        other => Err(SignatureError::NotCallable(other.type_name())),
    }
}

/// Exact structural equality: count, names, kinds, order, defaults, declared
/// types and return type.
pub fn compatible(candidate: &Signature, template: &Signature) -> bool {
    candidate == template
}

/// `(*dfs: DataFrame, **kwargs) -> DataFrame`
pub fn template_signature() -> Signature {
    Signature {
        parameters: vec![
            Parameter::new("dfs", ParameterKind::VarPositional).with_annotation("DataFrame"),
            Parameter::new("kwargs", ParameterKind::VarKeyword),
        ],
        return_annotation: Some("DataFrame".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_like_python() {
        assert_eq!(
            template_signature().to_string(),
            "(*dfs: DataFrame, **kwargs) -> DataFrame"
        );
        let sig = Signature {
            parameters: vec![
                Parameter::new("a", ParameterKind::PositionalOnly),
                Parameter::new("x", ParameterKind::PositionalOrKeyword),
                Parameter::new("y", ParameterKind::KeywordOnly)
                    .with_annotation("int")
                    .with_default("1"),
                Parameter::new("z", ParameterKind::KeywordOnly).with_default("None"),
            ],
            return_annotation: None,
        };
        assert_eq!(sig.to_string(), "(a, /, x, *, y: int = 1, z=None)");
    }

    #[test]
    fn any_difference_is_incompatible() {
        let template = template_signature();
        assert!(compatible(&template.clone(), &template));

        let mut renamed = template.clone();
        renamed.parameters[0].name = "frames".into();
        assert!(!compatible(&renamed, &template));

        let mut untyped = template.clone();
        untyped.parameters[0].annotation = None;
        assert!(!compatible(&untyped, &template));

        let mut no_return = template.clone();
        no_return.return_annotation = None;
        assert!(!compatible(&no_return, &template));

        let mut reordered = template.clone();
        reordered.parameters.reverse();
        assert!(!compatible(&reordered, &template));

        let mut defaulted = template.clone();
        defaulted.parameters[1].default = Some("None".into());
        assert!(!compatible(&defaulted, &template));
    }

    #[test]
    fn serializes_as_plain_data() -> anyhow::Result<()> {
        let json = serde_json::to_string(&template_signature())?;
        assert!(json.contains("\"var_positional\""));
        let back: Signature = serde_json::from_str(&json)?;
        assert_eq!(back, template_signature());
        Ok(())
    }

    #[test]
    fn constants_are_not_callable() {
        let err = extract(&Value::Int(3)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "'int' object is not a function with an inspectable signature"
        );
    }
}
