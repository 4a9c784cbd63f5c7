//! Type declarations for primitive substitutions.
//!
//! A declaration is written `type|type|...`. Tags must be known, must not
//! repeat, and at most one may come from the numeric category.

use std::fmt;

use crate::error::{OomlError, Result};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveType {
    Null,
    Boolean,
    String,
    Number,
    Float,
    Integer,
    Natural,
}

impl PrimitiveType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "null" => Some(Self::Null),
            "boolean" => Some(Self::Boolean),
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "float" => Some(Self::Float),
            "integer" => Some(Self::Integer),
            "natural" => Some(Self::Natural),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Number => "number",
            Self::Float => "float",
            Self::Integer => "integer",
            Self::Natural => "natural",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Number | Self::Float | Self::Integer | Self::Natural
        )
    }

    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Null, Value::Null) => true,
            (Self::Boolean, Value::Bool(_)) => true,
            (Self::String, Value::String(_)) => true,
            (Self::Number, Value::Number(_)) => true,
            (Self::Float, Value::Number(n)) => n.is_finite(),
            (Self::Integer, Value::Number(n)) => n.is_finite() && n.fract() == 0.0,
            (Self::Natural, Value::Number(n)) => n.is_finite() && n.fract() == 0.0 && *n >= 0.0,
            _ => false,
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Parse `type|type|...` into an ordered, deduplicated tag list
pub fn parse_type_declaration(declaration: &str) -> Result<Vec<PrimitiveType>> {
    let mut types: Vec<PrimitiveType> = Vec::new();

    for tag in declaration.split('|') {
        let ty = PrimitiveType::from_tag(tag)
            .ok_or_else(|| OomlError::syntax(format!("Invalid type declaration \"{}\"", tag)))?;

        if types.contains(&ty) {
            return Err(OomlError::syntax(format!(
                "Duplicate type \"{}\" in type declaration",
                tag
            )));
        }

        if ty.is_numeric() && types.iter().any(PrimitiveType::is_numeric) {
            return Err(OomlError::syntax(format!(
                "Illegal type declaration \"{}\"; only one number type is allowed",
                tag
            )));
        }

        types.push(ty);
    }

    Ok(types)
}

/// `a, b, c` listing used in type error messages
pub fn describe_types(types: &[PrimitiveType]) -> String {
    types
        .iter()
        .map(PrimitiveType::tag)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn value_matches(types: &[PrimitiveType], value: &Value) -> bool {
    types.iter().any(|ty| ty.matches(value))
}

/// The default a property takes when no default is declared.
/// An undeclared type set behaves like `null`.
pub fn default_for_types(types: Option<&[PrimitiveType]>) -> Value {
    let Some(types) = types else {
        return Value::Null;
    };
    if types.contains(&PrimitiveType::Null) {
        Value::Null
    } else if types.iter().any(PrimitiveType::is_numeric) {
        Value::Number(0.0)
    } else if types.contains(&PrimitiveType::Boolean) {
        Value::Bool(false)
    } else if types.contains(&PrimitiveType::String) {
        Value::String(String::new())
    } else {
        Value::Null
    }
}
