//! Argument binding
//!
//! Converts untyped wire arguments into the exact argument list an
//! operation's formal parameters require, filling defaults for
//! trailing omitted arguments. Binding failures carry the 1-based
//! argument position so the caller can fix the offending value.

use crate::descriptor::{Operation, ParamType};
use anyhow::anyhow;
use serde_json::Value;
use thiserror::Error;

/// Why a request's arguments could not be bound
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    #[error("Argument {position} is not present")]
    MissingArgument { position: usize },

    #[error("Argument {position} should be of type {expected}.")]
    TypeMismatch { position: usize, expected: ParamType },

    #[error("Too many parameters specified.")]
    TooManyArguments { given: usize, declared: usize },
}

/// A fully-bound argument list, one value per formal parameter
///
/// Produced only by [`bind`], so operation bodies can rely on the
/// declared types holding: a `Boolean` slot holds a real bool, numeric
/// slots hold numbers, and anything may be null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArgs(Vec<Value>);

impl BoundArgs {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.0.get(index), None | Some(Value::Null))
    }

    /// Clone the bound value at `index` (null when out of range)
    pub fn value(&self, index: usize) -> Value {
        self.0.get(index).cloned().unwrap_or(Value::Null)
    }

    pub fn str(&self, index: usize) -> anyhow::Result<&str> {
        self.0
            .get(index)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("argument {} is not a string", index + 1))
    }

    pub fn opt_str(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(Value::as_str)
    }

    pub fn boolean(&self, index: usize) -> anyhow::Result<bool> {
        self.0
            .get(index)
            .and_then(Value::as_bool)
            .ok_or_else(|| anyhow!("argument {} is not a boolean", index + 1))
    }

    pub fn integer(&self, index: usize) -> anyhow::Result<i32> {
        let value = self.long(index)?;
        i32::try_from(value).map_err(|_| anyhow!("argument {} is out of range", index + 1))
    }

    pub fn long(&self, index: usize) -> anyhow::Result<i64> {
        self.0
            .get(index)
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("argument {} is not an integer", index + 1))
    }

    pub fn double(&self, index: usize) -> anyhow::Result<f64> {
        self.0
            .get(index)
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("argument {} is not a number", index + 1))
    }
}

/// Bind wire arguments against an operation's formal parameters
///
/// For formal position `i`: a supplied wire argument is coerced to the
/// declared type; an omitted one takes the parameter's default value
/// semantics. Extra wire arguments are rejected.
pub fn bind(operation: &Operation, wire_args: &[Value]) -> Result<BoundArgs, BindError> {
    let params = operation.params();

    if wire_args.len() > params.len() {
        return Err(BindError::TooManyArguments {
            given: wire_args.len(),
            declared: params.len(),
        });
    }

    let mut bound = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        let value = if i < wire_args.len() {
            coerce(&wire_args[i], param.param_type, i)?
        } else {
            operation.default_value_for(i)?
        };
        bound.push(value);
    }

    Ok(BoundArgs(bound))
}

/// Coerce one wire value to a declared type
///
/// Wire null passes through for every declared type. A declared
/// boolean also accepts an integer, nonzero as true, because naive
/// callers send 0/1. Everything else is a direct instance check.
fn coerce(value: &Value, declared: ParamType, index: usize) -> Result<Value, BindError> {
    let mismatch = || BindError::TypeMismatch {
        position: index + 1,
        expected: declared,
    };

    if value.is_null() {
        return Ok(Value::Null);
    }

    match declared {
        ParamType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) => n
                .as_i64()
                .map(|v| Value::Bool(v != 0))
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        ParamType::Integer => value
            .as_i64()
            .filter(|v| i32::try_from(*v).is_ok())
            .map(Value::from)
            .ok_or_else(mismatch),
        ParamType::Long => value.as_i64().map(Value::from).ok_or_else(mismatch),
        ParamType::Double => value.as_f64().map(Value::from).ok_or_else(mismatch),
        ParamType::String => {
            if value.is_string() {
                Ok(value.clone())
            } else {
                Err(mismatch())
            }
        }
        ParamType::List => {
            if value.is_array() {
                Ok(value.clone())
            } else {
                Err(mismatch())
            }
        }
        ParamType::Object => {
            if value.is_object() {
                Ok(value.clone())
            } else {
                Err(mismatch())
            }
        }
    }
}
