//! Operation descriptors and parameter specs
//!
//! Every operation a handler exposes is declared as an explicit,
//! statically built descriptor: name, ordered parameter specs, a
//! description and a body. The table is produced once at registry
//! construction time; descriptors are immutable after that.

use crate::bind::{BindError, BoundArgs};
use crate::registry::{ConfigError, Handler, HandlerInstance};
use anyhow::anyhow;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Declared wire-level type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Boolean,
    Integer,
    Long,
    Double,
    List,
    Object,
}

impl ParamType {
    /// Convert a literal default into a wire value using the built-in
    /// converter for this type
    pub(crate) fn convert_literal(&self, literal: &str) -> anyhow::Result<Value> {
        match self {
            ParamType::String => Ok(Value::String(literal.to_string())),
            ParamType::Boolean => match literal.to_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(anyhow!("'{literal}' is not a boolean")),
            },
            ParamType::Integer => literal
                .parse::<i32>()
                .map(Value::from)
                .map_err(|_| anyhow!("'{literal}' is not an integer")),
            ParamType::Long => literal
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| anyhow!("'{literal}' is not an integer")),
            ParamType::Double => literal
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Value::from)
                .ok_or_else(|| anyhow!("'{literal}' is not a number")),
            ParamType::List | ParamType::Object => {
                Err(anyhow!("no built-in default converter for {self}"))
            }
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::String => "String",
            ParamType::Boolean => "Boolean",
            ParamType::Integer => "Integer",
            ParamType::Long => "Long",
            ParamType::Double => "Double",
            ParamType::List => "List",
            ParamType::Object => "Object",
        };
        write!(f, "{name}")
    }
}

/// Custom transform applied to a literal default value
pub type ConvertFn = fn(&str) -> anyhow::Result<Value>;

/// Declared requirement of a parameter, fixed at registry build time
#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    Required,
    Optional,
    /// Optional with a converted default value
    Default(Value),
}

/// A parameter spec as declared by a handler class
///
/// Built into a [`Param`] when the registry is constructed; declaring
/// both `optional()` and `with_default()` is a configuration error
/// surfaced at that point, never at request time.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    name: &'static str,
    param_type: ParamType,
    description: &'static str,
    optional: bool,
    default_literal: Option<&'static str>,
    converter: Option<ConvertFn>,
}

impl ParamSpec {
    fn new(param_type: ParamType, name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            description,
            optional: false,
            default_literal: None,
            converter: None,
        }
    }

    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self::new(ParamType::String, name, description)
    }

    pub fn boolean(name: &'static str, description: &'static str) -> Self {
        Self::new(ParamType::Boolean, name, description)
    }

    pub fn integer(name: &'static str, description: &'static str) -> Self {
        Self::new(ParamType::Integer, name, description)
    }

    pub fn long(name: &'static str, description: &'static str) -> Self {
        Self::new(ParamType::Long, name, description)
    }

    pub fn double(name: &'static str, description: &'static str) -> Self {
        Self::new(ParamType::Double, name, description)
    }

    pub fn list(name: &'static str, description: &'static str) -> Self {
        Self::new(ParamType::List, name, description)
    }

    pub fn object(name: &'static str, description: &'static str) -> Self {
        Self::new(ParamType::Object, name, description)
    }

    /// Mark the parameter optional with no default; unsupplied values
    /// bind to null
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark the parameter optional with a literal default, converted
    /// through the built-in converter for its type (or a custom one)
    pub fn with_default(mut self, literal: &'static str) -> Self {
        self.default_literal = Some(literal);
        self
    }

    /// Use a custom converter for the default literal
    pub fn converted_by(mut self, converter: ConvertFn) -> Self {
        self.converter = Some(converter);
        self
    }

    pub(crate) fn finalize(&self, operation: &str) -> Result<Param, ConfigError> {
        if self.optional && self.default_literal.is_some() {
            return Err(ConfigError::ConflictingRequirement {
                operation: operation.to_string(),
                parameter: self.name,
            });
        }
        if self.converter.is_some() && self.default_literal.is_none() {
            return Err(ConfigError::InvalidDefault {
                operation: operation.to_string(),
                parameter: self.name,
                message: "converter supplied without a default literal".into(),
            });
        }

        let requirement = if let Some(literal) = self.default_literal {
            let converted = match self.converter {
                Some(convert) => convert(literal),
                None => self.param_type.convert_literal(literal),
            };
            let value = converted.map_err(|e| ConfigError::InvalidDefault {
                operation: operation.to_string(),
                parameter: self.name,
                message: e.to_string(),
            })?;
            Requirement::Default(value)
        } else if self.optional {
            Requirement::Optional
        } else {
            Requirement::Required
        };

        Ok(Param {
            name: self.name,
            param_type: self.param_type,
            description: self.description,
            requirement,
        })
    }
}

/// A fully built formal parameter
#[derive(Debug, Clone)]
pub struct Param {
    pub name: &'static str,
    pub param_type: ParamType,
    pub description: &'static str,
    pub requirement: Requirement,
}

impl Param {
    fn help_text(&self) -> String {
        let mut text = format!("{} {}", self.param_type, self.name);
        match &self.requirement {
            Requirement::Required => {}
            Requirement::Optional => text.push_str("[optional]"),
            Requirement::Default(value) => {
                text.push_str(&format!("[optional, default {value}]"));
            }
        }
        if !self.description.is_empty() {
            text.push_str(": ");
            text.push_str(self.description);
        }
        text
    }
}

/// Result of one operation body
pub type OperationResult = anyhow::Result<Value>;

pub(crate) type InvokeFn = Arc<
    dyn for<'a> Fn(&'a HandlerInstance, BoundArgs) -> BoxFuture<'a, OperationResult> + Send + Sync,
>;

/// Declaration of one named operation, produced by a handler class
///
/// Turned into an immutable [`Operation`] at registry build time.
pub struct OperationDescriptor {
    name: &'static str,
    description: &'static str,
    returns: &'static str,
    params: Vec<ParamSpec>,
    body: Option<InvokeFn>,
}

impl OperationDescriptor {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            returns: "",
            params: Vec::new(),
            body: None,
        }
    }

    /// Describe the return value for help output
    pub fn returns(mut self, returns: &'static str) -> Self {
        self.returns = returns;
        self
    }

    /// Append a formal parameter; order is the wire argument order
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Attach the operation body
    ///
    /// The closure receives the resolved handler instance and the
    /// fully-bound argument list; binding has already enforced the
    /// declared parameter types by the time it runs.
    pub fn handle<H, F>(mut self, body: F) -> Self
    where
        H: Handler,
        F: for<'a> Fn(&'a H, BoundArgs) -> BoxFuture<'a, OperationResult> + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(
            move |instance: &HandlerInstance, args: BoundArgs| match instance.downcast_ref::<H>() {
                Some(handler) => body(handler, args),
                None => futures::future::ready(Err(anyhow!(
                    "operation bound to a different handler type"
                )))
                .boxed(),
            },
        ));
        self
    }

    pub(crate) fn finalize(self) -> Result<Operation, ConfigError> {
        let body = self.body.ok_or_else(|| ConfigError::MissingBody {
            operation: self.name.to_string(),
        })?;
        let params = self
            .params
            .iter()
            .map(|spec| spec.finalize(self.name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Operation {
            name: self.name,
            description: self.description,
            returns: self.returns,
            params,
            body,
        })
    }
}

/// An immutable, registered operation
#[derive(Clone)]
pub struct Operation {
    name: &'static str,
    description: &'static str,
    returns: &'static str,
    params: Vec<Param>,
    body: InvokeFn,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Value a formal parameter takes when no wire argument covers it
    ///
    /// Returns the converted default for optional-with-default
    /// parameters, null for optional-no-default, and a binding error
    /// naming the 1-based position for required parameters.
    pub fn default_value_for(&self, index: usize) -> Result<Value, BindError> {
        match &self.params[index].requirement {
            Requirement::Default(value) => Ok(value.clone()),
            Requirement::Optional => Ok(Value::Null),
            Requirement::Required => Err(BindError::MissingArgument {
                position: index + 1,
            }),
        }
    }

    /// Human-readable help for this operation; not on the hot path
    pub fn help_text(&self) -> String {
        let mut help = String::new();
        help.push_str(self.name);
        help.push('(');
        for (i, param) in self.params.iter().enumerate() {
            if i == 0 {
                help.push_str("\n  ");
            } else {
                help.push_str(",\n  ");
            }
            help.push_str(&param.help_text());
        }
        help.push_str(")\n\n");
        help.push_str(self.description);
        if !self.returns.is_empty() {
            help.push_str("\n\nReturns:\n  ");
            help.push_str(self.returns);
        }
        help
    }

    pub(crate) fn call<'a>(
        &self,
        instance: &'a HandlerInstance,
        args: BoundArgs,
    ) -> BoxFuture<'a, OperationResult> {
        (self.body)(instance, args)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Probe;

    impl Handler for Probe {}

    fn noop_body(descriptor: OperationDescriptor) -> OperationDescriptor {
        descriptor.handle(|_: &Probe, _args| futures::future::ready(Ok(Value::Null)).boxed())
    }

    #[test]
    fn test_conflicting_requirement_is_config_error() {
        let descriptor = noop_body(
            OperationDescriptor::new("bad_op", "Conflicted.").param(
                ParamSpec::string("value", "")
                    .optional()
                    .with_default("x"),
            ),
        );
        assert!(matches!(
            descriptor.finalize(),
            Err(ConfigError::ConflictingRequirement {
                parameter: "value",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_body_is_config_error() {
        let descriptor = OperationDescriptor::new("bodyless", "No body.");
        assert!(matches!(
            descriptor.finalize(),
            Err(ConfigError::MissingBody { .. })
        ));
    }

    #[test]
    fn test_builtin_default_conversions() {
        let operation = noop_body(
            OperationDescriptor::new("defaults", "All built-in converters.")
                .param(ParamSpec::string("s", "").with_default("hi"))
                .param(ParamSpec::boolean("b", "").with_default("TRUE"))
                .param(ParamSpec::integer("i", "").with_default("42"))
                .param(ParamSpec::long("l", "").with_default("-7"))
                .param(ParamSpec::double("d", "").with_default("2.5")),
        )
        .finalize()
        .unwrap();

        assert_eq!(operation.default_value_for(0).unwrap(), json!("hi"));
        assert_eq!(operation.default_value_for(1).unwrap(), json!(true));
        assert_eq!(operation.default_value_for(2).unwrap(), json!(42));
        assert_eq!(operation.default_value_for(3).unwrap(), json!(-7));
        assert_eq!(operation.default_value_for(4).unwrap(), json!(2.5));
    }

    #[test]
    fn test_bad_default_literal_is_config_error() {
        let descriptor = noop_body(
            OperationDescriptor::new("bad_default", "")
                .param(ParamSpec::integer("n", "").with_default("many")),
        );
        assert!(matches!(
            descriptor.finalize(),
            Err(ConfigError::InvalidDefault { parameter: "n", .. })
        ));
    }

    #[test]
    fn test_list_default_requires_custom_converter() {
        let without = noop_body(
            OperationDescriptor::new("no_converter", "")
                .param(ParamSpec::list("items", "").with_default("a,b")),
        );
        assert!(matches!(
            without.finalize(),
            Err(ConfigError::InvalidDefault { .. })
        ));

        fn csv(literal: &str) -> anyhow::Result<Value> {
            Ok(Value::Array(
                literal.split(',').map(|s| json!(s)).collect(),
            ))
        }

        let with = noop_body(
            OperationDescriptor::new("with_converter", "").param(
                ParamSpec::list("items", "")
                    .with_default("a,b")
                    .converted_by(csv),
            ),
        )
        .finalize()
        .unwrap();
        assert_eq!(with.default_value_for(0).unwrap(), json!(["a", "b"]));
    }

    #[test]
    fn test_default_value_for_requirement_kinds() {
        let operation = noop_body(
            OperationDescriptor::new("kinds", "")
                .param(ParamSpec::string("required", ""))
                .param(ParamSpec::string("optional", "").optional())
                .param(ParamSpec::string("defaulted", "").with_default("hi")),
        )
        .finalize()
        .unwrap();

        assert_eq!(
            operation.default_value_for(0),
            Err(BindError::MissingArgument { position: 1 })
        );
        assert_eq!(operation.default_value_for(1).unwrap(), Value::Null);
        assert_eq!(operation.default_value_for(2).unwrap(), json!("hi"));
    }

    #[test]
    fn test_help_text_rendering() {
        let operation = noop_body(
            OperationDescriptor::new("echo", "Echoes the supplied message.")
                .param(
                    ParamSpec::string("message", "Message to echo.").with_default("hi"),
                )
                .returns("The message."),
        )
        .finalize()
        .unwrap();

        assert_eq!(
            operation.help_text(),
            "echo(\n  String message[optional, default \"hi\"]: Message to echo.)\n\n\
             Echoes the supplied message.\n\nReturns:\n  The message."
        );
    }
}
