//! Provider defined functions.
//!
//! Functions are pure computations exposed to configuration. Each function
//! declares a [`FunctionDefinition`]; the framework checks call arguments
//! against it before [`Function::run`] is invoked, so implementations can
//! rely on the argument count and on non-null arguments where nulls are not
//! allowed.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::diag::Diagnostics;
use crate::schema::AttributeType;
use crate::value::Value;

/// Factory producing a fresh function instance.
pub type FunctionFactory = Arc<dyn Fn() -> Box<dyn Function> + Send + Sync>;

/// Wrap a constructor into a [`FunctionFactory`].
pub fn factory<T, F>(make: F) -> FunctionFactory
where
    T: Function + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Arc::new(move || Box::new(make()))
}

/// Error returned from a function call.
///
/// Unlike diagnostics, a function reports at most one error. `argument`
/// names the zero-based argument position the error is about.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{text}")]
pub struct FuncError {
    /// Human readable error text.
    pub text: String,
    /// Position of the offending argument, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument: Option<usize>,
}

impl FuncError {
    /// An error about the call as a whole.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            argument: None,
        }
    }

    /// An error about the argument at `position`.
    pub fn argument(position: usize, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            argument: Some(position),
        }
    }

    /// Join two errors. Texts are joined by a newline; the first argument
    /// position wins.
    pub fn concat(first: Option<FuncError>, second: FuncError) -> FuncError {
        match first {
            None => second,
            Some(first) => FuncError {
                text: format!("{}\n{}", first.text, second.text),
                argument: first.argument.or(second.argument),
            },
        }
    }

    /// Convert diagnostics reported by provider code into a function error.
    ///
    /// Warnings are dropped. Returns `None` when there are no errors.
    pub fn from_diagnostics(diagnostics: &Diagnostics) -> Option<FuncError> {
        diagnostics.errors().fold(None, |acc, diag| {
            let text = match &diag.detail {
                Some(detail) => format!("{}: {}", diag.summary, detail),
                None => diag.summary.clone(),
            };
            Some(FuncError::concat(acc, FuncError::new(text)))
        })
    }
}

/// One parameter of a function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    /// Parameter name, shown in documentation and errors.
    pub name: String,
    /// Type of the argument.
    #[serde(rename = "type")]
    pub param_type: AttributeType,
    /// Whether null is an acceptable argument.
    pub allow_null: bool,
    /// Whether unknown is an acceptable argument.
    pub allow_unknown: bool,
    /// Parameter description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Parameter {
    /// A parameter rejecting null and unknown arguments.
    pub fn new(name: impl Into<String>, param_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            param_type,
            allow_null: false,
            allow_unknown: false,
            description: None,
        }
    }

    /// Accept null arguments.
    pub fn allow_null(mut self) -> Self {
        self.allow_null = true;
        self
    }

    /// Accept unknown arguments.
    pub fn allow_unknown(mut self) -> Self {
        self.allow_unknown = true;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Signature and documentation of a function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    /// Positional parameters.
    pub parameters: Vec<Parameter>,
    /// Parameter receiving any number of trailing arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variadic_parameter: Option<Parameter>,
    /// Type of the result.
    #[serde(rename = "return")]
    pub return_type: AttributeType,
    /// Short summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Longer description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Deprecation message, if the function is deprecated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecation_message: Option<String>,
}

impl FunctionDefinition {
    /// A definition without parameters returning `return_type`.
    pub fn new(return_type: AttributeType) -> Self {
        Self {
            parameters: Vec::new(),
            variadic_parameter: None,
            return_type,
            summary: None,
            description: None,
            deprecation_message: None,
        }
    }

    /// Append a positional parameter.
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Set the variadic parameter.
    pub fn with_variadic_parameter(mut self, parameter: Parameter) -> Self {
        self.variadic_parameter = Some(parameter);
        self
    }

    /// Set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// The parameter describing the argument at `position`.
    pub fn parameter(&self, position: usize) -> Option<&Parameter> {
        self.parameters
            .get(position)
            .or(self.variadic_parameter.as_ref())
    }

    /// Check `arguments` against this definition and split them into
    /// positional and variadic values.
    pub fn arguments(&self, arguments: Vec<Value>) -> Result<ArgumentsData, FuncError> {
        let expected = self.parameters.len();

        if self.variadic_parameter.is_none() && arguments.len() != expected {
            return Err(FuncError::new(format!(
                "Unexpected Function Arguments Data: \
                 The provider received an unexpected number of function arguments for the given function definition. \
                 This is always an issue in the Hemmer plugin framework or Hemmer itself.\n\n\
                 Expected function arguments: {}\n\
                 Given function arguments: {}",
                expected,
                arguments.len()
            )));
        }

        if arguments.len() < expected {
            return Err(FuncError::new(format!(
                "Unexpected Function Arguments Data: \
                 The provider received an unexpected number of function arguments for the given function definition. \
                 This is always an issue in the Hemmer plugin framework or Hemmer itself.\n\n\
                 Expected minimum function arguments: {}\n\
                 Given function arguments: {}",
                expected,
                arguments.len()
            )));
        }

        let mut error = None;
        for (position, argument) in arguments.iter().enumerate() {
            let Some(parameter) = self.parameter(position) else {
                continue;
            };
            if argument.is_null() && !parameter.allow_null {
                error = Some(FuncError::concat(
                    error,
                    FuncError::argument(
                        position,
                        format!(
                            "Invalid Null Function Argument: Parameter {:?} does not accept null values.",
                            parameter.name
                        ),
                    ),
                ));
            }
            if argument.is_unknown() && !parameter.allow_unknown {
                error = Some(FuncError::concat(
                    error,
                    FuncError::argument(
                        position,
                        format!(
                            "Invalid Unknown Function Argument: Parameter {:?} does not accept unknown values.",
                            parameter.name
                        ),
                    ),
                ));
            }
        }
        if let Some(error) = error {
            return Err(error);
        }

        let mut values = arguments;
        let variadic = values.split_off(expected);
        Ok(ArgumentsData { values, variadic })
    }
}

/// Checked call arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentsData {
    /// Arguments of the positional parameters.
    pub values: Vec<Value>,
    /// Arguments of the variadic parameter.
    pub variadic: Vec<Value>,
}

impl ArgumentsData {
    /// The positional argument at `position`.
    pub fn get(&self, position: usize) -> Option<&Value> {
        self.values.get(position)
    }
}

/// Output of [`Function::metadata`].
#[derive(Debug, Clone, Default)]
pub struct FunctionMetadataResponse {
    /// The function name.
    pub name: String,
}

/// Output of [`Function::definition`].
#[derive(Debug, Clone)]
pub struct DefinitionResponse {
    /// The function definition.
    pub definition: FunctionDefinition,
    /// Diagnostics reported while building the definition.
    pub diagnostics: Diagnostics,
}

impl Default for DefinitionResponse {
    fn default() -> Self {
        Self {
            definition: FunctionDefinition::new(AttributeType::Dynamic),
            diagnostics: Diagnostics::new(),
        }
    }
}

/// Input of [`Function::run`].
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// The checked arguments.
    pub arguments: ArgumentsData,
}

/// Output of [`Function::run`].
#[derive(Debug, Clone, Default)]
pub struct RunResponse {
    /// The result. Starts null.
    pub result: Value,
    /// Set when the call failed.
    pub error: Option<FuncError>,
}

/// A provider defined function.
#[async_trait]
pub trait Function: Send + Sync {
    /// Report the function name.
    fn metadata(&self, resp: &mut FunctionMetadataResponse);

    /// Report the function definition.
    fn definition(&self, resp: &mut DefinitionResponse);

    /// Compute the result.
    async fn run(&self, req: RunRequest, resp: &mut RunResponse);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> FunctionDefinition {
        FunctionDefinition::new(AttributeType::String)
            .with_parameter(Parameter::new("input", AttributeType::String))
            .with_parameter(Parameter::new("suffix", AttributeType::String).allow_null())
    }

    #[test]
    fn test_arguments_exact_count() {
        let args = definition()
            .arguments(vec![Value::from("a"), Value::Null])
            .unwrap();
        assert_eq!(args.get(0), Some(&Value::from("a")));
        assert_eq!(args.get(1), Some(&Value::Null));
        assert!(args.variadic.is_empty());

        let err = definition().arguments(vec![Value::from("a")]).unwrap_err();
        assert!(err.text.contains("Expected function arguments: 2"));
        assert!(err.text.contains("Given function arguments: 1"));
        assert_eq!(err.argument, None);
    }

    #[test]
    fn test_arguments_variadic() {
        let def = FunctionDefinition::new(AttributeType::String)
            .with_parameter(Parameter::new("sep", AttributeType::String))
            .with_variadic_parameter(Parameter::new("parts", AttributeType::String));

        let args = def
            .arguments(vec![Value::from(","), Value::from("a"), Value::from("b")])
            .unwrap();
        assert_eq!(args.values, vec![Value::from(",")]);
        assert_eq!(args.variadic, vec![Value::from("a"), Value::from("b")]);

        let err = def.arguments(vec![]).unwrap_err();
        assert!(err.text.contains("Expected minimum function arguments: 1"));
    }

    #[test]
    fn test_arguments_null_rejected() {
        let err = definition()
            .arguments(vec![Value::Null, Value::Null])
            .unwrap_err();
        assert_eq!(err.argument, Some(0));
        assert!(err.text.contains("\"input\""));
    }

    #[test]
    fn test_func_error_concat() {
        let joined = FuncError::concat(Some(FuncError::argument(1, "first")), FuncError::new("second"));
        assert_eq!(joined.text, "first\nsecond");
        assert_eq!(joined.argument, Some(1));

        assert_eq!(FuncError::concat(None, FuncError::new("only")), FuncError::new("only"));
    }

    #[test]
    fn test_func_error_from_diagnostics() {
        let mut diags = Diagnostics::new();
        assert_eq!(FuncError::from_diagnostics(&diags), None);

        diags.add_warning("ignored", "warning");
        diags.add_error("Broken", "details");
        assert_eq!(
            FuncError::from_diagnostics(&diags),
            Some(FuncError::new("Broken: details"))
        );
    }
}
