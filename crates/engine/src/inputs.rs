//! Playbook inputs.
//!
//! Inputs are declared with a type, optional default and validator, and are
//! resolved once from caller supplied data before anything else runs.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::PlaybookContext;
use crate::error::{PlaybookError, PlaybookResult};
use crate::report::Report;
use crate::validator::{display_value, Validator, ValidatorError, ValidatorSpec};

/// Declared input type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputType {
    String,
    Integer,
    Float,
    Boolean,
    /// Any other type name, kept verbatim and never coerced.
    Other(String),
}

impl InputType {
    pub fn parse(name: &str) -> Self {
        match name {
            "String" | "string" => InputType::String,
            "Integer" | "Fixnum" | "integer" | "fixnum" => InputType::Integer,
            "Float" | "float" => InputType::Float,
            "Boolean" | "boolean" => InputType::Boolean,
            other => InputType::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            InputType::String => "String",
            InputType::Integer => "Integer",
            InputType::Float => "Float",
            InputType::Boolean => "Boolean",
            InputType::Other(name) => name,
        }
    }

    /// Convert a textual value to this type. Non-string values pass through.
    pub fn coerce(&self, value: &Value) -> Result<Value, ValidatorError> {
        let Value::String(text) = value else {
            return Ok(value.clone());
        };

        let failed = || ValidatorError::Coercion {
            value: text.clone(),
            target: self.name().to_string(),
        };

        match self {
            InputType::Integer => text.trim().parse::<i64>().map(Value::from).map_err(|_| failed()),
            InputType::Float => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(failed),
            InputType::Boolean => match text.trim().to_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "n" | "0" => Ok(Value::Bool(false)),
                _ => Err(failed()),
            },
            InputType::String | InputType::Other(_) => Ok(value.clone()),
        }
    }
}

fn default_required() -> bool {
    true
}

/// Declaration of a single input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default = "default_required")]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
}

impl InputSpec {
    pub fn input_type(&self) -> InputType {
        InputType::parse(self.input_type.as_deref().unwrap_or("String"))
    }
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            input_type: None,
            description: None,
            default: None,
            required: default_required(),
            validation: None,
        }
    }
}

/// Command line option generated for an input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionDescriptor {
    pub name: String,
    pub flag: String,
    pub value_name: String,
    pub description: String,
    pub value_type: String,
    pub default: Option<Value>,
    pub validation: Option<String>,
    /// Only set when the caller asked for required inputs to be enforced.
    pub required: Option<bool>,
}

#[derive(Debug, Clone)]
struct Input {
    spec: InputSpec,
    value: Option<Value>,
}

/// Declared inputs and their resolved values.
pub struct InputSet {
    ctx: PlaybookContext,
    validator: Arc<dyn Validator>,
    inputs: IndexMap<String, Input>,
}

impl InputSet {
    pub fn new(ctx: PlaybookContext, validator: Arc<dyn Validator>) -> Self {
        Self {
            ctx,
            validator,
            inputs: IndexMap::new(),
        }
    }

    /// Load inputs in declaration order.
    pub fn from_declaration(
        ctx: PlaybookContext,
        validator: Arc<dyn Validator>,
        declaration: &IndexMap<String, InputSpec>,
    ) -> Self {
        let mut set = Self::new(ctx, validator);
        for (name, spec) in declaration {
            set.declare(name, spec.clone());
        }
        set
    }

    /// Register an input. Its value starts out as the declared default.
    pub fn declare(&mut self, name: impl Into<String>, spec: InputSpec) {
        let name = name.into();
        debug!(playbook = %self.ctx.name(), phase = "inputs.prep", "Loading input {}", name);

        let value = spec.default.clone().filter(|v| !v.is_null());
        self.inputs.insert(name, Input { spec, value });
    }

    pub fn keys(&self) -> Vec<&str> {
        self.inputs.keys().map(|k| k.as_str()).collect()
    }

    /// Current value of an input, null when it has none.
    pub fn get(&self, name: &str) -> PlaybookResult<Value> {
        self.inputs
            .get(name)
            .map(|input| input.value.clone().unwrap_or(Value::Null))
            .ok_or_else(|| PlaybookError::Resolution(format!("Unknown input {}", name)))
    }

    /// Option descriptors for every input, in declaration order.
    pub fn option_descriptors(&self, set_required: bool) -> Vec<OptionDescriptor> {
        self.inputs
            .iter()
            .map(|(name, input)| {
                let spec = &input.spec;
                let value_type = spec.input_type().name().to_string();

                let mut description = format!(
                    "{} ({})",
                    spec.description.as_deref().unwrap_or_default(),
                    value_type
                );
                if let Some(default) = spec.default.as_ref().filter(|d| !d.is_null()) {
                    description.push_str(&format!(" default: {}", display_value(default)));
                }

                OptionDescriptor {
                    name: name.clone(),
                    flag: format!("--{}", name.to_lowercase()),
                    value_name: name.to_uppercase(),
                    description: description.trim().to_string(),
                    value_type,
                    default: spec.default.clone(),
                    validation: spec.validation.clone(),
                    required: set_required.then_some(spec.required),
                }
            })
            .collect()
    }

    /// Resolve inputs from caller data and record them in the report.
    ///
    /// Supplied values are coerced to the declared type and validated. Every
    /// required input left without a value is reported in one error.
    pub fn prepare(&mut self, data: &HashMap<String, Value>, report: &mut Report) -> PlaybookResult<()> {
        for (name, input) in self.inputs.iter_mut() {
            let Some(supplied) = data.get(name).filter(|v| !v.is_null()) else {
                continue;
            };

            let value = input
                .spec
                .input_type()
                .coerce(supplied)
                .map_err(|source| PlaybookError::InvalidInput {
                    input: name.clone(),
                    source,
                })?;

            if let Some(expression) = &input.spec.validation {
                let spec = ValidatorSpec::parse(expression);
                debug!(
                    playbook = %self.ctx.name(),
                    phase = "inputs.prep",
                    "Validating input {} using {} validator",
                    name,
                    spec
                );
                self.validator
                    .validate(&value, &spec)
                    .map_err(|source| PlaybookError::InvalidInput {
                        input: name.clone(),
                        source,
                    })?;
            }

            input.value = Some(value);
        }

        self.validate_requirements()?;

        for (name, input) in &self.inputs {
            report.record_input(name.clone(), input.value.clone().unwrap_or(Value::Null));
        }

        Ok(())
    }

    fn validate_requirements(&self) -> PlaybookResult<()> {
        let missing: Vec<String> = self
            .inputs
            .iter()
            .filter(|(_, input)| input.spec.required && input.value.is_none())
            .map(|(name, _)| {
                warn!(
                    playbook = %self.ctx.name(),
                    phase = "inputs.prep",
                    "Input {} requires a value but has none",
                    name
                );
                name.clone()
            })
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PlaybookError::MissingInputs(missing))
        }
    }
}

impl std::fmt::Debug for InputSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSet")
            .field("inputs", &self.keys())
            .finish()
    }
}
