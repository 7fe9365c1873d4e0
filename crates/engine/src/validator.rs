//! Input value validators.
//!
//! A validator expression is either a named validator (`:shellsafe`) or a
//! literal regular expression (`/^\w+$/`). Anything else fails closed.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while validating a single value.
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// Value did not match a regular expression.
    #[error("value '{0}' does not match regular expression {1}")]
    Mismatch(String, String),

    /// Named validator rejected the value.
    #[error("value '{value}' is not a valid {validator}")]
    Rejected { validator: String, value: String },

    /// Regular expression failed to compile.
    #[error("invalid regular expression {0}: {1}")]
    InvalidRegex(String, String),

    /// Named validator does not exist.
    #[error("unknown validator :{0}")]
    UnknownValidator(String),

    /// Expression is neither `:name` nor `/regex/`.
    #[error("unrecognized validator expression '{0}'")]
    Unrecognized(String),

    /// Value could not be converted to the declared input type.
    #[error("cannot convert '{value}' to {target}")]
    Coercion { value: String, target: String },
}

/// Parsed validator expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatorSpec {
    Named(String),
    Regex(String),
    Unrecognized(String),
}

impl ValidatorSpec {
    pub fn parse(expression: &str) -> Self {
        let expression = expression.trim();

        if let Some(name) = expression.strip_prefix(':') {
            if !name.is_empty() {
                return ValidatorSpec::Named(name.to_string());
            }
        }

        if expression.len() > 2 && expression.starts_with('/') && expression.ends_with('/') {
            return ValidatorSpec::Regex(expression[1..expression.len() - 1].to_string());
        }

        ValidatorSpec::Unrecognized(expression.to_string())
    }
}

impl std::fmt::Display for ValidatorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidatorSpec::Named(name) => write!(f, ":{}", name),
            ValidatorSpec::Regex(re) => write!(f, "/{}/", re),
            ValidatorSpec::Unrecognized(raw) => write!(f, "{}", raw),
        }
    }
}

/// Validates input values against a validator expression.
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value, spec: &ValidatorSpec) -> Result<(), ValidatorError>;
}

/// Built-in regex and named validators.
#[derive(Debug, Default, Clone)]
pub struct BuiltinValidator;

impl BuiltinValidator {
    pub fn new() -> Self {
        Self
    }

    fn validate_named(&self, name: &str, value: &Value) -> Result<(), ValidatorError> {
        let valid = match name {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "float" => value.is_f64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "hash" => value.is_object(),
            "shellsafe" => value
                .as_str()
                .map(|s| !s.chars().any(|c| matches!(c, '`' | '$' | ';' | '|' | '&' | '>' | '<')))
                .unwrap_or(false),
            "ipv4address" => value.as_str().map(|s| s.parse::<Ipv4Addr>().is_ok()).unwrap_or(false),
            "ipv6address" => value.as_str().map(|s| s.parse::<Ipv6Addr>().is_ok()).unwrap_or(false),
            "ipaddress" => value.as_str().map(|s| s.parse::<IpAddr>().is_ok()).unwrap_or(false),
            other => return Err(ValidatorError::UnknownValidator(other.to_string())),
        };

        if valid {
            Ok(())
        } else {
            Err(ValidatorError::Rejected {
                validator: name.to_string(),
                value: display_value(value),
            })
        }
    }
}

impl Validator for BuiltinValidator {
    fn validate(&self, value: &Value, spec: &ValidatorSpec) -> Result<(), ValidatorError> {
        match spec {
            ValidatorSpec::Named(name) => self.validate_named(name, value),
            ValidatorSpec::Regex(pattern) => {
                let re = Regex::new(pattern)
                    .map_err(|e| ValidatorError::InvalidRegex(pattern.clone(), e.to_string()))?;
                let subject = display_value(value);

                if re.is_match(&subject) {
                    Ok(())
                } else {
                    Err(ValidatorError::Mismatch(subject, pattern.clone()))
                }
            }
            ValidatorSpec::Unrecognized(raw) => Err(ValidatorError::Unrecognized(raw.clone())),
        }
    }
}

/// Renders scalars without JSON quoting.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_parse() {
        assert_eq!(ValidatorSpec::parse(":shellsafe"), ValidatorSpec::Named("shellsafe".into()));
        assert_eq!(ValidatorSpec::parse("/^\\d+$/"), ValidatorSpec::Regex("^\\d+$".into()));
        assert_eq!(ValidatorSpec::parse("shellsafe"), ValidatorSpec::Unrecognized("shellsafe".into()));
        assert_eq!(ValidatorSpec::parse("/"), ValidatorSpec::Unrecognized("/".into()));
    }

    #[test]
    fn test_regex_validator() {
        let v = BuiltinValidator::new();
        let spec = ValidatorSpec::parse("/^[a-z]+$/");

        assert!(v.validate(&json!("web"), &spec).is_ok());
        assert!(matches!(
            v.validate(&json!("Web 1"), &spec),
            Err(ValidatorError::Mismatch(_, _))
        ));
        // numbers are matched on their text form
        assert!(v.validate(&json!(12), &ValidatorSpec::parse("/^\\d+$/")).is_ok());
    }

    #[test]
    fn test_named_validators() {
        let v = BuiltinValidator::new();

        assert!(v.validate(&json!("ls -l"), &ValidatorSpec::parse(":shellsafe")).is_ok());
        assert!(v.validate(&json!("ls; rm"), &ValidatorSpec::parse(":shellsafe")).is_err());
        assert!(v.validate(&json!("10.0.0.1"), &ValidatorSpec::parse(":ipv4address")).is_ok());
        assert!(v.validate(&json!("::1"), &ValidatorSpec::parse(":ipv6address")).is_ok());
        assert!(v.validate(&json!(5), &ValidatorSpec::parse(":integer")).is_ok());
        assert!(v.validate(&json!("5"), &ValidatorSpec::parse(":integer")).is_err());
    }

    #[test]
    fn test_fails_closed() {
        let v = BuiltinValidator::new();

        assert!(matches!(
            v.validate(&json!("x"), &ValidatorSpec::parse(":bogus")),
            Err(ValidatorError::UnknownValidator(_))
        ));
        assert!(matches!(
            v.validate(&json!("x"), &ValidatorSpec::parse("bogus")),
            Err(ValidatorError::Unrecognized(_))
        ));
        assert!(matches!(
            v.validate(&json!("x"), &ValidatorSpec::parse("/[/")),
            Err(ValidatorError::InvalidRegex(_, _))
        ));
    }
}
