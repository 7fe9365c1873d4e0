//! Playbook error types.

use thiserror::Error;

use crate::rpc::RpcError;
use crate::validator::ValidatorError;

/// Errors that can occur while loading, preparing or running a playbook.
#[derive(Debug, Error)]
pub enum PlaybookError {
    /// Playbook declaration is missing or malformed.
    #[error("Load error: {0}")]
    Load(String),

    /// Input, agent version or validator failure.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Required inputs without a value, batched.
    #[error("Values were required but not given for inputs: {}", .0.join(", "))]
    MissingInputs(Vec<String>),

    /// A supplied input value failed validation or coercion.
    #[error("Failed to validate value for input {input}")]
    InvalidInput {
        input: String,
        #[source]
        source: ValidatorError,
    },

    /// Node set discovered nothing or fewer nodes than required.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Connectivity probe failed.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Main tasks failed after exhausting their retries.
    #[error("Execution error: {0}")]
    Execution(String),

    /// A pre_book or post_book hook set failed.
    #[error("Hook error: {0}")]
    Hook(String),

    /// Template token could not be resolved.
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Capability descriptor lookup failed.
    #[error("Capability error: {0}")]
    Capability(String),

    /// Remote procedure call failed.
    #[error("RPC error")]
    Rpc(#[from] RpcError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// YAML parse error.
    #[error("YAML error: {0}")]
    Yaml(String),
}

impl PlaybookError {
    /// Short class name used in report messages.
    pub fn kind(&self) -> &'static str {
        match self {
            PlaybookError::Load(_) => "LoadError",
            PlaybookError::Validation(_)
            | PlaybookError::MissingInputs(_)
            | PlaybookError::InvalidInput { .. } => "ValidationError",
            PlaybookError::Discovery(_) => "DiscoveryError",
            PlaybookError::Connectivity(_) => "ConnectivityError",
            PlaybookError::Execution(_) => "ExecutionError",
            PlaybookError::Hook(_) => "HookError",
            PlaybookError::Resolution(_) => "ResolutionError",
            PlaybookError::Capability(_) => "CapabilityError",
            PlaybookError::Rpc(_) => "RpcError",
            PlaybookError::Io(_) => "IoError",
            PlaybookError::Json(_) => "JsonError",
            PlaybookError::Yaml(_) => "YamlError",
        }
    }

    /// Renders the error followed by every source in its cause chain.
    pub fn chain(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);

        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        message
    }
}

/// Result type alias using PlaybookError.
pub type PlaybookResult<T> = Result<T, PlaybookError>;

impl From<std::io::Error> for PlaybookError {
    fn from(e: std::io::Error) -> Self {
        PlaybookError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PlaybookError {
    fn from(e: serde_json::Error) -> Self {
        PlaybookError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for PlaybookError {
    fn from(e: serde_yaml::Error) -> Self {
        PlaybookError::Yaml(e.to_string())
    }
}
