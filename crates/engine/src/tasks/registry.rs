//! Task runner registry and dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PlaybookError, PlaybookResult};
use crate::rpc::RpcClient;

use super::rpc::RpcTask;

/// Result of one task attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutcome {
    /// Whether the attempt succeeded.
    pub success: bool,

    /// Human readable summary.
    pub message: String,

    /// Raw per-node RPC outcomes, in arrival order.
    pub results: Vec<Value>,
}

impl TaskOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            results: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            results: Vec::new(),
        }
    }

    pub fn with_results(mut self, results: Vec<Value>) -> Self {
        self.results = results;
        self
    }
}

/// A unit of remote work bound to one task declaration.
///
/// The runner is reconfigured with freshly resolved properties before every
/// attempt.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Apply resolved task properties.
    fn configure(&mut self, properties: &Value) -> PlaybookResult<()>;

    /// Check the applied properties are usable.
    fn validate_configuration(&self) -> PlaybookResult<()>;

    /// Run one attempt.
    async fn run(&mut self) -> PlaybookResult<TaskOutcome>;
}

type RunnerFactory = Arc<dyn Fn() -> Box<dyn TaskRunner> + Send + Sync>;

/// Registry mapping task kinds to runner constructors.
#[derive(Clone)]
pub struct TaskRegistry {
    factories: HashMap<String, RunnerFactory>,
}

impl TaskRegistry {
    /// Create a new empty task registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the built-in `rpc` kind.
    pub fn with_defaults(client: Arc<dyn RpcClient>) -> Self {
        let mut registry = Self::new();
        registry.register("rpc", move || Box::new(RpcTask::new(client.clone())));
        registry
    }

    /// Register a runner constructor.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn TaskRunner> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Check if a kind is registered.
    pub fn has(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// List all registered kinds.
    pub fn list(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Construct a runner for a task kind.
    pub fn create(&self, kind: &str) -> PlaybookResult<Box<dyn TaskRunner>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| PlaybookError::Load(format!("Unknown task type {}", kind)))?;
        Ok(factory())
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("kinds", &self.list())
            .finish()
    }
}
