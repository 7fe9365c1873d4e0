//! RPC task runner.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{PlaybookError, PlaybookResult};
use crate::rpc::{split_action, RpcClient, RpcReply, RpcRequest};

use super::registry::{TaskOutcome, TaskRunner};

/// Properties understood by the `rpc` task kind.
#[derive(Debug, Clone, Deserialize)]
struct RpcTaskConfig {
    action: String,

    #[serde(default)]
    nodes: Vec<String>,

    #[serde(default)]
    properties: Value,

    #[serde(default)]
    silent: bool,

    #[serde(default)]
    batch_size: Option<u32>,

    #[serde(default)]
    batch_sleep_time: Option<u64>,
}

/// Runs one agent action against a list of nodes.
pub struct RpcTask {
    client: Arc<dyn RpcClient>,
    config: Option<RpcTaskConfig>,
}

impl RpcTask {
    pub fn new(client: Arc<dyn RpcClient>) -> Self {
        Self {
            client,
            config: None,
        }
    }

    /// A silent, configured task for internal checks like connectivity probes.
    pub fn adhoc(client: Arc<dyn RpcClient>, action: &str, nodes: Vec<String>) -> PlaybookResult<Self> {
        let mut task = Self::new(client);
        task.configure(&serde_json::json!({
            "action": action,
            "nodes": nodes,
            "silent": true,
        }))?;
        task.validate_configuration()?;
        Ok(task)
    }

    fn config(&self) -> PlaybookResult<&RpcTaskConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| PlaybookError::Validation("RPC task has not been configured".to_string()))
    }

    fn request(&self) -> PlaybookResult<RpcRequest> {
        let config = self.config()?;
        let (agent, action) = split_action(&config.action).ok_or_else(|| {
            PlaybookError::Validation(format!("Invalid RPC action '{}', expected agent.action", config.action))
        })?;

        let arguments = match &config.properties {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };

        let mut request = RpcRequest::new(agent, action, config.nodes.clone()).with_arguments(arguments);
        request.batch_size = config.batch_size;
        request.batch_sleep_time = config.batch_sleep_time;
        Ok(request)
    }

    fn summarize(&self, request: &RpcRequest, replies: &[RpcReply], elapsed: f64) -> (bool, String) {
        let ok = replies.iter().filter(|r| r.is_success()).count();
        let failed = replies.len() - ok;
        let missing = request
            .nodes
            .iter()
            .filter(|node| !replies.iter().any(|r| &r.sender == *node))
            .count();

        let success = failed == 0 && missing == 0;
        let verdict = if success { "Successful" } else { "Failed" };

        (
            success,
            format!(
                "{} request for {} in {:.2}s against {} node(s): {} ok, {} failed, {} no reply",
                verdict,
                request.qualified_action(),
                elapsed,
                request.nodes.len(),
                ok,
                failed,
                missing
            ),
        )
    }

    /// Run the request and return typed replies.
    pub async fn execute(&self) -> PlaybookResult<(bool, String, Vec<RpcReply>)> {
        let request = self.request()?;
        let silent = self.config()?.silent;
        let started = Instant::now();

        let replies = match self.client.call(&request).await {
            Ok(replies) => replies,
            Err(e) => {
                return Ok((
                    false,
                    format!("Failed request for {}: {}", request.qualified_action(), e),
                    Vec::new(),
                ));
            }
        };

        if !silent {
            for reply in replies.iter().filter(|r| !r.is_success()) {
                tracing::warn!(
                    node = %reply.sender,
                    action = %request.qualified_action(),
                    statuscode = reply.statuscode,
                    "{}",
                    reply.statusmsg
                );
            }
        }

        let (success, message) = self.summarize(&request, &replies, started.elapsed().as_secs_f64());
        Ok((success, message, replies))
    }
}

#[async_trait]
impl TaskRunner for RpcTask {
    fn configure(&mut self, properties: &Value) -> PlaybookResult<()> {
        let config: RpcTaskConfig = serde_json::from_value(properties.clone())
            .map_err(|e| PlaybookError::Validation(format!("Invalid rpc task properties: {}", e)))?;
        self.config = Some(config);
        Ok(())
    }

    fn validate_configuration(&self) -> PlaybookResult<()> {
        let config = self.config()?;

        if split_action(&config.action).is_none() {
            return Err(PlaybookError::Validation(format!(
                "Invalid RPC action '{}', expected agent.action",
                config.action
            )));
        }

        if config.nodes.is_empty() {
            return Err(PlaybookError::Validation(format!(
                "RPC task {} needs at least one node",
                config.action
            )));
        }

        if !(config.properties.is_object() || config.properties.is_null()) {
            return Err(PlaybookError::Validation(format!(
                "RPC task {} properties must be a map",
                config.action
            )));
        }

        Ok(())
    }

    async fn run(&mut self) -> PlaybookResult<TaskOutcome> {
        let (success, message, replies) = self.execute().await?;

        let results = replies
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TaskOutcome {
            success,
            message,
            results,
        })
    }
}

impl std::fmt::Debug for RpcTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcTask").field("config", &self.config).finish()
    }
}
