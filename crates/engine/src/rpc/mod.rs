//! Remote procedure call contract.
//!
//! The transport that reaches remote nodes is external; the engine only
//! depends on [`RpcClient`]. [`HttpRpcClient`] forwards requests to an RPC
//! gateway over HTTP.

mod http;

pub use self::http::HttpRpcClient;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by an RPC transport.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Transport could not deliver the request.
    #[error("transport error: {0}")]
    Transport(String),

    /// Transport answered with something that is not a valid reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request did not complete in time.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),
}

/// A request for one agent action against a set of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub agent: String,
    pub action: String,
    pub nodes: Vec<String>,

    #[serde(default)]
    pub arguments: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_sleep_time: Option<u64>,
}

impl RpcRequest {
    pub fn new(agent: impl Into<String>, action: impl Into<String>, nodes: Vec<String>) -> Self {
        Self {
            agent: agent.into(),
            action: action.into(),
            nodes,
            arguments: Value::Object(Default::default()),
            batch_size: None,
            batch_sleep_time: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    /// `agent.action` form used in logs and messages.
    pub fn qualified_action(&self) -> String {
        format!("{}.{}", self.agent, self.action)
    }
}

/// One node's reply to an RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcReply {
    pub sender: String,

    #[serde(default)]
    pub agent: String,

    #[serde(default)]
    pub action: String,

    pub statuscode: u32,

    #[serde(default)]
    pub statusmsg: String,

    #[serde(default)]
    pub data: Value,
}

impl RpcReply {
    pub fn is_success(&self) -> bool {
        self.statuscode == 0
    }
}

/// Node discovery filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryFilter {
    #[serde(default)]
    pub agents: Vec<String>,

    #[serde(default)]
    pub classes: Vec<String>,

    #[serde(default)]
    pub facts: Vec<String>,

    #[serde(default)]
    pub identities: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compound: Option<String>,
}

/// Client for issuing requests to remote nodes.
///
/// Each call is one blocking request to one set of nodes; any fan-out within
/// the call belongs to the transport.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Run an agent action and collect every reply.
    async fn call(&self, request: &RpcRequest) -> Result<Vec<RpcReply>, RpcError>;

    /// Discover node identities matching a filter.
    async fn discover(&self, filter: &DiscoveryFilter) -> Result<Vec<String>, RpcError>;
}

/// An agent and its version as reported by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub agent: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct InventoryData {
    #[serde(default)]
    agents: Vec<AgentMetadata>,
}

/// Per-node agent inventory built from `rpcutil.agent_inventory` replies.
///
/// Failed replies and replies without readable agent data are left out, so a
/// missing entry means the node's inventory is unknown.
pub fn inventory_from_replies(replies: &[RpcReply]) -> HashMap<String, Vec<AgentMetadata>> {
    replies
        .iter()
        .filter(|reply| reply.is_success())
        .filter_map(|reply| {
            serde_json::from_value::<InventoryData>(reply.data.clone())
                .ok()
                .map(|data| (reply.sender.clone(), data.agents))
        })
        .collect()
}

/// Split an `agent.action` string.
pub fn split_action(action: &str) -> Option<(&str, &str)> {
    let (agent, action) = action.split_once('.')?;
    if agent.is_empty() || action.is_empty() || action.contains('.') {
        return None;
    }
    Some((agent, action))
}
