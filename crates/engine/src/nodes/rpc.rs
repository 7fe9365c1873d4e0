//! Discovery through the RPC layer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{PlaybookError, PlaybookResult};
use crate::rpc::{DiscoveryFilter, RpcClient};

use super::NodeDiscovery;

/// Discovers nodes matching agent, class, fact and identity filters.
pub struct RpcNodes {
    client: Arc<dyn RpcClient>,
    filter: DiscoveryFilter,
}

#[derive(Debug, Default, Deserialize)]
struct RpcNodesConfig {
    #[serde(default)]
    agents: Vec<String>,
    #[serde(default)]
    classes: Vec<String>,
    #[serde(default)]
    facts: Vec<String>,
    #[serde(default)]
    identities: Vec<String>,
    #[serde(default)]
    compound: Option<String>,
}

impl RpcNodes {
    pub fn new(client: Arc<dyn RpcClient>) -> Self {
        Self {
            client,
            filter: DiscoveryFilter::default(),
        }
    }

    pub fn filter(&self) -> &DiscoveryFilter {
        &self.filter
    }
}

#[async_trait]
impl NodeDiscovery for RpcNodes {
    fn configure(&mut self, properties: &Value) -> PlaybookResult<()> {
        let config: RpcNodesConfig = serde_json::from_value(properties.clone())
            .map_err(|e| PlaybookError::Load(format!("Invalid rpc node set: {}", e)))?;

        self.filter = DiscoveryFilter {
            agents: config.agents,
            classes: config.classes,
            facts: config.facts,
            identities: config.identities,
            compound: config.compound.filter(|c| !c.trim().is_empty()),
        };
        Ok(())
    }

    fn validate_configuration(&self) -> PlaybookResult<()> {
        if let Some(fact) = self.filter.facts.iter().find(|f| !f.contains('=') && !f.contains('<') && !f.contains('>')) {
            return Err(PlaybookError::Load(format!(
                "Fact filter '{}' needs a comparison such as fact=value",
                fact
            )));
        }
        Ok(())
    }

    async fn discover(&mut self) -> PlaybookResult<Vec<String>> {
        tracing::debug!(filter = ?self.filter, "Discovering nodes");
        Ok(self.client.discover(&self.filter).await?)
    }
}

impl std::fmt::Debug for RpcNodes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcNodes").field("filter", &self.filter).finish()
    }
}
