//! Literal node lists.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{PlaybookError, PlaybookResult};

use super::NodeDiscovery;

#[derive(Debug, Clone, Default, Deserialize)]
struct StaticConfig {
    #[serde(default)]
    nodes: Vec<String>,
}

/// Discovery that returns the `nodes` property as given.
#[derive(Debug, Default)]
pub struct StaticNodes {
    config: StaticConfig,
}

impl StaticNodes {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeDiscovery for StaticNodes {
    fn configure(&mut self, properties: &Value) -> PlaybookResult<()> {
        self.config = serde_json::from_value(properties.clone())
            .map_err(|e| PlaybookError::Load(format!("Invalid static node set: {}", e)))?;
        Ok(())
    }

    fn validate_configuration(&self) -> PlaybookResult<()> {
        if self.config.nodes.iter().any(|node| node.trim().is_empty()) {
            return Err(PlaybookError::Load("Static node sets cannot list blank node names".to_string()));
        }
        Ok(())
    }

    async fn discover(&mut self) -> PlaybookResult<Vec<String>> {
        Ok(self.config.nodes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_static_discovery_keeps_order_and_duplicates() {
        let mut nodes = StaticNodes::new();
        nodes.configure(&json!({"type": "static", "nodes": ["b", "a", "b"], "limit": 2})).unwrap();
        nodes.validate_configuration().unwrap();

        assert_eq!(nodes.discover().await.unwrap(), vec!["b", "a", "b"]);
    }

    #[test]
    fn test_static_rejects_bad_nodes() {
        let mut nodes = StaticNodes::new();
        assert!(nodes.configure(&json!({"nodes": "web1"})).is_err());

        nodes.configure(&json!({"nodes": ["web1", " "]})).unwrap();
        assert!(nodes.validate_configuration().is_err());
    }

    #[test]
    fn test_static_discovery_without_runtime() {
        let mut nodes = StaticNodes::new();
        nodes.configure(&json!({"nodes": ["web1"]})).unwrap();

        let discovered = tokio_test::block_on(nodes.discover());
        tokio_test::assert_ok!(&discovered);
        assert_eq!(discovered.unwrap(), vec!["web1"]);
    }
}
