//! Node lists read from YAML or JSON files.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{PlaybookError, PlaybookResult};

use super::NodeDiscovery;

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    source: Option<PathBuf>,

    #[serde(default)]
    group: Option<String>,
}

/// A source document is either a plain list or named groups of lists.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NodeDocument {
    List(Vec<String>),
    Groups(indexmap::IndexMap<String, Vec<String>>),
}

/// Discovery from a file holding node names.
#[derive(Debug, Default)]
pub struct FileNodes {
    config: FileConfig,
}

impl FileNodes {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeDiscovery for FileNodes {
    fn configure(&mut self, properties: &Value) -> PlaybookResult<()> {
        self.config = serde_json::from_value(properties.clone())
            .map_err(|e| PlaybookError::Load(format!("Invalid file node set: {}", e)))?;
        Ok(())
    }

    fn validate_configuration(&self) -> PlaybookResult<()> {
        match &self.config.source {
            Some(source) if !source.as_os_str().is_empty() => Ok(()),
            _ => Err(PlaybookError::Load("File node sets need a source".to_string())),
        }
    }

    async fn discover(&mut self) -> PlaybookResult<Vec<String>> {
        let Some(source) = &self.config.source else {
            return Err(PlaybookError::Load("File node sets need a source".to_string()));
        };

        let content = tokio::fs::read_to_string(source).await.map_err(|e| {
            PlaybookError::Discovery(format!("Could not read node source {}: {}", source.display(), e))
        })?;

        let document: NodeDocument = serde_yaml::from_str(&content).map_err(|e| {
            PlaybookError::Discovery(format!("Could not parse node source {}: {}", source.display(), e))
        })?;

        match (document, &self.config.group) {
            (NodeDocument::List(nodes), None) => Ok(nodes),
            (NodeDocument::List(_), Some(group)) => Err(PlaybookError::Discovery(format!(
                "Node source {} has no groups, cannot select {}",
                source.display(),
                group
            ))),
            (NodeDocument::Groups(mut groups), Some(group)) => groups.shift_remove(group).ok_or_else(|| {
                PlaybookError::Discovery(format!("Node source {} has no group {}", source.display(), group))
            }),
            (NodeDocument::Groups(_), None) => Err(PlaybookError::Discovery(format!(
                "Node source {} holds groups, a group must be selected",
                source.display()
            ))),
        }
    }
}
