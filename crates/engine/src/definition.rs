//! Playbook declarations.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PlaybookError, PlaybookResult};
use crate::inputs::InputSpec;
use crate::tasks::HookSetKind;
use crate::validator::display_value;

fn default_on_fail() -> String {
    "fail".to_string()
}

fn default_loglevel() -> String {
    "info".to_string()
}

fn default_run_as() -> String {
    "choria=deployer".to_string()
}

/// Descriptive playbook fields, immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybookMetadata {
    pub name: String,
    pub version: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub on_fail: String,
    pub loglevel: String,
    pub run_as: String,
}

impl PlaybookMetadata {
    /// A metadata field by name.
    pub fn item(&self, item: &str) -> Option<Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut fields)) => fields.remove(item),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Deserialize)]
struct Declaration {
    #[serde(default)]
    name: Option<Value>,
    #[serde(default)]
    version: Option<Value>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_on_fail")]
    on_fail: String,
    #[serde(default = "default_loglevel")]
    loglevel: String,
    #[serde(default)]
    run_as: Option<String>,
    #[serde(default)]
    inputs: IndexMap<String, InputSpec>,
    #[serde(default)]
    uses: IndexMap<String, Value>,
    #[serde(default)]
    nodes: IndexMap<String, Value>,
    #[serde(default)]
    tasks: Vec<Value>,
    #[serde(default)]
    hooks: IndexMap<String, Vec<Value>>,
}

/// A parsed playbook.
///
/// `uses`, `nodes`, `tasks` and `hooks` are kept as declared, template tokens
/// included, and are resolved while the playbook runs.
#[derive(Debug, Clone)]
pub struct PlaybookDefinition {
    pub metadata: PlaybookMetadata,
    pub inputs: IndexMap<String, InputSpec>,
    pub uses: IndexMap<String, Value>,
    pub nodes: IndexMap<String, Value>,
    pub tasks: Vec<Value>,
    pub hooks: IndexMap<String, Vec<Value>>,
    raw: Value,
}

impl PlaybookDefinition {
    /// Parse a YAML (or JSON) playbook.
    pub fn from_yaml_str(content: &str) -> PlaybookResult<Self> {
        let raw: Value = serde_yaml::from_str(content)
            .map_err(|e| PlaybookError::Load(format!("Could not parse playbook: {}", e)))?;
        Self::from_value(raw)
    }

    pub fn from_file(path: impl AsRef<Path>) -> PlaybookResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PlaybookError::Load(format!("Could not read playbook {}: {}", path.display(), e))
        })?;

        Self::from_yaml_str(&content)
    }

    pub fn from_value(raw: Value) -> PlaybookResult<Self> {
        if !raw.is_object() {
            return Err(PlaybookError::Load("Playbook must be a map".to_string()));
        }

        let declaration: Declaration = serde_json::from_value(raw.clone())
            .map_err(|e| PlaybookError::Load(format!("Invalid playbook: {}", e)))?;

        let name = declaration
            .name
            .as_ref()
            .map(display_value)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| PlaybookError::Load("Playbooks must have a name".to_string()))?;

        for hook in declaration.hooks.keys() {
            if HookSetKind::from_hook_name(hook).is_none() {
                return Err(PlaybookError::Load(format!("Unknown hook set {}", hook)));
            }
        }

        let metadata = PlaybookMetadata {
            name,
            version: declaration.version.as_ref().map(display_value),
            author: declaration.author,
            description: declaration.description,
            tags: declaration.tags,
            on_fail: declaration.on_fail,
            loglevel: declaration.loglevel,
            run_as: declaration.run_as.unwrap_or_else(default_run_as),
        };

        Ok(Self {
            metadata,
            inputs: declaration.inputs,
            uses: declaration.uses,
            nodes: declaration.nodes,
            tasks: declaration.tasks,
            hooks: declaration.hooks,
            raw,
        })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The declaration exactly as parsed.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}
