//! Node sets.
//!
//! Each node set names a discovery strategy and the policy applied to what
//! it finds. Sets are discovered one at a time in declaration order, then
//! connectivity and agent versions are checked across all of them.

mod file;
mod rpc;
mod static_nodes;

pub use self::file::FileNodes;
pub use self::rpc::RpcNodes;
pub use self::static_nodes::StaticNodes;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::context::PlaybookContext;
use crate::error::{PlaybookError, PlaybookResult};
use crate::report::Report;
use crate::rpc::RpcClient;
use crate::tasks::RpcTask;
use crate::template;
use crate::uses::Uses;

/// Discovery strategy used when a node set has no `type`.
pub const DEFAULT_DISCOVERY: &str = "rpc";

/// A strategy that turns node set properties into node names.
#[async_trait]
pub trait NodeDiscovery: Send + Sync {
    /// Apply the node set properties.
    fn configure(&mut self, properties: &Value) -> PlaybookResult<()>;

    /// Check the applied properties are usable.
    fn validate_configuration(&self) -> PlaybookResult<()>;

    /// Called once before discovery.
    async fn prepare(&mut self) -> PlaybookResult<()> {
        Ok(())
    }

    /// Discover node names in order.
    async fn discover(&mut self) -> PlaybookResult<Vec<String>>;
}

type DiscoveryFactory = Arc<dyn Fn() -> Box<dyn NodeDiscovery> + Send + Sync>;

/// Registry mapping node set types to discovery strategies.
#[derive(Clone, Default)]
pub struct DiscoveryRegistry {
    factories: HashMap<String, DiscoveryFactory>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `rpc`, `static` and `file` strategies.
    pub fn with_defaults(client: Arc<dyn RpcClient>) -> Self {
        let mut registry = Self::new();
        registry.register("rpc", move || -> Box<dyn NodeDiscovery> { Box::new(RpcNodes::new(client.clone())) });
        registry.register("static", || -> Box<dyn NodeDiscovery> { Box::new(StaticNodes::new()) });
        registry.register("file", || -> Box<dyn NodeDiscovery> { Box::new(FileNodes::new()) });
        registry
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn NodeDiscovery> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn has(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn list(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn create(&self, kind: &str) -> PlaybookResult<Box<dyn NodeDiscovery>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| PlaybookError::Load(format!("Unknown node set type {}", kind)))?;
        Ok(factory())
    }

    /// Check that raw node set declarations name known strategies.
    ///
    /// Templated types can only be checked once they are resolved.
    pub fn check_declaration(&self, declaration: &IndexMap<String, Value>) -> PlaybookResult<()> {
        for (name, properties) in declaration {
            let Some(props) = properties.as_object() else {
                return Err(PlaybookError::Load(format!("Node set {} must be a map", name)));
            };

            match props.get("type") {
                None | Some(Value::Null) => {}
                Some(Value::String(kind)) if template::is_template(kind) => {}
                Some(Value::String(kind)) => {
                    if !self.has(kind) {
                        return Err(PlaybookError::Load(format!(
                            "Unknown node set type {} for node set {}",
                            kind, name
                        )));
                    }
                }
                Some(other) => {
                    return Err(PlaybookError::Load(format!(
                        "Node set {} has an invalid type {}",
                        name, other
                    )))
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DiscoveryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryRegistry")
            .field("kinds", &self.list())
            .finish()
    }
}

/// Policy fields shared by every node set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NodeSetPolicy {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub limit: Option<usize>,

    #[serde(default)]
    pub at_least: Option<usize>,

    #[serde(default)]
    pub when_empty: Option<String>,

    #[serde(default)]
    pub test: bool,

    #[serde(default)]
    pub uses: Vec<String>,
}

/// A declared node set and what it discovered.
pub struct NodeSet {
    name: String,
    policy: NodeSetPolicy,
    discovery: Box<dyn NodeDiscovery>,
    discovered: Vec<String>,
}

impl NodeSet {
    /// Build a node set from resolved properties.
    pub fn load(name: &str, properties: &Value, registry: &DiscoveryRegistry) -> PlaybookResult<Self> {
        let policy: NodeSetPolicy = serde_json::from_value(properties.clone())
            .map_err(|e| PlaybookError::Load(format!("Invalid node set {}: {}", name, e)))?;

        let mut discovery = registry.create(policy.kind.as_deref().unwrap_or(DEFAULT_DISCOVERY))?;
        discovery.configure(properties)?;
        discovery.validate_configuration()?;

        Ok(Self {
            name: name.to_string(),
            policy,
            discovery,
            discovered: Vec::new(),
        })
    }

    /// Discover nodes and apply the emptiness, limit and minimum policies.
    async fn prepare(&mut self, ctx: &PlaybookContext) -> PlaybookResult<()> {
        debug!(playbook = %ctx.name(), phase = %self.name, "Preparing node set {}", self.name);

        self.discovery.prepare().await?;
        let mut discovered = self.discovery.discover().await?;

        if discovered.is_empty() {
            return Err(PlaybookError::Discovery(match &self.policy.when_empty {
                Some(reason) => reason.clone(),
                None => format!("Did not discover any nodes for nodeset {}", self.name),
            }));
        }

        if let Some(limit) = self.policy.limit {
            debug!(
                playbook = %ctx.name(),
                phase = %self.name,
                "Limiting node set {} to {} nodes from {}",
                self.name,
                limit,
                discovered.len()
            );
            discovered.truncate(limit);
        }

        if let Some(at_least) = self.policy.at_least {
            if discovered.len() < at_least {
                return Err(PlaybookError::Discovery(format!(
                    "Node set {} needs at least {} nodes, got {}",
                    self.name,
                    at_least,
                    discovered.len()
                )));
            }
        }

        info!(
            playbook = %ctx.name(),
            phase = %self.name,
            "Discovered {} node(s) in node set {}",
            discovered.len(),
            self.name
        );

        self.discovered = discovered;
        Ok(())
    }
}

impl std::fmt::Debug for NodeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSet")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("discovered", &self.discovered)
            .finish()
    }
}

/// All node sets of a playbook.
pub struct NodeSets {
    ctx: PlaybookContext,
    client: Arc<dyn RpcClient>,
    sets: IndexMap<String, NodeSet>,
}

impl NodeSets {
    pub fn new(ctx: PlaybookContext, client: Arc<dyn RpcClient>) -> Self {
        Self {
            ctx,
            client,
            sets: IndexMap::new(),
        }
    }

    /// Load resolved node set declarations in order.
    pub fn from_declaration(
        ctx: PlaybookContext,
        client: Arc<dyn RpcClient>,
        declaration: &IndexMap<String, Value>,
        registry: &DiscoveryRegistry,
    ) -> PlaybookResult<Self> {
        let mut sets = Self::new(ctx, client);
        for (name, properties) in declaration {
            sets.sets.insert(name.clone(), NodeSet::load(name, properties, registry)?);
        }
        Ok(sets)
    }

    /// Nodes discovered for a set.
    pub fn get(&self, name: &str) -> PlaybookResult<Vec<String>> {
        self.sets
            .get(name)
            .map(|set| set.discovered.clone())
            .ok_or_else(|| PlaybookError::Resolution(format!("Unknown nodeset {}", name)))
    }

    /// Discover every set, probe connectivity and check agent versions.
    pub async fn prepare(&mut self, uses: &Uses, report: &mut Report) -> PlaybookResult<()> {
        for set in self.sets.values_mut() {
            set.prepare(&self.ctx).await?;
            report.record_nodeset(set.name.clone(), set.discovered.clone());
        }

        self.test_nodes().await?;

        let agents = self.agent_nodes();
        uses.validate_live_inventory(&agents).await
    }

    /// Union of the nodes of every set marked for a connectivity test.
    pub fn nodes_to_test(&self) -> Vec<String> {
        let mut nodes: Vec<String> = Vec::new();
        for node in self
            .sets
            .values()
            .filter(|set| set.policy.test)
            .flat_map(|set| set.discovered.iter())
        {
            if !nodes.contains(node) {
                nodes.push(node.clone());
            }
        }
        nodes
    }

    /// Ping every node marked for testing in a single request.
    pub async fn test_nodes(&self) -> PlaybookResult<()> {
        let nodes = self.nodes_to_test();
        if nodes.is_empty() {
            return Ok(());
        }

        info!(playbook = %self.ctx.name(), phase = "conn.test", "Checking connectivity for {} nodes", nodes.len());

        let probe = RpcTask::adhoc(self.client.clone(), "rpcutil.ping", nodes)?;
        let (success, message, _) = probe.execute().await?;

        if success {
            Ok(())
        } else {
            Err(PlaybookError::Connectivity(format!(
                "Connectivity test failed for some nodes: {}",
                message
            )))
        }
    }

    /// Agents named in node set `uses` lists, mapped to the nodes expected
    /// to run them.
    pub fn agent_nodes(&self) -> IndexMap<String, Vec<String>> {
        let mut agents: IndexMap<String, Vec<String>> = IndexMap::new();
        for set in self.sets.values() {
            for agent in &set.policy.uses {
                agents
                    .entry(agent.clone())
                    .or_default()
                    .extend(set.discovered.iter().cloned());
            }
        }
        agents
    }
}

impl std::fmt::Debug for NodeSets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSets").field("sets", &self.sets).finish()
    }
}
