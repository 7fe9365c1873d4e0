//! Agent version requirements.
//!
//! A playbook declares the agents it uses together with a version range.
//! Ranges are checked against local capability descriptors during
//! preparation and against the live inventory of every node that a node set
//! expects to run the agent.

use std::sync::Arc;

use indexmap::IndexMap;
use semver::{Version, VersionReq};
use tracing::{debug, error, info, warn};

use crate::context::PlaybookContext;
use crate::ddl::CapabilityLookup;
use crate::error::{PlaybookError, PlaybookResult};
use crate::report::Report;
use crate::rpc::{inventory_from_replies, RpcClient};
use crate::tasks::RpcTask;

/// A parsed version range.
///
/// Accepts `*`, wildcards like `1.x`, bare versions (exact, or a prefix
/// match when partial), comparator sets joined by spaces or commas, hyphen
/// ranges `1.0.0 - 2.0.0`, `~` and `^` operators, and `||` alternatives.
#[derive(Debug, Clone)]
pub struct VersionRange {
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    pub fn parse(range: &str) -> PlaybookResult<Self> {
        let alternatives = range
            .split("||")
            .map(|alt| {
                let req = translate(alt.trim());
                VersionReq::parse(&req).map_err(|e| {
                    PlaybookError::Validation(format!("Invalid version range '{}': {}", range, e))
                })
            })
            .collect::<PlaybookResult<Vec<_>>>()?;

        Ok(Self { alternatives })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }
}

/// Rewrite one alternative into the comparator syntax `VersionReq` reads.
fn translate(range: &str) -> String {
    if range.is_empty() {
        return "*".to_string();
    }

    if let Some((low, high)) = range.split_once(" - ") {
        return format!(">={}, <={}", low.trim(), high.trim());
    }

    let mut comparators = Vec::new();
    let mut pending_op: Option<&str> = None;

    for token in range.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op = Some(token);
            continue;
        }

        let comparator = match pending_op.take() {
            Some(op) => format!("{}{}", op, token),
            None if is_bare(token) => format!("={}", token),
            None => token.to_string(),
        };
        comparators.push(comparator);
    }

    comparators.join(", ")
}

/// A version without operator or wildcard.
fn is_bare(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_digit())
        && !token
            .split(['-', '+'])
            .next()
            .unwrap_or_default()
            .split('.')
            .any(|part| matches!(part, "x" | "X" | "*"))
}

/// Parse a version, reading two component versions as `major.minor.0`.
pub fn parse_version(version: &str) -> PlaybookResult<Version> {
    let version = version.trim();
    let normalized = if version.split('.').count() == 2 {
        format!("{}.0", version)
    } else {
        version.to_string()
    };

    Version::parse(&normalized)
        .map_err(|e| PlaybookError::Validation(format!("Invalid version '{}': {}", version, e)))
}

/// Check a version against a range.
pub fn valid_version(have: &str, want: &str) -> PlaybookResult<bool> {
    let have = parse_version(have)?;
    Ok(VersionRange::parse(want)?.matches(&have))
}

/// Declared agents and the version ranges they must satisfy.
pub struct Uses {
    ctx: PlaybookContext,
    capabilities: Arc<dyn CapabilityLookup>,
    client: Arc<dyn RpcClient>,
    uses: IndexMap<String, String>,
}

impl Uses {
    pub fn new(
        ctx: PlaybookContext,
        capabilities: Arc<dyn CapabilityLookup>,
        client: Arc<dyn RpcClient>,
    ) -> Self {
        Self {
            ctx,
            capabilities,
            client,
            uses: IndexMap::new(),
        }
    }

    pub fn declare(&mut self, agent: impl Into<String>, range: impl Into<String>) {
        let agent = agent.into();
        let range = range.into();
        debug!(playbook = %self.ctx.name(), phase = "uses.prep", "Loading usage of {} version {}", agent, range);
        self.uses.insert(agent, range);
    }

    pub fn get(&self, agent: &str) -> Option<&str> {
        self.uses.get(agent).map(|s| s.as_str())
    }

    /// Record the declared ranges and check them against local descriptors.
    pub fn prepare(&self, report: &mut Report) -> PlaybookResult<()> {
        for (agent, range) in &self.uses {
            report.record_use(agent.clone(), range.clone());
        }

        self.validate_declared_versions()
    }

    /// Check every declared range against the local capability descriptor.
    ///
    /// All failing agents are reported together.
    pub fn validate_declared_versions(&self) -> PlaybookResult<()> {
        let invalid: Vec<&str> = self
            .uses
            .iter()
            .filter_map(|(agent, want)| {
                let checked = self
                    .capabilities
                    .lookup_version(agent)
                    .and_then(|have| valid_version(&have, want).map(|ok| (have, ok)));

                match checked {
                    Ok((have, true)) => {
                        debug!(
                            playbook = %self.ctx.name(),
                            phase = "uses.prep",
                            "Agent {} descriptor version {} matches desired {}",
                            agent,
                            have,
                            want
                        );
                        None
                    }
                    Ok((have, false)) => {
                        warn!(
                            playbook = %self.ctx.name(),
                            phase = "uses.prep",
                            "Agent {} descriptor version {} does not match desired {}",
                            agent,
                            have,
                            want
                        );
                        Some(agent.as_str())
                    }
                    Err(e) => {
                        warn!(
                            playbook = %self.ctx.name(),
                            phase = "uses.prep",
                            "Could not process descriptor for agent {}: {}: {}",
                            agent,
                            e.kind(),
                            e
                        );
                        Some(agent.as_str())
                    }
                }
            })
            .collect();

        if invalid.is_empty() {
            Ok(())
        } else {
            Err(PlaybookError::Validation(format!(
                "Descriptors for agent(s) {} did not match desired versions",
                invalid.join(", ")
            )))
        }
    }

    /// Check agent versions on the nodes expected to run them.
    ///
    /// `agents` maps an agent to the nodes whose node sets use it. One
    /// inventory request covers every node; every mismatch is collected
    /// before failing.
    pub async fn validate_live_inventory(&self, agents: &IndexMap<String, Vec<String>>) -> PlaybookResult<()> {
        let mut nodes: Vec<String> = Vec::new();
        for node in agents.values().flatten() {
            if !nodes.contains(node) {
                nodes.push(node.clone());
            }
        }

        if nodes.is_empty() {
            return Ok(());
        }

        info!(playbook = %self.ctx.name(), phase = "ddl.test", "Validating agent inventory on {} nodes", nodes.len());

        let task = RpcTask::adhoc(self.client.clone(), "rpcutil.agent_inventory", nodes.clone())?;
        let (success, message, replies) = task.execute().await?;

        if !success && replies.is_empty() {
            return Err(PlaybookError::Validation(format!(
                "Could not determine agent inventory: {}",
                message
            )));
        }

        let inventory = inventory_from_replies(&replies);
        let mut failures = Vec::new();

        for (agent, agent_nodes) in agents {
            let Some(want) = self.uses.get(agent) else {
                failures.push(format!(
                    "Agent {} is mentioned in node sets but not declared in the uses list",
                    agent
                ));
                continue;
            };

            for node in agent_nodes {
                let Some(node_agents) = inventory.get(node) else {
                    failures.push(format!("Did not receive an inventory for node {}", node));
                    continue;
                };

                let Some(metadata) = node_agents.iter().find(|m| &m.agent == agent) else {
                    failures.push(format!("Node {} does not have the agent {}", node, agent));
                    continue;
                };

                match valid_version(&metadata.version, want) {
                    Ok(true) => debug!(
                        playbook = %self.ctx.name(),
                        phase = "ddl.test",
                        "Agent {} on {} version {} matches desired version {}",
                        agent,
                        node,
                        metadata.version,
                        want
                    ),
                    Ok(false) => failures.push(format!(
                        "Agent {} on {} version {} does not match desired version {}",
                        agent, node, metadata.version, want
                    )),
                    Err(e) => failures.push(format!("Agent {} on {}: {}", agent, node, e)),
                }
            }
        }

        if !failures.is_empty() {
            for failure in &failures {
                error!(playbook = %self.ctx.name(), phase = "ddl.test", "{}", failure);
            }
            return Err(PlaybookError::Validation(format!(
                "Network agents did not match the declared versions: {}",
                failures.join("; ")
            )));
        }

        info!(playbook = %self.ctx.name(), phase = "ddl.test", "Agent inventory on {} nodes validated", nodes.len());
        Ok(())
    }
}

impl std::fmt::Debug for Uses {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uses").field("uses", &self.uses).finish()
    }
}
