//! Playbook engine.
//!
//! Composes inputs, uses, node sets and tasks into a single run and owns the
//! report for its duration.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{error, info};

use crate::context::PlaybookContext;
use crate::ddl::CapabilityLookup;
use crate::definition::{PlaybookDefinition, PlaybookMetadata};
use crate::error::{PlaybookError, PlaybookResult};
use crate::inputs::{InputSet, OptionDescriptor};
use crate::nodes::{DiscoveryRegistry, NodeSets};
use crate::report::{Report, OUTCOME_OK};
use crate::rpc::RpcClient;
use crate::tasks::{TaskRegistry, Tasks};
use crate::template::{self, TemplateSource};
use crate::uses::Uses;
use crate::validator::{display_value, BuiltinValidator, Validator};

/// External collaborators a playbook runs against.
#[derive(Clone)]
pub struct Services {
    pub rpc: Arc<dyn RpcClient>,
    pub capabilities: Arc<dyn CapabilityLookup>,
    pub validator: Arc<dyn Validator>,
    pub tasks: TaskRegistry,
    pub discovery: DiscoveryRegistry,
}

impl Services {
    /// Services with the built-in validator, task kinds and discovery types.
    pub fn new(rpc: Arc<dyn RpcClient>, capabilities: Arc<dyn CapabilityLookup>) -> Self {
        Self {
            tasks: TaskRegistry::with_defaults(rpc.clone()),
            discovery: DiscoveryRegistry::with_defaults(rpc.clone()),
            validator: Arc::new(BuiltinValidator::new()),
            rpc,
            capabilities,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("tasks", &self.tasks)
            .field("discovery", &self.discovery)
            .finish()
    }
}

/// Borrowed view of the run state that templates resolve against.
struct RunState<'a> {
    metadata: &'a PlaybookMetadata,
    inputs: &'a InputSet,
    nodes: &'a NodeSets,
}

impl TemplateSource for RunState<'_> {
    fn input_value(&self, name: &str) -> PlaybookResult<Value> {
        self.inputs.get(name)
    }

    fn discovered_nodes(&self, name: &str) -> PlaybookResult<Vec<String>> {
        self.nodes.get(name)
    }

    fn metadata_item(&self, name: &str) -> PlaybookResult<Value> {
        self.metadata
            .item(name)
            .ok_or_else(|| PlaybookError::Resolution(format!("Unknown playbook metadata {}", name)))
    }
}

/// A loaded playbook ready to run once.
pub struct Playbook {
    ctx: PlaybookContext,
    definition: PlaybookDefinition,
    services: Services,
    inputs: InputSet,
    uses: Uses,
    nodes: NodeSets,
    tasks: Tasks,
    report: Report,
}

impl Playbook {
    /// Bind a declaration to its collaborators.
    ///
    /// Unknown task kinds, hook sets and node set types fail here.
    pub fn new(definition: PlaybookDefinition, services: Services) -> PlaybookResult<Self> {
        let ctx = PlaybookContext::new(definition.name()).with_version(definition.metadata.version.clone());

        let mut report = Report::new();
        report.record_metadata(definition.metadata.to_value());

        let inputs = InputSet::from_declaration(ctx.clone(), services.validator.clone(), &definition.inputs);
        services.discovery.check_declaration(&definition.nodes)?;
        let tasks = Tasks::from_declaration(ctx.clone(), &definition.tasks, &definition.hooks, &services.tasks)?;

        let uses = Uses::new(ctx.clone(), services.capabilities.clone(), services.rpc.clone());
        let nodes = NodeSets::new(ctx.clone(), services.rpc.clone());

        Ok(Self {
            ctx,
            definition,
            services,
            inputs,
            uses,
            nodes,
            tasks,
            report,
        })
    }

    pub fn from_file(path: impl AsRef<Path>, services: Services) -> PlaybookResult<Self> {
        Self::new(PlaybookDefinition::from_file(path)?, services)
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    /// Log level declared by the playbook.
    pub fn log_level(&self) -> &str {
        &self.definition.metadata.loglevel
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn option_descriptors(&self, set_required: bool) -> Vec<OptionDescriptor> {
        self.inputs.option_descriptors(set_required)
    }

    pub fn input_value(&self, name: &str) -> PlaybookResult<Value> {
        self.state().input_value(name)
    }

    pub fn discovered_nodes(&self, name: &str) -> PlaybookResult<Vec<String>> {
        self.state().discovered_nodes(name)
    }

    pub fn metadata_item(&self, name: &str) -> PlaybookResult<Value> {
        self.state().metadata_item(name)
    }

    fn state(&self) -> RunState<'_> {
        RunState {
            metadata: &self.definition.metadata,
            inputs: &self.inputs,
            nodes: &self.nodes,
        }
    }

    /// Resolve inputs, check agent versions and discover nodes.
    ///
    /// Uses and node sets are resolved here, after inputs, so they may
    /// reference input values.
    pub async fn prepare(&mut self, inputs: &HashMap<String, Value>) -> PlaybookResult<()> {
        info!(playbook = %self.ctx.name(), phase = "inputs.prep", "Preparing inputs");
        self.inputs.prepare(inputs, &mut self.report)?;

        let uses = template::resolve(&serde_json::to_value(&self.definition.uses)?, &self.state())?;
        let mut declared = Uses::new(
            self.ctx.clone(),
            self.services.capabilities.clone(),
            self.services.rpc.clone(),
        );
        if let Value::Object(uses) = uses {
            for (agent, range) in uses {
                declared.declare(agent, display_value(&range));
            }
        }
        self.uses = declared;

        info!(playbook = %self.ctx.name(), phase = "uses.prep", "Checking agent descriptors");
        self.uses.prepare(&mut self.report)?;

        let nodes = template::resolve(&serde_json::to_value(&self.definition.nodes)?, &self.state())?;
        let nodes: IndexMap<String, Value> = serde_json::from_value(nodes)?;
        self.nodes = NodeSets::from_declaration(
            self.ctx.clone(),
            self.services.rpc.clone(),
            &nodes,
            &self.services.discovery,
        )?;

        info!(playbook = %self.ctx.name(), phase = "nodes.prep", "Discovering node sets");
        self.nodes.prepare(&self.uses, &mut self.report).await
    }

    async fn execute(&mut self, inputs: &HashMap<String, Value>) -> PlaybookResult<()> {
        self.prepare(inputs).await?;

        let state = RunState {
            metadata: &self.definition.metadata,
            inputs: &self.inputs,
            nodes: &self.nodes,
        };
        self.tasks.run(&state, &mut self.report).await
    }

    /// Run the playbook and finalize the report.
    ///
    /// Every error is caught here, logged with its cause chain and turned
    /// into a failed outcome.
    pub async fn run(&mut self, inputs: &HashMap<String, Value>) -> bool {
        let started = Instant::now();

        match self.execute(inputs).await {
            Ok(()) => {
                self.report.finalize(OUTCOME_OK);
                info!(
                    playbook = %self.ctx.name(),
                    phase = "run",
                    "Done running playbook {} in {}",
                    self.ctx.name(),
                    seconds_to_human(started.elapsed().as_secs())
                );
                true
            }
            Err(e) => {
                error!(
                    playbook = %self.ctx.name(),
                    phase = "run",
                    "Playbook {} failed: {}: {}",
                    self.ctx.name(),
                    e.kind(),
                    e.chain()
                );
                self.report.finalize(format!("Failed: {}: {}", e.kind(), e.chain()));
                false
            }
        }
    }
}

impl std::fmt::Debug for Playbook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playbook")
            .field("ctx", &self.ctx)
            .field("inputs", &self.inputs)
            .field("nodes", &self.nodes)
            .field("tasks", &self.tasks)
            .finish()
    }
}

/// Render a duration like "1 day 2 hours 3 minutes 04 seconds".
pub fn seconds_to_human(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3_600;
    let minutes = seconds % 3_600 / 60;
    let seconds = seconds % 60;

    match (days, hours, minutes) {
        (0, 0, 0) => format!("{:02} seconds", seconds),
        (0, 0, _) => format!("{} minutes {:02} seconds", minutes, seconds),
        (0, _, _) => format!("{} hours {} minutes {:02} seconds", hours, minutes, seconds),
        (1, _, _) => format!("1 day {} hours {} minutes {:02} seconds", hours, minutes, seconds),
        _ => format!("{} days {} hours {} minutes {:02} seconds", days, hours, minutes, seconds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{DiscoveryFilter, RpcError, RpcReply, RpcRequest};
    use crate::validator::{ValidatorError, ValidatorSpec};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingClient {
        discoveries: Mutex<usize>,
        calls: Mutex<Vec<RpcRequest>>,
    }

    #[async_trait]
    impl RpcClient for CountingClient {
        async fn call(&self, request: &RpcRequest) -> Result<Vec<RpcReply>, RpcError> {
            self.calls.lock().unwrap().push(request.clone());
            Ok(request
                .nodes
                .iter()
                .map(|n| RpcReply {
                    sender: n.clone(),
                    agent: request.agent.clone(),
                    action: request.action.clone(),
                    statuscode: 0,
                    statusmsg: "OK".into(),
                    data: json!({}),
                })
                .collect())
        }

        async fn discover(&self, _filter: &DiscoveryFilter) -> Result<Vec<String>, RpcError> {
            *self.discoveries.lock().unwrap() += 1;
            Ok(vec!["n1".to_string(), "n2".to_string()])
        }
    }

    struct NoDescriptors;

    impl CapabilityLookup for NoDescriptors {
        fn lookup_version(&self, agent: &str) -> PlaybookResult<String> {
            Err(PlaybookError::Capability(format!("No descriptor for {}", agent)))
        }
    }

    fn playbook(yaml: &str, client: Arc<CountingClient>) -> PlaybookResult<Playbook> {
        let services = Services::new(client, Arc::new(NoDescriptors));
        Playbook::new(PlaybookDefinition::from_yaml_str(yaml)?, services)
    }

    #[test]
    fn test_seconds_to_human() {
        assert_eq!(seconds_to_human(7), "07 seconds");
        assert_eq!(seconds_to_human(303), "5 minutes 03 seconds");
        assert_eq!(seconds_to_human(3_600 + 120 + 5), "1 hours 2 minutes 05 seconds");
        assert_eq!(seconds_to_human(86_400 + 7_200 + 180 + 4), "1 day 2 hours 3 minutes 04 seconds");
        assert_eq!(seconds_to_human(2 * 86_400), "2 days 0 hours 0 minutes 00 seconds");
    }

    #[test]
    fn test_unknown_task_kind_fails_at_load() {
        let err = playbook("name: x\ntasks:\n  - shell: {command: ls}\n", Arc::default()).unwrap_err();
        assert_eq!(err.kind(), "LoadError");

        let err = playbook("name: x\nnodes:\n  web: {type: puppetdb}\n", Arc::default()).unwrap_err();
        assert_eq!(err.kind(), "LoadError");
    }

    #[tokio::test]
    async fn test_missing_inputs_stop_before_discovery() {
        let client = Arc::new(CountingClient::default());
        let mut playbook = playbook(
            "name: x\ninputs:\n  count: {type: Integer}\n  cluster: {type: String}\nnodes:\n  web: {}\n",
            client.clone(),
        )
        .unwrap();

        assert!(!playbook.run(&HashMap::new()).await);

        let report = playbook.report();
        assert!(!report.outcome.success);
        assert_eq!(
            report.outcome.message,
            "Failed: ValidationError: Values were required but not given for inputs: count, cluster"
        );
        assert!(report.is_finalized());
        assert_eq!(*client.discoveries.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_templates_see_inputs_and_metadata() {
        let client = Arc::new(CountingClient::default());
        let mut playbook = playbook(
            r#"
name: restart
version: "2.1"
inputs:
  service: {type: String, default: httpd}
nodes:
  web: {type: static, nodes: ["web1"]}
tasks:
  - rpc:
      action: service.restart
      nodes: "{{{nodes.web}}}"
      properties:
        service: "{{{input.service}}}"
        reason: "run by {{{metadata.name}}} {{{metadata.version}}}"
"#,
            client.clone(),
        )
        .unwrap();

        assert!(playbook.run(&HashMap::new()).await);

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].nodes, vec!["web1"]);
        assert_eq!(calls[0].arguments, json!({"service": "httpd", "reason": "run by restart 2.1"}));

        assert_eq!(playbook.metadata_item("name").unwrap(), json!("restart"));
        assert!(playbook.metadata_item("colour").is_err());
        assert_eq!(playbook.discovered_nodes("web").unwrap(), vec!["web1"]);
        assert_eq!(playbook.report().rpc_results.len(), 1);
    }

    #[tokio::test]
    async fn test_node_sets_resolve_inputs() {
        let client = Arc::new(CountingClient::default());
        let mut playbook = playbook(
            r#"
name: limited
inputs:
  size: {type: Integer}
nodes:
  web: {type: static, nodes: [a, b, c], limit: "{{{input.size}}}"}
"#,
            client,
        )
        .unwrap();

        let inputs = HashMap::from([("size".to_string(), json!("2"))]);
        assert!(playbook.run(&inputs).await);
        assert_eq!(playbook.report().nodes["web"], vec!["a", "b"]);
    }

    /// Accepts `:cluster` for a fixed list of clusters and defers everything
    /// else to the built-in validators.
    struct ClusterValidator;

    impl Validator for ClusterValidator {
        fn validate(&self, value: &Value, spec: &ValidatorSpec) -> Result<(), ValidatorError> {
            match spec {
                ValidatorSpec::Named(name) if name == "cluster" => {
                    if matches!(value.as_str(), Some("alpha" | "beta")) {
                        Ok(())
                    } else {
                        Err(ValidatorError::Rejected {
                            validator: name.clone(),
                            value: display_value(value),
                        })
                    }
                }
                other => BuiltinValidator::new().validate(value, other),
            }
        }
    }

    const CLUSTER_PLAYBOOK: &str = "name: x\nloglevel: warn\ninputs:\n  cluster: {type: String, validation: \":cluster\"}\n";

    #[tokio::test]
    async fn test_custom_validator() {
        let inputs = HashMap::from([("cluster".to_string(), json!("alpha"))]);

        let mut builtin = playbook(CLUSTER_PLAYBOOK, Arc::default()).unwrap();
        assert!(!builtin.run(&inputs).await);
        assert!(builtin.report().outcome.message.contains("unknown validator :cluster"));

        let services = Services::new(Arc::new(CountingClient::default()), Arc::new(NoDescriptors))
            .with_validator(Arc::new(ClusterValidator));
        let mut custom = Playbook::new(PlaybookDefinition::from_yaml_str(CLUSTER_PLAYBOOK).unwrap(), services).unwrap();
        assert_eq!(custom.log_level(), "warn");
        assert!(custom.run(&inputs).await);
        assert_eq!(custom.input_value("cluster").unwrap(), json!("alpha"));

        let services = Services::new(Arc::new(CountingClient::default()), Arc::new(NoDescriptors))
            .with_validator(Arc::new(ClusterValidator));
        let mut rejected = Playbook::new(PlaybookDefinition::from_yaml_str(CLUSTER_PLAYBOOK).unwrap(), services).unwrap();
        assert!(!rejected.run(&HashMap::from([("cluster".to_string(), json!("gamma"))])).await);
    }
}
