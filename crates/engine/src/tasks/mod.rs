//! Task orchestration.
//!
//! Runs the hook sets and the main task sequence in a fixed order:
//! `pre_book`, `tasks` (each gated by `pre_task`/`post_task`), then
//! `on_success` or `on_fail`, then `post_book`.

mod registry;
mod rpc;

pub use self::registry::{TaskOutcome, TaskRegistry, TaskRunner};
pub use self::rpc::RpcTask;

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::context::PlaybookContext;
use crate::error::{PlaybookError, PlaybookResult};
use crate::report::Report;
use crate::template::{self, TemplateSource};

/// Named group of tasks run at a fixed point of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookSetKind {
    PreBook,
    Tasks,
    PreTask,
    PostTask,
    OnSuccess,
    OnFail,
    PostBook,
}

impl HookSetKind {
    /// Hook sets that may be declared under `hooks`.
    pub const HOOKS: [HookSetKind; 6] = [
        HookSetKind::PreBook,
        HookSetKind::PreTask,
        HookSetKind::PostTask,
        HookSetKind::OnSuccess,
        HookSetKind::OnFail,
        HookSetKind::PostBook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookSetKind::PreBook => "pre_book",
            HookSetKind::Tasks => "tasks",
            HookSetKind::PreTask => "pre_task",
            HookSetKind::PostTask => "post_task",
            HookSetKind::OnSuccess => "on_success",
            HookSetKind::OnFail => "on_fail",
            HookSetKind::PostBook => "post_book",
        }
    }

    /// Logging phase for tasks of this set.
    pub fn phase(&self) -> String {
        format!("tasks.{}", self.as_str())
    }

    /// Look up a hook set declared under `hooks`.
    pub fn from_hook_name(name: &str) -> Option<Self> {
        Self::HOOKS.iter().copied().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for HookSetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_tries() -> u32 {
    1
}

const DEFAULT_TRY_SLEEP: u64 = 10;

fn default_try_sleep() -> f64 {
    DEFAULT_TRY_SLEEP as f64
}

/// Retry and sequencing policy common to every task kind.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskPolicy {
    #[serde(default = "default_tries")]
    pub tries: u32,

    /// Seconds to wait between a failed attempt and the next one.
    #[serde(default = "default_try_sleep")]
    pub try_sleep: f64,

    #[serde(default)]
    pub fail_ok: bool,

    #[serde(default)]
    pub description: Option<String>,
}

impl TaskPolicy {
    const FIELDS: [&'static str; 4] = ["tries", "try_sleep", "fail_ok", "description"];

    /// Read the policy from merged task properties.
    pub fn from_properties(kind: &str, properties: &Value) -> PlaybookResult<Self> {
        let policy: TaskPolicy = serde_json::from_value(properties.clone())
            .map_err(|e| PlaybookError::Load(format!("Invalid {} task policy: {}", kind, e)))?;

        if policy.tries == 0 {
            return Err(PlaybookError::Load(format!("{} task needs tries of at least 1", kind)));
        }

        if !policy.try_sleep.is_finite() || policy.try_sleep < 0.0 {
            return Err(PlaybookError::Load(format!(
                "{} task has an invalid try_sleep of {}",
                kind, policy.try_sleep
            )));
        }

        Ok(policy)
    }

    /// Whether any policy field is only known once templates are resolved.
    fn is_templated(properties: &Value) -> bool {
        Self::FIELDS.iter().any(|field| {
            properties
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(template::is_template)
        })
    }
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            tries: default_tries(),
            try_sleep: default_try_sleep(),
            fail_ok: false,
            description: None,
        }
    }
}

/// One declared task bound to its runner.
pub struct TaskSpec {
    kind: String,
    properties: Value,
    /// None when the policy itself is templated.
    policy: Option<TaskPolicy>,
    runner: Box<dyn TaskRunner>,
}

impl TaskSpec {
    /// Build a task from its kind and raw, possibly templated, properties.
    pub fn load(kind: &str, properties: &Value, registry: &TaskRegistry) -> PlaybookResult<Self> {
        let runner = registry.create(kind)?;

        let mut merged = Map::new();
        merged.insert("tries".to_string(), Value::from(default_tries()));
        merged.insert("try_sleep".to_string(), Value::from(DEFAULT_TRY_SLEEP));
        merged.insert("fail_ok".to_string(), Value::Bool(false));

        match properties {
            Value::Object(props) => merged.extend(props.clone()),
            Value::Null => {}
            _ => {
                return Err(PlaybookError::Load(format!(
                    "Properties for {} task must be a map",
                    kind
                )))
            }
        }

        let properties = Value::Object(merged);
        let policy = if TaskPolicy::is_templated(&properties) {
            None
        } else {
            Some(TaskPolicy::from_properties(kind, &properties)?)
        };

        Ok(Self {
            kind: kind.to_string(),
            properties,
            policy,
            runner,
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Policy read at load time, unless it depends on templates.
    pub fn policy(&self) -> Option<&TaskPolicy> {
        self.policy.as_ref()
    }

    /// Templated properties exactly as declared, merged with defaults.
    pub fn properties(&self) -> &Value {
        &self.properties
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .finish()
    }
}

/// The main task sequence and its hook sets.
pub struct Tasks {
    ctx: PlaybookContext,
    main: Vec<TaskSpec>,
    hooks: HashMap<HookSetKind, Vec<TaskSpec>>,
}

impl Tasks {
    pub fn new(ctx: PlaybookContext) -> Self {
        Self {
            ctx,
            main: Vec::new(),
            hooks: HashMap::new(),
        }
    }

    /// Load the main sequence and the declared hook sets.
    ///
    /// Unknown task kinds and unknown hook names fail here, before anything runs.
    pub fn from_declaration(
        ctx: PlaybookContext,
        tasks: &[Value],
        hooks: &IndexMap<String, Vec<Value>>,
        registry: &TaskRegistry,
    ) -> PlaybookResult<Self> {
        let mut loaded = Self::new(ctx);
        loaded.main = loaded.load_tasks(tasks, HookSetKind::Tasks, registry)?;

        for (name, entries) in hooks {
            let kind = HookSetKind::from_hook_name(name)
                .ok_or_else(|| PlaybookError::Load(format!("Unknown hook set {}", name)))?;
            let set = loaded.load_tasks(entries, kind, registry)?;
            loaded.hooks.entry(kind).or_default().extend(set);
        }

        Ok(loaded)
    }

    fn load_tasks(
        &self,
        entries: &[Value],
        kind: HookSetKind,
        registry: &TaskRegistry,
    ) -> PlaybookResult<Vec<TaskSpec>> {
        let mut set = Vec::with_capacity(entries.len());

        for (idx, entry) in entries.iter().enumerate() {
            let task = entry.as_object().ok_or_else(|| {
                PlaybookError::Load(format!("Task {} in {} must be a map of type to properties", idx, kind))
            })?;

            for (task_type, props) in task {
                tracing::debug!(
                    playbook = %self.ctx.name(),
                    phase = %kind.phase(),
                    "Loading task {} of type {}",
                    idx,
                    task_type
                );
                set.push(TaskSpec::load(task_type, props, registry)?);
            }
        }

        Ok(set)
    }

    /// Number of tasks in a set.
    pub fn len(&self, kind: HookSetKind) -> usize {
        match kind {
            HookSetKind::Tasks => self.main.len(),
            other => self.hooks.get(&other).map(|set| set.len()).unwrap_or(0),
        }
    }

    /// Run the whole lifecycle.
    ///
    /// A failing `pre_book` or `post_book` set aborts with a hook error. A
    /// failing main sequence still runs `on_fail` and `post_book` before
    /// returning an execution error.
    pub async fn run(&mut self, state: &dyn TemplateSource, report: &mut Report) -> PlaybookResult<()> {
        let Tasks { ctx, main, hooks } = self;

        if !run_set(ctx, HookSetKind::PreBook, hooks.get_mut(&HookSetKind::PreBook), state, report).await? {
            error!(playbook = %ctx.name(), "Playbook pre_book hook failed to run, failing entire playbook");
            return Err(PlaybookError::Hook("pre_book hook set failed".to_string()));
        }

        let failed = run_main(ctx, main, hooks, state, report).await?;
        let success = failed == 0;

        info!(playbook = %ctx.name(), success, "Finished running main tasks in playbook");

        let follow_up = if success {
            HookSetKind::OnSuccess
        } else {
            HookSetKind::OnFail
        };
        if !run_set(ctx, follow_up, hooks.get_mut(&follow_up), state, report).await? {
            warn!(playbook = %ctx.name(), phase = %follow_up.phase(), "Hook set failed");
        }

        if !run_set(ctx, HookSetKind::PostBook, hooks.get_mut(&HookSetKind::PostBook), state, report).await? {
            error!(playbook = %ctx.name(), "Playbook post_book hook failed to run, failing entire playbook");
            return Err(PlaybookError::Hook("post_book hook set failed".to_string()));
        }

        if success {
            Ok(())
        } else {
            Err(PlaybookError::Execution(format!(
                "{} of {} main task(s) failed",
                failed,
                main.len()
            )))
        }
    }
}

impl std::fmt::Debug for Tasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tasks")
            .field("main", &self.main)
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Run an ungated set. Every task runs; the result is the AND of all of them.
async fn run_set(
    ctx: &PlaybookContext,
    kind: HookSetKind,
    tasks: Option<&mut Vec<TaskSpec>>,
    state: &dyn TemplateSource,
    report: &mut Report,
) -> PlaybookResult<bool> {
    let Some(tasks) = tasks.filter(|tasks| !tasks.is_empty()) else {
        return Ok(true);
    };

    info!(playbook = %ctx.name(), phase = %kind.phase(), "About to run task set with {} task(s)", tasks.len());

    let mut set_success = true;
    for task in tasks.iter_mut() {
        set_success &= run_task(ctx, kind, task, state, report).await?;
    }

    info!(
        playbook = %ctx.name(),
        phase = %kind.phase(),
        success = set_success,
        "Done running task set with {} task(s)",
        tasks.len()
    );

    Ok(set_success)
}

/// Run the main sequence, gating each task with `pre_task` and `post_task`.
/// Returns the number of failed tasks.
async fn run_main(
    ctx: &PlaybookContext,
    main: &mut [TaskSpec],
    hooks: &mut HashMap<HookSetKind, Vec<TaskSpec>>,
    state: &dyn TemplateSource,
    report: &mut Report,
) -> PlaybookResult<usize> {
    if main.is_empty() {
        return Ok(0);
    }

    info!(playbook = %ctx.name(), phase = "tasks.tasks", "About to run task set with {} task(s)", main.len());

    let mut failed = 0;
    for task in main.iter_mut() {
        if !run_set(ctx, HookSetKind::PreTask, hooks.get_mut(&HookSetKind::PreTask), state, report).await? {
            error!(playbook = %ctx.name(), "Failing task because a critical pre_task hook failed");
            failed += 1;
            continue;
        }

        let success = run_task(ctx, HookSetKind::Tasks, task, state, report).await?;

        if !run_set(ctx, HookSetKind::PostTask, hooks.get_mut(&HookSetKind::PostTask), state, report).await? {
            error!(playbook = %ctx.name(), "Failing task because a critical post_task hook failed");
            failed += 1;
            continue;
        }

        if !success {
            failed += 1;
        }
    }

    info!(
        playbook = %ctx.name(),
        phase = "tasks.tasks",
        success = failed == 0,
        "Done running task set with {} task(s)",
        main.len()
    );

    Ok(failed)
}

/// Run one task with its retry loop.
///
/// Properties are resolved again before every attempt so they see the latest
/// run state.
async fn run_task(
    ctx: &PlaybookContext,
    kind: HookSetKind,
    task: &mut TaskSpec,
    state: &dyn TemplateSource,
    report: &mut Report,
) -> PlaybookResult<bool> {
    let mut properties = template::resolve(&task.properties, state)?;
    let policy = match &task.policy {
        Some(policy) => policy.clone(),
        None => TaskPolicy::from_properties(&task.kind, &properties)?,
    };

    if let Some(description) = &policy.description {
        info!(playbook = %ctx.name(), phase = %kind.phase(), "About to run task: {}", description);
    }

    let tries = policy.tries;
    let mut success = false;

    for attempt in 1..=tries {
        if attempt > 1 {
            properties = template::resolve(&task.properties, state)?;
        }
        task.runner.configure(&properties)?;
        task.runner.validate_configuration()?;

        let outcome = task.runner.run().await?;
        for result in outcome.results {
            report.record_rpc_result(result);
        }

        info!(playbook = %ctx.name(), phase = %kind.phase(), task = %task.kind, "{}", outcome.message);
        success = outcome.success;

        if success {
            break;
        }

        if policy.fail_ok {
            warn!(
                playbook = %ctx.name(),
                phase = %kind.phase(),
                task = %task.kind,
                "Task failed but fail_ok is true, treating as success"
            );
            success = true;
            break;
        }

        if attempt < tries {
            warn!(
                playbook = %ctx.name(),
                phase = %kind.phase(),
                task = %task.kind,
                "Task failed on try {}/{}, sleeping {}s: {}",
                attempt,
                tries,
                policy.try_sleep,
                outcome.message
            );
            tokio::time::sleep(Duration::from_secs_f64(policy.try_sleep)).await;
        }
    }

    Ok(success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Shared log of everything scripted runners were asked to do.
    #[derive(Default)]
    struct Script {
        outcomes: HashMap<String, VecDeque<bool>>,
        attempts: Vec<String>,
        configured: Vec<Value>,
    }

    struct ScriptedRunner {
        script: Arc<Mutex<Script>>,
        name: String,
    }

    #[async_trait]
    impl TaskRunner for ScriptedRunner {
        fn configure(&mut self, properties: &Value) -> PlaybookResult<()> {
            self.name = properties["name"].as_str().unwrap_or("unnamed").to_string();
            self.script.lock().unwrap().configured.push(properties.clone());
            Ok(())
        }

        fn validate_configuration(&self) -> PlaybookResult<()> {
            Ok(())
        }

        async fn run(&mut self) -> PlaybookResult<TaskOutcome> {
            let mut script = self.script.lock().unwrap();
            script.attempts.push(self.name.clone());
            let success = script
                .outcomes
                .get_mut(&self.name)
                .and_then(|q| if q.len() > 1 { q.pop_front() } else { q.front().copied() })
                .unwrap_or(true);

            let result = json!({"sender": "n1", "task": self.name, "statuscode": if success { 0 } else { 1 }});
            let outcome = if success {
                TaskOutcome::success(format!("{} ok", self.name))
            } else {
                TaskOutcome::failure(format!("{} failed", self.name))
            };
            Ok(outcome.with_results(vec![result]))
        }
    }

    struct State;

    impl TemplateSource for State {
        fn input_value(&self, name: &str) -> PlaybookResult<Value> {
            match name {
                "service" => Ok(json!("httpd")),
                "tries" => Ok(json!(2)),
                _ => Err(PlaybookError::Resolution(format!("Unknown input {}", name))),
            }
        }

        fn discovered_nodes(&self, _name: &str) -> PlaybookResult<Vec<String>> {
            Ok(vec!["n1".to_string()])
        }

        fn metadata_item(&self, _name: &str) -> PlaybookResult<Value> {
            Ok(Value::Null)
        }
    }

    fn setup(outcomes: &[(&str, &[bool])]) -> (Arc<Mutex<Script>>, TaskRegistry) {
        let mut script = Script::default();
        for (name, seq) in outcomes {
            script.outcomes.insert(name.to_string(), seq.iter().copied().collect());
        }
        let script = Arc::new(Mutex::new(script));

        let mut registry = TaskRegistry::new();
        let shared = script.clone();
        registry.register("scripted", move || {
            Box::new(ScriptedRunner {
                script: shared.clone(),
                name: String::new(),
            })
        });

        (script, registry)
    }

    fn task(name: &str, extra: Value) -> Value {
        let mut props = json!({"name": name, "try_sleep": 0});
        if let (Some(p), Some(e)) = (props.as_object_mut(), extra.as_object()) {
            p.extend(e.clone());
        }
        json!({"scripted": props})
    }

    fn load(registry: &TaskRegistry, main: Vec<Value>, hooks: Value) -> Tasks {
        let hooks: IndexMap<String, Vec<Value>> = serde_json::from_value(hooks).unwrap();
        Tasks::from_declaration(PlaybookContext::new("test"), &main, &hooks, registry).unwrap()
    }

    fn attempts(script: &Arc<Mutex<Script>>) -> Vec<String> {
        script.lock().unwrap().attempts.clone()
    }

    #[test]
    fn test_hook_names() {
        assert_eq!(HookSetKind::from_hook_name("pre_book"), Some(HookSetKind::PreBook));
        assert_eq!(HookSetKind::from_hook_name("tasks"), None);
        assert_eq!(HookSetKind::OnFail.to_string(), "on_fail");
    }

    #[test]
    fn test_task_defaults() {
        let (_, registry) = setup(&[]);
        let spec = TaskSpec::load("scripted", &json!({"name": "a"}), &registry).unwrap();

        assert_eq!(spec.policy(), Some(&TaskPolicy::default()));
        assert_eq!(spec.properties()["tries"], 1);
        assert_eq!(spec.properties()["try_sleep"], 10);
        assert_eq!(spec.properties()["fail_ok"], false);
    }

    #[test]
    fn test_load_errors() {
        let (_, registry) = setup(&[]);

        assert!(matches!(
            TaskSpec::load("shell", &json!({}), &registry),
            Err(PlaybookError::Load(_))
        ));
        assert!(TaskSpec::load("scripted", &json!({"tries": 0}), &registry).is_err());
        assert!(TaskSpec::load("scripted", &json!({"tries": "many"}), &registry).is_err());
        assert!(TaskSpec::load("scripted", &json!({"try_sleep": -1}), &registry).is_err());

        let hooks: IndexMap<String, Vec<Value>> =
            serde_json::from_value(json!({"before_all": [task("a", json!({}))]})).unwrap();
        assert!(Tasks::from_declaration(PlaybookContext::new("t"), &[], &hooks, &registry).is_err());
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let (script, registry) = setup(&[("flaky", &[false, false, true])]);
        let mut tasks = load(&registry, vec![task("flaky", json!({"tries": 3}))], json!({}));
        let mut report = Report::new();

        tasks.run(&State, &mut report).await.unwrap();

        assert_eq!(attempts(&script), vec!["flaky", "flaky", "flaky"]);
        assert_eq!(report.rpc_results.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_sleep_between_attempts() {
        let (script, registry) = setup(&[("flaky", &[false, false, true])]);
        let mut tasks = load(
            &registry,
            vec![task("flaky", json!({"tries": 3, "try_sleep": 10}))],
            json!({}),
        );
        let mut report = Report::new();

        let started = tokio::time::Instant::now();
        tasks.run(&State, &mut report).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(20));
        assert_eq!(attempts(&script).len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_run() {
        let (script, registry) = setup(&[("broken", &[false])]);
        let mut tasks = load(&registry, vec![task("broken", json!({"tries": 2}))], json!({}));
        let mut report = Report::new();

        let err = tasks.run(&State, &mut report).await.unwrap_err();

        assert!(matches!(err, PlaybookError::Execution(_)));
        assert_eq!(err.to_string(), "Execution error: 1 of 1 main task(s) failed");
        assert_eq!(attempts(&script).len(), 2);
    }

    #[tokio::test]
    async fn test_fail_ok_downgrades_failure() {
        let (script, registry) = setup(&[("broken", &[false])]);
        let mut tasks = load(
            &registry,
            vec![task("broken", json!({"fail_ok": true}))],
            json!({"on_success": [task("celebrate", json!({}))]}),
        );
        let mut report = Report::new();

        tasks.run(&State, &mut report).await.unwrap();

        assert_eq!(attempts(&script), vec!["broken", "celebrate"]);
        assert_eq!(report.rpc_results[0]["statuscode"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_ok_stops_retrying() {
        let (script, registry) = setup(&[("broken", &[false])]);
        let mut tasks = load(
            &registry,
            vec![task("broken", json!({"tries": 3, "try_sleep": 10, "fail_ok": true}))],
            json!({}),
        );
        let mut report = Report::new();

        let started = tokio::time::Instant::now();
        tasks.run(&State, &mut report).await.unwrap();

        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(attempts(&script), vec!["broken"]);
        assert_eq!(report.rpc_results.len(), 1);
        assert_eq!(report.rpc_results[0]["statuscode"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_try_sleep() {
        let (script, registry) = setup(&[("flaky", &[false, true])]);
        let mut tasks = load(
            &registry,
            vec![task("flaky", json!({"tries": 2, "try_sleep": 0.5}))],
            json!({}),
        );
        assert_eq!(tasks.main[0].policy().map(|p| p.try_sleep), Some(0.5));

        let started = tokio::time::Instant::now();
        tasks.run(&State, &mut Report::new()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(attempts(&script).len(), 2);
    }

    #[tokio::test]
    async fn test_set_does_not_short_circuit() {
        let (script, registry) = setup(&[("first", &[false])]);
        let mut tasks = load(
            &registry,
            vec![task("first", json!({})), task("second", json!({}))],
            json!({}),
        );
        let mut report = Report::new();

        assert!(tasks.run(&State, &mut report).await.is_err());
        assert_eq!(attempts(&script), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_pre_book_failure_aborts() {
        let (script, registry) = setup(&[("gate", &[false])]);
        let mut tasks = load(
            &registry,
            vec![task("main", json!({}))],
            json!({
                "pre_book": [task("gate", json!({})), task("gate2", json!({}))],
                "post_book": [task("cleanup", json!({}))]
            }),
        );
        let mut report = Report::new();

        let err = tasks.run(&State, &mut report).await.unwrap_err();

        assert!(matches!(err, PlaybookError::Hook(_)));
        assert_eq!(attempts(&script), vec!["gate", "gate2"]);
    }

    #[tokio::test]
    async fn test_pre_task_failure_skips_task() {
        let (script, registry) = setup(&[("check", &[false])]);
        let mut tasks = load(
            &registry,
            vec![task("main", json!({"tries": 3}))],
            json!({
                "pre_task": [task("check", json!({}))],
                "on_fail": [task("notify", json!({}))],
                "post_book": [task("cleanup", json!({}))]
            }),
        );
        let mut report = Report::new();

        let err = tasks.run(&State, &mut report).await.unwrap_err();

        assert!(matches!(err, PlaybookError::Execution(_)));
        assert_eq!(attempts(&script), vec!["check", "notify", "cleanup"]);
    }

    #[tokio::test]
    async fn test_post_task_failure_fails_task() {
        let (script, registry) = setup(&[("verify", &[false])]);
        let mut tasks = load(
            &registry,
            vec![task("main", json!({}))],
            json!({
                "post_task": [task("verify", json!({}))],
                "on_success": [task("celebrate", json!({}))],
                "on_fail": [task("notify", json!({}))]
            }),
        );
        let mut report = Report::new();

        assert!(tasks.run(&State, &mut report).await.is_err());
        assert_eq!(attempts(&script), vec!["main", "verify", "notify"]);
    }

    #[tokio::test]
    async fn test_post_book_failure_is_terminal() {
        let (_, registry) = setup(&[("cleanup", &[false])]);
        let mut tasks = load(
            &registry,
            vec![task("main", json!({}))],
            json!({"post_book": [task("cleanup", json!({}))]}),
        );
        let mut report = Report::new();

        let err = tasks.run(&State, &mut report).await.unwrap_err();
        assert!(matches!(err, PlaybookError::Hook(_)));
    }

    #[tokio::test]
    async fn test_properties_resolved_per_attempt() {
        let (script, registry) = setup(&[("restart", &[false, true])]);
        let mut tasks = load(
            &registry,
            vec![task("restart", json!({"tries": 2, "service": "{{{input.service}}}", "nodes": "{{{nodes.web}}}"}))],
            json!({}),
        );
        let mut report = Report::new();

        tasks.run(&State, &mut report).await.unwrap();

        let script = script.lock().unwrap();
        assert_eq!(script.configured.len(), 2);
        assert_eq!(script.configured[1]["service"], "httpd");
        assert_eq!(script.configured[1]["nodes"], json!(["n1"]));
        assert_eq!(tasks.main[0].properties()["service"], "{{{input.service}}}");
    }

    #[tokio::test]
    async fn test_templated_policy_resolved_at_run() {
        let (script, registry) = setup(&[("flaky", &[false, true])]);
        let mut tasks = load(
            &registry,
            vec![task("flaky", json!({"tries": "{{{input.tries}}}"}))],
            json!({}),
        );
        assert!(tasks.main[0].policy().is_none());

        tasks.run(&State, &mut Report::new()).await.unwrap();
        assert_eq!(attempts(&script).len(), 2);
    }

    #[tokio::test]
    async fn test_empty_lifecycle_succeeds() {
        let (_, registry) = setup(&[]);
        let mut tasks = load(&registry, vec![], json!({}));
        let mut report = Report::new();

        assert!(tasks.run(&State, &mut report).await.is_ok());
        assert_eq!(tasks.len(HookSetKind::Tasks), 0);
        assert_eq!(tasks.len(HookSetKind::PreBook), 0);
    }
}
