//! Execution report accumulated over a single playbook run.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PlaybookResult;

/// Report schema version.
pub const REPORT_VERSION: &str = "1";

/// Finalize message that marks a successful run.
pub const OUTCOME_OK: &str = "OK";

const NOT_FINALIZED: &str = "Unknown failure, report not finalized";

/// Run start and end times in UTC epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTimes {
    pub start_time: i64,
    pub end_time: Option<i64>,
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

/// Append-only record of one playbook run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub version: String,
    pub metadata: Value,
    pub times: ReportTimes,
    pub uses: IndexMap<String, String>,
    pub inputs: IndexMap<String, Value>,
    pub nodes: IndexMap<String, Vec<String>>,
    pub rpc_results: Vec<Value>,
    pub outcome: Outcome,

    #[serde(skip)]
    finalized: bool,
}

impl Report {
    /// Create an empty report stamped with the current time.
    pub fn new() -> Self {
        Self {
            version: REPORT_VERSION.to_string(),
            metadata: Value::Object(Default::default()),
            times: ReportTimes {
                start_time: chrono::Utc::now().timestamp(),
                end_time: None,
            },
            uses: IndexMap::new(),
            inputs: IndexMap::new(),
            nodes: IndexMap::new(),
            rpc_results: Vec::new(),
            outcome: Outcome {
                success: false,
                message: NOT_FINALIZED.to_string(),
            },
            finalized: false,
        }
    }

    pub fn record_metadata(&mut self, metadata: Value) {
        self.metadata = metadata;
    }

    pub fn record_input(&mut self, input: impl Into<String>, value: Value) {
        self.inputs.insert(input.into(), value);
    }

    pub fn record_nodeset(&mut self, set: impl Into<String>, nodes: Vec<String>) {
        self.nodes.insert(set.into(), nodes);
    }

    pub fn record_use(&mut self, agent: impl Into<String>, version: impl Into<String>) {
        self.uses.insert(agent.into(), version.into());
    }

    /// Append one raw per-node RPC outcome in arrival order.
    pub fn record_rpc_result(&mut self, result: Value) {
        self.rpc_results.push(result);
    }

    /// Stamp the end time and set the terminal outcome.
    ///
    /// Success is true only for [`OUTCOME_OK`]. A repeat call overwrites the
    /// earlier outcome and is logged, since it points at an unexpected caller.
    pub fn finalize(&mut self, message: impl Into<String>) {
        let message = message.into();

        if self.finalized {
            tracing::warn!(
                previous = %self.outcome.message,
                message = %message,
                "Report finalized more than once, overwriting outcome"
            );
        }

        self.times.end_time = Some(chrono::Utc::now().timestamp());
        self.outcome = Outcome {
            success: message == OUTCOME_OK,
            message,
        };
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Snapshot of the report as a JSON document.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Persist the snapshot as pretty printed JSON.
    pub fn write_to(&self, path: impl AsRef<Path>) -> PlaybookResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}
