//! Fleetbook Engine
//!
//! Runs declarative playbooks against fleets of remote-managed nodes.
//!
//! This crate provides:
//! - Playbook loading and input resolution
//! - Node set discovery with limit, minimum and connectivity checks
//! - Agent version checks against local descriptors and live inventory
//! - Task and hook orchestration with retries
//! - Lazy `{{{kind.name}}}` template resolution
//! - A JSON execution report

pub mod context;
pub mod ddl;
pub mod definition;
pub mod error;
pub mod inputs;
pub mod nodes;
pub mod playbook;
pub mod report;
pub mod rpc;
pub mod tasks;
pub mod template;
pub mod uses;
pub mod validator;

pub use context::PlaybookContext;
pub use ddl::{CapabilityLookup, DdlDirectory};
pub use definition::{PlaybookDefinition, PlaybookMetadata};
pub use error::{PlaybookError, PlaybookResult};
pub use inputs::{InputSet, InputSpec, InputType, OptionDescriptor};
pub use nodes::{DiscoveryRegistry, NodeDiscovery, NodeSets};
pub use playbook::{seconds_to_human, Playbook, Services};
pub use report::{Report, OUTCOME_OK};
pub use rpc::{HttpRpcClient, RpcClient, RpcError, RpcReply, RpcRequest};
pub use tasks::{HookSetKind, TaskOutcome, TaskRegistry, TaskRunner, Tasks};
pub use template::TemplateSource;
pub use uses::{Uses, VersionRange};
pub use validator::{BuiltinValidator, Validator, ValidatorSpec};
