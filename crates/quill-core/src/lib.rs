pub mod agent;
pub mod config;
pub mod json_repair;
pub mod recursion;

pub use agent::{Agent, AgentError, AgentRun};
pub use config::{ConfigStore, WorkflowConfig};
pub use json_repair::repair_json_output;
pub use recursion::{RecursionLimit, DEFAULT_RECURSION_LIMIT, RECURSION_LIMIT_ENV};
