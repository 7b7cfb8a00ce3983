pub mod checkpoint;
pub mod error;
pub mod extractor;
pub mod feedback;
pub mod nodes;
pub mod plan;
pub mod prompts;
pub mod role;
pub mod signals;
pub mod state;
pub mod workflow;

pub use checkpoint::{CheckpointStore, RunCheckpoint, RunStatus};
pub use error::WorkflowError;
pub use extractor::{extract_plan, PlanExtraction};
pub use feedback::{parse_feedback, Feedback, FeedbackError, REVIEW_PROMPT};
pub use nodes::{
    route_research_team, step_input, transition, Event, Next, NodeContext, Transition,
    WorkflowServices, NO_PLAN_REPORT,
};
pub use plan::{plan_tool_schema, render_plan, CurrentPlan, Plan, PlanError, Step, StepType};
pub use prompts::{PromptTemplates, PromptVars};
pub use role::{AgentRole, PromptKey, Toolbox};
pub use signals::{ControlSignal, HandoffTool, HANDOFF_TOOL_NAME};
pub use state::{NodeId, RunState, DEFAULT_LOCALE};
pub use workflow::{RunOutcome, RunRequest, WorkflowRunner};
