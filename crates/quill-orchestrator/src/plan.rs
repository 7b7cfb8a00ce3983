use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use quill_core::repair_json_output;
use quill_types::ToolSchema;

pub const PLAN_SCHEMA_NAME: &str = "Plan";

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("planner provider call failed: {message}")]
    Provider { code: &'static str, message: String },
    #[error("planner returned no plan candidate")]
    NoCandidate,
    #[error("plan is not valid JSON: {0}")]
    Malformed(String),
    #[error("plan does not match the plan schema: {0}")]
    Invalid(String),
    #[error("no plan to accept")]
    Missing,
    #[error("step {index} already has a result")]
    StepAlreadyExecuted { index: usize },
    #[error("step {index} is out of range")]
    StepOutOfRange { index: usize },
}

impl PlanError {
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::Provider { code, .. } => *code,
            PlanError::NoCandidate => "PLAN_NO_CANDIDATE",
            PlanError::Malformed(_) => "PLAN_MALFORMED",
            PlanError::Invalid(_) => "PLAN_INVALID",
            PlanError::Missing => "PLAN_MISSING",
            PlanError::StepAlreadyExecuted { .. } => "PLAN_STEP_EXECUTED",
            PlanError::StepOutOfRange { .. } => "PLAN_STEP_OUT_OF_RANGE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    #[serde(alias = "RESEARCH", alias = "Research")]
    Research,
    #[serde(alias = "PROCESSING", alias = "Processing")]
    Processing,
}

impl StepType {
    pub fn as_str(self) -> &'static str {
        match self {
            StepType::Research => "research",
            StepType::Processing => "processing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub title: String,
    pub description: String,
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_res: Option<String>,
}

impl Step {
    /// An empty `execution_res` counts as not executed, so it can be recorded again.
    pub fn is_executed(&self) -> bool {
        self.execution_res.as_deref().is_some_and(|res| !res.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub locale: String,
    pub has_enough_context: bool,
    pub thought: String,
    pub title: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Plan {
    /// Validates an arbitrary JSON value against the plan shape.
    pub fn from_value(value: Value) -> Result<Self, PlanError> {
        let value = match value {
            Value::String(text) => parse_json(&text)?,
            other => other,
        };
        serde_json::from_value(value).map_err(|err| PlanError::Invalid(err.to_string()))
    }

    /// Repairs model text and validates it. A `Reasoning:` preamble produced
    /// by [`render_plan`] is skipped up to its last `Plan:` marker, since the
    /// trace itself may contain one and the JSON body never does.
    pub fn parse_text(text: &str) -> Result<Self, PlanError> {
        let body = match text.trim_start().strip_prefix("Reasoning:") {
            Some(rest) => rest
                .rsplit_once("\n\nPlan:\n")
                .map(|(_, plan)| plan)
                .unwrap_or(text),
            None => text,
        };
        let repaired = repair_json_output(body);
        Self::from_value(parse_json(&repaired)?)
    }

    /// First step without a result, with its index.
    pub fn first_pending(&self) -> Option<(usize, &Step)> {
        self.steps
            .iter()
            .enumerate()
            .find(|(_, step)| !step.is_executed())
    }

    pub fn completed_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().take_while(|step| step.is_executed())
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(Step::is_executed)
    }

    /// Stores a step result. Results are write-once.
    pub fn record_result(&mut self, index: usize, result: impl Into<String>) -> Result<(), PlanError> {
        let step = self
            .steps
            .get_mut(index)
            .ok_or(PlanError::StepOutOfRange { index })?;
        if step.is_executed() {
            return Err(PlanError::StepAlreadyExecuted { index });
        }
        step.execution_res = Some(result.into());
        Ok(())
    }

    /// Pretty JSON with four-space indentation; absent results are omitted.
    pub fn to_pretty_json(&self) -> String {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        match self.serialize(&mut serializer) {
            Ok(()) => String::from_utf8(buf).unwrap_or_default(),
            Err(err) => {
                tracing::warn!("failed to render plan: {err}");
                String::new()
            }
        }
    }
}

/// Plan state carried by a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CurrentPlan {
    #[default]
    Empty,
    RawText(String),
    Validated(Plan),
}

impl CurrentPlan {
    pub fn as_validated(&self) -> Option<&Plan> {
        match self {
            CurrentPlan::Validated(plan) => Some(plan),
            CurrentPlan::Empty | CurrentPlan::RawText(_) => None,
        }
    }

    pub fn as_validated_mut(&mut self) -> Option<&mut Plan> {
        match self {
            CurrentPlan::Validated(plan) => Some(plan),
            CurrentPlan::Empty | CurrentPlan::RawText(_) => None,
        }
    }

    /// Text a reviewer sees while the run waits for feedback.
    pub fn display_text(&self) -> Option<String> {
        match self {
            CurrentPlan::Empty => None,
            CurrentPlan::RawText(text) => Some(text.clone()),
            CurrentPlan::Validated(plan) => Some(plan.to_pretty_json()),
        }
    }
}

/// `Reasoning:\n<trace>\n\nPlan:\n<json>` when a trace exists, the bare JSON otherwise.
pub fn render_plan(plan: &Plan, reasoning: Option<&str>) -> String {
    let body = plan.to_pretty_json();
    match reasoning.filter(|trace| !trace.trim().is_empty()) {
        Some(trace) => format!("Reasoning:\n{trace}\n\nPlan:\n{body}"),
        None => body,
    }
}

/// Tool schema the standard model is forced to call when producing a plan.
pub fn plan_tool_schema() -> ToolSchema {
    ToolSchema::new(
        PLAN_SCHEMA_NAME,
        "Research plan for the user's request.",
        json!({
            "type": "object",
            "properties": {
                "locale": {
                    "type": "string",
                    "description": "The user's language locale, e.g. en-US or zh-CN."
                },
                "has_enough_context": {"type": "boolean"},
                "thought": {"type": "string"},
                "title": {"type": "string"},
                "steps": {
                    "type": "array",
                    "items": {"$ref": "#/$defs/Step"}
                }
            },
            "required": ["locale", "has_enough_context", "thought", "title"],
            "$defs": {
                "Step": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "description": {
                            "type": "string",
                            "description": "Specify exactly what data to collect."
                        },
                        "step_type": {
                            "type": "string",
                            "enum": ["research", "processing"]
                        },
                        "execution_res": {"type": "string"}
                    },
                    "required": ["title", "description", "step_type"]
                }
            }
        }),
    )
}

fn parse_json(text: &str) -> Result<Value, PlanError> {
    serde_json::from_str(text).map_err(|err| PlanError::Malformed(err.to_string()))
}
