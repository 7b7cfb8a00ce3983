use quill_core::agent::provider_error_code;
use quill_core::repair_json_output;
use quill_providers::Provider;
use quill_types::{ChatMessage, ModelClass};

use crate::plan::{plan_tool_schema, render_plan, Plan, PlanError};

/// A validated plan plus the reasoning trace, when the model exposed one.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanExtraction {
    pub plan: Plan,
    pub reasoning: Option<String>,
}

impl PlanExtraction {
    pub fn render(&self) -> String {
        render_plan(&self.plan, self.reasoning.as_deref())
    }
}

/// Reasoning models answer in free text that is repaired and parsed; standard
/// models are forced to call the plan schema.
pub async fn extract_plan(
    provider: &dyn Provider,
    class: ModelClass,
    messages: &[ChatMessage],
) -> Result<PlanExtraction, PlanError> {
    match class {
        ModelClass::Reasoning => extract_with_reasoning_model(provider, messages).await,
        ModelClass::Standard => extract_with_schema(provider, messages).await,
    }
}

async fn extract_with_reasoning_model(
    provider: &dyn Provider,
    messages: &[ChatMessage],
) -> Result<PlanExtraction, PlanError> {
    let response = provider
        .chat(messages, &[])
        .await
        .map_err(provider_failure)?;
    let reasoning = response.reasoning_trace().map(str::to_string);
    let text = response.content.first_text();
    let repaired = repair_json_output(&text);
    let value = serde_json::from_str(&repaired)
        .map_err(|err| PlanError::Malformed(err.to_string()))?;
    Ok(PlanExtraction {
        plan: Plan::from_value(value)?,
        reasoning,
    })
}

async fn extract_with_schema(
    provider: &dyn Provider,
    messages: &[ChatMessage],
) -> Result<PlanExtraction, PlanError> {
    let candidates = provider
        .extract(messages, &plan_tool_schema())
        .await
        .map_err(provider_failure)?;
    let first = candidates.into_iter().next().ok_or(PlanError::NoCandidate)?;
    Ok(PlanExtraction {
        plan: Plan::from_value(first)?,
        reasoning: None,
    })
}

fn provider_failure(err: anyhow::Error) -> PlanError {
    let message = err.to_string();
    PlanError::Provider {
        code: provider_error_code(&message),
        message,
    }
}
