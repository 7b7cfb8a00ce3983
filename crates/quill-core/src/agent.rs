use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use quill_observability::{emit_event, ObservabilityEvent, ProcessKind};
use quill_providers::Provider;
use quill_tools::{validate_tool_schemas, ToolRegistry};
use quill_types::ChatMessage;

use crate::recursion::RecursionLimit;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent `{agent}` hit its recursion limit of {limit} steps")]
    BudgetExceeded { agent: String, limit: u32 },
    #[error("agent `{agent}` provider call failed: {message}")]
    Provider {
        agent: String,
        code: &'static str,
        message: String,
    },
    #[error("agent `{agent}` has an invalid tool schema: {message}")]
    InvalidToolSchema { agent: String, message: String },
    #[error("agent `{agent}` was cancelled")]
    Cancelled { agent: String },
}

impl AgentError {
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::BudgetExceeded { .. } => "RECURSION_LIMIT_EXCEEDED",
            AgentError::Provider { code, .. } => *code,
            AgentError::InvalidToolSchema { .. } => "TOOL_SCHEMA_INVALID",
            AgentError::Cancelled { .. } => "CANCELLED",
        }
    }
}

/// Messages an invocation produced, in order, ending with the final
/// tool-free model turn.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub messages: Vec<ChatMessage>,
    pub final_message: ChatMessage,
    pub steps: u32,
}

impl AgentRun {
    pub fn final_text(&self) -> &str {
        &self.final_message.content
    }
}

/// Tool-using model loop. Every model call and every tool round consumes one
/// step of the recursion budget.
#[derive(Clone)]
pub struct Agent {
    name: String,
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
}

impl Agent {
    pub fn new(name: impl Into<String>, provider: Arc<dyn Provider>, tools: ToolRegistry) -> Self {
        Self {
            name: name.into(),
            provider,
            tools,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn invoke(
        &self,
        input: Vec<ChatMessage>,
        limit: &RecursionLimit,
        cancel: &CancellationToken,
    ) -> Result<AgentRun, AgentError> {
        let limit = limit.value();
        let schemas = self.tools.list().await;
        validate_tool_schemas(&schemas).map_err(|err| AgentError::InvalidToolSchema {
            agent: self.name.clone(),
            message: err.to_string(),
        })?;

        let mut conversation = input;
        let mut produced = Vec::new();
        let mut steps = 0u32;

        loop {
            self.take_step(&mut steps, limit, cancel)?;
            let response = self
                .provider
                .chat(&conversation, &schemas)
                .await
                .map_err(|err| self.provider_error(err))?;
            let message = response.into_message().with_name(self.name.clone());
            conversation.push(message.clone());
            produced.push(message.clone());

            if message.tool_calls.is_empty() {
                tracing::debug!(agent = %self.name, steps, "agent finished");
                return Ok(AgentRun {
                    messages: produced,
                    final_message: message,
                    steps,
                });
            }

            self.take_step(&mut steps, limit, cancel)?;
            for (idx, call) in message.tool_calls.iter().enumerate() {
                let call_id = if call.id.trim().is_empty() {
                    format!("call_{steps}_{idx}")
                } else {
                    call.id.clone()
                };
                let output = match self
                    .tools
                    .execute_with_cancel(&call.name, call.args.clone(), cancel.clone())
                    .await
                {
                    Ok(result) => result.output,
                    Err(err) => {
                        tracing::warn!(agent = %self.name, tool = %call.name, "tool failed: {err}");
                        format!("Error: tool `{}` failed: {err}", call.name)
                    }
                };
                let tool_message = ChatMessage::tool(call_id, output).with_name(call.name.clone());
                conversation.push(tool_message.clone());
                produced.push(tool_message);
            }
        }
    }

    fn take_step(
        &self,
        steps: &mut u32,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled {
                agent: self.name.clone(),
            });
        }
        if *steps >= limit {
            let detail = json!({"limit": limit}).to_string();
            emit_event(
                Level::WARN,
                ProcessKind::Engine,
                ObservabilityEvent {
                    role: Some(&self.name),
                    status: Some("failed"),
                    error_code: Some("RECURSION_LIMIT_EXCEEDED"),
                    detail: Some(&detail),
                    ..ObservabilityEvent::new("agent.budget.exceeded", "agent")
                },
            );
            return Err(AgentError::BudgetExceeded {
                agent: self.name.clone(),
                limit,
            });
        }
        *steps += 1;
        Ok(())
    }

    fn provider_error(&self, err: anyhow::Error) -> AgentError {
        let message = err.to_string();
        let code = provider_error_code(&message);
        let info = self.provider.info();
        let detail = truncate_text(&message, 500);
        emit_event(
            Level::ERROR,
            ProcessKind::Engine,
            ObservabilityEvent {
                role: Some(&self.name),
                provider_id: Some(&info.id),
                status: Some("failed"),
                error_code: Some(code),
                detail: Some(&detail),
                ..ObservabilityEvent::new("provider.call.error", "agent")
            },
        );
        AgentError::Provider {
            agent: self.name.clone(),
            code,
            message,
        }
    }
}

pub fn truncate_text(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        return input.to_string();
    }
    let mut end = max_len;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = input[..end].to_string();
    out.push_str("...<truncated>");
    out
}

pub fn provider_error_code(error_text: &str) -> &'static str {
    let lower = error_text.to_lowercase();
    if lower.contains("invalid_function_parameters")
        || lower.contains("array schema missing items")
        || lower.contains("tool schema")
    {
        return "TOOL_SCHEMA_INVALID";
    }
    if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429")
    {
        return "RATE_LIMIT_EXCEEDED";
    }
    if lower.contains("context length")
        || lower.contains("max tokens")
        || lower.contains("token limit")
    {
        return "CONTEXT_LENGTH_EXCEEDED";
    }
    if lower.contains("unauthorized")
        || lower.contains("authentication")
        || lower.contains("401")
        || lower.contains("403")
    {
        return "AUTHENTICATION_ERROR";
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return "TIMEOUT";
    }
    if lower.contains("server error")
        || lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
    {
        return "PROVIDER_SERVER_ERROR";
    }
    "PROVIDER_REQUEST_FAILED"
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quill_providers::ChatResponse;
    use quill_tools::Tool;
    use quill_types::{MessageRole, ProviderInfo, ToolCall, ToolResult, ToolSchema};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        replies: Mutex<VecDeque<anyhow::Result<ChatResponse>>>,
        seen: Mutex<Vec<usize>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<anyhow::Result<ChatResponse>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                id: "scripted".to_string(),
                name: "Scripted".to_string(),
                models: Vec::new(),
            }
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolSchema],
        ) -> anyhow::Result<ChatResponse> {
            self.seen.lock().expect("seen").push(messages.len());
            self.replies
                .lock()
                .expect("replies")
                .pop_front()
                .unwrap_or_else(|| Ok(ChatResponse::text("done")))
        }
    }

    struct Lookup;

    #[async_trait]
    impl Tool for Lookup {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new(
                "lookup",
                "Look up a fact",
                serde_json::json!({"type":"object","properties":{"q":{"type":"string"}}}),
            )
        }

        async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::text(format!("fact about {}", args["q"].as_str().unwrap_or("?"))))
        }
    }

    fn tool_call(name: &str) -> ChatResponse {
        let mut response = ChatResponse::text("");
        response.tool_calls.push(ToolCall {
            id: String::new(),
            name: name.to_string(),
            args: serde_json::json!({"q": "rust"}),
        });
        response
    }

    fn agent(provider: Arc<ScriptedProvider>) -> Agent {
        Agent::new(
            "researcher",
            provider,
            ToolRegistry::from_tools([Arc::new(Lookup) as Arc<dyn Tool>]),
        )
    }

    #[tokio::test]
    async fn returns_final_message_without_tools() {
        let provider = ScriptedProvider::new(vec![Ok(ChatResponse::text("answer"))]);
        let run = agent(provider)
            .invoke(
                vec![ChatMessage::user("q")],
                &RecursionLimit::default(),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        assert_eq!(run.final_text(), "answer");
        assert_eq!(run.steps, 1);
        assert!(run.final_message.is_named("researcher"));
    }

    #[tokio::test]
    async fn tool_round_feeds_results_back_to_model() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_call("lookup")),
            Ok(ChatResponse::text("summary")),
        ]);
        let run = agent(provider.clone())
            .invoke(
                vec![ChatMessage::user("q")],
                &RecursionLimit::default(),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        assert_eq!(run.steps, 3);
        assert_eq!(run.messages.len(), 3);
        assert_eq!(run.messages[1].role, MessageRole::Tool);
        assert_eq!(run.messages[1].content, "fact about rust");
        assert_eq!(*provider.seen.lock().expect("seen"), vec![1, 3]);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_model() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_call("nope")),
            Ok(ChatResponse::text("recovered")),
        ]);
        let run = agent(provider)
            .invoke(
                vec![ChatMessage::user("q")],
                &RecursionLimit::default(),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        assert_eq!(run.messages[1].content, "Unknown tool: nope");
        assert_eq!(run.final_text(), "recovered");
    }

    #[tokio::test]
    async fn endless_tool_calls_exceed_budget() {
        let provider = ScriptedProvider::new((0..10).map(|_| Ok(tool_call("lookup"))).collect());
        let err = agent(provider)
            .invoke(
                vec![ChatMessage::user("q")],
                &RecursionLimit::fixed(3),
                &CancellationToken::new(),
            )
            .await
            .expect_err("budget");
        assert!(matches!(err, AgentError::BudgetExceeded { limit: 3, .. }));
        assert_eq!(err.code(), "RECURSION_LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn provider_failure_is_classified() {
        let provider =
            ScriptedProvider::new(vec![Err(anyhow::anyhow!("429 Too Many Requests"))]);
        let err = agent(provider)
            .invoke(
                vec![ChatMessage::user("q")],
                &RecursionLimit::default(),
                &CancellationToken::new(),
            )
            .await
            .expect_err("provider error");
        assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_call() {
        let provider = ScriptedProvider::new(vec![Ok(ChatResponse::text("never"))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = agent(provider.clone())
            .invoke(vec![ChatMessage::user("q")], &RecursionLimit::default(), &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, AgentError::Cancelled { .. }));
        assert!(provider.seen.lock().expect("seen").is_empty());
    }
}
