use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use quill_types::{ChatMessage, ModelClass, ModelInfo, ProviderInfo, ToolCall, ToolSchema};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
}

/// Endpoints per model class. `reasoning` is optional; roles mapped to it fall
/// back to the standard endpoint when it is missing.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LlmConfig {
    #[serde(default)]
    pub standard: ProviderConfig,
    #[serde(default)]
    pub reasoning: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Message content as returned by the model: plain text or a list of parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResponseContent {
    Text(String),
    Parts(Vec<Value>),
}

impl Default for ResponseContent {
    fn default() -> Self {
        ResponseContent::Text(String::new())
    }
}

impl ResponseContent {
    /// Full text of the response. Text parts are joined with newlines and
    /// parts without text are skipped.
    pub fn text(&self) -> String {
        match self {
            ResponseContent::Text(text) => text.clone(),
            ResponseContent::Parts(parts) => parts
                .iter()
                .filter_map(part_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Text of the first part only, for callers that expect a single payload.
    pub fn first_text(&self) -> String {
        match self {
            ResponseContent::Text(text) => text.clone(),
            ResponseContent::Parts(parts) => parts
                .first()
                .map(|part| part_text(part).unwrap_or_else(|| part.to_string()))
                .unwrap_or_default(),
        }
    }
}

fn part_text(part: &Value) -> Option<String> {
    match part {
        Value::String(text) => Some(text.clone()),
        other => other.get("text").and_then(Value::as_str).map(str::to_string),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub reasoning_tokens: u64,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChatResponse {
    #[serde(default)]
    pub content: ResponseContent,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub metadata: ResponseMetadata,
}

impl ChatResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: ResponseContent::Text(text.into()),
            ..Self::default()
        }
    }

    /// Reasoning trace, surfaced only when the provider reports reasoning tokens.
    pub fn reasoning_trace(&self) -> Option<&str> {
        if self.metadata.reasoning_tokens == 0 {
            return None;
        }
        self.metadata
            .reasoning
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn into_message(self) -> ChatMessage {
        ChatMessage::assistant(self.content.text()).with_tool_calls(self.tool_calls)
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn info(&self) -> ProviderInfo;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ChatResponse>;

    /// Structured extraction: candidates matching `schema`, best first.
    async fn extract(
        &self,
        messages: &[ChatMessage],
        schema: &ToolSchema,
    ) -> anyhow::Result<Vec<Value>> {
        let response = self.chat(messages, std::slice::from_ref(schema)).await?;
        Ok(response
            .tool_calls
            .into_iter()
            .filter(|call| call.name == schema.name)
            .map(|call| call.args)
            .collect())
    }
}

#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Arc<RwLock<HashMap<ModelClass, Arc<dyn Provider>>>>,
}

impl ProviderRegistry {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            providers: Arc::new(RwLock::new(build_providers(config))),
        }
    }

    pub fn from_providers(
        providers: impl IntoIterator<Item = (ModelClass, Arc<dyn Provider>)>,
    ) -> Self {
        Self {
            providers: Arc::new(RwLock::new(providers.into_iter().collect())),
        }
    }

    pub async fn list(&self) -> Vec<ProviderInfo> {
        let providers = self.providers.read().await;
        let mut infos = providers.values().map(|p| p.info()).collect::<Vec<_>>();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub async fn select_provider(&self, class: ModelClass) -> anyhow::Result<Arc<dyn Provider>> {
        let providers = self.providers.read().await;
        if let Some(provider) = providers.get(&class) {
            return Ok(provider.clone());
        }
        if class == ModelClass::Reasoning {
            if let Some(provider) = providers.get(&ModelClass::Standard) {
                tracing::warn!(
                    "no reasoning model configured; falling back to the standard model"
                );
                return Ok(provider.clone());
            }
        }
        anyhow::bail!(
            "no provider configured for model class `{}`",
            class.as_str()
        );
    }
}

fn build_providers(config: &LlmConfig) -> HashMap<ModelClass, Arc<dyn Provider>> {
    let mut providers: HashMap<ModelClass, Arc<dyn Provider>> = HashMap::new();
    providers.insert(
        ModelClass::Standard,
        Arc::new(OpenAICompatibleProvider::from_config(
            "standard",
            &config.standard,
        )),
    );
    if let Some(reasoning) = &config.reasoning {
        providers.insert(
            ModelClass::Reasoning,
            Arc::new(OpenAICompatibleProvider::from_config("reasoning", reasoning)),
        );
    }
    providers
}

fn is_placeholder_api_key(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("x")
        || trimmed.eq_ignore_ascii_case("placeholder")
}

pub struct OpenAICompatibleProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl OpenAICompatibleProvider {
    pub fn from_config(id: &str, config: &ProviderConfig) -> Self {
        Self {
            id: id.to_string(),
            base_url: normalize_base(config.url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            api_key: config
                .api_key
                .as_deref()
                .filter(|key| !is_placeholder_api_key(key))
                .map(|key| key.to_string())
                .or_else(|| {
                    std::env::var("OPENAI_API_KEY")
                        .ok()
                        .filter(|v| !v.trim().is_empty())
                }),
            model: config
                .model
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            client: Client::new(),
        }
    }

    async fn request(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        tool_choice: Option<Value>,
    ) -> anyhow::Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(wire_message).collect::<Vec<_>>(),
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(wire_tool).collect());
            body["tool_choice"] = tool_choice.unwrap_or_else(|| json!("auto"));
        }

        let mut req = self.client.post(url).json(&body);
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }
        let response = req.send().await?;
        let status = response.status();
        let value: Value = response.json().await?;

        if !status.is_success() {
            let detail = extract_openai_error(&value)
                .unwrap_or_else(|| format!("provider request failed with status {}", status));
            anyhow::bail!(detail);
        }
        if let Some(detail) = extract_openai_error(&value) {
            anyhow::bail!(detail);
        }

        parse_chat_response(&value).ok_or_else(|| {
            anyhow::anyhow!(
                "provider returned no completion for model `{}` (response: {})",
                self.model,
                truncate_for_error(&value.to_string(), 500)
            )
        })
    }
}

#[async_trait]
impl Provider for OpenAICompatibleProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: format!("OpenAI-compatible ({})", self.id),
            models: vec![ModelInfo {
                id: self.model.clone(),
                provider_id: self.id.clone(),
                display_name: self.model.clone(),
                context_window: 128_000,
            }],
        }
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ChatResponse> {
        self.request(messages, tools, None).await
    }

    async fn extract(
        &self,
        messages: &[ChatMessage],
        schema: &ToolSchema,
    ) -> anyhow::Result<Vec<Value>> {
        let forced = json!({"type": "function", "function": {"name": schema.name}});
        let response = self
            .request(messages, std::slice::from_ref(schema), Some(forced))
            .await?;
        Ok(response
            .tool_calls
            .into_iter()
            .filter(|call| call.name == schema.name)
            .map(|call| call.args)
            .collect())
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    let mut out = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if let Some(name) = &message.name {
        out["name"] = json!(name);
    }
    if !message.tool_calls.is_empty() {
        out["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.args.to_string(),
                        }
                    })
                })
                .collect(),
        );
    }
    if let Some(call_id) = &message.tool_call_id {
        out["tool_call_id"] = json!(call_id);
    }
    out
}

fn wire_tool(tool: &ToolSchema) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

fn normalize_base(input: &str) -> String {
    let trimmed = input.trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.contains("/v1/") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    }
}

fn truncate_for_error(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        return input.to_string();
    }
    let mut end = max_len;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &input[..end])
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    total_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens_details: WireCompletionDetails,
}

#[derive(Deserialize, Default)]
struct WireCompletionDetails {
    #[serde(default)]
    reasoning_tokens: u64,
}

/// Malformed usage blocks are ignored rather than failing the completion.
fn wire_usage(value: &Value) -> Option<WireUsage> {
    WireUsage::deserialize(value.get("usage")?).ok()
}

impl From<&WireUsage> for TokenUsage {
    fn from(wire: &WireUsage) -> Self {
        TokenUsage {
            prompt_tokens: wire.prompt_tokens,
            completion_tokens: wire.completion_tokens,
            total_tokens: wire
                .total_tokens
                .unwrap_or(wire.prompt_tokens.saturating_add(wire.completion_tokens)),
        }
    }
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    calls
        .iter()
        .filter_map(|call| {
            let function = call.get("function")?;
            let name = function.get("name").and_then(|v| v.as_str())?.to_string();
            let args = match function.get("arguments") {
                Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
                Some(Value::String(raw)) => {
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                }
                Some(other) => other.clone(),
                None => json!({}),
            };
            Some(ToolCall {
                id: call
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                name,
                args,
            })
        })
        .collect()
}

fn parse_chat_response(value: &Value) -> Option<ChatResponse> {
    let message = value.get("choices")?.get(0)?.get("message")?;
    let content = match message.get("content") {
        Some(Value::String(text)) => ResponseContent::Text(text.clone()),
        Some(Value::Array(parts)) => ResponseContent::Parts(parts.clone()),
        _ => ResponseContent::default(),
    };
    let reasoning = message
        .get("reasoning_content")
        .or_else(|| message.get("reasoning"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let usage = wire_usage(value);
    Some(ChatResponse {
        content,
        tool_calls: parse_tool_calls(message),
        metadata: ResponseMetadata {
            reasoning_tokens: usage
                .as_ref()
                .map_or(0, |u| u.completion_tokens_details.reasoning_tokens),
            reasoning,
            usage: usage.as_ref().map(TokenUsage::from),
        },
    })
}

fn extract_openai_error(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedProvider(&'static str);

    #[async_trait]
    impl Provider for NamedProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                id: self.0.to_string(),
                name: self.0.to_string(),
                models: Vec::new(),
            }
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            tools: &[ToolSchema],
        ) -> anyhow::Result<ChatResponse> {
            let mut response = ChatResponse::text("ok");
            if let Some(tool) = tools.first() {
                response.tool_calls.push(ToolCall {
                    id: "call_1".to_string(),
                    name: tool.name.clone(),
                    args: json!({"title": self.0}),
                });
            }
            Ok(response)
        }
    }

    #[tokio::test]
    async fn reasoning_falls_back_to_standard_provider() {
        let registry = ProviderRegistry::from_providers([(
            ModelClass::Standard,
            Arc::new(NamedProvider("std")) as Arc<dyn Provider>,
        )]);
        let provider = registry
            .select_provider(ModelClass::Reasoning)
            .await
            .expect("provider");
        assert_eq!(provider.info().id, "std");
    }

    #[tokio::test]
    async fn exact_model_class_wins() {
        let registry = ProviderRegistry::from_providers([
            (
                ModelClass::Standard,
                Arc::new(NamedProvider("std")) as Arc<dyn Provider>,
            ),
            (
                ModelClass::Reasoning,
                Arc::new(NamedProvider("think")) as Arc<dyn Provider>,
            ),
        ]);
        let provider = registry
            .select_provider(ModelClass::Reasoning)
            .await
            .expect("provider");
        assert_eq!(provider.info().id, "think");
        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn empty_registry_errors() {
        let registry = ProviderRegistry::from_providers(Vec::<(ModelClass, Arc<dyn Provider>)>::new());
        let err = registry
            .select_provider(ModelClass::Standard)
            .await
            .err()
            .expect("expected error");
        assert!(err.to_string().contains("model class `standard`"));
    }

    #[tokio::test]
    async fn default_extract_collects_matching_tool_calls() {
        let schema = ToolSchema::new("Plan", "plan", json!({"type": "object"}));
        let candidates = NamedProvider("std")
            .extract(&[ChatMessage::user("q")], &schema)
            .await
            .expect("extract");
        assert_eq!(candidates, vec![json!({"title": "std"})]);
    }

    #[test]
    fn parses_tool_calls_and_reasoning_metadata() {
        let value = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "reasoning_content": "thinking about it",
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "handoff_to_planner", "arguments": "{\"locale\":\"fr-FR\"}"}
                    }]
                }
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 5,
                "completion_tokens_details": {"reasoning_tokens": 3}
            }
        });
        let response = parse_chat_response(&value).expect("response");
        assert_eq!(response.content.text(), "");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].args["locale"], "fr-FR");
        assert_eq!(response.reasoning_trace(), Some("thinking about it"));
        assert_eq!(response.metadata.usage.expect("usage").total_tokens, 15);
    }

    #[test]
    fn reasoning_trace_hidden_without_reasoning_tokens() {
        let mut response = ChatResponse::text("x");
        response.metadata.reasoning = Some("trace".to_string());
        assert!(response.reasoning_trace().is_none());
    }

    #[test]
    fn content_text_joins_every_text_part() {
        let parts = ResponseContent::Parts(vec![
            json!("# Report part one"),
            json!({"type": "image_url", "image_url": {"url": "https://example.com/x.png"}}),
            json!({"type": "text", "text": "part two with citations"}),
        ]);
        assert_eq!(parts.text(), "# Report part one\npart two with citations");
        assert_eq!(ResponseContent::Parts(Vec::new()).text(), "");
        let message = ChatResponse {
            content: parts,
            ..ChatResponse::default()
        }
        .into_message();
        assert_eq!(message.content, "# Report part one\npart two with citations");
    }

    #[test]
    fn first_text_keeps_only_the_first_part() {
        let parts = ResponseContent::Parts(vec![json!({"type": "text", "text": "first"}), json!("second")]);
        assert_eq!(parts.first_text(), "first");
        let strings = ResponseContent::Parts(vec![json!("alpha"), json!("beta")]);
        assert_eq!(strings.first_text(), "alpha");
        assert_eq!(ResponseContent::Text("whole".to_string()).first_text(), "whole");
    }

    #[test]
    fn wire_message_carries_tool_call_arguments_as_string() {
        let message = ChatMessage::assistant("").with_tool_calls(vec![ToolCall {
            id: "c1".to_string(),
            name: "web_search".to_string(),
            args: json!({"query": "rust"}),
        }]);
        let wire = wire_message(&message);
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], "{\"query\":\"rust\"}");
        let tool = wire_message(&ChatMessage::tool("c1", "result"));
        assert_eq!(tool["tool_call_id"], "c1");
    }

    #[test]
    fn normalize_base_appends_version_segment() {
        assert_eq!(normalize_base("http://localhost:8080/"), "http://localhost:8080/v1");
        assert_eq!(normalize_base("https://api.openai.com/v1"), "https://api.openai.com/v1");
    }
}
