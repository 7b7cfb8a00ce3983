use async_trait::async_trait;
use serde_json::{json, Value};

use quill_tools::Tool;
use quill_types::{ChatMessage, ToolCall, ToolResult, ToolSchema};

pub const HANDOFF_TOOL_NAME: &str = "handoff_to_planner";

/// Routing signals a model emits through tool calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    HandoffToPlanner {
        task_title: String,
        locale: Option<String>,
    },
}

impl ControlSignal {
    pub fn parse(call: &ToolCall) -> Option<Self> {
        match call.name.as_str() {
            HANDOFF_TOOL_NAME => Some(ControlSignal::HandoffToPlanner {
                task_title: string_arg(&call.args, "task_title").unwrap_or_default(),
                locale: string_arg(&call.args, "locale"),
            }),
            _ => None,
        }
    }

    pub fn locale(&self) -> Option<&str> {
        match self {
            ControlSignal::HandoffToPlanner { locale, .. } => locale.as_deref(),
        }
    }
}

/// First signal in `calls`, in order.
pub fn first_signal<'a>(calls: impl IntoIterator<Item = &'a ToolCall>) -> Option<ControlSignal> {
    calls.into_iter().find_map(ControlSignal::parse)
}

/// First signal across the tool calls of `messages`, scanning messages in order.
pub fn first_signal_in_messages(messages: &[ChatMessage]) -> Option<ControlSignal> {
    first_signal(messages.iter().flat_map(|message| message.tool_calls.iter()))
}

fn string_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn handoff_schema() -> ToolSchema {
    ToolSchema::new(
        HANDOFF_TOOL_NAME,
        "Handoff to planner agent to do plan.",
        json!({
            "type": "object",
            "properties": {
                "task_title": {
                    "type": "string",
                    "description": "The title of the task to be handed off."
                },
                "locale": {
                    "type": "string",
                    "description": "The user's detected language locale (e.g., en-US, zh-CN)."
                }
            },
            "required": ["task_title", "locale"]
        }),
    )
}

/// Bindable form of the hand-off signal. Executing it does nothing; the call
/// itself is what the coordinator looks for.
pub struct HandoffTool;

#[async_trait]
impl Tool for HandoffTool {
    fn schema(&self) -> ToolSchema {
        handoff_schema()
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::text(""))
    }
}
