use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use quill_types::{ToolResult, ToolSchema};

mod crawl;
mod python_repl;
pub mod search;

pub use crawl::CrawlTool;
pub use python_repl::PythonReplTool;
pub use search::{
    build_search_provider, SearchEngine, SearchHit, SearchOutcome, SearchProvider,
    SearchSettings, WebSearchTool,
};

/// Something an agent can call by name with JSON arguments.
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult>;

    /// Tools that do slow I/O override this to stop early on cancellation.
    async fn execute_with_cancel(
        &self,
        args: Value,
        _cancel: CancellationToken,
    ) -> anyhow::Result<ToolResult> {
        self.execute(args).await
    }
}

/// Named tool set bound to one agent invocation. Listing is ordered by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    by_name: Arc<RwLock<BTreeMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let mut by_name = BTreeMap::new();
        for tool in tools {
            by_name.insert(tool.schema().name, tool);
        }
        Self {
            by_name: Arc::new(RwLock::new(by_name)),
        }
    }

    /// Returns the tool previously registered under the same name, if any.
    pub async fn register(&self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        let name = tool.schema().name;
        self.by_name.write().await.insert(name, tool)
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.by_name.read().await.contains_key(name)
    }

    pub async fn list(&self) -> Vec<ToolSchema> {
        let guard = self.by_name.read().await;
        guard.values().map(|tool| tool.schema()).collect()
    }

    pub async fn execute(&self, name: &str, args: Value) -> anyhow::Result<ToolResult> {
        self.execute_with_cancel(name, args, CancellationToken::new())
            .await
    }

    /// An unknown name yields an explanatory result for the model rather
    /// than an error, so the agent loop can continue.
    pub async fn execute_with_cancel(
        &self,
        name: &str,
        args: Value,
        cancel: CancellationToken,
    ) -> anyhow::Result<ToolResult> {
        let found = self.by_name.read().await.get(name).cloned();
        match found {
            Some(tool) => tool.execute_with_cancel(args, cancel).await,
            None => {
                tracing::warn!(tool = name, "model requested an unregistered tool");
                Ok(ToolResult {
                    output: format!("Unknown tool: {name}"),
                    metadata: json!({ "unknown_tool": name }),
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tool schema `{tool_name}` at `{path}`: {reason}")]
pub struct ToolSchemaValidationError {
    pub tool_name: String,
    pub path: String,
    pub reason: String,
}

/// Rejects schemas that strict providers refuse, such as an `array` without
/// `items`, anywhere in the parameter tree.
pub fn validate_tool_schemas(schemas: &[ToolSchema]) -> Result<(), ToolSchemaValidationError> {
    schemas.iter().try_for_each(|schema| {
        let mut pending = vec![("$".to_string(), &schema.input_schema)];
        while let Some((path, node)) = pending.pop() {
            if let Some(reason) = node_problem(node) {
                return Err(ToolSchemaValidationError {
                    tool_name: schema.name.clone(),
                    path,
                    reason: reason.to_string(),
                });
            }
            pending.extend(child_nodes(&path, node));
        }
        Ok(())
    })
}

fn node_problem(node: &Value) -> Option<&'static str> {
    let obj = node.as_object()?;
    let is_array = obj.get("type").and_then(Value::as_str) == Some("array");
    (is_array && !obj.contains_key("items")).then_some("array schema missing items")
}

fn child_nodes<'a>(path: &str, node: &'a Value) -> Vec<(String, &'a Value)> {
    let mut children = Vec::new();
    let Some(obj) = node.as_object() else {
        if let Value::Array(items) = node {
            for (idx, item) in items.iter().enumerate() {
                children.push((format!("{path}[{idx}]"), item));
            }
        }
        return children;
    };
    if let Some(items) = obj.get("items") {
        children.push((format!("{path}.items"), items));
    }
    for keyword in ["properties", "$defs"] {
        let entries = obj.get(keyword).and_then(Value::as_object);
        for (key, child) in entries.into_iter().flat_map(|map| map.iter()) {
            children.push((format!("{path}.{keyword}.{key}"), child));
        }
    }
    for keyword in ["oneOf", "anyOf", "allOf"] {
        let branches = obj.get(keyword).and_then(Value::as_array);
        for (idx, child) in branches.into_iter().flatten().enumerate() {
            children.push((format!("{path}.{keyword}[{idx}]"), child));
        }
    }
    children
}

/// Cuts `input` to `max_chars` characters, appending `...` when anything was
/// dropped.
pub(crate) fn truncate_chars(input: &str, max_chars: usize) -> (String, bool) {
    match input.char_indices().nth(max_chars) {
        Some((cut, _)) => (format!("{}...", &input[..cut]), true),
        None => (input.to_string(), false),
    }
}
