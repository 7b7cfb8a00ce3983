use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use quill_types::{ToolResult, ToolSchema};

use crate::Tool;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Runs a python snippet in a fresh interpreter process. State does not carry
/// over between calls; snippets must print what they want to report.
pub struct PythonReplTool {
    interpreter: String,
    timeout: Duration,
}

impl Default for PythonReplTool {
    fn default() -> Self {
        Self {
            interpreter: std::env::var("QUILL_PYTHON")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "python3".to_string()),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl PythonReplTool {
    pub fn with_interpreter(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            ..Self::default()
        }
    }
}

fn failure(code: &str, error: &str) -> ToolResult {
    ToolResult {
        output: format!("Error executing code:\n```python\n{code}\n```\nError: {error}"),
        metadata: json!({"success": false}),
    }
}

#[async_trait]
impl Tool for PythonReplTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "python_repl_tool",
            "Execute python code for data analysis or calculation. Use print(...) to see output values.",
            json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "The python code to execute." }
                },
                "required": ["code"]
            }),
        )
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        self.execute_with_cancel(args, CancellationToken::new())
            .await
    }

    async fn execute_with_cancel(
        &self,
        args: Value,
        cancel: CancellationToken,
    ) -> anyhow::Result<ToolResult> {
        let code = args["code"].as_str().unwrap_or("");
        if code.trim().is_empty() {
            return Ok(failure(code, "Invalid input: code must be a non-empty string"));
        }
        tracing::info!(interpreter = %self.interpreter, "executing python code");

        let child = Command::new(&self.interpreter)
            .arg("-c")
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(ToolResult {
                    output: "python execution cancelled".to_string(),
                    metadata: json!({"cancelled": true}),
                });
            }
            timed = tokio::time::timeout(self.timeout, child.wait_with_output()) => match timed {
                Ok(output) => output?,
                Err(_) => return Ok(failure(code, "execution timed out")),
            }
        };
        let out = String::from_utf8_lossy(&output.stdout);
        let err = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() || err.contains("Traceback") {
            tracing::error!("python code execution failed");
            return Ok(failure(code, err.trim()));
        }
        Ok(ToolResult {
            output: format!(
                "Successfully executed:\n```python\n{code}\n```\nStdout: {}",
                out.trim_end()
            ),
            metadata: json!({"success": true}),
        })
    }
}
