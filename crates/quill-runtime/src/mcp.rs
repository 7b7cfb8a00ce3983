use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use quill_tools::Tool;
use quill_types::{ToolResult, ToolSchema};

const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
const MCP_CLIENT_NAME: &str = "quill";
const MCP_CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const MCP_SESSION_HEADER: &str = "mcp-session-id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpTransport {
    Stdio,
    Sse,
    StreamableHttp,
}

/// One configured remote tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub transport: McpTransport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    #[serde(default)]
    pub add_to_agents: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpSettings {
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerConfig>,
}

/// Connection parameters of a server, without its role filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpEndpoint {
    pub transport: McpTransport,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl From<&McpServerConfig> for McpEndpoint {
    fn from(config: &McpServerConfig) -> Self {
        Self {
            transport: config.transport,
            command: config.command.clone(),
            args: config.args.clone(),
            url: config.url.clone(),
            env: config.env.clone(),
            headers: config.headers.clone(),
        }
    }
}

/// Servers relevant to one role plus the tool-name to server-name map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleToolServers {
    pub servers: BTreeMap<String, McpEndpoint>,
    pub enabled_tools: BTreeMap<String, String>,
}

impl RoleToolServers {
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Keeps servers that enable at least one tool and list `role` in
/// `add_to_agents`. When two servers enable the same tool name the later one
/// (by server name) owns it.
pub fn extract_mcp_settings(settings: Option<&McpSettings>, role: &str) -> RoleToolServers {
    let mut out = RoleToolServers::default();
    let Some(settings) = settings else {
        return out;
    };
    for (server_name, config) in &settings.servers {
        if config.enabled_tools.is_empty() || !config.add_to_agents.iter().any(|r| r == role) {
            continue;
        }
        out.servers
            .insert(server_name.clone(), McpEndpoint::from(config));
        for tool_name in &config.enabled_tools {
            out.enabled_tools
                .insert(tool_name.clone(), server_name.clone());
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRemoteTool {
    pub server_name: String,
    pub tool_name: String,
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
    pub schema_hash: String,
}

enum SessionIo {
    Http {
        client: reqwest::Client,
        endpoint: String,
        headers: BTreeMap<String, String>,
        session_id: Option<String>,
    },
    Stdio {
        child: Child,
        stdin: ChildStdin,
        stdout: Lines<BufReader<ChildStdout>>,
    },
}

/// A connection to one server that lives for a single discovery or call.
pub struct McpSession {
    server_name: String,
    io: SessionIo,
    next_id: u64,
}

impl McpSession {
    pub async fn open(server_name: &str, endpoint: &McpEndpoint) -> anyhow::Result<Self> {
        let io = match endpoint.transport {
            McpTransport::Stdio => spawn_stdio(server_name, endpoint)?,
            McpTransport::Sse | McpTransport::StreamableHttp => {
                let Some(url) = endpoint.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
                else {
                    anyhow::bail!("MCP server '{server_name}' is missing a url");
                };
                SessionIo::Http {
                    client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
                    endpoint: url.to_string(),
                    headers: endpoint.headers.clone(),
                    session_id: None,
                }
            }
        };
        let mut session = Self {
            server_name: server_name.to_string(),
            io,
            next_id: 0,
        };
        session
            .request(
                "initialize",
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": MCP_CLIENT_NAME,
                        "version": MCP_CLIENT_VERSION,
                    }
                }),
            )
            .await?;
        session.notify("notifications/initialized").await?;
        Ok(session)
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub async fn list_tools(&mut self) -> anyhow::Result<Vec<McpRemoteTool>> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("MCP tools/list result missing tools array"))?;

        let mut out = Vec::new();
        for row in tools {
            let Some(tool_name) = row.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            let input_schema = row
                .get("inputSchema")
                .or_else(|| row.get("input_schema"))
                .cloned()
                .unwrap_or_else(|| json!({"type":"object"}));
            out.push(McpRemoteTool {
                server_name: self.server_name.clone(),
                tool_name: tool_name.to_string(),
                description: row
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                schema_hash: schema_hash(&input_schema),
                input_schema,
            });
        }
        Ok(out)
    }

    pub async fn call_tool(&mut self, tool_name: &str, args: Value) -> anyhow::Result<ToolResult> {
        let result = self
            .request(
                "tools/call",
                json!({
                    "name": tool_name,
                    "arguments": args
                }),
            )
            .await?;
        let output = result
            .get("content")
            .map(render_mcp_content)
            .or_else(|| result.get("output").map(|v| v.to_string()))
            .unwrap_or_else(|| result.to_string());
        let is_error = result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Ok(ToolResult {
            output,
            metadata: json!({
                "server": self.server_name,
                "tool": tool_name,
                "is_error": is_error,
            }),
        })
    }

    pub async fn close(self) {
        if let SessionIo::Stdio { mut child, stdin, .. } = self.io {
            drop(stdin);
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }

    async fn request(&mut self, method: &str, params: Value) -> anyhow::Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = match &mut self.io {
            SessionIo::Http {
                client,
                endpoint,
                headers,
                session_id,
            } => {
                let (response, new_session) =
                    post_json_rpc(client, endpoint, headers, session_id.as_deref(), &request)
                        .await?;
                if new_session.is_some() {
                    *session_id = new_session;
                }
                response.ok_or_else(|| anyhow::anyhow!("MCP {method} returned an empty body"))?
            }
            SessionIo::Stdio { stdin, stdout, .. } => {
                write_line(stdin, &request).await?;
                tokio::time::timeout(REQUEST_TIMEOUT, read_response(stdout, id))
                    .await
                    .map_err(|_| anyhow::anyhow!("MCP {method} timed out"))??
            }
        };

        if let Some(err) = response.get("error") {
            let message = err
                .get("message")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("MCP {method} failed"));
            anyhow::bail!(message);
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn notify(&mut self, method: &str) -> anyhow::Result<()> {
        let notification = json!({"jsonrpc": "2.0", "method": method});
        match &mut self.io {
            SessionIo::Http {
                client,
                endpoint,
                headers,
                session_id,
            } => {
                post_json_rpc(
                    client,
                    endpoint,
                    headers,
                    session_id.as_deref(),
                    &notification,
                )
                .await?;
            }
            SessionIo::Stdio { stdin, .. } => write_line(stdin, &notification).await?,
        }
        Ok(())
    }
}

fn spawn_stdio(server_name: &str, endpoint: &McpEndpoint) -> anyhow::Result<SessionIo> {
    let Some(command_text) = endpoint
        .command
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    else {
        anyhow::bail!("MCP server '{server_name}' is missing a stdio command");
    };
    let mut child = Command::new(command_text)
        .args(&endpoint.args)
        .envs(&endpoint.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to start MCP server '{server_name}': {e}"))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow::anyhow!("MCP server '{server_name}' has no stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("MCP server '{server_name}' has no stdout"))?;
    Ok(SessionIo::Stdio {
        child,
        stdin,
        stdout: BufReader::new(stdout).lines(),
    })
}

async fn write_line(stdin: &mut ChildStdin, message: &Value) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

/// Reads until the response carrying `id`; server notifications and log noise
/// on stdout are skipped.
async fn read_response(stdout: &mut Lines<BufReader<ChildStdout>>, id: u64) -> anyhow::Result<Value> {
    while let Some(line) = stdout.next_line().await? {
        let Ok(value) = serde_json::from_str::<Value>(line.trim()) else {
            continue;
        };
        if value.get("id").and_then(|v| v.as_u64()) == Some(id) {
            return Ok(value);
        }
    }
    anyhow::bail!("MCP server closed stdout before responding")
}

fn build_headers(
    headers: &BTreeMap<String, String>,
    session_id: Option<&str>,
) -> anyhow::Result<HeaderMap> {
    let mut map = HeaderMap::new();
    map.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/event-stream"),
    );
    map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(session_id) = session_id {
        map.insert(
            HeaderName::from_static(MCP_SESSION_HEADER),
            HeaderValue::from_str(session_id)?,
        );
    }
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.trim().as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid header name '{key}': {e}"))?;
        let header = HeaderValue::from_str(value.trim())
            .map_err(|e| anyhow::anyhow!("Invalid header value for '{key}': {e}"))?;
        map.insert(name, header);
    }
    Ok(map)
}

/// Posts one JSON-RPC message. Returns the parsed body (absent for accepted
/// notifications) and any session id the server assigned.
async fn post_json_rpc(
    client: &reqwest::Client,
    endpoint: &str,
    headers: &BTreeMap<String, String>,
    session_id: Option<&str>,
    request: &Value,
) -> anyhow::Result<(Option<Value>, Option<String>)> {
    let response = client
        .post(endpoint)
        .headers(build_headers(headers, session_id)?)
        .json(request)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("MCP request failed: {e}"))?;
    let status = response.status();
    let new_session = response
        .headers()
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let payload = response
        .text()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read MCP response: {e}"))?;
    if !status.is_success() {
        anyhow::bail!(
            "MCP endpoint returned HTTP {}: {}",
            status.as_u16(),
            payload.chars().take(400).collect::<String>()
        );
    }
    Ok((parse_rpc_payload(&payload)?, new_session))
}

fn parse_rpc_payload(payload: &str) -> anyhow::Result<Option<Value>> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(Some(value));
    }
    let from_events = trimmed
        .lines()
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<Value>(data.trim()).ok())
        .find(|value| value.get("result").is_some() || value.get("error").is_some());
    match from_events {
        Some(value) => Ok(Some(value)),
        None => anyhow::bail!("Invalid MCP JSON response"),
    }
}

fn render_mcp_content(value: &Value) -> String {
    let Some(items) = value.as_array() else {
        return value.to_string();
    };
    let mut chunks = Vec::new();
    for item in items {
        if let Some(text) = item.get("text").and_then(|v| v.as_str()) {
            chunks.push(text.to_string());
            continue;
        }
        chunks.push(item.to_string());
    }
    if chunks.is_empty() {
        value.to_string()
    } else {
        chunks.join("\n")
    }
}

fn schema_hash(schema: &Value) -> String {
    let payload = serde_json::to_vec(schema).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

/// A remote tool bound to its server. Every call opens and closes its own
/// session, so the tool outlives the discovery session that produced it.
pub struct McpTool {
    endpoint: McpEndpoint,
    remote: McpRemoteTool,
}

impl McpTool {
    pub fn new(endpoint: McpEndpoint, remote: McpRemoteTool) -> Self {
        Self { endpoint, remote }
    }

    pub fn server_name(&self) -> &str {
        &self.remote.server_name
    }
}

#[async_trait]
impl Tool for McpTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            self.remote.tool_name.clone(),
            format!(
                "Powered by '{}'.\n{}",
                self.remote.server_name, self.remote.description
            ),
            self.remote.input_schema.clone(),
        )
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let mut session = McpSession::open(&self.remote.server_name, &self.endpoint).await?;
        let result = session.call_tool(&self.remote.tool_name, args).await;
        session.close().await;
        let mut result = result?;
        result.metadata["schema_hash"] = json!(self.remote.schema_hash);
        Ok(result)
    }
}

/// Discovers the enabled tools of every server relevant to a role. Discovery
/// sessions are closed before returning.
pub async fn load_role_tools(role_servers: &RoleToolServers) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    for (server_name, endpoint) in &role_servers.servers {
        let mut session = McpSession::open(server_name, endpoint).await?;
        let listed = session.list_tools().await;
        session.close().await;
        for remote in listed? {
            if role_servers.enabled_tools.get(&remote.tool_name) != Some(server_name) {
                continue;
            }
            tracing::debug!(
                server = %server_name,
                tool = %remote.tool_name,
                schema_hash = %remote.schema_hash,
                "loaded MCP tool"
            );
            tools.push(Arc::new(McpTool::new(endpoint.clone(), remote)));
        }
    }
    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(tools: &[&str], agents: &[&str]) -> McpServerConfig {
        McpServerConfig {
            transport: McpTransport::StreamableHttp,
            command: None,
            args: Vec::new(),
            url: Some("https://mcp.example.com/mcp".to_string()),
            env: BTreeMap::new(),
            headers: BTreeMap::new(),
            enabled_tools: tools.iter().map(|s| s.to_string()).collect(),
            add_to_agents: agents.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn extract_filters_by_role_and_enabled_tools() {
        let mut settings = McpSettings::default();
        settings
            .servers
            .insert("github".to_string(), server(&["search_repos"], &["researcher"]));
        settings
            .servers
            .insert("idle".to_string(), server(&[], &["researcher"]));
        settings
            .servers
            .insert("sandbox".to_string(), server(&["run"], &["coder"]));

        let researcher = extract_mcp_settings(Some(&settings), "researcher");
        assert_eq!(researcher.servers.len(), 1);
        assert!(researcher.servers.contains_key("github"));
        assert_eq!(
            researcher.enabled_tools.get("search_repos").map(String::as_str),
            Some("github")
        );

        let coder = extract_mcp_settings(Some(&settings), "coder");
        assert_eq!(coder.servers.keys().collect::<Vec<_>>(), vec!["sandbox"]);

        assert!(extract_mcp_settings(Some(&settings), "reporter").is_empty());
        assert!(extract_mcp_settings(None, "researcher").is_empty());
    }

    #[test]
    fn server_config_parses_with_defaults() {
        let config: McpServerConfig = serde_json::from_value(json!({
            "transport": "stdio",
            "command": "uvx",
            "args": ["mcp-github-trending"],
            "enabled_tools": ["get_trending_repositories"],
            "add_to_agents": ["researcher"]
        }))
        .expect("config");
        assert_eq!(config.transport, McpTransport::Stdio);
        assert!(config.env.is_empty());
        assert!(config.url.is_none());
    }

    #[test]
    fn rpc_payload_accepts_json_sse_and_empty_bodies() {
        let json_body = r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#;
        assert!(parse_rpc_payload(json_body).expect("json").is_some());
        let sse = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n\n";
        let value = parse_rpc_payload(sse).expect("sse").expect("value");
        assert_eq!(value["id"], 2);
        assert!(parse_rpc_payload("  ").expect("empty").is_none());
        assert!(parse_rpc_payload("not json").is_err());
    }

    #[test]
    fn render_mcp_content_joins_text_items() {
        let content = json!([{"type":"text","text":"one"},{"type":"image","data":"x"}]);
        let rendered = render_mcp_content(&content);
        assert!(rendered.starts_with("one\n"));
        assert!(rendered.contains("image"));
    }

    #[test]
    fn schema_description_is_prefixed_with_server() {
        let tool = McpTool::new(
            McpEndpoint::from(&server(&["search"], &["researcher"])),
            McpRemoteTool {
                server_name: "github".to_string(),
                tool_name: "search".to_string(),
                description: "Search repositories".to_string(),
                input_schema: json!({"type": "object"}),
                schema_hash: schema_hash(&json!({"type": "object"})),
            },
        );
        let schema = tool.schema();
        assert_eq!(schema.name, "search");
        assert_eq!(schema.description, "Powered by 'github'.\nSearch repositories");
    }

    #[cfg(unix)]
    const FAKE_SERVER: &str = r#"while IFS= read -r line; do
  case "$line" in
    *'"method":"initialize"'*) echo '{"jsonrpc":"2.0","id":1,"result":{"capabilities":{}}}' ;;
    *'"method":"tools/list"'*) echo 'starting up'; echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"lookup","description":"Look things up","inputSchema":{"type":"object"}},{"name":"hidden","description":"Not enabled"}]}}' ;;
    *'"method":"tools/call"'*) echo '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"looked up"}]}}' ;;
  esac
done"#;

    #[cfg(unix)]
    fn stdio_settings() -> McpSettings {
        let mut settings = McpSettings::default();
        settings.servers.insert(
            "local".to_string(),
            McpServerConfig {
                transport: McpTransport::Stdio,
                command: Some("sh".to_string()),
                args: vec!["-c".to_string(), FAKE_SERVER.to_string()],
                url: None,
                env: BTreeMap::new(),
                headers: BTreeMap::new(),
                enabled_tools: vec!["lookup".to_string()],
                add_to_agents: vec!["researcher".to_string()],
            },
        );
        settings
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdio_discovery_keeps_only_enabled_tools_and_calls_them() {
        let role_servers = extract_mcp_settings(Some(&stdio_settings()), "researcher");
        let tools = load_role_tools(&role_servers).await.expect("tools");
        assert_eq!(tools.len(), 1);
        let schema = tools[0].schema();
        assert_eq!(schema.name, "lookup");
        assert!(schema.description.starts_with("Powered by 'local'."));

        let result = tools[0]
            .execute(json!({"q": "rust"}))
            .await
            .expect("call");
        assert_eq!(result.output, "looked up");
        assert_eq!(result.metadata["server"], "local");
    }

    #[tokio::test]
    async fn missing_stdio_command_fails_discovery() {
        let mut settings = McpSettings::default();
        let mut config = server(&["x"], &["coder"]);
        config.transport = McpTransport::Stdio;
        config.url = None;
        settings.servers.insert("broken".to_string(), config);
        let role_servers = extract_mcp_settings(Some(&settings), "coder");
        let err = load_role_tools(&role_servers)
            .await
            .err()
            .expect("expected error");
        assert!(err.to_string().contains("missing a stdio command"));
    }
}
