pub mod mcp;

pub use mcp::{
    extract_mcp_settings, load_role_tools, McpEndpoint, McpRemoteTool, McpServerConfig,
    McpSession, McpSettings, McpTool, McpTransport, RoleToolServers,
};
