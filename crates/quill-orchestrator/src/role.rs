use std::sync::Arc;

use serde::{Deserialize, Serialize};

use quill_core::WorkflowConfig;
use quill_tools::{
    build_search_provider, CrawlTool, PythonReplTool, SearchProvider, Tool, WebSearchTool,
};
use quill_types::ModelClass;

use crate::state::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Coordinator,
    Planner,
    Researcher,
    Coder,
    Reporter,
}

impl AgentRole {
    pub const ALL: [AgentRole; 5] = [
        AgentRole::Coordinator,
        AgentRole::Planner,
        AgentRole::Researcher,
        AgentRole::Coder,
        AgentRole::Reporter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Coordinator => "coordinator",
            AgentRole::Planner => "planner",
            AgentRole::Researcher => "researcher",
            AgentRole::Coder => "coder",
            AgentRole::Reporter => "reporter",
        }
    }

    pub fn prompt_key(self) -> PromptKey {
        match self {
            AgentRole::Coordinator => PromptKey::Coordinator,
            AgentRole::Planner => PromptKey::Planner,
            AgentRole::Researcher => PromptKey::Researcher,
            AgentRole::Coder => PromptKey::Coder,
            AgentRole::Reporter => PromptKey::Reporter,
        }
    }

    pub fn node(self) -> NodeId {
        match self {
            AgentRole::Coordinator => NodeId::Coordinator,
            AgentRole::Planner => NodeId::Planner,
            AgentRole::Researcher => NodeId::Researcher,
            AgentRole::Coder => NodeId::Coder,
            AgentRole::Reporter => NodeId::Reporter,
        }
    }

    pub fn model_class(self, config: &WorkflowConfig) -> ModelClass {
        config.model_class_for(self.as_str())
    }

    /// Built-in tools bound to the role's agent, before any remote tools.
    pub fn default_tools(self, toolbox: &Toolbox) -> Vec<Arc<dyn Tool>> {
        match self {
            AgentRole::Researcher => vec![
                Arc::new(WebSearchTool::new(
                    toolbox.search.clone(),
                    toolbox.max_search_results,
                )) as Arc<dyn Tool>,
                toolbox.crawl.clone(),
            ],
            AgentRole::Coder => vec![toolbox.python.clone()],
            AgentRole::Coordinator | AgentRole::Planner | AgentRole::Reporter => Vec::new(),
        }
    }
}

/// Prompt template names: one per role plus the tool-augmented coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKey {
    Coordinator,
    McpCoordinator,
    Planner,
    Researcher,
    Coder,
    Reporter,
}

impl PromptKey {
    pub const ALL: [PromptKey; 6] = [
        PromptKey::Coordinator,
        PromptKey::McpCoordinator,
        PromptKey::Planner,
        PromptKey::Researcher,
        PromptKey::Coder,
        PromptKey::Reporter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PromptKey::Coordinator => "coordinator",
            PromptKey::McpCoordinator => "mcp_coordinator",
            PromptKey::Planner => "planner",
            PromptKey::Researcher => "researcher",
            PromptKey::Coder => "coder",
            PromptKey::Reporter => "reporter",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|key| key.as_str() == wanted)
    }
}

/// Local tool implementations handed to role agents.
#[derive(Clone)]
pub struct Toolbox {
    pub search: Arc<dyn SearchProvider>,
    pub crawl: Arc<dyn Tool>,
    pub python: Arc<dyn Tool>,
    pub max_search_results: usize,
}

impl Toolbox {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            search: build_search_provider(&config.search),
            crawl: Arc::new(CrawlTool::default()),
            python: Arc::new(PythonReplTool::default()),
            max_search_results: config.max_search_results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_keys_parse_from_file_stems() {
        assert_eq!(PromptKey::parse("mcp-coordinator"), Some(PromptKey::McpCoordinator));
        assert_eq!(PromptKey::parse(" Planner "), Some(PromptKey::Planner));
        assert_eq!(PromptKey::parse("critic"), None);
    }

    #[test]
    fn role_tools_follow_the_role() {
        let toolbox = Toolbox::from_config(&WorkflowConfig::default());
        let names = |role: AgentRole| {
            role.default_tools(&toolbox)
                .iter()
                .map(|tool| tool.schema().name)
                .collect::<Vec<_>>()
        };
        assert_eq!(names(AgentRole::Researcher), vec!["web_search", "crawl_tool"]);
        assert_eq!(names(AgentRole::Coder), vec!["python_repl_tool"]);
        assert!(names(AgentRole::Reporter).is_empty());
    }

    #[test]
    fn model_class_comes_from_the_role_map() {
        let mut config = WorkflowConfig::default();
        config
            .agent_llm_map
            .insert("planner".to_string(), ModelClass::Reasoning);
        assert_eq!(AgentRole::Planner.model_class(&config), ModelClass::Reasoning);
        assert_eq!(AgentRole::Reporter.model_class(&config), ModelClass::Standard);
    }
}
