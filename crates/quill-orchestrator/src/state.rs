use std::fmt;

use serde::{Deserialize, Serialize};

use quill_types::{ChatMessage, MessageRole};

use crate::plan::CurrentPlan;

pub const DEFAULT_LOCALE: &str = "en-US";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Coordinator,
    BackgroundInvestigator,
    Planner,
    HumanFeedback,
    ResearchTeam,
    Researcher,
    Coder,
    Reporter,
    End,
}

impl NodeId {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeId::Coordinator => "coordinator",
            NodeId::BackgroundInvestigator => "background_investigator",
            NodeId::Planner => "planner",
            NodeId::HumanFeedback => "human_feedback",
            NodeId::ResearchTeam => "research_team",
            NodeId::Researcher => "researcher",
            NodeId::Coder => "coder",
            NodeId::Reporter => "reporter",
            NodeId::End => "end",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a run knows. Owned by the runner and snapshotted after every
/// transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub messages: Vec<ChatMessage>,
    pub locale: String,
    #[serde(default)]
    pub plan_iterations: u32,
    #[serde(default)]
    pub current_plan: CurrentPlan,
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub final_report: String,
    #[serde(default)]
    pub auto_accepted_plan: bool,
    #[serde(default = "default_true")]
    pub enable_background_investigation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_investigation_results: Option<String>,
}

fn default_true() -> bool {
    true
}

impl RunState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(query)],
            locale: DEFAULT_LOCALE.to_string(),
            plan_iterations: 0,
            current_plan: CurrentPlan::Empty,
            observations: Vec::new(),
            final_report: String::new(),
            auto_accepted_plan: false,
            enable_background_investigation: true,
            background_investigation_results: None,
        }
    }

    pub fn with_locale(mut self, locale: Option<&str>) -> Self {
        if let Some(locale) = locale.map(str::trim).filter(|l| !l.is_empty()) {
            self.locale = locale.to_string();
        }
        self
    }

    pub fn latest_user_message(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_starts_with_the_query_and_default_locale() {
        let state = RunState::new("What is RISC-V?").with_locale(Some("  "));
        assert_eq!(state.locale, DEFAULT_LOCALE);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(
            state.latest_user_message().map(|m| m.content.as_str()),
            Some("What is RISC-V?")
        );
        assert_eq!(state.current_plan, CurrentPlan::Empty);
    }

    #[test]
    fn node_ids_serialize_snake_case() {
        let value = serde_json::to_value(NodeId::BackgroundInvestigator).expect("json");
        assert_eq!(value, serde_json::json!("background_investigator"));
        assert_eq!(NodeId::HumanFeedback.to_string(), "human_feedback");
    }
}
