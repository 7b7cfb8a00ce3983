use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider_id: String,
    pub display_name: String,
    pub context_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

/// Which model family a role talks to. `basic` is accepted for configs that
/// predate the `standard` name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClass {
    #[default]
    #[serde(alias = "basic")]
    Standard,
    Reasoning,
}

impl ModelClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelClass::Standard => "standard",
            ModelClass::Reasoning => "reasoning",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_class_accepts_basic_alias() {
        let class: ModelClass = serde_json::from_str("\"basic\"").expect("parse");
        assert_eq!(class, ModelClass::Standard);
        let class: ModelClass = serde_json::from_str("\"reasoning\"").expect("parse");
        assert_eq!(class, ModelClass::Reasoning);
        assert_eq!(
            serde_json::to_string(&ModelClass::Standard).expect("serialize"),
            "\"standard\""
        );
    }
}
