use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;
use tokio::sync::RwLock;

use quill_providers::LlmConfig;
use quill_runtime::McpSettings;
use quill_tools::{SearchEngine, SearchSettings};
use quill_types::ModelClass;

fn default_max_plan_iterations() -> u32 {
    1
}

fn default_max_step_num() -> u32 {
    3
}

fn default_max_search_results() -> usize {
    3
}

/// Effective settings for one workflow run. Read-only once a run starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_plan_iterations")]
    pub max_plan_iterations: u32,
    #[serde(default = "default_max_step_num")]
    pub max_step_num: u32,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub mcp_settings: Option<McpSettings>,
    /// Role name to model class. Roles missing from the map use the standard model.
    #[serde(default)]
    pub agent_llm_map: BTreeMap<String, ModelClass>,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub prompts_dir: Option<PathBuf>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_plan_iterations: default_max_plan_iterations(),
            max_step_num: default_max_step_num(),
            max_search_results: default_max_search_results(),
            search: SearchSettings::default(),
            mcp_settings: None,
            agent_llm_map: BTreeMap::new(),
            llm: LlmConfig::default(),
            prompts_dir: None,
        }
    }
}

impl WorkflowConfig {
    pub fn model_class_for(&self, role: &str) -> ModelClass {
        self.agent_llm_map.get(role).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    global: Value,
    project: Value,
    env: Value,
    runtime: Value,
    cli: Value,
}

/// Layered JSON configuration: global file, project file, environment,
/// runtime patches and command-line overrides, merged in that order.
#[derive(Clone)]
pub struct ConfigStore {
    project_path: PathBuf,
    global_path: PathBuf,
    layers: Arc<RwLock<ConfigLayers>>,
}

impl ConfigStore {
    pub async fn new(path: impl AsRef<Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        let global_path = resolve_global_config_path();
        Self::with_global_path(path, global_path, cli_overrides).await
    }

    pub async fn with_global_path(
        path: impl AsRef<Path>,
        global_path: PathBuf,
        cli_overrides: Option<Value>,
    ) -> anyhow::Result<Self> {
        let project_path = path.as_ref().to_path_buf();
        let global = read_json_file(&global_path).await?;
        let project = read_json_file(&project_path).await?;
        let layers = ConfigLayers {
            global,
            project,
            env: env_layer(),
            runtime: empty_object(),
            cli: cli_overrides.unwrap_or_else(empty_object),
        };
        Ok(Self {
            project_path,
            global_path,
            layers: Arc::new(RwLock::new(layers)),
        })
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn global_path(&self) -> &Path {
        &self.global_path
    }

    pub async fn get(&self) -> anyhow::Result<WorkflowConfig> {
        let merged = self.get_effective_value().await;
        serde_json::from_value(merged)
            .map_err(|e| anyhow::anyhow!("invalid workflow configuration: {e}"))
    }

    pub async fn get_effective_value(&self) -> Value {
        let layers = self.layers.read().await.clone();
        let mut merged = empty_object();
        deep_merge(&mut merged, &layers.global);
        deep_merge(&mut merged, &layers.project);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.runtime);
        deep_merge(&mut merged, &layers.cli);
        merged
    }

    pub async fn get_layers_value(&self) -> Value {
        let layers = self.layers.read().await;
        let mut value = json!({
            "global": layers.global,
            "project": layers.project,
            "env": layers.env,
            "runtime": layers.runtime,
            "cli": layers.cli
        });
        redact_secrets(&mut value);
        value
    }

    pub async fn patch_runtime(&self, patch: Value) -> Value {
        {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.runtime, &patch);
        }
        self.get_effective_value().await
    }

    pub async fn patch_project(&self, patch: Value) -> anyhow::Result<Value> {
        let snapshot = {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.project, &patch);
            layers.project.clone()
        };
        write_json_file(&self.project_path, &snapshot).await?;
        Ok(self.get_effective_value().await)
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Ok(empty_object());
    }
    let raw = fs::read_to_string(path).await?;
    if raw.trim().is_empty() {
        return Ok(empty_object());
    }
    serde_json::from_str::<Value>(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))
}

async fn write_json_file(path: &Path, value: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut to_write = value.clone();
    strip_env_secrets(&mut to_write);
    let raw = serde_json::to_string_pretty(&to_write)?;
    fs::write(path, raw).await?;
    Ok(())
}

fn resolve_global_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("QUILL_GLOBAL_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("quill").join("config.json");
    }
    PathBuf::from(".quill/global_config.json")
}

const SECRET_KEYS: [&str; 2] = ["api_key", "tavily_api_key"];

fn redact_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if SECRET_KEYS.contains(&key.as_str()) && child.is_string() {
                    *child = Value::String("***".to_string());
                } else {
                    redact_secrets(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_secrets),
        _ => {}
    }
}

/// Keys that the environment already supplies are not written back to disk.
fn strip_env_secrets(value: &mut Value) {
    let env_has = |key: &str| {
        std::env::var(key)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    };
    let Some(root) = value.as_object_mut() else {
        return;
    };
    if env_has("OPENAI_API_KEY") {
        if let Some(standard) = root
            .get_mut("llm")
            .and_then(|v| v.get_mut("standard"))
            .and_then(|v| v.as_object_mut())
        {
            standard.remove("api_key");
        }
    }
    if env_has("TAVILY_API_KEY") {
        if let Some(search) = root.get_mut("search").and_then(|v| v.as_object_mut()) {
            search.remove("tavily_api_key");
        }
    }
}

fn env_layer() -> Value {
    env_layer_from(|key| std::env::var(key).ok())
}

fn env_layer_from(lookup: impl Fn(&str) -> Option<String>) -> Value {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let mut root = empty_object();

    let api_key = get("OPENAI_API_KEY");
    let base_url = get("QUILL_LLM_URL");
    deep_merge(
        &mut root,
        &json!({
            "llm": {
                "standard": {
                    "api_key": api_key,
                    "url": base_url,
                    "model": get("QUILL_BASIC_MODEL"),
                }
            }
        }),
    );
    if let Some(model) = get("QUILL_REASONING_MODEL") {
        deep_merge(
            &mut root,
            &json!({
                "llm": {
                    "reasoning": {
                        "api_key": get("QUILL_REASONING_API_KEY").or(api_key),
                        "url": get("QUILL_REASONING_URL").or(base_url),
                        "model": model,
                    }
                }
            }),
        );
    }

    if let Some(key) = get("TAVILY_API_KEY") {
        deep_merge(&mut root, &json!({"search": {"tavily_api_key": key}}));
    }
    if let Some(raw) = get("SEARCH_API") {
        match SearchEngine::parse(&raw) {
            Some(engine) => deep_merge(&mut root, &json!({"search": {"engine": engine}})),
            None => tracing::warn!("ignoring unsupported SEARCH_API value `{raw}`"),
        }
    }

    for (env_key, field) in [
        ("QUILL_MAX_PLAN_ITERATIONS", "max_plan_iterations"),
        ("QUILL_MAX_STEP_NUM", "max_step_num"),
        ("QUILL_MAX_SEARCH_RESULTS", "max_search_results"),
    ] {
        let Some(raw) = get(env_key) else { continue };
        match raw.trim().parse::<u32>() {
            Ok(n) => {
                let mut patch = Map::new();
                patch.insert(field.to_string(), json!(n));
                deep_merge(&mut root, &Value::Object(patch));
            }
            Err(_) => tracing::warn!("ignoring non-numeric {env_key} value `{raw}`"),
        }
    }

    if let Some(dir) = get("QUILL_PROMPTS_DIR") {
        deep_merge(&mut root, &json!({"prompts_dir": dir}));
    }

    prune_empty_objects(&mut root);
    root
}

fn prune_empty_objects(value: &mut Value) {
    if let Value::Object(map) = value {
        for child in map.values_mut() {
            prune_empty_objects(child);
        }
        map.retain(|_, child| !matches!(child, Value::Object(m) if m.is_empty()));
    }
}

pub fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        let mut fresh = value.clone();
                        strip_nulls(&mut fresh);
                        base_map.insert(key.clone(), fresh);
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

fn strip_nulls(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|_, child| !child.is_null());
        for child in map.values_mut() {
            strip_nulls(child);
        }
    }
}
