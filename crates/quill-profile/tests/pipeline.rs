use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use quill_profile::{
    AdapterRegistry, ProfileAnalyzer, ProfileError, ProfilePipeline, SnapshotAdapter,
    SocialMediaAdapter, SocialPlatform, NO_POSTS,
};
use quill_providers::{ChatResponse, Provider};
use quill_types::{ChatMessage, ProviderInfo, ToolSchema};

const LINKEDIN_URL: &str = "https://www.linkedin.com/in/ada-lovelace";

struct RecordingProvider {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl RecordingProvider {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "recording".to_string(),
            name: "Recording".to_string(),
            models: Vec::new(),
        }
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSchema],
    ) -> anyhow::Result<ChatResponse> {
        let prompt = messages
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().expect("lock").push(prompt);
        if self.reply.is_empty() {
            anyhow::bail!("model unavailable");
        }
        Ok(ChatResponse::text(self.reply.clone()))
    }
}

struct BrokenPostsAdapter;

#[async_trait]
impl SocialMediaAdapter for BrokenPostsAdapter {
    fn platform(&self) -> SocialPlatform {
        SocialPlatform::Github
    }

    fn can_handle_url(&self, url: &str) -> bool {
        SocialPlatform::Github.matches_url(url)
    }

    async fn authenticate(&self) -> bool {
        true
    }

    async fn get_profile(&self, _url: &str) -> anyhow::Result<Value> {
        Ok(json!({"profile": {"firstName": "Octo", "lastName": "Cat"}}))
    }

    async fn get_recent_posts(&self, _url: &str, _limit: usize) -> anyhow::Result<Vec<Value>> {
        anyhow::bail!("rate limited")
    }
}

const ANALYSIS: &str = r#"```json
{
    "name": "Ada Lovelace",
    "role": "Analyst",
    "expertise": ["Computation"],
    "skills": ["Mathematics"],
    "years_of_experience": "12",
    "tech_stack": ["Analytical Engine"],
    "personality": {
        "traits": ["curious"],
        "communication_style": "precise",
        "interests": ["poetry"],
        "values": ["rigour"]
    },
}
```"#;

fn profile() -> Value {
    json!({
        "profile": {"firstName": "Ada", "lastName": "Lovelace", "headline": "Analyst"},
        "skills": [{"name": "Mathematics"}]
    })
}

fn posts(count: usize) -> Vec<Value> {
    (1..=count)
        .map(|i| json!({"text": format!("note {i}"), "likes": i}))
        .collect()
}

fn pipeline(adapter: Arc<dyn SocialMediaAdapter>, provider: Arc<RecordingProvider>) -> ProfilePipeline {
    ProfilePipeline::new(
        AdapterRegistry::from_adapters([adapter]),
        ProfileAnalyzer::new(provider),
    )
}

#[tokio::test]
async fn analyzes_profile_with_at_most_five_posts() {
    let provider = RecordingProvider::new(ANALYSIS);
    let adapter = Arc::new(SnapshotAdapter::new(SocialPlatform::Linkedin, profile(), posts(7)));
    let report = pipeline(adapter, provider.clone())
        .run(LINKEDIN_URL, None)
        .await
        .expect("report");

    assert_eq!(report.name, "Ada Lovelace");
    assert_eq!(report.years_of_experience, 12.0);
    assert_eq!(report.personality.communication_style, "precise");
    let raw = report.raw_data.expect("raw data");
    assert_eq!(raw["posts"].as_array().map(Vec::len), Some(5));
    assert_eq!(raw["profile"], profile());

    let prompts = provider.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Name: Ada Lovelace\nHeadline: Analyst"));
    assert!(prompts[0].contains("POST 5:\nContent: note 5"));
    assert!(!prompts[0].contains("POST 6:"));
}

#[tokio::test]
async fn unsupported_url_stops_before_fetching() {
    let provider = RecordingProvider::new(ANALYSIS);
    let adapter = Arc::new(SnapshotAdapter::new(SocialPlatform::Linkedin, profile(), Vec::new()));
    let err = pipeline(adapter, provider.clone())
        .run("https://example.com/ada", None)
        .await
        .expect_err("unsupported");
    assert!(matches!(err, ProfileError::UnsupportedUrl(_)));
    assert_eq!(
        err.to_string(),
        "Unsupported social media platform for URL: https://example.com/ada"
    );
    assert!(provider.prompts().is_empty());
}

#[tokio::test]
async fn failed_authentication_is_fatal() {
    let provider = RecordingProvider::new(ANALYSIS);
    let adapter = Arc::new(
        SnapshotAdapter::new(SocialPlatform::Linkedin, profile(), Vec::new()).with_authenticated(false),
    );
    let err = pipeline(adapter, provider)
        .run(LINKEDIN_URL, None)
        .await
        .expect_err("auth");
    assert_eq!(err.to_string(), "Failed to authenticate with linkedin");
}

#[tokio::test]
async fn platform_override_without_adapter_is_reported() {
    let provider = RecordingProvider::new(ANALYSIS);
    let adapter = Arc::new(SnapshotAdapter::new(SocialPlatform::Linkedin, profile(), Vec::new()));
    let err = pipeline(adapter, provider)
        .run(LINKEDIN_URL, Some(SocialPlatform::Twitter))
        .await
        .expect_err("no adapter");
    assert!(matches!(err, ProfileError::NoAdapter(SocialPlatform::Twitter)));
}

#[tokio::test]
async fn posts_failure_still_analyzes_the_profile() {
    let provider = RecordingProvider::new(ANALYSIS);
    let report = pipeline(Arc::new(BrokenPostsAdapter), provider.clone())
        .run("https://github.com/octocat", None)
        .await
        .expect("report");
    assert_eq!(report.name, "Ada Lovelace");
    assert!(provider.prompts()[0].contains(NO_POSTS));
}

#[tokio::test]
async fn empty_profile_is_not_analyzed() {
    let provider = RecordingProvider::new(ANALYSIS);
    let adapter = Arc::new(SnapshotAdapter::new(SocialPlatform::Linkedin, json!({}), posts(2)));
    let err = pipeline(adapter, provider.clone())
        .run(LINKEDIN_URL, None)
        .await
        .expect_err("missing profile");
    assert!(matches!(err, ProfileError::MissingProfile));
    assert!(provider.prompts().is_empty());
}

#[tokio::test]
async fn model_failures_surface_as_analysis_errors() {
    let adapter: Arc<dyn SocialMediaAdapter> =
        Arc::new(SnapshotAdapter::new(SocialPlatform::Linkedin, profile(), Vec::new()));

    let err = pipeline(adapter.clone(), RecordingProvider::new(""))
        .run(LINKEDIN_URL, None)
        .await
        .expect_err("provider failure");
    assert_eq!(err.to_string(), "Error analyzing profile: model unavailable");

    let err = pipeline(adapter, RecordingProvider::new("I cannot help with that."))
        .run(LINKEDIN_URL, None)
        .await
        .expect_err("not json");
    assert_eq!(err.code(), "PROFILE_ANALYSIS_FAILED");
}
