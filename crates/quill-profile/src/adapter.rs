use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::platform::SocialPlatform;

/// Read access to one social platform's profile data.
#[async_trait]
pub trait SocialMediaAdapter: Send + Sync {
    fn platform(&self) -> SocialPlatform;
    fn can_handle_url(&self, url: &str) -> bool;
    async fn authenticate(&self) -> bool;
    async fn get_profile(&self, url: &str) -> anyhow::Result<Value>;
    async fn get_recent_posts(&self, url: &str, limit: usize) -> anyhow::Result<Vec<Value>>;
}

/// Adapters in registration order, at most one per platform.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Arc<RwLock<Vec<Arc<dyn SocialMediaAdapter>>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_adapters(adapters: impl IntoIterator<Item = Arc<dyn SocialMediaAdapter>>) -> Self {
        let mut unique: Vec<Arc<dyn SocialMediaAdapter>> = Vec::new();
        for adapter in adapters {
            if !unique.iter().any(|a| a.platform() == adapter.platform()) {
                unique.push(adapter);
            }
        }
        Self {
            adapters: Arc::new(RwLock::new(unique)),
        }
    }

    /// Returns false when the platform already has an adapter.
    pub async fn register(&self, adapter: Arc<dyn SocialMediaAdapter>) -> bool {
        let mut adapters = self.adapters.write().await;
        if adapters.iter().any(|a| a.platform() == adapter.platform()) {
            tracing::debug!(platform = %adapter.platform(), "adapter already registered");
            return false;
        }
        adapters.push(adapter);
        true
    }

    pub async fn for_url(&self, url: &str) -> Option<Arc<dyn SocialMediaAdapter>> {
        self.adapters
            .read()
            .await
            .iter()
            .find(|adapter| adapter.can_handle_url(url))
            .cloned()
    }

    pub async fn for_platform(&self, platform: SocialPlatform) -> Option<Arc<dyn SocialMediaAdapter>> {
        self.adapters
            .read()
            .await
            .iter()
            .find(|adapter| adapter.platform() == platform)
            .cloned()
    }

    pub async fn platforms(&self) -> Vec<SocialPlatform> {
        self.adapters
            .read()
            .await
            .iter()
            .map(|adapter| adapter.platform())
            .collect()
    }
}

/// Serves a profile and posts captured ahead of time.
#[derive(Debug, Clone)]
pub struct SnapshotAdapter {
    platform: SocialPlatform,
    profile: Value,
    posts: Vec<Value>,
    authenticated: bool,
}

impl SnapshotAdapter {
    pub fn new(platform: SocialPlatform, profile: Value, posts: Vec<Value>) -> Self {
        Self {
            platform,
            profile,
            posts,
            authenticated: true,
        }
    }

    pub fn with_authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    /// Loads a profile JSON file and an optional posts file holding a JSON array.
    pub async fn from_files(
        platform: SocialPlatform,
        profile_path: &Path,
        posts_path: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let profile = read_json(profile_path).await?;
        let posts = match posts_path {
            Some(path) => match read_json(path).await? {
                Value::Array(items) => items,
                other => anyhow::bail!(
                    "posts file {} must hold a JSON array, found {}",
                    path.display(),
                    json_kind(&other)
                ),
            },
            None => Vec::new(),
        };
        Ok(Self::new(platform, profile, posts))
    }
}

async fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl SocialMediaAdapter for SnapshotAdapter {
    fn platform(&self) -> SocialPlatform {
        self.platform
    }

    fn can_handle_url(&self, url: &str) -> bool {
        self.platform.matches_url(url)
    }

    async fn authenticate(&self) -> bool {
        self.authenticated
    }

    async fn get_profile(&self, _url: &str) -> anyhow::Result<Value> {
        Ok(self.profile.clone())
    }

    async fn get_recent_posts(&self, _url: &str, limit: usize) -> anyhow::Result<Vec<Value>> {
        Ok(self.posts.iter().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(platform: SocialPlatform) -> Arc<dyn SocialMediaAdapter> {
        Arc::new(SnapshotAdapter::new(platform, json!({}), Vec::new()))
    }

    #[tokio::test]
    async fn resolves_by_url_and_platform() {
        let registry = AdapterRegistry::from_adapters([
            snapshot(SocialPlatform::Linkedin),
            snapshot(SocialPlatform::Github),
        ]);
        let adapter = registry
            .for_url("https://github.com/octocat")
            .await
            .expect("adapter");
        assert_eq!(adapter.platform(), SocialPlatform::Github);
        assert!(registry.for_url("https://x.com/someone").await.is_none());
        assert!(registry.for_platform(SocialPlatform::Linkedin).await.is_some());
        assert!(registry.for_platform(SocialPlatform::Tiktok).await.is_none());
    }

    #[tokio::test]
    async fn registration_rejects_duplicate_platforms() {
        let registry = AdapterRegistry::new();
        assert!(registry.register(snapshot(SocialPlatform::X)).await);
        assert!(!registry.register(snapshot(SocialPlatform::X)).await);
        assert!(registry.register(snapshot(SocialPlatform::Youtube)).await);
        assert_eq!(
            registry.platforms().await,
            vec![SocialPlatform::X, SocialPlatform::Youtube]
        );
    }

    #[tokio::test]
    async fn snapshot_posts_respect_the_limit() {
        let adapter = SnapshotAdapter::new(
            SocialPlatform::Linkedin,
            json!({"profile": {}}),
            (0..8).map(|i| json!({"text": format!("post {i}")})).collect(),
        );
        let posts = adapter
            .get_recent_posts("https://linkedin.com/in/a", 5)
            .await
            .expect("posts");
        assert_eq!(posts.len(), 5);
        assert_eq!(posts[0]["text"], "post 0");
    }

    #[tokio::test]
    async fn snapshot_files_require_a_posts_array() {
        let dir = tempfile::tempdir().expect("tempdir");
        let profile = dir.path().join("profile.json");
        let posts = dir.path().join("posts.json");
        tokio::fs::write(&profile, r#"{"profile": {"firstName": "Ada"}}"#)
            .await
            .expect("write");
        tokio::fs::write(&posts, r#"[{"text": "hi"}]"#).await.expect("write");
        let adapter = SnapshotAdapter::from_files(SocialPlatform::Linkedin, &profile, Some(&posts))
            .await
            .expect("snapshot");
        assert_eq!(adapter.posts.len(), 1);

        tokio::fs::write(&posts, r#"{"text": "hi"}"#).await.expect("write");
        let err = SnapshotAdapter::from_files(SocialPlatform::Linkedin, &profile, Some(&posts))
            .await
            .expect_err("object is not a posts list");
        assert!(err.to_string().contains("must hold a JSON array, found an object"));
    }
}
