use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Level;

use quill_observability::{emit_event, ObservabilityEvent, ProcessKind};

use crate::adapter::{AdapterRegistry, SocialMediaAdapter};
use crate::analyzer::{ProfileAnalyzer, ProfileReport};
use crate::error::ProfileError;
use crate::platform::SocialPlatform;

pub const MAX_POSTS_TO_ANALYZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStage {
    DetectPlatform,
    FetchProfile,
    FetchPosts,
    Analyze,
    Complete,
    Error,
}

impl ProfileStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ProfileStage::DetectPlatform => "detect_platform",
            ProfileStage::FetchProfile => "fetch_profile",
            ProfileStage::FetchPosts => "fetch_posts",
            ProfileStage::Analyze => "analyze",
            ProfileStage::Complete => "complete",
            ProfileStage::Error => "error",
        }
    }
}

struct ProfileRun {
    url: String,
    platform: Option<SocialPlatform>,
    profile_data: Option<Value>,
    recent_posts: Vec<Value>,
    report: Option<ProfileReport>,
    stage: ProfileStage,
}

/// detect_platform → fetch_profile → fetch_posts → analyze, stopping at the
/// first fatal error. A failed posts fetch is not fatal.
pub struct ProfilePipeline {
    registry: AdapterRegistry,
    analyzer: ProfileAnalyzer,
}

impl ProfilePipeline {
    pub fn new(registry: AdapterRegistry, analyzer: ProfileAnalyzer) -> Self {
        Self { registry, analyzer }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Analyzes the profile at `url`. `platform` overrides the platform of
    /// the adapter that claims the URL.
    pub async fn run(
        &self,
        url: &str,
        platform: Option<SocialPlatform>,
    ) -> Result<ProfileReport, ProfileError> {
        let mut run = ProfileRun {
            url: url.to_string(),
            platform,
            profile_data: None,
            recent_posts: Vec::new(),
            report: None,
            stage: ProfileStage::DetectPlatform,
        };
        loop {
            let stage = run.stage;
            if matches!(stage, ProfileStage::Complete | ProfileStage::Error) {
                break;
            }
            tracing::debug!(stage = stage.as_str(), url = %run.url, "profile stage");
            if let Err(err) = self.advance(&mut run).await {
                tracing::error!(stage = stage.as_str(), "profile analysis failed: {err}");
                run.stage = ProfileStage::Error;
                self.emit_finished(&run, Some(err.code()));
                return Err(err);
            }
        }
        self.emit_finished(&run, None);
        run.report
            .ok_or_else(|| ProfileError::Analysis("analysis produced no report".to_string()))
    }

    async fn adapter(&self, run: &ProfileRun) -> Result<Arc<dyn SocialMediaAdapter>, ProfileError> {
        let platform = run
            .platform
            .ok_or_else(|| ProfileError::UnsupportedUrl(run.url.clone()))?;
        self.registry
            .for_platform(platform)
            .await
            .ok_or(ProfileError::NoAdapter(platform))
    }

    async fn advance(&self, run: &mut ProfileRun) -> Result<(), ProfileError> {
        let next = match run.stage {
            ProfileStage::DetectPlatform => {
                let adapter = self
                    .registry
                    .for_url(&run.url)
                    .await
                    .ok_or_else(|| ProfileError::UnsupportedUrl(run.url.clone()))?;
                let platform = *run.platform.get_or_insert(adapter.platform());
                tracing::info!(platform = %platform, "detected profile platform");
                ProfileStage::FetchProfile
            }
            ProfileStage::FetchProfile => {
                let adapter = self.adapter(run).await?;
                if !adapter.authenticate().await {
                    return Err(ProfileError::Authentication(adapter.platform()));
                }
                let profile = adapter
                    .get_profile(&run.url)
                    .await
                    .map_err(|err| ProfileError::Fetch(format!("{err:#}")))?;
                run.profile_data = Some(profile);
                ProfileStage::FetchPosts
            }
            ProfileStage::FetchPosts => {
                let adapter = self.adapter(run).await?;
                run.recent_posts = match adapter
                    .get_recent_posts(&run.url, MAX_POSTS_TO_ANALYZE)
                    .await
                {
                    Ok(mut posts) => {
                        posts.truncate(MAX_POSTS_TO_ANALYZE);
                        posts
                    }
                    Err(err) => {
                        tracing::warn!("could not fetch posts, analyzing the profile alone: {err:#}");
                        Vec::new()
                    }
                };
                ProfileStage::Analyze
            }
            ProfileStage::Analyze => {
                let profile = run
                    .profile_data
                    .as_ref()
                    .filter(|profile| !is_empty_profile(profile))
                    .ok_or(ProfileError::MissingProfile)?;
                let report = self.analyzer.analyze(profile, &run.recent_posts).await?;
                run.report = Some(report);
                ProfileStage::Complete
            }
            ProfileStage::Complete | ProfileStage::Error => run.stage,
        };
        run.stage = next;
        Ok(())
    }

    fn emit_finished(&self, run: &ProfileRun, error_code: Option<&str>) {
        let detail = format!(
            "platform={} posts={}",
            run.platform.map(SocialPlatform::as_str).unwrap_or("unknown"),
            run.recent_posts.len()
        );
        emit_event(
            if error_code.is_some() {
                Level::WARN
            } else {
                Level::INFO
            },
            ProcessKind::Engine,
            ObservabilityEvent {
                node: Some(run.stage.as_str()),
                status: Some(run.stage.as_str()),
                error_code,
                detail: Some(&detail),
                ..ObservabilityEvent::new("profile.analysis.finished", "profile")
            },
        );
    }
}

fn is_empty_profile(profile: &Value) -> bool {
    match profile {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}
