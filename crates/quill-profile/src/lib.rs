pub mod adapter;
pub mod analyzer;
pub mod error;
pub mod pipeline;
pub mod platform;

pub use adapter::{AdapterRegistry, SnapshotAdapter, SocialMediaAdapter};
pub use analyzer::{format_posts, format_profile, Personality, ProfileAnalyzer, ProfileReport, NO_POSTS};
pub use error::ProfileError;
pub use pipeline::{ProfilePipeline, ProfileStage, MAX_POSTS_TO_ANALYZE};
pub use platform::SocialPlatform;
