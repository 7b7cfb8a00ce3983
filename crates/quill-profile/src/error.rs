use crate::platform::SocialPlatform;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("Unsupported social media platform for URL: {0}")]
    UnsupportedUrl(String),
    #[error("No adapter available for platform: {0}")]
    NoAdapter(SocialPlatform),
    #[error("Failed to authenticate with {0}")]
    Authentication(SocialPlatform),
    #[error("Error fetching profile data: {0}")]
    Fetch(String),
    #[error("No profile data available for analysis")]
    MissingProfile,
    #[error("Error analyzing profile: {0}")]
    Analysis(String),
}

impl ProfileError {
    pub fn code(&self) -> &'static str {
        match self {
            ProfileError::UnsupportedUrl(_) => "PROFILE_URL_UNSUPPORTED",
            ProfileError::NoAdapter(_) => "PROFILE_NO_ADAPTER",
            ProfileError::Authentication(_) => "PROFILE_AUTH_FAILED",
            ProfileError::Fetch(_) => "PROFILE_FETCH_FAILED",
            ProfileError::MissingProfile => "PROFILE_MISSING",
            ProfileError::Analysis(_) => "PROFILE_ANALYSIS_FAILED",
        }
    }
}
