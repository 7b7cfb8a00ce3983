use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialPlatform {
    Linkedin,
    Twitter,
    Github,
    Instagram,
    Tiktok,
    Youtube,
    Facebook,
    X,
}

impl SocialPlatform {
    pub const ALL: [SocialPlatform; 8] = [
        SocialPlatform::Linkedin,
        SocialPlatform::Twitter,
        SocialPlatform::Github,
        SocialPlatform::Instagram,
        SocialPlatform::Tiktok,
        SocialPlatform::Youtube,
        SocialPlatform::Facebook,
        SocialPlatform::X,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SocialPlatform::Linkedin => "linkedin",
            SocialPlatform::Twitter => "twitter",
            SocialPlatform::Github => "github",
            SocialPlatform::Instagram => "instagram",
            SocialPlatform::Tiktok => "tiktok",
            SocialPlatform::Youtube => "youtube",
            SocialPlatform::Facebook => "facebook",
            SocialPlatform::X => "x",
        }
    }

    fn host(self) -> &'static str {
        match self {
            SocialPlatform::Linkedin => "linkedin.com",
            SocialPlatform::Twitter => "twitter.com",
            SocialPlatform::Github => "github.com",
            SocialPlatform::Instagram => "instagram.com",
            SocialPlatform::Tiktok => "tiktok.com",
            SocialPlatform::Youtube => "youtube.com",
            SocialPlatform::Facebook => "facebook.com",
            SocialPlatform::X => "x.com",
        }
    }

    /// Whether `url` points at a profile page on this platform. LinkedIn only
    /// counts member pages under `/in/`.
    pub fn matches_url(self, url: &str) -> bool {
        let Some((host, path)) = split_url(url) else {
            return false;
        };
        if host != self.host() {
            return false;
        }
        match self {
            SocialPlatform::Linkedin => path.starts_with("/in/"),
            _ => true,
        }
    }

    pub fn from_url(url: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|platform| platform.matches_url(url))
    }
}

impl fmt::Display for SocialPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocialPlatform {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|platform| platform.as_str() == wanted)
            .ok_or_else(|| format!("unknown platform `{raw}`"))
    }
}

/// Lowercased host (without `www.`/`m.`) and path of an http(s) URL.
fn split_url(url: &str) -> Option<(String, String)> {
    let lower = url.trim().to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let (authority, path) = match rest.find(['/', '?', '#']) {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let host = authority.rsplit('@').next().unwrap_or(authority);
    let host = host.split(':').next().unwrap_or(host);
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_platform_from_profile_urls() {
        assert_eq!(
            SocialPlatform::from_url("https://www.linkedin.com/in/jane-doe/"),
            Some(SocialPlatform::Linkedin)
        );
        assert_eq!(
            SocialPlatform::from_url("https://x.com/janedoe"),
            Some(SocialPlatform::X)
        );
        assert_eq!(
            SocialPlatform::from_url("github.com/janedoe"),
            Some(SocialPlatform::Github)
        );
        assert_eq!(SocialPlatform::from_url("https://box.com/janedoe"), None);
        assert_eq!(
            SocialPlatform::from_url("https://www.linkedin.com/company/acme"),
            None
        );
    }

    #[test]
    fn parses_platform_names() {
        assert_eq!("LinkedIn".parse::<SocialPlatform>(), Ok(SocialPlatform::Linkedin));
        assert!("myspace".parse::<SocialPlatform>().is_err());
        assert_eq!(
            serde_json::to_string(&SocialPlatform::Tiktok).expect("json"),
            "\"tiktok\""
        );
    }
}
