use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use quill_core::repair_json_output;
use quill_providers::Provider;
use quill_types::ChatMessage;

use crate::error::ProfileError;

pub const NO_POSTS: &str = "No recent posts available.";

const ANALYSIS_PROMPT: &str = r#"You are a professional personality and career analyst specializing in analyzing professional profiles. You will receive data from a social profile and its recent posts. Analyze this information to extract structured details.

### PROFILE DATA:
{profile_data}

### RECENT POSTS/ACTIVITY:
{posts_data}

Based on this information, provide a detailed analysis in the following JSON format:
```json
{
    "name": "Full name of the person",
    "role": "Current professional role or title",
    "expertise": ["List of areas of expertise, e.g. 'Machine Learning'"],
    "skills": ["List of technical and soft skills"],
    "years_of_experience": "Estimated total years of professional experience as a number",
    "tech_stack": ["Technologies the person works with"],
    "personality": {
        "traits": ["List of personality traits"],
        "communication_style": "Description of communication style",
        "interests": ["Personal and professional interests"],
        "values": ["Professional and personal values"]
    }
}
```

Analyze both the explicit details from the profile and the implicit information from the writing style and content of posts. Make educated estimations where data is missing.

Provide ONLY the valid JSON in your response, with no additional text."#;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    pub traits: Vec<String>,
    pub communication_style: String,
    pub interests: Vec<String>,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileReport {
    pub name: String,
    pub role: String,
    pub expertise: Vec<String>,
    pub skills: Vec<String>,
    pub years_of_experience: f64,
    pub tech_stack: Vec<String>,
    pub personality: Personality,
    /// The profile and posts the analysis was based on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Value>,
}

impl ProfileReport {
    /// Builds a report from the model's JSON, tolerating missing or
    /// mistyped fields.
    pub fn from_analysis(analysis: &Value, raw_data: Option<Value>) -> Self {
        let personality = analysis.get("personality").unwrap_or(&Value::Null);
        Self {
            name: string_field(analysis, "name"),
            role: string_field(analysis, "role"),
            expertise: string_list(analysis, "expertise"),
            skills: string_list(analysis, "skills"),
            years_of_experience: years_field(analysis.get("years_of_experience")),
            tech_stack: string_list(analysis, "tech_stack"),
            personality: Personality {
                traits: string_list(personality, "traits"),
                communication_style: string_field(personality, "communication_style"),
                interests: string_list(personality, "interests"),
                values: string_list(personality, "values"),
            },
            raw_data,
        }
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Numbers and numeric strings are accepted; anything else counts as zero.
fn years_field(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Renders a scalar the way it reads in a prompt; strings lose their quotes.
fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn text_at<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

fn period(entry: &Value) -> String {
    let year = |edge: &str| entry.pointer(&format!("/timePeriod/{edge}/year"));
    let start = year("startDate").map(display).unwrap_or_default();
    let end = year("endDate")
        .map(display)
        .unwrap_or_else(|| "Present".to_string());
    format!("{start} - {end}")
}

/// Plain-text profile summary: basic info, experience, education, skills.
pub fn format_profile(profile_data: &Value) -> String {
    let profile = profile_data.get("profile").unwrap_or(&Value::Null);
    let mut sections = vec!["BASIC INFORMATION:".to_string()];

    if let (Some(first), Some(last)) = (text_at(profile, "firstName"), text_at(profile, "lastName")) {
        sections.push(format!("Name: {first} {last}"));
    }
    for (key, label) in [
        ("headline", "Headline"),
        ("summary", "Summary"),
        ("industryName", "Industry"),
        ("locationName", "Location"),
    ] {
        if let Some(text) = text_at(profile, key) {
            sections.push(format!("{label}: {text}"));
        }
    }

    let entries = |key: &str| {
        profile
            .get(key)
            .and_then(Value::as_array)
            .filter(|items| !items.is_empty())
            .cloned()
    };
    if let Some(experience) = entries("experience") {
        sections.push("\nEXPERIENCE:".to_string());
        for entry in &experience {
            let title = entry.get("title").map(display).unwrap_or_default();
            let company = entry.get("companyName").map(display).unwrap_or_default();
            sections.push(format!("- {title} at {company} ({})", period(entry)));
            if let Some(description) = text_at(entry, "description") {
                sections.push(format!("  Description: {description}"));
            }
        }
    }
    if let Some(education) = entries("education") {
        sections.push("\nEDUCATION:".to_string());
        for entry in &education {
            let degree = entry.get("degreeName").map(display).unwrap_or_default();
            let field = entry.get("fieldOfStudy").map(display).unwrap_or_default();
            let school = entry.get("schoolName").map(display).unwrap_or_default();
            sections.push(format!("- {degree} {field} at {school} ({})", period(entry)));
        }
    }

    if let Some(skills) = profile_data
        .get("skills")
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
    {
        sections.push("\nSKILLS:".to_string());
        for skill in skills {
            sections.push(format!(
                "- {}",
                skill.get("name").map(display).unwrap_or_default()
            ));
        }
    }
    sections.join("\n")
}

pub fn format_posts(posts: &[Value]) -> String {
    if posts.is_empty() {
        return NO_POSTS.to_string();
    }
    let mut sections = Vec::new();
    for (i, post) in posts.iter().enumerate() {
        let count = |key: &str| post.get(key).map(display).unwrap_or_else(|| "0".to_string());
        sections.push(format!("POST {}:", i + 1));
        sections.push(format!(
            "Content: {}",
            post.get("text")
                .map(display)
                .unwrap_or_else(|| "No content".to_string())
        ));
        sections.push(format!(
            "Engagement: {} likes, {} comments, {} shares",
            count("likes"),
            count("comments"),
            count("shares")
        ));
        sections.push(String::new());
    }
    sections.join("\n")
}

pub struct ProfileAnalyzer {
    provider: Arc<dyn Provider>,
}

impl ProfileAnalyzer {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    pub fn prompt(profile_data: &Value, posts: &[Value]) -> String {
        ANALYSIS_PROMPT
            .replace("{profile_data}", &format_profile(profile_data))
            .replace("{posts_data}", &format_posts(posts))
    }

    pub async fn analyze(
        &self,
        profile_data: &Value,
        posts: &[Value],
    ) -> Result<ProfileReport, ProfileError> {
        let messages = [ChatMessage::user(Self::prompt(profile_data, posts))];
        let response = self
            .provider
            .chat(&messages, &[])
            .await
            .map_err(|err| ProfileError::Analysis(err.to_string()))?;
        let repaired = repair_json_output(&response.content.text());
        let analysis: Value = serde_json::from_str(&repaired)
            .map_err(|err| ProfileError::Analysis(format!("model returned invalid JSON: {err}")))?;
        if !analysis.is_object() {
            return Err(ProfileError::Analysis(
                "model returned JSON that is not an object".to_string(),
            ));
        }
        let raw_data = json!({"profile": profile_data, "posts": posts});
        Ok(ProfileReport::from_analysis(&analysis, Some(raw_data)))
    }
}
