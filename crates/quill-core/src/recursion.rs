pub const RECURSION_LIMIT_ENV: &str = "AGENT_RECURSION_LIMIT";
pub const DEFAULT_RECURSION_LIMIT: u32 = 25;

/// Step budget for one agent invocation. Invalid overrides fall back to the
/// default and keep the warning that explains why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecursionLimit {
    value: u32,
    warning: Option<String>,
}

impl Default for RecursionLimit {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECURSION_LIMIT)
    }
}

impl RecursionLimit {
    pub fn fixed(value: u32) -> Self {
        Self {
            value: value.max(1),
            warning: None,
        }
    }

    pub fn from_env() -> Self {
        let raw = std::env::var(RECURSION_LIMIT_ENV).ok();
        let limit = Self::parse(raw.as_deref());
        match (&limit.warning, raw) {
            (Some(warning), _) => tracing::warn!("{warning}"),
            (None, Some(_)) => tracing::info!("Recursion limit set to: {}", limit.value),
            (None, None) => tracing::debug!(
                "{RECURSION_LIMIT_ENV} is not set. Using default value {DEFAULT_RECURSION_LIMIT}."
            ),
        }
        limit
    }

    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        match raw.trim().parse::<i64>() {
            Ok(parsed) if parsed > 0 => Self::fixed(u32::try_from(parsed).unwrap_or(u32::MAX)),
            Ok(parsed) => Self {
                value: DEFAULT_RECURSION_LIMIT,
                warning: Some(format!(
                    "{RECURSION_LIMIT_ENV} value '{raw}' (parsed as {parsed}) is not positive. Using default value {DEFAULT_RECURSION_LIMIT}."
                )),
            },
            Err(_) => Self {
                value: DEFAULT_RECURSION_LIMIT,
                warning: Some(format!(
                    "Invalid {RECURSION_LIMIT_ENV} value: '{raw}'. Using default value {DEFAULT_RECURSION_LIMIT}."
                )),
            },
        }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_uses_default_without_warning() {
        let limit = RecursionLimit::parse(None);
        assert_eq!(limit.value(), 25);
        assert!(limit.warning().is_none());
    }

    #[test]
    fn positive_value_is_used() {
        let limit = RecursionLimit::parse(Some(" 40 "));
        assert_eq!(limit.value(), 40);
        assert!(limit.warning().is_none());
    }

    #[test]
    fn negative_value_falls_back_with_warning() {
        let limit = RecursionLimit::parse(Some("-5"));
        assert_eq!(limit.value(), 25);
        assert!(limit.warning().is_some_and(|w| w.contains("not positive")));
    }

    #[test]
    fn zero_and_garbage_fall_back_with_warning() {
        assert_eq!(RecursionLimit::parse(Some("0")).value(), 25);
        let limit = RecursionLimit::parse(Some("lots"));
        assert_eq!(limit.value(), 25);
        assert!(limit.warning().is_some_and(|w| w.starts_with("Invalid")));
    }
}
