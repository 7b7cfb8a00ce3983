pub const EDIT_PLAN_PREFIX: &str = "[EDIT_PLAN]";
pub const ACCEPTED_PREFIX: &str = "[ACCEPTED]";
pub const REVIEW_PROMPT: &str = "Please Review the Plan.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    /// Revise the plan; carries the full feedback text.
    EditPlan(String),
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedbackError {
    #[error("Interrupt value of {0:?} is not supported.")]
    Unsupported(String),
}

/// Classifies reviewer text by its prefix, ignoring ASCII case.
pub fn parse_feedback(raw: &str) -> Result<Feedback, FeedbackError> {
    if has_prefix(raw, EDIT_PLAN_PREFIX) {
        return Ok(Feedback::EditPlan(raw.to_string()));
    }
    if has_prefix(raw, ACCEPTED_PREFIX) {
        return Ok(Feedback::Accepted);
    }
    Err(FeedbackError::Unsupported(raw.to_string()))
}

fn has_prefix(raw: &str, prefix: &str) -> bool {
    raw.as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_prefix_ignores_case() {
        assert_eq!(parse_feedback("[accepted] looks good"), Ok(Feedback::Accepted));
        assert_eq!(parse_feedback("[ACCEPTED]"), Ok(Feedback::Accepted));
    }

    #[test]
    fn edit_plan_keeps_the_full_text() {
        assert_eq!(
            parse_feedback("[Edit_Plan] add cost analysis"),
            Ok(Feedback::EditPlan("[Edit_Plan] add cost analysis".to_string()))
        );
    }

    #[test]
    fn anything_else_is_unsupported() {
        assert_eq!(
            parse_feedback("maybe"),
            Err(FeedbackError::Unsupported("maybe".to_string()))
        );
        assert!(parse_feedback("").is_err());
        assert!(parse_feedback(" [ACCEPTED]").is_err());
        assert!(parse_feedback("[ACCEPT").is_err());
    }
}
