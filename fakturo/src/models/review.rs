use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Human corrections recorded against a result. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewFeedback {
    pub id: String,
    pub document_id: String,
    pub result_id: Option<String>,
    pub reviewer: String,
    pub corrections: BTreeMap<String, String>,
    pub accuracy_rating: Option<f64>,
    pub notes: Option<String>,
    pub time_spent_secs: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReviewSubmission {
    #[validate(length(min = 1, max = 255))]
    pub reviewer: String,
    #[serde(default)]
    pub corrections: BTreeMap<String, String>,
    /// Share of fields the engine got right, in `[0, 1]`.
    #[validate(range(min = 0.0, max = 1.0))]
    pub accuracy_rating: Option<f64>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
    #[validate(range(min = 0))]
    pub time_spent_secs: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> ReviewSubmission {
        ReviewSubmission {
            reviewer: "anna".to_string(),
            corrections: BTreeMap::new(),
            accuracy_rating: Some(0.75),
            notes: None,
            time_spent_secs: Some(40),
        }
    }

    #[test]
    fn test_valid_submission() {
        assert!(submission().validate().is_ok());
    }

    #[test]
    fn test_rating_out_of_range_is_rejected() {
        let mut s = submission();
        s.accuracy_rating = Some(3.0);
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_blank_reviewer_is_rejected() {
        let mut s = submission();
        s.reviewer = String::new();
        assert!(s.validate().is_err());
    }
}
