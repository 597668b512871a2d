use serde::Serialize;

use crate::models::QcMetrics;
use crate::status::TaskStatus;

pub const METRIC_MAX: f64 = 5.0;
pub const SCORE_MAX: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Excellent,
    Good,
    Average,
    Poor,
}

impl Rating {
    pub fn base_score(&self) -> f64 {
        match self {
            Rating::Excellent => 70.0,
            Rating::Good => 60.0,
            Rating::Average => 50.0,
            Rating::Poor => 40.0,
        }
    }
}

impl std::str::FromStr for Rating {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "excellent" => Ok(Rating::Excellent),
            "good" => Ok(Rating::Good),
            "average" => Ok(Rating::Average),
            "poor" => Ok(Rating::Poor),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QcDecision {
    Approve,
    Reject,
}

impl QcDecision {
    pub fn from_optional(value: Option<&str>) -> Option<Self> {
        match value.map(|value| value.trim().to_ascii_lowercase()) {
            None => Some(QcDecision::Approve),
            Some(value) => match value.as_str() {
                "approve" | "approved" => Some(QcDecision::Approve),
                "reject" | "rejected" | "rework" => Some(QcDecision::Reject),
                _ => None,
            },
        }
    }

    pub fn target_status(&self) -> TaskStatus {
        match self {
            QcDecision::Approve => TaskStatus::QcApproved,
            QcDecision::Reject => TaskStatus::InProgress,
        }
    }
}

fn clamp_metric(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, METRIC_MAX)
}

impl QcMetrics {
    pub fn clamped(&self) -> QcMetrics {
        QcMetrics {
            keyword: clamp_metric(self.keyword),
            content_quality: clamp_metric(self.content_quality),
            grammar: clamp_metric(self.grammar),
            formatting: clamp_metric(self.formatting),
            timeliness: clamp_metric(self.timeliness),
            instructions: clamp_metric(self.instructions),
        }
    }

    pub fn sum(&self) -> f64 {
        self.keyword
            + self.content_quality
            + self.grammar
            + self.formatting
            + self.timeliness
            + self.instructions
    }
}

/// Rating base plus the six criteria, always within `[0, 100]`.
pub fn total_score(rating: Rating, metrics: &QcMetrics) -> f64 {
    (rating.base_score() + metrics.clamped().sum()).clamp(0.0, SCORE_MAX)
}

pub fn is_qc_category(category: Option<&str>, markers: &[String]) -> bool {
    let Some(category) = category else {
        return false;
    };
    let category = category.to_lowercase();
    markers
        .iter()
        .any(|marker| !marker.is_empty() && category.contains(marker.as_str()))
}

/// Posting follows a fresh approval of a task in a QC category.
pub fn approval_triggers_posting(
    current: TaskStatus,
    next: TaskStatus,
    category: Option<&str>,
    markers: &[String],
) -> bool {
    next == TaskStatus::QcApproved && current != next && is_qc_category(category, markers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        vec!["qc".to_string(), "quality".to_string()]
    }

    #[test]
    fn perfect_review_reaches_one_hundred() {
        let metrics = QcMetrics {
            keyword: 5.0,
            content_quality: 5.0,
            grammar: 5.0,
            formatting: 5.0,
            timeliness: 5.0,
            instructions: 5.0,
        };
        assert_eq!(total_score(Rating::Excellent, &metrics), 100.0);
    }

    #[test]
    fn out_of_range_metrics_are_clamped() {
        let metrics = QcMetrics {
            keyword: 50.0,
            content_quality: -10.0,
            grammar: f64::NAN,
            formatting: 9.0,
            timeliness: 5.0,
            instructions: 1000.0,
        };
        let total = total_score(Rating::Excellent, &metrics);
        assert!((0.0..=100.0).contains(&total));
        assert_eq!(total, 90.0);

        let negative = QcMetrics {
            keyword: -100.0,
            ..QcMetrics::default()
        };
        assert_eq!(total_score(Rating::Poor, &negative), 40.0);
    }

    #[test]
    fn rating_sets_the_base() {
        let metrics = QcMetrics::default();
        assert_eq!(total_score(Rating::Good, &metrics), 60.0);
        assert_eq!(total_score(Rating::Average, &metrics), 50.0);
        assert!("stellar".parse::<Rating>().is_err());
        assert_eq!(" Poor ".parse::<Rating>(), Ok(Rating::Poor));
    }

    #[test]
    fn decision_defaults_to_approve() {
        assert_eq!(QcDecision::from_optional(None), Some(QcDecision::Approve));
        assert_eq!(
            QcDecision::from_optional(Some("Reject")),
            Some(QcDecision::Reject)
        );
        assert_eq!(QcDecision::from_optional(Some("maybe")), None);
        assert_eq!(QcDecision::Reject.target_status(), TaskStatus::InProgress);
    }

    #[test]
    fn qc_categories_match_by_substring() {
        assert!(is_qc_category(Some("Social QC"), &markers()));
        assert!(is_qc_category(Some("Quality Review"), &markers()));
        assert!(!is_qc_category(Some("Content Writing"), &markers()));
        assert!(!is_qc_category(None, &markers()));
    }

    #[test]
    fn only_fresh_qc_approvals_trigger_posting() {
        use TaskStatus::*;
        let qc = Some("Social QC");
        assert!(approval_triggers_posting(Completed, QcApproved, qc, &markers()));
        assert!(!approval_triggers_posting(Completed, InProgress, qc, &markers()));
        assert!(!approval_triggers_posting(QcApproved, QcApproved, qc, &markers()));
        assert!(!approval_triggers_posting(
            Completed,
            QcApproved,
            Some("Content Writing"),
            &markers()
        ));
        assert!(!approval_triggers_posting(Completed, QcApproved, None, &markers()));
    }
}
