use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    QcApproved,
    DataEntered,
    Cancelled,
    Overdue,
    Reassigned,
}

/// Statuses that count as delivered work.
pub const DONE_STATUSES: [TaskStatus; 3] = [
    TaskStatus::Completed,
    TaskStatus::QcApproved,
    TaskStatus::DataEntered,
];

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::QcApproved => "qc_approved",
            TaskStatus::DataEntered => "data_entered",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Overdue => "overdue",
            TaskStatus::Reassigned => "reassigned",
        }
    }

    pub fn is_done(&self) -> bool {
        DONE_STATUSES.contains(self)
    }

    pub fn allowed_next(&self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Pending => &[InProgress, Paused, Cancelled, Overdue, Reassigned],
            InProgress => &[Paused, Completed, Cancelled, Overdue, Reassigned],
            Paused => &[InProgress, Cancelled, Overdue, Reassigned],
            Completed => &[QcApproved, InProgress, Reassigned],
            QcApproved => &[DataEntered, InProgress],
            DataEntered => &[],
            Overdue => &[InProgress, Completed, Cancelled, Reassigned],
            Reassigned => &[Pending, InProgress, Cancelled],
            Cancelled => &[Pending],
        }
    }

    /// Re-applying the current status is accepted as a no-op.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        *self == next || self.allowed_next().contains(&next)
    }

    pub fn done_strings() -> Vec<String> {
        DONE_STATUSES.iter().map(|status| status.to_string()).collect()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "qc_approved" => Ok(TaskStatus::QcApproved),
            "data_entered" => Ok(TaskStatus::DataEntered),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "overdue" => Ok(TaskStatus::Overdue),
            "reassigned" => Ok(TaskStatus::Reassigned),
            _ => Err(()),
        }
    }
}
