use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "roundstatus", rename_all = "lowercase")]
pub(crate) enum RoundStatus {
    Pending,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "sessionstatus", rename_all = "snake_case")]
pub(crate) enum SessionStatus {
    InProgress,
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "submissionkind", rename_all = "snake_case")]
pub(crate) enum SubmissionKind {
    Manual,
    TimerExpiry,
    ViolationTriggered,
    RoundForced,
}

impl SubmissionKind {
    /// Clamp a client-supplied tag to a known variant. Unknown or missing
    /// values fall back to `Manual`; clients never get to claim the
    /// server-only terminal kinds.
    pub(crate) fn from_client(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase().replace('-', "_")).as_deref() {
            Some("timer_expiry") => Self::TimerExpiry,
            _ => Self::Manual,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::TimerExpiry => "timer_expiry",
            Self::ViolationTriggered => "violation_triggered",
            Self::RoundForced => "round_forced",
        }
    }
}
