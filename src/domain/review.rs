//! Manual review queue items for sells the matcher could not fully resolve.

use crate::domain::{OrderId, TimeMs};
use serde::{Deserialize, Serialize};

/// How urgently an operator should look at a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Operator workflow state. Items are never deleted automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    InProgress,
    Resolved,
    Dismissed,
}

impl ReviewStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReviewStatus::Pending),
            "in_progress" => Some(ReviewStatus::InProgress),
            "resolved" => Some(ReviewStatus::Resolved),
            "dismissed" => Some(ReviewStatus::Dismissed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewStatus::Pending => write!(f, "pending"),
            ReviewStatus::InProgress => write!(f, "in_progress"),
            ReviewStatus::Resolved => write!(f, "resolved"),
            ReviewStatus::Dismissed => write!(f, "dismissed"),
        }
    }
}

/// A queued investigation record, keyed by `(order_id, issue_type)`.
///
/// The engine enqueues these; operator tooling updates status. Re-running a
/// computation upserts the description and timestamp instead of duplicating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualReviewItem {
    pub order_id: OrderId,
    pub issue_type: String,
    pub severity: Severity,
    pub status: ReviewStatus,
    pub description: String,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
}

/// Issue type recorded when a sell cannot be fully matched.
pub const ISSUE_UNMATCHED_SELL: &str = "unmatched_sell";
