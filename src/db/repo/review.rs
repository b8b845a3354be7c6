//! Manual review queue reads for the repository.
//!
//! The engine upserts queue entries inside the allocation transaction (see
//! `allocations.rs`); this module is the read side used by operators and the
//! health report.

use crate::domain::{ManualReviewItem, OrderId, ReviewStatus, Severity, TimeMs};
use sqlx::Row;
use tracing::warn;

use super::Repository;

impl Repository {
    /// Review items, optionally filtered by status, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_review_items(
        &self,
        status: Option<ReviewStatus>,
    ) -> Result<Vec<ManualReviewItem>, sqlx::Error> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT order_id, issue_type, severity, status, description,
                           created_at, updated_at
                    FROM manual_review_queue
                    WHERE status = ?
                    ORDER BY created_at ASC, id ASC
                    "#,
                )
                .bind(status.to_string())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT order_id, issue_type, severity, status, description,
                           created_at, updated_at
                    FROM manual_review_queue
                    ORDER BY created_at ASC, id ASC
                    "#,
                )
                .fetch_all(self.pool())
                .await?
            }
        };

        Ok(rows.iter().map(decode_review_row).collect())
    }
}

fn decode_review_row(row: &sqlx::sqlite::SqliteRow) -> ManualReviewItem {
    let severity_raw: String = row.get("severity");
    let severity = Severity::parse(&severity_raw).unwrap_or_else(|| {
        warn!(severity = %severity_raw, "Unknown review severity, treating as medium");
        Severity::Medium
    });

    let status_raw: String = row.get("status");
    let status = ReviewStatus::parse(&status_raw).unwrap_or_else(|| {
        warn!(status = %status_raw, "Unknown review status, treating as pending");
        ReviewStatus::Pending
    });

    ManualReviewItem {
        order_id: OrderId::new(row.get::<String, _>("order_id")),
        issue_type: row.get("issue_type"),
        severity,
        status,
        description: row.get("description"),
        created_at: TimeMs::new(row.get::<i64, _>("created_at")),
        updated_at: TimeMs::new(row.get::<i64, _>("updated_at")),
    }
}
