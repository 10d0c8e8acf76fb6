//! Spot-image job entity model.

use serde::Serialize;
use sqlx::FromRow;
use waypoint_core::types::{DbId, Timestamp};

use super::status::{JobStatus, StatusId};

/// A row from the `spot_image_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SpotImageJob {
    pub id: DbId,
    pub plan_id: String,
    pub spot_name: String,
    pub status_id: StatusId,
    /// Completed non-success execution attempts. Never incremented on
    /// success.
    pub attempts: i32,
    pub max_attempts: i32,
    pub locked_by: Option<String>,
    pub locked_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SpotImageJob {
    /// Decoded status, if the row carries a known status ID.
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.status_id)
    }

    /// Whether the job reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(JobStatus::is_terminal)
    }
}
