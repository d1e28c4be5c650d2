use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::error::StoreError;

pub const CANCELLED_BY_USER: &str = "Cancelled by user";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Retrying,
    Failed,
}

impl JobStatus {
    /// Retrying jobs sit in the same pool as pending ones until their `run_at` comes due.
    pub fn is_claimable(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retrying)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendJob {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub run_at: DateTime<Utc>,
    pub status: JobStatus,
    pub attempts: u32,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SendJob {
    pub fn new(campaign_id: Uuid, run_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            run_at,
            status: JobStatus::Pending,
            attempts: 0,
            locked_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.locked_at.is_none() && self.run_at <= now
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SendJobRow {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub run_at: DateTime<Utc>,
    pub status: String,
    pub attempts: i32,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SendJobRow> for SendJob {
    type Error = StoreError;

    fn try_from(row: SendJobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|_| StoreError::invalid_row("send_jobs", row.id, format!("unknown status `{}`", row.status)))?;
        let attempts = u32::try_from(row.attempts)
            .map_err(|_| StoreError::invalid_row("send_jobs", row.id, "negative attempts"))?;
        if status == JobStatus::Running && row.locked_at.is_none() {
            return Err(StoreError::invalid_row(
                "send_jobs",
                row.id,
                "running job without locked_at",
            ));
        }

        Ok(Self {
            id: row.id,
            campaign_id: row.campaign_id,
            run_at: row.run_at,
            status,
            attempts,
            locked_at: row.locked_at,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
