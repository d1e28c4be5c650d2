use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BrandStatus {
    Pending,
    Verified,
    Failed,
}

/// An org's link to the RCS provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgIntegration {
    pub id: Uuid,
    pub org_id: Uuid,
    pub brand_id: Option<String>,
    pub agent_id: Option<String>,
    pub status: BrandStatus,
    pub updated_at: DateTime<Utc>,
}

impl OrgIntegration {
    /// Brand and agent ids, when both are present.
    pub fn sender(&self) -> Option<(&str, &str)> {
        let brand = self.brand_id.as_deref().filter(|s| !s.is_empty())?;
        let agent = self.agent_id.as_deref().filter(|s| !s.is_empty())?;
        Some((brand, agent))
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct OrgIntegrationRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub brand_id: Option<String>,
    pub agent_id: Option<String>,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OrgIntegrationRow> for OrgIntegration {
    type Error = StoreError;

    fn try_from(row: OrgIntegrationRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(|_| {
            StoreError::invalid_row("org_integrations", row.id, format!("unknown status `{}`", row.status))
        })?;
        Ok(Self {
            id: row.id,
            org_id: row.org_id,
            brand_id: row.brand_id,
            agent_id: row.agent_id,
            status,
            updated_at: row.updated_at,
        })
    }
}

/// In-app notification shown to org members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub org_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn brand_status(org_id: Uuid, status: BrandStatus, reason: Option<&str>) -> Self {
        let (title, body) = match status {
            BrandStatus::Verified => (
                "RCS brand verified".to_string(),
                "Your brand is verified. Campaigns can now be sent.".to_string(),
            ),
            BrandStatus::Failed => (
                "RCS brand verification failed".to_string(),
                reason
                    .map(|r| format!("Brand verification failed: {r}"))
                    .unwrap_or_else(|| "Brand verification failed.".to_string()),
            ),
            BrandStatus::Pending => (
                "RCS brand pending".to_string(),
                "Brand verification is in progress.".to_string(),
            ),
        };
        Self {
            org_id,
            kind: format!("brand.{status}"),
            title,
            body,
        }
    }
}
