use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    Cancelled,
}

/// Declared recipients of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Audience {
    AllContacts,
    ContactList { list_id: Uuid },
    // smart lists are evaluated as the org's full active audience
    SmartList { list_id: Option<Uuid> },
}

impl Audience {
    pub fn parse(kind: &str, reference: Option<Uuid>) -> Result<Self, String> {
        match kind {
            "all_contacts" => Ok(Audience::AllContacts),
            "contact_list" => reference
                .map(|list_id| Audience::ContactList { list_id })
                .ok_or_else(|| "contact_list audience without audience_ref".to_string()),
            "smart_list" => Ok(Audience::SmartList { list_id: reference }),
            other => Err(format!("unknown audience kind `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub org_id: Uuid,
    pub course_id: Option<Uuid>,
    pub name: String,
    pub template_id: Option<Uuid>,
    pub audience: Audience,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub timezone: Tz,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Plain-text payload used whenever the template cannot be loaded.
    pub fn fallback_payload(&self) -> serde_json::Value {
        serde_json::json!({ "text": self.name })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct CampaignRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub course_id: Option<Uuid>,
    pub name: String,
    pub template_id: Option<Uuid>,
    pub audience_kind: String,
    pub audience_ref: Option<Uuid>,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = StoreError;

    fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
        let status: CampaignStatus = row.status.parse().map_err(|_| {
            StoreError::invalid_row("campaigns", row.id, format!("unknown status `{}`", row.status))
        })?;
        let audience = Audience::parse(&row.audience_kind, row.audience_ref)
            .map_err(|reason| StoreError::invalid_row("campaigns", row.id, reason))?;
        let timezone = match row.timezone.as_deref().map(str::trim) {
            None | Some("") => Tz::UTC,
            Some(name) => name.parse::<Tz>().map_err(|_| {
                StoreError::invalid_row("campaigns", row.id, format!("invalid timezone `{name}`"))
            })?,
        };

        Ok(Self {
            id: row.id,
            org_id: row.org_id,
            course_id: row.course_id,
            name: row.name,
            template_id: row.template_id,
            audience,
            status,
            scheduled_at: row.scheduled_at,
            timezone,
            completed_at: row.completed_at,
        })
    }
}
