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
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub org_id: Uuid,
    pub contact_id: Uuid,
    pub last_message_at: DateTime<Utc>,
    pub last_direction: Option<Direction>,
    pub unread_count: u32,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ConversationRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub contact_id: Uuid,
    pub last_message_at: DateTime<Utc>,
    pub last_direction: Option<String>,
    pub unread_count: i32,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = StoreError;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        let last_direction = row
            .last_direction
            .as_deref()
            .map(str::parse::<Direction>)
            .transpose()
            .map_err(|_| StoreError::invalid_row("conversations", row.id, "unknown last_direction"))?;
        let unread_count = u32::try_from(row.unread_count)
            .map_err(|_| StoreError::invalid_row("conversations", row.id, "negative unread_count"))?;

        Ok(Self {
            id: row.id,
            org_id: row.org_id,
            contact_id: row.contact_id,
            last_message_at: row.last_message_at,
            last_direction,
            unread_count,
        })
    }
}

/// Last-activity bump applied after a message lands in a thread.
#[derive(Debug, Clone, Copy)]
pub struct ConversationActivity {
    pub at: DateTime<Utc>,
    pub direction: Direction,
}

impl ConversationActivity {
    pub fn outbound(at: DateTime<Utc>) -> Self {
        Self {
            at,
            direction: Direction::Outbound,
        }
    }

    pub fn inbound(at: DateTime<Utc>) -> Self {
        Self {
            at,
            direction: Direction::Inbound,
        }
    }

    pub fn increments_unread(&self) -> bool {
        self.direction == Direction::Inbound
    }
}
