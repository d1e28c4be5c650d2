use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::schema::Direction;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageStatus {
    Received,
    Sent,
    Delivered,
    Read,
    Failed,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SendStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

/// Thread-visible record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub org_id: Uuid,
    pub conversation_id: Uuid,
    pub contact_id: Uuid,
    pub direction: Direction,
    pub body: Option<String>,
    pub payload: serde_json::Value,
    pub provider_message_id: Option<String>,
    pub status: MessageStatus,
    pub campaign_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Dispatch-accounting record for one campaign/contact attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSend {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub send_job_id: Uuid,
    pub contact_id: Uuid,
    pub message_id: Uuid,
    pub provider_message_id: String,
    pub status: SendStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub first_click_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOutboundMessage {
    pub org_id: Uuid,
    pub conversation_id: Uuid,
    pub contact_id: Uuid,
    pub campaign_id: Uuid,
    pub send_job_id: Uuid,
    pub payload: serde_json::Value,
    pub provider_message_id: String,
    pub sent_at: DateTime<Utc>,
}

impl NewOutboundMessage {
    pub fn body(&self) -> Option<String> {
        message_body(&self.payload)
    }
}

#[derive(Debug, Clone)]
pub struct NewInboundMessage {
    pub org_id: Uuid,
    pub conversation_id: Uuid,
    pub contact_id: Uuid,
    pub body: Option<String>,
    pub payload: serde_json::Value,
    pub provider_message_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Thread preview text for an RCS payload: its `text`, else a card title, else nothing.
pub fn message_body(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("text")
        .and_then(|v| v.as_str())
        .or_else(|| {
            payload
                .pointer("/cards/0/title")
                .and_then(|v| v.as_str())
        })
        .map(str::to_string)
}

/// Delivery-state change reported by the provider for one `provider_message_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryUpdate {
    Delivered { at: DateTime<Utc> },
    Read { at: DateTime<Utc> },
    Clicked { at: DateTime<Utc> },
    Failed { at: DateTime<Utc>, reason: String },
}

impl DeliveryUpdate {
    /// Status written to the thread message, if the update changes it.
    pub fn message_status(&self) -> Option<MessageStatus> {
        match self {
            DeliveryUpdate::Delivered { .. } => Some(MessageStatus::Delivered),
            DeliveryUpdate::Read { .. } => Some(MessageStatus::Read),
            DeliveryUpdate::Clicked { .. } => None,
            DeliveryUpdate::Failed { .. } => Some(MessageStatus::Failed),
        }
    }

    pub fn apply(&self, send: &mut MessageSend) {
        match self {
            DeliveryUpdate::Delivered { at } => {
                send.delivered_at = Some(*at);
                // a late delivery receipt never downgrades read/failed
                if send.status == SendStatus::Sent {
                    send.status = SendStatus::Delivered;
                }
            }
            DeliveryUpdate::Read { at } => {
                send.read_at = Some(*at);
                send.status = SendStatus::Read;
            }
            DeliveryUpdate::Clicked { at } => {
                send.first_click_at.get_or_insert(*at);
            }
            DeliveryUpdate::Failed { reason, .. } => {
                send.failure_reason = Some(reason.clone());
                send.status = SendStatus::Failed;
            }
        }
    }
}
