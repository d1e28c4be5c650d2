use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Audit row for one inbound provider callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub external_event_id: Option<String>,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrandRef {
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhoneRef {
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageRef {
    pub id: Option<String>,
}

/// Provider callback body. Every field but `type` is optional and depends on the event.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub brand_id: Option<String>,
    #[serde(default)]
    pub brand: Option<BrandRef>,
    #[serde(default)]
    pub from: Option<PhoneRef>,
    #[serde(default)]
    pub message: Option<MessageRef>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    /// Unreadable timestamps come back as `None` rather than rejecting the event.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

// epoch values above this are milliseconds
const MILLIS_CUTOFF: i64 = 100_000_000_000;

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(parse_timestamp))
}

fn parse_timestamp(raw: &serde_json::Value) -> Option<DateTime<Utc>> {
    match raw {
        serde_json::Value::Number(n) => {
            let n = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            if n.abs() >= MILLIS_CUTOFF {
                DateTime::from_timestamp_millis(n)
            } else {
                DateTime::from_timestamp(n, 0)
            }
        }
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Ok(at) = DateTime::parse_from_rfc3339(s) {
                return Some(at.with_timezone(&Utc));
            }
            if let Ok(n) = s.parse::<i64>() {
                return parse_timestamp(&serde_json::Value::from(n));
            }
            ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    BrandVerified,
    BrandFailed,
    Inbound,
    Delivered,
    Read,
    Clicked,
    Failed,
    Other,
}

impl ProviderEvent {
    /// Dedup key: the event id, or the message id when the provider omits one.
    pub fn external_event_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or_else(|| self.message_id())
            .filter(|id| !id.is_empty())
    }

    pub fn brand_id(&self) -> Option<&str> {
        self.brand_id
            .as_deref()
            .or_else(|| self.brand.as_ref().and_then(|b| b.id.as_deref()))
            .filter(|id| !id.is_empty())
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message.as_ref().and_then(|m| m.id.as_deref())
    }

    pub fn from_phone(&self) -> Option<&str> {
        self.from.as_ref().and_then(|f| f.phone.as_deref())
    }

    pub fn kind(&self) -> EventKind {
        match self.event_type.as_str() {
            "brand.verified" => EventKind::BrandVerified,
            "brand.failed" => EventKind::BrandFailed,
            "delivered" => EventKind::Delivered,
            "read" => EventKind::Read,
            "clicked" => EventKind::Clicked,
            "failed" => EventKind::Failed,
            t if t.starts_with("inbound") => EventKind::Inbound,
            _ => EventKind::Other,
        }
    }
}
