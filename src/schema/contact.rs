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
pub enum ConsentState {
    Unknown,
    Granted,
    Revoked,
}

/// E.164 phone number (`+` followed by 8 to 15 digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Phone(String);

impl Phone {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let digits = raw
            .strip_prefix('+')
            .ok_or_else(|| format!("`{raw}` is not E.164: missing leading +"))?;
        if !(8..=15).contains(&digits.len()) || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("`{raw}` is not E.164"));
        }
        if digits.starts_with('0') {
            return Err(format!("`{raw}` is not E.164: country code cannot start with 0"));
        }
        Ok(Self(raw.to_string()))
    }

    /// Lenient form for provider callbacks: strips punctuation and adds the `+` if missing.
    pub fn normalize(raw: &str) -> Result<Self, String> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        Self::parse(&format!("+{digits}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Phone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Phone {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Phone::parse(&value)
    }
}

impl From<Phone> for String {
    fn from(phone: Phone) -> Self {
        phone.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub org_id: Uuid,
    pub phone: Option<Phone>,
    pub opted_out_at: Option<DateTime<Utc>>,
    pub consent: ConsentState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ContactRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub phone: Option<String>,
    pub opted_out_at: Option<DateTime<Utc>>,
    pub consent: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ContactRow> for Contact {
    type Error = StoreError;

    fn try_from(row: ContactRow) -> Result<Self, Self::Error> {
        let phone = match row.phone.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                Phone::parse(raw).map_err(|reason| StoreError::invalid_row("contacts", row.id, reason))?,
            ),
        };
        let consent = row.consent.parse().map_err(|_| {
            StoreError::invalid_row("contacts", row.id, format!("unknown consent `{}`", row.consent))
        })?;

        Ok(Self {
            id: row.id,
            org_id: row.org_id,
            phone,
            opted_out_at: row.opted_out_at,
            consent,
            created_at: row.created_at,
        })
    }
}

/// Raw audience candidate. List joins leave `contact_id` empty when the contact was deleted.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AudienceRow {
    pub contact_id: Option<Uuid>,
    pub phone: Option<String>,
    pub opted_out_at: Option<DateTime<Utc>>,
}

/// A contact the dispatcher will attempt to message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceMember {
    pub id: Uuid,
    pub phone: Option<String>,
}
