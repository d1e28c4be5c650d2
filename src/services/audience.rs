use std::collections::HashSet;
use std::sync::Arc;

use crate::error::StoreError;
use crate::schema::{Audience, AudienceMember, AudienceRow, Campaign, Phone};
use crate::store::ContactStore;

/// Expands a campaign's declared audience into the contacts to message.
pub struct AudienceResolver {
    contacts: Arc<dyn ContactStore>,
}

impl AudienceResolver {
    pub fn new(contacts: Arc<dyn ContactStore>) -> Self {
        Self { contacts }
    }

    /// Deduplicated by contact id, first occurrence wins. Opted-out contacts never appear.
    /// List members without a joined contact or a phone are dropped; org-wide members keep
    /// their entry with `phone: None` so the dispatcher can skip them.
    pub async fn resolve(&self, campaign: &Campaign) -> Result<Vec<AudienceMember>, StoreError> {
        let (rows, require_phone) = match &campaign.audience {
            Audience::ContactList { list_id } => (self.contacts.list_members(*list_id).await?, true),
            Audience::AllContacts | Audience::SmartList { .. } => {
                (self.contacts.active_contacts(campaign.org_id).await?, false)
            }
        };

        let total = rows.len();
        let mut seen = HashSet::with_capacity(total);
        let members: Vec<AudienceMember> = rows
            .into_iter()
            .filter_map(|row| member(row, campaign))
            .filter(|m| !require_phone || m.phone.is_some())
            .filter(|m| seen.insert(m.id))
            .collect();

        tracing::debug!(
            campaign_id = %campaign.id,
            candidates = total,
            resolved = members.len(),
            "audience: resolved"
        );
        Ok(members)
    }
}

fn member(row: AudienceRow, campaign: &Campaign) -> Option<AudienceMember> {
    let id = row.contact_id?;
    if row.opted_out_at.is_some() {
        return None;
    }
    let phone = row
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .and_then(|raw| match Phone::parse(raw) {
            Ok(phone) => Some(phone.to_string()),
            Err(reason) => {
                tracing::warn!(campaign_id = %campaign.id, contact_id = %id, %reason, "audience: unusable phone");
                None
            }
        });
    Some(AudienceMember { id, phone })
}
