use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::schema::ConversationActivity;
use crate::store::ConversationStore;

/// Find-or-create for the one thread per (org, contact).
pub struct ConversationResolver {
    store: Arc<dyn ConversationStore>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        org_id: Uuid,
        contact_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        if let Some(existing) = self.store.find(org_id, contact_id).await? {
            return Ok(existing.id);
        }
        if let Some(id) = self.store.insert(org_id, contact_id, now).await? {
            tracing::debug!(%org_id, %contact_id, conversation_id = %id, "conversation: created");
            return Ok(id);
        }
        // lost the insert race
        self.store.find(org_id, contact_id).await?.map(|c| c.id).ok_or_else(|| {
            StoreError::Unavailable(format!(
                "conversation for contact {contact_id} conflicted on insert but cannot be found"
            ))
        })
    }

    pub async fn touch(
        &self,
        conversation_id: Uuid,
        activity: ConversationActivity,
    ) -> Result<(), StoreError> {
        self.store.record_activity(conversation_id, activity).await
    }
}
