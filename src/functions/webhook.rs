use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{StoreError, WebhookError};
use crate::schema::{
    BrandStatus, ConversationActivity, DeliveryUpdate, EventKind, NewInboundMessage, Notification,
    Phone, ProviderEvent, WebhookEvent,
};
use crate::services::{signature, ConversationResolver};
use crate::store::{ContactStore, IntegrationStore, MessageStore, Repositories, WebhookEventStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed(EventKind),
    Deduped,
}

/// Applies signed provider callbacks to contacts, threads and send records.
pub struct WebhookReconciler {
    secret: Vec<u8>,
    events: Arc<dyn WebhookEventStore>,
    contacts: Arc<dyn ContactStore>,
    messages: Arc<dyn MessageStore>,
    integrations: Arc<dyn IntegrationStore>,
    conversations: ConversationResolver,
}

impl WebhookReconciler {
    pub fn new(repos: &Repositories, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            events: repos.webhook_events.clone(),
            contacts: repos.contacts.clone(),
            messages: repos.messages.clone(),
            integrations: repos.integrations.clone(),
            conversations: ConversationResolver::new(repos.conversations.clone()),
        }
    }

    /// Verifies, dedups, applies, then logs the raw event. Nothing is written unless the
    /// signature checks out; a failed apply leaves no event row so the provider's redelivery
    /// is processed again.
    pub async fn handle(
        &self,
        body: &[u8],
        signature_hex: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookError> {
        signature::verify(&self.secret, body, signature_hex)?;

        let raw: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;
        let event: ProviderEvent = serde_json::from_value(raw.clone())
            .map_err(|e| WebhookError::Malformed(e.to_string()))?;
        let external_id = event.external_event_id().map(str::to_string);

        if let Some(id) = external_id.as_deref()
            && self.events.event_exists(id).await?
        {
            tracing::info!(external_event_id = id, event_type = %event.event_type, "webhook: duplicate ignored");
            return Ok(WebhookOutcome::Deduped);
        }

        let received_at = Utc::now();
        let kind = event.kind();
        match kind {
            EventKind::BrandVerified => self.brand_status(&event, BrandStatus::Verified, received_at).await?,
            EventKind::BrandFailed => self.brand_status(&event, BrandStatus::Failed, received_at).await?,
            EventKind::Inbound => self.inbound(&event, &raw, received_at).await?,
            EventKind::Delivered | EventKind::Read | EventKind::Clicked | EventKind::Failed => {
                self.delivery(&event, kind, received_at).await?
            }
            EventKind::Other => {
                tracing::debug!(event_type = %event.event_type, "webhook: unhandled event type");
            }
        }

        let recorded = self
            .events
            .record_event(&WebhookEvent {
                id: Uuid::new_v4(),
                external_event_id: external_id.clone(),
                event_type: event.event_type.clone(),
                payload: raw,
                received_at,
            })
            .await?;
        if !recorded {
            tracing::warn!(external_event_id = ?external_id, "webhook: event logged concurrently");
        }

        Ok(WebhookOutcome::Processed(kind))
    }

    async fn brand_status(
        &self,
        event: &ProviderEvent,
        status: BrandStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let Some(brand_id) = event.brand_id() else {
            tracing::warn!(event_type = %event.event_type, "webhook: brand event without brand id");
            return Ok(());
        };
        let Some(org_id) = self.integrations.set_brand_status(brand_id, status, now).await? else {
            tracing::warn!(brand_id, "webhook: brand not linked to any org");
            return Ok(());
        };

        self.integrations
            .insert_notification(&Notification::brand_status(org_id, status, event.reason.as_deref()))
            .await?;
        tracing::info!(%org_id, brand_id, %status, "webhook: brand status updated");
        Ok(())
    }

    async fn inbound(
        &self,
        event: &ProviderEvent,
        raw: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let Some(brand_id) = event.brand_id() else {
            tracing::warn!("webhook: inbound message without brand id");
            return Ok(());
        };
        let Some(integration) = self.integrations.integration_for_brand(brand_id).await? else {
            tracing::warn!(brand_id, "webhook: inbound message for unknown brand");
            return Ok(());
        };
        let phone = match event.from_phone().map(Phone::normalize) {
            Some(Ok(phone)) => phone,
            Some(Err(reason)) => {
                tracing::warn!(brand_id, %reason, "webhook: inbound sender phone unusable");
                return Ok(());
            }
            None => {
                tracing::warn!(brand_id, "webhook: inbound message without sender");
                return Ok(());
            }
        };

        let org_id = integration.org_id;
        let contact_id = self.contact_for(org_id, &phone, now).await?;
        let conversation_id = self.conversations.resolve(org_id, contact_id, now).await?;
        let received_at = event.timestamp.unwrap_or(now);

        self.messages
            .insert_inbound(&NewInboundMessage {
                org_id,
                conversation_id,
                contact_id,
                body: event.text.clone(),
                payload: raw.clone(),
                provider_message_id: event.message_id().map(str::to_string),
                received_at,
            })
            .await?;
        self.conversations
            .touch(conversation_id, ConversationActivity::inbound(received_at))
            .await?;

        tracing::info!(%org_id, %contact_id, %conversation_id, "webhook: inbound message stored");
        Ok(())
    }

    async fn contact_for(&self, org_id: Uuid, phone: &Phone, now: DateTime<Utc>) -> Result<Uuid, StoreError> {
        if let Some(contact) = self.contacts.contact_by_phone(org_id, phone.as_str()).await? {
            return Ok(contact.id);
        }
        if let Some(id) = self.contacts.insert_contact(org_id, phone.as_str(), now).await? {
            tracing::info!(%org_id, contact_id = %id, "webhook: created contact from inbound message");
            return Ok(id);
        }
        self.contacts
            .contact_by_phone(org_id, phone.as_str())
            .await?
            .map(|c| c.id)
            .ok_or_else(|| StoreError::Unavailable(format!("contact {phone} conflicted on insert but cannot be found")))
    }

    async fn delivery(&self, event: &ProviderEvent, kind: EventKind, now: DateTime<Utc>) -> Result<(), StoreError> {
        let Some(provider_message_id) = event.message_id().filter(|id| !id.is_empty()) else {
            tracing::warn!(event_type = %event.event_type, "webhook: receipt without message id");
            return Ok(());
        };
        let at = event.timestamp.unwrap_or(now);
        let update = match kind {
            EventKind::Delivered => DeliveryUpdate::Delivered { at },
            EventKind::Read => DeliveryUpdate::Read { at },
            EventKind::Clicked => DeliveryUpdate::Clicked { at },
            _ => DeliveryUpdate::Failed {
                at,
                reason: event.reason.clone().unwrap_or_else(|| "unknown".to_string()),
            },
        };

        let touched = self
            .messages
            .apply_delivery_update(provider_message_id, &update)
            .await?;
        if touched == 0 {
            tracing::debug!(provider_message_id, event_type = %event.event_type, "webhook: receipt for unknown send");
        }
        Ok(())
    }
}
