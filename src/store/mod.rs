//! Repository interfaces, one per entity family.
//!
//! Components receive these as `Arc<dyn …>` at construction. `PgStore` backs all of them in
//! production; the in-memory store backs them in tests.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::schema::{
    AudienceRow, BrandStatus, Campaign, Contact, Conversation, ConversationActivity, DeliveryUpdate,
    NewInboundMessage, NewOutboundMessage, Notification, OrgIntegration, SendJob, WebhookEvent,
};

pub use postgres::PgStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Every repository, as handed to the components at construction.
#[derive(Clone)]
pub struct Repositories {
    pub jobs: Arc<dyn JobStore>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub contacts: Arc<dyn ContactStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub messages: Arc<dyn MessageStore>,
    pub integrations: Arc<dyn IntegrationStore>,
    pub webhook_events: Arc<dyn WebhookEventStore>,
}

impl Repositories {
    /// Backs every repository with one store.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: JobStore
            + CampaignStore
            + ContactStore
            + ConversationStore
            + MessageStore
            + IntegrationStore
            + WebhookEventStore
            + 'static,
    {
        Self {
            jobs: store.clone(),
            campaigns: store.clone(),
            contacts: store.clone(),
            conversations: store.clone(),
            messages: store.clone(),
            integrations: store.clone(),
            webhook_events: store,
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically moves up to `limit` due jobs to `running` and returns them, oldest `run_at`
    /// first. Two concurrent callers never receive the same job.
    async fn claim_due(&self, now: DateTime<Utc>, limit: u32) -> StoreResult<Vec<SendJob>>;

    /// Queues the campaign's send at `run_at`. An existing claimable job is moved rather than
    /// duplicated, so a campaign never has two jobs waiting. Returns `None` while one of its
    /// jobs is running.
    async fn enqueue(&self, campaign_id: Uuid, run_at: DateTime<Utc>)
    -> StoreResult<Option<SendJob>>;

    async fn mark_completed(&self, job_id: Uuid, now: DateTime<Utc>) -> StoreResult<()>;

    /// Bumps attempts, records the error, clears the lock and re-queues at `run_at`.
    async fn mark_retrying(
        &self,
        job_id: Uuid,
        error: &str,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn mark_failed(&self, job_id: Uuid, error: &str, now: DateTime<Utc>) -> StoreResult<()>;

    /// Fails every still-claimable job of the campaign. Running jobs are left alone.
    async fn fail_claimable_for_campaign(
        &self,
        campaign_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn campaign(&self, campaign_id: Uuid) -> StoreResult<Option<Campaign>>;

    async fn template_payload(&self, template_id: Uuid) -> StoreResult<Option<serde_json::Value>>;

    async fn mark_scheduled(&self, campaign_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    async fn mark_sending(&self, campaign_id: Uuid) -> StoreResult<()>;

    /// No-op for cancelled campaigns.
    async fn mark_completed(&self, campaign_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Returns false when the campaign is missing or already terminal.
    async fn mark_cancelled(&self, campaign_id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Members of a contact list joined to contacts. Missing joins come back as `None`.
    async fn list_members(&self, list_id: Uuid) -> StoreResult<Vec<AudienceRow>>;

    /// Contacts of the org with no opt-out.
    async fn active_contacts(&self, org_id: Uuid) -> StoreResult<Vec<AudienceRow>>;

    async fn contact_by_phone(&self, org_id: Uuid, phone: &str) -> StoreResult<Option<Contact>>;

    /// Returns `None` when another writer inserted the same (org, phone) first.
    async fn insert_contact(
        &self,
        org_id: Uuid,
        phone: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Uuid>>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find(&self, org_id: Uuid, contact_id: Uuid) -> StoreResult<Option<Conversation>>;

    /// Returns `None` when the (org, contact) pair already has a conversation.
    async fn insert(
        &self,
        org_id: Uuid,
        contact_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Uuid>>;

    async fn record_activity(
        &self,
        conversation_id: Uuid,
        activity: ConversationActivity,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists the thread message and its send record together.
    async fn insert_outbound(&self, message: &NewOutboundMessage) -> StoreResult<Uuid>;

    async fn insert_inbound(&self, message: &NewInboundMessage) -> StoreResult<Uuid>;

    /// Applies a delivery update to the send and message rows carrying `provider_message_id`.
    /// Returns the number of send rows touched.
    async fn apply_delivery_update(
        &self,
        provider_message_id: &str,
        update: &DeliveryUpdate,
    ) -> StoreResult<u64>;
}

#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn integration_for_org(&self, org_id: Uuid) -> StoreResult<Option<OrgIntegration>>;

    async fn integration_for_brand(&self, brand_id: &str) -> StoreResult<Option<OrgIntegration>>;

    /// Returns the org owning the brand, if any.
    async fn set_brand_status(
        &self,
        brand_id: &str,
        status: BrandStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Uuid>>;

    async fn insert_notification(&self, notification: &Notification) -> StoreResult<()>;
}

#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    async fn event_exists(&self, external_event_id: &str) -> StoreResult<bool>;

    /// Returns false when an event with the same external id was already stored.
    async fn record_event(&self, event: &WebhookEvent) -> StoreResult<bool>;
}
