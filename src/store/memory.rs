use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    CampaignStore, ContactStore, ConversationStore, IntegrationStore, JobStore, MessageStore,
    StoreResult, WebhookEventStore,
};
use crate::error::StoreError;
use crate::schema::{
    AudienceRow, BrandStatus, Campaign, CampaignStatus, ConsentState, Contact, Conversation,
    ConversationActivity, DeliveryUpdate, Direction, JobStatus, Message, MessageSend,
    MessageStatus, NewInboundMessage, NewOutboundMessage, Notification, OrgIntegration, Phone,
    SendJob, SendStatus, WebhookEvent,
};

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, SendJob>,
    campaigns: HashMap<Uuid, Campaign>,
    templates: HashMap<Uuid, serde_json::Value>,
    contacts: HashMap<Uuid, Contact>,
    // (list_id, contact_id) in insertion order; contact ids may dangle
    list_members: Vec<(Uuid, Uuid)>,
    conversations: HashMap<Uuid, Conversation>,
    messages: Vec<Message>,
    sends: Vec<MessageSend>,
    integrations: Vec<OrgIntegration>,
    notifications: Vec<Notification>,
    events: Vec<WebhookEvent>,
    fail_claims: bool,
    fail_campaign_loads: bool,
    fail_audience: bool,
}

/// Test double for every repository trait. All operations run under one lock.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory store lock poisoned")
    }

    pub fn add_campaign(&self, campaign: Campaign) {
        self.state().campaigns.insert(campaign.id, campaign);
    }

    pub fn add_template(&self, template_id: Uuid, payload: serde_json::Value) {
        self.state().templates.insert(template_id, payload);
    }

    pub fn add_job(&self, job: SendJob) {
        self.state().jobs.insert(job.id, job);
    }

    pub fn add_contact(&self, org_id: Uuid, phone: Option<&str>) -> Uuid {
        let contact = Contact {
            id: Uuid::new_v4(),
            org_id,
            phone: phone.map(|p| Phone::parse(p).expect("test phone must be E.164")),
            opted_out_at: None,
            consent: ConsentState::Granted,
            created_at: Utc::now(),
        };
        let id = contact.id;
        self.state().contacts.insert(id, contact);
        id
    }

    pub fn opt_out(&self, contact_id: Uuid) {
        if let Some(contact) = self.state().contacts.get_mut(&contact_id) {
            contact.opted_out_at = Some(Utc::now());
        }
    }

    pub fn add_list_member(&self, list_id: Uuid, contact_id: Uuid) {
        self.state().list_members.push((list_id, contact_id));
    }

    pub fn add_integration(&self, org_id: Uuid, brand_id: &str, agent_id: Option<&str>) {
        self.state().integrations.push(OrgIntegration {
            id: Uuid::new_v4(),
            org_id,
            brand_id: Some(brand_id.to_string()),
            agent_id: agent_id.map(str::to_string),
            status: BrandStatus::Pending,
            updated_at: Utc::now(),
        });
    }

    pub fn add_send(&self, send: MessageSend) {
        self.state().sends.push(send);
    }

    pub fn fail_claims(&self, fail: bool) {
        self.state().fail_claims = fail;
    }

    pub fn fail_campaign_loads(&self, fail: bool) {
        self.state().fail_campaign_loads = fail;
    }

    pub fn fail_audience(&self, fail: bool) {
        self.state().fail_audience = fail;
    }

    pub fn job(&self, job_id: Uuid) -> SendJob {
        self.state().jobs.get(&job_id).cloned().expect("job exists")
    }

    pub fn jobs_for(&self, campaign_id: Uuid) -> Vec<SendJob> {
        self.state()
            .jobs
            .values()
            .filter(|j| j.campaign_id == campaign_id)
            .cloned()
            .collect()
    }

    pub fn campaign_status(&self, campaign_id: Uuid) -> CampaignStatus {
        self.state().campaigns[&campaign_id].status
    }

    pub fn campaign_record(&self, campaign_id: Uuid) -> Campaign {
        self.state().campaigns[&campaign_id].clone()
    }

    pub fn sends(&self) -> Vec<MessageSend> {
        self.state().sends.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state().messages.clone()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.state().conversations.values().cloned().collect()
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.state().contacts.values().cloned().collect()
    }

    pub fn integration(&self, org_id: Uuid) -> Option<OrgIntegration> {
        self.state()
            .integrations
            .iter()
            .find(|i| i.org_id == org_id)
            .cloned()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state().notifications.clone()
    }

    pub fn events(&self) -> Vec<WebhookEvent> {
        self.state().events.clone()
    }
}

fn audience_row(contact: &Contact) -> AudienceRow {
    AudienceRow {
        contact_id: Some(contact.id),
        phone: contact.phone.as_ref().map(|p| p.as_str().to_string()),
        opted_out_at: contact.opted_out_at,
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn claim_due(&self, now: DateTime<Utc>, limit: u32) -> StoreResult<Vec<SendJob>> {
        let mut state = self.state();
        if state.fail_claims {
            return Err(StoreError::Unavailable("claim query failed".into()));
        }

        let cancelled: Vec<Uuid> = state
            .campaigns
            .values()
            .filter(|c| c.status == CampaignStatus::Cancelled)
            .map(|c| c.id)
            .collect();
        let mut due: Vec<(DateTime<Utc>, Uuid)> = state
            .jobs
            .values()
            .filter(|job| job.is_due(now) && !cancelled.contains(&job.campaign_id))
            .map(|job| (job.run_at, job.id))
            .collect();
        due.sort();
        due.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.status = JobStatus::Running;
                job.locked_at = Some(now);
                job.updated_at = now;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn enqueue(
        &self,
        campaign_id: Uuid,
        run_at: DateTime<Utc>,
    ) -> StoreResult<Option<SendJob>> {
        let now = Utc::now();
        let mut state = self.state();
        let running = state
            .jobs
            .values()
            .any(|j| j.campaign_id == campaign_id && j.status == JobStatus::Running);
        if running {
            return Ok(None);
        }

        let waiting = state
            .jobs
            .values_mut()
            .find(|j| j.campaign_id == campaign_id && j.status.is_claimable() && j.locked_at.is_none());
        if let Some(job) = waiting {
            job.run_at = run_at;
            job.updated_at = now;
            return Ok(Some(job.clone()));
        }

        let job = SendJob::new(campaign_id, run_at, now);
        state.jobs.insert(job.id, job.clone());
        Ok(Some(job))
    }

    async fn mark_completed(&self, job_id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        if let Some(job) = self.state().jobs.get_mut(&job_id) {
            job.status = JobStatus::Completed;
            job.locked_at = None;
            job.updated_at = now;
        }
        Ok(())
    }

    async fn mark_retrying(
        &self,
        job_id: Uuid,
        error: &str,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if let Some(job) = self.state().jobs.get_mut(&job_id) {
            job.status = JobStatus::Retrying;
            job.attempts += 1;
            job.last_error = Some(error.to_string());
            job.locked_at = None;
            job.run_at = run_at;
            job.updated_at = now;
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str, now: DateTime<Utc>) -> StoreResult<()> {
        if let Some(job) = self.state().jobs.get_mut(&job_id) {
            job.status = JobStatus::Failed;
            job.attempts += 1;
            job.last_error = Some(error.to_string());
            job.locked_at = None;
            job.updated_at = now;
        }
        Ok(())
    }

    async fn fail_claimable_for_campaign(
        &self,
        campaign_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut affected = 0;
        for job in self.state().jobs.values_mut() {
            if job.campaign_id == campaign_id && job.status.is_claimable() && job.locked_at.is_none()
            {
                job.status = JobStatus::Failed;
                job.last_error = Some(reason.to_string());
                job.updated_at = now;
                affected += 1;
            }
        }
        Ok(affected)
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn campaign(&self, campaign_id: Uuid) -> StoreResult<Option<Campaign>> {
        let state = self.state();
        if state.fail_campaign_loads {
            return Err(StoreError::Unavailable("campaign query failed".into()));
        }
        Ok(state.campaigns.get(&campaign_id).cloned())
    }

    async fn template_payload(&self, template_id: Uuid) -> StoreResult<Option<serde_json::Value>> {
        Ok(self.state().templates.get(&template_id).cloned())
    }

    async fn mark_scheduled(&self, campaign_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state();
        match state.campaigns.get_mut(&campaign_id) {
            Some(c) if matches!(c.status, CampaignStatus::Draft | CampaignStatus::Scheduled) => {
                c.status = CampaignStatus::Scheduled;
                c.scheduled_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_sending(&self, campaign_id: Uuid) -> StoreResult<()> {
        if let Some(c) = self.state().campaigns.get_mut(&campaign_id)
            && matches!(c.status, CampaignStatus::Draft | CampaignStatus::Scheduled)
        {
            c.status = CampaignStatus::Sending;
        }
        Ok(())
    }

    async fn mark_completed(&self, campaign_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(c) = self.state().campaigns.get_mut(&campaign_id)
            && c.status != CampaignStatus::Cancelled
        {
            c.status = CampaignStatus::Completed;
            c.completed_at = Some(at);
        }
        Ok(())
    }

    async fn mark_cancelled(&self, campaign_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state();
        match state.campaigns.get_mut(&campaign_id) {
            Some(c) if !matches!(c.status, CampaignStatus::Completed | CampaignStatus::Cancelled) => {
                c.status = CampaignStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn list_members(&self, list_id: Uuid) -> StoreResult<Vec<AudienceRow>> {
        let state = self.state();
        if state.fail_audience {
            return Err(StoreError::Unavailable("list query failed".into()));
        }
        Ok(state
            .list_members
            .iter()
            .filter(|(list, _)| *list == list_id)
            .map(|(_, contact_id)| match state.contacts.get(contact_id) {
                Some(contact) => audience_row(contact),
                None => AudienceRow {
                    contact_id: None,
                    phone: None,
                    opted_out_at: None,
                },
            })
            .collect())
    }

    async fn active_contacts(&self, org_id: Uuid) -> StoreResult<Vec<AudienceRow>> {
        let state = self.state();
        if state.fail_audience {
            return Err(StoreError::Unavailable("contact query failed".into()));
        }
        let mut contacts: Vec<&Contact> = state
            .contacts
            .values()
            .filter(|c| c.org_id == org_id && c.opted_out_at.is_none())
            .collect();
        contacts.sort_by_key(|c| c.created_at);
        Ok(contacts.into_iter().map(audience_row).collect())
    }

    async fn contact_by_phone(&self, org_id: Uuid, phone: &str) -> StoreResult<Option<Contact>> {
        Ok(self
            .state()
            .contacts
            .values()
            .find(|c| c.org_id == org_id && c.phone.as_ref().is_some_and(|p| p.as_str() == phone))
            .cloned())
    }

    async fn insert_contact(
        &self,
        org_id: Uuid,
        phone: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Uuid>> {
        let parsed = Phone::parse(phone).map_err(|reason| StoreError::invalid_row("contacts", phone, reason))?;
        let mut state = self.state();
        let exists = state
            .contacts
            .values()
            .any(|c| c.org_id == org_id && c.phone.as_ref() == Some(&parsed));
        if exists {
            return Ok(None);
        }
        let contact = Contact {
            id: Uuid::new_v4(),
            org_id,
            phone: Some(parsed),
            opted_out_at: None,
            consent: ConsentState::Unknown,
            created_at: now,
        };
        let id = contact.id;
        state.contacts.insert(id, contact);
        Ok(Some(id))
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn find(&self, org_id: Uuid, contact_id: Uuid) -> StoreResult<Option<Conversation>> {
        Ok(self
            .state()
            .conversations
            .values()
            .find(|c| c.org_id == org_id && c.contact_id == contact_id)
            .cloned())
    }

    async fn insert(
        &self,
        org_id: Uuid,
        contact_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Uuid>> {
        let mut state = self.state();
        if state
            .conversations
            .values()
            .any(|c| c.org_id == org_id && c.contact_id == contact_id)
        {
            return Ok(None);
        }
        let conversation = Conversation {
            id: Uuid::new_v4(),
            org_id,
            contact_id,
            last_message_at: now,
            last_direction: None,
            unread_count: 0,
        };
        let id = conversation.id;
        state.conversations.insert(id, conversation);
        Ok(Some(id))
    }

    async fn record_activity(
        &self,
        conversation_id: Uuid,
        activity: ConversationActivity,
    ) -> StoreResult<()> {
        if let Some(c) = self.state().conversations.get_mut(&conversation_id) {
            c.last_message_at = c.last_message_at.max(activity.at);
            c.last_direction = Some(activity.direction);
            if activity.increments_unread() {
                c.unread_count += 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_outbound(&self, message: &NewOutboundMessage) -> StoreResult<Uuid> {
        let message_id = Uuid::new_v4();
        let mut state = self.state();
        state.messages.push(Message {
            id: message_id,
            org_id: message.org_id,
            conversation_id: message.conversation_id,
            contact_id: message.contact_id,
            direction: Direction::Outbound,
            body: message.body(),
            payload: message.payload.clone(),
            provider_message_id: Some(message.provider_message_id.clone()),
            status: MessageStatus::Sent,
            campaign_id: Some(message.campaign_id),
            created_at: message.sent_at,
        });
        state.sends.push(MessageSend {
            id: Uuid::new_v4(),
            campaign_id: message.campaign_id,
            send_job_id: message.send_job_id,
            contact_id: message.contact_id,
            message_id,
            provider_message_id: message.provider_message_id.clone(),
            status: SendStatus::Sent,
            delivered_at: None,
            read_at: None,
            first_click_at: None,
            failure_reason: None,
            created_at: message.sent_at,
        });
        Ok(message_id)
    }

    async fn insert_inbound(&self, message: &NewInboundMessage) -> StoreResult<Uuid> {
        let message_id = Uuid::new_v4();
        self.state().messages.push(Message {
            id: message_id,
            org_id: message.org_id,
            conversation_id: message.conversation_id,
            contact_id: message.contact_id,
            direction: Direction::Inbound,
            body: message.body.clone(),
            payload: message.payload.clone(),
            provider_message_id: message.provider_message_id.clone(),
            status: MessageStatus::Received,
            campaign_id: None,
            created_at: message.received_at,
        });
        Ok(message_id)
    }

    async fn apply_delivery_update(
        &self,
        provider_message_id: &str,
        update: &DeliveryUpdate,
    ) -> StoreResult<u64> {
        let mut state = self.state();
        let mut touched = 0;
        for send in state
            .sends
            .iter_mut()
            .filter(|s| s.provider_message_id == provider_message_id)
        {
            update.apply(send);
            touched += 1;
        }
        if let Some(status) = update.message_status() {
            for message in state.messages.iter_mut().filter(|m| {
                m.direction == Direction::Outbound
                    && m.provider_message_id.as_deref() == Some(provider_message_id)
            }) {
                if status != MessageStatus::Delivered || message.status == MessageStatus::Sent {
                    message.status = status;
                }
            }
        }
        Ok(touched)
    }
}

#[async_trait]
impl IntegrationStore for MemoryStore {
    async fn integration_for_org(&self, org_id: Uuid) -> StoreResult<Option<OrgIntegration>> {
        Ok(self.integration(org_id))
    }

    async fn integration_for_brand(&self, brand_id: &str) -> StoreResult<Option<OrgIntegration>> {
        Ok(self
            .state()
            .integrations
            .iter()
            .find(|i| i.brand_id.as_deref() == Some(brand_id))
            .cloned())
    }

    async fn set_brand_status(
        &self,
        brand_id: &str,
        status: BrandStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Uuid>> {
        let mut state = self.state();
        let Some(integration) = state
            .integrations
            .iter_mut()
            .find(|i| i.brand_id.as_deref() == Some(brand_id))
        else {
            return Ok(None);
        };
        integration.status = status;
        integration.updated_at = now;
        Ok(Some(integration.org_id))
    }

    async fn insert_notification(&self, notification: &Notification) -> StoreResult<()> {
        self.state().notifications.push(notification.clone());
        Ok(())
    }
}

#[async_trait]
impl WebhookEventStore for MemoryStore {
    async fn event_exists(&self, external_event_id: &str) -> StoreResult<bool> {
        Ok(self
            .state()
            .events
            .iter()
            .any(|e| e.external_event_id.as_deref() == Some(external_event_id)))
    }

    async fn record_event(&self, event: &WebhookEvent) -> StoreResult<bool> {
        let mut state = self.state();
        if let Some(id) = event.external_event_id.as_deref()
            && state
                .events
                .iter()
                .any(|e| e.external_event_id.as_deref() == Some(id))
        {
            return Ok(false);
        }
        state.events.push(event.clone());
        Ok(true)
    }
}
