use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    CampaignStore, ContactStore, ConversationStore, IntegrationStore, JobStore, MessageStore,
    StoreResult, WebhookEventStore,
};
use crate::schema::{
    AudienceRow, BrandStatus, Campaign, CampaignRow, Contact, ContactRow, Conversation,
    ConversationActivity, ConversationRow,
    DeliveryUpdate, MessageStatus, NewInboundMessage, NewOutboundMessage, Notification,
    OrgIntegration, OrgIntegrationRow, SendJob, SendJobRow, WebhookEvent,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies `migrations/`. Safe to race: sqlx serializes runners on an advisory lock.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn claim_due(&self, now: DateTime<Utc>, limit: u32) -> StoreResult<Vec<SendJob>> {
        // select-and-lock in one statement: SKIP LOCKED keeps overlapping passes disjoint
        let rows = sqlx::query_as::<_, SendJobRow>(
            r#"
            UPDATE send_jobs
            SET status = 'running', locked_at = $1, updated_at = $1
            WHERE id IN (
                SELECT j.id
                FROM send_jobs j
                WHERE j.status IN ('pending', 'retrying')
                  AND j.locked_at IS NULL
                  AND j.run_at <= $1
                  AND NOT EXISTS (
                      SELECT 1 FROM campaigns c
                      WHERE c.id = j.campaign_id AND c.status = 'cancelled'
                  )
                ORDER BY j.run_at
                LIMIT $2
                FOR UPDATE OF j SKIP LOCKED
            )
            RETURNING id, campaign_id, run_at, status, attempts, locked_at, last_error,
                      created_at, updated_at
            "#,
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = rows
            .into_iter()
            .map(SendJob::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        jobs.sort_by_key(|job| job.run_at);
        Ok(jobs)
    }

    async fn enqueue(
        &self,
        campaign_id: Uuid,
        run_at: DateTime<Utc>,
    ) -> StoreResult<Option<SendJob>> {
        let mut tx = self.pool.begin().await?;

        // serializes concurrent schedules of the same campaign
        sqlx::query("SELECT id FROM campaigns WHERE id = $1 FOR UPDATE")
            .bind(campaign_id)
            .execute(&mut *tx)
            .await?;

        let running = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM send_jobs WHERE campaign_id = $1 AND status = 'running')",
        )
        .bind(campaign_id)
        .fetch_one(&mut *tx)
        .await?;
        if running {
            return Ok(None);
        }

        let moved = sqlx::query_as::<_, SendJobRow>(
            r#"
            UPDATE send_jobs
            SET run_at = $2, updated_at = now()
            WHERE id = (
                SELECT id FROM send_jobs
                WHERE campaign_id = $1
                  AND status IN ('pending', 'retrying')
                  AND locked_at IS NULL
                ORDER BY run_at
                LIMIT 1
            )
            RETURNING id, campaign_id, run_at, status, attempts, locked_at, last_error,
                      created_at, updated_at
            "#,
        )
        .bind(campaign_id)
        .bind(run_at)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match moved {
            Some(row) => row,
            None => {
                sqlx::query_as::<_, SendJobRow>(
                    r#"
                    INSERT INTO send_jobs (id, campaign_id, run_at, status)
                    VALUES ($1, $2, $3, 'pending')
                    RETURNING id, campaign_id, run_at, status, attempts, locked_at, last_error,
                              created_at, updated_at
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(campaign_id)
                .bind(run_at)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        SendJob::try_from(row).map(Some)
    }

    async fn mark_completed(&self, job_id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE send_jobs
            SET status = 'completed', locked_at = NULL, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_retrying(
        &self,
        job_id: Uuid,
        error: &str,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE send_jobs
            SET status = 'retrying', attempts = attempts + 1, last_error = $2,
                locked_at = NULL, run_at = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(run_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE send_jobs
            SET status = 'failed', attempts = attempts + 1, last_error = $2,
                locked_at = NULL, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_claimable_for_campaign(
        &self,
        campaign_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE send_jobs
            SET status = 'failed', last_error = $2, updated_at = $3
            WHERE campaign_id = $1
              AND status IN ('pending', 'retrying')
              AND locked_at IS NULL
            "#,
        )
        .bind(campaign_id)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CampaignStore for PgStore {
    async fn campaign(&self, campaign_id: Uuid) -> StoreResult<Option<Campaign>> {
        sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT id, org_id, course_id, name, template_id, audience_kind, audience_ref,
                   status, scheduled_at, timezone, completed_at
            FROM campaigns
            WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Campaign::try_from)
        .transpose()
    }

    async fn template_payload(&self, template_id: Uuid) -> StoreResult<Option<serde_json::Value>> {
        let payload = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT payload FROM rcs_templates WHERE id = $1",
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payload)
    }

    async fn mark_scheduled(&self, campaign_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'scheduled', scheduled_at = $2, updated_at = now()
            WHERE id = $1 AND status IN ('draft', 'scheduled')
            "#,
        )
        .bind(campaign_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_sending(&self, campaign_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'sending', updated_at = now()
            WHERE id = $1 AND status IN ('draft', 'scheduled')
            "#,
        )
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_completed(&self, campaign_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'completed', completed_at = $2, updated_at = now()
            WHERE id = $1 AND status <> 'cancelled'
            "#,
        )
        .bind(campaign_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_cancelled(&self, campaign_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'cancelled', updated_at = now()
            WHERE id = $1 AND status NOT IN ('completed', 'cancelled')
            "#,
        )
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ContactStore for PgStore {
    async fn list_members(&self, list_id: Uuid) -> StoreResult<Vec<AudienceRow>> {
        let rows = sqlx::query_as::<_, AudienceRow>(
            r#"
            SELECT c.id AS contact_id, c.phone, c.opted_out_at
            FROM contact_list_members m
            LEFT JOIN contacts c ON c.id = m.contact_id
            WHERE m.list_id = $1
            ORDER BY m.created_at
            "#,
        )
        .bind(list_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn active_contacts(&self, org_id: Uuid) -> StoreResult<Vec<AudienceRow>> {
        let rows = sqlx::query_as::<_, AudienceRow>(
            r#"
            SELECT id AS contact_id, phone, opted_out_at
            FROM contacts
            WHERE org_id = $1 AND opted_out_at IS NULL
            ORDER BY created_at
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn contact_by_phone(&self, org_id: Uuid, phone: &str) -> StoreResult<Option<Contact>> {
        sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT id, org_id, phone, opted_out_at, consent, created_at
            FROM contacts
            WHERE org_id = $1 AND phone = $2
            "#,
        )
        .bind(org_id)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?
        .map(Contact::try_from)
        .transpose()
    }

    async fn insert_contact(
        &self,
        org_id: Uuid,
        phone: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO contacts (id, org_id, phone, consent, created_at)
            VALUES ($1, $2, $3, 'unknown', $4)
            ON CONFLICT (org_id, phone) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(phone)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn find(&self, org_id: Uuid, contact_id: Uuid) -> StoreResult<Option<Conversation>> {
        sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, org_id, contact_id, last_message_at, last_direction, unread_count
            FROM conversations
            WHERE org_id = $1 AND contact_id = $2
            "#,
        )
        .bind(org_id)
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Conversation::try_from)
        .transpose()
    }

    async fn insert(
        &self,
        org_id: Uuid,
        contact_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO conversations (id, org_id, contact_id, last_message_at, unread_count)
            VALUES ($1, $2, $3, $4, 0)
            ON CONFLICT (org_id, contact_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(contact_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn record_activity(
        &self,
        conversation_id: Uuid,
        activity: ConversationActivity,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_at = GREATEST(last_message_at, $2),
                last_direction = $3,
                unread_count = unread_count + $4
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .bind(activity.at)
        .bind(activity.direction.to_string())
        .bind(i32::from(activity.increments_unread()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn insert_outbound(&self, message: &NewOutboundMessage) -> StoreResult<Uuid> {
        let message_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, org_id, conversation_id, contact_id, direction, body,
                                  payload, provider_message_id, status, campaign_id, created_at)
            VALUES ($1, $2, $3, $4, 'outbound', $5, $6, $7, 'sent', $8, $9)
            "#,
        )
        .bind(message_id)
        .bind(message.org_id)
        .bind(message.conversation_id)
        .bind(message.contact_id)
        .bind(message.body())
        .bind(&message.payload)
        .bind(&message.provider_message_id)
        .bind(message.campaign_id)
        .bind(message.sent_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO message_sends (id, campaign_id, send_job_id, contact_id, message_id,
                                       provider_message_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'sent', $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.campaign_id)
        .bind(message.send_job_id)
        .bind(message.contact_id)
        .bind(message_id)
        .bind(&message.provider_message_id)
        .bind(message.sent_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message_id)
    }

    async fn insert_inbound(&self, message: &NewInboundMessage) -> StoreResult<Uuid> {
        let message_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO messages (id, org_id, conversation_id, contact_id, direction, body,
                                  payload, provider_message_id, status, created_at)
            VALUES ($1, $2, $3, $4, 'inbound', $5, $6, $7, 'received', $8)
            "#,
        )
        .bind(message_id)
        .bind(message.org_id)
        .bind(message.conversation_id)
        .bind(message.contact_id)
        .bind(&message.body)
        .bind(&message.payload)
        .bind(&message.provider_message_id)
        .bind(message.received_at)
        .execute(&self.pool)
        .await?;
        Ok(message_id)
    }

    async fn apply_delivery_update(
        &self,
        provider_message_id: &str,
        update: &DeliveryUpdate,
    ) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let sends = match update {
            DeliveryUpdate::Delivered { at } => {
                sqlx::query(
                    r#"
                    UPDATE message_sends
                    SET delivered_at = $2,
                        status = CASE WHEN status = 'sent' THEN 'delivered' ELSE status END
                    WHERE provider_message_id = $1
                    "#,
                )
                .bind(provider_message_id)
                .bind(at)
                .execute(&mut *tx)
                .await?
            }
            DeliveryUpdate::Read { at } => {
                sqlx::query(
                    r#"
                    UPDATE message_sends
                    SET read_at = $2, status = 'read'
                    WHERE provider_message_id = $1
                    "#,
                )
                .bind(provider_message_id)
                .bind(at)
                .execute(&mut *tx)
                .await?
            }
            DeliveryUpdate::Clicked { at } => {
                sqlx::query(
                    r#"
                    UPDATE message_sends
                    SET first_click_at = COALESCE(first_click_at, $2)
                    WHERE provider_message_id = $1
                    "#,
                )
                .bind(provider_message_id)
                .bind(at)
                .execute(&mut *tx)
                .await?
            }
            DeliveryUpdate::Failed { reason, .. } => {
                sqlx::query(
                    r#"
                    UPDATE message_sends
                    SET failure_reason = $2, status = 'failed'
                    WHERE provider_message_id = $1
                    "#,
                )
                .bind(provider_message_id)
                .bind(reason)
                .execute(&mut *tx)
                .await?
            }
        };

        if let Some(status) = update.message_status() {
            let only_from_sent = status == MessageStatus::Delivered;
            sqlx::query(
                r#"
                UPDATE messages
                SET status = $2, updated_at = now()
                WHERE provider_message_id = $1
                  AND direction = 'outbound'
                  AND (NOT $3 OR status = 'sent')
                "#,
            )
            .bind(provider_message_id)
            .bind(status.to_string())
            .bind(only_from_sent)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(sends.rows_affected())
    }
}

#[async_trait]
impl IntegrationStore for PgStore {
    async fn integration_for_org(&self, org_id: Uuid) -> StoreResult<Option<OrgIntegration>> {
        sqlx::query_as::<_, OrgIntegrationRow>(
            r#"
            SELECT id, org_id, brand_id, agent_id, status, updated_at
            FROM org_integrations
            WHERE org_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?
        .map(OrgIntegration::try_from)
        .transpose()
    }

    async fn integration_for_brand(&self, brand_id: &str) -> StoreResult<Option<OrgIntegration>> {
        sqlx::query_as::<_, OrgIntegrationRow>(
            r#"
            SELECT id, org_id, brand_id, agent_id, status, updated_at
            FROM org_integrations
            WHERE brand_id = $1
            "#,
        )
        .bind(brand_id)
        .fetch_optional(&self.pool)
        .await?
        .map(OrgIntegration::try_from)
        .transpose()
    }

    async fn set_brand_status(
        &self,
        brand_id: &str,
        status: BrandStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Uuid>> {
        let org_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE org_integrations
            SET status = $2, updated_at = $3
            WHERE brand_id = $1
            RETURNING org_id
            "#,
        )
        .bind(brand_id)
        .bind(status.to_string())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(org_id)
    }

    async fn insert_notification(&self, notification: &Notification) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, org_id, kind, title, body)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(notification.org_id)
        .bind(&notification.kind)
        .bind(&notification.title)
        .bind(&notification.body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WebhookEventStore for PgStore {
    async fn event_exists(&self, external_event_id: &str) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM webhook_events WHERE external_event_id = $1)",
        )
        .bind(external_event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn record_event(&self, event: &WebhookEvent) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (id, external_event_id, event_type, payload, received_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (external_event_id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(&event.external_event_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.received_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
