use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CampaignError;
use crate::schema::{CampaignStatus, SendJob, CANCELLED_BY_USER};
use crate::store::{CampaignStore, JobStore, Repositories};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    pub cancelled: bool,
    pub jobs_failed: u64,
}

/// Campaign lifecycle entry points: queueing the send job and cancelling it.
pub struct CampaignScheduler {
    jobs: Arc<dyn JobStore>,
    campaigns: Arc<dyn CampaignStore>,
}

impl CampaignScheduler {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            jobs: repos.jobs.clone(),
            campaigns: repos.campaigns.clone(),
        }
    }

    pub async fn schedule(
        &self,
        campaign_id: Uuid,
        run_at: DateTime<Utc>,
    ) -> Result<SendJob, CampaignError> {
        let campaign = self
            .campaigns
            .campaign(campaign_id)
            .await?
            .ok_or(CampaignError::NotFound(campaign_id))?;
        if !matches!(campaign.status, CampaignStatus::Draft | CampaignStatus::Scheduled) {
            return Err(CampaignError::NotSchedulable {
                campaign_id,
                status: campaign.status.to_string(),
            });
        }
        if !self.campaigns.mark_scheduled(campaign_id, run_at).await? {
            return Err(CampaignError::NotSchedulable {
                campaign_id,
                status: "changed concurrently".to_string(),
            });
        }

        let job = self
            .jobs
            .enqueue(campaign_id, run_at)
            .await?
            .ok_or_else(|| CampaignError::NotSchedulable {
                campaign_id,
                status: "sending".to_string(),
            })?;
        tracing::info!(%campaign_id, job_id = %job.id, %run_at, "campaigns: scheduled");
        Ok(job)
    }

    /// Schedules at a wall-clock time in the campaign's own timezone. Ambiguous times
    /// (clocks falling back) resolve to the earlier instant.
    pub async fn schedule_local(
        &self,
        campaign_id: Uuid,
        local: NaiveDateTime,
    ) -> Result<SendJob, CampaignError> {
        let campaign = self
            .campaigns
            .campaign(campaign_id)
            .await?
            .ok_or(CampaignError::NotFound(campaign_id))?;
        let run_at = campaign
            .timezone
            .from_local_datetime(&local)
            .earliest()
            .ok_or_else(|| CampaignError::InvalidLocalTime(format!("{local} {}", campaign.timezone)))?
            .with_timezone(&Utc);
        self.schedule(campaign_id, run_at).await
    }

    /// Marks the campaign cancelled, then fails its claimable jobs. Jobs already running
    /// are left to the dispatcher, which fails them when it sees the cancelled campaign.
    pub async fn cancel(&self, campaign_id: Uuid) -> Result<CancelOutcome, CampaignError> {
        if self.campaigns.campaign(campaign_id).await?.is_none() {
            return Err(CampaignError::NotFound(campaign_id));
        }
        let cancelled = self.campaigns.mark_cancelled(campaign_id).await?;
        let jobs_failed = self
            .jobs
            .fail_claimable_for_campaign(campaign_id, CANCELLED_BY_USER, Utc::now())
            .await?;

        tracing::info!(%campaign_id, cancelled, jobs_failed, "campaigns: cancel requested");
        Ok(CancelOutcome {
            cancelled,
            jobs_failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::ProviderError;
    use crate::functions::Dispatcher;
    use crate::schema::{Audience, Campaign, JobStatus};
    use crate::services::{MessagingProvider, SendReceipt};
    use crate::store::memory::MemoryStore;

    struct AcceptAll;

    #[async_trait]
    impl MessagingProvider for AcceptAll {
        async fn send(
            &self,
            _org_id: Uuid,
            to: &str,
            _payload: &serde_json::Value,
        ) -> Result<SendReceipt, ProviderError> {
            Ok(SendReceipt {
                message_id: format!("pm_{to}"),
            })
        }
    }

    fn setup(status: CampaignStatus, timezone: chrono_tz::Tz) -> (Arc<MemoryStore>, CampaignScheduler, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let campaign = Campaign {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            course_id: None,
            name: "Reminder".into(),
            template_id: None,
            audience: Audience::AllContacts,
            status,
            scheduled_at: None,
            timezone,
            completed_at: None,
        };
        let id = campaign.id;
        store.add_campaign(campaign);
        let scheduler = CampaignScheduler::new(&Repositories::from_store(store.clone()));
        (store, scheduler, id)
    }

    #[tokio::test]
    async fn schedule_enqueues_pending_job() {
        let (store, scheduler, id) = setup(CampaignStatus::Draft, chrono_tz::Tz::UTC);
        let at = Utc::now() + chrono::Duration::hours(2);

        let job = scheduler.schedule(id, at).await.unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.run_at, at);
        assert_eq!(store.job(job.id).campaign_id, id);
        let campaign = store.campaign_record(id);
        assert_eq!(campaign.status, CampaignStatus::Scheduled);
        assert_eq!(campaign.scheduled_at, Some(at));
    }

    #[tokio::test]
    async fn local_time_uses_campaign_timezone() {
        let (_store, scheduler, id) = setup(CampaignStatus::Draft, chrono_tz::America::New_York);
        let local = NaiveDateTime::parse_from_str("2026-07-01 09:00:00", "%Y-%m-%d %H:%M:%S").unwrap();

        let job = scheduler.schedule_local(id, local).await.unwrap();

        // EDT is UTC-4
        assert_eq!(job.run_at.to_rfc3339(), "2026-07-01T13:00:00+00:00");
    }

    #[tokio::test]
    async fn skipped_local_time_is_rejected() {
        let (_store, scheduler, id) = setup(CampaignStatus::Draft, chrono_tz::America::New_York);
        let gap = NaiveDateTime::parse_from_str("2026-03-08 02:30:00", "%Y-%m-%d %H:%M:%S").unwrap();

        let err = scheduler.schedule_local(id, gap).await.unwrap_err();
        assert!(matches!(err, CampaignError::InvalidLocalTime(_)));
    }

    #[tokio::test]
    async fn completed_campaign_cannot_be_rescheduled() {
        let (_store, scheduler, id) = setup(CampaignStatus::Completed, chrono_tz::Tz::UTC);
        let err = scheduler.schedule(id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, CampaignError::NotSchedulable { .. }));

        let err = scheduler.schedule(Uuid::new_v4(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, CampaignError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancel_fails_pending_job_with_reason() {
        let (store, scheduler, id) = setup(CampaignStatus::Draft, chrono_tz::Tz::UTC);
        let job = scheduler.schedule(id, Utc::now()).await.unwrap();

        let outcome = scheduler.cancel(id).await.unwrap();

        assert_eq!(
            outcome,
            CancelOutcome {
                cancelled: true,
                jobs_failed: 1
            }
        );
        let stored = store.job(job.id);
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("Cancelled by user"));
        assert_eq!(store.campaign_status(id), CampaignStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_leaves_running_job_alone() {
        let (store, scheduler, id) = setup(CampaignStatus::Scheduled, chrono_tz::Tz::UTC);
        let job = scheduler.schedule(id, Utc::now() - chrono::Duration::seconds(1)).await.unwrap();
        let claimed = store.claim_due(Utc::now(), 1).await.unwrap();
        assert_eq!(claimed[0].id, job.id);

        let outcome = scheduler.cancel(id).await.unwrap();

        assert_eq!(outcome.jobs_failed, 0);
        let stored = store.job(job.id);
        assert_eq!(stored.status, JobStatus::Running);
        assert!(stored.last_error.is_none());
    }

    #[tokio::test]
    async fn rescheduling_moves_the_waiting_job() {
        let (store, scheduler, id) = setup(CampaignStatus::Draft, chrono_tz::Tz::UTC);
        let first = scheduler.schedule(id, Utc::now() + chrono::Duration::hours(1)).await.unwrap();
        let later = Utc::now() + chrono::Duration::hours(3);

        let second = scheduler.schedule(id, later).await.unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(store.job(first.id).run_at, later);
        assert_eq!(store.jobs_for(id).len(), 1);
        assert_eq!(store.campaign_record(id).scheduled_at, Some(later));
    }

    #[tokio::test]
    async fn rescheduled_campaign_is_sent_once() {
        let (store, scheduler, id) = setup(CampaignStatus::Draft, chrono_tz::Tz::UTC);
        let org_id = store.campaign_record(id).org_id;
        store.add_contact(org_id, Some("+15550001234"));
        let past = Utc::now() - chrono::Duration::minutes(1);
        scheduler.schedule(id, past).await.unwrap();
        scheduler.schedule(id, past).await.unwrap();

        let dispatcher = Dispatcher::new(&Repositories::from_store(store.clone()), Arc::new(AcceptAll));
        let summary = dispatcher.poll().await.unwrap();

        assert_eq!(summary.claimed, 1);
        assert_eq!(store.sends().len(), 1);
        assert_eq!(store.campaign_status(id), CampaignStatus::Completed);
    }

    #[tokio::test]
    async fn running_job_blocks_rescheduling() {
        let (store, scheduler, id) = setup(CampaignStatus::Draft, chrono_tz::Tz::UTC);
        scheduler.schedule(id, Utc::now() - chrono::Duration::seconds(1)).await.unwrap();
        store.claim_due(Utc::now(), 1).await.unwrap();

        let err = scheduler.schedule(id, Utc::now()).await.unwrap_err();

        assert!(matches!(err, CampaignError::NotSchedulable { .. }));
        assert_eq!(store.jobs_for(id).len(), 1);
    }

    #[tokio::test]
    async fn cancel_unknown_campaign_is_not_found() {
        let (_store, scheduler, _id) = setup(CampaignStatus::Draft, chrono_tz::Tz::UTC);
        let missing = Uuid::new_v4();

        let err = scheduler.cancel(missing).await.unwrap_err();

        assert!(matches!(err, CampaignError::NotFound(id) if id == missing));
    }
}
