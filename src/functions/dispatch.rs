use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use forge::prelude::*;
use uuid::Uuid;

use crate::config::{RetryPolicy, Settings};
use crate::error::{ClaimError, ContactSendError, JobError};
use crate::schema::{
    AudienceMember, Campaign, CampaignStatus, ConversationActivity, NewOutboundMessage, SendJob,
    CANCELLED_BY_USER,
};
use crate::services::{AudienceResolver, ConversationResolver, MessagingProvider};
use crate::store::{CampaignStore, JobStore, MessageStore, Repositories};

/// Per-contact result inside one job's batch.
#[derive(Debug)]
pub enum ContactOutcome {
    Sent {
        contact_id: Uuid,
        provider_message_id: String,
    },
    Skipped {
        contact_id: Uuid,
    },
    Failed {
        contact_id: Uuid,
        error: ContactSendError,
    },
}

impl ContactOutcome {
    pub fn contact_id(&self) -> Uuid {
        match self {
            ContactOutcome::Sent { contact_id, .. }
            | ContactOutcome::Skipped { contact_id }
            | ContactOutcome::Failed { contact_id, .. } => *contact_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { sent: usize, skipped: usize, failed: usize },
    Retrying { attempts: u32, error: String },
    Failed { error: String },
}

#[derive(Debug)]
pub struct JobReport {
    pub job_id: Uuid,
    pub campaign_id: Uuid,
    pub outcome: JobOutcome,
    pub contacts: Vec<ContactOutcome>,
}

#[derive(Debug, Default)]
pub struct PollSummary {
    pub claimed: usize,
    pub reports: Vec<JobReport>,
}

/// Claims due send jobs and fans each campaign out to its audience.
pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    campaigns: Arc<dyn CampaignStore>,
    messages: Arc<dyn MessageStore>,
    audience: AudienceResolver,
    conversations: ConversationResolver,
    provider: Arc<dyn MessagingProvider>,
    claim_batch: u32,
    retry: RetryPolicy,
}

struct Batch {
    campaign: Campaign,
    payload: serde_json::Value,
    members: Vec<AudienceMember>,
}

impl Dispatcher {
    pub fn new(repos: &Repositories, provider: Arc<dyn MessagingProvider>) -> Self {
        let defaults = Settings::default();
        Self {
            jobs: repos.jobs.clone(),
            campaigns: repos.campaigns.clone(),
            messages: repos.messages.clone(),
            audience: AudienceResolver::new(repos.contacts.clone()),
            conversations: ConversationResolver::new(repos.conversations.clone()),
            provider,
            claim_batch: defaults.claim_batch,
            retry: defaults.retry,
        }
    }

    pub fn with_claim_batch(mut self, claim_batch: u32) -> Self {
        self.claim_batch = claim_batch.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One dispatch pass. Only a failed claim is an error; everything after it is recorded
    /// on the jobs themselves.
    pub async fn poll(&self) -> std::result::Result<PollSummary, ClaimError> {
        let now = Utc::now();
        let claimed = self.jobs.claim_due(now, self.claim_batch).await?;
        if claimed.is_empty() {
            return Ok(PollSummary::default());
        }

        tracing::debug!(count = claimed.len(), "dispatch: claimed jobs");

        let mut reports = Vec::with_capacity(claimed.len());
        for job in &claimed {
            reports.push(self.run_job(job).await);
        }

        Ok(PollSummary {
            claimed: claimed.len(),
            reports,
        })
    }

    async fn run_job(&self, job: &SendJob) -> JobReport {
        let (outcome, contacts) = match self.prepare(job).await {
            Ok(batch) => {
                let contacts = self.send_batch(job, &batch).await;
                (self.complete(job, &batch.campaign, &contacts).await, contacts)
            }
            Err(err) => (self.record_failure(job, err).await, Vec::new()),
        };

        JobReport {
            job_id: job.id,
            campaign_id: job.campaign_id,
            outcome,
            contacts,
        }
    }

    async fn prepare(&self, job: &SendJob) -> std::result::Result<Batch, JobError> {
        let campaign_id = job.campaign_id;
        let campaign = self
            .campaigns
            .campaign(campaign_id)
            .await
            .map_err(|source| JobError::CampaignResolution { campaign_id, source })?
            .ok_or(JobError::CampaignMissing(campaign_id))?;
        match campaign.status {
            CampaignStatus::Cancelled => return Err(JobError::CampaignCancelled(campaign_id)),
            // an earlier job already sent this campaign
            CampaignStatus::Completed => return Err(JobError::CampaignCompleted(campaign_id)),
            _ => {}
        }

        let payload = self.payload_for(&campaign).await;
        let members = self
            .audience
            .resolve(&campaign)
            .await
            .map_err(|source| JobError::AudienceResolution { campaign_id, source })?;

        if let Err(e) = self.campaigns.mark_sending(campaign_id).await {
            tracing::warn!(%campaign_id, error = %e, "dispatch: could not mark campaign sending");
        }

        Ok(Batch {
            campaign,
            payload,
            members,
        })
    }

    async fn payload_for(&self, campaign: &Campaign) -> serde_json::Value {
        let Some(template_id) = campaign.template_id else {
            return campaign.fallback_payload();
        };
        match self.campaigns.template_payload(template_id).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::warn!(campaign_id = %campaign.id, %template_id, "dispatch: template not found, sending campaign name");
                campaign.fallback_payload()
            }
            Err(e) => {
                tracing::warn!(campaign_id = %campaign.id, %template_id, error = %e, "dispatch: template lookup failed, sending campaign name");
                campaign.fallback_payload()
            }
        }
    }

    async fn send_batch(&self, job: &SendJob, batch: &Batch) -> Vec<ContactOutcome> {
        let mut outcomes = Vec::with_capacity(batch.members.len());
        for member in &batch.members {
            let Some(phone) = member.phone.as_deref() else {
                outcomes.push(ContactOutcome::Skipped {
                    contact_id: member.id,
                });
                continue;
            };

            let outcome = match self.send_one(job, batch, member.id, phone).await {
                Ok(provider_message_id) => ContactOutcome::Sent {
                    contact_id: member.id,
                    provider_message_id,
                },
                Err(error) => {
                    let transient =
                        matches!(&error, ContactSendError::Provider(e) if e.is_transient());
                    tracing::warn!(
                        job_id = %job.id,
                        contact_id = %member.id,
                        transient,
                        error = %error,
                        "dispatch: contact send failed"
                    );
                    ContactOutcome::Failed {
                        contact_id: member.id,
                        error,
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn send_one(
        &self,
        job: &SendJob,
        batch: &Batch,
        contact_id: Uuid,
        phone: &str,
    ) -> std::result::Result<String, ContactSendError> {
        let org_id = batch.campaign.org_id;
        let conversation_id = self
            .conversations
            .resolve(org_id, contact_id, Utc::now())
            .await?;

        let receipt = self.provider.send(org_id, phone, &batch.payload).await?;

        let sent_at = Utc::now();
        self.messages
            .insert_outbound(&NewOutboundMessage {
                org_id,
                conversation_id,
                contact_id,
                campaign_id: batch.campaign.id,
                send_job_id: job.id,
                payload: batch.payload.clone(),
                provider_message_id: receipt.message_id.clone(),
                sent_at,
            })
            .await?;
        self.conversations
            .touch(conversation_id, ConversationActivity::outbound(sent_at))
            .await?;

        Ok(receipt.message_id)
    }

    async fn complete(
        &self,
        job: &SendJob,
        campaign: &Campaign,
        contacts: &[ContactOutcome],
    ) -> JobOutcome {
        let (mut sent, mut skipped, mut failed) = (0, 0, 0);
        for outcome in contacts {
            match outcome {
                ContactOutcome::Sent { .. } => sent += 1,
                ContactOutcome::Skipped { .. } => skipped += 1,
                ContactOutcome::Failed { .. } => failed += 1,
            }
        }

        let now = Utc::now();
        if let Err(source) = self.jobs.mark_completed(job.id, now).await {
            let err = JobError::Finalize { job_id: job.id, source };
            tracing::error!(error = %err, "dispatch: job stays locked");
        }
        if let Err(e) = self.campaigns.mark_completed(campaign.id, now).await {
            tracing::error!(campaign_id = %campaign.id, error = %e, "dispatch: could not complete campaign");
        }

        tracing::info!(
            job_id = %job.id,
            campaign_id = %campaign.id,
            sent,
            skipped,
            failed,
            "dispatch: job completed"
        );
        JobOutcome::Completed { sent, skipped, failed }
    }

    async fn record_failure(&self, job: &SendJob, err: JobError) -> JobOutcome {
        let now = Utc::now();
        let attempts = job.attempts.saturating_add(1);

        let (outcome, result) = if err.is_retryable() && !self.retry.is_exhausted(attempts) {
            let error = err.to_string();
            let run_at = self.next_run_at(job, attempts, now);
            let result = self.jobs.mark_retrying(job.id, &error, run_at, now).await;
            tracing::warn!(
                job_id = %job.id,
                attempts,
                retry_at = %run_at,
                error = %error,
                "dispatch: job will retry"
            );
            (JobOutcome::Retrying { attempts, error }, result)
        } else {
            let error = match &err {
                JobError::CampaignCancelled(_) => CANCELLED_BY_USER.to_string(),
                other if other.is_retryable() => format!("{other} (gave up after {attempts} attempts)"),
                other => other.to_string(),
            };
            let result = self.jobs.mark_failed(job.id, &error, now).await;
            tracing::warn!(job_id = %job.id, attempts, error = %error, "dispatch: job failed");
            (JobOutcome::Failed { error }, result)
        };

        if let Err(source) = result {
            let err = JobError::Finalize { job_id: job.id, source };
            tracing::error!(error = %err, "dispatch: job stays locked");
        }
        outcome
    }

    fn next_run_at(&self, job: &SendJob, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = self.retry.delay_for(attempts);
        if delay.is_zero() {
            return job.run_at;
        }
        now + TimeDelta::from_std(delay).unwrap_or_else(|_| TimeDelta::hours(1))
    }
}

#[forge::daemon]
pub async fn dispatch(ctx: &DaemonContext) -> Result<()> {
    let enabled = ctx
        .env_parse::<String>("OUTREACH_DISPATCH_DAEMON")
        .map(|v| v != "false")
        .unwrap_or(true);
    if !enabled {
        tracing::info!("dispatch daemon disabled, passes run only from the poll endpoint");
        return Ok(());
    }

    let poll_ms: u64 = ctx.env_parse("OUTREACH_LOOP_POLL_MS_DISPATCH").unwrap_or(5000);
    let settings = Settings::from_env();
    let services = super::Services::connect(ctx.db().clone(), &settings)
        .await
        .map_err(|e| ForgeError::Internal(e.to_string()))?;

    loop {
        tokio::select! {
            _ = ctx.shutdown_signal() => break,
            _ = tokio::time::sleep(std::time::Duration::from_millis(poll_ms)) => {
                match services.dispatcher.poll().await {
                    Ok(summary) if summary.claimed > 0 => {
                        tracing::info!(claimed = summary.claimed, "dispatch tick");
                    }
                    Err(e) => tracing::error!(error = %e, "dispatch tick failed"),
                    _ => {}
                }
            }
        }
    }
    Ok(())
}
