use thiserror::Error;
use uuid::Uuid;

/// Daemon startup failure.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("schema migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("provider client could not be built: {0}")]
    Provider(#[from] reqwest::Error),
}

/// Failure talking to the relational store, or a row that failed validation on the way out.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid {table} row {id}: {reason}")]
    InvalidRow {
        table: &'static str,
        id: String,
        reason: String,
    },

    #[error("{0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn invalid_row(table: &'static str, id: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidRow {
            table,
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Infrastructure failure while claiming jobs. Aborts the whole pass.
#[derive(Debug, Error)]
#[error("claim failed: {0}")]
pub struct ClaimError(#[from] pub StoreError);

/// Job-level failure. Recovered into job state, never propagated past the dispatcher.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("campaign {0} not found")]
    CampaignMissing(Uuid),

    #[error("campaign {0} was cancelled")]
    CampaignCancelled(Uuid),

    #[error("campaign {0} already completed")]
    CampaignCompleted(Uuid),

    #[error("campaign {campaign_id} could not be loaded: {source}")]
    CampaignResolution {
        campaign_id: Uuid,
        #[source]
        source: StoreError,
    },

    #[error("audience for campaign {campaign_id} could not be resolved: {source}")]
    AudienceResolution {
        campaign_id: Uuid,
        #[source]
        source: StoreError,
    },

    #[error("job {job_id} outcome could not be recorded: {source}")]
    Finalize {
        job_id: Uuid,
        #[source]
        source: StoreError,
    },
}

impl JobError {
    /// Whether the job should go back into the claimable pool.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            JobError::CampaignMissing(_)
                | JobError::CampaignCancelled(_)
                | JobError::CampaignCompleted(_)
        )
    }
}

/// Scheduling or cancelling a campaign from the API.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("campaign {0} not found")]
    NotFound(Uuid),

    #[error("campaign {campaign_id} cannot be scheduled while {status}")]
    NotSchedulable { campaign_id: Uuid, status: String },

    #[error("local time {0} does not exist in the campaign timezone")]
    InvalidLocalTime(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outbound provider failure, classified for retry decisions.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no provider integration configured for org {org_id}")]
    IntegrationMissing { org_id: Uuid },

    #[error("provider request timed out")]
    Timeout,

    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("provider rejected request: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout | ProviderError::Transient(_))
    }
}

/// Per-contact failure inside the send loop. Isolated: the contact is skipped.
#[derive(Debug, Error)]
pub enum ContactSendError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,

    #[error("signature is not valid hex")]
    Malformed,

    #[error("signature mismatch")]
    Mismatch,
}

/// Webhook failure. Every variant short-circuits before any mutation except `Store`.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("signature verification failed: {0}")]
    Signature(#[from] SignatureError),

    #[error("malformed webhook body: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
