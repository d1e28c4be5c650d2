pub mod campaigns;
pub mod dispatch;
pub mod ingress;
pub mod webhook;

pub use campaigns::*;
pub use dispatch::*;
pub use ingress::*;
pub use webhook::*;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Settings;
use crate::error::StartupError;
use crate::services::{MessagingProvider, PinnacleClient};
use crate::store::{PgStore, Repositories};

/// The components the daemons drive, wired to one set of repositories.
pub struct Services {
    pub dispatcher: Dispatcher,
    pub reconciler: WebhookReconciler,
    pub campaigns: CampaignScheduler,
}

impl Services {
    pub fn new(repos: Repositories, provider: Arc<dyn MessagingProvider>, settings: &Settings) -> Self {
        Self {
            dispatcher: Dispatcher::new(&repos, provider)
                .with_claim_batch(settings.claim_batch)
                .with_retry_policy(settings.retry),
            reconciler: WebhookReconciler::new(&repos, settings.webhook_secret.as_bytes().to_vec()),
            campaigns: CampaignScheduler::new(&repos),
        }
    }

    /// Production wiring: migrates the schema, then backs everything with Postgres.
    pub async fn connect(pool: PgPool, settings: &Settings) -> Result<Self, StartupError> {
        let store = Arc::new(PgStore::new(pool));
        store.migrate().await?;
        let repos = Repositories::from_store(store);
        let provider = PinnacleClient::new(settings, repos.integrations.clone())?;
        Ok(Self::new(repos, Arc::new(provider), settings))
    }
}
