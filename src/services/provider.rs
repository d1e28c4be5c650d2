use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::ProviderError;
use crate::store::IntegrationStore;

const SEND_PATH: &str = "/v1/messages/send";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
}

/// Outbound side of the messaging provider.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send(
        &self,
        org_id: Uuid,
        to: &str,
        payload: &serde_json::Value,
    ) -> Result<SendReceipt, ProviderError>;
}

/// Pinnacle RCS client. Sends on behalf of the org's verified brand and agent.
pub struct PinnacleClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    integrations: Arc<dyn IntegrationStore>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

impl PinnacleClient {
    pub fn new(
        settings: &Settings,
        integrations: Arc<dyn IntegrationStore>,
    ) -> Result<Self, reqwest::Error> {
        Self::with_timeout(
            settings.pinnacle_base_url.clone(),
            settings.pinnacle_api_key.clone(),
            settings.provider_timeout,
            integrations,
        )
    }

    pub fn with_timeout(
        base_url: String,
        api_key: String,
        timeout: Duration,
        integrations: Arc<dyn IntegrationStore>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
            integrations,
        })
    }
}

#[async_trait]
impl MessagingProvider for PinnacleClient {
    async fn send(
        &self,
        org_id: Uuid,
        to: &str,
        payload: &serde_json::Value,
    ) -> Result<SendReceipt, ProviderError> {
        let integration = self
            .integrations
            .integration_for_org(org_id)
            .await
            .map_err(|e| ProviderError::Transient(format!("integration lookup failed: {e}")))?;
        let Some((brand_id, agent_id)) = integration.as_ref().and_then(|i| i.sender()) else {
            return Err(ProviderError::IntegrationMissing { org_id });
        };
        if self.api_key.is_empty() {
            return Err(ProviderError::Permanent("provider api key is not configured".into()));
        }

        let body = serde_json::json!({
            "to": to,
            "brand_id": brand_id,
            "agent_id": agent_id,
            "payload": payload,
        });

        tracing::debug!(%org_id, brand_id, "pinnacle: sending message");
        let response = self
            .client
            .post(format!("{}{SEND_PATH}", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = format!("pinnacle returned {status}: {text}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                ProviderError::Transient(detail)
            } else {
                ProviderError::Permanent(detail)
            });
        }

        let parsed: SendResponse = response.json().await.map_err(classify_transport)?;
        parsed
            .message_id
            .or(parsed.id)
            .filter(|id| !id.is_empty())
            .map(|message_id| SendReceipt { message_id })
            .ok_or_else(|| ProviderError::Permanent("pinnacle response has no message id".into()))
    }
}

fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else if err.is_decode() {
        ProviderError::Permanent(format!("unreadable pinnacle response: {err}"))
    } else {
        ProviderError::Transient(err.to_string())
    }
}
