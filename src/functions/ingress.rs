use std::future::IntoFuture;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, NaiveDateTime, Utc};
use forge::prelude::*;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{Services, WebhookOutcome};
use crate::config::Settings;
use crate::error::{CampaignError, WebhookError};
use crate::services::signature::{self, SIGNATURE_HEADER};

#[derive(Clone)]
pub struct AppState {
    services: Arc<Services>,
    poll_token: Option<String>,
}

impl AppState {
    pub fn new(services: Arc<Services>, poll_token: Option<String>) -> Self {
        Self {
            services,
            poll_token,
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.poll_token.as_deref() else {
            return true;
        };
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| signature::tokens_match(expected, token.trim()))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/dispatch/poll", get(poll))
        .route("/api/webhooks/pinnacle", post(pinnacle_webhook))
        .route("/api/campaigns/{id}/schedule", post(schedule_campaign))
        .route("/api/campaigns/{id}/cancel", post(cancel_campaign))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "ok": false, "error": "unauthorized" })),
    )
        .into_response()
}

fn failure(status: StatusCode, error: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "ok": false, "error": error.to_string() }))).into_response()
}

async fn poll(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    match state.services.dispatcher.poll().await {
        Ok(summary) => Json(json!({ "ok": true, "claimed": summary.claimed })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "ingress: poll failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

async fn pinnacle_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    match state.services.reconciler.handle(&body, signature).await {
        Ok(WebhookOutcome::Deduped) => Json(json!({ "ok": true, "deduped": true })).into_response(),
        Ok(WebhookOutcome::Processed(_)) => Json(json!({ "ok": true })).into_response(),
        Err(WebhookError::Signature(e)) => {
            tracing::warn!(error = %e, "ingress: webhook signature rejected");
            unauthorized()
        }
        Err(e @ WebhookError::Malformed(_)) => failure(StatusCode::BAD_REQUEST, e),
        Err(e) => {
            tracing::error!(error = %e, "ingress: webhook processing failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScheduleRequest {
    #[serde(default)]
    run_at: Option<DateTime<Utc>>,
    // wall-clock time in the campaign's timezone
    #[serde(default)]
    local_time: Option<NaiveDateTime>,
}

fn campaign_failure(err: CampaignError) -> Response {
    let status = match &err {
        CampaignError::NotFound(_) => StatusCode::NOT_FOUND,
        CampaignError::NotSchedulable { .. } => StatusCode::CONFLICT,
        CampaignError::InvalidLocalTime(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CampaignError::Store(_) => {
            tracing::error!(error = %err, "ingress: campaign update failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    failure(status, err)
}

async fn schedule_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<ScheduleRequest>,
) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    let campaigns = &state.services.campaigns;
    let result = match (request.run_at, request.local_time) {
        (Some(run_at), _) => campaigns.schedule(id, run_at).await,
        (None, Some(local)) => campaigns.schedule_local(id, local).await,
        (None, None) => campaigns.schedule(id, Utc::now()).await,
    };
    match result {
        Ok(job) => Json(json!({ "ok": true, "job_id": job.id, "run_at": job.run_at })).into_response(),
        Err(e) => campaign_failure(e),
    }
}

async fn cancel_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    match state.services.campaigns.cancel(id).await {
        Ok(outcome) => Json(json!({
            "ok": true,
            "cancelled": outcome.cancelled,
            "jobs_failed": outcome.jobs_failed,
        }))
        .into_response(),
        Err(e) => campaign_failure(e),
    }
}

#[forge::daemon]
pub async fn ingress(ctx: &DaemonContext) -> Result<()> {
    let settings = Settings::from_env();
    let services = Services::connect(ctx.db().clone(), &settings)
        .await
        .map_err(|e| ForgeError::Internal(e.to_string()))?;
    let app = router(AppState::new(Arc::new(services), settings.poll_token.clone()));

    let listener = tokio::net::TcpListener::bind(settings.http_addr)
        .await
        .map_err(|e| ForgeError::Internal(format!("failed to bind {}: {e}", settings.http_addr)))?;
    tracing::info!(addr = %settings.http_addr, "ingress: listening");

    tokio::select! {
        _ = ctx.shutdown_signal() => {}
        result = axum::serve(listener, app).into_future() => {
            result.map_err(|e| ForgeError::Internal(format!("ingress server error: {e}")))?;
        }
    }
    Ok(())
}
