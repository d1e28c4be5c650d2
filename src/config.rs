use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PINNACLE_BASE_URL: &str = "https://api.pinnacle.sh";
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(3600);

/// Process-wide settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub pinnacle_api_key: String,
    pub pinnacle_base_url: String,
    pub webhook_secret: String,
    pub provider_timeout: Duration,
    pub claim_batch: u32,
    pub retry: RetryPolicy,
    pub poll_token: Option<String>,
    pub http_addr: SocketAddr,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pinnacle_api_key: String::new(),
            pinnacle_base_url: DEFAULT_PINNACLE_BASE_URL.to_string(),
            webhook_secret: String::new(),
            provider_timeout: Duration::from_secs(15),
            claim_batch: 3,
            retry: RetryPolicy::default(),
            poll_token: None,
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8088)),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let pinnacle_api_key = text("PINNACLE_API_KEY").unwrap_or_default();
        if pinnacle_api_key.is_empty() {
            tracing::warn!("PINNACLE_API_KEY is not set; provider sends will fail");
        }
        let webhook_secret = text("PINNACLE_WEBHOOK_SECRET").unwrap_or_default();
        if webhook_secret.is_empty() {
            tracing::warn!("PINNACLE_WEBHOOK_SECRET is not set; all webhooks will be rejected");
        }

        Self {
            pinnacle_api_key,
            pinnacle_base_url: text("PINNACLE_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.pinnacle_base_url),
            webhook_secret,
            provider_timeout: Duration::from_millis(parse_or(
                &text,
                "OUTREACH_PROVIDER_TIMEOUT_MS",
                15_000u64,
            )),
            claim_batch: parse_or(&text, "OUTREACH_CLAIM_BATCH", defaults.claim_batch).max(1),
            retry: RetryPolicy {
                backoff_base: Duration::from_secs(parse_or(&text, "OUTREACH_RETRY_BACKOFF_SECS", 0u64)),
                max_attempts: parse_or(&text, "OUTREACH_MAX_JOB_ATTEMPTS", 0u32),
            },
            poll_token: text("OUTREACH_POLL_TOKEN"),
            http_addr: parse_or(&text, "OUTREACH_HTTP_ADDR", defaults.http_addr),
        }
    }
}

fn parse_or<T: FromStr>(text: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match text(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "invalid setting, using default");
            default
        }),
    }
}

/// What happens to a job whose campaign, template or audience could not be resolved.
///
/// The zero policy retries on the very next pass, forever. A non-zero `backoff_base`
/// delays retry `n` by `base * 2^(n-1)` (capped at one hour); a non-zero `max_attempts`
/// fails the job once that many attempts have been spent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff_base: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Delay before the retry that follows attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.backoff_base.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(20);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(MAX_RETRY_BACKOFF)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}
