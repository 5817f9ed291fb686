//! API-Football v3 client.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{info, warn};

use crate::backoff::BackoffPolicy;
use crate::config::ApiConfig;

/// Envelope of every API-Football response.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Envelope {
    response: Vec<Value>,
    errors: Value,
    paging: Paging,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Paging {
    current: u32,
    total: u32,
}

impl Default for Paging {
    fn default() -> Self {
        Self { current: 1, total: 1 }
    }
}

/// API-Football reports problems in an `errors` field that is either an
/// empty list or a non-empty object.
fn has_errors(errors: &Value) -> bool {
    match errors {
        Value::Array(a) => !a.is_empty(),
        Value::Object(m) => !m.is_empty(),
        Value::Null => false,
        _ => true,
    }
}

/// The three API-Football reads the fetch stages need.
#[async_trait]
pub trait FootballSource: Send + Sync {
    /// All fixtures on a UTC date (`YYYY-MM-DD`).
    async fn fixtures_by_date(&self, date: &str) -> Result<Vec<Value>>;

    /// Odds entries of one fixture, optionally for a single bookmaker.
    async fn odds(&self, fixture_id: i64, bookmaker: Option<&str>) -> Result<Vec<Value>>;

    /// Team statistics of one fixture, as the raw `response` array.
    async fn fixture_statistics(&self, fixture_id: i64) -> Result<Value>;
}

pub struct ApiFootballClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    backoff: BackoffPolicy,
}

impl ApiFootballClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            rate_limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            backoff: config.backoff.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// One GET with capped retry on transport errors and non-2xx statuses.
    async fn get_page(&self, path: &str, params: &[(&str, String)]) -> Result<Envelope> {
        let what = format!("{} {:?}", path, params);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.rate_limiter.until_ready().await;

            let result = self
                .http_client
                .get(self.url(path))
                .header("x-apisports-key", &self.api_key)
                .query(params)
                .send()
                .await;

            let failure = match result {
                Ok(response) => {
                    if let Some(remaining) = response.headers().get("x-ratelimit-requests-remaining") {
                        tracing::debug!("API requests remaining: {}", remaining.to_str().unwrap_or("?"));
                    }
                    let status = response.status();
                    if status.is_success() {
                        let body = response.text().await.context("Failed to read response body")?;
                        let envelope: Envelope = serde_json::from_str(&body)
                            .with_context(|| format!("Failed to parse response of {}", what))?;
                        if has_errors(&envelope.errors) {
                            warn!("API-Football reported errors for {}: {}", what, envelope.errors);
                        }
                        return Ok(envelope);
                    }
                    let body = response.text().await.unwrap_or_default();
                    anyhow!("status {}: {}", status, body.chars().take(200).collect::<String>())
                }
                Err(e) => anyhow!(e),
            };

            if !self.backoff.should_retry(attempt) {
                return Err(failure.context(format!("GET {} failed after {} attempts", what, attempt)));
            }
            warn!("GET {} attempt {} failed: {}. Retrying...", what, attempt, failure);
            self.backoff.wait(attempt).await;
        }
    }

    /// `response` items of every page.
    async fn get_all(&self, path: &str, params: &[(&str, String)]) -> Result<Vec<Value>> {
        let first = self.get_page(path, params).await?;
        let mut items = first.response;
        let total = first.paging.total.max(first.paging.current);
        for page in (first.paging.current + 1)..=total {
            let mut paged = params.to_vec();
            paged.push(("page", page.to_string()));
            items.extend(self.get_page(path, &paged).await?.response);
        }
        Ok(items)
    }
}

#[async_trait]
impl FootballSource for ApiFootballClient {
    async fn fixtures_by_date(&self, date: &str) -> Result<Vec<Value>> {
        let items = self.get_page("fixtures", &[("date", date.to_string())]).await?.response;
        info!("Fetched {} fixtures for {}", items.len(), date);
        Ok(items)
    }

    async fn odds(&self, fixture_id: i64, bookmaker: Option<&str>) -> Result<Vec<Value>> {
        let mut params = vec![("fixture", fixture_id.to_string())];
        if let Some(bm) = bookmaker.filter(|b| !b.is_empty()) {
            params.push(("bookmaker", bm.to_string()));
        }
        self.get_all("odds", &params).await
    }

    async fn fixture_statistics(&self, fixture_id: i64) -> Result<Value> {
        let envelope = self
            .get_page("fixtures/statistics", &[("fixture", fixture_id.to_string())])
            .await?;
        Ok(Value::Array(envelope.response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(base: &str) -> ApiFootballClient {
        ApiFootballClient::new(&ApiConfig {
            api_key: "k".into(),
            base_url: base.into(),
            requests_per_minute: 0,
            backoff: BackoffPolicy::immediate(1),
        })
        .unwrap()
    }

    #[test]
    fn urls_join_cleanly() {
        let c = client("https://v3.football.api-sports.io");
        assert_eq!(c.url("/fixtures"), "https://v3.football.api-sports.io/fixtures");
        assert_eq!(c.url("odds"), "https://v3.football.api-sports.io/odds");
    }

    #[test]
    fn error_field_shapes() {
        assert!(!has_errors(&json!([])));
        assert!(!has_errors(&json!({})));
        assert!(!has_errors(&Value::Null));
        assert!(has_errors(&json!({"token": "Error/Missing application key"})));
    }

    #[test]
    fn envelope_defaults_when_fields_missing() {
        let e: Envelope = serde_json::from_str(r#"{"response": [1, 2]}"#).unwrap();
        assert_eq!(e.response.len(), 2);
        assert_eq!((e.paging.current, e.paging.total), (1, 1));
    }

    #[tokio::test]
    async fn unreachable_host_gives_up_after_ceiling() {
        let c = client("http://127.0.0.1:9");
        let err = c.fixtures_by_date("2025-10-01").await.unwrap_err();
        assert!(err.to_string().contains("after 1 attempts"));
    }
}
