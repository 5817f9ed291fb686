//! Configuration from environment variables and Docker secret files.
//!
//! Locally a `.env` file is loaded by the binary before any of this runs; in
//! CI the same names come from repository secrets.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::backoff::BackoffPolicy;

pub const DEFAULT_API_BASE: &str = "https://v3.football.api-sports.io";
pub const DEFAULT_UNDERSTAT_BASE: &str = "https://understat.com";
const FIREBASE_TOKEN_SECRET: &str = "/run/secrets/firebase_token";
const API_KEY_SECRET: &str = "/run/secrets/api_football_key";

/// How requests to the tree store authenticate.
#[derive(Clone, PartialEq)]
pub enum StoreAuth {
    /// OAuth2 access token sent as `Authorization: Bearer`.
    AccessToken(String),
    /// Legacy database secret sent as the `auth` query parameter.
    DatabaseSecret(String),
}

impl std::fmt::Debug for StoreAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreAuth::AccessToken(_) => f.write_str("AccessToken(***)"),
            StoreAuth::DatabaseSecret(_) => f.write_str("DatabaseSecret(***)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub auth: StoreAuth,
    pub request_timeout: Duration,
}

#[derive(Deserialize)]
struct CredentialsBlob {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    database_secret: Option<String>,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = match env::var("FIREBASE_DATABASE_URL") {
            Ok(v) if !v.trim().is_empty() => v.trim().trim_end_matches('/').to_string(),
            Ok(_) => return Err(anyhow!("FIREBASE_DATABASE_URL is set but empty")),
            Err(_) => return Err(anyhow!("FIREBASE_DATABASE_URL is not set")),
        };

        let auth = Self::auth_from_env()?;
        match &auth {
            StoreAuth::AccessToken(t) | StoreAuth::DatabaseSecret(t) => reject_placeholder("store credential", t)?,
        }

        Ok(Self {
            database_url,
            auth,
            request_timeout: Duration::from_secs(env_parse("FB_REQUEST_TIMEOUT_SECONDS", 30)),
        })
    }

    fn auth_from_env() -> Result<StoreAuth> {
        if let Some(token) = non_empty_var("FIREBASE_ACCESS_TOKEN") {
            return Ok(StoreAuth::AccessToken(token));
        }
        if let Some(secret) = non_empty_var("FIREBASE_DATABASE_SECRET") {
            return Ok(StoreAuth::DatabaseSecret(secret));
        }
        if let Some(encoded) = non_empty_var("FIREBASE_CREDENTIALS") {
            return decode_credentials(&encoded);
        }
        if Path::new(FIREBASE_TOKEN_SECRET).exists() {
            return read_secret_file(FIREBASE_TOKEN_SECRET, "firebase_token").map(StoreAuth::AccessToken);
        }
        Err(anyhow!(
            "No store credentials: set FIREBASE_ACCESS_TOKEN, FIREBASE_DATABASE_SECRET or FIREBASE_CREDENTIALS (base64 JSON)"
        ))
    }
}

/// Decode `FIREBASE_CREDENTIALS`: base64 of `{"access_token": ...}` or `{"database_secret": ...}`.
pub fn decode_credentials(encoded: &str) -> Result<StoreAuth> {
    let raw = BASE64
        .decode(encoded.trim())
        .context("Invalid FIREBASE_CREDENTIALS (not base64)")?;
    let blob: CredentialsBlob =
        serde_json::from_slice(&raw).context("Invalid FIREBASE_CREDENTIALS (not JSON)")?;
    match (blob.access_token, blob.database_secret) {
        (Some(t), _) if !t.trim().is_empty() => Ok(StoreAuth::AccessToken(t.trim().to_string())),
        (_, Some(s)) if !s.trim().is_empty() => Ok(StoreAuth::DatabaseSecret(s.trim().to_string())),
        _ => Err(anyhow!(
            "FIREBASE_CREDENTIALS has neither access_token nor database_secret"
        )),
    }
}

/// Tunables of the chunked update engine.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSettings {
    pub chunk_size: usize,
    pub backoff: BackoffPolicy,
    /// Root for run metrics; empty disables metrics writes.
    pub metrics_path: String,
    pub continue_on_error: bool,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            backoff: BackoffPolicy::default(),
            metrics_path: String::new(),
            continue_on_error: false,
        }
    }
}

impl UpdateSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            chunk_size: env_parse("FB_UPDATE_CHUNK_SIZE", d.chunk_size).max(1),
            backoff: BackoffPolicy {
                max_attempts: env_parse("FB_UPDATE_RETRIES", d.backoff.max_attempts).max(1),
                base_sleep: env_secs("FB_UPDATE_BASE_SLEEP", d.backoff.base_sleep),
                max_sleep: env_secs("FB_UPDATE_MAX_SLEEP", d.backoff.max_sleep),
                jitter_max: env_secs("FB_UPDATE_JITTER_MAX", d.backoff.jitter_max),
            },
            metrics_path: env::var("FB_METRICS_PATH").unwrap_or_default().trim().to_string(),
            continue_on_error: env_bool("FB_CONTINUE_ON_ERROR", d.continue_on_error),
        }
    }
}

/// API-Football client configuration.
#[derive(Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub base_url: String,
    pub requests_per_minute: u32,
    pub backoff: BackoffPolicy,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = match env::var("API_FOOTBALL_KEY") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            Ok(_) => return Err(anyhow!("API_FOOTBALL_KEY is set but empty")),
            Err(_) => read_secret_file(API_KEY_SECRET, "api_football_key")?,
        };
        reject_placeholder("API_FOOTBALL_KEY", &api_key)?;

        Ok(Self {
            api_key,
            base_url: non_empty_var("API_FOOTBALL_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            requests_per_minute: env_parse("API_FOOTBALL_REQUESTS_PER_MINUTE", 120).max(1),
            backoff: BackoffPolicy {
                max_attempts: env_parse("API_FOOTBALL_RETRIES", 4).max(1),
                base_sleep: Duration::from_millis(1200),
                max_sleep: Duration::from_secs(10),
                jitter_max: Duration::from_millis(250),
            },
        })
    }
}

/// Understat league pages. No credentials; only the base URL and retry cap
/// are tunable.
#[derive(Debug, Clone)]
pub struct UnderstatConfig {
    pub base_url: String,
    pub backoff: BackoffPolicy,
}

impl UnderstatConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: non_empty_var("UNDERSTAT_BASE_URL")
                .unwrap_or_else(|| DEFAULT_UNDERSTAT_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            backoff: BackoffPolicy {
                max_attempts: env_parse("UNDERSTAT_RETRIES", 3).max(1),
                base_sleep: Duration::from_secs(2),
                max_sleep: Duration::from_secs(15),
                jitter_max: Duration::from_millis(500),
            },
        }
    }
}

/// Read a secret from a Docker secret file.
fn read_secret_file(file_path: &str, secret_name: &str) -> Result<String> {
    std::fs::read_to_string(file_path)
        .map(|s| s.trim().to_string())
        .context(format!(
            "Secret not provided: no env var and no secret file at {} ({})",
            file_path, secret_name
        ))
}

/// Refuse sample/placeholder credentials copied from templates.
fn reject_placeholder(name: &str, value: &str) -> Result<()> {
    let lower = value.trim().to_lowercase();
    if lower.contains("change_me") || lower.contains("your_") || lower.starts_with("sample") {
        return Err(anyhow!(
            "{} appears to be a placeholder value; replace it with a real credential",
            name
        ));
    }
    Ok(())
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Seconds as a `Duration`; `None` for negative, non-finite or out-of-range values.
pub fn secs_to_duration(seconds: f64) -> Option<Duration> {
    if seconds.is_nan() || seconds < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(secs_to_duration)
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_access_token_blob() {
        let encoded = BASE64.encode(r#"{"access_token":"ya29.abc"}"#);
        assert_eq!(
            decode_credentials(&encoded).unwrap(),
            StoreAuth::AccessToken("ya29.abc".into())
        );
    }

    #[test]
    fn decodes_database_secret_blob() {
        let encoded = BASE64.encode(r#"{"database_secret":"s3cr3t"}"#);
        assert_eq!(
            decode_credentials(&encoded).unwrap(),
            StoreAuth::DatabaseSecret("s3cr3t".into())
        );
    }

    #[test]
    fn rejects_blob_without_credentials() {
        let encoded = BASE64.encode(r#"{"project_id":"x"}"#);
        assert!(decode_credentials(&encoded).is_err());
        assert!(decode_credentials("%%%not-base64").is_err());
    }

    #[test]
    fn placeholder_values_are_refused() {
        assert!(reject_placeholder("k", "CHANGE_ME").is_err());
        assert!(reject_placeholder("k", "your_key_here").is_err());
        assert!(reject_placeholder("k", "sample-123").is_err());
        assert!(reject_placeholder("k", "9f8e7d").is_ok());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let s = format!("{:?}", StoreAuth::DatabaseSecret("hunter2".into()));
        assert!(!s.contains("hunter2"));
    }

    #[test]
    fn seconds_outside_duration_range_are_rejected() {
        assert_eq!(secs_to_duration(0.8), Some(Duration::from_millis(800)));
        assert_eq!(secs_to_duration(0.0), Some(Duration::ZERO));
        assert_eq!(secs_to_duration(1e20), None);
        assert_eq!(secs_to_duration(-1.0), None);
        assert_eq!(secs_to_duration(f64::NAN), None);
        assert_eq!(secs_to_duration(f64::INFINITY), None);
    }

    #[test]
    fn huge_sleep_setting_falls_back_to_default() {
        let key = "FIXTURE_SYNC_TEST_HUGE_SLEEP";
        env::set_var(key, "1e20");
        assert_eq!(env_secs(key, Duration::from_secs(8)), Duration::from_secs(8));
        env::set_var(key, " 2.5 ");
        assert_eq!(env_secs(key, Duration::from_secs(8)), Duration::from_millis(2500));
        env::remove_var(key);
    }

    #[test]
    fn default_settings_match_documented_values() {
        let s = UpdateSettings::default();
        assert_eq!(s.chunk_size, 2000);
        assert_eq!(s.backoff.max_attempts, 5);
        assert!(!s.continue_on_error);
        assert!(s.metrics_path.is_empty());
    }
}
