//! Firebase Realtime Database over its REST interface.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, Url};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use super::TreeStore;
use crate::config::{StoreAuth, StoreConfig};
use crate::error::StoreError;

pub struct FirebaseStore {
    http_client: reqwest::Client,
    base_url: Url,
    auth: StoreAuth,
}

impl FirebaseStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let base_url = Url::parse(&config.database_url)
            .map_err(|e| StoreError::InvalidPath(format!("{}: {}", config.database_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::InvalidPath(config.database_url.clone()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(2)
            .build()?;

        Ok(Self {
            http_client,
            base_url,
            auth: config.auth.clone(),
        })
    }

    /// `{base}/{seg}/.../{last}.json`, with every segment percent-encoded.
    fn node_url(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if let Ok(mut parts) = url.path_segments_mut() {
            parts.pop_if_empty();
            match segments.split_last() {
                Some((last, head)) => {
                    parts.extend(head);
                    parts.push(&format!("{}.json", last));
                }
                None => {
                    parts.push(".json");
                }
            }
        }
        url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let rb = self.http_client.request(method, self.node_url(path));
        match &self.auth {
            StoreAuth::AccessToken(token) => rb.bearer_auth(token),
            StoreAuth::DatabaseSecret(secret) => rb.query(&[("auth", secret)]),
        }
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body: body.chars().take(300).collect(),
        })
    }
}

#[async_trait]
impl TreeStore for FirebaseStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let response = self.request(Method::GET, path).send().await?;
        let value: Value = Self::check(response).await?.json().await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn write(&self, path: &str, value: &Value) -> Result<(), StoreError> {
        debug!("PUT {}", path);
        let response = self
            .request(Method::PUT, path)
            .query(&[("print", "silent")])
            .json(value)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn multi_update(&self, updates: &Map<String, Value>) -> Result<(), StoreError> {
        debug!("PATCH / ({} paths)", updates.len());
        let response = self
            .request(Method::PATCH, "")
            .query(&[("print", "silent")])
            .json(updates)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(url: &str) -> FirebaseStore {
        FirebaseStore::new(&StoreConfig {
            database_url: url.to_string(),
            auth: StoreAuth::AccessToken("t".into()),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn root_url_targets_dot_json() {
        let s = store("https://demo-default-rtdb.example.app");
        assert_eq!(
            s.node_url("").as_str(),
            "https://demo-default-rtdb.example.app/.json"
        );
    }

    #[test]
    fn nested_url_appends_json_to_last_segment() {
        let s = store("https://demo.example.app/");
        assert_eq!(
            s.node_url("matches/39/1035037/result").as_str(),
            "https://demo.example.app/matches/39/1035037/result.json"
        );
    }

    #[test]
    fn segments_are_percent_encoded() {
        let s = store("https://demo.example.app");
        let url = s.node_url("team_mapping/Man City?x");
        assert_eq!(url.path(), "/team_mapping/Man%20City%3Fx.json");
        assert!(url.query().is_none());
    }

    #[test]
    fn rejects_unusable_base_url() {
        let res = FirebaseStore::new(&StoreConfig {
            database_url: "not a url".into(),
            auth: StoreAuth::DatabaseSecret("s".into()),
            request_timeout: Duration::from_secs(5),
        });
        assert!(matches!(res, Err(StoreError::InvalidPath(_))));
    }
}
