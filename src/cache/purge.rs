//! Shared-cache purge by tag.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("purge request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("purge rejected with status {status}")]
    Rejected { status: u16 },
}

#[async_trait]
pub trait CdnPurger: Send + Sync {
    async fn purge_tags(&self, tags: &[String]) -> Result<(), PurgeError>;
}

/// Used when no purge endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPurger;

#[async_trait]
impl CdnPurger for NoopPurger {
    async fn purge_tags(&self, _tags: &[String]) -> Result<(), PurgeError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct PurgeRequest<'a> {
    cache_tags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    site_id: Option<&'a str>,
}

/// Purges by POSTing `{ "cache_tags": [...] }` to the shared cache's API.
#[derive(Debug, Clone)]
pub struct HttpPurger {
    client: Client,
    endpoint: Url,
    token: Option<String>,
    site_id: Option<String>,
}

impl HttpPurger {
    pub fn new(
        endpoint: Url,
        token: Option<String>,
        site_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PurgeError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            token,
            site_id,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl CdnPurger for HttpPurger {
    async fn purge_tags(&self, tags: &[String]) -> Result<(), PurgeError> {
        if tags.is_empty() {
            return Ok(());
        }

        let mut request = self.client.post(self.endpoint.clone()).json(&PurgeRequest {
            cache_tags: tags,
            site_id: self.site_id.as_deref(),
        });
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PurgeError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purge_body_omits_missing_site_id() {
        let tags = vec!["a".to_string(), "b".to_string()];
        let body = serde_json::to_value(PurgeRequest {
            cache_tags: &tags,
            site_id: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"cache_tags": ["a", "b"]}));
    }

    #[tokio::test]
    async fn noop_purger_always_succeeds() {
        assert!(NoopPurger.purge_tags(&["x".to_string()]).await.is_ok());
    }
}
