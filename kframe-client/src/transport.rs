//! Frame transport capability and its reqwest implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::pool::HttpClientPool;

/// Executes one frame request and returns the decoded JSON body.
///
/// Non-2xx responses fail with [`ClientError::Transport`].
#[async_trait]
pub trait FrameTransport: Send + Sync {
    async fn execute(&self, path: &str) -> Result<Value, ClientError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Use the pooled client for `identity`.
    pub fn from_pool(
        pool: &HttpClientPool,
        identity: &str,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let client = pool.lookup_or_create(&identity.to_string())?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn parse_response(&self, response: reqwest::Response) -> Result<Value, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json::<Value>().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "frame request failed");
            Err(ClientError::Transport {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl FrameTransport for HttpTransport {
    async fn execute(&self, path: &str) -> Result<Value, ClientError> {
        let url = self.config.resolve(path);
        debug!(url = %url, "frame request");
        let response = self.client.get(url).send().await?;
        self.parse_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ClientConfig {
            request_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            HttpTransport::new(&config),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_from_pool_reuses_identity_client() {
        let pool = HttpClientPool::with_timeout(1_000);
        let config = ClientConfig::default();
        HttpTransport::from_pool(&pool, "tenant-a", &config).unwrap();
        HttpTransport::from_pool(&pool, "tenant-a", &config).unwrap();
        assert_eq!(pool.len(), 1);
    }
}
