use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

pub type ByteStream = Pin<Box<dyn Stream<Item = BridgeResult<Bytes>> + Send>>;

/// The plain chat model behind the bridge.
///
/// Each call owns its connection: a streamed body holds the connection until
/// it is dropped.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// One-shot completion; returns the raw JSON body.
    async fn complete(&self, body: &Value) -> BridgeResult<Bytes>;

    /// Streamed completion; returns the raw SSE byte stream.
    async fn complete_stream(&self, body: &Value) -> BridgeResult<ByteStream>;
}

#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(config: &BridgeConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: config.chat_completions_url(),
            api_key: config.api_key.clone(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, body: &Value, timeout: Option<Duration>) -> BridgeResult<reqwest::Response> {
        let mut request = self.client.post(&self.url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            log::warn!("Upstream {} returned {}: {}", self.url, status, body);
            return Err(BridgeError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn complete(&self, body: &Value) -> BridgeResult<Bytes> {
        let resp = self.send(body, Some(self.timeout)).await?;
        Ok(resp.bytes().await?)
    }

    async fn complete_stream(&self, body: &Value) -> BridgeResult<ByteStream> {
        // only the connect is bounded for streams
        let resp = self.send(body, None).await?;
        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(BridgeError::from));
        Ok(Box::pin(stream))
    }
}
