//! Messaging-channel adapter seam.

use crate::error::Result;
use crate::MediaItem;
use anyhow::Context as _;
use async_trait::async_trait;

/// Contract the delivery pipeline relies on. Implementations are assumed
/// idempotent-enough that duplicate sends are tolerable; this core does not
/// attempt exactly-once delivery.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Adapter name for logs.
    fn name(&self) -> &str;

    async fn send_text(&self, target: &str, text: &str) -> Result<()>;

    async fn send_media(&self, target: &str, item: &MediaItem) -> Result<()>;

    /// Mark the conversation as read on the channel. Best effort.
    async fn mark_read(&self, target: &str) -> Result<()>;
}

/// Channel adapter backed by the messaging gateway's HTTP API.
pub struct HttpGatewayAdapter {
    http: reqwest::Client,
    base_url: String,
    internal_secret: Option<String>,
}

impl HttpGatewayAdapter {
    pub fn new(base_url: impl Into<String>, internal_secret: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            internal_secret,
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<()> {
        let endpoint = format!("{}{path}", self.base_url.trim_end_matches('/'));
        let mut builder = self
            .http
            .post(&endpoint)
            .header("content-type", "application/json");
        if let Some(secret) = &self.internal_secret {
            builder = builder.header("x-internal-secret", secret);
        }

        let response = builder
            .json(&body)
            .send()
            .await
            .with_context(|| format!("gateway call to {path} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let reason = body["error"].as_str().unwrap_or("unknown error");
            return Err(anyhow::anyhow!("gateway error on {path} ({status}): {reason}").into());
        }

        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for HttpGatewayAdapter {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn send_text(&self, target: &str, text: &str) -> Result<()> {
        self.post(
            "/messages/send-text",
            serde_json::json!({"to": target, "text": text}),
        )
        .await
    }

    async fn send_media(&self, target: &str, item: &MediaItem) -> Result<()> {
        self.post(
            "/messages/send-media",
            serde_json::json!({
                "to": target,
                "url": item.url,
                "type": item.kind.to_string(),
                "fileName": item.file_name,
                "mimeType": item.mime_type,
            }),
        )
        .await
    }

    async fn mark_read(&self, target: &str) -> Result<()> {
        self.post("/messages/mark-read", serde_json::json!({"to": target}))
            .await
    }
}
