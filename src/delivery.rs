//! Outbound delivery: post-process the agent text, send humanized chunks,
//! then send extracted media, then write one outbound log entry.

pub mod postprocess;

use crate::config::DeliveryConfig;
use crate::conversation::MessageLog;
use crate::error::DeliveryError;
use crate::messaging::ChannelAdapter;
use crate::{ConversationKey, MediaItem};
use std::sync::Arc;

/// What actually went out for one reply.
#[derive(Debug, Clone, Default)]
pub struct DeliveryOutcome {
    pub chunks_sent: usize,
    pub media_sent: Vec<MediaItem>,
    pub media_failed: Vec<MediaItem>,
}

/// Sends a final reply through the channel adapter.
pub struct DeliveryPipeline {
    adapter: Arc<dyn ChannelAdapter>,
    log: MessageLog,
    config: DeliveryConfig,
}

impl DeliveryPipeline {
    pub fn new(adapter: Arc<dyn ChannelAdapter>, log: MessageLog, config: DeliveryConfig) -> Self {
        Self { adapter, log, config }
    }

    /// Deliver one reply. A text send failure fails the whole delivery (the
    /// text is the primary payload); an individual media failure is logged,
    /// skipped, and the rest continues.
    pub async fn deliver(
        &self,
        key: &ConversationKey,
        target: &str,
        text: &str,
        split_enabled: bool,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let (cleaned, media) =
            postprocess::extract_media(text, self.config.media_base_url.as_deref());
        let cleaned = postprocess::strip_markdown(&cleaned);

        let chunks = if split_enabled {
            postprocess::split_message(&cleaned, self.config.max_chunk_chars)
        } else if cleaned.trim().is_empty() {
            Vec::new()
        } else {
            vec![cleaned.trim().to_string()]
        };

        let mut outcome = DeliveryOutcome::default();

        for chunk in &chunks {
            tokio::time::sleep(postprocess::typing_delay(chunk, &self.config)).await;

            if let Err(error) = self.adapter.send_text(target, chunk).await {
                tracing::error!(%error, target, "text send failed; delivery aborted");
                return Err(DeliveryError::TextSend {
                    target: target.to_string(),
                    reason: error.to_string(),
                });
            }
            outcome.chunks_sent += 1;
        }

        for item in media {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.media_delay_ms)).await;

            match self.adapter.send_media(target, &item).await {
                Ok(()) => outcome.media_sent.push(item),
                Err(error) => {
                    tracing::warn!(%error, url = %item.url, "media send failed; skipping item");
                    outcome.media_failed.push(item);
                }
            }
        }

        self.log
            .log_outbound(key, &cleaned, &outcome.media_sent, &outcome.media_failed);

        tracing::info!(
            %key,
            chunks = outcome.chunks_sent,
            media_sent = outcome.media_sent.len(),
            media_failed = outcome.media_failed.len(),
            "reply delivered"
        );

        Ok(outcome)
    }
}
