//! Service wiring and the host-facing entry point.

use crate::buffer::{BufferManager, BufferStore, DrainHandler};
use crate::config::Config;
use crate::conversation::{MessageLog, UsageLog};
use crate::delivery::DeliveryPipeline;
use crate::engine::context::TenantDirectory;
use crate::engine::{ConversationContext, ConversationEngine};
use crate::error::{ConfigError, Result};
use crate::llm::{CompletionClient, OpenAiClient};
use crate::messaging::ChannelAdapter;
use crate::tools::{
    HttpPaymentProvider, HttpSchedulingProvider, KeywordCatalogSearch, ToolCallLog, ToolProviders,
};
use crate::{ConversationKey, InboundAction};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Drain hook: invoked with the coalesced fragments once a buffer is claimed.
/// Loads the tenant context, runs the engine, and delivers the reply.
pub struct EngineDrain {
    engine: ConversationEngine,
    pipeline: DeliveryPipeline,
    directory: Arc<dyn TenantDirectory>,
    adapter: Arc<dyn ChannelAdapter>,
    messages: MessageLog,
    split_enabled: bool,
}

#[async_trait]
impl DrainHandler for EngineDrain {
    async fn drain(&self, key: ConversationKey, fragments: Vec<String>) -> Result<()> {
        let coalesced = fragments.join("\n");
        tracing::info!(%key, fragments = fragments.len(), "draining coalesced turn");

        let conversation = self.directory.load_context(&key).await?;

        if let Err(error) = self.adapter.mark_read(key.contact_id.as_ref()).await {
            tracing::debug!(%error, %key, "mark-read failed; continuing");
        }

        self.messages.log_user_message(&key, &coalesced).await?;

        let reply = self.engine.run(&key, &coalesced, &conversation).await;

        self.pipeline
            .deliver(&key, key.contact_id.as_ref(), &reply.text, self.split_enabled)
            .await?;

        Ok(())
    }
}

/// The conversational core as the host consumes it.
pub struct ChatService {
    manager: Arc<BufferManager>,
    default_quiet_period: Duration,
    sweep_interval: Duration,
}

impl ChatService {
    /// Build the service with production LLM clients from config.
    pub async fn build(
        config: &Config,
        pool: SqlitePool,
        adapter: Arc<dyn ChannelAdapter>,
        directory: Arc<dyn TenantDirectory>,
    ) -> Result<Self> {
        let primary: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::new(
            config.llm.base_url.clone(),
            config.llm.api_key.clone(),
            config.llm.model.clone(),
            "primary",
        ));
        let advanced: Option<Arc<dyn CompletionClient>> = config.llm.advanced.as_ref().map(|a| {
            Arc::new(OpenAiClient::new(
                a.base_url.clone(),
                a.api_key.clone(),
                a.model.clone(),
                "advanced",
            )) as Arc<dyn CompletionClient>
        });

        Self::assemble(config, pool, adapter, directory, primary, advanced).await
    }

    /// Build the service around caller-supplied completion clients. Tests
    /// script the LLM through this.
    pub async fn assemble(
        config: &Config,
        pool: SqlitePool,
        adapter: Arc<dyn ChannelAdapter>,
        directory: Arc<dyn TenantDirectory>,
        primary: Arc<dyn CompletionClient>,
        advanced: Option<Arc<dyn CompletionClient>>,
    ) -> Result<Self> {
        let buffer_store = BufferStore::new(pool.clone());
        buffer_store.initialize().await?;
        let messages = MessageLog::new(pool.clone());
        messages.initialize().await?;
        let usage_log = UsageLog::new(pool.clone());
        usage_log.initialize().await?;
        let call_log = ToolCallLog::new(pool);
        call_log.initialize().await?;

        let providers = ToolProviders {
            payment: Arc::new(HttpPaymentProvider::new(
                config.gateway.base_url.clone(),
                config.gateway.internal_secret.clone(),
            )),
            scheduling: Arc::new(HttpSchedulingProvider::new(
                config.gateway.base_url.clone(),
                config.gateway.internal_secret.clone(),
            )),
            search: Arc::new(KeywordCatalogSearch),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            call_log,
        };

        let engine = ConversationEngine::new(
            primary,
            advanced,
            providers,
            messages.clone(),
            usage_log,
            config.engine,
            config.llm.max_tokens,
            config.llm.temperature,
        );

        let pipeline =
            DeliveryPipeline::new(adapter.clone(), messages.clone(), config.delivery.clone());

        let drain = EngineDrain {
            engine,
            pipeline,
            directory,
            adapter,
            messages,
            split_enabled: config.delivery.split_enabled,
        };

        let manager = Arc::new(BufferManager::new(
            buffer_store,
            Arc::new(drain),
            Duration::from_secs(config.buffer.lease_secs),
        ));

        Ok(Self {
            manager,
            default_quiet_period: Duration::from_secs(config.buffer.default_quiet_period_secs),
            sweep_interval: Duration::from_secs(config.buffer.sweep_interval_secs),
        })
    }

    /// Entry point for inbound fragments from the messaging channel.
    ///
    /// Configuration problems (blank identifiers, empty text) are rejected
    /// here, before any buffering or sending happens.
    pub async fn handle_inbound_fragment(
        &self,
        tenant_id: &str,
        contact_id: &str,
        text: &str,
        quiet_period_secs: Option<u64>,
    ) -> Result<InboundAction> {
        if tenant_id.trim().is_empty() {
            return Err(ConfigError::MissingField("tenant_id".into()).into());
        }
        if contact_id.trim().is_empty() {
            return Err(ConfigError::MissingField("contact_id".into()).into());
        }
        if text.trim().is_empty() {
            return Err(ConfigError::Invalid("text must not be empty".into()).into());
        }

        let quiet_period = quiet_period_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_quiet_period);

        let key = ConversationKey::new(tenant_id.trim(), contact_id.trim());
        self.manager
            .on_fragment(key, text.to_string(), quiet_period)
            .await
    }

    /// Start the orphan-recovery sweep.
    pub fn start_sweep(&self) -> tokio::task::JoinHandle<()> {
        self.manager.start_sweep(self.sweep_interval)
    }

    /// Stop all per-conversation timers. Buffered work survives in the store.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}

/// Tenant directory backed by the core API: the host resolves the business
/// profile, catalog, lead state, and tool configuration per conversation.
pub struct HttpTenantDirectory {
    http: reqwest::Client,
    base_url: String,
    internal_secret: Option<String>,
}

impl HttpTenantDirectory {
    pub fn new(base_url: impl Into<String>, internal_secret: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            internal_secret,
        }
    }
}

#[async_trait]
impl TenantDirectory for HttpTenantDirectory {
    async fn load_context(&self, key: &ConversationKey) -> Result<ConversationContext> {
        let endpoint = format!(
            "{}/tenants/context",
            self.base_url.trim_end_matches('/')
        );

        let mut builder = self
            .http
            .post(&endpoint)
            .header("content-type", "application/json");
        if let Some(secret) = &self.internal_secret {
            builder = builder.header("x-internal-secret", secret);
        }

        let response = builder
            .json(&serde_json::json!({
                "tenantId": key.tenant_id.as_ref(),
                "contactId": key.contact_id.as_ref(),
            }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("tenant context request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("tenant context request returned {status}").into());
        }

        let context: ConversationContext = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("tenant context response malformed: {e}"))?;

        Ok(context)
    }
}
