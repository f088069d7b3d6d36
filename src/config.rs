//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use anyhow::Context as _;
use serde::Deserialize;
use std::path::Path;

/// Ventabot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path.
    pub data_dir: std::path::PathBuf,

    /// HTTP bind address for the inbound API.
    pub http_bind: std::net::SocketAddr,

    /// LLM provider configuration.
    pub llm: LlmConfig,

    /// Coalescing buffer behavior.
    pub buffer: BufferConfig,

    /// Conversation engine limits.
    pub engine: EngineConfig,

    /// Outbound delivery behavior.
    pub delivery: DeliveryConfig,

    /// Core API / messaging gateway endpoints.
    pub gateway: GatewayConfig,
}

/// LLM provider configuration. `advanced` is the opt-in secondary pathway;
/// when absent, tenants flagged for advanced mode fall back to the primary.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub advanced: Option<AdvancedLlmConfig>,
}

/// Secondary LLM pathway for tenants that opted into advanced mode.
#[derive(Debug, Clone, Deserialize)]
pub struct AdvancedLlmConfig {
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    pub model: String,
}

/// Coalescing buffer configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BufferConfig {
    /// Quiet period applied when the caller does not specify one.
    #[serde(default = "default_quiet_period")]
    pub default_quiet_period_secs: u64,

    /// Processing lease duration. Must exceed worst-case engine latency
    /// (including tool round-trips) with margin.
    #[serde(default = "default_lease")]
    pub lease_secs: u64,

    /// Interval of the orphan-recovery sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            default_quiet_period_secs: default_quiet_period(),
            lease_secs: default_lease(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Conversation engine configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EngineConfig {
    /// Hard ceiling on LLM round-trips per turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Number of prior messages fetched for context.
    #[serde(default = "default_history_window")]
    pub history_window: i64,

    /// Estimated-token budget for history after the window fetch.
    #[serde(default = "default_history_token_budget")]
    pub history_token_budget: usize,

    /// Catalogs up to this size are inlined into the system prompt;
    /// larger ones get the search tool instead.
    #[serde(default = "default_catalog_inline_limit")]
    pub catalog_inline_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            history_window: default_history_window(),
            history_token_budget: default_history_token_budget(),
            catalog_inline_limit: default_catalog_inline_limit(),
        }
    }
}

/// Outbound delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Whether long replies are split into multiple sends.
    #[serde(default = "default_true")]
    pub split_enabled: bool,

    /// Maximum characters per chunk.
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    /// Synthetic typing delay per character of chunk text.
    #[serde(default = "default_delay_per_char")]
    pub delay_ms_per_char: u64,

    /// Lower bound on the typing delay.
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,

    /// Upper bound on the typing delay (before jitter).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Random jitter added on top of the computed delay.
    #[serde(default = "default_jitter")]
    pub jitter_ms: u64,

    /// Fixed pause before each media send.
    #[serde(default = "default_media_delay")]
    pub media_delay_ms: u64,

    /// Base location that short media content codes resolve against.
    #[serde(default)]
    pub media_base_url: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            split_enabled: true,
            max_chunk_chars: default_max_chunk_chars(),
            delay_ms_per_char: default_delay_per_char(),
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
            jitter_ms: default_jitter(),
            media_delay_ms: default_media_delay(),
            media_base_url: None,
        }
    }
}

/// Core API / messaging gateway configuration.
///
/// The gateway is the collaborator that actually talks to the messaging
/// channel and hosts the payment/scheduling endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    /// Shared secret sent as `X-Internal-Secret` on every gateway call.
    #[serde(default)]
    pub internal_secret: Option<String>,
}

/// TOML file shape: every section optional, env vars win.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    data_dir: Option<std::path::PathBuf>,
    http_bind: Option<String>,
    llm: Option<LlmConfig>,
    buffer: Option<BufferConfig>,
    engine: Option<EngineConfig>,
    delivery: Option<DeliveryConfig>,
    gateway: Option<GatewayConfig>,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        Self::from_file(ConfigFile::default())
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let file: ConfigFile = toml::from_str(&raw).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let data_dir = env_var("VENTABOT_DATA_DIR")
            .map(std::path::PathBuf::from)
            .or(file.data_dir)
            .or_else(|| dirs::data_dir().map(|d| d.join("ventabot")))
            .unwrap_or_else(|| std::path::PathBuf::from("./data"));

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

        let http_bind = env_var("VENTABOT_HTTP_BIND")
            .or(file.http_bind)
            .unwrap_or_else(|| "127.0.0.1:8390".into())
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("invalid http_bind: {e}")))?;

        let mut llm = file.llm.unwrap_or_else(|| LlmConfig {
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            advanced: None,
        });
        if let Some(key) = env_var("OPENAI_API_KEY") {
            llm.api_key = Some(key);
        }
        if let Some(model) = env_var("VENTABOT_MODEL") {
            llm.model = model;
        }
        if let Some(url) = env_var("VENTABOT_LLM_BASE_URL") {
            llm.base_url = url;
        }

        let mut gateway = file.gateway.unwrap_or_else(|| GatewayConfig {
            base_url: default_gateway_url(),
            internal_secret: None,
        });
        if let Some(url) = env_var("VENTABOT_GATEWAY_URL") {
            gateway.base_url = url;
        }
        if let Some(secret) = env_var("VENTABOT_INTERNAL_SECRET") {
            gateway.internal_secret = Some(secret);
        }

        Ok(Self {
            data_dir,
            http_bind,
            llm,
            buffer: file.buffer.unwrap_or_default(),
            engine: file.engine.unwrap_or_default(),
            delivery: file.delivery.unwrap_or_default(),
            gateway,
        })
    }

    /// Get the SQLite database path.
    pub fn sqlite_path(&self) -> std::path::PathBuf {
        self.data_dir.join("ventabot.db")
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn default_llm_base_url() -> String {
    "https://api.openai.com".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_quiet_period() -> u64 {
    5
}
fn default_lease() -> u64 {
    120
}
fn default_sweep_interval() -> u64 {
    30
}
fn default_max_iterations() -> u32 {
    5
}
fn default_history_window() -> i64 {
    20
}
fn default_history_token_budget() -> usize {
    3000
}
fn default_catalog_inline_limit() -> usize {
    15
}
fn default_true() -> bool {
    true
}
fn default_max_chunk_chars() -> usize {
    300
}
fn default_delay_per_char() -> u64 {
    25
}
fn default_min_delay() -> u64 {
    800
}
fn default_max_delay() -> u64 {
    4000
}
fn default_jitter() -> u64 {
    400
}
fn default_media_delay() -> u64 {
    600
}
fn default_gateway_url() -> String {
    "http://127.0.0.1:4000/api/internal".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let file: ConfigFile = toml::from_str(
            r#"
            [llm]
            model = "gpt-4o-mini"

            [buffer]
            lease_secs = 90
            "#,
        )
        .expect("minimal config should parse");

        let llm = file.llm.expect("llm section present");
        assert_eq!(llm.model, "gpt-4o-mini");
        assert_eq!(llm.max_tokens, 1000);

        let buffer = file.buffer.expect("buffer section present");
        assert_eq!(buffer.lease_secs, 90);
        assert_eq!(buffer.sweep_interval_secs, 30);
    }

    #[test]
    fn delivery_defaults_are_bounded() {
        let delivery = DeliveryConfig::default();
        assert!(delivery.min_delay_ms < delivery.max_delay_ms);
        assert!(delivery.split_enabled);
    }
}
