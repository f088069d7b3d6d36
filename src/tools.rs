//! Tools callable by the conversation engine.
//!
//! Every tool — built-in or tenant-configured — implements the same `Tool`
//! capability and is resolved by exact name through the `ToolRegistry`. Which
//! tools a conversation gets is decided at registry build time from the
//! conversation context (objective, catalog size, configured providers).

pub mod appointment;
pub mod http_tool;
pub mod log;
pub mod payment;
pub mod search_product;
pub mod send_file;

pub use appointment::{
    CheckAvailabilityTool, CreateAppointmentTool, HttpSchedulingProvider, SchedulingProvider,
};
pub use http_tool::HttpTool;
pub use log::ToolCallLog;
pub use payment::{HttpPaymentProvider, PaymentProvider};
pub use search_product::{CatalogSearch, KeywordCatalogSearch, SearchProductTool};
pub use send_file::SendFileTool;

use crate::engine::context::ConversationContext;
use crate::llm::{ToolCallRequest, ToolDefinition};
use crate::ConversationKey;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Per-invocation context handed to every tool.
pub struct ToolContext<'a> {
    pub key: &'a ConversationKey,
    pub conversation: &'a ConversationContext,
}

/// Structured result of one tool invocation, success or failure, phrased so
/// the LLM can incorporate it into its next message.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn ok_with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(error.into()),
        }
    }

    /// Render the outcome as text for the tool-result message. Well-known
    /// data fields get a readable line so the model does not have to dig
    /// through raw JSON.
    pub fn llm_content(&self) -> String {
        if !self.success {
            return self
                .error
                .as_ref()
                .map(|e| format!("{} ({e})", self.message))
                .unwrap_or_else(|| self.message.clone());
        }

        let mut content = self.message.clone();

        if let Some(data) = &self.data {
            if let Some(products) = data["products"].as_array() {
                let lines: Vec<String> = products
                    .iter()
                    .take(3)
                    .map(|p| {
                        format!(
                            "- {}: {}{}",
                            p["name"].as_str().unwrap_or("Producto"),
                            p["currency"].as_str().unwrap_or("$"),
                            p["price"].as_f64().unwrap_or_default(),
                        )
                    })
                    .collect();
                if !lines.is_empty() {
                    content.push_str("\n\nProductos encontrados:\n");
                    content.push_str(&lines.join("\n"));
                }
            }
            if let Some(url) = data["payment_url"].as_str() {
                content.push_str(&format!("\n\nLink de pago: {url}"));
            }
            if let Some(url) = data["media_url"].as_str() {
                content.push_str(&format!("\n\nURL: {url}"));
            }
            if let Some(slots) = data["slots"].as_array() {
                let listed: Vec<&str> = slots.iter().filter_map(|s| s.as_str()).collect();
                if !listed.is_empty() {
                    content.push_str(&format!("\n\nHorarios disponibles: {}", listed.join(", ")));
                }
            }
        }

        content
    }
}

/// Common capability implemented by every built-in and tenant-configured tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Schema advertised to the LLM.
    fn definition(&self) -> ToolDefinition;

    /// Validate arguments and perform the side effect. Failures come back as
    /// unsuccessful outcomes, never as panics — the conversation must be able
    /// to continue and explain the failure to the end user.
    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext<'_>) -> ToolOutcome;
}

/// Shared collaborators the registry wires into built-in tools.
#[derive(Clone)]
pub struct ToolProviders {
    pub payment: Arc<dyn PaymentProvider>,
    pub scheduling: Arc<dyn SchedulingProvider>,
    pub search: Arc<dyn CatalogSearch>,
    pub http: reqwest::Client,
    pub call_log: ToolCallLog,
}

/// The set of tools available to one conversation.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    call_log: ToolCallLog,
}

impl ToolRegistry {
    /// Build the registry for a conversation: built-ins gated by their
    /// preconditions plus every tenant-configured HTTP tool.
    pub fn for_conversation(
        conversation: &ConversationContext,
        providers: &ToolProviders,
        catalog_inline_limit: usize,
    ) -> Self {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();

        if conversation.catalog.len() > catalog_inline_limit {
            tools.push(Arc::new(SearchProductTool::new(providers.search.clone())));
        }

        if conversation.payments_enabled && !conversation.catalog.is_empty() {
            tools.push(Arc::new(payment::PaymentLinkTool::new(
                providers.payment.clone(),
            )));
        }

        if conversation.objective.is_appointments() {
            tools.push(Arc::new(CheckAvailabilityTool::new(
                providers.scheduling.clone(),
            )));
            tools.push(Arc::new(CreateAppointmentTool::new(
                providers.scheduling.clone(),
            )));
        }

        let has_files = !conversation.files.is_empty()
            || conversation.catalog.iter().any(|p| p.image_url.is_some());
        if has_files {
            tools.push(Arc::new(SendFileTool::new()));
        }

        for config in &conversation.custom_tools {
            tools.push(Arc::new(HttpTool::new(config.clone(), providers.http.clone())));
        }

        Self {
            tools,
            call_log: providers.call_log.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Dispatch one tool call by exact name, time it, and record the
    /// invocation. Unknown names come back as failure outcomes.
    pub async fn execute(
        &self,
        call: &ToolCallRequest,
        ctx: &ToolContext<'_>,
    ) -> ToolOutcome {
        let Some(tool) = self.tools.iter().find(|t| t.name() == call.name) else {
            tracing::warn!(tool = %call.name, "tool call for unknown tool");
            return ToolOutcome::failed(
                format!("Herramienta no disponible: {}", call.name),
                format!("unknown tool: {}", call.name),
            );
        };

        let started = std::time::Instant::now();
        let outcome = tool.execute(call.arguments.clone(), ctx).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        tracing::info!(
            tool = %call.name,
            success = outcome.success,
            duration_ms,
            "tool executed"
        );

        self.call_log
            .record(ctx.key, &call.name, &call.arguments, &outcome, duration_ms);

        outcome
    }
}
