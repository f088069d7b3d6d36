//! The tool-calling conversation loop.

use crate::config::EngineConfig;
use crate::conversation::{MessageLog, UsageLog};
use crate::engine::context::ConversationContext;
use crate::engine::prompt::compose_system_prompt;
use crate::llm::{
    trim_history, ChatMessage, CompletionClient, CompletionRequest, TokenUsage,
};
use crate::tools::{ToolContext, ToolProviders, ToolRegistry};
use crate::ConversationKey;
use std::sync::Arc;

/// Shown when an entire run fails; the user is never left unanswered.
const APOLOGY_TEXT: &str =
    "Lo siento, tuve un problema al procesar tu mensaje. ¿Podrías intentarlo de nuevo?";

/// Shown when the tool loop hits its iteration ceiling without a usable reply.
const CEILING_FALLBACK_TEXT: &str =
    "Disculpa, no pude completar esa consulta ahora mismo. ¿Puedes darme un poco más de detalle?";

/// The engine's final answer for one coalesced turn.
#[derive(Debug, Clone)]
pub struct FinalReply {
    pub text: String,
    pub usage: TokenUsage,
    pub iterations: u32,
}

/// Drives the LLM ↔ tool loop for one conversation turn at a time.
///
/// Holds the primary completion pathway and the optional advanced one;
/// a tenant opting into advanced mode gets it transparently, degrading to
/// the primary pathway on failure instead of failing the turn.
pub struct ConversationEngine {
    primary: Arc<dyn CompletionClient>,
    advanced: Option<Arc<dyn CompletionClient>>,
    providers: ToolProviders,
    history: MessageLog,
    usage_log: UsageLog,
    config: EngineConfig,
    max_tokens: u32,
    temperature: f32,
}

impl ConversationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        primary: Arc<dyn CompletionClient>,
        advanced: Option<Arc<dyn CompletionClient>>,
        providers: ToolProviders,
        history: MessageLog,
        usage_log: UsageLog,
        config: EngineConfig,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            primary,
            advanced,
            providers,
            history,
            usage_log,
            config,
            max_tokens,
            temperature,
        }
    }

    /// Run one turn: compose context, loop through tool calls, return the
    /// final text. Never leaves the user unanswered — provider failures come
    /// back as an apology reply.
    pub async fn run(
        &self,
        key: &ConversationKey,
        coalesced_text: &str,
        conversation: &ConversationContext,
    ) -> FinalReply {
        let system = compose_system_prompt(
            conversation,
            chrono::Utc::now(),
            self.config.catalog_inline_limit,
        );

        let mut messages = self.load_history(key).await;
        messages.push(ChatMessage::user(coalesced_text));
        let mut messages = trim_history(messages, self.config.history_token_budget);

        let registry =
            ToolRegistry::for_conversation(conversation, &self.providers, self.config.catalog_inline_limit);
        let tools = registry.definitions();
        let tool_ctx = ToolContext { key, conversation };

        let client = self.select_client(conversation);

        let mut usage = TokenUsage::default();
        let mut iterations = 0u32;
        let mut last_partial_text: Option<String> = None;

        let text = loop {
            if iterations >= self.config.max_iterations {
                tracing::warn!(
                    %key,
                    iterations,
                    "tool loop hit iteration ceiling; returning fallback text"
                );
                break last_partial_text
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| CEILING_FALLBACK_TEXT.to_string());
            }
            iterations += 1;

            let request = CompletionRequest {
                system: Some(system.clone()),
                messages: messages.clone(),
                tools: tools.clone(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            };

            let response = match self.complete_with_degrade(&client, &request, conversation).await {
                Ok(response) => response,
                Err(error) => {
                    tracing::error!(%error, %key, iteration = iterations, "LLM call failed; surfacing apology");
                    break last_partial_text
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| APOLOGY_TEXT.to_string());
                }
            };

            usage.accumulate(response.usage);

            if response.tool_calls.is_empty() {
                break response
                    .text
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| APOLOGY_TEXT.to_string());
            }

            // Text accompanying tool calls is the best partial answer we have
            // if the loop later breaches its ceiling.
            if let Some(text) = &response.text {
                if !text.trim().is_empty() {
                    last_partial_text = Some(text.clone());
                }
            }

            messages.push(ChatMessage::Assistant {
                content: response.text.clone(),
                tool_calls: response.tool_calls.clone(),
            });

            // Resolve every call exactly once before the next LLM round.
            for call in &response.tool_calls {
                let outcome = registry.execute(call, &tool_ctx).await;
                messages.push(ChatMessage::tool_result(&call.id, outcome.llm_content()));
            }
        };

        self.usage_log.record(key, client.name(), usage, iterations);

        FinalReply { text, usage, iterations }
    }

    /// History window, fetched newest-first and reversed to chronological.
    /// A load failure degrades to an empty history rather than failing the turn.
    async fn load_history(&self, key: &ConversationKey) -> Vec<ChatMessage> {
        let stored = match self.history.load_recent(key, self.config.history_window).await {
            Ok(stored) => stored,
            Err(error) => {
                tracing::warn!(%error, %key, "failed to load history; continuing without it");
                return Vec::new();
            }
        };

        stored
            .into_iter()
            .map(|message| match message.role.as_str() {
                "assistant" => ChatMessage::assistant(message.content),
                _ => ChatMessage::user(message.content),
            })
            .collect()
    }

    fn select_client(&self, conversation: &ConversationContext) -> Arc<dyn CompletionClient> {
        if conversation.advanced_mode {
            if let Some(advanced) = &self.advanced {
                return advanced.clone();
            }
            tracing::debug!(
                tenant = %conversation.tenant_id,
                "advanced mode requested but not configured; using primary pathway"
            );
        }
        self.primary.clone()
    }

    /// One completion call with the advanced → primary degrade: if the tenant
    /// is on the advanced pathway and it fails, the turn retries once on the
    /// primary instead of failing.
    async fn complete_with_degrade(
        &self,
        client: &Arc<dyn CompletionClient>,
        request: &CompletionRequest,
        conversation: &ConversationContext,
    ) -> Result<crate::llm::CompletionResponse, crate::error::LlmError> {
        match client.complete(request).await {
            Ok(response) => Ok(response),
            Err(error) => {
                let is_advanced = self
                    .advanced
                    .as_ref()
                    .is_some_and(|a| Arc::ptr_eq(a, client));
                if is_advanced {
                    tracing::warn!(
                        %error,
                        tenant = %conversation.tenant_id,
                        "advanced pathway unavailable; degrading to primary"
                    );
                    return self.primary.complete(request).await;
                }
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, ToolCallRequest};
    use crate::tools::{
        HttpPaymentProvider, HttpSchedulingProvider, KeywordCatalogSearch, ToolCallLog,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// A scripted LLM: pops pre-baked responses, counts calls.
    struct ScriptedClient {
        label: &'static str,
        responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
        calls: AtomicU32,
        /// When the script runs dry, keep returning this.
        fallthrough: Option<CompletionResponse>,
    }

    impl ScriptedClient {
        fn new(
            label: &'static str,
            responses: Vec<Result<CompletionResponse, LlmError>>,
        ) -> Self {
            Self {
                label,
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
                fallthrough: None,
            }
        }

        fn always_tool_calls(label: &'static str) -> Self {
            Self {
                label,
                responses: Mutex::new(VecDeque::new()),
                calls: AtomicU32::new(0),
                fallthrough: Some(CompletionResponse {
                    text: None,
                    tool_calls: vec![ToolCallRequest {
                        id: "call_loop".into(),
                        name: "search_product".into(),
                        arguments: serde_json::json!({"query": "motos"}),
                    }],
                    usage: TokenUsage { prompt_tokens: 10, completion_tokens: 5 },
                }),
            }
        }

        fn text(content: &str) -> CompletionResponse {
            CompletionResponse {
                text: Some(content.to_string()),
                tool_calls: Vec::new(),
                usage: TokenUsage { prompt_tokens: 100, completion_tokens: 20 },
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        fn name(&self) -> &str {
            self.label
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(scripted) = self.responses.lock().await.pop_front() {
                return scripted;
            }
            self.fallthrough
                .clone()
                .ok_or_else(|| LlmError::CompletionFailed("script exhausted".into()))
        }
    }

    async fn engine_with(
        primary: Arc<ScriptedClient>,
        advanced: Option<Arc<ScriptedClient>>,
    ) -> ConversationEngine {
        let pool = db::in_memory().await.expect("pool");
        let history = MessageLog::new(pool.clone());
        history.initialize().await.expect("schema");
        let usage_log = UsageLog::new(pool.clone());
        usage_log.initialize().await.expect("schema");
        let call_log = ToolCallLog::new(pool);
        call_log.initialize().await.expect("schema");

        let providers = ToolProviders {
            payment: Arc::new(HttpPaymentProvider::new("http://gateway.invalid", None)),
            scheduling: Arc::new(HttpSchedulingProvider::new("http://gateway.invalid", None)),
            search: Arc::new(KeywordCatalogSearch),
            http: reqwest::Client::new(),
            call_log,
        };

        ConversationEngine::new(
            primary,
            advanced.map(|a| a as Arc<dyn CompletionClient>),
            providers,
            history,
            usage_log,
            EngineConfig::default(),
            500,
            0.7,
        )
    }

    #[tokio::test]
    async fn plain_text_response_ends_the_loop_after_one_iteration() {
        let primary = Arc::new(ScriptedClient::new(
            "primary",
            vec![Ok(ScriptedClient::text("Hola! ¿Qué moto buscas?"))],
        ));
        let engine = engine_with(primary.clone(), None).await;

        let key = ConversationKey::new("t1", "+51999");
        let conversation = ConversationContext::new("t1", "Motores Lima");
        let reply = engine.run(&key, "Hola\ntienes motos?", &conversation).await;

        assert_eq!(reply.text, "Hola! ¿Qué moto buscas?");
        assert_eq!(reply.iterations, 1);
        assert_eq!(reply.usage.total(), 120);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tool_results_feed_the_next_round() {
        let primary = Arc::new(ScriptedClient::new(
            "primary",
            vec![
                Ok(CompletionResponse {
                    text: None,
                    tool_calls: vec![ToolCallRequest {
                        id: "call_1".into(),
                        name: "nonexistent_tool".into(),
                        arguments: serde_json::json!({}),
                    }],
                    usage: TokenUsage { prompt_tokens: 50, completion_tokens: 10 },
                }),
                Ok(ScriptedClient::text("No pude usar esa herramienta, pero te ayudo igual.")),
            ],
        ));
        let engine = engine_with(primary.clone(), None).await;

        let key = ConversationKey::new("t1", "+51999");
        let conversation = ConversationContext::new("t1", "Motores Lima");
        let reply = engine.run(&key, "quiero pagar", &conversation).await;

        assert_eq!(reply.iterations, 2);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
        assert!(reply.text.contains("te ayudo igual"));
        // Usage accumulated across both calls.
        assert_eq!(reply.usage.prompt_tokens, 150);
    }

    #[tokio::test]
    async fn always_calling_tools_terminates_at_the_ceiling() {
        let primary = Arc::new(ScriptedClient::always_tool_calls("primary"));
        let engine = engine_with(primary.clone(), None).await;

        let key = ConversationKey::new("t1", "+51999");
        let conversation = ConversationContext::new("t1", "Motores Lima");
        let reply = engine.run(&key, "hola", &conversation).await;

        assert_eq!(reply.iterations, EngineConfig::default().max_iterations);
        assert_eq!(
            primary.calls.load(Ordering::SeqCst),
            EngineConfig::default().max_iterations
        );
        assert!(!reply.text.trim().is_empty(), "fallback text must be non-empty");
    }

    #[tokio::test]
    async fn total_llm_failure_surfaces_apology() {
        let primary = Arc::new(ScriptedClient::new(
            "primary",
            vec![Err(LlmError::ProviderRequest("503".into()))],
        ));
        let engine = engine_with(primary, None).await;

        let key = ConversationKey::new("t1", "+51999");
        let conversation = ConversationContext::new("t1", "Motores Lima");
        let reply = engine.run(&key, "hola", &conversation).await;

        assert_eq!(reply.text, APOLOGY_TEXT);
    }

    #[tokio::test]
    async fn advanced_tenant_degrades_to_primary_on_failure() {
        let primary = Arc::new(ScriptedClient::new(
            "primary",
            vec![Ok(ScriptedClient::text("respuesta del primario"))],
        ));
        let advanced = Arc::new(ScriptedClient::new(
            "advanced",
            vec![Err(LlmError::ProviderRequest("advanced down".into()))],
        ));
        let engine = engine_with(primary.clone(), Some(advanced.clone())).await;

        let key = ConversationKey::new("t1", "+51999");
        let mut conversation = ConversationContext::new("t1", "Motores Lima");
        conversation.advanced_mode = true;

        let reply = engine.run(&key, "hola", &conversation).await;

        assert_eq!(reply.text, "respuesta del primario");
        assert_eq!(advanced.calls.load(Ordering::SeqCst), 1);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn advanced_tenant_without_advanced_config_uses_primary() {
        let primary = Arc::new(ScriptedClient::new(
            "primary",
            vec![Ok(ScriptedClient::text("ok"))],
        ));
        let engine = engine_with(primary.clone(), None).await;

        let key = ConversationKey::new("t1", "+51999");
        let mut conversation = ConversationContext::new("t1", "Motores Lima");
        conversation.advanced_mode = true;

        let reply = engine.run(&key, "hola", &conversation).await;
        assert_eq!(reply.text, "ok");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn prior_turns_are_loaded_oldest_first() {
        let primary = Arc::new(ScriptedClient::new(
            "primary",
            vec![Ok(ScriptedClient::text("seguimos"))],
        ));
        let engine = engine_with(primary.clone(), None).await;

        let key = ConversationKey::new("t1", "+51999");
        engine
            .history
            .log_user_message(&key, "primer mensaje")
            .await
            .expect("insert");
        engine
            .history
            .log_outbound_sync(&key, "primera respuesta", &[], &[])
            .await
            .expect("insert");

        let loaded = engine.load_history(&key).await;
        assert_eq!(loaded.len(), 2);
        assert!(matches!(&loaded[0], ChatMessage::User { content } if content == "primer mensaje"));
        assert!(
            matches!(&loaded[1], ChatMessage::Assistant { content: Some(c), .. } if c == "primera respuesta")
        );
    }
}
