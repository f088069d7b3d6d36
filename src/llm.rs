//! LLM chat-completion types and the provider seam.

pub mod openai;

pub use openai::OpenAiClient;

use crate::error::LlmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One role-tagged message in a conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant {
        content: Option<String>,
        #[serde(default)]
        tool_calls: Vec<ToolCallRequest>,
    },
    /// Result of a tool call, keyed to the originating call's id.
    ToolResult { call_id: String, content: String },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System { content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User { content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage::ToolResult {
            call_id: call_id.into(),
            content: content.into(),
        }
    }
}

/// A structured tool-call request emitted by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Schema of one callable tool, as advertised to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A single chat-completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Provider response: plain text, tool calls, or both.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
}

/// Token counters reported by the provider, accumulated across the calls
/// of one engine run for downstream accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn accumulate(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Chat-completion provider seam. Object-safe so the engine can hold the
/// primary and advanced pathways behind the same type, and tests can script
/// the model.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Human-readable identifier used in logs and the usage ledger.
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Rough token estimation (chars / 4), used to trim history to budget.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Trim conversation history to an estimated token budget, keeping the most
/// recent messages. The freshly coalesced user turn is always kept.
pub fn trim_history(messages: Vec<ChatMessage>, budget: usize) -> Vec<ChatMessage> {
    let mut kept = Vec::with_capacity(messages.len());
    let mut used = 0usize;

    for message in messages.into_iter().rev() {
        let cost = match &message {
            ChatMessage::System { content }
            | ChatMessage::User { content }
            | ChatMessage::ToolResult { content, .. } => estimate_tokens(content),
            ChatMessage::Assistant { content, .. } => {
                content.as_deref().map(estimate_tokens).unwrap_or(0)
            }
        };
        if kept.is_empty() || used + cost <= budget {
            used += cost;
            kept.push(message);
        } else {
            break;
        }
    }

    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates_across_calls() {
        let mut total = TokenUsage::default();
        total.accumulate(TokenUsage { prompt_tokens: 100, completion_tokens: 20 });
        total.accumulate(TokenUsage { prompt_tokens: 250, completion_tokens: 75 });

        assert_eq!(total.prompt_tokens, 350);
        assert_eq!(total.completion_tokens, 95);
        assert_eq!(total.total(), 445);
    }

    #[test]
    fn trim_history_keeps_most_recent_within_budget() {
        let messages = vec![
            ChatMessage::user("a".repeat(400)),
            ChatMessage::assistant("b".repeat(400)),
            ChatMessage::user("c".repeat(40)),
        ];

        // Budget of 120 estimated tokens fits the last two messages only.
        let trimmed = trim_history(messages, 120);
        assert_eq!(trimmed.len(), 2);
        assert!(matches!(&trimmed[0], ChatMessage::Assistant { .. }));
        assert!(matches!(&trimmed[1], ChatMessage::User { .. }));
    }

    #[test]
    fn trim_history_never_drops_the_newest_message() {
        let messages = vec![ChatMessage::user("x".repeat(4000))];
        let trimmed = trim_history(messages, 10);
        assert_eq!(trimmed.len(), 1);
    }
}
