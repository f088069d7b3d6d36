//! OpenAI-compatible chat-completions client.

use crate::error::LlmError;
use crate::llm::{
    ChatMessage, CompletionClient, CompletionRequest, CompletionResponse, TokenUsage,
    ToolCallRequest,
};
use async_trait::async_trait;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Client for any provider implementing the OpenAI chat-completions format.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    label: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            label: label.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = build_request_body(&self.model, request);

        let endpoint = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );

        let mut request_builder = self
            .http
            .post(&endpoint)
            .header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            request_builder = request_builder.header("authorization", format!("Bearer {key}"));
        }

        let response = request_builder
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ProviderRequest(e.to_string()))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| LlmError::ProviderRequest(format!("failed to read response body: {e}")))?;

        let response_body: serde_json::Value =
            serde_json::from_str(&response_text).map_err(|e| {
                LlmError::MalformedResponse(format!(
                    "response ({status}) is not valid JSON: {e}\nBody: {}",
                    truncate_body(&response_text)
                ))
            })?;

        if !status.is_success() {
            let message = response_body["error"]["message"]
                .as_str()
                .unwrap_or("unknown error");
            return Err(LlmError::ProviderRequest(format!(
                "{} API error ({status}): {message}",
                self.label
            )));
        }

        parse_completion(response_body, &self.label)
    }
}

/// Build the chat-completions request JSON.
fn build_request_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        messages.push(serde_json::json!({
            "role": "system",
            "content": system,
        }));
    }

    for message in &request.messages {
        match message {
            ChatMessage::System { content } => {
                messages.push(serde_json::json!({"role": "system", "content": content}));
            }
            ChatMessage::User { content } => {
                messages.push(serde_json::json!({"role": "user", "content": content}));
            }
            ChatMessage::Assistant { content, tool_calls } => {
                let mut msg = serde_json::json!({"role": "assistant"});
                if let Some(text) = content {
                    msg["content"] = serde_json::json!(text);
                }
                if !tool_calls.is_empty() {
                    let calls: Vec<serde_json::Value> = tool_calls
                        .iter()
                        .map(|tc| {
                            // OpenAI expects arguments as a JSON string.
                            let args_string = serde_json::to_string(&tc.arguments)
                                .unwrap_or_else(|_| "{}".to_string());
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": args_string,
                                }
                            })
                        })
                        .collect();
                    msg["tool_calls"] = serde_json::json!(calls);
                }
                messages.push(msg);
            }
            ChatMessage::ToolResult { call_id, content } => {
                messages.push(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": content,
                }));
            }
        }
    }

    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
    });

    if !request.tools.is_empty() {
        let tools: Vec<serde_json::Value> = request
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

/// Parse a chat-completions response body into a `CompletionResponse`.
fn parse_completion(
    body: serde_json::Value,
    provider_label: &str,
) -> Result<CompletionResponse, LlmError> {
    let choice = &body["choices"][0]["message"];

    let text = choice["content"]
        .as_str()
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = choice["tool_calls"].as_array() {
        for tc in calls {
            let id = tc["id"].as_str().unwrap_or("").to_string();
            let name = tc["function"]["name"].as_str().unwrap_or("").trim().to_string();
            // OpenAI-compatible APIs usually return arguments as a JSON string;
            // some providers return a raw JSON object instead.
            let arguments_field = &tc["function"]["arguments"];
            let arguments = arguments_field
                .as_str()
                .and_then(|raw| serde_json::from_str(raw).ok())
                .or_else(|| arguments_field.as_object().map(|_| arguments_field.clone()))
                .unwrap_or(serde_json::json!({}));
            tool_calls.push(ToolCallRequest { id, name, arguments });
        }
    }

    if text.is_none() && tool_calls.is_empty() {
        tracing::warn!(provider = %provider_label, choice = ?choice, "empty response from provider");
        return Err(LlmError::MalformedResponse(format!(
            "empty response from {provider_label}"
        )));
    }

    let usage = TokenUsage {
        prompt_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    };

    Ok(CompletionResponse { text, tool_calls, usage })
}

fn truncate_body(body: &str) -> &str {
    let limit = 500;
    if body.len() <= limit { body } else { &body[..limit] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolDefinition;

    #[test]
    fn builds_body_with_tools_and_history() {
        let request = CompletionRequest {
            system: Some("Eres un asistente de ventas.".into()),
            messages: vec![
                ChatMessage::user("Hola"),
                ChatMessage::Assistant {
                    content: None,
                    tool_calls: vec![ToolCallRequest {
                        id: "call_1".into(),
                        name: "search_product".into(),
                        arguments: serde_json::json!({"query": "motos"}),
                    }],
                },
                ChatMessage::tool_result("call_1", "Se encontraron 2 productos"),
            ],
            tools: vec![ToolDefinition {
                name: "search_product".into(),
                description: "Busca productos".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            max_tokens: 500,
            temperature: 0.7,
        };

        let body = build_request_body("gpt-4o", &request);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["name"],
            "search_product"
        );
        // Arguments must be serialized as a string for OpenAI compatibility.
        assert!(body["messages"][2]["tool_calls"][0]["function"]["arguments"].is_string());
        assert_eq!(body["messages"][3]["role"], "tool");
        assert_eq!(body["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["function"]["name"], "search_product");
    }

    #[test]
    fn parses_text_response_with_usage() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "Hola! ¿En qué te ayudo?"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 15},
        });

        let response = parse_completion(body, "test").expect("should parse");
        assert_eq!(response.text.as_deref(), Some("Hola! ¿En qué te ayudo?"));
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.usage.total(), 135);
    }

    #[test]
    fn parses_tool_calls_with_string_arguments() {
        let body = serde_json::json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_abc",
                    "type": "function",
                    "function": {
                        "name": "create_payment_link",
                        "arguments": "{\"product_id\": \"p-1\", \"quantity\": 2}"
                    }
                }]
            }}],
            "usage": {"prompt_tokens": 200, "completion_tokens": 30},
        });

        let response = parse_completion(body, "test").expect("should parse");
        assert!(response.text.is_none());
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "create_payment_link");
        assert_eq!(response.tool_calls[0].arguments["quantity"], 2);
    }

    #[test]
    fn rejects_empty_choice() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": ""}}],
            "usage": {},
        });

        let error = parse_completion(body, "test").expect_err("empty response must error");
        assert!(error.to_string().contains("empty response"));
    }
}
