//! Tenant-configured generic HTTP tool.
//!
//! `{{variable}}` placeholders in the configured URL, headers, and body
//! template are interpolated from the LLM-supplied arguments before the call.

use crate::engine::context::HttpToolConfig;
use crate::llm::ToolDefinition;
use crate::tools::{Tool, ToolContext, ToolOutcome};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("hardcoded placeholder regex"));

const RESPONSE_TEXT_LIMIT: usize = 1000;

/// Interpolate `{{name}}` placeholders in strings, objects, and arrays.
/// Unknown placeholders are left untouched.
pub fn interpolate(template: &serde_json::Value, params: &serde_json::Value) -> serde_json::Value {
    match template {
        serde_json::Value::String(text) => {
            serde_json::Value::String(interpolate_str(text, params))
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, params)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| interpolate(v, params)).collect())
        }
        other => other.clone(),
    }
}

fn interpolate_str(template: &str, params: &serde_json::Value) -> String {
    PLACEHOLDER_REGEX
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match &params[&caps[1]] {
                serde_json::Value::Null => caps[0].to_string(),
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        })
        .into_owned()
}

/// One tenant-configured HTTP tool instance.
pub struct HttpTool {
    config: HttpToolConfig,
    http: reqwest::Client,
}

impl HttpTool {
    pub fn new(config: HttpToolConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.config.name.clone(),
            description: self.config.description.clone(),
            parameters: self.config.parameters.clone(),
        }
    }

    async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext<'_>) -> ToolOutcome {
        let url = interpolate_str(&self.config.url, &arguments);
        let method = self.config.method.to_uppercase();

        let mut builder = match method.as_str() {
            "GET" => self.http.get(&url).query(&flatten_params(&arguments)),
            "POST" => self.http.post(&url),
            "PUT" => self.http.put(&url),
            "PATCH" => self.http.patch(&url),
            "DELETE" => self.http.delete(&url),
            other => {
                return ToolOutcome::failed(
                    format!("Método HTTP no soportado: {other}"),
                    format!("unsupported method: {other}"),
                )
            }
        };

        for (name, template) in &self.config.headers {
            builder = builder.header(name, interpolate_str(template, &arguments));
        }

        if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
            if let Some(template) = &self.config.body_template {
                builder = builder.json(&interpolate(template, &arguments));
            }
        }

        tracing::info!(tool = %self.config.name, %method, %url, "executing custom tool");

        let response = match builder.send().await {
            Ok(response) => response,
            Err(error) if error.is_timeout() => {
                return ToolOutcome::failed(
                    "Timeout: la herramienta tardó demasiado en responder",
                    "timeout",
                )
            }
            Err(error) => {
                return ToolOutcome::failed(
                    format!("Error al ejecutar {}", self.config.name),
                    error.to_string(),
                )
            }
        };

        let status = response.status();
        let raw = response.text().await.unwrap_or_default();
        let data = serde_json::from_str::<serde_json::Value>(&raw).unwrap_or_else(|_| {
            let truncated: String = raw.chars().take(RESPONSE_TEXT_LIMIT).collect();
            serde_json::json!({ "text": truncated })
        });

        if status.is_success() {
            ToolOutcome::ok_with_data("Herramienta ejecutada exitosamente", data)
        } else {
            ToolOutcome {
                success: false,
                message: format!("Error HTTP {status}"),
                data: Some(data),
                error: Some(format!("HTTP {status}")),
            }
        }
    }
}

/// Flatten scalar arguments into query parameters for GET calls.
fn flatten_params(arguments: &serde_json::Value) -> Vec<(String, String)> {
    arguments
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| match v {
                    serde_json::Value::String(s) => Some((k.clone(), s.clone())),
                    serde_json::Value::Number(n) => Some((k.clone(), n.to_string())),
                    serde_json::Value::Bool(b) => Some((k.clone(), b.to_string())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_nested_templates() {
        let template = serde_json::json!({
            "customer": "{{name}}",
            "lines": [{"sku": "{{sku}}", "qty": "{{qty}}"}],
            "fixed": true,
        });
        let params = serde_json::json!({"name": "Ana", "sku": "moto-200", "qty": 2});

        let result = interpolate(&template, &params);
        assert_eq!(result["customer"], "Ana");
        assert_eq!(result["lines"][0]["sku"], "moto-200");
        assert_eq!(result["lines"][0]["qty"], "2");
        assert_eq!(result["fixed"], true);
    }

    #[test]
    fn unknown_placeholders_are_preserved() {
        let params = serde_json::json!({"known": "x"});
        let out = interpolate_str("a={{known}} b={{missing}}", &params);
        assert_eq!(out, "a=x b={{missing}}");
    }

    #[test]
    fn url_interpolation_substitutes_path_segments() {
        let params = serde_json::json!({"sku": "abc-123"});
        let url = interpolate_str("https://erp.example.com/stock/{{sku}}", &params);
        assert_eq!(url, "https://erp.example.com/stock/abc-123");
    }

    #[test]
    fn flattens_only_scalar_query_params() {
        let params = serde_json::json!({
            "q": "motos",
            "limit": 5,
            "nested": {"ignored": true},
        });
        let flattened = flatten_params(&params);
        assert!(flattened.contains(&("q".into(), "motos".into())));
        assert!(flattened.contains(&("limit".into(), "5".into())));
        assert_eq!(flattened.len(), 2);
    }
}
