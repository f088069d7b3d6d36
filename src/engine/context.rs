//! Per-conversation context: everything the engine knows about the tenant
//! and the lead before composing a turn.

use crate::error::Result;
use crate::ConversationKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A catalog product as the host hands it to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub stock: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,
}

fn default_currency() -> String {
    "S/".into()
}

/// What the tenant is trying to get out of conversations. Gates which
/// built-in tools the engine advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantObjective {
    #[default]
    Sales,
    Appointments,
}

impl TenantObjective {
    pub fn is_appointments(&self) -> bool {
        matches!(self, TenantObjective::Appointments)
    }
}

/// Lead memory annotations carried into the system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadMemory {
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub products_viewed: Vec<String>,
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default)]
    pub objections: Vec<String>,
}

impl LeadMemory {
    pub fn is_empty(&self) -> bool {
        self.stage.is_none()
            && self.products_viewed.is_empty()
            && self.preferences.is_empty()
            && self.objections.is_empty()
    }
}

/// Pending-transaction state, e.g. an order awaiting payment proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    pub order_id: String,
    pub status: String,
    #[serde(default)]
    pub product_name: Option<String>,
}

/// A file the agent may send (brochures, price lists, product sheets).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A tenant-configured generic HTTP tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpToolConfig {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body_template: Option<serde_json::Value>,
    /// JSON Schema of the arguments the LLM should supply.
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,
}

fn default_method() -> String {
    "POST".into()
}

fn default_parameters() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Everything one engine run knows about the tenant and the lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub tenant_id: String,
    pub business_name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub custom_instructions: Option<String>,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub catalog: Vec<Product>,
    #[serde(default)]
    pub lead: LeadMemory,
    #[serde(default)]
    pub pending_order: Option<PendingOrder>,
    #[serde(default)]
    pub files: Vec<FileResource>,
    #[serde(default)]
    pub custom_tools: Vec<HttpToolConfig>,
    #[serde(default)]
    pub objective: TenantObjective,
    #[serde(default)]
    pub payments_enabled: bool,
    /// Tenant opted into the secondary LLM pathway.
    #[serde(default)]
    pub advanced_mode: bool,
}

fn default_timezone() -> String {
    "America/Lima".into()
}

impl ConversationContext {
    pub fn new(tenant_id: impl Into<String>, business_name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            business_name: business_name.into(),
            timezone: default_timezone(),
            custom_instructions: None,
            policies: Vec::new(),
            catalog: Vec::new(),
            lead: LeadMemory::default(),
            pending_order: None,
            files: Vec::new(),
            custom_tools: Vec::new(),
            objective: TenantObjective::Sales,
            payments_enabled: false,
            advanced_mode: false,
        }
    }

    /// Look up a catalog product by id, or by name when the supplied value is
    /// not an id — tools use this to normalize human-readable references.
    pub fn resolve_product(&self, reference: &str) -> Option<&Product> {
        if let Some(product) = self.catalog.iter().find(|p| p.id == reference) {
            return Some(product);
        }
        let needle = reference.to_lowercase();
        self.catalog
            .iter()
            .find(|p| p.name.to_lowercase().contains(&needle))
    }
}

/// Collaborator that resolves the business context for a conversation.
/// Implemented by the host against its own tenant storage.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn load_context(&self, key: &ConversationKey) -> Result<ConversationContext>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_product_by_id_then_by_name() {
        let mut ctx = ConversationContext::new("t1", "Motores Lima");
        ctx.catalog = vec![
            Product {
                id: "moto-200".into(),
                name: "Moto urbana 200cc".into(),
                description: None,
                price: Some(4500.0),
                currency: "S/".into(),
                category: None,
                stock: Some(2),
                image_url: None,
            },
        ];

        assert_eq!(ctx.resolve_product("moto-200").map(|p| p.id.as_str()), Some("moto-200"));
        assert_eq!(
            ctx.resolve_product("urbana").map(|p| p.id.as_str()),
            Some("moto-200"),
        );
        assert!(ctx.resolve_product("camioneta").is_none());
    }
}
