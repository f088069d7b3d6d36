//! Catalog search tool.

use crate::engine::context::Product;
use crate::llm::ToolDefinition;
use crate::tools::{Tool, ToolContext, ToolOutcome};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

/// A scored catalog hit.
#[derive(Debug, Clone)]
pub struct ProductMatch {
    pub product: Product,
    pub score: f32,
}

/// Catalog search seam. The production deployment points this at the vector
/// search collaborator; `KeywordCatalogSearch` is the in-process default.
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    async fn search(&self, catalog: &[Product], query: &str, limit: usize) -> Vec<ProductMatch>;
}

/// Deterministic term-overlap scorer over the tenant catalog.
pub struct KeywordCatalogSearch;

#[async_trait]
impl CatalogSearch for KeywordCatalogSearch {
    async fn search(&self, catalog: &[Product], query: &str, limit: usize) -> Vec<ProductMatch> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|t| t.len() > 2)
            .map(str::to_string)
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let mut matches: Vec<ProductMatch> = catalog
            .iter()
            .filter_map(|product| {
                let haystack = format!(
                    "{} {} {}",
                    product.name.to_lowercase(),
                    product.description.as_deref().unwrap_or("").to_lowercase(),
                    product.category.as_deref().unwrap_or("").to_lowercase(),
                );
                let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                if hits == 0 {
                    return None;
                }
                Some(ProductMatch {
                    product: product.clone(),
                    score: hits as f32 / terms.len() as f32,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(limit);
        matches
    }
}

/// Arguments for the search tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchProductArgs {
    /// What the customer is looking for.
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    5
}

/// Searches the tenant catalog so large catalogs never need to be inlined
/// into the prompt.
pub struct SearchProductTool {
    search: Arc<dyn CatalogSearch>,
}

impl SearchProductTool {
    pub fn new(search: Arc<dyn CatalogSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Tool for SearchProductTool {
    fn name(&self) -> &str {
        "search_product"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_product".into(),
            description: "Busca productos en el catálogo del negocio. Úsala cuando el cliente \
                          pregunte por un producto específico o quiera ver opciones."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Qué busca el cliente, en sus palabras."
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Máximo de resultados a devolver (por defecto 5)."
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext<'_>) -> ToolOutcome {
        let args: SearchProductArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => {
                return ToolOutcome::failed("Parámetros inválidos para search_product", e.to_string())
            }
        };
        if args.query.trim().is_empty() {
            return ToolOutcome::failed(
                "Parámetros inválidos para search_product",
                "query must not be empty",
            );
        }

        let catalog = &ctx.conversation.catalog;
        if catalog.is_empty() {
            return ToolOutcome::failed(
                "No hay productos disponibles en el catálogo",
                "empty catalog",
            );
        }

        let matches = self
            .search
            .search(catalog, &args.query, args.max_results.clamp(1, 10))
            .await;

        if matches.is_empty() {
            return ToolOutcome::ok(format!(
                "No se encontraron productos para '{}'",
                args.query
            ));
        }

        let products: Vec<serde_json::Value> = matches
            .iter()
            .map(|m| {
                serde_json::json!({
                    "id": m.product.id,
                    "name": m.product.name,
                    "price": m.product.price,
                    "currency": m.product.currency,
                    "stock": m.product.stock,
                    "image_url": m.product.image_url,
                    "score": m.score,
                })
            })
            .collect();

        ToolOutcome::ok_with_data(
            format!("Se encontraron {} productos", matches.len()),
            serde_json::json!({ "products": products }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::ConversationContext;
    use crate::ConversationKey;

    fn catalog() -> Vec<Product> {
        vec![
            Product {
                id: "moto-200".into(),
                name: "Moto urbana 200cc".into(),
                description: Some("Ideal para ciudad".into()),
                price: Some(4500.0),
                currency: "S/".into(),
                category: Some("motos".into()),
                stock: Some(2),
                image_url: None,
            },
            Product {
                id: "casco-01".into(),
                name: "Casco integral".into(),
                description: None,
                price: Some(180.0),
                currency: "S/".into(),
                category: Some("accesorios".into()),
                stock: Some(10),
                image_url: None,
            },
        ]
    }

    #[tokio::test]
    async fn keyword_search_ranks_relevant_products_first() {
        let matches = KeywordCatalogSearch
            .search(&catalog(), "moto para ciudad", 5)
            .await;

        assert!(!matches.is_empty());
        assert_eq!(matches[0].product.id, "moto-200");
    }

    #[tokio::test]
    async fn tool_reports_no_results_as_success() {
        let mut conversation = ConversationContext::new("t1", "Motores Lima");
        conversation.catalog = catalog();
        let key = ConversationKey::new("t1", "c1");
        let ctx = ToolContext { key: &key, conversation: &conversation };

        let tool = SearchProductTool::new(std::sync::Arc::new(KeywordCatalogSearch));
        let outcome = tool
            .execute(serde_json::json!({"query": "refrigeradora"}), &ctx)
            .await;

        assert!(outcome.success);
        assert!(outcome.message.contains("No se encontraron"));
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let conversation = ConversationContext::new("t1", "Motores Lima");
        let key = ConversationKey::new("t1", "c1");
        let ctx = ToolContext { key: &key, conversation: &conversation };

        let tool = SearchProductTool::new(std::sync::Arc::new(KeywordCatalogSearch));
        let outcome = tool.execute(serde_json::json!({"query": "  "}), &ctx).await;

        assert!(!outcome.success);
    }
}
