//! Payment-link creation tool.

use crate::llm::ToolDefinition;
use crate::tools::{Tool, ToolContext, ToolOutcome};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

/// Request handed to the payment collaborator.
#[derive(Debug, Clone)]
pub struct PaymentLinkRequest {
    pub tenant_id: String,
    pub lead_id: String,
    pub product_id: String,
    pub quantity: u32,
}

/// A created payment link.
#[derive(Debug, Clone)]
pub struct PaymentLink {
    pub payment_url: String,
    pub short_code: Option<String>,
}

/// Payment provider seam.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_payment_link(
        &self,
        request: PaymentLinkRequest,
    ) -> anyhow::Result<PaymentLink>;
}

/// Payment provider backed by the core API gateway.
pub struct HttpPaymentProvider {
    http: reqwest::Client,
    base_url: String,
    internal_secret: Option<String>,
}

impl HttpPaymentProvider {
    pub fn new(base_url: impl Into<String>, internal_secret: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
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
impl PaymentProvider for HttpPaymentProvider {
    async fn create_payment_link(
        &self,
        request: PaymentLinkRequest,
    ) -> anyhow::Result<PaymentLink> {
        let endpoint = format!(
            "{}/orders/create-payment-link",
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
                "businessId": request.tenant_id,
                "productId": request.product_id,
                "quantity": request.quantity,
                "leadId": request.lead_id,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();

        if !status.is_success() {
            let reason = body["error"].as_str().unwrap_or("unknown error");
            anyhow::bail!("payment gateway error ({status}): {reason}");
        }

        let payment_url = body["paymentUrl"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("payment gateway response missing paymentUrl"))?
            .to_string();

        Ok(PaymentLink {
            payment_url,
            short_code: body["shortCode"].as_str().map(str::to_string),
        })
    }
}

/// Arguments for payment-link creation.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PaymentLinkArgs {
    /// Catalog product id, or the product name if the id is unknown.
    pub product: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

/// Creates a payment link for a confirmed purchase.
pub struct PaymentLinkTool {
    provider: Arc<dyn PaymentProvider>,
}

impl PaymentLinkTool {
    pub fn new(provider: Arc<dyn PaymentProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for PaymentLinkTool {
    fn name(&self) -> &str {
        "create_payment_link"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_payment_link".into(),
            description: "Genera un link de pago para un producto. Úsala cuando el cliente \
                          confirme que quiere comprar."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "product": {
                        "type": "string",
                        "description": "ID del producto en el catálogo, o su nombre."
                    },
                    "quantity": {
                        "type": "integer",
                        "description": "Cantidad a comprar (por defecto 1)."
                    }
                },
                "required": ["product"]
            }),
        }
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext<'_>) -> ToolOutcome {
        let args: PaymentLinkArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => {
                return ToolOutcome::failed(
                    "Parámetros inválidos para create_payment_link",
                    e.to_string(),
                )
            }
        };

        // The model often passes the product name; normalize to a catalog id.
        let Some(product) = ctx.conversation.resolve_product(&args.product) else {
            return ToolOutcome::failed(
                format!("No se encontró el producto '{}'", args.product),
                "unknown product reference",
            );
        };

        if args.quantity == 0 {
            return ToolOutcome::failed(
                "La cantidad debe ser al menos 1",
                "quantity must be positive",
            );
        }

        let request = PaymentLinkRequest {
            tenant_id: ctx.conversation.tenant_id.clone(),
            lead_id: ctx.key.contact_id.to_string(),
            product_id: product.id.clone(),
            quantity: args.quantity,
        };

        match self.provider.create_payment_link(request).await {
            Ok(link) => ToolOutcome::ok_with_data(
                "Link de pago generado exitosamente",
                serde_json::json!({
                    "payment_url": link.payment_url,
                    "short_code": link.short_code,
                    "product_id": product.id,
                    "product_name": product.name,
                }),
            ),
            Err(error) => {
                tracing::warn!(%error, product = %product.id, "payment link creation failed");
                ToolOutcome::failed("Error al generar link de pago", error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::{ConversationContext, Product};
    use crate::ConversationKey;

    struct FakeProvider {
        fail: bool,
    }

    #[async_trait]
    impl PaymentProvider for FakeProvider {
        async fn create_payment_link(
            &self,
            request: PaymentLinkRequest,
        ) -> anyhow::Result<PaymentLink> {
            if self.fail {
                anyhow::bail!("gateway unavailable");
            }
            Ok(PaymentLink {
                payment_url: format!("https://pay.example.com/{}", request.product_id),
                short_code: Some("AB12".into()),
            })
        }
    }

    fn conversation() -> ConversationContext {
        let mut ctx = ConversationContext::new("t1", "Motores Lima");
        ctx.catalog = vec![Product {
            id: "moto-200".into(),
            name: "Moto urbana 200cc".into(),
            description: None,
            price: Some(4500.0),
            currency: "S/".into(),
            category: None,
            stock: Some(2),
            image_url: None,
        }];
        ctx
    }

    #[tokio::test]
    async fn resolves_product_name_before_calling_provider() {
        let conversation = conversation();
        let key = ConversationKey::new("t1", "+51999");
        let ctx = ToolContext { key: &key, conversation: &conversation };

        let tool = PaymentLinkTool::new(Arc::new(FakeProvider { fail: false }));
        let outcome = tool
            .execute(serde_json::json!({"product": "moto urbana"}), &ctx)
            .await;

        assert!(outcome.success);
        let data = outcome.data.expect("payment data");
        assert_eq!(data["payment_url"], "https://pay.example.com/moto-200");
    }

    #[tokio::test]
    async fn provider_failure_becomes_structured_outcome() {
        let conversation = conversation();
        let key = ConversationKey::new("t1", "+51999");
        let ctx = ToolContext { key: &key, conversation: &conversation };

        let tool = PaymentLinkTool::new(Arc::new(FakeProvider { fail: true }));
        let outcome = tool
            .execute(serde_json::json!({"product": "moto-200"}), &ctx)
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap_or("").contains("gateway unavailable"));
    }

    #[tokio::test]
    async fn unknown_product_reference_is_rejected() {
        let conversation = conversation();
        let key = ConversationKey::new("t1", "+51999");
        let ctx = ToolContext { key: &key, conversation: &conversation };

        let tool = PaymentLinkTool::new(Arc::new(FakeProvider { fail: false }));
        let outcome = tool
            .execute(serde_json::json!({"product": "lancha"}), &ctx)
            .await;

        assert!(!outcome.success);
        assert!(outcome.message.contains("lancha"));
    }
}
