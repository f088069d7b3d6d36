//! File/media lookup tool.
//!
//! Resolves a product image or a named file from the tenant's library and
//! returns its URL; the delivery pipeline later extracts it from the reply
//! text and sends it as real media.

use crate::llm::ToolDefinition;
use crate::tools::{Tool, ToolContext, ToolOutcome};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

/// Arguments for the file lookup.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendFileArgs {
    /// Catalog product whose image should be sent (id or name).
    #[serde(default)]
    pub product: Option<String>,
    /// Name of a file from the business library.
    #[serde(default)]
    pub file_name: Option<String>,
}

pub struct SendFileTool;

impl SendFileTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SendFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SendFileTool {
    fn name(&self) -> &str {
        "send_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "send_file".into(),
            description: "Obtiene la URL de una imagen de producto o de un archivo del negocio \
                          (catálogos, folletos). Incluye la URL devuelta en tu respuesta para \
                          que se envíe al cliente."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "product": {
                        "type": "string",
                        "description": "ID o nombre del producto cuya imagen se quiere enviar."
                    },
                    "file_name": {
                        "type": "string",
                        "description": "Nombre del archivo de la biblioteca del negocio."
                    }
                }
            }),
        }
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext<'_>) -> ToolOutcome {
        let args: SendFileArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => {
                return ToolOutcome::failed("Parámetros inválidos para send_file", e.to_string())
            }
        };

        if let Some(reference) = args.product.as_deref().filter(|r| !r.trim().is_empty()) {
            let Some(product) = ctx.conversation.resolve_product(reference) else {
                return ToolOutcome::failed(
                    format!("No se encontró el producto '{reference}'"),
                    "unknown product reference",
                );
            };
            return match &product.image_url {
                Some(url) => ToolOutcome::ok_with_data(
                    format!("Imagen del producto: {}", product.name),
                    serde_json::json!({
                        "media_url": url,
                        "media_type": "image",
                        "file_name": format!("{}.jpg", product.name),
                    }),
                ),
                None => ToolOutcome::failed(
                    format!("El producto '{}' no tiene imagen disponible", product.name),
                    "product has no image",
                ),
            };
        }

        if let Some(name) = args.file_name.as_deref().filter(|n| !n.trim().is_empty()) {
            let needle = name.to_lowercase();
            let found = ctx
                .conversation
                .files
                .iter()
                .find(|f| f.name.to_lowercase().contains(&needle));
            return match found {
                Some(file) => ToolOutcome::ok_with_data(
                    format!("Recurso encontrado: {}", file.name),
                    serde_json::json!({
                        "media_url": file.url,
                        "file_name": file.name,
                    }),
                ),
                None => ToolOutcome::failed(
                    format!("No se encontró el recurso '{name}'"),
                    "unknown file",
                ),
            };
        }

        ToolOutcome::failed(
            "Se requiere 'product' o 'file_name' para obtener un archivo",
            "missing product and file_name",
        )
    }
}
