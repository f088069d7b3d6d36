//! System-prompt composition.
//!
//! The prompt is an ordered list of optional sections, each produced by a
//! pure function returning `Some` only when the backing data exists, joined
//! with blank lines. Missing sections are omitted, never emitted empty.

use crate::engine::context::ConversationContext;
use chrono::{DateTime, Datelike, Timelike, Utc};

const DAYS_ES: [&str; 7] = [
    "Lunes", "Martes", "Miércoles", "Jueves", "Viernes", "Sábado", "Domingo",
];
const MONTHS_ES: [&str; 12] = [
    "Enero", "Febrero", "Marzo", "Abril", "Mayo", "Junio", "Julio", "Agosto", "Septiembre",
    "Octubre", "Noviembre", "Diciembre",
];

/// Compose the full system prompt for one engine run.
pub fn compose_system_prompt(
    ctx: &ConversationContext,
    now: DateTime<Utc>,
    catalog_inline_limit: usize,
) -> String {
    let sections = [
        Some(persona_section(ctx, now)),
        instructions_section(ctx),
        catalog_section(ctx, catalog_inline_limit),
        policies_section(ctx),
        lead_memory_section(ctx),
        pending_order_section(ctx),
        files_section(ctx),
        Some(guidelines_section()),
    ];

    sections
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn persona_section(ctx: &ConversationContext, now: DateTime<Utc>) -> String {
    format!(
        "Eres un asistente de ventas profesional para {}.\n\nFECHA Y HORA ACTUAL: {}",
        ctx.business_name,
        format_time_es(now, &ctx.timezone),
    )
}

fn instructions_section(ctx: &ConversationContext) -> Option<String> {
    let instructions = ctx.custom_instructions.as_deref()?.trim();
    if instructions.is_empty() {
        return None;
    }
    Some(format!("INSTRUCCIONES DEL NEGOCIO:\n{instructions}"))
}

fn catalog_section(ctx: &ConversationContext, inline_limit: usize) -> Option<String> {
    if ctx.catalog.is_empty() {
        return None;
    }

    if ctx.catalog.len() > inline_limit {
        return Some(format!(
            "CATÁLOGO: el negocio tiene {} productos. Usa la herramienta search_product \
             para buscar lo que el cliente necesita; no inventes productos.",
            ctx.catalog.len(),
        ));
    }

    let mut lines = Vec::with_capacity(ctx.catalog.len());
    for product in &ctx.catalog {
        let mut line = format!("- [ID:{}] {}", product.id, product.name);
        if let Some(price) = product.price {
            line.push_str(&format!(": {}{price}", product.currency));
        }
        if let Some(stock) = product.stock {
            line.push_str(&format!(" [Stock: {stock}]"));
        }
        if let Some(description) = &product.description {
            line.push_str(&format!(" — {description}"));
        }
        lines.push(line);
    }

    Some(format!(
        "PRODUCTOS DISPONIBLES ({} productos):\n{}",
        ctx.catalog.len(),
        lines.join("\n"),
    ))
}

fn policies_section(ctx: &ConversationContext) -> Option<String> {
    if ctx.policies.is_empty() {
        return None;
    }
    let lines: Vec<String> = ctx.policies.iter().map(|p| format!("- {p}")).collect();
    Some(format!("POLÍTICAS DEL NEGOCIO:\n{}", lines.join("\n")))
}

fn lead_memory_section(ctx: &ConversationContext) -> Option<String> {
    let lead = &ctx.lead;
    if lead.is_empty() {
        return None;
    }

    let mut lines = Vec::new();
    if let Some(stage) = &lead.stage {
        lines.push(format!("- Etapa actual: {stage}"));
    }
    if !lead.products_viewed.is_empty() {
        lines.push(format!("- Productos vistos: {}", lead.products_viewed.join(", ")));
    }
    if !lead.preferences.is_empty() {
        lines.push(format!("- Preferencias detectadas: {}", lead.preferences.join(", ")));
    }
    if !lead.objections.is_empty() {
        lines.push(format!("- Objeciones previas: {}", lead.objections.join(", ")));
    }

    Some(format!("MEMORIA DEL LEAD:\n{}", lines.join("\n")))
}

fn pending_order_section(ctx: &ConversationContext) -> Option<String> {
    let order = ctx.pending_order.as_ref()?;
    let product = order
        .product_name
        .as_deref()
        .map(|name| format!(" de {name}"))
        .unwrap_or_default();
    Some(format!(
        "PEDIDO PENDIENTE: el cliente tiene un pedido{product} (ref {}) en estado \"{}\". \
         Tenlo en cuenta antes de ofrecer algo nuevo.",
        order.order_id, order.status,
    ))
}

fn files_section(ctx: &ConversationContext) -> Option<String> {
    if ctx.files.is_empty() {
        return None;
    }
    let lines: Vec<String> = ctx
        .files
        .iter()
        .map(|f| match &f.description {
            Some(description) => format!("- {}: {description}", f.name),
            None => format!("- {}", f.name),
        })
        .collect();
    Some(format!(
        "ARCHIVOS DISPONIBLES (usa send_file para enviarlos):\n{}",
        lines.join("\n"),
    ))
}

fn guidelines_section() -> String {
    "DIRECTRICES:\n\
     - Responde de manera profesional pero amigable\n\
     - Sé conciso y directo\n\
     - Si no tienes información sobre algo, indícalo honestamente\n\
     - Ayuda al cliente a encontrar lo que necesita\n\
     - Usa emojis de forma moderada"
        .to_string()
}

/// Format a timestamp in the tenant's timezone, Spanish-facing. Unknown
/// timezones fall back to America/Lima.
fn format_time_es(now: DateTime<Utc>, timezone: &str) -> String {
    let tz: chrono_tz::Tz = timezone
        .parse()
        .unwrap_or(chrono_tz::America::Lima);
    let local = now.with_timezone(&tz);

    let day_name = DAYS_ES[local.weekday().num_days_from_monday() as usize];
    let month_name = MONTHS_ES[(local.month() - 1) as usize];

    format!(
        "{day_name} {} de {month_name} {}, {:02}:{:02}",
        local.day(),
        local.year(),
        local.hour(),
        local.minute(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::{FileResource, PendingOrder, Product};
    use chrono::TimeZone;

    fn base_context() -> ConversationContext {
        ConversationContext::new("t1", "Motores Lima")
    }

    fn product(id: &str, name: &str) -> Product {
        Product {
            id: id.into(),
            name: name.into(),
            description: None,
            price: Some(4500.0),
            currency: "S/".into(),
            category: None,
            stock: Some(2),
            image_url: None,
        }
    }

    #[test]
    fn minimal_context_has_persona_and_guidelines_only() {
        let prompt = compose_system_prompt(&base_context(), Utc::now(), 15);

        assert!(prompt.starts_with("Eres un asistente de ventas profesional para Motores Lima."));
        assert!(prompt.contains("DIRECTRICES:"));
        assert!(!prompt.contains("PRODUCTOS DISPONIBLES"));
        assert!(!prompt.contains("POLÍTICAS"));
        assert!(!prompt.contains("MEMORIA DEL LEAD"));
        // No section may render empty.
        assert!(!prompt.contains("\n\n\n"));
    }

    #[test]
    fn small_catalog_is_inlined_with_ids_and_stock() {
        let mut ctx = base_context();
        ctx.catalog = vec![product("moto-200", "Moto urbana 200cc")];

        let prompt = compose_system_prompt(&ctx, Utc::now(), 15);
        assert!(prompt.contains("- [ID:moto-200] Moto urbana 200cc: S/4500 [Stock: 2]"));
    }

    #[test]
    fn large_catalog_gets_search_instruction_instead() {
        let mut ctx = base_context();
        ctx.catalog = (0..20)
            .map(|i| product(&format!("p{i}"), &format!("Producto {i}")))
            .collect();

        let prompt = compose_system_prompt(&ctx, Utc::now(), 15);
        assert!(prompt.contains("search_product"));
        assert!(!prompt.contains("[ID:p0]"));
    }

    #[test]
    fn pending_order_and_lead_memory_render_when_present() {
        let mut ctx = base_context();
        ctx.pending_order = Some(PendingOrder {
            order_id: "ord-9".into(),
            status: "esperando comprobante de pago".into(),
            product_name: Some("Moto urbana 200cc".into()),
        });
        ctx.lead.stage = Some("interesado".into());
        ctx.lead.products_viewed = vec!["Moto urbana 200cc".into()];

        let prompt = compose_system_prompt(&ctx, Utc::now(), 15);
        assert!(prompt.contains("PEDIDO PENDIENTE"));
        assert!(prompt.contains("esperando comprobante de pago"));
        assert!(prompt.contains("- Etapa actual: interesado"));
    }

    #[test]
    fn files_section_lists_library() {
        let mut ctx = base_context();
        ctx.files = vec![FileResource {
            name: "catalogo.pdf".into(),
            url: "https://cdn.example.com/catalogo.pdf".into(),
            description: Some("Catálogo completo".into()),
        }];

        let prompt = compose_system_prompt(&ctx, Utc::now(), 15);
        assert!(prompt.contains("- catalogo.pdf: Catálogo completo"));
    }

    #[test]
    fn time_is_rendered_in_tenant_timezone_spanish() {
        // 2026-08-06 15:30 UTC is 10:30 in Lima (UTC-5), a Thursday.
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 15, 30, 0).unwrap();
        let rendered = format_time_es(now, "America/Lima");
        assert_eq!(rendered, "Jueves 6 de Agosto 2026, 10:30");

        // Garbage timezone falls back to Lima.
        assert_eq!(format_time_es(now, "Marte/Colonia"), rendered);
    }
}
