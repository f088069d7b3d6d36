//! Appointment scheduling tools: availability check and booking.

use crate::llm::ToolDefinition;
use crate::tools::{Tool, ToolContext, ToolOutcome};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

/// A booked appointment as the collaborator reports it.
#[derive(Debug, Clone)]
pub struct Appointment {
    pub appointment_id: String,
    pub starts_at: String,
}

/// Scheduling collaborator seam. Conflict logic lives on the other side.
#[async_trait]
pub trait SchedulingProvider: Send + Sync {
    /// Free slots for a date, as displayable strings (e.g. "10:30").
    async fn check_availability(&self, tenant_id: &str, date: &str) -> anyhow::Result<Vec<String>>;

    async fn create_appointment(
        &self,
        tenant_id: &str,
        lead_id: &str,
        starts_at: &str,
        notes: Option<&str>,
    ) -> anyhow::Result<Appointment>;
}

/// Scheduling provider backed by the core API gateway.
pub struct HttpSchedulingProvider {
    http: reqwest::Client,
    base_url: String,
    internal_secret: Option<String>,
}

impl HttpSchedulingProvider {
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

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let endpoint = format!("{}{path}", self.base_url.trim_end_matches('/'));
        let mut builder = self
            .http
            .post(endpoint)
            .header("content-type", "application/json");
        if let Some(secret) = &self.internal_secret {
            builder = builder.header("x-internal-secret", secret);
        }
        builder
    }
}

#[async_trait]
impl SchedulingProvider for HttpSchedulingProvider {
    async fn check_availability(&self, tenant_id: &str, date: &str) -> anyhow::Result<Vec<String>> {
        let response = self
            .request("/appointments/availability")
            .json(&serde_json::json!({"businessId": tenant_id, "date": date}))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        if !status.is_success() {
            let reason = body["error"].as_str().unwrap_or("unknown error");
            anyhow::bail!("scheduling gateway error ({status}): {reason}");
        }

        Ok(body["slots"]
            .as_array()
            .map(|slots| {
                slots
                    .iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_appointment(
        &self,
        tenant_id: &str,
        lead_id: &str,
        starts_at: &str,
        notes: Option<&str>,
    ) -> anyhow::Result<Appointment> {
        let response = self
            .request("/appointments/create")
            .json(&serde_json::json!({
                "businessId": tenant_id,
                "leadId": lead_id,
                "startsAt": starts_at,
                "notes": notes,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        if !status.is_success() {
            let reason = body["error"].as_str().unwrap_or("unknown error");
            anyhow::bail!("scheduling gateway error ({status}): {reason}");
        }

        Ok(Appointment {
            appointment_id: body["appointmentId"].as_str().unwrap_or_default().to_string(),
            starts_at: body["startsAt"].as_str().unwrap_or(starts_at).to_string(),
        })
    }
}

/// Arguments for the availability check.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CheckAvailabilityArgs {
    /// Date to check, ISO format (YYYY-MM-DD).
    pub date: String,
}

/// Lists free slots for a requested date.
pub struct CheckAvailabilityTool {
    provider: Arc<dyn SchedulingProvider>,
}

impl CheckAvailabilityTool {
    pub fn new(provider: Arc<dyn SchedulingProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for CheckAvailabilityTool {
    fn name(&self) -> &str {
        "check_availability"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "check_availability".into(),
            description: "Consulta los horarios disponibles para una fecha. Úsala antes de \
                          agendar una cita."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "date": {
                        "type": "string",
                        "description": "Fecha a consultar en formato YYYY-MM-DD."
                    }
                },
                "required": ["date"]
            }),
        }
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext<'_>) -> ToolOutcome {
        let args: CheckAvailabilityArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => {
                return ToolOutcome::failed(
                    "Parámetros inválidos para check_availability",
                    e.to_string(),
                )
            }
        };

        if chrono::NaiveDate::parse_from_str(&args.date, "%Y-%m-%d").is_err() {
            return ToolOutcome::failed(
                format!("Fecha inválida: '{}'", args.date),
                "date must be YYYY-MM-DD",
            );
        }

        match self
            .provider
            .check_availability(&ctx.conversation.tenant_id, &args.date)
            .await
        {
            Ok(slots) if slots.is_empty() => ToolOutcome::ok(format!(
                "No hay horarios disponibles para el {}",
                args.date
            )),
            Ok(slots) => ToolOutcome::ok_with_data(
                format!("Horarios disponibles para el {}", args.date),
                serde_json::json!({ "slots": slots }),
            ),
            Err(error) => {
                tracing::warn!(%error, date = %args.date, "availability check failed");
                ToolOutcome::failed("Error al consultar disponibilidad", error.to_string())
            }
        }
    }
}

/// Arguments for appointment creation.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateAppointmentArgs {
    /// Start of the appointment, ISO format (YYYY-MM-DDTHH:MM).
    pub starts_at: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Books an appointment for the lead.
pub struct CreateAppointmentTool {
    provider: Arc<dyn SchedulingProvider>,
}

impl CreateAppointmentTool {
    pub fn new(provider: Arc<dyn SchedulingProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for CreateAppointmentTool {
    fn name(&self) -> &str {
        "create_appointment"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_appointment".into(),
            description: "Agenda una cita para el cliente en el horario indicado. Confirma \
                          primero la disponibilidad con check_availability."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "starts_at": {
                        "type": "string",
                        "description": "Inicio de la cita en formato YYYY-MM-DDTHH:MM."
                    },
                    "notes": {
                        "type": "string",
                        "description": "Notas opcionales (motivo de la cita, preferencias)."
                    }
                },
                "required": ["starts_at"]
            }),
        }
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext<'_>) -> ToolOutcome {
        let args: CreateAppointmentArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => {
                return ToolOutcome::failed(
                    "Parámetros inválidos para create_appointment",
                    e.to_string(),
                )
            }
        };

        if chrono::NaiveDateTime::parse_from_str(&args.starts_at, "%Y-%m-%dT%H:%M").is_err() {
            return ToolOutcome::failed(
                format!("Horario inválido: '{}'", args.starts_at),
                "starts_at must be YYYY-MM-DDTHH:MM",
            );
        }

        match self
            .provider
            .create_appointment(
                &ctx.conversation.tenant_id,
                ctx.key.contact_id.as_ref(),
                &args.starts_at,
                args.notes.as_deref(),
            )
            .await
        {
            Ok(appointment) => ToolOutcome::ok_with_data(
                format!("Cita agendada para el {}", appointment.starts_at),
                serde_json::json!({
                    "appointment_id": appointment.appointment_id,
                    "starts_at": appointment.starts_at,
                }),
            ),
            Err(error) => {
                tracing::warn!(%error, starts_at = %args.starts_at, "appointment creation failed");
                ToolOutcome::failed("Error al agendar la cita", error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::ConversationContext;
    use crate::ConversationKey;

    struct FakeScheduling;

    #[async_trait]
    impl SchedulingProvider for FakeScheduling {
        async fn check_availability(
            &self,
            _tenant_id: &str,
            _date: &str,
        ) -> anyhow::Result<Vec<String>> {
            Ok(vec!["10:00".into(), "11:30".into()])
        }

        async fn create_appointment(
            &self,
            _tenant_id: &str,
            lead_id: &str,
            starts_at: &str,
            _notes: Option<&str>,
        ) -> anyhow::Result<Appointment> {
            Ok(Appointment {
                appointment_id: format!("apt-{lead_id}"),
                starts_at: starts_at.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn availability_lists_slots_in_outcome() {
        let conversation = ConversationContext::new("t1", "Clínica Sonríe");
        let key = ConversationKey::new("t1", "+51988");
        let ctx = ToolContext { key: &key, conversation: &conversation };

        let tool = CheckAvailabilityTool::new(Arc::new(FakeScheduling));
        let outcome = tool
            .execute(serde_json::json!({"date": "2026-08-10"}), &ctx)
            .await;

        assert!(outcome.success);
        assert!(outcome.llm_content().contains("10:00"));
    }

    #[tokio::test]
    async fn malformed_date_is_rejected_before_the_provider_call() {
        let conversation = ConversationContext::new("t1", "Clínica Sonríe");
        let key = ConversationKey::new("t1", "+51988");
        let ctx = ToolContext { key: &key, conversation: &conversation };

        let tool = CheckAvailabilityTool::new(Arc::new(FakeScheduling));
        let outcome = tool
            .execute(serde_json::json!({"date": "mañana"}), &ctx)
            .await;

        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn booking_uses_the_contact_as_lead() {
        let conversation = ConversationContext::new("t1", "Clínica Sonríe");
        let key = ConversationKey::new("t1", "+51988");
        let ctx = ToolContext { key: &key, conversation: &conversation };

        let tool = CreateAppointmentTool::new(Arc::new(FakeScheduling));
        let outcome = tool
            .execute(serde_json::json!({"starts_at": "2026-08-10T10:00"}), &ctx)
            .await;

        assert!(outcome.success);
        let data = outcome.data.expect("appointment data");
        assert_eq!(data["appointment_id"], "apt-+51988");
    }
}
