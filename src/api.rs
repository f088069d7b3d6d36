//! HTTP surface: the inbound-fragment endpoint and health check.

use crate::error::Error;
use crate::service::ChatService;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Debug, Deserialize)]
struct InboundRequest {
    tenant_id: String,
    contact_id: String,
    text: String,
    #[serde(default)]
    quiet_period_secs: Option<u64>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Start the HTTP server on the given address.
pub async fn start_http_server(
    bind: SocketAddr,
    service: Arc<ChatService>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/inbound", post(inbound))
        .layer(cors)
        .with_state(service);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "HTTP server exited with error");
        }
    });

    Ok(handle)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn inbound(
    State(service): State<Arc<ChatService>>,
    Json(request): Json<InboundRequest>,
) -> Response {
    match service
        .handle_inbound_fragment(
            &request.tenant_id,
            &request.contact_id,
            &request.text,
            request.quiet_period_secs,
        )
        .await
    {
        Ok(action) => Json(action).into_response(),
        Err(Error::Config(error)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: error.to_string() }),
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "inbound fragment handling failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: "internal error".into() }),
            )
                .into_response()
        }
    }
}
