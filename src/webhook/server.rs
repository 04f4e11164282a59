//! Axum surface for the admission webhook.
//!
//! Body size and request time are bounded by tower-http layers so a slow or
//! oversized review cannot stall the store's write path.

use super::Admission;
use crate::config::WebhookConfig;
use crate::store::ResourceStore;
use anyhow::Result;
use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Builds the admission router with its body limit and timeout layers.
pub fn router(store: Arc<dyn ResourceStore>, config: &WebhookConfig) -> Router {
    Router::new()
        .route("/healthz", get(handle_health))
        .route("/validate", post(handle_validate))
        .route("/mutate", post(handle_mutate))
        .with_state(Admission::new(store))
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
}

/// Binds `host:port` from config and serves until `shutdown` fires.
pub async fn run_webhook(
    store: Arc<dyn ResourceStore>,
    config: &WebhookConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    run_webhook_with_listener(listener, store, config, shutdown).await
}

/// Serves on a pre-bound listener.
pub async fn run_webhook_with_listener(
    listener: tokio::net::TcpListener,
    store: Arc<dyn ResourceStore>,
    config: &WebhookConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, "Admission webhook listening");

    let app = router(store, config);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Admission webhook stopped");
    Ok(())
}

/// GET /healthz
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /validate
async fn handle_validate(
    State(admission): State<Admission>,
    body: Result<Json<AdmissionReview<DynamicObject>>, JsonRejection>,
) -> Response {
    let request = match unpack(body) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };
    let response = admission.review_validate(&request).await;
    Json(response.into_review()).into_response()
}

/// POST /mutate
async fn handle_mutate(
    State(admission): State<Admission>,
    body: Result<Json<AdmissionReview<DynamicObject>>, JsonRejection>,
) -> Response {
    let request = match unpack(body) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };
    let response = admission.review_mutate(&request).await;
    Json(response.into_review()).into_response()
}

fn unpack(
    body: Result<Json<AdmissionReview<DynamicObject>>, JsonRejection>,
) -> Result<AdmissionRequest<DynamicObject>, Response> {
    let Json(review) = body.map_err(|e| {
        tracing::warn!(error = %e, "Rejecting malformed admission review");
        bad_request(&e.body_text())
    })?;
    review.try_into().map_err(|e| {
        tracing::warn!(error = %e, "Rejecting admission review");
        bad_request(&format!("{e}"))
    })
}

fn bad_request(message: &str) -> Response {
    let body = serde_json::json!({ "error": message });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}
