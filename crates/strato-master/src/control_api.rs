use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use serde::Deserialize;

use strato_common::GpuInfo;

use crate::registry::{NodeRegistry, RegistryError};

/// Cluster control listener: worker registration and heartbeats. Runs on
/// its own port so registration traffic cannot starve inference intake.
pub fn router(registry: Arc<NodeRegistry>) -> Router {
    Router::new()
        .route("/register", post(handle_register).fallback(method_not_allowed))
        .route("/heartbeat", post(handle_heartbeat).fallback(method_not_allowed))
        .with_state(registry)
}

async fn method_not_allowed() -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response()
}

#[derive(Debug, Deserialize)]
struct RegisterForm {
    #[serde(default)]
    node_id: String,
    #[serde(default)]
    ip: String,
    #[serde(default)]
    port: String,
}

async fn handle_register(
    State(registry): State<Arc<NodeRegistry>>,
    Form(form): Form<RegisterForm>,
) -> Response {
    if form.node_id.is_empty() || form.ip.is_empty() || form.port.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing parameters").into_response();
    }

    match registry.register(&form.node_id, &form.ip, &form.port).await {
        Ok(()) => (
            StatusCode::CREATED,
            format!("Node {} registered successfully", form.node_id),
        )
            .into_response(),
        Err(RegistryError::InvalidArgument) => {
            (StatusCode::BAD_REQUEST, "Missing parameters").into_response()
        }
        Err(e @ RegistryError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct HeartbeatParams {
    node_id: Option<String>,
}

async fn handle_heartbeat(
    State(registry): State<Arc<NodeRegistry>>,
    Query(params): Query<HeartbeatParams>,
    Json(gpus): Json<Vec<GpuInfo>>,
) -> Response {
    let node_id = match params.node_id.as_deref() {
        Some(id) if !id.is_empty() => id,
        _ => return (StatusCode::BAD_REQUEST, "Missing node ID").into_response(),
    };

    match registry.heartbeat(node_id, gpus).await {
        Ok(()) => (
            StatusCode::OK,
            format!("Heartbeat for node {node_id} updated"),
        )
            .into_response(),
        Err(e @ RegistryError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Err(RegistryError::InvalidArgument) => {
            (StatusCode::BAD_REQUEST, "Missing node ID").into_response()
        }
    }
}
