use axum::{
    extract::{Path, State},
    Json,
};
use neptune_common::ConnectionInfo;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::{ApiError, ErrorResponse, MessageResponse};
use crate::app::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ClaimRequest {
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub billingcode: String,
}

#[utoipa::path(
    post,
    path = "/v1/neptune/instance",
    request_body = ClaimRequest,
    responses(
        (status = 200, description = "Instance claimed", body = ConnectionInfo),
        (status = 400, description = "Missing or unknown plan, or missing billing code", body = ErrorResponse),
        (status = 503, description = "Pool exhausted", body = ErrorResponse)
    )
)]
pub async fn claim_instance(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ClaimRequest>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let outcome = state
        .broker
        .claim(&payload.plan, &payload.billingcode)
        .await?;
    if let Some(warning) = &outcome.warning {
        tracing::warn!(name = %outcome.name, warning = %warning, "claim succeeded with warnings");
    }
    Ok(Json(outcome.connection))
}

#[utoipa::path(
    delete,
    path = "/v1/neptune/instance/{name}",
    params(("name" = String, Path, description = "Instance name")),
    responses(
        (status = 200, description = "Deletion submitted", body = MessageResponse),
        (status = 404, description = "Unknown instance", body = ErrorResponse)
    )
)]
pub async fn delete_instance(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let report = state.broker.delete(&name).await?;
    if !report.is_complete() {
        tracing::warn!(name = %name, failed = ?report.failed_steps(), "teardown queued for retry");
    }
    Ok(Json(MessageResponse::new("Instance deletion in progress")))
}

#[utoipa::path(
    get,
    path = "/v1/neptune/url/{name}",
    params(("name" = String, Path, description = "Instance name")),
    responses(
        (status = 200, description = "Connection details", body = ConnectionInfo),
        (status = 404, description = "Unknown instance", body = ErrorResponse),
        (status = 503, description = "Instance not ready yet", body = ErrorResponse)
    )
)]
pub async fn get_instance_url(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    Ok(Json(state.broker.lookup(&name).await?))
}
