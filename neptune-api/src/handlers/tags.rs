use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::{ApiError, ErrorResponse, MessageResponse};
use crate::app::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TagRequest {
    /// Instance name
    #[serde(default)]
    pub resource: String,
    /// Tag key
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[utoipa::path(
    post,
    path = "/v1/neptune/tag",
    request_body = TagRequest,
    responses(
        (status = 200, description = "Tag applied to cluster and instance", body = MessageResponse),
        (status = 400, description = "Missing field", body = ErrorResponse),
        (status = 404, description = "Unknown instance", body = ErrorResponse),
        (status = 502, description = "Provider rejected the tag", body = ErrorResponse)
    )
)]
pub async fn add_tag(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TagRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .broker
        .tag(&payload.resource, &payload.name, &payload.value)
        .await?;
    Ok(Json(MessageResponse::new("Tag added")))
}
