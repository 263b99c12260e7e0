use axum::{extract::State, Json};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::app::AppState;

/// Plan name to human-readable description.
#[utoipa::path(
    get,
    path = "/v1/neptune/plans",
    responses(
        (status = 200, description = "Offered plans", body = BTreeMap<String, String>)
    )
)]
pub async fn list_plans(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, String>> {
    Json(state.broker.plans().descriptions())
}
