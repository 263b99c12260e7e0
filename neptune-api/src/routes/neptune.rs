// Broker routes under /v1/neptune
use crate::app::AppState;
use crate::handlers::{instances, plans, tags};
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;

pub fn create_neptune_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/neptune/instance", post(instances::claim_instance))
        .route("/v1/neptune/instance/{name}", delete(instances::delete_instance))
        .route("/v1/neptune/url/{name}", get(instances::get_instance_url))
        .route("/v1/neptune/plans", get(plans::list_plans))
        .route("/v1/neptune/tag", post(tags::add_tag))
}
