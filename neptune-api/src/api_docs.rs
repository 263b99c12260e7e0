use crate::handlers::{self, instances, plans, tags};
use neptune_common::{ConnectionInfo, InstanceState, Plan};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        instances::claim_instance,
        instances::delete_instance,
        instances::get_instance_url,
        plans::list_plans,
        tags::add_tag
    ),
    components(
        schemas(
            instances::ClaimRequest,
            tags::TagRequest,
            handlers::MessageResponse,
            handlers::ErrorResponse,
            ConnectionInfo,
            InstanceState,
            Plan
        )
    ),
    tags(
        (name = "neptune-broker", description = "Pre-provisioned Neptune instance broker")
    )
)]
pub struct ApiDoc;
