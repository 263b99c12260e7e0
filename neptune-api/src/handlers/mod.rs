// Handlers module - request handlers and the error mapping they share
pub mod instances;
pub mod plans;
pub mod tags;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use neptune_common::BrokerError;
use serde::{Deserialize, Serialize};

pub const POOL_EXHAUSTED_MESSAGE: &str = "No available instances. Try again in 10 minutes";
pub const NOT_READY_MESSAGE: &str = "Endpoint not available yet. Try again later";

/// `{"error": "..."}`
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// `{"Response": "..."}`
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MessageResponse {
    #[serde(rename = "Response")]
    pub response: String,
}

impl MessageResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            response: msg.into(),
        }
    }
}

/// Broker error on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub BrokerError);

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BrokerError::Validation(_) => StatusCode::BAD_REQUEST,
            BrokerError::NotFound(_) => StatusCode::NOT_FOUND,
            BrokerError::PoolExhausted { .. } | BrokerError::NotReady(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BrokerError::Upstream { .. } | BrokerError::PartialFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }
            BrokerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            BrokerError::PoolExhausted { .. } => POOL_EXHAUSTED_MESSAGE.to_string(),
            BrokerError::NotReady(_) => NOT_READY_MESSAGE.to_string(),
            // Internal details (ARNs, account ids, SQL) stay in the log.
            BrokerError::Upstream { operation, .. } => format!("upstream call {} failed", operation),
            BrokerError::Store(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.0, "request failed");
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_errors_map_to_status_codes() {
        let cases = [
            (BrokerError::validation("plan is required"), StatusCode::BAD_REQUEST),
            (BrokerError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (BrokerError::PoolExhausted { plan: "small".into() }, StatusCode::SERVICE_UNAVAILABLE),
            (BrokerError::NotReady("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (BrokerError::upstream("tag_cluster", "denied"), StatusCode::BAD_GATEWAY),
            (BrokerError::store("connection reset"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[tokio::test]
    async fn upstream_error_body_names_only_the_operation() {
        let err = BrokerError::upstream(
            "tag_cluster",
            "AddTagsToResource arn:aws:rds:us-west-2:123456789012:cluster:neptune-1a2b: AccessDenied",
        );
        let response = ApiError(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({"error": "upstream call tag_cluster failed"}));
        assert!(!String::from_utf8_lossy(&bytes).contains("123456789012"));
    }

    #[test]
    fn message_response_uses_capitalised_key() {
        let v = serde_json::to_value(MessageResponse::new("Tag added")).unwrap();
        assert_eq!(v, serde_json::json!({"Response": "Tag added"}));
    }
}
