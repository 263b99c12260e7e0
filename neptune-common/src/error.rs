use thiserror::Error;

/// Errors surfaced by broker operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Missing or unknown plan, empty billing code, malformed input.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No available instance for the plan; callers may retry later.
    #[error("no available instances for plan '{plan}'")]
    PoolExhausted { plan: String },

    #[error("instance '{0}' not found")]
    NotFound(String),

    /// The record exists but its endpoint or credential is not populated yet.
    #[error("instance '{0}' is not ready yet")]
    NotReady(String),

    /// The resource lifecycle or identity API failed.
    #[error("upstream call {operation} failed: {message}")]
    Upstream { operation: String, message: String },

    /// The primary effect of a multi-step operation happened but a later
    /// step did not. The primary effect is not rolled back.
    #[error("{operation} completed with failures in: {}", failed.join(", "))]
    PartialFailure {
        operation: String,
        completed: Vec<String>,
        failed: Vec<String>,
    },

    #[error("pool store error: {0}")]
    Store(String),
}

impl BrokerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BrokerError::Validation(msg.into())
    }

    pub fn upstream(operation: &str, err: impl std::fmt::Display) -> Self {
        BrokerError::Upstream {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        BrokerError::Store(err.to_string())
    }

    /// Whether the caller can reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::PoolExhausted { .. } | BrokerError::NotReady(_) | BrokerError::Upstream { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_lists_failed_steps() {
        let err = BrokerError::PartialFailure {
            operation: "claim".into(),
            completed: vec!["claim".into()],
            failed: vec!["tag_cluster".into(), "tag_instance".into()],
        };
        assert_eq!(
            err.to_string(),
            "claim completed with failures in: tag_cluster, tag_instance"
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(BrokerError::PoolExhausted { plan: "small".into() }.is_retryable());
        assert!(BrokerError::upstream("describe_instance", "throttled").is_retryable());
        assert!(!BrokerError::validation("plan required").is_retryable());
        assert!(!BrokerError::NotFound("x".into()).is_retryable());
    }
}
