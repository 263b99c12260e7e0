// Application state and HTTP layers
pub mod state;

pub use state::AppState;

use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

/// Broker operations have no deadline of their own; this bounds them.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Create CORS layer with permissive settings
pub fn create_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn create_timeout() -> TimeoutLayer {
    TimeoutLayer::new(REQUEST_TIMEOUT)
}
