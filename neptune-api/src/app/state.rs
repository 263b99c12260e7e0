use neptune_broker::Broker;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
}

impl AppState {
    pub fn new(broker: Broker) -> Arc<Self> {
        Arc::new(Self { broker })
    }
}
