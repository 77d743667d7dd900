// Application state for HTTP handlers
use crate::application::registry::ControllerRegistry;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RwLock<ControllerRegistry>>,
}

impl AppState {
    pub fn new(registry: ControllerRegistry) -> Self {
        Self {
            registry: Arc::new(RwLock::new(registry)),
        }
    }
}
