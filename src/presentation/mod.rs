// Presentation layer - local HTTP API for dashboard views
pub mod app_state;
pub mod handlers;
