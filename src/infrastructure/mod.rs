// Infrastructure layer - External dependencies and adapters
pub mod chunked_json;
pub mod config;
pub mod http_controller_api;
pub mod http_response;
pub mod plot_surface;
pub mod sockjs;
pub mod sockjs_transport;
