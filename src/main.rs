// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::controller_api::ControllerApi;
use crate::application::registry::ControllerRegistry;
use crate::infrastructure::config::load_dashboard_config;
use crate::infrastructure::http_controller_api::HttpControllerApi;
use crate::infrastructure::plot_surface::PlotSurfaceFactory;
use crate::infrastructure::sockjs_transport::SockJsTransport;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    controller_chart, controller_state, health_check, list_controllers, send_command, stream_state,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = load_dashboard_config().context("Failed to load dashboard configuration")?;

    // Controller server adapters (infrastructure layer)
    let api: Arc<dyn ControllerApi> = Arc::new(HttpControllerApi::new(
        &config.controllers.base_url,
        config.request_timeout(),
    )?);
    let transport = Arc::new(SockJsTransport::new(config.request_timeout())?);

    // Session registry (application layer)
    let mut registry = ControllerRegistry::new(
        api.clone(),
        transport,
        Arc::new(PlotSurfaceFactory),
        config.session_config(),
    );
    match registry.discover().await {
        Ok(ids) => tracing::info!(?ids, "controllers discovered"),
        Err(e) => tracing::warn!(error = %format!("{e:#}"), "initial controller discovery failed"),
    }
    let state = Arc::new(AppState::new(registry));

    let refresher = tokio::spawn(refresh_controllers(
        state.registry.clone(),
        api,
        config.refresh_interval(),
    ));

    // Build router (presentation layer)
    // Note: JSON responses are compressed in the response builders, so no
    // CompressionLayer here
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/controllers", get(list_controllers))
        .route("/controllers/:id", get(controller_state))
        .route("/controllers/:id/chart", get(controller_chart))
        .route("/controllers/:id/command", post(send_command))
        .route("/controllers/:id/stream", get(stream_state))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    tracing::info!(%addr, base_url = %config.controllers.base_url, "starting brew dashboard");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresher.abort();
    state.registry.write().await.shutdown_all();
    Ok(())
}

/// Rediscover controllers periodically. The listing is fetched without
/// holding the registry lock.
async fn refresh_controllers(
    registry: Arc<RwLock<ControllerRegistry>>,
    api: Arc<dyn ControllerApi>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; discovery already ran at startup.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match api.list_controllers().await {
            Ok(listed) => {
                let ids = registry.write().await.reconcile(listed);
                tracing::debug!(?ids, "controller listing reconciled");
            }
            Err(e) => {
                tracing::warn!(
                    error = %format!("{e:#}"),
                    "controller discovery failed; will retry"
                );
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
