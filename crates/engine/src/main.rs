//! Botgate Engine - Main entry point.

use std::sync::Arc;

use axum::http::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use botgate_engine::api;
use botgate_engine::infrastructure::{
    clock::SystemClock, config::GatewayConfig, metrics::GatewayMetrics,
    simulation::HttpSimulationClient,
};
use botgate_engine::App;
use botgate_shared::intake::IDEMPOTENCY_HEADER;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root (the engine may run from `crates/engine`).
    load_dotenv_from_repo_root();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "botgate_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Botgate gateway");

    let config = GatewayConfig::from_env()?;
    if config.gateway_secret.is_none() {
        tracing::warn!("GATEWAY_SECRET is not set, event intake will refuse every request");
    }
    tracing::info!(
        simulation_url = %config.simulation_url,
        ack_timeout_ms = config.delivery.standard.timeout.as_millis() as u64,
        ack_max_retries = config.delivery.standard.max_retries,
        queue_max_size_per_level = config.queue_max_size_per_level,
        "Gateway configured"
    );

    let simulation = Arc::new(HttpSimulationClient::new(&config.simulation_url));
    let metrics = Arc::new(GatewayMetrics::new()?);
    let addr = config.bind_addr()?;

    let app = Arc::new(App::new(
        config,
        simulation,
        Arc::new(SystemClock::new()),
        metrics,
    ));

    let mut router = api::router(app.clone()).layer(TraceLayer::new_for_http());
    if let Some(cors) = build_cors_layer_from_env() {
        router = router.layer(cors);
    }

    // Start server
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(app))
        .await?;

    Ok(())
}

/// Resolves on ctrl-c after asking every bot socket to close.
async fn shutdown_signal(app: Arc<App>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    let connections = app.connections.len().await;
    tracing::info!(connections, "Shutting down, closing bot connections");
    app.connections.close_all().await;
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}

fn build_cors_layer_from_env() -> Option<CorsLayer> {
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())?;

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-gateway-secret"),
            HeaderName::from_static(IDEMPOTENCY_HEADER),
        ]);

    if allowed_origins == "*" {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| HeaderValue::from_str(s).ok())
            .collect();

        if origins.is_empty() {
            return None;
        }

        cors = cors.allow_origin(origins);
    }

    Some(cors)
}
