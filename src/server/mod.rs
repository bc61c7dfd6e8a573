//! HTTP/WebSocket server exposing consultations to browser clients

mod auth;
mod events;
mod proxy;
pub mod routes;
pub mod state;

pub use auth::{generate_auth_token, AuthLayer};
pub use events::{EventBroadcaster, ServerEvent};
pub use proxy::{invoke_handler, ConsultationAccepted};
pub use state::ServerAppState;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue,
    },
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// How long in-flight consultations may keep running after shutdown
const RUN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Version information for the server
#[derive(serde::Serialize)]
struct VersionInfo {
    version: String,
    name: String,
}

fn cors_layer(cors_origins: Option<&[String]>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    match cors_origins {
        Some(origins) if !origins.is_empty() => {
            let allowed_origins: Vec<HeaderValue> =
                origins.iter().filter_map(|o| o.parse().ok()).collect();
            layer.allow_origin(allowed_origins)
        }
        // Permissive CORS (default for development)
        _ => layer.allow_origin(Any),
    }
}

/// Build the router with all routes and layers applied
pub fn build_router(state: ServerAppState, cors_origins: Option<&[String]>) -> Router {
    // Layer order: cors (outer) -> auth -> handler, so preflight requests
    // are answered before the auth check
    Router::new()
        .route("/api/invoke", post(proxy::invoke_handler))
        .route("/ws/sessions/:session_id", get(events::session_ws_handler))
        .route("/health", get(health_handler))
        .route("/api/version", get(version_handler))
        .layer(AuthLayer::new(state.auth_token.clone()))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// Run the HTTP/WebSocket server
pub async fn run_server(
    port: u16,
    bind: &str,
    state: ServerAppState,
    cors_origins: Option<Vec<String>>,
) -> Result<(), String> {
    let app = build_router(state.clone(), cors_origins.as_deref());

    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let cors_display = match &cors_origins {
        Some(origins) if !origins.is_empty() => origins.join(", "),
        _ => "*".to_string(),
    };

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                 Consult Agents Server Mode                   ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║                                                              ║");
    println!("║  Server URL: http://{}:{:<24} ║", bind, port);
    println!("║  Auth Token: {} ║", state.auth_token);
    println!("║  CORS Origins: {:<45} ║", cors_display);
    println!("║                                                              ║");
    println!("║  Endpoints:                                                  ║");
    println!("║    POST /api/invoke          - Command proxy                 ║");
    println!("║    GET  /api/version         - Server version info           ║");
    println!("║    GET  /ws/sessions/:id     - Session update stream         ║");
    println!("║    GET  /health              - Health check                  ║");
    println!("║                                                              ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    log::info!("Server listening on http://{}", addr);

    let shutdown_state = state.shutdown_state.clone();
    let shutdown_signal = async move {
        shutdown_state.wait().await;
        log::info!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| format!("Server error: {}", e))?;

    drain_active_runs(&state, RUN_DRAIN_TIMEOUT).await;
    Ok(())
}

/// Give spawned consultations a bounded window to finish their writes
async fn drain_active_runs(state: &ServerAppState, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let active = state.orchestrator.active_run_count();
        if active == 0 {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            log::warn!(
                "Stopping with {} consultation(s) still running; their sessions stay mid-workflow",
                active
            );
            return;
        }
        log::info!("Waiting for {} running consultation(s) to finish", active);
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Version endpoint
async fn version_handler() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
    })
}
