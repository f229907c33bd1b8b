//! kontrold — Kontrol registry server.
//!
//! Phase 1: websocket RPC endpoint + in-memory registry + RS256 tokens.
//! See SPEC_FULL.md §4.6 for the wire contract.

use std::time::Duration;

use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config = kontrold::Config::from_env();

    tracing_subscriber::fmt().with_env_filter(&config.log_level).with_target(true).init();

    info!("kontrold starting");
    info!(listen = %config.listen_addr, user = %config.kontrol_user, "config loaded");

    let state = kontrold::AppState::new(config.clone()).expect("failed to build kontrold state");
    info!(id = %state.identity.id, "kontrol identity assigned");

    // ── Background tasks ────────────────────────────────────
    spawn_eviction_sweep(std::sync::Arc::clone(&state));

    // ── Routes ──────────────────────────────────────────────
    let app = kontrold::server::router(std::sync::Arc::clone(&state)).layer(TraceLayer::new_for_http());

    // ── Bind & serve ────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await.expect("failed to bind");
    info!(addr = %config.listen_addr, "kontrold listening");
    axum::serve(listener, app).await.expect("server error");
}

/// Periodically evict entries whose heartbeat has lapsed by more than
/// `interval + grace` (spec §4.6's TTL eviction).
fn spawn_eviction_sweep(state: std::sync::Arc<kontrold::AppState>) {
    tokio::spawn(async move {
        let ttl = Duration::from_secs(state.config.heartbeat_interval_secs + state.config.heartbeat_grace_secs);
        let mut ticker = tokio::time::interval(Duration::from_secs(state.config.heartbeat_interval_secs.max(1)));
        loop {
            ticker.tick().await;
            state.registry.evict_stale(ttl);
        }
    });
}
