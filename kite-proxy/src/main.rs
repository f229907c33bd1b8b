//! kite-proxy — reverse proxy for NAT-bound Kites.
//!
//! See SPEC_FULL.md §4.7 for the tunnel-pairing protocol.

use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config = kite_proxy::Config::from_env();

    tracing_subscriber::fmt().with_env_filter(&config.log_level).with_target(true).init();

    info!("kite-proxy starting");
    info!(listen = %config.listen_addr, public_host = %config.public_host, "config loaded");

    let state = kite_proxy::AppState::new(config.clone()).expect("failed to build kite-proxy state");
    info!(id = %state.identity.id, "proxy identity assigned");

    let app = kite_proxy::server::router(std::sync::Arc::clone(&state)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await.expect("failed to bind");
    info!(addr = %config.listen_addr, "kite-proxy listening");
    axum::serve(listener, app).await.expect("server error");
}
