//! Kontrol's `/kite` RPC endpoint and the handlers for `register`,
//! `getKites`, `watchKites`, `getToken`, and `heartbeat` (spec §4.6).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use kite_core::auth::Authenticator;
use kite_core::dnode::{ArgNode, Partial};
use kite_core::envelope::{self, Request};
use kite_core::peer::{Concurrency, MethodHandler, RpcPeer};
use kite_core::transport::Session;
use kite_core::{KiteError, Query};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::axum_transport::{AxumSink, AxumStream};
use crate::registry::RegistryEvent;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/kite", get(ws_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: axum::extract::ws::WebSocket, state: Arc<AppState>) {
    let (sink, stream) = socket.split();
    let session = Session::from_accepted(Box::new(AxumSink(sink)), Box::new(AxumStream(stream)));
    let peer = RpcPeer::new(session, Concurrency::Parallel);

    peer.register_handler("register", envelope_handler(Arc::clone(&state), "register", handle_register));
    peer.register_handler("getKites", envelope_handler(Arc::clone(&state), "getKites", handle_get_kites));
    peer.register_handler("watchKites", envelope_handler(Arc::clone(&state), "watchKites", handle_watch_kites));
    peer.register_handler("getToken", envelope_handler(Arc::clone(&state), "getToken", handle_get_token));
    peer.register_handler("heartbeat", envelope_handler(Arc::clone(&state), "heartbeat", handle_heartbeat));

    let peer = Arc::new(peer);
    peer.start();
    info!("kite connected");
}

/// Wrap a plain `(state, Request) -> Result<Value>` handler into a
/// `MethodHandler`: decode the envelope, skip authentication (kontrol is
/// the trust root — validating a kite's own credential against kontrol's
/// own keys at registration time is circular, see DESIGN.md), run the
/// handler, and reply through the envelope's response callback exactly
/// once (spec §4.4).
fn envelope_handler<F, Fut>(state: Arc<AppState>, name: &'static str, f: F) -> MethodHandler
where
    F: Fn(Arc<AppState>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = kite_core::Result<Value>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |peer, partial: Partial| {
        let state = Arc::clone(&state);
        let f = Arc::clone(&f);
        Box::pin(async move {
            let authenticator = Authenticator {
                kontrol_public_key: None,
                trusted_issuer: None,
                local_kite_id: state.identity.id.to_string(),
                session_lookup: None,
            };
            match envelope::build_request(name.to_string(), partial, state.identity.clone(), peer, None, &authenticator, true) {
                Ok((request, response_cb)) => {
                    let outcome = f(state, request).await;
                    envelope::respond(&response_cb, outcome);
                }
                Err(e) => warn!("malformed {name} envelope: {e}"),
            }
        })
    })
}

async fn handle_register(state: Arc<AppState>, req: Request) -> kite_core::Result<Value> {
    let identity_partial = req.args.index(0).ok_or_else(|| KiteError::Argument("register missing identity".into()))?;
    let identity: kite_core::KiteIdentity = serde_json::from_value(identity_partial.raw().clone()).map_err(|e| KiteError::Argument(e.to_string()))?;
    let properties = req.args.index(1).map(|p| p.raw().clone()).unwrap_or(Value::Null);

    let url = identity.url.clone();
    state.registry.register(identity.clone(), url, properties);
    req.remote_kite.set_property("kiteId", Value::String(identity.id.to_string()));

    Ok(serde_json::json!({
        "result": "AllowKite",
        "username": identity.username,
        "interval": state.config.heartbeat_interval_secs,
    }))
}

async fn handle_get_kites(state: Arc<AppState>, req: Request) -> kite_core::Result<Value> {
    let query: Query = req
        .args
        .index(0)
        .ok_or_else(|| KiteError::Argument("getKites missing query".into()))
        .and_then(|p| serde_json::from_value(p.raw().clone()).map_err(|e| KiteError::Argument(e.to_string())))?;

    let mut out = Vec::new();
    for entry in state.registry.query(&query) {
        let (token, valid_until) = state
            .token_issuer
            .issue(&entry.identity.id.to_string())
            .map_err(|e| KiteError::Argument(e.to_string()))?;
        out.push(serde_json::json!({
            "kite": entry.identity,
            "url": entry.url,
            "token": token,
            "validUntil": valid_until,
        }));
    }
    Ok(Value::Array(out))
}

async fn handle_get_token(state: Arc<AppState>, req: Request) -> kite_core::Result<Value> {
    let identity: kite_core::KiteIdentity = req
        .args
        .index(0)
        .ok_or_else(|| KiteError::Argument("getToken missing kite".into()))
        .and_then(|p| serde_json::from_value(p.raw().clone()).map_err(|e| KiteError::Argument(e.to_string())))?;

    let (token, valid_until) = state
        .token_issuer
        .issue(&identity.id.to_string())
        .map_err(|e| KiteError::Argument(e.to_string()))?;
    Ok(serde_json::json!({ "token": token, "validUntil": valid_until }))
}

async fn handle_watch_kites(state: Arc<AppState>, req: Request) -> kite_core::Result<Value> {
    let query: Query = req
        .args
        .index(0)
        .ok_or_else(|| KiteError::Argument("watchKites missing query".into()))
        .and_then(|p| serde_json::from_value(p.raw().clone()).map_err(|e| KiteError::Argument(e.to_string())))?;
    let on_event = req
        .args
        .index(1)
        .and_then(|p| p.as_function())
        .ok_or_else(|| KiteError::Argument("watchKites missing onEvent callback".into()))?;

    let issuer_state = Arc::clone(&state);
    state.registry.watch(
        query,
        Arc::new(move |event| {
            let payload = match event {
                RegistryEvent::Register { identity, url } => match issuer_state.token_issuer.issue(&identity.id.to_string()) {
                    Ok((token, valid_until)) => serde_json::json!({
                        "action": "REGISTER",
                        "kite": identity,
                        "url": url,
                        "token": token,
                        "validUntil": valid_until,
                    }),
                    Err(e) => {
                        warn!("token issuance failed for watch fan-out: {e}");
                        return true;
                    }
                },
                RegistryEvent::Deregister { identity } => serde_json::json!({
                    "action": "DEREGISTER",
                    "kite": identity,
                }),
            };
            on_event.call(vec![ArgNode::from(payload)]).is_ok()
        }),
    );

    Ok(Value::Null)
}

/// The kite-side half of spec §4.6's heartbeat contract: `heartbeat(interval,
/// ping)`. Kontrol identifies which registry entry is heartbeating by the
/// `kiteId` property `register` stamped onto this connection's peer, not by
/// a wire argument — the spec's call shape carries no kite id. Kontrol
/// schedules a ticker that invokes `ping` every `interval` seconds and treats
/// each successful delivery as a fresh heartbeat, refreshing the registry
/// entry's TTL clock.
async fn handle_heartbeat(state: Arc<AppState>, req: Request) -> kite_core::Result<Value> {
    let kite_id: Uuid = req
        .remote_kite
        .property("kiteId")
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| KiteError::Argument("heartbeat called before register".into()))?;
    let interval_secs = req
        .args
        .index(0)
        .and_then(|p| p.as_i64().ok())
        .filter(|n| *n > 0)
        .unwrap_or(state.config.heartbeat_interval_secs as i64) as u64;
    let ping = req
        .args
        .index(1)
        .and_then(|p| p.as_function())
        .ok_or_else(|| KiteError::Argument("heartbeat missing ping callback".into()))?;

    if !state.registry.heartbeat(kite_id) {
        return Err(KiteError::Argument("heartbeat for unknown kite".into()));
    }

    let ticker_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await; // first tick fires immediately; the register() call already counted as live
        loop {
            ticker.tick().await;
            if ping.call(vec![]).is_err() {
                return;
            }
            if !ticker_state.registry.heartbeat(kite_id) {
                return;
            }
        }
    });

    Ok(serde_json::json!({ "interval": interval_secs }))
}
