//! kite-proxy's three websocket endpoints (spec §4.7): `/kite` (a private
//! kite's own RPC connection, used for `register`), `/proxy` (external
//! tunnel entry), and `/tunnel` (the private kite's tunnel leg).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use kite_core::auth::{Authenticator, Credential};
use kite_core::dnode::{ArgNode, Partial};
use kite_core::envelope::{self, Request, DEFAULT_TIMEOUT};
use kite_core::peer::{Concurrency, MethodHandler, RpcPeer};
use kite_core::transport::Session;
use kite_core::KiteError;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::axum_transport::{AxumSink, AxumStream};
use crate::state::{AppState, PendingTunnel};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/kite", get(kite_ws_handler))
        .route("/proxy", get(proxy_entry_handler))
        .route("/tunnel", get(tunnel_leg_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

// ── /kite: the private kite's own RPC connection ──────────────────────────

async fn kite_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_kite_socket(socket, state))
}

async fn handle_kite_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sink, stream) = socket.split();
    let session = Session::from_accepted(Box::new(AxumSink(sink)), Box::new(AxumStream(stream)));
    let peer = RpcPeer::new(session, Concurrency::Parallel);
    peer.register_handler("register", envelope_handler(Arc::clone(&state), "register", handle_register));
    let peer = Arc::new(peer);
    peer.start();
    info!("private kite connected");
}

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

/// Registers the caller's RPC peer handle under its own identity so `/proxy`
/// can find it later, and hands back its public tunnel URL (spec §4.7
/// "Accepts register from a private kite ... returns the URL").
async fn handle_register(state: Arc<AppState>, req: Request) -> kite_core::Result<Value> {
    let identity: kite_core::KiteIdentity = req
        .args
        .index(0)
        .ok_or_else(|| KiteError::Argument("register missing identity".into()))
        .and_then(|p| serde_json::from_value(p.raw().clone()).map_err(|e| KiteError::Argument(e.to_string())))?;

    let id = identity.id.to_string();
    state.registrations.insert(id.clone(), req.remote_kite);
    info!(kite_id = %id, "private kite registered with proxy");

    Ok(serde_json::json!({ "url": state.public_tunnel_url(&id) }))
}

// ── /proxy: external tunnel entry ──────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct ProxyQuery {
    #[serde(rename = "kiteID")]
    kite_id: String,
}

async fn proxy_entry_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ProxyQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(peer) = state.registrations.get(&query.kite_id).map(|p| p.clone()) else {
        warn!(kite_id = %query.kite_id, "proxy entry for unregistered kite");
        return axum::http::StatusCode::NOT_FOUND.into_response();
    };
    ws.on_upgrade(move |socket| handle_external_entry(socket, state, query.kite_id, peer)).into_response()
}

/// Allocate a tunnel, ask the private kite to dial back, and pair the two
/// sockets once it does (spec §4.7 steps ii–iv, "A tunnel not paired within
/// one minute of start is abandoned").
async fn handle_external_entry(external: WebSocket, state: Arc<AppState>, kite_id: String, peer: Arc<RpcPeer>) {
    let seq = state.next_seq();
    let token = match state.issuer.issue(&kite_id, seq) {
        Ok(t) => t,
        Err(e) => {
            warn!("tunnel token mint failed: {e}");
            return;
        }
    };
    let url = state.tunnel_leg_url(&token);

    let (deliver, arrival) = oneshot::channel();
    state.pending_tunnels.insert(seq, PendingTunnel { kite_id: kite_id.clone(), deliver });

    let call_args = vec![ArgNode::Map(vec![("url".to_string(), ArgNode::from(url))])];
    let credential = Credential::kite_key(state.identity.id.to_string());
    if let Err(e) = envelope::call_with_response(&peer, "tunnel", call_args, &state.identity, &credential, Some(DEFAULT_TIMEOUT)).await {
        warn!(kite_id = %kite_id, "tunnel call to private kite failed: {e}");
        state.pending_tunnels.remove(&seq);
        return;
    }

    let timeout = Duration::from_secs(state.config.pairing_timeout_secs);
    match tokio::time::timeout(timeout, arrival).await {
        Ok(Ok(private)) => {
            info!(kite_id = %kite_id, seq, "tunnel paired");
            stitch(external, private).await;
        }
        _ => {
            state.pending_tunnels.remove(&seq);
            warn!(kite_id = %kite_id, seq, "tunnel abandoned: no pairing within the timeout");
        }
    }
}

// ── /tunnel: the private kite's tunnel leg ─────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct TunnelQuery {
    token: String,
}

async fn tunnel_leg_handler(ws: WebSocketUpgrade, Query(query): Query<TunnelQuery>, State(state): State<Arc<AppState>>) -> Response {
    let claims = match state.issuer.decode(&query.token) {
        Ok(c) => c,
        Err(e) => {
            warn!("tunnel leg presented an invalid token: {e}");
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let Some((_, pending)) = state.pending_tunnels.remove(&claims.seq) else {
        warn!(seq = claims.seq, "tunnel leg for an unknown or already-paired tunnel");
        return axum::http::StatusCode::GONE.into_response();
    };
    if pending.kite_id != claims.sub {
        warn!(seq = claims.seq, "tunnel leg token subject mismatch");
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| async move {
        let _ = pending.deliver.send(socket);
    })
    .into_response()
}

/// Copy frames between the two legs of a paired tunnel until either side
/// closes (spec §4.7 "pairs the two websockets, and copies bytes between
/// them until either side closes").
async fn stitch(a: WebSocket, b: WebSocket) {
    let (mut a_write, mut a_read) = a.split();
    let (mut b_write, mut b_read) = b.split();

    let a_to_b = async {
        while let Some(msg) = a_read.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(frame) => {
                    if b_write.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    };
    let b_to_a = async {
        while let Some(msg) = b_read.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(frame) => {
                    if a_write.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = a_to_b => {}
        _ = b_to_a => {}
    }
}
