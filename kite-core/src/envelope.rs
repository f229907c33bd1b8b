//! The Kite call envelope and inbound `Request` record (spec §4.4).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::auth::{Authenticated, Authenticator, Credential};
use crate::dnode::{ArgNode, CallbackFn, Partial, PathComponent};
use crate::error::{KiteError, Result, WireError};
use crate::identity::KiteIdentity;
use crate::peer::RpcPeer;

/// A blocking call's default timeout; a caller-supplied zero timeout means
/// "use this" (spec §4.4).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

/// What a registered method handler receives once authentication has
/// passed (spec §4.4).
pub struct Request {
    pub method: String,
    pub args: Partial,
    pub local_kite: KiteIdentity,
    pub remote_kite: Arc<RpcPeer>,
    pub username: String,
    pub authentication: Credential,
    pub remote_addr: Option<String>,
}

/// Build the envelope argument list for an outbound call: a single
/// positional object `{withArgs, kite, authentication, responseCallback}`
/// (spec §4.4). `response_callback` is invoked once with `(error, result)`.
pub fn wrap_call(with_args: Vec<ArgNode>, kite: &KiteIdentity, auth: &Credential, response_callback: CallbackFn) -> Result<Vec<ArgNode>> {
    let kite_value = serde_json::to_value(kite).map_err(|e| KiteError::Argument(e.to_string()))?;
    let auth_value = serde_json::to_value(auth).map_err(|e| KiteError::Argument(e.to_string()))?;
    Ok(vec![ArgNode::Map(vec![
        ("withArgs".to_string(), ArgNode::List(with_args)),
        ("kite".to_string(), ArgNode::from(kite_value)),
        ("authentication".to_string(), ArgNode::from(auth_value)),
        ("responseCallback".to_string(), ArgNode::Function(response_callback)),
    ])])
}

/// The path a response callback always occupies within the envelope (spec
/// §4.3 "Callback removal").
fn response_callback_path() -> [PathComponent; 2] {
    [PathComponent::Index(0), PathComponent::Key("responseCallback".to_string())]
}

/// Make an outbound envelope call and await its response, honoring the
/// effective timeout (spec §4.3, §4.4). On timeout the registered response
/// callback is removed from the peer's outbound table.
pub async fn call_with_response(
    peer: &Arc<RpcPeer>,
    method: impl Into<String>,
    with_args: Vec<ArgNode>,
    kite: &KiteIdentity,
    auth: &Credential,
    timeout: Option<Duration>,
) -> Result<Value> {
    let (tx, rx) = oneshot::channel::<std::result::Result<Value, WireError>>();
    let tx = Arc::new(Mutex::new(Some(tx)));

    let response_cb: CallbackFn = {
        let tx = Arc::clone(&tx);
        Arc::new(move |args: Vec<Value>| {
            let Some(tx) = tx.lock().unwrap().take() else { return };
            let error = args.first().cloned().unwrap_or(Value::Null);
            let result = args.get(1).cloned().unwrap_or(Value::Null);
            let resolved = if error.is_null() {
                Ok(result)
            } else {
                Err(serde_json::from_value::<WireError>(error.clone()).unwrap_or_else(|_| WireError {
                    r#type: "invalidResponse".to_string(),
                    message: error.to_string(),
                }))
            };
            let _ = tx.send(resolved);
        })
    };

    let envelope_args = wrap_call(with_args, kite, auth, response_cb)?;
    let outgoing = peer.call(method, envelope_args).await?;
    let response_path = response_callback_path();
    let response_id = outgoing.iter().find(|(_, path)| path.as_slice() == response_path).map(|(id, _)| *id);

    let effective_timeout = match timeout {
        Some(d) if !d.is_zero() => d,
        _ => DEFAULT_TIMEOUT,
    };

    let outcome = match tokio::time::timeout(effective_timeout, rx).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(wire))) => Err(KiteError::from(wire)),
        Ok(Err(_dropped)) => Err(KiteError::Disconnect),
        Err(_elapsed) => Err(KiteError::Timeout),
    };

    if let Some(id) = response_id {
        peer.remove_callback(id);
    }

    outcome
}

/// Parse an inbound envelope `Partial` (a single positional argument
/// `{withArgs, kite, authentication, responseCallback}`) into its pieces,
/// run authentication, and build the `Request` a handler sees (spec §4.4).
///
/// `skip_auth` lets a method opt out of authentication individually, per
/// spec §4.4.
pub fn build_request(
    method: String,
    envelope: Partial,
    local_kite: KiteIdentity,
    remote_kite: Arc<RpcPeer>,
    remote_addr: Option<String>,
    authenticator: &Authenticator,
    skip_auth: bool,
) -> Result<(Request, CallbackFn)> {
    let with_args = envelope
        .field("withArgs")
        .ok_or_else(|| KiteError::Argument("envelope missing withArgs".to_string()))?;

    let auth_partial = envelope
        .field("authentication")
        .ok_or_else(|| KiteError::Argument("envelope missing authentication".to_string()))?;
    let authentication: Credential = serde_json::from_value(auth_partial.raw().clone()).map_err(|e| KiteError::Argument(e.to_string()))?;

    let response_callback = envelope
        .field("responseCallback")
        .and_then(|p| p.as_function())
        .ok_or_else(|| KiteError::Argument("envelope missing responseCallback".to_string()))?;
    let response_fn: CallbackFn = Arc::new(move |args| {
        let _ = response_callback.call(args.into_iter().map(ArgNode::from).collect());
    });

    let Authenticated { username } = if skip_auth {
        Authenticated { username: String::new() }
    } else {
        authenticator.validate(&authentication)?
    };

    Ok((
        Request {
            method,
            args: with_args,
            local_kite,
            remote_kite,
            username,
            authentication,
            remote_addr,
        },
        response_fn,
    ))
}

/// Invoke `response_callback` exactly once with the handler's outcome (spec
/// §4.4 "Response"): `(null, result)` on success, `({type, message}, null)`
/// on error.
pub fn respond(response_callback: &CallbackFn, outcome: Result<Value>) {
    let args = match outcome {
        Ok(value) => vec![Value::Null, value],
        Err(e) => vec![serde_json::to_value(e.to_wire()).unwrap_or(Value::Null), Value::Null],
    };
    response_callback(args);
}

/// Schedules renewal of a `token`-kind credential 30 s before its expiry,
/// retrying every 10 s on failure, and accepting an externally-triggered
/// renew signal debounced to at most once per second (spec §4.4 "Token
/// renewal") — the reaction to an inbound `authenticationError`.
///
/// Writes renewed credentials into the caller-supplied `credential` cell
/// rather than owning a private copy, so a client that already keeps its
/// active credential behind a shared lock (e.g. `KontrolClient`) can hand
/// that same cell in and read it back without a second source of truth.
pub struct TokenRenewer {
    renew_signal: tokio::sync::mpsc::UnboundedSender<()>,
}

impl TokenRenewer {
    /// `renew` performs one `kontrol.getToken`-style round trip and returns
    /// the replacement credential; the caller supplies it so this module
    /// doesn't need to depend on the kontrol client directly.
    pub fn start<F, Fut>(credential: Arc<tokio::sync::Mutex<Credential>>, renew: F) -> Arc<TokenRenewer>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Credential>> + Send,
    {
        let (renew_tx, mut renew_rx) = tokio::sync::mpsc::unbounded_channel::<()>();

        tokio::spawn(async move {
            let mut last_signal: Option<tokio::time::Instant> = None;
            loop {
                let sleep_for = {
                    let guard = credential.lock().await;
                    match guard.renew_at() {
                        Some(at) => (at - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO),
                        None => Duration::from_secs(3600),
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    signal = renew_rx.recv() => {
                        if signal.is_none() {
                            return;
                        }
                        let now = tokio::time::Instant::now();
                        if let Some(prev) = last_signal {
                            if now.duration_since(prev) < Duration::from_secs(1) {
                                continue;
                            }
                        }
                        last_signal = Some(now);
                    }
                }

                loop {
                    match renew().await {
                        Ok(new_cred) => {
                            *credential.lock().await = new_cred;
                            break;
                        }
                        Err(e) => {
                            tracing::warn!("token renewal failed, retrying in 10s: {e}");
                            tokio::time::sleep(Duration::from_secs(10)).await;
                        }
                    }
                }
            }
        });

        Arc::new(TokenRenewer { renew_signal: renew_tx })
    }

    /// Debounced immediate-renew trigger (spec §4.4: fired on inbound
    /// `authenticationError`).
    pub fn signal_renew(&self) {
        let _ = self.renew_signal.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnode::{decode, serialize, CallbackSender};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct RecordingSender(std::sync::Mutex<Vec<(u64, Vec<ArgNode>)>>);
    impl CallbackSender for RecordingSender {
        fn invoke(&self, id: u64, args: Vec<ArgNode>) -> Result<()> {
            self.0.lock().unwrap().push((id, args));
            Ok(())
        }
    }

    #[test]
    fn wrap_call_places_response_callback_at_expected_path() {
        use crate::dnode::MethodId;
        let counter = AtomicU64::new(0);
        let kite = KiteIdentity::new("alice", "prod", "square", "1.0.0", "us-east", "host-1", "ws://x").unwrap();
        let auth = Credential::kite_key("sometoken");
        let noop: CallbackFn = Arc::new(|_| {});

        let args = wrap_call(vec![ArgNode::from(3i64)], &kite, &auth, noop).unwrap();
        let (message, pending) = crate::dnode::encode(MethodId::Name("square".into()), args, &mut || counter.fetch_add(1, Ordering::SeqCst));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].path, response_callback_path().to_vec());

        let wire = serialize(&message).unwrap();
        let sender: Arc<dyn CallbackSender> = Arc::new(RecordingSender(std::sync::Mutex::new(vec![])));
        let (_method, partial) = decode(&wire, Some(sender)).unwrap();
        let with_args = partial.index(0).unwrap().field("withArgs").unwrap();
        assert_eq!(with_args.index(0).unwrap().as_i64().unwrap(), 3);
    }
}
