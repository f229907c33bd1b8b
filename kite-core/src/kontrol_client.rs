//! Kontrol client (spec §4.5): the RPC-peer specialization every Kite
//! process embeds to talk to the registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, warn};

use crate::auth::Credential;
use crate::dnode::ArgNode;
use crate::envelope::{self, TokenRenewer, DEFAULT_TIMEOUT};
use crate::error::{KiteError, Result};
use crate::identity::{KiteIdentity, Query};
use crate::peer::RpcPeer;
use crate::transport::{Session, SessionEvent};

/// Outcome of a `register` call (spec §4.5): accepted with a possibly
/// corrected username/address, or rejected outright.
#[derive(Debug, Clone)]
pub enum RegisterOutcome {
    Allowed { username: String, public_ip: Option<String>, heartbeat_interval_secs: u64 },
    Rejected { reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "result")]
enum RegisterWire {
    AllowKite {
        username: String,
        #[serde(rename = "publicIP", default)]
        public_ip: Option<String>,
        #[serde(rename = "interval")]
        heartbeat_interval_secs: u64,
    },
    RejectKite {
        reason: String,
    },
}

/// A peer handle returned by `getKites`: ready to dial but not yet dialed
/// (spec §4.5).
#[derive(Debug, Clone)]
pub struct KiteHandle {
    pub identity: KiteIdentity,
    pub url: String,
    pub token: Credential,
}

/// One `{action, kite, url?, token?}` watch event (spec §4.5).
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Register { kite: KiteIdentity, url: String, token: Credential },
    Deregister { kite: KiteIdentity },
}

/// Wraps an RPC peer dialing the kontrol URL with auto-reconnect, gated
/// behind a "ready" signal for the first successful connection (spec
/// §4.5).
pub struct KontrolClient {
    peer: Arc<RpcPeer>,
    local_kite: KiteIdentity,
    credential: Arc<Mutex<Credential>>,
    renewer: Arc<TokenRenewer>,
    ready_rx: watch::Receiver<bool>,
}

impl KontrolClient {
    pub fn dial(kontrol_url: impl Into<String>, local_kite: KiteIdentity, credential: Credential) -> Arc<KontrolClient> {
        let session = Session::dial(kontrol_url, true);
        let peer = Arc::new(RpcPeer::new(session, crate::peer::Concurrency::Parallel));
        peer.start();

        let (ready_tx, ready_rx) = watch::channel(false);
        let mut events = peer.session().events();
        tokio::spawn(async move {
            loop {
                if events.changed().await.is_err() {
                    return;
                }
                if *events.borrow() == SessionEvent::Connected {
                    let _ = ready_tx.send(true);
                }
            }
        });

        let credential = Arc::new(Mutex::new(credential));
        let renewer = {
            let renew_credential = Arc::clone(&credential);
            let renew_peer = Arc::clone(&peer);
            let renew_kite = local_kite.clone();
            TokenRenewer::start(Arc::clone(&credential), move || {
                let credential = Arc::clone(&renew_credential);
                let peer = Arc::clone(&renew_peer);
                let kite = renew_kite.clone();
                async move {
                    let current = credential.lock().await.clone();
                    let args = vec![ArgNode::from(serde_json::to_value(&kite).map_err(|e| KiteError::Argument(e.to_string()))?)];
                    let reply = envelope::call_with_response(&peer, "getToken".to_string(), args, &kite, &current, Some(DEFAULT_TIMEOUT)).await?;
                    let wire: TokenWire = serde_json::from_value(reply).map_err(|e| KiteError::InvalidResponse(e.to_string()))?;
                    Ok(Credential::token(wire.token, wire.valid_until))
                }
            })
        };

        Arc::new(KontrolClient {
            peer,
            local_kite,
            credential,
            renewer,
            ready_rx,
        })
    }

    /// Block until the first successful kontrol connection (spec §4.5).
    pub async fn wait_ready(&self) {
        let mut rx = self.ready_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Runs every outbound call through the currently active credential,
    /// signaling the renewer for an immediate (debounced) renewal on an
    /// inbound `authenticationError` (spec §4.4).
    async fn call(&self, method: &str, args: Vec<ArgNode>) -> Result<Value> {
        self.wait_ready().await;
        let credential = self.credential.lock().await.clone();
        let result = envelope::call_with_response(&self.peer, method.to_string(), args, &self.local_kite, &credential, Some(DEFAULT_TIMEOUT)).await;
        if let Err(KiteError::AuthenticationError(_)) = &result {
            self.renewer.signal_renew();
        }
        result
    }

    /// `register()` (spec §4.5): asks kontrol to register the current
    /// identity with its serving URL. `AllowKite` copies the kontrol-assigned
    /// username (and public IP, if absent) back into the local identity.
    pub async fn register(&self, properties: Value) -> Result<RegisterOutcome> {
        let args = vec![
            ArgNode::from(serde_json::to_value(&self.local_kite).map_err(|e| KiteError::Argument(e.to_string()))?),
            ArgNode::from(properties),
        ];
        let reply = self.call("register", args).await?;
        let wire: RegisterWire = serde_json::from_value(reply).map_err(|e| KiteError::InvalidResponse(e.to_string()))?;
        Ok(match wire {
            RegisterWire::AllowKite { username, public_ip, heartbeat_interval_secs } => {
                RegisterOutcome::Allowed { username, public_ip, heartbeat_interval_secs }
            }
            RegisterWire::RejectKite { reason } => RegisterOutcome::Rejected { reason },
        })
    }

    /// `heartbeat(interval, ping)` (spec §4.6): called once per connection
    /// after a successful `register`. `ping` is invoked by kontrol on its own
    /// ticker for as long as the registry entry is considered live; this call
    /// itself just arms that ticker and returns once kontrol confirms it.
    async fn heartbeat(&self, interval_secs: u64) -> Result<()> {
        let ping: crate::dnode::CallbackFn = Arc::new(|_args| {});
        let credential = self.credential.lock().await.clone();
        let args = vec![ArgNode::from(interval_secs as i64), ArgNode::Function(ping)];
        envelope::call_with_response(&self.peer, "heartbeat".to_string(), args, &self.local_kite, &credential, Some(DEFAULT_TIMEOUT)).await?;
        Ok(())
    }

    /// `registerForever`: retries `register` on error and re-registers on
    /// every reconnect (spec §4.5), re-arming the heartbeat on every fresh
    /// `AllowKite` since a new connection means kontrol has forgotten the
    /// old one's ticker.
    pub fn register_forever(self: &Arc<Self>, properties: Value, mut shutdown: watch::Receiver<bool>) {
        let client = Arc::clone(self);
        let mut events = self.peer.session().events();
        tokio::spawn(async move {
            loop {
                match client.register(properties.clone()).await {
                    Ok(RegisterOutcome::Allowed { heartbeat_interval_secs, .. }) => {
                        if let Err(e) = client.heartbeat(heartbeat_interval_secs).await {
                            warn!("heartbeat arming failed: {e}");
                        }
                    }
                    Ok(RegisterOutcome::Rejected { reason }) => warn!("kontrol rejected registration: {reason}"),
                    Err(e) => warn!("register failed, will retry on reconnect: {e}"),
                }

                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { return; }
                    }
                    changed = events.changed() => {
                        if changed.is_err() { return; }
                        if *events.borrow() != SessionEvent::Connected { continue; }
                    }
                }
            }
        });
    }

    /// `getKites(query)` (spec §4.5): returns handles ready to dial but not
    /// yet dialed.
    pub async fn get_kites(&self, query: &Query) -> Result<Vec<KiteHandle>> {
        let args = vec![ArgNode::from(serde_json::to_value(query).map_err(|e| KiteError::Argument(e.to_string()))?)];
        let reply = self.call("getKites", args).await?;
        let wire: Vec<KiteHandleWire> = serde_json::from_value(reply).map_err(|e| KiteError::InvalidResponse(e.to_string()))?;
        Ok(wire.into_iter().map(KiteHandleWire::into_handle).collect())
    }

    /// `getToken(kite)` (spec §4.5): returns a fresh access token signed by
    /// kontrol.
    pub async fn get_token(&self, kite: &KiteIdentity) -> Result<Credential> {
        let args = vec![ArgNode::from(serde_json::to_value(kite).map_err(|e| KiteError::Argument(e.to_string()))?)];
        let reply = self.call("getToken", args).await?;
        let wire: TokenWire = serde_json::from_value(reply).map_err(|e| KiteError::InvalidResponse(e.to_string()))?;
        Ok(Credential::token(wire.token, wire.valid_until))
    }

    /// `watchKites(query, onEvent)` (spec §4.5): delivers a stream of watch
    /// events. The returned receiver closes when the peer disconnects.
    pub async fn watch_kites(&self, query: &Query) -> Result<mpsc::UnboundedReceiver<WatchEvent>> {
        self.wait_ready().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let closed_cb = Arc::clone(&closed);

        let on_event: crate::dnode::CallbackFn = Arc::new(move |args| {
            if closed_cb.load(Ordering::Relaxed) {
                return;
            }
            match args.into_iter().next().and_then(|v| serde_json::from_value::<WatchEventWire>(v).ok()) {
                Some(wire) => {
                    if tx.send(wire.into_event()).is_err() {
                        closed_cb.store(true, Ordering::Relaxed);
                    }
                }
                None => error!("malformed watchKites event"),
            }
        });

        let credential = self.credential.lock().await.clone();
        let args = vec![
            ArgNode::from(serde_json::to_value(query).map_err(|e| KiteError::Argument(e.to_string()))?),
            ArgNode::Function(on_event),
        ];
        envelope::call_with_response(&self.peer, "watchKites", args, &self.local_kite, &credential, Some(Duration::from_secs(30))).await?;
        Ok(rx)
    }

    pub fn peer(&self) -> &Arc<RpcPeer> {
        &self.peer
    }
}

#[derive(Debug, Deserialize)]
struct KiteHandleWire {
    kite: KiteIdentity,
    url: String,
    token: String,
    #[serde(rename = "validUntil")]
    valid_until: chrono::DateTime<chrono::Utc>,
}

impl KiteHandleWire {
    fn into_handle(self) -> KiteHandle {
        KiteHandle {
            identity: self.kite,
            url: self.url,
            token: Credential::token(self.token, self.valid_until),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenWire {
    token: String,
    #[serde(rename = "validUntil")]
    valid_until: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action")]
enum WatchEventWire {
    #[serde(rename = "REGISTER")]
    Register {
        kite: KiteIdentity,
        url: String,
        token: String,
        #[serde(rename = "validUntil")]
        valid_until: chrono::DateTime<chrono::Utc>,
    },
    #[serde(rename = "DEREGISTER")]
    Deregister { kite: KiteIdentity },
}

impl WatchEventWire {
    fn into_event(self) -> WatchEvent {
        match self {
            WatchEventWire::Register { kite, url, token, valid_until } => WatchEvent::Register {
                kite,
                url,
                token: Credential::token(token, valid_until),
            },
            WatchEventWire::Deregister { kite } => WatchEvent::Deregister { kite },
        }
    }
}
