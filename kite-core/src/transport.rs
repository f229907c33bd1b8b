//! Transport session (spec §4.2): a framed bidirectional text stream with
//! an auto-redial policy. Dialing is generic over the websocket backend so
//! a host process can hand the session an already-accepted server-side
//! socket (axum) as easily as letting it dial out itself (tokio-tungstenite).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::{KiteError, Result};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// One half of a websocket connection that can send text frames.
#[async_trait::async_trait]
pub trait WsSink: Send {
    async fn send_text(&mut self, text: String) -> std::result::Result<(), String>;
    async fn send_close(&mut self);
}

/// One half of a websocket connection that yields text frames. `None` means
/// the stream ended (closed or errored).
#[async_trait::async_trait]
pub trait WsStream: Send {
    async fn recv_text(&mut self) -> Option<std::result::Result<String, String>>;
}

pub type BoxWsSink = Box<dyn WsSink>;
pub type BoxWsStream = Box<dyn WsStream>;

/// Opens a fresh websocket connection to a URL. `Session::dial` uses the
/// built-in tokio-tungstenite dialer; tests can substitute their own.
#[async_trait::async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> std::result::Result<(BoxWsSink, BoxWsStream), String>;
}

/// The default outbound dialer, backed by `tokio-tungstenite`.
pub struct TungsteniteDialer;

struct TungsteniteSink(futures_util::stream::SplitSink<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>, tokio_tungstenite::tungstenite::Message>);

#[async_trait::async_trait]
impl WsSink for TungsteniteSink {
    async fn send_text(&mut self, text: String) -> std::result::Result<(), String> {
        self.0
            .send(tokio_tungstenite::tungstenite::Message::Text(text.into()))
            .await
            .map_err(|e| e.to_string())
    }

    async fn send_close(&mut self) {
        let _ = self.0.send(tokio_tungstenite::tungstenite::Message::Close(None)).await;
    }
}

struct TungsteniteStream(futures_util::stream::SplitStream<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>>);

#[async_trait::async_trait]
impl WsStream for TungsteniteStream {
    async fn recv_text(&mut self) -> Option<std::result::Result<String, String>> {
        loop {
            return match self.0.next().await {
                Some(Ok(tokio_tungstenite::tungstenite::Message::Text(t))) => Some(Ok(t.to_string())),
                Some(Ok(tokio_tungstenite::tungstenite::Message::Close(_))) => None,
                Some(Ok(_)) => continue, // ping/pong/binary: ignored frame types
                Some(Err(e)) => Some(Err(e.to_string())),
                None => None,
            };
        }
    }
}

#[async_trait::async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, url: &str) -> std::result::Result<(BoxWsSink, BoxWsStream), String> {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| e.to_string())?;
        let (sink, source) = stream.split();
        Ok((Box::new(TungsteniteSink(sink)), Box::new(TungsteniteStream(source))))
    }
}

/// Connection lifecycle events a session publishes (spec §4.2 `onConnect`
/// / `onDisconnect`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
}

/// A framed bidirectional session with optional auto-redial. Cheap to
/// clone: clones share the same underlying connection and event bus.
#[derive(Clone)]
pub struct Session {
    write: Arc<Mutex<Option<BoxWsSink>>>,
    events_tx: watch::Sender<SessionEvent>,
    events_rx: watch::Receiver<SessionEvent>,
    incoming_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>,
    closing: Arc<AtomicBool>,
}

impl Session {
    /// Dial `url`, optionally auto-reconnecting with exponential backoff on
    /// failure (spec §4.2). Disabled auto-reconnect gives a single-shot
    /// lifecycle: one connect attempt, then done.
    pub fn dial(url: impl Into<String>, auto_reconnect: bool) -> Session {
        Self::dial_with(url, auto_reconnect, Arc::new(TungsteniteDialer))
    }

    pub fn dial_with(url: impl Into<String>, auto_reconnect: bool, dialer: Arc<dyn Dialer>) -> Session {
        let url = url.into();
        let write = Arc::new(Mutex::new(None));
        let (events_tx, events_rx) = watch::channel(SessionEvent::Disconnected);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));

        let task_write = write.clone();
        let task_events = events_tx.clone();
        let task_closing = closing.clone();
        tokio::spawn(async move {
            redial_loop(url, auto_reconnect, dialer, task_write, task_events, incoming_tx, task_closing).await;
        });

        Session {
            write,
            events_tx,
            events_rx,
            incoming_rx: Arc::new(Mutex::new(Some(incoming_rx))),
            closing,
        }
    }

    /// Wrap an already-accepted connection (e.g. the server side of an axum
    /// websocket upgrade). Single-shot: no redial, since the session did
    /// not originate the connection and has no URL to retry.
    pub fn from_accepted(sink: BoxWsSink, stream: BoxWsStream) -> Session {
        let write = Arc::new(Mutex::new(Some(sink)));
        let (events_tx, events_rx) = watch::channel(SessionEvent::Connected);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));

        let task_write = write.clone();
        let task_events = events_tx.clone();
        tokio::spawn(read_loop(stream, incoming_tx, task_write, task_events));

        Session {
            write,
            events_tx,
            events_rx,
            incoming_rx: Arc::new(Mutex::new(Some(incoming_rx))),
            closing,
        }
    }

    /// A cheap-clone handle to this same session, for handing to background
    /// tasks (e.g. an async callback-reply send) without borrowing.
    pub fn session_handle(&self) -> Session {
        self.clone()
    }

    pub async fn send(&self, text: String) -> Result<()> {
        let mut guard = self.write.lock().await;
        match guard.as_mut() {
            Some(sink) => sink.send_text(text).await.map_err(KiteError::SendError),
            None => Err(KiteError::SendError("not connected".into())),
        }
    }

    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let mut guard = self.write.lock().await;
        if let Some(sink) = guard.as_mut() {
            sink.send_close().await;
        }
        *guard = None;
        let _ = self.events_tx.send(SessionEvent::Disconnected);
    }

    pub fn events(&self) -> watch::Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.events_rx.borrow() == SessionEvent::Connected
    }

    /// Take ownership of the inbound frame stream. Only the peer that owns
    /// this session should call this, and only once.
    pub async fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.incoming_rx.lock().await.take()
    }
}

async fn read_loop(
    mut stream: BoxWsStream,
    incoming_tx: mpsc::UnboundedSender<String>,
    write: Arc<Mutex<Option<BoxWsSink>>>,
    events_tx: watch::Sender<SessionEvent>,
) {
    loop {
        match stream.recv_text().await {
            Some(Ok(text)) => {
                if incoming_tx.send(text).is_err() {
                    break; // peer dropped its receiver
                }
            }
            Some(Err(e)) => {
                warn!("session read error: {e}");
                break;
            }
            None => {
                debug!("session stream ended");
                break;
            }
        }
    }
    *write.lock().await = None;
    let _ = events_tx.send(SessionEvent::Disconnected);
}

async fn redial_loop(
    url: String,
    auto_reconnect: bool,
    dialer: Arc<dyn Dialer>,
    write: Arc<Mutex<Option<BoxWsSink>>>,
    events_tx: watch::Sender<SessionEvent>,
    incoming_tx: mpsc::UnboundedSender<String>,
    closing: Arc<AtomicBool>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if closing.load(Ordering::SeqCst) {
            return;
        }

        match dialer.dial(&url).await {
            Ok((sink, stream)) => {
                info!(url = %url, "session connected");
                backoff = INITIAL_BACKOFF;
                *write.lock().await = Some(sink);
                let _ = events_tx.send(SessionEvent::Connected);

                read_loop(stream, incoming_tx.clone(), write.clone(), events_tx.clone()).await;

                if !auto_reconnect || closing.load(Ordering::SeqCst) {
                    return;
                }
            }
            Err(e) => {
                warn!(url = %url, "session dial failed: {e}");
                let _ = events_tx.send(SessionEvent::Disconnected);
                if !auto_reconnect {
                    return;
                }
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
    }
}
