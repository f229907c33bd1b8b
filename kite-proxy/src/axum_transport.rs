//! Adapts an axum-accepted websocket to `kite_core::transport`'s
//! backend-agnostic `WsSink`/`WsStream` traits (mirrors kontrold's adapter of
//! the same name — the proxy's `/kite` leg is a full RPC peer same as
//! kontrold's).

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use kite_core::transport::{WsSink, WsStream};

pub struct AxumSink(pub SplitSink<WebSocket, Message>);

#[async_trait::async_trait]
impl WsSink for AxumSink {
    async fn send_text(&mut self, text: String) -> std::result::Result<(), String> {
        self.0.send(Message::Text(text.into())).await.map_err(|e| e.to_string())
    }

    async fn send_close(&mut self) {
        let _ = self.0.send(Message::Close(None)).await;
    }
}

pub struct AxumStream(pub SplitStream<WebSocket>);

#[async_trait::async_trait]
impl WsStream for AxumStream {
    async fn recv_text(&mut self) -> Option<std::result::Result<String, String>> {
        loop {
            return match self.0.next().await {
                Some(Ok(Message::Text(t))) => Some(Ok(t.to_string())),
                Some(Ok(Message::Close(_))) => None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => Some(Err(e.to_string())),
                None => None,
            };
        }
    }
}
