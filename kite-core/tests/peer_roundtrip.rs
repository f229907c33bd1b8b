//! Two RPC peers wired together over in-memory channels standing in for a
//! websocket, exercising round-trip encode/decode, callback correlation,
//! and method-not-found dispatch (spec §8 properties 1, 2, 5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kite_core::dnode::{ArgNode, MethodId, Partial};
use kite_core::peer::{Concurrency, RpcPeer};
use kite_core::transport::{BoxWsSink, BoxWsStream, Session, WsSink, WsStream};
use tokio::sync::mpsc;

struct ChannelSink(mpsc::UnboundedSender<String>);

#[async_trait::async_trait]
impl WsSink for ChannelSink {
    async fn send_text(&mut self, text: String) -> std::result::Result<(), String> {
        self.0.send(text).map_err(|e| e.to_string())
    }

    async fn send_close(&mut self) {}
}

struct ChannelStream(mpsc::UnboundedReceiver<String>);

#[async_trait::async_trait]
impl WsStream for ChannelStream {
    async fn recv_text(&mut self) -> Option<std::result::Result<String, String>> {
        self.0.recv().await.map(Ok)
    }
}

fn paired_sessions() -> (Session, Session) {
    let (a_out_tx, a_out_rx) = mpsc::unbounded_channel();
    let (b_out_tx, b_out_rx) = mpsc::unbounded_channel();

    let session_a = Session::from_accepted(Box::new(ChannelSink(a_out_tx)) as BoxWsSink, Box::new(ChannelStream(b_out_rx)) as BoxWsStream);
    let session_b = Session::from_accepted(Box::new(ChannelSink(b_out_tx)) as BoxWsSink, Box::new(ChannelStream(a_out_rx)) as BoxWsStream);

    (session_a, session_b)
}

#[tokio::test]
async fn call_and_response_round_trip() {
    let (session_a, session_b) = paired_sessions();

    let peer_a = Arc::new(RpcPeer::new(session_a, Concurrency::Parallel));
    peer_a.start();

    let peer_b = Arc::new(RpcPeer::new(session_b, Concurrency::Parallel));
    peer_b.register_handler(
        "square",
        Arc::new(|_peer, args: Partial| {
            Box::pin(async move {
                let x = args.index(0).unwrap().as_i64().unwrap();
                let reply = args.index(1).unwrap().as_function().unwrap();
                reply.call(vec![ArgNode::from(x * x)]).unwrap();
            })
        }),
    );
    peer_b.start();

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Arc::new(tokio::sync::Mutex::new(Some(tx)));
    let tx2 = Arc::clone(&tx);
    let on_result: kite_core::dnode::CallbackFn = Arc::new(move |args| {
        if let Some(tx) = tx2.try_lock().ok().and_then(|mut g| g.take()) {
            let _ = tx.send(args.first().cloned());
        }
    });

    peer_a
        .call("square", vec![ArgNode::from(6i64), ArgNode::Function(on_result)])
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
    assert_eq!(result, Some(serde_json::json!(36)));
}

#[tokio::test]
async fn call_with_response_removes_the_response_callback_on_success() {
    use kite_core::auth::{Authenticator, Credential};
    use kite_core::envelope;
    use kite_core::identity::KiteIdentity;

    let (session_a, session_b) = paired_sessions();

    let peer_a = Arc::new(RpcPeer::new(session_a, Concurrency::Parallel));
    peer_a.start();

    let peer_b = Arc::new(RpcPeer::new(session_b, Concurrency::Parallel));
    let callee_identity = KiteIdentity::new("bob", "prod", "echo", "1.0.0", "us-east", "host-2", "ws://y").unwrap();
    peer_b.register_handler(
        "echo",
        Arc::new(move |peer, partial: Partial| {
            let local = callee_identity.clone();
            Box::pin(async move {
                let authenticator = Authenticator {
                    kontrol_public_key: None,
                    trusted_issuer: None,
                    local_kite_id: local.id.to_string(),
                    session_lookup: None,
                };
                let (request, response_cb) = envelope::build_request("echo".to_string(), partial, local, peer, None, &authenticator, true).unwrap();
                let value = request.args.index(0).unwrap().raw().clone();
                envelope::respond(&response_cb, Ok(value));
            })
        }),
    );
    peer_b.start();

    let caller_identity = KiteIdentity::new("alice", "prod", "caller", "1.0.0", "us-east", "host-1", "ws://x").unwrap();
    let credential = Credential::kite_key("sometoken");

    let result = envelope::call_with_response(
        &peer_a,
        "echo",
        vec![ArgNode::from(42i64)],
        &caller_identity,
        &credential,
        Some(Duration::from_secs(1)),
    )
    .await
    .unwrap();

    assert_eq!(result, serde_json::json!(42));
    assert_eq!(peer_a.outstanding_callback_count(), 0);
}

#[tokio::test]
async fn unknown_method_does_not_panic_the_dispatch_loop() {
    let (session_a, session_b) = paired_sessions();

    let called = Arc::new(AtomicBool::new(false));
    let called2 = Arc::clone(&called);

    let peer_a = Arc::new(RpcPeer::new(session_a, Concurrency::Serial));
    peer_a.start();

    let mut peer_b_mut = RpcPeer::new(session_b, Concurrency::Serial);
    peer_b_mut.set_on_method_not_found(Arc::new(move |_peer, name, _args| {
        assert_eq!(name, "doesNotExist");
        called2.store(true, Ordering::SeqCst);
    }));
    let peer_b = Arc::new(peer_b_mut);
    peer_b.start();

    peer_a.call("doesNotExist", vec![]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn callback_ids_are_scoped_per_peer_and_unknown_ones_are_ignored() {
    let (session_a, _session_b) = paired_sessions();
    let peer_a = Arc::new(RpcPeer::new(session_a, Concurrency::Parallel));
    peer_a.start();

    assert_eq!(peer_a.outstanding_callback_count(), 0);
    let noop: kite_core::dnode::CallbackFn = Arc::new(|_| {});
    peer_a.call("anything", vec![ArgNode::Function(noop)]).await.unwrap();
    assert_eq!(peer_a.outstanding_callback_count(), 1);

    let (message, _pending) = kite_core::dnode::encode(MethodId::Callback(999), vec![], &mut || 0);
    let wire = kite_core::dnode::serialize(&message).unwrap();
    let (method, _partial) = kite_core::dnode::decode(&wire, None).unwrap();
    assert_eq!(method, MethodId::Callback(999));
}
