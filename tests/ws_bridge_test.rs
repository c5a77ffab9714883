//! End-to-end bridge tests over a real loopback WebSocket.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use panelbus::channel::ws_client::{self, WsClientOptions};
use panelbus::channel::ws_server::{WsServer, WsServerOptions};
use panelbus::{
    sync_handler, BridgeOptions, CallError, ClientBridge, Collector, FunctionDef, ServerBridge,
    ServerOptions,
};

const WAIT: Duration = Duration::from_secs(5);

fn producer_collector() -> Collector<()> {
    let collector = Collector::new(());
    collector
        .register(
            FunctionDef::query("sum").handler(sync_handler(|args| {
                let a = args[0].as_i64().unwrap_or(0);
                let b = args[1].as_i64().unwrap_or(0);
                Ok(json!(a + b))
            })),
            false,
        )
        .unwrap();
    collector
        .register(
            FunctionDef::query("fail").handler(sync_handler(|_| anyhow::bail!("nope"))),
            false,
        )
        .unwrap();
    collector
}

async fn start_server() -> (WsServer, ServerBridge) {
    let bridge = ServerBridge::new(producer_collector().caller(), ServerOptions::default());
    let server = WsServer::bind("127.0.0.1:0", bridge.clone(), WsServerOptions::default())
        .await
        .unwrap();
    (server, bridge)
}

/// Client bridge with an inbox collector receiving "ping" events.
fn connect_client(port: u16) -> (ClientBridge, mpsc::UnboundedReceiver<Vec<Value>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let collector = Collector::new(());
    collector
        .register(
            FunctionDef::event("ping").handler(sync_handler(move |args| {
                let _ = tx.send(args);
                Ok(Value::Null)
            })),
            false,
        )
        .unwrap();

    let (pair, _handle) = ws_client::open(WsClientOptions {
        url: format!("ws://127.0.0.1:{port}"),
        ..WsClientOptions::default()
    });
    let bridge = ClientBridge::attach(pair, collector.caller(), BridgeOptions::default());
    (bridge, rx)
}

async fn wait_for_peers(bridge: &ServerBridge, count: usize) {
    tokio::time::timeout(WAIT, async {
        while bridge.peer_count() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peers did not connect in time");
}

#[tokio::test]
async fn test_call_round_trip_including_queue_until_open() {
    let (server, _bridge) = start_server().await;

    // The call is issued before the socket handshake can have completed;
    // the outgoing queue holds it until the open event
    let (client, _inbox) = connect_client(server.port());
    let out = tokio::time::timeout(WAIT, client.call("sum", vec![json!(20), json!(22)]))
        .await
        .expect("call timed out")
        .unwrap();
    assert_eq!(out, json!(42));
}

#[tokio::test]
async fn test_call_optional_and_missing_functions() {
    let (server, _bridge) = start_server().await;
    let (client, _inbox) = connect_client(server.port());

    let err = tokio::time::timeout(WAIT, client.call("ghost", vec![]))
        .await
        .expect("call timed out")
        .unwrap_err();
    assert!(matches!(err, CallError::FunctionNotFound(name) if name == "ghost"));

    let out = client.call_optional("ghost", vec![]).await.unwrap();
    assert_eq!(out, None);

    let present = client.call_optional("sum", vec![json!(1), json!(1)]).await.unwrap();
    assert_eq!(present, Some(json!(2)));
}

#[tokio::test]
async fn test_remote_handler_error_propagates() {
    let (server, _bridge) = start_server().await;
    let (client, _inbox) = connect_client(server.port());

    let err = tokio::time::timeout(WAIT, client.call("fail", vec![]))
        .await
        .expect("call timed out")
        .unwrap_err();
    match err {
        CallError::Remote(message) => assert!(message.contains("nope")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_broadcast_reaches_only_filtered_peers() {
    let (server, bridge) = start_server().await;

    let (_client1, mut inbox1) = connect_client(server.port());
    wait_for_peers(&bridge, 1).await;
    let first_session = bridge.peers()[0].session;

    let (_client2, mut inbox2) = connect_client(server.port());
    wait_for_peers(&bridge, 2).await;

    let delivered = bridge.broadcast("ping", vec![json!("hello")], |peer| {
        peer.session == first_session
    });
    assert_eq!(delivered, 1);

    let args = tokio::time::timeout(WAIT, inbox1.recv())
        .await
        .expect("event did not arrive")
        .unwrap();
    assert_eq!(args, vec![json!("hello")]);

    let quiet = tokio::time::timeout(Duration::from_millis(200), inbox2.recv()).await;
    assert!(quiet.is_err(), "filtered-out peer received the event");
}

#[tokio::test]
async fn test_disconnect_prunes_peer_set() {
    let (server, bridge) = start_server().await;

    let (client, _inbox) = connect_client(server.port());
    wait_for_peers(&bridge, 1).await;

    client.close();
    tokio::time::timeout(WAIT, async {
        while bridge.peer_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peer was not removed after disconnect");
}

#[tokio::test]
async fn test_server_labels_carry_remote_addr() {
    let (server, bridge) = start_server().await;
    let (_client, _inbox) = connect_client(server.port());
    wait_for_peers(&bridge, 1).await;

    let peers = bridge.peers();
    let labels: &HashMap<String, String> = &peers[0].labels;
    assert!(labels
        .get("remote_addr")
        .map(|addr| addr.starts_with("127.0.0.1"))
        .unwrap_or(false));
}

#[tokio::test]
async fn test_client_with_auth_token_connects() {
    let (server, _bridge) = start_server().await;

    let (pair, _handle) = ws_client::open(WsClientOptions {
        url: format!("ws://127.0.0.1:{}", server.port()),
        token: Some("s3cret".into()),
        ..WsClientOptions::default()
    });
    let client = ClientBridge::attach(
        pair,
        Collector::new(()).caller(),
        BridgeOptions::default(),
    );

    let out = tokio::time::timeout(WAIT, client.call("sum", vec![json!(2), json!(3)]))
        .await
        .expect("call timed out")
        .unwrap();
    assert_eq!(out, json!(5));
}
