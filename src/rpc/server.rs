//! Server-side RPC bridge: a dynamic set of peer channels with fan-out.
//!
//! Each connected peer gets a monotonically increasing session id and its own
//! read/write task pair. Inbound requests and events are answered by the
//! bridge's function caller (or a per-peer caller injected at attach time,
//! which is how session-scoped concerns like state subscriptions are built).
//! `broadcast` fires an event at every connected peer whose metadata passes
//! the filter; there is no cross-peer ordering guarantee.

// Rust guideline compliant 2026-03

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::channel::{ChannelPair, ChannelReceiver, ChannelSender};
use crate::codec::Codec;
use crate::collector::FunctionCaller;
use crate::error::{CallError, ChannelError};
use crate::rpc::bridge::{wire_error, ErrorHook};
use crate::rpc::{RpcFrame, SessionId};

/// Metadata describing one connected peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Session id assigned at connect time.
    pub session: SessionId,
    /// Free-form labels supplied by the transport preset (e.g. remote
    /// address) or the host.
    pub labels: HashMap<String, String>,
}

/// Hook invoked when a peer joins or leaves the bridge.
pub type PeerHook = Arc<dyn Fn(&PeerInfo) + Send + Sync>;

/// Factory producing the function caller answering one peer's traffic.
///
/// Lets transport presets attach session-scoped wrappers around the shared
/// caller (per-session state subscriptions are built this way).
pub type CallerFactory = Arc<dyn Fn(&PeerInfo) -> Arc<dyn FunctionCaller> + Send + Sync>;

struct Peer {
    info: PeerInfo,
    outgoing: UnboundedSender<RpcFrame>,
}

struct ServerInner {
    local: Arc<dyn FunctionCaller>,
    peers: Mutex<HashMap<u64, Peer>>,
    next_session: AtomicU64,
    on_error: Option<ErrorHook>,
    on_connect: Mutex<Vec<PeerHook>>,
    on_disconnect: Mutex<Vec<PeerHook>>,
}

/// Construction options for [`ServerBridge`].
#[derive(Default)]
pub struct ServerOptions {
    /// Invoked with general errors (handler failures on events, decode
    /// failures) that have no caller to return to.
    pub on_error: Option<ErrorHook>,
}

/// Fan-out bridge serving one function caller to many peers.
#[derive(Clone)]
pub struct ServerBridge {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for ServerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let peers = self.inner.peers.lock().map(|p| p.len()).unwrap_or(0);
        f.debug_struct("ServerBridge")
            .field("peers", &peers)
            .finish_non_exhaustive()
    }
}

impl ServerBridge {
    /// Create a bridge serving `local` to every peer.
    pub fn new(local: Arc<dyn FunctionCaller>, options: ServerOptions) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                local,
                peers: Mutex::new(HashMap::new()),
                next_session: AtomicU64::new(1),
                on_error: options.on_error,
                on_connect: Mutex::new(Vec::new()),
                on_disconnect: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a hook fired when a peer connects.
    pub fn on_connect(&self, hook: impl Fn(&PeerInfo) + Send + Sync + 'static) {
        self.inner
            .on_connect
            .lock()
            .expect("hooks poisoned")
            .push(Arc::new(hook));
    }

    /// Register a hook fired after a peer disconnects.
    pub fn on_disconnect(&self, hook: impl Fn(&PeerInfo) + Send + Sync + 'static) {
        self.inner
            .on_disconnect
            .lock()
            .expect("hooks poisoned")
            .push(Arc::new(hook));
    }

    /// Attach a connected channel as a new peer.
    ///
    /// Returns the assigned session id. The peer is removed from the fan-out
    /// set when its channel closes.
    pub fn add_channel(&self, pair: ChannelPair, labels: HashMap<String, String>) -> SessionId {
        let local = self.inner.local.clone();
        self.add_channel_with(pair, labels, |_| local)
    }

    /// Attach a connected channel answered by a peer-specific caller.
    ///
    /// The factory receives the peer's metadata (including its freshly
    /// assigned session id). Session-scoped wrappers (e.g. per-session state
    /// subscriptions) are layered this way; the wrapper usually delegates to
    /// the shared caller for everything it does not intercept.
    pub fn add_channel_with(
        &self,
        pair: ChannelPair,
        labels: HashMap<String, String>,
        make_local: impl FnOnce(&PeerInfo) -> Arc<dyn FunctionCaller>,
    ) -> SessionId {
        let session = SessionId(self.inner.next_session.fetch_add(1, Ordering::Relaxed));
        let info = PeerInfo { session, labels };
        let local = make_local(&info);

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.inner.peers.lock().expect("peers poisoned").insert(
            session.0,
            Peer {
                info: info.clone(),
                outgoing: out_tx.clone(),
            },
        );
        log::info!("[Server] peer connected: {session}");

        tokio::spawn(peer_write_loop(pair.sender, out_rx, pair.codec.clone()));
        tokio::spawn(peer_read_loop(
            pair.receiver,
            pair.codec,
            out_tx,
            local,
            self.inner.clone(),
            info.clone(),
        ));

        let hooks: Vec<PeerHook> = self
            .inner
            .on_connect
            .lock()
            .expect("hooks poisoned")
            .clone();
        for hook in hooks {
            hook(&info);
        }
        session
    }

    /// Fire an event at every connected peer passing the filter.
    ///
    /// Returns the number of peers the event was queued for.
    pub fn broadcast(
        &self,
        method: &str,
        args: Vec<Value>,
        filter: impl Fn(&PeerInfo) -> bool,
    ) -> usize {
        let peers = self.inner.peers.lock().expect("peers poisoned");
        let mut delivered = 0;
        for peer in peers.values() {
            if !filter(&peer.info) {
                continue;
            }
            let frame = RpcFrame::Event {
                method: method.to_string(),
                args: args.clone(),
            };
            if peer.outgoing.send(frame).is_ok() {
                delivered += 1;
            }
        }
        log::debug!("[Server] broadcast '{method}' to {delivered} peer(s)");
        delivered
    }

    /// Metadata of all currently connected peers.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.inner
            .peers
            .lock()
            .expect("peers poisoned")
            .values()
            .map(|p| p.info.clone())
            .collect()
    }

    /// Number of currently connected peers.
    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().expect("peers poisoned").len()
    }
}

async fn peer_write_loop(
    mut sender: Box<dyn ChannelSender>,
    mut out_rx: UnboundedReceiver<RpcFrame>,
    codec: Arc<dyn Codec>,
) {
    while let Some(frame) = out_rx.recv().await {
        let bytes = match codec.encode(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("[Server] failed to encode outbound frame: {e}");
                continue;
            }
        };
        if let Err(e) = sender.post(bytes).await {
            log::info!("[Server] peer write loop ended: {e}");
            break;
        }
    }
    let _ = sender.close().await;
}

async fn peer_read_loop(
    mut receiver: Box<dyn ChannelReceiver>,
    codec: Arc<dyn Codec>,
    out_tx: UnboundedSender<RpcFrame>,
    local: Arc<dyn FunctionCaller>,
    inner: Arc<ServerInner>,
    info: PeerInfo,
) {
    let session = info.session;
    loop {
        match receiver.recv().await {
            Ok(Some(bytes)) => {
                let frame = match codec.decode(&bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        if let Some(hook) = &inner.on_error {
                            hook(&CallError::Decode(e.to_string()));
                        }
                        continue;
                    }
                };
                match frame {
                    RpcFrame::Request { id, method, args } => {
                        let local = local.clone();
                        let out_tx = out_tx.clone();
                        tokio::spawn(async move {
                            let response = match local.call(&method, args).await {
                                Ok(value) => RpcFrame::Response {
                                    id,
                                    result: Some(value),
                                    error: None,
                                },
                                Err(err) => RpcFrame::Response {
                                    id,
                                    result: None,
                                    error: Some(wire_error(&err)),
                                },
                            };
                            let _ = out_tx.send(response);
                        });
                    }
                    RpcFrame::Event { method, args } => {
                        let local = local.clone();
                        let inner = inner.clone();
                        tokio::spawn(async move {
                            if let Err(err) = local.call(&method, args).await {
                                log::debug!(
                                    "[Server] event handler '{method}' failed for {session}: {err}"
                                );
                                if let Some(hook) = &inner.on_error {
                                    hook(&err);
                                }
                            }
                        });
                    }
                    RpcFrame::Response { id, .. } => {
                        // This bridge does not originate requests
                        log::debug!("[Server] unexpected response frame (id {id}) from {session}");
                    }
                }
            }
            Ok(None) => break,
            Err(ChannelError::Closed) => break,
            Err(e) => {
                if let Some(hook) = &inner.on_error {
                    hook(&CallError::Decode(e.to_string()));
                }
                break;
            }
        }
    }

    inner.peers.lock().expect("peers poisoned").remove(&session.0);
    log::info!("[Server] peer disconnected: {session}");
    let hooks: Vec<PeerHook> = inner.on_disconnect.lock().expect("hooks poisoned").clone();
    for hook in hooks {
        hook(&info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory;
    use crate::collector::Collector;
    use crate::function::{sync_handler, FunctionDef};
    use crate::rpc::bridge::{BridgeOptions, ClientBridge};
    use serde_json::json;
    use std::time::Duration;

    fn labels(role: &str) -> HashMap<String, String> {
        HashMap::from([("role".to_string(), role.to_string())])
    }

    fn serving_collector() -> Collector<()> {
        let collector = Collector::new(());
        collector
            .register(
                FunctionDef::query("double")
                    .handler(sync_handler(|args| Ok(json!(args[0].as_i64().unwrap_or(0) * 2)))),
                false,
            )
            .unwrap();
        collector
    }

    fn client_with_inbox() -> (Collector<()>, mpsc::UnboundedReceiver<Vec<Value>>) {
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
        (collector, rx)
    }

    #[tokio::test]
    async fn test_sessions_are_monotonic() {
        let server = ServerBridge::new(serving_collector().caller(), ServerOptions::default());

        let (a1, _k1) = memory::pair();
        let (a2, _k2) = memory::pair();
        let s1 = server.add_channel(a1, labels("first"));
        let s2 = server.add_channel(a2, labels("second"));
        assert!(s2 > s1);
        assert_eq!(server.peer_count(), 2);
    }

    #[tokio::test]
    async fn test_peer_calls_are_served() {
        let server = ServerBridge::new(serving_collector().caller(), ServerOptions::default());

        let (server_side, client_side) = memory::pair();
        server.add_channel(server_side, labels("panel"));
        let client = ClientBridge::attach(
            client_side,
            Collector::new(()).caller(),
            BridgeOptions::default(),
        );

        let out = client.call("double", vec![json!(21)]).await.unwrap();
        assert_eq!(out, json!(42));
    }

    #[tokio::test]
    async fn test_broadcast_respects_filter() {
        let server = ServerBridge::new(serving_collector().caller(), ServerOptions::default());

        let (srv1, cli1) = memory::pair();
        let (srv2, cli2) = memory::pair();
        server.add_channel(srv1, labels("panel"));
        server.add_channel(srv2, labels("inspector"));

        let (c1, mut rx1) = client_with_inbox();
        let (c2, mut rx2) = client_with_inbox();
        let _b1 = ClientBridge::attach(cli1, c1.caller(), BridgeOptions::default());
        let _b2 = ClientBridge::attach(cli2, c2.caller(), BridgeOptions::default());

        let delivered = server.broadcast("ping", vec![json!("hello")], |peer| {
            peer.labels.get("role").map(String::as_str) == Some("panel")
        });
        assert_eq!(delivered, 1);

        let args = rx1.recv().await.unwrap();
        assert_eq!(args, vec![json!("hello")]);

        // The filtered-out peer must stay silent
        let quiet = tokio::time::timeout(Duration::from_millis(100), rx2.recv()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_removes_peer() {
        let server = ServerBridge::new(serving_collector().caller(), ServerOptions::default());

        let (gone_tx, mut gone_rx) = mpsc::unbounded_channel();
        server.on_disconnect(move |info| {
            let _ = gone_tx.send(info.session);
        });

        let (server_side, client_side) = memory::pair();
        let session = server.add_channel(server_side, labels("panel"));
        assert_eq!(server.peer_count(), 1);

        drop(client_side);
        let left = gone_rx.recv().await.unwrap();
        assert_eq!(left, session);
        assert_eq!(server.peer_count(), 0);
    }
}
