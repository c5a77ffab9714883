//! Client-side RPC bridge over a single channel.
//!
//! The bridge owns a read task and a write task around the channel halves
//! (the same split the socket layer uses). Outbound requests are matched to
//! inbound responses by correlation id through a pending-call map; inbound
//! requests and events are dispatched to the local function caller.
//!
//! An in-flight call stays pending until its response arrives or the channel
//! closes, at which point every outstanding call is rejected. Retry and
//! timeout policy belong to the caller, not this layer.

// Rust guideline compliant 2026-03

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

use crate::cache::RpcCacheManager;
use crate::channel::{ChannelPair, ChannelReceiver, ChannelSender};
use crate::codec::Codec;
use crate::collector::FunctionCaller;
use crate::error::{CallError, ChannelError};
use crate::rpc::{RpcFrame, WireError, WireErrorCode};

/// Hook invoked with every error surfaced by a bridge.
pub type ErrorHook = Arc<dyn Fn(&CallError) + Send + Sync>;

/// Construction options for [`ClientBridge`].
#[derive(Default)]
pub struct BridgeOptions {
    /// Invoked with general errors before they are returned to the caller.
    pub on_error: Option<ErrorHook>,
    /// Optional result cache consulted before issuing calls.
    pub cache: Option<Arc<RpcCacheManager>>,
}

struct BridgeShared {
    local: Arc<dyn FunctionCaller>,
    outgoing: Mutex<Option<UnboundedSender<RpcFrame>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, CallError>>>>,
    next_id: AtomicU64,
    on_error: Option<ErrorHook>,
    cache: Option<Arc<RpcCacheManager>>,
}

impl BridgeShared {
    fn report(&self, err: &CallError) {
        if let Some(hook) = &self.on_error {
            hook(err);
        }
    }

    fn send_frame(&self, frame: RpcFrame) -> Result<(), CallError> {
        let outgoing = self.outgoing.lock().expect("outgoing poisoned");
        match outgoing.as_ref() {
            Some(tx) if tx.send(frame).is_ok() => Ok(()),
            _ => Err(CallError::ChannelClosed),
        }
    }

    fn reject_pending(&self) {
        let waiters: Vec<oneshot::Sender<Result<Value, CallError>>> = {
            let mut pending = self.pending.lock().expect("pending poisoned");
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in waiters {
            let _ = tx.send(Err(CallError::ChannelClosed));
        }
    }
}

/// Bidirectional call endpoint bound to one channel.
#[derive(Clone)]
pub struct ClientBridge {
    shared: Arc<BridgeShared>,
}

impl std::fmt::Debug for ClientBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBridge").finish_non_exhaustive()
    }
}

impl ClientBridge {
    /// Bind a bridge to a connected channel.
    ///
    /// `local` answers requests and events arriving from the remote side.
    pub fn attach(pair: ChannelPair, local: Arc<dyn FunctionCaller>, options: BridgeOptions) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(BridgeShared {
            local,
            outgoing: Mutex::new(Some(out_tx)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            on_error: options.on_error,
            cache: options.cache,
        });

        tokio::spawn(write_loop(pair.sender, out_rx, pair.codec.clone()));
        tokio::spawn(read_loop(pair.receiver, pair.codec, shared.clone()));

        Self { shared }
    }

    /// Call a remote function and await its response.
    ///
    /// # Errors
    ///
    /// `CallError::FunctionNotFound` when the remote has no such function,
    /// `CallError::Remote` for remote handler failures, and
    /// `CallError::ChannelClosed` when the channel dies mid-call. Errors are
    /// passed to the error hook before being returned.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, CallError> {
        match self.call_inner(method, args).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.shared.report(&err);
                Err(err)
            }
        }
    }

    /// Call a remote function, tolerating its absence.
    ///
    /// Resolves to `None` instead of failing when the remote does not have
    /// the function registered.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call) for every failure other than
    /// function-not-found.
    pub async fn call_optional(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, CallError> {
        match self.call_inner(method, args).await {
            Ok(value) => Ok(Some(value)),
            Err(CallError::FunctionNotFound(_)) => Ok(None),
            Err(err) => {
                self.shared.report(&err);
                Err(err)
            }
        }
    }

    /// Fire a remote event without awaiting a response.
    ///
    /// Silently dropped when the channel is already closed; fire-and-forget
    /// carries no delivery guarantee by contract.
    pub fn call_event(&self, method: &str, args: Vec<Value>) {
        let frame = RpcFrame::Event {
            method: method.to_string(),
            args,
        };
        if self.shared.send_frame(frame).is_err() {
            log::debug!("[Bridge] event '{method}' dropped: channel closed");
        }
    }

    /// Close the outbound half. Outstanding calls are rejected once the
    /// remote observes the close.
    pub fn close(&self) {
        self.shared.outgoing.lock().expect("outgoing poisoned").take();
        self.shared.reject_pending();
    }

    async fn call_inner(&self, method: &str, args: Vec<Value>) -> Result<Value, CallError> {
        if let Some(cache) = &self.shared.cache {
            if cache.validate(method) {
                if let Some(hit) = cache.cached(method, &args) {
                    log::debug!("[Bridge] cache hit for '{method}'");
                    return Ok(hit);
                }
            }
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .expect("pending poisoned")
            .insert(id, tx);

        let frame = RpcFrame::Request {
            id,
            method: method.to_string(),
            args: args.clone(),
        };
        if let Err(err) = self.shared.send_frame(frame) {
            self.shared
                .pending
                .lock()
                .expect("pending poisoned")
                .remove(&id);
            return Err(err);
        }

        let value = match rx.await {
            Ok(result) => result?,
            Err(_) => return Err(CallError::ChannelClosed),
        };

        if let Some(cache) = &self.shared.cache {
            if cache.validate(method) {
                cache.apply(method, &args, value.clone());
            }
        }
        Ok(value)
    }
}

/// Translate a local call failure into a wire error payload.
pub(crate) fn wire_error(err: &CallError) -> WireError {
    match err {
        CallError::FunctionNotFound(name) => WireError {
            code: WireErrorCode::FunctionNotFound,
            // The message carries the name so the calling side can
            // reconstruct the precise error class.
            message: name.clone(),
        },
        other => WireError {
            code: WireErrorCode::Handler,
            message: other.to_string(),
        },
    }
}

/// Translate a wire error payload back into a call failure.
pub(crate) fn from_wire_error(err: WireError) -> CallError {
    match err.code {
        WireErrorCode::FunctionNotFound => CallError::FunctionNotFound(err.message),
        WireErrorCode::Handler | WireErrorCode::BadRequest => CallError::Remote(err.message),
    }
}

async fn write_loop(
    mut sender: Box<dyn ChannelSender>,
    mut out_rx: UnboundedReceiver<RpcFrame>,
    codec: Arc<dyn Codec>,
) {
    while let Some(frame) = out_rx.recv().await {
        let bytes = match codec.encode(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("[Bridge] failed to encode outbound frame: {e}");
                continue;
            }
        };
        if let Err(e) = sender.post(bytes).await {
            log::info!("[Bridge] write loop ended: {e}");
            break;
        }
    }
    let _ = sender.close().await;
}

async fn read_loop(
    mut receiver: Box<dyn ChannelReceiver>,
    codec: Arc<dyn Codec>,
    shared: Arc<BridgeShared>,
) {
    loop {
        match receiver.recv().await {
            Ok(Some(bytes)) => {
                let frame = match codec.decode(&bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        // Malformed frame: report and keep the channel alive
                        shared.report(&CallError::Decode(e.to_string()));
                        continue;
                    }
                };
                dispatch(frame, &shared);
            }
            Ok(None) => {
                log::info!("[Bridge] channel closed");
                break;
            }
            Err(ChannelError::Closed) => {
                log::info!("[Bridge] channel closed");
                break;
            }
            Err(e) => {
                shared.report(&CallError::Decode(e.to_string()));
                break;
            }
        }
    }
    shared.outgoing.lock().expect("outgoing poisoned").take();
    shared.reject_pending();
}

fn dispatch(frame: RpcFrame, shared: &Arc<BridgeShared>) {
    match frame {
        RpcFrame::Request { id, method, args } => {
            let shared = shared.clone();
            tokio::spawn(async move {
                let response = match shared.local.call(&method, args).await {
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
                if shared.send_frame(response).is_err() {
                    log::debug!("[Bridge] response for '{method}' dropped: channel closed");
                }
            });
        }
        RpcFrame::Response { id, result, error } => {
            let waiter = shared
                .pending
                .lock()
                .expect("pending poisoned")
                .remove(&id);
            let Some(tx) = waiter else {
                log::debug!("[Bridge] response for unknown call id {id}");
                return;
            };
            let outcome = match error {
                Some(err) => Err(from_wire_error(err)),
                None => Ok(result.unwrap_or(Value::Null)),
            };
            let _ = tx.send(outcome);
        }
        RpcFrame::Event { method, args } => {
            let shared = shared.clone();
            tokio::spawn(async move {
                if let Err(err) = shared.local.call(&method, args).await {
                    log::debug!("[Bridge] event handler '{method}' failed: {err}");
                    shared.report(&err);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory;
    use crate::collector::Collector;
    use crate::function::{sync_handler, FunctionDef};
    use serde_json::json;

    fn collector_with_sum() -> Collector<()> {
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
    }

    fn empty_caller() -> Arc<dyn FunctionCaller> {
        Collector::new(()).caller()
    }

    #[tokio::test]
    async fn test_call_round_trip_over_memory_pair() {
        let (a, b) = memory::pair();
        let _serving = ClientBridge::attach(b, collector_with_sum().caller(), BridgeOptions::default());
        let calling = ClientBridge::attach(a, empty_caller(), BridgeOptions::default());

        let out = calling.call("sum", vec![json!(20), json!(22)]).await.unwrap();
        assert_eq!(out, json!(42));
    }

    #[tokio::test]
    async fn test_unknown_function_rejects_call_but_not_call_optional() {
        let (a, b) = memory::pair();
        let _serving = ClientBridge::attach(b, empty_caller(), BridgeOptions::default());
        let calling = ClientBridge::attach(a, empty_caller(), BridgeOptions::default());

        let err = calling.call("ghost", vec![]).await.unwrap_err();
        assert!(matches!(err, CallError::FunctionNotFound(name) if name == "ghost"));

        let out = calling.call_optional("ghost", vec![]).await.unwrap();
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn test_remote_handler_error_reaches_hook_and_caller() {
        let collector = Collector::new(());
        collector
            .register(
                FunctionDef::query("boom").handler(sync_handler(|_| anyhow::bail!("kaput"))),
                false,
            )
            .unwrap();

        let (a, b) = memory::pair();
        let _serving = ClientBridge::attach(b, collector.caller(), BridgeOptions::default());

        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen2 = seen.clone();
        let calling = ClientBridge::attach(
            a,
            empty_caller(),
            BridgeOptions {
                on_error: Some(Arc::new(move |err| {
                    seen2.lock().unwrap().push(err.to_string());
                })),
                cache: None,
            },
        );

        let err = calling.call("boom", vec![]).await.unwrap_err();
        assert!(matches!(err, CallError::Remote(_)));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(seen.lock().unwrap()[0].contains("kaput"));
    }

    #[tokio::test]
    async fn test_call_event_dispatches_without_response() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let collector = Collector::new(());
        collector
            .register(
                FunctionDef::event("notify").handler(sync_handler(move |args| {
                    let _ = tx.send(args);
                    Ok(Value::Null)
                })),
                false,
            )
            .unwrap();

        let (a, b) = memory::pair();
        let _serving = ClientBridge::attach(b, collector.caller(), BridgeOptions::default());
        let calling = ClientBridge::attach(a, empty_caller(), BridgeOptions::default());

        calling.call_event("notify", vec![json!("hello")]);
        let args = rx.recv().await.unwrap();
        assert_eq!(args, vec![json!("hello")]);
    }

    #[tokio::test]
    async fn test_close_rejects_outstanding_calls() {
        // No serving side: the call would pend forever without the close
        let (a, _b) = memory::pair();
        let calling = ClientBridge::attach(a, empty_caller(), BridgeOptions::default());

        let pending = {
            let calling = calling.clone();
            tokio::spawn(async move { calling.call("never", vec![]).await })
        };
        tokio::task::yield_now().await;
        calling.close();

        let out = pending.await.unwrap();
        assert!(matches!(out, Err(CallError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_cached_call_skips_the_wire() {
        use crate::cache::{CacheOptions, RpcCacheManager};

        let cache = Arc::new(RpcCacheManager::new(CacheOptions {
            functions: vec!["sum".into()],
        }));

        let (a, b) = memory::pair();
        let _serving = ClientBridge::attach(b, collector_with_sum().caller(), BridgeOptions::default());
        let calling = ClientBridge::attach(
            a,
            empty_caller(),
            BridgeOptions {
                on_error: None,
                cache: Some(cache.clone()),
            },
        );

        let first = calling.call("sum", vec![json!(1), json!(2)]).await.unwrap();
        assert_eq!(first, json!(3));
        assert_eq!(cache.cached("sum", &[json!(1), json!(2)]), Some(json!(3)));

        // Serving side gone: only the cache can answer now
        calling.close();
        let second = calling.call("sum", vec![json!(1), json!(2)]).await.unwrap();
        assert_eq!(second, json!(3));
    }
}
