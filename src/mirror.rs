//! State mirroring across an RPC bridge.
//!
//! # Architecture
//!
//! ```text
//! producer process                      consumer (panel)
//! SharedState ── StateHost ── ServerBridge ─┬─ ClientBridge ── StateMirror ── SharedState
//!                                           └─ (more panels)
//! ```
//!
//! The host answers `state.subscribe` / `state.get` and broadcasts
//! `state.patched` / `state.replaced` events, filtered to the sessions
//! subscribed to that key. A mirror applies inbound events with the sync id
//! they carry and forwards local mutations the same way, so an echo resolves
//! as a no-op on whichever side applied the mutation first.

// Rust guideline compliant 2026-03

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::collector::{Collector, FunctionCaller};
use crate::error::CallError;
use crate::function::{handler, FunctionDef};
use crate::rpc::bridge::ClientBridge;
use crate::rpc::server::{CallerFactory, ServerBridge};
use crate::rpc::SessionId;
use crate::state::{SharedState, StatePatch};

/// Method names of the state-sync RPC surface.
pub mod methods {
    /// Query: subscribe the calling session to a key.
    pub const SUBSCRIBE: &str = "state.subscribe";
    /// Query: full snapshot (plus seed sync id) for a key.
    pub const GET: &str = "state.get";
    /// Event: full snapshot replacement `(key, state, sync_id)`.
    pub const REPLACED: &str = "state.replaced";
    /// Event: patch list `(key, patches, sync_id)`.
    pub const PATCHED: &str = "state.patched";
}

fn arg_str(args: &[Value], index: usize, function: &str) -> Result<String, CallError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CallError::InvalidArgs {
            function: function.to_string(),
            message: format!("argument {index} must be a string"),
        })
}

/// Producer-side host pairing shared states with a server bridge.
pub struct StateHost {
    states: Mutex<HashMap<String, SharedState<Value>>>,
    subscribers: Mutex<HashMap<String, HashSet<SessionId>>>,
    bridge: ServerBridge,
}

impl std::fmt::Debug for StateHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateHost").finish_non_exhaustive()
    }
}

impl StateHost {
    /// Create a host bound to a server bridge.
    ///
    /// Subscriptions of a session are dropped when its channel closes.
    pub fn new(bridge: ServerBridge) -> Arc<Self> {
        let host = Arc::new(Self {
            states: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            bridge: bridge.clone(),
        });

        let weak = Arc::downgrade(&host);
        bridge.on_disconnect(move |info| {
            if let Some(host) = weak.upgrade() {
                host.drop_session(info.session);
            }
        });
        host
    }

    /// Expose a shared state under a key.
    ///
    /// Every subsequent mutation is broadcast to the key's subscribers:
    /// patches when the state computes them, the full snapshot otherwise.
    pub fn host(self: &Arc<Self>, key: impl Into<String>, state: SharedState<Value>) {
        let key = key.into();
        self.states
            .lock()
            .expect("states poisoned")
            .insert(key.clone(), state.clone());

        log::info!("[StateHost] hosting state '{key}'");
        let weak = Arc::downgrade(self);
        state.on_updated(move |snapshot, patches, sync_id| {
            let Some(host) = weak.upgrade() else {
                return;
            };
            host.broadcast_update(&key, snapshot, patches, sync_id);
        });
    }

    /// The shared state hosted under a key.
    pub fn state(&self, key: &str) -> Option<SharedState<Value>> {
        self.states.lock().expect("states poisoned").get(key).cloned()
    }

    /// A caller factory wrapping `inner` with the state-sync surface,
    /// scoped per session. Hand this to a transport preset.
    pub fn caller_factory(self: &Arc<Self>, inner: Arc<dyn FunctionCaller>) -> CallerFactory {
        let host = self.clone();
        Arc::new(move |info| host.caller_for(info.session, inner.clone()))
    }

    /// A session-scoped caller answering the state-sync surface and
    /// delegating everything else to `inner`.
    pub fn caller_for(
        self: &Arc<Self>,
        session: SessionId,
        inner: Arc<dyn FunctionCaller>,
    ) -> Arc<dyn FunctionCaller> {
        Arc::new(SessionScopedCaller {
            host: self.clone(),
            session,
            inner,
        })
    }

    fn broadcast_update(
        &self,
        key: &str,
        snapshot: &Arc<Value>,
        patches: Option<&[StatePatch]>,
        sync_id: &str,
    ) {
        let subscribed: HashSet<SessionId> = self
            .subscribers
            .lock()
            .expect("subscribers poisoned")
            .get(key)
            .cloned()
            .unwrap_or_default();
        if subscribed.is_empty() {
            return;
        }

        let (method, payload) = match patches {
            Some(patches) => (
                methods::PATCHED,
                serde_json::to_value(patches).unwrap_or(Value::Null),
            ),
            None => (methods::REPLACED, (**snapshot).clone()),
        };
        self.bridge.broadcast(
            method,
            vec![json!(key), payload, json!(sync_id)],
            |peer| subscribed.contains(&peer.session),
        );
    }

    fn subscribe(&self, key: &str, session: SessionId) {
        self.subscribers
            .lock()
            .expect("subscribers poisoned")
            .entry(key.to_string())
            .or_default()
            .insert(session);
        log::debug!("[StateHost] {session} subscribed to '{key}'");
    }

    fn drop_session(&self, session: SessionId) {
        let mut subscribers = self.subscribers.lock().expect("subscribers poisoned");
        for sessions in subscribers.values_mut() {
            sessions.remove(&session);
        }
        subscribers.retain(|_, sessions| !sessions.is_empty());
    }
}

struct SessionScopedCaller {
    host: Arc<StateHost>,
    session: SessionId,
    inner: Arc<dyn FunctionCaller>,
}

impl SessionScopedCaller {
    fn state_for(&self, key: &str, function: &str) -> Result<SharedState<Value>, CallError> {
        self.host.state(key).ok_or_else(|| CallError::Handler {
            function: function.to_string(),
            message: format!("no shared state hosted under key '{key}'"),
        })
    }
}

#[async_trait]
impl FunctionCaller for SessionScopedCaller {
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, CallError> {
        match name {
            methods::SUBSCRIBE => {
                let key = arg_str(&args, 0, name)?;
                // Existence check keeps a typo'd key loud instead of silent
                self.state_for(&key, name)?;
                self.host.subscribe(&key, self.session);
                Ok(Value::Null)
            }
            methods::GET => {
                let key = arg_str(&args, 0, name)?;
                let state = self.state_for(&key, name)?;
                // The seed id is pre-acknowledged: when the caller applies
                // this snapshot and forwards it back, the echo is a no-op
                let seed_id = uuid::Uuid::new_v4().to_string();
                state.mark_seen(&seed_id);
                Ok(json!([(*state.value()).clone(), seed_id]))
            }
            methods::REPLACED => {
                let key = arg_str(&args, 0, name)?;
                let sync_id = arg_str(&args, 2, name)?;
                let state = self.state_for(&key, name)?;
                let value = args.get(1).cloned().unwrap_or(Value::Null);
                state.replace(value, Some(&sync_id));
                Ok(Value::Null)
            }
            methods::PATCHED => {
                let key = arg_str(&args, 0, name)?;
                let sync_id = arg_str(&args, 2, name)?;
                let state = self.state_for(&key, name)?;
                let patches: Vec<StatePatch> =
                    serde_json::from_value(args.get(1).cloned().unwrap_or(Value::Null)).map_err(
                        |e| CallError::InvalidArgs {
                            function: name.to_string(),
                            message: e.to_string(),
                        },
                    )?;
                state
                    .patch(&patches, Some(&sync_id))
                    .map_err(|e| CallError::Handler {
                        function: name.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(Value::Null)
            }
            _ => self.inner.call(name, args).await,
        }
    }

    fn has(&self, name: &str) -> bool {
        matches!(
            name,
            methods::SUBSCRIBE | methods::GET | methods::REPLACED | methods::PATCHED
        ) || self.inner.has(name)
    }

    fn names(&self) -> Vec<String> {
        let mut names = self.inner.names();
        names.extend(
            [
                methods::SUBSCRIBE,
                methods::GET,
                methods::REPLACED,
                methods::PATCHED,
            ]
            .map(str::to_string),
        );
        names
    }
}

/// Consumer-side mirror attaching shared states through a client bridge.
pub struct StateMirror {
    states: Mutex<HashMap<String, SharedState<Value>>>,
    bridge: ClientBridge,
}

impl std::fmt::Debug for StateMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMirror").finish_non_exhaustive()
    }
}

impl StateMirror {
    /// Create a mirror and install its event handlers on the consumer's
    /// collector.
    ///
    /// Registration is idempotent: handlers already present (a second mirror
    /// on the same collector) are left in place.
    pub fn new<Ctx: Clone + Send + Sync + 'static>(
        bridge: ClientBridge,
        collector: &Collector<Ctx>,
    ) -> Arc<Self> {
        let mirror = Arc::new(Self {
            states: Mutex::new(HashMap::new()),
            bridge,
        });

        let replaced = {
            let mirror = Arc::downgrade(&mirror);
            FunctionDef::event(methods::REPLACED).handler(handler(move |args| {
                let mirror = mirror.clone();
                async move {
                    if let Some(mirror) = mirror.upgrade() {
                        mirror.apply_replaced(&args);
                    }
                    Ok(Value::Null)
                }
            }))
        };
        let patched = {
            let mirror = Arc::downgrade(&mirror);
            FunctionDef::event(methods::PATCHED).handler(handler(move |args| {
                let mirror = mirror.clone();
                async move {
                    if let Some(mirror) = mirror.upgrade() {
                        mirror.apply_patched(&args);
                    }
                    Ok(Value::Null)
                }
            }))
        };

        for def in [replaced, patched] {
            if let Err(crate::error::RegistryError::AlreadyRegistered(name)) =
                collector.register(def, false)
            {
                log::debug!("[StateMirror] handler '{name}' already installed");
            }
        }
        mirror
    }

    /// Subscribe to a key and return its locally mirrored state.
    ///
    /// # Errors
    ///
    /// Fails when the host does not expose the key or the channel drops
    /// during the handshake.
    pub async fn attach(self: &Arc<Self>, key: &str) -> Result<SharedState<Value>, CallError> {
        let state = SharedState::with_patches(Value::Null);
        self.states
            .lock()
            .expect("states poisoned")
            .insert(key.to_string(), state.clone());

        // Forward local mutations to the host with the same sync id
        {
            let bridge = self.bridge.clone();
            let key = key.to_string();
            state.on_updated(move |snapshot, patches, sync_id| {
                match patches {
                    Some(patches) => bridge.call_event(
                        methods::PATCHED,
                        vec![
                            json!(key),
                            serde_json::to_value(patches).unwrap_or(Value::Null),
                            json!(sync_id),
                        ],
                    ),
                    None => bridge.call_event(
                        methods::REPLACED,
                        vec![json!(key), (**snapshot).clone(), json!(sync_id)],
                    ),
                }
            });
        }

        self.bridge
            .call(methods::SUBSCRIBE, vec![json!(key)])
            .await?;
        let seed = self.bridge.call(methods::GET, vec![json!(key)]).await?;

        let value = seed.get(0).cloned().unwrap_or(Value::Null);
        let seed_id = seed.get(1).and_then(Value::as_str).map(str::to_string);
        state.replace(value, seed_id.as_deref());

        Ok(state)
    }

    /// The mirrored state for a key, if attached.
    pub fn state(&self, key: &str) -> Option<SharedState<Value>> {
        self.states.lock().expect("states poisoned").get(key).cloned()
    }

    fn apply_replaced(&self, args: &[Value]) {
        let Some(key) = args.first().and_then(Value::as_str) else {
            return;
        };
        let Some(sync_id) = args.get(2).and_then(Value::as_str) else {
            return;
        };
        let Some(state) = self.state(key) else {
            return;
        };
        state.replace(args.get(1).cloned().unwrap_or(Value::Null), Some(sync_id));
    }

    fn apply_patched(&self, args: &[Value]) {
        let Some(key) = args.first().and_then(Value::as_str) else {
            return;
        };
        let Some(sync_id) = args.get(2).and_then(Value::as_str) else {
            return;
        };
        let Some(state) = self.state(key) else {
            return;
        };
        let patches: Vec<StatePatch> =
            match serde_json::from_value(args.get(1).cloned().unwrap_or(Value::Null)) {
                Ok(patches) => patches,
                Err(e) => {
                    log::debug!("[StateMirror] undecodable patch list for '{key}': {e}");
                    return;
                }
            };
        if let Err(e) = state.patch(&patches, Some(sync_id)) {
            // A patch racing the initial snapshot can miss; the next full
            // replace restores consistency
            log::debug!("[StateMirror] patch for '{key}' did not apply: {e}");
        }
    }
}
