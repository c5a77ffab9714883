//! Panelbus - RPC and state-synchronization core for tool panels.
//!
//! This crate lets producers (plugins running inside a long-lived tool
//! process) expose callable functions and shared, synchronized state to
//! consumers (browser-side panels) over transports that may appear and
//! disappear at runtime.
//!
//! # Architecture
//!
//! ```text
//! producer process                          consumer (panel)
//! Collector ── ServerBridge ══ WebSocket ══ ClientBridge ── Collector
//!     │              │                            │
//! SharedState ── StateHost          StateMirror ──┴── SharedState
//!
//! build time:  Collector ── dump_functions ──► dump.json
//! static host: dump.json ── ReplayClient  ──► consumer calls
//! ```
//!
//! A producer registers [`FunctionDef`]s with a [`Collector`] and hosts it
//! behind a [`ServerBridge`] bound to the WebSocket server preset. Consumers
//! attach a [`ClientBridge`] over the client preset and call through it;
//! shared state keys are mirrored with [`StateHost`] / [`StateMirror`]. When
//! no live channel exists, a [`DumpStore`] collected ahead of time answers
//! calls through a [`ReplayClient`].
//!
//! # Modules
//!
//! - [`collector`] - function registry and the [`FunctionCaller`] seam
//! - [`function`] - function definitions, kinds, lazy setup resolution
//! - [`rpc`] - wire frames and the client/server bridges
//! - [`channel`] - transport abstraction and presets (memory, WebSocket)
//! - [`codec`] - frame codecs (CBOR default, JSON for debugging)
//! - [`cache`] - opt-in result cache keyed by argument hash
//! - [`dump`] - dump collection and replay
//! - [`state`] - immutable-snapshot shared state with patches and sync ids
//! - [`mirror`] - state mirroring across bridges
//! - [`meta`] - connection metadata file for browser bootstrap

pub mod cache;
pub mod channel;
pub mod codec;
pub mod collector;
pub mod dump;
pub mod error;
pub mod function;
pub mod hash;
pub mod meta;
pub mod mirror;
pub mod rpc;
pub mod state;

// Re-export commonly used types
pub use cache::{CacheOptions, RpcCacheManager};
pub use channel::{ChannelPair, ChannelReceiver, ChannelSender, ConnectionState};
pub use codec::{CborCodec, Codec, JsonCodec};
pub use collector::{Collector, FunctionCaller};
pub use dump::replay::ReplayClient;
pub use dump::{dump_functions, Concurrency, DumpOptions, DumpRecord, DumpStore};
pub use error::{CallError, ChannelError, DumpError, RegistryError, StateError};
pub use function::{handler, sync_handler, DumpData, FunctionDef, FunctionKind, Handler};
pub use meta::{Backend, ConnectionMeta, WsEndpoint};
pub use mirror::{StateHost, StateMirror};
pub use rpc::bridge::{BridgeOptions, ClientBridge};
pub use rpc::server::{PeerInfo, ServerBridge, ServerOptions};
pub use rpc::SessionId;
pub use state::{PatchOp, SharedState, StatePatch};
