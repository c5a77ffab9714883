//! Bidirectional RPC protocol: wire frames and the client/server bridges.
//!
//! # Architecture
//!
//! ```text
//! Collector (local functions)          Collector (local functions)
//!     │                                     │
//! ClientBridge ◄── ChannelPair ──► ServerBridge (N peers)
//!     │  call / call_event / call_optional  │  broadcast(filter)
//! ```
//!
//! Both bridge variants speak the same frame vocabulary: a request carries a
//! correlation id and is answered by exactly one response; an event is
//! fire-and-forget in either direction.
//!
//! # Modules
//!
//! - [`bridge`] - client-side bridge (single channel)
//! - [`server`] - server-side bridge (dynamic channel set, fan-out)

// Rust guideline compliant 2026-03

pub mod bridge;
pub mod server;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for a connected peer session on a server bridge.
///
/// Assigned monotonically as channels connect; never reused within one
/// server bridge's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Machine-readable class of a wire error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorCode {
    /// The called function is not registered on the receiving side.
    FunctionNotFound,
    /// The handler (or its setup/validators) failed.
    Handler,
    /// The request itself could not be processed.
    BadRequest,
}

/// Error payload carried inside a response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    /// Failure class, used for dispatch on the calling side.
    pub code: WireErrorCode,
    /// Human-readable description.
    pub message: String,
}

/// A single protocol frame.
///
/// Frames travel in both directions: either side may issue requests and
/// events; responses always answer a request from the opposite side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcFrame {
    /// A call expecting exactly one response with the same id.
    Request {
        /// Correlation id, unique per originating bridge.
        id: u64,
        /// Function name to invoke on the receiving side.
        method: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
    },
    /// The answer to a request.
    Response {
        /// Correlation id copied from the request.
        id: u64,
        /// Successful return value, absent on error.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Failure payload, absent on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    /// A fire-and-forget invocation; no response is ever sent.
    Event {
        /// Function name to invoke on the receiving side.
        method: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
    },
}
