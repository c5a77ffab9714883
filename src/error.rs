//! Error types for the registry, call, transport, dump, and state layers.
//!
//! Each layer surfaces a dedicated enum so integration code can match on the
//! failure class it cares about (e.g. a replay miss vs. a missing function)
//! instead of string-probing a single opaque error.

// Rust guideline compliant 2026-03

/// Errors raised synchronously by `Collector::register` / `Collector::update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A definition with this name already exists and `force` was not set.
    AlreadyRegistered(String),
    /// No definition with this name exists and `force` was not set.
    NotRegistered(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRegistered(name) => {
                write!(f, "function '{name}' is already registered")
            }
            Self::NotRegistered(name) => {
                write!(
                    f,
                    "function '{name}' is not registered, use register() instead"
                )
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors surfaced to callers of a function, locally or across a bridge.
#[derive(Debug, Clone)]
pub enum CallError {
    /// The named function is not registered (or not present in a dump).
    FunctionNotFound(String),
    /// The definition's setup factory failed.
    Setup {
        /// Function whose setup failed.
        function: String,
        /// Failure description.
        message: String,
    },
    /// The handler itself returned an error.
    Handler {
        /// Function whose handler failed.
        function: String,
        /// Failure description.
        message: String,
    },
    /// The argument validator rejected the call.
    InvalidArgs {
        /// Function whose validator rejected.
        function: String,
        /// Rejection reason.
        message: String,
    },
    /// The return-value validator rejected the handler output.
    InvalidReturn {
        /// Function whose validator rejected.
        function: String,
        /// Rejection reason.
        message: String,
    },
    /// The remote peer reported a handler failure.
    Remote(String),
    /// A dump store has the function but no record matching these arguments.
    NoDumpMatch {
        /// Function that was called.
        function: String,
        /// JSON rendering of the arguments that failed to match.
        args: String,
    },
    /// An error reconstructed from a dump record.
    Replayed {
        /// Stored error name.
        name: String,
        /// Stored error message.
        message: String,
    },
    /// The channel closed before a response arrived.
    ChannelClosed,
    /// An inbound frame could not be decoded.
    Decode(String),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FunctionNotFound(name) => write!(f, "function not found: {name}"),
            Self::Setup { function, message } => {
                write!(f, "setup for '{function}' failed: {message}")
            }
            Self::Handler { function, message } => {
                write!(f, "handler '{function}' failed: {message}")
            }
            Self::InvalidArgs { function, message } => {
                write!(f, "invalid arguments for '{function}': {message}")
            }
            Self::InvalidReturn { function, message } => {
                write!(f, "invalid return value from '{function}': {message}")
            }
            Self::Remote(message) => write!(f, "remote error: {message}"),
            Self::NoDumpMatch { function, args } => {
                write!(f, "no dump record matches '{function}' called with {args}")
            }
            Self::Replayed { name, message } => write!(f, "{name}: {message}"),
            Self::ChannelClosed => write!(f, "channel closed"),
            Self::Decode(message) => write!(f, "decode error: {message}"),
        }
    }
}

impl std::error::Error for CallError {}

/// Errors that can occur during channel operations.
#[derive(Debug)]
pub enum ChannelError {
    /// Failed to establish a connection.
    ConnectionFailed(String),
    /// Failed to send a message.
    SendFailed(String),
    /// Failed to encode an outbound frame.
    Encode(String),
    /// Failed to decode an inbound frame.
    Decode(String),
    /// The underlying transport failed mid-stream.
    Transport(String),
    /// The channel was closed.
    Closed,
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "connection failed: {msg}"),
            Self::SendFailed(msg) => write!(f, "send failed: {msg}"),
            Self::Encode(msg) => write!(f, "encode error: {msg}"),
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Errors raised while collecting a dump store.
#[derive(Debug, Clone)]
pub enum DumpError {
    /// A side-effecting definition carries a dump spec.
    NotDumpable {
        /// Offending function name.
        name: String,
        /// The function's invocation kind, rendered for the message.
        kind: String,
    },
    /// Setup resolution failed for a definition being dumped.
    Setup {
        /// Function whose setup failed.
        name: String,
        /// Failure description.
        message: String,
    },
    /// A dump factory failed to produce its data.
    Factory {
        /// Function whose factory failed.
        name: String,
        /// Failure description.
        message: String,
    },
}

impl std::fmt::Display for DumpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotDumpable { name, kind } => {
                write!(f, "function '{name}' of kind '{kind}' cannot carry a dump spec")
            }
            Self::Setup { name, message } => {
                write!(f, "setup for '{name}' failed during dump: {message}")
            }
            Self::Factory { name, message } => {
                write!(f, "dump factory for '{name}' failed: {message}")
            }
        }
    }
}

impl std::error::Error for DumpError {}

/// Errors raised while applying structural patches to a shared state.
#[derive(Debug, Clone)]
pub enum StateError {
    /// A patch path does not resolve within the current value tree.
    BadPath(String),
    /// The patched value tree no longer deserializes into the state type.
    Shape(String),
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadPath(path) => write!(f, "patch path does not resolve: {path}"),
            Self::Shape(msg) => write!(f, "patched state has the wrong shape: {msg}"),
        }
    }
}

impl std::error::Error for StateError {}
