//! Connection metadata file.
//!
//! The producing process writes a small JSON file describing how consumers
//! should reach it: a live WebSocket endpoint (port or explicit URL) or
//! `static` when a dump store stands in for a live server. Browser-side
//! bootstrap code reads this file from the served output.

// Rust guideline compliant 2026-03

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// How consumers reach the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A live WebSocket endpoint is available.
    Websocket,
    /// No live endpoint; calls are answered from a dump store.
    Static,
}

/// WebSocket endpoint: a bare port (same host) or an explicit URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsEndpoint {
    /// Port on the host serving the consumer.
    Port(u16),
    /// Full `ws://` / `wss://` URL (http schemes are normalized).
    Url(String),
}

/// Contents of the connection metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMeta {
    /// Selected backend.
    pub backend: Backend,
    /// Endpoint when the backend is `websocket`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket: Option<WsEndpoint>,
}

impl ConnectionMeta {
    /// Metadata announcing a live WebSocket endpoint.
    pub fn websocket(endpoint: WsEndpoint) -> Self {
        Self {
            backend: Backend::Websocket,
            websocket: Some(endpoint),
        }
    }

    /// Metadata announcing a static (dump-served) build.
    pub fn static_backend() -> Self {
        Self {
            backend: Backend::Static,
            websocket: None,
        }
    }

    /// Resolve the WebSocket URL for a consumer served from `host`.
    ///
    /// `None` for static builds.
    pub fn ws_url(&self, host: &str) -> Option<String> {
        match self.websocket.as_ref()? {
            WsEndpoint::Port(port) => Some(format!("ws://{host}:{port}")),
            WsEndpoint::Url(url) => Some(http_to_ws_scheme(url)),
        }
    }

    /// Write the metadata file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize metadata")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write metadata to {}", path.display()))?;
        Ok(())
    }

    /// Read a metadata file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read metadata from {}", path.display()))?;
        serde_json::from_str(&json).context("failed to parse metadata")
    }
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://").replace("http://", "ws://")
    }
}
