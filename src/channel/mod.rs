//! Transport-neutral duplex channel abstraction and its presets.
//!
//! A channel moves opaque byte payloads in both directions; the paired
//! [`Codec`] turns RPC frames into those payloads and back. Bridges own the
//! two halves independently (one read task, one write task), so the halves
//! are separate traits rather than one object.
//!
//! # Presets
//!
//! - [`memory`] - in-process duplex pair (tests, same-process panels)
//! - [`ws_client`] - WebSocket client (queues posts until the socket opens)
//! - [`ws_server`] - WebSocket listener feeding a server bridge

// Rust guideline compliant 2026-03

pub mod memory;
pub mod ws_client;
pub mod ws_server;

use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::Codec;
use crate::error::ChannelError;

/// Write half of a channel.
#[async_trait]
pub trait ChannelSender: Send {
    /// Send one payload. Ordering is preserved per channel.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Closed` or `ChannelError::SendFailed` when the
    /// transport can no longer deliver.
    async fn post(&mut self, payload: Vec<u8>) -> Result<(), ChannelError>;

    /// Close the write half. Default is a no-op for transports where
    /// dropping the half is sufficient.
    async fn close(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Read half of a channel.
#[async_trait]
pub trait ChannelReceiver: Send {
    /// Receive the next payload; `None` signals a clean close.
    ///
    /// # Errors
    ///
    /// Returns a transport error for abnormal termination.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ChannelError>;
}

/// A connected duplex channel: both halves plus the frame codec.
pub struct ChannelPair {
    /// Write half.
    pub sender: Box<dyn ChannelSender>,
    /// Read half.
    pub receiver: Box<dyn ChannelReceiver>,
    /// Frame codec both sides agreed on.
    pub codec: Arc<dyn Codec>,
}

impl std::fmt::Debug for ChannelPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPair").finish_non_exhaustive()
    }
}

/// Write half backed by an in-process queue.
///
/// Used by presets whose real I/O runs in a background task: posting never
/// blocks, and payloads queued before the transport is ready are delivered
/// once it is.
pub(crate) struct QueueSender {
    pub(crate) tx: Option<tokio::sync::mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl ChannelSender for QueueSender {
    async fn post(&mut self, payload: Vec<u8>) -> Result<(), ChannelError> {
        match &self.tx {
            Some(tx) => tx.send(payload).map_err(|_| ChannelError::Closed),
            None => Err(ChannelError::Closed),
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.tx = None;
        Ok(())
    }
}

/// Read half backed by an in-process queue.
pub(crate) struct QueueReceiver {
    pub(crate) rx: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl ChannelReceiver for QueueReceiver {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        Ok(self.rx.recv().await)
    }
}

/// Connection state reported by the WebSocket client preset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Connected and ready.
    Connected,
    /// Reconnecting after a disconnect (only with reconnect enabled).
    Reconnecting {
        /// Current reconnection attempt number.
        attempt: u32,
        /// Milliseconds until the next retry.
        next_retry_ms: u64,
    },
}
