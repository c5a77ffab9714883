//! In-process duplex channel preset.
//!
//! Two [`ChannelPair`]s whose sends cross over unbounded queues. Used by
//! same-process producer/consumer wiring and by tests that do not want a
//! real socket.

// Rust guideline compliant 2026-03

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{ChannelPair, QueueReceiver, QueueSender};
use crate::codec::{CborCodec, Codec};

/// A crossed pair of in-process channels with the default CBOR codec.
pub fn pair() -> (ChannelPair, ChannelPair) {
    pair_with(Arc::new(CborCodec))
}

/// A crossed pair of in-process channels with an explicit codec.
pub fn pair_with(codec: Arc<dyn Codec>) -> (ChannelPair, ChannelPair) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();

    let a = ChannelPair {
        sender: Box::new(QueueSender { tx: Some(a_tx) }),
        receiver: Box::new(QueueReceiver { rx: a_rx }),
        codec: codec.clone(),
    };
    let b = ChannelPair {
        sender: Box::new(QueueSender { tx: Some(b_tx) }),
        receiver: Box::new(QueueReceiver { rx: b_rx }),
        codec,
    };
    (a, b)
}
