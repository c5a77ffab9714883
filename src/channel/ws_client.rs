//! WebSocket client channel preset.
//!
//! `open()` returns a usable [`ChannelPair`] immediately: payloads posted
//! before the socket reaches the open state sit in the outgoing queue and are
//! drained once the handshake completes. The background connection task owns
//! the socket and multiplexes outgoing payloads with inbound frames in one
//! `tokio::select!` loop.
//!
//! Reconnection is opt-in. With `reconnect` disabled a dropped socket simply
//! stops delivering: the receiver yields `None` and the pair is dead. With it
//! enabled, the task retries with capped exponential backoff and the same
//! outgoing queue keeps buffering across attempts.

// Rust guideline compliant 2026-03

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{connect_async, tungstenite};

use super::{ChannelPair, ConnectionState, QueueReceiver, QueueSender};
use crate::codec::{CborCodec, Codec};

/// First retry delay with reconnect enabled.
const INITIAL_RETRY_MS: u64 = 500;
/// Upper bound on the retry delay.
const MAX_RETRY_MS: u64 = 30_000;

/// Hook fired on lifecycle transitions.
pub type LifecycleHook = Arc<dyn Fn() + Send + Sync>;

/// Hook fired with a transport error description.
pub type TransportErrorHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Options for [`open`].
#[derive(Clone, Default)]
pub struct WsClientOptions {
    /// WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Auth token appended as a `token` query parameter.
    pub token: Option<String>,
    /// Retry with capped backoff after a failed connect or a disconnect.
    pub reconnect: bool,
    /// Frame codec; defaults to CBOR.
    pub codec: Option<Arc<dyn Codec>>,
    /// Fired each time the socket reaches the open state.
    pub on_connected: Option<LifecycleHook>,
    /// Fired each time an open socket closes.
    pub on_disconnected: Option<LifecycleHook>,
    /// Fired with connect and mid-stream transport errors.
    pub on_error: Option<TransportErrorHook>,
}

/// Observable connection state of a client opened with [`open`].
///
/// Cheap to clone; all clones observe the same connection.
#[derive(Clone)]
pub struct WsClientHandle {
    state: Arc<Mutex<ConnectionState>>,
}

impl WsClientHandle {
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.lock().expect("state poisoned").clone()
    }

    /// Whether the socket is currently open.
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected)
    }
}

/// Open a WebSocket client channel.
///
/// Returns immediately; the connection is established in the background.
pub fn open(options: WsClientOptions) -> (ChannelPair, WsClientHandle) {
    let codec = options
        .codec
        .clone()
        .unwrap_or_else(|| Arc::new(CborCodec));
    let state = Arc::new(Mutex::new(ConnectionState::Connecting));

    let (out_tx, out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    tokio::spawn(connection_task(options.clone(), out_rx, in_tx, state.clone()));

    let pair = ChannelPair {
        sender: Box::new(QueueSender { tx: Some(out_tx) }),
        receiver: Box::new(QueueReceiver { rx: in_rx }),
        codec,
    };
    (pair, WsClientHandle { state })
}

/// Build the connect URL, appending the auth token when present.
pub fn connect_url(url: &str, token: Option<&str>) -> String {
    match token {
        Some(token) => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{url}{sep}token={token}")
        }
        None => url.to_string(),
    }
}

fn set_state(state: &Arc<Mutex<ConnectionState>>, next: ConnectionState) {
    *state.lock().expect("state poisoned") = next;
}

fn backoff_ms(attempt: u32) -> u64 {
    (INITIAL_RETRY_MS << attempt.min(6)).min(MAX_RETRY_MS)
}

async fn connection_task(
    options: WsClientOptions,
    mut out_rx: UnboundedReceiver<Vec<u8>>,
    in_tx: UnboundedSender<Vec<u8>>,
    state: Arc<Mutex<ConnectionState>>,
) {
    let url = connect_url(&options.url, options.token.as_deref());
    let mut attempt: u32 = 0;

    loop {
        set_state(&state, ConnectionState::Connecting);
        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                attempt = 0;
                set_state(&state, ConnectionState::Connected);
                log::info!("[WsClient] connected to {}", options.url);
                if let Some(hook) = &options.on_connected {
                    hook();
                }

                let done = pump(stream, &mut out_rx, &in_tx, &options).await;
                set_state(&state, ConnectionState::Disconnected);
                log::info!("[WsClient] disconnected from {}", options.url);
                if let Some(hook) = &options.on_disconnected {
                    hook();
                }
                if done {
                    // Local side closed the sender; do not reconnect
                    return;
                }
            }
            Err(e) => {
                log::warn!("[WsClient] connect to {} failed: {e}", options.url);
                if let Some(hook) = &options.on_error {
                    hook(&e.to_string());
                }
            }
        }

        if !options.reconnect {
            set_state(&state, ConnectionState::Disconnected);
            // Dropping in_tx ends the receiver with a clean close
            return;
        }

        attempt += 1;
        let delay = backoff_ms(attempt - 1);
        set_state(
            &state,
            ConnectionState::Reconnecting {
                attempt,
                next_retry_ms: delay,
            },
        );
        log::info!(
            "[WsClient] reconnecting to {} in {delay}ms (attempt {attempt})",
            options.url
        );
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }
}

/// Run one connected socket until it drops. Returns `true` when the local
/// sender was closed (no reconnect wanted).
async fn pump(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    out_rx: &mut UnboundedReceiver<Vec<u8>>,
    in_tx: &UnboundedSender<Vec<u8>>,
    options: &WsClientOptions,
) -> bool {
    let (mut sink, mut read) = stream.split();

    loop {
        tokio::select! {
            out = out_rx.recv() => match out {
                Some(bytes) => {
                    if let Err(e) = sink.send(tungstenite::Message::binary(bytes)).await {
                        log::warn!("[WsClient] send failed: {e}");
                        if let Some(hook) = &options.on_error {
                            hook(&e.to_string());
                        }
                        return false;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return true;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    if in_tx.send(data.to_vec()).is_err() {
                        // Receiver dropped: nobody is listening anymore
                        return true;
                    }
                }
                Some(Ok(tungstenite::Message::Text(text))) => {
                    if in_tx.send(text.to_string().into_bytes()).is_err() {
                        return true;
                    }
                }
                Some(Ok(tungstenite::Message::Close(_))) | None => return false,
                Some(Ok(_)) => {
                    // Ping/pong handled by the underlying stream
                }
                Some(Err(e)) => {
                    log::warn!("[WsClient] read failed: {e}");
                    if let Some(hook) = &options.on_error {
                        hook(&e.to_string());
                    }
                    return false;
                }
            },
        }
    }
}
