//! WebSocket server channel preset.
//!
//! Binds one TCP listener and runs an accept loop: each inbound connection is
//! upgraded, wrapped into a [`ChannelPair`], and handed to the given
//! [`ServerBridge`], which assigns it a session id and removes it on close.
//! Binding port 0 and reading back [`WsServer::local_addr`] supports
//! ephemeral-port setups.

// Rust guideline compliant 2026-03

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite, WebSocketStream};

use super::{ChannelPair, ChannelReceiver, ChannelSender};
use crate::codec::{CborCodec, Codec};
use crate::error::ChannelError;
use crate::rpc::server::{CallerFactory, ServerBridge};

/// Options for [`WsServer::bind`].
#[derive(Clone, Default)]
pub struct WsServerOptions {
    /// Frame codec; defaults to CBOR.
    pub codec: Option<Arc<dyn Codec>>,
    /// Per-peer caller factory; defaults to the bridge's shared caller.
    pub caller_factory: Option<CallerFactory>,
}

/// Listening WebSocket endpoint feeding a [`ServerBridge`].
#[derive(Debug)]
pub struct WsServer {
    local_addr: SocketAddr,
    accept_handle: JoinHandle<()>,
}

impl WsServer {
    /// Bind the listener and start the accept loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: &str, bridge: ServerBridge, options: WsServerOptions) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;
        let local_addr = listener.local_addr().context("listener has no local addr")?;
        let codec = options.codec.unwrap_or_else(|| Arc::new(CborCodec));

        log::info!("[WsServer] listening on {local_addr}");
        let accept_handle = tokio::spawn(accept_loop(
            listener,
            bridge,
            codec,
            options.caller_factory,
        ));

        Ok(Self {
            local_addr,
            accept_handle,
        })
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting connections. Existing peers keep their channels.
    pub fn shutdown(self) {
        self.accept_handle.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    bridge: ServerBridge,
    codec: Arc<dyn Codec>,
    caller_factory: Option<CallerFactory>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                let bridge = bridge.clone();
                let codec = codec.clone();
                let caller_factory = caller_factory.clone();
                tokio::spawn(async move {
                    let ws = match accept_async(stream).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            log::warn!("[WsServer] handshake with {remote_addr} failed: {e}");
                            return;
                        }
                    };
                    let (sink, read) = ws.split();
                    let pair = ChannelPair {
                        sender: Box::new(WsSink { sink }),
                        receiver: Box::new(WsRead { read }),
                        codec,
                    };
                    let labels = HashMap::from([(
                        "remote_addr".to_string(),
                        remote_addr.to_string(),
                    )]);
                    let session = match caller_factory {
                        Some(factory) => {
                            bridge.add_channel_with(pair, labels, |info| factory(info))
                        }
                        None => bridge.add_channel(pair, labels),
                    };
                    log::debug!("[WsServer] {remote_addr} attached as {session}");
                });
            }
            Err(e) => {
                log::error!("[WsServer] accept error: {e}");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

struct WsSink {
    sink: SplitSink<WebSocketStream<TcpStream>, tungstenite::Message>,
}

#[async_trait]
impl ChannelSender for WsSink {
    async fn post(&mut self, payload: Vec<u8>) -> Result<(), ChannelError> {
        self.sink
            .send(tungstenite::Message::binary(payload))
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.sink
            .close()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }
}

struct WsRead {
    read: SplitStream<WebSocketStream<TcpStream>>,
}

#[async_trait]
impl ChannelReceiver for WsRead {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        loop {
            match self.read.next().await {
                Some(Ok(tungstenite::Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Ok(Some(text.to_string().into_bytes()))
                }
                Some(Ok(tungstenite::Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {
                    // Ping/pong handled by the underlying stream
                }
                Some(Err(e)) => return Err(ChannelError::Transport(e.to_string())),
            }
        }
    }
}
