//! Transport lifecycle: open, authenticate, read loop, close semantics.
//!
//! Exactly one connection exists at a time; each established connection is
//! stamped with a generation number so frames or close notifications from a
//! superseded reader task can never be mistaken for current ones.

use crate::error::EngineError;
use crate::session::protocol::ServerMessage;
use crate::session::router;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{CloseFrame, Message as WsMessage, frame::coding::CloseCode},
};
use tracing::{info, warn};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Events the reader task and reconnect timer feed into the engine.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// One raw text frame, in arrival order.
    Frame { generation: u64, raw: String },
    /// The transport closed. `clean` means the peer used a normal close
    /// code; anything else is an abnormal closure.
    Closed { generation: u64, clean: bool },
    /// The reconnection backoff elapsed.
    ReconnectDue { generation: u64 },
}

/// An authenticated, established connection: the write half plus the reader
/// task pumping the read half into the engine's inbound channel.
pub(crate) struct Connection {
    pub generation: u64,
    sink: SplitSink<WsStream, WsMessage>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Opens the transport, bounded by `timeout`.
    pub async fn open(url: &str, timeout: Duration) -> Result<WsStream, EngineError> {
        match tokio::time::timeout(timeout, connect_async(url)).await {
            Err(_) => Err(EngineError::ConnectTimeout(timeout)),
            Ok(Err(e)) => Err(EngineError::transport(e)),
            Ok(Ok((ws, _response))) => {
                info!(url, "transport open");
                Ok(ws)
            }
        }
    }

    /// Sends the authenticate frame and waits for the service's
    /// acknowledgement. A transport that opens but never acknowledges
    /// within `timeout` is a connection failure, not a hang.
    pub async fn authenticate(
        mut ws: WsStream,
        auth_frame: String,
        timeout: Duration,
    ) -> Result<WsStream, EngineError> {
        ws.send(WsMessage::Text(auth_frame.into()))
            .await
            .map_err(EngineError::transport)?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let next = match tokio::time::timeout_at(deadline, ws.next()).await {
                Err(_) => return Err(EngineError::AuthTimeout(timeout)),
                Ok(None) => {
                    return Err(EngineError::Transport(
                        "connection closed during authentication".to_string(),
                    ));
                }
                Ok(Some(Err(e))) => return Err(EngineError::transport(e)),
                Ok(Some(Ok(msg))) => msg,
            };
            let WsMessage::Text(text) = next else {
                continue;
            };
            match router::parse(&text) {
                Some(ServerMessage::AuthSuccess { .. }) | Some(ServerMessage::SessionReady) => {
                    info!("authenticated");
                    return Ok(ws);
                }
                Some(ServerMessage::Error { message }) => {
                    // Give the service its close handshake; the error is
                    // fatal for this attempt either way.
                    let _ = ws.close(None).await;
                    return Err(EngineError::AuthRejected(message));
                }
                Some(other) => {
                    warn!(?other, "ignoring frame received before authentication");
                }
                None => {}
            }
        }
    }

    /// Splits an authenticated stream and spawns its reader task.
    pub fn establish(ws: WsStream, generation: u64, inbound_tx: mpsc::Sender<Inbound>) -> Self {
        let (sink, stream) = ws.split();
        let reader = tokio::spawn(read_loop(stream, generation, inbound_tx));
        Self {
            generation,
            sink,
            reader,
        }
    }

    /// Writes one already-serialized text frame.
    pub async fn send_frame(&mut self, frame: String) -> Result<(), EngineError> {
        self.sink
            .send(WsMessage::Text(frame.into()))
            .await
            .map_err(EngineError::transport)
    }

    /// Deliberate close: a normal close code with a reason the service can
    /// distinguish from an abnormal drop. The reader is stopped first so
    /// the close never surfaces as an abnormal closure to the engine.
    pub async fn close_gracefully(mut self) {
        self.reader.abort();
        let close = WsMessage::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "client disconnect".into(),
        }));
        let _ = self.sink.send(close).await;
        let _ = self.sink.close().await;
        info!("transport closed deliberately");
    }

    /// Drops the connection without the close handshake (the transport is
    /// already dead or being replaced).
    pub fn abandon(self) {
        self.reader.abort();
    }
}

/// Pumps inbound frames into the engine in strict arrival order, then
/// reports the closure exactly once.
async fn read_loop(mut stream: SplitStream<WsStream>, generation: u64, tx: mpsc::Sender<Inbound>) {
    while let Some(result) = stream.next().await {
        match result {
            Ok(WsMessage::Text(text)) => {
                let frame = Inbound::Frame {
                    generation,
                    raw: text.to_string(),
                };
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
            Ok(WsMessage::Close(frame)) => {
                let clean = frame
                    .as_ref()
                    .is_some_and(|f| f.code == CloseCode::Normal);
                let _ = tx.send(Inbound::Closed { generation, clean }).await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "transport read error");
                let _ = tx
                    .send(Inbound::Closed {
                        generation,
                        clean: false,
                    })
                    .await;
                return;
            }
        }
    }
    // Stream ended without a close frame: abnormal.
    let _ = tx
        .send(Inbound::Closed {
            generation,
            clean: false,
        })
        .await;
}
