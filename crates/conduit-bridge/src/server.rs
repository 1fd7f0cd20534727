//! Per-session bridge WebSocket server.
//!
//! One ephemeral listener per session, bound to a pooled localhost port.
//! Exactly one client (the spawned agent) is attached at a time: a second
//! connection replaces the first, which is closed with a normal closure.
//! Inbound text frames are `\n`-terminated if needed — the only place that
//! concession to missing frame terminators is made — and fed through the
//! NDJSON parser to the message sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::BridgeError;
use crate::ndjson::{NdjsonParser, to_ndjson};

/// Callback receiving each parsed inbound frame.
pub type MessageSink = Arc<dyn Fn(Value) + Send + Sync>;

struct ClientHandle {
    generation: u64,
    tx: mpsc::UnboundedSender<Message>,
}

struct BridgeInner {
    session_id: String,
    port: u16,
    client: Mutex<Option<ClientHandle>>,
    generation: AtomicU64,
    connected_tx: watch::Sender<bool>,
    on_message: MessageSink,
    shutdown: CancellationToken,
}

/// Per-session bridge endpoint.
pub struct BridgeServer {
    inner: Arc<BridgeInner>,
    connected_rx: watch::Receiver<bool>,
    accept_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BridgeServer {
    /// Bind `127.0.0.1:<port>` and start accepting.
    ///
    /// Bind failure propagates — the session manager releases the port and
    /// marks the session errored.
    pub async fn start(
        session_id: impl Into<String>,
        port: u16,
        on_message: MessageSink,
    ) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| BridgeError::Bind { port, source })?;

        let (connected_tx, connected_rx) = watch::channel(false);
        let inner = Arc::new(BridgeInner {
            session_id: session_id.into(),
            port,
            client: Mutex::new(None),
            generation: AtomicU64::new(0),
            connected_tx,
            on_message,
            shutdown: CancellationToken::new(),
        });

        debug!(session_id = %inner.session_id, port, "bridge listening");
        let accept_task = tokio::spawn(accept_loop(Arc::clone(&inner), listener));
        Ok(Self {
            inner,
            connected_rx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Whether a client socket is currently attached.
    pub fn is_connected(&self) -> bool {
        self.inner.client.lock().is_some()
    }

    /// Suspend until a client connects (returns immediately if one already
    /// is). This is the connect signal `create()` races against the
    /// subprocess-exit watch and the 15-second timer.
    pub async fn wait_connected(&self) {
        let mut rx = self.connected_rx.clone();
        let _ = rx.wait_for(|connected| *connected).await;
    }

    /// Serialize a frame as NDJSON and hand it to the attached client.
    ///
    /// With no client attached (or a closed socket) this is a warn-level
    /// no-op — callers are expected to have gated on [`Self::is_connected`].
    /// Serialization and I/O failures are logged and swallowed; send errors
    /// never propagate.
    pub fn send<T: Serialize>(&self, frame: &T) -> bool {
        let line = match to_ndjson(frame) {
            Ok(line) => line,
            Err(error) => {
                warn!(session_id = %self.inner.session_id, %error, "failed to serialize outbound frame");
                return false;
            }
        };
        let client = self.inner.client.lock();
        let Some(handle) = client.as_ref() else {
            warn!(session_id = %self.inner.session_id, "send with no bridge client attached");
            return false;
        };
        if handle.tx.send(Message::Text(line.into())).is_err() {
            warn!(session_id = %self.inner.session_id, "bridge client channel closed, dropped outbound frame");
            return false;
        }
        counter!("bridge_frames_sent_total").increment(1);
        true
    }

    /// Stop accepting, detach the client, and tear the listener down.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        {
            // Dropping the handle closes the writer channel, which sends the
            // close frame path in the writer task.
            let mut client = self.inner.client.lock();
            *client = None;
        }
        let _ = self.inner.connected_tx.send(false);
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        debug!(session_id = %self.inner.session_id, port = self.inner.port, "bridge closed");
    }
}

async fn accept_loop(inner: Arc<BridgeInner>, listener: TcpListener) {
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let _ = tokio::spawn(handle_client(Arc::clone(&inner), stream));
                    }
                    Err(error) => {
                        warn!(session_id = %inner.session_id, %error, "bridge accept failed");
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    }
                }
            }
        }
    }
}

async fn handle_client(inner: Arc<BridgeInner>, stream: TcpStream) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            warn!(session_id = %inner.session_id, %error, "bridge websocket handshake failed");
            return;
        }
    };

    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // One-client policy: installing this socket displaces any previous one,
    // which is closed with a normal closure.
    let displaced = {
        let mut client = inner.client.lock();
        client.replace(ClientHandle { generation, tx })
    };
    if let Some(old) = displaced {
        let _ = old.tx.send(Message::Close(None));
        info!(session_id = %inner.session_id, "bridge client replaced by new connection");
    }
    let _ = inner.connected_tx.send(true);
    info!(session_id = %inner.session_id, port = inner.port, "agent connected to bridge");
    counter!("bridge_connections_total").increment(1);

    // Writer: drains the outbound channel into the socket. Ends when the
    // handle is dropped (replaced/closed) or after forwarding a Close.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(error) = sink.send(message).await {
                debug!(%error, "bridge write failed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Reader: NDJSON-parse every text frame. Parser state is per-connection.
    let mut parser = NdjsonParser::new();
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        counter!("bridge_frames_received_total").increment(1);
                        let mut text = text.as_str().to_owned();
                        if !text.ends_with('\n') {
                            text.push('\n');
                        }
                        parser.feed(&text, |value| (inner.on_message)(value));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary / ping / pong: nothing to route
                    Some(Err(error)) => {
                        debug!(session_id = %inner.session_id, %error, "bridge read error");
                        break;
                    }
                }
            }
        }
    }

    // Surface a final unterminated message, if any.
    parser.flush(|value| (inner.on_message)(value));

    // Detach only if this socket is still the current one — a rapid
    // reconnect may already have replaced it.
    {
        let mut client = inner.client.lock();
        if client.as_ref().is_some_and(|c| c.generation == generation) {
            *client = None;
            let _ = inner.connected_tx.send(false);
            debug!(session_id = %inner.session_id, "agent disconnected from bridge");
        }
    }
    let _ = writer.await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests — drive the bridge with a real tokio-tungstenite client
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio_tungstenite::connect_async;

    async fn free_port() -> u16 {
        // Bind port 0, read the assigned port, release. Rebinding races are
        // unlikely within one test.
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn channel_sink() -> (MessageSink, tokio::sync::mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = unbounded_channel();
        let sink: MessageSink = Arc::new(move |value| {
            let _ = tx.send(value);
        });
        (sink, rx)
    }

    async fn recv_timeout(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Value>) -> Value {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for bridge message")
            .expect("sink channel closed")
    }

    #[tokio::test]
    async fn bind_failure_propagates() {
        let port = free_port().await;
        let (sink, _rx) = channel_sink();
        let bridge = BridgeServer::start("s1", port, Arc::clone(&sink)).await.unwrap();

        // Second listener on the same port must fail with a typed error.
        let result = BridgeServer::start("s2", port, sink).await;
        assert!(matches!(result, Err(BridgeError::Bind { port: p, .. }) if p == port));
        bridge.close().await;
    }

    #[tokio::test]
    async fn client_connects_and_frames_are_parsed() {
        let port = free_port().await;
        let (sink, mut rx) = channel_sink();
        let bridge = BridgeServer::start("s1", port, sink).await.unwrap();
        assert!(!bridge.is_connected());

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}")).await.unwrap();
        bridge.wait_connected().await;
        assert!(bridge.is_connected());

        // Newline-terminated frame.
        ws.send(Message::Text("{\"type\":\"assistant\"}\n".into())).await.unwrap();
        assert_eq!(recv_timeout(&mut rx).await["type"], "assistant");

        // Frame without trailing newline — the bridge appends it.
        ws.send(Message::Text("{\"type\":\"result\"}".into())).await.unwrap();
        assert_eq!(recv_timeout(&mut rx).await["type"], "result");

        // Two values in one frame.
        ws.send(Message::Text("{\"a\":1}\n{\"b\":2}\n".into())).await.unwrap();
        assert_eq!(recv_timeout(&mut rx).await["a"], 1);
        assert_eq!(recv_timeout(&mut rx).await["b"], 2);

        bridge.close().await;
    }

    #[tokio::test]
    async fn send_reaches_client() {
        let port = free_port().await;
        let (sink, _rx) = channel_sink();
        let bridge = BridgeServer::start("s1", port, sink).await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}")).await.unwrap();
        bridge.wait_connected().await;

        assert!(bridge.send(&json!({"type": "user"})));
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Message::Text(text) = frame else {
            panic!("expected text frame");
        };
        assert!(text.as_str().ends_with('\n'));
        let value: Value = serde_json::from_str(text.as_str().trim_end()).unwrap();
        assert_eq!(value["type"], "user");

        bridge.close().await;
    }

    #[tokio::test]
    async fn send_without_client_is_noop() {
        let port = free_port().await;
        let (sink, _rx) = channel_sink();
        let bridge = BridgeServer::start("s1", port, sink).await.unwrap();
        assert!(!bridge.send(&json!({"type": "user"})));
        bridge.close().await;
    }

    #[tokio::test]
    async fn second_client_replaces_first() {
        let port = free_port().await;
        let (sink, mut rx) = channel_sink();
        let bridge = BridgeServer::start("s1", port, sink).await.unwrap();

        let (mut first, _) = connect_async(format!("ws://127.0.0.1:{port}")).await.unwrap();
        bridge.wait_connected().await;

        let (mut second, _) = connect_async(format!("ws://127.0.0.1:{port}")).await.unwrap();
        // The displaced client receives a close frame.
        let frame = tokio::time::timeout(Duration::from_secs(2), first.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Message::Close(_)));

        // The replacement is the live socket now.
        assert!(bridge.is_connected());
        second.send(Message::Text("{\"from\":\"second\"}\n".into())).await.unwrap();
        assert_eq!(recv_timeout(&mut rx).await["from"], "second");

        bridge.close().await;
    }

    #[tokio::test]
    async fn client_disconnect_flushes_parser_and_detaches() {
        let port = free_port().await;
        let (sink, mut rx) = channel_sink();
        let bridge = BridgeServer::start("s1", port, sink).await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}")).await.unwrap();
        bridge.wait_connected().await;

        // An unterminated frame is newline-completed by the bridge.
        ws.send(Message::Text("{\"tail\":true}".into())).await.unwrap();
        assert_eq!(recv_timeout(&mut rx).await["tail"], true);

        ws.close(None).await.unwrap();
        // Detach is observed via is_connected flipping false.
        tokio::time::timeout(Duration::from_secs(2), async {
            while bridge.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        bridge.close().await;
    }

    #[tokio::test]
    async fn reconnect_after_disconnect() {
        let port = free_port().await;
        let (sink, mut rx) = channel_sink();
        let bridge = BridgeServer::start("s1", port, sink).await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}")).await.unwrap();
        bridge.wait_connected().await;
        ws.close(None).await.unwrap();
        drop(ws);

        tokio::time::timeout(Duration::from_secs(2), async {
            while bridge.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let (mut ws2, _) = connect_async(format!("ws://127.0.0.1:{port}")).await.unwrap();
        bridge.wait_connected().await;
        ws2.send(Message::Text("{\"again\":1}\n".into())).await.unwrap();
        assert_eq!(recv_timeout(&mut rx).await["again"], 1);

        bridge.close().await;
    }

    #[tokio::test]
    async fn close_releases_port_for_rebind() {
        let port = free_port().await;
        let (sink, _rx) = channel_sink();
        let bridge = BridgeServer::start("s1", port, Arc::clone(&sink)).await.unwrap();
        bridge.close().await;

        // Same port number is usable by a subsequent bridge.
        let second = BridgeServer::start("s2", port, sink).await.unwrap();
        second.close().await;
    }
}
