// crates/flownodes/src/bridge/client.rs

use async_trait::async_trait;
use flowcore::NodeError;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BridgeRequest, BridgeTransport};

/// Configuration for the bridge connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub url: String,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Unbounded wait for a reply when unset
    pub reply_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
            reply_timeout_ms: None,
        }
    }
}

/// Delay before reconnect attempt number `attempt` (zero-based)
pub fn backoff_delay(attempt: u32, config: &BridgeConfig) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    let ms = config
        .initial_backoff_ms
        .saturating_mul(factor)
        .min(config.max_backoff_ms);
    Duration::from_millis(ms)
}

struct Shared {
    outbound: RwLock<Option<mpsc::UnboundedSender<String>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    connected: watch::Sender<bool>,
}

impl Shared {
    fn attach(&self, sender: mpsc::UnboundedSender<String>) {
        *self.outbound.write() = Some(sender);
        self.connected.send_replace(true);
    }

    /// Forget the connection; callers still waiting get a transport error.
    fn detach(&self) {
        *self.outbound.write() = None;
        let dropped = {
            let mut pending = self.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            warn!(dropped, "Bridge disconnected with requests in flight");
        }
        self.connected.send_replace(false);
    }

    fn dispatch(&self, text: &str) {
        let reply: Value = match serde_json::from_str(text) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed bridge reply");
                return;
            }
        };
        let Some(id) = reply.get("id").and_then(Value::as_str).map(str::to_string) else {
            debug!("Ignoring bridge frame without id");
            return;
        };
        let waiter = self.pending.lock().remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!(id = %id, "No pending request for bridge reply"),
        }
    }
}

/// Persistent WebSocket connection to the local bridge.
///
/// Owns its reconnect loop; nothing is shared between clients.
pub struct BridgeClient {
    config: BridgeConfig,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeClient {
    pub fn new(config: BridgeConfig) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            config,
            shared: Arc::new(Shared {
                outbound: RwLock::new(None),
                pending: Mutex::new(HashMap::new()),
                connected,
            }),
            shutdown: CancellationToken::new(),
            supervisor: Mutex::new(None),
        }
    }

    /// Start the background connect/reconnect loop. Idempotent.
    pub fn connect(&self) {
        let mut supervisor = self.supervisor.lock();
        if supervisor.is_some() {
            debug!("Bridge supervisor already running");
            return;
        }
        let config = self.config.clone();
        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        *supervisor = Some(tokio::spawn(supervise(config, shared, shutdown)));
    }

    /// Stop reconnecting and drop the connection
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.shared.detach();
        info!("Bridge client closed");
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    /// Wait up to `within` for the connection to come up
    pub async fn wait_connected(&self, within: Duration) -> bool {
        let mut state = self.shared.connected.subscribe();
        let up = matches!(timeout(within, state.wait_for(|up| *up)).await, Ok(Ok(_)));
        up
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl BridgeTransport for BridgeClient {
    async fn request(&self, request: BridgeRequest) -> Result<Value, NodeError> {
        let frame = serde_json::to_string(&request)
            .map_err(|e| NodeError::Transport(format!("failed to encode request: {}", e)))?;

        let outbound = self.shared.outbound.read().clone();
        let Some(sender) = outbound else {
            warn!(id = %request.id, "Bridge not connected, dropping request");
            return Err(NodeError::Transport("bridge not connected, request dropped".to_string()));
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending.lock().insert(request.id.clone(), reply_tx);
        if sender.send(frame).is_err() {
            self.shared.pending.lock().remove(&request.id);
            return Err(NodeError::Transport("bridge connection closed".to_string()));
        }
        debug!(id = %request.id, "Bridge request sent");

        let reply = match self.config.reply_timeout_ms {
            Some(ms) => match timeout(Duration::from_millis(ms), reply_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.shared.pending.lock().remove(&request.id);
                    return Err(NodeError::Timeout { ms });
                }
            },
            None => reply_rx.await,
        };

        reply.map_err(|_| NodeError::Transport("bridge connection lost before reply".to_string()))
    }
}

async fn supervise(config: BridgeConfig, shared: Arc<Shared>, shutdown: CancellationToken) {
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = connect_async(config.url.as_str()) => result,
        };

        match connected {
            Ok((stream, _)) => {
                info!(url = %config.url, "Bridge connected");
                attempt = 0;
                pump(stream, &shared, &shutdown).await;
            }
            Err(e) => warn!(url = %config.url, error = %e, "Bridge connection failed"),
        }

        shared.detach();
        if shutdown.is_cancelled() {
            break;
        }

        let delay = backoff_delay(attempt, &config);
        attempt = attempt.saturating_add(1);
        info!(delay_ms = delay.as_millis() as u64, "Bridge connection closed, reconnecting");

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }

    debug!("Bridge supervisor stopped");
}

/// Shuttle frames until the socket closes or shutdown is requested
async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    shared: &Shared,
    shutdown: &CancellationToken,
) {
    let (mut write, mut read) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    shared.attach(tx);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = write.send(WsMessage::Close(None)).await;
                break;
            }
            Some(frame) = rx.recv() => {
                if let Err(e) = write.send(WsMessage::Text(frame)).await {
                    warn!(error = %e, "Failed to send bridge frame");
                    break;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => shared.dispatch(&text),
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("Bridge closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Bridge connection error");
                    break;
                }
            },
        }
    }
}
