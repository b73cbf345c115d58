//! WebSocket post/sub client (C6).
//!
//! One TLS WebSocket to a venue, multiplexing two duties: an id-correlated
//! request/reply channel (`post`) and server-pushed subscription frames
//! delivered to a caller-installed handler (`subscribe` + `set_message_
//! handler`). A dedicated reader thread owns every inbound frame; `post`
//! blocks the calling thread on a channel until the reader matches the
//! reply by id or the timeout fires. `connected` flips to `false` on the
//! first read or write error; the adapter owning this client is expected
//! to notice and recycle it rather than reuse a dead connection.

use crate::core::errors::GatewayError;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};
use tungstenite::{connect, Message, WebSocket};
use tungstenite::stream::MaybeTlsStream;

/// Frames are considered stale, and a ping is due, after this much quiet
/// time on the socket (§4.6).
const HEARTBEAT_QUIET: Duration = Duration::from_secs(50);

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<u64, Sender<Value>>>>;
/// Invoked for every inbound frame that is not a `post` reply or a `pong`.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A connected venue WebSocket providing request/reply `post` and
/// fire-and-forget `subscribe`.
pub struct WsPostClient {
    socket: Arc<Mutex<Socket>>,
    pending: PendingMap,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    last_frame_ms: Arc<AtomicU64>,
    handler: Arc<Mutex<Option<MessageHandler>>>,
}

impl WsPostClient {
    /// Connect and spawn the reader + heartbeat threads.
    pub fn connect(url: &str) -> Result<Self, GatewayError> {
        let (socket, _response) =
            connect(url).map_err(|e| GatewayError::TransportFailed(format!("ws connect: {e}")))?;
        let socket = Arc::new(Mutex::new(socket));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let last_frame_ms = Arc::new(AtomicU64::new(now_ms()));
        let handler: Arc<Mutex<Option<MessageHandler>>> = Arc::new(Mutex::new(None));

        spawn_reader(
            socket.clone(),
            pending.clone(),
            connected.clone(),
            last_frame_ms.clone(),
            handler.clone(),
        );
        spawn_heartbeat(socket.clone(), connected.clone(), last_frame_ms.clone());

        Ok(Self {
            socket,
            pending,
            next_id: AtomicU64::new(1),
            connected,
            last_frame_ms,
            handler,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Install the handler invoked for every non-`post`, non-`pong` frame.
    pub fn set_message_handler(&self, handler: MessageHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    /// Send `{method:"post", id, request:{type, payload}}` and block for
    /// up to `timeout` for the matching `channel:"post"` reply. Returns
    /// `None` on timeout (§4.6 duty 1).
    pub fn post(&self, request_type: &str, payload: Value, timeout: Duration) -> Option<Value> {
        if !self.is_connected() {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx): (Sender<Value>, Receiver<Value>) = mpsc::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let envelope = json!({
            "method": "post",
            "id": id,
            "request": { "type": request_type, "payload": payload },
        });

        if self.write(&envelope).is_err() {
            self.pending.lock().unwrap().remove(&id);
            return None;
        }

        match rx.recv_timeout(timeout) {
            Ok(response) => Some(response),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                None
            }
        }
    }

    /// Send `{method:"subscribe", subscription:{type, ...fields}}` (§4.6
    /// duty 2). `fields` is merged into the subscription object alongside
    /// `type`.
    pub fn subscribe(&self, sub_type: &str, fields: Map<String, Value>) -> Result<(), GatewayError> {
        let mut subscription = fields;
        subscription.insert("type".to_string(), Value::String(sub_type.to_string()));
        let envelope = json!({
            "method": "subscribe",
            "subscription": subscription,
        });
        self.write(&envelope)
            .map_err(|e| GatewayError::WsDisconnected(e.to_string()))
    }

    fn write(&self, value: &Value) -> Result<(), String> {
        let text = value.to_string();
        let mut guard = self.socket.lock().unwrap();
        match guard.send(Message::Text(text)) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                Err(e.to_string())
            }
        }
    }

    pub fn disconnect(&self) {
        let mut guard = self.socket.lock().unwrap();
        let _ = guard.close(None);
        self.connected.store(false, Ordering::Release);
    }

    /// Milliseconds since the last inbound frame of any kind.
    pub fn quiet_for_ms(&self) -> u64 {
        now_ms().saturating_sub(self.last_frame_ms.load(Ordering::Acquire))
    }
}

fn spawn_reader(
    socket: Arc<Mutex<Socket>>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    last_frame_ms: Arc<AtomicU64>,
    handler: Arc<Mutex<Option<MessageHandler>>>,
) {
    std::thread::Builder::new()
        .name("ws-reader".to_string())
        .spawn(move || {
            while connected.load(Ordering::Acquire) {
                let message = {
                    let mut guard = socket.lock().unwrap();
                    guard.read()
                };
                let message = match message {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("websocket read error, marking disconnected: {e}");
                        connected.store(false, Ordering::Release);
                        break;
                    }
                };
                let text = match message {
                    Message::Text(t) => t,
                    Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {
                        last_frame_ms.store(now_ms(), Ordering::Release);
                        continue;
                    }
                    Message::Close(_) => {
                        connected.store(false, Ordering::Release);
                        break;
                    }
                    Message::Frame(_) => continue,
                };
                last_frame_ms.store(now_ms(), Ordering::Release);

                let parsed: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("malformed websocket frame, dropping: {e}");
                        continue;
                    }
                };

                let channel = parsed.get("channel").and_then(|c| c.as_str());
                if channel == Some("pong") {
                    continue;
                }
                if channel == Some("post") {
                    if let Some(id) = parsed
                        .get("data")
                        .and_then(|d| d.get("id"))
                        .and_then(|v| v.as_u64())
                    {
                        if let Some(sender) = pending.lock().unwrap().remove(&id) {
                            let response = parsed
                                .get("data")
                                .and_then(|d| d.get("response"))
                                .cloned()
                                .unwrap_or(Value::Null);
                            let _ = sender.send(response);
                        }
                        continue;
                    }
                }

                if let Some(handler) = handler.lock().unwrap().as_ref() {
                    handler(parsed);
                } else {
                    debug!("no message handler installed, dropping frame");
                }
            }
        })
        .expect("failed to spawn ws reader thread");
}

fn spawn_heartbeat(socket: Arc<Mutex<Socket>>, connected: Arc<AtomicBool>, last_frame_ms: Arc<AtomicU64>) {
    std::thread::Builder::new()
        .name("ws-heartbeat".to_string())
        .spawn(move || {
            let tick = Duration::from_secs(1);
            let mut last_checked = Instant::now();
            while connected.load(Ordering::Acquire) {
                std::thread::sleep(tick);
                if last_checked.elapsed() < tick {
                    continue;
                }
                last_checked = Instant::now();
                let quiet = now_ms().saturating_sub(last_frame_ms.load(Ordering::Acquire));
                if quiet >= HEARTBEAT_QUIET.as_millis() as u64 {
                    let mut guard = socket.lock().unwrap();
                    if guard
                        .send(Message::Text(json!({"method": "ping"}).to_string()))
                        .is_err()
                    {
                        connected.store(false, Ordering::Release);
                        error!("heartbeat ping failed, marking websocket disconnected");
                        break;
                    }
                }
            }
        })
        .expect("failed to spawn ws heartbeat thread");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_quiet_threshold_matches_spec() {
        assert_eq!(HEARTBEAT_QUIET, Duration::from_secs(50));
    }

    #[test]
    fn subscribe_envelope_carries_type_and_fields() {
        let mut fields = Map::new();
        fields.insert("coin".to_string(), Value::String("ETH".to_string()));
        let mut subscription = fields;
        subscription.insert("type".to_string(), Value::String("l2Book".to_string()));
        let envelope = json!({ "method": "subscribe", "subscription": subscription });
        assert_eq!(envelope["subscription"]["type"], "l2Book");
        assert_eq!(envelope["subscription"]["coin"], "ETH");
    }
}
