//! Ingress/egress bus plane (C12): the process's only contact with the
//! outside world besides venue transports.
//!
//! Ingress is one `PULL` socket read by one thread: each frame is parsed
//! into an `OrderIntent`, checked against a bounded idempotency window
//! (duplicate `client_id` within the window → reject, not place), and
//! handed to the caller to route. Egress is one `PUB` socket behind a
//! mutex, written from two paths — the synchronous accept/reject ack for
//! an intent just processed, and a background thread draining an
//! `SpscRing` fed by adapter callback threads (order updates, fills).
//! Those callbacks must never block on network I/O, so they enqueue and
//! return; the publisher thread owns the only blocking send.

use crate::core::errors::GatewayError;
use crate::core::types::{OrderIntent, OrderUpdate};
use crate::hft::flatmap::FlatSet;
use crate::hft::pool::ObjectPool;
use crate::monitoring::metrics::MetricsRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Default ingress bind endpoint, overridable via `LATENTSPEED_BUS_ORDERS_IN` (§6).
pub const DEFAULT_ORDERS_IN_ENDPOINT: &str = "tcp://127.0.0.1:5601";
/// Default egress bind endpoint, overridable via `LATENTSPEED_BUS_REPORTS_OUT` (§6).
pub const DEFAULT_REPORTS_OUT_ENDPOINT: &str = "tcp://127.0.0.1:5602";

/// Size of the duplicate-`client_id` window the ingress plane checks
/// before routing an intent (§4.12).
pub const IDEMPOTENCY_WINDOW_CAPACITY: usize = 2048;
/// Capacity of the adapter-callback → egress-publisher handoff ring.
pub const EGRESS_RING_CAPACITY: usize = 4096;
/// How long `recv_intent` blocks per poll before returning `Ok(None)` so
/// the caller can check the kill switch between frames.
const RECV_POLL_MS: i32 = 250;
/// Idle pause between empty drains of the egress ring.
const PUBLISHER_IDLE_SLEEP: Duration = Duration::from_millis(5);

fn zmq_err(e: zmq::Error) -> GatewayError {
    GatewayError::TransportFailed(e.to_string())
}

/// Outcome of one ingress poll that the caller must act on.
pub enum IngressEvent {
    /// A well-formed, non-duplicate intent ready to route to an adapter.
    Intent(OrderIntent),
    /// A frame that must be acknowledged as rejected rather than routed:
    /// either it failed to parse, or its `client_id` was already seen
    /// within the idempotency window.
    Rejected {
        client_id: Option<String>,
        error: GatewayError,
    },
}

/// The ingress (`PULL`) side of the bus. Single-threaded by contract: one
/// worker owns this and calls `recv_intent` in a loop.
pub struct IngressPlane {
    socket: zmq::Socket,
    _ctx: zmq::Context,
    seen_client_ids: FlatSet<String>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl IngressPlane {
    pub fn bind(endpoint: &str, metrics: Option<Arc<MetricsRegistry>>) -> Result<Self, GatewayError> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::PULL).map_err(zmq_err)?;
        socket.bind(endpoint).map_err(zmq_err)?;
        socket.set_rcvtimeo(RECV_POLL_MS).map_err(zmq_err)?;
        Ok(Self {
            socket,
            _ctx: ctx,
            seen_client_ids: FlatSet::with_capacity(IDEMPOTENCY_WINDOW_CAPACITY),
            metrics,
        })
    }

    /// The endpoint actually bound (useful when `endpoint` requested an
    /// ephemeral port via a trailing `*`).
    pub fn last_endpoint(&self) -> Result<String, GatewayError> {
        self.socket
            .get_last_endpoint()
            .map_err(zmq_err)?
            .map_err(|_| GatewayError::TransportFailed("non-utf8 endpoint".to_string()))
    }

    /// Poll for the next frame, blocking up to `RECV_POLL_MS`. Returns
    /// `Ok(None)` if nothing arrived this tick; parse/idempotency failures
    /// surface as `Ok(Some(IngressEvent::Rejected{..}))` rather than an
    /// `Err`, since they are routine traffic, not transport failures.
    pub fn recv_intent(&mut self) -> Result<Option<IngressEvent>, GatewayError> {
        let bytes = match self.socket.recv_bytes(0) {
            Ok(b) => b,
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(zmq_err(e)),
        };

        let intent: OrderIntent = match serde_json::from_slice(&bytes) {
            Ok(i) => i,
            Err(e) => {
                warn!("malformed ingress frame, rejecting: {e}");
                if let Some(m) = &self.metrics {
                    m.bus().ingress_parse_errors_total.inc();
                }
                return Ok(Some(IngressEvent::Rejected {
                    client_id: None,
                    error: GatewayError::InvalidParams(format!("malformed intent: {e}")),
                }));
            }
        };

        if !self.seen_client_ids.insert(intent.client_id.clone()) {
            debug!(client_id = %intent.client_id, "duplicate client id within idempotency window");
            if let Some(m) = &self.metrics {
                m.bus().ingress_idempotent_drops_total.inc();
            }
            return Ok(Some(IngressEvent::Rejected {
                client_id: Some(intent.client_id.clone()),
                error: GatewayError::IdempotentDuplicate(intent.client_id),
            }));
        }

        Ok(Some(IngressEvent::Intent(intent)))
    }
}

/// The egress (`PUB`) side of the bus. Cheap to clone-share: the socket
/// lives behind a mutex and the ring is already an `Arc`.
pub struct EgressPlane {
    socket: Mutex<zmq::Socket>,
    _ctx: zmq::Context,
    ring: Arc<crate::hft::ring::SpscRing<OrderUpdate>>,
    /// Scratch `Vec<u8>` buffers for JSON-encoding an outbound update.
    /// Recycled across calls to `publish_now` instead of letting
    /// `serde_json` heap-allocate a fresh `Vec` per message (C13).
    encode_buf_pool: ObjectPool<Vec<u8>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl EgressPlane {
    pub fn bind(endpoint: &str, metrics: Option<Arc<MetricsRegistry>>) -> Result<Arc<Self>, GatewayError> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::PUB).map_err(zmq_err)?;
        socket.bind(endpoint).map_err(zmq_err)?;
        Ok(Arc::new(Self {
            socket: Mutex::new(socket),
            _ctx: ctx,
            ring: Arc::new(crate::hft::ring::SpscRing::new(EGRESS_RING_CAPACITY)),
            encode_buf_pool: ObjectPool::new(EGRESS_RING_CAPACITY),
            metrics,
        }))
    }

    pub fn last_endpoint(&self) -> Result<String, GatewayError> {
        self.socket
            .lock()
            .unwrap()
            .get_last_endpoint()
            .map_err(zmq_err)?
            .map_err(|_| GatewayError::TransportFailed("non-utf8 endpoint".to_string()))
    }

    /// Publish immediately on the calling thread. Used for the synchronous
    /// accept/reject ack that resolves before `place_order`/`cancel_order`
    /// returns to the ingress worker, and by the publisher thread draining
    /// the egress ring.
    pub fn publish_now(&self, update: &OrderUpdate) -> Result<(), GatewayError> {
        let mut buf = self.encode_buf_pool.allocate().unwrap_or_default();
        buf.clear();
        let encode_result = serde_json::to_writer(&mut buf, update)
            .map_err(|e| GatewayError::InvalidParams(format!("failed to encode order update: {e}")));
        let send_result = encode_result.and_then(|()| {
            let socket = self.socket.lock().unwrap();
            socket.send(&buf[..], 0).map_err(zmq_err)
        });
        self.encode_buf_pool.deallocate(buf);
        send_result
    }

    /// Enqueue for the background publisher thread. Used by adapter
    /// callback threads (WS readers, batchers) which must never block on
    /// network I/O. Returns `false` if the ring is full and the update
    /// was dropped.
    pub fn enqueue(&self, update: OrderUpdate) -> bool {
        let ok = self.ring.try_push(update).is_ok();
        if let Some(m) = &self.metrics {
            m.bus().egress_queue_depth.set(self.ring.len() as i64);
        }
        if !ok {
            warn!("egress ring full, dropping update");
        }
        ok
    }

    /// Spawn the thread draining the ring into the socket. Exits once
    /// `shutdown` is observed true and the ring has been drained.
    pub fn spawn_publisher(self: Arc<Self>, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
        thread::Builder::new()
            .name("egress-publisher".to_string())
            .spawn(move || loop {
                match self.ring.try_pop() {
                    Some(update) => {
                        if let Err(e) = self.publish_now(&update) {
                            warn!("egress publish failed, dropping update: {e}");
                        }
                        if let Some(m) = &self.metrics {
                            m.bus().egress_queue_depth.set(self.ring.len() as i64);
                        }
                    }
                    None => {
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }
                        thread::sleep(PUBLISHER_IDLE_SLEEP);
                    }
                }
            })
            .expect("failed to spawn egress publisher thread")
    }
}
