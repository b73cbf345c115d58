//! Bybit adapter (C8): the CEX-shaped venue.
//!
//! REST carries every order-mutating call; the private WebSocket is a
//! read-only stream of order and execution events that the tracker
//! reconciles against. A REST catch-up runs after every (re)connect so a
//! dropped WS never silently loses a fill.
//!
//! The adapter is a thin `Arc<BybitInner>` handle: background threads
//! (the WS reader, the reconnect loop) need their own owning reference to
//! the shared state, so the state lives behind one `Arc` constructed at
//! `BybitAdapter::new` rather than requiring callers to hand the adapter
//! to us already wrapped in one.

use crate::adapter::{
    AdapterErrorCallback, ExchangeAdapter, FillCallback, OpenOrdersFilter, OrderUpdateCallback,
};
use crate::auth::hmac_signer::{BybitSigner, DEFAULT_RECV_WINDOW_MS};
use crate::core::errors::GatewayError;
use crate::core::numeric::trim_size;
use crate::core::types::{
    FillEvent, Liquidity, NormalizedOrderRequest, OrderResponse, OrderState, OrderType, Side,
    TimeInForce,
};
use crate::hft::flatmap::FlatSet;
use crate::monitoring::MetricsRegistry;
use crate::net::http::{encode_query, send_with_single_retry, HttpClient, HttpTimeouts};
use crate::resilience::backoff::{BackoffConfig, ExponentialBackoff};
use crate::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
use parking_lot::Mutex as PLMutex;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect, Message, WebSocket};

const REST_MAINNET: &str = "https://api.bybit.com";
const REST_DEMO: &str = "https://api-demo.bybit.com";
const WS_MAINNET: &str = "wss://stream.bybit.com/v5/private";
const WS_DEMO: &str = "wss://stream-demo.bybit.com/v5/private";

const PING_INTERVAL: Duration = Duration::from_secs(20);
const DEAD_AFTER: Duration = Duration::from_secs(30);
const FILL_DEDUPE_CAPACITY: usize = 50_000;
const EXEC_BACKFILL_LIMIT: u32 = 200;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Deterministic REST catch-up query plan (§4.8): one `openOrders` and one
/// `execution/list` call per `(category, settle/base coin)` pair, plus any
/// spot/option symbol observed in the adapter's own order cache.
fn query_plan(extra_symbols: &[(String, String)]) -> Vec<(&'static str, Option<String>, Option<String>)> {
    let mut plan = vec![
        ("linear", Some("USDT".to_string()), None),
        ("linear", Some("USDC".to_string()), None),
        ("inverse", None, Some("BTC".to_string())),
        ("inverse", None, Some("ETH".to_string())),
    ];
    for (category, symbol) in extra_symbols {
        plan.push((
            if category == "option" { "option" } else { "spot" },
            None,
            Some(symbol.clone()),
        ));
    }
    plan
}

struct OrderCacheEntry {
    request: NormalizedOrderRequest,
    category: String,
}

struct BybitInner {
    testnet: AtomicBool,
    connected: AtomicBool,
    rest: PLMutex<Option<HttpClient>>,
    signer: PLMutex<Option<BybitSigner>>,
    rate_limiter: RateLimiter,
    order_cache: PLMutex<HashMap<String, OrderCacheEntry>>,
    fill_dedupe: PLMutex<FlatSet<String>>,
    exec_cursor_ms: AtomicU64,
    ws_socket: Mutex<Option<Arc<Mutex<WebSocket<MaybeTlsStream<TcpStream>>>>>>,
    reader_shutdown: Arc<AtomicBool>,
    on_order_update: PLMutex<Option<OrderUpdateCallback>>,
    on_fill: PLMutex<Option<FillCallback>>,
    on_error: PLMutex<Option<AdapterErrorCallback>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl BybitInner {
    fn rest_base(&self) -> &'static str {
        if self.testnet.load(Ordering::Acquire) {
            REST_DEMO
        } else {
            REST_MAINNET
        }
    }

    fn ws_url(&self) -> &'static str {
        if self.testnet.load(Ordering::Acquire) {
            WS_DEMO
        } else {
            WS_MAINNET
        }
    }

    fn emit_error(&self, err: GatewayError) {
        warn!(error = %err, "bybit adapter error");
        if let Some(cb) = self.on_error.lock().as_ref() {
            cb(err);
        }
    }

    fn record_rejected(&self, reason: &str) {
        if let Some(m) = &self.metrics {
            m.orders().rejected_total.with_label_values(&["bybit", reason]).inc();
        }
    }

    fn signed_get(&self, path: &str, params: &HashMap<&str, String>) -> Result<Value, GatewayError> {
        if !self.rate_limiter.allow() {
            if let Some(m) = &self.metrics {
                m.venues().rate_limited_total.with_label_values(&["bybit"]).inc();
            }
            return Err(GatewayError::RateLimited { retry_after_ms: 125 });
        }
        let query = encode_query(params);
        let signer_guard = self.signer.lock();
        let signer = signer_guard
            .as_ref()
            .ok_or_else(|| GatewayError::SignerUnavailable("bybit signer not initialized".to_string()))?;
        let headers = signer.sign_get(&query);
        let pairs = headers.as_header_pairs();
        drop(signer_guard);

        let rest_guard = self.rest.lock();
        let rest = rest_guard
            .as_ref()
            .ok_or_else(|| GatewayError::Config("bybit REST client not connected".to_string()))?;
        let started = Instant::now();
        let body = send_with_single_retry(|| rest.get(path, &query, &pairs))?;
        if let Some(m) = &self.metrics {
            m.venues()
                .rest_latency_ms
                .with_label_values(&["bybit"])
                .observe(started.elapsed().as_millis() as f64);
        }
        serde_json::from_str(&body).map_err(|e| GatewayError::TransportFailed(format!("malformed response: {e}")))
    }

    fn signed_post(&self, path: &str, body: &Value) -> Result<Value, GatewayError> {
        if !self.rate_limiter.allow() {
            if let Some(m) = &self.metrics {
                m.venues().rate_limited_total.with_label_values(&["bybit"]).inc();
            }
            return Err(GatewayError::RateLimited { retry_after_ms: 125 });
        }
        let body_json = serde_json::to_string(body)
            .map_err(|e| GatewayError::InvalidParams(format!("body encode: {e}")))?;
        let signer_guard = self.signer.lock();
        let signer = signer_guard
            .as_ref()
            .ok_or_else(|| GatewayError::SignerUnavailable("bybit signer not initialized".to_string()))?;
        let headers = signer.sign_post(&body_json);
        let pairs = headers.as_header_pairs();
        drop(signer_guard);

        let rest_guard = self.rest.lock();
        let rest = rest_guard
            .as_ref()
            .ok_or_else(|| GatewayError::Config("bybit REST client not connected".to_string()))?;
        let started = Instant::now();
        let response_body = send_with_single_retry(|| rest.post(path, &body_json, &pairs))?;
        if let Some(m) = &self.metrics {
            m.venues()
                .rest_latency_ms
                .with_label_values(&["bybit"])
                .observe(started.elapsed().as_millis() as f64);
        }
        let parsed: Value = serde_json::from_str(&response_body)
            .map_err(|e| GatewayError::TransportFailed(format!("malformed response: {e}")))?;
        let ret_code = parsed.get("retCode").and_then(|v| v.as_i64()).unwrap_or(-1);
        if ret_code != 0 {
            let msg = parsed
                .get("retMsg")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown venue error")
                .to_string();
            return Err(GatewayError::VenueRejected(msg));
        }
        Ok(parsed)
    }

    fn map_inbound_status(status: &str) -> String {
        match status {
            "New" | "NEW" => OrderState::Open.as_wire_str().to_string(),
            "PartiallyFilled" | "PARTIALLY_FILLED" => OrderState::PartiallyFilled.as_wire_str().to_string(),
            "Filled" | "FILLED" => OrderState::Filled.as_wire_str().to_string(),
            "Cancelled" | "CANCELED" | "Expired" | "EXPIRED" | "EXPIRED_IN_MATCH" => {
                OrderState::Canceled.as_wire_str().to_string()
            }
            "Rejected" | "REJECTED" => OrderState::Failed.as_wire_str().to_string(),
            "Amended" | "Replaced" | "AMENDED" | "REPLACED" => "replaced".to_string(),
            other => other.to_string(),
        }
    }

    fn handle_order_topic(&self, rows: &[Value]) {
        for row in rows {
            let Some(client_id) = row.get("orderLinkId").and_then(|v| v.as_str()) else {
                continue;
            };
            let status = row.get("orderStatus").and_then(|v| v.as_str()).unwrap_or("");
            let exchange_id = row.get("orderId").and_then(|v| v.as_str()).map(|s| s.to_string());
            let mut update = crate::core::types::OrderUpdate::new(client_id, Self::map_inbound_status(status));
            update.exchange_id = exchange_id;
            if let Some(cb) = self.on_order_update.lock().as_ref() {
                cb(update);
            }
        }
    }

    fn handle_execution_topic(&self, rows: &[Value]) {
        for row in rows {
            let Some(client_id) = row.get("orderLinkId").and_then(|v| v.as_str()) else {
                continue;
            };
            let exec_id = row
                .get("execId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| {
                    let exchange_id = row.get("orderId").and_then(|v| v.as_str()).unwrap_or("");
                    let price = row.get("execPrice").and_then(|v| v.as_str()).unwrap_or("");
                    let qty = row.get("execQty").and_then(|v| v.as_str()).unwrap_or("");
                    let ts = row.get("execTime").and_then(|v| v.as_str()).unwrap_or("");
                    format!("{exchange_id}:{price}:{qty}:{ts}")
                });
            if !self.fill_dedupe.lock().insert(exec_id.clone()) {
                if let Some(m) = &self.metrics {
                    m.orders().fill_dedupe_hits_total.inc();
                }
                continue;
            }
            let exec_time: u64 = row
                .get("execTime")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(now_ms);
            self.exec_cursor_ms.fetch_max(exec_time, Ordering::AcqRel);

            let side = match row.get("side").and_then(|v| v.as_str()) {
                Some("Buy") => Side::Buy,
                _ => Side::Sell,
            };
            let price: Decimal = row
                .get("execPrice")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let qty: Decimal = row
                .get("execQty")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let liquidity = match row.get("isMaker").and_then(|v| v.as_bool()) {
                Some(true) => Liquidity::Maker,
                _ => Liquidity::Taker,
            };
            let fee: Option<Decimal> = row
                .get("execFee")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok());
            let fill = FillEvent {
                version: 1,
                client_id: client_id.to_string(),
                exchange_id: row.get("orderId").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                exec_id,
                symbol: row.get("symbol").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                side,
                price,
                quantity: qty,
                fee,
                fee_currency: row.get("feeCurrency").and_then(|v| v.as_str()).map(|s| s.to_string()),
                liquidity,
                ts_ms: exec_time,
                extra: HashMap::new(),
            };
            if let Some(m) = &self.metrics {
                m.orders().fills_total.with_label_values(&["bybit"]).inc();
            }
            if let Some(cb) = self.on_fill.lock().as_ref() {
                cb(fill);
            }
        }
    }

    fn handle_private_frame(&self, frame: &Value) {
        if frame.get("op").and_then(|v| v.as_str()) == Some("pong") {
            return;
        }
        let Some(topic) = frame.get("topic").and_then(|v| v.as_str()) else {
            return;
        };
        let Some(data) = frame.get("data").and_then(|v| v.as_array()) else {
            return;
        };
        match topic {
            "order" => self.handle_order_topic(data),
            "execution" => self.handle_execution_topic(data),
            _ => debug!(topic, "ignoring unrecognized bybit private topic"),
        }
    }

    fn connect_private_ws(self: &Arc<Self>) -> Result<(), GatewayError> {
        let (socket, _resp) = connect(self.ws_url())
            .map_err(|e| GatewayError::TransportFailed(format!("ws connect: {e}")))?;
        let socket = Arc::new(Mutex::new(socket));

        let expires_ms = now_ms() + 10_000;
        let auth_sig = {
            let signer_guard = self.signer.lock();
            let signer = signer_guard
                .as_ref()
                .ok_or_else(|| GatewayError::SignerUnavailable("bybit signer not initialized".to_string()))?;
            let sig = signer.sign_ws_auth(expires_ms);
            (signer.api_key().to_string(), sig)
        };
        let auth_msg = json!({ "op": "auth", "args": [auth_sig.0, expires_ms, auth_sig.1] });
        {
            let mut guard = socket.lock().unwrap();
            guard
                .send(Message::Text(auth_msg.to_string()))
                .map_err(|e| GatewayError::TransportFailed(format!("auth send failed: {e}")))?;
            let reply = guard
                .read()
                .map_err(|e| GatewayError::TransportFailed(format!("auth read failed: {e}")))?;
            if let Message::Text(text) = reply {
                let parsed: Value = serde_json::from_str(&text)
                    .map_err(|e| GatewayError::TransportFailed(format!("malformed auth reply: {e}")))?;
                if parsed.get("success").and_then(|v| v.as_bool()) != Some(true) {
                    return Err(GatewayError::SignerUnavailable(format!("ws auth rejected: {text}")));
                }
            }
            let sub_msg = json!({ "op": "subscribe", "args": ["order", "execution"] });
            guard
                .send(Message::Text(sub_msg.to_string()))
                .map_err(|e| GatewayError::TransportFailed(format!("subscribe failed: {e}")))?;
        }

        *self.ws_socket.lock().unwrap() = Some(socket.clone());
        self.connected.store(true, Ordering::Release);
        if let Some(m) = &self.metrics {
            m.venues().connected.with_label_values(&["bybit"]).set(1);
        }
        info!("bybit private websocket connected and subscribed");

        self.run_rest_catchup();

        let this = self.clone();
        let reader_shutdown = self.reader_shutdown.clone();
        std::thread::Builder::new()
            .name("bybit-ws-reader".to_string())
            .spawn(move || this.reader_loop(socket, reader_shutdown))
            .expect("failed to spawn bybit ws reader");
        Ok(())
    }

    fn reader_loop(
        self: Arc<Self>,
        socket: Arc<Mutex<WebSocket<MaybeTlsStream<TcpStream>>>>,
        shutdown: Arc<AtomicBool>,
    ) {
        let mut last_frame = Instant::now();
        let mut last_ping = Instant::now();
        loop {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            if last_frame.elapsed() >= DEAD_AFTER {
                warn!("bybit private websocket quiet past deadline, reconnecting");
                self.connected.store(false, Ordering::Release);
                if let Some(m) = &self.metrics {
                    m.venues().connected.with_label_values(&["bybit"]).set(0);
                }
                self.spawn_reconnect_loop();
                return;
            }
            if last_ping.elapsed() >= PING_INTERVAL {
                let mut guard = socket.lock().unwrap();
                if guard.send(Message::Text(json!({"op":"ping"}).to_string())).is_err() {
                    drop(guard);
                    self.connected.store(false, Ordering::Release);
                    self.spawn_reconnect_loop();
                    return;
                }
                last_ping = Instant::now();
            }

            let message = {
                let mut guard = socket.lock().unwrap();
                guard.read()
            };
            match message {
                Ok(Message::Text(text)) => {
                    last_frame = Instant::now();
                    match serde_json::from_str::<Value>(&text) {
                        Ok(frame) => self.handle_private_frame(&frame),
                        Err(e) => warn!("malformed bybit frame, dropping: {e}"),
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {
                    last_frame = Instant::now();
                }
                Ok(Message::Close(_)) | Err(_) => {
                    warn!("bybit private websocket disconnected, reconnecting");
                    self.connected.store(false, Ordering::Release);
                    if let Some(m) = &self.metrics {
                        m.venues().connected.with_label_values(&["bybit"]).set(0);
                    }
                    self.spawn_reconnect_loop();
                    return;
                }
                Ok(Message::Frame(_)) => {}
            }
        }
    }

    fn spawn_reconnect_loop(self: &Arc<Self>) {
        if self.reader_shutdown.load(Ordering::Acquire) {
            return;
        }
        let this = self.clone();
        std::thread::Builder::new()
            .name("bybit-reconnect".to_string())
            .spawn(move || {
                let mut backoff = ExponentialBackoff::with_config(BackoffConfig {
                    initial_delay: Duration::from_millis(250),
                    max_delay: Duration::from_secs(30),
                    multiplier: 2.0,
                    max_retries: None,
                    jitter_factor: 0.25,
                });
                loop {
                    if this.reader_shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    if let Some(delay) = backoff.next_delay() {
                        std::thread::sleep(delay);
                        if this.reader_shutdown.load(Ordering::Acquire) {
                            return;
                        }
                        if let Some(m) = &this.metrics {
                            m.venues().reconnects_total.with_label_values(&["bybit"]).inc();
                        }
                        match this.connect_private_ws() {
                            Ok(()) => return,
                            Err(e) => warn!(error = %e, "bybit reconnect attempt failed"),
                        }
                    } else {
                        error!("bybit reconnect backoff exhausted, giving up");
                        return;
                    }
                }
            })
            .expect("failed to spawn bybit reconnect thread");
    }

    /// Snapshot open orders and backfill executions across the
    /// deterministic query plan, advancing `exec_cursor_ms` (§4.8).
    fn run_rest_catchup(&self) {
        let extra_symbols: Vec<(String, String)> = self
            .order_cache
            .lock()
            .values()
            .filter(|e| e.category == "spot" || e.category == "option")
            .map(|e| (e.category.clone(), e.request.symbol.clone()))
            .collect();

        for (category, settle_coin, base_coin) in query_plan(&extra_symbols) {
            let mut params: HashMap<&str, String> = HashMap::new();
            params.insert("category", category.to_string());
            if let Some(s) = &settle_coin {
                params.insert("settleCoin", s.clone());
            }
            if let Some(b) = &base_coin {
                params.insert("baseCoin", b.clone());
            }
            match self.signed_get("/v5/order/realtime", &params) {
                Ok(body) => self.ingest_open_orders_snapshot(&body),
                Err(e) => warn!(category, error = %e, "bybit open-orders catch-up failed"),
            }

            let mut exec_params: HashMap<&str, String> = HashMap::new();
            exec_params.insert("category", category.to_string());
            exec_params.insert("limit", EXEC_BACKFILL_LIMIT.to_string());
            exec_params.insert("startTime", self.exec_cursor_ms.load(Ordering::Acquire).to_string());
            match self.signed_get("/v5/execution/list", &exec_params) {
                Ok(body) => {
                    if let Some(rows) = body.get("result").and_then(|r| r.get("list")).and_then(|v| v.as_array()) {
                        self.handle_execution_topic(rows);
                    }
                }
                Err(e) => warn!(category, error = %e, "bybit execution backfill failed"),
            }
        }
    }

    fn ingest_open_orders_snapshot(&self, body: &Value) {
        let Some(rows) = body.get("result").and_then(|r| r.get("list")).and_then(|v| v.as_array()) else {
            return;
        };
        self.handle_order_topic(rows);
    }
}

/// The Bybit venue adapter.
pub struct BybitAdapter {
    inner: Arc<BybitInner>,
}

impl BybitAdapter {
    pub fn new(metrics: Option<Arc<MetricsRegistry>>) -> Self {
        Self {
            inner: Arc::new(BybitInner {
                testnet: AtomicBool::new(true),
                connected: AtomicBool::new(false),
                rest: PLMutex::new(None),
                signer: PLMutex::new(None),
                rate_limiter: RateLimiter::new(RateLimiterConfig {
                    max_orders_per_second: 8,
                    burst_capacity: 8,
                    refill_rate: 8.0,
                    refill_interval: Duration::from_secs(1),
                }),
                order_cache: PLMutex::new(HashMap::new()),
                fill_dedupe: PLMutex::new(FlatSet::with_capacity(FILL_DEDUPE_CAPACITY)),
                exec_cursor_ms: AtomicU64::new(0),
                ws_socket: Mutex::new(None),
                reader_shutdown: Arc::new(AtomicBool::new(false)),
                on_order_update: PLMutex::new(None),
                on_fill: PLMutex::new(None),
                on_error: PLMutex::new(None),
                metrics,
            }),
        }
    }
}

impl ExchangeAdapter for BybitAdapter {
    fn initialize(&self, api_key: &str, api_secret: &str, testnet: bool) -> bool {
        if api_key.is_empty() || api_secret.is_empty() {
            error!("bybit adapter requires both api_key and api_secret");
            return false;
        }
        self.inner.testnet.store(testnet, Ordering::Release);
        *self.inner.signer.lock() = Some(BybitSigner::new(api_key, api_secret).with_recv_window(DEFAULT_RECV_WINDOW_MS));
        let http = match HttpClient::new(self.inner.rest_base(), HttpTimeouts::from_env()) {
            Ok(h) => h,
            Err(e) => {
                error!(error = %e, "failed to build bybit REST client");
                return false;
            }
        };
        *self.inner.rest.lock() = Some(http);
        true
    }

    fn connect(&self) -> bool {
        match self.inner.connect_private_ws() {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "bybit initial connect failed");
                false
            }
        }
    }

    fn disconnect(&self) {
        self.inner.reader_shutdown.store(true, Ordering::Release);
        self.inner.connected.store(false, Ordering::Release);
        if let Some(socket) = self.inner.ws_socket.lock().unwrap().take() {
            let _ = socket.lock().unwrap().close(None);
        }
        if let Some(m) = &self.inner.metrics {
            m.venues().connected.with_label_values(&["bybit"]).set(0);
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    fn place_order(&self, req: &NormalizedOrderRequest) -> OrderResponse {
        let inner = &self.inner;
        let category = req.category.clone().unwrap_or_else(|| "linear".to_string());
        let side = match req.side {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        };
        let order_type = match req.order_type {
            OrderType::Market => "Market",
            _ => "Limit",
        };
        let mut body = json!({
            "category": category,
            "symbol": req.symbol,
            "side": side,
            "orderType": order_type,
            "qty": trim_size(req.quantity),
            "orderLinkId": req.client_id,
            "reduceOnly": req.reduce_only,
        });
        if let Some(price) = req.price {
            body["price"] = json!(trim_size(price));
        }
        if let Some(tif) = req.time_in_force {
            let wire = match tif {
                TimeInForce::GTC => "GTC",
                TimeInForce::IOC => "IOC",
                TimeInForce::FOK => "FOK",
                TimeInForce::PostOnly => "PostOnly",
            };
            body["timeInForce"] = json!(wire);
        }

        inner.order_cache.lock().insert(
            req.client_id.clone(),
            OrderCacheEntry { request: req.clone(), category: category.clone() },
        );

        match inner.signed_post("/v5/order/create", &body) {
            Ok(response) => {
                let exchange_id = response
                    .get("result")
                    .and_then(|r| r.get("orderId"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if let Some(m) = &inner.metrics {
                    m.orders().placed_total.with_label_values(&["bybit", req.side.to_string().as_str()]).inc();
                }
                OrderResponse::accepted(req.client_id.clone(), exchange_id)
            }
            Err(e) => {
                inner.record_rejected(e.reason_code());
                inner.emit_error(GatewayError::VenueRejected(e.to_string()));
                OrderResponse::from_error(req.client_id.clone(), &e)
            }
        }
    }

    fn cancel_order(&self, client_id: &str, symbol: Option<&str>, exchange_id: Option<&str>) -> OrderResponse {
        let inner = &self.inner;
        let cached = inner.order_cache.lock().get(client_id).map(|e| (e.request.symbol.clone(), e.category.clone()));
        let (symbol, category) = match (symbol, cached) {
            (Some(s), Some((_, cat))) => (s.to_string(), cat),
            (None, Some((s, cat))) => (s, cat),
            (Some(s), None) => (s.to_string(), "linear".to_string()),
            (None, None) => {
                return OrderResponse::rejected(client_id, "not_found", "no cached order for cancel");
            }
        };
        let mut body = json!({ "category": category, "symbol": symbol });
        if let Some(oid) = exchange_id {
            body["orderId"] = json!(oid);
        } else {
            body["orderLinkId"] = json!(client_id);
        }
        match inner.signed_post("/v5/order/cancel", &body) {
            Ok(_) => OrderResponse::accepted(client_id, exchange_id.unwrap_or_default()),
            Err(e) => OrderResponse::from_error(client_id, &e),
        }
    }

    fn modify_order(&self, client_id: &str, new_quantity: Option<Decimal>, new_price: Option<Decimal>) -> OrderResponse {
        let inner = &self.inner;
        let cached = inner.order_cache.lock().get(client_id).map(|e| (e.request.symbol.clone(), e.category.clone()));
        let Some((symbol, category)) = cached else {
            return OrderResponse::rejected(client_id, "not_found", "no cached order for amend");
        };
        let mut body = json!({ "category": category, "symbol": symbol, "orderLinkId": client_id });
        if let Some(q) = new_quantity {
            body["qty"] = json!(trim_size(q));
        }
        if let Some(p) = new_price {
            body["price"] = json!(trim_size(p));
        }
        match inner.signed_post("/v5/order/amend", &body) {
            Ok(_) => OrderResponse::accepted(client_id, ""),
            Err(e) => OrderResponse::from_error(client_id, &e),
        }
    }

    fn query_order(&self, client_id: &str) -> OrderResponse {
        let inner = &self.inner;
        let cached = inner.order_cache.lock().get(client_id).map(|e| e.category.clone());
        let category = cached.unwrap_or_else(|| "linear".to_string());
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("category", category);
        params.insert("orderLinkId", client_id.to_string());
        match inner.signed_get("/v5/order/realtime", &params) {
            Ok(body) => {
                let row = body
                    .get("result")
                    .and_then(|r| r.get("list"))
                    .and_then(|v| v.as_array())
                    .and_then(|rows| rows.first());
                match row {
                    Some(row) => {
                        let status = row.get("orderStatus").and_then(|v| v.as_str()).unwrap_or("");
                        let exchange_id = row.get("orderId").and_then(|v| v.as_str()).unwrap_or("");
                        let mut response = OrderResponse::accepted(client_id, exchange_id);
                        response.status = Some(BybitInner::map_inbound_status(status));
                        response
                    }
                    None => OrderResponse::rejected(client_id, "not_found", "order not found"),
                }
            }
            Err(e) => OrderResponse::from_error(client_id, &e),
        }
    }

    fn list_open_orders(&self, filter: OpenOrdersFilter<'_>) -> Vec<OrderResponse> {
        let inner = &self.inner;
        let category = filter.category.unwrap_or("linear");
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("category", category.to_string());
        if let Some(symbol) = filter.symbol {
            params.insert("symbol", symbol.to_string());
        }
        if let Some(settle) = filter.settle_coin {
            params.insert("settleCoin", settle.to_string());
        }
        if let Some(base) = filter.base_coin {
            params.insert("baseCoin", base.to_string());
        }
        match inner.signed_get("/v5/order/realtime", &params) {
            Ok(body) => body
                .get("result")
                .and_then(|r| r.get("list"))
                .and_then(|v| v.as_array())
                .map(|rows| {
                    rows.iter()
                        .filter_map(|row| {
                            let client_id = row.get("orderLinkId").and_then(|v| v.as_str())?;
                            let exchange_id = row.get("orderId").and_then(|v| v.as_str()).unwrap_or("");
                            Some(OrderResponse::accepted(client_id, exchange_id))
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Err(e) => {
                inner.emit_error(e);
                Vec::new()
            }
        }
    }

    fn set_order_update_callback(&self, callback: OrderUpdateCallback) {
        *self.inner.on_order_update.lock() = Some(callback);
    }

    fn set_fill_callback(&self, callback: FillCallback) {
        *self.inner.on_fill.lock() = Some(callback);
    }

    fn set_error_callback(&self, callback: AdapterErrorCallback) {
        *self.inner.on_error.lock() = Some(callback);
    }

    fn exchange_name(&self) -> &str {
        "bybit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_table() {
        assert_eq!(BybitInner::map_inbound_status("New"), "new");
        assert_eq!(BybitInner::map_inbound_status("PartiallyFilled"), "partiallyfilled");
        assert_eq!(BybitInner::map_inbound_status("FILLED"), "filled");
        assert_eq!(BybitInner::map_inbound_status("CANCELED"), "canceled");
        assert_eq!(BybitInner::map_inbound_status("EXPIRED_IN_MATCH"), "canceled");
        assert_eq!(BybitInner::map_inbound_status("REJECTED"), "rejected");
        assert_eq!(BybitInner::map_inbound_status("AMENDED"), "replaced");
    }

    #[test]
    fn unrecognized_status_passes_through_as_an_owned_string() {
        // Bybit has added order-status literals before; an unrecognized one
        // must not be leaked, just forwarded as-is for the caller to log.
        assert_eq!(BybitInner::map_inbound_status("SomeNewStatus"), "SomeNewStatus");
    }

    #[test]
    fn query_plan_covers_linear_and_inverse() {
        let plan = query_plan(&[]);
        assert_eq!(plan.len(), 4);
        assert!(plan.iter().any(|(c, s, _)| *c == "linear" && s.as_deref() == Some("USDT")));
        assert!(plan.iter().any(|(c, _, b)| *c == "inverse" && b.as_deref() == Some("BTC")));
    }

    #[test]
    fn query_plan_adds_observed_spot_symbols() {
        let plan = query_plan(&[("spot".to_string(), "ETHUSDT".to_string())]);
        assert_eq!(plan.len(), 5);
        assert!(plan.iter().any(|(c, _, b)| *c == "spot" && b.as_deref() == Some("ETHUSDT")));
    }

    #[test]
    fn fill_dedupe_uses_synthesized_id_when_exec_id_absent() {
        let adapter = BybitAdapter::new(None);
        let row = json!({
            "orderLinkId": "A1",
            "orderId": "E1",
            "execPrice": "2500.00",
            "execQty": "0.1",
            "execTime": "1000",
            "side": "Buy",
        });
        adapter.inner.handle_execution_topic(&[row.clone()]);
        assert_eq!(adapter.inner.fill_dedupe.lock().len(), 1);
        adapter.inner.handle_execution_topic(&[row]);
        assert_eq!(adapter.inner.fill_dedupe.lock().len(), 1, "duplicate synthesized id must not double-insert");
    }

    #[test]
    fn exec_cursor_advances_to_max_exec_time() {
        let adapter = BybitAdapter::new(None);
        adapter.inner.handle_execution_topic(&[json!({
            "orderLinkId": "A1", "orderId": "E1", "execId": "X1",
            "execPrice": "1", "execQty": "1", "execTime": "500", "side": "Buy",
        })]);
        adapter.inner.handle_execution_topic(&[json!({
            "orderLinkId": "A1", "orderId": "E1", "execId": "X2",
            "execPrice": "1", "execQty": "1", "execTime": "1500", "side": "Buy",
        })]);
        assert_eq!(adapter.inner.exec_cursor_ms.load(Ordering::Acquire), 1500);
    }
}
