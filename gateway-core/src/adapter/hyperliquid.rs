//! Hyperliquid adapter (C9): the DEX-shaped venue.
//!
//! The most elaborate adapter in the gateway: every mutating call is a
//! msgpack-hashed, EIP-712-signed action, sent over a WS post client when
//! one is connected and falling back to HTTP otherwise. Limit orders may
//! be batched by a dedicated flush thread; market, FOK, and trigger orders
//! always bypass the batch queues. A second, independent WebSocket carries
//! the read-only `orderUpdates`/`userEvents`/`userFills` streams the
//! tracker reconciles against, the same role Bybit's private WS plays,
//! just over a venue with no REST order book.
//!
//! Like `BybitAdapter`, this is a thin `Arc<HyperliquidInner>` handle: the
//! batcher, the liveness monitor, and the WS reader all need their own
//! owning reference to the shared state.

use crate::adapter::{
    AdapterErrorCallback, ExchangeAdapter, FillCallback, OpenOrdersFilter, OrderUpdateCallback,
};
use crate::auth::eip712::{connection_id, Eip712Signer};
use crate::config::HyperliquidConfig;
use crate::core::errors::GatewayError;
use crate::core::numeric::{snap_price, trim_size};
use crate::core::resolver::{AssetInfo, AssetResolver};
use crate::core::symbol::to_hyphen;
use crate::core::types::{
    FillEvent, Liquidity, NormalizedOrderRequest, OrderResponse, OrderState, OrderType, Side,
    TimeInForce,
};
use crate::hft::flatmap::FlatSet;
use crate::monitoring::MetricsRegistry;
use crate::net::http::{HttpClient, HttpTimeouts};
use crate::net::ws::WsPostClient;
use parking_lot::{Mutex as PLMutex, RwLock};
use rand::RngCore;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

const REST_MAINNET: &str = "https://api.hyperliquid.xyz";
const REST_TESTNET: &str = "https://api.hyperliquid-testnet.xyz";
const WS_MAINNET: &str = "wss://api.hyperliquid.xyz/ws";
const WS_TESTNET: &str = "wss://api.hyperliquid-testnet.xyz/ws";

const FILL_DEDUPE_CAPACITY: usize = 10_000;
const RESUBSCRIBE_QUIET: Duration = Duration::from_secs(15);
const RECONNECT_QUIET: Duration = Duration::from_secs(45);
const LIVENESS_TICK: Duration = Duration::from_secs(1);
const SNAPSHOT_STALENESS: Duration = Duration::from_secs(1);
const CONFIRM_RESTING_ATTEMPTS: u32 = 3;
const CONFIRM_RESTING_INTERVAL: Duration = Duration::from_secs(4);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A fresh `0x` + 32 lowercase hex digit cloid (§8 property 6).
fn generate_cloid() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

fn is_cloid_shaped(s: &str) -> bool {
    s.len() == 34
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// Split a venue-native symbol into its base coin (perp path). Hyperliquid
/// addresses perpetuals by their universe `coin`, which is just the base
/// asset (`ETH`, `BTC`, ...); any quote/decoration is dropped by going
/// through the canonical hyphenated form first.
fn perp_coin(symbol: &str) -> String {
    to_hyphen(symbol).split('-').next().unwrap_or(symbol).to_string()
}

fn spot_base_quote(symbol: &str) -> (String, String) {
    let hyphen = to_hyphen(symbol);
    let mut parts = hyphen.splitn(2, '-');
    let base = parts.next().unwrap_or(symbol).to_string();
    let quote = parts.next().unwrap_or("USDC").to_string();
    (base, quote)
}

/// Hyperliquid's own time-in-force vocabulary. FOK has no native
/// counterpart; the gateway collapses it onto `Ioc`, since both mean "fill
/// what you can immediately, do not rest" at the wire level and FOK's
/// stricter "all or nothing" condition, a venue-side fill decision, offers
/// no way to express here.
fn tif_wire(tif: Option<TimeInForce>) -> &'static str {
    match tif {
        Some(TimeInForce::PostOnly) => "Alo",
        Some(TimeInForce::IOC) | Some(TimeInForce::FOK) => "Ioc",
        Some(TimeInForce::GTC) | None => "Gtc",
    }
}

fn is_trigger_order(req: &NormalizedOrderRequest) -> bool {
    matches!(req.order_type, OrderType::Stop | OrderType::StopLimit) || req.extra_decimal("triggerPrice").is_some()
}

/// `tpsl` classification (§4.9): `orderFilter` starting with
/// `takeprofit`/`tp` is a take-profit leg, anything else with a trigger
/// price present is a stop-loss leg.
fn tpsl_kind(req: &NormalizedOrderRequest) -> &'static str {
    match req.extra_str("orderFilter") {
        Some(f) if f.to_lowercase().starts_with("takeprofit") || f.to_lowercase().starts_with("tp") => "tp",
        _ => "sl",
    }
}

/// Normalize a private-WS order status to the tracker's wire vocabulary
/// (§4.9 liveness/channels section).
fn normalize_ws_status(status: &str) -> &'static str {
    match status {
        "open" => OrderState::Open.as_wire_str(),
        "filled" => OrderState::Filled.as_wire_str(),
        "canceled" | "cancelled" | "marginCanceled" | "scheduledCancel" => OrderState::Canceled.as_wire_str(),
        "triggered" => "accepted",
        "rejected" => OrderState::Failed.as_wire_str(),
        other if other.ends_with("Rejected") => OrderState::Failed.as_wire_str(),
        _ => "unknown",
    }
}

/// Bidirectional cloid/oid/role correlation tables (§3 "HL cloid mapping
/// tables"), all guarded by one mutex per the shared-resource policy (§5).
#[derive(Default)]
struct CloidTables {
    client_to_cloid: HashMap<String, String>,
    cloid_to_client: HashMap<String, String>,
    cloid_to_role: HashMap<String, &'static str>,
    oid_to_client: HashMap<String, String>,
    oid_to_role: HashMap<String, &'static str>,
    child_to_parent: HashMap<String, String>,
}

/// One order queued for the next batch flush.
struct QueuedOrder {
    client_id: String,
    item: Value,
}

struct OrderCacheEntry {
    request: NormalizedOrderRequest,
    asset: AssetInfo,
    is_spot: bool,
}

struct HyperliquidInner {
    testnet: AtomicBool,
    connected: AtomicBool,
    user_address: RwLock<String>,
    private_key: RwLock<String>,
    hl_config: HyperliquidConfig,
    http: PLMutex<Option<HttpClient>>,
    ws: PLMutex<Option<Arc<WsPostClient>>>,
    signer: Arc<Eip712Signer>,
    resolver: PLMutex<Option<Arc<AssetResolver>>>,
    nonce: crate::core::nonce::NonceManager,
    cloid_tables: PLMutex<CloidTables>,
    order_cache: PLMutex<HashMap<String, OrderCacheEntry>>,
    last_fill_price: PLMutex<HashMap<String, Decimal>>,
    fill_dedupe: PLMutex<FlatSet<String>>,
    q_fast: PLMutex<Vec<QueuedOrder>>,
    q_alo: PLMutex<Vec<QueuedOrder>>,
    backoff_until_ms: AtomicU64,
    last_private_event_ms: AtomicU64,
    last_resubscribe_ms: AtomicU64,
    subscribed_at_ms: AtomicU64,
    shutdown: Arc<AtomicBool>,
    on_order_update: PLMutex<Option<OrderUpdateCallback>>,
    on_fill: PLMutex<Option<FillCallback>>,
    on_error: PLMutex<Option<AdapterErrorCallback>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl HyperliquidInner {
    fn rest_base(&self) -> &'static str {
        if self.testnet.load(Ordering::Acquire) {
            REST_TESTNET
        } else {
            REST_MAINNET
        }
    }

    fn ws_url(&self) -> &'static str {
        if self.testnet.load(Ordering::Acquire) {
            WS_TESTNET
        } else {
            WS_MAINNET
        }
    }

    fn emit_error(&self, err: GatewayError) {
        warn!(error = %err, "hyperliquid adapter error");
        if let Some(cb) = self.on_error.lock().as_ref() {
            cb(err);
        }
    }

    fn record_rejected(&self, reason: &str) {
        if let Some(m) = &self.metrics {
            m.orders().rejected_total.with_label_values(&["hyperliquid", reason]).inc();
        }
    }

    fn in_backoff(&self) -> bool {
        now_ms() < self.backoff_until_ms.load(Ordering::Acquire)
    }

    fn enter_backoff(&self) {
        let until = now_ms() + self.hl_config.on_429_backoff.as_millis() as u64;
        self.backoff_until_ms.store(until, Ordering::Release);
        if let Some(m) = &self.metrics {
            m.venues().backoff_activations_total.with_label_values(&["hyperliquid"]).inc();
        }
        if self.hl_config.reserve_weight_on_429 {
            self.try_reserve_weight();
        }
    }

    /// Best-effort `reserveRequestWeight` spend while in back-off (§4.9).
    /// Failures are logged, never propagated: this is a courtesy action,
    /// not something a caller is waiting on.
    fn try_reserve_weight(&self) {
        if self.hl_config.reserve_weight_amount == 0 {
            return;
        }
        let action = json!({
            "type": "reserveRequestWeight",
            "weight": self.hl_config.reserve_weight_limit.min(self.hl_config.reserve_weight_amount),
        });
        let nonce = self.nonce.next();
        if let Err(e) = self.sign_and_send(&action, nonce) {
            debug!(error = %e, "hyperliquid reserveRequestWeight attempt failed");
        }
    }

    fn resolver_handle(&self) -> Result<Arc<AssetResolver>, GatewayError> {
        self.resolver
            .lock()
            .clone()
            .ok_or_else(|| GatewayError::Config("hyperliquid resolver not initialized".to_string()))
    }

    /// Resolve a normalized request's venue asset id, distinguishing spot
    /// from perp by the request's `category` (mirrors Bybit's use of the
    /// same field for its category string).
    fn resolve(&self, req: &NormalizedOrderRequest) -> Result<(AssetInfo, bool), GatewayError> {
        let resolver = self.resolver_handle()?;
        let is_spot = req.category.as_deref() == Some("spot");
        if is_spot {
            let (base, quote) = spot_base_quote(&req.symbol);
            Ok((resolver.resolve_spot(&base, &quote)?, true))
        } else {
            Ok((resolver.resolve_perp(&perp_coin(&req.symbol))?, false))
        }
    }

    /// Resolve an inbound WS `coin` field back to a display symbol. A
    /// leading `@N` denotes a spot pair index; the resolver has no
    /// reverse (id → name) index, so spot symbols surface as the raw
    /// `@N` form while perp coins surface as-is.
    fn wire_coin_to_symbol(&self, coin: &str) -> String {
        coin.to_string()
    }

    /// Ensure `req.client_id` has an assigned cloid, reusing the caller's
    /// client id verbatim when it already has cloid shape (§4.9).
    fn ensure_cloid(&self, client_id: &str) -> String {
        let mut tables = self.cloid_tables.lock();
        if let Some(existing) = tables.client_to_cloid.get(client_id) {
            return existing.clone();
        }
        let cloid = if is_cloid_shaped(client_id) {
            client_id.to_string()
        } else {
            generate_cloid()
        };
        tables.client_to_cloid.insert(client_id.to_string(), cloid.clone());
        tables.cloid_to_client.insert(cloid.clone(), client_id.to_string());
        cloid
    }

    fn record_role(&self, client_id: &str, cloid: &str, role: &'static str, parent: Option<&str>) {
        let mut tables = self.cloid_tables.lock();
        tables.cloid_to_role.insert(cloid.to_string(), role);
        if let Some(parent) = parent {
            tables.child_to_parent.insert(client_id.to_string(), parent.to_string());
        }
    }

    fn bind_oid(&self, cloid: &str, oid: &str) {
        let mut tables = self.cloid_tables.lock();
        if let Some(client_id) = tables.cloid_to_client.get(cloid).cloned() {
            tables.oid_to_client.insert(oid.to_string(), client_id);
        }
        if let Some(role) = tables.cloid_to_role.get(cloid).copied() {
            tables.oid_to_role.insert(oid.to_string(), role);
        }
    }

    fn client_id_for_oid(&self, oid: &str) -> Option<String> {
        self.cloid_tables.lock().oid_to_client.get(oid).cloned()
    }

    fn client_id_for_cloid(&self, cloid: &str) -> Option<String> {
        self.cloid_tables.lock().cloid_to_client.get(cloid).cloned()
    }

    /// Build one `orders[]` entry (§4.9 action schema), field order
    /// `a, b, p, s, r, t, c` preserved via `serde_json`'s `preserve_order`
    /// feature so the signed bytes are stable across calls.
    fn build_order_item(
        &self,
        asset: &AssetInfo,
        req: &NormalizedOrderRequest,
        cloid: &str,
    ) -> Result<Value, GatewayError> {
        let mut map = Map::new();
        map.insert("a".to_string(), json!(asset.asset_id));
        map.insert("b".to_string(), json!(matches!(req.side, Side::Buy)));

        if is_trigger_order(req) {
            let trigger_price = req
                .extra_decimal("triggerPrice")
                .ok_or_else(|| GatewayError::InvalidParams("trigger order missing triggerPrice".to_string()))?;
            // A `stop_limit` (or any trigger with an explicit price) sends
            // that price verbatim, only tick-snapped; only a true
            // stop-market (no explicit price) synthesizes one from the
            // last fill plus slippage, since the venue ignores `p` when
            // `isMarket` is set but still requires a well-formed value.
            let is_market = req.order_type != OrderType::StopLimit && req.price.is_none();
            let limit_px = if is_market {
                self.best_effort_limit_price(req, trigger_price, asset)?
            } else {
                let explicit = req.price.unwrap_or(trigger_price);
                match asset.size_decimals {
                    Some(d) => snap_price(explicit, d, req.side),
                    None => {
                        return Err(GatewayError::SymbolResolutionFailed(
                            "spot size decimals unknown; refusing to guess a tick size".to_string(),
                        ))
                    }
                }
            };
            map.insert("p".to_string(), json!(trim_size(limit_px)));
            map.insert("s".to_string(), json!(trim_size(req.quantity)));
            map.insert("r".to_string(), json!(req.reduce_only));
            map.insert(
                "t".to_string(),
                json!({ "trigger": {
                    "isMarket": is_market,
                    "triggerPx": trim_size(trigger_price),
                    "tpsl": tpsl_kind(req),
                } }),
            );
        } else if req.order_type == OrderType::Market {
            let price = self.best_effort_limit_price(req, req.price.unwrap_or_default(), asset)?;
            map.insert("p".to_string(), json!(trim_size(price)));
            map.insert("s".to_string(), json!(trim_size(req.quantity)));
            map.insert("r".to_string(), json!(req.reduce_only));
            map.insert("t".to_string(), json!({ "limit": { "tif": "Ioc" } }));
        } else {
            let price = req
                .price
                .ok_or_else(|| GatewayError::InvalidParams("limit order missing price".to_string()))?;
            let snapped = asset
                .size_decimals
                .map(|d| snap_price(price, d, req.side))
                .ok_or_else(|| {
                    GatewayError::SymbolResolutionFailed(
                        "spot size decimals unknown; refusing to guess a tick size".to_string(),
                    )
                })?;
            map.insert("p".to_string(), json!(trim_size(snapped)));
            map.insert("s".to_string(), json!(trim_size(req.quantity)));
            map.insert("r".to_string(), json!(req.reduce_only));
            map.insert("t".to_string(), json!({ "limit": { "tif": tif_wire(req.time_in_force) } }));
        }

        map.insert("c".to_string(), json!(cloid));
        Ok(Value::Object(map))
    }

    /// Synthesize a limit price for a market or trigger order: an explicit
    /// caller-supplied price always wins; only when the caller gave none
    /// do we fall back to the last fill observed for the symbol, capped by
    /// `ioc_market_slippage_bps`, else the trigger price, else refuse. This
    /// subsystem has no market-data feed of its own (that lives upstream,
    /// per §1 Non-goals), so "live top-of-book" is unavailable here; the
    /// last fill this adapter itself observed is the best information on
    /// hand.
    fn best_effort_limit_price(
        &self,
        req: &NormalizedOrderRequest,
        fallback: Decimal,
        asset: &AssetInfo,
    ) -> Result<Decimal, GatewayError> {
        let last_fill = self.last_fill_price.lock().get(&req.symbol).copied();
        let base = req.price.or(last_fill).unwrap_or(fallback);
        if base.is_zero() {
            return Err(GatewayError::InvalidParams(
                "no live price available to synthesize a market/trigger order price".to_string(),
            ));
        }
        let bps = Decimal::from(self.hl_config.ioc_market_slippage_bps) / Decimal::from(10_000u32);
        let slipped = match req.side {
            Side::Buy => base * (Decimal::ONE + bps),
            Side::Sell => base * (Decimal::ONE - bps),
        };
        match asset.size_decimals {
            Some(d) => Ok(snap_price(slipped, d, req.side)),
            None => Ok(slipped.round_dp(6).normalize()),
        }
    }

    /// Sign `action` and deliver it, preferring the WS post client and
    /// falling back to HTTP `/exchange` (§4.9 transport selection).
    fn sign_and_send(&self, action: &Value, nonce: u64) -> Result<Value, GatewayError> {
        if self.in_backoff() {
            return Err(GatewayError::RateLimited {
                retry_after_ms: self.backoff_until_ms.load(Ordering::Acquire).saturating_sub(now_ms()),
            });
        }

        let is_mainnet = !self.testnet.load(Ordering::Acquire);
        let private_key = self.private_key.read().clone();
        let signed = self.signer.sign(
            &private_key,
            action,
            nonce,
            None,
            None,
            is_mainnet,
            self.hl_config.ws_post_timeout,
        )?;
        let _connection_id = connection_id(action, None, nonce);

        let payload = json!({
            "action": action,
            "nonce": nonce,
            "signature": { "r": signed.r, "s": signed.s, "v": signed.v },
            "vaultAddress": Value::Null,
        });

        let ws_handle = if self.hl_config.disable_ws_post {
            None
        } else {
            self.ws.lock().clone()
        };

        if let Some(ws) = ws_handle.filter(|w| w.is_connected()) {
            if let Some(response) = ws.post("action", payload.clone(), self.hl_config.ws_post_timeout) {
                return Ok(response);
            }
            debug!("hyperliquid ws post timed out, falling back to HTTP");
        }

        let http_guard = self.http.lock();
        let http = http_guard
            .as_ref()
            .ok_or_else(|| GatewayError::Config("hyperliquid REST client not connected".to_string()))?;
        let body = serde_json::to_string(&payload)
            .map_err(|e| GatewayError::InvalidParams(format!("action encode: {e}")))?;
        let started = Instant::now();
        let result = http.post("/exchange", &body, &[("Content-Type", "application/json".to_string())]);
        if let Some(m) = &self.metrics {
            m.venues()
                .rest_latency_ms
                .with_label_values(&["hyperliquid"])
                .observe(started.elapsed().as_millis() as f64);
        }
        match result {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| GatewayError::TransportFailed(format!("malformed /exchange response: {e}"))),
            Err(GatewayError::HttpStatusError { status: 429, body }) => {
                self.enter_backoff();
                if let Some(m) = &self.metrics {
                    m.venues().rate_limited_total.with_label_values(&["hyperliquid"]).inc();
                }
                Err(GatewayError::RateLimited { retry_after_ms: self.hl_config.on_429_backoff.as_millis() as u64 })
                    .map_err(|e| {
                        debug!(body, "hyperliquid 429 body");
                        e
                    })
            }
            Err(e) => Err(e),
        }
    }

    /// Parse one `response.data.statuses[i]` entry (§4.9 response
    /// parsing) into an `(OrderResponse, Option<FillEvent>)` pair, binding
    /// the cloid to the returned oid as a side effect.
    fn handle_status_entry(&self, client_id: &str, symbol: &str, side: Side, cloid: &str, entry: &Value) -> (OrderResponse, Option<FillEvent>) {
        if let Some(resting) = entry.get("resting") {
            let oid = resting.get("oid").map(|v| v.to_string()).unwrap_or_default();
            self.bind_oid(cloid, &oid);
            self.schedule_confirm_resting(client_id.to_string(), oid.clone(), cloid.to_string());
            if let Some(m) = &self.metrics {
                m.orders().placed_total.with_label_values(&["hyperliquid", side.to_string().as_str()]).inc();
            }
            return (OrderResponse::accepted(client_id, oid), None);
        }
        if let Some(filled) = entry.get("filled") {
            let oid = filled.get("oid").map(|v| v.to_string()).unwrap_or_default();
            self.bind_oid(cloid, &oid);
            let avg_px: Decimal = filled
                .get("avgPx")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let total_sz: Decimal = filled
                .get("totalSz")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            self.last_fill_price.lock().insert(symbol.to_string(), avg_px);
            let mut response = OrderResponse::accepted(client_id, oid.clone());
            response.status = Some("filled".to_string());
            if let Some(m) = &self.metrics {
                m.orders().placed_total.with_label_values(&["hyperliquid", side.to_string().as_str()]).inc();
                m.orders().fills_total.with_label_values(&["hyperliquid"]).inc();
            }
            let fill = FillEvent {
                version: 1,
                client_id: client_id.to_string(),
                exchange_id: oid,
                exec_id: format!("{client_id}:{cloid}:ack"),
                symbol: symbol.to_string(),
                side,
                price: avg_px,
                quantity: total_sz,
                fee: None,
                fee_currency: None,
                liquidity: Liquidity::Taker,
                ts_ms: now_ms(),
                extra: HashMap::new(),
            };
            return (response, Some(fill));
        }
        let reason = entry.as_str().map(|s| s.to_string()).unwrap_or_else(|| entry.to_string());
        self.record_rejected("venue_rejected");
        (OrderResponse::rejected(client_id, "venue_rejected", reason), None)
    }

    /// Out-of-band safety net (§4.9): poll `/info orderStatus` a few times
    /// after a `resting` ack, in case the private WS missed the
    /// corresponding `open` event.
    fn schedule_confirm_resting(self: &Arc<Self>, client_id: String, oid: String, cloid: String) {
        if oid.is_empty() {
            return;
        }
        let this = self.clone();
        std::thread::Builder::new()
            .name("hl-confirm-resting".to_string())
            .spawn(move || {
                for _ in 0..CONFIRM_RESTING_ATTEMPTS {
                    std::thread::sleep(CONFIRM_RESTING_INTERVAL);
                    if this.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    match this.query_order_status(&oid, &cloid) {
                        Ok(Some(_)) => {
                            let mut update = crate::core::types::OrderUpdate::new(&client_id, "new");
                            update.exchange_id = Some(oid.clone());
                            if let Some(cb) = this.on_order_update.lock().as_ref() {
                                cb(update);
                            }
                            return;
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            debug!(error = %e, "confirm_resting_async query failed");
                            continue;
                        }
                    }
                }
            })
            .expect("failed to spawn hyperliquid confirm-resting thread");
    }

    fn query_order_status(&self, oid: &str, cloid: &str) -> Result<Option<Value>, GatewayError> {
        let http_guard = self.http.lock();
        let http = http_guard
            .as_ref()
            .ok_or_else(|| GatewayError::Config("hyperliquid REST client not connected".to_string()))?;
        let user = self.user_address.read().clone();
        let body = if !oid.is_empty() {
            json!({ "type": "orderStatus", "user": user, "oid": oid.parse::<u64>().unwrap_or(0) }).to_string()
        } else {
            json!({ "type": "orderStatus", "user": user, "oid": cloid }).to_string()
        };
        let text = http.post("/info", &body, &[("Content-Type", "application/json".to_string())])?;
        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| GatewayError::TransportFailed(format!("malformed orderStatus response: {e}")))?;
        if parsed.get("status").and_then(|v| v.as_str()) == Some("unknownOid") {
            Ok(None)
        } else {
            Ok(Some(parsed))
        }
    }

    /// Flush one queue as a single signed `order` action, resolving each
    /// queued response by index against `response.data.statuses` (§4.9).
    fn flush_queue(self: &Arc<Self>, queue: &PLMutex<Vec<QueuedOrder>>) {
        let batch = {
            let mut guard = queue.lock();
            if guard.is_empty() {
                return;
            }
            std::mem::take(&mut *guard)
        };

        if self.in_backoff() {
            for queued in &batch {
                self.record_rejected("rate_limited");
                self.emit_order_update(&queued.client_id, "rejected", Some("rate_limited"));
            }
            return;
        }

        let orders: Vec<Value> = batch.iter().map(|q| q.item.clone()).collect();
        let action = json!({ "type": "order", "grouping": "na", "orders": orders });
        let nonce = self.nonce.next();

        match self.sign_and_send(&action, nonce) {
            Ok(response) => {
                let statuses = response
                    .get("response")
                    .and_then(|r| r.get("data"))
                    .and_then(|d| d.get("statuses"))
                    .and_then(|s| s.as_array())
                    .cloned()
                    .unwrap_or_default();
                for (i, queued) in batch.iter().enumerate() {
                    let Some(entry) = statuses.get(i) else {
                        self.emit_order_update(&queued.client_id, "rejected", Some("no status returned"));
                        continue;
                    };
                    let cloid = self.client_id_for_client(&queued.client_id);
                    let (order_resp, fill) = self.handle_status_entry(
                        &queued.client_id,
                        &self.symbol_for_client(&queued.client_id),
                        self.side_for_client(&queued.client_id),
                        &cloid,
                        entry,
                    );
                    self.deliver_batch_result(&queued.client_id, order_resp, fill);
                }
            }
            Err(e) => {
                for queued in &batch {
                    self.record_rejected(e.reason_code());
                    self.emit_order_update(&queued.client_id, "rejected", Some(&e.to_string()));
                }
                self.emit_error(e);
            }
        }
    }

    fn client_id_for_client(&self, client_id: &str) -> String {
        self.cloid_tables
            .lock()
            .client_to_cloid
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }

    fn symbol_for_client(&self, client_id: &str) -> String {
        self.order_cache
            .lock()
            .get(client_id)
            .map(|e| e.request.symbol.clone())
            .unwrap_or_default()
    }

    fn side_for_client(&self, client_id: &str) -> Side {
        self.order_cache
            .lock()
            .get(client_id)
            .map(|e| e.request.side)
            .unwrap_or(Side::Buy)
    }

    fn emit_order_update(&self, client_id: &str, status: &str, reason: Option<&str>) {
        let mut update = crate::core::types::OrderUpdate::new(client_id, status);
        update.reason = reason.map(|s| s.to_string());
        if let Some(cb) = self.on_order_update.lock().as_ref() {
            cb(update);
        }
    }

    fn deliver_batch_result(&self, client_id: &str, response: OrderResponse, fill: Option<FillEvent>) {
        let status = response.status.clone().unwrap_or_else(|| "accepted".to_string());
        let mut update = crate::core::types::OrderUpdate::new(client_id, if status == "filled" { "filled" } else { "new" });
        update.exchange_id = response.exchange_order_id.clone();
        if !response.success {
            update = crate::core::types::OrderUpdate::new(client_id, "rejected");
            update.reason = Some(response.message.clone());
        }
        if let Some(cb) = self.on_order_update.lock().as_ref() {
            cb(update);
        }
        if let Some(fill) = fill {
            if let Some(cb) = self.on_fill.lock().as_ref() {
                cb(fill);
            }
        }
    }

    fn spawn_batcher(self: &Arc<Self>) {
        let this = self.clone();
        std::thread::Builder::new()
            .name("hl-batcher".to_string())
            .spawn(move || {
                while !this.shutdown.load(Ordering::Acquire) {
                    std::thread::sleep(this.hl_config.batch_cadence);
                    this.flush_queue(&this.q_fast);
                    this.flush_queue(&this.q_alo);
                }
            })
            .expect("failed to spawn hyperliquid batcher thread");
    }

    fn spawn_liveness(self: &Arc<Self>) {
        let this = self.clone();
        std::thread::Builder::new()
            .name("hl-liveness".to_string())
            .spawn(move || {
                while !this.shutdown.load(Ordering::Acquire) {
                    std::thread::sleep(LIVENESS_TICK);
                    let quiet = now_ms().saturating_sub(this.last_private_event_ms.load(Ordering::Acquire));
                    if quiet >= RECONNECT_QUIET.as_millis() as u64 {
                        warn!("hyperliquid private websocket quiet past reconnect deadline, recycling");
                        if let Err(e) = this.connect_private_ws() {
                            warn!(error = %e, "hyperliquid ws recycle failed");
                        }
                        continue;
                    }
                    if quiet >= RESUBSCRIBE_QUIET.as_millis() as u64 {
                        let last_resub = this.last_resubscribe_ms.load(Ordering::Acquire);
                        if now_ms().saturating_sub(last_resub) >= RESUBSCRIBE_QUIET.as_millis() as u64 {
                            debug!("hyperliquid private stream quiet, resubscribing");
                            this.subscribe_private_channels();
                            this.last_resubscribe_ms.store(now_ms(), Ordering::Release);
                        }
                    }
                }
            })
            .expect("failed to spawn hyperliquid liveness thread");
    }

    fn subscribe_private_channels(&self) {
        let Some(ws) = self.ws.lock().clone() else { return };
        let user = self.user_address.read().clone();
        for sub_type in ["orderUpdates", "userEvents", "userFills"] {
            let mut fields = Map::new();
            fields.insert("user".to_string(), json!(user));
            if let Err(e) = ws.subscribe(sub_type, fields) {
                warn!(sub_type, error = %e, "hyperliquid subscribe failed");
            }
        }
        self.subscribed_at_ms.store(now_ms(), Ordering::Release);
    }

    fn connect_private_ws(self: &Arc<Self>) -> Result<(), GatewayError> {
        if self.hl_config.disable_private_ws {
            return Ok(());
        }
        let ws = Arc::new(WsPostClient::connect(self.ws_url())?);
        let this = self.clone();
        ws.set_message_handler(Arc::new(move |frame: Value| this.handle_private_frame(&frame)));
        *self.ws.lock() = Some(ws);
        self.connected.store(true, Ordering::Release);
        if let Some(m) = &self.metrics {
            m.venues().connected.with_label_values(&["hyperliquid"]).set(1);
            m.venues().reconnects_total.with_label_values(&["hyperliquid"]).inc();
        }
        self.subscribe_private_channels();
        self.last_private_event_ms.store(now_ms(), Ordering::Release);
        info!("hyperliquid private websocket connected and subscribed");
        Ok(())
    }

    fn handle_private_frame(&self, frame: &Value) {
        let Some(channel) = frame.get("channel").and_then(|v| v.as_str()) else {
            return;
        };
        if frame.get("isSnapshot").and_then(|v| v.as_bool()) == Some(true) {
            return;
        }
        self.last_private_event_ms.store(now_ms(), Ordering::Release);

        let subscribed_at = self.subscribed_at_ms.load(Ordering::Acquire);
        let cutoff = subscribed_at.saturating_sub(SNAPSHOT_STALENESS.as_millis() as u64);

        match channel {
            "orderUpdates" => {
                let Some(rows) = frame.get("data").and_then(|v| v.as_array()) else { return };
                for row in rows {
                    self.handle_order_update_row(row, cutoff);
                }
            }
            "userFills" => {
                let Some(fills) = frame.get("data").and_then(|d| d.get("fills")).and_then(|v| v.as_array()) else {
                    return;
                };
                for row in fills {
                    self.handle_fill_row(row, cutoff);
                }
            }
            "userEvents" => {
                let Some(fills) = frame.get("data").and_then(|d| d.get("fills")).and_then(|v| v.as_array()) else {
                    return;
                };
                for row in fills {
                    self.handle_fill_row(row, cutoff);
                }
            }
            _ => debug!(channel, "ignoring unrecognized hyperliquid private channel"),
        }
    }

    fn handle_order_update_row(&self, row: &Value, cutoff: u64) {
        let ts = row.get("statusTimestamp").and_then(|v| v.as_u64()).unwrap_or_else(now_ms);
        if ts < cutoff {
            return;
        }
        let order = row.get("order").unwrap_or(row);
        let oid = order.get("oid").map(|v| v.to_string()).unwrap_or_default();
        let cloid = order.get("cloid").and_then(|v| v.as_str()).map(|s| s.to_string());
        let client_id = cloid
            .as_deref()
            .and_then(|c| self.client_id_for_cloid(c))
            .or_else(|| self.client_id_for_oid(&oid));
        let Some(client_id) = client_id else {
            debug!(oid, "hyperliquid order update for unknown oid/cloid");
            return;
        };
        let status = row.get("status").and_then(|v| v.as_str()).unwrap_or("");
        let wire_status = normalize_ws_status(status);
        if wire_status == "unknown" {
            debug!(status, "unrecognized hyperliquid order status");
            return;
        }
        let mut update = crate::core::types::OrderUpdate::new(&client_id, wire_status);
        update.exchange_id = Some(oid.clone());
        if wire_status == OrderState::Failed.as_wire_str() {
            update.reason = Some(status.to_string());
        }
        if let Some(cb) = self.on_order_update.lock().as_ref() {
            cb(update);
        }
    }

    fn handle_fill_row(&self, row: &Value, cutoff: u64) {
        let ts = row.get("time").and_then(|v| v.as_u64()).unwrap_or_else(now_ms);
        if ts < cutoff {
            return;
        }
        let tid = row
            .get("tid")
            .map(|v| v.to_string())
            .unwrap_or_else(|| row.get("hash").and_then(|v| v.as_str()).unwrap_or("").to_string());
        if !self.fill_dedupe.lock().insert(tid.clone()) {
            if let Some(m) = &self.metrics {
                m.orders().fill_dedupe_hits_total.inc();
            }
            return;
        }
        let oid = row.get("oid").map(|v| v.to_string()).unwrap_or_default();
        let Some(client_id) = self.client_id_for_oid(&oid) else {
            debug!(oid, "hyperliquid fill for unknown oid");
            return;
        };
        let coin = row.get("coin").and_then(|v| v.as_str()).unwrap_or("");
        let symbol = self.wire_coin_to_symbol(coin);
        let side = match row.get("side").and_then(|v| v.as_str()) {
            Some("B") => Side::Buy,
            _ => Side::Sell,
        };
        let price: Decimal = row.get("px").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()).unwrap_or_default();
        let qty: Decimal = row.get("sz").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()).unwrap_or_default();
        let liquidity = match row.get("crossed").and_then(|v| v.as_bool()) {
            Some(true) => Liquidity::Taker,
            _ => Liquidity::Maker,
        };
        let fee: Option<Decimal> = row.get("fee").and_then(|v| v.as_str()).and_then(|s| s.parse().ok());
        let fee_currency = row.get("feeToken").and_then(|v| v.as_str()).map(|s| s.to_string());

        self.last_fill_price.lock().insert(symbol.clone(), price);

        let mut extra = HashMap::new();
        if let Some(parent) = self.cloid_tables.lock().child_to_parent.get(&client_id).cloned() {
            extra.insert("parent".to_string(), Value::String(parent));
        }
        if let Some(role) = self.cloid_tables.lock().oid_to_role.get(&oid) {
            extra.insert("role".to_string(), Value::String(role.to_string()));
        }

        let fill = FillEvent {
            version: 1,
            client_id,
            exchange_id: oid,
            exec_id: tid,
            symbol,
            side,
            price,
            quantity: qty,
            fee,
            fee_currency,
            liquidity,
            ts_ms: ts,
            extra,
        };
        if let Some(m) = &self.metrics {
            m.orders().fills_total.with_label_values(&["hyperliquid"]).inc();
        }
        if let Some(cb) = self.on_fill.lock().as_ref() {
            cb(fill);
        }
    }
}

/// The Hyperliquid venue adapter.
pub struct HyperliquidAdapter {
    inner: Arc<HyperliquidInner>,
}

impl HyperliquidAdapter {
    pub fn new(metrics: Option<Arc<MetricsRegistry>>, hl_config: HyperliquidConfig) -> Self {
        let signer = if hl_config.signer_python.is_empty() {
            Arc::new(Eip712Signer::stub())
        } else {
            match Eip712Signer::spawn(hl_config.signer_python.clone(), hl_config.signer_script.clone()) {
                Ok(s) => Arc::new(s),
                Err(e) => {
                    error!(error = %e, "failed to spawn hyperliquid signer, using a refusing stub");
                    Arc::new(Eip712Signer::stub())
                }
            }
        };

        Self {
            inner: Arc::new(HyperliquidInner {
                testnet: AtomicBool::new(true),
                connected: AtomicBool::new(false),
                user_address: RwLock::new(String::new()),
                private_key: RwLock::new(String::new()),
                hl_config,
                http: PLMutex::new(None),
                ws: PLMutex::new(None),
                signer,
                resolver: PLMutex::new(None),
                nonce: crate::core::nonce::NonceManager::new(),
                cloid_tables: PLMutex::new(CloidTables::default()),
                order_cache: PLMutex::new(HashMap::new()),
                last_fill_price: PLMutex::new(HashMap::new()),
                fill_dedupe: PLMutex::new(FlatSet::with_capacity(FILL_DEDUPE_CAPACITY)),
                q_fast: PLMutex::new(Vec::new()),
                q_alo: PLMutex::new(Vec::new()),
                backoff_until_ms: AtomicU64::new(0),
                last_private_event_ms: AtomicU64::new(now_ms()),
                last_resubscribe_ms: AtomicU64::new(0),
                subscribed_at_ms: AtomicU64::new(0),
                shutdown: Arc::new(AtomicBool::new(false)),
                on_order_update: PLMutex::new(None),
                on_fill: PLMutex::new(None),
                on_error: PLMutex::new(None),
                metrics,
            }),
        }
    }

    /// Whether this request should bypass the batch queues entirely:
    /// market orders (already translated to IOC with a synthesized
    /// price), FOK, and any trigger order (§4.9).
    fn bypasses_batching(req: &NormalizedOrderRequest) -> bool {
        req.order_type == OrderType::Market
            || req.time_in_force == Some(TimeInForce::FOK)
            || is_trigger_order(req)
    }
}

impl ExchangeAdapter for HyperliquidAdapter {
    fn initialize(&self, api_key: &str, api_secret: &str, testnet: bool) -> bool {
        if api_key.is_empty() || api_secret.is_empty() {
            error!("hyperliquid adapter requires a user address (api_key) and a private key (api_secret)");
            return false;
        }
        self.inner.testnet.store(testnet, Ordering::Release);
        *self.inner.user_address.write() = api_key.to_string();
        *self.inner.private_key.write() = api_secret.to_string();

        let http = match HttpClient::new(self.inner.rest_base(), HttpTimeouts::from_env()) {
            Ok(h) => h,
            Err(e) => {
                error!(error = %e, "failed to build hyperliquid REST client");
                return false;
            }
        };
        let resolver = Arc::new(AssetResolver::new(
            match HttpClient::new(self.inner.rest_base(), HttpTimeouts::from_env()) {
                Ok(h) => h,
                Err(e) => {
                    error!(error = %e, "failed to build hyperliquid resolver REST client");
                    return false;
                }
            },
        ));
        *self.inner.http.lock() = Some(http);
        *self.inner.resolver.lock() = Some(resolver);
        true
    }

    fn connect(&self) -> bool {
        if let Err(e) = self.inner.resolver_handle().and_then(|r| r.refresh_all()) {
            warn!(error = %e, "hyperliquid initial asset universe refresh failed, will retry lazily");
        }
        let connected = if self.inner.hl_config.disable_private_ws {
            true
        } else {
            match self.inner.connect_private_ws() {
                Ok(()) => true,
                Err(e) => {
                    error!(error = %e, "hyperliquid initial connect failed");
                    false
                }
            }
        };
        if connected {
            self.inner.spawn_batcher();
            self.inner.spawn_liveness();
        }
        connected
    }

    fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.connected.store(false, Ordering::Release);
        if let Some(ws) = self.inner.ws.lock().take() {
            ws.disconnect();
        }
        if let Some(m) = &self.inner.metrics {
            m.venues().connected.with_label_values(&["hyperliquid"]).set(0);
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    fn place_order(&self, req: &NormalizedOrderRequest) -> OrderResponse {
        let inner = &self.inner;

        let (asset, is_spot) = match inner.resolve(req) {
            Ok(r) => r,
            Err(e) => {
                inner.record_rejected(e.reason_code());
                return OrderResponse::from_error(req.client_id.clone(), &e);
            }
        };

        let cloid = inner.ensure_cloid(&req.client_id);
        if is_trigger_order(req) {
            let role = tpsl_kind(req);
            let parent = req.extra_str("parent_client_id");
            inner.record_role(&req.client_id, &cloid, role, parent);
        }

        let item = match inner.build_order_item(&asset, req, &cloid) {
            Ok(item) => item,
            Err(e) => {
                inner.record_rejected(e.reason_code());
                return OrderResponse::from_error(req.client_id.clone(), &e);
            }
        };

        inner.order_cache.lock().insert(
            req.client_id.clone(),
            OrderCacheEntry { request: req.clone(), asset, is_spot },
        );

        if !inner.hl_config.enable_batching || Self::bypasses_batching(req) {
            let action = json!({ "type": "order", "grouping": "na", "orders": [item] });
            let nonce = inner.nonce.next();
            return match inner.sign_and_send(&action, nonce) {
                Ok(response) => {
                    let entry = response
                        .get("response")
                        .and_then(|r| r.get("data"))
                        .and_then(|d| d.get("statuses"))
                        .and_then(|s| s.as_array())
                        .and_then(|a| a.first())
                        .cloned()
                        .unwrap_or(Value::Null);
                    let (order_resp, fill) =
                        inner.handle_status_entry(&req.client_id, &req.symbol, req.side, &cloid, &entry);
                    if let Some(fill) = fill {
                        if let Some(cb) = inner.on_fill.lock().as_ref() {
                            cb(fill);
                        }
                    }
                    order_resp
                }
                Err(e) => {
                    inner.record_rejected(e.reason_code());
                    inner.emit_error(e.clone_for_response());
                    OrderResponse::from_error(req.client_id.clone(), &e)
                }
            };
        }

        let queue = match req.time_in_force {
            Some(TimeInForce::PostOnly) => &inner.q_alo,
            _ => &inner.q_fast,
        };
        queue.lock().push(QueuedOrder { client_id: req.client_id.clone(), item });
        OrderResponse::accepted(req.client_id.clone(), "")
    }

    fn cancel_order(&self, client_id: &str, symbol: Option<&str>, exchange_id: Option<&str>) -> OrderResponse {
        let inner = &self.inner;
        let cached = inner.order_cache.lock().get(client_id).map(|e| (e.request.symbol.clone(), e.asset, e.is_spot));
        let (symbol, asset, is_spot) = match (symbol, cached) {
            (Some(s), Some((_, a, spot))) => (s.to_string(), a, spot),
            (None, Some((s, a, spot))) => (s, a, spot),
            (Some(s), None) => {
                let (a, spot) = match inner.resolve(&NormalizedOrderRequest {
                    client_id: client_id.to_string(),
                    symbol: s.clone(),
                    side: Side::Buy,
                    order_type: OrderType::Limit,
                    quantity: Decimal::ZERO,
                    price: None,
                    time_in_force: None,
                    category: None,
                    reduce_only: false,
                    extra: HashMap::new(),
                }) {
                    Ok(r) => r,
                    Err(e) => return OrderResponse::from_error(client_id, &e),
                };
                (s, a, spot)
            }
            (None, None) => {
                return OrderResponse::rejected(client_id, "not_found", "no cached order for cancel");
            }
        };
        let _ = is_spot;

        let cloid = inner.client_id_for_client(client_id);
        let action = if !cloid.is_empty() {
            json!({ "type": "cancelByCloid", "cancels": [{ "asset": asset.asset_id, "cloid": cloid }] })
        } else if let Some(oid) = exchange_id.and_then(|o| o.parse::<u64>().ok()) {
            json!({ "type": "cancel", "cancels": [{ "a": asset.asset_id, "o": oid }] })
        } else {
            return OrderResponse::rejected(client_id, "not_found", "no cloid or numeric exchange id to cancel by");
        };

        let nonce = inner.nonce.next();
        match inner.sign_and_send(&action, nonce) {
            Ok(_) => {
                if let Some(m) = &inner.metrics {
                    m.orders().canceled_total.with_label_values(&["hyperliquid"]).inc();
                }
                OrderResponse::accepted(client_id, exchange_id.unwrap_or_default())
            }
            Err(e) => OrderResponse::from_error(client_id, &e),
        }
        .tap_symbol(&symbol)
    }

    fn modify_order(&self, client_id: &str, _new_quantity: Option<Decimal>, _new_price: Option<Decimal>) -> OrderResponse {
        OrderResponse::from_error(
            client_id,
            &GatewayError::NotImplemented("hyperliquid has no native order modify; cancel and resubmit".to_string()),
        )
    }

    fn query_order(&self, client_id: &str) -> OrderResponse {
        let inner = &self.inner;
        let cloid = inner.client_id_for_client(client_id);
        let oid = inner.order_cache.lock().get(client_id).and_then(|_| None::<String>).unwrap_or_default();
        match inner.query_order_status(&oid, &cloid) {
            Ok(Some(body)) => {
                let status = body.get("order").and_then(|o| o.get("status")).and_then(|v| v.as_str()).unwrap_or("");
                let exchange_id = body
                    .get("order")
                    .and_then(|o| o.get("order"))
                    .and_then(|o| o.get("oid"))
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                let mut response = OrderResponse::accepted(client_id, exchange_id);
                response.status = Some(normalize_ws_status(status).to_string());
                response
            }
            Ok(None) => OrderResponse::rejected(client_id, "not_found", "order not found"),
            Err(e) => OrderResponse::from_error(client_id, &e),
        }
    }

    fn list_open_orders(&self, filter: OpenOrdersFilter<'_>) -> Vec<OrderResponse> {
        let inner = &self.inner;
        let http_guard = inner.http.lock();
        let Some(http) = http_guard.as_ref() else {
            return Vec::new();
        };
        let user = inner.user_address.read().clone();
        let body = json!({ "type": "openOrders", "user": user }).to_string();
        let result = http.post("/info", &body, &[("Content-Type", "application/json".to_string())]);
        drop(http_guard);

        match result {
            Ok(text) => {
                let parsed: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        inner.emit_error(GatewayError::TransportFailed(format!("malformed openOrders response: {e}")));
                        return Vec::new();
                    }
                };
                parsed
                    .as_array()
                    .map(|rows| {
                        rows.iter()
                            .filter(|row| {
                                filter.symbol.is_none()
                                    || row.get("coin").and_then(|v| v.as_str()) == filter.symbol
                            })
                            .filter_map(|row| {
                                let oid = row.get("oid")?.to_string();
                                let client_id = inner.client_id_for_oid(&oid).unwrap_or(oid.clone());
                                Some(OrderResponse::accepted(client_id, oid))
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            }
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
        "hyperliquid"
    }
}

/// Small helpers kept private to this module: cloning an error for both a
/// caller-facing `OrderResponse` and an adapter-error callback, and
/// tagging a response with the symbol it was resolved against (useful only
/// for call-site readability in `cancel_order`).
trait ErrorCloneExt {
    fn clone_for_response(&self) -> GatewayError;
}

impl ErrorCloneExt for GatewayError {
    fn clone_for_response(&self) -> GatewayError {
        GatewayError::VenueRejected(self.to_string())
    }
}

trait TapSymbolExt {
    fn tap_symbol(self, symbol: &str) -> Self;
}

impl TapSymbolExt for OrderResponse {
    fn tap_symbol(mut self, symbol: &str) -> Self {
        self.extra.insert("symbol".to_string(), Value::String(symbol.to_string()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloid_shape_is_validated() {
        assert!(is_cloid_shaped("0x0123456789abcdef0123456789abcdef"));
        assert!(!is_cloid_shaped("0x0123")); // too short
        assert!(!is_cloid_shaped("0x0123456789ABCDEF0123456789abcdef")); // uppercase
        assert!(!is_cloid_shaped("not-a-cloid"));
    }

    #[test]
    fn generated_cloid_matches_wire_shape() {
        for _ in 0..20 {
            let cloid = generate_cloid();
            assert!(is_cloid_shaped(&cloid), "{cloid} is not cloid-shaped");
        }
    }

    #[test]
    fn tif_maps_fok_onto_ioc() {
        assert_eq!(tif_wire(Some(TimeInForce::FOK)), "Ioc");
        assert_eq!(tif_wire(Some(TimeInForce::IOC)), "Ioc");
        assert_eq!(tif_wire(Some(TimeInForce::GTC)), "Gtc");
        assert_eq!(tif_wire(Some(TimeInForce::PostOnly)), "Alo");
        assert_eq!(tif_wire(None), "Gtc");
    }

    #[test]
    fn perp_coin_strips_quote_and_decoration() {
        assert_eq!(perp_coin("ETHUSDT"), "ETH");
        assert_eq!(perp_coin("BTC-USD-PERP"), "BTC");
    }

    #[test]
    fn spot_base_quote_splits_on_hyphen_form() {
        assert_eq!(spot_base_quote("ETH/USDC"), ("ETH".to_string(), "USDC".to_string()));
    }

    #[test]
    fn ws_status_normalization_matches_table() {
        assert_eq!(normalize_ws_status("open"), "new");
        assert_eq!(normalize_ws_status("filled"), "filled");
        assert_eq!(normalize_ws_status("canceled"), "canceled");
        assert_eq!(normalize_ws_status("marginCanceled"), "canceled");
        assert_eq!(normalize_ws_status("scheduledCancel"), "canceled");
        assert_eq!(normalize_ws_status("triggered"), "accepted");
        assert_eq!(normalize_ws_status("rejected"), "rejected");
        assert_eq!(normalize_ws_status("somethingRejected"), "rejected");
    }

    #[test]
    fn tpsl_kind_recognizes_takeprofit_variants() {
        let mut req = sample_req();
        req.extra.insert("orderFilter".to_string(), json!("TakeProfit"));
        assert_eq!(tpsl_kind(&req), "tp");
        req.extra.insert("orderFilter".to_string(), json!("StopLoss"));
        assert_eq!(tpsl_kind(&req), "sl");
    }

    #[test]
    fn order_schema_field_order_is_a_b_p_s_r_t_c() {
        let adapter = HyperliquidAdapter::new(None, test_hl_config());
        let asset = AssetInfo { asset_id: 1, size_decimals: Some(4) };
        let req = sample_req();
        let item = adapter.inner.build_order_item(&asset, &req, "0x00000000000000000000000000000000").unwrap();
        let keys: Vec<&String> = item.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["a", "b", "p", "s", "r", "t", "c"]);
    }

    #[test]
    fn stop_limit_with_explicit_price_is_sent_verbatim_not_slipped() {
        let adapter = HyperliquidAdapter::new(None, test_hl_config());
        let asset = AssetInfo { asset_id: 1, size_decimals: Some(4) };
        let mut req = sample_req();
        req.order_type = OrderType::StopLimit;
        req.price = Some(rust_decimal_macros::dec!(2490));
        req.extra.insert("triggerPrice".to_string(), json!("2500.0"));

        let item = adapter.inner.build_order_item(&asset, &req, "0x00000000000000000000000000000000").unwrap();
        let obj = item.as_object().unwrap();
        assert_eq!(obj["p"], json!("2490"));
        assert_eq!(obj["t"]["trigger"]["isMarket"], json!(false));
    }

    #[test]
    fn stop_market_with_no_price_synthesizes_from_last_fill() {
        let adapter = HyperliquidAdapter::new(None, test_hl_config());
        let asset = AssetInfo { asset_id: 1, size_decimals: Some(4) };
        let mut req = sample_req();
        req.order_type = OrderType::Stop;
        req.price = None;
        req.extra.insert("triggerPrice".to_string(), json!("2500.0"));
        adapter.inner.last_fill_price.lock().insert(req.symbol.clone(), rust_decimal_macros::dec!(2600));

        let item = adapter.inner.build_order_item(&asset, &req, "0x00000000000000000000000000000000").unwrap();
        let obj = item.as_object().unwrap();
        assert_eq!(obj["t"]["trigger"]["isMarket"], json!(true));
        // buy-side slippage applies to the last fill, not the trigger price.
        assert_eq!(obj["p"], json!("2602.6"));
    }

    #[test]
    fn best_effort_limit_price_prefers_explicit_request_price_over_cached_last_fill() {
        let adapter = HyperliquidAdapter::new(None, test_hl_config());
        let asset = AssetInfo { asset_id: 1, size_decimals: Some(4) };
        let mut req = sample_req();
        req.price = Some(rust_decimal_macros::dec!(3000));
        adapter.inner.last_fill_price.lock().insert(req.symbol.clone(), rust_decimal_macros::dec!(1));

        let price = adapter.inner.best_effort_limit_price(&req, rust_decimal_macros::dec!(1), &asset).unwrap();
        // Buy-side slippage is applied on top of the explicit price, never on the stale cached fill.
        assert_eq!(price, rust_decimal_macros::dec!(3003));
    }

    #[test]
    fn bypasses_batching_covers_market_fok_and_trigger() {
        let mut req = sample_req();
        req.order_type = OrderType::Market;
        assert!(HyperliquidAdapter::bypasses_batching(&req));

        let mut req = sample_req();
        req.time_in_force = Some(TimeInForce::FOK);
        assert!(HyperliquidAdapter::bypasses_batching(&req));

        let mut req = sample_req();
        req.extra.insert("triggerPrice".to_string(), json!("2600.0"));
        assert!(HyperliquidAdapter::bypasses_batching(&req));

        let req = sample_req();
        assert!(!HyperliquidAdapter::bypasses_batching(&req));
    }

    #[test]
    fn cloid_ensure_is_idempotent_and_reuses_client_supplied_shape() {
        let adapter = HyperliquidAdapter::new(None, test_hl_config());
        let supplied = "0x0123456789abcdef0123456789abcdef";
        let first = adapter.inner.ensure_cloid(supplied);
        assert_eq!(first, supplied);
        let second = adapter.inner.ensure_cloid(supplied);
        assert_eq!(first, second);

        let generated_first = adapter.inner.ensure_cloid("plain-client-id");
        assert!(is_cloid_shaped(&generated_first));
        let generated_second = adapter.inner.ensure_cloid("plain-client-id");
        assert_eq!(generated_first, generated_second);
    }

    #[test]
    fn fill_dedupe_drops_repeated_tid_across_streams() {
        let adapter = HyperliquidAdapter::new(None, test_hl_config());
        adapter.inner.cloid_tables.lock().oid_to_client.insert("55".to_string(), "A1".to_string());
        let row = json!({
            "coin": "ETH", "side": "B", "px": "2500.0", "sz": "0.1",
            "time": 1_000, "oid": 55, "tid": 999, "crossed": true,
        });
        adapter.inner.handle_fill_row(&row, 0);
        assert_eq!(adapter.inner.fill_dedupe.lock().len(), 1);
        adapter.inner.handle_fill_row(&row, 0);
        assert_eq!(adapter.inner.fill_dedupe.lock().len(), 1, "duplicate tid must not double-insert");
    }

    #[test]
    fn backoff_blocks_submission_until_it_expires() {
        let adapter = HyperliquidAdapter::new(None, test_hl_config());
        assert!(!adapter.inner.in_backoff());
        adapter.inner.backoff_until_ms.store(now_ms() + 50, Ordering::Release);
        assert!(adapter.inner.in_backoff());
        std::thread::sleep(Duration::from_millis(60));
        assert!(!adapter.inner.in_backoff());
    }

    fn test_hl_config() -> HyperliquidConfig {
        HyperliquidConfig {
            disable_ws_post: true,
            disable_private_ws: true,
            ws_post_timeout: Duration::from_millis(100),
            enable_batching: false,
            batch_cadence: Duration::from_millis(100),
            on_429_backoff: Duration::from_millis(200),
            reserve_weight_on_429: false,
            reserve_weight_amount: 0,
            reserve_weight_limit: 0,
            ioc_market_slippage_bps: 10,
            signer_python: String::new(),
            signer_script: String::new(),
        }
    }

    fn sample_req() -> NormalizedOrderRequest {
        NormalizedOrderRequest {
            client_id: "A1".to_string(),
            symbol: "ETH-USDC".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: rust_decimal_macros::dec!(0.1),
            price: Some(rust_decimal_macros::dec!(2500)),
            time_in_force: Some(TimeInForce::GTC),
            category: None,
            reduce_only: false,
            extra: HashMap::new(),
        }
    }
}
