//! Order lifecycle data model shared by the tracker, the ingress/egress
//! plane, and every venue adapter.
//!
//! All prices and sizes are `rust_decimal::Decimal` end to end: venue wire
//! formats carry decimal strings, and a float round-trip would silently
//! violate the tick-size and significant-figure invariants enforced by
//! `crate::core::numeric`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Order type, as requested by the strategy (pre-normalization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopLimit,
}

/// Time-in-force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    GTC,
    IOC,
    FOK,
    #[serde(rename = "POST_ONLY")]
    PostOnly,
}

/// Action requested by an order intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentAction {
    Place,
    Cancel,
    Replace,
}

/// Venue category, as carried on the intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueCategory {
    Cex,
    Dex,
    Chain,
}

/// Product type, as carried on the intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Spot,
    Perpetual,
    AmmSwap,
    ClmmSwap,
    Transfer,
}

/// Position action a fill contributes to (DEX bracket orders carry this).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionAction {
    None,
    Open,
    Close,
}

/// Liquidity role of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liquidity {
    Maker,
    Taker,
}

/// In-flight order state. Terminal states are sinks: `OrderTracker` refuses
/// any transition out of `Filled | Canceled | Failed | Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    PendingCreate,
    PendingSubmit,
    Open,
    PartiallyFilled,
    Filled,
    PendingCancel,
    Canceled,
    Failed,
    Expired,
}

impl OrderState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Canceled | OrderState::Failed | OrderState::Expired
        )
    }

    /// `is_fillable ⇔ state ∈ {open, partially_filled}` (§3 invariant e).
    pub fn is_fillable(self) -> bool {
        matches!(self, OrderState::Open | OrderState::PartiallyFilled)
    }

    /// Lower-case wire representation, shared by order-update events.
    pub fn as_wire_str(self) -> &'static str {
        match self {
            OrderState::PendingCreate => "pending_create",
            OrderState::PendingSubmit => "pending_submit",
            OrderState::Open => "new",
            OrderState::PartiallyFilled => "partiallyfilled",
            OrderState::Filled => "filled",
            OrderState::PendingCancel => "pending_cancel",
            OrderState::Canceled => "canceled",
            OrderState::Failed => "rejected",
            OrderState::Expired => "expired",
        }
    }

    /// Parse a venue-normalized status string back into a state, where
    /// applicable. Adapters map their own vocabularies to these wire
    /// strings before calling into the tracker.
    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "pending_create" => Some(OrderState::PendingCreate),
            "pending_submit" => Some(OrderState::PendingSubmit),
            "new" | "accepted" => Some(OrderState::Open),
            "partiallyfilled" => Some(OrderState::PartiallyFilled),
            "filled" => Some(OrderState::Filled),
            "pending_cancel" => Some(OrderState::PendingCancel),
            "canceled" | "cancelled" => Some(OrderState::Canceled),
            "rejected" | "failed" => Some(OrderState::Failed),
            "expired" => Some(OrderState::Expired),
            _ => None,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Order intent as received on the ingress bus (§3 "Order intent").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub version: u32,
    pub client_id: String,
    pub action: IntentAction,
    pub venue_category: VenueCategory,
    pub venue: String,
    pub product_type: ProductType,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    #[serde(default = "now_ms")]
    pub ts_ns: u64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl OrderIntent {
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(|v| v.as_str())
    }
}

/// Normalized order request, the adapter's single input shape for both
/// `place` and `replace` (§3 "Normalized order request").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedOrderRequest {
    pub client_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub category: Option<String>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl NormalizedOrderRequest {
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }

    pub fn extra_decimal(&self, key: &str) -> Option<Decimal> {
        self.extra
            .get(key)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Decimal>().ok())
    }

    /// The ingress parser's `place`/`replace` normalization step (§4.12):
    /// pulls the typed fields out of an intent's free-form `details` map
    /// and carries everything else through as `extra` so adapters can
    /// still reach venue-specific keys (`triggerPrice`, `orderFilter`,
    /// `parent_client_id`, replace overrides) via `extra_str`/
    /// `extra_decimal`.
    pub fn try_from_intent(intent: &OrderIntent) -> Result<Self, crate::core::errors::GatewayError> {
        use crate::core::errors::GatewayError;

        let require_str = |key: &str| -> Result<&str, GatewayError> {
            intent
                .detail_str(key)
                .ok_or_else(|| GatewayError::InvalidParams(format!("missing required field '{key}'")))
        };

        let symbol = require_str("symbol")?.to_string();

        let side = match require_str("side")?.to_lowercase().as_str() {
            "buy" => Side::Buy,
            "sell" => Side::Sell,
            other => return Err(GatewayError::InvalidParams(format!("unknown side '{other}'"))),
        };

        let order_type = match require_str("order_type")?.to_lowercase().as_str() {
            "limit" => OrderType::Limit,
            "market" => OrderType::Market,
            "stop" => OrderType::Stop,
            "stop_limit" => OrderType::StopLimit,
            other => return Err(GatewayError::InvalidParams(format!("unknown order_type '{other}'"))),
        };

        let quantity: Decimal = require_str("quantity")?
            .parse()
            .map_err(|_| GatewayError::InvalidParams("quantity is not a valid decimal".to_string()))?;

        let price = match intent.detail_str("price") {
            Some(s) => Some(
                s.parse::<Decimal>()
                    .map_err(|_| GatewayError::InvalidParams("price is not a valid decimal".to_string()))?,
            ),
            None => None,
        };

        let time_in_force = match intent.detail_str("time_in_force") {
            Some(s) => Some(match s.to_uppercase().as_str() {
                "GTC" => TimeInForce::GTC,
                "IOC" => TimeInForce::IOC,
                "FOK" => TimeInForce::FOK,
                "POST_ONLY" | "ALO" => TimeInForce::PostOnly,
                other => return Err(GatewayError::InvalidParams(format!("unknown time_in_force '{other}'"))),
            }),
            None => None,
        };

        let category = intent.detail_str("category").map(|s| s.to_string());
        let reduce_only = intent
            .details
            .get("reduce_only")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let mut extra = intent.details.clone();
        for consumed in [
            "symbol",
            "side",
            "order_type",
            "quantity",
            "price",
            "time_in_force",
            "category",
            "reduce_only",
        ] {
            extra.remove(consumed);
        }

        Ok(Self {
            client_id: intent.client_id.clone(),
            symbol,
            side,
            order_type,
            quantity,
            price,
            time_in_force,
            category,
            reduce_only,
            extra,
        })
    }
}

/// Adapter response to `place`/`cancel`/`modify`/`query` (§3 "Order
/// response").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub success: bool,
    pub message: String,
    pub exchange_order_id: Option<String>,
    pub client_id: String,
    pub status: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl OrderResponse {
    pub fn accepted(client_id: impl Into<String>, exchange_order_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message: "accepted".to_string(),
            exchange_order_id: Some(exchange_order_id.into()),
            client_id: client_id.into(),
            status: Some("accepted".to_string()),
            extra: HashMap::new(),
        }
    }

    pub fn rejected(client_id: impl Into<String>, reason_code: &str, message: impl Into<String>) -> Self {
        let mut extra = HashMap::new();
        extra.insert(
            "reason_code".to_string(),
            serde_json::Value::String(reason_code.to_string()),
        );
        Self {
            success: false,
            message: message.into(),
            exchange_order_id: None,
            client_id: client_id.into(),
            status: Some("rejected".to_string()),
            extra,
        }
    }

    pub fn from_error(client_id: impl Into<String>, err: &crate::core::errors::GatewayError) -> Self {
        Self::rejected(client_id, err.reason_code(), err.to_string())
    }
}

/// Order update event, as republished on the egress bus (§3 "Order update
/// event").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub version: u32,
    pub client_id: String,
    pub exchange_id: Option<String>,
    pub status: String,
    pub reason: Option<String>,
    pub ts_ms: u64,
    pub fill: Option<FillEvent>,
}

impl OrderUpdate {
    pub fn new(client_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            version: 1,
            client_id: client_id.into(),
            exchange_id: None,
            status: status.into(),
            reason: None,
            ts_ms: now_ms(),
            fill: None,
        }
    }
}

/// Fill event, as republished on the egress bus (§3 "Fill event").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub version: u32,
    pub client_id: String,
    pub exchange_id: String,
    pub exec_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Option<Decimal>,
    pub fee_currency: Option<String>,
    pub liquidity: Liquidity,
    pub ts_ms: u64,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// In-flight order, the tracker's per-client-id record (§3 "In-flight
/// order" + invariants a-f).
#[derive(Debug, Clone)]
pub struct InFlightOrder {
    pub client_id: String,
    pub exchange_id: Option<String>,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    pub position_action: PositionAction,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub leverage: Option<Decimal>,
    pub state: OrderState,
    pub filled_amount: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub fills: Vec<FillEvent>,
    pub created_at_ms: u64,
    pub last_update_ms: u64,
    pub cloid: Option<String>,
    pub good_til_block: Option<u64>,
    pub good_til_block_time: Option<u64>,
    pub numeric_client_id: Option<u64>,
    /// Consecutive `process_order_not_found` misses (§4.11).
    pub not_found_misses: u32,
}

/// Tolerance used when comparing `filled_amount` against `amount` (§3
/// invariant c, §4.11 VWAP terminal check).
pub const FILL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 8);

impl InFlightOrder {
    pub fn new(req: &NormalizedOrderRequest, order_type: OrderType) -> Self {
        let now = now_ms();
        Self {
            client_id: req.client_id.clone(),
            exchange_id: None,
            symbol: req.symbol.clone(),
            order_type,
            side: req.side,
            position_action: PositionAction::None,
            price: req.price,
            amount: req.quantity,
            leverage: None,
            state: OrderState::PendingCreate,
            filled_amount: Decimal::ZERO,
            avg_fill_price: None,
            fills: Vec::new(),
            created_at_ms: now,
            last_update_ms: now,
            cloid: None,
            good_til_block: None,
            good_til_block_time: None,
            numeric_client_id: None,
            not_found_misses: 0,
        }
    }

    pub fn is_fillable(&self) -> bool {
        self.state.is_fillable()
    }

    pub fn remaining(&self) -> Decimal {
        (self.amount - self.filled_amount).max(Decimal::ZERO)
    }

    /// Recompute VWAP over all recorded fills: `sum(qty*px) / sum(qty)`.
    pub fn recompute_vwap(&mut self) {
        let mut qty_sum = Decimal::ZERO;
        let mut notional_sum = Decimal::ZERO;
        for f in &self.fills {
            qty_sum += f.quantity;
            notional_sum += f.quantity * f.price;
        }
        self.avg_fill_price = if qty_sum > Decimal::ZERO {
            Some(notional_sum / qty_sum)
        } else {
            None
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_req() -> NormalizedOrderRequest {
        NormalizedOrderRequest {
            client_id: "A1".to_string(),
            symbol: "ETHUSDT".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: dec!(0.1),
            price: Some(dec!(2500)),
            time_in_force: None,
            category: None,
            reduce_only: false,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn terminal_states_are_sinks() {
        assert!(OrderState::Filled.is_terminal());
        assert!(OrderState::Canceled.is_terminal());
        assert!(OrderState::Failed.is_terminal());
        assert!(OrderState::Expired.is_terminal());
        assert!(!OrderState::Open.is_terminal());
        assert!(!OrderState::PartiallyFilled.is_terminal());
    }

    #[test]
    fn fillable_iff_open_or_partial() {
        assert!(OrderState::Open.is_fillable());
        assert!(OrderState::PartiallyFilled.is_fillable());
        assert!(!OrderState::PendingCreate.is_fillable());
        assert!(!OrderState::Filled.is_fillable());
    }

    #[test]
    fn vwap_recomputes_over_fills() {
        let req = sample_req();
        let mut order = InFlightOrder::new(&req, OrderType::Limit);
        order.fills.push(FillEvent {
            version: 1,
            client_id: "A1".into(),
            exchange_id: "E1".into(),
            exec_id: "X1".into(),
            symbol: "ETHUSDT".into(),
            side: Side::Buy,
            price: dec!(2500),
            quantity: dec!(0.05),
            fee: None,
            fee_currency: None,
            liquidity: Liquidity::Maker,
            ts_ms: 0,
            extra: HashMap::new(),
        });
        order.fills.push(FillEvent {
            version: 1,
            client_id: "A1".into(),
            exchange_id: "E1".into(),
            exec_id: "X2".into(),
            symbol: "ETHUSDT".into(),
            side: Side::Buy,
            price: dec!(2510),
            quantity: dec!(0.05),
            fee: None,
            fee_currency: None,
            liquidity: Liquidity::Taker,
            ts_ms: 0,
            extra: HashMap::new(),
        });
        order.recompute_vwap();
        assert_eq!(order.avg_fill_price, Some(dec!(2505)));
    }

    fn sample_intent(details: HashMap<String, serde_json::Value>) -> OrderIntent {
        OrderIntent {
            version: 1,
            client_id: "A1".to_string(),
            action: IntentAction::Place,
            venue_category: VenueCategory::Cex,
            venue: "bybit".to_string(),
            product_type: ProductType::Spot,
            details,
            ts_ns: 0,
            tags: HashMap::new(),
        }
    }

    #[test]
    fn try_from_intent_builds_a_normalized_request() {
        let mut details = HashMap::new();
        details.insert("symbol".to_string(), serde_json::json!("ETHUSDT"));
        details.insert("side".to_string(), serde_json::json!("buy"));
        details.insert("order_type".to_string(), serde_json::json!("limit"));
        details.insert("quantity".to_string(), serde_json::json!("0.1"));
        details.insert("price".to_string(), serde_json::json!("2500.00"));
        details.insert("time_in_force".to_string(), serde_json::json!("GTC"));

        let req = NormalizedOrderRequest::try_from_intent(&sample_intent(details)).unwrap();
        assert_eq!(req.client_id, "A1");
        assert_eq!(req.symbol, "ETHUSDT");
        assert_eq!(req.side, Side::Buy);
        assert_eq!(req.order_type, OrderType::Limit);
        assert_eq!(req.quantity, dec!(0.1));
        assert_eq!(req.price, Some(dec!(2500.00)));
        assert_eq!(req.time_in_force, Some(TimeInForce::GTC));
    }

    #[test]
    fn try_from_intent_carries_unrecognized_keys_into_extra() {
        let mut details = HashMap::new();
        details.insert("symbol".to_string(), serde_json::json!("BTC-USD-PERP"));
        details.insert("side".to_string(), serde_json::json!("sell"));
        details.insert("order_type".to_string(), serde_json::json!("stop"));
        details.insert("quantity".to_string(), serde_json::json!("0.01"));
        details.insert("triggerPrice".to_string(), serde_json::json!("49000.0"));
        details.insert("orderFilter".to_string(), serde_json::json!("StopLoss"));

        let req = NormalizedOrderRequest::try_from_intent(&sample_intent(details)).unwrap();
        assert_eq!(req.extra_decimal("triggerPrice"), Some(dec!(49000.0)));
        assert_eq!(req.extra_str("orderFilter"), Some("StopLoss"));
        assert!(req.extra.get("symbol").is_none());
    }

    #[test]
    fn try_from_intent_rejects_missing_required_field() {
        let mut details = HashMap::new();
        details.insert("side".to_string(), serde_json::json!("buy"));
        details.insert("order_type".to_string(), serde_json::json!("limit"));
        details.insert("quantity".to_string(), serde_json::json!("0.1"));
        // "symbol" is missing.
        let err = NormalizedOrderRequest::try_from_intent(&sample_intent(details)).unwrap_err();
        assert!(matches!(err, crate::core::errors::GatewayError::InvalidParams(_)));
    }

    #[test]
    fn try_from_intent_rejects_unparseable_quantity() {
        let mut details = HashMap::new();
        details.insert("symbol".to_string(), serde_json::json!("ETHUSDT"));
        details.insert("side".to_string(), serde_json::json!("buy"));
        details.insert("order_type".to_string(), serde_json::json!("limit"));
        details.insert("quantity".to_string(), serde_json::json!("not-a-number"));
        let err = NormalizedOrderRequest::try_from_intent(&sample_intent(details)).unwrap_err();
        assert!(matches!(err, crate::core::errors::GatewayError::InvalidParams(_)));
    }

    #[test]
    fn wire_str_round_trips_through_from_wire_str() {
        for s in [
            OrderState::Open,
            OrderState::PartiallyFilled,
            OrderState::Filled,
            OrderState::Canceled,
            OrderState::Expired,
        ] {
            let wire = s.as_wire_str();
            assert_eq!(OrderState::from_wire_str(wire), Some(s));
        }
    }
}
