//! Order-state tracker (C11): the single source of truth for every
//! in-flight order, regardless of venue.
//!
//! Adapters never hold order state themselves beyond what they need to
//! talk to the venue (the Bybit `order_cache`, the Hyperliquid cloid
//! tables); everything the rest of the process cares about — current
//! state, fill history, VWAP — lives here behind one `RwLock`. Reads
//! (tracker-status queries, `list_open_orders` backing data) take the
//! read lock; every write funnels through `core::order_fsm::is_valid_
//! transition` so an illegal transition is dropped rather than corrupting
//! the map.

use crate::core::order_fsm::is_valid_transition;
use crate::core::types::{FillEvent, InFlightOrder, NormalizedOrderRequest, OrderState, OrderType, FILL_TOLERANCE};
use crate::monitoring::metrics::MetricsRegistry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Consecutive `process_order_not_found` misses before an order is
/// force-canceled locally (§4.11).
const NOT_FOUND_MISS_LIMIT: u32 = 3;

pub type OrderUpdateCallback = Box<dyn Fn(&InFlightOrder) + Send + Sync>;
pub type FillCallback = Box<dyn Fn(&InFlightOrder, &FillEvent) + Send + Sync>;
pub type CompletedCallback = Box<dyn Fn(&InFlightOrder) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    order_update: Option<OrderUpdateCallback>,
    order_filled: Option<FillCallback>,
    order_completed: Option<CompletedCallback>,
}

/// Tracks every order this process has placed, keyed by client id, with a
/// secondary index by exchange id for venue callbacks that only carry
/// that.
pub struct OrderTracker {
    orders: RwLock<HashMap<String, InFlightOrder>>,
    by_exchange_id: RwLock<HashMap<String, String>>,
    callbacks: RwLock<Callbacks>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Default for OrderTracker {
    fn default() -> Self {
        Self::new(None)
    }
}

impl OrderTracker {
    pub fn new(metrics: Option<Arc<MetricsRegistry>>) -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            by_exchange_id: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(Callbacks::default()),
            metrics,
        }
    }

    pub fn set_order_update_callback(&self, callback: OrderUpdateCallback) {
        self.callbacks.write().order_update = Some(callback);
    }

    pub fn set_fill_callback(&self, callback: FillCallback) {
        self.callbacks.write().order_filled = Some(callback);
    }

    pub fn set_completed_callback(&self, callback: CompletedCallback) {
        self.callbacks.write().order_completed = Some(callback);
    }

    /// Register a brand-new order (pre-submit), the first record created
    /// for a client id.
    pub fn start_tracking(&self, req: &NormalizedOrderRequest, order_type: OrderType) {
        let order = InFlightOrder::new(req, order_type);
        self.orders.write().insert(req.client_id.clone(), order);
        if let Some(m) = &self.metrics {
            m.orders().in_flight_gauge.set(self.orders.read().len() as i64);
        }
    }

    /// Apply a state transition sourced from a venue order-update event.
    /// Illegal transitions (terminal re-entry, nonsensical edges) are
    /// logged and dropped rather than applied.
    pub fn process_order_update(
        &self,
        client_id: &str,
        new_state: OrderState,
        exchange_id: Option<&str>,
    ) {
        let mut completed_snapshot = None;
        {
            let mut orders = self.orders.write();
            let Some(order) = orders.get_mut(client_id) else {
                warn!(client_id, "order update for unknown client id, dropping");
                return;
            };

            if !is_valid_transition(order.state, new_state) {
                warn!(
                    client_id,
                    from = ?order.state,
                    to = ?new_state,
                    "rejecting illegal order state transition"
                );
                return;
            }

            order.state = new_state;
            order.last_update_ms = now_ms();
            if let Some(exchange_id) = exchange_id {
                if order.exchange_id.as_deref() != Some(exchange_id) {
                    order.exchange_id = Some(exchange_id.to_string());
                    self.by_exchange_id
                        .write()
                        .insert(exchange_id.to_string(), client_id.to_string());
                }
            }

            if new_state.is_terminal() {
                completed_snapshot = Some(order.clone());
            }

            let callbacks = self.callbacks.read();
            if let Some(cb) = &callbacks.order_update {
                cb(order);
            }
        }

        if let Some(order) = completed_snapshot {
            if let Some(m) = &self.metrics {
                m.orders().in_flight_gauge.set(self.orders.read().len() as i64);
            }
            let callbacks = self.callbacks.read();
            if let Some(cb) = &callbacks.order_completed {
                cb(&order);
            }
        }
    }

    /// Apply a fill: append to history, recompute VWAP, transition state
    /// if the cumulative fill now meets or exceeds the order's amount
    /// within `FILL_TOLERANCE`.
    pub fn process_trade_update(&self, client_id: &str, fill: FillEvent) {
        let mut completed_snapshot = None;
        let mut fill_snapshot = None;
        {
            let mut orders = self.orders.write();
            let Some(order) = orders.get_mut(client_id) else {
                warn!(client_id, "fill for unknown client id, dropping");
                return;
            };

            if order.state.is_terminal() {
                debug!(client_id, state = ?order.state, "fill arrived for an order already in a terminal state, dropping");
                return;
            }

            order.filled_amount += fill.quantity;
            order.fills.push(fill.clone());
            order.recompute_vwap();
            order.last_update_ms = now_ms();

            let next_state = if order.remaining() <= FILL_TOLERANCE {
                OrderState::Filled
            } else {
                OrderState::PartiallyFilled
            };
            if is_valid_transition(order.state, next_state) {
                order.state = next_state;
            }

            fill_snapshot = Some((order.clone(), fill));
            if order.state.is_terminal() {
                completed_snapshot = Some(order.clone());
            }
        }

        if let Some((order, fill)) = fill_snapshot {
            let callbacks = self.callbacks.read();
            if let Some(cb) = &callbacks.order_filled {
                cb(&order, &fill);
            }
        }
        if let Some(order) = completed_snapshot {
            if let Some(m) = &self.metrics {
                m.orders().in_flight_gauge.set(self.orders.read().len() as i64);
            }
            let callbacks = self.callbacks.read();
            if let Some(cb) = &callbacks.order_completed {
                cb(&order);
            }
        }
    }

    /// A venue query reported that an order does not exist. After
    /// `NOT_FOUND_MISS_LIMIT` consecutive misses, force-cancel it locally
    /// rather than leave it stuck open forever (§4.11).
    pub fn process_order_not_found(&self, client_id: &str) {
        let mut force_cancel = false;
        {
            let mut orders = self.orders.write();
            let Some(order) = orders.get_mut(client_id) else {
                return;
            };
            if order.state.is_terminal() {
                return;
            }
            order.not_found_misses += 1;
            if order.not_found_misses >= NOT_FOUND_MISS_LIMIT {
                if is_valid_transition(order.state, OrderState::Canceled) {
                    order.state = OrderState::Canceled;
                    order.last_update_ms = now_ms();
                    force_cancel = true;
                }
            }
        }
        if force_cancel {
            warn!(client_id, "force-canceling order after repeated not-found responses");
            if let Some(m) = &self.metrics {
                m.orders().forced_cancel_total.inc();
                m.orders().in_flight_gauge.set(self.orders.read().len() as i64);
            }
            let snapshot = self.get_order(client_id);
            let callbacks = self.callbacks.read();
            if let (Some(cb), Some(order)) = (&callbacks.order_completed, &snapshot) {
                cb(order);
            }
        }
    }

    pub fn get_order(&self, client_id: &str) -> Option<InFlightOrder> {
        self.orders.read().get(client_id).cloned()
    }

    pub fn get_order_by_exchange_id(&self, exchange_id: &str) -> Option<InFlightOrder> {
        let client_id = self.by_exchange_id.read().get(exchange_id).cloned()?;
        self.get_order(&client_id)
    }

    pub fn all_fillable_orders(&self) -> Vec<InFlightOrder> {
        self.orders
            .read()
            .values()
            .filter(|o| o.is_fillable())
            .cloned()
            .collect()
    }

    pub fn all_fillable_orders_by_exchange_id(&self) -> HashMap<String, InFlightOrder> {
        self.orders
            .read()
            .values()
            .filter(|o| o.is_fillable())
            .filter_map(|o| o.exchange_id.clone().map(|id| (id, o.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Liquidity, NormalizedOrderRequest, Side, TimeInForce};
    use rust_decimal_macros::dec;
    use std::collections::HashMap as Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn req(client_id: &str, qty: rust_decimal::Decimal) -> NormalizedOrderRequest {
        NormalizedOrderRequest {
            client_id: client_id.to_string(),
            symbol: "ETHUSDT".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: qty,
            price: Some(dec!(2500)),
            time_in_force: Some(TimeInForce::GTC),
            category: None,
            reduce_only: false,
            extra: Map::new(),
        }
    }

    fn fill(client_id: &str, qty: rust_decimal::Decimal) -> FillEvent {
        FillEvent {
            version: 1,
            client_id: client_id.to_string(),
            exchange_id: "EX1".to_string(),
            exec_id: "X1".to_string(),
            symbol: "ETHUSDT".to_string(),
            side: Side::Buy,
            price: dec!(2500),
            quantity: qty,
            fee: None,
            fee_currency: None,
            liquidity: Liquidity::Taker,
            ts_ms: 0,
            extra: Map::new(),
        }
    }

    #[test]
    fn start_tracking_then_lookup_round_trips() {
        let tracker = OrderTracker::default();
        tracker.start_tracking(&req("A1", dec!(1)), OrderType::Limit);
        let order = tracker.get_order("A1").unwrap();
        assert_eq!(order.state, OrderState::PendingCreate);
        assert_eq!(order.amount, dec!(1));
    }

    #[test]
    fn order_update_rejects_illegal_transition() {
        let tracker = OrderTracker::default();
        tracker.start_tracking(&req("A1", dec!(1)), OrderType::Limit);
        tracker.process_order_update("A1", OrderState::Filled, Some("EX1"));
        // PendingCreate -> Filled is not a legal edge; order stays put.
        let order = tracker.get_order("A1").unwrap();
        assert_eq!(order.state, OrderState::PendingCreate);
    }

    #[test]
    fn order_update_applies_legal_transition_and_indexes_exchange_id() {
        let tracker = OrderTracker::default();
        tracker.start_tracking(&req("A1", dec!(1)), OrderType::Limit);
        tracker.process_order_update("A1", OrderState::Open, Some("EX1"));
        let order = tracker.get_order("A1").unwrap();
        assert_eq!(order.state, OrderState::Open);
        assert_eq!(tracker.get_order_by_exchange_id("EX1").unwrap().client_id, "A1");
    }

    #[test]
    fn fill_reaching_full_amount_transitions_to_filled() {
        let tracker = OrderTracker::default();
        tracker.start_tracking(&req("A1", dec!(1)), OrderType::Limit);
        tracker.process_order_update("A1", OrderState::Open, Some("EX1"));
        tracker.process_trade_update("A1", fill("A1", dec!(1)));
        let order = tracker.get_order("A1").unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.avg_fill_price, Some(dec!(2500)));
    }

    #[test]
    fn partial_fill_transitions_to_partially_filled() {
        let tracker = OrderTracker::default();
        tracker.start_tracking(&req("A1", dec!(1)), OrderType::Limit);
        tracker.process_order_update("A1", OrderState::Open, Some("EX1"));
        tracker.process_trade_update("A1", fill("A1", dec!(0.4)));
        let order = tracker.get_order("A1").unwrap();
        assert_eq!(order.state, OrderState::PartiallyFilled);
    }

    #[test]
    fn fillable_orders_excludes_terminal_and_pending() {
        let tracker = OrderTracker::default();
        tracker.start_tracking(&req("A1", dec!(1)), OrderType::Limit);
        tracker.start_tracking(&req("A2", dec!(1)), OrderType::Limit);
        tracker.process_order_update("A1", OrderState::Open, Some("EX1"));
        // A2 stays PendingCreate.
        let fillable = tracker.all_fillable_orders();
        assert_eq!(fillable.len(), 1);
        assert_eq!(fillable[0].client_id, "A1");
    }

    #[test]
    fn three_consecutive_not_found_misses_force_cancel() {
        let tracker = OrderTracker::default();
        tracker.start_tracking(&req("A1", dec!(1)), OrderType::Limit);
        tracker.process_order_update("A1", OrderState::Open, Some("EX1"));
        tracker.process_order_not_found("A1");
        tracker.process_order_not_found("A1");
        assert_eq!(tracker.get_order("A1").unwrap().state, OrderState::Open);
        tracker.process_order_not_found("A1");
        assert_eq!(tracker.get_order("A1").unwrap().state, OrderState::Canceled);
    }

    #[test]
    fn not_found_on_terminal_order_is_a_no_op() {
        let tracker = OrderTracker::default();
        tracker.start_tracking(&req("A1", dec!(1)), OrderType::Limit);
        tracker.process_order_update("A1", OrderState::Failed, None);
        tracker.process_order_not_found("A1");
        tracker.process_order_not_found("A1");
        tracker.process_order_not_found("A1");
        assert_eq!(tracker.get_order("A1").unwrap().state, OrderState::Failed);
    }

    #[test]
    fn completed_callback_fires_exactly_once_on_terminal_entry() {
        let tracker = OrderTracker::default();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        tracker.set_completed_callback(Box::new(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        }));
        tracker.start_tracking(&req("A1", dec!(1)), OrderType::Limit);
        tracker.process_order_update("A1", OrderState::Open, Some("EX1"));
        tracker.process_trade_update("A1", fill("A1", dec!(1)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
