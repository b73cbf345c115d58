//! Integration tests for the ingress-to-tracker path: an `OrderIntent` as it
//! would arrive off the bus, normalized, tracked, and walked through its
//! state transitions the way the gateway binary's callback wiring does it.

use gateway_core::core::types::{
    IntentAction, NormalizedOrderRequest, OrderIntent, OrderState, OrderType, ProductType,
    VenueCategory,
};
use gateway_core::tracker::OrderTracker;
use serde_json::json;
use std::collections::HashMap;

fn place_intent(client_id: &str, details: HashMap<String, serde_json::Value>) -> OrderIntent {
    OrderIntent {
        version: 1,
        client_id: client_id.to_string(),
        action: IntentAction::Place,
        venue_category: VenueCategory::Cex,
        venue: "bybit".to_string(),
        product_type: ProductType::Perpetual,
        details,
        ts_ns: 0,
        tags: HashMap::new(),
    }
}

fn limit_buy_details() -> HashMap<String, serde_json::Value> {
    let mut d = HashMap::new();
    d.insert("symbol".to_string(), json!("BTCUSDT"));
    d.insert("side".to_string(), json!("buy"));
    d.insert("order_type".to_string(), json!("limit"));
    d.insert("quantity".to_string(), json!("0.01"));
    d.insert("price".to_string(), json!("50000.5"));
    d.insert("time_in_force".to_string(), json!("GTC"));
    d
}

#[test]
fn normalized_request_round_trips_through_tracker_to_open() {
    let intent = place_intent("cid-1", limit_buy_details());
    let req = NormalizedOrderRequest::try_from_intent(&intent).expect("valid intent normalizes");

    let tracker = OrderTracker::new(None);
    // "Track before submit": the row must exist before any venue ack can
    // race it in over the private WS.
    tracker.start_tracking(&req, OrderType::Limit);

    let tracked = tracker.get_order("cid-1").expect("order is tracked");
    assert_eq!(tracked.state, OrderState::PendingCreate);
    assert_eq!(tracked.client_id, "cid-1");

    tracker.process_order_update("cid-1", OrderState::PendingSubmit, None);
    tracker.process_order_update("cid-1", OrderState::Open, Some("exch-42"));

    let tracked = tracker.get_order("cid-1").unwrap();
    assert_eq!(tracked.state, OrderState::Open);
    assert_eq!(tracked.exchange_id.as_deref(), Some("exch-42"));

    let by_exchange = tracker
        .get_order_by_exchange_id("exch-42")
        .expect("order reachable by exchange id after first ack");
    assert_eq!(by_exchange.client_id, "cid-1");

    assert_eq!(tracker.all_fillable_orders().len(), 1);
}

#[test]
fn illegal_transition_out_of_a_terminal_state_is_dropped() {
    let intent = place_intent("cid-2", limit_buy_details());
    let req = NormalizedOrderRequest::try_from_intent(&intent).unwrap();

    let tracker = OrderTracker::new(None);
    tracker.start_tracking(&req, OrderType::Limit);
    tracker.process_order_update("cid-2", OrderState::PendingSubmit, None);
    tracker.process_order_update("cid-2", OrderState::Canceled, None);

    // A stray late "open" arriving after cancel must not resurrect the order.
    tracker.process_order_update("cid-2", OrderState::Open, None);

    let tracked = tracker.get_order("cid-2").unwrap();
    assert_eq!(tracked.state, OrderState::Canceled);
    assert!(tracker.all_fillable_orders().is_empty());
}

#[test]
fn normalization_rejects_an_intent_missing_a_required_field() {
    let mut details = limit_buy_details();
    details.remove("quantity");
    let intent = place_intent("cid-3", details);

    let err = NormalizedOrderRequest::try_from_intent(&intent)
        .expect_err("missing quantity must fail normalization");
    assert_eq!(err.reason_code(), "invalid_params");
}

#[test]
fn unrecognized_detail_keys_survive_into_extra_for_venue_specific_use() {
    let mut details = limit_buy_details();
    details.insert("triggerPrice".to_string(), json!("51000"));
    details.insert("orderFilter".to_string(), json!("StopOrder"));
    let intent = place_intent("cid-4", details);

    let req = NormalizedOrderRequest::try_from_intent(&intent).unwrap();
    assert_eq!(req.extra_decimal("triggerPrice").unwrap().to_string(), "51000");
    assert_eq!(req.extra_str("orderFilter"), Some("StopOrder"));
    // Typed fields are consumed, not duplicated into extra.
    assert!(req.extra_str("symbol").is_none());
}
