//! Venue router (C10): a name → adapter registry.
//!
//! The router owns every adapter; the ingress plane holds only a shared
//! reference to the router itself. Lookups are case-insensitive on the
//! venue name carried by the order intent.

use super::ExchangeAdapter;
use std::collections::HashMap;

/// Maps a lowercase venue name to its adapter. `register` takes ownership;
/// `get` returns a non-owning reference, or `None` on a miss (the ingress
/// plane turns a miss into an `unknown_venue` rejection).
#[derive(Default)]
pub struct VenueRouter {
    adapters: HashMap<String, Box<dyn ExchangeAdapter>>,
}

impl VenueRouter {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, adapter: Box<dyn ExchangeAdapter>) {
        self.adapters.insert(name.into().to_lowercase(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ExchangeAdapter> {
        self.adapters.get(&name.to_lowercase()).map(|a| a.as_ref())
    }

    pub fn venues(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterErrorCallback, FillCallback, OpenOrdersFilter, OrderUpdateCallback};
    use crate::core::types::{NormalizedOrderRequest, OrderResponse};
    use rust_decimal::Decimal;

    struct StubAdapter {
        name: &'static str,
    }

    impl ExchangeAdapter for StubAdapter {
        fn initialize(&self, _api_key: &str, _api_secret: &str, _testnet: bool) -> bool {
            true
        }
        fn connect(&self) -> bool {
            true
        }
        fn disconnect(&self) {}
        fn is_connected(&self) -> bool {
            true
        }
        fn place_order(&self, req: &NormalizedOrderRequest) -> OrderResponse {
            OrderResponse::accepted(req.client_id.clone(), "E1")
        }
        fn cancel_order(&self, client_id: &str, _symbol: Option<&str>, _exchange_id: Option<&str>) -> OrderResponse {
            OrderResponse::accepted(client_id, "E1")
        }
        fn modify_order(
            &self,
            client_id: &str,
            _new_quantity: Option<Decimal>,
            _new_price: Option<Decimal>,
        ) -> OrderResponse {
            OrderResponse::accepted(client_id, "E1")
        }
        fn query_order(&self, client_id: &str) -> OrderResponse {
            OrderResponse::accepted(client_id, "E1")
        }
        fn list_open_orders(&self, _filter: OpenOrdersFilter<'_>) -> Vec<OrderResponse> {
            Vec::new()
        }
        fn set_order_update_callback(&self, _callback: OrderUpdateCallback) {}
        fn set_fill_callback(&self, _callback: FillCallback) {}
        fn set_error_callback(&self, _callback: AdapterErrorCallback) {}
        fn exchange_name(&self) -> &str {
            self.name
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut router = VenueRouter::new();
        router.register("Bybit", Box::new(StubAdapter { name: "bybit" }));
        assert!(router.get("bybit").is_some());
        assert!(router.get("BYBIT").is_some());
        assert!(router.get("hyperliquid").is_none());
    }

    #[test]
    fn registry_reports_size() {
        let mut router = VenueRouter::new();
        assert!(router.is_empty());
        router.register("bybit", Box::new(StubAdapter { name: "bybit" }));
        router.register("hyperliquid", Box::new(StubAdapter { name: "hyperliquid" }));
        assert_eq!(router.len(), 2);
    }
}
