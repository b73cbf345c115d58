//! Exchange-adapter interface (C7) and the venue router (C10).
//!
//! Every venue — CEX or DEX shaped — implements the same `ExchangeAdapter`
//! trait, so the ingress plane and the tracker never special-case a venue
//! by name. Methods may block on I/O; implementations must not hold a
//! global lock across a network call. Callbacks may fire from adapter-
//! internal threads (WS readers, batchers, reconnect loops) and must never
//! propagate a `Result` across that boundary — they log and drop per the
//! error taxonomy's "adapter callbacks never throw to the caller".

pub mod bybit;
pub mod hyperliquid;
pub mod router;

use crate::core::errors::GatewayError;
use crate::core::types::{FillEvent, NormalizedOrderRequest, OrderResponse, OrderUpdate};
use rust_decimal::Decimal;

pub use router::VenueRouter;

/// Callback invoked for every order-state transition an adapter observes,
/// whether sourced from a REST acknowledgement or a private WS frame.
pub type OrderUpdateCallback = Box<dyn Fn(OrderUpdate) + Send + Sync>;
/// Callback invoked for every fill an adapter observes.
pub type FillCallback = Box<dyn Fn(FillEvent) + Send + Sync>;
/// Callback invoked for adapter-internal errors that have no synchronous
/// caller to report to (e.g. a WS parse failure, a signer crash).
pub type AdapterErrorCallback = Box<dyn Fn(GatewayError) + Send + Sync>;

/// Optional filters accepted by `list_open_orders`, one per venue category.
#[derive(Debug, Clone, Default)]
pub struct OpenOrdersFilter<'a> {
    pub category: Option<&'a str>,
    pub symbol: Option<&'a str>,
    pub settle_coin: Option<&'a str>,
    pub base_coin: Option<&'a str>,
}

/// The capability set every venue adapter exposes (§4.7). Object-safe and
/// `dyn`-dispatched by `VenueRouter`; the router owns adapters, callers
/// hold non-owning references.
pub trait ExchangeAdapter: Send + Sync {
    /// One-time credential and mode setup. Returns `false` if the adapter
    /// cannot be used at all (e.g. missing credentials).
    fn initialize(&self, api_key: &str, api_secret: &str, testnet: bool) -> bool;

    /// Establish the adapter's transports (REST client, private WS). May
    /// block for the duration of the initial handshake.
    fn connect(&self) -> bool;

    /// Tear down transports. Idempotent.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn place_order(&self, req: &NormalizedOrderRequest) -> OrderResponse;

    fn cancel_order(
        &self,
        client_id: &str,
        symbol: Option<&str>,
        exchange_id: Option<&str>,
    ) -> OrderResponse;

    /// Replace quantity and/or price for a resting order. Venues that do
    /// not support native modification return `not_implemented` unless
    /// both fields are supplied and a cancel+new fallback applies.
    fn modify_order(
        &self,
        client_id: &str,
        new_quantity: Option<Decimal>,
        new_price: Option<Decimal>,
    ) -> OrderResponse;

    fn query_order(&self, client_id: &str) -> OrderResponse;

    fn list_open_orders(&self, filter: OpenOrdersFilter<'_>) -> Vec<OrderResponse>;

    fn set_order_update_callback(&self, callback: OrderUpdateCallback);
    fn set_fill_callback(&self, callback: FillCallback);
    fn set_error_callback(&self, callback: AdapterErrorCallback);

    fn exchange_name(&self) -> &str;
}
