//! gateway-core: the execution-path subsystem of a multi-venue crypto
//! trading gateway.
//!
//! A single Rust process takes normalized order intents off a message bus,
//! routes each to the adapter for its target venue, and republishes order
//! state transitions and fills back onto the bus. Everything on the hot
//! path runs on plain OS threads; the only async code in the process is the
//! Prometheus metrics HTTP endpoint.
//!
//! ## Modules
//! - `core`: wire types, numeric/symbol canonicalization, nonce
//!   generation, order and connection state machines, error taxonomy
//! - `auth`: per-venue signed-request construction (HMAC, EIP-712
//!   phantom-agent signing)
//! - `net`: venue-agnostic HTTP and WebSocket clients
//! - `adapter`: the `ExchangeAdapter` trait and its Bybit/Hyperliquid
//!   implementations, plus the venue router
//! - `tracker`: in-flight order state tracking
//! - `bus`: ZeroMQ ingress/egress planes
//! - `hft`: lock-free primitives used on the hot path (SPSC ring, object
//!   pool, fixed-capacity flat map)
//! - `resilience`: backoff, rate limiting, kill switch
//! - `config`: layered runtime configuration
//! - `monitoring`: Prometheus metrics registry and HTTP server
//! - `utils`: structured logging setup

pub mod adapter;
pub mod auth;
pub mod bus;
pub mod config;
pub mod core;
pub mod hft;
pub mod monitoring;
pub mod net;
pub mod resilience;
pub mod tracker;
pub mod utils;

pub use crate::core::{
    FillEvent, GatewayError, InFlightOrder, IntentAction, Liquidity, NonceManager,
    NormalizedOrderRequest, OrderIntent, OrderResponse, OrderState, OrderType, OrderUpdate,
    PositionAction, ProductType, Side, TimeInForce, VenueCategory,
};

pub use anyhow::{Error, Result};

/// Prelude for convenient imports across adapter implementations.
pub mod prelude {
    pub use crate::adapter::{ExchangeAdapter, VenueRouter};
    pub use crate::core::{
        FillEvent, GatewayError, InFlightOrder, IntentAction, NonceManager,
        NormalizedOrderRequest, OrderIntent, OrderResponse, OrderState, OrderUpdate, Side,
    };
    pub use crate::tracker::OrderTracker;
    pub use crate::{Error, Result};
}
