//! Shared order-lifecycle data model: errors, wire/domain types, numeric
//! and symbol canonicalization, the nonce manager, and the order state
//! machine validator used by the tracker.

pub mod errors;
pub mod nonce;
pub mod numeric;
pub mod order_fsm;
pub mod resolver;
pub mod symbol;
pub mod types;

pub use errors::GatewayError;
pub use nonce::NonceManager;
pub use resolver::{AssetInfo, AssetResolver};
pub use types::{
    FillEvent, InFlightOrder, IntentAction, Liquidity, NormalizedOrderRequest, OrderIntent,
    OrderResponse, OrderState, OrderType, OrderUpdate, PositionAction, ProductType, Side,
    TimeInForce, VenueCategory,
};
