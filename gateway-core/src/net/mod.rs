//! Venue-agnostic transports: a blocking HTTP client (C5) and a
//! WebSocket post/sub client with heartbeat (C6). Both are venue-shape
//! agnostic; the Bybit and Hyperliquid adapters each own one instance per
//! connection.

pub mod http;
pub mod ws;

pub use http::{HttpClient, HttpTimeouts};
pub use ws::WsPostClient;
