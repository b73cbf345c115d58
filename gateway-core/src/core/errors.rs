//! Crate-wide error taxonomy.
//!
//! One variant per error kind named in the gateway's error-handling design.
//! Every adapter, transport, and bus component returns `GatewayError`, or
//! converts one into an `OrderResponse`'s `reason_code`/`message` at the
//! adapter boundary. Callbacks into the tracker never propagate `Result`
//! across a thread boundary — they log and drop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("duplicate client id: {0}")]
    IdempotentDuplicate(String),

    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    #[error("symbol resolution failed: {0}")]
    SymbolResolutionFailed(String),

    #[error("signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("transport failed: {0}")]
    TransportFailed(String),

    #[error("HTTP status {status}: {body}")]
    HttpStatusError { status: u16, body: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("venue rejected: {0}")]
    VenueRejected(String),

    #[error("expired waiting for ack")]
    Expired,

    #[error("websocket disconnected: {0}")]
    WsDisconnected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Machine-readable code surfaced as `reason_code` on rejection reports.
    pub fn reason_code(&self) -> &'static str {
        match self {
            GatewayError::InvalidParams(_) => "invalid_params",
            GatewayError::IdempotentDuplicate(_) => "idempotent_duplicate",
            GatewayError::UnknownVenue(_) => "unknown_venue",
            GatewayError::SymbolResolutionFailed(_) => "symbol_resolution_failed",
            GatewayError::SignerUnavailable(_) => "signer_unavailable",
            GatewayError::TransportFailed(_) => "transport_failed",
            GatewayError::HttpStatusError { .. } => "http_status_error",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::VenueRejected(_) => "venue_rejected",
            GatewayError::Expired => "expired",
            GatewayError::WsDisconnected(_) => "ws_disconnected",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::NotImplemented(_) => "not_implemented",
            GatewayError::Config(_) => "config_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(GatewayError::Expired.reason_code(), "expired");
        assert_eq!(
            GatewayError::RateLimited { retry_after_ms: 10_000 }.reason_code(),
            "rate_limited"
        );
        assert_eq!(
            GatewayError::HttpStatusError { status: 429, body: "x".into() }.reason_code(),
            "http_status_error"
        );
    }
}
