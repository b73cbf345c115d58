//! Per-venue signed-request construction (C2): HMAC for CEX-shaped venues,
//! EIP-712 phantom-agent signing for DEX-shaped venues.

pub mod eip712;
pub mod hmac_signer;

pub use eip712::{Eip712Signer, SignedAction};
pub use hmac_signer::BybitSigner;
