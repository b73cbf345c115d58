//! Lock-free/low-overhead primitives used on the hot path (C13): the SPSC
//! ring handing adapter callbacks to the egress publisher, a typed object
//! pool recycling the egress plane's JSON scratch buffers to avoid
//! per-message heap churn, and a fixed-capacity flat map backing the
//! idempotency and dedupe sets.

pub mod flatmap;
pub mod pool;
pub mod ring;

pub use flatmap::{FlatMap, FlatSet};
pub use pool::{ObjectPool, PoolGuard, PoolStats};
pub use ring::SpscRing;
