//! Nonce manager (C3): a per-signer strictly monotonic millisecond counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

/// Atomic monotonic nonce generator. Safe to share across threads; `next()`
/// always returns a value `≥` the current wall clock, so a process restart
/// never needs to persist the last-issued nonce.
pub struct NonceManager {
    last: AtomicU64,
}

impl NonceManager {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(now_ms()),
        }
    }

    /// Returns `max(now_ms, last + 1)`, updating `last` via CAS retry loop.
    pub fn next(&self) -> u64 {
        loop {
            let current = self.last.load(Ordering::Acquire);
            let candidate = now_ms().max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(_) => continue,
            }
        }
    }

    /// Jumps the counter to the wall clock when it has advanced
    /// significantly past the last issued nonce (e.g. after a long pause).
    pub fn fast_forward_to_now(&self) {
        let now = now_ms();
        let _ = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if now > current { Some(now) } else { None }
            });
    }
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn next_is_strictly_increasing() {
        let nonces = NonceManager::new();
        let mut last = 0u64;
        for _ in 0..1000 {
            let n = nonces.next();
            assert!(n > last);
            last = n;
        }
    }

    #[test]
    fn next_is_always_at_least_now() {
        let nonces = NonceManager::new();
        let n = nonces.next();
        assert!(n >= now_ms());
    }

    #[test]
    fn concurrent_next_calls_never_collide() {
        let nonces = Arc::new(NonceManager::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let nonces = nonces.clone();
            handles.push(thread::spawn(move || {
                (0..500).map(|_| nonces.next()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        let before = all.len();
        all.dedup();
        assert_eq!(before, all.len(), "duplicate nonce issued under contention");
    }
}
