//! Lock-free typed object pool (C13).
//!
//! Backs the egress plane's per-message JSON scratch buffer (see
//! `bus::EgressPlane::publish_now`): rather than `serde_json::to_vec`
//! heap-allocating a fresh `Vec<u8>` for every published report or fill,
//! the publisher borrows one from this pool, serializes into it, and
//! returns it when done. Built on the same `crossbeam::ArrayQueue`
//! free-list idiom as the teacher's pool, reworked so construction
//! happens lazily at `allocate` time rather than eagerly at `new`, to
//! match a fixed-capacity allocator's usual contract: the pool reserves
//! capacity up front but does not pay for `capacity` worth of objects
//! until they are actually asked for.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Lock-free, fixed-capacity object pool.
///
/// `allocate` hands out a zero-initialized `T` — `T::default()`, called
/// the first `capacity` times a slot is needed, never again after that
/// (later allocations recycle a previously-deallocated object). Beyond
/// `capacity` simultaneously-outstanding objects, `allocate` returns
/// `None` rather than growing unbounded.
///
/// Objects are returned by value rather than through a raw pointer: the
/// pool hands out ownership instead of a borrow, which keeps the whole
/// type safe-Rust and sidesteps the aliasing rules a literal stable
/// pointer shared across the producer and consumer threads would need to
/// uphold.
pub struct ObjectPool<T: Default> {
    free: Arc<ArrayQueue<T>>,
    capacity: usize,
    constructed: Arc<AtomicUsize>,
}

impl<T: Default> ObjectPool<T> {
    /// Reserve capacity for `capacity` objects. Nothing is constructed yet.
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Arc::new(ArrayQueue::new(capacity)),
            capacity,
            constructed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Hand out a recycled object if one is free, otherwise lazily
    /// construct a fresh `T::default()` as long as the pool hasn't yet
    /// reached `capacity` constructions. Returns `None` once it has.
    #[inline]
    pub fn allocate(&self) -> Option<T> {
        if let Some(obj) = self.free.pop() {
            return Some(obj);
        }
        let mut count = self.constructed.load(Ordering::Acquire);
        loop {
            if count >= self.capacity {
                return None;
            }
            match self.constructed.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(T::default()),
                Err(actual) => count = actual,
            }
        }
    }

    /// Return `obj` to the free list. If the free list is somehow full
    /// (more outstanding objects were deallocated than the pool ever
    /// constructed, which should not happen), `obj` is dropped instead.
    #[inline]
    pub fn deallocate(&self, obj: T) {
        let _ = self.free.push(obj);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many more times `allocate` can succeed right now: objects
    /// sitting in the free list plus capacity never yet constructed.
    pub fn available(&self) -> usize {
        let constructed = self.constructed.load(Ordering::Acquire);
        self.free.len() + self.capacity.saturating_sub(constructed)
    }
}

impl<T: Default> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            free: Arc::clone(&self.free),
            capacity: self.capacity,
            constructed: Arc::clone(&self.constructed),
        }
    }
}

/// RAII guard returning its object to the pool on drop.
pub struct PoolGuard<T: Default> {
    obj: Option<T>,
    pool: ObjectPool<T>,
}

impl<T: Default> PoolGuard<T> {
    pub fn new(obj: T, pool: ObjectPool<T>) -> Self {
        Self { obj: Some(obj), pool }
    }

    pub fn get(&self) -> &T {
        self.obj.as_ref().unwrap()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.obj.as_mut().unwrap()
    }
}

impl<T: Default> std::ops::Deref for PoolGuard<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.get()
    }
}

impl<T: Default> std::ops::DerefMut for PoolGuard<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
    }
}

impl<T: Default> Drop for PoolGuard<T> {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            self.pool.deallocate(obj);
        }
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub utilization: f64,
}

impl PoolStats {
    pub fn from_pool<T: Default>(pool: &ObjectPool<T>) -> Self {
        let capacity = pool.capacity();
        let available = pool.available();
        let utilization = 1.0 - (available as f64 / capacity.max(1) as f64);
        Self { capacity, available, utilization }
    }

    pub fn is_near_exhaustion(&self) -> bool {
        self.utilization > 0.9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, PartialEq)]
    struct TestObject {
        value: u64,
    }

    #[test]
    fn new_pool_constructs_nothing_up_front_but_reports_full_capacity_available() {
        let pool = ObjectPool::<TestObject>::new(10);
        assert_eq!(pool.capacity(), 10);
        assert_eq!(pool.available(), 10);
    }

    #[test]
    fn allocate_lazily_constructs_up_to_capacity_then_returns_none() {
        let pool = ObjectPool::<TestObject>::new(2);
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_eq!(pool.available(), 0);
        assert!(pool.allocate().is_none(), "pool exhausted beyond capacity");
        pool.deallocate(a);
        pool.deallocate(b);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn deallocated_object_is_recycled_by_the_next_allocate() {
        let pool = ObjectPool::<TestObject>::new(1);
        let mut obj = pool.allocate().unwrap();
        obj.value = 42;
        pool.deallocate(obj);

        assert_eq!(pool.available(), 1);
        let recycled = pool.allocate().unwrap();
        assert_eq!(recycled.value, 42, "deallocate returns the same object, not a fresh default");
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn pool_guard_returns_object_on_drop() {
        let pool = ObjectPool::<TestObject>::new(1);
        {
            let mut guard = PoolGuard::new(pool.allocate().unwrap(), pool.clone());
            guard.value = 7;
        }
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.allocate().unwrap().value, 7);
    }

    #[test]
    fn pool_stats_reflect_utilization() {
        let pool = ObjectPool::<TestObject>::new(10);
        let _a = pool.allocate();
        let _b = pool.allocate();

        let stats = PoolStats::from_pool(&pool);
        assert_eq!(stats.capacity, 10);
        assert_eq!(stats.available, 8);
        assert!(!stats.is_near_exhaustion());
    }

    #[test]
    fn concurrent_allocate_deallocate_never_exceeds_capacity() {
        use std::thread;

        let pool = ObjectPool::<TestObject>::new(100);
        let pool_clone = pool.clone();

        let handle = thread::spawn(move || {
            for _ in 0..50 {
                if let Some(obj) = pool_clone.allocate() {
                    pool_clone.deallocate(obj);
                }
            }
        });

        for _ in 0..50 {
            if let Some(obj) = pool.allocate() {
                pool.deallocate(obj);
            }
        }

        handle.join().unwrap();
        assert!(pool.available() <= 100);
    }
}
