//! Single-producer, single-consumer ring buffer (C13).
//!
//! Used for the order-tracker-callback → egress-publisher handoff (§4.12):
//! adapter callback threads push order updates and fills, the egress
//! publisher thread drains them. Capacity must be a power of two so index
//! wrap is a mask instead of a modulo. `try_push`/`try_pop` are wait-free;
//! ordering matches the spec's "release on push, acquire on pop" so a
//! consumer that observes a new tail also observes everything the
//! producer wrote before publishing it.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed-capacity SPSC ring. `T` must be `Send` to cross the
/// producer→consumer thread boundary; there is exactly one producer and
/// exactly one consumer for the lifetime of a given `SpscRing`.
pub struct SpscRing<T> {
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    head: AtomicUsize, // next slot the consumer will read
    tail: AtomicUsize, // next slot the producer will write
}

unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    /// `capacity` is rounded up to the next power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let mut buf = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            buf.push(UnsafeCell::new(MaybeUninit::uninit()));
        }
        Self {
            buf: buf.into_boxed_slice(),
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Number of items currently queued. Racy under concurrent push/pop
    /// but monotonic enough for monitoring gauges.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push `item`, returning it back on failure if the ring is full.
    /// Producer-only; never call concurrently from two threads.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.capacity() {
            return Err(item);
        }
        let slot = &self.buf[tail & self.mask];
        unsafe {
            (*slot.get()).write(item);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pop the oldest item, or `None` if the ring is empty. Consumer-only;
    /// never call concurrently from two threads.
    pub fn try_pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let slot = &self.buf[head & self.mask];
        let item = unsafe { (*slot.get()).assume_init_read() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        // Drain any items still queued so their destructors run.
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let ring: SpscRing<u32> = SpscRing::new(5);
        assert_eq!(ring.capacity(), 8);
    }

    #[test]
    fn push_then_pop_preserves_fifo_order() {
        let ring: SpscRing<u32> = SpscRing::new(4);
        ring.try_push(1).unwrap();
        ring.try_push(2).unwrap();
        ring.try_push(3).unwrap();
        assert_eq!(ring.try_pop(), Some(1));
        assert_eq!(ring.try_pop(), Some(2));
        assert_eq!(ring.try_pop(), Some(3));
        assert_eq!(ring.try_pop(), None);
    }

    #[test]
    fn full_ring_rejects_push_and_returns_item() {
        let ring: SpscRing<u32> = SpscRing::new(2);
        ring.try_push(1).unwrap();
        ring.try_push(2).unwrap();
        assert_eq!(ring.try_push(3), Err(3));
    }

    #[test]
    fn wraps_around_after_drain() {
        let ring: SpscRing<u32> = SpscRing::new(2);
        for round in 0..10 {
            ring.try_push(round).unwrap();
            assert_eq!(ring.try_pop(), Some(round));
        }
    }

    #[test]
    fn single_producer_single_consumer_threads_see_every_item() {
        let ring = Arc::new(SpscRing::<u64>::new(1024));
        let producer_ring = ring.clone();
        let producer = thread::spawn(move || {
            for i in 0..50_000u64 {
                while producer_ring.try_push(i).is_err() {
                    std::hint::spin_loop();
                }
            }
        });

        let mut received = Vec::with_capacity(50_000);
        while received.len() < 50_000 {
            if let Some(v) = ring.try_pop() {
                received.push(v);
            }
        }
        producer.join().unwrap();

        assert_eq!(received.len(), 50_000);
        assert!(received.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn drop_runs_destructors_for_queued_items() {
        use std::sync::atomic::AtomicUsize;
        struct Counted<'a>(&'a AtomicUsize);
        impl<'a> Drop for Counted<'a> {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = AtomicUsize::new(0);
        {
            let ring: SpscRing<Counted> = SpscRing::new(4);
            ring.try_push(Counted(&drops)).unwrap();
            ring.try_push(Counted(&drops)).unwrap();
        }
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }
}
