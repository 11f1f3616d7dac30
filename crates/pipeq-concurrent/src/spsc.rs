use crate::sync::{Arc, AtomicUsize, Ordering};
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use crossbeam_utils::CachePadded;

/// Wait-free SPSC ring buffer.
///
/// - One dedicated producer, one dedicated consumer
/// - Indices stay in `[0, size)` and wrap by comparison, so `size` need not be
///   a power of two
/// - One slot is always left empty: full is `next(tail) == head`, empty is
///   `head == tail`, usable capacity is `size - 1`
///
/// The single-producer/single-consumer restriction is carried by the handles:
/// [`with_capacity`](Self::with_capacity) hands out exactly one [`Producer`]
/// and one [`Consumer`], neither can be cloned, and both operations take
/// `&mut self`.
pub struct SpscRingBuffer<T> {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// Safety: producer and consumer touch disjoint slots; T must be Send
unsafe impl<T: Send> Send for SpscRingBuffer<T> {}
unsafe impl<T: Send> Sync for SpscRingBuffer<T> {}

impl<T> SpscRingBuffer<T> {
    /// Create a ring of `size` slots holding at most `size - 1` elements.
    /// Size it at `desired_capacity + 1`.
    ///
    /// # Panics
    ///
    /// If `size < 2`.
    pub fn with_capacity(size: usize) -> (Producer<T>, Consumer<T>) {
        assert!(size > 1, "ring size must be > 1");
        let buf = (0..size)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let ring = Arc::new(SpscRingBuffer {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            buf,
        });
        (
            Producer { ring: ring.clone() },
            Consumer { ring },
        )
    }

    #[inline]
    fn size(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    fn increment(&self, idx: usize) -> usize {
        let next = idx + 1;
        if next == self.size() {
            0
        } else {
            next
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.size() - 1
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if tail >= head {
            tail - head
        } else {
            self.size() - head + tail
        }
    }
}

impl<T> Drop for SpscRingBuffer<T> {
    fn drop(&mut self) {
        let mut head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        while head != tail {
            // SAFETY: slots in [head, tail) were written and not yet read.
            unsafe { (*self.buf[head].get()).assume_init_drop() };
            head = self.increment(head);
        }
    }
}

/// Producer side of the ring.
pub struct Producer<T> {
    ring: Arc<SpscRingBuffer<T>>,
}

/// Consumer side of the ring.
pub struct Consumer<T> {
    ring: Arc<SpscRingBuffer<T>>,
}

impl<T> Producer<T> {
    /// Write `value` into the next slot, or hand it back if the ring is full.
    #[inline]
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let ring = &*self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let next = ring.increment(tail);
        // Acquire pairs with the consumer's Release so its read of this slot
        // is finished before we overwrite it.
        if next == ring.head.load(Ordering::Acquire) {
            return Err(value);
        }
        // SAFETY: only the producer writes slot `tail`, and the consumer does
        // not read it until the Release store below publishes it.
        unsafe { (*ring.buf[tail].get()).write(value) };
        ring.tail.store(next, Ordering::Release);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }
}

impl<T> Consumer<T> {
    /// Move the oldest value out, or `None` if the ring is empty.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        if head == ring.tail.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: the Acquire load above saw the producer's Release of this
        // slot, and the producer will not reuse it until head moves past it.
        let value = unsafe { (*ring.buf[head].get()).assume_init_read() };
        ring.head.store(ring.increment(head), Ordering::Release);
        Some(value)
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }
}


#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use loom::thread;

    #[test]
    fn loom_spsc_publishes_in_order() {
        loom::model(|| {
            let (mut p, mut c) = SpscRingBuffer::with_capacity(2);
            let tp = thread::spawn(move || {
                let _ = p.push(1);
                p
            });
            let tc = thread::spawn(move || c.pop());
            let mut p = tp.join().unwrap();
            let popped = tc.join().unwrap();
            assert!(popped.is_none() || popped == Some(1));
            if popped.is_some() {
                assert!(p.push(2).is_ok());
            }
        });
    }

    #[test]
    fn loom_spsc_full_then_free() {
        loom::model(|| {
            let (mut p, mut c) = SpscRingBuffer::with_capacity(2);
            p.push(1).unwrap();
            let tp = thread::spawn(move || {
                let mut v = 2;
                loop {
                    match p.push(v) {
                        Ok(()) => break,
                        Err(back) => {
                            v = back;
                            thread::yield_now();
                        }
                    }
                }
            });
            let mut seen = Vec::new();
            while seen.len() < 2 {
                match c.pop() {
                    Some(v) => seen.push(v),
                    None => thread::yield_now(),
                }
            }
            tp.join().unwrap();
            assert_eq!(seen, vec![1, 2]);
        });
    }
}
