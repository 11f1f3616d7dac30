use core::mem::MaybeUninit;
use core::sync::atomic::Ordering;
use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};

struct Node<T> {
    /// Initialized for every node except the current sentinel, whose value was
    /// either never written or already moved out by the popper that retired
    /// its predecessor.
    value: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

/// Unbounded lock-free MPMC queue (Michael–Scott, dummy head node).
///
/// - `head` always points at a sentinel; the node after it is the next to pop
/// - `tail` points at the last node or lags it by one; any thread that sees
///   the lag moves it forward before retrying
/// - Nodes are retired through `crossbeam-epoch`, and only by the popper whose
///   CAS moved `head` past them
///
/// Lock-free but not starvation-free: a thread may retry indefinitely under
/// contention while others make progress.
pub struct LockFreeQueue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
}

// Safety: values only move between threads by value, never shared by reference.
unsafe impl<T: Send> Send for LockFreeQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> LockFreeQueue<T> {
    pub fn new() -> Self {
        let queue = Self {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
        };
        let sentinel = Owned::new(Node {
            value: MaybeUninit::uninit(),
            next: Atomic::null(),
        });
        // SAFETY: the queue is not shared yet, so no guard is needed.
        unsafe {
            let guard = epoch::unprotected();
            let sentinel = sentinel.into_shared(guard);
            queue.head.store(sentinel, Ordering::Relaxed);
            queue.tail.store(sentinel, Ordering::Relaxed);
        }
        queue
    }

    /// Append `value`. Never blocks and never fails.
    pub fn push(&self, value: T) {
        let guard = &epoch::pin();
        let new = Owned::new(Node {
            value: MaybeUninit::new(value),
            next: Atomic::null(),
        })
        .into_shared(guard);
        let backoff = Backoff::new();

        let mut tail = self.tail.load(Ordering::Acquire, guard);
        loop {
            // SAFETY: tail is never null and the guard keeps it alive.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, guard);
            if !next.is_null() {
                // Another push linked a node but has not moved tail yet.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed, guard);
                tail = next;
                continue;
            }

            match tail_ref.next.compare_exchange(
                Shared::null(),
                new,
                Ordering::Release,
                Ordering::Relaxed,
                guard,
            ) {
                Ok(_) => {
                    // Best effort: a failure means someone already helped.
                    let _ = self
                        .tail
                        .compare_exchange(tail, new, Ordering::Release, Ordering::Relaxed, guard);
                    return;
                }
                Err(lost) => {
                    let _ = self.tail.compare_exchange(
                        tail,
                        lost.current,
                        Ordering::Release,
                        Ordering::Relaxed,
                        guard,
                    );
                    tail = lost.current;
                    backoff.spin();
                }
            }
        }
    }

    /// Remove the oldest value, or `None` if the queue is empty. Never blocks.
    pub fn pop(&self) -> Option<T> {
        let guard = &epoch::pin();
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            let tail = self.tail.load(Ordering::Acquire, guard);
            // SAFETY: head is never null and the guard keeps it alive.
            let next = unsafe { head.deref() }.next.load(Ordering::Acquire, guard);
            // SAFETY: a non-null next is protected by the same guard.
            let next_ref = unsafe { next.as_ref() }?;

            if head == tail {
                // tail lags a completed push; move it before head can pass it.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed, guard);
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire, guard)
                .is_ok()
            {
                // SAFETY: winning the CAS makes this thread the only one that
                // reads next's value; next is now the sentinel and its value is
                // never read again. The old sentinel is unreachable from the
                // roots and freed once every guard that may still see it is gone.
                unsafe {
                    let value = next_ref.value.assume_init_read();
                    guard.defer_destroy(head);
                    return Some(value);
                }
            }
            backoff.spin();
        }
    }

    /// Advisory snapshot; may be stale by the time the caller acts on it.
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        let head = self.head.load(Ordering::Acquire, guard);
        // SAFETY: head is never null and the guard keeps it alive.
        unsafe { head.deref() }.next.load(Ordering::Acquire, guard).is_null()
    }
}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
        // SAFETY: `&mut self` means no other thread can reach the sentinel.
        unsafe {
            let guard = epoch::unprotected();
            let sentinel = self.head.load(Ordering::Relaxed, guard);
            drop(sentinel.into_owned());
        }
    }
}
