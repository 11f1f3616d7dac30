use crate::error::{PushShutDown, QueueShutDown};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use tracing::trace;

/// Lifecycle of a [`BoundedBlockingQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueState {
    /// Accepting pushes and pops.
    Active,
    /// Shutdown signaled, some threads are still parked in `push`/`pop`.
    ShuttingDown,
    /// Shutdown signaled and no thread is parked.
    Stopped,
}

struct State<T> {
    items: VecDeque<T>,
    shutting_down: bool,
    parked_pushers: usize,
    parked_poppers: usize,
}

impl<T> State<T> {
    fn lifecycle(&self) -> QueueState {
        match (self.shutting_down, self.parked_pushers + self.parked_poppers) {
            (false, _) => QueueState::Active,
            (true, 0) => QueueState::Stopped,
            (true, _) => QueueState::ShuttingDown,
        }
    }
}

/// Bounded multi-producer multi-consumer FIFO queue that blocks on full/empty.
///
/// - One mutex guards the buffer, the shutdown flag and the parked counters
/// - `data_available` wakes poppers, `space_available` wakes pushers
/// - [`shutdown`](Self::shutdown) is one-way and releases every parked thread
///
/// Share it between threads through an `Arc`. A blocked caller holds a borrow
/// of the queue, so it cannot be dropped while anyone waits inside it.
pub struct BoundedBlockingQueue<T> {
    state: Mutex<State<T>>,
    data_available: Condvar,
    space_available: Condvar,
    max_size: usize,
}

impl<T> BoundedBlockingQueue<T> {
    /// Create a queue holding at most `max_size` elements.
    ///
    /// A `max_size` of zero is accepted: every `try_push` fails and `push`/`pop`
    /// wait until shutdown.
    pub fn new(max_size: usize) -> Self {
        let initial = if max_size == usize::MAX { 0 } else { max_size.min(1024) };
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(initial),
                shutting_down: false,
                parked_pushers: 0,
                parked_poppers: 0,
            }),
            data_available: Condvar::new(),
            space_available: Condvar::new(),
            max_size,
        }
    }

    /// Create a queue whose only limit is memory; `push` never waits.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Append `item`, waiting while the queue is full.
    ///
    /// Returns the item inside [`PushShutDown`] if the queue is (or becomes)
    /// shut down before space frees up.
    pub fn push(&self, item: T) -> Result<(), PushShutDown<T>> {
        let mut state = self.state.lock();
        while state.items.len() >= self.max_size && !state.shutting_down {
            state.parked_pushers += 1;
            self.space_available.wait(&mut state);
            state.parked_pushers -= 1;
        }

        if state.shutting_down {
            return Err(PushShutDown(item));
        }

        state.items.push_back(item);
        self.data_available.notify_one();
        Ok(())
    }

    /// Remove the oldest element, waiting while the queue is empty.
    ///
    /// Fails with [`QueueShutDown`] once shutdown is signaled, even if
    /// elements remain; those are recovered with [`drain`](Self::drain).
    pub fn pop(&self) -> Result<T, QueueShutDown> {
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.shutting_down {
            state.parked_poppers += 1;
            self.data_available.wait(&mut state);
            state.parked_poppers -= 1;
        }

        if state.shutting_down {
            return Err(QueueShutDown);
        }

        let item = state.items.pop_front().ok_or(QueueShutDown)?;
        self.space_available.notify_one();
        Ok(item)
    }

    /// Append without waiting. Full and shut down both hand the item back.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.shutting_down || state.items.len() >= self.max_size {
            return Err(item);
        }

        state.items.push_back(item);
        self.data_available.notify_one();
        Ok(())
    }

    /// Remove the oldest element without waiting. Empty and shut down both
    /// yield `None`.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.shutting_down {
            return None;
        }

        let item = state.items.pop_front()?;
        self.space_available.notify_one();
        Some(item)
    }

    /// Signal shutdown and wake every parked thread. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }
        state.shutting_down = true;
        trace!(
            remaining = state.items.len(),
            parked_pushers = state.parked_pushers,
            parked_poppers = state.parked_poppers,
            "bounded queue shutting down"
        );
        self.data_available.notify_all();
        self.space_available.notify_all();
    }

    /// Take every element still queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let drained: Vec<T> = state.items.drain(..).collect();
        if !drained.is_empty() {
            self.space_available.notify_all();
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().items.len() >= self.max_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Threads currently parked in `push` or `pop`.
    pub fn waiting(&self) -> usize {
        let state = self.state.lock();
        state.parked_pushers + state.parked_poppers
    }

    pub fn state(&self) -> QueueState {
        self.state.lock().lifecycle()
    }
}

impl<T> Default for BoundedBlockingQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T> Drop for BoundedBlockingQueue<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.items.is_empty() {
            trace!(remaining = state.items.len(), "dropping bounded queue with queued items");
        }
    }
}
