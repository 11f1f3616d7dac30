//! Concurrent FIFO queues for producer/consumer pipelines
//!
//! - `blocking`: Bounded MPMC queue that blocks on full/empty, with shutdown
//! - `lockfree`: Unbounded lock-free MPMC queue (Michael–Scott, epoch reclamation)
//! - `spsc`: Wait-free single-producer single-consumer ring buffer

pub mod blocking;
pub mod error;
pub mod lockfree;
pub mod spsc;
mod sync;

pub use blocking::{BoundedBlockingQueue, QueueState};
pub use error::{PushShutDown, QueueShutDown};
pub use lockfree::LockFreeQueue;
pub use spsc::{Consumer, Producer, SpscRingBuffer};
