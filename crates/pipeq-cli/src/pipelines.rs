use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Result};
use pipeq_concurrent::{BoundedBlockingQueue, LockFreeQueue, SpscRingBuffer};
use pipeq_logger::Logger;
use tracing::{debug, info};

/// Pushed once per consumer after the last producer finishes.
const TERMINATION_TOKEN: i64 = i64::MIN;

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub producers: usize,
    pub consumers: usize,
    pub count: usize,
    pub capacity: usize,
    /// Pause between pushes, simulating producer work
    pub work: Duration,
    /// Log every value through the logger, not just the summary
    pub trace_values: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            producers: 1,
            consumers: 5,
            count: 1_000,
            capacity: 64,
            work: Duration::ZERO,
            trace_values: false,
        }
    }
}

impl PipelineOptions {
    /// Reject settings a pipeline cannot finish with: a zero-capacity queue
    /// never admits a value, and every value must stay below the
    /// termination token's range.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.capacity >= 1, "queue capacity must be at least 1");
        ensure!(self.capacity < usize::MAX, "queue capacity {} is too large", self.capacity);
        let total = self
            .producers
            .checked_mul(self.count)
            .and_then(|total| i64::try_from(total).ok());
        ensure!(
            total.is_some(),
            "{} producers x {} values does not fit the value range",
            self.producers,
            self.count
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub queue: &'static str,
    pub expected: usize,
    pub received: usize,
    pub duplicates: usize,
    pub out_of_order: usize,
    pub elapsed: Duration,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.expected == self.received && self.duplicates == 0 && self.out_of_order == 0
    }

    fn check(self) -> Result<Self> {
        if !self.is_clean() {
            bail!(
                "{}: expected {} values, received {} ({} duplicates, {} out of order)",
                self.queue,
                self.expected,
                self.received,
                self.duplicates,
                self.out_of_order
            );
        }
        Ok(self)
    }
}

/// The operations a producer/consumer pipeline needs from an MPMC queue.
trait PipelineQueue: Send + Sync + 'static {
    const NAME: &'static str;
    /// `false` once the queue stopped accepting values.
    fn produce(&self, value: i64) -> bool;
    fn consume(&self) -> i64;
}

impl PipelineQueue for BoundedBlockingQueue<i64> {
    const NAME: &'static str = "bounded-blocking";

    fn produce(&self, value: i64) -> bool {
        self.push(value).is_ok()
    }

    fn consume(&self) -> i64 {
        self.pop().unwrap_or(TERMINATION_TOKEN)
    }
}

impl PipelineQueue for LockFreeQueue<i64> {
    const NAME: &'static str = "lock-free";

    fn produce(&self, value: i64) -> bool {
        self.push(value);
        true
    }

    fn consume(&self) -> i64 {
        loop {
            match self.pop() {
                Some(value) => return value,
                None => thread::yield_now(),
            }
        }
    }
}

fn run_mpmc<Q: PipelineQueue>(queue: Arc<Q>, opts: PipelineOptions, logger: &Arc<Logger>) -> Result<Report> {
    opts.validate()?;
    let started = Instant::now();
    let active = Arc::new(AtomicUsize::new(opts.producers));

    let producers: Vec<_> = (0..opts.producers)
        .map(|p| {
            let queue = queue.clone();
            let active = active.clone();
            let logger = logger.clone();
            thread::spawn(move || {
                for i in 0..opts.count {
                    let value = (p * opts.count + i) as i64;
                    if !queue.produce(value) {
                        break;
                    }
                    if opts.trace_values {
                        logger.log(format_args!("producer {} value {}", p, value));
                    }
                    if !opts.work.is_zero() {
                        thread::sleep(opts.work);
                    }
                }
                if active.fetch_sub(1, Ordering::AcqRel) == 1 {
                    for _ in 0..opts.consumers {
                        queue.produce(TERMINATION_TOKEN);
                    }
                    debug!(consumers = opts.consumers, "termination tokens pushed");
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..opts.consumers)
        .map(|c| {
            let queue = queue.clone();
            let logger = logger.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                loop {
                    let value = queue.consume();
                    if value == TERMINATION_TOKEN {
                        break;
                    }
                    if opts.trace_values {
                        logger.log(format_args!("consumer {} value {}", c, value));
                    }
                    seen.push(value);
                }
                seen
            })
        })
        .collect();

    for p in producers {
        if p.join().is_err() {
            bail!("{} producer panicked", Q::NAME);
        }
    }
    let mut unique = HashSet::new();
    let mut received = 0;
    for c in consumers {
        let seen = match c.join() {
            Ok(seen) => seen,
            Err(_) => bail!("{} consumer panicked", Q::NAME),
        };
        received += seen.len();
        unique.extend(seen);
    }

    let report = Report {
        queue: Q::NAME,
        expected: opts.producers * opts.count,
        received,
        duplicates: received - unique.len(),
        out_of_order: 0,
        elapsed: started.elapsed(),
    };
    info!(queue = report.queue, received = report.received, "pipeline finished");
    logger.log(format_args!(
        "{}: {} values through {} producers / {} consumers in {:?}",
        report.queue, report.received, opts.producers, opts.consumers, report.elapsed
    ));
    report.check()
}

pub fn run_bounded(opts: PipelineOptions, logger: &Arc<Logger>) -> Result<Report> {
    run_mpmc(Arc::new(BoundedBlockingQueue::new(opts.capacity)), opts, logger)
}

pub fn run_lock_free(opts: PipelineOptions, logger: &Arc<Logger>) -> Result<Report> {
    run_mpmc(Arc::new(LockFreeQueue::new()), opts, logger)
}

/// One producer, one consumer; also verifies the consumer sees push order.
pub fn run_spsc(opts: PipelineOptions, logger: &Arc<Logger>) -> Result<Report> {
    opts.validate()?;
    let started = Instant::now();
    let (mut producer, mut consumer) = SpscRingBuffer::with_capacity(opts.capacity + 1);
    let count = opts.count;

    let handle = {
        let logger = logger.clone();
        thread::spawn(move || {
            for i in 0..count as i64 {
                let mut value = i;
                while let Err(back) = producer.push(value) {
                    value = back;
                    std::hint::spin_loop();
                }
                if opts.trace_values {
                    logger.log(format_args!("producer value {}", i));
                }
            }
        })
    };

    let mut received = 0;
    let mut out_of_order = 0;
    while received < count {
        match consumer.pop() {
            Some(value) => {
                if value != received as i64 {
                    out_of_order += 1;
                }
                received += 1;
            }
            None => std::hint::spin_loop(),
        }
    }
    if handle.join().is_err() {
        bail!("spsc producer panicked");
    }

    let report = Report {
        queue: "spsc-ring",
        expected: count,
        received,
        duplicates: 0,
        out_of_order,
        elapsed: started.elapsed(),
    };
    logger.log(format_args!("spsc-ring: {} values in {:?}", received, report.elapsed));
    report.check()
}
