use std::fmt::Display;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use pipeq_concurrent::BoundedBlockingQueue;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LoggerConfig;
use crate::sink::Sink;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("failed to spawn logger thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("log sink failed: {0}")]
    Sink(#[source] io::Error),
    #[error("logger thread panicked")]
    WorkerPanicked,
    #[error("invalid logger configuration: {0:#}")]
    Config(anyhow::Error),
}

impl From<anyhow::Error> for LoggerError {
    fn from(err: anyhow::Error) -> Self {
        LoggerError::Config(err)
    }
}

/// Counters reported when the logger shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggerStats {
    /// Lines handed to the sink
    pub written: u64,
    /// Messages rejected because the buffer was full or shut down
    pub dropped: u64,
}

/// Background logger: submitters enqueue without blocking, one dedicated
/// thread drains the queue into a [`Sink`].
///
/// Build one at startup and share it as `Arc<Logger>`; there is no global
/// instance. Messages still queued at shutdown are flushed before the worker
/// exits.
pub struct Logger {
    queue: Arc<BoundedBlockingQueue<String>>,
    worker: Mutex<Option<JoinHandle<(u64, Option<io::Error>)>>>,
    outcome: Mutex<Option<Outcome>>,
    dropped: Arc<AtomicU64>,
    timestamps: bool,
}

/// How the worker ended, kept so every `shutdown` call reports the same thing.
enum Outcome {
    Finished { written: u64 },
    SinkFailed { kind: io::ErrorKind, message: String },
    Panicked,
}

impl Logger {
    /// Open the configured sink and start the worker.
    pub fn start(config: LoggerConfig) -> Result<Self, LoggerError> {
        let sink = config.sink.build()?;
        Self::with_sink(config, sink)
    }

    /// Start the worker on a caller-provided sink; `config.sink` is ignored.
    pub fn with_sink(config: LoggerConfig, sink: Box<dyn Sink>) -> Result<Self, LoggerError> {
        let queue = Arc::new(BoundedBlockingQueue::new(config.capacity));
        let dropped = Arc::new(AtomicU64::new(0));
        let worker = {
            let queue = queue.clone();
            let dropped = dropped.clone();
            thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(move || drain_into(&queue, sink, &dropped))
                .map_err(LoggerError::Spawn)?
        };
        debug!(
            capacity = config.capacity,
            thread = %config.thread_name,
            "logger worker started"
        );

        Ok(Self {
            queue,
            worker: Mutex::new(Some(worker)),
            outcome: Mutex::new(None),
            dropped,
            timestamps: config.timestamps,
        })
    }

    /// Queue `message` for the worker. Never blocks; when the buffer is full
    /// (or the logger is shut down, or its sink failed) the message is dropped
    /// and `false` is returned.
    pub fn log(&self, message: impl Display) -> bool {
        let line = if self.timestamps {
            format!(
                "{} {}",
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
                message
            )
        } else {
            message.to_string()
        };

        match self.queue.try_push(line) {
            Ok(()) => true,
            Err(_) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "dropping log message, buffer full or shut down");
                false
            }
        }
    }

    /// Messages waiting for the worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Messages that will never reach the sink: rejected by `log`, or still
    /// queued when the sink failed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting messages, flush what is queued and join the worker.
    /// Calling it again returns the same stats, or the same error.
    pub fn shutdown(&self) -> Result<LoggerStats, LoggerError> {
        self.queue.shutdown();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let outcome = match handle.join() {
                Ok((written, None)) => {
                    debug!(written, dropped = self.dropped(), "logger worker stopped");
                    Outcome::Finished { written }
                }
                Ok((_, Some(err))) => Outcome::SinkFailed {
                    kind: err.kind(),
                    message: err.to_string(),
                },
                Err(_) => {
                    let lost = self.queue.drain().len() as u64;
                    self.dropped.fetch_add(lost, Ordering::Relaxed);
                    Outcome::Panicked
                }
            };
            *self.outcome.lock() = Some(outcome);
        }

        match &*self.outcome.lock() {
            Some(Outcome::Finished { written }) => Ok(LoggerStats {
                written: *written,
                dropped: self.dropped(),
            }),
            Some(Outcome::SinkFailed { kind, message }) => {
                Err(LoggerError::Sink(io::Error::new(*kind, message.clone())))
            }
            Some(Outcome::Panicked) => Err(LoggerError::WorkerPanicked),
            None => Ok(LoggerStats {
                written: 0,
                dropped: self.dropped(),
            }),
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "logger did not shut down cleanly");
        }
    }
}

/// Worker loop: pop until shutdown, then flush whatever is still queued.
///
/// A sink error stops the queue so later `log` calls are rejected; the line
/// being written and everything still queued are counted as dropped.
fn drain_into(
    queue: &BoundedBlockingQueue<String>,
    mut sink: Box<dyn Sink>,
    dropped: &AtomicU64,
) -> (u64, Option<io::Error>) {
    let mut written = 0u64;
    match write_lines(queue, sink.as_mut(), &mut written) {
        Ok(()) => (written, None),
        Err((err, in_flight)) => {
            queue.shutdown();
            let lost = in_flight + queue.drain().len() as u64;
            dropped.fetch_add(lost, Ordering::Relaxed);
            warn!(error = %err, written, lost, "log sink failed, no longer accepting messages");
            (written, Some(err))
        }
    }
}

/// On failure, also returns how many lines taken off the queue were not written.
fn write_lines(
    queue: &BoundedBlockingQueue<String>,
    sink: &mut dyn Sink,
    written: &mut u64,
) -> Result<(), (io::Error, u64)> {
    while let Ok(line) = queue.pop() {
        sink.write_line(&line).map_err(|e| (e, 1))?;
        *written += 1;
    }

    let rest = queue.drain();
    let total = rest.len() as u64;
    for (i, line) in rest.iter().enumerate() {
        sink.write_line(line).map_err(|e| (e, total - i as u64))?;
        *written += 1;
    }
    sink.flush().map_err(|e| (e, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use std::time::{Duration, Instant};

    fn memory_logger(capacity: usize) -> (Logger, MemorySink) {
        let sink = MemorySink::new();
        let logger = Logger::with_sink(
            LoggerConfig::default().with_capacity(capacity),
            Box::new(sink.clone()),
        )
        .unwrap();
        (logger, sink)
    }

    #[test]
    fn writes_messages_in_order() {
        let (logger, sink) = memory_logger(16);
        for i in 0..10 {
            assert!(logger.log(format_args!("message {}", i)));
        }
        let stats = logger.shutdown().unwrap();
        assert_eq!(stats, LoggerStats { written: 10, dropped: 0 });
        let expected: Vec<_> = (0..10).map(|i| format!("message {}", i)).collect();
        assert_eq!(sink.lines(), expected);
    }

    #[test]
    fn rejects_after_shutdown() {
        let (logger, sink) = memory_logger(4);
        logger.shutdown().unwrap();
        assert!(!logger.log("late"));
        assert_eq!(logger.dropped(), 1);
        assert_eq!(logger.shutdown().unwrap().dropped, 1);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn zero_capacity_drops_everything() {
        let (logger, sink) = memory_logger(0);
        assert!(!logger.log("a"));
        assert!(!logger.log("b"));
        let stats = logger.shutdown().unwrap();
        assert_eq!(stats, LoggerStats { written: 0, dropped: 2 });
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn timestamps_prefix_lines() {
        let sink = MemorySink::new();
        let config = LoggerConfig {
            timestamps: true,
            ..LoggerConfig::default()
        };
        let logger = Logger::with_sink(config, Box::new(sink.clone())).unwrap();
        logger.log("stamped");
        logger.shutdown().unwrap();

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let (stamp, rest) = lines[0].split_once(' ').unwrap();
        assert_eq!(rest, "stamped");
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    struct Broken;
    impl Sink for Broken {
        fn write_line(&mut self, _line: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
    }

    #[test]
    fn sink_errors_surface_on_shutdown() {
        let logger = Logger::with_sink(LoggerConfig::default(), Box::new(Broken)).unwrap();
        logger.log("boom");
        match logger.shutdown() {
            Err(LoggerError::Sink(e)) => assert_eq!(e.to_string(), "disk full"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn failed_sink_rejects_and_counts_later_messages() {
        let logger = Logger::with_sink(LoggerConfig::default(), Box::new(Broken)).unwrap();
        let mut submitted = 0u64;
        assert!(logger.log("boom"));
        submitted += 1;

        // Once the worker hits the error the queue stops accepting.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            submitted += 1;
            if !logger.log("waiting for the worker") {
                break;
            }
            assert!(Instant::now() < deadline, "logger kept accepting after sink failure");
            thread::sleep(Duration::from_millis(1));
        }

        for i in 0..5 {
            assert!(!logger.log(format_args!("late {}", i)));
            submitted += 1;
        }

        for _ in 0..2 {
            match logger.shutdown() {
                Err(LoggerError::Sink(e)) => assert_eq!(e.to_string(), "disk full"),
                other => panic!("unexpected result: {:?}", other),
            }
        }
        assert_eq!(logger.pending(), 0);
        assert_eq!(logger.dropped(), submitted);
    }
}
