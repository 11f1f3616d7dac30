use pipeq_logger::{Logger, LoggerConfig, LoggerError, MemorySink, SinkConfig};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn concurrent_submitters_lose_nothing_when_buffer_is_large() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;

    let sink = MemorySink::new();
    let logger = Arc::new(
        Logger::with_sink(
            LoggerConfig::default().with_capacity(THREADS * PER_THREAD),
            Box::new(sink.clone()),
        )
        .unwrap(),
    );
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let logger = logger.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                for i in 0..PER_THREAD {
                    assert!(logger.log(format_args!("{}:{}", t, i)));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let stats = logger.shutdown().unwrap();
    assert_eq!(stats.written as usize, THREADS * PER_THREAD);
    assert_eq!(stats.dropped, 0);

    // Each submitter's own messages keep their order.
    let lines = sink.lines();
    let mut next = vec![0usize; THREADS];
    for line in &lines {
        let (t, i) = line.split_once(':').unwrap();
        let (t, i): (usize, usize) = (t.parse().unwrap(), i.parse().unwrap());
        assert_eq!(i, next[t]);
        next[t] += 1;
    }
    assert!(next.iter().all(|&n| n == PER_THREAD));
}

#[test]
fn written_plus_dropped_accounts_for_every_message() {
    let sink = MemorySink::new();
    let logger = Logger::with_sink(LoggerConfig::default().with_capacity(2), Box::new(sink.clone())).unwrap();

    let mut accepted = 0u64;
    for i in 0..1_000 {
        if logger.log(i) {
            accepted += 1;
        }
    }
    let stats = logger.shutdown().unwrap();
    assert_eq!(stats.written, accepted);
    assert_eq!(stats.written + stats.dropped, 1_000);
    assert_eq!(sink.lines().len() as u64, accepted);
}

#[test]
fn file_sink_receives_flushed_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeq.log");
    let config = LoggerConfig::default().with_sink(SinkConfig::File {
        path: path.clone(),
        append: false,
    });

    let logger = Logger::start(config).unwrap();
    logger.log("first");
    logger.log("second");
    drop(logger);

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "first\nsecond\n");
}

#[test]
fn unopenable_file_sink_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoggerConfig::default().with_sink(SinkConfig::File {
        path: dir.path().join("missing").join("pipeq.log"),
        append: true,
    });
    assert!(matches!(Logger::start(config), Err(LoggerError::Config(_))));
}
