//! Background log-draining worker for pipeq pipelines
//!
//! - `config`: Logger and sink configuration (TOML file + `PIPEQ_LOGGER__*` env)
//! - `sink`: Line sinks the worker writes to
//! - `logger`: The non-blocking front end and its worker thread

pub mod config;
pub mod logger;
pub mod sink;

pub use config::{LoggerConfig, SinkConfig};
pub use logger::{Logger, LoggerError, LoggerStats};
pub use sink::{MemorySink, Sink, WriterSink};
