use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config as cfg;
use serde::{Deserialize, Serialize};

use crate::sink::{Sink, WriterSink};

/// Where drained log lines end up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    Stdout,
    Stderr,
    File {
        path: PathBuf,
        /// Append to an existing file instead of truncating it
        #[serde(default = "SinkConfig::default_append")]
        append: bool,
    },
    /// Accept and discard every line
    Null,
}

impl SinkConfig {
    fn default_append() -> bool {
        true
    }

    /// Open the sink this configuration describes.
    pub fn build(&self) -> Result<Box<dyn Sink>> {
        let sink: Box<dyn Sink> = match self {
            SinkConfig::Stdout => Box::new(WriterSink::new(std::io::stdout())),
            SinkConfig::Stderr => Box::new(WriterSink::new(std::io::stderr())),
            SinkConfig::File { path, append } => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(*append)
                    .truncate(!*append)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                Box::new(WriterSink::new(std::io::BufWriter::new(file)))
            }
            SinkConfig::Null => Box::new(WriterSink::new(std::io::sink())),
        };
        Ok(sink)
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::Stdout
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Messages held before `log` starts dropping
    #[serde(default = "LoggerConfig::default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub sink: SinkConfig,
    /// Prefix each line with an RFC 3339 timestamp
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default = "LoggerConfig::default_thread_name")]
    pub thread_name: String,
}

impl LoggerConfig {
    fn default_capacity() -> usize {
        10_000
    }

    fn default_thread_name() -> String {
        "pipeq-logger".to_string()
    }

    /// Layered load: optional TOML file, then `PIPEQ_LOGGER__*` environment
    /// variables (e.g. `PIPEQ_LOGGER__CAPACITY=500`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = cfg::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                cfg::File::from(path)
                    .format(cfg::FileFormat::Toml)
                    .required(true),
            );
        }
        let config = builder
            .add_source(cfg::Environment::with_prefix("PIPEQ_LOGGER").separator("__"))
            .build()
            .context("building logger configuration")?
            .try_deserialize()
            .context("deserializing logger configuration")?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing logger configuration")
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_sink(mut self, sink: SinkConfig) -> Self {
        self.sink = sink;
        self
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
            sink: SinkConfig::default(),
            timestamps: false,
            thread_name: Self::default_thread_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_empty_document() {
        let parsed = LoggerConfig::from_toml_str("").unwrap();
        assert_eq!(parsed, LoggerConfig::default());
        assert_eq!(parsed.capacity, 10_000);
        assert_eq!(parsed.sink, SinkConfig::Stdout);
    }

    #[test]
    fn parses_file_sink() {
        let parsed = LoggerConfig::from_toml_str(
            r#"
            capacity = 32
            timestamps = true

            [sink]
            kind = "file"
            path = "/tmp/pipeq.log"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.capacity, 32);
        assert!(parsed.timestamps);
        assert_eq!(
            parsed.sink,
            SinkConfig::File {
                path: PathBuf::from("/tmp/pipeq.log"),
                append: true
            }
        );
    }

    #[test]
    fn rejects_unknown_sink() {
        let err = LoggerConfig::from_toml_str("[sink]\nkind = \"syslog\"\n").unwrap_err();
        assert!(err.to_string().contains("parsing logger configuration"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "capacity = 7\nthread_name = \"drain\"\n[sink]\nkind = \"null\"").unwrap();

        let loaded = LoggerConfig::load(Some(file.path())).unwrap();
        assert_eq!(loaded.capacity, 7);
        assert_eq!(loaded.thread_name, "drain");
        assert_eq!(loaded.sink, SinkConfig::Null);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LoggerConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
