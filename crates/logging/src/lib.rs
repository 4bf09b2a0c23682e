//! Turnwire Logging
//!
//! One `tracing` subscriber for every Turnwire frontend. Formatted lines go
//! to the installed [`LogSink`] (a mobile log view, a test collector) or to
//! stderr when no sink is installed.

use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Verbosity used when `RUST_LOG` is not set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Level for a count of `-v` flags
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// Receives one formatted log line per event, without the trailing newline
pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

static SINK: Lazy<RwLock<Option<Arc<dyn LogSink>>>> = Lazy::new(|| RwLock::new(None));

/// Route log lines to `sink` instead of stderr
pub fn set_sink(sink: Arc<dyn LogSink>) {
    *SINK.write() = Some(sink);
}

/// Go back to writing log lines to stderr
pub fn clear_sink() {
    *SINK.write() = None;
}

/// Subscriber with an `EnvFilter` (from `RUST_LOG`, else `level`) and a
/// formatter writing through the sink.
pub fn subscriber(level: LogLevel) -> impl Subscriber + Send + Sync {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    filtered_subscriber(filter)
}

fn filtered_subscriber(filter: EnvFilter) -> impl Subscriber + Send + Sync {
    tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(SinkWriter),
    )
}

/// Install the global subscriber. Fails if one is already installed.
pub fn try_init(level: LogLevel) -> Result<(), TryInitError> {
    subscriber(level).try_init()
}

/// Install the global subscriber, keeping any that is already installed
pub fn init(level: LogLevel) {
    let _ = try_init(level);
}

/// `MakeWriter` that hands out one [`LineWriter`] per event
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkWriter;

impl<'a> MakeWriter<'a> for SinkWriter {
    type Writer = LineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LineWriter { buf: Vec::new() }
    }
}

/// Buffers one event and forwards it when dropped
pub struct LineWriter {
    buf: Vec<u8>,
}

impl Write for LineWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let sink = SINK.read().clone();
        forward(sink.as_deref(), &self.buf);
    }
}

fn forward(sink: Option<&dyn LogSink>, buf: &[u8]) {
    match sink {
        Some(sink) => {
            let text = String::from_utf8_lossy(buf);
            for line in text.lines().filter(|l| !l.is_empty()) {
                sink.write_line(line);
            }
        }
        None => {
            let _ = io::stderr().lock().write_all(buf);
        }
    }
}
