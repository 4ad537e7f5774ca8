//! Structured pipeline events and diagnostic logging setup.
//!
//! Components never configure logging themselves. The host calls
//! [`init_tracing`] once at process start and hands an [`EventSink`] to each
//! component constructor. Supported sinks:
//! - **Tracing**: re-emits events into the `tracing` stream
//! - **File**: JSON lines with size-based rotation
//! - **Memory**: in-process buffer for tests and introspection
//!
//! Multiple sinks can run simultaneously via [`CompositeSink`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

pub mod file;

pub use file::RotatingFileSink;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while recording an event.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sink configuration error: {0}")]
    ConfigError(String),
}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Event severity, mapped onto `tracing` levels by [`TracingSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// One structured pipeline event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_type: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl TelemetryEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            severity: Severity::Info,
            timestamp: Utc::now(),
            payload: Map::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Add one payload field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Merge every field of a JSON object into the payload. Non-object values
    /// are stored under `data`.
    pub fn merge(mut self, value: Value) -> Self {
        match value {
            Value::Object(map) => self.payload.extend(map),
            Value::Null => {}
            other => {
                self.payload.insert("data".to_string(), other);
            }
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

// ---------------------------------------------------------------------------
// Sink trait
// ---------------------------------------------------------------------------

/// Destination for structured pipeline events.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: &TelemetryEvent) -> Result<(), TelemetryError>;

    /// Flush buffered data.
    fn flush(&self) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Record an event, logging rather than propagating a sink failure.
pub fn emit(sink: &dyn EventSink, event: TelemetryEvent) {
    if let Err(e) = sink.record(&event) {
        tracing::warn!("Failed to record {} event: {}", event.event_type, e);
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Forwards events into the `tracing` stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        let payload = Value::Object(event.payload.clone());
        match event.severity {
            Severity::Debug => {
                tracing::debug!(event_type = %event.event_type, payload = %payload, "pipeline event")
            }
            Severity::Info => {
                tracing::info!(event_type = %event.event_type, payload = %payload, "pipeline event")
            }
            Severity::Warning => {
                tracing::warn!(event_type = %event.event_type, payload = %payload, "pipeline event")
            }
            Severity::Error => {
                tracing::error!(event_type = %event.event_type, payload = %payload, "pipeline event")
            }
        }
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    /// Events of one type, oldest first.
    pub fn events_of(&self, event_type: &str) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Fans events out to several sinks.
///
/// Every sink sees every event; a failing sink is logged and skipped.
pub struct CompositeSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for CompositeSink {
    fn record(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        let mut last_error: Option<TelemetryError> = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(event) {
                tracing::warn!("Event sink failed: {}", e);
                last_error = Some(e);
            }
        }
        if self.sinks.len() == 1 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), TelemetryError> {
        for sink in &self.sinks {
            if let Err(e) = sink.flush() {
                tracing::warn!("Event sink flush failed: {}", e);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Factory and host setup
// ---------------------------------------------------------------------------

/// Build the sink (or composite) described by the logging configuration.
pub fn create_sink(config: &LoggingConfig) -> Result<Arc<dyn EventSink>, TelemetryError> {
    let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(TracingSink)];

    if let Some(ref event_log) = config.event_log {
        let file_sink = RotatingFileSink::new(
            &event_log.path,
            event_log.max_bytes,
            event_log.backup_count,
        )?;
        sinks.push(Arc::new(file_sink));
    }

    if sinks.len() == 1 {
        Ok(sinks.remove(0))
    } else {
        Ok(Arc::new(CompositeSink::new(sinks)))
    }
}

/// Install the global `tracing` subscriber.
///
/// Logs go to stderr. `RUST_LOG` takes precedence over `config.level`.
/// Returns `false` when a subscriber was already installed, leaving it in
/// place.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    installed.is_ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
