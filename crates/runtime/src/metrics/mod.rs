//! Host resource sampling for the inference pipeline.
//!
//! [`MetricsCollector`] samples CPU, RAM and accelerator availability and
//! stamps each pipeline event (preprocessing, inference, model loading) with a
//! fresh sample before it reaches the [`EventSink`](crate::telemetry::EventSink).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sysinfo::System;

use crate::telemetry::{Severity, TelemetryEvent};

/// Usage above this percentage marks the host as `warning`.
pub const HEALTH_WARNING_PERCENT: f64 = 90.0;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Point-in-time host sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub cpu_count: usize,
    pub ram_total_gb: f64,
    pub ram_used_gb: f64,
    pub ram_available_gb: f64,
    pub ram_percent: f64,
    pub gpu_available: bool,
    pub gpu_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
}

/// Health verdict over one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub warnings: Vec<String>,
    pub metrics: SystemMetrics,
    pub timestamp: DateTime<Utc>,
}

impl SystemHealth {
    pub fn evaluate(metrics: SystemMetrics) -> Self {
        let mut warnings = Vec::new();
        if metrics.cpu_percent > HEALTH_WARNING_PERCENT {
            warnings.push("CPU usage > 90%".to_string());
        }
        if metrics.ram_percent > HEALTH_WARNING_PERCENT {
            warnings.push("RAM usage > 90%".to_string());
        }

        let status = if warnings.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Warning
        };

        Self {
            status,
            warnings,
            metrics,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Samples host resources and builds metric-stamped pipeline events.
pub struct MetricsCollector {
    system: Mutex<System>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        // Primes the CPU counters so the first real sample has a baseline.
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
        }
    }

    /// Take a fresh host sample.
    pub fn collect(&self) -> SystemMetrics {
        let mut system = self.system.lock();
        system.refresh_cpu();
        system.refresh_memory();

        let total = system.total_memory() as f64;
        let used = system.used_memory() as f64;
        let available = system.available_memory() as f64;
        let ram_percent = if total > 0.0 { used / total * 100.0 } else { 0.0 };
        let (gpu_available, gpu_name) = probe_gpu();

        SystemMetrics {
            timestamp: Utc::now(),
            cpu_percent: round2(system.global_cpu_info().cpu_usage() as f64),
            cpu_count: system.cpus().len(),
            ram_total_gb: round2(total / BYTES_PER_GB),
            ram_used_gb: round2(used / BYTES_PER_GB),
            ram_available_gb: round2(available / BYTES_PER_GB),
            ram_percent: round2(ram_percent),
            gpu_available,
            gpu_name,
        }
    }

    pub fn system_health(&self) -> SystemHealth {
        SystemHealth::evaluate(self.collect())
    }

    /// `inference` event for one forward pass.
    pub fn inference_event(
        &self,
        model_name: &str,
        elapsed_ms: f64,
        error: Option<&str>,
    ) -> TelemetryEvent {
        TelemetryEvent::new("inference")
            .with_severity(severity_for(error))
            .with("model", model_name)
            .with("elapsed_ms", round2(elapsed_ms))
            .with("success", error.is_none())
            .with("error", error.map(str::to_string))
            .merge(self.sample_value())
    }

    /// `preprocessing` event for one normalization + tokenization pass.
    pub fn preprocessing_event(
        &self,
        text_length: usize,
        token_count: usize,
        processing_time_ms: f64,
        model_name: Option<&str>,
    ) -> TelemetryEvent {
        let mut event = TelemetryEvent::new("preprocessing")
            .with("text_length", text_length as u64)
            .with("token_count", token_count as u64)
            .with("processing_time_ms", round2(processing_time_ms))
            .merge(self.sample_value());
        if let Some(model) = model_name {
            event = event.with("model", model);
        }
        event
    }

    /// `model_loading` event for one loader resolution.
    pub fn model_loading_event(
        &self,
        model_name: &str,
        load_time_ms: f64,
        source: Option<&str>,
        error: Option<&str>,
    ) -> TelemetryEvent {
        TelemetryEvent::new("model_loading")
            .with_severity(severity_for(error))
            .with("model", model_name)
            .with("load_time_ms", round2(load_time_ms))
            .with("success", error.is_none())
            .with("source", source.map(str::to_string))
            .with("error", error.map(str::to_string))
            .merge(self.sample_value())
    }

    fn sample_value(&self) -> Value {
        serde_json::to_value(self.collect()).unwrap_or(Value::Null)
    }
}

fn severity_for(error: Option<&str>) -> Severity {
    if error.is_some() {
        Severity::Error
    } else {
        Severity::Info
    }
}

#[cfg(feature = "candle-backend")]
fn probe_gpu() -> (bool, Option<String>) {
    if candle_core::utils::cuda_is_available() {
        (true, Some("cuda:0".to_string()))
    } else if candle_core::utils::metal_is_available() {
        (true, Some("metal".to_string()))
    } else {
        (false, None)
    }
}

#[cfg(not(feature = "candle-backend"))]
fn probe_gpu() -> (bool, Option<String>) {
    (false, None)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
