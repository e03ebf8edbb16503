//! Metric declarations.
//!
//! Metrics go through the `metrics` facade. Nothing is recorded unless a
//! recorder is installed, which the `prometheus` feature does on request.

use metrics::{describe_counter, describe_gauge, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic counter.
    Counter,
    /// Value that goes up and down.
    Gauge,
}

/// A metric name with its description.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Metric name.
    pub name: &'static str,
    /// Counter or gauge.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement.
    pub unit: Unit,
    /// Label keys the metric is recorded with.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Declare a counter.
    pub const fn counter(name: &'static str, description: &'static str) -> Self {
        Metric {
            name,
            kind: MetricKind::Counter,
            description,
            unit: Unit::Count,
            labels: &[],
        }
    }

    /// Declare a gauge.
    pub const fn gauge(name: &'static str, description: &'static str) -> Self {
        Metric {
            name,
            kind: MetricKind::Gauge,
            description,
            unit: Unit::Count,
            labels: &[],
        }
    }

    /// Set the expected label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register the description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Gauge => describe_gauge!(self.name, self.unit, self.description),
        }
    }
}

/// All metrics recorded by the bridge.
pub mod metric_defs {
    use super::Metric;

    /// ID and WAIT frames received.
    pub const FRAMES_CONTROL: Metric =
        Metric::counter("cm160.frames.control", "Handshake frames received");

    /// Checksum-valid data frames received.
    pub const FRAMES_DATA: Metric = Metric::counter("cm160.frames.data", "Data frames decoded");

    /// Windows dropped while resynchronizing.
    pub const FRAMES_DISCARDED: Metric =
        Metric::counter("cm160.frames.discarded", "Frame windows that failed to decode")
            .with_labels(&["reason"]);

    /// Readings handed to the sink.
    pub const READINGS_PUBLISHED: Metric =
        Metric::counter("cm160.readings.published", "Readings published");

    /// Data frames held back before the handshake completed.
    pub const READINGS_SUPPRESSED: Metric =
        Metric::counter("cm160.readings.suppressed", "History frames held back before live data");

    /// Device sessions opened.
    pub const SESSIONS_OPENED: Metric = Metric::counter("cm160.sessions.opened", "Device sessions opened");

    /// Device sessions torn down.
    pub const SESSIONS_CLOSED: Metric =
        Metric::counter("cm160.sessions.closed", "Device sessions torn down").with_labels(&["reason"]);

    /// Devices currently attached.
    pub const SESSIONS_ACTIVE: Metric = Metric::gauge("cm160.sessions.active", "Devices currently attached");

    /// Every metric above.
    pub const ALL: &[Metric] = &[
        FRAMES_CONTROL,
        FRAMES_DATA,
        FRAMES_DISCARDED,
        READINGS_PUBLISHED,
        READINGS_SUPPRESSED,
        SESSIONS_OPENED,
        SESSIONS_CLOSED,
        SESSIONS_ACTIVE,
    ];
}

/// Describe every metric. Call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install the Prometheus exporter on `addr`.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(addr: std::net::SocketAddr) -> Result<(), String> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_unique() {
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
        assert!(names.iter().all(|n| n.starts_with("cm160.")));
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
        assert_eq!(metric_defs::SESSIONS_CLOSED.labels, &["reason"]);
    }
}
