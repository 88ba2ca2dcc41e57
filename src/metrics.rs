//! Outbox observability collaborator.
//!
//! The store and the sweeper only talk to [`OutboxMetrics`]; the
//! Prometheus implementation is built at startup and shared with the
//! `/metrics` endpoint.

use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::models::OutboxKind;

const NAMESPACE: &str = "library";
const SUBSYSTEM: &str = "outbox";

/// Label used for stored kind tags that match no [`OutboxKind`].
pub const UNKNOWN_KIND: &str = "unknown";

/// Maps a stored kind tag to a bounded metric label.
pub fn kind_label(tag: &str) -> &'static str {
    tag.parse::<OutboxKind>()
        .map(|kind| kind.as_str())
        .unwrap_or(UNKNOWN_KIND)
}

pub trait OutboxMetrics: Send + Sync {
    fn record_enqueued(&self, kind: &str);
    fn record_delivered(&self, kind: &str, elapsed: Duration);
    fn record_failed(&self, kind: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOutboxMetrics;

impl OutboxMetrics for NoopOutboxMetrics {
    fn record_enqueued(&self, _kind: &str) {}
    fn record_delivered(&self, _kind: &str, _elapsed: Duration) {}
    fn record_failed(&self, _kind: &str) {}
}

#[derive(Debug)]
pub struct PrometheusOutboxMetrics {
    created: IntCounterVec,
    processed: IntCounterVec,
    failed: IntCounterVec,
    duration: HistogramVec,
    registry: Registry,
}

impl PrometheusOutboxMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let created = IntCounterVec::new(
            Opts::new("tasks_created_total", "Outbox tasks created, per kind")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
            &["kind"],
        )?;
        let processed = IntCounterVec::new(
            Opts::new("tasks_processed_total", "Outbox tasks delivered successfully, per kind")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
            &["kind"],
        )?;
        let failed = IntCounterVec::new(
            Opts::new("tasks_failed_total", "Outbox tasks whose delivery failed, per kind")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
            &["kind"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "task_processing_duration_seconds",
                "Time spent delivering one outbox task, per kind",
            )
            .namespace(NAMESPACE)
            .subsystem(SUBSYSTEM),
            &["kind"],
        )?;

        let registry = Registry::new();
        registry.register(Box::new(created.clone()))?;
        registry.register(Box::new(processed.clone()))?;
        registry.register(Box::new(failed.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        for kind in OutboxKind::ALL {
            failed.with_label_values(&[kind.as_str()]).reset();
        }
        failed.with_label_values(&[UNKNOWN_KIND]).reset();

        Ok(Self {
            created,
            processed,
            failed,
            duration,
            registry,
        })
    }

    /// Renders every collector in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl OutboxMetrics for PrometheusOutboxMetrics {
    fn record_enqueued(&self, kind: &str) {
        self.created.with_label_values(&[kind]).inc();
    }

    fn record_delivered(&self, kind: &str, elapsed: Duration) {
        self.processed.with_label_values(&[kind]).inc();
        self.duration
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    fn record_failed(&self, kind: &str) {
        self.failed.with_label_values(&[kind]).inc();
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_counters_are_exposed_before_any_failure() {
        let metrics = PrometheusOutboxMetrics::new().unwrap();
        let text = metrics.encode().unwrap();

        assert!(text.contains(r#"library_outbox_tasks_failed_total{kind="book"} 0"#));
        assert!(text.contains(r#"library_outbox_tasks_failed_total{kind="author"} 0"#));
        assert!(text.contains(r#"library_outbox_tasks_failed_total{kind="unknown"} 0"#));
    }

    #[test]
    fn unrecognised_tags_share_one_label() {
        assert_eq!(kind_label("book"), "book");
        assert_eq!(kind_label("author"), "author");
        assert_eq!(kind_label("magazine"), UNKNOWN_KIND);
        assert_eq!(kind_label("newsletter"), UNKNOWN_KIND);
    }

    #[test]
    fn deliveries_update_counter_and_histogram() {
        let metrics = PrometheusOutboxMetrics::new().unwrap();
        metrics.record_enqueued("book");
        metrics.record_delivered("book", Duration::from_millis(20));
        metrics.record_failed("author");

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"library_outbox_tasks_created_total{kind="book"} 1"#));
        assert!(text.contains(r#"library_outbox_tasks_processed_total{kind="book"} 1"#));
        assert!(text.contains(r#"library_outbox_tasks_failed_total{kind="author"} 1"#));
        assert!(text.contains(r#"library_outbox_task_processing_duration_seconds_count{kind="book"} 1"#));
    }
}
