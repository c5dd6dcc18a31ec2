use std::time::Duration;

use drover_core::{MetricsBackend, Outcome};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
    proto::MetricFamily,
};

const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0];

#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    started: IntCounterVec,
    completed: IntCounterVec,
    duration: HistogramVec,
    conflicts: IntCounterVec,
    dropped: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let started = IntCounterVec::new(
            Opts::new("drover_tasks_started_total", "Workloads spawned"),
            &["task_type"],
        )?;
        let completed = IntCounterVec::new(
            Opts::new("drover_tasks_completed_total", "Executions finished, by outcome"),
            &["task_type", "outcome"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("drover_task_duration_seconds", "Workload wall time")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["task_type"],
        )?;
        let conflicts = IntCounterVec::new(
            Opts::new(
                "drover_lock_conflicts_total",
                "Executions skipped because another worker held the mutex",
            ),
            &["task_type"],
        )?;
        let dropped = IntCounterVec::new(
            Opts::new(
                "drover_events_dropped_total",
                "Task events dropped on a full scheduler queue",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(started.clone()))?;
        registry.register(Box::new(completed.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(conflicts.clone()))?;
        registry.register(Box::new(dropped.clone()))?;

        Ok(Self {
            registry,
            started,
            completed,
            duration,
            conflicts,
            dropped,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Current state in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl MetricsBackend for PrometheusMetrics {
    fn task_started(&self, task_type: &str) {
        self.started.with_label_values(&[task_type]).inc();
    }

    fn task_completed(&self, task_type: &str, outcome: Outcome, duration: Duration) {
        self.completed
            .with_label_values(&[task_type, outcome.as_str()])
            .inc();
        // lock contention never ran anything
        if outcome != Outcome::LockBusy {
            self.duration
                .with_label_values(&[task_type])
                .observe(duration.as_secs_f64());
        }
    }

    fn lock_conflict(&self, task_type: &str) {
        self.conflicts.with_label_values(&[task_type]).inc();
    }

    fn event_dropped(&self, kind: &str) {
        self.dropped.with_label_values(&[kind]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_label() {
        let m = PrometheusMetrics::new().unwrap();
        m.task_started("image");
        m.task_started("image");
        m.task_completed("image", Outcome::Success, Duration::from_millis(200));
        m.task_completed("image", Outcome::Timeout, Duration::from_secs(1));
        m.lock_conflict("video");
        m.event_dropped("kill");

        assert_eq!(m.started.with_label_values(&["image"]).get(), 2);
        assert_eq!(
            m.completed.with_label_values(&["image", "timeout"]).get(),
            1
        );
        assert_eq!(m.conflicts.with_label_values(&["video"]).get(), 1);
        assert_eq!(m.dropped.with_label_values(&["kill"]).get(), 1);
        assert_eq!(
            m.duration.with_label_values(&["image"]).get_sample_count(),
            2
        );
    }

    #[test]
    fn lock_busy_is_not_timed() {
        let m = PrometheusMetrics::new().unwrap();
        m.task_completed("image", Outcome::LockBusy, Duration::ZERO);
        assert_eq!(
            m.duration.with_label_values(&["image"]).get_sample_count(),
            0
        );
    }

    #[test]
    fn text_exposition_names_every_family() {
        let m = PrometheusMetrics::new().unwrap();
        m.task_started("image");
        m.task_completed("image", Outcome::Failure, Duration::from_millis(5));
        m.lock_conflict("image");
        m.event_dropped("save");

        let text = m.encode_text().unwrap();
        assert!(text.contains("drover_tasks_started_total{task_type=\"image\"} 1"));
        assert!(text.contains("drover_tasks_completed_total"));
        assert!(text.contains("drover_task_duration_seconds_bucket"));
        assert!(text.contains("drover_lock_conflicts_total"));
        assert!(text.contains("drover_events_dropped_total{kind=\"save\"} 1"));
    }

    #[test]
    fn instances_do_not_share_registries() {
        let a = PrometheusMetrics::new().unwrap();
        let b = PrometheusMetrics::new().unwrap();
        a.task_started("image");
        assert_eq!(b.started.with_label_values(&["image"]).get(), 0);
    }
}
