//! Process-wide telemetry counters, exported as Prometheus metrics when the
//! `prometheus` feature is enabled.

// std
use std::sync::{
	OnceLock,
	atomic::{AtomicU64, Ordering},
};
// crates.io
use metrics::Label;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use smallvec::SmallVec;
// self
use crate::{
	_prelude::*,
	model::{EndReason, Environment},
};

type LabelSet = SmallVec<[Label; 4]>;

const METRIC_TICKS_TOTAL: &str = "scheduler_ticks_total";
const METRIC_POLLS_TOTAL: &str = "scheduler_polls_total";
const METRIC_READINGS_DELIVERED_TOTAL: &str = "scheduler_readings_delivered_total";
const METRIC_ALERTS_SENT_TOTAL: &str = "scheduler_alerts_sent_total";
const METRIC_PUSHES_TOTAL: &str = "scheduler_pushes_total";
const METRIC_TERMINATIONS_TOTAL: &str = "scheduler_terminations_total";
const METRIC_IN_FLIGHT: &str = "scheduler_activities_in_flight";

/// Shared Prometheus handle installed by [`install_default_exporter`].
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide accumulator backing the `/status` endpoint.
static SCHEDULER_METRICS: OnceLock<Arc<SchedulerMetrics>> = OnceLock::new();

/// Access the process-wide accumulator, creating it on first use.
pub fn global() -> Arc<SchedulerMetrics> {
	SCHEDULER_METRICS.get_or_init(SchedulerMetrics::new).clone()
}

/// Thread-safe accumulator for the counters surfaced by a lightweight
/// `/status` endpoint, independent of whether Prometheus export is enabled.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
	ticks: AtomicU64,
	polls: AtomicU64,
	readings_delivered: AtomicU64,
	alerts_sent: AtomicU64,
	pushes_sent: AtomicU64,
	pushes_failed: AtomicU64,
	terminations: AtomicU64,
}
impl SchedulerMetrics {
	/// Create a new, zeroed accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record that a tick loop iteration ran.
	pub fn record_tick(&self) {
		self.ticks.fetch_add(1, Ordering::Relaxed);
	}

	/// Record that one activity was polled, regardless of outcome.
	pub fn record_poll(&self) {
		self.polls.fetch_add(1, Ordering::Relaxed);
	}

	/// Record that a fresh reading was delivered to a Live Activity.
	pub fn record_reading_delivered(&self) {
		self.readings_delivered.fetch_add(1, Ordering::Relaxed);
	}

	/// Record that an alert accompanied a delivered reading.
	pub fn record_alert_sent(&self) {
		self.alerts_sent.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a push attempt outcome.
	pub fn record_push(&self, sent: bool) {
		if sent {
			self.pushes_sent.fetch_add(1, Ordering::Relaxed);
		} else {
			self.pushes_failed.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Record that an activity's lifecycle ended.
	pub fn record_termination(&self) {
		self.terminations.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
		SchedulerMetricsSnapshot {
			ticks: self.ticks.load(Ordering::Relaxed),
			polls: self.polls.load(Ordering::Relaxed),
			readings_delivered: self.readings_delivered.load(Ordering::Relaxed),
			alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
			pushes_sent: self.pushes_sent.load(Ordering::Relaxed),
			pushes_failed: self.pushes_failed.load(Ordering::Relaxed),
			terminations: self.terminations.load(Ordering::Relaxed),
		}
	}
}

/// Read-only snapshot of process-wide telemetry counters.
#[derive(Clone, Debug, Serialize)]
pub struct SchedulerMetricsSnapshot {
	/// Total tick loop iterations run.
	pub ticks: u64,
	/// Total activities polled.
	pub polls: u64,
	/// Total fresh readings delivered.
	pub readings_delivered: u64,
	/// Total alerts sent alongside a delivered reading.
	pub alerts_sent: u64,
	/// Total push attempts that succeeded.
	pub pushes_sent: u64,
	/// Total push attempts that failed.
	pub pushes_failed: u64,
	/// Total activities whose lifecycle ended.
	pub terminations: u64,
}
impl SchedulerMetricsSnapshot {
	/// Ratio of failed pushes over all push attempts.
	pub fn push_failure_rate(&self) -> f64 {
		let total = self.pushes_sent + self.pushes_failed;

		if total == 0 { 0.0 } else { self.pushes_failed as f64 / total as f64 }
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record that a tick loop iteration ran and claimed `due` activities.
pub fn record_tick(due: usize) {
	metrics::counter!(METRIC_TICKS_TOTAL).increment(1);
	metrics::gauge!(METRIC_IN_FLIGHT).increment(due as f64);
	global().record_tick();
}

/// Record that `count` activities finished their processing cycle this tick.
pub fn record_tick_drained(count: usize) {
	metrics::gauge!(METRIC_IN_FLIGHT).decrement(count as f64);
}

/// Record a poll outcome: `"delivered"`, `"empty"`, `"stale"`, `"decoding_error"`,
/// or `"generic_error"`.
pub fn record_poll(outcome: &'static str) {
	metrics::counter!(METRIC_POLLS_TOTAL, outcome_labels(outcome).iter()).increment(1);
	global().record_poll();
}

/// Record that a fresh reading was delivered, optionally accompanied by an
/// alert.
pub fn record_reading_delivered(environment: Environment, alerted: bool) {
	metrics::counter!(METRIC_READINGS_DELIVERED_TOTAL, environment_labels(environment).iter())
		.increment(1);
	global().record_reading_delivered();

	if alerted {
		metrics::counter!(METRIC_ALERTS_SENT_TOTAL, environment_labels(environment).iter())
			.increment(1);
		global().record_alert_sent();
	}
}

/// Record a push attempt outcome.
pub fn record_push(environment: Environment, sent: bool) {
	let mut labels = environment_labels(environment);

	labels.push(Label::new("result", if sent { "sent" } else { "failed" }));

	metrics::counter!(METRIC_PUSHES_TOTAL, labels.iter()).increment(1);
	global().record_push(sent);
}

/// Record that an activity's lifecycle ended, tagged by [`EndReason`].
pub fn record_termination(reason: EndReason) {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("reason", reason.to_string()));

	metrics::counter!(METRIC_TERMINATIONS_TOTAL, labels.iter()).increment(1);
	global().record_termination();
}

fn outcome_labels(outcome: &'static str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("outcome", outcome));

	labels
}

fn environment_labels(environment: Environment) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("environment", environment.as_str()));

	labels
}

#[cfg(test)]
mod tests {
	// std
	use std::borrow::Borrow;
	// crates.io
	use metrics_util::{
		CompositeKey, MetricKind,
		debugging::{DebugValue, DebuggingRecorder},
	};
	// self
	use super::*;

	fn capture_metrics<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
	where
		F: FnOnce(),
	{
		let recorder = DebuggingRecorder::new();
		let snapshotter = recorder.snapshotter();

		metrics::with_local_recorder(&recorder, f);

		snapshotter.snapshot().into_vec().into_iter().map(|(key, _, _, value)| (key, value)).collect()
	}

	fn counter_value(
		snapshot: &[(CompositeKey, DebugValue)],
		name: &str,
		labels: &[(&str, &str)],
	) -> u64 {
		snapshot
			.iter()
			.find_map(|(key, value)| {
				(key.kind() == MetricKind::Counter
					&& Borrow::<str>::borrow(key.key().name()) == name
					&& labels_match(key, labels))
				.then(|| match value {
					DebugValue::Counter(value) => *value,
					_ => 0,
				})
			})
			.unwrap_or(0)
	}

	fn labels_match(key: &CompositeKey, expected: &[(&str, &str)]) -> bool {
		let mut labels: Vec<_> = key.key().labels().map(|label| (label.key(), label.value())).collect();

		labels.sort_unstable();

		let mut expected_sorted: Vec<_> = expected.to_vec();

		expected_sorted.sort_unstable();

		labels.len() == expected_sorted.len()
			&& labels
				.into_iter()
				.zip(expected_sorted.into_iter())
				.all(|((lk, lv), (ek, ev))| lk == ek && lv == ev)
	}

	#[test]
	fn records_poll_outcomes() {
		let snapshot = capture_metrics(|| {
			record_poll("delivered");
			record_poll("delivered");
			record_poll("empty");
		});

		assert_eq!(
			counter_value(&snapshot, "scheduler_polls_total", &[("outcome", "delivered")]),
			2
		);
		assert_eq!(counter_value(&snapshot, "scheduler_polls_total", &[("outcome", "empty")]), 1);
	}

	#[test]
	fn records_pushes_and_terminations_by_label() {
		let snapshot = capture_metrics(|| {
			record_push(Environment::Production, true);
			record_push(Environment::Production, false);
			record_termination(EndReason::MaxDuration);
		});

		assert_eq!(
			counter_value(
				&snapshot,
				"scheduler_pushes_total",
				&[("environment", "production"), ("result", "sent")]
			),
			1
		);
		assert_eq!(
			counter_value(
				&snapshot,
				"scheduler_pushes_total",
				&[("environment", "production"), ("result", "failed")]
			),
			1
		);
		assert_eq!(
			counter_value(&snapshot, "scheduler_terminations_total", &[("reason", "maxDuration")]),
			1
		);
	}

	#[test]
	fn in_process_accumulator_tracks_push_failure_rate() {
		let metrics = SchedulerMetrics::new();

		metrics.record_push(true);
		metrics.record_push(true);
		metrics.record_push(false);

		let snapshot = metrics.snapshot();

		assert_eq!(snapshot.pushes_sent, 2);
		assert_eq!(snapshot.pushes_failed, 1);
		assert!((snapshot.push_failure_rate() - (1.0 / 3.0)).abs() < 1e-9);
	}
}
