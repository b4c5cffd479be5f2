//! Result-metrics assembly, guardrail validation, and optional recorder emission.

// std
use std::collections::HashMap;
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
#[cfg(feature = "metrics")] use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
#[cfg(feature = "metrics")] use smallvec::SmallVec;
// self
#[cfg(feature = "prometheus")] use crate::_prelude::*;
use crate::{
	breaker::BreakerSnapshot,
	buffer::BufferMetrics,
	cache::CacheStats,
};

#[cfg(feature = "metrics")]
type LabelSet = SmallVec<[Label; 4]>;

#[cfg(feature = "metrics")]
const METRIC_ATTEMPTS_TOTAL: &str = "resilient_request_attempts_total";
#[cfg(feature = "metrics")]
const METRIC_REQUESTS_TOTAL: &str = "resilient_request_requests_total";
#[cfg(feature = "metrics")]
const METRIC_CACHE_EVENTS_TOTAL: &str = "resilient_request_cache_events_total";
#[cfg(feature = "metrics")]
const METRIC_BREAKER_TRANSITIONS_TOTAL: &str = "resilient_request_breaker_transitions_total";
#[cfg(feature = "metrics")]
const METRIC_ATTEMPT_DURATION: &str = "resilient_request_attempt_duration_seconds";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Acceptable band for one metric: absolute bounds plus an expected value with tolerance.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Guardrail {
	/// Values below this bound are anomalous.
	pub min: Option<f64>,
	/// Values above this bound are anomalous.
	pub max: Option<f64>,
	/// Expected value; deviations beyond `tolerance` are anomalous.
	pub expected: Option<f64>,
	/// Permitted absolute deviation around `expected`.
	pub tolerance: f64,
}

/// How a metric value violated its guardrail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
	/// Value fell below the configured minimum.
	BelowMinimum,
	/// Value exceeded the configured maximum.
	AboveMaximum,
	/// Value deviated from the expected value by more than the tolerance.
	OutsideExpected,
}

/// Severity attached to a guardrail anomaly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
	/// Informational deviation.
	Info,
	/// Deviation from the expected value.
	Warning,
	/// Hard bound violation.
	Critical,
}

/// One guardrail violation; never raised, only attached to metric snapshots.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuardrailAnomaly {
	/// Name of the violated metric.
	pub metric: String,
	/// Observed value.
	pub value: f64,
	/// Violation category.
	pub kind: AnomalyKind,
	/// Assigned severity.
	pub severity: AnomalySeverity,
}

/// Evaluate one metric value against its guardrail.
pub fn evaluate_guardrail(metric: &str, value: f64, guardrail: &Guardrail) -> Vec<GuardrailAnomaly> {
	let mut anomalies = Vec::new();

	if let Some(min) = guardrail.min
		&& value < min
	{
		anomalies.push(GuardrailAnomaly {
			metric: metric.to_string(),
			value,
			kind: AnomalyKind::BelowMinimum,
			severity: AnomalySeverity::Critical,
		});
	}
	if let Some(max) = guardrail.max
		&& value > max
	{
		anomalies.push(GuardrailAnomaly {
			metric: metric.to_string(),
			value,
			kind: AnomalyKind::AboveMaximum,
			severity: AnomalySeverity::Critical,
		});
	}
	if let Some(expected) = guardrail.expected
		&& (value - expected).abs() > guardrail.tolerance
	{
		anomalies.push(GuardrailAnomaly {
			metric: metric.to_string(),
			value,
			kind: AnomalyKind::OutsideExpected,
			severity: AnomalySeverity::Warning,
		});
	}

	anomalies
}

/// Evaluate a set of named metric values against their configured guardrails.
pub fn evaluate_guardrails(
	values: &[(&str, f64)],
	guardrails: &HashMap<String, Guardrail>,
) -> Vec<GuardrailAnomaly> {
	values
		.iter()
		.flat_map(|(metric, value)| {
			guardrails
				.get(*metric)
				.map(|guardrail| evaluate_guardrail(metric, *value, guardrail))
				.unwrap_or_default()
		})
		.collect()
}

/// Metrics assembled for every engine result, regardless of outcome.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RequestMetrics {
	/// Attempts actually executed.
	pub total_attempts: u32,
	/// Attempts that were ok and accepted by the analyzer.
	pub successful_attempts: u32,
	/// Attempts that failed or were rejected.
	pub failed_attempts: u32,
	/// Wall-clock total spent inside transport exchanges.
	pub total_execution_time_ms: u64,
	/// Mean transport time per executed attempt.
	pub average_attempt_time_ms: f64,
	/// Whether the result was served from the response cache.
	pub from_cache: bool,
	/// Buffer metrics when a stable buffer backed the call.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub buffer: Option<BufferMetrics>,
	/// Breaker snapshot when a breaker was attached.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub breaker: Option<BreakerSnapshot>,
	/// Cache statistics when a cache was attached.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cache: Option<CacheStats>,
	/// Guardrail anomalies detected during validation.
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub anomalies: Vec<GuardrailAnomaly>,
}
impl RequestMetrics {
	/// Validate the assembled values against guardrails, attaching any anomalies.
	pub fn validate(&mut self, guardrails: &HashMap<String, Guardrail>) {
		if guardrails.is_empty() {
			return;
		}

		let mut values = vec![
			("total_attempts", self.total_attempts as f64),
			("successful_attempts", self.successful_attempts as f64),
			("failed_attempts", self.failed_attempts as f64),
			("total_execution_time_ms", self.total_execution_time_ms as f64),
			("average_attempt_time_ms", self.average_attempt_time_ms),
		];

		if let Some(buffer) = &self.buffer {
			values.push(("total_transactions", buffer.total_transactions as f64));
			values.push(("average_queue_wait_ms", buffer.average_queue_wait_ms));
		}

		self.anomalies.extend(evaluate_guardrails(&values, guardrails));
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle =
		PrometheusBuilder::new().install_recorder().map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record one attempt outcome with its transport latency.
#[cfg(feature = "metrics")]
pub fn record_attempt(host: &str, outcome: &'static str, duration_secs: f64) {
	let labels = outcome_labels(host, outcome);

	metrics::counter!(METRIC_ATTEMPTS_TOTAL, labels.iter()).increment(1);
	metrics::histogram!(METRIC_ATTEMPT_DURATION, base_labels(host).iter()).record(duration_secs);
}

/// Record the terminal outcome of one logical request.
#[cfg(feature = "metrics")]
pub fn record_request(host: &str, outcome: &'static str) {
	metrics::counter!(METRIC_REQUESTS_TOTAL, outcome_labels(host, outcome).iter()).increment(1);
}

/// Record a cache event: `hit`, `miss`, `set`, `eviction`, or `expiration`.
#[cfg(feature = "metrics")]
pub fn record_cache_event(host: &str, event: &'static str) {
	let mut labels = base_labels(host);

	labels.push(Label::new("event", event));

	metrics::counter!(METRIC_CACHE_EVENTS_TOTAL, labels.iter()).increment(1);
}

/// Record a breaker state transition.
#[cfg(feature = "metrics")]
pub fn record_breaker_transition(label: &str, to_state: &'static str) {
	let mut labels = LabelSet::with_capacity(2);

	labels.push(Label::new("breaker", label.to_owned()));
	labels.push(Label::new("state", to_state));

	metrics::counter!(METRIC_BREAKER_TRANSITIONS_TOTAL, labels.iter()).increment(1);
}

#[cfg(feature = "metrics")]
fn base_labels(host: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("host", host.to_owned()));

	labels
}

#[cfg(feature = "metrics")]
fn outcome_labels(host: &str, outcome: &'static str) -> LabelSet {
	let mut labels = base_labels(host);

	labels.push(Label::new("outcome", outcome));

	labels
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn values_inside_the_band_produce_no_anomalies() {
		let guardrail =
			Guardrail { min: Some(1.), max: Some(10.), expected: Some(5.), tolerance: 5. };

		assert!(evaluate_guardrail("total_attempts", 5., &guardrail).is_empty());
	}

	#[test]
	fn bound_violations_are_critical() {
		let guardrail = Guardrail { min: Some(2.), max: Some(4.), ..Default::default() };
		let below = evaluate_guardrail("total_attempts", 1., &guardrail);
		let above = evaluate_guardrail("total_attempts", 9., &guardrail);

		assert_eq!(below[0].kind, AnomalyKind::BelowMinimum);
		assert_eq!(below[0].severity, AnomalySeverity::Critical);
		assert_eq!(above[0].kind, AnomalyKind::AboveMaximum);
	}

	#[test]
	fn expected_deviation_is_a_warning() {
		let guardrail =
			Guardrail { expected: Some(100.), tolerance: 10., ..Default::default() };
		let anomalies = evaluate_guardrail("average_attempt_time_ms", 150., &guardrail);

		assert_eq!(anomalies.len(), 1);
		assert_eq!(anomalies[0].kind, AnomalyKind::OutsideExpected);
		assert_eq!(anomalies[0].severity, AnomalySeverity::Warning);
	}

	#[test]
	fn validate_attaches_anomalies_for_configured_metrics_only() {
		let mut metrics = RequestMetrics { total_attempts: 7, ..Default::default() };
		let guardrails = HashMap::from([(
			"total_attempts".to_string(),
			Guardrail { max: Some(3.), ..Default::default() },
		)]);

		metrics.validate(&guardrails);

		assert_eq!(metrics.anomalies.len(), 1);
		assert_eq!(metrics.anomalies[0].metric, "total_attempts");
	}

	#[cfg(feature = "metrics")]
	mod recorder {
		// std
		use std::borrow::Borrow;
		// crates.io
		use metrics_util::{
			CompositeKey, MetricKind,
			debugging::{DebugValue, DebuggingRecorder},
		};
		// self
		use super::super::*;

		fn capture<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
		where
			F: FnOnce(),
		{
			let recorder = DebuggingRecorder::new();
			let snapshotter = recorder.snapshotter();

			metrics::with_local_recorder(&recorder, f);

			snapshotter
				.snapshot()
				.into_vec()
				.into_iter()
				.map(|(key, _, _, value)| (key, value))
				.collect()
		}

		fn counter_value(snapshot: &[(CompositeKey, DebugValue)], name: &str) -> u64 {
			snapshot
				.iter()
				.filter_map(|(key, value)| {
					(key.kind() == MetricKind::Counter
						&& Borrow::<str>::borrow(key.key().name()) == name)
					.then(|| match value {
						DebugValue::Counter(value) => *value,
						_ => 0,
					})
				})
				.sum()
		}

		#[test]
		fn records_attempt_and_cache_counters() {
			let snapshot = capture(|| {
				record_attempt("api.example.com", "success", 0.02);
				record_cache_event("api.example.com", "hit");
				record_breaker_transition("checkout", "OPEN");
			});

			assert_eq!(counter_value(&snapshot, METRIC_ATTEMPTS_TOTAL), 1);
			assert_eq!(counter_value(&snapshot, METRIC_CACHE_EVENTS_TOTAL), 1);
			assert_eq!(counter_value(&snapshot, METRIC_BREAKER_TRANSITIONS_TOTAL), 1);
		}
	}
}
