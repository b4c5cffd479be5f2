//! Circuit breaker: configuration, the shared async wrapper, and persistence wiring.

pub mod machine;
pub mod stats;

pub use machine::{BreakerStateRecord, CircuitState, OutcomeTriplet, RecordOutcome};
pub use stats::{BreakerSnapshot, RecoveryStats, StateChangeStats};

// std
use std::sync::Mutex;
// self
use crate::{
	_prelude::*,
	breaker::machine::{AccountingLevel, BreakerMachine, Thresholds},
	persist::{PersistCoordinator, PersistenceHooks},
};

/// Breaker configuration; numeric ranges are clamped centrally at construction.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
	/// Failure share, in percent, that opens the breaker; clamped to `[0, 100]`.
	pub failure_threshold_percentage: f64,
	/// Outcomes required before the threshold applies; at least 1.
	pub minimum_requests: u64,
	/// Milliseconds the breaker stays open before probing; at least 100.
	pub recovery_timeout_ms: u64,
	/// Success share, in percent, required to re-close from half-open.
	pub success_threshold_percentage: f64,
	/// Size of the half-open probe window.
	pub half_open_max_requests: u64,
	/// Whether attempt-level outcomes drive the threshold instead of request-level ones.
	pub track_individual_attempts: bool,
	/// Persistence callbacks; absent disables persistence entirely.
	pub persistence: Option<PersistenceHooks>,
	/// Label prefixing persistence operation ids.
	pub label: Option<String>,
}
impl CircuitBreakerConfig {
	fn normalized(mut self) -> Self {
		self.failure_threshold_percentage = self.failure_threshold_percentage.clamp(0., 100.);
		self.minimum_requests = self.minimum_requests.max(1);
		self.recovery_timeout_ms = self.recovery_timeout_ms.max(100);
		self.success_threshold_percentage = self.success_threshold_percentage.clamp(0., 100.);
		self.half_open_max_requests = self.half_open_max_requests.max(1);

		self
	}

	fn thresholds(&self) -> Thresholds {
		Thresholds {
			failure_threshold_percentage: self.failure_threshold_percentage,
			minimum_requests: self.minimum_requests,
			recovery_timeout_ms: self.recovery_timeout_ms,
			success_threshold_percentage: self.success_threshold_percentage,
			half_open_max_requests: self.half_open_max_requests,
			track_individual_attempts: self.track_individual_attempts,
		}
	}
}
impl Default for CircuitBreakerConfig {
	fn default() -> Self {
		Self {
			failure_threshold_percentage: 50.,
			minimum_requests: 10,
			recovery_timeout_ms: 30_000,
			success_threshold_percentage: 50.,
			half_open_max_requests: 5,
			track_individual_attempts: false,
			persistence: None,
			label: None,
		}
	}
}

/// Shared circuit breaker safe under concurrent recording.
///
/// Mutations serialize through an internal lock; reads observe a snapshot.
/// Every mutating call stores the state record through the persistence
/// coordinator, with failures logged and swallowed.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
	machine: Arc<Mutex<BreakerMachine>>,
	config: Arc<CircuitBreakerConfig>,
	coordinator: Option<Arc<PersistCoordinator>>,
}
impl CircuitBreaker {
	/// Build a breaker from the clamped configuration.
	pub fn new(config: CircuitBreakerConfig) -> Self {
		let config = config.normalized();
		let coordinator = config.persistence.clone().map(|hooks| {
			Arc::new(PersistCoordinator::new(
				config.label.clone().unwrap_or_else(|| "circuit-breaker".into()),
				hooks,
			))
		});
		let machine = BreakerMachine::new(config.thresholds());

		Self { machine: Arc::new(Mutex::new(machine)), config: Arc::new(config), coordinator }
	}

	/// Restore state from persistence; a missing or malformed record starts fresh.
	pub async fn initialize(&self) -> Result<()> {
		let Some(coordinator) = &self.coordinator else { return Ok(()) };

		match coordinator.load().await {
			Ok(outcome) =>
				if let Some(state) = outcome.state {
					match serde_json::from_value::<BreakerStateRecord>(state) {
						Ok(record) => {
							self.lock().restore(record);

							tracing::debug!(state = self.state().as_str(), "restored breaker state");
						},
						Err(err) => {
							tracing::warn!(error = %err, "persisted breaker state is malformed");
						},
					}
				},
			Err(err) => {
				tracing::warn!(error = %err, "breaker persistence load failed");
			},
		}

		Ok(())
	}

	/// Whether attempt-level outcomes drive the threshold.
	pub fn track_individual_attempts(&self) -> bool {
		self.config.track_individual_attempts
	}

	/// Admission decision; OPEN breakers probe again after the recovery timeout.
	pub async fn can_execute(&self) -> bool {
		let now = Utc::now().timestamp_millis();
		let (allowed, changed) = self.lock().can_execute(now);

		if changed {
			self.persist().await;
		}

		allowed
	}

	/// Record one successful logical request.
	pub async fn record_success(&self) -> RecordOutcome {
		self.record(AccountingLevel::Request, true).await
	}

	/// Record one failed logical request.
	pub async fn record_failure(&self) -> RecordOutcome {
		self.record(AccountingLevel::Request, false).await
	}

	/// Record one successful transport attempt.
	pub async fn record_attempt_success(&self) -> RecordOutcome {
		self.record(AccountingLevel::Attempt, true).await
	}

	/// Record one failed transport attempt.
	pub async fn record_attempt_failure(&self) -> RecordOutcome {
		self.record(AccountingLevel::Attempt, false).await
	}

	/// Current lifecycle state.
	pub fn state(&self) -> CircuitState {
		self.lock().state()
	}

	/// Point-in-time projection with derived statistics.
	pub fn snapshot(&self) -> BreakerSnapshot {
		let record = self.lock().record_snapshot();

		BreakerSnapshot::from_record(record, self.config.recovery_timeout_ms)
	}

	/// Admission error for the current snapshot.
	pub fn open_error(&self) -> Error {
		let snapshot = self.snapshot();

		Error::CircuitOpen {
			open_until_ms: snapshot
				.open_until
				.unwrap_or(snapshot.last_failure_time + self.config.recovery_timeout_ms as i64),
		}
	}

	/// Run an operation under breaker admission, recording its outcome.
	///
	/// Denied admission raises [`Error::CircuitOpen`]; operation errors are
	/// recorded as failures and rethrown.
	pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		if !self.can_execute().await {
			return Err(self.open_error());
		}

		match operation().await {
			Ok(value) => {
				self.record_success().await;

				Ok(value)
			},
			Err(err) => {
				self.record_failure().await;

				Err(err)
			},
		}
	}

	async fn record(&self, level: AccountingLevel, success: bool) -> RecordOutcome {
		let now = Utc::now().timestamp_millis();
		let outcome = self.lock().record(level, success, now);

		#[cfg(feature = "metrics")]
		if outcome.just_opened {
			crate::metrics::record_breaker_transition(
				self.config.label.as_deref().unwrap_or("circuit-breaker"),
				CircuitState::Open.as_str(),
			);
		}

		self.persist().await;

		outcome
	}

	async fn persist(&self) {
		let Some(coordinator) = &self.coordinator else { return };
		let record = self.lock().record_snapshot();

		match serde_json::to_value(&record) {
			Ok(state) =>
				if let Err(err) = coordinator.store(state).await {
					tracing::warn!(error = %err, "breaker persistence store failed");
				},
			Err(err) => {
				tracing::warn!(error = %err, "breaker snapshot serialization failed");
			},
		}
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, BreakerMachine> {
		self.machine.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::persist::{LoadHook, StoreHook};

	fn tripping_config() -> CircuitBreakerConfig {
		CircuitBreakerConfig {
			failure_threshold_percentage: 50.,
			minimum_requests: 2,
			recovery_timeout_ms: 100,
			..Default::default()
		}
	}

	#[tokio::test]
	async fn execute_records_outcomes_and_rethrows() {
		let breaker = CircuitBreaker::new(tripping_config());
		let ok: Result<u32> = breaker.execute(|| async { Ok(7) }).await;

		assert_eq!(ok.expect("admitted operation"), 7);

		let err: Result<u32> =
			breaker.execute(|| async { Err(Error::Transaction("boom".into())) }).await;

		assert!(matches!(err, Err(Error::Transaction(_))));

		let snapshot = breaker.snapshot();

		assert_eq!(snapshot.request_outcomes.total, 2);
		assert_eq!(snapshot.request_outcomes.failed, 1);
	}

	#[tokio::test]
	async fn execute_raises_the_dedicated_open_error_when_denied() {
		let breaker = CircuitBreaker::new(tripping_config());

		breaker.record_failure().await;
		breaker.record_failure().await;

		assert_eq!(breaker.state(), CircuitState::Open);

		let denied: Result<u32> = breaker.execute(|| async { Ok(1) }).await;

		assert!(matches!(denied, Err(Error::CircuitOpen { .. })));
	}

	#[tokio::test]
	async fn configuration_is_clamped_centrally() {
		let breaker = CircuitBreaker::new(CircuitBreakerConfig {
			failure_threshold_percentage: 250.,
			minimum_requests: 0,
			recovery_timeout_ms: 5,
			..Default::default()
		});

		// minimum_requests clamps to 1, threshold to 100%: one failure opens.
		breaker.record_failure().await;

		assert_eq!(breaker.state(), CircuitState::Open);

		let snapshot = breaker.snapshot();

		// recovery_timeout_ms clamps to 100.
		assert_eq!(
			snapshot.open_until,
			Some(snapshot.last_failure_time + 100),
		);
	}

	#[tokio::test]
	async fn every_mutation_stores_through_persistence() {
		let stores = Arc::new(AtomicUsize::new(0));
		let counter = stores.clone();
		let store: StoreHook = Arc::new(move |_state| {
			let counter = counter.clone();

			Box::pin(async move {
				counter.fetch_add(1, Ordering::SeqCst);

				Ok(())
			})
		});
		let breaker = CircuitBreaker::new(CircuitBreakerConfig {
			persistence: Some(PersistenceHooks { store: Some(store), ..Default::default() }),
			..tripping_config()
		});

		breaker.record_success().await;
		breaker.record_attempt_failure().await;

		assert_eq!(stores.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn initialize_restores_the_persisted_record() {
		let persisted = serde_json::to_value(BreakerStateRecord {
			state: CircuitState::Open,
			last_failure_time: 1,
			..Default::default()
		})
		.expect("record serializes");
		let load: LoadHook = {
			let persisted = persisted.clone();

			Arc::new(move || {
				let persisted = persisted.clone();

				Box::pin(async move { Ok(Some(persisted)) })
			})
		};
		let breaker = CircuitBreaker::new(CircuitBreakerConfig {
			persistence: Some(PersistenceHooks { load: Some(load), ..Default::default() }),
			..tripping_config()
		});

		breaker.initialize().await.expect("initialize");

		// last_failure_time of 1 is far in the past: admission flips to half-open.
		assert_eq!(breaker.state(), CircuitState::Open);
		assert!(breaker.can_execute().await);
		assert_eq!(breaker.state(), CircuitState::HalfOpen);
	}

	#[tokio::test]
	async fn persistence_failures_never_break_recording() {
		let store: StoreHook =
			Arc::new(|_state| Box::pin(async { Err(Error::Transaction("disk gone".into())) }));
		let breaker = CircuitBreaker::new(CircuitBreakerConfig {
			persistence: Some(PersistenceHooks { store: Some(store), ..Default::default() }),
			..tripping_config()
		});

		breaker.record_failure().await;

		assert_eq!(breaker.snapshot().request_outcomes.failed, 1);
	}

	#[tokio::test]
	async fn malformed_load_state_is_ignored_with_a_warning() {
		let load: LoadHook = Arc::new(|| Box::pin(async { Ok(Some(json!("not a record"))) }));
		let breaker = CircuitBreaker::new(CircuitBreakerConfig {
			persistence: Some(PersistenceHooks { load: Some(load), ..Default::default() }),
			..tripping_config()
		});

		breaker.initialize().await.expect("initialize tolerates malformed state");

		assert_eq!(breaker.state(), CircuitState::Closed);
	}
}
