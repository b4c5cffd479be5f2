//! Circuit breaker state machine with request- and attempt-level accounting.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::breaker::stats::{RecoveryStats, StateChangeStats};

/// Counter-hygiene factor: closed-state triplets reset at this multiple of
/// `minimum_requests`.
const RESET_FACTOR: u64 = 10;

/// Breaker lifecycle states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
	/// Requests pass through; failures are being counted.
	#[default]
	Closed,
	/// Requests are denied until the recovery timeout elapses.
	Open,
	/// A bounded probe window decides between re-closing and re-opening.
	HalfOpen,
}
impl CircuitState {
	/// Upper-case wire spelling of the state.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Closed => "CLOSED",
			Self::Open => "OPEN",
			Self::HalfOpen => "HALF_OPEN",
		}
	}
}

/// Which accounting a recorded outcome belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountingLevel {
	/// One logical request.
	Request,
	/// One transport attempt within a request.
	Attempt,
}

/// One total/failed/succeeded counter triplet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTriplet {
	/// Outcomes recorded.
	pub total: u64,
	/// Failed outcomes.
	pub failed: u64,
	/// Successful outcomes.
	pub succeeded: u64,
}
impl OutcomeTriplet {
	fn record(&mut self, success: bool) {
		self.total += 1;

		if success {
			self.succeeded += 1;
		} else {
			self.failed += 1;
		}
	}

	fn reset(&mut self) {
		*self = Self::default();
	}

	/// Failure share in percent; zero while empty.
	pub fn failure_percentage(&self) -> f64 {
		if self.total == 0 { 0. } else { self.failed as f64 / self.total as f64 * 100. }
	}

	/// Success share in percent; zero while empty.
	pub fn success_percentage(&self) -> f64 {
		if self.total == 0 { 0. } else { self.succeeded as f64 / self.total as f64 * 100. }
	}
}

/// Outcome evidence returned to the caller after a record.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecordOutcome {
	/// Whether this record transitioned the breaker into [`CircuitState::Open`].
	pub just_opened: bool,
}

/// Persistence shape mirroring the full breaker state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BreakerStateRecord {
	/// Current lifecycle state.
	pub state: CircuitState,
	/// Request-level accounting.
	pub request_outcomes: OutcomeTriplet,
	/// Attempt-level accounting.
	pub attempt_outcomes: OutcomeTriplet,
	/// Half-open probe accounting.
	pub half_open_outcomes: OutcomeTriplet,
	/// Epoch millis of the most recent failure; zero when none.
	pub last_failure_time: i64,
	/// Transition bookkeeping.
	pub state_changes: StateChangeStats,
	/// Recovery bookkeeping.
	pub recovery: RecoveryStats,
}

/// Threshold parameters the machine evaluates against.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Thresholds {
	pub failure_threshold_percentage: f64,
	pub minimum_requests: u64,
	pub recovery_timeout_ms: u64,
	pub success_threshold_percentage: f64,
	pub half_open_max_requests: u64,
	pub track_individual_attempts: bool,
}

/// Synchronous state machine; callers serialize access through a lock.
#[derive(Debug)]
pub(crate) struct BreakerMachine {
	thresholds: Thresholds,
	state: CircuitState,
	request: OutcomeTriplet,
	attempt: OutcomeTriplet,
	half_open: OutcomeTriplet,
	last_failure_time: i64,
	changes: StateChangeStats,
	recovery: RecoveryStats,
}
impl BreakerMachine {
	pub fn new(thresholds: Thresholds) -> Self {
		Self {
			thresholds,
			state: CircuitState::Closed,
			request: OutcomeTriplet::default(),
			attempt: OutcomeTriplet::default(),
			half_open: OutcomeTriplet::default(),
			last_failure_time: 0,
			changes: StateChangeStats::default(),
			recovery: RecoveryStats::default(),
		}
	}

	pub fn state(&self) -> CircuitState {
		self.state
	}

	pub fn thresholds(&self) -> &Thresholds {
		&self.thresholds
	}

	/// Admission decision; may transition OPEN → HALF_OPEN when the recovery
	/// timeout has elapsed. Returns `(allowed, state_changed)`.
	pub fn can_execute(&mut self, now: i64) -> (bool, bool) {
		match self.state {
			CircuitState::Closed => (true, false),
			CircuitState::Open =>
				if now - self.last_failure_time >= self.thresholds.recovery_timeout_ms as i64 {
					self.transition(CircuitState::HalfOpen, now);

					(true, true)
				} else {
					(false, false)
				},
			CircuitState::HalfOpen =>
				(self.half_open.total < self.thresholds.half_open_max_requests, false),
		}
	}

	/// Record one outcome at the given accounting level.
	pub fn record(&mut self, level: AccountingLevel, success: bool, now: i64) -> RecordOutcome {
		match level {
			AccountingLevel::Request => self.request.record(success),
			AccountingLevel::Attempt => self.attempt.record(success),
		}

		if !success {
			self.last_failure_time = now;
		}

		let was_open = self.state == CircuitState::Open;

		match self.state {
			CircuitState::Closed => self.evaluate_closed(level, now),
			CircuitState::HalfOpen => self.evaluate_half_open(success, now),
			CircuitState::Open => {},
		}

		RecordOutcome { just_opened: !was_open && self.state == CircuitState::Open }
	}

	pub fn restore(&mut self, record: BreakerStateRecord) {
		self.state = record.state;
		self.request = record.request_outcomes;
		self.attempt = record.attempt_outcomes;
		self.half_open = record.half_open_outcomes;
		self.last_failure_time = record.last_failure_time;
		self.changes = record.state_changes;
		self.recovery = record.recovery;
	}

	pub fn record_snapshot(&self) -> BreakerStateRecord {
		BreakerStateRecord {
			state: self.state,
			request_outcomes: self.request,
			attempt_outcomes: self.attempt,
			half_open_outcomes: self.half_open,
			last_failure_time: self.last_failure_time,
			state_changes: self.changes,
			recovery: self.recovery,
		}
	}

	fn active_triplet(&self) -> OutcomeTriplet {
		if self.thresholds.track_individual_attempts { self.attempt } else { self.request }
	}

	fn evaluate_closed(&mut self, level: AccountingLevel, now: i64) {
		let level_is_active = match level {
			AccountingLevel::Attempt => self.thresholds.track_individual_attempts,
			AccountingLevel::Request => !self.thresholds.track_individual_attempts,
		};

		if !level_is_active {
			return;
		}

		let active = self.active_triplet();

		if active.total >= self.thresholds.minimum_requests
			&& active.failure_percentage() >= self.thresholds.failure_threshold_percentage
		{
			self.transition(CircuitState::Open, now);
		} else if active.total >= RESET_FACTOR * self.thresholds.minimum_requests {
			self.request.reset();
			self.attempt.reset();
		}
	}

	fn evaluate_half_open(&mut self, success: bool, now: i64) {
		self.half_open.record(success);

		if self.half_open.total < self.thresholds.half_open_max_requests {
			return;
		}

		if self.half_open.success_percentage() >= self.thresholds.success_threshold_percentage {
			self.recovery.successful_recoveries += 1;
			self.transition(CircuitState::Closed, now);
			self.request.reset();
			self.attempt.reset();
		} else {
			self.recovery.failed_recoveries += 1;
			self.transition(CircuitState::Open, now);
		}
	}

	fn transition(&mut self, to: CircuitState, now: i64) {
		let from = self.state;

		if from == to {
			return;
		}

		if from == CircuitState::Open && self.changes.last_open_time > 0 {
			self.changes.total_open_duration_ms +=
				now.saturating_sub(self.changes.last_open_time).max(0) as u64;
		}

		match to {
			CircuitState::Open => {
				self.changes.open_count += 1;
				self.changes.last_open_time = now;
			},
			CircuitState::HalfOpen => {
				self.changes.half_open_count += 1;
				self.recovery.recovery_attempts += 1;
			},
			CircuitState::Closed => {},
		}

		self.changes.state_transitions += 1;
		self.changes.last_state_change_time = now;
		self.half_open.reset();
		self.state = to;

		tracing::debug!(from = from.as_str(), to = to.as_str(), "breaker state transition");
	}
}
