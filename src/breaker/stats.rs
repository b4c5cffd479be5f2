//! Breaker transition and recovery statistics, plus the snapshot projection.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::breaker::machine::{BreakerStateRecord, CircuitState, OutcomeTriplet};

/// State-change bookkeeping maintained across transitions.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct StateChangeStats {
	/// Total transitions performed.
	pub state_transitions: u64,
	/// Epoch millis of the most recent transition.
	pub last_state_change_time: i64,
	/// Times the breaker entered OPEN.
	pub open_count: u64,
	/// Times the breaker entered HALF_OPEN.
	pub half_open_count: u64,
	/// Accumulated milliseconds spent in OPEN, summed at every exit.
	pub total_open_duration_ms: u64,
	/// Epoch millis of the most recent entry into OPEN.
	pub last_open_time: i64,
}

/// Recovery bookkeeping for half-open probe windows.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct RecoveryStats {
	/// OPEN → HALF_OPEN transitions.
	pub recovery_attempts: u64,
	/// Probe windows that re-closed the breaker.
	pub successful_recoveries: u64,
	/// Probe windows that re-opened the breaker.
	pub failed_recoveries: u64,
}

/// Read-only breaker projection with derived values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakerSnapshot {
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
	/// Mean milliseconds per completed OPEN period.
	pub average_open_duration_ms: f64,
	/// Successful recoveries over recovery attempts, in percent.
	pub recovery_success_rate: f64,
	/// Projected earliest re-admission time while OPEN.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub open_until: Option<i64>,
}
impl BreakerSnapshot {
	/// Derive a snapshot from the persistence record and the recovery timeout.
	pub fn from_record(record: BreakerStateRecord, recovery_timeout_ms: u64) -> Self {
		let average_open_duration_ms = if record.state_changes.open_count == 0 {
			0.
		} else {
			record.state_changes.total_open_duration_ms as f64
				/ record.state_changes.open_count as f64
		};
		let recovery_success_rate = if record.recovery.recovery_attempts == 0 {
			0.
		} else {
			record.recovery.successful_recoveries as f64
				/ record.recovery.recovery_attempts as f64
				* 100.
		};
		let open_until = if record.state == CircuitState::Open {
			Some(record.last_failure_time + recovery_timeout_ms as i64)
		} else {
			None
		};

		Self {
			state: record.state,
			request_outcomes: record.request_outcomes,
			attempt_outcomes: record.attempt_outcomes,
			half_open_outcomes: record.half_open_outcomes,
			last_failure_time: record.last_failure_time,
			state_changes: record.state_changes,
			recovery: record.recovery,
			average_open_duration_ms,
			recovery_success_rate,
			open_until,
		}
	}
}
