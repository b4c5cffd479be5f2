//! Attempt results, per-attempt log entries, and the engine's result record.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, metrics::RequestMetrics};

/// Classification attached to an error log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorLogType {
	/// The transport failed or the upstream answered with an error status.
	HttpError,
	/// The transport succeeded but the response analyzer rejected the payload.
	InvalidContent,
}

/// Normalized outcome of one transport attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttemptResult {
	/// Whether the transport returned a response at all.
	///
	/// Does not imply the response was accepted by the analyzer.
	pub ok: bool,
	/// Whether the classifier deems a failure worth another attempt.
	pub is_retryable: bool,
	/// Epoch millis when the attempt finished.
	pub timestamp: i64,
	/// Transport round-trip time.
	pub execution_time_ms: u64,
	/// HTTP status when one was observed.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub status_code: Option<u16>,
	/// Failure description.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub error: Option<String>,
	/// Response payload.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub data: Option<Value>,
	/// Whether the payload came from the response cache.
	pub from_cache: bool,
}

/// One failed attempt, as recorded when error logging is enabled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorLogEntry {
	/// Epoch millis when the failure was observed.
	pub timestamp: i64,
	/// Attempt position as `i/N`.
	pub attempt: String,
	/// Failure description, truncated to the serialization budget.
	pub error: String,
	/// Failure classification.
	#[serde(rename = "type")]
	pub log_type: ErrorLogType,
	/// Whether another attempt is justified.
	pub is_retryable: bool,
	/// Transport round-trip time for the attempt.
	pub execution_time_ms: u64,
	/// HTTP status when one was observed.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub status_code: Option<u16>,
}

/// One accepted attempt, as recorded when success logging is enabled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuccessLogEntry {
	/// One-based attempt index.
	pub attempt: u32,
	/// Epoch millis when the attempt finished.
	pub timestamp: i64,
	/// Accepted response payload.
	pub data: Value,
	/// Transport round-trip time for the attempt.
	pub execution_time_ms: u64,
	/// HTTP status the response carried.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub status_code: Option<u16>,
}

/// Terminal result of one logical request.
#[derive(Clone, Debug, Serialize)]
pub struct RequestReport {
	/// Whether the request ended with an accepted response.
	pub success: bool,
	/// Accepted payload when requested; `true` when the caller declined it.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
	/// Consolidated error string on failure.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Error log entries; present only when at least one was recorded.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_logs: Option<Vec<ErrorLogEntry>>,
	/// Success log entries; present only when at least one was recorded.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub successful_attempts: Option<Vec<SuccessLogEntry>>,
	/// Metrics assembled on every return path.
	pub metrics: RequestMetrics,
}

/// Serialize a payload into an excerpt bounded by `max_chars` characters.
pub fn truncate_serialized(value: &Value, max_chars: usize) -> String {
	let serialized = match value {
		Value::String(text) => text.clone(),
		other => other.to_string(),
	};

	if serialized.chars().count() <= max_chars {
		return serialized;
	}

	let mut excerpt: String = serialized.chars().take(max_chars).collect();

	excerpt.push('…');

	excerpt
}
