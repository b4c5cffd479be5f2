//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the resilient request crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	SystemTime(#[from] std::time::SystemTimeError),

	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Request cancelled by caller.")]
	Cancelled,
	#[error("Circuit breaker is open until epoch {open_until_ms} ms.")]
	CircuitOpen { open_until_ms: i64 },
	#[error("Hook '{hook}' failed: {reason}")]
	Hook { hook: String, reason: String },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Persistence error for '{label}': {reason}")]
	Persistence { label: String, reason: String },
	#[error("Transaction error: {0}")]
	Transaction(String),
	#[error("Transaction {transaction_id} timed out after {timeout_ms} ms.")]
	TransactionTimeout { transaction_id: String, timeout_ms: u64 },
	#[error("Transport failure: {0}")]
	Transport(String),
	#[error("Request failed without a handled error analysis: {0}")]
	Unhandled(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
#[cfg(feature = "metrics")]
impl<T> From<metrics::SetRecorderError<T>> for Error
where
	T: std::fmt::Display,
{
	fn from(value: metrics::SetRecorderError<T>) -> Self {
		Self::Metrics(value.to_string())
	}
}
