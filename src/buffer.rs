//! State buffers: a serialized single-writer transaction queue and its plain counterpart.

pub mod log;
pub mod plain;
pub mod stable;

// std
use std::collections::HashMap;
// crates.io
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	buffer::{log::TransactionLog, plain::PlainBuffer, stable::StableBuffer},
	metrics::{GuardrailAnomaly, evaluate_guardrails},
};

/// Shared mutable state carried by a buffer.
pub type StateMap = Map<String, Value>;

/// Strategy used to snapshot buffer state for logs and reads.
pub type CloneStrategy = Arc<dyn Fn(&StateMap) -> StateMap + Send + Sync>;

/// Body of one buffer transaction, run with exclusive access to the state.
pub type TransactionBody =
	Box<dyn for<'a> FnOnce(&'a mut StateMap) -> BoxFuture<'a, Result<Value>> + Send>;

/// Callback receiving every completed transaction's log entry.
///
/// Errors returned here are swallowed; they never affect the transaction outcome.
pub type TransactionLogger = Arc<dyn Fn(&TransactionLog) -> Result<()> + Send + Sync>;

/// Metadata attached to a queued transaction, carried into its log entry.
#[derive(Clone, Debug, Default)]
pub struct TransactionOptions {
	/// Free-form activity tag, e.g. `hook` or `replay`.
	pub activity: Option<String>,
	/// Identifier of the hook running inside the transaction, if any.
	pub hook_name: Option<String>,
	/// Parameters handed to that hook.
	pub hook_params: Option<Value>,
	/// Correlation tuple threaded through logs; never affects behavior.
	pub context: log::ExecutionContext,
}

/// Point-in-time buffer throughput counters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BufferMetrics {
	/// Transactions executed since the buffer was created.
	pub total_transactions: u64,
	/// Mean wall-clock wait between enqueue and execution start.
	pub average_queue_wait_ms: f64,
	/// Guardrail anomalies detected when the snapshot was taken.
	#[serde(skip_serializing_if = "Vec::is_empty", default)]
	pub anomalies: Vec<GuardrailAnomaly>,
}
impl BufferMetrics {
	pub(crate) fn validated(
		mut self,
		guardrails: &HashMap<String, crate::metrics::Guardrail>,
	) -> Self {
		self.anomalies = evaluate_guardrails(
			&[
				("total_transactions", self.total_transactions as f64),
				("average_queue_wait_ms", self.average_queue_wait_ms),
			],
			guardrails,
		);

		self
	}
}

/// Polymorphic buffer accepted by the hook runner and persistence coordinator.
#[derive(Clone, Debug)]
pub enum BufferHandle {
	/// Unserialized in-memory mapping guarded by a mutex.
	Plain(PlainBuffer),
	/// Serialized transactional queue with logging and metrics.
	Stable(StableBuffer),
}
impl BufferHandle {
	/// Deep clone of the current state.
	pub async fn read(&self) -> StateMap {
		match self {
			Self::Plain(buffer) => buffer.read().await,
			Self::Stable(buffer) => buffer.read().await,
		}
	}

	/// Live handle to the underlying state.
	///
	/// Callers must not mutate through this handle while a transaction is running.
	pub fn state(&self) -> Arc<tokio::sync::Mutex<StateMap>> {
		match self {
			Self::Plain(buffer) => buffer.state(),
			Self::Stable(buffer) => buffer.state(),
		}
	}

	/// Atomically replace the state mapping.
	pub async fn set_state(&self, state: StateMap) {
		match self {
			Self::Plain(buffer) => buffer.set_state(state).await,
			Self::Stable(buffer) => buffer.set_state(state).await,
		}
	}

	/// Enqueue a transaction behind all prior ones and await its result.
	pub async fn run(&self, body: TransactionBody, options: TransactionOptions) -> Result<Value> {
		match self {
			Self::Plain(buffer) => buffer.run(body).await,
			Self::Stable(buffer) => buffer.run(body, options).await,
		}
	}

	/// [`Self::run`] discarding the transaction result.
	pub async fn update(&self, body: TransactionBody, options: TransactionOptions) -> Result<()> {
		self.run(body, options).await.map(|_| ())
	}

	/// Alias of [`Self::run`] returning the transaction result.
	pub async fn transaction(
		&self,
		body: TransactionBody,
		options: TransactionOptions,
	) -> Result<Value> {
		self.run(body, options).await
	}

	/// Throughput metrics, available for stable buffers only.
	pub fn metrics(&self) -> Option<BufferMetrics> {
		match self {
			Self::Plain(_) => None,
			Self::Stable(buffer) => Some(buffer.metrics()),
		}
	}
}
impl Default for BufferHandle {
	fn default() -> Self {
		Self::Plain(PlainBuffer::default())
	}
}
impl From<PlainBuffer> for BufferHandle {
	fn from(buffer: PlainBuffer) -> Self {
		Self::Plain(buffer)
	}
}
impl From<StableBuffer> for BufferHandle {
	fn from(buffer: StableBuffer) -> Self {
		Self::Stable(buffer)
	}
}
