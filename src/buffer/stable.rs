//! Serialized single-writer transaction queue over a shared state mapping.

// std
use std::{
	collections::HashMap,
	fmt,
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use tokio::{
	sync::{mpsc, oneshot},
	time,
};
// self
use crate::{
	_prelude::*,
	buffer::{
		BufferMetrics, CloneStrategy, StateMap, TransactionBody, TransactionLogger,
		TransactionOptions, log::TransactionLog,
	},
	metrics::Guardrail,
};

/// Tuning for a [`StableBuffer`].
#[derive(Clone, Default)]
pub struct StableBufferConfig {
	/// Budget after which a caller's await fails with a timeout error.
	///
	/// Zero disables the timeout. The transaction body itself is never aborted;
	/// later transactions still wait for it to finish.
	pub transaction_timeout_ms: u64,
	/// Callback receiving every completed transaction's log entry.
	pub logger: Option<TransactionLogger>,
	/// Snapshot strategy for `state_before`/`state_after`; defaults to a structural clone.
	pub clone_strategy: Option<CloneStrategy>,
	/// Guardrails evaluated when a metrics snapshot is taken.
	pub guardrails: HashMap<String, Guardrail>,
}
impl fmt::Debug for StableBufferConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StableBufferConfig")
			.field("transaction_timeout_ms", &self.transaction_timeout_ms)
			.field("logger", &self.logger.is_some())
			.field("clone_strategy", &self.clone_strategy.is_some())
			.field("guardrails", &self.guardrails)
			.finish()
	}
}

/// Serialized transaction queue over one mutable state mapping.
///
/// Transactions execute in enqueue order regardless of their wall-clock duration;
/// a failing transaction does not abort or reorder the queue. Must be created
/// inside a Tokio runtime, which hosts the worker task.
#[derive(Clone)]
pub struct StableBuffer {
	state: Arc<tokio::sync::Mutex<StateMap>>,
	queue: mpsc::UnboundedSender<Queued>,
	seq: Arc<AtomicU64>,
	counters: Arc<Counters>,
	clone_strategy: CloneStrategy,
	transaction_timeout_ms: u64,
	guardrails: Arc<HashMap<String, Guardrail>>,
}
impl StableBuffer {
	/// Create an empty buffer and spawn its worker task.
	pub fn new(config: StableBufferConfig) -> Self {
		Self::with_state(StateMap::new(), config)
	}

	/// Create a buffer seeded with the given state.
	pub fn with_state(state: StateMap, config: StableBufferConfig) -> Self {
		let state = Arc::new(tokio::sync::Mutex::new(state));
		let (queue, rx) = mpsc::unbounded_channel();
		let counters = Arc::new(Counters::default());
		let clone_strategy: CloneStrategy =
			config.clone_strategy.unwrap_or_else(|| Arc::new(|state: &StateMap| state.clone()));

		tokio::spawn(worker(
			rx,
			state.clone(),
			config.logger,
			clone_strategy.clone(),
			counters.clone(),
		));

		Self {
			state,
			queue,
			seq: Arc::new(AtomicU64::new(0)),
			counters,
			clone_strategy,
			transaction_timeout_ms: config.transaction_timeout_ms,
			guardrails: Arc::new(config.guardrails),
		}
	}

	/// Deep clone of the current state.
	pub async fn read(&self) -> StateMap {
		let state = self.state.lock().await;

		(self.clone_strategy)(&state)
	}

	/// Live handle to the underlying state.
	///
	/// Callers must not mutate through this handle while a transaction is running.
	pub fn state(&self) -> Arc<tokio::sync::Mutex<StateMap>> {
		self.state.clone()
	}

	/// Atomically replace the state mapping.
	pub async fn set_state(&self, state: StateMap) {
		*self.state.lock().await = state;
	}

	/// Enqueue a transaction behind all prior ones and await its result.
	pub async fn run(&self, body: TransactionBody, options: TransactionOptions) -> Result<Value> {
		let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
		let queued_at = Utc::now().timestamp_millis();
		let transaction_id = format!("stable-buffer-{queued_at}-{seq}");
		let (reply, result) = oneshot::channel();

		self.queue
			.send(Queued { transaction_id: transaction_id.clone(), queued_at, options, body, reply })
			.map_err(|_| Error::Transaction("Buffer worker has shut down.".into()))?;

		if self.transaction_timeout_ms > 0 {
			match time::timeout(Duration::from_millis(self.transaction_timeout_ms), result).await {
				Ok(outcome) => flatten_reply(outcome),
				Err(_) => Err(Error::TransactionTimeout {
					transaction_id,
					timeout_ms: self.transaction_timeout_ms,
				}),
			}
		} else {
			flatten_reply(result.await)
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

	/// Throughput metrics, validated against the configured guardrails.
	pub fn metrics(&self) -> BufferMetrics {
		let total = self.counters.total.load(Ordering::Relaxed);
		let wait_sum = self.counters.queue_wait_sum_ms.load(Ordering::Relaxed);
		let average = if total == 0 { 0. } else { wait_sum as f64 / total as f64 };

		BufferMetrics {
			total_transactions: total,
			average_queue_wait_ms: average,
			anomalies: Vec::new(),
		}
		.validated(&self.guardrails)
	}
}
impl Default for StableBuffer {
	fn default() -> Self {
		Self::new(StableBufferConfig::default())
	}
}
impl fmt::Debug for StableBuffer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StableBuffer")
			.field("transaction_timeout_ms", &self.transaction_timeout_ms)
			.field("total_transactions", &self.counters.total.load(Ordering::Relaxed))
			.finish()
	}
}

#[derive(Debug, Default)]
struct Counters {
	total: AtomicU64,
	queue_wait_sum_ms: AtomicU64,
}

struct Queued {
	transaction_id: String,
	queued_at: i64,
	options: TransactionOptions,
	body: TransactionBody,
	reply: oneshot::Sender<Result<Value>>,
}

fn flatten_reply(outcome: std::result::Result<Result<Value>, oneshot::error::RecvError>) -> Result<Value> {
	outcome.unwrap_or_else(|_| Err(Error::Transaction("Buffer worker dropped the reply.".into())))
}

async fn worker(
	mut rx: mpsc::UnboundedReceiver<Queued>,
	state: Arc<tokio::sync::Mutex<StateMap>>,
	logger: Option<TransactionLogger>,
	clone_strategy: CloneStrategy,
	counters: Arc<Counters>,
) {
	while let Some(job) = rx.recv().await {
		let started_at = Utc::now().timestamp_millis();
		let queue_wait_ms = started_at.saturating_sub(job.queued_at).max(0) as u64;
		let mut guard = state.lock().await;
		let state_before = logger.as_ref().map(|_| clone_strategy(&guard));
		let outcome = (job.body)(&mut guard).await;
		let state_after = logger.as_ref().map(|_| clone_strategy(&guard));

		drop(guard);

		let finished_at = Utc::now().timestamp_millis();

		counters.total.fetch_add(1, Ordering::Relaxed);
		counters.queue_wait_sum_ms.fetch_add(queue_wait_ms, Ordering::Relaxed);

		if let Some(logger) = &logger {
			let entry = TransactionLog {
				transaction_id: job.transaction_id.clone(),
				queued_at: job.queued_at,
				started_at,
				finished_at,
				duration_ms: finished_at.saturating_sub(started_at).max(0) as u64,
				queue_wait_ms,
				success: outcome.is_ok(),
				error_message: outcome.as_ref().err().map(ToString::to_string),
				state_before: state_before.unwrap_or_default(),
				state_after: state_after.unwrap_or_default(),
				activity: job.options.activity.clone(),
				hook_name: job.options.hook_name.clone(),
				hook_params: job.options.hook_params.clone(),
				context: job.options.context.clone(),
			};

			if let Err(err) = logger(&entry) {
				tracing::warn!(
					transaction_id = %job.transaction_id,
					error = %err,
					"transaction logger failed"
				);
			}
		}

		let _ = job.reply.send(outcome);
	}
}
