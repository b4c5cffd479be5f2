//! Idempotent persistence coordination for the breaker and cache.
//!
//! Every load/store runs inside a stable-buffer transaction tagged with a unique
//! operation id. The id is recorded in a reserved sub-key of the buffer state, so
//! replaying a recorded transaction sequence executes each operation at most once.

// std
use std::{
	fmt,
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
// self
use crate::{
	_prelude::*,
	buffer::{TransactionOptions, stable::StableBuffer},
};

/// Reserved buffer-state key recording executed operation ids.
pub const PERSISTENCE_OPS_KEY: &str = "__persistence_ops";

/// Persistence operation direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistOpType {
	/// Restore previously stored state.
	Load,
	/// Write the current state out.
	Store,
}
impl PersistOpType {
	fn as_str(&self) -> &'static str {
		match self {
			Self::Load => "load",
			Self::Store => "store",
		}
	}
}

/// Operation record handed to a `transaction` persistence hook.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistOp {
	/// Unique id in the form `<label>-<type>-<ms>-<seq>`.
	pub operation_id: String,
	/// Operation direction.
	#[serde(rename = "type")]
	pub op_type: PersistOpType,
	/// Epoch millis when the operation was issued.
	pub timestamp: i64,
	/// State payload for store operations.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub state: Option<Value>,
}

/// User-supplied persistence callbacks.
///
/// When `transaction` is present it is preferred over the separate `load`/`store`
/// pair for both directions.
#[derive(Clone, Default)]
pub struct PersistenceHooks {
	/// Restore state; `None` means no prior state exists.
	pub load: Option<LoadHook>,
	/// Write state out.
	pub store: Option<StoreHook>,
	/// Combined handler receiving the full operation record.
	pub transaction: Option<TransactionHook>,
}
impl PersistenceHooks {
	/// Whether any callback is configured.
	pub fn is_configured(&self) -> bool {
		self.load.is_some() || self.store.is_some() || self.transaction.is_some()
	}
}
impl fmt::Debug for PersistenceHooks {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PersistenceHooks")
			.field("load", &self.load.is_some())
			.field("store", &self.store.is_some())
			.field("transaction", &self.transaction.is_some())
			.finish()
	}
}

/// Load callback signature.
pub type LoadHook = Arc<dyn Fn() -> BoxFuture<'static, Result<Option<Value>>> + Send + Sync>;
/// Store callback signature.
pub type StoreHook = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;
/// Combined transaction callback signature.
///
/// May return the state directly, a `{state, skipped}` envelope, or nothing.
pub type TransactionHook =
	Arc<dyn Fn(PersistOp) -> BoxFuture<'static, Result<Option<Value>>> + Send + Sync>;

/// Result of one coordinated persistence operation.
#[derive(Clone, Debug, Default)]
pub struct PersistOutcome {
	/// Restored state, when the operation produced one.
	pub state: Option<Value>,
	/// Whether the operation was short-circuited by the idempotency guard.
	pub skipped: bool,
}

/// Serializes one component's persistence through a stable buffer.
pub struct PersistCoordinator {
	label: String,
	hooks: PersistenceHooks,
	seq: AtomicU64,
	buffer: tokio::sync::OnceCell<StableBuffer>,
}
impl PersistCoordinator {
	/// Create a coordinator; its buffer is created lazily on first use.
	pub fn new(label: impl Into<String>, hooks: PersistenceHooks) -> Self {
		Self {
			label: label.into(),
			hooks,
			seq: AtomicU64::new(0),
			buffer: tokio::sync::OnceCell::new(),
		}
	}

	/// Create a coordinator bound to an existing buffer.
	pub fn with_buffer(
		label: impl Into<String>,
		hooks: PersistenceHooks,
		buffer: StableBuffer,
	) -> Self {
		Self {
			label: label.into(),
			hooks,
			seq: AtomicU64::new(0),
			buffer: tokio::sync::OnceCell::new_with(Some(buffer)),
		}
	}

	/// Component label prefixing every operation id.
	pub fn label(&self) -> &str {
		&self.label
	}

	/// Whether any persistence callback is configured.
	pub fn is_configured(&self) -> bool {
		self.hooks.is_configured()
	}

	/// Coordinated load; returns the restored state or nothing.
	pub async fn load(&self) -> Result<PersistOutcome> {
		let operation_id = self.next_operation_id(PersistOpType::Load);

		self.run_op(operation_id, PersistOpType::Load, None).await
	}

	/// Coordinated store of the given state.
	pub async fn store(&self, state: Value) -> Result<PersistOutcome> {
		let operation_id = self.next_operation_id(PersistOpType::Store);

		self.run_op(operation_id, PersistOpType::Store, Some(state)).await
	}

	pub(crate) async fn run_op(
		&self,
		operation_id: String,
		op_type: PersistOpType,
		state: Option<Value>,
	) -> Result<PersistOutcome> {
		if !self.hooks.is_configured() {
			return Ok(PersistOutcome::default());
		}

		let buffer = self.buffer.get_or_init(|| async { StableBuffer::default() }).await;
		let hooks = self.hooks.clone();
		let op = PersistOp {
			operation_id: operation_id.clone(),
			op_type,
			timestamp: Utc::now().timestamp_millis(),
			state,
		};
		let options = TransactionOptions {
			activity: Some("persistence".into()),
			hook_name: Some(format!("{}:{}", self.label, op_type.as_str())),
			hook_params: Some(json!({ "operation_id": operation_id })),
			..Default::default()
		};
		let raw = buffer
			.run(
				Box::new(move |buffer_state| {
					Box::pin(async move {
						let executed = buffer_state
							.entry(PERSISTENCE_OPS_KEY.to_string())
							.or_insert_with(|| Value::Array(Vec::new()));
						let Some(ops) = executed.as_array_mut() else {
							return Err(Error::Persistence {
								label: op.operation_id.clone(),
								reason: "Reserved operations key holds a non-array value.".into(),
							});
						};
						let id = Value::String(op.operation_id.clone());

						if ops.contains(&id) {
							return Ok(json!({ "state": Value::Null, "skipped": true }));
						}

						ops.push(id);

						let returned = if let Some(transaction) = &hooks.transaction {
							transaction(op.clone()).await?
						} else {
							match op.op_type {
								PersistOpType::Load => match &hooks.load {
									Some(load) => load().await?,
									None => None,
								},
								PersistOpType::Store => {
									if let Some(store) = &hooks.store {
										store(op.state.clone().unwrap_or(Value::Null)).await?;
									}

									None
								},
							}
						};

						Ok(json!({
							"state": returned.unwrap_or(Value::Null),
							"skipped": false,
						}))
					})
				}),
				options,
			)
			.await?;

		Ok(interpret(raw))
	}

	fn next_operation_id(&self, op_type: PersistOpType) -> String {
		let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
		let now = Utc::now().timestamp_millis();

		format!("{}-{}-{now}-{seq}", self.label, op_type.as_str())
	}
}
impl fmt::Debug for PersistCoordinator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PersistCoordinator")
			.field("label", &self.label)
			.field("hooks", &self.hooks)
			.finish()
	}
}

fn interpret(raw: Value) -> PersistOutcome {
	let Value::Object(mut envelope) = raw else {
		return PersistOutcome { state: Some(raw).filter(|v| !v.is_null()), skipped: false };
	};
	let skipped = envelope.get("skipped").and_then(Value::as_bool).unwrap_or(false);
	let state = match envelope.remove("state") {
		Some(Value::Null) | None => None,
		// Nested envelope returned by a transaction hook.
		Some(Value::Object(inner))
			if inner.contains_key("state") || inner.contains_key("skipped") =>
		{
			let inner_skipped =
				inner.get("skipped").and_then(Value::as_bool).unwrap_or(false);

			return PersistOutcome {
				state: inner.get("state").cloned().filter(|v| !v.is_null()),
				skipped: skipped || inner_skipped,
			};
		},
		Some(state) => Some(state),
	};

	PersistOutcome { state, skipped }
}
