//! Transaction log records and replay.

// std
use std::collections::{HashMap, HashSet};
// crates.io
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	buffer::{BufferHandle, StateMap, TransactionBody, TransactionOptions},
};

/// Correlation tuple carried through hooks and logs; never affects behavior.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
	/// Workflow the request belongs to.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub workflow_id: Option<String>,
	/// Branch within the workflow.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub branch_id: Option<String>,
	/// Phase within the branch.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub phase_id: Option<String>,
	/// Individual request identifier.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub request_id: Option<String>,
}

/// Record emitted for every transaction a stable buffer executes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionLog {
	/// Monotonic id in the form `stable-buffer-<ms>-<seq>`.
	pub transaction_id: String,
	/// Epoch millis when the transaction was enqueued.
	pub queued_at: i64,
	/// Epoch millis when the body started executing.
	pub started_at: i64,
	/// Epoch millis when the body returned or failed.
	pub finished_at: i64,
	/// `finished_at - started_at`.
	pub duration_ms: u64,
	/// `started_at - queued_at`.
	pub queue_wait_ms: u64,
	/// Whether the body returned successfully.
	pub success: bool,
	/// Failure description; absent on success.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub error_message: Option<String>,
	/// State snapshot taken just before the body ran.
	pub state_before: StateMap,
	/// State snapshot taken after the body returned or failed.
	pub state_after: StateMap,
	/// Activity tag from the transaction options.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub activity: Option<String>,
	/// Hook executed inside the transaction, if any.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub hook_name: Option<String>,
	/// Parameters handed to that hook.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub hook_params: Option<Value>,
	/// Correlation tuple for the originating request.
	#[serde(flatten)]
	pub context: ExecutionContext,
}

/// Handler re-executing one recorded transaction during replay.
pub type ReplayHandler = Arc<
	dyn for<'a> Fn(&'a mut StateMap, TransactionLog) -> BoxFuture<'a, Result<()>> + Send + Sync,
>;

/// Replay tuning.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReplayOptions {
	/// Skip entries whose `transaction_id` has already been replayed.
	pub dedupe: bool,
}

/// Outcome of a replay run; `applied + skipped` equals the input size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
	/// Entries executed against the buffer.
	pub applied: usize,
	/// Entries filtered out by deduplication.
	pub skipped: usize,
}

/// Re-apply a recorded transaction sequence to the given buffer.
///
/// Entries whose `hook_name` matches a handler are re-executed through it; entries
/// without a matching handler fall back to installing their recorded `state_after`.
/// A failing entry is logged and does not stop the replay.
pub async fn replay_transactions(
	buffer: &BufferHandle,
	logs: &[TransactionLog],
	handlers: &HashMap<String, ReplayHandler>,
	options: ReplayOptions,
) -> Result<ReplayOutcome> {
	let mut seen = HashSet::new();
	let mut outcome = ReplayOutcome::default();

	for entry in logs {
		if options.dedupe && !seen.insert(entry.transaction_id.clone()) {
			outcome.skipped += 1;

			continue;
		}

		let handler = entry.hook_name.as_deref().and_then(|name| handlers.get(name)).cloned();
		let replayed = entry.clone();
		let body: TransactionBody = match handler {
			Some(handler) => Box::new(move |state| {
				Box::pin(async move {
					handler(state, replayed).await?;

					Ok(Value::Null)
				})
			}),
			None => Box::new(move |state| {
				Box::pin(async move {
					*state = replayed.state_after;

					Ok(Value::Null)
				})
			}),
		};
		let transaction_options = TransactionOptions {
			activity: Some("replay".into()),
			hook_name: entry.hook_name.clone(),
			hook_params: entry.hook_params.clone(),
			context: entry.context.clone(),
		};

		if let Err(err) = buffer.run(body, transaction_options).await {
			tracing::warn!(
				transaction_id = %entry.transaction_id,
				error = %err,
				"replayed transaction failed"
			);
		}

		outcome.applied += 1;
	}

	Ok(outcome)
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::buffer::plain::PlainBuffer;

	fn sample_log(id: &str, state_after: StateMap) -> TransactionLog {
		TransactionLog {
			transaction_id: id.to_string(),
			queued_at: 1_000,
			started_at: 1_002,
			finished_at: 1_005,
			duration_ms: 3,
			queue_wait_ms: 2,
			success: true,
			error_message: None,
			state_before: StateMap::new(),
			state_after,
			activity: None,
			hook_name: None,
			hook_params: None,
			context: ExecutionContext::default(),
		}
	}

	fn state_with(key: &str, value: Value) -> StateMap {
		let mut state = StateMap::new();

		state.insert(key.to_string(), value);

		state
	}

	#[tokio::test]
	async fn replay_without_handlers_installs_recorded_state() {
		let buffer = BufferHandle::Plain(PlainBuffer::default());
		let logs = vec![
			sample_log("stable-buffer-1-1", state_with("step", json!(1))),
			sample_log("stable-buffer-1-2", state_with("step", json!(2))),
		];
		let outcome =
			replay_transactions(&buffer, &logs, &HashMap::new(), ReplayOptions::default())
				.await
				.expect("replay");

		assert_eq!(outcome, ReplayOutcome { applied: 2, skipped: 0 });
		assert_eq!(buffer.read().await.get("step"), Some(&json!(2)));
	}

	#[tokio::test]
	async fn dedupe_filters_repeated_transaction_ids() {
		let buffer = BufferHandle::Plain(PlainBuffer::default());
		let logs = vec![
			sample_log("stable-buffer-1-1", state_with("step", json!(1))),
			sample_log("stable-buffer-1-1", state_with("step", json!(99))),
			sample_log("stable-buffer-1-2", state_with("step", json!(2))),
		];
		let outcome =
			replay_transactions(&buffer, &logs, &HashMap::new(), ReplayOptions { dedupe: true })
				.await
				.expect("replay");

		assert_eq!(outcome.applied + outcome.skipped, logs.len());
		assert_eq!(outcome.skipped, 1);
		assert_eq!(buffer.read().await.get("step"), Some(&json!(2)));
	}

	#[tokio::test]
	async fn matching_handlers_reexecute_instead_of_installing_state() {
		let buffer = BufferHandle::Plain(PlainBuffer::default());
		let mut logs = vec![sample_log("stable-buffer-1-1", state_with("step", json!(1)))];

		logs[0].hook_name = Some("increment".into());

		let handler: ReplayHandler = Arc::new(|state, _log| {
			Box::pin(async move {
				let current =
					state.get("count").and_then(Value::as_i64).unwrap_or_default();

				state.insert("count".into(), json!(current + 1));

				Ok(())
			})
		});
		let handlers = HashMap::from([("increment".to_string(), handler)]);
		let outcome = replay_transactions(&buffer, &logs, &handlers, ReplayOptions::default())
			.await
			.expect("replay");

		assert_eq!(outcome.applied, 1);
		assert_eq!(buffer.read().await.get("count"), Some(&json!(1)));
	}
}
