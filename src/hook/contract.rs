//! User hook contracts and their payload records.

// std
use std::fmt;
// crates.io
use futures_util::future::BoxFuture;
// self
use crate::{
	_prelude::*,
	buffer::{BufferHandle, StateMap, log::{ExecutionContext, TransactionLog}},
	engine::{
		options::TrialMode,
		report::{ErrorLogEntry, SuccessLogEntry},
	},
};

/// Shared context handed to every hook alongside its payload.
///
/// Carries the live buffer handle instead of rewriting buffer aliases into the
/// hook's own options; hooks that need the state receive it as an explicit
/// argument with exclusive access for the duration of the transaction.
#[derive(Clone, Debug)]
pub struct HookContext {
	/// Buffer backing the current call.
	pub buffer: BufferHandle,
	/// Correlation tuple for the originating request.
	pub execution_context: ExecutionContext,
	/// Transaction logs loaded for this call, if a loader was configured.
	pub transaction_logs: Arc<Vec<TransactionLog>>,
	/// Caller-supplied hook parameters.
	pub params: Option<Value>,
}

/// Payload for the pre-execution hook, run once before the attempt loop.
#[derive(Clone, Debug)]
pub struct PreExecutionArgs {
	/// Serializable projection of the active request options.
	pub options: Value,
	/// Shared hook context.
	pub context: HookContext,
}

/// Payload for the response analyzer, run on each ok attempt.
#[derive(Clone, Debug)]
pub struct ResponseAnalyzerArgs {
	/// Serializable projection of the transport config.
	pub request: Value,
	/// Response payload under validation.
	pub data: Value,
	/// HTTP status the response carried.
	pub status_code: Option<u16>,
	/// Trial-mode knobs, forwarded verbatim.
	pub trial_mode: Option<TrialMode>,
	/// Value returned by the pre-execution hook, if any.
	pub pre_execution_result: Option<Value>,
	/// Shared hook context.
	pub context: HookContext,
}

/// Payload for the error hook, run on each failed attempt when enabled.
#[derive(Clone, Debug)]
pub struct ErrorHookArgs {
	/// Serializable projection of the transport config.
	pub request: Value,
	/// Log entry describing the failure.
	pub error_log: ErrorLogEntry,
	/// Serialization budget for payload excerpts.
	pub max_serializable_chars: usize,
	/// Shared hook context.
	pub context: HookContext,
}

/// Payload for the success hook, run on each accepted attempt when enabled.
#[derive(Clone, Debug)]
pub struct SuccessHookArgs {
	/// Serializable projection of the transport config.
	pub request: Value,
	/// Log entry describing the accepted attempt.
	pub attempt_data: SuccessLogEntry,
	/// Shared hook context.
	pub context: HookContext,
}

/// Payload for the final error analyzer, run once after the loop fails.
#[derive(Clone, Debug)]
pub struct FinalErrorArgs {
	/// Serializable projection of the transport config.
	pub request: Value,
	/// Consolidated error string for the failed request.
	pub error: String,
	/// Trial-mode knobs, forwarded verbatim.
	pub trial_mode: Option<TrialMode>,
	/// Shared hook context.
	pub context: HookContext,
}

/// A named user hook over payload `A` returning `R`.
///
/// The callback receives the payload and exclusive access to the buffer state
/// for the duration of its transaction.
pub struct Hook<A, R> {
	name: Option<String>,
	#[allow(clippy::type_complexity)]
	callback: Arc<dyn for<'a> Fn(A, &'a mut StateMap) -> BoxFuture<'a, Result<R>> + Send + Sync>,
}
impl<A, R> Hook<A, R> {
	/// Wrap an anonymous callback.
	pub fn new<F>(callback: F) -> Self
	where
		F: for<'a> Fn(A, &'a mut StateMap) -> BoxFuture<'a, Result<R>> + Send + Sync + 'static,
	{
		Self { name: None, callback: Arc::new(callback) }
	}

	/// Wrap a callback under an explicit identifier.
	pub fn named<F>(name: impl Into<String>, callback: F) -> Self
	where
		F: for<'a> Fn(A, &'a mut StateMap) -> BoxFuture<'a, Result<R>> + Send + Sync + 'static,
	{
		Self { name: Some(name.into()), callback: Arc::new(callback) }
	}

	/// Hook identifier recorded in transaction logs.
	pub fn name(&self) -> &str {
		self.name.as_deref().unwrap_or("anonymous-hook")
	}

	#[allow(clippy::type_complexity)]
	pub(crate) fn callback(
		&self,
	) -> Arc<dyn for<'a> Fn(A, &'a mut StateMap) -> BoxFuture<'a, Result<R>> + Send + Sync> {
		self.callback.clone()
	}
}
impl<A, R> Clone for Hook<A, R> {
	fn clone(&self) -> Self {
		Self { name: self.name.clone(), callback: self.callback.clone() }
	}
}
impl<A, R> fmt::Debug for Hook<A, R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Hook").field("name", &self.name()).finish()
	}
}

/// Pre-execution hook: may return a partial options override.
pub type PreExecutionHook = Hook<PreExecutionArgs, Value>;
/// Response analyzer: `true` accepts the response, `false` requests a retry.
pub type ResponseAnalyzer = Hook<ResponseAnalyzerArgs, bool>;
/// Error observer; its return value is ignored.
pub type ErrorHook = Hook<ErrorHookArgs, ()>;
/// Success observer; its return value is ignored.
pub type SuccessHook = Hook<SuccessHookArgs, ()>;
/// Final error analyzer: `true` marks the failure handled.
pub type FinalErrorAnalyzer = Hook<FinalErrorArgs, bool>;

/// The five user hooks accepted by the engine.
#[derive(Clone, Debug, Default)]
pub struct Hooks {
	/// Run once before the attempt loop.
	pub pre_execution: Option<PreExecutionHook>,
	/// Run on each ok attempt to accept or reject the response.
	pub response_analyzer: Option<ResponseAnalyzer>,
	/// Run on each failed attempt when error logging is enabled.
	pub handle_errors: Option<ErrorHook>,
	/// Run on each accepted attempt when success logging is enabled.
	pub handle_successful_attempt_data: Option<SuccessHook>,
	/// Run once after the loop fails.
	pub final_error_analyzer: Option<FinalErrorAnalyzer>,
}
