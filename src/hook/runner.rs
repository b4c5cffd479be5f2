//! Persistence-aware hook execution inside a buffer transaction.

// std
use std::fmt;
// crates.io
use futures_util::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
// self
use crate::{
	_prelude::*,
	buffer::{BufferHandle, StateMap, TransactionOptions, log::ExecutionContext},
	hook::contract::Hook,
};

/// Stage identifier handed to the hook-state persistence function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistStage {
	/// Invoked before the hook body, loading state to merge into the buffer.
	BeforeHook,
	/// Invoked after the hook body with the post-execution snapshot.
	AfterHook,
}

/// Hook-state persistence callback.
///
/// Receives the stage, a shallow snapshot of the buffer state, the execution
/// context, and the configured persistence params. A returned mapping is merged
/// into the buffer state by property assignment (load stage only).
pub type HookPersistFn = Arc<
	dyn Fn(
			PersistStage,
			StateMap,
			ExecutionContext,
			Option<Value>,
		) -> BoxFuture<'static, Result<Option<StateMap>>>
		+ Send
		+ Sync,
>;

/// Hook-state persistence configuration.
#[derive(Clone)]
pub struct HookPersistence {
	/// Load persisted state before each hook runs.
	pub load_before_hooks: bool,
	/// Store the post-execution snapshot after each hook runs.
	pub store_after_hooks: bool,
	/// The persistence callback itself.
	pub persist: HookPersistFn,
	/// Opaque params forwarded to every persistence call.
	pub params: Option<Value>,
}
impl fmt::Debug for HookPersistence {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HookPersistence")
			.field("load_before_hooks", &self.load_before_hooks)
			.field("store_after_hooks", &self.store_after_hooks)
			.field("params", &self.params)
			.finish()
	}
}

/// Transaction metadata for one hook invocation.
#[derive(Clone, Debug, Default)]
pub struct HookInvocation {
	/// Activity tag; defaults to `hook`.
	pub activity: Option<String>,
	/// Parameters recorded alongside the hook name.
	pub hook_params: Option<Value>,
	/// Correlation tuple for the originating request.
	pub context: ExecutionContext,
}

/// Execute a hook inside the buffer, loading and storing persisted state around it.
///
/// Persistence failures at either stage are logged and swallowed; a failure of
/// the hook body itself propagates to the caller.
pub async fn run_hook<A, R>(
	buffer: &BufferHandle,
	hook: &Hook<A, R>,
	args: A,
	persistence: Option<&HookPersistence>,
	invocation: HookInvocation,
) -> Result<R>
where
	A: Send + 'static,
	R: Serialize + DeserializeOwned + Send + 'static,
{
	let hook_name = hook.name().to_string();
	let callback = hook.callback();
	let persistence = persistence.cloned();
	let context = invocation.context.clone();
	let transaction_options = TransactionOptions {
		activity: invocation.activity.clone().or_else(|| Some("hook".into())),
		hook_name: Some(hook_name.clone()),
		hook_params: invocation.hook_params.clone(),
		context: invocation.context,
	};
	let raw = buffer
		.run(
			Box::new(move |state| {
				Box::pin(async move {
					if let Some(persistence) = &persistence
						&& persistence.load_before_hooks
					{
						match (persistence.persist)(
							PersistStage::BeforeHook,
							state.clone(),
							context.clone(),
							persistence.params.clone(),
						)
						.await
						{
							Ok(Some(loaded)) =>
								for (key, value) in loaded {
									state.insert(key, value);
								},
							Ok(None) => {},
							Err(err) => {
								tracing::warn!(
									hook = %hook_name,
									error = %err,
									"hook-state load failed"
								);
							},
						}
					}

					let returned = callback(args, state).await?;

					if let Some(persistence) = &persistence
						&& persistence.store_after_hooks
						&& let Err(err) = (persistence.persist)(
							PersistStage::AfterHook,
							state.clone(),
							context.clone(),
							persistence.params.clone(),
						)
						.await
					{
						tracing::warn!(
							hook = %hook_name,
							error = %err,
							"hook-state store failed"
						);
					}

					serde_json::to_value(&returned).map_err(Error::from)
				})
			}),
			transaction_options,
		)
		.await?;

	serde_json::from_value(raw).map_err(Error::from)
}
