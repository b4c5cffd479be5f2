//! User hooks: contracts, payload records, and the persistence-aware runner.

pub mod contract;
pub mod runner;

pub use contract::{
	ErrorHook, ErrorHookArgs, FinalErrorAnalyzer, FinalErrorArgs, Hook, HookContext, Hooks,
	PreExecutionArgs, PreExecutionHook, ResponseAnalyzer, ResponseAnalyzerArgs, SuccessHook,
	SuccessHookArgs,
};
pub use runner::{HookInvocation, HookPersistFn, HookPersistence, PersistStage, run_hook};
