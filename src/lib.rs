//! Resilient async HTTP client orchestrator — retry, response validation, circuit
//! breaking, response caching, and a serialized transactional state buffer.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod breaker;
pub mod buffer;
pub mod cache;
pub mod engine;
pub mod hook;
pub mod http;
pub mod metrics;
pub mod persist;

mod error;
mod registry;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::Utc;
	pub use serde_json::{Map, Value};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}
#[cfg(feature = "prometheus")]
pub use crate::metrics::{install_default_exporter, prometheus_handle};
pub use crate::{
	breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState},
	buffer::{
		BufferHandle, BufferMetrics, StateMap, TransactionOptions,
		log::{ExecutionContext, ReplayOptions, TransactionLog, replay_transactions},
		plain::PlainBuffer,
		stable::{StableBuffer, StableBufferConfig},
	},
	cache::{CacheAdmission, CacheConfig, CacheEntry, CacheStats, ResponseCache},
	engine::{
		Protocol, RequestEngine, RequestOptions, RequestOptionsBuilder, RequestReport, TrialMode,
	},
	error::{Error, Result},
	hook::{
		ErrorHook, FinalErrorAnalyzer, Hook, HookPersistence, Hooks, PreExecutionHook,
		ResponseAnalyzer, SuccessHook,
	},
	http::backoff::RetryStrategy,
	metrics::{Guardrail, RequestMetrics},
	registry::{Registry, reset_global},
};
