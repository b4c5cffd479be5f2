//! Acquire-or-create registry for breakers and caches shared across calls.

// std
use std::{
	collections::HashMap,
	sync::{Mutex, OnceLock, PoisonError},
};
// self
use crate::{
	_prelude::*,
	breaker::{CircuitBreaker, CircuitBreakerConfig},
	cache::{CacheConfig, ResponseCache},
};

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Named breaker and cache instances with first-configuration-wins semantics.
///
/// The process-wide instance behind [`Registry::global`] is the explicit
/// replacement for hidden singletons; it is cleared only through
/// [`Registry::reset`] or [`reset_global`].
#[derive(Debug, Default)]
pub struct Registry {
	breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
	caches: Mutex<HashMap<String, Arc<ResponseCache>>>,
}
impl Registry {
	/// Create an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Process-wide registry instance.
	pub fn global() -> &'static Registry {
		GLOBAL.get_or_init(Registry::new)
	}

	/// Fetch the named breaker, creating it from `config` on first acquisition.
	///
	/// Later acquisitions return the existing instance; their configs are ignored.
	pub fn acquire_breaker(
		&self,
		name: impl Into<String>,
		config: CircuitBreakerConfig,
	) -> Arc<CircuitBreaker> {
		let mut breakers = lock(&self.breakers);

		breakers
			.entry(name.into())
			.or_insert_with(|| Arc::new(CircuitBreaker::new(config)))
			.clone()
	}

	/// Fetch the named cache, creating it from `config` on first acquisition.
	pub fn acquire_cache(
		&self,
		name: impl Into<String>,
		config: CacheConfig,
	) -> Result<Arc<ResponseCache>> {
		let mut caches = lock(&self.caches);
		let name = name.into();

		if let Some(existing) = caches.get(&name) {
			return Ok(existing.clone());
		}

		let cache = Arc::new(ResponseCache::new(config)?);

		caches.insert(name, cache.clone());

		Ok(cache)
	}

	/// Look up an already-acquired breaker.
	pub fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
		lock(&self.breakers).get(name).cloned()
	}

	/// Look up an already-acquired cache.
	pub fn cache(&self, name: &str) -> Option<Arc<ResponseCache>> {
		lock(&self.caches).get(name).cloned()
	}

	/// Drop every registered instance.
	pub fn reset(&self) {
		lock(&self.breakers).clear();
		lock(&self.caches).clear();
	}
}

/// Reset the process-wide registry.
pub fn reset_global() {
	Registry::global().reset();
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
