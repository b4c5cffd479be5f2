//! Bounded LRU response cache with TTL, counters, and optional persistence.

// std
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	cache::{
		key::{self, KeyGenerator},
		policy::CacheAdmission,
	},
	http::transport::{TransportConfig, TransportResponse},
	persist::{PersistCoordinator, PersistenceHooks},
};

/// Default bound on the number of cached entries.
const DEFAULT_MAX_SIZE: usize = 100;

/// Cache construction parameters.
#[derive(Clone, Default)]
pub struct CacheConfig {
	/// Maximum number of entries held at once; must be at least 1.
	pub max_size: Option<usize>,
	/// Admission rules for methods, statuses, and TTL resolution.
	pub admission: CacheAdmission,
	/// Custom key generator overriding the canonical fingerprint.
	pub key_generator: Option<KeyGenerator>,
	/// Persistence callbacks; absent disables persistence entirely.
	pub persistence: Option<PersistenceHooks>,
	/// Label prefixing persistence operation ids.
	pub label: Option<String>,
}
impl fmt::Debug for CacheConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CacheConfig")
			.field("max_size", &self.max_size)
			.field("admission", &self.admission)
			.field("key_generator", &self.key_generator.is_some())
			.field("persistence", &self.persistence.is_some())
			.field("label", &self.label)
			.finish()
	}
}

/// One cached response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
	/// Response payload.
	pub data: Value,
	/// HTTP status the response carried.
	pub status: u16,
	/// Canonical status reason.
	pub status_text: String,
	/// Response headers at storage time.
	pub headers: BTreeMap<String, String>,
	/// Epoch millis when the entry was stored.
	pub timestamp: i64,
	/// Epoch millis past which the entry is expired; always after `timestamp`.
	pub expires_at: i64,
}

/// Raw operation counters.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CacheCounters {
	/// Lookups served from the cache.
	pub hits: u64,
	/// Lookups that found nothing usable.
	pub misses: u64,
	/// Entries written.
	pub sets: u64,
	/// Entries evicted by the LRU bound.
	pub evictions: u64,
	/// Entries dropped because they had expired.
	pub expirations: u64,
	/// Wall-clock total spent in lookups.
	pub total_get_time_ms: f64,
	/// Wall-clock total spent in stores.
	pub total_set_time_ms: f64,
}

/// Point-in-time cache statistics with derived rates.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CacheStats {
	/// Entries currently held.
	pub size: usize,
	/// Configured bound.
	pub max_size: usize,
	/// Raw counters.
	#[serde(flatten)]
	pub counters: CacheCounters,
	/// Hits over total lookups, in `[0, 1]`.
	pub hit_rate: f64,
	/// Misses over total lookups, in `[0, 1]`.
	pub miss_rate: f64,
	/// Occupancy over the bound, in `[0, 100]`.
	pub utilization_percentage: f64,
	/// Mean entry age in milliseconds.
	pub average_cache_age_ms: f64,
	/// Age of the oldest entry, zero when empty.
	pub oldest_entry_age_ms: u64,
	/// Age of the newest entry, zero when empty.
	pub newest_entry_age_ms: u64,
}

/// Persistence shape mirroring the cache internals.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedCacheState {
	/// Stored entries keyed by fingerprint hash.
	pub entries: HashMap<String, CacheEntry>,
	/// LRU order, least recently used first.
	pub access_order: Vec<String>,
	/// Counters at persistence time.
	pub counters: CacheCounters,
}

/// Bounded LRU of cached responses keyed by request fingerprints.
#[derive(Clone)]
pub struct ResponseCache {
	inner: Arc<tokio::sync::Mutex<Inner>>,
	admission: Arc<CacheAdmission>,
	key_generator: Option<KeyGenerator>,
	max_size: usize,
	coordinator: Option<Arc<PersistCoordinator>>,
}
impl ResponseCache {
	/// Build a cache, validating the configured bound.
	pub fn new(config: CacheConfig) -> Result<Self> {
		let max_size = config.max_size.unwrap_or(DEFAULT_MAX_SIZE);

		if max_size == 0 {
			return Err(Error::Validation {
				field: "max_size",
				reason: "Must be at least 1.".into(),
			});
		}

		let coordinator = config.persistence.map(|hooks| {
			Arc::new(PersistCoordinator::new(
				config.label.unwrap_or_else(|| "response-cache".into()),
				hooks,
			))
		});

		Ok(Self {
			inner: Arc::new(tokio::sync::Mutex::new(Inner::default())),
			admission: Arc::new(config.admission),
			key_generator: config.key_generator,
			max_size,
			coordinator,
		})
	}

	/// Restore entries, access order, and counters from persistence.
	///
	/// Load failures are logged and ignored; the cache simply starts cold.
	pub async fn initialize(&self) -> Result<()> {
		let Some(coordinator) = &self.coordinator else { return Ok(()) };

		match coordinator.load().await {
			Ok(outcome) =>
				if let Some(state) = outcome.state {
					match serde_json::from_value::<PersistedCacheState>(state) {
						Ok(persisted) => {
							let mut inner = self.inner.lock().await;

							inner.entries = persisted.entries;
							inner.access_order = persisted.access_order.into();
							inner.counters = persisted.counters;

							tracing::debug!(
								entries = inner.entries.len(),
								"restored cache from persistence"
							);
						},
						Err(err) => {
							tracing::warn!(error = %err, "persisted cache state is malformed");
						},
					}
				},
			Err(err) => {
				tracing::warn!(error = %err, "cache persistence load failed");
			},
		}

		Ok(())
	}

	/// Cache key for the given transport config.
	pub fn key_for(&self, config: &TransportConfig) -> String {
		match &self.key_generator {
			Some(generator) => generator(config),
			None => key::cache_key(config),
		}
	}

	/// Whether the method may use the cache at all.
	pub fn method_is_cacheable(&self, config: &TransportConfig) -> bool {
		self.admission.method_is_cacheable(&config.method)
	}

	/// Look up a cached response for the config.
	///
	/// Expired entries found here are deleted and counted as both a miss and an
	/// expiration. Hits refresh the entry's LRU position.
	pub async fn lookup(&self, config: &TransportConfig) -> Option<CacheEntry> {
		if !self.method_is_cacheable(config) {
			return None;
		}

		let started = Instant::now();
		let key = self.key_for(config);
		let now = Utc::now().timestamp_millis();
		let (entry, mutated) = {
			let mut inner = self.inner.lock().await;
			let found = match inner.entries.get(&key) {
				None => Found::Missing,
				Some(entry) if entry.expires_at <= now => Found::Expired,
				Some(entry) => Found::Fresh(entry.clone()),
			};
			let outcome = match found {
				Found::Missing => {
					inner.counters.misses += 1;

					(None, false)
				},
				Found::Expired => {
					inner.entries.remove(&key);
					inner.access_order.retain(|existing| existing != &key);
					inner.counters.expirations += 1;
					inner.counters.misses += 1;

					(None, true)
				},
				// The LRU reorder counts as a mutation, so hits persist too.
				Found::Fresh(entry) => {
					inner.access_order.retain(|existing| existing != &key);
					inner.access_order.push_back(key.clone());
					inner.counters.hits += 1;

					(Some(entry), true)
				},
			};

			inner.counters.total_get_time_ms += started.elapsed().as_secs_f64() * 1_000.;

			outcome
		};

		if mutated {
			self.persist().await;
		}

		entry
	}

	/// Store a response when the method, status, and TTL resolution all allow it.
	pub async fn store(&self, config: &TransportConfig, response: &TransportResponse) -> bool {
		if !self.method_is_cacheable(config) {
			return false;
		}
		if !self.admission.status_is_cacheable(response.status) {
			return false;
		}

		let Some(ttl) = self.admission.resolve_ttl(&response.headers) else {
			return false;
		};

		if ttl.is_zero() {
			return false;
		}

		let started = Instant::now();
		let key = self.key_for(config);
		let timestamp = Utc::now().timestamp_millis();
		let entry = CacheEntry {
			data: response.data.clone(),
			status: response.status,
			status_text: response.status_text.clone(),
			headers: response.headers.clone(),
			timestamp,
			expires_at: timestamp + ttl.as_millis() as i64,
		};

		{
			let mut inner = self.inner.lock().await;

			if inner.entries.contains_key(&key) {
				inner.access_order.retain(|existing| existing != &key);
			} else {
				while inner.entries.len() >= self.max_size {
					let Some(evicted) = inner.access_order.pop_front() else { break };

					if inner.entries.remove(&evicted).is_some() {
						inner.counters.evictions += 1;
					}
				}
			}

			inner.entries.insert(key.clone(), entry);
			inner.access_order.push_back(key);
			inner.counters.sets += 1;
			inner.counters.total_set_time_ms += started.elapsed().as_secs_f64() * 1_000.;
		}

		self.persist().await;

		true
	}

	/// Point-in-time statistics with derived rates.
	pub async fn stats(&self) -> CacheStats {
		let inner = self.inner.lock().await;
		let now = Utc::now().timestamp_millis();
		let lookups = inner.counters.hits + inner.counters.misses;
		let ages: Vec<u64> = inner
			.entries
			.values()
			.map(|entry| now.saturating_sub(entry.timestamp).max(0) as u64)
			.collect();
		let average_cache_age_ms = if ages.is_empty() {
			0.
		} else {
			ages.iter().sum::<u64>() as f64 / ages.len() as f64
		};

		CacheStats {
			size: inner.entries.len(),
			max_size: self.max_size,
			counters: inner.counters,
			hit_rate: rate(inner.counters.hits, lookups),
			miss_rate: rate(inner.counters.misses, lookups),
			utilization_percentage: inner.entries.len() as f64 / self.max_size as f64 * 100.,
			average_cache_age_ms,
			oldest_entry_age_ms: ages.iter().copied().max().unwrap_or(0),
			newest_entry_age_ms: ages.iter().copied().min().unwrap_or(0),
		}
	}

	/// Drop every entry, keeping counters.
	pub async fn clear(&self) {
		let mut inner = self.inner.lock().await;

		inner.entries.clear();
		inner.access_order.clear();
	}

	async fn persist(&self) {
		let Some(coordinator) = &self.coordinator else { return };
		let snapshot = {
			let inner = self.inner.lock().await;

			PersistedCacheState {
				entries: inner.entries.clone(),
				access_order: inner.access_order.iter().cloned().collect(),
				counters: inner.counters,
			}
		};

		match serde_json::to_value(&snapshot) {
			Ok(state) =>
				if let Err(err) = coordinator.store(state).await {
					tracing::warn!(error = %err, "cache persistence store failed");
				},
			Err(err) => {
				tracing::warn!(error = %err, "cache snapshot serialization failed");
			},
		}
	}
}

impl fmt::Debug for ResponseCache {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResponseCache")
			.field("max_size", &self.max_size)
			.field("admission", &self.admission)
			.field("key_generator", &self.key_generator.is_some())
			.field("persistence", &self.coordinator.is_some())
			.finish()
	}
}

#[derive(Debug, Default)]
struct Inner {
	entries: HashMap<String, CacheEntry>,
	access_order: VecDeque<String>,
	counters: CacheCounters,
}

enum Found {
	Missing,
	Expired,
	Fresh(CacheEntry),
}

fn rate(part: u64, whole: u64) -> f64 {
	if whole == 0 { 0. } else { part as f64 / whole as f64 }
}
