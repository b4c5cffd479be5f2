//! Cache admission policy: method exclusion, status allowlist, and TTL resolution.

// std
use std::collections::BTreeMap;
use std::time::SystemTime;
// crates.io
use http::Method;
// self
use crate::_prelude::*;

/// Statuses the cache stores by default, per the heuristically-cacheable set.
const DEFAULT_CACHEABLE_STATUS_CODES: [u16; 11] =
	[200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

/// Default entry lifetime when response headers resolve nothing.
const DEFAULT_TTL: Duration = Duration::from_millis(300_000);

/// Admission rules applied before reading or writing the cache.
#[derive(Clone, Debug)]
pub struct CacheAdmission {
	/// Methods that never read from or write to the cache.
	pub exclude_methods: Vec<Method>,
	/// Statuses eligible for storage.
	pub cacheable_status_codes: Vec<u16>,
	/// Whether response `Cache-Control`/`Expires` headers drive the TTL.
	pub respect_cache_control: bool,
	/// TTL applied when headers resolve nothing.
	pub default_ttl: Duration,
}
impl CacheAdmission {
	/// Whether the method may use the cache at all.
	pub fn method_is_cacheable(&self, method: &Method) -> bool {
		!self.exclude_methods.contains(method)
	}

	/// Whether the status is eligible for storage.
	pub fn status_is_cacheable(&self, status: u16) -> bool {
		self.cacheable_status_codes.contains(&status)
	}

	/// Resolve the entry TTL from response headers; `None` means do not cache.
	///
	/// Precedence: `Cache-Control: no-cache`/`no-store` forbids caching, then
	/// `max-age`, then `Expires` (skipped when already past), then the default.
	pub fn resolve_ttl(&self, headers: &BTreeMap<String, String>) -> Option<Duration> {
		if self.respect_cache_control {
			if let Some(cache_control) = header(headers, "cache-control") {
				let directives: Vec<String> = cache_control
					.split(',')
					.map(|directive| directive.trim().to_lowercase())
					.collect();

				if directives.iter().any(|d| d == "no-cache" || d == "no-store") {
					return None;
				}
				if let Some(max_age) = directives.iter().find_map(|d| {
					d.strip_prefix("max-age=").and_then(|secs| secs.parse::<u64>().ok())
				}) {
					return (max_age > 0).then(|| Duration::from_secs(max_age));
				}
			}
			if let Some(expires) = header(headers, "expires") {
				let parsed = httpdate::parse_http_date(expires).ok()?;

				return parsed.duration_since(SystemTime::now()).ok().filter(|ttl| !ttl.is_zero());
			}
		}

		Some(self.default_ttl)
	}
}
impl Default for CacheAdmission {
	fn default() -> Self {
		Self {
			exclude_methods: vec![Method::POST, Method::PUT, Method::PATCH, Method::DELETE],
			cacheable_status_codes: DEFAULT_CACHEABLE_STATUS_CODES.to_vec(),
			respect_cache_control: true,
			default_ttl: DEFAULT_TTL,
		}
	}
}

fn header<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
	headers
		.iter()
		.find_map(|(key, value)| key.eq_ignore_ascii_case(name).then_some(value.as_str()))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
		pairs.iter().map(|(name, value)| (name.to_string(), value.to_string())).collect()
	}

	#[test]
	fn mutating_methods_are_excluded_by_default() {
		let admission = CacheAdmission::default();

		assert!(admission.method_is_cacheable(&Method::GET));
		assert!(admission.method_is_cacheable(&Method::HEAD));
		assert!(!admission.method_is_cacheable(&Method::POST));
		assert!(!admission.method_is_cacheable(&Method::DELETE));
	}

	#[test]
	fn status_allowlist_matches_the_default_table() {
		let admission = CacheAdmission::default();

		assert!(admission.status_is_cacheable(200));
		assert!(admission.status_is_cacheable(404));
		assert!(!admission.status_is_cacheable(500));
		assert!(!admission.status_is_cacheable(201));
	}

	#[test]
	fn no_store_and_no_cache_forbid_caching() {
		let admission = CacheAdmission::default();

		assert_eq!(admission.resolve_ttl(&headers(&[("cache-control", "no-store")])), None);
		assert_eq!(
			admission.resolve_ttl(&headers(&[("cache-control", "public, no-cache")])),
			None
		);
	}

	#[test]
	fn max_age_wins_over_the_default() {
		let admission = CacheAdmission::default();
		let ttl = admission.resolve_ttl(&headers(&[("cache-control", "public, max-age=120")]));

		assert_eq!(ttl, Some(Duration::from_secs(120)));
	}

	#[test]
	fn future_expires_resolves_and_past_expires_skips() {
		let admission = CacheAdmission::default();
		let future = httpdate::fmt_http_date(SystemTime::now() + Duration::from_secs(90));
		let ttl = admission
			.resolve_ttl(&headers(&[("expires", &future)]))
			.expect("future expires should cache");

		assert!(ttl <= Duration::from_secs(90));
		assert!(ttl > Duration::from_secs(60));

		let past = httpdate::fmt_http_date(SystemTime::now() - Duration::from_secs(90));

		assert_eq!(admission.resolve_ttl(&headers(&[("expires", &past)])), None);
	}

	#[test]
	fn missing_headers_fall_back_to_the_default_ttl() {
		let admission = CacheAdmission::default();

		assert_eq!(admission.resolve_ttl(&BTreeMap::new()), Some(DEFAULT_TTL));
	}

	#[test]
	fn ignoring_cache_control_always_uses_the_default() {
		let admission =
			CacheAdmission { respect_cache_control: false, ..Default::default() };
		let ttl = admission.resolve_ttl(&headers(&[("cache-control", "no-store")]));

		assert_eq!(ttl, Some(DEFAULT_TTL));
	}
}
