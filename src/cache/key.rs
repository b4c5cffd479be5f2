//! Request fingerprinting for cache lookups.

// crates.io
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, http::transport::TransportConfig};

/// Caller-supplied key generator overriding the built-in fingerprint.
pub type KeyGenerator = Arc<dyn Fn(&TransportConfig) -> String + Send + Sync>;

/// Header subset folded into the fingerprint, lower-case.
const FINGERPRINT_HEADERS: [&str; 4] =
	["accept", "accept-encoding", "accept-language", "authorization"];

/// Canonical fingerprint of a transport config.
///
/// `UPPER(method):url:json(params):header-subset`, where the header subset is the
/// sorted, pipe-separated `name:value` list over the four vary-relevant headers.
pub fn fingerprint(config: &TransportConfig) -> String {
	let method = config.method.as_str().to_uppercase();
	let url = config.full_url();
	let params = serde_json::to_string(&config.params).unwrap_or_default();
	let mut headers: Vec<String> = config
		.headers
		.iter()
		.filter_map(|(name, value)| {
			let name = name.to_lowercase();

			FINGERPRINT_HEADERS.contains(&name.as_str()).then(|| format!("{name}:{value}"))
		})
		.collect();

	headers.sort();

	format!("{method}:{url}:{params}:{}", headers.join("|"))
}

/// SHA-256 of the fingerprint, hex-encoded.
pub fn hash_key(fingerprint: &str) -> String {
	use std::fmt::Write;

	let digest = Sha256::digest(fingerprint.as_bytes());
	let mut hex = String::with_capacity(digest.len() * 2);

	for byte in digest {
		let _ = write!(hex, "{byte:02x}");
	}

	hex
}

/// Deterministic non-cryptographic 32-bit FNV-1a hash, 8 hex digits.
///
/// Available for custom key generators that want a cheap stable hash.
pub fn fallback_hash(fingerprint: &str) -> String {
	let mut hash: u32 = 0x811c_9dc5;

	for byte in fingerprint.as_bytes() {
		hash ^= *byte as u32;
		hash = hash.wrapping_mul(0x0100_0193);
	}

	format!("{hash:08x}")
}

/// Default cache key: hashed canonical fingerprint.
pub fn cache_key(config: &TransportConfig) -> String {
	hash_key(&fingerprint(config))
}
