//! Transport contract and the default reqwest-backed adapter.

// std
use std::{collections::BTreeMap, error::Error as _, fmt};
// crates.io
use futures_util::future::BoxFuture;
use http::Method;
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
// self
use crate::{_prelude::*, http::classify::{self, TransportErrorKind}};

/// Wire-ready request assembled by the engine from a request descriptor.
#[derive(Clone, Debug)]
pub struct TransportConfig {
	/// HTTP method.
	pub method: Method,
	/// Request path, always beginning with `/`.
	pub url: String,
	/// Composed scheme, host, and port.
	pub base_url: String,
	/// Header mapping forwarded verbatim.
	pub headers: BTreeMap<String, String>,
	/// Query mapping appended to the URL.
	pub params: BTreeMap<String, Value>,
	/// Optional JSON body.
	pub data: Option<Value>,
	/// Per-attempt timeout budget.
	pub timeout: Duration,
	/// Caller-issued cancellation token; firing aborts the attempt.
	pub cancel: Option<CancellationToken>,
}
impl TransportConfig {
	/// Fully composed request URL.
	pub fn full_url(&self) -> String {
		format!("{}{}", self.base_url, self.url)
	}
}

/// Normalized upstream response.
#[derive(Clone, Debug)]
pub struct TransportResponse {
	/// Parsed JSON body, or the raw text wrapped as a JSON string.
	pub data: Value,
	/// HTTP status code.
	pub status: u16,
	/// Canonical status reason.
	pub status_text: String,
	/// Response headers, lower-cased names.
	pub headers: BTreeMap<String, String>,
}

/// Failure raised by a transport, carrying whatever the upstream revealed.
#[derive(Clone, Debug)]
pub struct TransportFailure {
	/// Failure category.
	pub kind: TransportErrorKind,
	/// HTTP status when the upstream answered at all.
	pub status: Option<u16>,
	/// Response body attached to an error status.
	pub body: Option<Value>,
	/// Human-readable description.
	pub message: String,
}
impl TransportFailure {
	/// Build a cancellation failure with its dedicated error string.
	pub fn cancelled() -> Self {
		Self {
			kind: TransportErrorKind::Cancelled,
			status: None,
			body: None,
			message: "Request cancelled by caller.".into(),
		}
	}

	/// Build a failure from an upstream error status.
	pub fn from_status(status: u16, status_text: &str, body: Option<Value>) -> Self {
		Self {
			kind: TransportErrorKind::Status,
			status: Some(status),
			body,
			message: format!("Upstream responded with status {status} {status_text}."),
		}
	}

	/// Whether the classifier deems this failure worth another attempt.
	pub fn is_retryable(&self) -> bool {
		classify::is_retryable(self.kind, self.status)
	}

	/// Wire-level code string, when one applies.
	pub fn code(&self) -> Option<&'static str> {
		self.kind.code()
	}
}
impl fmt::Display for TransportFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if let Some(code) = self.code() {
			write!(f, "{code}: {}", self.message)
		} else {
			f.write_str(&self.message)
		}
	}
}

/// One-shot HTTP transport consumed by the request engine.
pub trait Transport: Send + Sync {
	/// Perform a single exchange; error statuses surface as [`TransportFailure`].
	fn send(
		&self,
		config: &TransportConfig,
	) -> BoxFuture<'_, std::result::Result<TransportResponse, TransportFailure>>;
}

/// Default transport backed by a shared [`reqwest::Client`].
#[derive(Clone, Debug)]
pub struct HttpTransport {
	client: Client,
}
impl HttpTransport {
	/// Build the default client with the crate's user agent and connect timeout.
	pub fn new() -> Result<Self> {
		let client = Client::builder()
			.user_agent(format!("resilient-request/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()?;

		Ok(Self { client })
	}

	/// Wrap an externally configured client.
	pub fn with_client(client: Client) -> Self {
		Self { client }
	}

	async fn exchange(
		&self,
		config: &TransportConfig,
	) -> std::result::Result<TransportResponse, TransportFailure> {
		let mut builder =
			self.client.request(config.method.clone(), config.full_url()).timeout(config.timeout);

		for (name, value) in &config.headers {
			builder = builder.header(name, value);
		}
		if !config.params.is_empty() {
			let pairs: Vec<(String, String)> = config
				.params
				.iter()
				.map(|(name, value)| (name.clone(), query_value(value)))
				.collect();

			builder = builder.query(&pairs);
		}
		if let Some(data) = &config.data {
			builder = builder.json(data);
		}

		let response = match &config.cancel {
			Some(cancel) => {
				tokio::select! {
					_ = cancel.cancelled() => return Err(TransportFailure::cancelled()),
					response = builder.send() => response,
				}
			},
			None => builder.send().await,
		}
		.map_err(|err| from_reqwest(&err))?;
		let status = response.status();
		let status_text = status.canonical_reason().unwrap_or("Unknown").to_string();
		let headers = response
			.headers()
			.iter()
			.filter_map(|(name, value)| {
				value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string()))
			})
			.collect();
		let text = response.text().await.map_err(|err| from_reqwest(&err))?;
		let data =
			serde_json::from_str::<Value>(&text).unwrap_or_else(|_| Value::String(text.clone()));

		if !status.is_success() {
			return Err(TransportFailure::from_status(
				status.as_u16(),
				&status_text,
				Some(data),
			));
		}

		Ok(TransportResponse { data, status: status.as_u16(), status_text, headers })
	}
}
impl Transport for HttpTransport {
	fn send(
		&self,
		config: &TransportConfig,
	) -> BoxFuture<'_, std::result::Result<TransportResponse, TransportFailure>> {
		let config = config.clone();

		Box::pin(async move { self.exchange(&config).await })
	}
}

fn query_value(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

fn from_reqwest(error: &reqwest::Error) -> TransportFailure {
	let kind = classify_reqwest(error);

	TransportFailure { kind, status: None, body: None, message: error.to_string() }
}

fn classify_reqwest(error: &reqwest::Error) -> TransportErrorKind {
	if error.is_timeout() {
		return TransportErrorKind::TimedOut;
	}

	let mut source = error.source();

	while let Some(cause) = source {
		if let Some(io) = cause.downcast_ref::<std::io::Error>() {
			match io.kind() {
				std::io::ErrorKind::ConnectionRefused => {
					return TransportErrorKind::ConnectionRefused;
				},
				std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe => {
					return TransportErrorKind::ConnectionReset;
				},
				std::io::ErrorKind::TimedOut => return TransportErrorKind::TimedOut,
				_ => {},
			}
		}

		let message = cause.to_string();

		if message.contains("dns error") || message.contains("failed to lookup address") {
			return TransportErrorKind::HostNotFound;
		}

		source = cause.source();
	}

	if error.is_connect() {
		return TransportErrorKind::ConnectionRefused;
	}

	TransportErrorKind::Other
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn config() -> TransportConfig {
		TransportConfig {
			method: Method::GET,
			url: "/status".into(),
			base_url: "https://api.example.com:443".into(),
			headers: BTreeMap::new(),
			params: BTreeMap::new(),
			data: None,
			timeout: Duration::from_secs(15),
			cancel: None,
		}
	}

	#[test]
	fn full_url_joins_base_and_path() {
		assert_eq!(config().full_url(), "https://api.example.com:443/status");
	}

	#[test]
	fn error_status_failures_carry_the_upstream_body() {
		let failure =
			TransportFailure::from_status(503, "Service Unavailable", Some(Value::Null));

		assert_eq!(failure.status, Some(503));
		assert!(failure.is_retryable());
		assert!(failure.message.contains("503"));
	}

	#[test]
	fn cancellation_failures_use_the_dedicated_error_string() {
		let failure = TransportFailure::cancelled();

		assert_eq!(failure.message, "Request cancelled by caller.");
		assert!(!failure.is_retryable());
	}

	#[test]
	fn query_values_keep_strings_bare() {
		assert_eq!(query_value(&Value::String("abc".into())), "abc");
		assert_eq!(query_value(&serde_json::json!(7)), "7");
		assert_eq!(query_value(&serde_json::json!(true)), "true");
	}
}
