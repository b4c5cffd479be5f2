//! Retryable-error classification for transport failures.

// crates.io
use serde::{Deserialize, Serialize};

/// HTTP status codes worth retrying besides the 5xx range.
const RETRYABLE_STATUS_CODES: [u16; 3] = [408, 409, 429];

/// Failure category reported by a transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
	/// Peer reset the connection mid-exchange.
	ConnectionReset,
	/// The attempt exceeded its timeout budget.
	TimedOut,
	/// The peer refused the connection.
	ConnectionRefused,
	/// DNS resolution found no such host.
	HostNotFound,
	/// DNS resolution failed transiently.
	DnsTemporary,
	/// The caller's cancellation token fired.
	Cancelled,
	/// The upstream answered with a non-success HTTP status.
	Status,
	/// Anything else.
	Other,
}
impl TransportErrorKind {
	/// Wire-level code string carried into error logs.
	pub fn code(&self) -> Option<&'static str> {
		match self {
			Self::ConnectionReset => Some("ECONNRESET"),
			Self::TimedOut => Some("ETIMEDOUT"),
			Self::ConnectionRefused => Some("ECONNREFUSED"),
			Self::HostNotFound => Some("ENOTFOUND"),
			Self::DnsTemporary => Some("EAI_AGAIN"),
			Self::Cancelled | Self::Status | Self::Other => None,
		}
	}
}

/// Whether the given HTTP status justifies another attempt.
pub fn status_is_retryable(status: u16) -> bool {
	RETRYABLE_STATUS_CODES.contains(&status) || (500..600).contains(&status)
}

/// Classify a transport failure as retryable or terminal.
pub fn is_retryable(kind: TransportErrorKind, status: Option<u16>) -> bool {
	match kind {
		TransportErrorKind::ConnectionReset
		| TransportErrorKind::TimedOut
		| TransportErrorKind::ConnectionRefused
		| TransportErrorKind::HostNotFound
		| TransportErrorKind::DnsTemporary => true,
		TransportErrorKind::Status => status.map(status_is_retryable).unwrap_or(false),
		TransportErrorKind::Cancelled | TransportErrorKind::Other => false,
	}
}
