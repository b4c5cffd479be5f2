//! Scripted in-process transport for deterministic failure sequences.

// std
use std::{
	collections::{BTreeMap, VecDeque},
	sync::{
		Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};
// crates.io
use futures_util::future::BoxFuture;
use serde_json::Value;
// self
use resilient_request::http::{
	classify::TransportErrorKind,
	transport::{Transport, TransportConfig, TransportFailure, TransportResponse},
};

/// Outcome of one scripted exchange.
pub type ScriptedOutcome = Result<TransportResponse, TransportFailure>;

/// Transport replaying a fixed outcome sequence and counting invocations.
pub struct ScriptedTransport {
	script: Mutex<VecDeque<ScriptedOutcome>>,
	calls: AtomicUsize,
}
impl ScriptedTransport {
	pub fn new(script: Vec<ScriptedOutcome>) -> Self {
		Self { script: Mutex::new(script.into()), calls: AtomicUsize::new(0) }
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl Transport for ScriptedTransport {
	fn send(&self, _config: &TransportConfig) -> BoxFuture<'_, ScriptedOutcome> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let next = self.script.lock().expect("script lock").pop_front().unwrap_or_else(|| {
			Err(TransportFailure {
				kind: TransportErrorKind::Other,
				status: None,
				body: None,
				message: "Scripted transport exhausted.".into(),
			})
		});

		Box::pin(async move { next })
	}
}

/// A 200 response carrying the given payload and headers.
pub fn ok_response(data: Value, headers: &[(&str, &str)]) -> ScriptedOutcome {
	Ok(TransportResponse {
		data,
		status: 200,
		status_text: "OK".into(),
		headers: headers
			.iter()
			.map(|(name, value)| (name.to_string(), value.to_string()))
			.collect::<BTreeMap<_, _>>(),
	})
}

/// A connection-reset transport failure.
pub fn connection_reset() -> ScriptedOutcome {
	Err(TransportFailure {
		kind: TransportErrorKind::ConnectionReset,
		status: None,
		body: None,
		message: "connection reset by peer".into(),
	})
}

/// An upstream error status failure.
pub fn status_failure(status: u16, reason: &str) -> ScriptedOutcome {
	Err(TransportFailure::from_status(status, reason, None))
}

/// A caller-cancellation failure.
pub fn cancelled() -> ScriptedOutcome {
	Err(TransportFailure::cancelled())
}
