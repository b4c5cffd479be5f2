//! Plain in-memory buffer: the unserialized counterpart of the stable buffer.

// self
use crate::{
	_prelude::*,
	buffer::{StateMap, TransactionBody},
};

/// Mutex-guarded state mapping without queueing, logging, or metrics.
///
/// Transactions still execute one at a time (the mutex enforces that much), but
/// there is no FIFO fairness guarantee, no transaction id, and no log trail.
#[derive(Clone, Debug, Default)]
pub struct PlainBuffer {
	state: Arc<tokio::sync::Mutex<StateMap>>,
}
impl PlainBuffer {
	/// Create an empty buffer.
	pub fn new() -> Self {
		Self::default()
	}

	/// Create a buffer seeded with the given state.
	pub fn with_state(state: StateMap) -> Self {
		Self { state: Arc::new(tokio::sync::Mutex::new(state)) }
	}

	/// Deep clone of the current state.
	pub async fn read(&self) -> StateMap {
		self.state.lock().await.clone()
	}

	/// Live handle to the underlying state.
	pub fn state(&self) -> Arc<tokio::sync::Mutex<StateMap>> {
		self.state.clone()
	}

	/// Atomically replace the state mapping.
	pub async fn set_state(&self, state: StateMap) {
		*self.state.lock().await = state;
	}

	/// Run a transaction body with exclusive access to the state.
	pub async fn run(&self, body: TransactionBody) -> Result<Value> {
		let mut state = self.state.lock().await;

		body(&mut state).await
	}
}
