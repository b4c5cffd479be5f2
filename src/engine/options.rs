//! Request descriptor, engine knobs, and the validating builder.

// std
use std::collections::{BTreeMap, HashMap};
use std::fmt;
// crates.io
use futures_util::future::BoxFuture;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
// self
use crate::{
	_prelude::*,
	breaker::CircuitBreaker,
	buffer::{BufferHandle, log::{ExecutionContext, TransactionLog}},
	cache::ResponseCache,
	hook::{Hooks, HookPersistence},
	http::{backoff::{BackoffPlan, RetryStrategy}, transport::TransportConfig},
	metrics::Guardrail,
};

/// Wire protocol for the composed base URL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
	/// Plain HTTP.
	Http,
	/// HTTPS.
	#[default]
	Https,
}
impl Protocol {
	/// URL scheme string.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Http => "http",
			Self::Https => "https",
		}
	}

	fn default_port(&self) -> u16 {
		match self {
			Self::Http => 80,
			Self::Https => 443,
		}
	}
}

/// Failure-simulation knobs; probabilities are validated into `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TrialMode {
	/// Whether attempts are synthesized instead of sent upstream.
	pub enabled: bool,
	/// Probability that an attempt synthesizes a transport failure.
	pub req_failure_probability: f64,
	/// Probability forwarded to the response analyzer for validation trials.
	pub res_failure_probability: f64,
}

/// Loader retrieving previously recorded transaction logs for a call.
pub type TransactionLogLoader =
	Arc<dyn Fn(ExecutionContext) -> BoxFuture<'static, Result<Vec<TransactionLog>>> + Send + Sync>;

/// Full per-call options: the request descriptor, retry knobs, hooks, and
/// collaborators. Construct through [`RequestOptions::builder`].
#[derive(Clone)]
pub struct RequestOptions {
	/// Upstream host; required.
	pub hostname: String,
	/// URL scheme.
	pub protocol: Protocol,
	/// HTTP method.
	pub method: Method,
	/// Request path; must begin with `/`.
	pub path: String,
	/// Port; defaults to the protocol's well-known port.
	pub port: Option<u16>,
	/// Request headers.
	pub headers: BTreeMap<String, String>,
	/// Query mapping.
	pub query: BTreeMap<String, Value>,
	/// Optional JSON body.
	pub body: Option<Value>,
	/// Per-attempt timeout in milliseconds.
	pub timeout_ms: u64,
	/// Caller-issued cancellation token.
	pub cancel: Option<CancellationToken>,
	/// Attempt budget, at least 1.
	pub attempts: u32,
	/// Keep attempting even after a success.
	pub perform_all_attempts: bool,
	/// Base backoff wait in milliseconds.
	pub wait_ms: u64,
	/// Hard ceiling on any computed backoff.
	pub max_allowed_wait_ms: u64,
	/// Backoff progression.
	pub retry_strategy: RetryStrategy,
	/// Backoff jitter amplitude in `[0, 1)`.
	pub jitter: f64,
	/// Whether the caller wants the payload in the result.
	pub res_req: bool,
	/// Record an error log entry per failed attempt.
	pub log_all_errors: bool,
	/// Record a success log entry per accepted attempt.
	pub log_all_successful_attempts: bool,
	/// Serialization budget for payload excerpts in error strings.
	pub max_serializable_chars: usize,
	/// Rethrow when the final error analysis leaves the failure unhandled.
	pub throw_on_failed_error_analysis: bool,
	/// Failure-simulation knobs.
	pub trial_mode: Option<TrialMode>,
	/// Opaque params forwarded to every hook.
	pub hook_params: Option<Value>,
	/// Keep going when the pre-execution hook fails.
	pub continue_on_pre_execution_hook_failure: bool,
	/// Merge a pre-execution hook's returned object over the active options.
	pub apply_pre_execution_config_override: bool,
	/// The five user hooks.
	pub hooks: Hooks,
	/// Hook-state persistence configuration.
	pub hook_persistence: Option<HookPersistence>,
	/// Buffer backing the call; defaults to a fresh stable buffer.
	pub buffer: Option<BufferHandle>,
	/// Response cache consulted per attempt.
	pub cache: Option<Arc<ResponseCache>>,
	/// Circuit breaker guarding admission.
	pub breaker: Option<Arc<CircuitBreaker>>,
	/// Correlation tuple threaded through hooks and logs.
	pub context: ExecutionContext,
	/// Loader for previously recorded transaction logs.
	pub transaction_log_loader: Option<TransactionLogLoader>,
	/// Guardrails evaluated against the assembled result metrics.
	pub guardrails: HashMap<String, Guardrail>,
}
impl RequestOptions {
	/// Start building options for the given host.
	pub fn builder(hostname: impl Into<String>) -> RequestOptionsBuilder {
		RequestOptionsBuilder { options: Self::bare(hostname.into()) }
	}

	fn bare(hostname: String) -> Self {
		Self {
			hostname,
			protocol: Protocol::default(),
			method: Method::GET,
			path: "/".into(),
			port: None,
			headers: BTreeMap::new(),
			query: BTreeMap::new(),
			body: None,
			timeout_ms: 15_000,
			cancel: None,
			attempts: 1,
			perform_all_attempts: false,
			wait_ms: 1_000,
			max_allowed_wait_ms: 60_000,
			retry_strategy: RetryStrategy::Fixed,
			jitter: 0.,
			res_req: true,
			log_all_errors: true,
			log_all_successful_attempts: true,
			max_serializable_chars: 1_000,
			throw_on_failed_error_analysis: false,
			trial_mode: None,
			hook_params: None,
			continue_on_pre_execution_hook_failure: false,
			apply_pre_execution_config_override: false,
			hooks: Hooks::default(),
			hook_persistence: None,
			buffer: None,
			cache: None,
			breaker: None,
			context: ExecutionContext::default(),
			transaction_log_loader: None,
			guardrails: HashMap::new(),
		}
	}

	/// Validate the descriptor and knobs against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.hostname.is_empty() {
			return Err(Error::Validation {
				field: "hostname",
				reason: "Must not be empty.".into(),
			});
		}
		if !self.path.starts_with('/') {
			return Err(Error::Validation {
				field: "path",
				reason: "Must begin with '/'.".into(),
			});
		}
		if !(0. ..1.).contains(&self.jitter) {
			return Err(Error::Validation {
				field: "jitter",
				reason: "Must lie in [0, 1).".into(),
			});
		}
		if let Some(trial) = &self.trial_mode {
			for (field, probability) in [
				("trial_mode.req_failure_probability", trial.req_failure_probability),
				("trial_mode.res_failure_probability", trial.res_failure_probability),
			] {
				if !(0. ..=1.).contains(&probability) {
					return Err(Error::Validation {
						field,
						reason: "Must lie in [0, 1].".into(),
					});
				}
			}
		}

		Ok(())
	}

	/// Clamp numeric ranges; the single place where out-of-range knobs are coerced.
	pub(crate) fn clamp(&mut self) {
		self.attempts = self.attempts.max(1);
		self.timeout_ms = self.timeout_ms.max(1);
		self.max_serializable_chars = self.max_serializable_chars.max(1);

		if !(0. ..1.).contains(&self.jitter) {
			self.jitter = 0.;
		}

		if let Some(trial) = &mut self.trial_mode {
			trial.req_failure_probability = trial.req_failure_probability.clamp(0., 1.);
			trial.res_failure_probability = trial.res_failure_probability.clamp(0., 1.);
		}
	}

	/// Resolved port for the composed base URL.
	pub fn resolved_port(&self) -> u16 {
		self.port.unwrap_or_else(|| self.protocol.default_port())
	}

	/// Build the transport-ready config, validating the composed URL.
	pub fn transport_config(&self) -> Result<TransportConfig> {
		let base_url =
			format!("{}://{}:{}", self.protocol.as_str(), self.hostname, self.resolved_port());

		Url::parse(&format!("{base_url}{}", self.path))?;

		Ok(TransportConfig {
			method: self.method.clone(),
			url: self.path.clone(),
			base_url,
			headers: self.headers.clone(),
			params: self.query.clone(),
			data: self.body.clone(),
			timeout: Duration::from_millis(self.timeout_ms),
			cancel: self.cancel.clone(),
		})
	}

	/// Backoff plan for the attempt loop.
	pub(crate) fn backoff(&self) -> BackoffPlan {
		BackoffPlan {
			strategy: self.retry_strategy,
			wait_ms: self.wait_ms,
			max_allowed_wait_ms: self.max_allowed_wait_ms,
			jitter: self.jitter,
		}
	}

	/// Serializable projection handed to the pre-execution hook.
	pub(crate) fn summary(&self) -> Value {
		json!({
			"hostname": self.hostname,
			"protocol": self.protocol,
			"method": self.method.as_str(),
			"path": self.path,
			"port": self.resolved_port(),
			"headers": self.headers,
			"query": self.query,
			"body": self.body,
			"timeout_ms": self.timeout_ms,
			"attempts": self.attempts,
			"perform_all_attempts": self.perform_all_attempts,
			"wait_ms": self.wait_ms,
			"max_allowed_wait_ms": self.max_allowed_wait_ms,
			"retry_strategy": self.retry_strategy,
			"jitter": self.jitter,
			"res_req": self.res_req,
			"log_all_errors": self.log_all_errors,
			"log_all_successful_attempts": self.log_all_successful_attempts,
			"max_serializable_chars": self.max_serializable_chars,
			"trial_mode": self.trial_mode,
		})
	}

	/// Merge a pre-execution override object over the active options.
	///
	/// Known keys replace their fields; `headers` and `query` merge entry-wise;
	/// unknown keys are ignored with a debug log. Numeric ranges are re-clamped
	/// afterwards by the caller.
	pub(crate) fn apply_override(&mut self, map: &Map<String, Value>) {
		for (key, value) in map {
			match key.as_str() {
				"hostname" =>
					if let Some(hostname) = value.as_str() {
						self.hostname = hostname.to_string();
					},
				"protocol" =>
					if let Ok(protocol) = serde_json::from_value(value.clone()) {
						self.protocol = protocol;
					},
				"method" =>
					if let Some(method) =
						value.as_str().and_then(|m| m.to_uppercase().parse::<Method>().ok())
					{
						self.method = method;
					},
				"path" =>
					if let Some(path) = value.as_str() {
						self.path = path.to_string();
					},
				"port" =>
					if let Some(port) = value.as_u64().and_then(|p| u16::try_from(p).ok()) {
						self.port = Some(port);
					},
				"headers" =>
					if let Some(headers) = value.as_object() {
						for (name, header) in headers {
							if let Some(header) = header.as_str() {
								self.headers.insert(name.clone(), header.to_string());
							}
						}
					},
				"query" =>
					if let Some(query) = value.as_object() {
						for (name, entry) in query {
							self.query.insert(name.clone(), entry.clone());
						}
					},
				"body" => self.body = Some(value.clone()),
				"timeout_ms" =>
					if let Some(timeout) = value.as_u64() {
						self.timeout_ms = timeout;
					},
				"attempts" =>
					if let Some(attempts) = value.as_u64().and_then(|a| u32::try_from(a).ok()) {
						self.attempts = attempts;
					},
				"perform_all_attempts" =>
					if let Some(flag) = value.as_bool() {
						self.perform_all_attempts = flag;
					},
				"wait_ms" =>
					if let Some(wait) = value.as_u64() {
						self.wait_ms = wait;
					},
				"max_allowed_wait_ms" =>
					if let Some(max) = value.as_u64() {
						self.max_allowed_wait_ms = max;
					},
				"retry_strategy" =>
					if let Ok(strategy) = serde_json::from_value(value.clone()) {
						self.retry_strategy = strategy;
					},
				"jitter" =>
					if let Some(jitter) = value.as_f64() {
						self.jitter = jitter;
					},
				"res_req" =>
					if let Some(flag) = value.as_bool() {
						self.res_req = flag;
					},
				"log_all_errors" =>
					if let Some(flag) = value.as_bool() {
						self.log_all_errors = flag;
					},
				"log_all_successful_attempts" =>
					if let Some(flag) = value.as_bool() {
						self.log_all_successful_attempts = flag;
					},
				"max_serializable_chars" =>
					if let Some(budget) =
						value.as_u64().and_then(|b| usize::try_from(b).ok())
					{
						self.max_serializable_chars = budget;
					},
				"trial_mode" =>
					if let Ok(trial) = serde_json::from_value(value.clone()) {
						self.trial_mode = trial;
					},
				other => {
					tracing::debug!(key = other, "ignoring unknown override key");
				},
			}
		}
	}
}
impl fmt::Debug for RequestOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RequestOptions")
			.field("hostname", &self.hostname)
			.field("method", &self.method)
			.field("path", &self.path)
			.field("attempts", &self.attempts)
			.field("retry_strategy", &self.retry_strategy)
			.field("cache", &self.cache.is_some())
			.field("breaker", &self.breaker.is_some())
			.finish()
	}
}

/// Fluent builder validating options at construction.
#[derive(Debug)]
pub struct RequestOptionsBuilder {
	options: RequestOptions,
}
impl RequestOptionsBuilder {
	/// Set the URL scheme.
	pub fn protocol(mut self, protocol: Protocol) -> Self {
		self.options.protocol = protocol;

		self
	}

	/// Set the HTTP method.
	pub fn method(mut self, method: Method) -> Self {
		self.options.method = method;

		self
	}

	/// Set the request path.
	pub fn path(mut self, path: impl Into<String>) -> Self {
		self.options.path = path.into();

		self
	}

	/// Set an explicit port.
	pub fn port(mut self, port: u16) -> Self {
		self.options.port = Some(port);

		self
	}

	/// Add a request header.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.options.headers.insert(name.into(), value.into());

		self
	}

	/// Add a query parameter.
	pub fn query(mut self, name: impl Into<String>, value: Value) -> Self {
		self.options.query.insert(name.into(), value);

		self
	}

	/// Set the JSON body.
	pub fn body(mut self, body: Value) -> Self {
		self.options.body = Some(body);

		self
	}

	/// Set the per-attempt timeout.
	pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
		self.options.timeout_ms = timeout_ms;

		self
	}

	/// Attach a cancellation token.
	pub fn cancel(mut self, cancel: CancellationToken) -> Self {
		self.options.cancel = Some(cancel);

		self
	}

	/// Set the attempt budget.
	pub fn attempts(mut self, attempts: u32) -> Self {
		self.options.attempts = attempts;

		self
	}

	/// Keep attempting even after a success.
	pub fn perform_all_attempts(mut self, flag: bool) -> Self {
		self.options.perform_all_attempts = flag;

		self
	}

	/// Set the base backoff wait.
	pub fn wait_ms(mut self, wait_ms: u64) -> Self {
		self.options.wait_ms = wait_ms;

		self
	}

	/// Set the backoff ceiling.
	pub fn max_allowed_wait_ms(mut self, max: u64) -> Self {
		self.options.max_allowed_wait_ms = max;

		self
	}

	/// Set the backoff progression.
	pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
		self.options.retry_strategy = strategy;

		self
	}

	/// Set the backoff jitter amplitude.
	pub fn jitter(mut self, jitter: f64) -> Self {
		self.options.jitter = jitter;

		self
	}

	/// Whether the caller wants the payload in the result.
	pub fn res_req(mut self, flag: bool) -> Self {
		self.options.res_req = flag;

		self
	}

	/// Record an error log entry per failed attempt.
	pub fn log_all_errors(mut self, flag: bool) -> Self {
		self.options.log_all_errors = flag;

		self
	}

	/// Record a success log entry per accepted attempt.
	pub fn log_all_successful_attempts(mut self, flag: bool) -> Self {
		self.options.log_all_successful_attempts = flag;

		self
	}

	/// Set the serialization budget for payload excerpts.
	pub fn max_serializable_chars(mut self, budget: usize) -> Self {
		self.options.max_serializable_chars = budget;

		self
	}

	/// Rethrow when the final error analysis leaves the failure unhandled.
	pub fn throw_on_failed_error_analysis(mut self, flag: bool) -> Self {
		self.options.throw_on_failed_error_analysis = flag;

		self
	}

	/// Configure trial mode.
	pub fn trial_mode(mut self, trial_mode: TrialMode) -> Self {
		self.options.trial_mode = Some(trial_mode);

		self
	}

	/// Set opaque hook params.
	pub fn hook_params(mut self, params: Value) -> Self {
		self.options.hook_params = Some(params);

		self
	}

	/// Keep going when the pre-execution hook fails.
	pub fn continue_on_pre_execution_hook_failure(mut self, flag: bool) -> Self {
		self.options.continue_on_pre_execution_hook_failure = flag;

		self
	}

	/// Merge a pre-execution hook's returned object over the active options.
	pub fn apply_pre_execution_config_override(mut self, flag: bool) -> Self {
		self.options.apply_pre_execution_config_override = flag;

		self
	}

	/// Install the user hooks.
	pub fn hooks(mut self, hooks: Hooks) -> Self {
		self.options.hooks = hooks;

		self
	}

	/// Configure hook-state persistence.
	pub fn hook_persistence(mut self, persistence: HookPersistence) -> Self {
		self.options.hook_persistence = Some(persistence);

		self
	}

	/// Back the call with an existing buffer.
	pub fn buffer(mut self, buffer: BufferHandle) -> Self {
		self.options.buffer = Some(buffer);

		self
	}

	/// Attach a response cache.
	pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
		self.options.cache = Some(cache);

		self
	}

	/// Attach a circuit breaker.
	pub fn breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
		self.options.breaker = Some(breaker);

		self
	}

	/// Set the correlation tuple.
	pub fn context(mut self, context: ExecutionContext) -> Self {
		self.options.context = context;

		self
	}

	/// Install a transaction log loader.
	pub fn transaction_log_loader(mut self, loader: TransactionLogLoader) -> Self {
		self.options.transaction_log_loader = Some(loader);

		self
	}

	/// Add a guardrail for one result metric.
	pub fn guardrail(mut self, metric: impl Into<String>, guardrail: Guardrail) -> Self {
		self.options.guardrails.insert(metric.into(), guardrail);

		self
	}

	/// Validate, clamp, and produce the options.
	pub fn build(mut self) -> Result<RequestOptions> {
		self.options.validate()?;
		self.options.clamp();

		Ok(self.options)
	}
}
