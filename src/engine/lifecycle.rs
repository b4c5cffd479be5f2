//! The request engine: the top-level attempt loop composing breaker, cache,
//! transport, hooks, and backoff.

// std
use std::fmt;
// crates.io
use serde_json::json;
// self
use crate::{
	_prelude::*,
	engine::{
		options::RequestOptions,
		report::{
			AttemptResult, ErrorLogEntry, ErrorLogType, RequestReport, SuccessLogEntry,
			truncate_serialized,
		},
	},
	buffer::{BufferHandle, stable::StableBuffer},
	hook::{
		ErrorHookArgs, FinalErrorArgs, HookContext, HookInvocation, PreExecutionArgs,
		ResponseAnalyzerArgs, SuccessHookArgs, run_hook,
	},
	http::{
		backoff::sample_probability,
		classify::TransportErrorKind,
		transport::{
			HttpTransport, Transport, TransportConfig, TransportFailure, TransportResponse,
		},
	},
	metrics::RequestMetrics,
};

/// Orchestrates one logical request per [`Self::execute`] call.
#[derive(Clone)]
pub struct RequestEngine {
	transport: Arc<dyn Transport>,
}
impl RequestEngine {
	/// Build an engine over the default reqwest transport.
	pub fn new() -> Result<Self> {
		Ok(Self { transport: Arc::new(HttpTransport::new()?) })
	}

	/// Build an engine over a custom transport.
	pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
		Self { transport }
	}

	/// Issue one logical request and drive it to a terminal report.
	///
	/// Every captured failure ends in `Ok` with `success = false`; an `Err` leaves
	/// this function only for the two documented rethrow conditions.
	#[tracing::instrument(
		skip(self, options),
		fields(
			hostname = %options.hostname,
			method = %options.method,
			request_id = options.context.request_id.as_deref().unwrap_or_default(),
		)
	)]
	pub async fn execute(&self, options: RequestOptions) -> Result<RequestReport> {
		let mut options = options;

		options.validate()?;
		options.clamp();

		let buffer = options
			.buffer
			.clone()
			.unwrap_or_else(|| BufferHandle::Stable(StableBuffer::default()));
		let transaction_logs = match &options.transaction_log_loader {
			Some(loader) => match loader(options.context.clone()).await {
				Ok(logs) => Arc::new(logs),
				Err(err) => {
					tracing::warn!(error = %err, "transaction log loader failed");

					Arc::new(Vec::new())
				},
			},
			None => Arc::new(Vec::new()),
		};
		let hook_context = HookContext {
			buffer: buffer.clone(),
			execution_context: options.context.clone(),
			transaction_logs,
			params: options.hook_params.clone(),
		};

		// Pre-execution hook, once before the loop.
		let mut pre_execution_result = None;

		if let Some(hook) = options.hooks.pre_execution.clone() {
			let args =
				PreExecutionArgs { options: options.summary(), context: hook_context.clone() };
			let invocation = HookInvocation {
				activity: None,
				hook_params: options.hook_params.clone(),
				context: options.context.clone(),
			};

			match run_hook(&buffer, &hook, args, options.hook_persistence.as_ref(), invocation)
				.await
			{
				Ok(returned) => {
					if options.apply_pre_execution_config_override
						&& let Value::Object(map) = &returned
					{
						options.apply_override(map);
						options.clamp();

						tracing::debug!("applied pre-execution config override");
					}

					pre_execution_result = Some(returned);
				},
				Err(err) => {
					tracing::warn!(error = %err, "pre-execution hook failed");

					if !options.continue_on_pre_execution_hook_failure {
						if options.throw_on_failed_error_analysis {
							return Err(err);
						}

						let metrics = assemble_metrics(&options, &buffer, &Tally::default()).await;

						return Ok(RequestReport {
							success: false,
							data: None,
							error: Some(err.to_string()),
							error_logs: None,
							successful_attempts: None,
							metrics,
						});
					}
				},
			}
		}

		let config = options.transport_config()?;
		let request_summary = config_summary(&config);
		let backoff = options.backoff();
		let attempts_budget = options.attempts;
		let mut tally = Tally::default();
		let mut error_logs: Vec<ErrorLogEntry> = Vec::new();
		let mut success_logs: Vec<SuccessLogEntry> = Vec::new();
		let mut last_success: Option<Value> = None;
		let mut last_error: Option<String> = None;
		let mut terminal_error: Option<Error> = None;
		let mut last_attempt_accepted = false;
		let hook_invocation = || HookInvocation {
			activity: None,
			hook_params: options.hook_params.clone(),
			context: options.context.clone(),
		};

		'attempts: for attempt in 1..=attempts_budget {
			// Breaker admission.
			if let Some(breaker) = &options.breaker
				&& (breaker.track_individual_attempts() || attempt == 1)
				&& !breaker.can_execute().await
			{
				let err = breaker.open_error();

				tracing::debug!(attempt, "breaker denied admission");

				last_error = Some(err.to_string());
				terminal_error = Some(err);

				break 'attempts;
			}

			// Cache consultation; a hit short-circuits the entire call.
			if let Some(cache) = &options.cache
				&& let Some(entry) = cache.lookup(&config).await
			{
				tracing::debug!(attempt, "served from response cache");

				#[cfg(feature = "metrics")]
				crate::metrics::record_cache_event(&options.hostname, "hit");

				tally.from_cache = true;
				last_success = Some(entry.data);
				last_attempt_accepted = true;

				break 'attempts;
			}

			// Transport exchange, or a synthesized outcome in trial mode.
			let attempt_started = Instant::now();
			let outcome = match &options.trial_mode {
				Some(trial) if trial.enabled =>
					if sample_probability(trial.req_failure_probability) {
						Err(TransportFailure::from_status(
							503,
							"Service Unavailable",
							Some(json!({ "synthesized": true })),
						))
					} else {
						Ok(TransportResponse {
							data: json!({}),
							status: 200,
							status_text: "OK".into(),
							headers: Default::default(),
						})
					},
				_ => self.transport.send(&config).await,
			};
			let execution_time_ms = attempt_started.elapsed().as_millis() as u64;
			let timestamp = Utc::now().timestamp_millis();

			tally.executed += 1;
			tally.execution_time_ms += execution_time_ms;

			match outcome {
				Err(failure) => {
					let cancelled = failure.kind == TransportErrorKind::Cancelled;
					let result = AttemptResult {
						ok: false,
						is_retryable: failure.is_retryable(),
						timestamp,
						execution_time_ms,
						status_code: failure.status,
						error: Some(failure.to_string()),
						data: failure.body,
						from_cache: false,
					};

					tracing::debug!(
						attempt,
						retryable = result.is_retryable,
						status = result.status_code,
						"attempt failed in transport"
					);

					#[cfg(feature = "metrics")]
					crate::metrics::record_attempt(
						&options.hostname,
						"failure",
						execution_time_ms as f64 / 1_000.,
					);

					last_error = result.error.clone();
					last_attempt_accepted = false;

					// Attempt-level accounting on transport failure.
					if let Some(breaker) = &options.breaker
						&& breaker.track_individual_attempts()
						&& breaker.record_attempt_failure().await.just_opened
					{
						let err = breaker.open_error();

						last_error = Some(err.to_string());
						terminal_error = Some(err);

						break 'attempts;
					}

					if options.log_all_errors {
						let entry = ErrorLogEntry {
							timestamp: result.timestamp,
							attempt: format!("{attempt}/{attempts_budget}"),
							error: truncate_serialized(
								&Value::String(result.error.clone().unwrap_or_default()),
								options.max_serializable_chars,
							),
							log_type: ErrorLogType::HttpError,
							is_retryable: result.is_retryable,
							execution_time_ms: result.execution_time_ms,
							status_code: result.status_code,
						};

						error_logs.push(entry.clone());

						if let Some(hook) = &options.hooks.handle_errors {
							let args = ErrorHookArgs {
								request: request_summary.clone(),
								error_log: entry,
								max_serializable_chars: options.max_serializable_chars,
								context: hook_context.clone(),
							};

							if let Err(err) = run_hook(
								&buffer,
								hook,
								args,
								options.hook_persistence.as_ref(),
								hook_invocation(),
							)
							.await
							{
								tracing::warn!(error = %err, "error hook failed");
							}
						}
					}

					// Cancellation terminates the loop immediately.
					if cancelled {
						terminal_error = Some(Error::Cancelled);

						break 'attempts;
					}

					let keep_going = attempt < attempts_budget
						&& (result.is_retryable || options.perform_all_attempts);

					if !keep_going {
						break 'attempts;
					}
				},
				Ok(response) => {
					#[cfg(feature = "metrics")]
					crate::metrics::record_attempt(
						&options.hostname,
						"success",
						execution_time_ms as f64 / 1_000.,
					);

					// Validation verdict; analyzer failures count as a retry.
					let accepted = match &options.hooks.response_analyzer {
						Some(analyzer) => {
							let args = ResponseAnalyzerArgs {
								request: request_summary.clone(),
								data: response.data.clone(),
								status_code: Some(response.status),
								trial_mode: options.trial_mode,
								pre_execution_result: pre_execution_result.clone(),
								context: hook_context.clone(),
							};

							match run_hook(
								&buffer,
								analyzer,
								args,
								options.hook_persistence.as_ref(),
								hook_invocation(),
							)
							.await
							{
								Ok(verdict) => verdict,
								Err(err) => {
									tracing::warn!(
										error = %err,
										"response analyzer failed; treating as retry"
									);

									false
								},
							}
						},
						None => true,
					};

					// Attempt-level accounting.
					if let Some(breaker) = &options.breaker
						&& breaker.track_individual_attempts()
					{
						let recorded = if accepted {
							breaker.record_attempt_success().await
						} else {
							breaker.record_attempt_failure().await
						};

						if recorded.just_opened {
							let err = breaker.open_error();

							last_error = Some(err.to_string());
							terminal_error = Some(err);

							break 'attempts;
						}
					}

					if accepted {
						tally.successful += 1;
						last_success = Some(response.data.clone());
						last_attempt_accepted = true;

						if options.log_all_successful_attempts {
							let entry = SuccessLogEntry {
								attempt,
								timestamp,
								data: response.data.clone(),
								execution_time_ms,
								status_code: Some(response.status),
							};

							success_logs.push(entry.clone());

							if let Some(hook) = &options.hooks.handle_successful_attempt_data {
								let args = SuccessHookArgs {
									request: request_summary.clone(),
									attempt_data: entry,
									context: hook_context.clone(),
								};

								if let Err(err) = run_hook(
									&buffer,
									hook,
									args,
									options.hook_persistence.as_ref(),
									hook_invocation(),
								)
								.await
								{
									tracing::warn!(error = %err, "success hook failed");
								}
							}
						}

						if let Some(cache) = &options.cache
							&& cache.store(&config, &response).await
						{
							#[cfg(feature = "metrics")]
							crate::metrics::record_cache_event(&options.hostname, "set");
						}
					} else {
						last_attempt_accepted = false;

						let error_string = format!(
							"Response rejected by analyzer: {}",
							truncate_serialized(&response.data, options.max_serializable_chars)
						);

						last_error = Some(error_string.clone());

						if options.log_all_errors {
							let entry = ErrorLogEntry {
								timestamp,
								attempt: format!("{attempt}/{attempts_budget}"),
								error: error_string,
								log_type: ErrorLogType::InvalidContent,
								is_retryable: true,
								execution_time_ms,
								status_code: Some(response.status),
							};

							error_logs.push(entry.clone());

							if let Some(hook) = &options.hooks.handle_errors {
								let args = ErrorHookArgs {
									request: request_summary.clone(),
									error_log: entry,
									max_serializable_chars: options.max_serializable_chars,
									context: hook_context.clone(),
								};

								if let Err(err) = run_hook(
									&buffer,
									hook,
									args,
									options.hook_persistence.as_ref(),
									hook_invocation(),
								)
								.await
								{
									tracing::warn!(error = %err, "error hook failed");
								}
							}
						}
					}

					let keep_going = attempt < attempts_budget
						&& (!accepted || options.perform_all_attempts);

					if !keep_going {
						break 'attempts;
					}
				},
			}

			// Backoff between attempts.
			let delay = backoff.delay(attempt);

			if !delay.is_zero() {
				tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "sleeping backoff");
				tokio::time::sleep(delay).await;
			}
		}

		// Termination.
		let success = if options.perform_all_attempts && tally.successful > 0 {
			true
		} else {
			last_attempt_accepted
		};

		// Request-level breaker accounting for the logical request.
		if let Some(breaker) = &options.breaker
			&& tally.executed > 0
		{
			if success {
				breaker.record_success().await;
			} else {
				breaker.record_failure().await;
			}
		}

		#[cfg(feature = "metrics")]
		crate::metrics::record_request(
			&options.hostname,
			if success { "success" } else { "failure" },
		);

		if success {
			let metrics = assemble_metrics(&options, &buffer, &tally).await;
			let payload = if options.res_req {
				last_success.unwrap_or_else(|| Value::Bool(true))
			} else {
				Value::Bool(true)
			};

			return Ok(RequestReport {
				success: true,
				data: Some(payload),
				error: None,
				error_logs: (!error_logs.is_empty()).then_some(error_logs),
				successful_attempts: (!success_logs.is_empty()).then_some(success_logs),
				metrics,
			});
		}

		let final_error = last_error
			.unwrap_or_else(|| "Request failed before any attempt was executed.".into());
		let mut handled = false;

		if let Some(analyzer) = &options.hooks.final_error_analyzer {
			let args = FinalErrorArgs {
				request: request_summary.clone(),
				error: final_error.clone(),
				trial_mode: options.trial_mode,
				context: hook_context.clone(),
			};

			match run_hook(
				&buffer,
				analyzer,
				args,
				options.hook_persistence.as_ref(),
				hook_invocation(),
			)
			.await
			{
				Ok(verdict) => handled = verdict,
				Err(err) => {
					tracing::warn!(error = %err, "final error analyzer failed");
				},
			}
		}

		if options.throw_on_failed_error_analysis && !handled {
			return Err(terminal_error.unwrap_or_else(|| Error::Unhandled(final_error.clone())));
		}

		let metrics = assemble_metrics(&options, &buffer, &tally).await;

		Ok(RequestReport {
			success: false,
			data: None,
			error: Some(final_error),
			error_logs: (!error_logs.is_empty()).then_some(error_logs),
			successful_attempts: (!success_logs.is_empty()).then_some(success_logs),
			metrics,
		})
	}
}
impl fmt::Debug for RequestEngine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RequestEngine").finish()
	}
}

/// Attempt accounting accumulated across the loop.
#[derive(Clone, Copy, Debug, Default)]
struct Tally {
	executed: u32,
	successful: u32,
	execution_time_ms: u64,
	from_cache: bool,
}

fn config_summary(config: &TransportConfig) -> Value {
	json!({
		"method": config.method.as_str(),
		"url": config.url,
		"base_url": config.base_url,
		"headers": config.headers,
		"params": config.params,
		"data": config.data,
		"timeout_ms": config.timeout.as_millis() as u64,
	})
}

async fn assemble_metrics(
	options: &RequestOptions,
	buffer: &BufferHandle,
	tally: &Tally,
) -> RequestMetrics {
	let cache = match &options.cache {
		Some(cache) => Some(cache.stats().await),
		None => None,
	};
	let mut metrics = RequestMetrics {
		total_attempts: tally.executed,
		successful_attempts: tally.successful,
		failed_attempts: tally.executed.saturating_sub(tally.successful),
		total_execution_time_ms: tally.execution_time_ms,
		average_attempt_time_ms: if tally.executed == 0 {
			0.
		} else {
			tally.execution_time_ms as f64 / tally.executed as f64
		},
		from_cache: tally.from_cache,
		buffer: buffer.metrics(),
		breaker: options.breaker.as_ref().map(|breaker| breaker.snapshot()),
		cache,
		anomalies: Vec::new(),
	};

	metrics.validate(&options.guardrails);

	metrics
}
