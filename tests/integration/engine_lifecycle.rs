//! End-to-end attempt-loop scenarios over a scripted transport.

// std
use std::sync::Arc;
// crates.io
use serde_json::{Value, json};
// self
use crate::support::{
	ScriptedTransport, cancelled, connection_reset, ok_response, status_failure,
};
use resilient_request::{
	BufferHandle, CircuitBreaker, CircuitBreakerConfig, Error, Hook, Hooks, RequestEngine,
	RequestOptions, Result, StableBuffer, StableBufferConfig,
	engine::ErrorLogType,
	hook::ResponseAnalyzerArgs,
};

fn scripted_engine(script: Vec<crate::support::ScriptedOutcome>) -> (RequestEngine, Arc<ScriptedTransport>) {
	let transport = Arc::new(ScriptedTransport::new(script));

	(RequestEngine::with_transport(transport.clone()), transport)
}

fn base_options() -> resilient_request::RequestOptionsBuilder {
	RequestOptions::builder("api.example.com").path("/v1/resource").attempts(3).wait_ms(10)
}

#[tokio::test]
async fn retryable_failures_are_retried_until_a_success() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let (engine, transport) = scripted_engine(vec![
		connection_reset(),
		connection_reset(),
		ok_response(json!({"data": "ok"}), &[]),
	]);
	let report = engine.execute(base_options().build()?).await?;

	assert!(report.success);
	assert_eq!(report.data, Some(json!({"data": "ok"})));
	assert_eq!(report.metrics.total_attempts, 3);
	assert_eq!(report.metrics.successful_attempts, 1);
	assert_eq!(report.error_logs.as_ref().map(Vec::len), Some(2));
	assert_eq!(transport.calls(), 3);

	for entry in report.error_logs.expect("error logs recorded") {
		assert_eq!(entry.log_type, ErrorLogType::HttpError);
		assert!(entry.is_retryable);
		assert!(entry.error.contains("ECONNRESET"));
	}

	Ok(())
}

#[tokio::test]
async fn exhausted_attempts_consolidate_the_last_error() -> Result<()> {
	let (engine, transport) = scripted_engine(vec![
		status_failure(500, "Internal Server Error"),
		status_failure(500, "Internal Server Error"),
		status_failure(500, "Internal Server Error"),
	]);
	let report = engine.execute(base_options().build()?).await?;

	assert!(!report.success);
	assert!(report.data.is_none());
	assert!(report.error.expect("consolidated error").contains("500"));
	assert_eq!(transport.calls(), 3);

	let entries = report.error_logs.expect("error logs recorded");

	assert_eq!(entries.len(), 3);

	for (index, entry) in entries.iter().enumerate() {
		assert_eq!(entry.log_type, ErrorLogType::HttpError);
		assert!(entry.is_retryable);
		assert_eq!(entry.status_code, Some(500));
		assert_eq!(entry.attempt, format!("{}/3", index + 1));
	}

	Ok(())
}

#[tokio::test]
async fn analyzer_rejections_retry_until_the_payload_settles() -> Result<()> {
	let (engine, transport) = scripted_engine(vec![
		ok_response(json!({"status": "pending"}), &[]),
		ok_response(json!({"status": "pending"}), &[]),
		ok_response(json!({"status": "done"}), &[]),
	]);
	let hooks = Hooks {
		response_analyzer: Some(Hook::named("status-settled", |args: ResponseAnalyzerArgs, _state| {
			Box::pin(async move { Ok(args.data["status"] == "done") })
		})),
		..Default::default()
	};
	let report = engine.execute(base_options().hooks(hooks).build()?).await?;

	assert!(report.success);
	assert_eq!(report.data, Some(json!({"status": "done"})));
	assert_eq!(report.metrics.total_attempts, 3);
	assert_eq!(transport.calls(), 3);

	let entries = report.error_logs.expect("rejections recorded");

	assert_eq!(entries.len(), 2);

	for entry in entries {
		assert_eq!(entry.log_type, ErrorLogType::InvalidContent);
		assert!(entry.is_retryable);
		assert_eq!(entry.status_code, Some(200));
	}

	Ok(())
}

#[tokio::test]
async fn cache_hits_short_circuit_the_transport() -> Result<()> {
	let cache = Arc::new(resilient_request::ResponseCache::new(Default::default())?);
	let (engine, transport) = scripted_engine(vec![
		ok_response(json!({"payload": 1}), &[("cache-control", "public, max-age=10")]),
		ok_response(json!({"payload": 2}), &[("cache-control", "public, max-age=10")]),
	]);
	let first =
		engine.execute(base_options().cache(cache.clone()).build()?).await?;

	assert!(first.success);
	assert!(!first.metrics.from_cache);
	assert_eq!(transport.calls(), 1);

	let second = engine.execute(base_options().cache(cache.clone()).build()?).await?;

	assert!(second.success);
	assert!(second.metrics.from_cache);
	assert_eq!(second.data, Some(json!({"payload": 1})));
	assert_eq!(transport.calls(), 1, "second call must not reach the transport");

	let stats = cache.stats().await;

	assert_eq!(stats.counters.hits, 1);
	assert_eq!(stats.counters.sets, 1);

	Ok(())
}

#[tokio::test]
async fn open_breakers_deny_admission_before_any_transport_call() -> Result<()> {
	let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
		failure_threshold_percentage: 50.,
		minimum_requests: 4,
		recovery_timeout_ms: 1_000,
		..Default::default()
	}));
	let (engine, transport) = scripted_engine(vec![
		status_failure(500, "Internal Server Error"),
		status_failure(500, "Internal Server Error"),
		status_failure(500, "Internal Server Error"),
		status_failure(500, "Internal Server Error"),
	]);

	for _ in 0..4 {
		let report = engine
			.execute(base_options().attempts(1).breaker(breaker.clone()).build()?)
			.await?;

		assert!(!report.success);
	}

	assert_eq!(transport.calls(), 4);

	let denied = engine
		.execute(
			base_options()
				.attempts(1)
				.breaker(breaker.clone())
				.throw_on_failed_error_analysis(true)
				.build()?,
		)
		.await;

	assert!(matches!(denied, Err(Error::CircuitOpen { .. })));
	assert_eq!(transport.calls(), 4, "denied call must not reach the transport");

	Ok(())
}

#[tokio::test]
async fn perform_all_attempts_returns_the_last_successful_payload() -> Result<()> {
	let (engine, transport) = scripted_engine(vec![
		ok_response(json!({"round": 1}), &[]),
		ok_response(json!({"round": 2}), &[]),
		ok_response(json!({"round": 3}), &[]),
	]);
	let report =
		engine.execute(base_options().perform_all_attempts(true).build()?).await?;

	assert!(report.success);
	assert_eq!(report.data, Some(json!({"round": 3})));
	assert_eq!(report.metrics.successful_attempts, 3);
	assert_eq!(report.successful_attempts.map(|entries| entries.len()), Some(3));
	assert_eq!(transport.calls(), 3);

	Ok(())
}

#[tokio::test]
async fn cancellation_terminates_the_loop_immediately() -> Result<()> {
	let (engine, transport) =
		scripted_engine(vec![cancelled(), ok_response(json!({"unreachable": true}), &[])]);
	let report = engine.execute(base_options().build()?).await?;

	assert!(!report.success);
	assert_eq!(report.error.expect("error string"), "Request cancelled by caller.");
	assert_eq!(report.metrics.total_attempts, 1);
	assert_eq!(transport.calls(), 1, "cancellation must not trigger another attempt");

	Ok(())
}

#[tokio::test]
async fn non_retryable_statuses_stop_the_loop_early() -> Result<()> {
	let (engine, transport) = scripted_engine(vec![
		status_failure(400, "Bad Request"),
		ok_response(json!({"unreachable": true}), &[]),
	]);
	let report = engine.execute(base_options().build()?).await?;

	assert!(!report.success);
	assert_eq!(report.metrics.total_attempts, 1);
	assert_eq!(transport.calls(), 1);

	let entries = report.error_logs.expect("error logs recorded");

	assert!(!entries[0].is_retryable);

	Ok(())
}

#[tokio::test]
async fn pre_execution_overrides_reshape_the_attempt_budget() -> Result<()> {
	let (engine, transport) = scripted_engine(vec![
		status_failure(500, "Internal Server Error"),
		status_failure(500, "Internal Server Error"),
	]);
	let hooks = Hooks {
		pre_execution: Some(Hook::named("tighten-budget", |_args, _state| {
			Box::pin(async move { Ok(json!({"attempts": 1, "wait_ms": 5})) })
		})),
		..Default::default()
	};
	let report = engine
		.execute(
			base_options()
				.hooks(hooks)
				.apply_pre_execution_config_override(true)
				.build()?,
		)
		.await?;

	assert!(!report.success);
	assert_eq!(report.metrics.total_attempts, 1);
	assert_eq!(transport.calls(), 1, "override must shrink the attempt budget");

	Ok(())
}

#[tokio::test]
async fn pre_execution_failures_abort_unless_told_otherwise() -> Result<()> {
	let failing_hooks = || Hooks {
		pre_execution: Some(Hook::named("doomed", |_args, _state| {
			Box::pin(async move {
				Err(Error::Hook { hook: "doomed".into(), reason: "no config".into() })
			})
		})),
		..Default::default()
	};
	let (engine, transport) = scripted_engine(vec![ok_response(json!({"ok": true}), &[])]);
	let aborted = engine.execute(base_options().hooks(failing_hooks()).build()?).await?;

	assert!(!aborted.success);
	assert!(aborted.error.expect("error string").contains("doomed"));
	assert_eq!(transport.calls(), 0);

	let resumed = engine
		.execute(
			base_options()
				.hooks(failing_hooks())
				.continue_on_pre_execution_hook_failure(true)
				.build()?,
		)
		.await?;

	assert!(resumed.success);
	assert_eq!(transport.calls(), 1);

	Ok(())
}

#[tokio::test]
async fn final_error_analyzer_controls_the_rethrow() -> Result<()> {
	let handled_hooks = Hooks {
		final_error_analyzer: Some(Hook::named("absorb", |_args, _state| {
			Box::pin(async move { Ok(true) })
		})),
		..Default::default()
	};
	let (engine, _transport) = scripted_engine(vec![status_failure(400, "Bad Request")]);
	let handled = engine
		.execute(
			base_options()
				.attempts(1)
				.hooks(handled_hooks)
				.throw_on_failed_error_analysis(true)
				.build()?,
		)
		.await?;

	assert!(!handled.success, "handled failures still report success=false");

	let (engine, _transport) = scripted_engine(vec![status_failure(400, "Bad Request")]);
	let unhandled = engine
		.execute(
			base_options()
				.attempts(1)
				.throw_on_failed_error_analysis(true)
				.build()?,
		)
		.await;

	assert!(matches!(unhandled, Err(Error::Unhandled(_))));

	Ok(())
}

#[tokio::test]
async fn hooks_share_state_through_the_stable_buffer() -> Result<()> {
	let buffer = BufferHandle::Stable(StableBuffer::new(StableBufferConfig::default()));
	let hooks = || Hooks {
		response_analyzer: Some(Hook::named("count-attempts", |_args, state| {
			Box::pin(async move {
				let seen =
					state.get("accepted").and_then(Value::as_i64).unwrap_or_default();

				state.insert("accepted".into(), json!(seen + 1));

				Ok(true)
			})
		})),
		..Default::default()
	};

	for expected in 1..=2 {
		let (engine, _transport) = scripted_engine(vec![ok_response(json!({"ok": true}), &[])]);
		let report = engine
			.execute(base_options().hooks(hooks()).buffer(buffer.clone()).build()?)
			.await?;

		assert!(report.success);
		assert_eq!(buffer.read().await.get("accepted"), Some(&json!(expected)));
	}

	let metrics = buffer.metrics().expect("stable buffer metrics");

	assert_eq!(metrics.total_transactions, 2);

	Ok(())
}

#[tokio::test]
async fn trial_mode_synthesizes_outcomes_without_the_transport() -> Result<()> {
	let (engine, transport) = scripted_engine(vec![]);
	let always_fail = engine
		.execute(
			base_options()
				.trial_mode(resilient_request::TrialMode {
					enabled: true,
					req_failure_probability: 1.,
					res_failure_probability: 0.,
				})
				.build()?,
		)
		.await?;

	assert!(!always_fail.success);
	assert_eq!(always_fail.metrics.total_attempts, 3);
	assert_eq!(transport.calls(), 0);

	let always_succeed = engine
		.execute(
			base_options()
				.trial_mode(resilient_request::TrialMode {
					enabled: true,
					req_failure_probability: 0.,
					res_failure_probability: 0.,
				})
				.build()?,
		)
		.await?;

	assert!(always_succeed.success);
	assert_eq!(transport.calls(), 0);

	Ok(())
}
