//! Breaker and cache behavior over the real reqwest transport.

// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use resilient_request::{
	CircuitBreaker, CircuitBreakerConfig, CircuitState, Protocol, RequestEngine, RequestOptions,
	ResponseCache, Result,
};

fn options_for(server: &MockServer) -> resilient_request::RequestOptionsBuilder {
	let address = server.address();

	RequestOptions::builder(address.ip().to_string())
		.protocol(Protocol::Http)
		.port(address.port())
		.path("/status")
		.wait_ms(10)
}

#[tokio::test]
async fn responses_are_cached_per_cache_control() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/status"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(json!({"ok": true}))
				.insert_header("cache-control", "public, max-age=60"),
		)
		.expect(1)
		.mount(&server)
		.await;

	let engine = RequestEngine::new()?;
	let cache = Arc::new(ResponseCache::new(Default::default())?);
	let first = engine.execute(options_for(&server).cache(cache.clone()).build()?).await?;

	assert!(first.success);
	assert!(!first.metrics.from_cache);
	assert_eq!(first.data, Some(json!({"ok": true})));

	let second = engine.execute(options_for(&server).cache(cache.clone()).build()?).await?;

	assert!(second.success);
	assert!(second.metrics.from_cache);
	assert_eq!(second.data, Some(json!({"ok": true})));

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn open_breakers_stop_traffic_to_a_failing_upstream() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/status"))
		.respond_with(ResponseTemplate::new(500))
		.expect(2)
		.mount(&server)
		.await;

	let engine = RequestEngine::new()?;
	let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
		failure_threshold_percentage: 50.,
		minimum_requests: 2,
		recovery_timeout_ms: 60_000,
		..Default::default()
	}));

	for _ in 0..2 {
		let report = engine
			.execute(options_for(&server).attempts(1).breaker(breaker.clone()).build()?)
			.await?;

		assert!(!report.success);
	}

	assert_eq!(breaker.state(), CircuitState::Open);

	let denied = engine
		.execute(options_for(&server).attempts(1).breaker(breaker.clone()).build()?)
		.await?;

	assert!(!denied.success);
	assert!(denied.error.expect("error string").contains("Circuit breaker is open"));
	assert_eq!(denied.metrics.total_attempts, 0, "denial must precede the transport");

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn half_open_probes_close_the_breaker_once_the_upstream_recovers() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let request_counter = Arc::new(AtomicUsize::new(0));
	let counter_handle = request_counter.clone();

	Mock::given(method("GET"))
		.and(path("/status"))
		.respond_with(move |_request: &wiremock::Request| {
			let index = counter_handle.fetch_add(1, Ordering::SeqCst);

			if index < 2 {
				ResponseTemplate::new(500)
			} else {
				ResponseTemplate::new(200).set_body_json(json!({"recovered": true}))
			}
		})
		.mount(&server)
		.await;

	let engine = RequestEngine::new()?;
	let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
		failure_threshold_percentage: 50.,
		minimum_requests: 2,
		recovery_timeout_ms: 100,
		half_open_max_requests: 1,
		..Default::default()
	}));

	for _ in 0..2 {
		let report = engine
			.execute(options_for(&server).attempts(1).breaker(breaker.clone()).build()?)
			.await?;

		assert!(!report.success);
	}

	assert_eq!(breaker.state(), CircuitState::Open);

	tokio::time::sleep(std::time::Duration::from_millis(150)).await;

	let recovered = engine
		.execute(options_for(&server).attempts(1).breaker(breaker.clone()).build()?)
		.await?;

	assert!(recovered.success);
	assert_eq!(recovered.data, Some(json!({"recovered": true})));
	assert_eq!(breaker.state(), CircuitState::Closed);

	let snapshot = breaker.snapshot();

	assert_eq!(snapshot.recovery.recovery_attempts, 1);
	assert_eq!(snapshot.recovery.successful_recoveries, 1);
	assert!(snapshot.state_changes.total_open_duration_ms >= 100);

	Ok(())
}
