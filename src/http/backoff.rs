//! Backoff computation for the attempt loop.

// std
use std::cell::RefCell;
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Wait progression applied between attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryStrategy {
	/// Constant wait between attempts.
	#[default]
	Fixed,
	/// Wait grows proportionally to the attempt index.
	Linear,
	/// Wait doubles per attempt.
	Exponential,
}

/// Delay calculator owning the strategy, base wait, jitter, and upper bound.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPlan {
	/// Selected wait progression.
	pub strategy: RetryStrategy,
	/// Base wait in milliseconds.
	pub wait_ms: u64,
	/// Hard ceiling applied to every computed delay.
	pub max_allowed_wait_ms: u64,
	/// Uniform jitter amplitude in `[0, 1)`; zero disables jitter.
	pub jitter: f64,
}
impl BackoffPlan {
	/// Compute the delay to sleep after the given one-based attempt index.
	pub fn delay_ms(&self, attempt: u32) -> u64 {
		let attempt = attempt.max(1);
		let base = match self.strategy {
			RetryStrategy::Fixed => self.wait_ms,
			RetryStrategy::Linear => self.wait_ms.saturating_mul(attempt as u64),
			RetryStrategy::Exponential => {
				let exponent = (attempt - 1).min(32);

				self.wait_ms.saturating_mul(1_u64 << exponent)
			},
		};
		let computed = if self.jitter > 0. {
			let factor = random_in(1. - self.jitter, 1. + self.jitter);

			(base as f64 * factor).round() as u64
		} else {
			base
		};

		computed.min(self.max_allowed_wait_ms)
	}

	/// [`Self::delay_ms`] expressed as a [`Duration`].
	pub fn delay(&self, attempt: u32) -> Duration {
		Duration::from_millis(self.delay_ms(attempt))
	}
}

/// Draw a uniform sample and compare it against the given probability.
pub(crate) fn sample_probability(probability: f64) -> bool {
	if probability <= 0. {
		return false;
	}
	if probability >= 1. {
		return true;
	}

	SMALL_RNG.with(|cell| cell.borrow_mut().random_range(0.0..1.0) < probability)
}

fn random_in(min: f64, max: f64) -> f64 {
	if max <= min {
		return min;
	}

	SMALL_RNG.with(|cell| cell.borrow_mut().random_range(min..max))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn plan(strategy: RetryStrategy) -> BackoffPlan {
		BackoffPlan { strategy, wait_ms: 100, max_allowed_wait_ms: 60_000, jitter: 0. }
	}

	#[test]
	fn fixed_delays_are_constant() {
		let plan = plan(RetryStrategy::Fixed);

		assert_eq!(plan.delay_ms(1), 100);
		assert_eq!(plan.delay_ms(2), 100);
		assert_eq!(plan.delay_ms(7), 100);
	}

	#[test]
	fn linear_delays_grow_with_attempt_index() {
		let plan = plan(RetryStrategy::Linear);

		assert_eq!(plan.delay_ms(1), 100);
		assert_eq!(plan.delay_ms(2), 200);
		assert_eq!(plan.delay_ms(3), 300);
	}

	#[test]
	fn exponential_delays_double_per_attempt() {
		let plan = plan(RetryStrategy::Exponential);

		assert_eq!(plan.delay_ms(1), 100);
		assert_eq!(plan.delay_ms(2), 200);
		assert_eq!(plan.delay_ms(3), 400);
		assert_eq!(plan.delay_ms(4), 800);
	}

	#[test]
	fn delays_never_exceed_the_allowed_ceiling() {
		let mut plan = plan(RetryStrategy::Exponential);

		plan.max_allowed_wait_ms = 500;

		assert_eq!(plan.delay_ms(10), 500);
	}

	#[test]
	fn jitter_stays_within_the_configured_band() {
		let mut plan = plan(RetryStrategy::Fixed);

		plan.jitter = 0.5;

		for _ in 0..100 {
			let delay = plan.delay_ms(1);

			assert!((50..=150).contains(&delay), "delay {delay} escaped the jitter band");
		}
	}

	#[test]
	fn probability_sampling_honours_the_bounds() {
		assert!(!sample_probability(0.));
		assert!(sample_probability(1.));
	}
}
