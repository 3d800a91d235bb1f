//! Runtime environment shared by merge resolvers.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::AppConfig;

/// Clock/randomness environment handed to every [`MergeResolver`].
///
/// Owns the seeded RNG used to draw the randomized merge debounce delay.
/// Two devices observing the same multi-head condition draw different
/// delays, so one of them usually sees the other's merge commit before
/// starting its own.
///
/// [`MergeResolver`]: crate::merge::resolver::MergeResolver
pub struct Environment {
    max_merging_delay: Duration,
    rng: Mutex<StdRng>,
}

impl Environment {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            max_merging_delay: config.merging.max_merging_delay(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic environment for tests.
    pub fn with_seed(max_merging_delay: Duration, seed: u64) -> Self {
        Self {
            max_merging_delay,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn max_merging_delay(&self) -> Duration {
        self.max_merging_delay
    }

    /// Draw a delay uniformly from `[0, max_merging_delay]`.
    pub fn next_merge_delay(&self) -> Duration {
        let max_ms = self.max_merging_delay.as_millis() as u64;
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Duration::from_millis(rng.gen_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_is_within_bounds() {
        let env = Environment::with_seed(Duration::from_millis(50), 42);
        for _ in 0..200 {
            assert!(env.next_merge_delay() <= Duration::from_millis(50));
        }
    }

    #[test]
    fn test_zero_bound_yields_zero_delay() {
        let env = Environment::with_seed(Duration::ZERO, 7);
        assert_eq!(env.next_merge_delay(), Duration::ZERO);
    }
}
