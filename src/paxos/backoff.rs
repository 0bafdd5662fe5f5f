use rand::Rng;
use std::time::Duration;

/// Jittered pause before retrying a failed proposal round, so competing
/// proposers do not restride in lockstep.
pub fn random_retry_backoff(min_ms: u64, max_ms: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let backoff_ms = rng.gen_range(min_ms..=max_ms);
    Duration::from_millis(backoff_ms)
}
