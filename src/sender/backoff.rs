use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// The backoff window stops doubling after this many failed attempts.
pub const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Truncated binary exponential backoff measured in slots.
///
/// After the `a`-th failed attempt (1-indexed) the sender waits a uniformly
/// random whole number of slots in `[0, 2^min(a, 10))`. The random source is
/// explicit so a seed reproduces the exact sequence of delays.
#[derive(Debug, Clone)]
pub struct BackoffPolicy<R = StdRng> {
    rng: R,
    slot_time: Duration,
}

impl BackoffPolicy<StdRng> {
    pub fn from_seed(seed: u64, slot_time: Duration) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), slot_time)
    }
}

impl<R: Rng> BackoffPolicy<R> {
    pub fn with_rng(rng: R, slot_time: Duration) -> Self {
        Self { rng, slot_time }
    }

    /// Exclusive upper bound on the slots drawn for `attempt`.
    pub fn window(attempt: u32) -> u64 {
        1u64 << attempt.min(MAX_BACKOFF_EXPONENT)
    }

    pub fn next_slots(&mut self, attempt: u32) -> u64 {
        self.rng.gen_range(0..Self::window(attempt))
    }

    /// Draw a backoff for `attempt`, returning the slot count and the delay.
    pub fn next_delay(&mut self, attempt: u32) -> (u64, Duration) {
        let slots = self.next_slots(attempt);
        let delay = self.slot_time.saturating_mul(slots as u32);
        (slots, delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn test_window_doubles_then_caps() {
        assert_eq!(BackoffPolicy::<StdRng>::window(1), 2);
        assert_eq!(BackoffPolicy::<StdRng>::window(2), 4);
        assert_eq!(BackoffPolicy::<StdRng>::window(9), 512);
        assert_eq!(BackoffPolicy::<StdRng>::window(10), 1024);
        assert_eq!(BackoffPolicy::<StdRng>::window(25), 1024);
    }

    #[test]
    fn test_slots_stay_in_window() {
        let mut policy = BackoffPolicy::from_seed(42, Duration::from_millis(10));
        for attempt in 1..=15 {
            let window = BackoffPolicy::<StdRng>::window(attempt);
            for _ in 0..200 {
                assert!(policy.next_slots(attempt) < window);
            }
        }
    }

    #[test]
    fn test_zero_backoff_is_reachable() {
        let mut policy = BackoffPolicy::from_seed(7, Duration::from_millis(10));
        let draws: Vec<u64> = (0..200).map(|_| policy.next_slots(1)).collect();
        assert!(draws.contains(&0));
        assert!(draws.contains(&1));
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = BackoffPolicy::from_seed(1234, Duration::from_millis(5));
        let mut b = BackoffPolicy::from_seed(1234, Duration::from_millis(5));
        let seq_a: Vec<u64> = (1..=10).map(|n| a.next_slots(n)).collect();
        let seq_b: Vec<u64> = (1..=10).map(|n| b.next_slots(n)).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn test_delay_is_slots_times_slot_time() {
        let mut policy = BackoffPolicy::from_seed(99, Duration::from_millis(20));
        for attempt in 1..=10 {
            let (slots, delay) = policy.next_delay(attempt);
            assert_eq!(delay, Duration::from_millis(20 * slots));
        }
    }

    #[test]
    fn test_injected_rng() {
        // An all-zero source always picks an immediate retry.
        let mut policy = BackoffPolicy::with_rng(StepRng::new(0, 0), Duration::from_millis(50));
        assert_eq!(policy.next_delay(3), (0, Duration::ZERO));
    }
}
