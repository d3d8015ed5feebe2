//! Seeded RNG wrapper for reproducible behavior.
//!
//! Telemetry jitter and image noise both draw from one `MockRng`, so a fixed
//! seed replays a simulator session exactly.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded RNG wrapper for reproducible random behavior
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Create a new RNG with optional seed.
    /// If seed is None, uses a random seed from the OS.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Generate a random u64 value
    pub fn next_u64(&self) -> u64 {
        self.inner.lock().gen()
    }

    /// Generate a random f64 value in the range [0.0, 1.0)
    pub fn next_f64(&self) -> f64 {
        self.inner.lock().gen()
    }

    /// Generate a random value in the given range
    pub fn gen_range<T, R>(&self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.inner.lock().gen_range(range)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_rng_deterministic() {
        let rng1 = MockRng::new(Some(42));
        let rng2 = MockRng::new(Some(42));
        assert_eq!(rng1.next_u64(), rng2.next_u64(), "Same seed should produce same values");
        assert_eq!(rng1.next_f64(), rng2.next_f64());
    }

    #[test]
    fn test_battery_jitter_range() {
        let rng = MockRng::new(Some(7));
        for _ in 0..1000 {
            let battery = 85.0 + rng.next_f64() * 10.0;
            assert!((85.0..95.0).contains(&battery));
        }
    }

    #[test]
    fn test_gen_range() {
        let rng = MockRng::new(Some(42));
        for _ in 0..100 {
            let val = rng.gen_range(10..20);
            assert!((10..20).contains(&val), "Value should be in range [10, 20)");
        }
    }
}
