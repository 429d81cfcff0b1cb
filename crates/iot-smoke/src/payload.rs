//! Synthetic telemetry bodies.

use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generates `size` printable bytes.
///
/// The output depends only on `size`, so two publishers asked for the same
/// size send identical bodies and receivers can compare them.
#[must_use]
pub fn generate(size: usize) -> Vec<u8> {
    let rng = StdRng::seed_from_u64(size as u64);
    rng.sample_iter(Alphanumeric).take(size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_honours_requested_size() {
        assert!(generate(0).is_empty());
        assert_eq!(generate(32).len(), 32);
        assert_eq!(generate(4096).len(), 4096);
    }

    #[test]
    fn generate_is_pure_in_size() {
        assert_eq!(generate(64), generate(64));
        assert_ne!(generate(64)[..16], generate(65)[..16]);
    }

    #[test]
    fn generate_is_printable() {
        assert!(generate(256).iter().all(u8::is_ascii_alphanumeric));
    }
}
