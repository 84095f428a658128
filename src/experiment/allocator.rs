//! Weighted variant allocation
//!
//! Standard weighted-random sampling over relative weights. The allocator is
//! pure given its random source; [`RandomSource`] decides where that source
//! comes from when the manager assigns a new user.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};

use super::Variant;
use crate::{Error, Result};

/// Pick one variant with probability proportional to its weight.
///
/// Draws `r` uniformly from `[0, total_weight)` and returns the first variant
/// whose cumulative weight exceeds `r`.
///
/// # Errors
///
/// Returns `Error::InvalidConfiguration` if `variants` is empty or any weight
/// is not a positive finite number.
///
/// # Example
///
/// ```rust
/// use abtest_core::experiment::{select_variant, Variant};
/// use rand::{rngs::StdRng, SeedableRng};
///
/// let variants = vec![Variant::new("a", "A", 1.0), Variant::new("b", "B", 3.0)];
/// let mut rng = StdRng::seed_from_u64(42);
/// let picked = select_variant(&variants, &mut rng).unwrap();
/// assert!(picked.id() == "a" || picked.id() == "b");
/// ```
pub fn select_variant<'a, R: Rng + ?Sized>(
    variants: &'a [Variant],
    rng: &mut R,
) -> Result<&'a Variant> {
    let Some(last) = variants.last() else {
        return Err(Error::InvalidConfiguration(
            "cannot allocate from an empty variant list".to_string(),
        ));
    };
    if let Some(bad) = variants
        .iter()
        .find(|v| !(v.weight().is_finite() && v.weight() > 0.0))
    {
        return Err(Error::InvalidConfiguration(format!(
            "variant {} has non-positive weight {}",
            bad.id(),
            bad.weight()
        )));
    }

    let total_weight: f64 = variants.iter().map(Variant::weight).sum();
    let r = rng.gen::<f64>() * total_weight;

    let mut cumulative = 0.0;
    for variant in variants {
        cumulative += variant.weight();
        if cumulative > r {
            return Ok(variant);
        }
    }
    // Rounding in the running sum can leave r just past the final boundary.
    Ok(last)
}

/// Stable seed for `(experiment_id, user_id)`.
///
/// `FxHasher` carries no per-process random state, so the same inputs give
/// the same seed on every run of the same build target.
#[must_use]
pub fn assignment_seed(experiment_id: &str, user_id: &str, salt: u64) -> u64 {
    let mut hasher = FxHasher::default();
    salt.hash(&mut hasher);
    experiment_id.hash(&mut hasher);
    user_id.hash(&mut hasher);
    hasher.finish()
}

/// Where the allocator's randomness comes from.
#[derive(Debug)]
pub enum RandomSource {
    /// Seed a fresh `StdRng` from `assignment_seed(experiment, user, salt)`:
    /// a given user always draws the same number for a given experiment.
    Hashed {
        /// Mixed into every seed; change it to reshuffle all first-time draws.
        salt: u64,
    },
    /// One shared generator seeded once (reproducible test runs).
    Seeded(Mutex<StdRng>),
    /// Thread-local entropy.
    Entropy,
}

impl RandomSource {
    /// Hashed source with salt 0.
    #[must_use]
    pub const fn hashed() -> Self {
        Self::Hashed { salt: 0 }
    }

    /// Shared generator seeded with `seed`.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::Seeded(Mutex::new(StdRng::seed_from_u64(seed)))
    }

    /// Pick a variant for a first-time assignment of `user_id`.
    ///
    /// # Errors
    ///
    /// Propagates [`select_variant`] errors.
    pub fn pick<'a>(
        &self,
        experiment_id: &str,
        user_id: &str,
        variants: &'a [Variant],
    ) -> Result<&'a Variant> {
        match self {
            Self::Hashed { salt } => {
                let mut rng = StdRng::seed_from_u64(assignment_seed(experiment_id, user_id, *salt));
                select_variant(variants, &mut rng)
            }
            Self::Seeded(rng) => {
                // A panic elsewhere cannot leave an RNG in an invalid state.
                let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
                select_variant(variants, &mut *rng)
            }
            Self::Entropy => select_variant(variants, &mut rand::thread_rng()),
        }
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::hashed()
    }
}
