//! Two-proportion significance test
//!
//! Pure functions: pooled-proportion Z-score, a closed-form p-value
//! approximation, significance percentage, and a normal-approximation
//! confidence interval for a single conversion rate.
//!
//! ## The p-value approximation
//!
//! `p_value` uses `exp(-0.717|z| - 0.416 z²)`, clamped to 0 for `|z| > 6`.
//! It is a cheap closed form, not an exact normal tail probability, and is
//! kept as-is so significance figures stay reproducible: control 10/100 vs
//! candidate 20/100 yields z ≈ 1.98 and ≈ 95.3% significance.

use serde::{Deserialize, Serialize};

/// `|z|` beyond which the p-value is reported as exactly 0.
const Z_CUTOFF: f64 = 6.0;
const LINEAR_COEFFICIENT: f64 = 0.717;
const QUADRATIC_COEFFICIENT: f64 = 0.416;

/// Conversion counts for one arm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Cumulative (possibly weighted) conversions.
    pub conversions: f64,
    /// Distinct participants.
    pub participants: u64,
}

impl Sample {
    /// Create a sample.
    #[must_use]
    pub const fn new(conversions: f64, participants: u64) -> Self {
        Self {
            conversions,
            participants,
        }
    }

    /// Conversion rate, 0 when there are no participants.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rate(&self) -> f64 {
        if self.participants == 0 {
            0.0
        } else {
            self.conversions / self.participants as f64
        }
    }
}

/// Result of comparing a candidate against control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignificanceTest {
    /// Standardized difference `(candidate - control) / se`.
    pub z_score: f64,
    /// Approximate two-sided p-value.
    pub p_value: f64,
    /// `(1 - p_value) * 100`.
    pub significance_percent: f64,
}

impl SignificanceTest {
    /// "No evidence": returned for empty arms and zero variance.
    pub const INSUFFICIENT: Self = Self {
        z_score: 0.0,
        p_value: 1.0,
        significance_percent: 0.0,
    };
}

/// Compare `candidate` against `control` with a pooled two-proportion Z-test.
///
/// Never fails: an arm without participants or a zero standard error yields
/// [`SignificanceTest::INSUFFICIENT`].
///
/// # Example
///
/// ```rust
/// use abtest_core::experiment::stats::{evaluate, Sample};
///
/// let test = evaluate(Sample::new(10.0, 100), Sample::new(20.0, 100));
/// assert!((test.z_score - 1.98).abs() < 0.01);
/// assert!((test.significance_percent - 95.3).abs() < 0.1);
/// ```
#[must_use]
pub fn evaluate(control: Sample, candidate: Sample) -> SignificanceTest {
    let Some(z) = z_score(control, candidate) else {
        return SignificanceTest::INSUFFICIENT;
    };
    let p = p_value(z);
    SignificanceTest {
        z_score: z,
        p_value: p,
        significance_percent: significance_percent(p),
    }
}

/// Pooled two-proportion Z-score, `None` when it is undefined.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn z_score(control: Sample, candidate: Sample) -> Option<f64> {
    if control.participants == 0 || candidate.participants == 0 {
        return None;
    }
    let n1 = control.participants as f64;
    let n2 = candidate.participants as f64;

    let pooled = (control.conversions + candidate.conversions) / (n1 + n2);
    let variance = pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2);
    // Weighted conversions can push the pooled rate past 1.
    if !(variance.is_finite() && variance > 0.0) {
        return None;
    }
    let se = variance.sqrt();

    Some((candidate.rate() - control.rate()) / se)
}

/// Closed-form approximation of the p-value for `z` (see module docs).
#[must_use]
pub fn p_value(z: f64) -> f64 {
    let abs_z = z.abs();
    if abs_z > Z_CUTOFF {
        return 0.0;
    }
    (-LINEAR_COEFFICIENT * abs_z - QUADRATIC_COEFFICIENT * abs_z * abs_z).exp()
}

/// Confidence percentage that the difference is real.
#[must_use]
pub fn significance_percent(p_value: f64) -> f64 {
    (1.0 - p_value) * 100.0
}

/// Normal-approximation interval around `sample`'s rate at
/// `confidence_level` percent.
///
/// Returns `(0, 0)` without participants. The lower bound is clamped at 0;
/// the upper bound is clamped at `max(1, rate)` so weighted rates above 1
/// stay inside their own interval.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn confidence_interval(sample: Sample, confidence_level: f64) -> (f64, f64) {
    if sample.participants == 0 {
        return (0.0, 0.0);
    }
    let rate = sample.rate();
    let bounded = rate.clamp(0.0, 1.0);
    let z = critical_value(confidence_level);
    let half_width = z * (bounded * (1.0 - bounded) / sample.participants as f64).sqrt();

    let lower = (rate - half_width).max(0.0);
    let upper = (rate + half_width).min(rate.max(1.0));
    (lower, upper)
}

/// Two-sided critical value for `confidence_level` percent
/// (1.96 at 95, 2.576 at 99).
#[must_use]
pub fn critical_value(confidence_level: f64) -> f64 {
    let alpha = 1.0 - (confidence_level / 100.0).clamp(0.0, 1.0);
    inverse_normal_cdf(1.0 - alpha / 2.0)
}

/// Inverse of the standard normal CDF.
///
/// Acklam's rational approximation, relative error below 1.2e-9. Returns
/// infinities at 0 and 1.
#[must_use]
pub fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}
