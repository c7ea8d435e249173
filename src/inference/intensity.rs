//! Taiwan intensity scale: PGA thresholds and label derivation from the
//! predictor's Gaussian mixtures.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::types::IntensityLabel;

use super::GaussianMixture;

/// PGA thresholds (gal) for labels `1` through `7`, parallel to
/// [`IntensityLabel::SCALE`].
pub const PGA_THRESHOLDS_GAL: [f64; 9] = [0.8, 2.5, 8.0, 25.0, 80.0, 140.0, 250.0, 440.0, 800.0];

/// Exceedance probability of each threshold under a mixture over ln(PGA).
///
/// `P(PGA > t) = Σ_m w_m · (1 − Φ((ln t − μ_m) / σ_m))`
pub fn exceedance_probabilities(mixture: &GaussianMixture) -> [f64; 9] {
    let mut probs = [0.0; 9];
    for (i, threshold) in PGA_THRESHOLDS_GAL.iter().enumerate() {
        let ln_t = threshold.ln();
        let mut p = 0.0;
        for ((weight, mean), log_stddev) in mixture
            .weights
            .iter()
            .zip(mixture.means.iter())
            .zip(mixture.log_stddevs.iter())
        {
            let sigma = log_stddev.exp().max(1e-9);
            // Normal::new only fails on non-finite parameters; fall back to a
            // point mass at the mean in that case.
            p += match Normal::new(*mean, sigma) {
                Ok(normal) => weight * (1.0 - normal.cdf(ln_t)),
                Err(_) => {
                    if *mean > ln_t {
                        *weight
                    } else {
                        0.0
                    }
                }
            };
        }
        probs[i] = p;
    }
    probs
}

/// Highest label whose exceedance probability reaches `cutoff`; `0` if none.
pub fn label_from_probabilities(probs: &[f64; 9], cutoff: f64) -> IntensityLabel {
    for (i, label) in IntensityLabel::SCALE.iter().enumerate().rev() {
        if probs[i] >= cutoff {
            return *label;
        }
    }
    IntensityLabel::Zero
}

/// Full mixture-to-label path for one target.
pub fn label_for(mixture: &GaussianMixture, cutoff: f64) -> IntensityLabel {
    label_from_probabilities(&exceedance_probabilities(mixture), cutoff)
}
