//! Inference layer: the opaque predictor contract, MDN output shape,
//! intensity derivation, and the serialized dispatch pump.

pub mod dispatcher;
pub mod intensity;

pub use dispatcher::{DispatchCounterSnapshot, DispatchCounters, Dispatcher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assembler::InferenceInput;
use crate::config::defaults::MIXTURE_WEIGHT_TOLERANCE;

/// Predictor failures. Timeouts are raised by the dispatcher, not the
/// predictor itself.
#[derive(Error, Debug)]
pub enum PredictError {
    #[error("inference failed: {0}")]
    Failed(String),

    #[error("malformed inference output: {0}")]
    BadOutput(String),
}

/// Mixture of Gaussians over ln(PGA in gal) for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianMixture {
    pub weights: Vec<f64>,
    pub means: Vec<f64>,
    pub log_stddevs: Vec<f64>,
}

impl GaussianMixture {
    /// Weight-sum and shape validation (weights must sum to 1 ± 1e-4).
    pub fn validate(&self) -> Result<(), PredictError> {
        if self.weights.len() != self.means.len() || self.weights.len() != self.log_stddevs.len() {
            return Err(PredictError::BadOutput(format!(
                "mixture component count mismatch: {} weights, {} means, {} stddevs",
                self.weights.len(),
                self.means.len(),
                self.log_stddevs.len()
            )));
        }
        if self.weights.is_empty() {
            return Err(PredictError::BadOutput("empty mixture".to_string()));
        }
        let sum: f64 = self.weights.iter().sum();
        if (sum - 1.0).abs() > MIXTURE_WEIGHT_TOLERANCE {
            return Err(PredictError::BadOutput(format!(
                "mixture weights sum to {sum}"
            )));
        }
        Ok(())
    }
}

/// Per-target mixtures, ordered like the configured target list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceOutput {
    pub per_target: Vec<GaussianMixture>,
}

/// The trained network runtime, abstracted behind a blocking call.
///
/// The dispatcher owns the sole instance and serializes every invocation;
/// implementations need no internal synchronisation.
pub trait Predictor: Send {
    fn predict(&mut self, input: &InferenceInput) -> Result<InferenceOutput, PredictError>;
}

/// Deterministic stand-in for the trained network runtime.
///
/// Emits one fixed two-component mixture per target, scaled by the mean
/// normalisation amplitude of the participating stations, so replay and demo
/// runs produce stable, plausible-looking reports without model weights.
pub struct StubPredictor {
    base_ln_pga: f64,
    spread: f64,
}

impl StubPredictor {
    pub fn new() -> Self {
        Self {
            // Centred near intensity 2-3 for quiet inputs.
            base_ln_pga: 1.0,
            spread: 0.8,
        }
    }
}

impl Default for StubPredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl Predictor for StubPredictor {
    fn predict(&mut self, input: &InferenceInput) -> Result<InferenceOutput, PredictError> {
        let participating = input.mask.iter().filter(|&&m| m).count().max(1);
        let mean_scale: f64 = input
            .station_meta
            .rows()
            .into_iter()
            .zip(input.mask.iter())
            .filter(|(_, &m)| m)
            .map(|(row, _)| f64::from(row[4]))
            .sum::<f64>()
            / participating as f64;
        // Larger recorded amplitudes shift the mixture up the scale.
        let shift = mean_scale.max(1.0).ln() * 0.5;

        let n_targets = input.targets.dim().0;
        let per_target = (0..n_targets)
            .map(|_| GaussianMixture {
                weights: vec![0.6, 0.4],
                means: vec![self.base_ln_pga + shift, self.base_ln_pga + shift - 0.7],
                log_stddevs: vec![self.spread.ln(), (self.spread * 1.5).ln()],
            })
            .collect();
        Ok(InferenceOutput { per_target })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixture_validation() {
        let good = GaussianMixture {
            weights: vec![0.5, 0.5],
            means: vec![1.0, 2.0],
            log_stddevs: vec![0.0, 0.0],
        };
        assert!(good.validate().is_ok());

        let bad_sum = GaussianMixture {
            weights: vec![0.5, 0.4],
            means: vec![1.0, 2.0],
            log_stddevs: vec![0.0, 0.0],
        };
        assert!(bad_sum.validate().is_err());

        let bad_shape = GaussianMixture {
            weights: vec![1.0],
            means: vec![1.0, 2.0],
            log_stddevs: vec![0.0],
        };
        assert!(bad_shape.validate().is_err());
    }
}
