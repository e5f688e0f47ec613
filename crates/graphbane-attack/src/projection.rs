//! Gradient step and projection onto the budget-capped simplex.
//!
//! After each ascent step the relaxed edge weights are projected onto
//! `{w in [0,1]^k : sum(w) <= budget}`. The Euclidean projection reduces
//! to finding a scalar shift `mu` with `sum(clip(w - mu, 0, 1)) = budget`;
//! `sum(clip(w - mu, 0, 1))` is monotonically decreasing in `mu`, so a
//! bisection search suffices and avoids the sort a closed-form projection
//! would need on large blocks.

use serde::Serialize;
use tracing::warn;

/// Scalar diagnostics of one projection call.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProjectionScalars {
    /// Probability mass (sum of clamped weights) before projection.
    pub mass_before: f32,
    /// Probability mass after projection.
    pub mass_after: f32,
    /// Entries above the zero threshold after projection.
    pub nonzero: usize,
    /// Largest weight after projection.
    pub max_weight: f32,
}

/// Bisection-based projection engine.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionEngine {
    /// Bisection interval tolerance, and the zero threshold for the
    /// nonzero-weight diagnostic.
    pub eps: f32,
    /// Iteration cap; hitting it is logged, not fatal.
    pub max_iter: usize,
}

impl Default for ProjectionEngine {
    fn default() -> Self {
        Self {
            eps: 1e-7,
            max_iter: 10_000,
        }
    }
}

#[inline]
fn clipped_sum(weights: &[f32], mu: f32) -> f32 {
    weights.iter().map(|&w| (w - mu).clamp(0.0, 1.0)).sum()
}

impl ProjectionEngine {
    /// Gradient-ascent step on the relaxed weights.
    ///
    /// The learning rate is scaled by `budget / num_nodes` and decays with
    /// the inverse square root of the post-resampling epoch, i.e. the
    /// schedule is flat while the block is still being resampled and only
    /// then anneals.
    pub fn update_step(
        &self,
        weights: &mut [f32],
        gradient: &[f32],
        epoch: usize,
        epochs_resampling: usize,
        lr: f32,
        budget: usize,
        num_nodes: usize,
    ) {
        debug_assert_eq!(weights.len(), gradient.len());
        let decay = (epoch.saturating_sub(epochs_resampling) + 1) as f32;
        let step = budget as f32 / num_nodes as f32 * lr / decay.sqrt();
        for (w, g) in weights.iter_mut().zip(gradient) {
            *w += step * g;
        }
    }

    /// Project `weights` onto the capped simplex with the given budget.
    ///
    /// Feasible inputs are only clamped to [0, 1] (the projection is the
    /// identity up to clamping, and idempotent). Otherwise the shift `mu`
    /// is bisected until the interval is below `eps` or the iteration cap
    /// is reached; non-convergence returns the best approximation found.
    pub fn project(&self, weights: &mut [f32], budget: usize) -> ProjectionScalars {
        let budget = budget as f32;
        let mass_before: f32 = weights.iter().map(|&w| w.clamp(0.0, 1.0)).sum();

        if mass_before > budget {
            let mut left = weights.iter().copied().fold(f32::INFINITY, f32::min) - 1.0;
            let mut right = weights.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut iter = 0;
            while right - left > self.eps && iter < self.max_iter {
                let mu = (left + right) / 2.0;
                if clipped_sum(weights, mu) > budget {
                    left = mu;
                } else {
                    right = mu;
                }
                iter += 1;
            }
            let mu = (left + right) / 2.0;
            if iter >= self.max_iter {
                warn!(
                    residual = clipped_sum(weights, mu) - budget,
                    iterations = iter,
                    "bisection projection did not converge; using best approximation"
                );
            }
            for w in weights.iter_mut() {
                *w = (*w - mu).clamp(0.0, 1.0);
            }
        } else {
            for w in weights.iter_mut() {
                *w = w.clamp(0.0, 1.0);
            }
        }

        let mass_after: f32 = weights.iter().sum();
        ProjectionScalars {
            mass_before,
            mass_after,
            nonzero: weights.iter().filter(|&&w| w > self.eps).count(),
            max_weight: weights.iter().copied().fold(0.0, f32::max),
        }
    }
}
