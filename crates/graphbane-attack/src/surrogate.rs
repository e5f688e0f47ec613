//! The external classifier contract.
//!
//! The attack only ever talks to the victim through this narrow trait: a
//! forward pass from (features, edge index, edge weights) to per-node
//! logits. Gradients w.r.t. the relaxed edge weights are estimated with
//! SPSA (simultaneous perturbation stochastic approximation), which needs
//! two forward evaluations per probe regardless of block size — the
//! surrogate only has to be *smooth* in its edge weights, not expose an
//! autodiff tape.

use graphbane_core::Result;
use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::Rng;

/// A differentiable victim/surrogate classifier.
///
/// `Send + Sync` so that independent read-only evaluations (e.g. the
/// discretization trials) may run on a rayon pool.
pub trait Surrogate: Send + Sync {
    /// Forward pass: node features (N×F), directed edge index (2×E) and
    /// optional per-edge weights (len E, defaults to 1) to per-node
    /// logits (N×C).
    fn predict(
        &self,
        feat: ArrayView2<'_, f32>,
        edge_index: ArrayView2<'_, u32>,
        edge_weight: Option<&[f32]>,
    ) -> Result<Array2<f32>>;
}

/// Gather the logit rows of the given nodes into a T×C matrix.
pub fn gather_rows(logits: &Array2<f32>, nodes: &[u32]) -> Array2<f32> {
    let mut out = Array2::zeros((nodes.len(), logits.ncols()));
    for (row, &node) in nodes.iter().enumerate() {
        out.row_mut(row).assign(&logits.row(node as usize));
    }
    out
}

/// Estimate the gradient of `eval` at `weights` via SPSA.
///
/// Each probe draws a Bernoulli ±1 direction, evaluates at
/// `w ± delta * direction` and forms the two-point estimate
/// `direction * (f+ - f-) / (2 delta)`; probes are averaged. Two
/// evaluations per probe, independent of dimension.
pub fn estimate_gradient_spsa<F>(
    eval: F,
    weights: &[f32],
    delta: f32,
    probes: usize,
    rng: &mut StdRng,
) -> Result<Vec<f32>>
where
    F: Fn(&[f32]) -> Result<f32>,
{
    let n = weights.len();
    let probes = probes.max(1);
    let mut gradient = vec![0.0f32; n];
    for _ in 0..probes {
        let direction: Vec<f32> = (0..n)
            .map(|_| if rng.random::<bool>() { 1.0 } else { -1.0 })
            .collect();
        let plus: Vec<f32> = weights
            .iter()
            .zip(&direction)
            .map(|(w, d)| w + delta * d)
            .collect();
        let minus: Vec<f32> = weights
            .iter()
            .zip(&direction)
            .map(|(w, d)| w - delta * d)
            .collect();
        let diff = eval(&plus)? - eval(&minus)?;
        let scale = diff / (2.0 * delta);
        for (g, d) in gradient.iter_mut().zip(&direction) {
            *g += d * scale;
        }
    }
    for g in &mut gradient {
        *g /= probes as f32;
    }
    Ok(gradient)
}
