//! Attack losses and metrics.
//!
//! All losses are scalars the attack *maximizes*: higher means the
//! classifier is doing worse on the targeted nodes. The closed set of
//! built-in losses is dispatched through [`LossKind`]; callers with bespoke
//! objectives use the [`LossKind::Custom`] escape hatch.

use std::fmt;
use std::sync::Arc;

use graphbane_core::{BaneError, Result};
use ndarray::ArrayView2;

/// Caller-supplied objective: (per-target logits, per-target labels) -> scalar.
pub type CustomLoss = Arc<dyn Fn(ArrayView2<'_, f32>, &[usize]) -> f32 + Send + Sync>;

/// Selectable attack objective.
#[derive(Clone)]
pub enum LossKind {
    /// Cross-entropy averaged over the targets the classifier still gets
    /// right (over all targets once none are correct).
    MaskedCrossEntropy,
    /// Negative mean probability margin: `-(p_true - max p_other)`.
    ProbabilityMargin,
    /// Mean `tanh(-(z_true - max z_other))` on the logit margin; saturates
    /// for confidently misclassified targets so the budget is spent on the
    /// contested ones.
    TanhMargin,
    /// Caller-supplied objective.
    Custom(CustomLoss),
}

impl fmt::Debug for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossKind::MaskedCrossEntropy => write!(f, "MaskedCrossEntropy"),
            LossKind::ProbabilityMargin => write!(f, "ProbabilityMargin"),
            LossKind::TanhMargin => write!(f, "TanhMargin"),
            LossKind::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl LossKind {
    /// Parse a registry name: `mce`, `prob_margin` or `tanh_margin`.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "mce" => Ok(LossKind::MaskedCrossEntropy),
            "prob_margin" => Ok(LossKind::ProbabilityMargin),
            "tanh_margin" => Ok(LossKind::TanhMargin),
            other => Err(BaneError::validation(format!(
                "unknown loss {other:?}; expected one of mce, prob_margin, tanh_margin"
            ))),
        }
    }

    /// Evaluate the loss on per-target logits (T×C) and labels (len T).
    pub fn evaluate(&self, logits: ArrayView2<'_, f32>, labels: &[usize]) -> Result<f32> {
        if logits.nrows() != labels.len() {
            return Err(BaneError::validation(format!(
                "{} logit rows for {} labels",
                logits.nrows(),
                labels.len()
            )));
        }
        let classes = logits.ncols();
        if classes < 2 {
            return Err(BaneError::validation(format!(
                "margins need at least 2 classes, got {classes}"
            )));
        }
        if let Some(&bad) = labels.iter().find(|&&y| y >= classes) {
            return Err(BaneError::validation(format!(
                "label {bad} out of range for {classes} classes"
            )));
        }
        if labels.is_empty() {
            return Err(BaneError::validation("loss over an empty target set"));
        }
        Ok(match self {
            LossKind::MaskedCrossEntropy => masked_cross_entropy(logits, labels),
            LossKind::ProbabilityMargin => probability_margin(logits, labels),
            LossKind::TanhMargin => tanh_margin(logits, labels),
            LossKind::Custom(f) => f(logits, labels),
        })
    }
}

/// Row-wise log-softmax denominator, numerically stable.
fn log_sum_exp(row: &[f32]) -> f32 {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    max + row.iter().map(|&z| (z - max).exp()).sum::<f32>().ln()
}

fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &z) in row.iter().enumerate() {
        if z > row[best] {
            best = i;
        }
    }
    best
}

/// Logit margin `z_true - max_{c != true} z_c` for one row.
fn logit_margin(row: &[f32], label: usize) -> f32 {
    let best_other = row
        .iter()
        .enumerate()
        .filter(|&(c, _)| c != label)
        .map(|(_, &z)| z)
        .fold(f32::NEG_INFINITY, f32::max);
    row[label] - best_other
}

fn row_of(logits: ArrayView2<'_, f32>, r: usize) -> Vec<f32> {
    logits.row(r).iter().copied().collect()
}

fn masked_cross_entropy(logits: ArrayView2<'_, f32>, labels: &[usize]) -> f32 {
    let rows: Vec<usize> = (0..logits.nrows()).collect();
    let correct: Vec<usize> = rows
        .iter()
        .copied()
        .filter(|&r| argmax(&row_of(logits, r)) == labels[r])
        .collect();
    let active = if correct.is_empty() { &rows } else { &correct };
    let sum: f32 = active
        .iter()
        .map(|&r| {
            let row = row_of(logits, r);
            log_sum_exp(&row) - row[labels[r]]
        })
        .sum();
    sum / active.len() as f32
}

fn probability_margin(logits: ArrayView2<'_, f32>, labels: &[usize]) -> f32 {
    let sum: f32 = (0..logits.nrows())
        .map(|r| {
            let row = row_of(logits, r);
            let lse = log_sum_exp(&row);
            let p_true = (row[labels[r]] - lse).exp();
            let p_other = row
                .iter()
                .enumerate()
                .filter(|&(c, _)| c != labels[r])
                .map(|(_, &z)| (z - lse).exp())
                .fold(f32::NEG_INFINITY, f32::max);
            p_true - p_other
        })
        .sum();
    -(sum / logits.nrows() as f32)
}

fn tanh_margin(logits: ArrayView2<'_, f32>, labels: &[usize]) -> f32 {
    let sum: f32 = (0..logits.nrows())
        .map(|r| (-logit_margin(&row_of(logits, r), labels[r])).tanh())
        .sum();
    sum / logits.nrows() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_parse_registry_names() {
        assert!(matches!(
            LossKind::parse("mce").unwrap(),
            LossKind::MaskedCrossEntropy
        ));
        assert!(matches!(
            LossKind::parse("prob_margin").unwrap(),
            LossKind::ProbabilityMargin
        ));
        assert!(matches!(
            LossKind::parse("tanh_margin").unwrap(),
            LossKind::TanhMargin
        ));
        assert!(LossKind::parse("hinge").is_err());
    }

    #[test]
    fn test_losses_increase_under_degradation() {
        // Confidently correct vs. barely correct predictions for label 0.
        let strong = arr2(&[[4.0, -4.0], [4.0, -4.0]]);
        let weak = arr2(&[[0.5, 0.0], [0.5, 0.0]]);
        let labels = [0, 0];
        for kind in [
            LossKind::MaskedCrossEntropy,
            LossKind::ProbabilityMargin,
            LossKind::TanhMargin,
        ] {
            let l_strong = kind.evaluate(strong.view(), &labels).unwrap();
            let l_weak = kind.evaluate(weak.view(), &labels).unwrap();
            assert!(
                l_weak > l_strong,
                "{kind:?}: weak {l_weak} not above strong {l_strong}"
            );
        }
    }

    #[test]
    fn test_tanh_margin_sign() {
        // Misclassified target: negative margin, positive loss.
        let logits = arr2(&[[-1.0, 1.0]]);
        let loss = LossKind::TanhMargin.evaluate(logits.view(), &[0]).unwrap();
        assert!(loss > 0.0);
        assert!((loss - 2.0f32.tanh()).abs() < 1e-6);
    }

    #[test]
    fn test_probability_margin_bounds() {
        let logits = arr2(&[[10.0, -10.0]]);
        let loss = LossKind::ProbabilityMargin
            .evaluate(logits.view(), &[0])
            .unwrap();
        // Perfectly confident correct prediction: margin 1, loss -1.
        assert!((loss + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_masked_cross_entropy_masks_correct_rows() {
        // Row 0 correct with small margin, row 1 badly wrong. Only row 0
        // should contribute.
        let logits = arr2(&[[1.0, 0.0], [-5.0, 5.0]]);
        let labels = [0, 0];
        let loss = LossKind::MaskedCrossEntropy
            .evaluate(logits.view(), &labels)
            .unwrap();
        let row = [1.0f32, 0.0];
        let expected = log_sum_exp(&row) - row[0];
        assert!((loss - expected).abs() < 1e-6);
    }

    #[test]
    fn test_masked_cross_entropy_all_wrong_falls_back() {
        let logits = arr2(&[[-1.0, 1.0], [-2.0, 2.0]]);
        let labels = [0, 0];
        // No correct row: average over all rows, still finite.
        let loss = LossKind::MaskedCrossEntropy
            .evaluate(logits.view(), &labels)
            .unwrap();
        assert!(loss.is_finite());
        assert!(loss > 1.0);
    }

    #[test]
    fn test_custom_escape_hatch() {
        let kind = LossKind::Custom(Arc::new(|logits, labels| {
            logits[[0, labels[0]]]
        }));
        let logits = arr2(&[[0.25, 0.75]]);
        assert_eq!(kind.evaluate(logits.view(), &[1]).unwrap(), 0.75);
    }

    #[test]
    fn test_shape_validation() {
        let logits = arr2(&[[0.0, 1.0]]);
        assert!(LossKind::TanhMargin.evaluate(logits.view(), &[0, 1]).is_err());
        assert!(LossKind::TanhMargin.evaluate(logits.view(), &[2]).is_err());
    }

    #[test]
    fn test_single_class_logits_rejected() {
        // Margins are undefined with one class; the probability margin
        // would otherwise fold an empty iterator into infinity.
        let logits = arr2(&[[3.0], [1.0]]);
        for kind in [
            LossKind::MaskedCrossEntropy,
            LossKind::ProbabilityMargin,
            LossKind::TanhMargin,
        ] {
            assert!(matches!(
                kind.evaluate(logits.view(), &[0, 0]),
                Err(BaneError::Validation(_))
            ));
        }
    }
}
