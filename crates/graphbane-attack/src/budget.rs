//! Budget and feasibility resolution.
//!
//! Attack budgets may be given as absolute counts or as fractions of the
//! feasible maximum; target nodes as an explicit id list, a boolean mask
//! or "everything". All of these are normalized here, before any attack
//! state is mutated, so a failed call never leaves partial edits behind.

use std::collections::BTreeMap;

use graphbane_core::{BaneError, Result};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// An attack budget: an absolute count or a fraction of the feasible
/// maximum. Fractions are resolved to counts at setup; no fraction ever
/// reaches the attack loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BudgetSpec {
    Count(usize),
    Fraction(f64),
}

impl From<usize> for BudgetSpec {
    fn from(count: usize) -> Self {
        BudgetSpec::Count(count)
    }
}

impl From<f64> for BudgetSpec {
    fn from(fraction: f64) -> Self {
        BudgetSpec::Fraction(fraction)
    }
}

/// Selection of the nodes an attack should degrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    /// Every node in the graph.
    All,
    /// Boolean mask over node ids; set positions are targeted.
    Mask(Vec<bool>),
    /// Explicit node ids, used verbatim (after a bounds check).
    Nodes(Vec<u32>),
}

/// Constraint on the feature vectors of injected nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureConstraint {
    /// Every feature value must lie in [min, max].
    Limits { min: f32, max: f32 },
    /// At most this many nonzero entries per feature vector.
    FlipBudget(usize),
}

impl FeatureConstraint {
    /// Check a candidate feature vector against this constraint.
    pub fn validate(&self, feat: ArrayView1<'_, f32>) -> Result<()> {
        match *self {
            FeatureConstraint::Limits { min, max } => {
                if let Some(&bad) = feat.iter().find(|&&x| x < min || x > max) {
                    return Err(BaneError::validation(format!(
                        "feature value {bad} outside limits [{min}, {max}]"
                    )));
                }
                Ok(())
            }
            FeatureConstraint::FlipBudget(budget) => {
                let nonzero = feat.iter().filter(|&&x| x != 0.0).count();
                if nonzero > budget {
                    return Err(BaneError::validation(format!(
                        "{nonzero} nonzero features exceed flip budget {budget}"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Caller-facing feature limits: a (min, max) pair with either side
/// defaulted, or a {"min", "max"} mapping. Any other key is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatLimits {
    Pair(Option<f32>, Option<f32>),
    Map(BTreeMap<String, f32>),
}

/// Resolve a budget spec against the feasible maximum.
///
/// Integers are checked for `0 < b <= max`; fractions in (0, 1] are
/// multiplied by the maximum and floored, with a floor of 1.
pub fn resolve_budget(spec: BudgetSpec, max_perturbations: usize) -> Result<usize> {
    match spec {
        BudgetSpec::Count(count) => {
            if count == 0 || count > max_perturbations {
                Err(BaneError::budget(format!(
                    "budget {count} outside (0, {max_perturbations}]"
                )))
            } else {
                Ok(count)
            }
        }
        BudgetSpec::Fraction(fraction) => {
            if fraction <= 0.0 || fraction > 1.0 {
                Err(BaneError::budget(format!(
                    "budget fraction {fraction} outside (0, 1]"
                )))
            } else {
                Ok(((fraction * max_perturbations as f64).floor() as usize).max(1))
            }
        }
    }
}

/// Resolve a target selection to a concrete list of node ids.
pub fn resolve_targets(targets: &Targets, num_nodes: usize) -> Result<Vec<u32>> {
    let resolved: Vec<u32> = match targets {
        Targets::All => (0..num_nodes as u32).collect(),
        Targets::Mask(mask) => {
            if mask.len() != num_nodes {
                return Err(BaneError::validation(format!(
                    "target mask length {} does not match {num_nodes} nodes",
                    mask.len()
                )));
            }
            mask.iter()
                .enumerate()
                .filter(|(_, &set)| set)
                .map(|(i, _)| i as u32)
                .collect()
        }
        Targets::Nodes(nodes) => {
            if let Some(&bad) = nodes.iter().find(|&&v| v as usize >= num_nodes) {
                return Err(BaneError::validation(format!(
                    "target node {bad} out of range for {num_nodes} nodes"
                )));
            }
            nodes.clone()
        }
    };
    if resolved.is_empty() {
        return Err(BaneError::validation("target selection is empty"));
    }
    Ok(resolved)
}

/// Resolve the per-node injected-edge count.
///
/// Exactly one of `local`/`global` may be set. A global count is divided
/// among the targets; if neither is given the rounded mean degree is used,
/// clamped to at least 1.
pub fn resolve_edge_count(
    local: Option<usize>,
    global: Option<usize>,
    mean_degree: f64,
    num_targets: usize,
) -> Result<usize> {
    match (local, global) {
        (Some(_), Some(_)) => Err(BaneError::validation(
            "num_edges_local and num_edges_global cannot be used simultaneously",
        )),
        (Some(local), None) => Ok(local),
        (None, Some(global)) => {
            let per_node = global / num_targets.max(1);
            if per_node == 0 {
                Err(BaneError::budget(format!(
                    "too few edges allowed (num_edges_global={global}) for {num_targets} targets"
                )))
            } else {
                Ok(per_node)
            }
        }
        (None, None) => Ok((mean_degree.round() as usize).max(1)),
    }
}

/// Resolve the feature constraint for injected nodes.
///
/// Exactly one of `limits`/`flip_budget` may be set; unset limit bounds
/// default to the observed extrema of the base feature matrix. With
/// neither given, the observed extrema become the limits.
pub fn resolve_feature_constraint(
    limits: Option<&FeatLimits>,
    flip_budget: Option<usize>,
    observed_min: f32,
    observed_max: f32,
    num_feats: usize,
) -> Result<FeatureConstraint> {
    if limits.is_some() && flip_budget.is_some() {
        return Err(BaneError::validation(
            "feat_limits and feat_budgets cannot be used simultaneously",
        ));
    }
    if let Some(budget) = flip_budget {
        if budget > num_feats {
            return Err(BaneError::budget(format!(
                "feature flip budget {budget} exceeds {num_feats} features"
            )));
        }
        return Ok(FeatureConstraint::FlipBudget(budget));
    }
    let (min, max) = match limits {
        None => (None, None),
        Some(FeatLimits::Pair(min, max)) => (*min, *max),
        Some(FeatLimits::Map(map)) => {
            if let Some(key) = map.keys().find(|k| k.as_str() != "min" && k.as_str() != "max") {
                return Err(BaneError::validation(format!(
                    "unrecognized feature limit key {key:?}"
                )));
            }
            (map.get("min").copied(), map.get("max").copied())
        }
    };
    let min = min.unwrap_or(observed_min);
    let max = max.unwrap_or(observed_max);
    if min > max {
        return Err(BaneError::validation(format!(
            "feature limits min {min} > max {max}"
        )));
    }
    Ok(FeatureConstraint::Limits { min, max })
}
