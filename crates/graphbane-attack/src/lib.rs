//! Gradient-based structure attacks on graph classifiers.
//!
//! Two attackers operate through a shared edit ledger against an
//! immutable base graph:
//! - [`PrbcdAttack`]: projected randomized block coordinate descent over
//!   edge flips. A random block of candidate edges carries continuous
//!   relaxed weights, an attack loss is ascended with SPSA gradient
//!   estimates, every step is projected back onto the budget simplex, and
//!   the relaxed solution is discretized by weighted sampling.
//! - [`InjectionAttack`]: fabricates new nodes with synthetic features
//!   and wires them to randomly sampled targets.
//!
//! The victim classifier stays behind the [`Surrogate`] trait; nothing
//! here depends on a particular model family.

pub mod block;
pub mod budget;
pub mod injection;
pub mod ledger;
pub mod loss;
pub mod prbcd;
pub mod projection;
pub mod stats;
pub mod surrogate;

pub use block::{Block, BlockSampler, EdgeSpace};
pub use budget::{
    resolve_budget, resolve_edge_count, resolve_feature_constraint, resolve_targets, BudgetSpec,
    FeatLimits, FeatureConstraint, Targets,
};
pub use injection::{InjectionAttack, InjectionOptions, InjectionOutcome};
pub use ledger::{EdgeEdit, EditKind, EditLedger};
pub use loss::{CustomLoss, LossKind};
pub use prbcd::{AttackOutcome, AttackRequest, Coeffs, PrbcdAttack};
pub use projection::{ProjectionEngine, ProjectionScalars};
pub use stats::{AttackStatistics, EpochStats};
pub use surrogate::{estimate_gradient_spsa, gather_rows, Surrogate};

pub use graphbane_core::{BaneError, BaseGraph, Result};
