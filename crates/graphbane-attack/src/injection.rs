//! Node-injection attack.
//!
//! Instead of flipping existing edges, this attacker fabricates new nodes
//! with synthetic feature vectors and wires each of them to a random
//! subset of the targets. All resolution (budget, targets, per-node edge
//! count, feature constraint) happens up front; the loop itself only
//! records edits in the ledger.

use graphbane_core::{BaneError, BaseGraph, Result};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::budget::{
    resolve_budget, resolve_edge_count, resolve_feature_constraint, resolve_targets, BudgetSpec,
    FeatLimits, FeatureConstraint, Targets,
};
use crate::ledger::{EditKind, EditLedger};

/// Knobs for one injection run.
#[derive(Debug, Clone)]
pub struct InjectionOptions {
    /// Nodes the injected nodes may connect to.
    pub targets: Targets,
    /// Edges per injected node.
    pub num_edges_local: Option<usize>,
    /// Total edge allowance, split evenly across injected nodes.
    pub num_edges_global: Option<usize>,
    /// Value bounds for synthetic features; unset bounds default to the
    /// observed extrema of the base feature matrix.
    pub feat_limits: Option<FeatLimits>,
    /// Alternative to limits: number of nonzero (binary) entries per
    /// synthetic feature vector.
    pub feat_budgets: Option<usize>,
    pub seed: u64,
}

impl Default for InjectionOptions {
    fn default() -> Self {
        Self {
            targets: Targets::All,
            num_edges_local: None,
            num_edges_global: None,
            feat_limits: None,
            feat_budgets: None,
            seed: 42,
        }
    }
}

/// Result of one injection run.
#[derive(Debug, Clone)]
pub struct InjectionOutcome {
    /// Ids of the injected nodes, in injection order.
    pub injected_nodes: Vec<u32>,
    /// Edges wired per injected node.
    pub edges_per_node: usize,
}

/// Injects fake nodes into a fixed base graph through an edit ledger.
pub struct InjectionAttack<'a> {
    graph: &'a BaseGraph,
    ledger: EditLedger<'a>,
}

impl<'a> InjectionAttack<'a> {
    pub fn new(graph: &'a BaseGraph) -> Self {
        Self {
            graph,
            ledger: EditLedger::new(graph),
        }
    }

    pub fn reset(&mut self) -> &mut Self {
        self.ledger.reset();
        self
    }

    pub fn ledger(&self) -> &EditLedger<'a> {
        &self.ledger
    }

    /// Ids of injected nodes, or `None` before any run.
    pub fn injected_nodes(&self) -> Option<&[u32]> {
        self.ledger.injected_nodes()
    }

    /// Feature matrix of injected nodes, or `None`.
    pub fn injected_feats(&self) -> Option<Array2<f32>> {
        self.ledger.injected_feats()
    }

    /// Edges wired from injected nodes, or `None`.
    pub fn injected_edges(&self) -> Option<Array2<u32>> {
        self.ledger.injected_edges()
    }

    /// Materialize the graph with the injected nodes and their edges.
    pub fn perturbed_graph(&mut self, force_symmetric: bool) -> Result<&BaseGraph> {
        self.ledger.materialize(force_symmetric)
    }

    fn observed_feat_range(&self) -> (f32, f32) {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &x in self.graph.feat() {
            min = min.min(x);
            max = max.max(x);
        }
        if min > max {
            (0.0, 0.0)
        } else {
            (min, max)
        }
    }

    fn synthesize_feat(&self, constraint: &FeatureConstraint, rng: &mut StdRng) -> Array1<f32> {
        let num_feats = self.graph.num_feats();
        match *constraint {
            FeatureConstraint::Limits { min, max } => {
                Array1::from_iter((0..num_feats).map(|_| rng.random_range(min..=max)))
            }
            FeatureConstraint::FlipBudget(budget) => {
                let mut feat = Array1::zeros(num_feats);
                for i in rand::seq::index::sample(rng, num_feats, budget.min(num_feats)) {
                    feat[i] = 1.0;
                }
                feat
            }
        }
    }

    /// Inject `num_budgets` nodes (count, or fraction of the node count)
    /// and wire each to randomly sampled targets.
    pub fn attack(
        &mut self,
        num_budgets: impl Into<BudgetSpec>,
        opts: InjectionOptions,
    ) -> Result<InjectionOutcome> {
        if !self.ledger.is_empty() {
            return Err(BaneError::state(
                "ledger holds edits from a previous run; call reset() first",
            ));
        }
        let num_nodes = self.graph.num_nodes();
        let budget = resolve_budget(num_budgets.into(), num_nodes)?;
        let targets = resolve_targets(&opts.targets, num_nodes)?;
        let edges_per_node = resolve_edge_count(
            opts.num_edges_local,
            opts.num_edges_global,
            self.graph.mean_degree(),
            targets.len(),
        )?;
        let (observed_min, observed_max) = self.observed_feat_range();
        let constraint = resolve_feature_constraint(
            opts.feat_limits.as_ref(),
            opts.feat_budgets,
            observed_min,
            observed_max,
            self.graph.num_feats(),
        )?;
        self.ledger.set_feature_constraint(constraint.clone());
        debug!(
            budget,
            edges_per_node,
            targets = targets.len(),
            "starting node injection"
        );

        let mut rng = StdRng::seed_from_u64(opts.seed);
        let mut injected = Vec::with_capacity(budget);
        let mut iteration = 0;
        for i in 0..budget {
            let node = (num_nodes + i) as u32;
            let feat = self.synthesize_feat(&constraint, &mut rng);
            self.ledger.record_injected_node(node, feat)?;
            injected.push(node);
            let picks = rand::seq::index::sample(
                &mut rng,
                targets.len(),
                edges_per_node.min(targets.len()),
            );
            for t in picks {
                self.ledger
                    .record_edge_edit(node, targets[t], iteration, EditKind::Add)?;
                iteration += 1;
            }
        }
        Ok(InjectionOutcome {
            injected_nodes: injected,
            edges_per_node,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn base() -> BaseGraph {
        // 5 nodes, 6 directed edges, mean degree 1.2.
        BaseGraph::new(
            arr2(&[
                [0.0, 0.2],
                [0.5, 0.8],
                [1.0, 0.1],
                [0.3, 0.9],
                [0.7, 0.4],
            ]),
            arr2(&[[0, 1, 2, 3, 4, 0], [1, 2, 3, 4, 0, 2]]),
            None,
            vec![0, 1, 0, 1, 0],
        )
        .unwrap()
    }

    #[test]
    fn test_injects_requested_count() {
        let graph = base();
        let mut attack = InjectionAttack::new(&graph);
        let outcome = attack
            .attack(
                3usize,
                InjectionOptions {
                    num_edges_local: Some(2),
                    ..InjectionOptions::default()
                },
            )
            .unwrap();
        assert_eq!(outcome.injected_nodes, vec![5, 6, 7]);
        assert_eq!(attack.ledger().injected_nodes(), Some(&[5, 6, 7][..]));
        // 2 edges per injected node.
        assert_eq!(attack.ledger().added_edges().unwrap().ncols(), 6);
    }

    #[test]
    fn test_fractional_budget_resolves_against_node_count() {
        let graph = base();
        let mut attack = InjectionAttack::new(&graph);
        let outcome = attack.attack(0.4, InjectionOptions::default()).unwrap();
        // floor(0.4 * 5) = 2 nodes.
        assert_eq!(outcome.injected_nodes.len(), 2);
    }

    #[test]
    fn test_default_edge_count_is_mean_degree() {
        let graph = base();
        let mut attack = InjectionAttack::new(&graph);
        let outcome = attack.attack(1usize, InjectionOptions::default()).unwrap();
        // mean degree 1.2 rounds to 1.
        assert_eq!(outcome.edges_per_node, 1);
    }

    #[test]
    fn test_features_respect_limits() {
        let graph = base();
        let mut attack = InjectionAttack::new(&graph);
        attack
            .attack(
                2usize,
                InjectionOptions {
                    feat_limits: Some(FeatLimits::Pair(Some(0.2), Some(0.4))),
                    ..InjectionOptions::default()
                },
            )
            .unwrap();
        let feats = attack.ledger().injected_feats().unwrap();
        assert!(feats.iter().all(|&x| (0.2..=0.4).contains(&x)));
    }

    #[test]
    fn test_flip_budget_yields_binary_features() {
        let graph = base();
        let mut attack = InjectionAttack::new(&graph);
        attack
            .attack(
                2usize,
                InjectionOptions {
                    feat_budgets: Some(1),
                    ..InjectionOptions::default()
                },
            )
            .unwrap();
        let feats = attack.ledger().injected_feats().unwrap();
        for row in feats.rows() {
            let ones = row.iter().filter(|&&x| x == 1.0).count();
            let zeros = row.iter().filter(|&&x| x == 0.0).count();
            assert_eq!(ones, 1);
            assert_eq!(zeros, row.len() - 1);
        }
    }

    #[test]
    fn test_edges_only_touch_targets() {
        let graph = base();
        let mut attack = InjectionAttack::new(&graph);
        attack
            .attack(
                2usize,
                InjectionOptions {
                    targets: Targets::Nodes(vec![1, 3]),
                    num_edges_local: Some(2),
                    ..InjectionOptions::default()
                },
            )
            .unwrap();
        let added = attack.ledger().added_edges().unwrap();
        for col in 0..added.ncols() {
            assert!(added[[0, col]] >= 5, "source must be an injected node");
            assert!(matches!(added[[1, col]], 1 | 3));
        }
    }

    #[test]
    fn test_conflicting_edge_options_rejected() {
        let graph = base();
        let mut attack = InjectionAttack::new(&graph);
        let result = attack.attack(
            1usize,
            InjectionOptions {
                num_edges_local: Some(1),
                num_edges_global: Some(4),
                ..InjectionOptions::default()
            },
        );
        assert!(matches!(result, Err(BaneError::Validation(_))));
    }

    #[test]
    fn test_second_run_requires_reset() {
        let graph = base();
        let mut attack = InjectionAttack::new(&graph);
        attack.attack(1usize, InjectionOptions::default()).unwrap();
        assert!(matches!(
            attack.attack(1usize, InjectionOptions::default()),
            Err(BaneError::State(_))
        ));
        attack.reset();
        assert!(attack.attack(1usize, InjectionOptions::default()).is_ok());
    }

    #[test]
    fn test_materialized_graph_grows() {
        let graph = base();
        let mut attack = InjectionAttack::new(&graph);
        attack
            .attack(
                2usize,
                InjectionOptions {
                    num_edges_local: Some(1),
                    ..InjectionOptions::default()
                },
            )
            .unwrap();
        let perturbed = attack.perturbed_graph(false).unwrap();
        assert_eq!(perturbed.num_nodes(), 7);
        assert_eq!(perturbed.num_edges(), graph.num_edges() + 2);
        assert_eq!(perturbed.feat().nrows(), 7);
    }

    #[test]
    fn test_feature_width_follows_base() {
        let graph = base();
        let mut attack = InjectionAttack::new(&graph);
        attack.attack(1usize, InjectionOptions::default()).unwrap();
        let feats = attack.ledger().injected_feats().unwrap();
        assert_eq!(feats.ncols(), graph.num_feats());
    }
}
