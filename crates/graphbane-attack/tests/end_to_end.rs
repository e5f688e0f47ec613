//! End-to-end attack runs against a small linear graph convolution.

use std::sync::Arc;

use graphbane_attack::{
    AttackRequest, BaseGraph, BudgetSpec, Coeffs, InjectionAttack, InjectionOptions, PrbcdAttack,
    Result, Surrogate, Targets,
};
use ndarray::{Array1, Array2, ArrayView2};

/// One-layer linear graph convolution: neighbor-sum aggregation followed
/// by a dense layer, `logits = (A_w x) W + b`.
struct LinearGcn {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Surrogate for LinearGcn {
    fn predict(
        &self,
        feat: ArrayView2<'_, f32>,
        edge_index: ArrayView2<'_, u32>,
        edge_weight: Option<&[f32]>,
    ) -> Result<Array2<f32>> {
        let mut hidden = Array2::<f32>::zeros(feat.raw_dim());
        for e in 0..edge_index.ncols() {
            let u = edge_index[[0, e]] as usize;
            let v = edge_index[[1, e]] as usize;
            let w = edge_weight.map_or(1.0, |w| w[e]);
            let contribution = feat.row(u).to_owned() * w;
            hidden.row_mut(v).scaled_add(1.0, &contribution);
        }
        Ok(hidden.dot(&self.weight) + &self.bias)
    }
}

/// Classifier whose class-0 logit is the weighted in-degree: nodes with
/// degree 2 read as class 0, nodes cut down to degree <= 1 flip.
fn degree_gcn() -> Arc<LinearGcn> {
    Arc::new(LinearGcn {
        weight: Array2::from_shape_vec((1, 2), vec![1.0, 0.0]).unwrap(),
        bias: Array1::from(vec![0.0, 1.5]),
    })
}

/// Symmetric ring on `n` nodes; every node has in-degree 2 and label 0.
fn ring(n: u32) -> BaseGraph {
    let mut edge_index = Array2::zeros((2, 2 * n as usize));
    for v in 0..n {
        let next = (v + 1) % n;
        edge_index[[0, 2 * v as usize]] = v;
        edge_index[[1, 2 * v as usize]] = next;
        edge_index[[0, 2 * v as usize + 1]] = next;
        edge_index[[1, 2 * v as usize + 1]] = v;
    }
    BaseGraph::new(
        Array2::ones((n as usize, 1)),
        edge_index,
        None,
        vec![0; n as usize],
    )
    .unwrap()
}

fn request() -> AttackRequest {
    AttackRequest {
        num_budgets: Some(BudgetSpec::Count(2)),
        block_size: 200,
        epochs: 15,
        epochs_resampling: 10,
        lr: 100.0,
        coeffs: Coeffs {
            spsa_probes: 8,
            ..Coeffs::default()
        },
        ..AttackRequest::default()
    }
}

#[test]
fn prbcd_attack_on_ring() {
    let graph = ring(10);
    let mut attack = PrbcdAttack::new(&graph);
    attack.setup_surrogate(degree_gcn());
    let outcome = attack.attack(request()).unwrap();

    assert_eq!(outcome.budget, 2);
    // Every removal on the ring strictly improves the objective, so the
    // whole budget gets spent.
    assert_eq!(outcome.flipped_edges.ncols(), 2);
    assert!(outcome.final_metric > outcome.initial_metric);
    assert_eq!(outcome.epochs_run, 15);
    assert_eq!(attack.statistics().len(), 15);

    // Any winning flip on the ring must be the removal of a base edge:
    // fresh edges raise degrees and only hurt the objective.
    for col in 0..outcome.flipped_edges.ncols() {
        let u = outcome.flipped_edges[[0, col]];
        let v = outcome.flipped_edges[[1, col]];
        assert!(
            graph.has_edge(u, v) || graph.has_edge(v, u),
            "flip ({u}, {v}) is not a base edge"
        );
    }

    let flips = outcome.flipped_edges.ncols();
    let perturbed = attack.perturbed_graph(true).unwrap();
    assert_eq!(perturbed.num_edges(), graph.num_edges() - 2 * flips);
}

#[test]
fn prbcd_attack_is_reproducible() {
    let graph = ring(10);
    let run = || {
        let mut attack = PrbcdAttack::new(&graph);
        attack.setup_surrogate(degree_gcn());
        attack.attack(request()).unwrap()
    };
    let first = run();
    let second = run();
    assert_eq!(first.flipped_edges, second.flipped_edges);
    assert_eq!(first.final_metric, second.final_metric);
}

#[test]
fn prbcd_attack_reset_reuses_instance() {
    let graph = ring(10);
    let mut attack = PrbcdAttack::new(&graph);
    attack.setup_surrogate(degree_gcn());
    let first = attack.attack(request()).unwrap();
    attack.reset();
    assert!(attack.ledger().is_empty());
    let second = attack.attack(request()).unwrap();
    assert_eq!(first.flipped_edges, second.flipped_edges);
}

#[test]
fn parallel_discretization_matches_sequential() {
    let graph = ring(10);
    let run = |parallel: bool| {
        let mut attack = PrbcdAttack::new(&graph);
        attack.setup_surrogate(degree_gcn());
        attack
            .attack(AttackRequest {
                coeffs: Coeffs {
                    parallel,
                    spsa_probes: 8,
                    ..Coeffs::default()
                },
                ..request()
            })
            .unwrap()
    };
    // Discretization trials are seeded per trial, so threading does not
    // change the winner.
    assert_eq!(run(false).flipped_edges, run(true).flipped_edges);
}

#[test]
fn injection_then_prediction() {
    let graph = ring(8);
    let mut attack = InjectionAttack::new(&graph);
    let outcome = attack
        .attack(
            2usize,
            InjectionOptions {
                num_edges_local: Some(3),
                ..InjectionOptions::default()
            },
        )
        .unwrap();
    assert_eq!(outcome.injected_nodes, vec![8, 9]);

    // The perturbed graph runs through the same classifier unchanged.
    let perturbed = attack.perturbed_graph(true).unwrap();
    let logits = degree_gcn()
        .predict(
            perturbed.feat().view(),
            perturbed.edge_index().view(),
            None,
        )
        .unwrap();
    assert_eq!(logits.nrows(), 10);
}
