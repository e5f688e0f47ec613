//! Projected randomized block coordinate descent over edge flips.
//!
//! The attack relaxes binary edge flips to continuous weights on a random
//! working block, ascends an attack loss with SPSA gradient estimates,
//! projects back onto the budget simplex after every step, periodically
//! swaps out the dead part of the block, and finally discretizes the
//! relaxed solution by weighted sampling, keeping the best trial.

use std::collections::HashMap;
use std::sync::Arc;

use graphbane_core::{BaneError, BaseGraph, Result};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::block::{Block, BlockSampler, EdgeSpace};
use crate::budget::{resolve_budget, resolve_targets, BudgetSpec, Targets};
use crate::ledger::{EditKind, EditLedger};
use crate::loss::LossKind;
use crate::projection::ProjectionEngine;
use crate::stats::AttackStatistics;
use crate::surrogate::{estimate_gradient_spsa, gather_rows, Surrogate};

/// Numerical tunables with defaults that work across graph sizes.
#[derive(Debug, Clone)]
pub struct Coeffs {
    /// Floor below which a relaxed weight counts as zero.
    pub eps: f32,
    /// Discretization trials (trial 0 is the deterministic top-k).
    pub max_final_samples: usize,
    /// Track the best epoch and snap back to it at the resampling
    /// boundary and after the final epoch.
    pub with_early_stopping: bool,
    /// SPSA perturbation radius.
    pub spsa_delta: f32,
    /// SPSA probes averaged per gradient estimate.
    pub spsa_probes: usize,
    /// Iteration cap for the projection bisection.
    pub bisection_max_iter: usize,
    /// Run the discretization trials on the rayon pool.
    pub parallel: bool,
    /// Seed for block sampling and discretization.
    pub seed: u64,
}

impl Default for Coeffs {
    fn default() -> Self {
        Self {
            eps: 1e-7,
            max_final_samples: 20,
            with_early_stopping: true,
            spsa_delta: 1e-2,
            spsa_probes: 8,
            bisection_max_iter: 10_000,
            parallel: false,
            seed: 42,
        }
    }
}

/// One attack run, fully specified.
#[derive(Debug, Clone)]
pub struct AttackRequest {
    /// Nodes whose classification the attack degrades.
    pub targets: Targets,
    /// Ground-truth labels of the targets; defaults to the base graph
    /// labels at the target nodes.
    pub target_labels: Option<Vec<usize>>,
    /// Edge-flip budget; defaults to the rounded mean target degree.
    pub num_budgets: Option<BudgetSpec>,
    /// Restrict candidate flips to edges touching the targets.
    pub direct_attack: bool,
    /// Working block size (candidates drawn per block).
    pub block_size: usize,
    pub epochs: usize,
    /// Epochs during which the block is resampled; the remainder
    /// fine-tune a frozen block.
    pub epochs_resampling: usize,
    pub loss: LossKind,
    /// Success metric for best-epoch tracking and trial selection;
    /// defaults to the loss.
    pub metric: Option<LossKind>,
    /// Base learning rate, scaled internally by budget over node count.
    pub lr: f32,
    pub structure_attack: bool,
    pub feature_attack: bool,
    /// Treat the graph as undirected: candidates are unordered pairs and
    /// every flip is mirrored.
    pub undirected: bool,
    pub coeffs: Coeffs,
}

impl Default for AttackRequest {
    fn default() -> Self {
        Self {
            targets: Targets::All,
            target_labels: None,
            num_budgets: None,
            direct_attack: true,
            block_size: 250_000,
            epochs: 125,
            epochs_resampling: 100,
            loss: LossKind::TanhMargin,
            metric: None,
            lr: 2000.0,
            structure_attack: true,
            feature_attack: false,
            undirected: true,
            coeffs: Coeffs::default(),
        }
    }
}

/// Result of one attack run.
#[derive(Debug, Clone)]
pub struct AttackOutcome {
    /// Flipped edges as a 2×k index (canonical direction).
    pub flipped_edges: Array2<u32>,
    /// Resolved edge-flip budget.
    pub budget: usize,
    /// Metric on the clean graph.
    pub initial_metric: f32,
    /// Metric on the best discretized perturbation.
    pub final_metric: f32,
    pub epochs_run: usize,
}

/// Structure attack on a fixed base graph.
///
/// One instance owns one edit ledger; call [`PrbcdAttack::reset`] between
/// runs.
pub struct PrbcdAttack<'a> {
    graph: &'a BaseGraph,
    ledger: EditLedger<'a>,
    surrogate: Option<Arc<dyn Surrogate>>,
    stats: AttackStatistics,
}

impl<'a> PrbcdAttack<'a> {
    pub fn new(graph: &'a BaseGraph) -> Self {
        Self {
            graph,
            ledger: EditLedger::new(graph),
            surrogate: None,
            stats: AttackStatistics::new(),
        }
    }

    pub fn setup_surrogate(&mut self, surrogate: Arc<dyn Surrogate>) -> &mut Self {
        self.surrogate = Some(surrogate);
        self
    }

    /// Clear the ledger and the statistics trace.
    pub fn reset(&mut self) -> &mut Self {
        self.ledger.reset();
        self.stats.clear();
        self
    }

    pub fn statistics(&self) -> &AttackStatistics {
        &self.stats
    }

    pub fn ledger(&self) -> &EditLedger<'a> {
        &self.ledger
    }

    /// Edges added by the last run, or `None`.
    pub fn added_edges(&self) -> Option<Array2<u32>> {
        self.ledger.added_edges()
    }

    /// Edges removed by the last run, or `None`.
    pub fn removed_edges(&self) -> Option<Array2<u32>> {
        self.ledger.removed_edges()
    }

    /// Materialize the perturbed graph recorded by the last run.
    pub fn perturbed_graph(&mut self, force_symmetric: bool) -> Result<&BaseGraph> {
        self.ledger.materialize(force_symmetric)
    }

    fn validate(&self, request: &AttackRequest) -> Result<()> {
        if !request.structure_attack {
            return Err(BaneError::validation(
                "structure_attack must be enabled for an edge-flip attack",
            ));
        }
        if request.feature_attack {
            return Err(BaneError::validation(
                "feature perturbations are not supported by the edge-flip attack",
            ));
        }
        if request.epochs == 0 {
            return Err(BaneError::validation("epochs must be at least 1"));
        }
        if request.epochs_resampling == 0 || request.epochs_resampling > request.epochs {
            return Err(BaneError::validation(format!(
                "epochs_resampling {} outside [1, {}]",
                request.epochs_resampling, request.epochs
            )));
        }
        if request.block_size == 0 {
            return Err(BaneError::validation("block_size must be at least 1"));
        }
        if !(request.lr > 0.0) {
            return Err(BaneError::validation("lr must be positive"));
        }
        Ok(())
    }

    fn default_budget(&self, targets: &[u32]) -> usize {
        let total: usize = targets.iter().map(|&t| self.graph.degree(t)).sum();
        ((total as f64 / targets.len() as f64).round() as usize).max(1)
    }

    /// Run the attack and record the winning flips in the ledger.
    pub fn attack(&mut self, request: AttackRequest) -> Result<AttackOutcome> {
        let surrogate = self
            .surrogate
            .as_ref()
            .ok_or_else(|| BaneError::state("no surrogate classifier configured"))?
            .clone();
        if !self.ledger.is_empty() {
            return Err(BaneError::state(
                "ledger holds edits from a previous run; call reset() first",
            ));
        }
        self.validate(&request)?;
        self.stats.clear();

        let targets = resolve_targets(&request.targets, self.graph.num_nodes())?;
        let labels = match &request.target_labels {
            Some(labels) => {
                if labels.len() != targets.len() {
                    return Err(BaneError::validation(format!(
                        "{} labels for {} targets",
                        labels.len(),
                        targets.len()
                    )));
                }
                labels.clone()
            }
            None => {
                // Labels may cover only a prefix of the nodes.
                let stored = self.graph.labels();
                targets
                    .iter()
                    .map(|&t| {
                        stored.get(t as usize).copied().ok_or_else(|| {
                            BaneError::validation(format!(
                                "target {t} has no stored label; pass target_labels"
                            ))
                        })
                    })
                    .collect::<Result<Vec<usize>>>()?
            }
        };
        let budget = match request.num_budgets {
            Some(spec) => resolve_budget(spec, self.graph.num_edges())?,
            None => self.default_budget(&targets),
        };
        let num_nodes = self.graph.num_nodes() as u64;
        let space = if request.direct_attack {
            EdgeSpace::Local {
                num_nodes,
                targets: targets.clone(),
                undirected: request.undirected,
            }
        } else {
            EdgeSpace::Full {
                num_nodes,
                undirected: request.undirected,
            }
        };
        if space.size() == 0 {
            return Err(BaneError::validation("candidate edge space is empty"));
        }
        debug!(
            budget,
            targets = targets.len(),
            space = space.size(),
            block_size = request.block_size,
            "starting edge-flip attack"
        );

        let metric = request.metric.clone().unwrap_or_else(|| request.loss.clone());
        let sampler = BlockSampler::new(
            space,
            request.block_size,
            request.coeffs.eps,
            StdRng::seed_from_u64(request.coeffs.seed),
        );
        let mut engine = Engine {
            graph: self.graph,
            surrogate: surrogate.as_ref(),
            base_pos: base_positions(self.graph),
            targets,
            labels,
            budget,
            undirected: request.undirected,
            loss: request.loss.clone(),
            metric,
            lr: request.lr,
            epochs: request.epochs,
            epochs_resampling: request.epochs_resampling,
            coeffs: request.coeffs.clone(),
            sampler,
            block: Block::default(),
            projection: ProjectionEngine {
                max_iter: request.coeffs.bisection_max_iter,
                ..ProjectionEngine::default()
            },
        };
        let (chosen, initial_metric, final_metric) = engine.run(&mut self.stats)?;

        if chosen.len() > budget {
            return Err(BaneError::invariant(format!(
                "{} flips selected for a budget of {budget}",
                chosen.len()
            )));
        }
        let mut flipped = Array2::zeros((2, chosen.len()));
        for (iteration, &pos) in chosen.iter().enumerate() {
            let (u, v) = engine.block.edges[pos];
            flipped[[0, iteration]] = u;
            flipped[[1, iteration]] = v;
            let forward = self.graph.has_edge(u, v);
            let backward = request.undirected && self.graph.has_edge(v, u);
            if forward || backward {
                if forward {
                    self.ledger.record_edge_edit(u, v, iteration, EditKind::Remove)?;
                }
                if backward {
                    self.ledger.record_edge_edit(v, u, iteration, EditKind::Remove)?;
                }
            } else {
                self.ledger.record_edge_edit(u, v, iteration, EditKind::Add)?;
            }
        }
        debug!(
            flips = chosen.len(),
            initial_metric, final_metric, "attack finished"
        );
        Ok(AttackOutcome {
            flipped_edges: flipped,
            budget,
            initial_metric,
            final_metric,
            epochs_run: request.epochs,
        })
    }
}

/// Directed base edge -> column in the base edge index.
fn base_positions(graph: &BaseGraph) -> HashMap<(u32, u32), usize> {
    graph
        .iter_edges()
        .enumerate()
        .map(|(pos, edge)| (edge, pos))
        .collect()
}

/// Per-run optimization state. Borrows the graph and surrogate; the rng
/// driving SPSA lives on the `run` stack so evaluation stays `&self`.
struct Engine<'g> {
    graph: &'g BaseGraph,
    surrogate: &'g dyn Surrogate,
    base_pos: HashMap<(u32, u32), usize>,
    targets: Vec<u32>,
    labels: Vec<usize>,
    budget: usize,
    undirected: bool,
    loss: LossKind,
    metric: LossKind,
    lr: f32,
    epochs: usize,
    epochs_resampling: usize,
    coeffs: Coeffs,
    sampler: BlockSampler,
    block: Block,
    projection: ProjectionEngine,
}

impl Engine<'_> {
    /// Evaluate a loss on the graph perturbed by the given block weights.
    fn eval_with(&self, weights: &[f32], kind: &LossKind) -> Result<f32> {
        let (edge_index, edge_weight) = self.perturbed_view(weights);
        let logits = self.surrogate.predict(
            self.graph.feat().view(),
            edge_index.view(),
            Some(&edge_weight),
        )?;
        let picked = gather_rows(&logits, &self.targets);
        kind.evaluate(picked.view(), &self.labels)
    }

    /// Weighted edge view of the perturbed graph: a base edge carried by
    /// the block gets weight `1 - w`, a fresh block edge enters with
    /// weight `w` (mirrored when undirected). Assumes a binary base
    /// adjacency.
    fn perturbed_view(&self, weights: &[f32]) -> (Array2<u32>, Vec<f32>) {
        let base_edges = self.graph.num_edges();
        let mut edge_weight: Vec<f32> = match self.graph.edge_weight() {
            Some(w) => w.to_vec(),
            None => vec![1.0; base_edges],
        };
        let mut extra: Vec<(u32, u32, f32)> = Vec::new();
        for (i, &(u, v)) in self.block.edges.iter().enumerate() {
            let w = weights[i];
            let forward = self.base_pos.get(&(u, v)).copied();
            let backward = if self.undirected {
                self.base_pos.get(&(v, u)).copied()
            } else {
                None
            };
            match (forward, backward) {
                (None, None) => {
                    extra.push((u, v, w));
                    if self.undirected {
                        extra.push((v, u, w));
                    }
                }
                (forward, backward) => {
                    if let Some(pos) = forward {
                        edge_weight[pos] = 1.0 - w;
                    }
                    if let Some(pos) = backward {
                        edge_weight[pos] = 1.0 - w;
                    }
                }
            }
        }
        let mut edge_index = Array2::zeros((2, base_edges + extra.len()));
        edge_index
            .slice_mut(ndarray::s![.., ..base_edges])
            .assign(self.graph.edge_index());
        for (col, (u, v, w)) in extra.into_iter().enumerate() {
            edge_index[[0, base_edges + col]] = u;
            edge_index[[1, base_edges + col]] = v;
            edge_weight.push(w);
        }
        (edge_index, edge_weight)
    }

    /// Positions of entries above the numerical floor.
    fn positive_positions(&self) -> Vec<usize> {
        (0..self.block.len())
            .filter(|&i| self.block.weights[i] > self.coeffs.eps)
            .collect()
    }

    /// Deterministic hard threshold: the top `min(budget, positives)`
    /// entries by weight.
    fn topk_positions(&self) -> Vec<usize> {
        let mut positives = self.positive_positions();
        positives.sort_by(|&a, &b| {
            self.block.weights[b]
                .partial_cmp(&self.block.weights[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        positives.truncate(self.budget);
        positives
    }

    fn discrete_metric(&self, chosen: &[usize]) -> Result<f32> {
        let mut mask = vec![0.0f32; self.block.len()];
        for &i in chosen {
            mask[i] = 1.0;
        }
        self.eval_with(&mask, &self.metric)
    }

    /// Resample while the block is live; at the last resampling epoch the
    /// block freezes, and fine-tuning continues from the best epoch seen
    /// so far rather than wherever the last resample left the weights.
    fn finish_epoch(&mut self, epoch: usize, best: &Option<(f32, Block)>) {
        if epoch + 1 < self.epochs_resampling {
            self.sampler.resample(&mut self.block);
        } else if epoch + 1 == self.epochs_resampling {
            if let Some((_, block)) = best {
                self.block = block.clone();
            }
        }
    }

    fn run(&mut self, stats: &mut AttackStatistics) -> Result<(Vec<usize>, f32, f32)> {
        let mut rng = StdRng::seed_from_u64(self.coeffs.seed.wrapping_add(1));
        self.block = self.sampler.sample_initial();
        if self.block.is_empty() {
            return Err(BaneError::validation("sampled an empty candidate block"));
        }
        let initial_metric = self.discrete_metric(&[])?;
        let mut best: Option<(f32, Block)> = None;
        let num_nodes = self.graph.num_nodes();

        for epoch in 0..self.epochs {
            let weights = self.block.weights.clone();
            let loss = self.eval_with(&weights, &self.loss)?;
            let gradient = estimate_gradient_spsa(
                |w| self.eval_with(w, &self.loss),
                &weights,
                self.coeffs.spsa_delta,
                self.coeffs.spsa_probes,
                &mut rng,
            )?;
            self.projection.update_step(
                &mut self.block.weights,
                &gradient,
                epoch,
                self.epochs_resampling,
                self.lr,
                self.budget,
                num_nodes,
            );
            let scalars = self.projection.project(&mut self.block.weights, self.budget);
            // The discretized metric costs a forward pass, so it is only
            // evaluated when best-epoch tracking needs it.
            let metric = if self.coeffs.with_early_stopping {
                Some(self.discrete_metric(&self.topk_positions())?)
            } else {
                None
            };
            trace!(epoch, loss, ?metric, nonzero = scalars.nonzero, "epoch");
            stats.record(epoch, loss, metric, scalars.mass_before, &scalars);

            if let Some(metric) = metric {
                if best.as_ref().map_or(true, |(m, _)| metric > *m) {
                    best = Some((metric, self.block.clone()));
                }
            }
            self.finish_epoch(epoch, &best);
        }
        if let Some((_, block)) = best {
            self.block = block;
        }
        let (chosen, final_metric) = self.sample_final(initial_metric)?;
        Ok((chosen, initial_metric, final_metric))
    }

    /// Discretize the relaxed solution: trial 0 is the deterministic
    /// top-k, the rest draw `min(budget, positives)` edges without
    /// replacement with probability proportional to weight. The trial
    /// with the best metric wins; an empty perturbation wins only if no
    /// trial beats the clean graph.
    fn sample_final(&self, clean_metric: f32) -> Result<(Vec<usize>, f32)> {
        let positives = self.positive_positions();
        if positives.is_empty() {
            return Ok((Vec::new(), clean_metric));
        }
        let amount = self.budget.min(positives.len());
        let trials: Vec<u64> = (0..self.coeffs.max_final_samples.max(1) as u64).collect();
        let run_trial = |&trial: &u64| -> Result<(f32, Vec<usize>)> {
            let chosen = if trial == 0 {
                self.topk_positions()
            } else {
                let mut rng = StdRng::seed_from_u64(self.coeffs.seed.wrapping_add(trial));
                let picks = rand::seq::index::sample_weighted(
                    &mut rng,
                    positives.len(),
                    |i| self.block.weights[positives[i]] as f64,
                    amount,
                )
                .map_err(|e| BaneError::invariant(format!("weighted sampling failed: {e}")))?;
                picks.into_iter().map(|i| positives[i]).collect()
            };
            let metric = self.discrete_metric(&chosen)?;
            Ok((metric, chosen))
        };
        let results: Result<Vec<(f32, Vec<usize>)>> = if self.coeffs.parallel {
            trials.par_iter().map(run_trial).collect()
        } else {
            trials.iter().map(run_trial).collect()
        };
        let mut best_metric = clean_metric;
        let mut best_chosen = Vec::new();
        for (metric, chosen) in results? {
            if metric > best_metric {
                best_metric = metric;
                best_chosen = chosen;
            }
        }
        Ok((best_chosen, best_metric))
    }
}
