//! Core types for graphbane adversarial attacks.
//!
//! This crate provides the foundational abstractions shared by every
//! attacker: the immutable [`BaseGraph`] container handed in by the
//! caller, and the crate-wide error taxonomy.

use std::collections::HashSet;

use ndarray::Array2;
use thiserror::Error;

/// Error types for graphbane operations.
#[derive(Error, Debug)]
pub enum BaneError {
    /// Malformed or mutually exclusive arguments.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// Budget resolves to zero or exceeds the feasible maximum.
    #[error("infeasible budget: {0}")]
    Budget(String),

    /// Operation invoked in the wrong attacker lifecycle state.
    #[error("attacker state: {0}")]
    State(String),

    /// Post-condition violated. Indicates a programming error, never
    /// expected in correct operation.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// The external classifier failed during a forward pass.
    #[error("classifier failure: {0}")]
    Classifier(String),
}

impl BaneError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BaneError::Validation(msg.into())
    }

    pub fn budget(msg: impl Into<String>) -> Self {
        BaneError::Budget(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        BaneError::State(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        BaneError::Invariant(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, BaneError>;

/// Immutable snapshot of the graph under attack.
///
/// Holds the node feature matrix (N×F), the directed edge list (2×E),
/// optional per-edge weights and node labels. The attack subsystem never
/// mutates a `BaseGraph` in place; perturbed variants are produced by the
/// edit ledger as fresh instances.
#[derive(Debug, Clone)]
pub struct BaseGraph {
    feat: Array2<f32>,
    edge_index: Array2<u32>,
    edge_weight: Option<Vec<f32>>,
    labels: Vec<usize>,
    /// Directed membership set for O(1) `has_edge` queries.
    edge_set: HashSet<(u32, u32)>,
}

impl BaseGraph {
    /// Create a graph from a feature matrix, a 2×E directed edge index
    /// and per-node labels.
    ///
    /// Labels may be shorter than the node count (injected nodes carry no
    /// ground-truth label) but never longer.
    pub fn new(
        feat: Array2<f32>,
        edge_index: Array2<u32>,
        edge_weight: Option<Vec<f32>>,
        labels: Vec<usize>,
    ) -> Result<Self> {
        if edge_index.nrows() != 2 {
            return Err(BaneError::validation(format!(
                "edge_index must have shape (2, E), got ({}, {})",
                edge_index.nrows(),
                edge_index.ncols()
            )));
        }
        let num_nodes = feat.nrows();
        let num_edges = edge_index.ncols();
        if let Some(&bad) = edge_index.iter().find(|&&v| v as usize >= num_nodes) {
            return Err(BaneError::validation(format!(
                "edge endpoint {bad} out of range for {num_nodes} nodes"
            )));
        }
        if let Some(w) = &edge_weight {
            if w.len() != num_edges {
                return Err(BaneError::validation(format!(
                    "edge_weight length {} does not match {num_edges} edges",
                    w.len()
                )));
            }
        }
        if labels.len() > num_nodes {
            return Err(BaneError::validation(format!(
                "got {} labels for {num_nodes} nodes",
                labels.len()
            )));
        }
        let edge_set = (0..num_edges)
            .map(|e| (edge_index[[0, e]], edge_index[[1, e]]))
            .collect();
        Ok(Self {
            feat,
            edge_index,
            edge_weight,
            labels,
            edge_set,
        })
    }

    /// Shallow-copy-style constructor: same labels, replaced features and
    /// edge index, unit edge weights.
    pub fn with_graph(&self, feat: Array2<f32>, edge_index: Array2<u32>) -> Result<Self> {
        Self::new(feat, edge_index, None, self.labels.clone())
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.feat.nrows()
    }

    #[inline]
    pub fn num_feats(&self) -> usize {
        self.feat.ncols()
    }

    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edge_index.ncols()
    }

    #[inline]
    pub fn feat(&self) -> &Array2<f32> {
        &self.feat
    }

    #[inline]
    pub fn edge_index(&self) -> &Array2<u32> {
        &self.edge_index
    }

    #[inline]
    pub fn edge_weight(&self) -> Option<&[f32]> {
        self.edge_weight.as_deref()
    }

    #[inline]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Endpoints of the e-th edge.
    #[inline]
    pub fn edge(&self, e: usize) -> (u32, u32) {
        (self.edge_index[[0, e]], self.edge_index[[1, e]])
    }

    /// Iterate over directed edges as (source, destination) pairs.
    pub fn iter_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.num_edges()).map(move |e| self.edge(e))
    }

    /// Whether the directed edge (u, v) is present.
    #[inline]
    pub fn has_edge(&self, u: u32, v: u32) -> bool {
        self.edge_set.contains(&(u, v))
    }

    /// Out-degree of a node.
    pub fn degree(&self, v: u32) -> usize {
        (0..self.num_edges())
            .filter(|&e| self.edge_index[[0, e]] == v)
            .count()
    }

    /// Mean out-degree over all nodes.
    pub fn mean_degree(&self) -> f64 {
        if self.num_nodes() == 0 {
            return 0.0;
        }
        self.num_edges() as f64 / self.num_nodes() as f64
    }
}
