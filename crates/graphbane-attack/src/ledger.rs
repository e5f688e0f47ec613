//! Graph edit ledger: a mutable overlay on an immutable base graph.
//!
//! The ledger records pending edge flips and injected nodes without ever
//! touching the base graph. [`EditLedger::materialize`] combines base and
//! overlay into a concrete perturbed graph on demand; the result is cached
//! behind an explicit dirty flag and invalidated by any mutation.

use std::collections::{BTreeMap, HashSet};

use graphbane_core::{BaneError, BaseGraph, Result};
use ndarray::{Array1, Array2};

use crate::budget::FeatureConstraint;

/// Direction of an edge edit relative to the base graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Add,
    Remove,
}

/// A single recorded edge edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEdit {
    /// Iteration at which the edit was recorded; additions are applied in
    /// this order during materialization.
    pub iteration: usize,
    pub kind: EditKind,
}

/// Mutable overlay owned by one attacker instance.
#[derive(Debug)]
pub struct EditLedger<'a> {
    base: &'a BaseGraph,
    constraint: Option<FeatureConstraint>,
    injected_nodes: Vec<u32>,
    injected_feats: Vec<Array1<f32>>,
    edge_edits: BTreeMap<(u32, u32), EdgeEdit>,
    cache: Option<(bool, BaseGraph)>,
    dirty: bool,
}

impl<'a> EditLedger<'a> {
    pub fn new(base: &'a BaseGraph) -> Self {
        Self {
            base,
            constraint: None,
            injected_nodes: Vec::new(),
            injected_feats: Vec::new(),
            edge_edits: BTreeMap::new(),
            cache: None,
            dirty: false,
        }
    }

    /// Clear all recorded state and invalidate the materialization cache.
    pub fn reset(&mut self) {
        self.constraint = None;
        self.injected_nodes.clear();
        self.injected_feats.clear();
        self.edge_edits.clear();
        self.cache = None;
        self.dirty = false;
    }

    /// Set the feature constraint that `record_injected_node` will
    /// validate against.
    pub fn set_feature_constraint(&mut self, constraint: FeatureConstraint) {
        self.constraint = Some(constraint);
    }

    #[inline]
    pub fn base(&self) -> &BaseGraph {
        self.base
    }

    /// Node count of the materialized graph (base plus injected).
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.base.num_nodes() + self.injected_nodes.len()
    }

    fn is_known_node(&self, v: u32) -> bool {
        (v as usize) < self.base.num_nodes() || self.injected_nodes.contains(&v)
    }

    /// Record an edge edit for key (u, v). A duplicate key overwrites the
    /// previous entry; both endpoints must be base or injected nodes.
    pub fn record_edge_edit(&mut self, u: u32, v: u32, iteration: usize, kind: EditKind) -> Result<()> {
        if !self.is_known_node(u) || !self.is_known_node(v) {
            return Err(BaneError::validation(format!(
                "edge edit ({u}, {v}) references an unknown node"
            )));
        }
        self.edge_edits.insert((u, v), EdgeEdit { iteration, kind });
        self.dirty = true;
        Ok(())
    }

    /// Record an injected node with its feature vector.
    ///
    /// Fails if the id collides with an existing node, if the feature
    /// width does not match the base graph, or if the vector violates the
    /// active feature constraint. Nothing is recorded on failure.
    pub fn record_injected_node(&mut self, node: u32, feat: Array1<f32>) -> Result<()> {
        if self.is_known_node(node) {
            return Err(BaneError::validation(format!(
                "injected node id {node} already exists"
            )));
        }
        if feat.len() != self.base.num_feats() {
            return Err(BaneError::validation(format!(
                "injected feature vector has {} entries, expected {}",
                feat.len(),
                self.base.num_feats()
            )));
        }
        if let Some(constraint) = &self.constraint {
            constraint.validate(feat.view())?;
        }
        self.injected_nodes.push(node);
        self.injected_feats.push(feat);
        self.dirty = true;
        Ok(())
    }

    /// Whether any edit has been recorded since the last reset.
    pub fn is_empty(&self) -> bool {
        self.edge_edits.is_empty() && self.injected_nodes.is_empty()
    }

    /// All recorded edge edits in key order.
    pub fn edge_edits(&self) -> impl Iterator<Item = (&(u32, u32), &EdgeEdit)> {
        self.edge_edits.iter()
    }

    /// Ids of injected nodes, in injection order. `None` if none.
    pub fn injected_nodes(&self) -> Option<&[u32]> {
        if self.injected_nodes.is_empty() {
            None
        } else {
            Some(&self.injected_nodes)
        }
    }

    /// Feature matrix of injected nodes (k×F). `None` if none.
    pub fn injected_feats(&self) -> Option<Array2<f32>> {
        if self.injected_feats.is_empty() {
            return None;
        }
        let mut feats = Array2::zeros((self.injected_feats.len(), self.base.num_feats()));
        for (row, feat) in self.injected_feats.iter().enumerate() {
            feats.row_mut(row).assign(feat);
        }
        Some(feats)
    }

    fn edits_of_kind(&self, kind: EditKind) -> Option<Array2<u32>> {
        let mut edits: Vec<(&(u32, u32), &EdgeEdit)> = self
            .edge_edits
            .iter()
            .filter(|(_, edit)| edit.kind == kind)
            .collect();
        if edits.is_empty() {
            return None;
        }
        edits.sort_by_key(|(_, edit)| edit.iteration);
        let mut out = Array2::zeros((2, edits.len()));
        for (i, (&(u, v), _)) in edits.into_iter().enumerate() {
            out[[0, i]] = u;
            out[[1, i]] = v;
        }
        Some(out)
    }

    /// Added edges as a 2×k index in insertion-iteration order.
    pub fn added_edges(&self) -> Option<Array2<u32>> {
        self.edits_of_kind(EditKind::Add)
    }

    /// Added edges with an injected endpoint, as a 2×k index in
    /// insertion-iteration order. `None` if none.
    pub fn injected_edges(&self) -> Option<Array2<u32>> {
        let injected: HashSet<u32> = self.injected_nodes.iter().copied().collect();
        let mut edits: Vec<(&(u32, u32), &EdgeEdit)> = self
            .edge_edits
            .iter()
            .filter(|(&(u, v), edit)| {
                edit.kind == EditKind::Add && (injected.contains(&u) || injected.contains(&v))
            })
            .collect();
        if edits.is_empty() {
            return None;
        }
        edits.sort_by_key(|(_, edit)| edit.iteration);
        let mut out = Array2::zeros((2, edits.len()));
        for (i, (&(u, v), _)) in edits.into_iter().enumerate() {
            out[[0, i]] = u;
            out[[1, i]] = v;
        }
        Some(out)
    }

    /// Removed edges as a 2×k index in insertion-iteration order.
    pub fn removed_edges(&self) -> Option<Array2<u32>> {
        self.edits_of_kind(EditKind::Remove)
    }

    /// Build (and cache) the perturbed graph.
    ///
    /// Node features are the base matrix with injected rows appended;
    /// edges are the base set minus removals plus additions. With
    /// `force_symmetric` every surviving edge is mirrored. Deterministic
    /// for a given ledger state; the cache is invalidated by any mutation
    /// or by a change of `force_symmetric`.
    pub fn materialize(&mut self, force_symmetric: bool) -> Result<&BaseGraph> {
        let stale = self.dirty
            || match &self.cache {
                Some((symmetric, _)) => *symmetric != force_symmetric,
                None => true,
            };
        if stale {
            let graph = self.build(force_symmetric)?;
            self.cache = Some((force_symmetric, graph));
            self.dirty = false;
        }
        match &self.cache {
            Some((_, graph)) => Ok(graph),
            None => Err(BaneError::invariant("materialization cache missing")),
        }
    }

    fn build(&self, force_symmetric: bool) -> Result<BaseGraph> {
        let base = self.base;
        let num_feats = base.num_feats();
        let num_nodes = self.num_nodes();

        let mut feat = Array2::zeros((num_nodes, num_feats));
        feat.slice_mut(ndarray::s![..base.num_nodes(), ..])
            .assign(base.feat());
        for (row, injected) in self.injected_feats.iter().enumerate() {
            feat.row_mut(base.num_nodes() + row).assign(injected);
        }

        // Base edges minus removals, in base order.
        let mut edges: Vec<(u32, u32)> = Vec::with_capacity(base.num_edges());
        let mut seen: HashSet<(u32, u32)> = HashSet::with_capacity(base.num_edges());
        for (u, v) in base.iter_edges() {
            if matches!(
                self.edge_edits.get(&(u, v)),
                Some(EdgeEdit {
                    kind: EditKind::Remove,
                    ..
                })
            ) {
                continue;
            }
            if seen.insert((u, v)) {
                edges.push((u, v));
            }
        }

        // Additions in insertion-iteration order.
        let mut additions: Vec<(&(u32, u32), &EdgeEdit)> = self
            .edge_edits
            .iter()
            .filter(|(_, edit)| edit.kind == EditKind::Add)
            .collect();
        additions.sort_by_key(|(_, edit)| edit.iteration);
        for (&(u, v), _) in additions {
            if seen.insert((u, v)) {
                edges.push((u, v));
            }
        }

        if force_symmetric {
            // Mirror in traversal order; removals suppress both directions.
            let mut mirrored = Vec::new();
            for &(u, v) in &edges {
                let rev = (v, u);
                if !seen.contains(&rev)
                    && !matches!(
                        self.edge_edits.get(&rev),
                        Some(EdgeEdit {
                            kind: EditKind::Remove,
                            ..
                        })
                    )
                {
                    seen.insert(rev);
                    mirrored.push(rev);
                }
            }
            edges.extend(mirrored);
        }

        let mut edge_index = Array2::zeros((2, edges.len()));
        for (i, (u, v)) in edges.into_iter().enumerate() {
            edge_index[[0, i]] = u;
            edge_index[[1, i]] = v;
        }
        base.with_graph(feat, edge_index)
    }
}
