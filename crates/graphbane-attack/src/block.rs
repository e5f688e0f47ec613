//! Random block sampling over the virtual edge space.
//!
//! PRBCD never holds the full O(n²) candidate set in memory. Instead a
//! working block of candidate edges is drawn with replacement from a
//! *virtual* edge space (full directed, upper-triangular for undirected
//! graphs, or restricted to edges touching the target set for direct
//! attacks) and deduplicated, so the actual block is typically slightly
//! smaller than the configured limit.

use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashSet;

/// A virtual space of candidate edges, addressable by linear index
/// without ever being materialized. Self-loops are excluded by
/// construction.
#[derive(Debug, Clone)]
pub enum EdgeSpace {
    /// All ordered or unordered node pairs.
    Full { num_nodes: u64, undirected: bool },
    /// Pairs with at least one endpoint in the target set (direct/local
    /// attacks).
    Local {
        num_nodes: u64,
        targets: Vec<u32>,
        undirected: bool,
    },
}

impl EdgeSpace {
    pub fn undirected(&self) -> bool {
        match self {
            EdgeSpace::Full { undirected, .. } | EdgeSpace::Local { undirected, .. } => *undirected,
        }
    }

    /// Number of addressable candidate indices. For local undirected
    /// spaces indices of target-target pairs alias; deduplication happens
    /// at sampling time on canonical endpoints.
    pub fn size(&self) -> u64 {
        match self {
            EdgeSpace::Full {
                num_nodes,
                undirected: false,
            } => num_nodes * num_nodes.saturating_sub(1),
            EdgeSpace::Full {
                num_nodes,
                undirected: true,
            } => num_nodes * num_nodes.saturating_sub(1) / 2,
            EdgeSpace::Local {
                num_nodes, targets, ..
            } => targets.len() as u64 * num_nodes.saturating_sub(1),
        }
    }

    /// Linear indices preceding upper-triangular row `r` (no diagonal).
    #[inline]
    fn triu_offset(num_nodes: u64, r: u64) -> u64 {
        r * (2 * num_nodes - r - 1) / 2
    }

    /// Map a linear index to edge endpoints.
    pub fn endpoints(&self, lin: u64) -> (u32, u32) {
        debug_assert!(lin < self.size());
        match self {
            EdgeSpace::Full {
                num_nodes,
                undirected: false,
            } => {
                let u = lin / (num_nodes - 1);
                let r = lin % (num_nodes - 1);
                let v = if r < u { r } else { r + 1 };
                (u as u32, v as u32)
            }
            EdgeSpace::Full {
                num_nodes,
                undirected: true,
            } => {
                let n = *num_nodes;
                // Closed-form inverse of the upper-triangular offset,
                // with an integer correction for float rounding.
                let mut row = (n as f64 - 2.0
                    - ((-8.0 * lin as f64 + 4.0 * (n * (n - 1)) as f64 - 7.0).sqrt() / 2.0 - 0.5))
                    .floor() as u64;
                while row > 0 && lin < Self::triu_offset(n, row) {
                    row -= 1;
                }
                while lin >= Self::triu_offset(n, row + 1) {
                    row += 1;
                }
                let col = row + 1 + (lin - Self::triu_offset(n, row));
                (row as u32, col as u32)
            }
            EdgeSpace::Local {
                num_nodes, targets, ..
            } => {
                let t = (lin / (num_nodes - 1)) as usize;
                let r = lin % (num_nodes - 1);
                let u = targets[t] as u64;
                let v = if r < u { r } else { r + 1 };
                (u as u32, v as u32)
            }
        }
    }

    /// Canonical dedup key: unordered pair for undirected spaces.
    fn canonical(&self, (u, v): (u32, u32)) -> (u32, u32) {
        if self.undirected() && u > v {
            (v, u)
        } else {
            (u, v)
        }
    }
}

/// Working subset of candidate edges with continuous relaxed weights.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Linear indices into the edge space, parallel to `edges`.
    pub indices: Vec<u64>,
    /// Block-local index -> canonical edge endpoints.
    pub edges: Vec<(u32, u32)>,
    /// Relaxed edge weights in [0, 1], parallel to `edges`.
    pub weights: Vec<f32>,
}

impl Block {
    #[inline]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Draws and maintains the random working block.
#[derive(Debug)]
pub struct BlockSampler {
    space: EdgeSpace,
    limit: usize,
    eps: f32,
    rng: StdRng,
}

impl BlockSampler {
    pub fn new(space: EdgeSpace, limit: usize, eps: f32, rng: StdRng) -> Self {
        Self {
            space,
            limit,
            eps,
            rng,
        }
    }

    #[inline]
    pub fn space(&self) -> &EdgeSpace {
        &self.space
    }

    fn draw(&mut self) -> (u64, (u32, u32)) {
        let lin = self.rng.random_range(0..self.space.size());
        (lin, self.space.canonical(self.space.endpoints(lin)))
    }

    /// Draw the initial block: `limit` candidates with replacement,
    /// deduplicated by canonical endpoints, weights initialized to small
    /// random values in [0, eps). Fewer unique candidates than the limit
    /// simply yield a smaller block.
    pub fn sample_initial(&mut self) -> Block {
        let mut block = Block::default();
        if self.space.size() == 0 {
            return block;
        }
        let mut seen: HashSet<(u32, u32)> = HashSet::with_capacity(self.limit);
        for _ in 0..self.limit {
            let (lin, edge) = self.draw();
            if seen.insert(edge) {
                block.indices.push(lin);
                block.edges.push(edge);
                block.weights.push(self.rng.random::<f32>() * self.eps);
            }
        }
        block
    }

    /// Replace the zero-weight (lowest) part of the block with fresh
    /// candidates not already present, preserving the weights of retained
    /// entries.
    pub fn resample(&mut self, block: &mut Block) {
        let mut kept = Block::default();
        let mut seen: HashSet<(u32, u32)> = HashSet::with_capacity(self.limit);
        for i in 0..block.len() {
            if block.weights[i] > self.eps {
                seen.insert(block.edges[i]);
                kept.indices.push(block.indices[i]);
                kept.edges.push(block.edges[i]);
                kept.weights.push(block.weights[i]);
            }
        }
        if self.space.size() == 0 {
            *block = kept;
            return;
        }
        // Refill with replacement; the block may stay smaller than the
        // limit when the space is nearly exhausted.
        for _ in 0..self.limit {
            if kept.len() >= self.limit {
                break;
            }
            let (lin, edge) = self.draw();
            if seen.insert(edge) {
                kept.indices.push(lin);
                kept.edges.push(edge);
                kept.weights.push(self.rng.random::<f32>() * self.eps);
            }
        }
        *block = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn sampler(space: EdgeSpace, limit: usize) -> BlockSampler {
        BlockSampler::new(space, limit, 1e-7, StdRng::seed_from_u64(7))
    }

    #[test]
    fn test_full_directed_space_enumerates_all_pairs() {
        let space = EdgeSpace::Full {
            num_nodes: 5,
            undirected: false,
        };
        assert_eq!(space.size(), 20);
        let mut seen = HashSet::new();
        for lin in 0..space.size() {
            let (u, v) = space.endpoints(lin);
            assert_ne!(u, v, "self-loop at linear index {lin}");
            assert!(u < 5 && v < 5);
            assert!(seen.insert((u, v)), "duplicate pair at index {lin}");
        }
        assert_eq!(seen.len(), 20);
    }

    #[test]
    fn test_full_undirected_space_enumerates_triu() {
        let space = EdgeSpace::Full {
            num_nodes: 7,
            undirected: true,
        };
        assert_eq!(space.size(), 21);
        let mut seen = HashSet::new();
        for lin in 0..space.size() {
            let (u, v) = space.endpoints(lin);
            assert!(u < v, "({u}, {v}) not upper-triangular at index {lin}");
            assert!(seen.insert((u, v)));
        }
        assert_eq!(seen.len(), 21);
    }

    #[test]
    fn test_triu_mapping_large_n() {
        // The float inverse must stay exact far beyond toy sizes.
        let n = 20_000u64;
        let space = EdgeSpace::Full {
            num_nodes: n,
            undirected: true,
        };
        for lin in [0, 1, n - 2, n - 1, space.size() / 2, space.size() - 1] {
            let (u, v) = space.endpoints(lin);
            assert!(u < v);
            let back = EdgeSpace::triu_offset(n, u as u64) + (v as u64 - u as u64 - 1);
            assert_eq!(back, lin);
        }
    }

    #[test]
    fn test_local_space_touches_targets() {
        let space = EdgeSpace::Local {
            num_nodes: 6,
            targets: vec![2, 4],
            undirected: false,
        };
        assert_eq!(space.size(), 10);
        for lin in 0..space.size() {
            let (u, v) = space.endpoints(lin);
            assert!(u == 2 || u == 4);
            assert_ne!(u, v);
        }
    }

    #[test]
    fn test_initial_block_dedups_and_bounds_weights() {
        let space = EdgeSpace::Full {
            num_nodes: 10,
            undirected: false,
        };
        let mut s = sampler(space, 64);
        let block = s.sample_initial();
        assert!(block.len() <= 64);
        assert!(!block.is_empty());
        let unique: HashSet<_> = block.edges.iter().collect();
        assert_eq!(unique.len(), block.len());
        assert!(block.weights.iter().all(|&w| (0.0..1e-7).contains(&w)));
        assert_eq!(block.indices.len(), block.len());
        assert_eq!(block.weights.len(), block.len());
    }

    #[test]
    fn test_small_space_yields_small_block_without_error() {
        // 3 nodes undirected: only 3 candidate pairs, limit far larger.
        let space = EdgeSpace::Full {
            num_nodes: 3,
            undirected: true,
        };
        let mut s = sampler(space, 1000);
        let block = s.sample_initial();
        assert!(block.len() <= 3);
    }

    #[test]
    fn test_resample_preserves_retained_weights() {
        let space = EdgeSpace::Full {
            num_nodes: 30,
            undirected: false,
        };
        let mut s = sampler(space, 32);
        let mut block = s.sample_initial();
        // Give a few entries meaningful mass, as projection would.
        block.weights[0] = 0.9;
        block.weights[1] = 0.4;
        let kept_edges = [block.edges[0], block.edges[1]];
        s.resample(&mut block);
        let pos0 = block.edges.iter().position(|&e| e == kept_edges[0]).unwrap();
        let pos1 = block.edges.iter().position(|&e| e == kept_edges[1]).unwrap();
        assert_eq!(block.weights[pos0], 0.9);
        assert_eq!(block.weights[pos1], 0.4);
        assert!(block.len() <= 32);
        let unique: HashSet<_> = block.edges.iter().collect();
        assert_eq!(unique.len(), block.len());
    }

    #[test]
    fn test_undirected_block_is_canonical() {
        let space = EdgeSpace::Local {
            num_nodes: 8,
            targets: vec![5],
            undirected: true,
        };
        let mut s = sampler(space, 32);
        let block = s.sample_initial();
        assert!(block.edges.iter().all(|&(u, v)| u < v));
    }
}
