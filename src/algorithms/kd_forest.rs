//! Randomized k-d forest for approximate nearest neighbour search.
//!
//! Every tree splits on a dimension drawn at random from the few with the
//! highest variance, so the trees partition the space differently. A query
//! descends all trees, then keeps expanding the closest unexplored branches from
//! a shared priority queue until `checks` descriptors have been compared.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ensure_parameter, Result},
    features::{euclidean, hamming, BinaryDescriptor},
};

/// Variance is estimated from at most this many points per node
const VARIANCE_SAMPLE: usize = 100;

/// The split dimension is drawn from this many highest-variance candidates
const TOP_DIMENSIONS: usize = 5;

/// A point the forest can index
pub trait ForestPoint {
    fn dims(&self) -> usize;
    fn coordinate(&self, dim: usize) -> f32;
    fn distance(&self, other: &Self) -> f32;
}

impl ForestPoint for BinaryDescriptor {
    fn dims(&self) -> usize {
        self.len() * 8
    }

    /// Bit `dim`, as packed by the binary extractors
    fn coordinate(&self, dim: usize) -> f32 {
        ((self[dim / 8] >> (dim % 8)) & 1) as f32
    }

    fn distance(&self, other: &Self) -> f32 {
        hamming(self, other) as f32
    }
}

impl ForestPoint for Vec<f32> {
    fn dims(&self) -> usize {
        self.len()
    }

    fn coordinate(&self, dim: usize) -> f32 {
        self.get(dim).copied().unwrap_or(0.0)
    }

    fn distance(&self, other: &Self) -> f32 {
        euclidean(self, other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForestParams {
    pub trees: usize,
    /// Nodes with at most this many points are not split further
    pub leaf_size: usize,
    /// Distance computations per query before the search stops
    pub checks: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            trees: 4,
            leaf_size: 8,
            checks: 64,
            seed: 0,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<()> {
        ensure_parameter(self.trees > 0, "forest", "trees")?;
        ensure_parameter(self.leaf_size > 0, "forest", "leaf_size")?;
        ensure_parameter(self.checks > 0, "forest", "checks")
    }
}

enum Node {
    Leaf(Vec<usize>),
    Split {
        dim: usize,
        threshold: f32,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Unexplored branch, ordered so that `BinaryHeap` pops the closest first
struct Branch<'n> {
    margin: f32,
    node: &'n Node,
}

impl Ord for Branch<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.margin.total_cmp(&self.margin)
    }
}

impl PartialOrd for Branch<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Branch<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Branch<'_> {}

pub struct KdForest<'a, P> {
    points: &'a [P],
    trees: Vec<Node>,
    checks: usize,
}

impl<'a, P: ForestPoint> KdForest<'a, P> {
    pub fn build(points: &'a [P], params: &ForestParams) -> Self {
        let mut rng = StdRng::seed_from_u64(params.seed);
        let leaf_size = params.leaf_size.max(1);
        let trees = (0..params.trees.max(1))
            .map(|_| build_node(points, (0..points.len()).collect(), leaf_size, &mut rng))
            .collect();

        Self {
            points,
            trees,
            checks: params.checks.max(1),
        }
    }

    /// Up to `k` `(index, distance)` pairs, closest first.
    ///
    /// Distances are exact; only the candidate set is approximate. Once
    /// `checks` reaches the number of indexed points the result is exact.
    pub fn knn(&self, query: &P, k: usize) -> Vec<(usize, f32)> {
        let mut best: Vec<(usize, f32)> = Vec::with_capacity(k + 1);
        if k == 0 || self.points.is_empty() {
            return best;
        }

        let mut visited = vec![false; self.points.len()];
        let mut checked = 0;
        let mut queue: BinaryHeap<Branch> = self
            .trees
            .iter()
            .map(|node| Branch { margin: 0.0, node })
            .collect();

        while let Some(Branch { margin, mut node }) = queue.pop() {
            if checked >= self.checks && best.len() >= k {
                break;
            }

            loop {
                match node {
                    Node::Split {
                        dim,
                        threshold,
                        left,
                        right,
                    } => {
                        let offset = query.coordinate(*dim) - threshold;
                        let (near, far) = if offset < 0.0 { (&**left, &**right) } else { (&**right, &**left) };
                        queue.push(Branch {
                            margin: margin.max(offset.abs()),
                            node: far,
                        });
                        node = near;
                    }
                    Node::Leaf(indices) => {
                        for &index in indices {
                            if visited[index] {
                                continue;
                            }
                            visited[index] = true;
                            checked += 1;
                            insert_sorted(&mut best, k, index, query.distance(&self.points[index]));
                        }
                        break;
                    }
                }
            }
        }

        best
    }
}

/// Keeps `best` sorted and at most `k` long; earlier insertions win ties
fn insert_sorted(best: &mut Vec<(usize, f32)>, k: usize, index: usize, distance: f32) {
    let position = best.partition_point(|&(_, d)| d <= distance);
    if position < k {
        best.insert(position, (index, distance));
        best.truncate(k);
    }
}

fn build_node<P: ForestPoint>(points: &[P], indices: Vec<usize>, leaf_size: usize, rng: &mut StdRng) -> Node {
    if indices.len() <= leaf_size {
        return Node::Leaf(indices);
    }

    let dims = points[indices[0]].dims();
    let step = (indices.len() / VARIANCE_SAMPLE).max(1);
    let sample: Vec<usize> = indices.iter().step_by(step).copied().collect();
    let n = sample.len() as f32;

    let mut spread: Vec<(usize, f32, f32)> = (0..dims)
        .map(|dim| {
            let mean = sample.iter().map(|&i| points[i].coordinate(dim)).sum::<f32>() / n;
            let variance = sample
                .iter()
                .map(|&i| (points[i].coordinate(dim) - mean).powi(2))
                .sum::<f32>()
                / n;
            (dim, mean, variance)
        })
        .filter(|&(_, _, variance)| variance > 0.0)
        .collect();

    if spread.is_empty() {
        return Node::Leaf(indices);
    }
    spread.sort_by(|a, b| b.2.total_cmp(&a.2));
    let (dim, threshold, _) = spread[rng.gen_range(0..spread.len().min(TOP_DIMENSIONS))];

    let (left, right): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .partition(|&&i| points[i].coordinate(dim) < threshold);
    if left.is_empty() || right.is_empty() {
        return Node::Leaf(indices);
    }

    Node::Split {
        dim,
        threshold,
        left: Box::new(build_node(points, left, leaf_size, rng)),
        right: Box::new(build_node(points, right, leaf_size, rng)),
    }
}
