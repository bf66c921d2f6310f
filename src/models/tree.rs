//! Regression trees: structure, evaluation and greedy growth.
//!
//! A tree is a flat node arena with the root at index 0. Rows go left when
//! `row[feature] <= threshold`. Every node records its `cover` (number of
//! training rows reaching it); attribution relies on covers of children
//! summing to the parent's cover.

use std::cmp::Ordering;

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One node of a regression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }

    fn set_cover(&mut self, c: f64) {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover = c,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        debug_assert!(!nodes.is_empty());
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value, .. } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => idx = if row[*feature] <= *threshold { *left } else { *right },
            }
        }
    }

    pub(crate) fn set_leaf_value(&mut self, idx: usize, v: f64) {
        if let Node::Leaf { value, .. } = &mut self.nodes[idx] {
            *value = v;
        }
    }

    /// Reset covers to the number of `rows` passing through each node.
    pub fn recount_covers(&mut self, rows: &[Vec<f64>]) {
        for node in &mut self.nodes {
            node.set_cover(0.0);
        }
        for row in rows {
            let mut idx = 0;
            loop {
                let c = self.nodes[idx].cover();
                self.nodes[idx].set_cover(c + 1.0);
                match &self.nodes[idx] {
                    Node::Leaf { .. } => break,
                    Node::Split {
                        feature,
                        threshold,
                        left,
                        right,
                        ..
                    } => {
                        idx = if row[*feature] <= *threshold { *left } else { *right };
                    }
                }
            }
        }
    }

    /// Cover-weighted mean leaf value, i.e. the mean output over the rows the
    /// covers were counted on.
    pub fn expected_value(&self) -> f64 {
        let root = self.nodes[0].cover();
        if root <= 0.0 {
            return 0.0;
        }
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Leaf { value, cover } => Some(value * cover),
                Node::Split { .. } => None,
            })
            .sum::<f64>()
            / root
    }
}

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeBuilder {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub min_split_gain: f64,
}

/// A freshly grown tree plus the training rows that landed in each leaf.
///
/// Leaf values start as the mean target; the booster overwrites them with the
/// objective's own line-search value.
#[derive(Debug, Clone)]
pub struct GrownTree {
    pub tree: RegressionTree,
    pub leaves: Vec<(usize, Vec<usize>)>,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl TreeBuilder {
    /// Grow a least-squares tree on `targets` over the given rows and features.
    pub fn grow(
        &self,
        x: &DMatrix<f64>,
        targets: &[f64],
        rows: Vec<usize>,
        features: &[usize],
    ) -> GrownTree {
        let mut nodes = Vec::new();
        let mut leaves = Vec::new();
        self.grow_node(x, targets, rows, features, 0, &mut nodes, &mut leaves);
        GrownTree {
            tree: RegressionTree::from_nodes(nodes),
            leaves,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn grow_node(
        &self,
        x: &DMatrix<f64>,
        targets: &[f64],
        rows: Vec<usize>,
        features: &[usize],
        depth: usize,
        nodes: &mut Vec<Node>,
        leaves: &mut Vec<(usize, Vec<usize>)>,
    ) -> usize {
        let idx = nodes.len();
        let cover = rows.len() as f64;
        let mean = rows.iter().map(|&r| targets[r]).sum::<f64>() / cover.max(1.0);
        nodes.push(Node::Leaf { value: mean, cover });

        let splittable = depth < self.max_depth && rows.len() >= 2 * self.min_samples_leaf;
        let split = if splittable {
            self.best_split(x, targets, &rows, features)
        } else {
            None
        };

        let Some(split) = split else {
            leaves.push((idx, rows));
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| x[(r, split.feature)] <= split.threshold);

        let left = self.grow_node(x, targets, left_rows, features, depth + 1, nodes, leaves);
        let right = self.grow_node(x, targets, right_rows, features, depth + 1, nodes, leaves);
        nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
            cover,
        };
        idx
    }

    fn best_split(
        &self,
        x: &DMatrix<f64>,
        targets: &[f64],
        rows: &[usize],
        features: &[usize],
    ) -> Option<SplitCandidate> {
        // Evaluate each feature independently (parallel).
        let candidates: Vec<SplitCandidate> = features
            .par_iter()
            .filter_map(|&j| self.best_split_on(x, targets, rows, j))
            .collect();

        // Deterministic selection: maximum gain; break ties by feature index.
        let mut best: Option<SplitCandidate> = None;
        for c in candidates {
            best = match best {
                None => Some(c),
                Some(b) if c.gain > b.gain || (c.gain == b.gain && c.feature < b.feature) => {
                    Some(c)
                }
                keep => keep,
            };
        }

        best.filter(|b| b.gain > self.min_split_gain && b.gain > 1e-12)
    }

    fn best_split_on(
        &self,
        x: &DMatrix<f64>,
        targets: &[f64],
        rows: &[usize],
        feature: usize,
    ) -> Option<SplitCandidate> {
        let mut pairs: Vec<(f64, f64)> =
            rows.iter().map(|&r| (x[(r, feature)], targets[r])).collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let n = pairs.len();
        let total: f64 = pairs.iter().map(|p| p.1).sum();
        let parent_score = total * total / n as f64;
        let min_leaf = self.min_samples_leaf.max(1);

        let mut best: Option<SplitCandidate> = None;
        let mut left_sum = 0.0;
        for k in 1..n {
            left_sum += pairs[k - 1].1;
            if k < min_leaf || n - k < min_leaf {
                continue;
            }
            let (lo, hi) = (pairs[k - 1].0, pairs[k].0);
            if lo >= hi {
                continue;
            }
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64
                - parent_score;
            if best.is_none_or(|b| gain > b.gain) {
                let mid = lo + (hi - lo) / 2.0;
                let threshold = if mid < hi { mid } else { lo };
                best = Some(SplitCandidate { feature, threshold, gain });
            }
        }
        best
    }
}
