//! Bagged regression trees (random forest) with seeded, portable randomness.

use crate::error::{PipelineError, Result};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` considers all of them.
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// CART regression tree stored as a flat node arena; node 0 is the root.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        mut indices: Vec<usize>,
        config: &ForestConfig,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, y, &mut indices, 0, config, rng);
        tree
    }

    fn grow(
        &mut self,
        x: &[Vec<f64>],
        y: &[f64],
        indices: &mut [usize],
        depth: usize,
        config: &ForestConfig,
        rng: &mut ChaCha8Rng,
    ) -> usize {
        let n = indices.len();
        let sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let mean = sum / n as f64;
        let sse: f64 = indices.iter().map(|&i| (y[i] - mean).powi(2)).sum();

        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });

        if depth >= config.max_depth || n < config.min_samples_split || sse <= 1e-12 {
            return id;
        }

        let Some(split) = best_split(x, y, indices, sse, config, rng) else {
            return id;
        };

        let mut mid = 0;
        for j in 0..n {
            if x[indices[j]][split.feature] <= split.threshold {
                indices.swap(mid, j);
                mid += 1;
            }
        }
        let (left_idx, right_idx) = indices.split_at_mut(mid);
        let left = self.grow(x, y, left_idx, depth + 1, config, rng);
        let right = self.grow(x, y, right_idx, depth + 1, config, rng);

        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    pub fn predict_one(&self, features: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

/// Scans every sorted boundary of each candidate feature and keeps the split
/// with the largest SSE reduction.
fn best_split(
    x: &[Vec<f64>],
    y: &[f64],
    indices: &[usize],
    parent_sse: f64,
    config: &ForestConfig,
    rng: &mut ChaCha8Rng,
) -> Option<SplitCandidate> {
    let n = indices.len();
    let n_features = x[indices[0]].len();
    let mut features: Vec<usize> = (0..n_features).collect();
    features.shuffle(rng);
    features.truncate(config.max_features.unwrap_or(n_features).clamp(1, n_features));

    let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let min_leaf = config.min_samples_leaf.max(1);

    let mut best: Option<SplitCandidate> = None;
    let mut order = indices.to_vec();

    for feature in features {
        order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 1..n {
            let yi = y[order[k - 1]];
            left_sum += yi;
            left_sq += yi * yi;

            let lo = x[order[k - 1]][feature];
            let hi = x[order[k]][feature];
            if lo == hi || k < min_leaf || n - k < min_leaf {
                continue;
            }

            let nl = k as f64;
            let nr = (n - k) as f64;
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse_left = (left_sq - left_sum * left_sum / nl).max(0.0);
            let sse_right = (right_sq - right_sum * right_sum / nr).max(0.0);
            let gain = parent_sse - (sse_left + sse_right);

            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: split_threshold(lo, hi),
                    gain,
                });
            }
        }
    }

    best
}

/// Midpoint of two distinct sorted values, falling back to `lo` when the
/// midpoint rounds up to `hi`. Rows `<= threshold` go left, so the result must
/// stay below `hi` for both children to be non-empty.
fn split_threshold(lo: f64, hi: f64) -> f64 {
    let mid = (lo + hi) / 2.0;
    if mid < hi {
        mid
    } else {
        lo
    }
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    config: ForestConfig,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    /// Trains `config.n_trees` trees. Tree `i` draws from a generator seeded
    /// with `config.seed + i`, so a fixed seed and data give a fixed forest.
    pub fn fit(config: ForestConfig, x: &[Vec<f64>], y: &[f64]) -> Result<Self> {
        if x.is_empty() {
            return Err(PipelineError::ModelTrainingError(
                "empty training set".to_string(),
            ));
        }
        if x.len() != y.len() {
            return Err(PipelineError::ModelTrainingError(format!(
                "feature/target length mismatch: {} vs {}",
                x.len(),
                y.len()
            )));
        }
        let n_features = x[0].len();
        if n_features == 0 || x.iter().any(|row| row.len() != n_features) {
            return Err(PipelineError::ModelTrainingError(
                "ragged or empty feature vectors".to_string(),
            ));
        }
        if config.n_trees == 0 {
            return Err(PipelineError::ModelTrainingError(
                "forest needs at least one tree".to_string(),
            ));
        }

        let n = x.len();
        let trees = (0..config.n_trees)
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(i as u64));
                let indices: Vec<usize> = if config.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                RegressionTree::fit(x, y, indices, &config, &mut rng)
            })
            .collect();

        Ok(Self {
            config,
            n_features,
            trees,
        })
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    pub fn tree_predictions(&self, features: &[f64]) -> Vec<f64> {
        self.trees.iter().map(|t| t.predict_one(features)).collect()
    }

    pub fn predict_one(&self, features: &[f64]) -> f64 {
        self.predict_with_spread(features).0
    }

    /// Mean prediction and the population std across individual trees.
    pub fn predict_with_spread(&self, features: &[f64]) -> (f64, f64) {
        crate::features::mean_std(&self.tree_predictions(features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..60).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let y: Vec<f64> = (0..60).map(|i| if i < 30 { 10.0 } else { 20.0 }).collect();
        (x, y)
    }

    #[test]
    fn single_tree_recovers_step_function() {
        let (x, y) = step_data();
        let config = ForestConfig {
            n_trees: 1,
            bootstrap: false,
            ..Default::default()
        };
        let forest = RandomForest::fit(config, &x, &y).unwrap();
        assert_relative_eq!(forest.predict_one(&[5.0, 5.0]), 10.0);
        assert_relative_eq!(forest.predict_one(&[55.0, 6.0]), 20.0);
        assert_eq!(forest.trees()[0].n_leaves(), 2);
    }

    #[test]
    fn identical_trees_have_zero_spread() {
        let (x, y) = step_data();
        let config = ForestConfig {
            n_trees: 5,
            bootstrap: false,
            ..Default::default()
        };
        let forest = RandomForest::fit(config, &x, &y).unwrap();
        let (mean, std) = forest.predict_with_spread(&[40.0, 1.0]);
        assert_relative_eq!(mean, 20.0);
        assert_relative_eq!(std, 0.0);
    }

    #[test]
    fn same_seed_gives_same_forest() {
        let x: Vec<Vec<f64>> = (0..80)
            .map(|i| vec![(i as f64).sin(), (i as f64 * 0.3).cos(), i as f64])
            .collect();
        let y: Vec<f64> = (0..80).map(|i| (i as f64 * 0.7).sin() * 5.0 + i as f64).collect();
        let a = RandomForest::fit(ForestConfig::default(), &x, &y).unwrap();
        let b = RandomForest::fit(ForestConfig::default(), &x, &y).unwrap();
        for row in &x {
            assert_eq!(a.tree_predictions(row), b.tree_predictions(row));
        }
    }

    #[test]
    fn predictions_stay_within_target_range() {
        let (x, y) = step_data();
        let forest = RandomForest::fit(ForestConfig::default(), &x, &y).unwrap();
        for v in [-100.0, 0.0, 29.5, 100.0] {
            let p = forest.predict_one(&[v, 3.0]);
            assert!((10.0..=20.0).contains(&p), "prediction {p} out of range");
        }
    }

    #[test]
    fn threshold_between_adjacent_floats_stays_below_hi() {
        // Odd last mantissa bit, so the midpoint rounds (to even) up to `hi`.
        let lo = f64::from_bits(1.0_f64.to_bits() + 1);
        let hi = f64::from_bits(lo.to_bits() + 1);
        assert_eq!((lo + hi) / 2.0, hi);
        assert_eq!(split_threshold(lo, hi), lo);
        assert_eq!(split_threshold(1.0, 3.0), 2.0);
    }

    #[test]
    fn adjacent_feature_values_still_split_cleanly() {
        let lo = f64::from_bits(1.0_f64.to_bits() + 1);
        let hi = f64::from_bits(lo.to_bits() + 1);
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![if i < 5 { lo } else { hi }]).collect();
        let y: Vec<f64> = (0..10).map(|i| if i < 5 { 0.0 } else { 10.0 }).collect();
        let config = ForestConfig {
            n_trees: 1,
            bootstrap: false,
            min_samples_leaf: 1,
            ..Default::default()
        };
        let forest = RandomForest::fit(config, &x, &y).unwrap();
        assert_eq!(forest.trees()[0].n_leaves(), 2);
        assert_relative_eq!(forest.predict_one(&[lo]), 0.0);
        assert_relative_eq!(forest.predict_one(&[hi]), 10.0);
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let err = RandomForest::fit(ForestConfig::default(), &[vec![1.0]], &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, PipelineError::ModelTrainingError(_)));
    }
}
