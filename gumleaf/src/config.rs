//! Thresholds, weights and limits shared by the matcher stages.

use crate::error::{MatchError, Result};

/// Configuration for the matching pipeline.
///
/// Defaults are the values the ChangeDistiller and GumTree matchers were tuned
/// with.
#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    /// Minimum label similarity for two leaves to become candidates
    /// (strictly greater than).
    pub leaf_threshold: f64,

    /// Chawathe similarity needed by the bottom-up matcher for subtrees with
    /// more than `structural_leaf_count` leaves.
    pub structural_threshold_large: f64,

    /// Chawathe similarity needed for subtrees with at most
    /// `structural_leaf_count` leaves.
    pub structural_threshold_small: f64,

    /// Leaf count separating "small" from "large" subtrees.
    pub structural_leaf_count: usize,

    /// Settings of the label-aware optimized matcher.
    pub optimized: OptimizedConfig,

    /// Minimum height for a node to be considered by the greedy top-down
    /// matcher. Smaller subtrees are left for later stages.
    pub min_height: usize,

    /// Minimum Dice coefficient for the greedy bottom-up matcher.
    pub dice_threshold: f64,

    /// Cost of relabeling a node to another label of the same type in the
    /// optimal matcher. Insertions and deletions cost 1.
    pub relabel_cost: f64,

    /// Largest `|src| * |dst|` the optimal matcher accepts.
    pub optimal_size_limit: usize,

    /// Bound on leaf-move reconciliation rounds.
    pub max_repair_rounds: usize,

    /// Worker threads for data-parallel stages. `None` uses the global rayon
    /// pool (sized to available parallelism).
    pub workers: Option<usize>,
}

/// Settings of the label-aware optimized ChangeDistiller matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedConfig {
    /// Minimum label similarity for a leaf pair.
    pub leaf_threshold: f64,
    /// Weight of label similarity in a leaf candidate's score.
    pub weight_similarity: f64,
    /// Weight of relative position in a leaf candidate's score.
    pub weight_position: f64,
    /// Label similarity below which an inner pair counts as a value mismatch.
    pub value_threshold: f64,
    /// Children similarity needed by small inner subtrees.
    pub subtree_threshold_small: f64,
    /// Children similarity needed by large inner subtrees.
    pub subtree_threshold_large: f64,
    /// Children similarity needed when the labels mismatch.
    pub subtree_threshold_value_mismatch: f64,
    /// Leaf count separating small from large inner subtrees.
    pub subtree_size_threshold: usize,
}

impl Default for OptimizedConfig {
    fn default() -> Self {
        Self {
            leaf_threshold: 0.6,
            weight_similarity: 0.4,
            weight_position: 0.6,
            value_threshold: 0.6,
            subtree_threshold_small: 0.4,
            subtree_threshold_large: 0.6,
            subtree_threshold_value_mismatch: 0.7,
            subtree_size_threshold: 4,
        }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            leaf_threshold: 0.5,
            structural_threshold_large: 0.6,
            structural_threshold_small: 0.4,
            structural_leaf_count: 4,
            optimized: OptimizedConfig::default(),
            min_height: 1,
            dice_threshold: 0.5,
            relabel_cost: 1.0,
            optimal_size_limit: 4_000_000,
            max_repair_rounds: 1024,
            workers: None,
        }
    }
}

impl MatcherConfig {
    /// Set the leaf candidate threshold.
    pub fn with_leaf_threshold(mut self, threshold: f64) -> Self {
        self.leaf_threshold = threshold;
        self
    }

    /// Set the bottom-up thresholds and the leaf count that separates them.
    pub fn with_structural_thresholds(mut self, small: f64, large: f64, leaf_count: usize) -> Self {
        self.structural_threshold_small = small;
        self.structural_threshold_large = large;
        self.structural_leaf_count = leaf_count;
        self
    }

    /// Replace the optimized matcher settings.
    pub fn with_optimized(mut self, optimized: OptimizedConfig) -> Self {
        self.optimized = optimized;
        self
    }

    /// Set the relabel cost of the optimal matcher.
    pub fn with_relabel_cost(mut self, cost: f64) -> Self {
        self.relabel_cost = cost;
        self
    }

    /// Set the optimal matcher's size limit.
    pub fn with_optimal_size_limit(mut self, limit: usize) -> Self {
        self.optimal_size_limit = limit;
        self
    }

    /// Set the leaf-move reconciliation bound.
    pub fn with_max_repair_rounds(mut self, rounds: usize) -> Self {
        self.max_repair_rounds = rounds;
        self
    }

    /// Use a dedicated pool of `workers` threads for parallel stages.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Check ranges. Thresholds are similarities and must lie in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let o = &self.optimized;
        let thresholds = [
            ("leaf_threshold", self.leaf_threshold),
            ("structural_threshold_large", self.structural_threshold_large),
            ("structural_threshold_small", self.structural_threshold_small),
            ("dice_threshold", self.dice_threshold),
            ("optimized.leaf_threshold", o.leaf_threshold),
            ("optimized.value_threshold", o.value_threshold),
            ("optimized.subtree_threshold_small", o.subtree_threshold_small),
            ("optimized.subtree_threshold_large", o.subtree_threshold_large),
            (
                "optimized.subtree_threshold_value_mismatch",
                o.subtree_threshold_value_mismatch,
            ),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(MatchError::Configuration(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if !(o.weight_similarity >= 0.0 && o.weight_position >= 0.0)
            || o.weight_similarity + o.weight_position <= 0.0
        {
            return Err(MatchError::Configuration(format!(
                "optimized weights must be non-negative with a positive sum, got {} and {}",
                o.weight_similarity, o.weight_position
            )));
        }
        if !(self.relabel_cost >= 0.0 && self.relabel_cost.is_finite()) {
            return Err(MatchError::Configuration(format!(
                "relabel_cost must be a finite non-negative number, got {}",
                self.relabel_cost
            )));
        }
        if self.workers == Some(0) {
            return Err(MatchError::Configuration(
                "workers must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
