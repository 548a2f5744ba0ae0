//! ChangeDistiller bottom-up matcher.

use super::{Matcher, link};
use crate::config::MatcherConfig;
use crate::error::Result;
use crate::mapping::MappingStore;
use crate::similarity::CommonDescendants;
use crate::tree::{DiffTree, NodeId};
use crate::{debug, trace};

/// Acceptance rule of the bottom-up matcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BottomUpThresholds {
    /// Needed above `leaf_count` leaves.
    pub large: f64,
    /// Needed at or below `leaf_count` leaves.
    pub small: f64,
    /// Small/large boundary.
    pub leaf_count: usize,
}

impl BottomUpThresholds {
    /// Whether a subtree with `leaves` leaf descendants accepts a partner with
    /// structural similarity `sim`. Both bounds are inclusive.
    pub fn accepts(&self, leaves: usize, sim: f64) -> bool {
        if leaves > self.leaf_count {
            sim >= self.large
        } else {
            sim >= self.small
        }
    }
}

impl From<&MatcherConfig> for BottomUpThresholds {
    fn from(config: &MatcherConfig) -> Self {
        Self {
            large: config.structural_threshold_large,
            small: config.structural_threshold_small,
            leaf_count: config.structural_leaf_count,
        }
    }
}

/// Matches inner nodes by the share of their descendants that are already
/// mapped to each other (Chawathe similarity).
///
/// Source nodes are visited in post-order and take the *first* destination
/// node, in post-order, that passes the threshold; a later, better partner is
/// never considered.
#[derive(Debug, Clone, Copy)]
pub struct BottomUpMatcher {
    thresholds: BottomUpThresholds,
}

impl BottomUpMatcher {
    /// Matcher with explicit thresholds.
    pub fn new(thresholds: BottomUpThresholds) -> Self {
        Self { thresholds }
    }

    /// Matcher configured from `config`.
    pub fn from_config(config: &MatcherConfig) -> Self {
        Self::new(config.into())
    }
}

impl<T: DiffTree> Matcher<T> for BottomUpMatcher {
    fn name(&self) -> &'static str {
        "cd-bottom-up"
    }

    fn match_trees(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        #[cfg(feature = "tracing")]
        let before = store.len();
        let dst_inner: Vec<NodeId> = dst.post_order().filter(|&d| !dst.is_leaf(d)).collect();

        for a in src.post_order() {
            if src.is_leaf(a) || store.has_src(a) {
                continue;
            }
            let leaves = src.leaf_count(a);
            let ty = src.node_type(a);

            let found = dst_inner.iter().copied().find(|&b| {
                if store.has_dst(b) || dst.node_type(b) != ty {
                    return false;
                }
                let sim = CommonDescendants::compute(src, dst, a, b, store).chawathe();
                trace!(
                    src = usize::from(a),
                    dst = usize::from(b),
                    sim,
                    leaves,
                    "bottom-up: candidate"
                );
                self.thresholds.accepts(leaves, sim)
            });
            if let Some(b) = found {
                link(store, a, b)?;
            }
        }

        debug!(added = store.len() - before, "bottom-up matcher done");
        Ok(())
    }
}
