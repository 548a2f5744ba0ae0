//! GumTree greedy matchers.
//!
//! Two phases:
//! 1. Top-down: match identical subtrees by hash, starting from the roots
//! 2. Bottom-up: match remaining nodes by structural similarity (Dice)

use rapidhash::RapidHashMap as HashMap;
use std::sync::Arc;

use super::{Matcher, link};
use crate::config::MatcherConfig;
use crate::error::Result;
use crate::mapping::MappingStore;
use crate::similarity::{CommonDescendants, LabelConfiguration, LabelComparator, SimilarityCache};
use crate::tree::{DiffTree, NodeId, NodeType};
use crate::{debug, trace};

/// Top-down greedy subtree matcher.
///
/// Greedily matches nodes with identical subtree hashes, starting from the
/// roots and working down. When two nodes have the same hash their entire
/// subtrees are identical and are matched recursively.
#[derive(Debug, Clone)]
pub struct GreedySubtreeMatcher {
    min_height: usize,
}

impl GreedySubtreeMatcher {
    /// Skip subtrees lower than `min_height`.
    pub fn new(min_height: usize) -> Self {
        Self { min_height }
    }

    /// Use `config.min_height`.
    pub fn from_config(config: &MatcherConfig) -> Self {
        Self::new(config.min_height)
    }
}

impl<T: DiffTree> Matcher<T> for GreedySubtreeMatcher {
    fn name(&self) -> &'static str {
        "gt-subtree"
    }

    fn match_trees(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        trace!("top_down_phase start");
        #[cfg(feature = "tracing")]
        let before = store.len();

        let mut candidates: Vec<(NodeId, NodeId)> = vec![(src.root(), dst.root())];

        while let Some((a_id, b_id)) = candidates.pop() {
            if store.has_src(a_id) || store.has_dst(b_id) {
                continue;
            }

            // Small subtrees are left for bottom-up.
            if src.height(a_id) < self.min_height {
                continue;
            }

            let a_type = src.node_type(a_id);
            if src.hash(a_id) == dst.hash(b_id) && a_type == dst.node_type(b_id) {
                trace!(a = usize::from(a_id), b = usize::from(b_id), "top_down: hash match");
                match_subtrees(src, dst, a_id, b_id, store)?;
                continue;
            }

            // Hashes differ: only consider children of b_id, never arbitrary
            // nodes of the destination, to avoid cross-level matches.
            for a_child in src.children(a_id) {
                let a_child_hash = src.hash(a_child);
                let a_child_type = src.node_type(a_child);
                for b_child in dst.children(b_id) {
                    if store.has_dst(b_child) {
                        continue;
                    }
                    if a_child_hash == dst.hash(b_child) || a_child_type == dst.node_type(b_child) {
                        candidates.push((a_child, b_child));
                    }
                }
            }
        }

        debug!(added = store.len() - before, "top-down phase done");
        Ok(())
    }
}

/// Match two subtrees node by node (their hashes match). Pairs with an
/// endpoint that is already matched are skipped together with their subtree.
fn match_subtrees<T: DiffTree>(
    src: &T,
    dst: &T,
    a_id: NodeId,
    b_id: NodeId,
    store: &mut MappingStore,
) -> Result<()> {
    let mut stack = vec![(a_id, b_id)];
    while let Some((a, b)) = stack.pop() {
        if store.has_src(a) || store.has_dst(b) {
            continue;
        }
        link(store, a, b)?;
        stack.extend(src.children(a).zip(dst.children(b)));
    }
    Ok(())
}

/// Bottom-up greedy matcher.
///
/// Two passes:
/// 1. Internal nodes in pre-order: when the parent is matched, prefer the
///    destination child at the same position with the same type; otherwise
///    take the best Dice coefficient among ancestry-compatible candidates.
/// 2. Leaves, now that ancestry constraints are established.
#[derive(Debug, Clone)]
pub struct GreedyBottomUpMatcher {
    dice_threshold: f64,
    label_threshold: f64,
    comparator: LabelComparator,
}

impl GreedyBottomUpMatcher {
    /// Build from the shared configuration.
    pub fn new(config: &MatcherConfig, labels: Arc<LabelConfiguration>) -> Self {
        Self {
            dice_threshold: config.dice_threshold,
            label_threshold: config.leaf_threshold,
            comparator: LabelComparator::new(labels),
        }
    }

    fn labels_compatible<T: DiffTree>(
        &self,
        src: &T,
        dst: &T,
        a: NodeId,
        b: NodeId,
        cache: &mut SimilarityCache,
    ) -> bool {
        let sa = (src.node_type(a), src.label(a));
        let sb = (dst.node_type(b), dst.label(b));
        let sim = if src.is_leaf(a) {
            self.comparator.leaf_similarity(sa, sb, cache)
        } else {
            self.comparator.inner_similarity(sa, sb, cache)
        };
        sim >= self.label_threshold
    }
}

/// If `a`'s parent is matched, `b` must lie below the parent's partner, and
/// symmetrically for `b`'s parent.
fn ancestry_compatible<T: DiffTree>(
    a_id: NodeId,
    b_id: NodeId,
    src: &T,
    dst: &T,
    store: &MappingStore,
) -> bool {
    if let Some(a_parent) = src.parent(a_id)
        && let Some(matched_b_parent) = store.get_dst(a_parent)
        && !dst.is_descendant(matched_b_parent, b_id)
    {
        trace!(
            a = usize::from(a_id),
            b = usize::from(b_id),
            "ancestry check failed: b not below the partner of a's parent"
        );
        return false;
    }

    if let Some(b_parent) = dst.parent(b_id)
        && let Some(matched_a_parent) = store.get_src(b_parent)
        && !src.is_descendant(matched_a_parent, a_id)
    {
        trace!(
            a = usize::from(a_id),
            b = usize::from(b_id),
            "ancestry check failed: a not below the partner of b's parent"
        );
        return false;
    }

    true
}

impl<T: DiffTree> Matcher<T> for GreedyBottomUpMatcher {
    fn name(&self) -> &'static str {
        "gt-bottom-up"
    }

    fn match_trees(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        #[cfg(feature = "tracing")]
        let before = store.len();
        let mut cache = SimilarityCache::new();

        let mut b_by_type: HashMap<NodeType, Vec<NodeId>> = HashMap::default();
        for b_id in dst.iter() {
            if !store.has_dst(b_id) {
                b_by_type.entry(dst.node_type(b_id)).or_default().push(b_id);
            }
        }
        let no_candidates: Vec<NodeId> = Vec::new();

        // PASS 1: internal nodes.
        for a_id in src.iter() {
            if store.has_src(a_id) || src.is_leaf(a_id) {
                continue;
            }
            let a_type = src.node_type(a_id);
            let a_pos = src.position(a_id);
            let parent_a = src.parent(a_id);

            if let Some(parent_b) = parent_a.and_then(|p| store.get_dst(p)) {
                // Same position and type among the children of the parent's
                // partner. No fallback to the first candidate: two siblings of
                // the same type can mean very different things.
                let positional = dst.children(parent_b).find(|&b_id| {
                    !store.has_dst(b_id)
                        && dst.node_type(b_id) == a_type
                        && dst.position(b_id) == a_pos
                });
                if let Some(b_id) = positional
                    && self.labels_compatible(src, dst, a_id, b_id, &mut cache)
                {
                    trace!(a = usize::from(a_id), b = usize::from(b_id), "bottom_up pass1: position+type match");
                    link(store, a_id, b_id)?;
                    continue;
                }
            }

            let candidates = b_by_type.get(&a_type).unwrap_or(&no_candidates);
            let mut best: Option<(NodeId, f64)> = None;
            for &b_id in candidates {
                if store.has_dst(b_id) || dst.is_leaf(b_id) {
                    continue;
                }
                if !ancestry_compatible(a_id, b_id, src, dst, store) {
                    continue;
                }
                if !self.labels_compatible(src, dst, a_id, b_id, &mut cache) {
                    continue;
                }
                let score = CommonDescendants::compute(src, dst, a_id, b_id, store).dice();
                trace!(a = usize::from(a_id), b = usize::from(b_id), score, "bottom_up pass1: dice score");
                if score >= self.dice_threshold && best.is_none_or(|(_, s)| score > s) {
                    best = Some((b_id, score));
                }
            }

            if let Some((b_id, _)) = best {
                link(store, a_id, b_id)?;
            } else if parent_a.is_none() && !store.has_dst(dst.root()) && dst.node_type(dst.root()) == a_type {
                // Roots of the same type are matched even when structurally
                // different.
                trace!(a = usize::from(a_id), "bottom_up pass1: root fallback");
                link(store, a_id, dst.root())?;
            }
        }

        // PASS 2: leaves.
        for a_id in src.iter() {
            if store.has_src(a_id) || !src.is_leaf(a_id) {
                continue;
            }
            let a_type = src.node_type(a_id);
            let a_hash = src.hash(a_id);
            let a_pos = src.position(a_id);

            let best = if let Some(parent_b) = src.parent(a_id).and_then(|p| store.get_dst(p)) {
                let candidates: Vec<NodeId> = dst
                    .children(parent_b)
                    .filter(|&b_id| {
                        !store.has_dst(b_id) && dst.is_leaf(b_id) && dst.node_type(b_id) == a_type
                    })
                    .collect();
                // Same position and hash, then same hash, then same position
                // with compatible labels.
                candidates
                    .iter()
                    .find(|&&b_id| dst.position(b_id) == a_pos && dst.hash(b_id) == a_hash)
                    .or_else(|| candidates.iter().find(|&&b_id| dst.hash(b_id) == a_hash))
                    .or_else(|| {
                        candidates.iter().find(|&&b_id| {
                            dst.position(b_id) == a_pos
                                && self.labels_compatible(src, dst, a_id, b_id, &mut cache)
                        })
                    })
                    .copied()
            } else {
                // Parent unmatched: global search, so nodes of a deleted
                // subtree can move elsewhere.
                let mut best = None;
                for &b_id in b_by_type.get(&a_type).unwrap_or(&no_candidates) {
                    if store.has_dst(b_id) || !dst.is_leaf(b_id) {
                        continue;
                    }
                    if !ancestry_compatible(a_id, b_id, src, dst, store) {
                        continue;
                    }
                    if dst.hash(b_id) == a_hash {
                        best = Some(b_id);
                        break;
                    }
                    if best.is_none() && self.labels_compatible(src, dst, a_id, b_id, &mut cache) {
                        best = Some(b_id);
                    }
                }
                best
            };

            if let Some(b_id) = best {
                trace!(a = usize::from(a_id), b = usize::from(b_id), "bottom_up pass2: leaf match");
                link(store, a_id, b_id)?;
            }
        }

        debug!(added = store.len() - before, "bottom-up phase done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::TypeTable;
    use crate::tree::Tree;

    fn gumtree(src: &Tree, dst: &Tree) -> MappingStore {
        let config = MatcherConfig::default();
        let labels = Arc::new(LabelConfiguration::default());
        let mut store = MappingStore::new();
        GreedySubtreeMatcher::from_config(&config)
            .match_trees(src, dst, &mut store)
            .unwrap();
        GreedyBottomUpMatcher::new(&config, labels)
            .match_trees(src, dst, &mut store)
            .unwrap();
        store
    }

    #[test]
    fn test_identical_trees() {
        let mut types = TypeTable::new();
        let a = types.parse("root(leaf:1,leaf:2)").unwrap();
        let b = types.parse("root(leaf:1,leaf:2)").unwrap();
        let store = gumtree(&a, &b);
        assert_eq!(store.len(), 3, "all nodes should be matched");
    }

    #[test]
    fn test_partial_match() {
        let mut types = TypeTable::new();
        let a = types.parse("root(leaf:1,leaf:2)").unwrap();
        let b = types.parse("root(leaf:1,leaf:3)").unwrap();
        let store = gumtree(&a, &b);

        let child1_a = a.child(a.root(), 0).unwrap();
        let child1_b = b.child(b.root(), 0).unwrap();
        assert_eq!(store.get_dst(child1_a), Some(child1_b), "identical leaves should match");
        assert!(store.has(a.root(), b.root()), "roots should match");
    }

    #[test]
    fn test_moved_subtree_keeps_ancestry() {
        let mut types = TypeTable::new();
        let a = types.parse("root(div(span(t:x),t:y),div(t:z))").unwrap();
        let b = types.parse("root(div(t:z),div(span(t:x),t:y))").unwrap();
        let store = gumtree(&a, &b);
        assert!(store.check_bijective());

        let span_a = a.find_label("span").unwrap();
        let span_b = b.find_label("span").unwrap();
        assert_eq!(store.get_dst(span_a), Some(span_b));
        for label in ["x", "y", "z"] {
            assert_eq!(
                store.get_dst(a.find_label(label).unwrap()),
                b.find_label(label),
                "{label} should follow its subtree"
            );
        }
    }
}
