//! Label-aware ChangeDistiller matcher.
//!
//! Leaves are compared through the [`LabelComparator`] and scored by label
//! similarity and relative position. Inner nodes are then matched level by
//! level, from the lowest source subtrees up, by how well the leaves under
//! each of their direct children line up.

use std::sync::Arc;

use super::{Matcher, MatchingCandidate, Parallelism, link, run_sharded, select_greedy, shard_count};
use crate::config::{MatcherConfig, OptimizedConfig};
use crate::error::Result;
use crate::mapping::MappingStore;
use crate::similarity::{LabelComparator, LabelConfiguration, SimilarityCache};
use crate::tree::{DiffTree, NodeId};
use crate::{debug, trace};

/// Optimized ChangeDistiller matcher.
#[derive(Debug, Clone)]
pub struct OptimizedMatcher {
    config: OptimizedConfig,
    comparator: LabelComparator,
    parallelism: Parallelism,
}

impl OptimizedMatcher {
    /// Matcher configured from `config`; leaf candidates are generated on
    /// `config.workers` shards.
    pub fn new(config: &MatcherConfig, labels: Arc<LabelConfiguration>) -> Self {
        Self {
            config: config.optimized.clone(),
            comparator: LabelComparator::new(labels),
            parallelism: Parallelism::Parallel {
                workers: config.workers,
            },
        }
    }

    /// Override the scheduling of leaf candidate generation.
    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    fn leaf_score(&self, sim: f64, src_pos: f64, dst_pos: f64) -> f64 {
        let ws = self.config.weight_similarity;
        let wp = self.config.weight_position;
        (ws * sim + wp * (1.0 - (src_pos - dst_pos).abs())) / (ws + wp)
    }

    fn leaf_candidates<T: DiffTree + Sync>(
        &self,
        src: &T,
        dst: &T,
        store: &MappingStore,
    ) -> Result<Vec<MatchingCandidate>> {
        let src_leaves: Vec<NodeId> = src.leaves().filter(|&n| !store.has_src(n)).collect();
        let dst_leaves: Vec<NodeId> = dst.leaves().filter(|&n| !store.has_dst(n)).collect();

        let shard = |shard: usize, stride: usize| {
            let mut cache = SimilarityCache::new();
            let mut out = Vec::new();
            for (i, &a) in src_leaves.iter().enumerate().skip(shard).step_by(stride) {
                let a_pos = relative_position(src, a);
                for (j, &b) in dst_leaves.iter().enumerate() {
                    if src.node_type(a) != dst.node_type(b) {
                        continue;
                    }
                    let sim = self.comparator.leaf_similarity(
                        (src.node_type(a), src.label(a)),
                        (dst.node_type(b), dst.label(b)),
                        &mut cache,
                    );
                    if sim < self.config.leaf_threshold {
                        continue;
                    }
                    let score = self.leaf_score(sim, a_pos, relative_position(dst, b));
                    out.push(MatchingCandidate::new(a, b, score, (i * dst_leaves.len() + j) as u64));
                }
            }
            out
        };

        match self.parallelism {
            Parallelism::Sequential => Ok(shard(0, 1)),
            Parallelism::Parallel { workers } => {
                let shards = shard_count(workers);
                let parts = run_sharded(workers, shards, |s| shard(s, shards))?;
                let mut candidates: Vec<MatchingCandidate> = parts.into_iter().flatten().collect();
                candidates.sort_unstable_by_key(|c| c.id);
                Ok(candidates)
            }
        }
    }

    /// Links the only unmatched class declarations of both trees.
    fn match_single_class_pair<T: DiffTree>(
        &self,
        src: &T,
        dst: &T,
        store: &mut MappingStore,
    ) -> Result<()> {
        let Some(class) = self.comparator.labels().class_type() else {
            return Ok(());
        };
        let single = |tree: &T, mapped: &dyn Fn(NodeId) -> bool| {
            let mut found = tree.iter().filter(|&n| tree.node_type(n) == class && !mapped(n));
            match (found.next(), found.next()) {
                (Some(n), None) => Some(n),
                _ => None,
            }
        };
        let a = single(src, &|n| store.has_src(n));
        let b = single(dst, &|n| store.has_dst(n));
        if let (Some(a), Some(b)) = (a, b) {
            trace!(src = usize::from(a), dst = usize::from(b), "optimized: single class pair");
            link(store, a, b)?;
        }
        Ok(())
    }

    fn match_inner<T: DiffTree>(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<usize> {
        let mut cache = SimilarityCache::new();
        let max_height = src.height(src.root());
        let mut added = 0;

        for height in 1..=max_height {
            let src_nodes: Vec<NodeId> = src
                .post_order()
                .filter(|&n| src.height(n) == height && !store.has_src(n))
                .collect();
            let dst_nodes: Vec<NodeId> = dst
                .post_order()
                .filter(|&n| !dst.is_leaf(n) && !store.has_dst(n))
                .collect();

            let mut candidates = Vec::new();
            for (i, &a) in src_nodes.iter().enumerate() {
                for (j, &b) in dst_nodes.iter().enumerate() {
                    if src.node_type(a) != dst.node_type(b) {
                        continue;
                    }
                    let label = self.comparator.inner_similarity(
                        (src.node_type(a), src.label(a)),
                        (dst.node_type(b), dst.label(b)),
                        &mut cache,
                    );
                    let children = children_similarity(src, dst, a, b, store);
                    let leaves = src.leaf_count(a).max(dst.leaf_count(b));
                    if self.is_match(children, label, leaves) {
                        let score = (label + children) / 2.0;
                        trace!(
                            src = usize::from(a),
                            dst = usize::from(b),
                            label,
                            children,
                            "optimized: inner candidate"
                        );
                        candidates.push(MatchingCandidate::new(
                            a,
                            b,
                            score,
                            (i * dst_nodes.len() + j) as u64,
                        ));
                    }
                }
            }
            added += select_greedy(candidates, store)?;
        }
        Ok(added)
    }

    fn is_match(&self, children: f64, label: f64, leaves: usize) -> bool {
        let c = &self.config;
        if label < c.value_threshold {
            children >= c.subtree_threshold_value_mismatch
        } else if leaves <= c.subtree_size_threshold {
            children >= c.subtree_threshold_small
        } else {
            children >= c.subtree_threshold_large
        }
    }

    fn match_roots<T: DiffTree>(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        let Some(root_type) = self.comparator.labels().root_type() else {
            return Ok(());
        };
        let (a, b) = (src.root(), dst.root());
        if src.node_type(a) == root_type
            && dst.node_type(b) == root_type
            && !store.has_src(a)
            && !store.has_dst(b)
        {
            link(store, a, b)?;
        }
        Ok(())
    }
}

impl<T: DiffTree + Sync> Matcher<T> for OptimizedMatcher {
    fn name(&self) -> &'static str {
        "cd-opt"
    }

    fn match_trees(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        #[cfg(feature = "tracing")]
        let before = store.len();

        let candidates = self.leaf_candidates(src, dst, store)?;
        select_greedy(candidates, store)?;
        self.match_single_class_pair(src, dst, store)?;
        self.match_inner(src, dst, store)?;
        self.match_roots(src, dst, store)?;

        debug!(
            added = store.len() - before,
            "optimized matcher done"
        );
        Ok(())
    }
}

/// Post-order index scaled to `[0, 1]`.
fn relative_position<T: DiffTree>(tree: &T, id: NodeId) -> f64 {
    let count = tree.node_count();
    if count <= 1 {
        0.0
    } else {
        tree.post_order_index(id) as f64 / (count - 1) as f64
    }
}

/// Average, over the direct children of `a` and of `b`, of the share of the
/// leaves under each child that are mapped to a leaf under the other node. A
/// leaf child is its own single leaf.
fn children_similarity<T: DiffTree>(
    src: &T,
    dst: &T,
    a: NodeId,
    b: NodeId,
    store: &MappingStore,
) -> f64 {
    if src.leaf_count(a) == 0 && dst.leaf_count(b) == 0 {
        return 1.0;
    }

    let under = |tree: &T, child: NodeId, other: &dyn Fn(NodeId) -> bool| -> f64 {
        let mut total = 0usize;
        let mut mapped = 0usize;
        for leaf in tree.descendants(child).chain([child]).filter(|&n| tree.is_leaf(n)) {
            total += 1;
            if other(leaf) {
                mapped += 1;
            }
        }
        mapped as f64 / total.max(1) as f64
    };

    let src_side = |leaf: NodeId| {
        store
            .get_dst(leaf)
            .is_some_and(|m| dst.is_leaf(m) && dst.is_descendant(b, m))
    };
    let dst_side = |leaf: NodeId| {
        store
            .get_src(leaf)
            .is_some_and(|m| src.is_leaf(m) && src.is_descendant(a, m))
    };

    let mut sum = 0.0;
    let mut count = 0usize;
    for child in src.children(a) {
        sum += under(src, child, &src_side);
        count += 1;
    }
    for child in dst.children(b) {
        sum += under(dst, child, &dst_side);
        count += 1;
    }
    if count == 0 { 1.0 } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::TypeTable;
    use crate::similarity::CompareClass;
    use crate::tree::Tree;

    fn parse(types: &mut TypeTable, text: &str) -> Tree {
        types.parse(text).unwrap()
    }

    fn labels(types: &mut TypeTable) -> Arc<LabelConfiguration> {
        let labels = LabelConfiguration::builder()
            .classify(CompareClass::String, [types.intern("id"), types.intern("str")])
            .classify(CompareClass::Integer, [types.intern("int")])
            .classify(CompareClass::Value, [types.intern("op")])
            .root_type(types.intern("unit"))
            .class_type(types.intern("class"))
            .build();
        Arc::new(labels)
    }

    #[test]
    fn test_moved_statement_is_followed() {
        let mut types = TypeTable::new();
        let labels = labels(&mut types);
        let src = parse(
            &mut types,
            "unit(class:A(method:run(call(id:print,str:hello)),method:stop(call(id:exit,int:1))))",
        );
        let dst = parse(
            &mut types,
            "unit(class:A(method:stop(call(id:exit,int:1)),method:run(call(id:print,str:hello),call(id:flush))))",
        );
        let mut store = MappingStore::new();
        OptimizedMatcher::new(&MatcherConfig::default(), labels)
            .with_parallelism(Parallelism::Sequential)
            .match_trees(&src, &dst, &mut store)
            .unwrap();

        assert!(store.check_bijective());
        for label in ["print", "hello", "exit", "1", "run", "stop", "A"] {
            assert!(
                store.has(src.find_label(label).unwrap(), dst.find_label(label).unwrap()),
                "{label} should map to itself"
            );
        }
        assert!(store.has(src.root(), dst.root()));
    }

    #[test]
    fn test_leaf_scores_weigh_position() {
        let mut types = TypeTable::new();
        let labels = labels(&mut types);
        let m = OptimizedMatcher::new(&MatcherConfig::default(), labels);
        assert!((m.leaf_score(1.0, 0.5, 0.5) - 1.0).abs() < 1e-12);
        assert!((m.leaf_score(1.0, 0.0, 1.0) - 0.4).abs() < 1e-12);
        assert!((m.leaf_score(0.5, 0.2, 0.2) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_inner_thresholds() {
        let mut types = TypeTable::new();
        let m = OptimizedMatcher::new(&MatcherConfig::default(), labels(&mut types));
        assert!(m.is_match(0.4, 1.0, 4));
        assert!(!m.is_match(0.39, 1.0, 4));
        assert!(!m.is_match(0.5, 1.0, 5));
        assert!(m.is_match(0.6, 1.0, 5));
        assert!(!m.is_match(0.69, 0.2, 2));
        assert!(m.is_match(0.7, 0.2, 2));
    }

    #[test]
    fn test_children_similarity_per_direct_child() {
        let mut types = TypeTable::new();
        let src = parse(&mut types, "r(p(x,y),z)");
        let dst = parse(&mut types, "r(p(x,w),z)");
        let mut store = MappingStore::new();
        store
            .link(src.find_label("x").unwrap(), dst.find_label("x").unwrap())
            .unwrap();
        store
            .link(src.find_label("z").unwrap(), dst.find_label("z").unwrap())
            .unwrap();
        // Children p: 1/2 and z: 1/1 on both sides.
        let sim = children_similarity(&src, &dst, src.root(), dst.root(), &store);
        assert!((sim - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_parallel_leaf_candidates_match_sequential() {
        let mut types = TypeTable::new();
        let labels = labels(&mut types);
        let src = parse(&mut types, "unit(id:alpha,id:beta,int:3,id:gamma,str:delta,int:4)");
        let dst = parse(&mut types, "unit(id:alpha,int:4,id:gama,str:delta,id:betas,int:3)");
        let store = MappingStore::new();
        let config = MatcherConfig::default();
        let expected = OptimizedMatcher::new(&config, labels.clone())
            .with_parallelism(Parallelism::Sequential)
            .leaf_candidates(&src, &dst, &store)
            .unwrap();
        assert!(!expected.is_empty());
        for workers in 1..=8 {
            let got = OptimizedMatcher::new(&config.clone().with_workers(workers), labels.clone())
                .leaf_candidates(&src, &dst, &store)
                .unwrap();
            let key = |c: &MatchingCandidate| (c.src, c.dst, c.score.to_bits(), c.id);
            assert_eq!(
                got.iter().map(key).collect::<Vec<_>>(),
                expected.iter().map(key).collect::<Vec<_>>()
            );
        }
    }
}
