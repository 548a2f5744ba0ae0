//! ChangeDistiller leaf matcher, sequential and data-parallel.

use super::{Matcher, MatchingCandidate, run_sharded, select_greedy, shard_count};
use crate::config::MatcherConfig;
use crate::error::Result;
use crate::mapping::MappingStore;
use crate::similarity::{NGramCalculator, SimilarityCache};
use crate::tree::{DiffTree, NodeId};
use crate::{debug, trace};

/// How candidate generation is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    /// One thread.
    Sequential,
    /// Source leaves are split across `workers` shards (`None`: one shard per
    /// thread of the global rayon pool).
    Parallel {
        /// Worker count.
        workers: Option<usize>,
    },
}

/// Matches unmatched leaves of the same type whose labels are similar.
///
/// Every pair of unmatched leaves with equal types and trigram similarity
/// strictly above the threshold becomes a candidate; candidates are then
/// accepted greedily, best first. The parallel variant produces exactly the
/// same mapping as the sequential one.
#[derive(Debug, Clone)]
pub struct LeavesMatcher {
    threshold: f64,
    ngram: NGramCalculator,
    parallelism: Parallelism,
}

impl LeavesMatcher {
    /// Single-threaded matcher.
    pub fn sequential(config: &MatcherConfig) -> Self {
        Self {
            threshold: config.leaf_threshold,
            ngram: NGramCalculator::trigrams(),
            parallelism: Parallelism::Sequential,
        }
    }

    /// Data-parallel matcher using `config.workers`.
    pub fn parallel(config: &MatcherConfig) -> Self {
        Self {
            parallelism: Parallelism::Parallel {
                workers: config.workers,
            },
            ..Self::sequential(config)
        }
    }

    /// Override the scheduling.
    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Candidates in discovery order (source post-order, then destination
    /// post-order), whatever the scheduling.
    pub fn candidates<T: DiffTree + Sync>(
        &self,
        src: &T,
        dst: &T,
        store: &MappingStore,
    ) -> Result<Vec<MatchingCandidate>> {
        let src_leaves: Vec<NodeId> = src.leaves().filter(|&n| !store.has_src(n)).collect();
        let dst_leaves: Vec<NodeId> = dst.leaves().filter(|&n| !store.has_dst(n)).collect();

        match self.parallelism {
            Parallelism::Sequential => {
                let (candidates, _cache) = self.shard(src, dst, &src_leaves, &dst_leaves, 0, 1);
                Ok(candidates)
            }
            Parallelism::Parallel { workers } => {
                let shards = shard_count(workers);
                let parts = run_sharded(workers, shards, |shard| {
                    self.shard(src, dst, &src_leaves, &dst_leaves, shard, shards)
                })?;

                let mut cache = SimilarityCache::new();
                let mut candidates = Vec::new();
                for (part, part_cache) in parts {
                    candidates.extend(part);
                    cache.merge(part_cache);
                }
                candidates.sort_unstable_by_key(|c| c.id);
                debug!(shards, cached_pairs = cache.len(), "leaf shards merged");
                Ok(candidates)
            }
        }
    }

    /// Candidates for the source leaves `i` with `i % stride == shard`.
    fn shard<T: DiffTree>(
        &self,
        src: &T,
        dst: &T,
        src_leaves: &[NodeId],
        dst_leaves: &[NodeId],
        shard: usize,
        stride: usize,
    ) -> (Vec<MatchingCandidate>, SimilarityCache) {
        let mut cache = SimilarityCache::new();
        let mut out = Vec::new();
        for (i, &a) in src_leaves.iter().enumerate().skip(shard).step_by(stride) {
            for (j, &b) in dst_leaves.iter().enumerate() {
                if src.node_type(a) != dst.node_type(b) {
                    continue;
                }
                let (la, lb) = (src.label(a), dst.label(b));
                let sim = cache.get_or_insert_with(la, lb, || self.ngram.similarity(la, lb));
                if sim > self.threshold {
                    out.push(MatchingCandidate::new(a, b, sim, (i * dst_leaves.len() + j) as u64));
                }
            }
        }
        (out, cache)
    }
}

impl<T: DiffTree + Sync> Matcher<T> for LeavesMatcher {
    fn name(&self) -> &'static str {
        match self.parallelism {
            Parallelism::Sequential => "cd-leaves",
            Parallelism::Parallel { .. } => "cd-leaves-par",
        }
    }

    fn match_trees(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        let candidates = self.candidates(src, dst, store)?;
        trace!(candidates = candidates.len(), "leaf candidates");
        select_greedy(candidates, store)?;
        debug!(matched = store.len(), "leaf matcher done");
        Ok(())
    }
}
