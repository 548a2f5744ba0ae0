//! Matcher stages.
//!
//! Every stage reads two immutable trees and extends (or, for the repair
//! passes, rewrites) a shared [`MappingStore`]. Stages are composed into a
//! [`Pipeline`](crate::pipeline::Pipeline).

pub mod bottom_up;
pub mod gumtree;
pub mod identical;
pub mod lcs;
pub mod leaves;
pub mod optimal;
pub mod optimized;
pub mod repair;

use core::any::Any;
use core::cmp::Ordering;
use core::panic::AssertUnwindSafe;
use std::panic::catch_unwind;

use rayon::prelude::*;

use crate::error::{MatchError, Result};
use crate::mapping::MappingStore;
use crate::trace;
use crate::tree::{DiffTree, NodeId, Tree};

pub use bottom_up::{BottomUpMatcher, BottomUpThresholds};
pub use gumtree::{GreedyBottomUpMatcher, GreedySubtreeMatcher};
pub use identical::IdenticalSubtreeMatcher;
pub use lcs::LcsMatcher;
pub use leaves::{LeavesMatcher, Parallelism};
pub use optimal::OptimalMatcher;
pub use optimized::OptimizedMatcher;
pub use repair::{FineGrainedRepair, LeafMoveReconciliation, MajorityParentRepair, OrphanLeafAdoption};

/// One stage of a matching pipeline.
pub trait Matcher<T: DiffTree = Tree>: Send + Sync {
    /// Stable stage name, used in logs.
    fn name(&self) -> &'static str;

    /// Extend `store` with mappings between `src` and `dst`.
    fn match_trees(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()>;
}

/// A scored candidate pair.
///
/// Ordered by descending score, then ascending `id`. Ids follow discovery
/// order, so equal scores keep the order in which pairs were found.
#[derive(Debug, Clone, Copy)]
pub struct MatchingCandidate {
    /// Source node.
    pub src: NodeId,
    /// Destination node.
    pub dst: NodeId,
    /// Similarity, higher is better.
    pub score: f64,
    /// Tie breaker.
    pub id: u64,
}

impl MatchingCandidate {
    /// A new candidate.
    pub fn new(src: NodeId, dst: NodeId, score: f64, id: u64) -> Self {
        Self { src, dst, score, id }
    }
}

impl Ord for MatchingCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for MatchingCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MatchingCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MatchingCandidate {}

/// Link a pair inside a matcher. A conflict here means the matcher itself is
/// broken.
pub(crate) fn link(store: &mut MappingStore, src: NodeId, dst: NodeId) -> Result<()> {
    let result = store.link(src, dst);
    debug_assert!(result.is_ok(), "matcher produced a conflicting link: {result:?}");
    result
}

/// Greedy selection: best candidates first, skipping pairs with an endpoint
/// that is already mapped. Returns the number of links added.
pub(crate) fn select_greedy(
    mut candidates: Vec<MatchingCandidate>,
    store: &mut MappingStore,
) -> Result<usize> {
    candidates.sort_unstable();
    let mut linked = 0;
    for c in candidates {
        if store.has_src(c.src) || store.has_dst(c.dst) {
            continue;
        }
        trace!(
            src = usize::from(c.src),
            dst = usize::from(c.dst),
            score = c.score,
            "greedy: accept"
        );
        link(store, c.src, c.dst)?;
        linked += 1;
    }
    Ok(linked)
}

/// Number of shards for a data-parallel stage.
pub(crate) fn shard_count(workers: Option<usize>) -> usize {
    workers.unwrap_or_else(rayon::current_num_threads).max(1)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Run `job` once per shard on rayon, on a dedicated pool when `workers` is
/// set. Every shard runs to completion; the first failed shard (by index) is
/// reported as [`MatchError::Worker`].
pub(crate) fn run_sharded<R, F>(workers: Option<usize>, shards: usize, job: F) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(usize) -> R + Sync,
{
    let run = || {
        (0..shards)
            .into_par_iter()
            .map(|shard| {
                catch_unwind(AssertUnwindSafe(|| job(shard)))
                    .map_err(|payload| (shard, panic_message(payload)))
            })
            .collect::<Vec<_>>()
    };

    let results = match workers {
        Some(threads) => rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| MatchError::Configuration(format!("cannot build worker pool: {e}")))?
            .install(run),
        None => run(),
    };

    results
        .into_iter()
        .map(|r| r.map_err(|(shard, message)| MatchError::Worker { shard, message }))
        .collect()
}
