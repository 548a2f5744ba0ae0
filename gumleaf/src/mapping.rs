//! The shared mapping store threaded through every matcher stage.

use core::cmp::Ordering;

use rapidhash::RapidHashSet as HashSet;

use crate::error::{MatchError, Result};
use crate::tree::NodeId;

/// A `(src, dst)` node pair. Ordered by source id, then destination id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mapping {
    /// Node of the source tree.
    pub src: NodeId,
    /// Node of the destination tree.
    pub dst: NodeId,
}

impl Mapping {
    /// Pair two nodes.
    pub fn new(src: NodeId, dst: NodeId) -> Self {
        Self { src, dst }
    }
}

impl Ord for Mapping {
    fn cmp(&self, other: &Self) -> Ordering {
        (usize::from(self.src), usize::from(self.dst))
            .cmp(&(usize::from(other.src), usize::from(other.dst)))
    }
}

impl PartialOrd for Mapping {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A one-to-one mapping between source and destination nodes.
///
/// Both directions are vectors indexed by `usize::from(NodeId)`, so every
/// lookup is O(1). Linking a node that is already mapped fails; mappings only
/// go away through [`MappingStore::unlink`].
#[derive(Debug, Clone, Default)]
pub struct MappingStore {
    /// Indexed by source id; holds the whole pair so ids can be recovered.
    src_to_dst: Vec<Option<Mapping>>,
    /// Indexed by destination id.
    dst_to_src: Vec<Option<NodeId>>,
    len: usize,
}

impl MappingStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store sized for trees with the given node counts.
    pub fn with_capacity(src_nodes: usize, dst_nodes: usize) -> Self {
        Self {
            src_to_dst: vec![None; src_nodes + 1],
            dst_to_src: vec![None; dst_nodes + 1],
            len: 0,
        }
    }

    /// Add `src -> dst`. Fails with [`MatchError::Conflict`] if either node
    /// is already mapped, including to each other.
    pub fn link(&mut self, src: NodeId, dst: NodeId) -> Result<()> {
        if self.has_src(src) || self.has_dst(dst) {
            return Err(MatchError::Conflict {
                src: usize::from(src),
                dst: usize::from(dst),
            });
        }

        let src_idx = usize::from(src);
        let dst_idx = usize::from(dst);
        if src_idx >= self.src_to_dst.len() {
            self.src_to_dst.resize(src_idx + 1, None);
        }
        if dst_idx >= self.dst_to_src.len() {
            self.dst_to_src.resize(dst_idx + 1, None);
        }

        self.src_to_dst[src_idx] = Some(Mapping::new(src, dst));
        self.dst_to_src[dst_idx] = Some(src);
        self.len += 1;
        Ok(())
    }

    /// Link only if neither node is mapped. Returns whether the pair was added.
    pub fn link_if_both_unmapped(&mut self, src: NodeId, dst: NodeId) -> bool {
        self.link(src, dst).is_ok()
    }

    /// Remove `src -> dst`. Fails with [`MatchError::NotFound`] if that exact
    /// pair is not present.
    pub fn unlink(&mut self, src: NodeId, dst: NodeId) -> Result<()> {
        if !self.has(src, dst) {
            return Err(MatchError::NotFound {
                src: usize::from(src),
                dst: usize::from(dst),
            });
        }
        self.src_to_dst[usize::from(src)] = None;
        self.dst_to_src[usize::from(dst)] = None;
        self.len -= 1;
        Ok(())
    }

    /// Whether the source node is mapped.
    #[inline(always)]
    pub fn has_src(&self, src: NodeId) -> bool {
        self.get_dst(src).is_some()
    }

    /// Whether the destination node is mapped.
    #[inline(always)]
    pub fn has_dst(&self, dst: NodeId) -> bool {
        self.get_src(dst).is_some()
    }

    /// Whether exactly this pair is mapped.
    #[inline]
    pub fn has(&self, src: NodeId, dst: NodeId) -> bool {
        self.get_dst(src) == Some(dst)
    }

    /// Destination partner of a source node.
    #[inline(always)]
    pub fn get_dst(&self, src: NodeId) -> Option<NodeId> {
        self.src_to_dst
            .get(usize::from(src))
            .copied()
            .flatten()
            .map(|m| m.dst)
    }

    /// Source partner of a destination node.
    #[inline(always)]
    pub fn get_src(&self, dst: NodeId) -> Option<NodeId> {
        self.dst_to_src.get(usize::from(dst)).copied().flatten()
    }

    /// All pairs, in source id order.
    pub fn pairs(&self) -> impl Iterator<Item = Mapping> + '_ {
        self.src_to_dst.iter().flatten().copied()
    }

    /// All pairs sorted by `(src, dst)`.
    pub fn sorted_pairs(&self) -> Vec<Mapping> {
        // Source-indexed storage already yields this order.
        self.pairs().collect()
    }

    /// Snapshot of the pairs as a set.
    pub fn as_set(&self) -> HashSet<Mapping> {
        self.pairs().collect()
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the store holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cross-check both directions. Always true unless the store was corrupted.
    pub fn check_bijective(&self) -> bool {
        let mut forward = 0;
        for m in self.pairs() {
            forward += 1;
            if self.get_src(m.dst) != Some(m.src) {
                return false;
            }
        }
        let backward = self.dst_to_src.iter().flatten().count();
        forward == self.len && backward == self.len
    }
}
