//! Fine-grained repair passes run after the coarse matchers.
//!
//! - [`OrphanLeafAdoption`] gives unmatched leaves under mapped parents the
//!   partner at the same position, displacing weaker mappings.
//! - [`MajorityParentRepair`] remaps a parent to the destination parent that
//!   most of its mapped children point into.
//! - [`LeafMoveReconciliation`] swaps mismatched leaf mappings toward
//!   siblings with identical labels.
//!
//! [`FineGrainedRepair`] runs all three in that order.

use rapidhash::{RapidHashMap as HashMap, RapidHashSet as HashSet};

use super::{Matcher, link};
use crate::config::MatcherConfig;
use crate::error::Result;
use crate::mapping::{Mapping, MappingStore};
use crate::tree::{DiffTree, NodeId};
use crate::{debug, trace};

fn same_type<T: DiffTree>(a_tree: &T, a: NodeId, b_tree: &T, b: NodeId) -> bool {
    a_tree.node_type(a) == b_tree.node_type(b)
}

fn same_label<T: DiffTree>(a_tree: &T, a: NodeId, b_tree: &T, b: NodeId) -> bool {
    a_tree.label(a) == b_tree.label(b)
}

fn same_node<T: DiffTree>(a_tree: &T, a: NodeId, b_tree: &T, b: NodeId) -> bool {
    same_type(a_tree, a, b_tree, b) && same_label(a_tree, a, b_tree, b)
}

/// Replace `(old_src, dst)` by `(src, dst)`.
fn displace_src(store: &mut MappingStore, old_src: NodeId, src: NodeId, dst: NodeId) -> Result<()> {
    trace!(
        old = usize::from(old_src),
        src = usize::from(src),
        dst = usize::from(dst),
        "repair: displace source"
    );
    store.unlink(old_src, dst)?;
    link(store, src, dst)
}

/// Replace `(src, old_dst)` by `(src, dst)`.
fn displace_dst(store: &mut MappingStore, src: NodeId, old_dst: NodeId, dst: NodeId) -> Result<()> {
    trace!(
        src = usize::from(src),
        old = usize::from(old_dst),
        dst = usize::from(dst),
        "repair: displace destination"
    );
    store.unlink(src, old_dst)?;
    link(store, src, dst)
}

fn unlink_if_linked(store: &mut MappingStore, src: NodeId, dst: NodeId) -> Result<()> {
    if store.has(src, dst) {
        store.unlink(src, dst)?;
    }
    Ok(())
}

/// Orphan-leaf adoption.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrphanLeafAdoption;

impl OrphanLeafAdoption {
    fn adopt_src<T: DiffTree>(src: &T, dst: &T, node: NodeId, store: &mut MappingStore) -> Result<()> {
        let Some(parent) = src.parent(node) else {
            return Ok(());
        };
        let Some(partner) = store.get_dst(parent) else {
            return Ok(());
        };
        let Some(child) = dst.child(partner, src.position(node)) else {
            return Ok(());
        };

        if same_type(src, node, dst, child) {
            match store.get_src(child) {
                None => link(store, node, child)?,
                Some(current) if same_label(src, node, dst, child) => {
                    if src.label(current) != src.label(node) {
                        displace_src(store, current, node, child)?;
                    }
                }
                Some(current) => {
                    let parent_unmapped = src.parent(current).is_none_or(|p| !store.has_src(p));
                    if parent_unmapped && src.label(current) != dst.label(child) {
                        displace_src(store, current, node, child)?;
                    }
                }
            }
        } else if dst.child_count(child) == 1 {
            let Some(grandchild) = dst.child(child, 0) else {
                return Ok(());
            };
            if same_node(src, node, dst, grandchild)
                && let Some(current) = store.get_src(grandchild)
            {
                let parent_unmapped = src.parent(current).is_none_or(|p| !store.has_src(p));
                if src.label(current) != src.label(node) || parent_unmapped {
                    displace_src(store, current, node, grandchild)?;
                }
            }
        } else {
            let siblings: Vec<NodeId> = dst.children(partner).collect();
            for candidate in siblings {
                if !same_node(src, node, dst, candidate) {
                    continue;
                }
                match store.get_src(candidate) {
                    None => {
                        link(store, node, candidate)?;
                        break;
                    }
                    Some(current) if src.label(current) != dst.label(candidate) => {
                        displace_src(store, current, node, candidate)?;
                        break;
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    fn adopt_dst<T: DiffTree>(
        src: &T,
        dst: &T,
        node: NodeId,
        unmatched: &HashSet<NodeId>,
        store: &mut MappingStore,
    ) -> Result<()> {
        let Some(parent) = dst.parent(node) else {
            return Ok(());
        };

        let Some(partner) = store.get_src(parent) else {
            // The parent is new as well: try the grandparent's partner.
            if !unmatched.contains(&parent) {
                return Ok(());
            }
            let Some(grandparent) = dst.parent(parent) else {
                return Ok(());
            };
            let Some(partner) = store.get_src(grandparent) else {
                return Ok(());
            };
            let Some(child) = src.child(partner, dst.position(parent)) else {
                return Ok(());
            };
            if same_node(src, child, dst, node) {
                match store.get_dst(child) {
                    None => link(store, child, node)?,
                    Some(current) if dst.label(current) != dst.label(node) => {
                        displace_dst(store, child, current, node)?;
                    }
                    Some(_) => {}
                }
            }
            return Ok(());
        };

        let Some(child) = src.child(partner, dst.position(node)) else {
            return Ok(());
        };

        if same_type(src, child, dst, node) {
            match store.get_dst(child) {
                None => link(store, child, node)?,
                Some(current) if same_label(src, child, dst, node) => {
                    if dst.label(current) != dst.label(node) {
                        displace_dst(store, child, current, node)?;
                    }
                }
                Some(current) => {
                    let parent_unmapped = dst.parent(current).is_none_or(|p| !store.has_dst(p));
                    if parent_unmapped && dst.label(current) != src.label(child) {
                        displace_dst(store, child, current, node)?;
                    }
                }
            }
        } else if src.child_count(child) == 1 {
            let Some(grandchild) = src.child(child, 0) else {
                return Ok(());
            };
            if same_node(src, grandchild, dst, node)
                && let Some(current) = store.get_dst(grandchild)
            {
                let parent_unmapped = dst.parent(current).is_none_or(|p| !store.has_dst(p));
                if dst.label(current) != dst.label(node) || parent_unmapped {
                    displace_dst(store, grandchild, current, node)?;
                }
            }
        } else {
            let siblings: Vec<NodeId> = src.children(partner).collect();
            for candidate in siblings {
                if !same_node(src, candidate, dst, node) {
                    continue;
                }
                match store.get_dst(candidate) {
                    None => {
                        link(store, candidate, node)?;
                        break;
                    }
                    Some(current) if dst.label(current) != src.label(candidate) => {
                        displace_dst(store, candidate, current, node)?;
                        break;
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}

impl<T: DiffTree> Matcher<T> for OrphanLeafAdoption {
    fn name(&self) -> &'static str {
        "orphan-leaves"
    }

    fn match_trees(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        #[cfg(feature = "tracing")]
        let before = store.len();
        let src_unmatched: Vec<NodeId> = src.iter().filter(|&n| !store.has_src(n)).collect();
        let dst_unmatched: Vec<NodeId> = dst.iter().filter(|&n| !store.has_dst(n)).collect();
        let dst_unmatched_set: HashSet<NodeId> = dst_unmatched.iter().copied().collect();

        for node in src_unmatched {
            if src.child_count(node) == 0 && !store.has_src(node) {
                Self::adopt_src(src, dst, node, store)?;
            }
        }
        for node in dst_unmatched {
            if dst.child_count(node) == 0 && !store.has_dst(node) {
                Self::adopt_dst(src, dst, node, &dst_unmatched_set, store)?;
            }
        }

        debug!(
            before,
            after = store.len(),
            "orphan leaf adoption done"
        );
        Ok(())
    }
}

/// Majority-vote parent repair.
#[derive(Debug, Clone, Copy, Default)]
pub struct MajorityParentRepair;

impl<T: DiffTree> Matcher<T> for MajorityParentRepair {
    fn name(&self) -> &'static str {
        "parent-repair"
    }

    fn match_trees(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        let mut votes: HashMap<NodeId, HashMap<NodeId, usize>> = HashMap::default();
        for m in store.pairs() {
            if let (Some(sp), Some(dp)) = (src.parent(m.src), dst.parent(m.dst)) {
                *votes.entry(sp).or_default().entry(dp).or_default() += 1;
            }
        }
        let mut parents: Vec<(NodeId, HashMap<NodeId, usize>)> = votes.into_iter().collect();
        parents.sort_unstable_by_key(|(p, _)| usize::from(*p));

        #[cfg(feature = "tracing")]
        let mut repaired = 0;
        for (parent, counts) in parents {
            let Some((dominant, max)) = unique_max(&counts) else {
                continue;
            };
            let (Some(partner), Some(dominant_partner)) =
                (store.get_dst(parent), store.get_src(dominant))
            else {
                continue;
            };
            if partner == dominant {
                continue;
            }
            let children = src.child_count(parent);
            if !(max > children / 2 || children == 1) {
                continue;
            }
            let grandparent_partner = src.parent(parent).and_then(|p| store.get_dst(p));
            if grandparent_partner.is_some() && grandparent_partner == dst.parent(partner) {
                continue;
            }
            // Never hand the dominant node to a descendant of its own partner.
            let mut up = Some(parent);
            let mut allowed = true;
            while let Some(n) = up {
                if n == dominant_partner {
                    allowed = false;
                    break;
                }
                up = src.parent(n);
            }
            if !allowed || !same_type(src, parent, dst, dominant) {
                continue;
            }

            trace!(
                src = usize::from(parent),
                dst = usize::from(dominant),
                votes = max,
                "parent repair: remap"
            );
            unlink_if_linked(store, dominant_partner, dominant)?;
            unlink_if_linked(store, parent, partner)?;
            link(store, parent, dominant)?;
            if same_type(src, dominant_partner, dst, partner) {
                link(store, dominant_partner, partner)?;
            }
            #[cfg(feature = "tracing")]
            {
                repaired += 1;
            }
        }

        debug!(repaired, "majority parent repair done");
        Ok(())
    }
}

/// The key with the strictly largest count, if it is unique.
fn unique_max(counts: &HashMap<NodeId, usize>) -> Option<(NodeId, usize)> {
    let mut best: Option<(NodeId, usize)> = None;
    let mut ties = 0;
    for (&node, &count) in counts {
        match best {
            Some((_, max)) if count < max => {}
            Some((_, max)) if count == max => ties += 1,
            _ => {
                best = Some((node, count));
                ties = 0;
            }
        }
    }
    best.filter(|_| ties == 0)
}

/// Leaf-move reconciliation.
///
/// Mapped leaves with different labels are re-evaluated against the siblings
/// of their partners: a sibling with the same type and label (the only one,
/// or the one at the same position) takes over the mapping. Rounds repeat on
/// the pairs that still mismatch, at most `max_rounds` times.
#[derive(Debug, Clone, Copy)]
pub struct LeafMoveReconciliation {
    max_rounds: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParentMode {
    /// Siblings under the partner of the source parent.
    MappedParent,
    /// Siblings under the destination leaf's own parent.
    OwnParent,
}

impl LeafMoveReconciliation {
    /// Reconciliation bounded to `max_rounds` rounds per mode.
    pub fn new(max_rounds: usize) -> Self {
        Self { max_rounds }
    }

    /// Configured from `config`.
    pub fn from_config(config: &MatcherConfig) -> Self {
        Self::new(config.max_repair_rounds)
    }

    fn mismatched<T: DiffTree>(src: &T, dst: &T, store: &MappingStore) -> Vec<Mapping> {
        let mut pairs: Vec<Mapping> = store
            .pairs()
            .filter(|m| {
                src.is_leaf(m.src) && dst.is_leaf(m.dst) && !same_label(src, m.src, dst, m.dst)
            })
            .collect();
        pairs.sort_unstable();
        pairs
    }

    fn run_mode<T: DiffTree>(
        &self,
        src: &T,
        dst: &T,
        store: &mut MappingStore,
        mode: ParentMode,
    ) -> Result<usize> {
        let mut work = Self::mismatched(src, dst, store);
        let mut rounds = 0;
        while !work.is_empty() && rounds < self.max_rounds {
            rounds += 1;
            let mut pending = PendingLinks::default();
            for pair in &work {
                if !store.has(pair.src, pair.dst) {
                    continue;
                }
                let Some(src_parent) = src.parent(pair.src) else {
                    continue;
                };
                let dst_parent = match mode {
                    ParentMode::MappedParent => store.get_dst(src_parent),
                    ParentMode::OwnParent => dst.parent(pair.dst),
                };
                let Some(dst_parent) = dst_parent else {
                    continue;
                };
                reevaluate(src, dst, src_parent, dst_parent, *pair, store, &mut pending)?;
            }

            let mut next = Vec::new();
            for change in pending.links {
                link(store, change.src, change.dst)?;
                if src.is_leaf(change.src)
                    && dst.is_leaf(change.dst)
                    && !same_label(src, change.src, dst, change.dst)
                {
                    next.push(change);
                }
            }
            work = next;
        }
        debug!(?mode, rounds, "leaf move reconciliation mode done");
        Ok(rounds)
    }
}

/// Links queued during one round, applied once the round is over. Every node
/// occurs in at most one queued link, so applying them cannot conflict.
#[derive(Debug, Default)]
struct PendingLinks {
    links: Vec<Mapping>,
    src: HashSet<NodeId>,
    dst: HashSet<NodeId>,
}

impl PendingLinks {
    fn claims_src(&self, node: NodeId) -> bool {
        self.src.contains(&node)
    }

    fn claims_dst(&self, node: NodeId) -> bool {
        self.dst.contains(&node)
    }

    /// Drop `unlinks` from the store and queue `links` in their place. Does
    /// nothing and returns false when a link touches an already queued node.
    fn replace(
        &mut self,
        store: &mut MappingStore,
        unlinks: &[Mapping],
        links: &[Mapping],
    ) -> Result<bool> {
        if links
            .iter()
            .any(|l| self.claims_src(l.src) || self.claims_dst(l.dst))
        {
            trace!(?links, "leaf moves: target already claimed this round");
            return Ok(false);
        }
        for u in unlinks {
            unlink_if_linked(store, u.src, u.dst)?;
        }
        for &l in links {
            self.src.insert(l.src);
            self.dst.insert(l.dst);
            self.links.push(l);
        }
        Ok(true)
    }
}

/// Siblings under `parent` of the same type and label as `like`: how many
/// there are, the last one, and the one at `pos`.
fn find_siblings<T: DiffTree, U: DiffTree>(
    tree: &T,
    parent: NodeId,
    pos: usize,
    other: &U,
    like: NodeId,
) -> (usize, Option<NodeId>, Option<NodeId>) {
    let mut count = 0;
    let mut last = None;
    let mut at_pos = None;
    for (i, child) in tree.children(parent).enumerate() {
        if tree.node_type(child) == other.node_type(like) && tree.label(child) == other.label(like) {
            count += 1;
            last = Some(child);
            if i == pos {
                at_pos = Some(child);
            }
        }
    }
    (count, last, at_pos)
}

fn pick(count: usize, last: Option<NodeId>, at_pos: Option<NodeId>) -> Option<NodeId> {
    if count == 1 { last } else { at_pos }
}

fn reevaluate<T: DiffTree>(
    src: &T,
    dst: &T,
    src_parent: NodeId,
    dst_parent: NodeId,
    pair: Mapping,
    store: &mut MappingStore,
    pending: &mut PendingLinks,
) -> Result<()> {
    let (a, b) = (pair.src, pair.dst);

    // Destination siblings looking like the source leaf.
    let (count, last, at_pos) = find_siblings(dst, dst_parent, src.position(a), src, a);
    if let Some(target) = pick(count, last, at_pos) {
        match store.get_src(target) {
            Some(current) => {
                if src.label(current) != dst.label(target) {
                    let mut links = vec![Mapping::new(a, target)];
                    if target != b && current != a {
                        links.push(Mapping::new(current, b));
                    }
                    let unlinks = [pair, Mapping::new(current, target)];
                    if pending.replace(store, &unlinks, &links)? {
                        return Ok(());
                    }
                }
            }
            None => {
                let mut links = vec![Mapping::new(a, target)];
                let free = src.children(src_parent).find(|&c| {
                    src.is_leaf(c)
                        && !store.has_src(c)
                        && !pending.claims_src(c)
                        && c != a
                        && same_node(src, c, dst, b)
                });
                if let Some(c) = free {
                    links.push(Mapping::new(c, b));
                }
                if pending.replace(store, &[pair], &links)? {
                    return Ok(());
                }
            }
        }
    }

    // Source siblings looking like the destination leaf.
    let (count, last, at_pos) = find_siblings(src, src_parent, dst.position(b), dst, b);
    if let Some(target) = pick(count, last, at_pos) {
        match store.get_dst(target) {
            Some(current) => {
                if dst.label(current) != src.label(target) {
                    let mut links = vec![Mapping::new(target, b)];
                    if target != a && current != b {
                        links.push(Mapping::new(a, current));
                    }
                    let unlinks = [pair, Mapping::new(target, current)];
                    pending.replace(store, &unlinks, &links)?;
                }
            }
            None => {
                let mut links = vec![Mapping::new(target, b)];
                let free = dst.children(dst_parent).find(|&c| {
                    dst.is_leaf(c)
                        && !store.has_dst(c)
                        && !pending.claims_dst(c)
                        && c != b
                        && same_node(src, a, dst, c)
                });
                if let Some(c) = free {
                    links.push(Mapping::new(a, c));
                }
                pending.replace(store, &[pair], &links)?;
            }
        }
    }
    Ok(())
}

impl<T: DiffTree> Matcher<T> for LeafMoveReconciliation {
    fn name(&self) -> &'static str {
        "leaf-moves"
    }

    fn match_trees(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        self.run_mode(src, dst, store, ParentMode::MappedParent)?;
        self.run_mode(src, dst, store, ParentMode::OwnParent)?;
        Ok(())
    }
}

/// Orphan-leaf adoption, majority parent repair and leaf-move reconciliation,
/// in that order.
#[derive(Debug, Clone, Copy)]
pub struct FineGrainedRepair {
    leaf_moves: LeafMoveReconciliation,
}

impl FineGrainedRepair {
    /// Configured from `config`.
    pub fn from_config(config: &MatcherConfig) -> Self {
        Self {
            leaf_moves: LeafMoveReconciliation::from_config(config),
        }
    }
}

impl<T: DiffTree> Matcher<T> for FineGrainedRepair {
    fn name(&self) -> &'static str {
        "repair"
    }

    fn match_trees(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        OrphanLeafAdoption.match_trees(src, dst, store)?;
        MajorityParentRepair.match_trees(src, dst, store)?;
        self.leaf_moves.match_trees(src, dst, store)
    }
}
