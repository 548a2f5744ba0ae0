//! LCS realignment of unmatched nodes under mapped ancestors.

use rapidhash::RapidHashSet as HashSet;

use super::{Matcher, link};
use crate::config::MatcherConfig;
use crate::error::Result;
use crate::mapping::MappingStore;
use crate::tree::{DiffTree, NodeId};
use crate::{debug, trace, warn_log};

/// Aligns the post-order node lists of mapped ancestor pairs with a longest
/// common subsequence and links the unmatched nodes on the alignment.
///
/// Two nodes align when they have the same type and are either mapped to each
/// other or both unmatched. Passes repeat until one adds nothing, so running
/// the matcher again on its own output is a no-op.
#[derive(Debug, Clone, Copy)]
pub struct LcsMatcher {
    size_limit: usize,
}

impl LcsMatcher {
    /// Matcher that skips ancestor pairs whose list product exceeds
    /// `size_limit`.
    pub fn new(size_limit: usize) -> Self {
        Self { size_limit }
    }

    /// Matcher configured from `config` (the optimal matcher's size limit).
    pub fn from_config(config: &MatcherConfig) -> Self {
        Self::new(config.optimal_size_limit)
    }

    fn pass<T: DiffTree>(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<usize> {
        let mut added = 0;
        let mut visited: HashSet<NodeId> = HashSet::default();
        let work: Vec<NodeId> = src.post_order().filter(|&n| !store.has_src(n)).collect();

        for node in work {
            if store.has_src(node) {
                continue;
            }
            let Some((anchor, partner)) = mapped_ancestor(src, dst, node, store) else {
                continue;
            };
            if !visited.insert(anchor) {
                continue;
            }

            let a: Vec<NodeId> = subtree_post_order(src, anchor);
            let b: Vec<NodeId> = subtree_post_order(dst, partner);
            if a.len().checked_mul(b.len()).is_none_or(|cells| cells > self.size_limit) {
                warn_log!(
                    src = a.len(),
                    dst = b.len(),
                    limit = self.size_limit,
                    "lcs: ancestor pair too large, skipped"
                );
                continue;
            }

            for (s, d) in lcs(src, dst, &a, &b, store) {
                if store.has_src(s) || store.has_dst(d) {
                    continue;
                }
                trace!(src = usize::from(s), dst = usize::from(d), "lcs: link");
                link(store, s, d)?;
                added += 1;
            }
        }
        Ok(added)
    }
}

impl<T: DiffTree> Matcher<T> for LcsMatcher {
    fn name(&self) -> &'static str {
        "lcs"
    }

    fn match_trees(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        #[cfg(feature = "tracing")]
        let before = store.len();
        while self.pass(src, dst, store)? > 0 {}
        debug!(added = store.len() - before, "lcs matcher done");
        Ok(())
    }
}

/// Nearest proper ancestor of `node` with a partner. Reaching an unmapped
/// source root pairs it with the destination root.
fn mapped_ancestor<T: DiffTree>(
    src: &T,
    dst: &T,
    node: NodeId,
    store: &MappingStore,
) -> Option<(NodeId, NodeId)> {
    let mut current = src.parent(node)?;
    loop {
        if let Some(partner) = store.get_dst(current) {
            return Some((current, partner));
        }
        match src.parent(current) {
            Some(parent) => current = parent,
            None => return Some((current, dst.root())),
        }
    }
}

/// `root` and its descendants in post-order.
fn subtree_post_order<T: DiffTree>(tree: &T, root: NodeId) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = tree.descendants(root).chain([root]).collect();
    nodes.sort_unstable_by_key(|&n| tree.post_order_index(n));
    nodes
}

fn aligns<T: DiffTree>(src: &T, dst: &T, a: NodeId, b: NodeId, store: &MappingStore) -> bool {
    if src.node_type(a) != dst.node_type(b) {
        return false;
    }
    store.has(a, b) || (!store.has_src(a) && !store.has_dst(b))
}

/// Aligned pairs, last to first.
fn lcs<T: DiffTree>(
    src: &T,
    dst: &T,
    a: &[NodeId],
    b: &[NodeId],
    store: &MappingStore,
) -> Vec<(NodeId, NodeId)> {
    let width = b.len() + 1;
    let mut table = vec![0usize; (a.len() + 1) * width];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            table[i * width + j] = if aligns(src, dst, a[i - 1], b[j - 1], store) {
                table[(i - 1) * width + j - 1] + 1
            } else {
                table[(i - 1) * width + j].max(table[i * width + j - 1])
            };
        }
    }

    let mut out = Vec::new();
    let (mut i, mut j) = (a.len(), b.len());
    while i > 0 && j > 0 {
        let here = table[i * width + j];
        if aligns(src, dst, a[i - 1], b[j - 1], store) && here == table[(i - 1) * width + j - 1] + 1 {
            out.push((a[i - 1], b[j - 1]));
            i -= 1;
            j -= 1;
        } else if table[(i - 1) * width + j] >= table[i * width + j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::TypeTable;

    fn matcher() -> LcsMatcher {
        LcsMatcher::from_config(&MatcherConfig::default())
    }

    #[test]
    fn test_aligns_whole_trees_under_unmapped_roots() {
        let mut types = TypeTable::new();
        let src = types.parse("r(x:1,y:2)").unwrap();
        let dst = types.parse("r(x:3,y:4)").unwrap();
        let mut store = MappingStore::new();
        matcher().match_trees(&src, &dst, &mut store).unwrap();

        let mapped: Vec<(&str, &str)> = store
            .pairs()
            .map(|m| (src.label(m.src), dst.label(m.dst)))
            .collect();
        assert_eq!(mapped, [("r", "r"), ("1", "3"), ("2", "4")]);
    }

    #[test]
    fn test_respects_existing_mappings() {
        let mut types = TypeTable::new();
        let src = types.parse("r(a(x:1,y:2,x:5),b)").unwrap();
        let dst = types.parse("r(a(x:3,x:6,y:4),b)").unwrap();
        let mut store = MappingStore::new();
        let sa = src.find_label("a").unwrap();
        let da = dst.find_label("a").unwrap();
        store.link(sa, da).unwrap();
        // 5 is already mapped to 6; the alignment must go around it.
        store
            .link(src.find_label("5").unwrap(), dst.find_label("6").unwrap())
            .unwrap();

        matcher().match_trees(&src, &dst, &mut store).unwrap();
        assert!(store.check_bijective());
        assert_eq!(store.get_dst(src.find_label("1").unwrap()), dst.find_label("3"));
        assert_eq!(store.get_dst(src.find_label("2").unwrap()), dst.find_label("4"));
        assert!(store.has(src.find_label("5").unwrap(), dst.find_label("6").unwrap()));
        assert!(store.has(src.root(), dst.root()));
        assert!(store.has(src.find_label("b").unwrap(), dst.find_label("b").unwrap()));
    }

    #[test]
    fn test_rerun_adds_nothing() {
        let mut types = TypeTable::new();
        let src = types.parse("r(a(x:1,y:2),c(z:9),x:7)").unwrap();
        let dst = types.parse("r(c(z:8,x:1),a(y:2),w)").unwrap();
        let mut store = MappingStore::new();
        matcher().match_trees(&src, &dst, &mut store).unwrap();
        let first = store.sorted_pairs();
        assert!(!first.is_empty());

        matcher().match_trees(&src, &dst, &mut store).unwrap();
        assert_eq!(store.sorted_pairs(), first);
        assert!(store.check_bijective());
    }

    #[test]
    fn test_oversized_pairs_are_skipped() {
        let mut types = TypeTable::new();
        let src = types.parse("r(x:1,y:2)").unwrap();
        let dst = types.parse("r(x:3,y:4)").unwrap();
        let mut store = MappingStore::new();
        LcsMatcher::new(8).match_trees(&src, &dst, &mut store).unwrap();
        assert!(store.is_empty());
    }
}
