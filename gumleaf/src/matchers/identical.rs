//! Links isomorphic subtrees by structural hash.

use rapidhash::RapidHashMap as HashMap;

use super::{Matcher, link};
use crate::error::Result;
use crate::mapping::MappingStore;
use crate::tree::{DiffTree, NodeHash, NodeId};
use crate::{debug, trace};

/// Identical-subtree matcher.
///
/// Unmatched nodes are bucketed by subtree hash. Buckets are processed from
/// the tallest subtrees down so enclosing subtrees are claimed before their
/// parts; within a bucket the still-unmatched occurrences of both trees are
/// paired in pre-order, i-th with i-th. This approximates a multiset matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdenticalSubtreeMatcher;

impl<T: DiffTree> Matcher<T> for IdenticalSubtreeMatcher {
    fn name(&self) -> &'static str {
        "identical"
    }

    fn match_trees(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        #[cfg(feature = "tracing")]
        let before = store.len();

        let mut dst_buckets: HashMap<NodeHash, Vec<NodeId>> = HashMap::default();
        for d in dst.iter() {
            if !store.has_dst(d) {
                dst_buckets.entry(dst.hash(d)).or_default().push(d);
            }
        }
        let mut src_buckets: HashMap<NodeHash, Vec<NodeId>> = HashMap::default();
        for s in src.iter() {
            if !store.has_src(s) && dst_buckets.contains_key(&src.hash(s)) {
                src_buckets.entry(src.hash(s)).or_default().push(s);
            }
        }

        // Tallest first; ties by first source occurrence.
        let mut order: Vec<(usize, usize, NodeHash)> = src_buckets
            .iter()
            .map(|(&hash, occ)| (src.height(occ[0]), src.pre_order_index(occ[0]), hash))
            .collect();
        order.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        for (_, _, hash) in order {
            let (Some(srcs), Some(dsts)) = (src_buckets.get(&hash), dst_buckets.get(&hash)) else {
                continue;
            };
            let srcs: Vec<NodeId> = srcs
                .iter()
                .copied()
                .filter(|&s| subtree_unmatched_src(src, s, store))
                .collect();
            let dsts: Vec<NodeId> = dsts
                .iter()
                .copied()
                .filter(|&d| subtree_unmatched_dst(dst, d, store))
                .collect();
            for (s, d) in srcs.into_iter().zip(dsts) {
                if !same_root(src, dst, s, d) {
                    trace!(
                        src = usize::from(s),
                        dst = usize::from(d),
                        "identical: hash collision"
                    );
                    continue;
                }
                link_subtrees(src, dst, s, d, store)?;
            }
        }

        debug!(added = store.len() - before, "identical subtree matcher done");
        Ok(())
    }
}

fn subtree_unmatched_src<T: DiffTree>(tree: &T, root: NodeId, store: &MappingStore) -> bool {
    !store.has_src(root) && tree.descendants(root).all(|n| !store.has_src(n))
}

fn subtree_unmatched_dst<T: DiffTree>(tree: &T, root: NodeId, store: &MappingStore) -> bool {
    !store.has_dst(root) && tree.descendants(root).all(|n| !store.has_dst(n))
}

fn same_root<T: DiffTree>(src: &T, dst: &T, s: NodeId, d: NodeId) -> bool {
    src.node_type(s) == dst.node_type(d)
        && src.label(s) == dst.label(d)
        && src.size(s) == dst.size(d)
}

/// Link two isomorphic subtrees node by node, children zipped in order.
fn link_subtrees<T: DiffTree>(
    src: &T,
    dst: &T,
    s: NodeId,
    d: NodeId,
    store: &mut MappingStore,
) -> Result<()> {
    let mut stack = vec![(s, d)];
    while let Some((a, b)) = stack.pop() {
        link(store, a, b)?;
        stack.extend(src.children(a).zip(dst.children(b)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::TypeTable;

    fn run(src: &str, dst: &str) -> (crate::tree::Tree, crate::tree::Tree, MappingStore) {
        let mut types = TypeTable::new();
        let src = types.parse(src).unwrap();
        let dst = types.parse(dst).unwrap();
        let mut store = MappingStore::new();
        IdenticalSubtreeMatcher
            .match_trees(&src, &dst, &mut store)
            .unwrap();
        (src, dst, store)
    }

    #[test]
    fn test_identical_trees_map_completely_in_pre_order() {
        let text = "a(b(c,d),e,f(g(h(i,j,k)),l(m)))";
        let (src, dst, store) = run(text, text);
        assert_eq!(store.len(), src.node_count());
        for (s, d) in src.iter().zip(dst.iter()) {
            assert!(store.has(s, d), "{} should map", src.label(s));
        }
    }

    #[test]
    fn test_shared_subtree_only() {
        let (src, dst, store) = run("a(b(c,d),e)", "a(f(b(c,d),h(i)),j)");
        let mapped: Vec<&str> = store.pairs().map(|m| src.label(m.src)).collect();
        assert_eq!(mapped, ["b", "c", "d"]);
        let b = src.find_label("b").unwrap();
        assert_eq!(store.get_dst(b), dst.find_label("b"));
    }

    #[test]
    fn test_repeated_occurrences_pair_positionally() {
        let (src, dst, store) = run("r(x:1,x:1)", "s(x:1,x:1,x:1)");
        assert_eq!(store.len(), 2);
        for i in 0..2 {
            let s = src.child(src.root(), i).unwrap();
            let d = dst.child(dst.root(), i).unwrap();
            assert!(store.has(s, d));
        }
    }

    #[test]
    fn test_occurrences_claimed_by_taller_subtrees_are_not_paired_again() {
        let (src, dst, store) = run("r(a(x:1),x:1)", "r(x:1,a(x:1))");
        assert!(store.check_bijective());
        assert_eq!(store.len(), 3);
        let src_a = src.child(src.root(), 0).unwrap();
        let dst_a = dst.child(dst.root(), 1).unwrap();
        assert!(store.has(src_a, dst_a));
        assert!(store.has(src.child(src_a, 0).unwrap(), dst.child(dst_a, 0).unwrap()));
        assert!(store.has(
            src.child(src.root(), 1).unwrap(),
            dst.child(dst.root(), 0).unwrap()
        ));
        assert!(!store.has_src(src.root()));
    }

    #[test]
    fn test_partially_matched_subtrees_are_skipped() {
        let mut types = TypeTable::new();
        let src = types.parse("r(p(q,w))").unwrap();
        let dst = types.parse("r(p(q,w))").unwrap();
        let mut store = MappingStore::new();
        // Pre-existing cross mapping inside the shared subtree.
        let q = src.find_label("q").unwrap();
        let w = dst.find_label("w").unwrap();
        store.link(q, w).unwrap();

        IdenticalSubtreeMatcher
            .match_trees(&src, &dst, &mut store)
            .unwrap();
        assert!(store.check_bijective());
        assert!(store.has(q, w), "existing mappings are never replaced");
        assert!(!store.has_src(src.root()), "enclosing subtree is not whole");
    }
}
