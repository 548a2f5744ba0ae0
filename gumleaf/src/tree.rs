//! Ordered, labeled trees stored in an [`indextree::Arena`].
//!
//! A [`Tree`] is assembled with a [`TreeBuilder`] and frozen by
//! [`TreeBuilder::build`], which computes every derived metric once: subtree
//! size, height, depth, leaf count, structural hash, pre/post-order indices and
//! position among siblings. Matchers only ever read trees.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::ops::Range;
use std::collections::VecDeque;

use indextree::Arena;
pub use indextree::NodeId;
use rapidhash::RapidHasher;
use smallvec::SmallVec;

use crate::error::{MatchError, Result};

/// Structural hash of a subtree (type, label and children, recursively).
pub type NodeHash = u64;

/// Opaque node type tag. Type taxonomies (grammar kinds, AST classes) live
/// outside the engine; matchers only compare tags for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeType(pub u32);

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for NodeType {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Metrics {
    size: usize,
    height: usize,
    depth: usize,
    leaves: usize,
    hash: NodeHash,
    pre: usize,
    post: usize,
    position: usize,
}

/// Data stored in each arena node.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// The node's type tag.
    pub node_type: NodeType,
    /// The node's label (identifier name, literal text...). May be empty.
    pub label: String,
    span: Option<Range<usize>>,
    metadata: Vec<(String, String)>,
    metrics: Metrics,
}

impl NodeData {
    fn new(node_type: NodeType, label: String) -> Self {
        Self {
            node_type,
            label,
            span: None,
            metadata: Vec::new(),
            metrics: Metrics::default(),
        }
    }
}

/// Read access to an ordered labeled tree.
///
/// Node ids are `indextree` ids; `usize::from(id)` is the node's stable
/// integer id within its tree. All traversals are lazy, finite and can be
/// restarted by calling the method again.
pub trait DiffTree {
    /// The root node.
    fn root(&self) -> NodeId;

    /// Total number of nodes.
    fn node_count(&self) -> usize;

    /// Type tag of a node.
    fn node_type(&self, id: NodeId) -> NodeType;

    /// Label of a node.
    fn label(&self, id: NodeId) -> &str;

    /// Structural hash of the subtree rooted at `id`.
    fn hash(&self, id: NodeId) -> NodeHash;

    /// Parent of a node, `None` for the root.
    fn parent(&self, id: NodeId) -> Option<NodeId>;

    /// Children in order.
    fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_;

    /// Number of children.
    fn child_count(&self, id: NodeId) -> usize;

    /// Index among the parent's children (0 for the root).
    fn position(&self, id: NodeId) -> usize;

    /// Height of the subtree; leaves have height 0.
    fn height(&self, id: NodeId) -> usize;

    /// Number of nodes in the subtree, `id` included.
    fn size(&self, id: NodeId) -> usize;

    /// Distance from the root; the root has depth 0.
    fn depth(&self, id: NodeId) -> usize;

    /// Number of leaves strictly below `id` (0 for a leaf).
    fn leaf_count(&self, id: NodeId) -> usize;

    /// Index of `id` in the pre-order traversal.
    fn pre_order_index(&self, id: NodeId) -> usize;

    /// Index of `id` in the post-order traversal.
    fn post_order_index(&self, id: NodeId) -> usize;

    /// Pre-order traversal of the whole tree.
    fn iter(&self) -> impl Iterator<Item = NodeId> + '_;

    /// Post-order traversal of the whole tree.
    fn post_order(&self) -> impl Iterator<Item = NodeId> + '_;

    /// Proper descendants of `id` (excluding `id`) in pre-order.
    fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_;

    /// Breadth-first traversal of the whole tree.
    fn breadth_first(&self) -> impl Iterator<Item = NodeId> + '_ {
        BreadthFirst::new(self)
    }

    /// The `index`-th child of `id`.
    fn child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.children(id).nth(index)
    }

    /// Whether `id` has no children.
    fn is_leaf(&self, id: NodeId) -> bool {
        self.child_count(id) == 0
    }

    /// Whether `node` lies strictly below `ancestor`.
    fn is_descendant(&self, ancestor: NodeId, node: NodeId) -> bool {
        let a = self.pre_order_index(ancestor);
        let n = self.pre_order_index(node);
        n > a && n < a + self.size(ancestor)
    }

    /// Proper ancestors of `id`, nearest first.
    fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        core::iter::successors(self.parent(id), move |&p| self.parent(p))
    }

    /// All leaves in post-order.
    fn leaves(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.post_order().filter(move |&id| self.is_leaf(id))
    }
}

/// Optional per-node capabilities that not every tree provides.
///
/// Wrappers that do not override a method report
/// [`MatchError::UnsupportedCapability`].
pub trait TreeMetadata: DiffTree {
    /// Byte range of the node in its source text, if recorded.
    fn span(&self, _id: NodeId) -> Result<Option<Range<usize>>> {
        Err(MatchError::UnsupportedCapability { capability: "span" })
    }

    /// A string metadata entry attached to the node.
    fn metadata(&self, _id: NodeId, _key: &str) -> Result<Option<&str>> {
        Err(MatchError::UnsupportedCapability {
            capability: "metadata",
        })
    }
}

/// Breadth-first iterator over any [`DiffTree`].
pub struct BreadthFirst<'a, T: DiffTree + ?Sized> {
    tree: &'a T,
    queue: VecDeque<NodeId>,
}

impl<'a, T: DiffTree + ?Sized> BreadthFirst<'a, T> {
    fn new(tree: &'a T) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(tree.root());
        Self { tree, queue }
    }
}

impl<T: DiffTree + ?Sized> Iterator for BreadthFirst<'_, T> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.queue.pop_front()?;
        self.queue.extend(self.tree.children(id));
        Some(id)
    }
}

/// An immutable tree with precomputed metrics.
#[derive(Debug, Clone)]
pub struct Tree {
    arena: Arena<NodeData>,
    root: NodeId,
    pre_order: Vec<NodeId>,
    post_order: Vec<NodeId>,
}

impl Tree {
    /// Node data for `id`.
    pub fn data(&self, id: NodeId) -> &NodeData {
        self.arena[id].get()
    }

    fn metrics(&self, id: NodeId) -> &Metrics {
        &self.arena[id].get().metrics
    }

    /// The underlying arena.
    pub fn arena(&self) -> &Arena<NodeData> {
        &self.arena
    }

    /// Flattened pre-order node list.
    pub fn nodes(&self) -> &[NodeId] {
        &self.pre_order
    }

    /// Follow child indices from the root (`&[]` is the root itself).
    pub fn node_at_path(&self, path: &[usize]) -> Option<NodeId> {
        path.iter()
            .try_fold(self.root, |id, &index| self.child(id, index))
    }

    /// First node in pre-order carrying `label`.
    pub fn find_label(&self, label: &str) -> Option<NodeId> {
        self.pre_order
            .iter()
            .copied()
            .find(|&id| self.data(id).label == label)
    }
}

impl DiffTree for Tree {
    fn root(&self) -> NodeId {
        self.root
    }

    fn node_count(&self) -> usize {
        self.pre_order.len()
    }

    fn node_type(&self, id: NodeId) -> NodeType {
        self.data(id).node_type
    }

    fn label(&self, id: NodeId) -> &str {
        &self.data(id).label
    }

    fn hash(&self, id: NodeId) -> NodeHash {
        self.metrics(id).hash
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].parent()
    }

    fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.children(&self.arena)
    }

    fn child_count(&self, id: NodeId) -> usize {
        id.children(&self.arena).count()
    }

    fn position(&self, id: NodeId) -> usize {
        self.metrics(id).position
    }

    fn height(&self, id: NodeId) -> usize {
        self.metrics(id).height
    }

    fn size(&self, id: NodeId) -> usize {
        self.metrics(id).size
    }

    fn depth(&self, id: NodeId) -> usize {
        self.metrics(id).depth
    }

    fn leaf_count(&self, id: NodeId) -> usize {
        self.metrics(id).leaves
    }

    fn pre_order_index(&self, id: NodeId) -> usize {
        self.metrics(id).pre
    }

    fn post_order_index(&self, id: NodeId) -> usize {
        self.metrics(id).post
    }

    fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.pre_order.iter().copied()
    }

    fn post_order(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.post_order.iter().copied()
    }

    fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let m = self.metrics(id);
        self.pre_order[m.pre + 1..m.pre + m.size].iter().copied()
    }

    fn is_leaf(&self, id: NodeId) -> bool {
        self.metrics(id).size == 1
    }
}

impl TreeMetadata for Tree {
    fn span(&self, id: NodeId) -> Result<Option<Range<usize>>> {
        Ok(self.data(id).span.clone())
    }

    fn metadata(&self, id: NodeId, key: &str) -> Result<Option<&str>> {
        Ok(self
            .data(id)
            .metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str()))
    }
}

/// Incrementally assembles a [`Tree`].
#[derive(Debug)]
pub struct TreeBuilder {
    arena: Arena<NodeData>,
    root: NodeId,
}

impl TreeBuilder {
    /// Start a tree with the given root.
    pub fn new(node_type: NodeType, label: impl Into<String>) -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(NodeData::new(node_type, label.into()));
        Self { arena, root }
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Append a child as the last child of `parent`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        node_type: NodeType,
        label: impl Into<String>,
    ) -> Result<NodeId> {
        self.node_mut(parent)?;
        let child = self
            .arena
            .new_node(NodeData::new(node_type, label.into()));
        parent
            .checked_append(child, &mut self.arena)
            .map_err(|e| MatchError::Input(format!("cannot attach node: {e}")))?;
        Ok(child)
    }

    /// Record the source byte range of a node.
    pub fn set_span(&mut self, id: NodeId, span: Range<usize>) -> Result<()> {
        self.node_mut(id)?.span = Some(span);
        Ok(())
    }

    /// Attach (or replace) a string metadata entry.
    pub fn set_metadata(
        &mut self,
        id: NodeId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        let key = key.into();
        let value = value.into();
        let data = self.node_mut(id)?;
        match data.metadata.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => data.metadata.push((key, value)),
        }
        Ok(())
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        match self.arena.get_mut(id) {
            Some(node) if !node.is_removed() => Ok(node.get_mut()),
            _ => Err(MatchError::Input(format!(
                "node {} does not belong to this tree",
                usize::from(id)
            ))),
        }
    }

    /// Freeze the tree, computing all derived metrics.
    pub fn build(self) -> Tree {
        let TreeBuilder { mut arena, root } = self;
        let pre_order: Vec<NodeId> = root.descendants(&arena).collect();

        // Top-down: depth, pre-order index, sibling position.
        for (pre, &id) in pre_order.iter().enumerate() {
            let depth = arena[id]
                .parent()
                .map_or(0, |p| arena[p].get().metrics.depth + 1);
            let children: SmallVec<[NodeId; 8]> = id.children(&arena).collect();
            let metrics = &mut arena[id].get_mut().metrics;
            metrics.pre = pre;
            metrics.depth = depth;
            for (position, child) in children.into_iter().enumerate() {
                arena[child].get_mut().metrics.position = position;
            }
        }

        // Bottom-up: size, height, leaves, hash. Reverse pre-order visits
        // every child before its parent.
        for &id in pre_order.iter().rev() {
            let mut size = 1;
            let mut height = 0;
            let mut leaves = 0;
            let mut child_count = 0usize;
            let mut hasher = RapidHasher::default();
            let data = arena[id].get();
            data.node_type.hash(&mut hasher);
            data.label.hash(&mut hasher);
            for child in id.children(&arena) {
                let cm = &arena[child].get().metrics;
                size += cm.size;
                height = height.max(cm.height + 1);
                leaves += if cm.size == 1 { 1 } else { cm.leaves };
                hasher.write_u64(cm.hash);
                child_count += 1;
            }
            hasher.write_usize(child_count);

            let metrics = &mut arena[id].get_mut().metrics;
            metrics.size = size;
            metrics.height = height;
            metrics.leaves = leaves;
            metrics.hash = hasher.finish();
            // Nodes preceding `id` in post-order: its descendants, plus every
            // pre-order predecessor that is not an ancestor.
            metrics.post = metrics.pre + size - 1 - metrics.depth;
        }

        let mut post_order = vec![root; pre_order.len()];
        for &id in &pre_order {
            post_order[arena[id].get().metrics.post] = id;
        }

        Tree {
            arena,
            root,
            pre_order,
            post_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `a(b(c,d),e)` built by hand.
    fn small_tree() -> (Tree, [NodeId; 5]) {
        let mut builder = TreeBuilder::new(NodeType(0), "a");
        let a = builder.root();
        let b = builder.add_child(a, NodeType(1), "b").unwrap();
        let c = builder.add_child(b, NodeType(2), "c").unwrap();
        let d = builder.add_child(b, NodeType(3), "d").unwrap();
        let e = builder.add_child(a, NodeType(4), "e").unwrap();
        (builder.build(), [a, b, c, d, e])
    }

    #[test]
    fn test_metrics() {
        let (tree, [a, b, c, d, e]) = small_tree();
        assert_eq!(tree.node_count(), 5);
        assert_eq!(
            [a, b, c, d, e].map(|n| tree.size(n)),
            [5, 3, 1, 1, 1],
            "sizes"
        );
        assert_eq!(
            [a, b, c, d, e].map(|n| tree.height(n)),
            [2, 1, 0, 0, 0],
            "heights"
        );
        assert_eq!(
            [a, b, c, d, e].map(|n| tree.depth(n)),
            [0, 1, 2, 2, 1],
            "depths"
        );
        assert_eq!(
            [a, b, c, d, e].map(|n| tree.post_order_index(n)),
            [4, 2, 0, 1, 3],
            "post-order numbering"
        );
        assert_eq!(tree.leaf_count(a), 3);
        assert_eq!(tree.leaf_count(b), 2);
        assert_eq!(tree.leaf_count(c), 0);
        assert_eq!(tree.position(d), 1);
        assert_eq!(tree.position(e), 1);
    }

    #[test]
    fn test_traversals() {
        let (tree, [a, b, c, d, e]) = small_tree();
        assert_eq!(tree.iter().collect::<Vec<_>>(), vec![a, b, c, d, e]);
        assert_eq!(tree.post_order().collect::<Vec<_>>(), vec![c, d, b, e, a]);
        assert_eq!(
            tree.breadth_first().collect::<Vec<_>>(),
            vec![a, b, e, c, d]
        );
        // Restartable
        assert_eq!(tree.breadth_first().count(), 5);
        assert_eq!(tree.descendants(b).collect::<Vec<_>>(), vec![c, d]);
        assert_eq!(tree.leaves().collect::<Vec<_>>(), vec![c, d, e]);
        assert_eq!(tree.ancestors(d).collect::<Vec<_>>(), vec![b, a]);
        assert!(tree.is_descendant(a, d));
        assert!(!tree.is_descendant(b, e));
        assert!(!tree.is_descendant(b, b));
        assert_eq!(tree.node_at_path(&[0, 1]), Some(d));
        assert_eq!(tree.node_at_path(&[2]), None);
    }

    #[test]
    fn test_identical_subtrees_share_hash() {
        let mut builder = TreeBuilder::new(NodeType(0), "root");
        let root = builder.root();
        let left = builder.add_child(root, NodeType(1), "x").unwrap();
        builder.add_child(left, NodeType(2), "leaf").unwrap();
        let right = builder.add_child(root, NodeType(1), "x").unwrap();
        builder.add_child(right, NodeType(2), "leaf").unwrap();
        let other = builder.add_child(root, NodeType(1), "x").unwrap();
        builder.add_child(other, NodeType(2), "other").unwrap();
        let tree = builder.build();

        assert_eq!(tree.hash(left), tree.hash(right));
        assert_ne!(tree.hash(left), tree.hash(other));
    }

    #[test]
    fn test_foreign_parent_is_rejected() {
        let mut big = TreeBuilder::new(NodeType(0), "r");
        let mut last = big.root();
        for _ in 0..4 {
            last = big.add_child(last, NodeType(0), "n").unwrap();
        }

        let mut small = TreeBuilder::new(NodeType(0), "r");
        let err = small.add_child(last, NodeType(0), "x").unwrap_err();
        assert!(matches!(err, MatchError::Input(_)), "got {err:?}");
    }

    #[test]
    fn test_metadata_capability() {
        let mut builder = TreeBuilder::new(NodeType(0), "r");
        let root = builder.root();
        builder.set_span(root, 0..12).unwrap();
        builder.set_metadata(root, "file", "a.java").unwrap();
        builder.set_metadata(root, "file", "b.java").unwrap();
        let tree = builder.build();

        assert_eq!(tree.span(root).unwrap(), Some(0..12));
        assert_eq!(tree.metadata(root, "file").unwrap(), Some("b.java"));
        assert_eq!(tree.metadata(root, "missing").unwrap(), None);
    }

    /// A tree wrapper that only forwards the required methods.
    struct Plain(Tree);

    impl DiffTree for Plain {
        fn root(&self) -> NodeId {
            self.0.root()
        }
        fn node_count(&self) -> usize {
            self.0.node_count()
        }
        fn node_type(&self, id: NodeId) -> NodeType {
            self.0.node_type(id)
        }
        fn label(&self, id: NodeId) -> &str {
            self.0.label(id)
        }
        fn hash(&self, id: NodeId) -> NodeHash {
            self.0.hash(id)
        }
        fn parent(&self, id: NodeId) -> Option<NodeId> {
            self.0.parent(id)
        }
        fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
            self.0.children(id)
        }
        fn child_count(&self, id: NodeId) -> usize {
            self.0.child_count(id)
        }
        fn position(&self, id: NodeId) -> usize {
            self.0.position(id)
        }
        fn height(&self, id: NodeId) -> usize {
            self.0.height(id)
        }
        fn size(&self, id: NodeId) -> usize {
            self.0.size(id)
        }
        fn depth(&self, id: NodeId) -> usize {
            self.0.depth(id)
        }
        fn leaf_count(&self, id: NodeId) -> usize {
            self.0.leaf_count(id)
        }
        fn pre_order_index(&self, id: NodeId) -> usize {
            self.0.pre_order_index(id)
        }
        fn post_order_index(&self, id: NodeId) -> usize {
            self.0.post_order_index(id)
        }
        fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
            self.0.iter()
        }
        fn post_order(&self) -> impl Iterator<Item = NodeId> + '_ {
            self.0.post_order()
        }
        fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
            self.0.descendants(id)
        }
    }

    impl TreeMetadata for Plain {}

    #[test]
    fn test_wrapper_reports_unsupported_capability() {
        let (tree, [a, ..]) = small_tree();
        let plain = Plain(tree);
        assert_eq!(
            plain.span(a).unwrap_err(),
            MatchError::UnsupportedCapability { capability: "span" }
        );
        assert!(matches!(
            plain.metadata(a, "k"),
            Err(MatchError::UnsupportedCapability { .. })
        ));
        // Provided traversals work on wrappers too.
        assert_eq!(plain.breadth_first().count(), 5);
    }
}
