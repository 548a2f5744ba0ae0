//! Structural similarity of two subtrees, measured through the mapped pairs
//! among their descendants.

use crate::mapping::MappingStore;
use crate::tree::{DiffTree, NodeId};

#[cfg(feature = "matching-stats")]
use core::cell::Cell;

#[cfg(feature = "matching-stats")]
thread_local! {
    static EVALUATIONS: Cell<usize> = const { Cell::new(0) };
}

/// Reset the structural evaluation counter of the current thread.
#[cfg(feature = "matching-stats")]
pub fn reset_stats() {
    EVALUATIONS.with(|c| c.set(0));
}

/// Number of [`CommonDescendants::compute`] calls on the current thread since
/// the last reset.
#[cfg(feature = "matching-stats")]
pub fn get_stats() -> usize {
    EVALUATIONS.with(Cell::get)
}

/// Descendant counts of a `(src, dst)` pair and how many source descendants
/// are mapped into the destination subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonDescendants {
    /// Source descendants mapped to a destination descendant.
    pub common: usize,
    /// Proper descendants of the source node.
    pub src: usize,
    /// Proper descendants of the destination node.
    pub dst: usize,
}

impl CommonDescendants {
    /// Count the shared descendants of `a` (in `src`) and `b` (in `dst`).
    pub fn compute<T: DiffTree>(
        src: &T,
        dst: &T,
        a: NodeId,
        b: NodeId,
        store: &MappingStore,
    ) -> Self {
        #[cfg(feature = "matching-stats")]
        EVALUATIONS.with(|c| c.set(c.get() + 1));

        let mut common = 0;
        let mut src_count = 0;
        for d in src.descendants(a) {
            src_count += 1;
            if let Some(m) = store.get_dst(d)
                && dst.is_descendant(b, m)
            {
                common += 1;
            }
        }
        Self {
            common,
            src: src_count,
            dst: dst.size(b) - 1,
        }
    }

    /// `common / max(|src|, |dst|)`.
    pub fn chawathe(&self) -> f64 {
        ratio(self.common, self.src.max(self.dst))
    }

    /// `2 common / (|src| + |dst|)`.
    pub fn dice(&self) -> f64 {
        ratio(2 * self.common, self.src + self.dst)
    }

    /// `common / |src ∪ dst|`.
    pub fn jaccard(&self) -> f64 {
        ratio(self.common, self.src + self.dst - self.common)
    }

    /// `common / min(|src|, |dst|)`.
    pub fn overlap(&self) -> f64 {
        ratio(self.common, self.src.min(self.dst))
    }
}

/// Two empty descendant sets are identical.
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        1.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::TypeTable;

    #[test]
    fn test_measures() {
        let mut types = TypeTable::new();
        let src = types.parse("a(b(c,d),e)").unwrap();
        let dst = types.parse("a(f(b(c,d),h(i)),j)").unwrap();
        let mut store = MappingStore::new();
        for label in ["b", "c", "d"] {
            store
                .link(src.find_label(label).unwrap(), dst.find_label(label).unwrap())
                .unwrap();
        }

        let counts = CommonDescendants::compute(&src, &dst, src.root(), dst.root(), &store);
        assert_eq!(
            counts,
            CommonDescendants {
                common: 3,
                src: 4,
                dst: 7
            }
        );
        assert!((counts.chawathe() - 3.0 / 7.0).abs() < 1e-12);
        assert!((counts.dice() - 6.0 / 11.0).abs() < 1e-12);
        assert!((counts.jaccard() - 3.0 / 8.0).abs() < 1e-12);
        assert!((counts.overlap() - 3.0 / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_mapped_outside_subtree_does_not_count() {
        let mut types = TypeTable::new();
        let src = types.parse("r(x(l),y)").unwrap();
        let dst = types.parse("r(x,y(l))").unwrap();
        let mut store = MappingStore::new();
        store
            .link(src.find_label("l").unwrap(), dst.find_label("l").unwrap())
            .unwrap();

        let x_src = src.find_label("x").unwrap();
        let x_dst = dst.find_label("x").unwrap();
        let counts = CommonDescendants::compute(&src, &dst, x_src, x_dst, &store);
        assert_eq!(counts.common, 0);
        assert_eq!(counts.chawathe(), 0.0);
    }
}
