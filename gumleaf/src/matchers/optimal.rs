//! Minimal tree edit distance mapping (Zhang–Shasha keyroot dynamic program).
//!
//! The program runs either on the trees as given (left-path decomposition) or
//! on both trees mirrored (right-path decomposition), whichever needs fewer
//! forest-distance cells. Mirroring both trees leaves the edit distance and
//! the set of optimal mappings unchanged.

use rapidhash::{RapidHashMap as HashMap, RapidHashSet as HashSet};
use smallvec::SmallVec;

use super::{Matcher, link};
use crate::config::MatcherConfig;
use crate::error::{MatchError, Result};
use crate::mapping::MappingStore;
use crate::tree::{DiffTree, NodeId};
use crate::{debug, trace};

const EPSILON: f64 = 1e-9;

/// Tree edit distance matcher.
///
/// Deletions and insertions cost 1. Relabeling costs nothing between equal
/// type and label, `relabel_cost` between equal types, and is impossible
/// between different types.
#[derive(Debug, Clone, Copy)]
pub struct OptimalMatcher {
    relabel_cost: f64,
    size_limit: usize,
}

impl OptimalMatcher {
    /// Matcher with explicit costs and a bound on `|src| * |dst|`.
    pub fn new(relabel_cost: f64, size_limit: usize) -> Self {
        Self {
            relabel_cost,
            size_limit,
        }
    }

    /// Matcher configured from `config`.
    pub fn from_config(config: &MatcherConfig) -> Self {
        Self::new(config.relabel_cost, config.optimal_size_limit)
    }

    /// Edit distance between `src` and `dst`.
    pub fn tree_distance<T: DiffTree>(&self, src: &T, dst: &T) -> Result<f64> {
        let mut zs = self.prepare(src, dst)?;
        Ok(zs.distance())
    }

    fn prepare<'a, T: DiffTree>(&self, src: &'a T, dst: &'a T) -> Result<ZhangShasha<'a, T>> {
        let (n, m) = (src.node_count(), dst.node_count());
        let cells = n.checked_mul(m).filter(|&cells| cells <= self.size_limit);
        if cells.is_none() {
            return Err(MatchError::Configuration(format!(
                "optimal matcher: {n} x {m} nodes exceeds the limit of {} cells",
                self.size_limit
            )));
        }

        let (left_a, left_b) = (ZsTree::new(src, false), ZsTree::new(dst, false));
        let (right_a, right_b) = (ZsTree::new(src, true), ZsTree::new(dst, true));
        let left = left_a.keyroot_cells() * left_b.keyroot_cells();
        let right = right_a.keyroot_cells() * right_b.keyroot_cells();
        let mirrored = right < left;
        debug!(left, right, mirrored, "optimal: decomposition chosen");

        let (a, b) = if mirrored {
            (right_a, right_b)
        } else {
            (left_a, left_b)
        };
        Ok(ZhangShasha::new(src, dst, a, b, self.relabel_cost))
    }
}

impl<T: DiffTree> Matcher<T> for OptimalMatcher {
    fn name(&self) -> &'static str {
        "rted"
    }

    fn match_trees(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        let mut zs = self.prepare(src, dst)?;
        #[cfg(feature = "tracing")]
        let before = store.len();
        for (s, d) in zs.mapping() {
            if src.node_type(s) == dst.node_type(d) && !store.has_src(s) && !store.has_dst(d) {
                link(store, s, d)?;
            }
        }
        debug!(
            distance = zs.distance(),
            added = store.len() - before,
            "optimal matcher done"
        );
        Ok(())
    }
}

/// Post-order numbering (1-based) with leftmost leaf descendants and keyroots.
struct ZsTree {
    nodes: Vec<NodeId>,
    lld: Vec<usize>,
    keyroots: Vec<usize>,
}

impl ZsTree {
    fn new<T: DiffTree>(tree: &T, mirrored: bool) -> Self {
        // Reversing a right-to-left pre-order gives the post-order.
        let mut nodes = Vec::with_capacity(tree.node_count());
        let mut stack = vec![tree.root()];
        while let Some(n) = stack.pop() {
            nodes.push(n);
            if mirrored {
                let children: SmallVec<[NodeId; 8]> = tree.children(n).collect();
                stack.extend(children.into_iter().rev());
            } else {
                stack.extend(tree.children(n));
            }
        }
        nodes.reverse();

        let index: HashMap<NodeId, usize> =
            nodes.iter().enumerate().map(|(i, &n)| (n, i + 1)).collect();
        let mut lld = vec![0; nodes.len() + 1];
        for (i, &n) in nodes.iter().enumerate() {
            let first = if mirrored {
                tree.children(n).last()
            } else {
                tree.children(n).next()
            };
            lld[i + 1] = match first.and_then(|c| index.get(&c)) {
                Some(&c) => lld[c],
                None => i + 1,
            };
        }

        let mut seen = HashSet::default();
        let mut keyroots: Vec<usize> = (1..=nodes.len()).rev().filter(|&i| seen.insert(lld[i])).collect();
        keyroots.reverse();

        Self {
            nodes,
            lld,
            keyroots,
        }
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn node(&self, i: usize) -> NodeId {
        self.nodes[i - 1]
    }

    fn keyroot_cells(&self) -> u128 {
        self.keyroots
            .iter()
            .map(|&k| (k - self.lld[k] + 1) as u128)
            .sum()
    }
}

struct ZhangShasha<'a, T> {
    src: &'a T,
    dst: &'a T,
    a: ZsTree,
    b: ZsTree,
    relabel_cost: f64,
    width: usize,
    td: Vec<f64>,
    fd: Vec<f64>,
    solved: bool,
}

impl<'a, T: DiffTree> ZhangShasha<'a, T> {
    fn new(src: &'a T, dst: &'a T, a: ZsTree, b: ZsTree, relabel_cost: f64) -> Self {
        let width = b.len() + 1;
        let cells = (a.len() + 1) * width;
        Self {
            src,
            dst,
            a,
            b,
            relabel_cost,
            width,
            td: vec![0.0; cells],
            fd: vec![0.0; cells],
            solved: false,
        }
    }

    fn at(&self, i: usize, j: usize) -> usize {
        i * self.width + j
    }

    fn relabel(&self, i: usize, j: usize) -> f64 {
        let (s, d) = (self.a.node(i), self.b.node(j));
        if self.src.node_type(s) != self.dst.node_type(d) {
            f64::INFINITY
        } else if self.src.label(s) == self.dst.label(d) {
            0.0
        } else {
            self.relabel_cost
        }
    }

    /// Fill the forest distances of the subtrees rooted at `i` and `j`.
    fn forest_distance(&mut self, i: usize, j: usize) {
        let (li, lj) = (self.a.lld[i], self.b.lld[j]);
        let origin = self.at(li - 1, lj - 1);
        self.fd[origin] = 0.0;
        for x in li..=i {
            let (cell, up) = (self.at(x, lj - 1), self.at(x - 1, lj - 1));
            self.fd[cell] = self.fd[up] + 1.0;
        }
        for y in lj..=j {
            let (cell, left) = (self.at(li - 1, y), self.at(li - 1, y - 1));
            self.fd[cell] = self.fd[left] + 1.0;
        }

        for x in li..=i {
            for y in lj..=j {
                let delete = self.fd[self.at(x - 1, y)] + 1.0;
                let insert = self.fd[self.at(x, y - 1)] + 1.0;
                let cell = self.at(x, y);
                if self.a.lld[x] == li && self.b.lld[y] == lj {
                    let relabel = self.fd[self.at(x - 1, y - 1)] + self.relabel(x, y);
                    let best = delete.min(insert).min(relabel);
                    self.fd[cell] = best;
                    self.td[cell] = best;
                } else {
                    let prefix = self.at(self.a.lld[x] - 1, self.b.lld[y] - 1);
                    let subtree = self.fd[prefix] + self.td[cell];
                    self.fd[cell] = delete.min(insert).min(subtree);
                }
            }
        }
    }

    fn distance(&mut self) -> f64 {
        if !self.solved {
            let a_roots = self.a.keyroots.clone();
            let b_roots = self.b.keyroots.clone();
            for &i in &a_roots {
                for &j in &b_roots {
                    self.forest_distance(i, j);
                }
            }
            self.solved = true;
        }
        self.td[self.at(self.a.len(), self.b.len())]
    }

    /// Pairs aligned by one optimal edit script.
    fn mapping(&mut self) -> Vec<(NodeId, NodeId)> {
        self.distance();
        let mut pairs = Vec::new();
        let mut pending = vec![(self.a.len(), self.b.len())];

        while let Some((last_i, last_j)) = pending.pop() {
            self.forest_distance(last_i, last_j);
            let (first_i, first_j) = (self.a.lld[last_i] - 1, self.b.lld[last_j] - 1);
            let (mut i, mut j) = (last_i, last_j);

            while i > first_i || j > first_j {
                let here = self.fd[self.at(i, j)];
                if i > first_i && approx_eq(self.fd[self.at(i - 1, j)] + 1.0, here) {
                    i -= 1;
                } else if j > first_j && approx_eq(self.fd[self.at(i, j - 1)] + 1.0, here) {
                    j -= 1;
                } else if self.a.lld[i] == self.a.lld[last_i] && self.b.lld[j] == self.b.lld[last_j] {
                    let (s, d) = (self.a.node(i), self.b.node(j));
                    trace!(src = usize::from(s), dst = usize::from(d), "optimal: aligned");
                    pairs.push((s, d));
                    i -= 1;
                    j -= 1;
                } else {
                    pending.push((i, j));
                    i = self.a.lld[i] - 1;
                    j = self.b.lld[j] - 1;
                }
            }
        }
        pairs
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}
