//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use gumleaf::{DiffTree, LabelConfiguration, MappingStore, NodeType, Tree, TreeBuilder, TypeTable};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Install a test-writer subscriber once. Honors `RUST_LOG`.
pub fn setup() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn labels() -> Arc<LabelConfiguration> {
    Arc::new(LabelConfiguration::default())
}

pub fn parse_pair(src: &str, dst: &str) -> (Tree, Tree) {
    let mut types = TypeTable::new();
    let src = types.parse(src).unwrap();
    let dst = types.parse(dst).unwrap();
    (src, dst)
}

/// The small pair used throughout the matcher docs.
pub fn dummy_pair() -> (Tree, Tree) {
    parse_pair("a(b(c,d),e)", "a(f(b(c,d),h(i)),j)")
}

/// Two leaves that swapped places.
pub fn crossed_pair() -> (Tree, Tree) {
    parse_pair("r(x:foo,x:bar)", "r(x:bar,x:foo)")
}

/// Label pairs of a store, in source id order.
pub fn label_pairs<'a>(src: &'a Tree, dst: &'a Tree, store: &MappingStore) -> Vec<(&'a str, &'a str)> {
    store
        .pairs()
        .map(|m| (src.label(m.src), dst.label(m.dst)))
        .collect()
}

#[derive(Debug, Clone)]
struct Shape {
    ty: u32,
    label: String,
    children: Vec<Shape>,
}

const TYPES: u32 = 5;
const WORDS: &[&str] = &[
    "count", "counter", "index", "value", "values", "total", "sum", "name", "names", "item",
];

fn random_label(rng: &mut StdRng) -> String {
    let word = WORDS[rng.random_range(0..WORDS.len())];
    if rng.random_bool(0.3) {
        format!("{word}{}", rng.random_range(0..10))
    } else {
        word.to_owned()
    }
}

fn random_shape(rng: &mut StdRng, depth: usize, budget: &mut usize) -> Shape {
    let ty = rng.random_range(0..TYPES);
    let mut children = Vec::new();
    if depth < 5 && *budget > 0 && rng.random_bool(0.6) {
        let fan_out = rng.random_range(1..=4);
        for _ in 0..fan_out {
            if *budget == 0 {
                break;
            }
            *budget -= 1;
            children.push(random_shape(rng, depth + 1, budget));
        }
    }
    let label = if children.is_empty() {
        random_label(rng)
    } else {
        format!("t{ty}")
    };
    Shape { ty, label, children }
}

/// Relabel some leaves, drop some subtrees and shuffle some child lists.
fn mutate(rng: &mut StdRng, shape: &Shape) -> Shape {
    let mut children = Vec::with_capacity(shape.children.len());
    for child in &shape.children {
        if rng.random_bool(0.1) {
            continue;
        }
        children.push(mutate(rng, child));
    }
    if rng.random_bool(0.2) {
        children.shuffle(rng);
    }
    let label = if shape.children.is_empty() && rng.random_bool(0.2) {
        random_label(rng)
    } else {
        shape.label.clone()
    };
    Shape {
        ty: shape.ty,
        label,
        children,
    }
}

fn build(shape: &Shape) -> Tree {
    fn add(builder: &mut TreeBuilder, parent: gumleaf::NodeId, shape: &Shape) {
        let id = builder
            .add_child(parent, NodeType(shape.ty), shape.label.clone())
            .unwrap();
        for child in &shape.children {
            add(builder, id, child);
        }
    }
    let mut builder = TreeBuilder::new(NodeType(shape.ty), shape.label.clone());
    let root = builder.root();
    for child in &shape.children {
        add(&mut builder, root, child);
    }
    builder.build()
}

/// A random source tree of at most `size + 1` nodes and a mutated copy of it.
pub fn random_pair(seed: u64, size: usize) -> (Tree, Tree) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut budget = size;
    let src = random_shape(&mut rng, 0, &mut budget);
    let dst = mutate(&mut rng, &src);
    (build(&src), build(&dst))
}
