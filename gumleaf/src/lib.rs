//! # gumleaf
//!
//! Node matching between two ordered, labeled trees, in the style of
//! GumTree and ChangeDistiller.
//!
//! A *matcher* reads a source and a destination tree and adds pairs to a
//! shared [`MappingStore`], which keeps the mapping one-to-one. Matchers are
//! chained by a [`Pipeline`]; each stage only adds to (or repairs) what the
//! previous ones produced. The crate stops at the mapping: edit scripts are
//! derived from it elsewhere.
//!
//! ## Stages
//!
//! - **identical**: identical subtrees by structural hash
//! - **gt-subtree / gt-bottom-up**: GumTree greedy top-down and bottom-up
//! - **cd-leaves / cd-bottom-up**: ChangeDistiller leaf pairing by trigram
//!   similarity, then inner nodes by common-leaf ratio
//! - **cd-opt**: label-aware ChangeDistiller variant
//! - **rted**: minimal tree edit distance mapping (Zhang-Shasha)
//! - **lcs**: realignment of leftovers under mapped ancestors
//! - **repair**: fine-grained fix-ups of orphans, parents and moved leaves
//!
//! The published compositions are available as [`Preset`]s, e.g.
//! [`Preset::CdAbcde`] runs identical, ChangeDistiller, LCS and repair.
//!
//! ## Usage
//!
//! ```
//! use gumleaf::{match_trees, DiffTree, LabelConfiguration, TypeTable};
//! use std::sync::Arc;
//!
//! let mut types = TypeTable::new();
//! let src = types.parse("call(name:foo,arg:x)").unwrap();
//! let dst = types.parse("call(name:foo,arg:y,arg:x)").unwrap();
//!
//! let store = match_trees(&src, &dst, Arc::new(LabelConfiguration::default())).unwrap();
//! assert!(store.check_bijective());
//! assert!(store.has(src.root(), dst.root()));
//! ```

#![warn(missing_docs)]
#![warn(clippy::std_instead_of_core)]

use std::sync::Arc;

pub use indextree;

mod tracing_macros;
pub(crate) use tracing_macros::{debug, trace, warn_log};

/// Matcher thresholds, weights and limits
pub mod config;
/// Error type
pub mod error;
/// One-to-one node mappings
pub mod mapping;
/// Matching stages
pub mod matchers;
/// Compact textual tree notation for tests and tools
pub mod notation;
/// Stage composition and presets
pub mod pipeline;
/// Label and structure similarity measures
pub mod similarity;
/// Tree representation
pub mod tree;

pub use config::{MatcherConfig, OptimizedConfig};
pub use error::{MatchError, Result};
pub use mapping::{Mapping, MappingStore};
pub use matchers::{Matcher, MatchingCandidate};
pub use notation::TypeTable;
pub use pipeline::{Pipeline, Preset, Stage};
pub use similarity::{CompareClass, LabelComparator, LabelConfiguration};
pub use tree::{DiffTree, NodeHash, NodeId, NodeType, Tree, TreeBuilder, TreeMetadata};

/// Match two trees with the default configuration and the `CD_ABCDE` preset.
pub fn match_trees(
    src: &Tree,
    dst: &Tree,
    labels: Arc<LabelConfiguration>,
) -> Result<MappingStore> {
    Pipeline::preset(Preset::CdAbcde, &MatcherConfig::default(), labels)?.run(src, dst)
}
