//! Similarity measures.
//!
//! Label similarity depends on what a node type's label *means*: identifiers
//! and string literals are compared by n-grams, numeric literals by a Gaussian
//! of their difference, enumerated values and booleans by equality. A
//! [`LabelConfiguration`] classifies node types; a [`LabelComparator`]
//! dispatches on that classification.
//!
//! Structural measures ([`CommonDescendants`]) look at the mapping instead of
//! the labels.

mod ngram;
mod numeric;
mod structural;

use std::sync::Arc;

use rapidhash::RapidHashMap as HashMap;

use crate::tree::NodeType;

pub use ngram::NGramCalculator;
pub use numeric::GaussianSimilarity;
pub use structural::CommonDescendants;
#[cfg(feature = "matching-stats")]
pub use structural::{get_stats, reset_stats};

/// How the labels of a node type are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareClass {
    /// Byte equality; mismatches score a fixed penalty.
    Value,
    /// Floating point literals.
    Real,
    /// Integer literals of arbitrary length (within `i128`).
    Integer,
    /// Character n-grams.
    String,
    /// Boolean literals: 1.0 if equal, else 0.5.
    Boolean,
    /// Labels carry no information: always 1.0.
    #[default]
    Default,
}

/// Read-only classification of node types, shared by every stage of a run.
#[derive(Debug, Clone, Default)]
pub struct LabelConfiguration {
    classes: HashMap<NodeType, CompareClass>,
    identifier_type: Option<NodeType>,
    root_type: Option<NodeType>,
    class_type: Option<NodeType>,
    qualifier_type: Option<NodeType>,
    basic_type: Option<NodeType>,
}

impl LabelConfiguration {
    /// Start building a configuration.
    pub fn builder() -> LabelConfigurationBuilder {
        LabelConfigurationBuilder::default()
    }

    /// Comparison class of a type; unlisted types are [`CompareClass::Default`].
    pub fn class_of(&self, ty: NodeType) -> CompareClass {
        self.classes.get(&ty).copied().unwrap_or_default()
    }

    /// Type of identifier nodes.
    pub fn identifier_type(&self) -> Option<NodeType> {
        self.identifier_type
    }

    /// Type of the compilation-unit root.
    pub fn root_type(&self) -> Option<NodeType> {
        self.root_type
    }

    /// Type of class declarations.
    pub fn class_type(&self) -> Option<NodeType> {
        self.class_type
    }

    /// Type of qualified names.
    pub fn qualifier_type(&self) -> Option<NodeType> {
        self.qualifier_type
    }

    /// Type of primitive type references.
    pub fn basic_type(&self) -> Option<NodeType> {
        self.basic_type
    }
}

/// Builder for [`LabelConfiguration`].
#[derive(Debug, Default)]
pub struct LabelConfigurationBuilder {
    config: LabelConfiguration,
}

impl LabelConfigurationBuilder {
    /// Compare the labels of `types` with `class`. Later calls win.
    pub fn classify(mut self, class: CompareClass, types: impl IntoIterator<Item = NodeType>) -> Self {
        for ty in types {
            self.config.classes.insert(ty, class);
        }
        self
    }

    /// Set the identifier type.
    pub fn identifier_type(mut self, ty: NodeType) -> Self {
        self.config.identifier_type = Some(ty);
        self
    }

    /// Set the root type.
    pub fn root_type(mut self, ty: NodeType) -> Self {
        self.config.root_type = Some(ty);
        self
    }

    /// Set the class declaration type.
    pub fn class_type(mut self, ty: NodeType) -> Self {
        self.config.class_type = Some(ty);
        self
    }

    /// Set the qualified name type.
    pub fn qualifier_type(mut self, ty: NodeType) -> Self {
        self.config.qualifier_type = Some(ty);
        self
    }

    /// Set the primitive type reference type.
    pub fn basic_type(mut self, ty: NodeType) -> Self {
        self.config.basic_type = Some(ty);
        self
    }

    /// Finish.
    pub fn build(self) -> LabelConfiguration {
        self.config
    }
}

/// Label-pair cache for one matcher run, keyed by the two labels.
#[derive(Debug, Default)]
pub struct SimilarityCache {
    entries: HashMap<(String, String), f64>,
}

impl SimilarityCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached similarity of `(a, b)`, computing it on a miss.
    pub fn get_or_insert_with(&mut self, a: &str, b: &str, compute: impl FnOnce() -> f64) -> f64 {
        *self
            .entries
            .entry((a.to_owned(), b.to_owned()))
            .or_insert_with(compute)
    }

    /// Fold another cache (a parallel shard's) into this one.
    pub fn merge(&mut self, other: SimilarityCache) {
        self.entries.extend(other.entries);
    }

    /// Number of cached pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Label similarity dispatched through a [`LabelConfiguration`].
#[derive(Debug, Clone)]
pub struct LabelComparator {
    labels: Arc<LabelConfiguration>,
    ngram: NGramCalculator,
    gaussian: GaussianSimilarity,
    leaf_value_mismatch: f64,
    inner_value_mismatch: f64,
}

impl LabelComparator {
    /// Bigram strings, sigma 1 numbers, value mismatches 0.0 (leaves) and
    /// 0.2 (inner nodes).
    pub fn new(labels: Arc<LabelConfiguration>) -> Self {
        Self {
            labels,
            ngram: NGramCalculator::default(),
            gaussian: GaussianSimilarity::default(),
            leaf_value_mismatch: 0.0,
            inner_value_mismatch: 0.2,
        }
    }

    /// Replace the n-gram calculator.
    pub fn with_ngram(mut self, ngram: NGramCalculator) -> Self {
        self.ngram = ngram;
        self
    }

    /// Replace the numeric measure.
    pub fn with_gaussian(mut self, gaussian: GaussianSimilarity) -> Self {
        self.gaussian = gaussian;
        self
    }

    /// Scores of mismatching [`CompareClass::Value`] labels.
    pub fn with_value_mismatch(mut self, leaf: f64, inner: f64) -> Self {
        self.leaf_value_mismatch = leaf;
        self.inner_value_mismatch = inner;
        self
    }

    /// The type classification.
    pub fn labels(&self) -> &LabelConfiguration {
        &self.labels
    }

    /// Similarity of two leaf labels. Different types score 0.0.
    pub fn leaf_similarity(
        &self,
        (a_ty, a): (NodeType, &str),
        (b_ty, b): (NodeType, &str),
        cache: &mut SimilarityCache,
    ) -> f64 {
        self.compare(a_ty, a, b_ty, b, self.leaf_value_mismatch, cache)
    }

    /// Similarity of two inner node labels. Different types score 0.0.
    pub fn inner_similarity(
        &self,
        (a_ty, a): (NodeType, &str),
        (b_ty, b): (NodeType, &str),
        cache: &mut SimilarityCache,
    ) -> f64 {
        self.compare(a_ty, a, b_ty, b, self.inner_value_mismatch, cache)
    }

    fn compare(
        &self,
        a_ty: NodeType,
        a: &str,
        b_ty: NodeType,
        b: &str,
        value_mismatch: f64,
        cache: &mut SimilarityCache,
    ) -> f64 {
        if a_ty != b_ty {
            return 0.0;
        }
        match self.labels.class_of(a_ty) {
            CompareClass::Value if a == b => 1.0,
            CompareClass::Value => value_mismatch,
            CompareClass::Real => self.gaussian.compare_reals(a, b),
            CompareClass::Integer => self.gaussian.compare_integers(a, b),
            CompareClass::String => cache.get_or_insert_with(a, b, || self.ngram.similarity(a, b)),
            CompareClass::Boolean if a == b => 1.0,
            CompareClass::Boolean => 0.5,
            CompareClass::Default => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALUE: NodeType = NodeType(1);
    const REAL: NodeType = NodeType(2);
    const INT: NodeType = NodeType(3);
    const STR: NodeType = NodeType(4);
    const BOOL: NodeType = NodeType(5);
    const OTHER: NodeType = NodeType(6);

    fn comparator() -> LabelComparator {
        let labels = LabelConfiguration::builder()
            .classify(CompareClass::Value, [VALUE])
            .classify(CompareClass::Real, [REAL])
            .classify(CompareClass::Integer, [INT])
            .classify(CompareClass::String, [STR])
            .classify(CompareClass::Boolean, [BOOL])
            .identifier_type(STR)
            .build();
        LabelComparator::new(Arc::new(labels))
    }

    #[test]
    fn test_dispatch_per_class() {
        let cmp = comparator();
        let mut cache = SimilarityCache::new();
        let mut leaf = |ty, a, b| cmp.leaf_similarity((ty, a), (ty, b), &mut cache);

        assert_eq!(leaf(VALUE, "public", "public"), 1.0);
        assert_eq!(leaf(VALUE, "public", "private"), 0.0);
        assert_eq!(leaf(REAL, "2.0", "2.0"), 1.0);
        assert!(leaf(REAL, "1", "2") < 1.0);
        assert_eq!(leaf(INT, "7", "7"), 1.0);
        assert_eq!(leaf(BOOL, "true", "false"), 0.5);
        assert_eq!(leaf(OTHER, "anything", "else"), 1.0);
        assert_eq!(leaf(STR, "foo", "bar"), 0.0);
    }

    #[test]
    fn test_inner_value_penalty_and_type_mismatch() {
        let cmp = comparator();
        let mut cache = SimilarityCache::new();
        assert_eq!(
            cmp.inner_similarity((VALUE, "a"), (VALUE, "b"), &mut cache),
            0.2
        );
        assert_eq!(
            cmp.inner_similarity((OTHER, "x"), (STR, "x"), &mut cache),
            0.0
        );
        let custom = comparator().with_value_mismatch(0.1, 0.3);
        assert_eq!(
            custom.leaf_similarity((VALUE, "a"), (VALUE, "b"), &mut cache),
            0.1
        );
        assert_eq!(cmp.labels().identifier_type(), Some(STR));
        assert_eq!(cmp.labels().root_type(), None);
    }

    #[test]
    fn test_string_similarity_is_cached_per_pair() {
        let cmp = comparator();
        let mut cache = SimilarityCache::new();
        cmp.leaf_similarity((STR, "night"), (STR, "nacht"), &mut cache);
        cmp.leaf_similarity((STR, "night"), (STR, "nacht"), &mut cache);
        cmp.leaf_similarity((STR, "nacht"), (STR, "night"), &mut cache);
        assert_eq!(cache.len(), 2, "ordered pairs are distinct keys");

        // "ab" + "c" and "a" + "bc" must not collide.
        cache.get_or_insert_with("ab", "c", || 0.25);
        assert_eq!(cache.get_or_insert_with("a", "bc", || 0.75), 0.75);

        let mut other = SimilarityCache::new();
        other.get_or_insert_with("x", "y", || 0.5);
        cache.merge(other);
        assert_eq!(cache.len(), 5);
    }
}
