//! Error taxonomy for tree building and matching.

/// Errors produced while building trees or running matchers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum MatchError {
    /// A threshold, weight, size limit or stage list is malformed.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// One side of the pair is already mapped to a different node (or the pair
    /// itself is already present).
    #[error("cannot link {src} -> {dst}: one of the nodes is already mapped")]
    Conflict {
        /// Source node id.
        src: usize,
        /// Destination node id.
        dst: usize,
    },

    /// The pair being unlinked is not in the store.
    #[error("mapping {src} -> {dst} does not exist")]
    NotFound {
        /// Source node id.
        src: usize,
        /// Destination node id.
        dst: usize,
    },

    /// The input tree (or its textual notation) is malformed.
    #[error("malformed input: {0}")]
    Input(String),

    /// The tree implementation does not provide an optional capability.
    #[error("tree does not support the `{capability}` capability")]
    UnsupportedCapability {
        /// Name of the missing capability.
        capability: &'static str,
    },

    /// A data-parallel shard panicked.
    #[error("worker shard {shard} failed: {message}")]
    Worker {
        /// Index of the failed shard.
        shard: usize,
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Result alias used throughout the crate.
pub type Result<T, E = MatchError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_nodes() {
        let err = MatchError::Conflict { src: 3, dst: 7 };
        assert_eq!(
            err.to_string(),
            "cannot link 3 -> 7: one of the nodes is already mapped"
        );

        let err = MatchError::UnsupportedCapability { capability: "span" };
        assert!(err.to_string().contains("`span`"));
    }
}
