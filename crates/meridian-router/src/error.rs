//! Route registration errors.

use http::Method;
use thiserror::Error;

/// Errors raised while building a route tree.
///
/// Matching never fails with an error; every variant here is a
/// registration-time problem that callers should treat as fatal configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The same method was registered twice for equivalent patterns.
    #[error("duplicate route: {method} {pattern}")]
    Duplicate {
        /// Conflicting method.
        method: Method,
        /// Pattern of the second registration.
        pattern: String,
    },

    /// Two parameter segments with different names share a tree position.
    #[error("conflicting parameter names in `{pattern}`: `:{new}` collides with existing `:{existing}`")]
    ParamConflict {
        /// Pattern being registered.
        pattern: String,
        /// Parameter name already in the tree.
        existing: String,
        /// Parameter name in the new pattern.
        new: String,
    },

    /// The new pattern can match a concrete path that an existing pattern
    /// already matches for the same method.
    #[error("ambiguous route: {method} {pattern} overlaps existing {existing}")]
    Ambiguous {
        /// Method registered by both patterns.
        method: Method,
        /// Pattern being registered.
        pattern: String,
        /// Pattern already in the tree.
        existing: String,
    },

    /// The pattern itself is malformed.
    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidPattern {
        /// Offending pattern.
        pattern: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Result type for route registration.
pub type RouterResult<T> = Result<T, RouterError>;
