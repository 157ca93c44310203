//! Segment tree router for the Meridian gateway.
//!
//! Routes are stored in a tree where each node is one path segment. Lookups
//! walk the tree once per request segment, so matching cost depends on the
//! path length rather than on the number of registered routes.
//!
//! # Features
//!
//! - **Named parameters**: a segment written `:id` or `{id}` matches exactly
//!   one path segment and captures it under that name
//! - **Exact method matching**: each path carries its own per-method table
//! - **Generic payload**: a route stores any value `T`, the gateway stores
//!   its route entries here
//! - **Fail-fast conflicts**: registering the same method twice for a pattern,
//!   two differently named parameters at one position, or two patterns that
//!   could match the same path for one method, is an error at insertion time
//!   rather than a silent overwrite or a priority rule
//!
//! # Example
//!
//! ```rust
//! use meridian_router::{MethodRouter, Router};
//! use http::Method;
//!
//! let mut router = Router::new();
//! router.insert("/businesses", MethodRouter::new().get("listBusinesses")).unwrap();
//! router.insert("/businesses/:id/reviews", MethodRouter::new().get("listReviews")).unwrap();
//!
//! let m = router.match_route(&Method::GET, "/businesses/42/reviews").unwrap();
//! assert_eq!(*m.value, "listReviews");
//! assert_eq!(m.params.get("id"), Some("42"));
//! ```
//!
//! # Layout
//!
//! ```text
//!                 (root)
//!                   │
//!             "businesses"  [GET]
//!                   │
//!                 ":id"     [GET]
//!                   │
//!               "reviews"   [GET, POST]
//! ```

mod error;
mod method_router;
mod node;
mod params;
mod router;

pub use error::{RouterError, RouterResult};
pub use method_router::MethodRouter;
pub use node::{Node, SegmentKind};
pub use params::Params;
pub use router::Router;

/// A matched route with its stored value and extracted parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a, T> {
    /// The value registered for the matched method and pattern
    pub value: &'a T,
    /// Extracted path parameters
    pub params: Params,
}

impl<'a, T> RouteMatch<'a, T> {
    /// Creates a new route match.
    #[must_use]
    pub fn new(value: &'a T, params: Params) -> Self {
        Self { value, params }
    }
}
