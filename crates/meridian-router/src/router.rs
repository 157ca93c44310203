//! High-level router API.

use http::Method;

use crate::error::RouterResult;
use crate::method_router::MethodRouter;
use crate::node::Node;
use crate::params::Params;
use crate::RouteMatch;

/// A segment tree router.
///
/// # Example
///
/// ```rust
/// use meridian_router::{MethodRouter, Router};
/// use http::Method;
///
/// let mut router = Router::new();
/// router.insert("/reviews", MethodRouter::new().get("listReviews")).unwrap();
/// router.route(&Method::GET, "/reviews/:id", "getReview").unwrap();
///
/// let m = router.match_route(&Method::GET, "/reviews/7").unwrap();
/// assert_eq!(*m.value, "getReview");
/// ```
///
/// # Overlapping Patterns
///
/// Patterns that could both match one concrete path for the same method are
/// rejected at insertion with [`RouterError::Ambiguous`](crate::RouterError),
/// so `/users/me` and `/users/:id` cannot both carry `GET`. A lookup never
/// has to pick between two candidates.
#[derive(Debug, Clone)]
pub struct Router<T> {
    root: Node<T>,
    route_count: usize,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Router<T> {
    /// Creates a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::root(),
            route_count: 0,
        }
    }

    /// Inserts every method of `methods` under `pattern`.
    ///
    /// # Errors
    ///
    /// See [`Node::insert`]. On error the router is left as it was.
    pub fn insert(&mut self, pattern: &str, methods: MethodRouter<T>) -> RouterResult<()> {
        let added = methods.len();
        self.root.insert(pattern, methods)?;
        self.route_count += added;
        Ok(())
    }

    /// Registers a single method route.
    ///
    /// # Errors
    ///
    /// See [`Node::insert`].
    pub fn route(&mut self, method: &Method, pattern: &str, value: T) -> RouterResult<()> {
        self.insert(pattern, MethodRouter::new().method(method, value))
    }

    /// Matches a method and concrete path.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch<'_, T>> {
        let (methods, params) = self.root.match_path(path)?;
        let value = methods.get_route(method)?;
        Some(RouteMatch::new(value, params))
    }

    /// Matches a path regardless of method.
    ///
    /// Useful for telling "no such path" apart from "path exists, wrong method".
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<(&MethodRouter<T>, Params)> {
        self.root.match_path(path)
    }

    /// Returns the number of (method, pattern) routes registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.route_count
    }

    /// Returns true if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.route_count == 0
    }
}
