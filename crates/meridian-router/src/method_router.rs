//! HTTP method table for a single path.
//!
//! [`MethodRouter`] maps HTTP methods to route values for one pattern. It
//! accepts extension methods as well as the standard ones and keeps
//! registrations in insertion order.

use http::Method;

/// Maps HTTP methods to route values for a single pattern.
///
/// # Example
///
/// ```rust
/// use meridian_router::MethodRouter;
/// use http::Method;
///
/// let router = MethodRouter::new()
///     .get("listReviews")
///     .post("createReview");
///
/// assert_eq!(router.get_route(&Method::GET), Some(&"listReviews"));
/// assert_eq!(router.get_route(&Method::DELETE), None);
/// ```
#[derive(Debug, Clone)]
pub struct MethodRouter<T> {
    routes: Vec<(Method, T)>,
}

impl<T> Default for MethodRouter<T> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<T> MethodRouter<T> {
    /// Creates a new empty method router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a GET route.
    #[must_use]
    pub fn get(self, value: T) -> Self {
        self.method(&Method::GET, value)
    }

    /// Registers a POST route.
    #[must_use]
    pub fn post(self, value: T) -> Self {
        self.method(&Method::POST, value)
    }

    /// Registers a PUT route.
    #[must_use]
    pub fn put(self, value: T) -> Self {
        self.method(&Method::PUT, value)
    }

    /// Registers a DELETE route.
    #[must_use]
    pub fn delete(self, value: T) -> Self {
        self.method(&Method::DELETE, value)
    }

    /// Registers a PATCH route.
    #[must_use]
    pub fn patch(self, value: T) -> Self {
        self.method(&Method::PATCH, value)
    }

    /// Registers a route for an arbitrary method.
    ///
    /// Within one builder the last registration for a method wins; conflicts
    /// between separately inserted builders are reported by [`merge`](Self::merge).
    #[must_use]
    pub fn method(mut self, method: &Method, value: T) -> Self {
        if let Some(slot) = self.routes.iter_mut().find(|(m, _)| m == method) {
            slot.1 = value;
        } else {
            self.routes.push((method.clone(), value));
        }
        self
    }

    /// Returns the value registered for a method.
    #[must_use]
    pub fn get_route(&self, method: &Method) -> Option<&T> {
        self.routes
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, v)| v)
    }

    /// Merges another method router into this one.
    ///
    /// Fails on the first method present in both routers; `self` is left
    /// unchanged in that case.
    ///
    /// # Example
    ///
    /// ```rust
    /// use meridian_router::MethodRouter;
    /// use http::Method;
    ///
    /// let mut router = MethodRouter::new().get("list");
    /// router.merge(MethodRouter::new().post("create")).unwrap();
    /// assert_eq!(router.get_route(&Method::POST), Some(&"create"));
    ///
    /// let dup = router.merge(MethodRouter::new().get("again"));
    /// assert_eq!(dup, Err(Method::GET));
    /// ```
    pub fn merge(&mut self, other: MethodRouter<T>) -> Result<(), Method> {
        if let Some((method, _)) = other
            .routes
            .iter()
            .find(|(m, _)| self.get_route(m).is_some())
        {
            return Err(method.clone());
        }
        self.routes.extend(other.routes);
        Ok(())
    }

    /// Returns true if any methods are registered.
    #[must_use]
    pub fn has_any_method(&self) -> bool {
        !self.routes.is_empty()
    }

    /// Returns the number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no methods are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Returns the registered methods in insertion order.
    #[must_use]
    pub fn allowed_methods(&self) -> Vec<Method> {
        self.routes.iter().map(|(m, _)| m.clone()).collect()
    }
}
