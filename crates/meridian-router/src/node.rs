//! Route tree nodes.
//!
//! Each node is one path segment. Static children are kept sorted for
//! binary search; a node has at most one parameter child.
//!
//! Registered patterns never overlap for a method: two patterns overlap when
//! they have the same number of segments and every position holds either the
//! same literal or a parameter on at least one side. Any concrete path
//! therefore resolves to at most one (method, pattern) entry.

use http::Method;

use crate::error::{RouterError, RouterResult};
use crate::method_router::MethodRouter;
use crate::params::Params;

/// Type of path segment in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    /// Literal segment (e.g. "businesses")
    Static,
    /// Named single-segment parameter (e.g. ":id" or "{id}")
    Param(String),
}

/// A node in the route tree.
#[derive(Debug, Clone)]
pub struct Node<T> {
    /// The path segment this node represents, as written in the pattern
    pub segment: String,

    /// The kind of segment
    pub kind: SegmentKind,

    /// Method table for this node, if a route ends here
    pub methods: Option<MethodRouter<T>>,

    /// Static children, sorted by segment
    pub static_children: Vec<Node<T>>,

    /// Parameter child
    pub param_child: Option<Box<Node<T>>>,
}

impl<T> Node<T> {
    fn new(segment: String, kind: SegmentKind) -> Self {
        Self {
            segment,
            kind,
            methods: None,
            static_children: Vec::new(),
            param_child: None,
        }
    }

    /// Creates a root node for the tree.
    #[must_use]
    pub fn root() -> Self {
        Self::new(String::new(), SegmentKind::Static)
    }

    /// Inserts a route into the tree.
    ///
    /// # Errors
    ///
    /// Fails when the pattern is malformed, when a method is already
    /// registered for an equivalent pattern, when a parameter name collides
    /// with a differently named parameter at the same position, or when the
    /// pattern overlaps an existing pattern for one of its methods. The tree
    /// is not modified on an overlap.
    pub fn insert(&mut self, pattern: &str, methods: MethodRouter<T>) -> RouterResult<()> {
        let segments = parse_pattern(pattern)?;
        if let Some((method, existing)) =
            self.find_overlap(&segments, &methods, true, &mut Vec::new())
        {
            return Err(RouterError::Ambiguous {
                method,
                pattern: pattern.to_string(),
                existing,
            });
        }
        self.insert_segments(&segments, methods, pattern)
    }

    /// Looks for a registered pattern that shares a method with `methods`
    /// and can match a path the new pattern matches.
    ///
    /// `exact` stays true while the walk follows the new pattern's own tree
    /// position; equivalent patterns are reported by `insert_segments` as
    /// duplicates instead.
    fn find_overlap(
        &self,
        segments: &[(String, SegmentKind)],
        methods: &MethodRouter<T>,
        exact: bool,
        walked: &mut Vec<String>,
    ) -> Option<(Method, String)> {
        let Some(((segment, kind), remaining)) = segments.split_first() else {
            if exact {
                return None;
            }
            let existing = self.methods.as_ref()?;
            let method = methods
                .allowed_methods()
                .into_iter()
                .find(|m| existing.get_route(m).is_some())?;
            return Some((method, format!("/{}", walked.join("/"))));
        };

        let candidates: Vec<(&Node<T>, bool)> = match kind {
            SegmentKind::Static => self
                .find_static_child(segment)
                .map(|child| (child, exact))
                .into_iter()
                .chain(self.param_child.as_deref().map(|child| (child, false)))
                .collect(),
            SegmentKind::Param(_) => self
                .static_children
                .iter()
                .map(|child| (child, false))
                .chain(self.param_child.as_deref().map(|child| (child, exact)))
                .collect(),
        };

        for (child, exact) in candidates {
            walked.push(child.segment.clone());
            let found = child.find_overlap(remaining, methods, exact, walked);
            walked.pop();
            if found.is_some() {
                return found;
            }
        }
        None
    }

    fn insert_segments(
        &mut self,
        segments: &[(String, SegmentKind)],
        methods: MethodRouter<T>,
        pattern: &str,
    ) -> RouterResult<()> {
        let Some(((segment, kind), remaining)) = segments.split_first() else {
            return match &mut self.methods {
                Some(existing) => existing.merge(methods).map_err(|method| {
                    RouterError::Duplicate {
                        method,
                        pattern: pattern.to_string(),
                    }
                }),
                None => {
                    self.methods = Some(methods);
                    Ok(())
                }
            };
        };

        match kind {
            SegmentKind::Static => {
                let idx = match self
                    .static_children
                    .binary_search_by(|c| c.segment.as_str().cmp(segment))
                {
                    Ok(idx) => idx,
                    Err(idx) => {
                        self.static_children
                            .insert(idx, Node::new(segment.clone(), SegmentKind::Static));
                        idx
                    }
                };
                self.static_children[idx].insert_segments(remaining, methods, pattern)
            }
            SegmentKind::Param(name) => {
                let child = self
                    .param_child
                    .get_or_insert_with(|| Box::new(Node::new(segment.clone(), kind.clone())));
                if let SegmentKind::Param(existing) = &child.kind {
                    if existing != name {
                        return Err(RouterError::ParamConflict {
                            pattern: pattern.to_string(),
                            existing: existing.clone(),
                            new: name.clone(),
                        });
                    }
                }
                child.insert_segments(remaining, methods, pattern)
            }
        }
    }

    /// Matches a concrete request path against the tree.
    ///
    /// Returns the method table and extracted parameters if a pattern matches.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<(&MethodRouter<T>, Params)> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Params::new();
        let methods = self.match_segments(&segments, &mut params)?;
        Some((methods, params))
    }

    fn match_segments<'a>(
        &'a self,
        segments: &[&str],
        params: &mut Params,
    ) -> Option<&'a MethodRouter<T>> {
        let Some((segment, remaining)) = segments.split_first() else {
            return self.methods.as_ref();
        };

        // At most one branch can reach a registered pattern; the literal one
        // is tried first because it is a binary search away.
        if let Some(child) = self.find_static_child(segment) {
            if let Some(found) = child.match_segments(remaining, params) {
                return Some(found);
            }
        }

        if let Some(child) = &self.param_child {
            if let SegmentKind::Param(name) = &child.kind {
                let mark = params.len();
                params.push(name.clone(), *segment);
                if let Some(found) = child.match_segments(remaining, params) {
                    return Some(found);
                }
                params.truncate(mark);
            }
        }

        None
    }

    fn find_static_child(&self, segment: &str) -> Option<&Node<T>> {
        self.static_children
            .binary_search_by(|c| c.segment.as_str().cmp(segment))
            .ok()
            .map(|i| &self.static_children[i])
    }
}

/// Splits a pattern into typed segments.
///
/// `:name` and `{name}` both declare a parameter. Empty segments are
/// ignored, so `/a//b/` and `/a/b` are the same pattern.
pub(crate) fn parse_pattern(pattern: &str) -> RouterResult<Vec<(String, SegmentKind)>> {
    let invalid = |reason| RouterError::InvalidPattern {
        pattern: pattern.to_string(),
        reason,
    };

    if !pattern.starts_with('/') {
        return Err(invalid("pattern must start with '/'"));
    }

    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            let name = s
                .strip_prefix(':')
                .or_else(|| s.strip_prefix('{').and_then(|n| n.strip_suffix('}')));
            match name {
                Some("") => Err(invalid("parameter name is empty")),
                Some(name) if !is_param_name(name) => {
                    Err(invalid("parameter names may only contain [A-Za-z0-9_]"))
                }
                Some(name) => Ok((s.to_string(), SegmentKind::Param(name.to_string()))),
                None if s.contains(['{', '}', '*']) => {
                    Err(invalid("only whole-segment parameters are supported"))
                }
                None => Ok((s.to_string(), SegmentKind::Static)),
            }
        })
        .collect()
}

fn is_param_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn test_parse_pattern() {
        let segments = parse_pattern("/businesses/:id/reviews").unwrap();
        assert_eq!(
            segments,
            vec![
                ("businesses".to_string(), SegmentKind::Static),
                (":id".to_string(), SegmentKind::Param("id".to_string())),
                ("reviews".to_string(), SegmentKind::Static),
            ]
        );

        let segments = parse_pattern("/reviews/{id}").unwrap();
        assert_eq!(segments[1].1, SegmentKind::Param("id".to_string()));
    }

    #[test]
    fn test_parse_pattern_rejects_malformed() {
        assert!(parse_pattern("businesses").is_err());
        assert!(parse_pattern("/businesses/:").is_err());
        assert!(parse_pattern("/businesses/{}").is_err());
        assert!(parse_pattern("/files/*path").is_err());
        assert!(parse_pattern("/a/:bad-name").is_err());
        assert!(parse_pattern("/a/x{id}").is_err());
    }

    #[test]
    fn test_root_pattern() {
        let mut root = Node::root();
        root.insert("/", MethodRouter::new().get("banner")).unwrap();

        let (methods, params) = root.match_path("/").unwrap();
        assert_eq!(methods.get_route(&Method::GET), Some(&"banner"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_literal_and_param_at_same_position_are_ambiguous() {
        let mut root = Node::root();
        root.insert("/users/me", MethodRouter::new().get("me")).unwrap();
        let err = root
            .insert("/users/:id", MethodRouter::new().get("user"))
            .unwrap_err();
        assert_eq!(
            err,
            RouterError::Ambiguous {
                method: Method::GET,
                pattern: "/users/:id".to_string(),
                existing: "/users/me".to_string(),
            }
        );

        // Registration order does not matter.
        let mut root = Node::root();
        root.insert("/users/:id", MethodRouter::new().get("user")).unwrap();
        let err = root
            .insert("/users/me", MethodRouter::new().get("me"))
            .unwrap_err();
        assert!(matches!(err, RouterError::Ambiguous { .. }));

        // The rejected pattern left nothing behind.
        let (methods, params) = root.match_path("/users/me").unwrap();
        assert_eq!(methods.get_route(&Method::GET), Some(&"user"));
        assert_eq!(params.get("id"), Some("me"));
    }

    #[test]
    fn test_crossed_params_are_ambiguous() {
        let mut root = Node::root();
        root.insert("/a/b/:y", MethodRouter::new().get("open")).unwrap();
        let err = root
            .insert("/a/:x/c", MethodRouter::new().get("guarded"))
            .unwrap_err();
        assert_eq!(
            err,
            RouterError::Ambiguous {
                method: Method::GET,
                pattern: "/a/:x/c".to_string(),
                existing: "/a/b/:y".to_string(),
            }
        );
        let (methods, _) = root.match_path("/a/b/c").unwrap();
        assert_eq!(methods.get_route(&Method::GET), Some(&"open"));
    }

    #[test]
    fn test_overlap_needs_a_shared_method() {
        let mut root = Node::root();
        root.insert("/users/me", MethodRouter::new().get("me")).unwrap();
        root.insert("/users/:id", MethodRouter::new().delete("remove"))
            .unwrap();

        let (methods, _) = root.match_path("/users/me").unwrap();
        assert_eq!(methods.get_route(&Method::GET), Some(&"me"));
        let (methods, params) = root.match_path("/users/9").unwrap();
        assert_eq!(methods.get_route(&Method::DELETE), Some(&"remove"));
        assert_eq!(params.get("id"), Some("9"));
    }

    #[test]
    fn test_different_lengths_do_not_overlap() {
        let mut root = Node::root();
        root.insert("/businesses/:id", MethodRouter::new().get(1)).unwrap();
        root.insert("/businesses/:id/reviews", MethodRouter::new().get(2))
            .unwrap();
        root.insert("/:section", MethodRouter::new().get(3)).unwrap();
        root.insert("/a/:x/b", MethodRouter::new().get(4)).unwrap();
        root.insert("/a/lit/c", MethodRouter::new().get(5)).unwrap();
    }

    #[test]
    fn test_backtracking_discards_params_from_failed_branch() {
        let mut root = Node::root();
        root.insert("/a/:x/b", MethodRouter::new().get("param-branch")).unwrap();
        root.insert("/a/lit/c", MethodRouter::new().get("static-branch")).unwrap();
        root.insert("/:y/lit/d", MethodRouter::new().get("outer-param")).unwrap();

        // Static "a" is tried first and fails below it; the outer parameter
        // branch must see a clean parameter set.
        let (methods, params) = root.match_path("/a/lit/d").unwrap();
        assert_eq!(methods.get_route(&Method::GET), Some(&"outer-param"));
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("y"), Some("a"));
        assert_eq!(params.get("x"), None);
    }

    #[test]
    fn test_param_name_conflict() {
        let mut root = Node::root();
        root.insert("/logs/user/:user_id/history", MethodRouter::new().get(1))
            .unwrap();
        let err = root
            .insert("/logs/user/:id", MethodRouter::new().delete(2))
            .unwrap_err();
        assert!(matches!(err, RouterError::ParamConflict { .. }));
    }

    #[test]
    fn test_duplicate_method() {
        let mut root = Node::root();
        root.insert("/reviews", MethodRouter::new().get(1)).unwrap();
        root.insert("/reviews", MethodRouter::new().post(2)).unwrap();
        let err = root.insert("/reviews/", MethodRouter::new().get(3)).unwrap_err();
        assert_eq!(
            err,
            RouterError::Duplicate {
                method: Method::GET,
                pattern: "/reviews/".to_string()
            }
        );
    }

    #[test]
    fn test_param_matches_exactly_one_segment() {
        let mut root = Node::root();
        root.insert("/reviews/:id", MethodRouter::new().get(1)).unwrap();

        assert!(root.match_path("/reviews").is_none());
        assert!(root.match_path("/reviews/7/extra").is_none());
        assert!(root.match_path("/reviews/7").is_some());
    }

    #[test]
    fn test_static_children_stay_sorted() {
        let mut root = Node::root();
        for seg in ["/reviews", "/auth", "/logs", "/businesses"] {
            root.insert(seg, MethodRouter::new().get(seg)).unwrap();
        }
        let names: Vec<_> = root.static_children.iter().map(|c| c.segment.as_str()).collect();
        assert_eq!(names, vec!["auth", "businesses", "logs", "reviews"]);
    }
}
