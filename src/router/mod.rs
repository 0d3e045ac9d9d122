//! Request routing: an immutable table from URL patterns to per-method chains.
//!
//! The [`RouteTable`] is built once from the routes discovered at startup and
//! never changes afterwards. Each entry groups every method registered for one
//! URL shape:
//!
//! | Pattern            | Methods        |
//! |--------------------|----------------|
//! | `/users`           | `GET`, `POST`  |
//! | `/users/:userId`   | `GET`, `PUT`   |
//!
//! Lookup walks the entries in precedence order (literal segments before
//! parameters, then lexicographically) and returns the first pattern that
//! matches the request path *and* registers the request method. When patterns
//! match but none has the method, the first of them is returned with a sentinel
//! chain that fails with `405`. No matching pattern at all is reported as `None`
//! so the dispatcher can answer `404`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::context::Parameters;
use crate::discovery::StartupError;
use crate::error::HttpError;
use crate::http::Method;
use crate::middleware::{Chain, from_sync};

pub mod dispatch;
pub mod pattern;

pub use dispatch::{Dispatcher, parse_query, split_path, split_url};
pub use pattern::{RoutePattern, Segment};

/// A fully composed route: one method on one pattern, with its whole chain.
#[derive(Clone)]
pub struct CompiledRoute {
    pub method: Method,
    pub pattern: RoutePattern,
    pub chain: Chain,
    /// The route file this chain was built from, for diagnostics.
    pub module: PathBuf,
}

impl std::fmt::Debug for CompiledRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("method", &self.method)
            .field("pattern", &self.pattern.to_string())
            .field("chain", &self.chain.len())
            .field("module", &self.module)
            .finish()
    }
}

/// Pattern string → methods registered for it, in [`Method::ROUTABLE`] order.
pub type RouteSummary = BTreeMap<String, Vec<Method>>;

struct Entry {
    pattern: RoutePattern,
    routes: Vec<CompiledRoute>,
}

/// The outcome of a successful pattern lookup.
#[derive(Clone)]
pub struct RouteMatch {
    /// The chain to run, or the sentinel chain for an unregistered method.
    pub chain: Chain,
    pub params: Parameters,
    /// `false` when the path matched but no matching pattern has the method.
    pub method_allowed: bool,
}

/// Immutable mapping from URL patterns to per-method middleware chains.
pub struct RouteTable {
    entries: Vec<Entry>,
    method_not_allowed: Chain,
}

impl RouteTable {
    /// Groups `routes` by pattern shape and orders the groups by precedence.
    ///
    /// # Errors
    ///
    /// [`StartupError::DuplicateRoute`] when two routes share a method and a
    /// pattern shape.
    pub fn build(routes: Vec<CompiledRoute>) -> Result<Self, StartupError> {
        let mut entries: Vec<Entry> = Vec::new();

        for route in routes {
            let position = entries
                .iter()
                .position(|entry| entry.pattern.same_shape(&route.pattern));
            let Some(index) = position else {
                entries.push(Entry {
                    pattern: route.pattern.clone(),
                    routes: vec![route],
                });
                continue;
            };

            let entry = &mut entries[index];
            if let Some(existing) = entry.routes.iter().find(|r| r.method == route.method) {
                return Err(StartupError::DuplicateRoute {
                    method: route.method.clone(),
                    pattern: route.pattern.to_string(),
                    first: existing.module.clone(),
                    second: route.module.clone(),
                });
            }
            entry.routes.push(route);
        }

        entries.sort_by(|a, b| a.pattern.precedence(&b.pattern));
        for entry in &mut entries {
            entry.routes.sort_by_key(|route| route.method.routable_rank());
        }

        let method_not_allowed: Chain =
            vec![from_sync(|_| Err(HttpError::method_not_allowed()))].into();

        Ok(Self {
            entries,
            method_not_allowed,
        })
    }

    /// Finds the chain for `method` on the request path given as `segments`.
    ///
    /// Every pattern matching `segments` is tried in precedence order and the
    /// first one registering `method` wins. Returns `None` when no pattern
    /// matches. When patterns match but none has a chain for `method`, the
    /// returned chain fails with `405` and `method_allowed` is `false`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::PathBuf;
    /// use treeroute::http::Method;
    /// use treeroute::middleware::{Flow, from_sync};
    /// use treeroute::router::{CompiledRoute, RoutePattern, RouteTable};
    ///
    /// let table = RouteTable::build(vec![CompiledRoute {
    ///     method: Method::Get,
    ///     pattern: RoutePattern::parse("/users/:userId"),
    ///     chain: vec![from_sync(|_| Ok(Flow::text("ok")))].into(),
    ///     module: PathBuf::from("api/users/:userId/get.rs"),
    /// }])
    /// .unwrap();
    ///
    /// let found = table.lookup(&["users", "7"], &Method::Get).unwrap();
    /// assert_eq!(found.params.get("userId"), Some("7"));
    /// assert!(table.lookup(&["orders"], &Method::Get).is_none());
    /// ```
    pub fn lookup(&self, segments: &[&str], method: &Method) -> Option<RouteMatch> {
        let mut first_match: Option<&Entry> = None;
        let matching = self
            .entries
            .iter()
            .filter(|entry| entry.pattern.matches(segments));

        for entry in matching {
            if let Some(route) = entry.routes.iter().find(|route| &route.method == method) {
                return Some(RouteMatch {
                    chain: route.chain.clone(),
                    params: route.pattern.bind(segments),
                    method_allowed: true,
                });
            }
            first_match.get_or_insert(entry);
        }

        first_match.map(|entry| RouteMatch {
            chain: self.method_not_allowed.clone(),
            params: entry.pattern.bind(segments),
            method_allowed: false,
        })
    }

    /// Every pattern in the table with the methods registered for it.
    pub fn summarize(&self) -> RouteSummary {
        self.entries
            .iter()
            .map(|entry| {
                let methods = entry.routes.iter().map(|r| r.method.clone()).collect();
                (entry.pattern.to_string(), methods)
            })
            .collect()
    }

    /// Number of distinct patterns.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of `(method, pattern)` routes across all patterns.
    pub fn route_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.routes.len()).sum()
    }

    /// Patterns in lookup order.
    pub fn patterns(&self) -> impl Iterator<Item = &RoutePattern> {
        self.entries.iter().map(|entry| &entry.pattern)
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.summarize())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::http::{Headers, Response, StatusCode};
    use crate::middleware::{Flow, run_chain};
    use bytes::Bytes;

    fn route(method: Method, pattern: &str, body: &'static str) -> CompiledRoute {
        CompiledRoute {
            method,
            pattern: RoutePattern::parse(pattern),
            chain: vec![from_sync(move |_| Ok(Flow::text(body)))].into(),
            module: PathBuf::from(format!("api{pattern}/handler.rs")),
        }
    }

    async fn run(found: RouteMatch) -> Result<Response, HttpError> {
        let mut ctx = Context::new(
            Method::Get,
            "/".to_owned(),
            Headers::new(),
            found.params,
            None,
            Bytes::new(),
            None,
        );
        run_chain(&found.chain, &mut ctx)
            .await
            .map(|response| response.unwrap_or_else(|| Response::new(StatusCode::NoContent)))
    }

    fn table() -> RouteTable {
        RouteTable::build(vec![
            route(Method::Get, "/users/:userId", "show"),
            route(Method::Post, "/users", "create"),
            route(Method::Get, "/users", "list"),
            route(Method::Get, "/users/me", "me"),
            route(Method::Put, "/users/:id", "update"),
            route(Method::Get, "/", "root"),
        ])
        .unwrap()
    }

    // ── RouteTable::build ─────────────────────────────────────────────────────

    #[test]
    fn routes_are_grouped_by_shape() {
        let table = table();
        assert_eq!(table.len(), 4);
        assert_eq!(table.route_count(), 6);
        assert!(!table.is_empty());
    }

    #[test]
    fn patterns_are_ordered_by_precedence() {
        let patterns: Vec<String> = table().patterns().map(ToString::to_string).collect();
        assert_eq!(patterns, ["/", "/users", "/users/me", "/users/:userId"]);
    }

    #[test]
    fn duplicate_routes_are_rejected() {
        let err = RouteTable::build(vec![
            route(Method::Get, "/users/:id", "a"),
            route(Method::Get, "/users/:userId", "b"),
        ])
        .unwrap_err();
        assert!(matches!(err, StartupError::DuplicateRoute { method: Method::Get, .. }));
    }

    #[test]
    fn empty_table_matches_nothing() {
        let table = RouteTable::build(Vec::new()).unwrap();
        assert!(table.is_empty());
        assert!(table.lookup(&[], &Method::Get).is_none());
    }

    // ── RouteTable::lookup ────────────────────────────────────────────────────

    #[tokio::test]
    async fn literal_segment_wins_over_parameter() {
        let found = table().lookup(&["users", "me"], &Method::Get).unwrap();
        assert_eq!(run(found).await.unwrap().payload(), b"me");
    }

    #[tokio::test]
    async fn each_method_binds_its_own_parameter_names() {
        let table = table();

        let found = table.lookup(&["users", "42"], &Method::Get).unwrap();
        assert_eq!(found.params.get("userId"), Some("42"));
        assert_eq!(run(found).await.unwrap().payload(), b"show");

        let found = table.lookup(&["users", "42"], &Method::Put).unwrap();
        assert_eq!(found.params.get("id"), Some("42"));
        assert_eq!(run(found).await.unwrap().payload(), b"update");
    }

    #[tokio::test]
    async fn unregistered_method_gets_405_chain() {
        let found = table().lookup(&["users"], &Method::Delete).unwrap();
        assert!(!found.method_allowed);
        let err = run(found).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::MethodNotAllowed);
    }

    #[tokio::test]
    async fn overlapping_patterns_are_searched_for_the_method() {
        let table = RouteTable::build(vec![
            route(Method::Get, "/users/:id", "show"),
            route(Method::Post, "/:x/me", "post-me"),
        ])
        .unwrap();

        let found = table.lookup(&["users", "me"], &Method::Post).unwrap();
        assert!(found.method_allowed);
        assert_eq!(found.params.get("x"), Some("users"));
        assert_eq!(run(found).await.unwrap().payload(), b"post-me");

        let found = table.lookup(&["users", "me"], &Method::Get).unwrap();
        assert_eq!(found.params.get("id"), Some("me"));
        assert_eq!(run(found).await.unwrap().payload(), b"show");

        let found = table.lookup(&["users", "me"], &Method::Delete).unwrap();
        assert!(!found.method_allowed);
        assert_eq!(found.params.get("id"), Some("me"));
        let err = run(found).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::MethodNotAllowed);
    }

    #[test]
    fn unknown_path_is_none() {
        let table = table();
        assert!(table.lookup(&["orders"], &Method::Get).is_none());
        assert!(table.lookup(&["users", ""], &Method::Get).is_some());
        assert!(table.lookup(&["users", "1", "posts"], &Method::Get).is_none());
    }

    // ── RouteTable::summarize ─────────────────────────────────────────────────

    #[test]
    fn summary_lists_methods_in_routable_order() {
        let summary = table().summarize();
        assert_eq!(summary["/users"], [Method::Get, Method::Post]);
        assert_eq!(summary["/users/:userId"], [Method::Get, Method::Put]);
        assert_eq!(summary["/"], [Method::Get]);
        assert_eq!(summary.len(), 4);
    }
}
