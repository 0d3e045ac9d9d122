//! Request dispatcher: from a raw [`Request`] to a [`Response`].
//!
//! For every request the dispatcher:
//!
//! 1. splits the URL into path and query string,
//! 2. splits the path into segments and looks up the route table, failing
//!    with `404` or `405` before anything else is parsed,
//! 3. parses the query string and the JSON body,
//! 4. builds a fresh [`Context`] and runs the matched chain.
//!
//! Any [`HttpError`] raised along the way, including the synthesized `404`,
//! `405` and body-parse `400`, goes through the error mapper. The dispatcher
//! itself never fails.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde_json::Value;
use tracing::info;

use super::RouteTable;
use crate::context::{Context, Parameters};
use crate::error::{self, HttpError};
use crate::http::{Headers, Method, Request, Response};
use crate::middleware::run_chain;

/// Splits a request target on its first `?`.
///
/// ```
/// use treeroute::router::split_url;
///
/// assert_eq!(split_url("/users?page=2"), ("/users", Some("page=2")));
/// assert_eq!(split_url("/users"), ("/users", None));
/// ```
pub fn split_url(url: &str) -> (&str, Option<&str>) {
    match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    }
}

/// Splits a path into routing segments.
///
/// The leading `/` is dropped and every other `/` separates segments, so a
/// trailing slash yields a trailing empty segment and `/` yields none.
///
/// ```
/// use treeroute::router::split_path;
///
/// assert!(split_path("/").is_empty());
/// assert_eq!(split_path("/users"), ["users"]);
/// assert_eq!(split_path("/users/"), ["users", ""]);
/// ```
pub fn split_path(path: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = path.split('/').skip(1).collect();
    if segments.len() == 1 && segments[0].is_empty() {
        segments.clear();
    }
    segments
}

/// Parses an `application/x-www-form-urlencoded` query string. A key that
/// appears more than once keeps its last value.
pub fn parse_query(query: &str) -> Parameters {
    form_urlencoded::parse(query.as_bytes()).collect()
}

fn parse_body(body: &Bytes) -> Result<Option<Value>, HttpError> {
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(HttpError::body_parse)
}

/// Routes requests through a shared [`RouteTable`].
///
/// Cloning is cheap; every clone shares the same table.
#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<RouteTable>,
}

impl Dispatcher {
    pub fn new(table: RouteTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Produces the response for `request`. Failures become error responses.
    pub async fn dispatch(&self, request: Request) -> Response {
        let start = Instant::now();
        let (method, url, headers, body) = request.into_parts();
        let logged_url = url.clone();

        let response = match self.execute(method.clone(), url, headers, body).await {
            Ok(response) => response,
            Err(err) => error::respond(&err, &method, &logged_url),
        };

        info!(
            %method,
            url = %logged_url,
            status = response.status().as_u16(),
            elapsed = ?start.elapsed(),
            "request handled"
        );
        response
    }

    async fn execute(
        &self,
        method: Method,
        url: String,
        headers: Headers,
        body: Bytes,
    ) -> Result<Response, HttpError> {
        let (path, query) = split_url(&url);
        let segments = split_path(path);

        let found = self
            .table
            .lookup(&segments, &method)
            .ok_or_else(HttpError::not_found)?;
        if !found.method_allowed {
            return Err(HttpError::method_not_allowed());
        }

        let query = query.filter(|query| !query.is_empty()).map(parse_query);
        let parsed_body = parse_body(&body)?;

        let mut ctx = Context::new(method, url, headers, found.params, query, body, parsed_body);
        run_chain(&found.chain, &mut ctx)
            .await?
            .ok_or_else(HttpError::empty_chain)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("table", &self.table).finish()
    }
}
