//! Middleware contract: the single callable shape every handler in a chain has.
//!
//! A route's chain is a flat, ordered list of middleware: root middleware, then
//! directory-scoped meta middleware, then the route module's own handlers. Each
//! one receives the request [`Context`] and answers with a [`Flow`]:
//!
//! - [`Flow::Continue`]: hand the request to the next middleware,
//! - [`Flow::Respond`]: stop here and send this response,
//!
//! or fails with an [`HttpError`], which also stops the chain.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware.
//! - [`Chain`]: an immutable, shared sequence of handlers.
//! - [`from_fn`] / [`from_sync`]: adapt closures into handlers.
//! - [`require_json`]: built-in `Content-Type` guard.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::context::Context;
use crate::error::HttpError;
use crate::http::{Method, Response};

/// Boxed future returned by [`Middleware::handle`], borrowing the context for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a middleware returns.
pub type HandlerResult = Result<Flow, HttpError>;

/// The outcome of one middleware step.
///
/// "No response yet" and "respond with an empty body" are distinct values, so
/// an empty body is never mistaken for a request to continue.
#[derive(Debug)]
pub enum Flow {
    /// Run the next middleware in the chain.
    Continue,
    /// Stop the chain and send this response.
    Respond(Response),
}

impl Flow {
    /// Respond with `value` as a `200` JSON body.
    pub fn json(value: serde_json::Value) -> Self {
        Self::Respond(Response::json(value))
    }

    /// Respond with a `200` plain-text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::Respond(Response::text(body))
    }
}

impl From<Response> for Flow {
    fn from(response: Response) -> Self {
        Self::Respond(response)
    }
}

/// The core trait for everything that runs in a route chain.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync`; chains are shared across Tokio tasks.
/// - The returned future borrows the context mutably, so changes made here
///   (parameters, parsed body, extensions) are visible to every later step.
pub trait Middleware: Send + Sync {
    /// Handles the request, returning whether the chain should continue.
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult>;
}

/// A type-erased, reference-counted middleware.
pub type MiddlewareHandler = Arc<dyn Middleware>;

/// A composed, immutable chain shared by every request that hits a route.
pub type Chain = Arc<[MiddlewareHandler]>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: M) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(middleware)
}

struct AsyncFn<F>(F);

impl<F> Middleware for AsyncFn<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
        (self.0)(ctx)
    }
}

struct SyncFn<F>(F);

impl<F> Middleware for SyncFn<F>
where
    F: Fn(&mut Context) -> HandlerResult + Send + Sync,
{
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
        Box::pin(std::future::ready((self.0)(ctx)))
    }
}

/// Wraps an async closure.
///
/// ```rust
/// use treeroute::middleware::{Flow, from_fn};
///
/// let show_user = from_fn(|ctx| Box::pin(async move {
///     let id = ctx.params().get("userId").unwrap_or_default().to_owned();
///     Ok(Flow::text(format!("Fetching user: {id}")))
/// }));
/// ```
pub fn from_fn<F>(f: F) -> MiddlewareHandler
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(AsyncFn(f))
}

/// Wraps a synchronous closure.
///
/// ```rust
/// use treeroute::middleware::{Flow, from_sync};
///
/// let tag = from_sync(|ctx| {
///     ctx.extensions_mut().insert(String::from("seen"));
///     Ok(Flow::Continue)
/// });
/// ```
pub fn from_sync<F>(f: F) -> MiddlewareHandler
where
    F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(SyncFn(f))
}

/// Middleware that rejects bodies which are not declared as JSON.
///
/// `GET` and `HEAD` requests pass through untouched. Every other method must send
/// `Content-Type: application/json` (parameters such as `charset` are ignored),
/// otherwise the chain fails with `415 Unsupported content-type`.
pub fn require_json() -> MiddlewareHandler {
    from_sync(|ctx| {
        let exempt = matches!(ctx.method(), Method::Get | Method::Head);
        if exempt || ctx.headers().media_type() == Some("application/json") {
            Ok(Flow::Continue)
        } else {
            Err(HttpError::unsupported_media_type("content-type"))
        }
    })
}

/// Runs `chain` in order against `ctx`.
///
/// Returns the first response produced, or `None` if every step continued.
/// Each step is awaited to completion before the next starts; an error aborts
/// the remaining steps.
pub async fn run_chain(
    chain: &[MiddlewareHandler],
    ctx: &mut Context,
) -> Result<Option<Response>, HttpError> {
    for middleware in chain {
        if let Flow::Respond(response) = middleware.handle(ctx).await? {
            return Ok(Some(response));
        }
    }
    Ok(None)
}
