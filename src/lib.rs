//! # treeroute
//!
//! A convention-driven HTTP router: the directory tree *is* the route table.
//!
//! ```text
//! service/api/
//! ├── get.rs                 GET  /
//! ├── meta.rs                middleware for every route
//! └── users/
//!     ├── get.rs             GET  /users
//!     ├── post.rs            POST /users
//!     ├── meta.rs            middleware for /users and below
//!     └── :userId/
//!         └── get.rs         GET  /users/:userId
//! ```
//!
//! Every request runs one flat middleware chain (root middleware, then the meta
//! middleware of each enclosing directory from the outermost in, then the route
//! module's own handlers) until a step responds or fails. Unknown paths answer
//! `404`, known paths with an unregistered method answer `405`, and errors
//! raised anywhere in the chain are mapped to a status and optional JSON body.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use treeroute::{App, Modules};
//! use treeroute::middleware::{Flow, from_fn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let modules = Modules::new().handler(
//!         "users/:userId/get",
//!         from_fn(|ctx| Box::pin(async move {
//!             let id = ctx.params().get("userId").unwrap_or_default().to_owned();
//!             Ok(Flow::text(format!("Fetching user: {id}")))
//!         })),
//!     );
//!
//!     let app = App::builder("./service").modules(modules).build()?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

// ── Transport ─────────────────────────────────────────────────────────────────
pub mod http;
pub mod server;

// ── Routing core ──────────────────────────────────────────────────────────────
pub mod context;
pub mod discovery;
pub mod error;
pub mod middleware;
pub mod router;

// ── Application surface ───────────────────────────────────────────────────────
pub mod app;
pub mod config;
pub mod validation;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use app::{App, AppBuilder};
pub use config::{AppConfig, ConfigError};
pub use context::Context;
pub use discovery::{Modules, StartupError};
pub use error::HttpError;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::{Flow, Middleware, MiddlewareHandler};
pub use server::{Server, ServerError};
