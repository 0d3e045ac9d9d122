//! Application assembly: from a directory tree to a running server.
//!
//! [`AppBuilder::build`] runs the whole startup pipeline synchronously:
//!
//! ```text
//! <root>/api ──scan──▶ files ──compile──▶ descriptors ──load──▶ routes ──▶ RouteTable
//! ```
//!
//! Any failure is returned as a [`StartupError`] and nothing is served. The
//! resulting [`App`] can dispatch requests in-process or serve them over TCP.
//!
//! ```rust,no_run
//! use treeroute::app::App;
//! use treeroute::discovery::Modules;
//! use treeroute::middleware::{Flow, from_sync};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let modules = Modules::new()
//!         .handler("users/get", from_sync(|_| Ok(Flow::text("Listing users"))));
//!
//!     let app = App::builder("./service")
//!         .mount_path("/api")
//!         .modules(modules)
//!         .port(8080)
//!         .build()?;
//!
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::AppConfig;
use crate::discovery::{self, Modules, StartupError};
use crate::http::{Request, Response};
use crate::middleware::MiddlewareHandler;
use crate::router::{Dispatcher, RouteSummary, RouteTable};
use crate::server::{Server, ServerError};

/// Name of the directory under the application root that holds the route tree.
pub const API_DIR: &str = "api";

type CloseHook = Box<dyn FnOnce() + Send>;

/// Collects the options for an [`App`].
pub struct AppBuilder {
    root: PathBuf,
    mount_path: Option<String>,
    hostname: String,
    port: u16,
    middleware: Vec<MiddlewareHandler>,
    modules: Modules,
    on_close: Option<CloseHook>,
}

impl AppBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_config(AppConfig::new(root))
    }

    /// Starts from loaded settings; code-only options keep their defaults.
    pub fn from_config(config: AppConfig) -> Self {
        Self {
            root: config.root,
            mount_path: config.mount_path,
            hostname: config.hostname,
            port: config.port,
            middleware: Vec::new(),
            modules: Modules::new(),
            on_close: None,
        }
    }

    /// Prefix for every route, e.g. `/api/v1`.
    #[must_use]
    pub fn mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = Some(mount_path.into());
        self
    }

    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Appends a root middleware; root middleware runs first on every route.
    #[must_use]
    pub fn middleware(mut self, middleware: MiddlewareHandler) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// The registry providing the code behind each route and meta file.
    #[must_use]
    pub fn modules(mut self, modules: Modules) -> Self {
        self.modules = modules;
        self
    }

    /// Called once after the server stops accepting connections.
    #[must_use]
    pub fn on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Discovers, compiles and loads every route under `<root>/api`.
    ///
    /// # Errors
    ///
    /// Any [`StartupError`]: an unreadable tree, an illegal file, a leaf
    /// directory without a method file, a route module with no handlers, a
    /// duplicate route, or invalid settings.
    pub fn build(self) -> Result<App, StartupError> {
        let settings = AppConfig {
            root: self.root,
            mount_path: self.mount_path,
            hostname: self.hostname,
            port: self.port,
        };
        settings.validate()?;

        let api_root = settings.root.join(API_DIR);
        let files = discovery::scan(&api_root)?;
        let descriptors = discovery::compile(&api_root, &files, settings.mount_path.as_deref())?;
        let routes = discovery::load_all(&descriptors, &self.middleware, &self.modules)?;
        let table = RouteTable::build(routes)?;

        let routes = table.summarize();
        for (pattern, methods) in &routes {
            info!(pattern = %pattern, methods = ?methods, "route registered");
        }
        info!(
            root = %api_root.display(),
            patterns = table.len(),
            routes = table.route_count(),
            "route table built"
        );

        Ok(App {
            dispatcher: Dispatcher::new(table),
            routes,
            address: settings.address(),
            root: api_root,
            on_close: self.on_close,
        })
    }
}

/// A fully built application.
pub struct App {
    dispatcher: Dispatcher,
    routes: RouteSummary,
    address: String,
    root: PathBuf,
    on_close: Option<CloseHook>,
}

impl App {
    pub fn builder(root: impl Into<PathBuf>) -> AppBuilder {
        AppBuilder::new(root)
    }

    /// Pattern → methods for every registered route.
    pub fn routes(&self) -> &RouteSummary {
        &self.routes
    }

    /// The `hostname:port` that [`serve`](Self::serve) binds.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The directory routes were discovered in.
    pub fn api_root(&self) -> &Path {
        &self.root
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Handles one request in-process, without a socket.
    pub async fn dispatch(&self, request: Request) -> Response {
        self.dispatcher.dispatch(request).await
    }

    /// Binds [`address`](Self::address) and serves until `shutdown` completes,
    /// then runs the close hook.
    pub async fn serve<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()>,
    {
        let server = Server::bind(&self.address).await?;
        self.serve_on(server, shutdown).await
    }

    /// Like [`serve`](Self::serve) but on an already bound server, e.g. one
    /// bound to port `0`.
    pub async fn serve_on<S>(self, server: Server, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()>,
    {
        let dispatcher = self.dispatcher;
        let result = server
            .run_until(
                move |request| {
                    let dispatcher = dispatcher.clone();
                    async move { dispatcher.dispatch(request).await }
                },
                shutdown,
            )
            .await;

        if let Some(hook) = self.on_close {
            hook();
        }
        info!("server closed");
        result
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("address", &self.address)
            .field("root", &self.root)
            .field("routes", &self.routes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, StatusCode};
    use crate::middleware::{Flow, from_sync};
    use std::fs;

    fn tree(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            let path = dir.path().join(API_DIR).join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }
        dir
    }

    #[test]
    fn invalid_mount_path_is_a_configuration_error() {
        let dir = tree(&["get.rs"]);
        let err = App::builder(dir.path())
            .mount_path("api")
            .modules(Modules::new().handler("get", from_sync(|_| Ok(Flow::text("root")))))
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn build_and_dispatch() {
        let dir = tree(&["get.rs", "users/:userId/get.rs"]);
        let modules = Modules::new()
            .handler("get", from_sync(|_| Ok(Flow::text("root"))))
            .handler(
                "users/:userId/get",
                from_sync(|ctx| {
                    let id = ctx.params().get("userId").unwrap_or_default().to_owned();
                    Ok(Flow::text(format!("Fetching user: {id}")))
                }),
            );
        let app = App::builder(dir.path()).modules(modules).build().unwrap();

        assert_eq!(app.routes()["/users/:userId"], [Method::Get]);
        assert_eq!(app.address(), "127.0.0.1:3000");

        let response = app.dispatch(Request::new(Method::Get, "/users/7")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.payload(), b"Fetching user: 7");
    }
}
