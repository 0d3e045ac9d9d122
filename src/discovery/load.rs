//! Handler loader: resolve route modules and compose their chains.
//!
//! Route files only mark *where* a route lives; the code behind them is
//! registered in a [`Modules`] registry under each file's module key (its path
//! relative to the route root, without extension). Loading a
//! [`RouteDescriptor`] looks up the module's handlers and the applicable meta
//! middleware and lays them out as one flat chain:
//!
//! ```text
//! root middleware → meta (outermost dir first) → module handlers
//! ```

use std::collections::HashMap;
use std::collections::HashSet;

use tracing::{debug, warn};

use super::StartupError;
use super::compile::RouteDescriptor;
use crate::middleware::MiddlewareHandler;
use crate::router::CompiledRoute;

#[derive(Default, Clone)]
struct Exports {
    handlers: Vec<MiddlewareHandler>,
    middleware: Vec<MiddlewareHandler>,
}

/// Registry of the code behind each route and meta file.
///
/// Keys are `/`-separated paths relative to the route root with the extension
/// dropped, e.g. `users/:userId/get` or `users/meta`. The final component is
/// matched case-insensitively, so a file named `GET.rs` resolves `…/get`.
///
/// ```
/// use treeroute::discovery::Modules;
/// use treeroute::middleware::{Flow, from_sync};
///
/// let modules = Modules::new()
///     .handler("users/get", from_sync(|_| Ok(Flow::text("Listing users"))))
///     .meta("users/meta", vec![from_sync(|_| Ok(Flow::Continue))]);
/// assert_eq!(modules.len(), 2);
/// ```
#[derive(Default, Clone)]
pub struct Modules {
    entries: HashMap<String, Exports>,
}

impl Modules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route module whose default export is a single handler.
    #[must_use]
    pub fn handler(self, key: &str, handler: MiddlewareHandler) -> Self {
        self.chain(key, vec![handler])
    }

    /// Registers a route module whose default export is a sequence of handlers.
    #[must_use]
    pub fn chain(mut self, key: &str, handlers: Vec<MiddlewareHandler>) -> Self {
        self.entries.entry(normalize(key)).or_default().handlers = handlers;
        self
    }

    /// Registers the `middleware` export of a meta file.
    #[must_use]
    pub fn meta(mut self, key: &str, middleware: Vec<MiddlewareHandler>) -> Self {
        self.entries.entry(normalize(key)).or_default().middleware = middleware;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn handlers(&self, key: &str) -> Option<&[MiddlewareHandler]> {
        self.entries
            .get(&normalize(key))
            .map(|exports| exports.handlers.as_slice())
            .filter(|handlers| !handlers.is_empty())
    }

    fn middleware(&self, key: &str) -> &[MiddlewareHandler] {
        self.entries
            .get(&normalize(key))
            .map(|exports| exports.middleware.as_slice())
            .unwrap_or_default()
    }

    /// Keys registered here that no discovered file refers to.
    pub fn unused<'a>(&'a self, descriptors: &[RouteDescriptor]) -> Vec<&'a str> {
        let referenced: HashSet<String> = descriptors
            .iter()
            .flat_map(|d| std::iter::once(&d.module).chain(&d.meta))
            .map(|module| normalize(&module.key))
            .collect();
        let mut unused: Vec<&str> = self
            .entries
            .keys()
            .filter(|key| !referenced.contains(*key))
            .map(String::as_str)
            .collect();
        unused.sort_unstable();
        unused
    }
}

impl std::fmt::Debug for Modules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort_unstable();
        f.debug_struct("Modules").field("keys", &keys).finish()
    }
}

// Trims surrounding slashes, drops an extension and lower-cases the file name.
fn normalize(key: &str) -> String {
    let key = key.trim_matches('/');
    let (directory, file) = match key.rsplit_once('/') {
        Some((directory, file)) => (Some(directory), file),
        None => (None, key),
    };
    let stem = file.split('.').next().unwrap_or(file).to_ascii_lowercase();
    match directory {
        Some(directory) => format!("{directory}/{stem}"),
        None => stem,
    }
}

/// Composes the chain for one route: `root`, then each applicable meta file's
/// middleware (a meta file with nothing registered contributes nothing), then
/// the module's handlers.
///
/// # Errors
///
/// [`StartupError::MissingDefaultExport`] when the route module has no handlers
/// registered.
pub fn load(
    descriptor: &RouteDescriptor,
    root: &[MiddlewareHandler],
    modules: &Modules,
) -> Result<CompiledRoute, StartupError> {
    let handlers =
        modules
            .handlers(&descriptor.module.key)
            .ok_or_else(|| StartupError::MissingDefaultExport {
                path: descriptor.module.path.clone(),
            })?;

    let mut chain: Vec<MiddlewareHandler> = root.to_vec();
    for meta in &descriptor.meta {
        chain.extend(modules.middleware(&meta.key).iter().cloned());
    }
    chain.extend(handlers.iter().cloned());

    debug!(
        method = %descriptor.method,
        pattern = %descriptor.pattern,
        module = %descriptor.module.key,
        chain = chain.len(),
        "route loaded"
    );

    Ok(CompiledRoute {
        method: descriptor.method.clone(),
        pattern: descriptor.pattern.clone(),
        chain: chain.into(),
        module: descriptor.module.path.clone(),
    })
}

/// Loads every descriptor, warning about registry entries no file refers to.
pub fn load_all(
    descriptors: &[RouteDescriptor],
    root: &[MiddlewareHandler],
    modules: &Modules,
) -> Result<Vec<CompiledRoute>, StartupError> {
    for key in modules.unused(descriptors) {
        warn!(key, "registered module has no matching file in the route tree");
    }
    descriptors
        .iter()
        .map(|descriptor| load(descriptor, root, modules))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::compile::ModuleRef;
    use crate::http::Method;
    use crate::middleware::{Flow, from_sync};
    use crate::router::RoutePattern;
    use std::path::PathBuf;

    fn noop() -> MiddlewareHandler {
        from_sync(|_| Ok(Flow::Continue))
    }

    fn module(key: &str) -> ModuleRef {
        ModuleRef {
            path: PathBuf::from(format!("api/{key}.rs")),
            key: key.to_owned(),
        }
    }

    fn descriptor(key: &str, meta: &[&str]) -> RouteDescriptor {
        RouteDescriptor {
            method: Method::Get,
            pattern: RoutePattern::parse("/users"),
            module: module(key),
            meta: meta.iter().map(|m| module(m)).collect(),
        }
    }

    #[test]
    fn keys_are_normalized() {
        assert_eq!(normalize("/users/:userId/GET.rs"), "users/:userId/get");
        assert_eq!(normalize("Meta"), "meta");
        assert_eq!(normalize("Users/get"), "Users/get");
    }

    #[test]
    fn chain_is_root_then_meta_then_handlers() {
        let modules = Modules::new()
            .chain("users/get", vec![noop(), noop()])
            .meta("meta", vec![noop()])
            .meta("users/meta", vec![noop(), noop(), noop()]);
        let route = load(
            &descriptor("users/get", &["meta", "users/meta"]),
            &[noop()],
            &modules,
        )
        .unwrap();
        assert_eq!(route.chain.len(), 1 + 1 + 3 + 2);
        assert_eq!(route.method, Method::Get);
    }

    #[test]
    fn meta_without_middleware_contributes_nothing() {
        let modules = Modules::new().handler("users/get", noop());
        let route = load(&descriptor("users/get", &["users/meta"]), &[], &modules).unwrap();
        assert_eq!(route.chain.len(), 1);
    }

    #[test]
    fn missing_handlers_fail_with_the_module_path() {
        let modules = Modules::new().meta("users/get", vec![noop()]);
        let err = load(&descriptor("users/get", &[]), &[], &modules).unwrap_err();
        assert!(matches!(
            err,
            StartupError::MissingDefaultExport { ref path } if path == &PathBuf::from("api/users/get.rs")
        ));

        let err = load(&descriptor("users/get", &[]), &[], &Modules::new()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn unused_entries_are_reported() {
        let modules = Modules::new()
            .handler("users/get", noop())
            .handler("users/post", noop())
            .meta("orders/meta", vec![noop()]);
        let descriptors = [descriptor("users/get", &[])];
        assert_eq!(modules.unused(&descriptors), ["orders/meta", "users/post"]);
    }
}
