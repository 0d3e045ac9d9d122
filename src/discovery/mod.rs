//! Route discovery: turn a directory tree into compiled routes at startup.
//!
//! Discovery runs once, before the server accepts connections, in three passes:
//!
//! 1. [`scan`] walks the tree and classifies every file as a method file or a
//!    meta file, rejecting anything else.
//! 2. [`compile`] turns each method file into a [`RouteDescriptor`]: its method,
//!    its URL pattern and the meta files that apply to it.
//! 3. [`load`] resolves a descriptor against the [`Modules`] registry and
//!    composes the final middleware chain.
//!
//! Every failure here is a [`StartupError`]; the application never starts
//! serving with a partially built route table.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::http::Method;

pub mod compile;
pub mod load;
pub mod scan;

pub use compile::{ModuleRef, RouteDescriptor, compile, module_key};
pub use load::{Modules, load, load_all};
pub use scan::{FileKind, RouteFile, scan};

/// Errors raised while building the route table. All of them abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("directory contains illegal files:\n{}", .directory.display())]
    IllegalFile { directory: PathBuf, file: PathBuf },

    #[error("directory is a leaf, but doesn't contain a method file:\n{}", .directory.display())]
    LeafWithoutHandler { directory: PathBuf },

    #[error("no default export defined in:\n{}", .path.display())]
    MissingDefaultExport { path: PathBuf },

    #[error("duplicate route {method} {pattern} in:\n{}\n{}", .first.display(), .second.display())]
    DuplicateRoute {
        method: Method,
        pattern: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StartupError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    /// `true` for errors caused by the shape of the route tree itself.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::IllegalFile { .. } | Self::LeafWithoutHandler { .. }
        )
    }

    /// `true` for errors caused by what the route modules (or settings) declare.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingDefaultExport { .. } | Self::DuplicateRoute { .. } | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_path() {
        let err = StartupError::LeafWithoutHandler {
            directory: PathBuf::from("api/users"),
        };
        assert_eq!(
            err.to_string(),
            "directory is a leaf, but doesn't contain a method file:\napi/users"
        );
        assert!(err.is_structural());
        assert!(!err.is_configuration());

        let err = StartupError::MissingDefaultExport {
            path: PathBuf::from("api/users/get.rs"),
        };
        assert_eq!(err.to_string(), "no default export defined in:\napi/users/get.rs");
        assert!(err.is_configuration());
    }
}
