//! Tree scanner: enumerate and classify the files of a route tree.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::StartupError;
use crate::http::Method;

/// Stem of the files holding directory-scoped middleware.
pub const META_STEM: &str = "meta";

/// What a file in the route tree declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// A route module handling one method for its directory's path.
    Method(Method),
    /// Middleware applied to every route in its directory and below.
    Meta,
}

impl FileKind {
    /// Classifies a file by the part of its name before the first `.`.
    ///
    /// Matching is case-insensitive and ignores the extension, so `get.rs`,
    /// `GET.js` and a bare `get` are all the same kind.
    ///
    /// ```
    /// use treeroute::discovery::FileKind;
    /// use treeroute::http::Method;
    ///
    /// assert_eq!(FileKind::classify("Post.ts"), Some(FileKind::Method(Method::Post)));
    /// assert_eq!(FileKind::classify("meta.rs"), Some(FileKind::Meta));
    /// assert_eq!(FileKind::classify("README.md"), None);
    /// ```
    pub fn classify(file_name: &str) -> Option<Self> {
        let stem = file_name.split('.').next().unwrap_or(file_name);
        if stem.eq_ignore_ascii_case(META_STEM) {
            Some(Self::Meta)
        } else {
            Method::from_route_name(stem).map(Self::Method)
        }
    }
}

/// A classified file found under the route root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFile {
    pub path: PathBuf,
    pub kind: FileKind,
}

/// Walks `root` depth-first and returns every method and meta file.
///
/// Entries are visited in name order so the result is deterministic. Each
/// directory's own files come before those of its subdirectories. Symlinks are
/// followed.
///
/// # Errors
///
/// - [`StartupError::IllegalFile`] for a file that is neither a method nor a meta file.
/// - [`StartupError::LeafWithoutHandler`] for a directory with no subdirectories
///   and no method file.
/// - [`StartupError::Io`] when a directory cannot be read.
pub fn scan(root: &Path) -> Result<Vec<RouteFile>, StartupError> {
    let walker = WalkDir::new(root).follow_links(true).sort_by(|a, b| {
        let (a_dir, b_dir) = (a.file_type().is_dir(), b.file_type().is_dir());
        a_dir.cmp(&b_dir).then_with(|| a.file_name().cmp(b.file_name()))
    });

    let mut files = Vec::new();
    // directories whose subtree is still being walked, innermost last
    let mut open: Vec<OpenDirectory> = Vec::new();

    for entry in walker {
        let entry = entry.map_err(|err| walk_error(root, err))?;
        while open.last().is_some_and(|dir| dir.depth >= entry.depth()) {
            if let Some(directory) = open.pop() {
                directory.close()?;
            }
        }

        if entry.file_type().is_dir() {
            if let Some(parent) = open.last_mut() {
                parent.has_subdirectory = true;
            }
            open.push(OpenDirectory::new(entry.path(), entry.depth()));
            continue;
        }

        let Some(parent) = open.last_mut() else {
            return Err(StartupError::Io {
                path: root.to_path_buf(),
                source: io::Error::from(io::ErrorKind::NotADirectory),
            });
        };
        let Some(kind) = FileKind::classify(&entry.file_name().to_string_lossy()) else {
            return Err(StartupError::IllegalFile {
                directory: parent.path.clone(),
                file: entry.into_path(),
            });
        };
        parent.has_method |= matches!(kind, FileKind::Method(_));
        files.push(RouteFile {
            path: entry.into_path(),
            kind,
        });
    }

    while let Some(directory) = open.pop() {
        directory.close()?;
    }

    debug!(root = %root.display(), files = files.len(), "route tree scanned");
    Ok(files)
}

struct OpenDirectory {
    path: PathBuf,
    depth: usize,
    has_subdirectory: bool,
    has_method: bool,
}

impl OpenDirectory {
    fn new(path: &Path, depth: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            depth,
            has_subdirectory: false,
            has_method: false,
        }
    }

    fn close(self) -> Result<(), StartupError> {
        if self.has_subdirectory || self.has_method {
            Ok(())
        } else {
            Err(StartupError::LeafWithoutHandler {
                directory: self.path,
            })
        }
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> StartupError {
    let path = err.path().unwrap_or(root).to_path_buf();
    StartupError::Io {
        path,
        source: err.into(),
    }
}
