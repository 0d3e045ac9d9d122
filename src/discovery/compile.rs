//! Route compiler: derive patterns and applicable meta files from scanned paths.

use std::path::{Component, Path, PathBuf};

use super::StartupError;
use super::scan::{FileKind, RouteFile};
use crate::http::Method;
use crate::router::{RoutePattern, Segment};

/// A file in the route tree together with its registry key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRef {
    pub path: PathBuf,
    pub key: String,
}

impl ModuleRef {
    fn new(root: &Path, path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            key: module_key(root, path),
        }
    }
}

/// Everything needed to build one route: method, pattern, module and meta files.
#[derive(Debug, Clone)]
pub struct RouteDescriptor {
    pub method: Method,
    pub pattern: RoutePattern,
    pub module: ModuleRef,
    /// Applicable meta files, outermost directory first.
    pub meta: Vec<ModuleRef>,
}

/// The registry key of a file: its path relative to `root`, `/`-separated, with
/// everything from the first `.` of the file name dropped.
///
/// ```
/// use std::path::Path;
/// use treeroute::discovery::module_key;
///
/// let root = Path::new("/srv/app/api");
/// assert_eq!(module_key(root, &root.join("users/:userId/get.rs")), "users/:userId/get");
/// assert_eq!(module_key(root, &root.join("meta.rs")), "meta");
/// ```
pub fn module_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if let Some(last) = parts.last_mut() {
        if let Some((stem, _)) = last.split_once('.') {
            *last = stem.to_owned();
        }
    }
    parts.join("/")
}

/// Compiles scanned files into route descriptors, one per method file.
///
/// A method file at `<root>/a/:b/get.rs` mounted under `/api` becomes
/// `GET /api/a/:b`. Every meta file whose directory is the route's directory
/// or one of its ancestors applies to the route, outermost first.
///
/// Duplicate `(method, pattern)` pairs are rejected here, where the offending
/// files are still known. Patterns that differ only in parameter names count as
/// duplicates since no request could tell them apart.
pub fn compile(
    root: &Path,
    files: &[RouteFile],
    mount_path: Option<&str>,
) -> Result<Vec<RouteDescriptor>, StartupError> {
    let mount: Vec<Segment> = mount_path
        .unwrap_or_default()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(Segment::parse)
        .collect();

    let mut metas: Vec<(usize, &Path)> = files
        .iter()
        .filter(|file| file.kind == FileKind::Meta)
        .map(|file| (depth(root, &file.path), file.path.as_path()))
        .collect();
    metas.sort();

    let mut descriptors: Vec<RouteDescriptor> = Vec::new();
    for file in files {
        let FileKind::Method(method) = &file.kind else {
            continue;
        };
        let directory = parent(&file.path);

        let pattern: RoutePattern = mount
            .iter()
            .cloned()
            .chain(directory_segments(root, directory))
            .collect();

        let meta = metas
            .iter()
            .filter(|(_, meta)| directory.starts_with(parent(meta)))
            .map(|(_, meta)| ModuleRef::new(root, meta))
            .collect();

        if let Some(existing) = descriptors
            .iter()
            .find(|d| &d.method == method && d.pattern.same_shape(&pattern))
        {
            return Err(StartupError::DuplicateRoute {
                method: method.clone(),
                pattern: pattern.to_string(),
                first: existing.module.path.clone(),
                second: file.path.clone(),
            });
        }

        descriptors.push(RouteDescriptor {
            method: method.clone(),
            pattern,
            module: ModuleRef::new(root, &file.path),
            meta,
        });
    }
    Ok(descriptors)
}

fn parent(path: &Path) -> &Path {
    path.parent().unwrap_or(Path::new(""))
}

fn depth(root: &Path, path: &Path) -> usize {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .count()
}

fn directory_segments(root: &Path, directory: &Path) -> Vec<Segment> {
    directory
        .strip_prefix(root)
        .unwrap_or(directory)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(Segment::parse(&part.to_string_lossy())),
            _ => None,
        })
        .collect()
}
