//! Path helpers for keeping installed content inside its alias directory.

use std::path::{Component, Path, PathBuf};

/// Normalize a path by processing `.` and `..` components lexically.
/// This does not access the file system and does not follow symlinks.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push(component);
                }
            }
            _ => result.push(component),
        }
    }
    result
}

/// Check if `path` is `dir` or lies below it, comparing normalized components.
///
/// `/opt/root/alias/../../etc` is NOT under `/opt/root`.
pub fn is_path_under(path: &Path, dir: &Path) -> bool {
    let path = normalize_path(path);
    let dir = normalize_path(dir);
    path.starts_with(&dir)
}

/// Join a relative path onto `root`, refusing anything that escapes it.
///
/// Absolute paths and `..` traversal out of `root` yield `None`.
pub fn join_under(root: &Path, relative: &Path) -> Option<PathBuf> {
    if relative.has_root()
        || relative
            .components()
            .any(|c| matches!(c, Component::Prefix(_)))
    {
        return None;
    }
    let joined = normalize_path(&root.join(relative));
    is_path_under(&joined, root).then_some(joined)
}

/// Express `path` relative to `base`; `None` when no relative form exists
/// (for example different drive letters on Windows).
pub fn relative_to(base: &Path, path: &Path) -> Option<PathBuf> {
    let result = pathdiff::diff_paths(path, base)?;
    if result.is_absolute() {
        return None;
    }
    Some(result)
}
