// paths.rs - Validation of caller-supplied relative paths.
//
// Absolute paths are rejected rather than re-rooted, so a mapping key always
// names exactly the file that ends up in the workspace.

use std::path::{Component, Path, PathBuf};

use crate::error::WorkspaceError;

/// Check that `relative_path` stays inside a workspace root and return it
/// with `.` components removed.
pub(crate) fn validate_relative(relative_path: &str) -> Result<PathBuf, WorkspaceError> {
    let reject = |reason| WorkspaceError::InvalidPath {
        path: relative_path.to_string(),
        reason,
    };

    if relative_path.is_empty() {
        return Err(reject("path is empty"));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(relative_path).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(reject("'..' would escape the workspace root"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(reject("absolute paths are not allowed"));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(reject("path resolves to the workspace root"));
    }

    Ok(normalized)
}

/// Render a relative path with `/` separators on every platform.
pub(crate) fn display_relative(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
