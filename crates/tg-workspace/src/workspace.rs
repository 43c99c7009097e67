// workspace.rs - Ephemeral workspace: a temp directory populated from a
// path -> content mapping, used as the working directory of one command run.
//
// Lifecycle:
// - acquire: create a uniquely named temp dir, write every file
// - run / inspect while Live
// - release: remove the tree; runs from Drop on every exit path
//
// A failed acquisition removes its half-built directory before returning.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::WorkspaceError;
use crate::paths::{display_relative, validate_relative};
use crate::process::{run_command, RunOptions, RunResult};

/// Name prefix of every workspace directory.
const DIR_PREFIX: &str = "tempground-";

/// Lifecycle state of a [`Workspace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    /// The directory exists; run and inspect operations are permitted.
    Live,
    /// The directory has been removed; every further operation fails.
    Released,
}

/// A temporary directory populated with caller-supplied files.
///
/// The directory is removed when the workspace is dropped, or earlier via
/// [`release`](Self::release). Removal failures are logged, never raised.
///
/// ```no_run
/// use tg_workspace::{RunOptions, Workspace};
///
/// let ws = Workspace::acquire([("hello.txt", "12.3\n")])?;
/// let result = ws.run(&["cat", "hello.txt"], &RunOptions::new())?;
/// assert_eq!(result.stdout, "12.3\n");
/// # Ok::<(), tg_workspace::WorkspaceError>(())
/// ```
#[derive(Debug)]
pub struct Workspace {
    /// `None` once released.
    dir: Option<TempDir>,

    /// Root path, kept after release for error messages.
    root: PathBuf,

    /// Relative paths written at acquisition, `/`-separated.
    files: BTreeSet<String>,
}

impl Workspace {
    /// Create a workspace under the system temp directory and write `files`
    /// into it.
    ///
    /// Paths must be relative; absolute paths and `..` components are
    /// rejected with [`WorkspaceError::InvalidPath`].
    pub fn acquire<I, K, V>(files: I) -> Result<Self, WorkspaceError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let dir = tempfile::Builder::new()
            .prefix(DIR_PREFIX)
            .tempdir()
            .map_err(|source| WorkspaceError::Creation {
                path: std::env::temp_dir(),
                source,
            })?;
        Self::populate(dir, files)
    }

    /// Like [`acquire`](Self::acquire), but creates the directory inside
    /// `parent` instead of the system temp directory.
    pub fn acquire_in<I, K, V>(parent: impl AsRef<Path>, files: I) -> Result<Self, WorkspaceError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let parent = parent.as_ref();
        let dir = tempfile::Builder::new()
            .prefix(DIR_PREFIX)
            .tempdir_in(parent)
            .map_err(|source| WorkspaceError::Creation {
                path: parent.to_path_buf(),
                source,
            })?;
        Self::populate(dir, files)
    }

    fn populate<I, K, V>(dir: TempDir, files: I) -> Result<Self, WorkspaceError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let mut workspace = Self {
            root: dir.path().to_path_buf(),
            dir: Some(dir),
            files: BTreeSet::new(),
        };

        for (relative_path, content) in files {
            if let Err(e) = workspace.write_new_file(relative_path.as_ref(), content.as_ref()) {
                workspace.release();
                return Err(e);
            }
        }

        tracing::info!(
            root = %workspace.root.display(),
            files = workspace.files.len(),
            "workspace acquired"
        );
        Ok(workspace)
    }

    fn write_new_file(&mut self, relative_path: &str, content: &[u8]) -> Result<(), WorkspaceError> {
        let relative = validate_relative(relative_path)?;
        let key = display_relative(&relative);
        if self.files.contains(&key) {
            return Err(WorkspaceError::InvalidPath {
                path: relative_path.to_string(),
                reason: "path appears more than once",
            });
        }

        let full_path = self.root.join(&relative);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).map_err(|source| WorkspaceError::Creation {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&full_path, content).map_err(|source| WorkspaceError::Creation {
            path: full_path.clone(),
            source,
        })?;

        tracing::debug!(path = %key, bytes = content.len(), "wrote workspace file");
        self.files.insert(key);
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkspaceState {
        if self.dir.is_some() {
            WorkspaceState::Live
        } else {
            WorkspaceState::Released
        }
    }

    /// Absolute path of the workspace directory.
    pub fn root(&self) -> Result<&Path, WorkspaceError> {
        match &self.dir {
            Some(dir) => Ok(dir.path()),
            None => Err(self.released()),
        }
    }

    /// Relative paths written at acquisition, sorted.
    pub fn files(&self) -> Result<Vec<&str>, WorkspaceError> {
        self.root()?;
        Ok(self.files.iter().map(String::as_str).collect())
    }

    /// Read back one file as text.
    pub fn read_file(&self, relative_path: &str) -> Result<String, WorkspaceError> {
        let full_path = self.root()?.join(validate_relative(relative_path)?);

        if !full_path.is_file() {
            return Err(WorkspaceError::FileNotFound {
                path: relative_path.to_string(),
            });
        }

        fs::read_to_string(&full_path).map_err(|source| WorkspaceError::Io {
            path: full_path,
            source,
        })
    }

    /// Every file currently under the root, including files created by
    /// commands run in the workspace. Relative, `/`-separated, sorted.
    pub fn list_files(&self) -> Result<Vec<String>, WorkspaceError> {
        let root = self.root()?;
        let mut files = Vec::new();
        walk_dir(root, root, &mut files)?;
        files.sort();
        Ok(files)
    }

    /// Human-readable dump of every acquired file, one header per file
    /// followed by its content.
    pub fn files_content(&self) -> Result<String, WorkspaceError> {
        let files = self
            .files()?
            .into_iter()
            .map(|path| self.read_file(path).map(|content| (path, content)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format_listing(files))
    }

    /// Run `command` (program followed by its arguments) with the workspace
    /// root as working directory and wait for it to finish.
    ///
    /// A non-zero exit code is returned in the [`RunResult`], not as an error.
    pub fn run<S: AsRef<OsStr>>(
        &self,
        command: &[S],
        options: &RunOptions,
    ) -> Result<RunResult, WorkspaceError> {
        run_command(self.root()?, command, options)
    }

    /// Remove the workspace directory.
    ///
    /// Returns `true` on the call that actually released the workspace and
    /// `false` for every later call. Removal errors are logged as warnings.
    pub fn release(&mut self) -> bool {
        let Some(dir) = self.dir.take() else {
            return false;
        };

        match dir.close() {
            Ok(()) => tracing::info!(root = %self.root.display(), "workspace released"),
            Err(e) => tracing::warn!(
                root = %self.root.display(),
                "failed to remove workspace directory: {}",
                e
            ),
        }
        true
    }

    fn released(&self) -> WorkspaceError {
        WorkspaceError::UseAfterRelease {
            root: self.root.clone(),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}

/// Render `(path, content)` pairs in the layout of
/// [`Workspace::files_content`]: a `=== path ===` header per file, then its
/// content, always ending in a newline.
pub fn format_listing<I, K, V>(files: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut output = String::new();
    for (path, content) in files {
        let content = content.as_ref();
        let _ = writeln!(output, "=== {} ===", path.as_ref());
        output.push_str(content);
        if !content.ends_with('\n') {
            output.push('\n');
        }
    }
    output
}

/// Acquire a workspace, hand it to `f`, and release it whatever `f` returns.
///
/// The workspace is also released if `f` panics.
pub fn with_workspace<I, K, V, T, E, F>(files: I, f: F) -> Result<T, E>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<[u8]>,
    E: From<WorkspaceError>,
    F: FnOnce(&Workspace) -> Result<T, E>,
{
    let mut workspace = Workspace::acquire(files)?;
    let outcome = f(&workspace);
    workspace.release();
    outcome
}

/// Recursively walk a directory and collect relative file paths.
fn walk_dir(dir: &Path, root: &Path, files: &mut Vec<String>) -> Result<(), WorkspaceError> {
    let entries = fs::read_dir(dir).map_err(|source| WorkspaceError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| WorkspaceError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|source| WorkspaceError::Io {
            path: path.clone(),
            source,
        })?;

        if file_type.is_dir() {
            walk_dir(&path, root, files)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            files.push(display_relative(rel));
        }
    }

    Ok(())
}
