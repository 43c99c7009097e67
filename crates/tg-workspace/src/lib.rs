//! # tg-workspace
//!
//! Ephemeral workspaces for smoke-testing published libraries.
//!
//! A [`Workspace`] is a uniquely named temp directory populated from a
//! mapping of relative paths to text. Commands run inside it with the
//! directory as working directory, and the directory is removed when the
//! workspace goes out of scope, on every exit path.
//!
//! ## Key components
//!
//! - [`Workspace`]: acquire, inspect, run, release. Release also runs
//!   from `Drop`.
//! - [`with_workspace`]: scoped helper for callers that prefer a closure.
//! - [`format_listing`]: the file dump layout of
//!   [`Workspace::files_content`], for files that never hit the disk.
//! - [`RunOptions`] / [`RunResult`]: stream capture, timeout, and environment
//!   overrides for one command, and its captured outcome.
//! - [`WorkspaceError`]: creation, launch, timeout and use-after-release
//!   failures. A non-zero exit code is data, not an error.

pub mod error;
mod paths;
pub mod process;
pub mod workspace;

pub use error::WorkspaceError;
pub use process::{OutputMode, RunOptions, RunResult};
pub use workspace::{format_listing, with_workspace, Workspace, WorkspaceState};
