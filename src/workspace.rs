//! Disposable per-invocation copies of an estate mirror.
use crate::cache::EstateCache;
use crate::estate::EstateRecord;
use anyhow::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("create temporary workspace: {0}")]
    Create(#[source] io::Error),
    #[error("copy {} into workspace: {source}", path.display())]
    Copy { path: PathBuf, source: io::Error },
}

/// An isolated working tree removed on drop unless retention was requested.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    keep: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn is_kept(&self) -> bool {
        self.keep
    }

    /// Leave the tree on disk after the guard drops.
    pub fn retain(&mut self) {
        self.keep = true;
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.keep || !self.root.exists() {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.root) {
            tracing::warn!(
                path = %self.root.display(),
                error = %err,
                "failed to remove workspace"
            );
        } else {
            tracing::debug!(path = %self.root.display(), "workspace removed");
        }
    }
}

/// Copy a mirror, `.git` included, into a fresh `concordat-<prefix>-*` dir.
pub fn provision(mirror: &Path, prefix: &str, keep: bool) -> Result<Workspace, WorkspaceError> {
    let dir = tempfile::Builder::new()
        .prefix(&format!("concordat-{prefix}-"))
        .disable_cleanup(true)
        .tempdir()
        .map_err(WorkspaceError::Create)?;
    let workspace = Workspace {
        root: dir.path().to_path_buf(),
        keep,
    };
    copy_tree(mirror, workspace.path())?;
    tracing::debug!(
        mirror = %mirror.display(),
        workspace = %workspace.path().display(),
        "workspace provisioned"
    );
    Ok(workspace)
}

/// Sync the estate cache, provision a workspace, and run `body` inside it.
///
/// The workspace is removed on every exit path unless `keep` is set.
pub fn with_workspace<T>(
    cache: &EstateCache,
    record: &EstateRecord,
    prefix: &str,
    keep: bool,
    body: impl FnOnce(&Workspace) -> Result<T>,
) -> Result<T> {
    let mirror = cache.sync(record)?;
    let workspace = provision(&mirror, prefix, keep)?;
    body(&workspace)
}

fn copy_tree(source: &Path, destination: &Path) -> Result<(), WorkspaceError> {
    let wrap = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| WorkspaceError::Copy { path, source }
    };
    fs::create_dir_all(destination).map_err(wrap(destination))?;
    for entry in fs::read_dir(source).map_err(wrap(source))? {
        let entry = entry.map_err(wrap(source))?;
        let from = entry.path();
        let to = destination.join(entry.file_name());
        let file_type = entry.file_type().map_err(wrap(&from))?;
        if file_type.is_symlink() {
            copy_symlink(&from, &to).map_err(wrap(&from))?;
        } else if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(wrap(&from))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let target = fs::read_link(from)?;
    std::os::unix::fs::symlink(target, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    if from.is_dir() {
        return Ok(());
    }
    fs::copy(from, to).map(|_| ())
}
