//! Persistent per-estate repository mirrors.
//!
//! Each estate alias owns one non-bare clone under the cache root. A sync
//! clones when the mirror is absent and otherwise fetches `origin` and
//! hard-resets the estate branch to the remote tip. The mirror is never
//! touched until the fetch and ref lookup have both succeeded.
use crate::estate::{is_safe_alias, EstateRecord};
use crate::gitutils;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{ErrorCode, Oid, Repository, ResetType};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

pub const ORIGIN: &str = "origin";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Estate alias is required to cache the repository.")]
    AliasRequired,
    #[error("Estate alias {0:?} would place the cache outside the cache root.")]
    UnsafeAlias(String),
    #[error("Cached estate {alias:?} is bare; remove {} and retry.", path.display())]
    Bare { alias: String, path: PathBuf },
    #[error("Cached estate is missing the 'origin' remote; remove it and retry.")]
    MissingOrigin { alias: String },
    #[error("Branch {branch:?} is missing from remote {remote:?}.")]
    MissingBranch { branch: String, remote: String },
    #[error("estate {alias:?}: {source}")]
    Transport { alias: String, source: git2::Error },
    #[error("prepare estate cache {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Owner of the cache root; one mirror per alias lives directly below it.
#[derive(Debug, Clone)]
pub struct EstateCache {
    root: PathBuf,
}

impl EstateCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mirror_path(&self, alias: &str) -> PathBuf {
        self.root.join(alias)
    }

    /// Ensure the estate mirror exists and matches the remote branch tip.
    pub fn sync(&self, record: &EstateRecord) -> Result<PathBuf, CacheError> {
        if record.alias.trim().is_empty() {
            return Err(CacheError::AliasRequired);
        }
        if !is_safe_alias(&record.alias) {
            return Err(CacheError::UnsafeAlias(record.alias.clone()));
        }
        let destination = self.mirror_path(&record.alias);
        let start = Instant::now();
        if destination.exists() {
            refresh(record, &destination)?;
            tracing::info!(
                alias = %record.alias,
                branch = %record.branch,
                elapsed_ms = start.elapsed().as_millis(),
                "estate cache refreshed"
            );
        } else {
            clone(record, &destination)?;
            tracing::info!(
                alias = %record.alias,
                branch = %record.branch,
                elapsed_ms = start.elapsed().as_millis(),
                "estate cache cloned"
            );
        }
        Ok(destination)
    }
}

fn clone(record: &EstateRecord, destination: &Path) -> Result<(), CacheError> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|source| CacheError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let mut builder = RepoBuilder::new();
    builder
        .branch(&record.branch)
        .fetch_options(gitutils::fetch_options(&record.repo_url));
    if let Err(source) = builder.clone(&record.repo_url, destination) {
        // A failed clone can leave a half-written directory that the next sync
        // would mistake for a mirror.
        if destination.exists() {
            let _ = fs::remove_dir_all(destination);
        }
        return Err(CacheError::Transport {
            alias: record.alias.clone(),
            source,
        });
    }
    Ok(())
}

fn refresh(record: &EstateRecord, destination: &Path) -> Result<(), CacheError> {
    let transport = |source: git2::Error| CacheError::Transport {
        alias: record.alias.clone(),
        source,
    };
    let repo = Repository::open(destination).map_err(transport)?;
    if repo.is_bare() {
        return Err(CacheError::Bare {
            alias: record.alias.clone(),
            path: destination.to_path_buf(),
        });
    }
    let mut remote = match repo.find_remote(ORIGIN) {
        Ok(remote) => remote,
        Err(err) if err.code() == ErrorCode::NotFound => {
            return Err(CacheError::MissingOrigin {
                alias: record.alias.clone(),
            })
        }
        Err(err) => return Err(transport(err)),
    };
    let url = remote.url().unwrap_or(&record.repo_url).to_string();
    let mut options = gitutils::fetch_options(&url);
    remote
        .fetch(&[] as &[&str], Some(&mut options), None)
        .map_err(transport)?;

    let target = remote_branch_tip(&repo, &record.branch)
        .map_err(transport)?
        .ok_or_else(|| CacheError::MissingBranch {
            branch: record.branch.clone(),
            remote: ORIGIN.to_string(),
        })?;
    checkout_branch(&repo, &record.branch, target).map_err(transport)
}

fn remote_branch_tip(repo: &Repository, branch: &str) -> Result<Option<Oid>, git2::Error> {
    let name = format!("refs/remotes/{ORIGIN}/{branch}");
    match repo.find_reference(&name) {
        Ok(reference) => Ok(reference.target()),
        Err(err) if matches!(err.code(), ErrorCode::NotFound | ErrorCode::InvalidSpec) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Point the local branch at `target`, make it HEAD, and force the work tree
/// to match.
fn checkout_branch(repo: &Repository, branch: &str, target: Oid) -> Result<(), git2::Error> {
    let local = format!("refs/heads/{branch}");
    repo.reference(&local, target, true, "concordat: sync estate cache")?;
    repo.set_head(&local)?;
    let commit = repo.find_commit(target)?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.reset(commit.as_object(), ResetType::Hard, Some(&mut checkout))?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
    Ok(())
}
