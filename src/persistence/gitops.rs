//! Git plumbing for the persistence branch.
use super::PersistenceError;
use crate::cache::ORIGIN;
use crate::gitutils;
use chrono::{DateTime, Utc};
use git2::{Oid, Remote, Repository, Signature, Status, StatusOptions};
use std::fs;
use std::path::Path;

pub const COMMIT_MESSAGE: &str = "chore: configure remote state persistence";
const FALLBACK_NAME: &str = "concordat";
const FALLBACK_EMAIL: &str = "concordat@local";

fn git_error(action: impl Into<String>) -> impl FnOnce(git2::Error) -> PersistenceError {
    let action = action.into();
    move |source| PersistenceError::Git { action, source }
}

/// Paths with staged, unstaged or untracked changes, sorted.
pub fn dirty_paths(repo: &Repository) -> Result<Vec<String>, git2::Error> {
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);
    let statuses = repo.statuses(Some(&mut options))?;
    let mut paths: Vec<String> = statuses
        .iter()
        .filter(|entry| entry.status() != Status::CURRENT)
        .filter_map(|entry| entry.path().map(str::to_string))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Refuse to work from a mirror carrying local modifications.
pub fn ensure_clean(mirror: &Path, alias: &str) -> Result<(), PersistenceError> {
    let repo = Repository::open(mirror).map_err(git_error(format!(
        "open estate cache {}",
        mirror.display()
    )))?;
    let dirty = dirty_paths(&repo).map_err(git_error("read estate cache status"))?;
    if dirty.is_empty() {
        return Ok(());
    }
    Err(PersistenceError::DirtyCache {
        alias: alias.to_string(),
        paths: dirty.join(", "),
    })
}

pub fn branch_name(now: DateTime<Utc>) -> String {
    format!("estate/persist-{}", now.format("%Y%m%d%H%M%S"))
}

/// Commit `paths` (relative to the work tree) on a fresh `branch` cut from
/// `base_branch`, replacing any branch of the same name.
pub fn commit_changes(
    repo: &Repository,
    base_branch: &str,
    branch: &str,
    paths: &[&Path],
) -> Result<Oid, PersistenceError> {
    let base_ref = format!("refs/heads/{base_branch}");
    let base = repo
        .revparse_single(&base_ref)
        .and_then(|object| object.peel_to_commit())
        .map_err(git_error(format!("resolve base branch {base_branch:?}")))?;
    let on_branch = repo
        .head()
        .ok()
        .is_some_and(|head| head.shorthand() == Some(branch));
    if on_branch {
        repo.set_head(&base_ref).map_err(git_error(format!(
            "leave branch {branch:?} before recreating it"
        )))?;
    }
    repo.branch(branch, &base, true)
        .map_err(git_error(format!("create branch {branch:?}")))?;
    repo.set_head(&format!("refs/heads/{branch}"))
        .map_err(git_error(format!("switch to branch {branch:?}")))?;

    let mut index = repo.index().map_err(git_error("open index"))?;
    for path in paths {
        index
            .add_path(path)
            .map_err(git_error(format!("stage {}", path.display())))?;
    }
    index.write().map_err(git_error("write index"))?;
    let tree_id = index.write_tree().map_err(git_error("write tree"))?;
    let tree = repo.find_tree(tree_id).map_err(git_error("find tree"))?;
    let signature = repo
        .signature()
        .or_else(|_| Signature::now(FALLBACK_NAME, FALLBACK_EMAIL))
        .map_err(git_error("build commit signature"))?;
    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        COMMIT_MESSAGE,
        &tree,
        &[&base],
    )
    .map_err(git_error("commit persistence changes"))
}

/// Force-push `branch` to the remote matching `repo_url`, else `origin`,
/// else the first configured remote.
pub fn push_branch(
    repo: &Repository,
    branch: &str,
    repo_url: &str,
) -> Result<(), PersistenceError> {
    let mut remote = resolve_remote(repo, repo_url)?;
    let url = remote.url().unwrap_or(repo_url).to_string();
    if is_non_bare_local(&url) {
        return Err(PersistenceError::NonBareRemote(url));
    }
    let refspec = format!("+refs/heads/{branch}:refs/heads/{branch}");
    let mut options = gitutils::push_options(&url);
    remote
        .push(&[refspec.as_str()], Some(&mut options))
        .map_err(git_error(format!("push branch {branch:?} to {url}")))
}

/// libgit2 only pushes into bare local repositories.
fn is_non_bare_local(url: &str) -> bool {
    if !gitutils::is_local_url(url) {
        return false;
    }
    let path = url.strip_prefix("file://").unwrap_or(url);
    Repository::open(path).is_ok_and(|repo| !repo.is_bare())
}

fn resolve_remote<'r>(
    repo: &'r Repository,
    repo_url: &str,
) -> Result<Remote<'r>, PersistenceError> {
    let names: Vec<String> = repo
        .remotes()
        .map_err(git_error("list remotes"))?
        .iter()
        .flatten()
        .map(str::to_string)
        .collect();
    let find = |name: &str| {
        repo.find_remote(name)
            .map_err(git_error(format!("open remote {name:?}")))
    };
    for name in &names {
        let remote = find(name.as_str())?;
        if remote.url().is_some_and(|url| urls_match(url, repo_url)) {
            return Ok(remote);
        }
    }
    if names.iter().any(|name| name == ORIGIN) {
        return find(ORIGIN);
    }
    match names.first() {
        Some(name) => find(name.as_str()),
        None => Err(PersistenceError::NoRemotes),
    }
}

fn urls_match(remote_url: &str, requested: &str) -> bool {
    if remote_url == requested {
        return true;
    }
    match (fs::canonicalize(remote_url), fs::canonicalize(requested)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}
