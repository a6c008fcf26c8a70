//! Configure remote state for an estate.
//!
//! `persist` writes `backend/<alias>.tfbackend` and the backend manifest in a
//! workspace copied from a clean mirror, commits both on a timestamped
//! branch, and pushes that branch. Nothing is committed when the estate
//! already carries the same configuration.
mod files;
mod gitops;
mod inputs;

pub use files::{render_tfbackend, write_if_changed, write_manifest_if_changed};
pub use gitops::{branch_name, dirty_paths, COMMIT_MESSAGE};
pub use inputs::{
    collect_inputs, defaults_from, normalize_endpoint_url, validate_settings, BackendSettings,
    PersistenceInputs,
};

use crate::backend::{BackendDescriptor, BackendError, BACKEND_DIR, MANIFEST_PATH, SCHEMA_VERSION};
use crate::cache::EstateCache;
use crate::config::EnvSnapshot;
use crate::estate::EstateRecord;
use crate::prompt::Prompter;
use crate::tofu::{self, ExecutionIo, TofuLauncher};
use crate::workspace;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use git2::Repository;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

pub const ALREADY_CONFIGURED: &str = "backend already configured";
pub const PUSHED_BRANCH: &str = "pushed branch";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Estate cache for {alias:?} has uncommitted changes: {paths}")]
    DirtyCache { alias: String, paths: String },
    #[error("{0} is required.")]
    Required(&'static str),
    #[error("{0} is required in non-interactive mode; provide a flag or environment variable.")]
    NonInteractive(&'static str),
    #[error("{0} may not include directory traversals.")]
    Traversal(&'static str),
    #[error("Endpoint must include an https:// scheme (for example, https://s3.example.com).")]
    EndpointScheme,
    #[error("Endpoint must use HTTPS (for example, https://s3.example.com).")]
    InsecureEndpoint,
    #[error("{} already exists; rerun with --force to replace.", .0.display())]
    Exists(PathBuf),
    #[error("Repository has no remotes configured for persistence.")]
    NoRemotes,
    #[error("Cannot push to {0}: local remotes must be bare repositories (git init --bare).")]
    NonBareRemote(String),
    #[error("{action}: {source}")]
    Git { action: String, source: git2::Error },
    #[error("write {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("read answer: {0}")]
    Prompt(#[source] io::Error),
    #[error("tofu fmt failed with exit code {0}")]
    Format(i32),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, Default)]
pub struct PersistOptions {
    pub inputs: PersistenceInputs,
    pub force: bool,
    pub allow_insecure_endpoint: bool,
    /// Run `tofu fmt -recursive` before committing.
    pub fmt: bool,
    /// Clock used for the branch name; defaults to now.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Outcome of a persist run. Paths are relative to the estate root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceResult {
    pub backend_path: PathBuf,
    pub manifest_path: PathBuf,
    pub branch: Option<String>,
    pub updated: bool,
    pub message: String,
}

impl PersistenceResult {
    pub fn render(&self) -> String {
        let action = if self.updated { "updated" } else { "unchanged" };
        let mut parts = vec![format!(
            "{action} {} and {}",
            self.backend_path.display(),
            self.manifest_path.display()
        )];
        if !self.message.is_empty() {
            parts.push(self.message.clone());
        }
        if let Some(branch) = &self.branch {
            parts.push(format!("branch: {branch}"));
        }
        parts.join("; ")
    }
}

pub struct Persister<'a> {
    cache: &'a EstateCache,
    launcher: &'a dyn TofuLauncher,
    env: &'a EnvSnapshot,
}

impl<'a> Persister<'a> {
    pub fn new(
        cache: &'a EstateCache,
        launcher: &'a dyn TofuLauncher,
        env: &'a EnvSnapshot,
    ) -> Self {
        Self {
            cache,
            launcher,
            env,
        }
    }

    pub fn persist(
        &self,
        record: &EstateRecord,
        options: &PersistOptions,
        prompter: &mut dyn Prompter,
        io: &mut ExecutionIo<'_>,
    ) -> Result<PersistenceResult> {
        let mirror = self.cache.sync(record)?;
        gitops::ensure_clean(&mirror, &record.alias)?;
        let workspace = workspace::provision(&mirror, "persist", false)?;
        let root = workspace.path();

        let backend_path = PathBuf::from(BACKEND_DIR).join(format!("{}.tfbackend", record.alias));
        let manifest_path = PathBuf::from(MANIFEST_PATH);
        let existing = BackendDescriptor::load(&root.join(&manifest_path))?;

        let defaults = defaults_from(record, existing.as_ref());
        let mut settings = collect_inputs(&options.inputs, &defaults, prompter, io.stderr)?;
        settings.endpoint = normalize_endpoint_url(&settings.endpoint);
        validate_settings(&settings, options.allow_insecure_endpoint)?;

        let descriptor = BackendDescriptor {
            schema_version: SCHEMA_VERSION,
            enabled: true,
            bucket: settings.bucket,
            key_prefix: settings.key_prefix,
            key_suffix: settings.key_suffix,
            region: settings.region,
            endpoint: settings.endpoint,
            backend_config_path: backend_path.to_string_lossy().into_owned(),
            notification_topic: existing.and_then(|existing| existing.notification_topic),
        };

        let backend_changed = write_if_changed(
            &root.join(&backend_path),
            &render_tfbackend(&descriptor),
            options.force,
        )
        .map_err(|err| relative_to(err, root))?;
        let manifest_changed =
            write_manifest_if_changed(&root.join(&manifest_path), &descriptor, options.force)
                .map_err(|err| relative_to(err, root))?;
        if !backend_changed && !manifest_changed {
            return Ok(PersistenceResult {
                backend_path,
                manifest_path,
                branch: None,
                updated: false,
                message: ALREADY_CONFIGURED.to_string(),
            });
        }

        if options.fmt {
            self.format(root, io)?;
        }

        let start = Instant::now();
        let repo = Repository::open(root)
            .with_context(|| format!("open estate workspace {}", root.display()))?;
        let branch = branch_name(options.timestamp.unwrap_or_else(Utc::now));
        gitops::commit_changes(
            &repo,
            &record.branch,
            &branch,
            &[backend_path.as_path(), manifest_path.as_path()],
        )?;
        gitops::push_branch(&repo, &branch, &record.repo_url)?;
        tracing::info!(
            alias = %record.alias,
            branch = %branch,
            elapsed_ms = start.elapsed().as_millis(),
            "persistence branch pushed"
        );

        Ok(PersistenceResult {
            backend_path,
            manifest_path,
            branch: Some(branch),
            updated: true,
            message: PUSHED_BRANCH.to_string(),
        })
    }

    fn format(&self, root: &Path, io: &mut ExecutionIo<'_>) -> Result<()> {
        let mut tool = self.launcher.launch(root, self.env.vars())?;
        let args = ["fmt".to_string(), "-recursive".to_string()];
        let result = tofu::invoke(tool.as_mut(), &args, io)?;
        if !result.success() {
            return Err(PersistenceError::Format(result.exit_code).into());
        }
        Ok(())
    }
}

fn relative_to(err: PersistenceError, root: &Path) -> PersistenceError {
    match err {
        PersistenceError::Exists(path) => PersistenceError::Exists(
            path.strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or(path),
        ),
        other => other,
    }
}

#[cfg(test)]
#[path = "persistence_tests.rs"]
mod tests;
