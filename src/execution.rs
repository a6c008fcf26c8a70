//! Run `plan`, `apply` and `validate` against a disposable estate workspace.
//!
//! Every command follows the same order: sync the mirror, provision a
//! workspace, write runtime variables, resolve the backend, `init`, then the
//! command itself. `apply` failures go through [`ApplyRecovery`].
use crate::backend::{self, BackendRuntime, SESSION_TOKEN_VAR};
use crate::cache::EstateCache;
use crate::config::{EnvSnapshot, GITHUB_TOKEN_VAR};
use crate::estate::EstateRecord;
use crate::inventory::sanitize_inventory;
use crate::prompt::Prompter;
use crate::recovery::{ApplyRecovery, Outcome};
use crate::tofu::{self, resolve_tofu_workdir, ExecutionIo, TofuLauncher};
use crate::workspace::with_workspace;
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const TFVARS_FILENAME: &str = "terraform.tfvars";
pub const AUTO_APPROVE: &str = "-auto-approve";

/// Per-invocation input, built once by the command layer.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub github_owner: String,
    pub github_token: String,
    pub extra_args: Vec<String>,
    pub keep_workdir: bool,
    /// Entries layered over the captured process environment.
    pub environment: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub exit_code: i32,
    /// Workspace path; only still on disk when the workdir was kept.
    pub workdir: PathBuf,
    /// Set for `apply` once the recovery pipeline has run.
    pub recovery: Option<Outcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstateCommand {
    Plan,
    Apply,
    Validate,
}

impl EstateCommand {
    pub fn verb(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Validate => "validate",
        }
    }
}

/// Prefix `-auto-approve` onto apply arguments; refuses without approval.
pub fn apply_arguments(extra_args: &[String], approved: bool) -> Result<Vec<String>> {
    if !approved {
        return Err(anyhow!(
            "Refusing to apply without approval; pass --yes to run tofu apply -auto-approve."
        ));
    }
    let mut args = extra_args.to_vec();
    if !args.iter().any(|arg| arg == AUTO_APPROVE) {
        args.insert(0, AUTO_APPROVE.to_string());
    }
    Ok(args)
}

/// Base environment for the tool: the captured snapshot, caller overrides,
/// and no blank session token.
pub fn prepare_environment(
    base: &EnvSnapshot,
    overrides: Option<&BTreeMap<String, String>>,
) -> EnvSnapshot {
    let mut env = base.clone();
    if let Some(overrides) = overrides {
        env.overlay(overrides);
    }
    if env
        .get(SESSION_TOKEN_VAR)
        .is_some_and(|token| token.trim().is_empty())
    {
        env.remove(SESSION_TOKEN_VAR);
    }
    env
}

fn tool_environment(
    env: &EnvSnapshot,
    runtime: Option<&BackendRuntime>,
    github_token: &str,
) -> BTreeMap<String, String> {
    let mut env = env.clone();
    if let Some(runtime) = runtime {
        env.overlay(&runtime.credentials.env_overrides());
    }
    match backend::session_token(&env) {
        Some(token) => env.set(SESSION_TOKEN_VAR, token),
        None => {
            env.remove(SESSION_TOKEN_VAR);
        }
    }
    env.set(GITHUB_TOKEN_VAR, github_token);
    env.into_vars()
}

fn write_tfvars(tool_dir: &Path, github_owner: &str) -> Result<()> {
    let path = tool_dir.join(TFVARS_FILENAME);
    fs::write(&path, format!("github_owner = \"{github_owner}\"\n"))
        .with_context(|| format!("write {}", path.display()))
}

/// Runs estate commands with injected cache, tool launcher and environment.
pub struct EstateRunner<'a> {
    cache: &'a EstateCache,
    launcher: &'a dyn TofuLauncher,
    env: &'a EnvSnapshot,
}

impl<'a> EstateRunner<'a> {
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

    pub fn plan(
        &self,
        record: &EstateRecord,
        options: &ExecutionOptions,
        io: &mut ExecutionIo<'_>,
    ) -> Result<ExecutionReport> {
        self.execute(record, EstateCommand::Plan, options, None, io)
    }

    /// `options.extra_args` must already carry `-auto-approve`; see
    /// [`apply_arguments`].
    pub fn apply(
        &self,
        record: &EstateRecord,
        options: &ExecutionOptions,
        prompter: &mut dyn Prompter,
        io: &mut ExecutionIo<'_>,
    ) -> Result<ExecutionReport> {
        self.execute(record, EstateCommand::Apply, options, Some(prompter), io)
    }

    pub fn validate(
        &self,
        record: &EstateRecord,
        options: &ExecutionOptions,
        io: &mut ExecutionIo<'_>,
    ) -> Result<ExecutionReport> {
        self.execute(record, EstateCommand::Validate, options, None, io)
    }

    fn execute(
        &self,
        record: &EstateRecord,
        command: EstateCommand,
        options: &ExecutionOptions,
        prompter: Option<&mut dyn Prompter>,
        io: &mut ExecutionIo<'_>,
    ) -> Result<ExecutionReport> {
        let env = prepare_environment(self.env, options.environment.as_ref());
        let verb = command.verb();
        with_workspace(
            self.cache,
            record,
            verb,
            options.keep_workdir,
            |workspace| {
                let root = workspace.path();
                io.note(&format!("execution workspace: {}", root.display()))?;
                let tool_dir = resolve_tofu_workdir(root);
                write_tfvars(&tool_dir, &options.github_owner)?;
                sanitize_inventory(root, &tool_dir, &record.inventory_path)?;

                let runtime = match command {
                    EstateCommand::Validate => None,
                    _ => backend::resolve_runtime(root, &tool_dir, &env)?,
                };
                if let Some(runtime) = &runtime {
                    io.note(&runtime.describe())?;
                }

                let tool_env = tool_environment(&env, runtime.as_ref(), &options.github_token);
                let mut tool = self
                    .launcher
                    .launch(&tool_dir, &tool_env)
                    .with_context(|| format!("start tofu for estate {:?}", record.alias))?;
                let tool = tool.as_mut();
                tracing::info!(
                    alias = %record.alias,
                    verb,
                    workdir = %tool_dir.display(),
                    remote_backend = runtime.is_some(),
                    "running estate command"
                );

                let report = |exit_code: i32, recovery: Option<Outcome>| ExecutionReport {
                    exit_code,
                    workdir: root.to_path_buf(),
                    recovery,
                };

                let init = tofu::invoke(tool, &init_arguments(command, runtime.as_ref()), io)?;
                if !init.success() {
                    return Ok(report(init.exit_code, None));
                }

                let mut args = vec![verb.to_string()];
                args.extend(options.extra_args.iter().cloned());
                match (command, prompter) {
                    (EstateCommand::Apply, Some(prompter)) => {
                        let outcome = ApplyRecovery::new(tool, prompter, io).run(&args)?;
                        Ok(report(outcome.exit_code(), Some(outcome.outcome)))
                    }
                    _ => {
                        let result = tofu::invoke(tool, &args, io)?;
                        Ok(report(result.exit_code, None))
                    }
                }
            },
        )
    }
}

fn init_arguments(command: EstateCommand, runtime: Option<&BackendRuntime>) -> Vec<String> {
    let mut args = vec!["init".to_string(), "-input=false".to_string()];
    if command == EstateCommand::Validate {
        args.push("-backend=false".to_string());
    } else if let Some(runtime) = runtime {
        args.push(runtime.init_argument());
    }
    args
}

#[cfg(test)]
#[path = "execution_tests.rs"]
mod tests;
