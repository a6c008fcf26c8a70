//! Self-healing `apply`.
//!
//! A failed apply is classified by [`detect`]. Two failure classes can be
//! remediated after the operator confirms:
//!
//! - repositories that already exist on GitHub but are missing from state are
//!   imported, first by name and then by `owner/name`;
//! - repositories blocked by `prevent_destroy` are removed from state.
//!
//! Remediation is followed by exactly one retried apply. Partial progress
//! (imports or state removals that succeeded) is never rolled back.
pub mod detect;

use crate::prompt::Prompter;
use crate::tofu::{self, ExecutionIo, NormalizedResult, Tofu, TofuError};
pub use detect::{
    detect_missing_imports, detect_prevent_destroy, matching_state_addresses, RepositoryImport,
};

const IMPORT_GUIDANCE: &str = "re-run with --keep-workdir and import manually";
const STATE_RM_GUIDANCE: &str =
    "re-run with --keep-workdir and remove resources with `tofu state rm` manually";

/// What a failed apply looks like to the recovery logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    MissingImports(Vec<RepositoryImport>),
    PreventDestroy(Vec<String>),
    Unrecognized,
}

/// Classify combined apply output. Missing imports win when both match.
pub fn classify(output: &str) -> Failure {
    let imports = detect_missing_imports(output);
    if !imports.is_empty() {
        return Failure::MissingImports(imports);
    }
    let slugs = detect_prevent_destroy(output);
    if !slugs.is_empty() {
        return Failure::PreventDestroy(slugs);
    }
    Failure::Unrecognized
}

/// Terminal state of one apply pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Unrecognized,
    NotInteractive,
    Declined,
    ImportFailed,
    StateListFailed,
    NothingToRemove,
    StateRemoveFailed,
    Retried,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub outcome: Outcome,
    /// Result the pipeline reports: the retry, a failed remediation step, or
    /// the original failure.
    pub result: NormalizedResult,
}

impl RecoveryReport {
    pub fn exit_code(&self) -> i32 {
        self.result.exit_code
    }

    fn new(outcome: Outcome, result: NormalizedResult) -> Self {
        tracing::debug!(?outcome, exit_code = result.exit_code, "apply pipeline finished");
        Self { outcome, result }
    }
}

/// Drives one apply invocation through detection, remediation and retry.
pub struct ApplyRecovery<'a, 'io> {
    tofu: &'a mut dyn Tofu,
    prompter: &'a mut dyn Prompter,
    io: &'a mut ExecutionIo<'io>,
}

impl<'a, 'io> ApplyRecovery<'a, 'io> {
    pub fn new(
        tofu: &'a mut dyn Tofu,
        prompter: &'a mut dyn Prompter,
        io: &'a mut ExecutionIo<'io>,
    ) -> Self {
        Self { tofu, prompter, io }
    }

    /// Run `args` (an apply command line) and recover from known failures.
    pub fn run(&mut self, args: &[String]) -> Result<RecoveryReport, TofuError> {
        let result = tofu::invoke(self.tofu, args, self.io)?;
        if result.success() {
            return Ok(RecoveryReport::new(Outcome::Succeeded, result));
        }
        self.recover(args, result)
    }

    /// Attempt remediation for an already failed apply.
    pub fn recover(
        &mut self,
        args: &[String],
        failed: NormalizedResult,
    ) -> Result<RecoveryReport, TofuError> {
        let failure = classify(&failed.combined());
        tracing::debug!(?failure, "classified apply failure");
        match failure {
            Failure::Unrecognized => Ok(RecoveryReport::new(Outcome::Unrecognized, failed)),
            Failure::MissingImports(imports) => self.recover_imports(args, failed, &imports),
            Failure::PreventDestroy(slugs) => self.recover_prevent_destroy(args, failed, &slugs),
        }
    }

    fn recover_imports(
        &mut self,
        args: &[String],
        failed: NormalizedResult,
        imports: &[RepositoryImport],
    ) -> Result<RecoveryReport, TofuError> {
        let repos = imports
            .iter()
            .map(|candidate| candidate.slug.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let message = format!(
            "One or more GitHub repositories already exist but are missing from state.\n\
             Import into state and retry apply? ({repos}) [y/N]: "
        );
        if let Some(outcome) = self.confirm(&message, "auto-import", IMPORT_GUIDANCE)? {
            return Ok(RecoveryReport::new(outcome, failed));
        }

        for candidate in imports {
            if let Some(import_failure) = self.import_candidate(candidate)? {
                self.io.note(&format!("auto-import failed; {IMPORT_GUIDANCE}"))?;
                return Ok(RecoveryReport::new(Outcome::ImportFailed, import_failure));
            }
        }
        self.retry(args)
    }

    /// Try each import id in turn; returns the first failure if all fail.
    fn import_candidate(
        &mut self,
        candidate: &RepositoryImport,
    ) -> Result<Option<NormalizedResult>, TofuError> {
        let mut first_failure = None;
        for import_id in candidate.import_ids() {
            self.io.note(&format!(
                "running: tofu import {} {import_id} (cwd={})",
                candidate.address,
                self.tofu.workdir().display()
            ))?;
            let command = vec![
                "import".to_string(),
                candidate.address.clone(),
                import_id.to_string(),
            ];
            let result = tofu::invoke(self.tofu, &command, self.io)?;
            if result.success() {
                self.io.note(&format!("completed: tofu import {import_id}"))?;
                return Ok(None);
            }
            let detail = match result.stderr.trim() {
                "" => "import failed",
                detail => detail,
            };
            self.io
                .note(&format!("failed: tofu import {import_id}: {detail}"))?;
            if first_failure.is_none() {
                first_failure = Some(result);
            }
        }
        Ok(first_failure)
    }

    fn recover_prevent_destroy(
        &mut self,
        args: &[String],
        failed: NormalizedResult,
        slugs: &[String],
    ) -> Result<RecoveryReport, TofuError> {
        let repos = slugs.join(", ");
        let message = format!(
            "One or more resources are protected by lifecycle.prevent_destroy.\n\
             This often happens when a repository is removed from the inventory and should be disenrolled.\n\
             Remove these resources from state and retry apply? ({repos}) [y/N]: "
        );
        if let Some(outcome) = self.confirm(&message, "state cleanup", STATE_RM_GUIDANCE)? {
            return Ok(RecoveryReport::new(outcome, failed));
        }

        self.io.note(&format!(
            "running: tofu state list (cwd={})",
            self.tofu.workdir().display()
        ))?;
        // The listing is only shown when it fails.
        let listed = tofu::capture(self.tofu, &["state".to_string(), "list".to_string()])?;
        if !listed.success() {
            tofu::stream_output(self.io, &listed)?;
            self.io
                .note(&format!("state cleanup failed; {STATE_RM_GUIDANCE}"))?;
            return Ok(RecoveryReport::new(Outcome::StateListFailed, listed));
        }

        let addresses = matching_state_addresses(&listed.stdout, slugs);
        if addresses.is_empty() {
            self.io.note(&format!(
                "no matching state entries found; nothing to remove; {STATE_RM_GUIDANCE}"
            ))?;
            return Ok(RecoveryReport::new(Outcome::NothingToRemove, failed));
        }

        for address in &addresses {
            self.io.note(&format!(
                "running: tofu state rm {address} (cwd={})",
                self.tofu.workdir().display()
            ))?;
            let command = vec!["state".to_string(), "rm".to_string(), address.clone()];
            let removed = tofu::invoke(self.tofu, &command, self.io)?;
            if !removed.success() {
                self.io
                    .note(&format!("state cleanup failed; {STATE_RM_GUIDANCE}"))?;
                return Ok(RecoveryReport::new(Outcome::StateRemoveFailed, removed));
            }
        }
        self.retry(args)
    }

    /// Returns the terminal outcome when remediation must not proceed.
    fn confirm(
        &mut self,
        message: &str,
        action: &str,
        guidance: &str,
    ) -> Result<Option<Outcome>, TofuError> {
        if !self.prompter.can_prompt() {
            self.io.note(&format!(
                "cannot prompt for {action} in non-interactive mode; {guidance}"
            ))?;
            return Ok(Some(Outcome::NotInteractive));
        }
        if !self.prompter.confirm(message, self.io.stderr)? {
            self.io.note(&format!("{action} declined; {guidance}"))?;
            return Ok(Some(Outcome::Declined));
        }
        Ok(None)
    }

    fn retry(&mut self, args: &[String]) -> Result<RecoveryReport, TofuError> {
        self.io.note(&format!(
            "retrying: tofu apply (cwd={})",
            self.tofu.workdir().display()
        ))?;
        let result = tofu::invoke(self.tofu, args, self.io)?;
        Ok(RecoveryReport::new(Outcome::Retried, result))
    }
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
