//! Subprocess-backed tool adapter.
use super::{
    Diagnostic, RawOutput, StructuredCall, StructuredSummary, Tofu, TofuError, TofuLauncher,
    ToolOutput,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Instant;

/// Arguments the structured `fmt` call accepts.
const FMT_FLAGS: [&str; 2] = ["-check", "-recursive"];

/// Runs the configured OpenTofu command in a fixed directory with an
/// explicit, fully controlled environment.
#[derive(Debug, Clone)]
pub struct ProcessTofu {
    program: PathBuf,
    leading_args: Vec<String>,
    workdir: PathBuf,
    env: BTreeMap<String, String>,
}

impl ProcessTofu {
    /// Resolve `command[0]` on `PATH` and bind the tool to `workdir`.
    pub fn new(
        command: &[String],
        workdir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<Self, TofuError> {
        let (program, leading_args) = command.split_first().ok_or(TofuError::EmptyCommand)?;
        let resolved = which::which(program).map_err(|_| TofuError::NotFound(program.clone()))?;
        Ok(Self {
            program: resolved,
            leading_args: leading_args.to_vec(),
            workdir: workdir.to_path_buf(),
            env: env.clone(),
        })
    }

    fn validate_json(&mut self) -> Result<ToolOutput, TofuError> {
        let raw = self.run_raw(&[
            "validate".to_string(),
            "-json".to_string(),
            "-no-color".to_string(),
        ])?;
        match serde_json::from_str::<ValidateReport>(&raw.stdout) {
            Ok(report) => Ok(ToolOutput::Summary(report.into_summary())),
            Err(err) => {
                tracing::debug!(error = %err, "validate output is not JSON; keeping raw text");
                Ok(ToolOutput::Raw(raw))
            }
        }
    }
}

impl Tofu for ProcessTofu {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn run_raw(&mut self, args: &[String]) -> Result<RawOutput, TofuError> {
        let verb = args.first().map(String::as_str).unwrap_or_default();
        let start = Instant::now();
        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .current_dir(&self.workdir)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| TofuError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        let exit_code = exit_code(output.status);
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            verb,
            exit_code,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "tofu command complete"
        );
        Ok(RawOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code,
        })
    }

    fn run_structured(
        &mut self,
        verb: &str,
        args: &[String],
    ) -> Result<StructuredCall, TofuError> {
        match verb {
            "validate" if args.iter().all(|arg| arg == "-no-color") => {
                Ok(StructuredCall::Completed(self.validate_json()?))
            }
            "fmt" if args.iter().all(|arg| FMT_FLAGS.contains(&arg.as_str())) => {
                let mut full = vec![verb.to_string()];
                full.extend(args.iter().cloned());
                let raw = self.run_raw(&full)?;
                Ok(StructuredCall::Completed(ToolOutput::Boolean(raw.exit_code == 0)))
            }
            _ => Ok(StructuredCall::Unsupported),
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ValidateReport {
    diagnostics: Vec<Diagnostic>,
}

impl ValidateReport {
    fn into_summary(self) -> StructuredSummary {
        let (errors, warnings) = self
            .diagnostics
            .into_iter()
            .partition(|diagnostic| !diagnostic.severity.eq_ignore_ascii_case("warning"));
        StructuredSummary {
            operation: Some("validate".to_string()),
            errors,
            warnings,
            ..StructuredSummary::default()
        }
    }
}

/// Launches [`ProcessTofu`] with the configured command line.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl TofuLauncher for ProcessLauncher {
    fn launch(
        &self,
        workdir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<Box<dyn Tofu>, TofuError> {
        Ok(Box::new(ProcessTofu::new(&self.command, workdir, env)?))
    }
}
