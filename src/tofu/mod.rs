//! The single path through which OpenTofu is executed.
//!
//! `init`, `plan`, `apply` and `import` always run the raw command so the
//! operator sees the tool's own diff text. Other verbs try the structured call
//! first and fall back to the raw command when the structured form does not
//! take the given arguments. Every result is normalized and streamed to the
//! caller's sinks before it is returned.
mod normalize;
mod process;

pub use normalize::{
    normalize, Diagnostic, NormalizedResult, RawOutput, StructuredSummary, ToolOutput,
};
pub use process::{ProcessLauncher, ProcessTofu};

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory holding the root module in estate repositories.
pub const TOFU_DIR: &str = "tofu";

/// Verbs that always bypass the structured call.
pub const RAW_VERBS: [&str; 4] = ["init", "plan", "apply", "import"];

#[derive(Debug, Error)]
pub enum TofuError {
    #[error("OpenTofu binary '{0}' was not found in PATH.")]
    NotFound(String),
    #[error("OpenTofu command is empty")]
    EmptyCommand,
    #[error("tofu invocation requires a verb")]
    MissingVerb,
    #[error("run {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("write tool output: {0}")]
    Stream(#[from] io::Error),
}

/// Outcome of asking the adapter for a structured call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredCall {
    Completed(ToolOutput),
    /// The verb has no structured form for these arguments.
    Unsupported,
}

/// A tool bound to one working directory and environment.
pub trait Tofu {
    fn workdir(&self) -> &Path;

    /// Run `tofu <args>` and capture its output; a non-zero exit is not an error.
    fn run_raw(&mut self, args: &[String]) -> Result<RawOutput, TofuError>;

    fn run_structured(&mut self, verb: &str, args: &[String])
        -> Result<StructuredCall, TofuError>;
}

/// Creates tool handles for a workspace.
pub trait TofuLauncher {
    fn launch(
        &self,
        workdir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<Box<dyn Tofu>, TofuError>;
}

/// Caller-provided output sinks.
pub struct ExecutionIo<'a> {
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
}

impl<'a> ExecutionIo<'a> {
    pub fn new(stdout: &'a mut dyn Write, stderr: &'a mut dyn Write) -> Self {
        Self { stdout, stderr }
    }

    /// Write one operator-facing line to stderr.
    pub fn note(&mut self, line: &str) -> io::Result<()> {
        write_stream_output(self.stderr, line)
    }
}

/// Write `content`, add a trailing newline when missing, and flush.
pub fn write_stream_output(stream: &mut dyn Write, content: &str) -> io::Result<()> {
    stream.write_all(content.as_bytes())?;
    if !content.ends_with('\n') {
        stream.write_all(b"\n")?;
    }
    stream.flush()
}

pub fn stream_output(io: &mut ExecutionIo<'_>, result: &NormalizedResult) -> io::Result<()> {
    if !result.stdout.is_empty() {
        write_stream_output(io.stdout, &result.stdout)?;
    }
    if !result.stderr.is_empty() {
        write_stream_output(io.stderr, &result.stderr)?;
    }
    Ok(())
}

/// Run one tool command, stream its normalized output, and return it.
pub fn invoke(
    tofu: &mut dyn Tofu,
    args: &[String],
    io: &mut ExecutionIo<'_>,
) -> Result<NormalizedResult, TofuError> {
    let result = capture(tofu, args)?;
    stream_output(io, &result)?;
    Ok(result)
}

/// Run one tool command and return its normalized output without streaming
/// it; the caller decides what the operator sees.
pub fn capture(tofu: &mut dyn Tofu, args: &[String]) -> Result<NormalizedResult, TofuError> {
    let (verb, rest) = args.split_first().ok_or(TofuError::MissingVerb)?;
    let output = if RAW_VERBS.contains(&verb.as_str()) {
        ToolOutput::Raw(tofu.run_raw(args)?)
    } else {
        match tofu.run_structured(verb, rest)? {
            StructuredCall::Completed(output) => output,
            StructuredCall::Unsupported => {
                tracing::debug!(verb = %verb, "no structured form; running raw command");
                ToolOutput::Raw(tofu.run_raw(args)?)
            }
        }
    };
    let result = normalize(verb, output);
    tracing::debug!(verb = %verb, exit_code = result.exit_code, "tofu command finished");
    Ok(result)
}

/// Return the directory holding the root module: `tofu/` when it contains
/// configuration files, otherwise the workspace root.
pub fn resolve_tofu_workdir(workspace_root: &Path) -> PathBuf {
    let candidate = workspace_root.join(TOFU_DIR);
    let Ok(entries) = fs::read_dir(&candidate) else {
        return workspace_root.to_path_buf();
    };
    let has_config = entries.filter_map(Result::ok).any(|entry| {
        let path = entry.path();
        path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "tf" || ext == "tofu")
    });
    if has_config {
        candidate
    } else {
        workspace_root.to_path_buf()
    }
}
