//! Reduce every tool result shape to one stdout/stderr/exit-code record.
use serde::Deserialize;

/// Direct process result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Diagnostic {
    pub severity: String,
    pub summary: String,
    pub detail: String,
}

/// Counts and diagnostics from a structured call, without raw text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredSummary {
    pub operation: Option<String>,
    pub added: u64,
    pub changed: u64,
    pub removed: u64,
    pub imported: u64,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

/// Result shapes returned by the adapter, one variant per shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    Boolean(bool),
    Raw(RawOutput),
    Summary(StructuredSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl NormalizedResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, the text failure detection scans.
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        text.push_str(&self.stdout);
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&self.stderr);
        text
    }
}

impl From<RawOutput> for NormalizedResult {
    fn from(raw: RawOutput) -> Self {
        Self {
            stdout: raw.stdout,
            stderr: raw.stderr,
            exit_code: raw.exit_code,
        }
    }
}

pub fn normalize(verb: &str, output: ToolOutput) -> NormalizedResult {
    match output {
        ToolOutput::Boolean(ok) => NormalizedResult {
            exit_code: if ok { 0 } else { 1 },
            ..NormalizedResult::default()
        },
        ToolOutput::Raw(raw) => raw.into(),
        ToolOutput::Summary(summary) => summarize(verb, &summary),
    }
}

fn summarize(verb: &str, summary: &StructuredSummary) -> NormalizedResult {
    let operation = summary
        .operation
        .as_deref()
        .map(str::trim)
        .filter(|op| !op.is_empty())
        .unwrap_or(verb);
    let has_changes =
        summary.added + summary.changed + summary.removed + summary.imported > 0;
    let line = if has_changes {
        format!(
            "{operation}: {} to add, {} to change, {} to destroy, {} to import.",
            summary.added, summary.changed, summary.removed, summary.imported
        )
    } else {
        format!("{operation}: no changes.")
    };
    NormalizedResult {
        stdout: format!("{line}\n"),
        stderr: render_diagnostics(&summary.errors, &summary.warnings),
        exit_code: if summary.errors.is_empty() { 0 } else { 1 },
    }
}

fn render_diagnostics(errors: &[Diagnostic], warnings: &[Diagnostic]) -> String {
    let mut lines = Vec::new();
    for diagnostic in errors.iter().chain(warnings) {
        let severity = match diagnostic.severity.trim() {
            "" => "error".to_string(),
            severity => severity.to_lowercase(),
        };
        let summary = diagnostic.summary.trim();
        if summary.is_empty() {
            lines.push(severity);
        } else {
            lines.push(format!("{severity}: {summary}"));
        }
        let detail = diagnostic.detail.trim();
        if !detail.is_empty() {
            lines.push(detail.to_string());
        }
    }
    if lines.is_empty() {
        return String::new();
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}
