//! Inventory rewriting for the tool's `yamldecode`.
//!
//! `yamldecode` rejects `%YAML` directives and explicit document markers that
//! other YAML tooling writes. Only the head and tail of the file are touched.
use crate::tofu::TOFU_DIR;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

const DIRECTIVE_PREFIX: &str = "%YAML";
const DOCUMENT_START: &str = "---";
const DOCUMENT_END: &str = "...";
const BOM: char = '\u{feff}';

/// Strip a leading BOM, `%YAML` directives, a leading `---` and a trailing
/// `...`. Returns `None` when the text is already acceptable.
pub fn strip_yaml_directives_for_tofu(contents: &str) -> Option<String> {
    if contents.is_empty() {
        return None;
    }
    let text = contents.trim_start_matches(BOM);
    let lines: Vec<&str> = text.lines().collect();

    let is_blank = |line: &&&str| line.trim().is_empty();
    let mut index = lines.iter().take_while(is_blank).count();
    while lines
        .get(index)
        .is_some_and(|line| line.trim_start().starts_with(DIRECTIVE_PREFIX))
    {
        index += 1;
        index += lines[index..].iter().take_while(is_blank).count();
    }
    if lines
        .get(index)
        .is_some_and(|line| line.trim() == DOCUMENT_START)
    {
        index += 1;
    }

    let mut body = &lines[index..];
    let trailing_blank = body.iter().rev().take_while(is_blank).count();
    let last = body.len() - trailing_blank;
    if last > 0 && body[last - 1].trim() == DOCUMENT_END {
        body = &body[..last - 1];
    }

    let mut normalized = body.join("\n");
    if !normalized.is_empty() && !normalized.ends_with('\n') {
        normalized.push('\n');
    }
    (normalized != contents).then_some(normalized)
}

/// Inventory files to rewrite: the estate path under the workspace and, when
/// the tool runs from a subdirectory, the same path relative to it.
pub fn inventory_candidates(
    workspace_root: &Path,
    tool_dir: &Path,
    inventory_path: &str,
) -> Vec<PathBuf> {
    let mut candidates = vec![workspace_root.join(inventory_path)];
    if tool_dir != workspace_root {
        let relative = Path::new(inventory_path);
        let relative = match relative.components().next() {
            Some(Component::Normal(first)) if first == TOFU_DIR => relative
                .strip_prefix(TOFU_DIR)
                .unwrap_or(relative)
                .to_path_buf(),
            _ => relative.to_path_buf(),
        };
        candidates.push(tool_dir.join(relative));
    }
    candidates
}

/// Rewrite every existing inventory candidate in place; true if any changed.
pub fn sanitize_inventory(
    workspace_root: &Path,
    tool_dir: &Path,
    inventory_path: &str,
) -> Result<bool> {
    let mut changed = false;
    for candidate in inventory_candidates(workspace_root, tool_dir, inventory_path) {
        if !candidate.is_file() {
            continue;
        }
        let contents = fs::read_to_string(&candidate)
            .with_context(|| format!("read inventory {}", candidate.display()))?;
        if let Some(sanitized) = strip_yaml_directives_for_tofu(&contents) {
            fs::write(&candidate, sanitized)
                .with_context(|| format!("write inventory {}", candidate.display()))?;
            tracing::debug!(path = %candidate.display(), "inventory sanitized");
            changed = true;
        }
    }
    Ok(changed)
}
