//! Classify failed apply output.
//!
//! Pure text heuristics over combined stdout/stderr; nothing here runs tools.
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

const REPO_EXISTS_MARKER: &str = "name already exists on this account";
const PREVENT_DESTROY_MARKERS: [&str; 2] = ["prevent_destroy", "instance cannot be destroyed"];

/// A repository that exists remotely but is missing from state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryImport {
    pub address: String,
    /// `owner/name`.
    pub slug: String,
    pub name: String,
}

impl RepositoryImport {
    /// Import identifiers to try, in order.
    pub fn import_ids(&self) -> [&str; 2] {
        [self.name.as_str(), self.slug.as_str()]
    }
}

fn vertex_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?i)vertex\s+"(?P<address>(?:\\"|[^"])*)"\s+error:.*name already exists on this account"#,
        )
        .expect("regex for repository exists errors")
    })
}

fn slug_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"module\.repository\["(?P<slug>[^"]+)"\]\.github_repository\.this"#)
            .expect("regex for repository addresses")
    })
}

fn unescape_quotes(text: &str) -> String {
    text.replace("\\\"", "\"")
}

/// Repositories reported as already existing, deduplicated in order.
pub fn detect_missing_imports(output: &str) -> Vec<RepositoryImport> {
    if !output.to_lowercase().contains(REPO_EXISTS_MARKER) {
        return Vec::new();
    }
    let mut seen = HashSet::new();
    vertex_pattern()
        .captures_iter(output)
        .filter_map(|captures| parse_candidate(captures.name("address")?.as_str()))
        .filter(|candidate| seen.insert(candidate.clone()))
        .collect()
}

fn parse_candidate(raw_address: &str) -> Option<RepositoryImport> {
    let address = unescape_quotes(raw_address);
    let slug = slug_pattern()
        .captures(&address)?
        .name("slug")?
        .as_str()
        .to_string();
    let (owner, name) = slug.split_once('/')?;
    if owner.is_empty() || name.is_empty() {
        return None;
    }
    let name = name.to_string();
    Some(RepositoryImport {
        address,
        slug,
        name,
    })
}

/// Slugs of repositories blocked by `prevent_destroy`, deduplicated in order.
pub fn detect_prevent_destroy(output: &str) -> Vec<String> {
    let lowered = output.to_lowercase();
    if !PREVENT_DESTROY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return Vec::new();
    }
    let normalized = unescape_quotes(output);
    let mut seen = HashSet::new();
    slug_pattern()
        .captures_iter(&normalized)
        .filter_map(|captures| {
            let slug = captures.name("slug")?.as_str().trim();
            (!slug.is_empty()).then(|| slug.to_string())
        })
        .filter(|slug| seen.insert(slug.clone()))
        .collect()
}

/// State addresses belonging to any of the given repository slugs.
pub fn matching_state_addresses(state_list: &str, slugs: &[String]) -> Vec<String> {
    let prefixes: Vec<String> = slugs
        .iter()
        .map(|slug| format!("module.repository[\"{slug}\"]."))
        .collect();
    state_list
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| prefixes.iter().any(|prefix| line.starts_with(prefix.as_str())))
        .map(str::to_string)
        .collect()
}
