//! Estate records and the on-disk estate registry.
//!
//! The registry is a small YAML document keyed by alias. It is read fresh for
//! every command and rewritten whole on change.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_INVENTORY_PATH: &str = "tofu/inventory/repositories.yaml";

#[derive(Debug, Error)]
pub enum EstateError {
    #[error("Estate {0:?} is not configured.")]
    NotConfigured(String),
    #[error("Estate alias {0:?} already exists.")]
    DuplicateAlias(String),
    #[error("No active estate configured; run `concordat estate use` first.")]
    NoActiveEstate,
    #[error("Estate alias is required.")]
    AliasRequired,
    #[error("Estate alias {0:?} must be a single path segment without `/`, `.` or `..`.")]
    InvalidAlias(String),
    #[error(
        "Unable to determine github_owner for the estate. Provide --github-owner \
         when the remote URL is not a GitHub repository."
    )]
    OwnerRequired,
    #[error("GitHub owner {0:?} may only contain letters, digits and hyphens.")]
    InvalidOwner(String),
    #[error("read estate registry {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("write estate registry {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("parse estate registry {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml_ng::Error,
    },
    #[error("serialize estate registry: {0}")]
    Serialize(#[from] serde_yaml_ng::Error),
}

/// Identity of a managed estate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstateRecord {
    pub alias: String,
    pub repo_url: String,
    pub branch: String,
    pub inventory_path: String,
    pub github_owner: Option<String>,
}

impl EstateRecord {
    /// Build a record with default branch and inventory path.
    pub fn new(alias: impl Into<String>, repo_url: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            repo_url: repo_url.into(),
            branch: DEFAULT_BRANCH.to_string(),
            inventory_path: DEFAULT_INVENTORY_PATH.to_string(),
            github_owner: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_inventory_path(mut self, inventory_path: impl Into<String>) -> Self {
        self.inventory_path = inventory_path.into();
        self
    }

    pub fn with_github_owner(mut self, owner: Option<String>) -> Self {
        self.github_owner = normalise_owner(owner.as_deref());
        self
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RegistryFile {
    #[serde(default)]
    estate: EstateSection,
    /// Sections owned by other tools are carried through untouched.
    #[serde(flatten)]
    other: BTreeMap<String, serde_yaml_ng::Value>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct EstateSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active_estate: Option<String>,
    #[serde(default)]
    estates: BTreeMap<String, EstateEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum EstateEntry {
    Url(String),
    Full(EstateFields),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct EstateFields {
    repo_url: String,
    #[serde(default = "default_branch")]
    branch: String,
    #[serde(default = "default_inventory_path")]
    inventory_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    github_owner: Option<String>,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_inventory_path() -> String {
    DEFAULT_INVENTORY_PATH.to_string()
}

impl EstateEntry {
    fn into_record(self, alias: &str) -> EstateRecord {
        match self {
            EstateEntry::Url(repo_url) => EstateRecord::new(alias, repo_url),
            EstateEntry::Full(fields) => EstateRecord {
                alias: alias.to_string(),
                repo_url: fields.repo_url,
                branch: fields.branch,
                inventory_path: fields.inventory_path,
                github_owner: normalise_owner(fields.github_owner.as_deref()),
            },
        }
    }

    fn from_record(record: &EstateRecord) -> Self {
        EstateEntry::Full(EstateFields {
            repo_url: record.repo_url.clone(),
            branch: record.branch.clone(),
            inventory_path: record.inventory_path.clone(),
            github_owner: record.github_owner.clone(),
        })
    }
}

/// Estate registry backed by a YAML file.
#[derive(Debug, Clone)]
pub struct EstateRegistry {
    path: PathBuf,
}

impl EstateRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return every configured estate sorted by alias.
    pub fn list(&self) -> Result<Vec<EstateRecord>, EstateError> {
        let file = self.load()?;
        Ok(file
            .estate
            .estates
            .into_iter()
            .map(|(alias, entry)| entry.into_record(&alias))
            .collect())
    }

    pub fn get(&self, alias: &str) -> Result<Option<EstateRecord>, EstateError> {
        if alias.is_empty() {
            return Ok(None);
        }
        let file = self.load()?;
        Ok(file
            .estate
            .estates
            .get(alias)
            .cloned()
            .map(|entry| entry.into_record(alias)))
    }

    pub fn active(&self) -> Result<Option<EstateRecord>, EstateError> {
        let file = self.load()?;
        let Some(alias) = file.estate.active_estate.as_deref() else {
            return Ok(None);
        };
        Ok(file
            .estate
            .estates
            .get(alias)
            .cloned()
            .map(|entry| entry.into_record(alias)))
    }

    /// Look up an explicit alias, falling back to the active estate.
    pub fn resolve(&self, alias: Option<&str>) -> Result<EstateRecord, EstateError> {
        match alias {
            Some(alias) => self
                .get(alias)?
                .ok_or_else(|| EstateError::NotConfigured(alias.to_string())),
            None => self.active()?.ok_or(EstateError::NoActiveEstate),
        }
    }

    /// Mark the provided alias as the active estate.
    pub fn set_active(&self, alias: &str) -> Result<EstateRecord, EstateError> {
        let mut file = self.load()?;
        let record = file
            .estate
            .estates
            .get(alias)
            .cloned()
            .map(|entry| entry.into_record(alias))
            .ok_or_else(|| EstateError::NotConfigured(alias.to_string()))?;
        file.estate.active_estate = Some(alias.to_string());
        self.store(&file)?;
        Ok(record)
    }

    /// Persist a new estate entry, optionally making it active.
    pub fn register(
        &self,
        record: &EstateRecord,
        set_active_if_missing: bool,
    ) -> Result<(), EstateError> {
        if record.alias.trim().is_empty() {
            return Err(EstateError::AliasRequired);
        }
        if !is_safe_alias(&record.alias) {
            return Err(EstateError::InvalidAlias(record.alias.clone()));
        }
        let mut file = self.load()?;
        if file.estate.estates.contains_key(&record.alias) {
            return Err(EstateError::DuplicateAlias(record.alias.clone()));
        }
        file.estate
            .estates
            .insert(record.alias.clone(), EstateEntry::from_record(record));
        if set_active_if_missing && file.estate.active_estate.is_none() {
            file.estate.active_estate = Some(record.alias.clone());
        }
        self.store(&file)
    }

    fn load(&self) -> Result<RegistryFile, EstateError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(RegistryFile::default());
            }
            Err(source) => {
                return Err(EstateError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if text.trim().is_empty() {
            return Ok(RegistryFile::default());
        }
        serde_yaml_ng::from_str(&text).map_err(|source| EstateError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn store(&self, file: &RegistryFile) -> Result<(), EstateError> {
        let text = serde_yaml_ng::to_string(file)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| EstateError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, text).map_err(|source| EstateError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Extract `owner/name` from a GitHub remote URL.
pub fn parse_github_slug(url: &str) -> Option<String> {
    let url = url.trim();
    let path = if let Some(rest) = url.strip_prefix("git@github.com:") {
        rest
    } else {
        let (_, rest) = url.split_once("://")?;
        let (authority, path) = rest.split_once('/')?;
        let host = authority.rsplit('@').next()?;
        let host = host.split(':').next()?;
        if !host.eq_ignore_ascii_case("github.com") {
            return None;
        }
        path
    };
    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let (owner, name) = path.split_once('/')?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some(format!("{owner}/{name}"))
}

/// True when `alias` names exactly one directory entry, so joining it onto a
/// root can never leave that root.
pub fn is_safe_alias(alias: &str) -> bool {
    let mut components = Path::new(alias).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == alias
    )
}

/// Resolve the GitHub owner used for the estate's runtime variables.
///
/// An explicit owner wins, then the registered owner, then the owner segment
/// of the remote URL. The result is written into HCL, so only GitHub login
/// characters are accepted.
pub fn resolve_github_owner(
    record: &EstateRecord,
    explicit: Option<&str>,
) -> Result<String, EstateError> {
    let owner = match explicit {
        Some(explicit) => normalise_owner(Some(explicit)),
        None => normalise_owner(record.github_owner.as_deref()).or_else(|| {
            parse_github_slug(&record.repo_url)
                .and_then(|slug| slug.split_once('/').map(|(owner, _)| owner.to_string()))
        }),
    }
    .ok_or(EstateError::OwnerRequired)?;
    if !is_github_login(&owner) {
        return Err(EstateError::InvalidOwner(owner));
    }
    Ok(owner)
}

fn is_github_login(owner: &str) -> bool {
    owner
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
}

fn normalise_owner(owner: Option<&str>) -> Option<String> {
    owner
        .map(str::trim)
        .filter(|owner| !owner.is_empty())
        .map(str::to_string)
}
