//! Remote state backend: manifest loading, config path checks, credentials.
//!
//! An estate opts into remote state by committing `backend/persistence.yaml`
//! alongside a `.tfbackend` file. Both are re-read from every workspace, so a
//! plan always reflects the manifest at the synced commit.
use crate::config::EnvSnapshot;
use serde::Serialize;
use serde_yaml_ng::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_PATH: &str = "backend/persistence.yaml";
pub const BACKEND_DIR: &str = "backend";
pub const SCHEMA_VERSION: u64 = 1;
pub const DEFAULT_KEY_SUFFIX: &str = "terraform.tfstate";

pub const ACCESS_KEY_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_VAR: &str = "AWS_SESSION_TOKEN";

/// Accepted credential pairs, in precedence order.
pub const CREDENTIAL_FAMILIES: [(&str, &str); 3] = [
    (ACCESS_KEY_VAR, SECRET_KEY_VAR),
    ("SCW_ACCESS_KEY", "SCW_SECRET_KEY"),
    ("SPACES_ACCESS_KEY_ID", "SPACES_SECRET_ACCESS_KEY"),
];

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Invalid persistence manifest at {}", path.display())]
    InvalidManifest { path: PathBuf },
    #[error(
        "Unsupported persistence manifest schema_version={version} at {}; \
         maximum supported schema_version is {SCHEMA_VERSION}",
        path.display()
    )]
    UnsupportedSchema { version: u64, path: PathBuf },
    #[error("read persistence manifest {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("parse persistence manifest {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml_ng::Error,
    },
    #[error("serialize persistence manifest: {0}")]
    Serialize(#[from] serde_yaml_ng::Error),
    #[error("Remote backend config must live inside the estate workspace (got {0}).")]
    PathOutsideWorkspace(String),
    #[error("Remote backend config {0:?} was not found in the estate workspace.")]
    ConfigMissing(String),
    #[error(
        "Remote state backend requires credentials in the environment: either \
         AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY, SCW_ACCESS_KEY and \
         SCW_SECRET_KEY, or SPACES_ACCESS_KEY_ID and SPACES_SECRET_ACCESS_KEY."
    )]
    MissingCredentials,
}

/// Persisted description of the remote state backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendDescriptor {
    pub schema_version: u64,
    pub enabled: bool,
    pub bucket: String,
    pub key_prefix: String,
    pub key_suffix: String,
    pub region: String,
    pub endpoint: String,
    /// Workspace-relative path of the `.tfbackend` file.
    pub backend_config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_topic: Option<String>,
}

impl BackendDescriptor {
    /// Parse manifest text. `path` is only used for error messages.
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self, BackendError> {
        let value: Value = serde_yaml_ng::from_str(text).map_err(|source| BackendError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let map = match value {
            Value::Null => Mapping::new(),
            Value::Mapping(map) => map,
            _ => {
                return Err(BackendError::InvalidManifest {
                    path: path.to_path_buf(),
                })
            }
        };
        let schema_version = match map.get("schema_version") {
            None | Some(Value::Null) => 0,
            Some(Value::Number(number)) => {
                number
                    .as_u64()
                    .ok_or_else(|| BackendError::InvalidManifest {
                        path: path.to_path_buf(),
                    })?
            }
            Some(Value::String(raw)) => {
                raw.trim()
                    .parse()
                    .map_err(|_| BackendError::InvalidManifest {
                        path: path.to_path_buf(),
                    })?
            }
            Some(_) => {
                return Err(BackendError::InvalidManifest {
                    path: path.to_path_buf(),
                })
            }
        };
        if schema_version > SCHEMA_VERSION {
            return Err(BackendError::UnsupportedSchema {
                version: schema_version,
                path: path.to_path_buf(),
            });
        }
        let key_suffix = scalar(&map, "key_suffix");
        Ok(Self {
            schema_version,
            enabled: truthy(map.get("enabled")),
            bucket: scalar(&map, "bucket"),
            key_prefix: scalar(&map, "key_prefix"),
            key_suffix: if key_suffix.is_empty() {
                DEFAULT_KEY_SUFFIX.to_string()
            } else {
                key_suffix
            },
            region: scalar(&map, "region"),
            endpoint: scalar(&map, "endpoint"),
            backend_config_path: scalar(&map, "backend_config_path"),
            notification_topic: match map.get("notification_topic") {
                None | Some(Value::Null) => None,
                Some(_) => Some(scalar(&map, "notification_topic")),
            },
        })
    }

    /// Load the manifest from disk; an absent file yields `None`.
    pub fn load(path: &Path) -> Result<Option<Self>, BackendError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(BackendError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_yaml(&text, path).map(Some)
    }

    pub fn to_yaml(&self) -> Result<String, BackendError> {
        Ok(serde_yaml_ng::to_string(self)?)
    }
}

fn scalar(map: &Mapping, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(value)) => value.trim().to_string(),
        Some(Value::Number(value)) => value.to_string(),
        Some(Value::Bool(value)) => value.to_string(),
        _ => String::new(),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "on" | "1"
        ),
        _ => false,
    }
}

/// Load the workspace's descriptor, returning `None` for local state.
pub fn load_descriptor(workspace_root: &Path) -> Result<Option<BackendDescriptor>, BackendError> {
    let descriptor = BackendDescriptor::load(&workspace_root.join(MANIFEST_PATH))?;
    Ok(descriptor.filter(|descriptor| descriptor.enabled))
}

/// Check that the configured backend file lives inside the workspace and
/// exists, returning its path relative to `tool_dir`.
pub fn validate_backend_config_path(
    workspace_root: &Path,
    tool_dir: &Path,
    configured: &str,
) -> Result<PathBuf, BackendError> {
    let outside = || BackendError::PathOutsideWorkspace(configured.to_string());
    if Path::new(configured).is_absolute() {
        return Err(outside());
    }
    let root = normalize_lexically(workspace_root);
    let candidate = normalize_lexically(&workspace_root.join(configured));
    if !candidate.starts_with(&root) {
        return Err(outside());
    }
    if !candidate.is_file() {
        return Err(BackendError::ConfigMissing(configured.to_string()));
    }
    // A symlink inside the tree can still point elsewhere.
    let real_root = root.canonicalize().map_err(|_| outside())?;
    let real_candidate = candidate.canonicalize().map_err(|_| outside())?;
    if !real_candidate.starts_with(&real_root) {
        return Err(outside());
    }
    Ok(relative_path(&candidate, &normalize_lexically(tool_dir)))
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn relative_path(path: &Path, base: &Path) -> PathBuf {
    let path_parts: Vec<_> = path.components().collect();
    let base_parts: Vec<_> = base.components().collect();
    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut relative = PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &path_parts[common..] {
        relative.push(part);
    }
    relative
}

/// Object-storage credentials mapped onto the AWS variable names.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for BackendCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCredentials")
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl BackendCredentials {
    /// Variables to set on the tool environment.
    pub fn env_overrides(&self) -> BTreeMap<String, String> {
        let mut overrides = BTreeMap::from([
            (ACCESS_KEY_VAR.to_string(), self.access_key.clone()),
            (SECRET_KEY_VAR.to_string(), self.secret_key.clone()),
        ]);
        if let Some(token) = &self.session_token {
            overrides.insert(SESSION_TOKEN_VAR.to_string(), token.clone());
        }
        overrides
    }
}

/// Pick the first fully populated credential family.
pub fn resolve_credentials(env: &EnvSnapshot) -> Result<BackendCredentials, BackendError> {
    CREDENTIAL_FAMILIES
        .iter()
        .find_map(|(access, secret)| {
            Some(BackendCredentials {
                access_key: env.non_blank(access)?.to_string(),
                secret_key: env.non_blank(secret)?.to_string(),
                session_token: session_token(env),
            })
        })
        .ok_or(BackendError::MissingCredentials)
}

/// Trimmed session token, or `None` when unset or blank.
pub fn session_token(env: &EnvSnapshot) -> Option<String> {
    env.non_blank(SESSION_TOKEN_VAR).map(str::to_string)
}

/// Join prefix and suffix with exactly one slash.
pub fn build_object_key(key_prefix: &str, key_suffix: &str) -> String {
    let prefix = key_prefix.trim_end_matches('/');
    let suffix = key_suffix.trim_start_matches('/');
    if prefix.is_empty() {
        suffix.to_string()
    } else {
        format!("{prefix}/{suffix}")
    }
}

/// Everything `init` needs to target the remote backend.
#[derive(Debug, Clone)]
pub struct BackendRuntime {
    pub descriptor: BackendDescriptor,
    /// Backend file path relative to the tool's working directory.
    pub backend_config: PathBuf,
    pub object_key: String,
    pub credentials: BackendCredentials,
}

impl BackendRuntime {
    pub fn init_argument(&self) -> String {
        format!("-backend-config={}", self.backend_config.display())
    }

    /// One-line summary for the operator; never includes credentials.
    pub fn describe(&self) -> String {
        format!(
            "remote backend: bucket={} key={} region={} config={}",
            self.descriptor.bucket,
            self.object_key,
            self.descriptor.region,
            self.backend_config.display()
        )
    }
}

/// Resolve backend runtime details for a workspace, or `None` for local state.
///
/// Path and credential checks run here so failures surface before any tool
/// process starts.
pub fn resolve_runtime(
    workspace_root: &Path,
    tool_dir: &Path,
    env: &EnvSnapshot,
) -> Result<Option<BackendRuntime>, BackendError> {
    let Some(descriptor) = load_descriptor(workspace_root)? else {
        return Ok(None);
    };
    let backend_config =
        validate_backend_config_path(workspace_root, tool_dir, &descriptor.backend_config_path)?;
    let credentials = resolve_credentials(env)?;
    let object_key = build_object_key(&descriptor.key_prefix, &descriptor.key_suffix);
    Ok(Some(BackendRuntime {
        descriptor,
        backend_config,
        object_key,
        credentials,
    }))
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
