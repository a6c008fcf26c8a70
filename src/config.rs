//! Resolved runtime settings.
//!
//! Settings are derived once from an environment snapshot and passed down
//! explicitly, so tests can point the cache and registry at isolated roots
//! without mutating the process environment.
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const XDG_CACHE_HOME: &str = "XDG_CACHE_HOME";
pub const XDG_CONFIG_HOME: &str = "XDG_CONFIG_HOME";
/// Overrides the command used to run OpenTofu (split with shell-words).
pub const TOFU_COMMAND_VAR: &str = "CONCORDAT_TOFU";
/// Log filter directive for the tracing subscriber.
pub const LOG_FILTER_VAR: &str = "CONCORDAT_LOG";
pub const GITHUB_TOKEN_VAR: &str = "GITHUB_TOKEN";

const CACHE_SEGMENTS: [&str; 2] = ["concordat", "estates"];
const CONFIG_SEGMENTS: [&str; 2] = ["concordat", "config.yaml"];
const DEFAULT_TOFU_BINARY: &str = "tofu";

/// Point-in-time copy of the process environment.
///
/// Credential resolution and tool invocation only ever read from a snapshot,
/// never from `std::env` directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment, skipping non-UTF-8 entries.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(key, value)| {
                Some((key.into_string().ok()?, value.into_string().ok()?))
            })
            .collect();
        Self { vars }
    }

    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Return the value only when it is non-blank after trimming.
    pub fn non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    /// Apply caller-supplied overrides on top of the snapshot.
    pub fn overlay(&mut self, overrides: &BTreeMap<String, String>) {
        for (key, value) in overrides {
            self.vars.insert(key.clone(), value.clone());
        }
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn into_vars(self) -> BTreeMap<String, String> {
        self.vars
    }
}

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding one cache mirror per estate alias.
    pub cache_root: PathBuf,
    /// Estate registry file.
    pub config_path: PathBuf,
    /// Program and leading arguments used to run OpenTofu.
    pub tofu_command: Vec<String>,
}

impl Settings {
    /// Resolve settings from an environment snapshot.
    pub fn from_env(env: &EnvSnapshot) -> Result<Self> {
        Ok(Self {
            cache_root: cache_root(env)?,
            config_path: default_config_path(env)?,
            tofu_command: tofu_command(env)?,
        })
    }

    pub fn with_cache_root(mut self, cache_root: Option<PathBuf>) -> Self {
        if let Some(root) = cache_root {
            self.cache_root = root;
        }
        self
    }

    pub fn with_config_path(mut self, config_path: Option<PathBuf>) -> Self {
        if let Some(path) = config_path {
            self.config_path = path;
        }
        self
    }
}

/// Return the directory used for caching estate repositories.
pub fn cache_root(env: &EnvSnapshot) -> Result<PathBuf> {
    let base = xdg_base(env, XDG_CACHE_HOME, ".cache")?;
    Ok(join_segments(&base, &CACHE_SEGMENTS))
}

/// Return the path to the estate registry file.
pub fn default_config_path(env: &EnvSnapshot) -> Result<PathBuf> {
    let base = xdg_base(env, XDG_CONFIG_HOME, ".config")?;
    Ok(join_segments(&base, &CONFIG_SEGMENTS))
}

/// Return the OpenTofu command line prefix, honouring `CONCORDAT_TOFU`.
pub fn tofu_command(env: &EnvSnapshot) -> Result<Vec<String>> {
    let Some(raw) = env.non_blank(TOFU_COMMAND_VAR) else {
        return Ok(vec![DEFAULT_TOFU_BINARY.to_string()]);
    };
    let words =
        shell_words::split(raw).with_context(|| format!("parse {TOFU_COMMAND_VAR}: {raw}"))?;
    if words.is_empty() {
        return Err(anyhow!("{TOFU_COMMAND_VAR} is empty"));
    }
    Ok(words)
}

fn xdg_base(env: &EnvSnapshot, var: &str, fallback: &str) -> Result<PathBuf> {
    if let Some(root) = env.non_blank(var) {
        return Ok(expand_home(root));
    }
    let home =
        dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory; set {var}"))?;
    Ok(home.join(fallback))
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

fn join_segments(base: &Path, segments: &[&str]) -> PathBuf {
    segments
        .iter()
        .fold(base.to_path_buf(), |path, segment| path.join(segment))
}
