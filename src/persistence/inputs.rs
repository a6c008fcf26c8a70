//! Collecting and validating backend settings.
use super::PersistenceError;
use crate::backend::{BackendDescriptor, DEFAULT_KEY_SUFFIX};
use crate::estate::{resolve_github_owner, EstateRecord};
use crate::prompt::Prompter;
use std::io::Write;

const UNKNOWN_OWNER: &str = "unknown-owner";

/// One value per backend setting; `None` or blank means "not given".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceInputs {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub key_prefix: Option<String>,
    pub key_suffix: Option<String>,
}

/// Settings after presets, prompts and defaults have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub bucket: String,
    pub region: String,
    pub endpoint: String,
    pub key_prefix: String,
    pub key_suffix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Bucket,
    Region,
    Endpoint,
    KeyPrefix,
    KeySuffix,
}

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::Bucket => "Bucket",
            Field::Region => "Region",
            Field::Endpoint => "Endpoint",
            Field::KeyPrefix => "Key prefix",
            Field::KeySuffix => "Key suffix",
        }
    }

    fn pick<'a>(self, inputs: &'a PersistenceInputs) -> Option<&'a str> {
        match self {
            Field::Bucket => inputs.bucket.as_deref(),
            Field::Region => inputs.region.as_deref(),
            Field::Endpoint => inputs.endpoint.as_deref(),
            Field::KeyPrefix => inputs.key_prefix.as_deref(),
            Field::KeySuffix => inputs.key_suffix.as_deref(),
        }
    }
}

/// Defaults taken from an existing manifest, else derived from the estate.
pub fn defaults_from(
    record: &EstateRecord,
    existing: Option<&BackendDescriptor>,
) -> PersistenceInputs {
    match existing {
        Some(descriptor) => PersistenceInputs {
            bucket: Some(descriptor.bucket.clone()),
            region: Some(descriptor.region.clone()),
            endpoint: Some(descriptor.endpoint.clone()),
            key_prefix: Some(descriptor.key_prefix.clone()),
            key_suffix: Some(descriptor.key_suffix.clone()),
        },
        None => {
            let owner = resolve_github_owner(record, None)
                .unwrap_or_else(|_| UNKNOWN_OWNER.to_string());
            PersistenceInputs {
                key_prefix: Some(format!("estates/{owner}/{}", record.branch)),
                key_suffix: Some(DEFAULT_KEY_SUFFIX.to_string()),
                ..PersistenceInputs::default()
            }
        }
    }
}

/// Resolve every setting: preset first, then a prompt (when the prompter can
/// ask), then the default.
pub fn collect_inputs(
    preset: &PersistenceInputs,
    defaults: &PersistenceInputs,
    prompter: &mut dyn Prompter,
    output: &mut dyn Write,
) -> Result<BackendSettings, PersistenceError> {
    let mut collect = |field| collect_one(field, preset, defaults, prompter, output);
    Ok(BackendSettings {
        bucket: collect(Field::Bucket)?,
        region: collect(Field::Region)?,
        endpoint: collect(Field::Endpoint)?,
        key_prefix: collect(Field::KeyPrefix)?,
        key_suffix: collect(Field::KeySuffix)?,
    })
}

fn collect_one(
    field: Field,
    preset: &PersistenceInputs,
    defaults: &PersistenceInputs,
    prompter: &mut dyn Prompter,
    output: &mut dyn Write,
) -> Result<String, PersistenceError> {
    if let Some(value) = non_blank(field.pick(preset)) {
        return Ok(value.to_string());
    }
    let default = non_blank(field.pick(defaults));
    if prompter.can_prompt() {
        let message = match default {
            Some(default) => format!("{} [{default}]: ", field.label()),
            None => format!("{}: ", field.label()),
        };
        let answer = prompter
            .read_line(&message, output)
            .map_err(PersistenceError::Prompt)?;
        if let Some(answer) = non_blank(answer.as_deref()) {
            return Ok(answer.to_string());
        }
        return default
            .map(str::to_string)
            .ok_or(PersistenceError::Required(field.label()));
    }
    default
        .map(str::to_string)
        .ok_or(PersistenceError::NonInteractive(field.label()))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Give bare hosts an `https://` scheme.
pub fn normalize_endpoint_url(endpoint: &str) -> String {
    let cleaned = endpoint.trim();
    if cleaned.is_empty() {
        String::new()
    } else if cleaned.starts_with("//") {
        format!("https:{cleaned}")
    } else if !cleaned.contains("://") {
        format!("https://{cleaned}")
    } else {
        cleaned.to_string()
    }
}

pub fn validate_settings(
    settings: &BackendSettings,
    allow_insecure_endpoint: bool,
) -> Result<(), PersistenceError> {
    check_path_safety(&settings.key_prefix, "Key prefix")?;
    check_path_safety(&settings.key_suffix, "Key suffix")?;
    if settings.key_suffix.trim().is_empty() {
        return Err(PersistenceError::Required("Key suffix"));
    }
    if settings.bucket.is_empty() {
        return Err(PersistenceError::Required("Bucket"));
    }
    if settings.region.is_empty() {
        return Err(PersistenceError::Required("Region"));
    }
    let endpoint = settings.endpoint.trim();
    if endpoint.is_empty() {
        return Err(PersistenceError::Required("Endpoint"));
    }
    if endpoint.starts_with("https://")
        || (allow_insecure_endpoint && endpoint.starts_with("http://"))
    {
        return Ok(());
    }
    if endpoint.contains("://") {
        Err(PersistenceError::InsecureEndpoint)
    } else {
        Err(PersistenceError::EndpointScheme)
    }
}

fn check_path_safety(path: &str, field: &'static str) -> Result<(), PersistenceError> {
    if path.split('/').any(|segment| segment == "..") {
        return Err(PersistenceError::Traversal(field));
    }
    Ok(())
}
