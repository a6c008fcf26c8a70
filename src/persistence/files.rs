//! Rendering and writing the backend file and manifest.
use super::PersistenceError;
use crate::backend::{build_object_key, BackendDescriptor};
use std::fs;
use std::io;
use std::path::Path;

/// Render the `.tfbackend` file for an S3-compatible object store.
pub fn render_tfbackend(descriptor: &BackendDescriptor) -> String {
    let key = build_object_key(&descriptor.key_prefix, &descriptor.key_suffix);
    [
        "# Scaleway Object Storage backend for the concordat estate stack.".to_string(),
        "# Do not add credentials here; export SCW_ACCESS_KEY/SCW_SECRET_KEY instead."
            .to_string(),
        format!("bucket                      = \"{}\"", descriptor.bucket),
        format!("key                         = \"{key}\""),
        format!("region                      = \"{}\"", descriptor.region),
        format!(
            "endpoints                   = {{ s3 = \"{}\" }}",
            descriptor.endpoint
        ),
        "use_path_style              = true".to_string(),
        "skip_region_validation      = true".to_string(),
        "skip_requesting_account_id  = true".to_string(),
        "skip_credentials_validation = true".to_string(),
        String::new(),
    ]
    .join("\n")
}

/// Write `contents` unless the file already holds it. Differing content is
/// only replaced with `force`.
pub fn write_if_changed(
    path: &Path,
    contents: &str,
    force: bool,
) -> Result<bool, PersistenceError> {
    let current = read_existing(path)?;
    let same = current.as_deref() == Some(contents);
    write_checked(path, contents, same, current.is_some(), force)
}

/// Like [`write_if_changed`], comparing manifests by their parsed fields so
/// formatting differences alone never count as a change.
pub fn write_manifest_if_changed(
    path: &Path,
    descriptor: &BackendDescriptor,
    force: bool,
) -> Result<bool, PersistenceError> {
    let current = read_existing(path)?;
    let same = match &current {
        Some(text) => BackendDescriptor::from_yaml(text, path)
            .ok()
            .is_some_and(|existing| &existing == descriptor),
        None => false,
    };
    write_checked(path, &descriptor.to_yaml()?, same, current.is_some(), force)
}

fn read_existing(path: &Path) -> Result<Option<String>, PersistenceError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_checked(
    path: &Path,
    contents: &str,
    same: bool,
    exists: bool,
    force: bool,
) -> Result<bool, PersistenceError> {
    if same {
        return Ok(false);
    }
    if exists && !force {
        return Err(PersistenceError::Exists(path.to_path_buf()));
    }
    let io_error = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    fs::write(path, contents).map_err(io_error)?;
    Ok(true)
}
