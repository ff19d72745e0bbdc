//! Command implementations. Each returns the text to print on stdout.

use std::path::Path;

use tracing::{debug, instrument};
use unbox_core::config::{CACHE_DIR_KEY, ENTRY_POINT_KEY, RETENTION_KEY, STATE_DIR_KEY};
use unbox_core::{
    LayeredProperties, MapProperties, Progress, ResolvedEntry, ResourceResolver, Result, Settings,
    fingerprint_file, paths,
};

use crate::cli::SettingsArgs;

/// Build settings from flags, system properties and the properties file, in
/// that order of priority.
pub fn load_settings(args: &SettingsArgs) -> Result<Settings> {
    let file = match &args.properties {
        Some(file) => file.clone(),
        None => paths::properties_file()?,
    };
    debug!(?file, "Loading properties");

    let mut overrides = MapProperties::new();
    if let Some(dir) = &args.cache_dir {
        overrides.insert(CACHE_DIR_KEY, dir.display().to_string());
    }
    if let Some(dir) = &args.state_dir {
        overrides.insert(STATE_DIR_KEY, dir.display().to_string());
    }
    if let Some(entry_point) = &args.entry_point {
        overrides.insert(ENTRY_POINT_KEY, entry_point.clone());
    }
    if let Some(retention) = args.retention {
        overrides.insert(RETENTION_KEY, retention.to_string());
    }

    let props = LayeredProperties::standard(file)?.with_override(overrides);
    Settings::load(&props)
}

/// Resolve `identifier`, or the configured source URL when absent.
#[instrument(skip(args, progress))]
pub async fn resolve(
    identifier: Option<&str>,
    args: &SettingsArgs,
    progress: &Progress,
    json: bool,
) -> Result<String> {
    let resolver = ResourceResolver::from_settings(load_settings(args)?)?;
    let entry = match identifier {
        Some(identifier) => resolver.resolve(identifier, progress).await?,
        None => resolver.resolve_configured(progress).await?,
    };

    if !json {
        return Ok(entry.location());
    }
    let value = match &entry {
        ResolvedEntry::Direct(location) => serde_json::json!({
            "location": location,
            "extracted": false,
        }),
        ResolvedEntry::Extracted {
            path,
            fingerprint,
            freshly_extracted,
        } => serde_json::json!({
            "location": path,
            "extracted": true,
            "fingerprint": fingerprint.as_hex(),
            "folder": fingerprint.short(),
            "freshly_extracted": freshly_extracted,
        }),
    };
    Ok(value.to_string())
}

/// Fingerprint a file.
pub fn fingerprint(file: &Path, json: bool) -> Result<String> {
    let fingerprint = fingerprint_file(file)?;
    if json {
        return Ok(serde_json::json!({
            "file": file,
            "sha256": fingerprint.as_hex(),
            "folder": fingerprint.short(),
        })
        .to_string());
    }
    Ok(format!("{}  {}", fingerprint.as_hex(), file.display()))
}

/// Render the effective settings as JSON.
pub fn config(args: &SettingsArgs) -> Result<String> {
    let settings = load_settings(args)?;
    serde_json::to_string_pretty(&settings)
        .map_err(|e| unbox_core::Error::configuration(format!("Failed to render settings: {e}")))
}
