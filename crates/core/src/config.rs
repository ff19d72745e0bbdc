//! Configuration for the resolver.
//!
//! Settings are read through [`PropertySource`]s: dotted keys such as
//! `unbox.source.url` looked up first in the process environment (the
//! "system properties"), then in a flat TOML properties file, then falling
//! back to a documented default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::fetch::RetentionPolicy;
use crate::{Error, Result, paths};

/// Key of the resource to resolve when no identifier is given.
pub const SOURCE_URL_KEY: &str = "unbox.source.url";
/// Key of the entry point file name.
pub const ENTRY_POINT_KEY: &str = "unbox.entry-point";
/// Key of the cache directory (downloads live in `<cache>/downloads`).
pub const CACHE_DIR_KEY: &str = "unbox.cache.dir";
/// Key of the state directory (version folders live in `<state>/versions`).
pub const STATE_DIR_KEY: &str = "unbox.state.dir";
/// Key of the default retention policy.
pub const RETENTION_KEY: &str = "unbox.cache.retention";
/// Key of the retention policy used for snapshot URLs.
pub const SNAPSHOT_RETENTION_KEY: &str = "unbox.cache.snapshot-retention";
/// Key of the substring that marks a URL as a snapshot.
pub const SNAPSHOT_MARKER_KEY: &str = "unbox.cache.snapshot-marker";
/// Key of the HTTP timeout in seconds.
pub const HTTP_TIMEOUT_KEY: &str = "unbox.http.timeout-secs";
/// Key of the maximum accepted download size in bytes.
pub const MAX_BYTES_KEY: &str = "unbox.http.max-bytes";

/// Built-in default for [`SOURCE_URL_KEY`].
pub const DEFAULT_SOURCE_URL: &str = "http://localhost:8080/landing/";
/// Built-in default for [`ENTRY_POINT_KEY`].
pub const DEFAULT_ENTRY_POINT: &str = "index.html";
/// Built-in default for [`SNAPSHOT_MARKER_KEY`].
pub const DEFAULT_SNAPSHOT_MARKER: &str = "-SNAPSHOT";
/// Built-in default for [`HTTP_TIMEOUT_KEY`].
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// A source of string properties keyed by dotted names.
pub trait PropertySource: Send + Sync {
    /// Look up a property.
    fn get(&self, key: &str) -> Option<String>;

    /// Look up a property, falling back to `default`.
    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }
}

/// Properties taken from the process environment.
///
/// `unbox.source.url` is read from `UNBOX_SOURCE_URL`: the key is upper-cased
/// and `.` and `-` become `_`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProperties;

impl SystemProperties {
    /// Environment variable name for a property key.
    #[must_use]
    pub fn env_name(key: &str) -> String {
        key.chars()
            .map(|c| match c {
                '.' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect()
    }
}

impl PropertySource for SystemProperties {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(Self::env_name(key))
            .ok()
            .filter(|value| !value.is_empty())
    }
}

/// In-memory properties, used for explicit overrides.
#[derive(Debug, Default, Clone)]
pub struct MapProperties {
    values: BTreeMap<String, String>,
}

impl MapProperties {
    /// Create an empty set of properties.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property, replacing any previous value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Add a property in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl PropertySource for MapProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Properties loaded from a TOML file.
///
/// Nested tables are flattened into dotted keys, so both of these set
/// `unbox.source.url`:
///
/// ```toml
/// "unbox.source.url" = "https://example.org/bundle.zip"
///
/// [unbox.source]
/// url = "https://example.org/bundle.zip"
/// ```
#[derive(Debug, Default, Clone)]
pub struct FileProperties {
    path: Option<PathBuf>,
    values: MapProperties,
}

impl FileProperties {
    /// Load properties from `path`. A missing file yields no properties.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file exists but is not valid TOML,
    /// or [`Error::Io`] if it cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(?path, "No properties file");
            return Ok(Self {
                path: Some(path.to_path_buf()),
                values: MapProperties::new(),
            });
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        let mut properties = Self::parse(&content).map_err(|e| {
            Error::configuration(format!("Invalid properties file {}: {e}", path.display()))
        })?;
        properties.path = Some(path.to_path_buf());
        debug!(?path, count = properties.values.len(), "Loaded properties file");
        Ok(properties)
    }

    /// Parse properties from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the text is not valid TOML.
    pub fn parse(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Invalid TOML: {e}")))?;
        let mut values = MapProperties::new();
        flatten_table("", &table, &mut values);
        Ok(Self { path: None, values })
    }

    /// The file these properties were loaded from.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl PropertySource for FileProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key)
    }
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut MapProperties) {
    for (key, value) in table {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::Table(nested) => flatten_table(&full_key, nested, out),
            toml::Value::String(s) => out.insert(full_key, s.clone()),
            toml::Value::Integer(i) => out.insert(full_key, i.to_string()),
            toml::Value::Boolean(b) => out.insert(full_key, b.to_string()),
            toml::Value::Float(f) => out.insert(full_key, f.to_string()),
            other => warn!(key = %full_key, kind = other.type_str(), "Ignoring non-scalar property"),
        }
    }
}

/// Ordered chain of property sources; the first source with a value wins.
#[derive(Default)]
pub struct LayeredProperties {
    layers: Vec<Box<dyn PropertySource>>,
}

impl LayeredProperties {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The default chain: system properties, then the properties file at `file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the properties file exists but cannot be parsed.
    pub fn standard(file: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new()
            .with_layer(SystemProperties)
            .with_layer(FileProperties::load(file)?))
    }

    /// Append a lower-priority layer.
    #[must_use]
    pub fn with_layer(mut self, layer: impl PropertySource + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Insert a layer that takes priority over all existing ones.
    #[must_use]
    pub fn with_override(mut self, layer: impl PropertySource + 'static) -> Self {
        self.layers.insert(0, Box::new(layer));
        self
    }
}

impl PropertySource for LayeredProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }
}

impl std::fmt::Debug for LayeredProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredProperties")
            .field("layers", &self.layers.len())
            .finish()
    }
}

/// Effective resolver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// Identifier resolved by [`crate::ResourceResolver::resolve_configured`].
    pub source_url: String,
    /// File name expected inside every resolved resource.
    pub entry_point: String,
    /// Root of the download cache.
    pub downloads_dir: PathBuf,
    /// Root of the fingerprint-named version folders.
    pub versions_dir: PathBuf,
    /// Retention for downloaded archives.
    pub retention: RetentionPolicy,
    /// Retention for URLs containing [`Settings::snapshot_marker`].
    pub snapshot_retention: RetentionPolicy,
    /// Substring marking snapshot URLs.
    pub snapshot_marker: String,
    /// HTTP request timeout in seconds.
    pub http_timeout_secs: u64,
    /// Largest accepted download, if limited.
    pub max_download_bytes: Option<u64>,
}

impl Settings {
    /// Settings with built-in defaults rooted at explicit directories.
    #[must_use]
    pub fn with_dirs(downloads_dir: impl Into<PathBuf>, versions_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            downloads_dir: downloads_dir.into(),
            versions_dir: versions_dir.into(),
            retention: RetentionPolicy::Forever,
            snapshot_retention: RetentionPolicy::Session,
            snapshot_marker: DEFAULT_SNAPSHOT_MARKER.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT.as_secs(),
            max_download_bytes: None,
        }
    }

    /// Read settings from a property source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for unparseable values, or if no
    /// platform directory can be determined and none is configured.
    pub fn load(props: &dyn PropertySource) -> Result<Self> {
        let downloads_dir = match props.get(CACHE_DIR_KEY) {
            Some(dir) => PathBuf::from(dir).join("downloads"),
            None => paths::downloads_dir()?,
        };
        let versions_dir = match props.get(STATE_DIR_KEY) {
            Some(dir) => PathBuf::from(dir).join("versions"),
            None => paths::versions_dir()?,
        };

        let retention = match props.get(RETENTION_KEY) {
            Some(value) => value.parse()?,
            None => RetentionPolicy::Forever,
        };
        let snapshot_retention = match props.get(SNAPSHOT_RETENTION_KEY) {
            Some(value) => value.parse()?,
            None => RetentionPolicy::Session,
        };

        let http_timeout_secs = match props.get(HTTP_TIMEOUT_KEY) {
            Some(value) => parse_u64(HTTP_TIMEOUT_KEY, &value)?,
            None => DEFAULT_HTTP_TIMEOUT.as_secs(),
        };
        let max_download_bytes = props
            .get(MAX_BYTES_KEY)
            .map(|value| parse_u64(MAX_BYTES_KEY, &value))
            .transpose()?;

        let entry_point = props.get_or(ENTRY_POINT_KEY, DEFAULT_ENTRY_POINT);
        if entry_point.is_empty() || entry_point.contains(['/', '\\']) {
            return Err(Error::configuration(format!(
                "{ENTRY_POINT_KEY} must be a plain file name, got '{entry_point}'"
            )));
        }

        Ok(Self {
            source_url: props.get_or(SOURCE_URL_KEY, DEFAULT_SOURCE_URL),
            entry_point,
            downloads_dir,
            versions_dir,
            retention,
            snapshot_retention,
            snapshot_marker: props.get_or(SNAPSHOT_MARKER_KEY, DEFAULT_SNAPSHOT_MARKER),
            http_timeout_secs,
            max_download_bytes,
        })
    }

    /// Retention policy that applies to `url`.
    #[must_use]
    pub fn retention_for(&self, url: &str) -> RetentionPolicy {
        if !self.snapshot_marker.is_empty() && url.contains(&self.snapshot_marker) {
            self.snapshot_retention
        } else {
            self.retention
        }
    }

    /// HTTP request timeout.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        Error::configuration(format!("{key} must be a non-negative integer, got '{value}'"))
    })
}
