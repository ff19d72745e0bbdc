//! Platform paths for unbox data directories.
//!
//! | Platform | State Dir | Cache Dir |
//! |----------|-----------|-----------|
//! | **macOS** | `~/Library/Application Support/unbox` | `~/Library/Caches/unbox` |
//! | **Linux** | `~/.local/state/unbox` (XDG_STATE_HOME) | `~/.cache/unbox` (XDG_CACHE_HOME) |
//! | **Windows** | `%APPDATA%\unbox` | `%LOCALAPPDATA%\unbox` |
//!
//! Both support environment overrides for testing and CI:
//! - `UNBOX_STATE_DIR` - Override state directory
//! - `UNBOX_CACHE_DIR` - Override cache directory

use crate::{Error, Result};
use std::path::PathBuf;

/// Get the state directory, which holds the extracted version folders.
///
/// Resolution order:
/// 1. `UNBOX_STATE_DIR` environment variable
/// 2. Platform state directory + `/unbox`
///
/// # Errors
///
/// Returns an error if no platform directory can be determined.
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("UNBOX_STATE_DIR")
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }

    // state_dir() is None on macOS/Windows, so fall back to data_dir()
    let base = dirs::state_dir()
        .or_else(dirs::data_dir)
        .ok_or_else(|| Error::configuration("Could not determine state directory"))?;

    Ok(base.join("unbox"))
}

/// Get the cache directory, which holds downloaded archives.
///
/// Resolution order:
/// 1. `UNBOX_CACHE_DIR` environment variable
/// 2. Platform cache directory + `/unbox`
///
/// # Errors
///
/// Returns an error if the cache directory cannot be determined.
pub fn cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("UNBOX_CACHE_DIR")
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }

    let base = dirs::cache_dir()
        .ok_or_else(|| Error::configuration("Could not determine cache directory"))?;

    Ok(base.join("unbox"))
}

/// Get the root of the extracted version folders (`<state>/versions`).
///
/// # Errors
///
/// Returns an error if no platform directory can be determined.
pub fn versions_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("versions"))
}

/// Get the root of the download cache (`<cache>/downloads`).
///
/// # Errors
///
/// Returns an error if no platform directory can be determined.
pub fn downloads_dir() -> Result<PathBuf> {
    Ok(cache_dir()?.join("downloads"))
}

/// Default location of the properties file (`<state>/unbox.toml`).
///
/// # Errors
///
/// Returns an error if no platform directory can be determined.
pub fn properties_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("unbox.toml"))
}
