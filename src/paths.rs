//! Storage directory resolution.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Directory leaf used under XDG-style config roots.
const XDG_LEAF: &str = "secrets-engine";
/// Directory leaf used directly under the home directory.
const HOME_LEAF: &str = ".secrets-engine";

/// Named storage location, for callers that do not pass an explicit path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreLocation {
    /// Platform config root: `%APPDATA%` on Windows, `$XDG_CONFIG_HOME`
    /// (or `~/.config`) elsewhere.
    Xdg,
    /// `~/.secrets-engine`.
    Home,
}

/// Resolve the storage directory. First match wins:
/// explicit path, the `Xdg` location token, an ambient `XDG_CONFIG_HOME`
/// (non-Windows), then `~/.secrets-engine`.
pub fn resolve_dir(
    path: Option<&Path>,
    location: Option<StoreLocation>,
) -> Result<PathBuf, EngineError> {
    if let Some(p) = path {
        return Ok(p.to_path_buf());
    }

    match location {
        Some(StoreLocation::Xdg) => xdg_dir(),
        Some(StoreLocation::Home) => home_dir(),
        None => {
            if !cfg!(windows) {
                if let Some(config) = non_empty_env("XDG_CONFIG_HOME") {
                    return Ok(PathBuf::from(config).join(XDG_LEAF));
                }
            }
            home_dir()
        }
    }
}

fn xdg_dir() -> Result<PathBuf, EngineError> {
    if cfg!(windows) {
        return non_empty_env("APPDATA")
            .map(|appdata| PathBuf::from(appdata).join(XDG_LEAF))
            .ok_or_else(|| {
                EngineError::Initialization("APPDATA environment variable is not set".into())
            });
    }
    if let Some(config) = non_empty_env("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(config).join(XDG_LEAF));
    }
    dirs::home_dir()
        .map(|home| home.join(".config").join(XDG_LEAF))
        .ok_or_else(|| {
            EngineError::Initialization("home directory could not be determined".into())
        })
}

fn home_dir() -> Result<PathBuf, EngineError> {
    dirs::home_dir()
        .map(|home| home.join(HOME_LEAF))
        .ok_or_else(|| {
            EngineError::Initialization("home directory could not be determined".into())
        })
}

fn non_empty_env(name: &str) -> Option<std::ffi::OsString> {
    env::var_os(name).filter(|v| !v.is_empty())
}
