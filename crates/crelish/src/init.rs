//! # Locating a Site
//!
//! A crelish site is a directory with a `crelish.toml` next to its content.
//! [`initialize`] finds the config file, loads it and opens the [`Crelish`]
//! context.
//!
//! ## Config Resolution
//!
//! 1. An explicit path (`--config`) wins. It must exist.
//! 2. Otherwise [`find_config_file`] walks up from `cwd` looking for
//!    `crelish.toml`, stopping at `HOME` or the filesystem root.
//! 3. Otherwise the OS config directory (via the `directories` crate) is
//!    tried.
//! 4. With no file at all, compiled defaults apply relative to `cwd`.
//!
//! Relative paths inside the file are resolved against the file's directory,
//! so a site works the same from any subdirectory.

use crate::config::{CrelishConfig, CONFIG_FILE_NAME};
use crate::error::{CrelishError, Result};
use crate::Crelish;
use confique::Config;
use directories::{BaseDirs, ProjectDirs};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Walk up from `cwd` to the nearest directory containing `crelish.toml`.
pub fn find_config_file(cwd: &Path) -> Option<PathBuf> {
    let home_dir = BaseDirs::new().map(|bd| bd.home_dir().to_path_buf());
    let mut current = cwd.to_path_buf();

    loop {
        let candidate = current.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }

        if home_dir.as_ref() == Some(&current) {
            return None;
        }

        match current.parent() {
            Some(parent) if parent != current => current = parent.to_path_buf(),
            _ => return None,
        }
    }
}

/// `crelish.toml` in the OS config directory, if there is one.
pub fn global_config_file() -> Option<PathBuf> {
    ProjectDirs::from("org", "crelish", "crelish")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .filter(|path| path.is_file())
}

/// Load the configuration that applies to `cwd`.
pub fn load_config(cwd: &Path, config_override: Option<PathBuf>) -> Result<CrelishConfig> {
    let file = match config_override {
        Some(path) => {
            let path = if path.is_relative() { cwd.join(path) } else { path };
            if !path.is_file() {
                return Err(CrelishError::ConfigNotFound(path));
            }
            Some(path)
        }
        None => find_config_file(cwd).or_else(global_config_file),
    };

    match file {
        Some(file) => {
            debug!(path = %file.display(), "loading config");
            let base = file.parent().map(Path::to_path_buf).unwrap_or_else(|| cwd.to_path_buf());
            Ok(CrelishConfig::load(&file)?.resolve_relative_to(&base))
        }
        None => {
            debug!(cwd = %cwd.display(), "no config file, using defaults");
            let config = CrelishConfig::builder().env().load()?;
            Ok(config.resolve_relative_to(cwd))
        }
    }
}

/// Find, load and open the site for `cwd`.
pub fn initialize(cwd: &Path, config_override: Option<PathBuf>) -> Result<Crelish> {
    let config = load_config(cwd, config_override)?;
    Crelish::open(config)
}
