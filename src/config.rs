//! Tool configuration.
//!
//! An optional `/etc/minios-kernel.toml` supplies defaults the command
//! line can override: the SquashFS compression method, a scratch
//! directory for packaging runs, and a fixed root path for setups where
//! discovery is not wanted.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::compression;

pub const DEFAULT_PATH: &str = "/etc/minios-kernel.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Default `mksquashfs` compression method.
    pub sqfs_comp: Option<String>,
    /// Default scratch directory for packaging runs.
    pub temp_dir: Option<PathBuf>,
    /// Fixed MiniOS root, skipping discovery.
    pub root: Option<PathBuf>,
}

impl Config {
    /// Load `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading config '{}'", path.display()))
            }
        };
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("parsing config '{}'", path.display()))?;

        if let Some(method) = &config.sqfs_comp {
            if compression::find(method).is_none() {
                bail!(
                    "invalid config '{}': unknown compression method '{method}'",
                    path.display()
                );
            }
        }
        Ok(config)
    }

    pub fn load_default() -> Result<Self> {
        Self::load(Path::new(DEFAULT_PATH))
    }
}
