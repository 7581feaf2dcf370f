//! Bootloader configuration discovery and update.
//!
//! A root carries several GRUB variants plus an optional SYSLINUX config
//! with per-language subfiles. Each file is rewritten independently; one
//! unreadable file must not block the others. GRUB files are what make the
//! medium bootable, so the caller treats GRUB problems as fatal, while
//! SYSLINUX is optional equipment.

pub mod encoding;
pub mod rewrite;

pub use rewrite::{rewrite, Dialect};

use std::fs;
use std::path::PathBuf;

use crate::layout::MiniosRoot;
use crate::version::KernelVersion;

/// GRUB configuration files, relative to the root.
const GRUB_CONFIGS: &[&str] = &[
    "boot/grub/main.cfg",
    "boot/grub/grub.multilang.cfg",
    "boot/grub/grub.template.cfg",
    "boot/grub/grub.cfg",
];

/// Main SYSLINUX configuration, relative to the root.
const SYSLINUX_CONFIG: &str = "boot/syslinux.cfg";

/// Directory of per-language SYSLINUX configs, relative to the root.
const SYSLINUX_LANG_DIR: &str = "boot/syslinux/lang";

/// Outcome of updating all discovered configuration files.
#[derive(Debug, Default)]
pub struct ConfigUpdate {
    /// Files whose content changed and was written back.
    pub changed: Vec<PathBuf>,
    /// Number of GRUB files discovered (zero is a bootability risk).
    pub grub_seen: usize,
    /// Per-file GRUB failures; any entry makes the update a failure.
    pub grub_failures: Vec<(PathBuf, String)>,
    /// Per-file SYSLINUX failures; reported but non-fatal.
    pub syslinux_failures: Vec<(PathBuf, String)>,
}

impl ConfigUpdate {
    /// True when at least one GRUB config was found and none failed.
    pub fn grub_ok(&self) -> bool {
        self.grub_seen > 0 && self.grub_failures.is_empty()
    }
}

/// All existing configuration files under `root`, with their dialect.
/// Order is fixed: GRUB variants, SYSLINUX main config, language files.
pub fn discover(root: &MiniosRoot) -> Vec<(Dialect, PathBuf)> {
    let mut found = Vec::new();

    for rel in GRUB_CONFIGS {
        let path = root.path().join(rel);
        if path.is_file() {
            found.push((Dialect::Grub, path));
        }
    }

    let syslinux = root.path().join(SYSLINUX_CONFIG);
    if syslinux.is_file() {
        found.push((Dialect::Syslinux, syslinux));
    }

    if let Ok(entries) = fs::read_dir(root.path().join(SYSLINUX_LANG_DIR)) {
        let mut lang_files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("cfg"))
            .collect();
        lang_files.sort();
        found.extend(lang_files.into_iter().map(|p| (Dialect::Syslinux, p)));
    }

    found
}

/// Rewrite every discovered configuration file to reference `version`.
///
/// Files are only written when their content actually changes. Failures
/// are collected per file; the caller decides what is fatal.
pub fn update(root: &MiniosRoot, version: &KernelVersion) -> ConfigUpdate {
    let mut result = ConfigUpdate::default();

    for (dialect, path) in discover(root) {
        if dialect == Dialect::Grub {
            result.grub_seen += 1;
        }
        match update_file(dialect, &path, version) {
            Ok(true) => result.changed.push(path),
            Ok(false) => {}
            Err(reason) => match dialect {
                Dialect::Grub => result.grub_failures.push((path, reason)),
                Dialect::Syslinux => result.syslinux_failures.push((path, reason)),
            },
        }
    }

    result
}

fn update_file(dialect: Dialect, path: &PathBuf, version: &KernelVersion) -> Result<bool, String> {
    let bytes = fs::read(path).map_err(|e| format!("read failed: {e}"))?;
    let (text, codec) = encoding::decode(&bytes);

    let (updated, changed) = rewrite::rewrite(dialect, &text, version);
    if !changed {
        return Ok(false);
    }

    let out = encoding::encode(&updated, codec)
        .ok_or_else(|| "updated text is not representable in the file's encoding".to_string())?;
    fs::write(path, out).map_err(|e| format!("write failed: {e}"))?;
    Ok(true)
}
