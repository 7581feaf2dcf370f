//! Scratch directory selection for packaging runs.
//!
//! A full kernel packaging needs on the order of a gigabyte of scratch
//! space, which a RAM-booted live system's `/tmp` often cannot provide.
//! Selection order: an explicit override, then `/tmp`, then the persistent
//! changes area of the live medium (whose path depends on the union
//! filesystem in use).

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use crate::system::{self, UnionFs};

/// Space a full kernel packaging run is assumed to need.
pub const REQUIRED_MB: u64 = 1024;

const TEMP_PREFIX: &str = "minios-kernel-";

/// Create a scratch directory with at least `required_mb` free.
///
/// The returned [`TempDir`] removes itself on drop, which also covers the
/// error paths of the packaging pipeline.
pub fn scratch_dir(required_mb: u64, custom: Option<&Path>) -> Result<TempDir> {
    let required = required_mb * 1024 * 1024;

    if let Some(custom) = custom {
        if !custom.is_dir() {
            bail!("custom temporary directory does not exist: {}", custom.display());
        }
        let available = fs2::available_space(custom)
            .with_context(|| format!("checking free space in {}", custom.display()))?;
        if available < required {
            bail!(
                "insufficient space in custom temporary directory '{}': {} available, {} needed",
                custom.display(),
                system::format_size(available),
                system::format_size(required)
            );
        }
        println!(
            "Using custom temporary directory {} ({} available)",
            custom.display(),
            system::format_size(available)
        );
        return new_tempdir_in(custom);
    }

    let default_tmp = Path::new("/tmp");
    match fs2::available_space(default_tmp) {
        Ok(available) if available >= required => {
            println!(
                "Using /tmp ({} available, {} needed)",
                system::format_size(available),
                system::format_size(required)
            );
            new_tempdir_in(default_tmp)
        }
        Ok(available) => {
            println!(
                "Insufficient space in /tmp ({} available, {} needed)",
                system::format_size(available),
                system::format_size(required)
            );
            scratch_in_changes_area(required, available)
        }
        Err(e) => {
            eprintln!("warning: could not check free space in /tmp: {e}");
            TempDir::with_prefix(TEMP_PREFIX).context("creating temporary directory")
        }
    }
}

/// The writable changes area of the live medium, used when `/tmp` is too
/// small. Its location differs between aufs and overlayfs layouts.
fn scratch_in_changes_area(required: u64, tmp_available: u64) -> Result<TempDir> {
    let alt = match system::union_filesystem_type() {
        UnionFs::Aufs => Path::new("/run/initramfs/memory/changes/tmp"),
        UnionFs::Overlayfs => Path::new("/run/initramfs/memory/changes/changes/tmp"),
    };
    println!("Trying alternative temporary location: {}", alt.display());

    fs::create_dir_all(alt)
        .with_context(|| format!("creating alternative temporary directory {}", alt.display()))?;
    let available = fs2::available_space(alt)
        .with_context(|| format!("checking free space in {}", alt.display()))?;
    if available < required {
        bail!(
            "insufficient disk space: need {}, but only {} available in /tmp and {} in {}",
            system::format_size(required),
            system::format_size(tmp_available),
            system::format_size(available),
            alt.display()
        );
    }
    new_tempdir_in(alt)
}

fn new_tempdir_in(dir: &Path) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempdir_in(dir)
        .with_context(|| format!("creating temporary directory in {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn custom_directory_is_used_when_space_allows() {
        let base = TempDir::new().unwrap();
        // A zero requirement always fits.
        let scratch = scratch_dir(0, Some(base.path())).unwrap();
        assert!(scratch.path().starts_with(base.path()));
        assert!(scratch
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(TEMP_PREFIX));
    }

    #[test]
    fn missing_custom_directory_is_an_error() {
        let err = scratch_dir(0, Some(Path::new("/nonexistent/scratch"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn unreasonable_requirement_fails() {
        let base = TempDir::new().unwrap();
        // An exabyte cannot be available.
        let err = scratch_dir(1024 * 1024 * 1024 * 1024, Some(base.path())).unwrap_err();
        assert!(err.to_string().contains("insufficient space"));
    }

    #[test]
    fn scratch_directory_is_removed_on_drop() {
        let base = TempDir::new().unwrap();
        let path = {
            let scratch = scratch_dir(0, Some(base.path())).unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
