//! Artifact builders: the module image, the initramfs, and the kernel
//! image copy.
//!
//! These wrap external tools (`mksquashfs`, `mkinitrfs`, `depmod`) and
//! only promise to deliver a path to an existing, non-empty output file or
//! fail with a clear error. The activation core treats them as opaque
//! collaborators.

pub mod compression;
pub mod initramfs;
pub mod squashfs;

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::version::VersionPair;

/// The modules directory the running system actually uses, skipping
/// `/lib` when it is just a symlink into `/usr`.
pub(crate) fn modules_root() -> Result<PathBuf> {
    let lib = Path::new("/lib");
    if lib.exists() && !lib.is_symlink() {
        return Ok(PathBuf::from("/lib/modules"));
    }
    let usr_lib = Path::new("/usr/lib");
    if usr_lib.exists() && !usr_lib.is_symlink() {
        return Ok(PathBuf::from("/usr/lib/modules"));
    }
    bail!("no valid kernel modules directory found");
}

/// Relative modules base (`lib/modules` or `usr/lib/modules`) matching the
/// running system's layout, so images built here resolve on the target.
pub(crate) fn system_modules_base() -> &'static str {
    if Path::new("/lib/modules").exists() {
        match fs::canonicalize("/lib/modules") {
            Ok(real) if real.starts_with("/usr/lib/modules") => "usr/lib/modules",
            _ => "lib/modules",
        }
    } else if Path::new("/usr/lib/modules").exists() {
        "usr/lib/modules"
    } else {
        "lib/modules"
    }
}

/// Locate the extracted package's modules directory for `actual`.
/// Packages install under either `lib/modules` or `usr/lib/modules`.
pub(crate) fn extracted_modules_dir(tree: &Path, actual: &str) -> Option<PathBuf> {
    [
        tree.join("usr/lib/modules").join(actual),
        tree.join("lib/modules").join(actual),
    ]
    .into_iter()
    .find(|p| p.is_dir())
}

/// Locate the extracted package's `boot` directory.
pub(crate) fn extracted_boot_dir(tree: &Path) -> Option<PathBuf> {
    [tree.join("boot"), tree.join("usr/boot")]
        .into_iter()
        .find(|p| p.is_dir())
}

/// Copy the kernel image out of the extracted package tree into
/// `output_dir/vmlinuz-<display>`.
///
/// Prefers whatever `vmlinuz-*` the package ships; falls back to the host
/// locations a system kernel would live at.
pub fn copy_kernel_image(
    versions: &VersionPair,
    tree: &Path,
    output_dir: &Path,
) -> Result<PathBuf> {
    let output = output_dir.join(versions.display.kernel_image_name());

    if let Some(boot_dir) = extracted_boot_dir(tree) {
        let mut images: Vec<PathBuf> = fs::read_dir(&boot_dir)
            .with_context(|| format!("reading {}", boot_dir.display()))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("vmlinuz-"))
            })
            .collect();
        images.sort();
        if let Some(image) = images.first() {
            fs::copy(image, &output)
                .with_context(|| format!("copying {} to {}", image.display(), output.display()))?;
            return Ok(output);
        }
    }

    let actual = versions.actual.as_str();
    let fallbacks = [
        format!("/boot/vmlinuz-{actual}"),
        format!("/run/initramfs/memory/data/minios/boot/vmlinuz-{actual}"),
        "/run/initramfs/memory/data/minios/boot/vmlinuz".to_string(),
        format!("/run/initramfs/memory/toram/minios/boot/vmlinuz-{actual}"),
        "/run/initramfs/memory/toram/minios/boot/vmlinuz".to_string(),
    ];
    for candidate in &fallbacks {
        let candidate = Path::new(candidate);
        if candidate.is_file() {
            fs::copy(candidate, &output).with_context(|| {
                format!("copying {} to {}", candidate.display(), output.display())
            })?;
            return Ok(output);
        }
    }

    bail!("kernel image for {} not found", versions.actual);
}

/// Recursively copy a directory tree, preserving symlinks.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("walking {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .unwrap_or_else(|_| entry.path());
        let target = dst.join(rel);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("creating {}", target.display()))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .with_context(|| format!("reading link {}", entry.path().display()))?;
            if target.exists() || target.is_symlink() {
                let _ = fs::remove_file(&target);
            }
            std::os::unix::fs::symlink(&link, &target)
                .with_context(|| format!("linking {}", target.display()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copying {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

/// Fail unless `path` is an existing, non-empty file.
pub(crate) fn expect_output_file(path: &Path, what: &str) -> Result<()> {
    let metadata =
        fs::metadata(path).with_context(|| format!("{what} missing: {}", path.display()))?;
    if metadata.len() == 0 {
        bail!("{what} is empty: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{KernelVersion, VersionPair};
    use tempfile::TempDir;

    fn pair(display: &str, actual: &str) -> VersionPair {
        VersionPair::new(
            KernelVersion::new(display).unwrap(),
            KernelVersion::new(actual).unwrap(),
        )
    }

    #[test]
    fn copies_kernel_image_from_package_boot_dir() {
        let tmp = TempDir::new().unwrap();
        let tree = tmp.path().join("tree");
        let out = tmp.path().join("out");
        fs::create_dir_all(tree.join("boot")).unwrap();
        fs::create_dir_all(&out).unwrap();
        fs::write(tree.join("boot/vmlinuz-6.1.0-18-amd64"), b"kernel").unwrap();

        let versions = pair("6.1.0-18-amd64-unsigned", "6.1.0-18-amd64");
        let copied = copy_kernel_image(&versions, &tree, &out).unwrap();
        assert_eq!(
            copied.file_name().unwrap().to_str().unwrap(),
            "vmlinuz-6.1.0-18-amd64-unsigned"
        );
        assert_eq!(fs::read(&copied).unwrap(), b"kernel");
    }

    #[test]
    fn missing_kernel_image_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let tree = tmp.path().join("tree");
        fs::create_dir_all(&tree).unwrap();
        let versions = pair("9.9.9-none", "9.9.9-none");
        assert!(copy_kernel_image(&versions, &tree, tmp.path()).is_err());
    }

    #[test]
    fn copy_tree_preserves_files_and_symlinks() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("kernel/fs")).unwrap();
        fs::write(src.join("kernel/fs/squashfs.ko"), b"module").unwrap();
        std::os::unix::fs::symlink("kernel/fs", src.join("build")).unwrap();

        copy_tree(&src, &dst).unwrap();

        assert_eq!(
            fs::read(dst.join("kernel/fs/squashfs.ko")).unwrap(),
            b"module"
        );
        assert!(dst.join("build").is_symlink());
        assert_eq!(
            fs::read_link(dst.join("build")).unwrap(),
            PathBuf::from("kernel/fs")
        );
    }

    #[test]
    fn finds_modules_in_either_layout() {
        let tmp = TempDir::new().unwrap();
        let tree = tmp.path();
        fs::create_dir_all(tree.join("usr/lib/modules/6.1.0-18-amd64")).unwrap();
        assert!(extracted_modules_dir(tree, "6.1.0-18-amd64").is_some());
        assert!(extracted_modules_dir(tree, "6.1.0-17-amd64").is_none());
    }

    #[test]
    fn output_file_checks() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("image.sb");
        assert!(expect_output_file(&file, "module image").is_err());
        fs::write(&file, b"").unwrap();
        assert!(expect_output_file(&file, "module image").is_err());
        fs::write(&file, b"data").unwrap();
        assert!(expect_output_file(&file, "module image").is_ok());
    }
}
