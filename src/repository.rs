//! The versioned kernel repository and the active boot location.
//!
//! Layout per version: `kernels/<v>/{01-kernel-<v>.sb, vmlinuz-<v>,
//! initrfs-<v>.img}`. A version is packaged iff all three files exist;
//! partial entries are treated as an error and never left behind.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::KernelError;
use crate::layout::MiniosRoot;
use crate::version::KernelVersion;

/// Source paths for the three artifacts of one packaged kernel.
#[derive(Debug, Clone)]
pub struct KernelFileSet {
    pub module_image: PathBuf,
    pub kernel_image: PathBuf,
    pub initramfs: PathBuf,
}

/// The version recorded as active, read from `boot/active-kernel`.
///
/// When the marker is absent or empty, falls back to scanning
/// `boot/vmlinuz-*`; with several stray kernel images the
/// lexicographically greatest version wins, so the fallback stays
/// deterministic.
pub fn active_version(root: &MiniosRoot) -> Option<KernelVersion> {
    match fs::read_to_string(root.active_marker()) {
        Ok(contents) => {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                if let Ok(version) = KernelVersion::new(trimmed) {
                    return Some(version);
                }
            }
        }
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            eprintln!(
                "warning: cannot read active kernel marker {}: {e}",
                root.active_marker().display()
            );
        }
        Err(_) => {}
    }

    scan_boot_kernel_images(&root.boot_dir()).into_iter().max()
}

fn scan_boot_kernel_images(boot_dir: &Path) -> Vec<KernelVersion> {
    let Ok(entries) = fs::read_dir(boot_dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|e| e.file_name().to_str().and_then(KernelVersion::from_kernel_image_name))
        .collect()
}

/// Repository paths of the three artifacts for `version`.
fn repository_files(root: &MiniosRoot, version: &KernelVersion) -> [PathBuf; 3] {
    let dir = root.kernel_dir(version);
    [
        dir.join(version.module_image_name()),
        dir.join(version.kernel_image_name()),
        dir.join(version.initramfs_name()),
    ]
}

/// Active-location paths of the three artifacts for `version`.
fn active_files(root: &MiniosRoot, version: &KernelVersion) -> [PathBuf; 3] {
    [
        root.module_image(version),
        root.kernel_image(version),
        root.initramfs(version),
    ]
}

/// True iff all three artifacts exist under `kernels/<v>/`.
pub fn is_packaged(root: &MiniosRoot, version: &KernelVersion) -> bool {
    repository_files(root, version).iter().all(|p| p.is_file())
}

/// Repository artifacts of `version` that are missing.
pub fn missing_artifacts(root: &MiniosRoot, version: &KernelVersion) -> Vec<PathBuf> {
    repository_files(root, version)
        .into_iter()
        .filter(|p| !p.is_file())
        .collect()
}

/// All versions present in the repository directory, sorted.
pub fn list_packaged(root: &MiniosRoot) -> Vec<KernelVersion> {
    let Ok(entries) = fs::read_dir(root.kernels_dir()) else {
        return Vec::new();
    };
    let mut versions: Vec<KernelVersion> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().and_then(|n| KernelVersion::new(n).ok()))
        .collect();
    versions.sort();
    versions
}

/// Union of packaged, active and running versions, sorted.
pub fn list_all(root: &MiniosRoot, running: Option<&KernelVersion>) -> Vec<KernelVersion> {
    let mut versions: BTreeSet<KernelVersion> = list_packaged(root).into_iter().collect();
    if let Some(active) = active_version(root) {
        versions.insert(active);
    }
    if let Some(running) = running {
        versions.insert(running.clone());
    }
    versions.into_iter().collect()
}

/// Copy a complete file set into `kernels/<v>/`.
///
/// Refuses to touch an existing version directory; on any copy failure the
/// partially created directory is removed so no partial entry persists.
pub fn store(
    root: &MiniosRoot,
    version: &KernelVersion,
    files: &KernelFileSet,
) -> Result<(), KernelError> {
    let dir = root.kernel_dir(version);
    if dir.exists() {
        return Err(KernelError::RepositoryEntryExists(version.clone()));
    }
    fs::create_dir_all(&dir)
        .map_err(|e| KernelError::io(format!("creating {}", dir.display()), e))?;

    let copies = [
        (&files.module_image, dir.join(version.module_image_name())),
        (&files.kernel_image, dir.join(version.kernel_image_name())),
        (&files.initramfs, dir.join(version.initramfs_name())),
    ];
    for (src, dst) in copies {
        if let Err(e) = fs::copy(src, &dst) {
            let _ = fs::remove_dir_all(&dir);
            return Err(KernelError::io(
                format!("copying {} to {}", src.display(), dst.display()),
                e,
            ));
        }
    }
    Ok(())
}

/// Remove `kernels/<v>/` entirely. Succeeds when already absent.
pub fn delete(root: &MiniosRoot, version: &KernelVersion) -> Result<(), KernelError> {
    let dir = root.kernel_dir(version);
    if !dir.exists() {
        return Ok(());
    }
    fs::remove_dir_all(&dir)
        .map_err(|e| KernelError::io(format!("removing {}", dir.display()), e))
}

/// Move or copy the active kernel's files into its repository directory.
///
/// `is_running` decides copy versus move: the running kernel's boot files
/// are still open by the live system, so they must stay in place. Active
/// files that do not exist are skipped.
pub fn retire_active(
    root: &MiniosRoot,
    active: &KernelVersion,
    is_running: bool,
) -> Result<(), KernelError> {
    let dir = root.kernel_dir(active);
    fs::create_dir_all(&dir)
        .map_err(|e| KernelError::io(format!("creating {}", dir.display()), e))?;

    for src in active_files(root, active) {
        if !src.is_file() {
            continue;
        }
        let file_name = src.file_name().unwrap_or_default().to_os_string();
        let dst = dir.join(file_name);
        if is_running {
            fs::copy(&src, &dst).map_err(|e| {
                KernelError::io(format!("copying {} to {}", src.display(), dst.display()), e)
            })?;
        } else {
            move_file(&src, &dst)?;
        }
    }
    Ok(())
}

/// Copy the three repository files of `version` into the active locations.
///
/// All three must exist before anything is copied; bootloader configs and
/// the marker are the caller's responsibility and come after.
pub fn install_active(root: &MiniosRoot, version: &KernelVersion) -> Result<(), KernelError> {
    if !root.kernel_dir(version).exists() {
        return Err(KernelError::NotPackaged(version.clone()));
    }

    let sources = repository_files(root, version);
    for src in &sources {
        if !src.is_file() {
            return Err(KernelError::IncompleteArtifact {
                version: version.clone(),
                file: src.clone(),
            });
        }
    }

    let boot_dir = root.boot_dir();
    fs::create_dir_all(&boot_dir)
        .map_err(|e| KernelError::io(format!("creating {}", boot_dir.display()), e))?;

    for (src, dst) in sources.iter().zip(active_files(root, version)) {
        fs::copy(src, &dst).map_err(|e| {
            KernelError::io(format!("copying {} to {}", src.display(), dst.display()), e)
        })?;
    }
    Ok(())
}

/// Record `version` in `boot/active-kernel`.
pub fn write_active_marker(root: &MiniosRoot, version: &KernelVersion) -> Result<(), KernelError> {
    let marker = root.active_marker();
    if let Some(parent) = marker.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| KernelError::io(format!("creating {}", parent.display()), e))?;
    }
    fs::write(&marker, version.as_str())
        .map_err(|e| KernelError::io(format!("writing {}", marker.display()), e))
}

fn move_file(src: &Path, dst: &Path) -> Result<(), KernelError> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    // Cross-device fallback.
    fs::copy(src, dst).map_err(|e| {
        KernelError::io(format!("copying {} to {}", src.display(), dst.display()), e)
    })?;
    fs::remove_file(src)
        .map_err(|e| KernelError::io(format!("removing {}", src.display()), e))
}
