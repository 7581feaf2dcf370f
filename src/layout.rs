//! On-disk layout of a MiniOS distribution root.
//!
//! The root is the directory that holds `boot/`, the active module images
//! (`01-kernel-*.sb`, `02-firmware-*.sb`, ...) and the versioned kernel
//! repository under `kernels/`. It usually lives on the boot medium and is
//! discovered once per invocation.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::version::KernelVersion;

/// Fixed locations probed before falling back to a mount scan.
const DIRECT_PROBES: &[&str] = &[
    "/run/initramfs/memory/data/minios",
    "/run/initramfs/memory/toram/minios",
];

/// Media roots whose first-level entries are checked for a `minios` child.
const MEDIA_ROOTS: &[&str] = &["/media", "/mnt"];

/// Filesystem types the boot medium may use.
const MEDIA_FSTYPES: &str = "vfat,ext4,ntfs";

/// Name of the marker file recording the active kernel, under `boot/`.
pub const ACTIVE_MARKER_NAME: &str = "active-kernel";

/// A discovered (or explicitly chosen) MiniOS root directory.
#[derive(Debug, Clone)]
pub struct MiniosRoot {
    path: PathBuf,
}

impl MiniosRoot {
    /// Use `path` as the root without probing for it.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Locate the MiniOS root on the running system.
    ///
    /// Probes the live-boot memory locations, removable media under
    /// `/media` and `/mnt`, and `/minios`, then falls back to scanning
    /// mounted vfat/ext4/ntfs filesystems for a `minios` directory.
    pub fn discover() -> Option<Self> {
        for probe in DIRECT_PROBES {
            let path = Path::new(probe);
            if looks_like_root(path) {
                return Some(Self::at(path));
            }
        }

        for media_root in MEDIA_ROOTS {
            let Ok(entries) = fs::read_dir(media_root) else {
                continue;
            };
            let mut mounts: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
            mounts.sort();
            for mount in mounts {
                let candidate = mount.join("minios");
                if looks_like_root(&candidate) {
                    return Some(Self::at(candidate));
                }
            }
        }

        let plain = Path::new("/minios");
        if looks_like_root(plain) {
            return Some(Self::at(plain));
        }

        scan_mounted_filesystems().map(Self::at)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn boot_dir(&self) -> PathBuf {
        self.path.join("boot")
    }

    /// The versioned repository of inactive kernels.
    pub fn kernels_dir(&self) -> PathBuf {
        self.path.join("kernels")
    }

    /// Repository directory for one version: `kernels/<v>/`.
    pub fn kernel_dir(&self, version: &KernelVersion) -> PathBuf {
        self.kernels_dir().join(version.as_str())
    }

    /// `boot/active-kernel`, the marker recording the active version.
    pub fn active_marker(&self) -> PathBuf {
        self.boot_dir().join(ACTIVE_MARKER_NAME)
    }

    /// Active location of the kernel image: `boot/vmlinuz-<v>`.
    pub fn kernel_image(&self, version: &KernelVersion) -> PathBuf {
        self.boot_dir().join(version.kernel_image_name())
    }

    /// Active location of the initramfs: `boot/initrfs-<v>.img`.
    pub fn initramfs(&self, version: &KernelVersion) -> PathBuf {
        self.boot_dir().join(version.initramfs_name())
    }

    /// Active location of the module image: `01-kernel-<v>.sb` in the root.
    pub fn module_image(&self, version: &KernelVersion) -> PathBuf {
        self.path.join(version.module_image_name())
    }
}

/// Structural signature check: a root must contain at least one of
/// `boot`, `01-kernel*`, `02-firmware*`.
fn looks_like_root(path: &Path) -> bool {
    let Ok(entries) = fs::read_dir(path) else {
        return false;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name == "boot" || name.starts_with("01-kernel") || name.starts_with("02-firmware") {
            return true;
        }
    }
    false
}

/// Ask `findmnt` for media-type mounts and look for a `minios` directory
/// on each of them.
fn scan_mounted_filesystems() -> Option<PathBuf> {
    let output = Command::new("findmnt")
        .args(["-rn", "-t", MEDIA_FSTYPES, "-o", "TARGET"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let targets = String::from_utf8_lossy(&output.stdout);
    for mount_point in targets.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let candidate = Path::new(mount_point).join("minios");
        if looks_like_root(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn signature_accepts_boot_directory() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("boot")).unwrap();
        assert!(looks_like_root(tmp.path()));
    }

    #[test]
    fn signature_accepts_module_image() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("01-kernel-6.1.0-18-amd64.sb"), b"sb").unwrap();
        assert!(looks_like_root(tmp.path()));
    }

    #[test]
    fn signature_rejects_empty_directory() {
        let tmp = TempDir::new().unwrap();
        assert!(!looks_like_root(tmp.path()));
    }

    #[test]
    fn signature_rejects_missing_directory() {
        assert!(!looks_like_root(Path::new("/nonexistent/minios")));
    }

    #[test]
    fn paths_follow_the_layout() {
        let root = MiniosRoot::at("/media/usb/minios");
        let v = KernelVersion::new("6.1.0-18-amd64").unwrap();
        assert_eq!(
            root.active_marker(),
            PathBuf::from("/media/usb/minios/boot/active-kernel")
        );
        assert_eq!(
            root.kernel_image(&v),
            PathBuf::from("/media/usb/minios/boot/vmlinuz-6.1.0-18-amd64")
        );
        assert_eq!(
            root.initramfs(&v),
            PathBuf::from("/media/usb/minios/boot/initrfs-6.1.0-18-amd64.img")
        );
        assert_eq!(
            root.module_image(&v),
            PathBuf::from("/media/usb/minios/01-kernel-6.1.0-18-amd64.sb")
        );
        assert_eq!(
            root.kernel_dir(&v),
            PathBuf::from("/media/usb/minios/kernels/6.1.0-18-amd64")
        );
    }
}
