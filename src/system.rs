//! Host system introspection.
//!
//! Small probes the CLI and the scratch-space selection rely on: which
//! filesystem a path lives on, whether it is writable, which union
//! filesystem the live system uses, and how the system was booted.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;

/// Union filesystem flavor of the live system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnionFs {
    Aufs,
    Overlayfs,
}

impl std::fmt::Display for UnionFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnionFs::Aufs => f.write_str("aufs"),
            UnionFs::Overlayfs => f.write_str("overlayfs"),
        }
    }
}

/// Filesystem type name for `path`, e.g. `vfat` or `squashfs`.
pub fn filesystem_type(path: &Path) -> String {
    if let Ok(output) = Command::new("stat").args(["-f", "-c", "%T"]).arg(path).output() {
        if output.status.success() {
            let fs_type = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !fs_type.is_empty() {
                return fs_type;
            }
        }
    }

    if let Ok(mounts) = fs::read_to_string("/proc/mounts") {
        if let Some(fs_type) = filesystem_type_from_mounts(&mounts, path) {
            return fs_type;
        }
    }
    "unknown".to_string()
}

/// Longest mount-point prefix match wins, so `/` does not shadow deeper
/// mounts.
fn filesystem_type_from_mounts(mounts: &str, path: &Path) -> Option<String> {
    let path = path.to_string_lossy();
    let mut best: Option<(usize, &str)> = None;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_source), Some(mount_point), Some(fs_type)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let matches = mount_point == "/"
            || path.as_ref() == mount_point
            || path.starts_with(&format!("{mount_point}/"));
        if matches && best.map_or(true, |(len, _)| mount_point.len() > len) {
            best = Some((mount_point.len(), fs_type));
        }
    }
    best.map(|(_, fs_type)| fs_type.to_string())
}

/// Whether `path` accepts new files. SquashFS media are read-only by
/// construction, everything else is probed with a throwaway file.
pub fn writability(path: &Path) -> (bool, Option<String>) {
    if filesystem_type(path) == "squashfs" {
        return (
            false,
            Some("directory is on a SquashFS filesystem (read-only)".to_string()),
        );
    }

    match tempfile::tempfile_in(path) {
        Ok(mut probe) => match probe.write_all(b"probe") {
            Ok(()) => (true, None),
            Err(e) => (false, Some(format!("write failed: {e}"))),
        },
        Err(e) => (false, Some(format!("permission denied: {e}"))),
    }
}

/// Union filesystem of the live root, defaulting to overlayfs when the
/// mount table is inconclusive.
pub fn union_filesystem_type() -> UnionFs {
    match fs::read_to_string("/proc/mounts") {
        Ok(mounts) => union_fs_from_mounts(&mounts),
        Err(_) => UnionFs::Overlayfs,
    }
}

fn union_fs_from_mounts(mounts: &str) -> UnionFs {
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_source), Some(mount_point), Some(fs_type)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if mount_point != "/" {
            continue;
        }
        if fs_type == "aufs" {
            return UnionFs::Aufs;
        }
        if fs_type == "overlay" || fs_type == "overlayfs" {
            return UnionFs::Overlayfs;
        }
    }
    UnionFs::Overlayfs
}

/// How the current system was booted.
pub fn system_type() -> &'static str {
    if Path::new("/run/initramfs/memory").exists() {
        if Path::new("/run/initramfs/memory/toram").exists() {
            "Live system (running from RAM)"
        } else {
            "Live system (running from media)"
        }
    } else {
        "Installed system"
    }
}

/// Human-readable size, decimal-dot, binary units.
pub fn format_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn longest_mount_prefix_wins() {
        let mounts = "\
/dev/sda2 / ext4 rw 0 0\n\
/dev/sdb1 /media/usb vfat rw 0 0\n";
        assert_eq!(
            filesystem_type_from_mounts(mounts, Path::new("/media/usb/minios")),
            Some("vfat".to_string())
        );
        assert_eq!(
            filesystem_type_from_mounts(mounts, Path::new("/home/user")),
            Some("ext4".to_string())
        );
    }

    #[test]
    fn union_fs_detected_from_root_line() {
        assert_eq!(
            union_fs_from_mounts("none / aufs rw 0 0\n"),
            UnionFs::Aufs
        );
        assert_eq!(
            union_fs_from_mounts("overlay / overlay rw 0 0\n"),
            UnionFs::Overlayfs
        );
        assert_eq!(union_fs_from_mounts(""), UnionFs::Overlayfs);
    }

    #[test]
    fn writable_directory_is_reported_writable() {
        let tmp = TempDir::new().unwrap();
        let (writable, reason) = writability(tmp.path());
        assert!(writable, "reason: {reason:?}");
    }

    #[test]
    fn format_size_picks_sane_units() {
        assert_eq!(format_size(500), "500.0 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(48 * 1024 * 1024), "48.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
