//! Identify the kernel the live system is executing.
//!
//! The running kernel is independent of what the active marker claims: the
//! marker says what boots next, while this module reports what booted now.
//! The mounted module image is the primary source because a live system may
//! report a generic release string from `uname` while actually reading its
//! modules from a versioned `.sb` image.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::process::Command;

use crate::version::KernelVersion;

static MOUNTED_MODULE_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"01-kernel-([^/\s]+)\.sb").expect("pattern compiles"));

/// The kernel version the OS booted with, if it can be determined.
pub fn running_version() -> Option<KernelVersion> {
    if let Ok(mounts) = fs::read_to_string("/proc/mounts") {
        if let Some(version) = parse_mounted_module_image(&mounts) {
            return Some(version);
        }
    }
    kernel_release()
}

/// Find a mounted `01-kernel-<v>.sb` squashfs in mount-table text.
pub(crate) fn parse_mounted_module_image(mounts: &str) -> Option<KernelVersion> {
    for line in mounts.lines() {
        if !line.contains("squashfs") {
            continue;
        }
        if let Some(caps) = MOUNTED_MODULE_IMAGE.captures(line) {
            if let Ok(version) = KernelVersion::new(&caps[1]) {
                return Some(version);
            }
        }
    }
    None
}

fn kernel_release() -> Option<KernelVersion> {
    let output = Command::new("uname").arg("-r").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let release = String::from_utf8_lossy(&output.stdout).trim().to_string();
    KernelVersion::new(release).ok()
}
