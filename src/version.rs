//! Kernel version identifiers.
//!
//! A version string such as `6.1.0-18-amd64` names all three artifacts of a
//! packaged kernel: the kernel image `vmlinuz-<v>`, the initramfs
//! `initrfs-<v>.img`, and the module image `01-kernel-<v>.sb`. It is also
//! the directory name for the version inside the kernel repository.

use anyhow::{bail, Result};
use serde::Serialize;
use std::fmt;

pub const KERNEL_IMAGE_PREFIX: &str = "vmlinuz-";
pub const INITRAMFS_PREFIX: &str = "initrfs-";
pub const INITRAMFS_SUFFIX: &str = ".img";
pub const MODULE_IMAGE_PREFIX: &str = "01-kernel-";
pub const MODULE_IMAGE_SUFFIX: &str = ".sb";

/// An opaque kernel version identifier (e.g. `6.1.0-18-amd64`).
///
/// Validated to be usable as a single path segment; no other structure is
/// assumed. Ordering is plain lexicographic, which is what the repository
/// listing and the marker-less fallback rely on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct KernelVersion(String);

impl KernelVersion {
    pub fn new(version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        if version.is_empty() {
            bail!("kernel version must not be empty");
        }
        if version.contains('/') || version.contains(char::is_whitespace) {
            bail!("kernel version must be a plain file name segment: '{version}'");
        }
        if version == "." || version == ".." {
            bail!("kernel version must not be a relative path component");
        }
        Ok(Self(version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `vmlinuz-<v>`
    pub fn kernel_image_name(&self) -> String {
        format!("{KERNEL_IMAGE_PREFIX}{}", self.0)
    }

    /// `initrfs-<v>.img`
    pub fn initramfs_name(&self) -> String {
        format!("{INITRAMFS_PREFIX}{}{INITRAMFS_SUFFIX}", self.0)
    }

    /// `01-kernel-<v>.sb`
    pub fn module_image_name(&self) -> String {
        format!("{MODULE_IMAGE_PREFIX}{}{MODULE_IMAGE_SUFFIX}", self.0)
    }

    /// Parse a version out of a `vmlinuz-<v>` file name.
    pub fn from_kernel_image_name(name: &str) -> Option<Self> {
        let version = name.strip_prefix(KERNEL_IMAGE_PREFIX)?;
        Self::new(version).ok()
    }

    /// Parse a version out of an `initrfs-<v>.img` file name.
    pub fn from_initramfs_name(name: &str) -> Option<Self> {
        let version = name
            .strip_prefix(INITRAMFS_PREFIX)?
            .strip_suffix(INITRAMFS_SUFFIX)?;
        Self::new(version).ok()
    }

    /// Parse a version out of a `01-kernel-<v>.sb` file name.
    pub fn from_module_image_name(name: &str) -> Option<Self> {
        let version = name
            .strip_prefix(MODULE_IMAGE_PREFIX)?
            .strip_suffix(MODULE_IMAGE_SUFFIX)?;
        Self::new(version).ok()
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two versions tracked for one packaged kernel.
///
/// The display version comes from the requested package name and keeps
/// suffixes like `-unsigned`; it names the output artifacts. The actual
/// version comes from the real `vmlinuz`/module-directory name inside the
/// extracted package; it is the one the live module tree and `depmod`
/// operate on. The two are carried together so they can never be conflated
/// through hidden state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPair {
    pub display: KernelVersion,
    pub actual: KernelVersion,
}

impl VersionPair {
    pub fn new(display: KernelVersion, actual: KernelVersion) -> Self {
        Self { display, actual }
    }

    /// Both versions are the same string.
    pub fn uniform(version: KernelVersion) -> Self {
        Self {
            actual: version.clone(),
            display: version,
        }
    }
}
