//! Obtain an extracted kernel package tree.
//!
//! Two sources: a named `linux-image-*` package downloaded from the apt
//! repository, or a local `.deb` file. Either way the result is an
//! extracted tree plus the (display, actual) version pair. The display
//! version keeps whatever suffix the package name carries; the actual
//! version is whatever the package really ships and is detected from the
//! tree.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

use crate::version::{KernelVersion, VersionPair};

const PACKAGE_PREFIX: &str = "linux-image-";
const APT_CACHE_FILE: &str = "/var/cache/apt/pkgcache.bin";
const APT_LISTS_DIR: &str = "/var/lib/apt/lists";
const CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

static DEB_FILE_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"linux-image-(.+?)_").expect("pattern compiles"));
static CONTROL_PACKAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Package:\s*linux-image-(\S+)").expect("pattern compiles"));

/// An extracted kernel package, ready for the artifact builders.
#[derive(Debug)]
pub struct ExtractedKernel {
    pub versions: VersionPair,
    /// Root of the extracted package contents.
    pub tree: PathBuf,
}

/// Download `package` from the apt repository and extract it into
/// `scratch`.
pub fn obtain_from_repository(
    package: &str,
    scratch: &Path,
    force_update: bool,
) -> Result<ExtractedKernel> {
    ensure_package_cache_fresh(force_update)?;

    println!("Downloading {package} from repository");
    let status = Command::new("apt-get")
        .arg("download")
        .arg(package)
        .current_dir(scratch)
        .status()
        .context("executing apt-get")?;
    if !status.success() {
        bail!("failed to download package '{package}' from repository");
    }

    let deb = find_downloaded_deb(scratch, package)?;
    println!(
        "Found package file: {}",
        deb.file_name().unwrap_or_default().to_string_lossy()
    );

    extract_deb(&deb, scratch)?;

    let display = package.strip_prefix(PACKAGE_PREFIX).unwrap_or(package);
    let display = KernelVersion::new(display)?;
    let actual = detect_actual_version(scratch, &display);

    Ok(ExtractedKernel {
        versions: VersionPair::new(display, actual),
        tree: scratch.to_path_buf(),
    })
}

/// Extract a local `.deb` into `scratch`.
pub fn obtain_from_deb(deb: &Path, scratch: &Path) -> Result<ExtractedKernel> {
    if !deb.is_file() {
        bail!("package file not found: {}", deb.display());
    }

    println!("Extracting {}", deb.display());
    extract_deb(deb, scratch)?;

    let file_name = deb.file_name().unwrap_or_default().to_string_lossy();
    let display = match version_from_deb_filename(&file_name) {
        Some(version) => version,
        None => deb_fallback_version(deb, scratch)?,
    };
    let display = KernelVersion::new(display)?;
    let actual = detect_actual_version(scratch, &display);

    Ok(ExtractedKernel {
        versions: VersionPair::new(display, actual),
        tree: scratch.to_path_buf(),
    })
}

/// A stale package database makes `apt-get download` fetch dead URLs.
/// Stale means: empty lists directory, or a cache older than 24 hours.
fn ensure_package_cache_fresh(force_update: bool) -> Result<()> {
    if !package_cache_stale(Path::new(APT_CACHE_FILE), Path::new(APT_LISTS_DIR)) {
        return Ok(());
    }

    if !force_update {
        bail!("package database is outdated; run 'apt update' or use --force-update");
    }

    println!("Updating package lists");
    let output = Command::new("apt")
        .arg("update")
        .output()
        .context("executing apt update")?;
    if !output.status.success() {
        bail!(
            "failed to update package lists: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    println!("Package lists updated");
    Ok(())
}

fn package_cache_stale(cache_file: &Path, lists_dir: &Path) -> bool {
    let lists_empty = match fs::read_dir(lists_dir) {
        Ok(entries) => !entries.flatten().any(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|name| !name.starts_with("lock") && name != "partial")
        }),
        Err(_) => true,
    };
    if lists_empty {
        return true;
    }

    match fs::metadata(cache_file).and_then(|m| m.modified()) {
        Ok(modified) => match SystemTime::now().duration_since(modified) {
            Ok(age) => age >= CACHE_MAX_AGE,
            Err(_) => false,
        },
        Err(_) => true,
    }
}

fn find_downloaded_deb(scratch: &Path, package: &str) -> Result<PathBuf> {
    let prefix = format!("{package}_");
    let mut debs: Vec<PathBuf> = fs::read_dir(scratch)
        .with_context(|| format!("reading {}", scratch.display()))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".deb"))
        })
        .collect();
    debs.sort();
    debs.into_iter()
        .next()
        .with_context(|| format!("downloaded .deb for '{package}' not found in {}", scratch.display()))
}

fn extract_deb(deb: &Path, dest: &Path) -> Result<()> {
    let output = Command::new("dpkg-deb")
        .arg("-x")
        .arg(deb)
        .arg(dest)
        .output()
        .context("executing dpkg-deb")?;
    if !output.status.success() {
        bail!(
            "failed to extract package '{}': {}",
            deb.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// The version the package really ships: the `vmlinuz-*` name wins, then
/// the modules directory name, then the display version.
fn detect_actual_version(tree: &Path, display: &KernelVersion) -> KernelVersion {
    if let Some(boot_dir) = crate::artifact::extracted_boot_dir(tree) {
        if let Ok(entries) = fs::read_dir(&boot_dir) {
            let mut versions: Vec<KernelVersion> = entries
                .flatten()
                .filter_map(|e| {
                    e.file_name()
                        .to_str()
                        .and_then(KernelVersion::from_kernel_image_name)
                })
                .collect();
            versions.sort();
            if let Some(version) = versions.into_iter().next() {
                return version;
            }
        }
    }

    for modules_base in [tree.join("lib/modules"), tree.join("usr/lib/modules")] {
        let Ok(entries) = fs::read_dir(&modules_base) else {
            continue;
        };
        let mut dirs: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        dirs.sort();
        if let Some(dir) = dirs.into_iter().next() {
            if let Ok(version) = KernelVersion::new(dir) {
                return version;
            }
        }
    }

    display.clone()
}

fn version_from_deb_filename(file_name: &str) -> Option<String> {
    DEB_FILE_VERSION
        .captures(file_name)
        .map(|caps| caps[1].to_string())
}

/// Last resorts for a renamed `.deb`: the extracted tree, then the
/// package's control file.
fn deb_fallback_version(deb: &Path, scratch: &Path) -> Result<String> {
    if let Some(boot_dir) = crate::artifact::extracted_boot_dir(scratch) {
        if let Ok(entries) = fs::read_dir(&boot_dir) {
            let mut versions: Vec<KernelVersion> = entries
                .flatten()
                .filter_map(|e| {
                    e.file_name()
                        .to_str()
                        .and_then(KernelVersion::from_kernel_image_name)
                })
                .collect();
            versions.sort();
            if let Some(version) = versions.into_iter().next() {
                return Ok(version.as_str().to_string());
            }
        }
    }

    let control_dir = scratch.join("DEBIAN");
    let output = Command::new("dpkg-deb")
        .arg("-e")
        .arg(deb)
        .arg(&control_dir)
        .output()
        .context("executing dpkg-deb")?;
    if output.status.success() {
        if let Ok(control) = fs::read_to_string(control_dir.join("control")) {
            if let Some(caps) = CONTROL_PACKAGE.captures(&control) {
                return Ok(caps[1].to_string());
            }
        }
    }

    bail!(
        "could not determine kernel version from package {}",
        deb.display()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn version_from_standard_deb_filename() {
        assert_eq!(
            version_from_deb_filename("linux-image-6.1.0-13-amd64_6.1.55-1_amd64.deb"),
            Some("6.1.0-13-amd64".to_string())
        );
        assert_eq!(version_from_deb_filename("random-package_1.0.deb"), None);
    }

    #[test]
    fn actual_version_prefers_the_shipped_kernel_image() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("boot")).unwrap();
        fs::create_dir_all(tmp.path().join("lib/modules/6.1.0-18-amd64")).unwrap();
        fs::write(tmp.path().join("boot/vmlinuz-6.1.0-18-amd64"), b"k").unwrap();

        let display = KernelVersion::new("6.1.0-18-amd64-unsigned").unwrap();
        assert_eq!(
            detect_actual_version(tmp.path(), &display).as_str(),
            "6.1.0-18-amd64"
        );
    }

    #[test]
    fn actual_version_falls_back_to_modules_directory() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("usr/lib/modules/6.1.0-18-amd64")).unwrap();

        let display = KernelVersion::new("6.1.0-18-amd64-unsigned").unwrap();
        assert_eq!(
            detect_actual_version(tmp.path(), &display).as_str(),
            "6.1.0-18-amd64"
        );
    }

    #[test]
    fn actual_version_defaults_to_display() {
        let tmp = TempDir::new().unwrap();
        let display = KernelVersion::new("6.1.0-18-amd64").unwrap();
        assert_eq!(detect_actual_version(tmp.path(), &display), display);
    }

    #[test]
    fn control_file_package_pattern() {
        let control = "Package: linux-image-6.1.0-13-amd64\nVersion: 6.1.55-1\n";
        assert_eq!(&CONTROL_PACKAGE.captures(control).unwrap()[1], "6.1.0-13-amd64");
    }

    #[test]
    fn empty_lists_directory_means_stale() {
        let tmp = TempDir::new().unwrap();
        let lists = tmp.path().join("lists");
        fs::create_dir_all(&lists).unwrap();
        let cache = tmp.path().join("pkgcache.bin");
        fs::write(&cache, b"cache").unwrap();

        assert!(package_cache_stale(&cache, &lists));

        fs::write(lists.join("deb.debian.org_debian_dists_trixie_InRelease"), b"x").unwrap();
        assert!(!package_cache_stale(&cache, &lists));
    }

    #[test]
    fn missing_cache_file_means_stale() {
        let tmp = TempDir::new().unwrap();
        let lists = tmp.path().join("lists");
        fs::create_dir_all(&lists).unwrap();
        fs::write(lists.join("some-index"), b"x").unwrap();

        assert!(package_cache_stale(&tmp.path().join("missing.bin"), &lists));
    }
}
