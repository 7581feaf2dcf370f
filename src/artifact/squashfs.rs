//! Module image builder.
//!
//! Packs one kernel's module tree into a compressed SquashFS image named
//! `01-kernel-<display>.sb`. The tree inside the image mirrors the running
//! system's modules base (`lib/modules` vs `usr/lib/modules`) and keeps
//! the actual kernel version as the directory name so the booted kernel
//! finds its own modules.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::compression::CompressionMethod;
use crate::version::VersionPair;

/// SquashFS block size used for module images.
const BLOCK_SIZE: &str = "1024K";

pub struct ModuleImageRequest<'a> {
    pub versions: &'a VersionPair,
    pub method: &'a CompressionMethod,
    /// Extracted package tree holding `lib/modules/<actual>/`.
    pub tree: &'a Path,
    pub output_dir: &'a Path,
    /// Scratch space for the staging tree.
    pub scratch: &'a Path,
}

/// Build the module image and return its path.
pub fn build_module_image(request: &ModuleImageRequest<'_>) -> Result<PathBuf> {
    let output = request
        .output_dir
        .join(request.versions.display.module_image_name());
    if output.exists() {
        fs::remove_file(&output)
            .with_context(|| format!("removing stale {}", output.display()))?;
    }

    let actual = request.versions.actual.as_str();
    let modules = super::extracted_modules_dir(request.tree, actual)
        .with_context(|| format!("kernel modules for {actual} not found in package"))?;

    let staging = stage_modules(request.scratch, &modules, actual)?;
    run_depmod(&staging, actual)?;
    run_mksquashfs(&staging, &output, request.method)?;

    super::expect_output_file(&output, "module image")?;
    let _ = fs::remove_dir_all(&staging);
    Ok(output)
}

/// Copy the module tree into `scratch` under the system modules base.
/// The staging root gets mode 755 so image contents stay world-readable.
fn stage_modules(scratch: &Path, modules: &Path, actual: &str) -> Result<PathBuf> {
    let staging = scratch.join("squashfs-staging");
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)
        .with_context(|| format!("creating {}", staging.display()))?;
    fs::set_permissions(&staging, fs::Permissions::from_mode(0o755))?;

    let target = staging.join(super::system_modules_base()).join(actual);
    super::copy_tree(modules, &target)?;
    Ok(staging)
}

/// Generate `modules.dep` and friends inside the staging tree.
/// depmod warnings are tolerated; lines marked `ERROR:` abort the build.
fn run_depmod(staging: &Path, actual: &str) -> Result<()> {
    let basedir = if super::system_modules_base() == "usr/lib/modules" {
        staging.join("usr")
    } else {
        staging.to_path_buf()
    };

    println!("Generating module dependencies");
    match Command::new("depmod")
        .arg("-b")
        .arg(&basedir)
        .arg(actual)
        .output()
    {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("ERROR:") {
                bail!("depmod failed: {}", stderr.trim());
            }
            eprintln!("warning: depmod reported: {}", stderr.trim());
            Ok(())
        }
        Err(e) => {
            eprintln!("warning: could not run depmod: {e}");
            Ok(())
        }
    }
}

fn run_mksquashfs(staging: &Path, output: &Path, method: &CompressionMethod) -> Result<()> {
    let mut cmd = Command::new("mksquashfs");
    cmd.arg(staging)
        .arg(output)
        .args(["-comp", method.name])
        .args(method.squashfs_args)
        .args(["-b", BLOCK_SIZE, "-always-use-fragments", "-noappend"]);
    if supports_no_strip() {
        cmd.arg("-no-strip");
    }

    println!("Creating SquashFS image with {} compression", method.name);
    let result = cmd
        .output()
        .context("executing mksquashfs (is squashfs-tools installed?)")?;
    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        let stdout = String::from_utf8_lossy(&result.stdout);
        bail!(
            "mksquashfs failed (status {}): {}",
            result.status,
            tail(&stderr, &stdout)
        );
    }
    Ok(())
}

/// `-no-strip` keeps symlink-heavy module trees intact; it appeared in
/// mksquashfs 4.5.
fn supports_no_strip() -> bool {
    let Ok(output) = Command::new("mksquashfs").arg("-version").output() else {
        return false;
    };
    // Version info lands on stdout or stderr depending on the build.
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    parse_mksquashfs_version(&text).is_some_and(|(major, minor)| (major, minor) >= (4, 5))
}

fn parse_mksquashfs_version(text: &str) -> Option<(u32, u32)> {
    let line = text.lines().find(|l| l.to_lowercase().contains("version"))?;
    let lower = line.to_lowercase();
    let after = lower.split("version").nth(1)?.trim();
    let mut parts = after.split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

fn tail<'a>(stderr: &'a str, stdout: &'a str) -> String {
    let pick = if stderr.trim().is_empty() { stdout } else { stderr };
    let lines: Vec<&str> = pick.lines().collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" ")
}
