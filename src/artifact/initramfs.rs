//! Initramfs builder.
//!
//! Drives the live environment's `mkinitrfs` to produce
//! `initrfs-<display>.img`. mkinitrfs resolves modules through the host's
//! modules directory, so the extracted package tree is linked into place
//! for the duration of the build when the kernel is not installed.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::version::VersionPair;

/// Fixed location of the initramfs generator inside the live environment.
pub const MKINITRFS: &str = "/run/initramfs/mkinitrfs";

pub struct InitramfsRequest<'a> {
    pub versions: &'a VersionPair,
    /// Extracted package tree holding modules for the actual version.
    pub tree: &'a Path,
    pub output_dir: &'a Path,
    /// Overrides TMPDIR for the generator.
    pub temp_dir: Option<&'a Path>,
}

/// Generate the initramfs and return its path.
pub fn build_initramfs(request: &InitramfsRequest<'_>) -> Result<PathBuf> {
    let generator = Path::new(MKINITRFS);
    if !generator.exists() {
        bail!("mkinitrfs not found - this tool requires a MiniOS live environment");
    }

    let actual = request.versions.actual.as_str();
    let output = request
        .output_dir
        .join(request.versions.display.initramfs_name());

    let link = link_extracted_modules(request.tree, actual)?;

    let build_result = run_mkinitrfs(generator, request, actual);

    // The modules link is build-scoped regardless of the outcome.
    if let Some(link) = &link {
        if link.is_symlink() {
            if let Err(e) = fs::remove_file(link) {
                eprintln!("warning: could not remove {}: {e}", link.display());
            }
        }
    }

    let generated = build_result?;

    println!("Copying initramfs from {}", generated.display());
    fs::copy(&generated, &output).with_context(|| {
        format!("copying {} to {}", generated.display(), output.display())
    })?;
    let _ = fs::remove_file(&generated);

    super::expect_output_file(&output, "initramfs")?;
    Ok(output)
}

/// Make the package's modules visible at `<modules root>/<actual>` while
/// mkinitrfs runs. Returns the created link, or `None` when the kernel's
/// modules are already installed for real.
fn link_extracted_modules(tree: &Path, actual: &str) -> Result<Option<PathBuf>> {
    let Some(extracted) = super::extracted_modules_dir(tree, actual) else {
        return Ok(None);
    };

    let modules_root = super::modules_root()?;
    fs::create_dir_all(&modules_root)
        .with_context(|| format!("creating {}", modules_root.display()))?;
    let system_path = modules_root.join(actual);

    if system_path.is_symlink() {
        fs::remove_file(&system_path)
            .with_context(|| format!("removing stale link {}", system_path.display()))?;
    } else if system_path.exists() {
        return Ok(None);
    }

    std::os::unix::fs::symlink(&extracted, &system_path).with_context(|| {
        format!(
            "linking {} to {}",
            system_path.display(),
            extracted.display()
        )
    })?;
    println!(
        "Linked {} -> {}",
        system_path.display(),
        extracted.display()
    );

    // Resolution data for the freshly linked tree.
    match Command::new("depmod").arg(actual).output() {
        Ok(output) if !output.status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("ERROR:") {
                let _ = fs::remove_file(&system_path);
                bail!("depmod failed: {}", stderr.trim());
            }
            eprintln!("warning: depmod reported: {}", stderr.trim());
        }
        Ok(_) => {}
        Err(e) => eprintln!("warning: could not run depmod: {e}"),
    }

    Ok(Some(system_path))
}

fn run_mkinitrfs(
    generator: &Path,
    request: &InitramfsRequest<'_>,
    actual: &str,
) -> Result<PathBuf> {
    let mut cmd = Command::new(generator);
    cmd.args(["-k", actual, "-n", "-c", "-dm"]);

    let config = request.tree.join("boot").join(format!("config-{actual}"));
    if config.is_file() {
        cmd.arg("--config-file").arg(&config);
    }
    if let Some(temp_dir) = request.temp_dir {
        cmd.env("TMPDIR", temp_dir);
    }

    println!("Generating initramfs");
    let output = cmd
        .output()
        .with_context(|| format!("executing {}", generator.display()))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stdout.lines().chain(stderr.lines()) {
        let line = line.trim();
        // Shell trace lines are noise.
        if line.is_empty() || line.starts_with('+') {
            continue;
        }
        println!("{line}");
    }

    if !output.status.success() {
        bail!("mkinitrfs failed with status {}", output.status);
    }

    parse_generated_path(&stdout)
        .or_else(|| parse_generated_path(&stderr))
        .context("mkinitrfs did not report a generated initramfs path")
}

/// The generator prints the resulting image path as its last meaningful
/// line; take the last line that names an existing `.img` file.
fn parse_generated_path(output: &str) -> Option<PathBuf> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.ends_with(".img"))
        .map(PathBuf::from)
        .find(|path| path.is_file())
}
