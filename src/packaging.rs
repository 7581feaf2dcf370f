//! The kernel packaging pipeline.
//!
//! Wires the package source and the artifact builders together: obtain an
//! extracted package tree, copy the kernel image, build the module image
//! and the initramfs into the output directory, then install the finished
//! triad into the kernel repository when a MiniOS root is available. The
//! toolchain is verified before anything is downloaded or written.
//!
//! Progress milestones go through a caller-supplied sink so the CLI can
//! render them as text or JSON records.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::compression;
use crate::artifact::initramfs::{build_initramfs, InitramfsRequest};
use crate::artifact::squashfs::{build_module_image, ModuleImageRequest};
use crate::layout::MiniosRoot;
use crate::package;
use crate::preflight;
use crate::repository::{self, KernelFileSet};
use crate::scratch;
use crate::system;
use crate::version::VersionPair;
use crate::{artifact, config};

/// Where the kernel package comes from.
#[derive(Debug, Clone)]
pub enum PackageSource {
    Repository {
        package: String,
        force_update: bool,
    },
    LocalDeb(PathBuf),
}

#[derive(Debug)]
pub struct PackageRequest {
    pub source: PackageSource,
    /// Directory receiving the packaged triad.
    pub output: PathBuf,
    /// `mksquashfs` compression method name.
    pub compression: String,
    /// Scratch directory override; `None` selects one automatically.
    pub temp_dir: Option<PathBuf>,
    /// Root whose repository receives the finished kernel, when present.
    pub install_root: Option<MiniosRoot>,
}

impl PackageRequest {
    /// Request with CLI values, falling back to configuration defaults.
    pub fn with_defaults(
        source: PackageSource,
        output: PathBuf,
        compression: Option<String>,
        temp_dir: Option<PathBuf>,
        config: &config::Config,
        install_root: Option<MiniosRoot>,
    ) -> Self {
        Self {
            source,
            output,
            compression: compression
                .or_else(|| config.sqfs_comp.clone())
                .unwrap_or_else(|| "zstd".to_string()),
            temp_dir: temp_dir.or_else(|| config.temp_dir.clone()),
            install_root,
        }
    }
}

/// A finished packaging run.
#[derive(Debug)]
pub struct PackagedKernel {
    pub versions: VersionPair,
    /// The triad in the output directory.
    pub files: KernelFileSet,
    /// Repository directory the kernel was installed into, if any.
    pub installed_to: Option<PathBuf>,
}

/// Run the whole packaging pipeline.
///
/// Milestone percentages match what the GUI progress bar expects.
pub fn package(
    request: &PackageRequest,
    progress: &mut dyn FnMut(u8, &str),
) -> Result<PackagedKernel> {
    let method = compression::find(&request.compression).with_context(|| {
        format!(
            "unknown compression method '{}' (known: {})",
            request.compression,
            method_names(compression::METHODS.iter())
        )
    })?;
    if !compression::available()
        .iter()
        .any(|m| m.name == method.name)
    {
        bail!(
            "compression method '{}' needs '{}', which is not installed; available: {}",
            method.name,
            method.tool,
            method_names(compression::available().into_iter())
        );
    }

    let from_repository = matches!(request.source, PackageSource::Repository { .. });
    preflight::check_packaging_tools(from_repository)?;

    prepare_output_dir(&request.output)?;

    let scratch = scratch::scratch_dir(scratch::REQUIRED_MB, request.temp_dir.as_deref())?;
    println!("Created temporary directory: {}", scratch.path().display());

    let extracted = match &request.source {
        PackageSource::Repository {
            package,
            force_update,
        } => {
            progress(10, &format!("Downloading kernel package {package}"));
            package::obtain_from_repository(package, scratch.path(), *force_update)?
        }
        PackageSource::LocalDeb(deb) => {
            progress(10, &format!("Processing manual package {}", deb.display()));
            package::obtain_from_deb(deb, scratch.path())?
        }
    };
    progress(30, "Download completed");
    progress(35, "Extracting package");
    progress(40, "Preparing kernel modules");

    let versions = &extracted.versions;
    println!(
        "Packaging kernel {} (modules: {})",
        versions.display, versions.actual
    );

    progress(50, "Copying kernel files");
    let kernel_image = artifact::copy_kernel_image(versions, &extracted.tree, &request.output)?;

    progress(60, "Creating SquashFS image");
    let module_image = build_module_image(&ModuleImageRequest {
        versions,
        method,
        tree: &extracted.tree,
        output_dir: &request.output,
        scratch: scratch.path(),
    })?;

    progress(80, "Generating initramfs");
    let initramfs = build_initramfs(&InitramfsRequest {
        versions,
        tree: &extracted.tree,
        output_dir: &request.output,
        temp_dir: request.temp_dir.as_deref(),
    })?;

    let files = KernelFileSet {
        module_image,
        kernel_image,
        initramfs,
    };

    let installed_to = match &request.install_root {
        Some(root) if root.kernel_dir(&versions.display) != request.output => {
            progress(95, "Installing to kernel repository");
            // Repackaging an existing version replaces its entry.
            repository::delete(root, &versions.display)?;
            repository::store(root, &versions.display, &files)?;
            Some(root.kernel_dir(&versions.display))
        }
        _ => {
            progress(95, "Finalizing installation");
            None
        }
    };

    progress(100, "Kernel packaging completed successfully!");
    Ok(PackagedKernel {
        versions: extracted.versions,
        files,
        installed_to,
    })
}

fn prepare_output_dir(output: &Path) -> Result<()> {
    if !output.exists() {
        fs::create_dir_all(output)
            .with_context(|| format!("creating output directory '{}'", output.display()))?;
        println!("Created output directory: {}", output.display());
    }
    let (writable, reason) = system::writability(output);
    if !writable {
        bail!(
            "output directory '{}' is not writable{}",
            output.display(),
            reason.map(|r| format!(": {r}")).unwrap_or_default()
        );
    }
    Ok(())
}

fn method_names<'a>(methods: impl Iterator<Item = &'a compression::CompressionMethod>) -> String {
    methods.map(|m| m.name).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(compression: &str, output: PathBuf) -> PackageRequest {
        PackageRequest {
            source: PackageSource::LocalDeb(PathBuf::from("/nonexistent/kernel.deb")),
            output,
            compression: compression.to_string(),
            temp_dir: None,
            install_root: None,
        }
    }

    #[test]
    fn unknown_compression_fails_before_any_mutation() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("out");
        let mut sink = |_: u8, _: &str| {};

        let err = package(&request("brotli", output.clone()), &mut sink).unwrap_err();
        assert!(err.to_string().contains("unknown compression method"));
        assert!(!output.exists());
    }

    #[test]
    fn missing_toolchain_fails_before_output_creation() {
        // Test hosts are not MiniOS live environments, so at minimum the
        // mkinitrfs preflight fails; the output directory must stay
        // untouched either way.
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("out");
        let mut sink = |_: u8, _: &str| {};

        assert!(package(&request("gzip", output.clone()), &mut sink).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn defaults_fill_in_from_config() {
        let config = config::Config {
            sqfs_comp: Some("xz".to_string()),
            temp_dir: Some(PathBuf::from("/var/tmp")),
            root: None,
        };
        let request = PackageRequest::with_defaults(
            PackageSource::LocalDeb(PathBuf::from("kernel.deb")),
            PathBuf::from("/tmp/out"),
            None,
            None,
            &config,
            None,
        );
        assert_eq!(request.compression, "xz");
        assert_eq!(request.temp_dir, Some(PathBuf::from("/var/tmp")));

        let overridden = PackageRequest::with_defaults(
            PackageSource::LocalDeb(PathBuf::from("kernel.deb")),
            PathBuf::from("/tmp/out"),
            Some("lz4".to_string()),
            Some(PathBuf::from("/scratch")),
            &config,
            None,
        );
        assert_eq!(overridden.compression, "lz4");
        assert_eq!(overridden.temp_dir, Some(PathBuf::from("/scratch")));
    }

    #[test]
    fn bare_defaults_pick_zstd() {
        let request = PackageRequest::with_defaults(
            PackageSource::LocalDeb(PathBuf::from("kernel.deb")),
            PathBuf::from("/tmp/out"),
            None,
            None,
            &config::Config::default(),
            None,
        );
        assert_eq!(request.compression, "zstd");
        assert_eq!(request.temp_dir, None);
    }
}
