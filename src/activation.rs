//! Kernel activation state machine.
//!
//! A version can be packaged (repository only), active (marker points at
//! it), running (the live OS booted it), or active and running at once.
//! `activate` moves the system between these states with a fixed ordering:
//! the previous kernel is retired before any new file lands in the active
//! locations, bootloader configs are rewritten only once the new files
//! exist, and the marker is written last. A crash mid-transition therefore
//! leaves the marker pointing at a kernel whose files are still present.

use crate::bootloader;
use crate::error::KernelError;
use crate::layout::MiniosRoot;
use crate::repository;
use crate::running;
use crate::version::KernelVersion;

/// Result of a successful activation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// The target was already active; nothing was touched.
    AlreadyActive,
    /// The marker now points at the target.
    Activated { previous: Option<KernelVersion> },
}

pub struct ActivationEngine {
    root: MiniosRoot,
    running: Option<KernelVersion>,
}

impl ActivationEngine {
    /// Engine for `root`, detecting the running kernel from the live system.
    pub fn new(root: MiniosRoot) -> Self {
        let running = running::running_version();
        Self { root, running }
    }

    /// Engine with an explicitly supplied running kernel.
    pub fn with_running(root: MiniosRoot, running: Option<KernelVersion>) -> Self {
        Self { root, running }
    }

    pub fn root(&self) -> &MiniosRoot {
        &self.root
    }

    pub fn running(&self) -> Option<&KernelVersion> {
        self.running.as_ref()
    }

    pub fn active(&self) -> Option<KernelVersion> {
        repository::active_version(&self.root)
    }

    pub fn is_running(&self, version: &KernelVersion) -> bool {
        self.running.as_ref() == Some(version)
    }

    /// Make `target` the active kernel.
    pub fn activate(&self, target: &KernelVersion) -> Result<Activation, KernelError> {
        let active = repository::active_version(&self.root);

        if self.is_running(target) {
            if active.as_ref() == Some(target) {
                return Ok(Activation::AlreadyActive);
            }
            // The target's boot files are the ones the live system booted
            // from, so they are already in place; only the previous kernel
            // moves and the marker/configs change.
            if let Some(previous) = &active {
                repository::retire_active(&self.root, previous, self.is_running(previous))?;
            }
            self.update_bootloader_configs(target)?;
            repository::write_active_marker(&self.root, target)?;
            return Ok(Activation::Activated { previous: active });
        }

        if active.as_ref() == Some(target) {
            return Ok(Activation::AlreadyActive);
        }

        if !repository::is_packaged(&self.root, target) {
            if let Some(file) = repository::missing_artifacts(&self.root, target)
                .into_iter()
                .next()
            {
                if self.root.kernel_dir(target).exists() {
                    return Err(KernelError::IncompleteArtifact {
                        version: target.clone(),
                        file,
                    });
                }
            }
            return Err(KernelError::NotPackaged(target.clone()));
        }

        if let Some(previous) = &active {
            repository::retire_active(&self.root, previous, self.is_running(previous))?;
        }

        // Re-check the file set right before copying; retirement of the
        // previous kernel may share the directory with the target.
        if let Some(file) = repository::missing_artifacts(&self.root, target)
            .into_iter()
            .next()
        {
            return Err(KernelError::IncompleteArtifact {
                version: target.clone(),
                file,
            });
        }

        repository::install_active(&self.root, target)?;
        self.update_bootloader_configs(target)?;
        repository::write_active_marker(&self.root, target)?;

        Ok(Activation::Activated { previous: active })
    }

    /// Remove `target` from the repository. Refuses while it is active or
    /// running.
    pub fn delete(&self, target: &KernelVersion) -> Result<(), KernelError> {
        if repository::active_version(&self.root).as_ref() == Some(target) {
            return Err(KernelError::KernelInUse {
                version: target.clone(),
                state: "active",
            });
        }
        if self.is_running(target) {
            return Err(KernelError::KernelInUse {
                version: target.clone(),
                state: "running",
            });
        }
        repository::delete(&self.root, target)
    }

    fn update_bootloader_configs(&self, target: &KernelVersion) -> Result<(), KernelError> {
        let update = bootloader::update(&self.root, target);

        for (file, reason) in &update.syslinux_failures {
            eprintln!("warning: skipping {}: {reason}", file.display());
        }

        if update.grub_seen == 0 {
            return Err(KernelError::GrubConfigMissing {
                dir: self.root.boot_dir().join("grub"),
            });
        }
        if let Some((file, reason)) = update.grub_failures.into_iter().next() {
            return Err(KernelError::ConfigUpdate { file, reason });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::KernelFileSet;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn v(s: &str) -> KernelVersion {
        KernelVersion::new(s).unwrap()
    }

    /// A root with a GRUB config referencing `active`, that kernel's files
    /// in the active locations, and a marker pointing at it.
    fn live_root(active: &KernelVersion) -> (TempDir, MiniosRoot) {
        let tmp = TempDir::new().unwrap();
        let root = MiniosRoot::at(tmp.path());
        fs::create_dir_all(tmp.path().join("boot/grub")).unwrap();
        fs::write(
            tmp.path().join("boot/grub/grub.cfg"),
            format!(
                "set linux_image=\"/minios/boot/vmlinuz-{active}\"\n\
                 set initrd_img=\"/minios/boot/initrfs-{active}.img\"\n\
                 linux /minios/boot/vmlinuz-{active} quiet\n\
                 initrd /minios/boot/initrfs-{active}.img\n"
            ),
        )
        .unwrap();
        fs::write(root.kernel_image(active), format!("kernel-{active}")).unwrap();
        fs::write(root.initramfs(active), format!("initramfs-{active}")).unwrap();
        fs::write(root.module_image(active), format!("modules-{active}")).unwrap();
        fs::write(root.active_marker(), active.as_str()).unwrap();
        (tmp, root)
    }

    fn package(tmp: &Path, root: &MiniosRoot, version: &KernelVersion) {
        let staging = tmp.join(format!("staging-{version}"));
        fs::create_dir_all(&staging).unwrap();
        let set = KernelFileSet {
            module_image: staging.join(version.module_image_name()),
            kernel_image: staging.join(version.kernel_image_name()),
            initramfs: staging.join(version.initramfs_name()),
        };
        fs::write(&set.module_image, format!("modules-{version}")).unwrap();
        fs::write(&set.kernel_image, format!("kernel-{version}")).unwrap();
        fs::write(&set.initramfs, format!("initramfs-{version}")).unwrap();
        repository::store(root, version, &set).unwrap();
    }

    #[test]
    fn activating_a_packaged_kernel_swaps_everything() {
        let old = v("6.1.0-17-amd64");
        let new = v("6.1.0-18-amd64");
        let (tmp, root) = live_root(&old);
        package(tmp.path(), &root, &new);

        // The old kernel is active AND running: retirement must copy.
        let engine = ActivationEngine::with_running(root, Some(old.clone()));
        let outcome = engine.activate(&new).unwrap();
        assert_eq!(
            outcome,
            Activation::Activated {
                previous: Some(old.clone())
            }
        );

        let root = engine.root();
        assert_eq!(repository::active_version(root), Some(new.clone()));
        // New kernel's files are live.
        assert_eq!(
            fs::read(root.kernel_image(&new)).unwrap(),
            format!("kernel-{new}").into_bytes()
        );
        assert_eq!(
            fs::read(root.module_image(&new)).unwrap(),
            format!("modules-{new}").into_bytes()
        );
        // Running kernel's files were copied, not moved.
        assert!(root.kernel_image(&old).exists());
        assert!(repository::is_packaged(root, &old));
        // Configs now reference the new version.
        let grub = fs::read_to_string(tmp.path().join("boot/grub/grub.cfg")).unwrap();
        assert!(!grub.contains(old.as_str()));
        assert!(grub.contains("vmlinuz-6.1.0-18-amd64"));
    }

    #[test]
    fn activating_over_a_non_running_kernel_moves_it_out() {
        let old = v("6.1.0-17-amd64");
        let new = v("6.1.0-18-amd64");
        let (tmp, root) = live_root(&old);
        package(tmp.path(), &root, &new);

        let engine = ActivationEngine::with_running(root, None);
        engine.activate(&new).unwrap();

        let root = engine.root();
        // Old kernel's active files are gone, repository has them.
        assert!(!root.kernel_image(&old).exists());
        assert!(!root.module_image(&old).exists());
        assert!(repository::is_packaged(root, &old));
    }

    #[test]
    fn activating_the_active_kernel_is_a_no_op() {
        let active = v("6.1.0-17-amd64");
        let (tmp, root) = live_root(&active);
        let marker_before = fs::read(root.active_marker()).unwrap();

        let engine = ActivationEngine::with_running(root, None);
        assert_eq!(engine.activate(&active).unwrap(), Activation::AlreadyActive);
        assert_eq!(fs::read(engine.root().active_marker()).unwrap(), marker_before);
        drop(tmp);
    }

    #[test]
    fn activating_an_unpackaged_kernel_changes_nothing() {
        let active = v("6.1.0-17-amd64");
        let ghost = v("6.9.0-1-amd64");
        let (_tmp, root) = live_root(&active);

        let engine = ActivationEngine::with_running(root, None);
        let err = engine.activate(&ghost).unwrap_err();
        assert!(matches!(err, KernelError::NotPackaged(_)));
        assert_eq!(repository::active_version(engine.root()), Some(active));
    }

    #[test]
    fn incomplete_repository_entry_is_reported_before_retirement() {
        let active = v("6.1.0-17-amd64");
        let partial = v("6.1.0-18-amd64");
        let (_tmp, root) = live_root(&active);
        let dir = root.kernel_dir(&partial);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(partial.kernel_image_name()), b"kernel").unwrap();

        let engine = ActivationEngine::with_running(root, None);
        let err = engine.activate(&partial).unwrap_err();
        assert!(matches!(err, KernelError::IncompleteArtifact { .. }));
        // The previously active kernel was not retired.
        assert!(engine.root().kernel_image(&active).exists());
        assert_eq!(repository::active_version(engine.root()), Some(active));
    }

    #[test]
    fn activating_the_running_kernel_skips_file_copies() {
        let old = v("6.1.0-17-amd64");
        let new = v("6.1.0-18-amd64");
        let (tmp, root) = live_root(&old);
        // The running kernel's boot files are live but it is not marked
        // active and has no repository entry.
        fs::write(root.kernel_image(&new), format!("kernel-{new}")).unwrap();
        fs::write(root.initramfs(&new), format!("initramfs-{new}")).unwrap();
        fs::write(root.module_image(&new), format!("modules-{new}")).unwrap();

        let engine = ActivationEngine::with_running(root, Some(new.clone()));
        let outcome = engine.activate(&new).unwrap();
        assert_eq!(
            outcome,
            Activation::Activated {
                previous: Some(old.clone())
            }
        );

        let root = engine.root();
        assert_eq!(repository::active_version(root), Some(new.clone()));
        // Old kernel moved into the repository (it was not running).
        assert!(!root.kernel_image(&old).exists());
        assert!(repository::is_packaged(root, &old));
        // Running kernel's files untouched.
        assert_eq!(
            fs::read(root.kernel_image(&new)).unwrap(),
            format!("kernel-{new}").into_bytes()
        );
        let grub = fs::read_to_string(tmp.path().join("boot/grub/grub.cfg")).unwrap();
        assert!(grub.contains("vmlinuz-6.1.0-18-amd64"));
    }

    #[test]
    fn activation_fails_without_grub_configs() {
        let old = v("6.1.0-17-amd64");
        let new = v("6.1.0-18-amd64");
        let (tmp, root) = live_root(&old);
        fs::remove_file(tmp.path().join("boot/grub/grub.cfg")).unwrap();
        package(tmp.path(), &root, &new);

        let engine = ActivationEngine::with_running(root, None);
        let err = engine.activate(&new).unwrap_err();
        assert!(matches!(err, KernelError::GrubConfigMissing { .. }));
        // Files were installed but the marker still names the old kernel.
        assert_eq!(repository::active_version(engine.root()), Some(old));
    }

    #[test]
    fn round_trip_restores_identical_bytes() {
        let first = v("6.1.0-17-amd64");
        let second = v("6.1.0-18-amd64");
        let (tmp, root) = live_root(&first);
        package(tmp.path(), &root, &second);

        let engine = ActivationEngine::with_running(root, None);
        engine.activate(&second).unwrap();
        // Activating the first again retires the second into the repository.
        engine.activate(&first).unwrap();

        let root = engine.root();
        assert!(repository::is_packaged(root, &second));
        let dir = root.kernel_dir(&second);
        assert_eq!(
            fs::read(dir.join(second.module_image_name())).unwrap(),
            format!("modules-{second}").into_bytes()
        );
        assert_eq!(
            fs::read(dir.join(second.kernel_image_name())).unwrap(),
            format!("kernel-{second}").into_bytes()
        );
        assert_eq!(
            fs::read(dir.join(second.initramfs_name())).unwrap(),
            format!("initramfs-{second}").into_bytes()
        );
    }

    #[test]
    fn delete_refuses_active_and_running_kernels() {
        let active = v("6.1.0-17-amd64");
        let running = v("6.1.0-16-amd64");
        let (tmp, root) = live_root(&active);
        package(tmp.path(), &root, &running);
        package(tmp.path(), &root, &v("6.1.0-15-amd64"));

        let engine = ActivationEngine::with_running(root, Some(running.clone()));
        assert!(matches!(
            engine.delete(&active),
            Err(KernelError::KernelInUse { state: "active", .. })
        ));
        assert!(matches!(
            engine.delete(&running),
            Err(KernelError::KernelInUse { state: "running", .. })
        ));
        engine.delete(&v("6.1.0-15-amd64")).unwrap();
        assert!(!repository::is_packaged(engine.root(), &v("6.1.0-15-amd64")));
    }
}
