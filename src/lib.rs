//! Kernel packaging and activation for MiniOS-style live systems.
//!
//! A live medium carries one active kernel - its boot files under
//! `boot/`, its module image (`01-kernel-<v>.sb`) at the medium root -
//! and a repository of packaged kernels under `kernels/<v>/`. This crate
//! implements both sides of managing that layout:
//!
//! - **Packaging** - obtain a kernel package (apt repository or local
//!   `.deb`), build its SquashFS module image and initramfs, and install
//!   the finished triad into the repository
//! - **Activation** - swap the active kernel: retire the previous one
//!   into the repository, install the target's files, rewrite the GRUB
//!   and SYSLINUX configuration files, and record the new active marker
//! - **Inspection** - list, query and delete packaged kernels, and probe
//!   the live system's state
//!
//! # Activation ordering
//!
//! The activation transition keeps the medium bootable at every step: the
//! previous kernel is retired before any new file lands in the active
//! locations, bootloader configs are rewritten only once the target's
//! files exist, and the `boot/active-kernel` marker is written last. The
//! running kernel's files are copied (never moved) out of the active
//! locations because the live system still reads them.
//!
//! # Versions
//!
//! Each packaged kernel carries two version strings: the *display*
//! version from the requested package name (it keeps suffixes like
//! `-unsigned` and names the output artifacts) and the *actual* version
//! the package really ships (it names the module tree and is what
//! `depmod` and the initramfs generator operate on). See
//! [`version::VersionPair`].

pub mod activation;
pub mod artifact;
pub mod bootloader;
pub mod config;
pub mod error;
pub mod layout;
pub mod package;
pub mod packaging;
pub mod preflight;
pub mod repository;
pub mod running;
pub mod scratch;
pub mod system;
pub mod version;

pub use activation::{Activation, ActivationEngine};
pub use error::KernelError;
pub use layout::MiniosRoot;
pub use version::{KernelVersion, VersionPair};
