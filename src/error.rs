//! Error taxonomy for kernel state transitions.
//!
//! Every variant maps to a distinct caller-visible failure class; plain
//! orchestration code (package download, image building) uses `anyhow`
//! directly and only converts into these variants at the activation
//! boundary.

use std::path::PathBuf;
use thiserror::Error;

use crate::version::KernelVersion;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("MiniOS directory not found on this system")]
    RootNotFound,

    #[error("kernel {0} not found in repository")]
    NotPackaged(KernelVersion),

    #[error("kernel {version} is incomplete: missing {}", file.display())]
    IncompleteArtifact {
        version: KernelVersion,
        file: PathBuf,
    },

    #[error("no GRUB configuration files found under {}", dir.display())]
    GrubConfigMissing { dir: PathBuf },

    #[error("failed to update bootloader configuration {}: {reason}", file.display())]
    ConfigUpdate { file: PathBuf, reason: String },

    #[error("required tool '{0}' not found")]
    ToolMissing(String),

    #[error("repository entry for kernel {0} already exists")]
    RepositoryEntryExists(KernelVersion),

    #[error("kernel {version} is currently {state} and cannot be deleted")]
    KernelInUse {
        version: KernelVersion,
        state: &'static str,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl KernelError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
