//! Preflight checks before packaging mutates anything.
//!
//! Every external tool the pipeline will call is verified up front, so a
//! missing tool surfaces before a single file is downloaded or written.

use std::path::Path;
use which::which;

use crate::artifact::initramfs::MKINITRFS;
use crate::error::KernelError;

/// Tools every packaging run needs, with what they are needed for.
const PACKAGING_TOOLS: &[(&str, &str)] = &[
    ("dpkg-deb", "extract kernel packages"),
    ("depmod", "generate module dependencies"),
    ("mksquashfs", "build the module image"),
];

/// Additional tools needed when downloading from the apt repository.
const REPOSITORY_TOOLS: &[(&str, &str)] = &[("apt-get", "download kernel packages")];

/// Verify the packaging toolchain. `from_repository` adds the apt tools.
pub fn check_packaging_tools(from_repository: bool) -> Result<(), KernelError> {
    let mut required: Vec<(&str, &str)> = PACKAGING_TOOLS.to_vec();
    if from_repository {
        required.extend_from_slice(REPOSITORY_TOOLS);
    }

    for (tool, purpose) in required {
        if which(tool).is_err() {
            return Err(KernelError::ToolMissing(format!("{tool} (needed to {purpose})")));
        }
    }

    if !Path::new(MKINITRFS).exists() {
        return Err(KernelError::ToolMissing(format!(
            "{MKINITRFS} (initramfs generation requires a MiniOS live environment)"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tools_name_themselves() {
        // The live-only mkinitrfs path is absent in test environments, so
        // a full check can only fail; make sure the failure is legible.
        if let Err(KernelError::ToolMissing(what)) = check_packaging_tools(false) {
            assert!(!what.is_empty());
        }
    }
}
