//! SquashFS compression methods.
//!
//! Availability is judged by the presence of the backing compressor tool,
//! which tracks what the installed `mksquashfs` was built against closely
//! enough in practice.

use which::which;

/// One supported compression method, ordered fastest-first in [`METHODS`].
#[derive(Debug, Clone, Copy)]
pub struct CompressionMethod {
    /// Name passed to `mksquashfs -comp`.
    pub name: &'static str,
    /// Tool probed to decide availability.
    pub tool: &'static str,
    /// Extra `mksquashfs` arguments for this method.
    pub squashfs_args: &'static [&'static str],
    pub description: &'static str,
}

pub const METHODS: &[CompressionMethod] = &[
    CompressionMethod {
        name: "lz4",
        tool: "lz4",
        squashfs_args: &["-Xhc"],
        description: "Extreme speed, low compression ratio",
    },
    CompressionMethod {
        name: "lzo",
        tool: "lzop",
        squashfs_args: &[],
        description: "Very fast, low compression ratio",
    },
    CompressionMethod {
        name: "gzip",
        tool: "gzip",
        squashfs_args: &["-Xcompression-level", "9"],
        description: "Fast, moderate compression ratio",
    },
    CompressionMethod {
        name: "zstd",
        tool: "zstd",
        squashfs_args: &["-Xcompression-level", "19"],
        description: "Balanced speed and compression",
    },
    CompressionMethod {
        name: "lzma",
        tool: "lzma",
        squashfs_args: &["-Xdict-size", "1M"],
        description: "Slow, high compression ratio",
    },
    CompressionMethod {
        name: "xz",
        tool: "xz",
        squashfs_args: &["-Xbcj", "x86"],
        description: "Slowest, highest compression ratio",
    },
    CompressionMethod {
        name: "bzip2",
        tool: "bzip2",
        squashfs_args: &["-Xblock-size", "256K"],
        description: "Very slow, slightly better than xz",
    },
];

/// Look up a method by its `mksquashfs` name.
pub fn find(name: &str) -> Option<&'static CompressionMethod> {
    METHODS.iter().find(|m| m.name == name)
}

/// Methods whose backing tool is on PATH, fastest first.
pub fn available() -> Vec<&'static CompressionMethod> {
    METHODS.iter().filter(|m| which(m.tool).is_ok()).collect()
}
