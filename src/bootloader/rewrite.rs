//! Kernel-version substitution inside bootloader configuration text.
//!
//! Substitution is purely textual: every recognized reference to a kernel
//! image or initramfs has its version-bearing file name replaced, and every
//! other byte (directory prefixes, quoting, surrounding directives) is left
//! exactly as it was. A text with no recognized references rewrites to
//! itself with `changed == false`.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::version::KernelVersion;

/// Supported bootloader configuration dialects, each with its own
/// pattern table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Grub,
    Syslinux,
}

/// Which artifact a matched reference points at; decides the replacement
/// file name.
#[derive(Debug, Clone, Copy)]
enum Artifact {
    KernelImage,
    Initramfs,
}

impl Artifact {
    fn file_name(self, version: &KernelVersion) -> String {
        match self {
            Artifact::KernelImage => version.kernel_image_name(),
            Artifact::Initramfs => version.initramfs_name(),
        }
    }
}

struct Rule {
    pattern: Regex,
    artifact: Artifact,
}

fn rule(pattern: &str, artifact: Artifact) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("pattern table compiles"),
        artifact,
    }
}

/// Each rule captures the untouched prefix (directive, quoting, directory
/// path) in group 1; the version-bearing file name after it is replaced.
/// The two catch-all rules at the end pick up bare path references the
/// directive-specific rules did not cover, and re-match (as a no-op) the
/// ones they did.
static GRUB_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            r#"(set\s+linux_image="[^"\n]*/)vmlinuz-[^"\n]*"#,
            Artifact::KernelImage,
        ),
        rule(
            r#"(set\s+initrd_img="[^"\n]*/)initrfs-[^"\n]*"#,
            Artifact::Initramfs,
        ),
        rule(r"(?m)(^\s*linux\s+\S*/)vmlinuz-\S+", Artifact::KernelImage),
        rule(
            r"(?m)(^\s*initrd\s+\S*/)initrfs-\S*\.img",
            Artifact::Initramfs,
        ),
        rule(
            r"(search\s+--set\s+-f\s+\S*/)vmlinuz-\S+",
            Artifact::KernelImage,
        ),
        rule(r#"([^\s"]*/)vmlinuz-[^\s"]+"#, Artifact::KernelImage),
        rule(r#"([^\s"]*/)initrfs-[^\s"]*\.img"#, Artifact::Initramfs),
    ]
});

static SYSLINUX_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(r"(?m)(^\s*KERNEL\s+\S*/)vmlinuz-\S+", Artifact::KernelImage),
        rule(r"(initrd=\S*/)initrfs-\S*\.img", Artifact::Initramfs),
    ]
});

/// Rewrite every recognized kernel/initramfs reference in `text` to point
/// at `version`. Returns the new text and whether anything changed.
pub fn rewrite(dialect: Dialect, text: &str, version: &KernelVersion) -> (String, bool) {
    let rules = match dialect {
        Dialect::Grub => &*GRUB_RULES,
        Dialect::Syslinux => &*SYSLINUX_RULES,
    };

    let mut out = text.to_string();
    for rule in rules {
        out = rule
            .pattern
            .replace_all(&out, |caps: &Captures<'_>| {
                format!("{}{}", &caps[1], rule.artifact.file_name(version))
            })
            .into_owned();
    }

    let changed = out != text;
    (out, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> KernelVersion {
        KernelVersion::new(s).unwrap()
    }

    const GRUB_CFG: &str = r#"set default=0
set linux_image="/minios/boot/vmlinuz-6.1.0-17-amd64"
set initrd_img="/minios/boot/initrfs-6.1.0-17-amd64.img"

search --set -f /minios/boot/vmlinuz-6.1.0-17-amd64

menuentry "MiniOS" {
    linux /minios/boot/vmlinuz-6.1.0-17-amd64 quiet splash
    initrd /minios/boot/initrfs-6.1.0-17-amd64.img
}
"#;

    const SYSLINUX_CFG: &str = r#"DEFAULT minios
PROMPT 0

LABEL minios
  MENU LABEL MiniOS
  KERNEL /minios/boot/vmlinuz-6.1.0-17-amd64
  APPEND initrd=/minios/boot/initrfs-6.1.0-17-amd64.img vga=788 quiet
"#;

    #[test]
    fn grub_rewrites_every_reference() {
        let (out, changed) = rewrite(Dialect::Grub, GRUB_CFG, &v("6.1.0-18-amd64"));
        assert!(changed);
        assert!(!out.contains("6.1.0-17-amd64"));
        assert!(out.contains(r#"set linux_image="/minios/boot/vmlinuz-6.1.0-18-amd64""#));
        assert!(out.contains(r#"set initrd_img="/minios/boot/initrfs-6.1.0-18-amd64.img""#));
        assert!(out.contains("search --set -f /minios/boot/vmlinuz-6.1.0-18-amd64"));
        assert!(out.contains("    linux /minios/boot/vmlinuz-6.1.0-18-amd64 quiet splash"));
        assert!(out.contains("    initrd /minios/boot/initrfs-6.1.0-18-amd64.img"));
    }

    #[test]
    fn grub_preserves_everything_outside_the_version_token() {
        let (out, _) = rewrite(Dialect::Grub, GRUB_CFG, &v("6.1.0-18-amd64"));
        let expected = GRUB_CFG.replace("6.1.0-17-amd64", "6.1.0-18-amd64");
        assert_eq!(out, expected);
    }

    #[test]
    fn syslinux_rewrites_kernel_and_initrd() {
        let (out, changed) = rewrite(Dialect::Syslinux, SYSLINUX_CFG, &v("6.1.0-18-amd64"));
        assert!(changed);
        assert!(out.contains("KERNEL /minios/boot/vmlinuz-6.1.0-18-amd64"));
        assert!(out.contains("APPEND initrd=/minios/boot/initrfs-6.1.0-18-amd64.img vga=788 quiet"));
        assert_eq!(out, SYSLINUX_CFG.replace("6.1.0-17-amd64", "6.1.0-18-amd64"));
    }

    #[test]
    fn rewrite_is_idempotent() {
        let target = v("6.1.0-18-amd64");
        for (dialect, cfg) in [(Dialect::Grub, GRUB_CFG), (Dialect::Syslinux, SYSLINUX_CFG)] {
            let (once, _) = rewrite(dialect, cfg, &target);
            let (twice, changed) = rewrite(dialect, &once, &target);
            assert_eq!(once, twice);
            assert!(!changed);
        }
    }

    #[test]
    fn unrelated_text_is_a_no_op() {
        let cfg = "set timeout=5\nmenuentry \"Memtest\" {\n    linux16 /boot/memtest86+\n}\n";
        let (out, changed) = rewrite(Dialect::Grub, cfg, &v("6.1.0-18-amd64"));
        assert!(!changed);
        assert_eq!(out, cfg);
    }

    #[test]
    fn catch_all_covers_bare_references() {
        let cfg = "echo booting /minios/boot/vmlinuz-6.1.0-17-amd64 with /minios/boot/initrfs-6.1.0-17-amd64.img\n";
        let (out, changed) = rewrite(Dialect::Grub, cfg, &v("6.1.0-18-amd64"));
        assert!(changed);
        assert_eq!(
            out,
            "echo booting /minios/boot/vmlinuz-6.1.0-18-amd64 with /minios/boot/initrfs-6.1.0-18-amd64.img\n"
        );
    }

    #[test]
    fn directory_prefix_is_preserved_verbatim() {
        let cfg = "KERNEL /custom/path/boot/vmlinuz-5.10.0-1-686\n";
        let (out, _) = rewrite(Dialect::Syslinux, cfg, &v("6.1.0-18-amd64"));
        assert_eq!(out, "KERNEL /custom/path/boot/vmlinuz-6.1.0-18-amd64\n");
    }

    #[test]
    fn grub_root_variable_prefix_is_preserved() {
        let cfg = "    linux ($root)/minios/boot/vmlinuz-6.1.0-17-amd64 toram\n";
        let (out, _) = rewrite(Dialect::Grub, cfg, &v("6.1.0-18-amd64"));
        assert_eq!(out, "    linux ($root)/minios/boot/vmlinuz-6.1.0-18-amd64 toram\n");
    }
}
