//! MiniOS kernel manager CLI.
//!
//! Packages kernels from the apt repository or local `.deb` files,
//! activates packaged kernels, and inspects the state of the live medium.
//! `--json` switches the output to structured records for the GUI front
//! end; progress records stream during packaging so a progress bar can
//! follow along. Mutating commands require root.

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;
use time::OffsetDateTime;

use minios_kernel::activation::{Activation, ActivationEngine};
use minios_kernel::config::Config;
use minios_kernel::error::KernelError;
use minios_kernel::layout::MiniosRoot;
use minios_kernel::packaging::{self, PackageRequest, PackageSource};
use minios_kernel::repository;
use minios_kernel::running;
use minios_kernel::system;
use minios_kernel::version::KernelVersion;

#[derive(Parser)]
#[command(name = "minios-kernel")]
#[command(author, version, about = "MiniOS kernel packaging and activation", long_about = None)]
struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Package a kernel from the repository or a local .deb
    Package(PackageArgs),

    /// List available kernels
    List,

    /// Activate a packaged kernel
    Activate {
        /// Kernel version to activate
        kernel_version: String,
    },

    /// Show kernel information
    Info {
        /// Kernel version to inspect (the active one if omitted)
        kernel_version: Option<String>,
    },

    /// Check MiniOS directory status
    Status,

    /// Delete a packaged kernel
    Delete {
        /// Kernel version to delete
        kernel_version: String,
    },
}

#[derive(Args)]
struct PackageArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Directory to save the packaged kernel files
    #[arg(short, long)]
    output: PathBuf,

    /// Compression method for SquashFS
    #[arg(long = "sqfs-comp")]
    sqfs_comp: Option<String>,

    /// Custom temporary directory (must have at least 1024 MB free)
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Force package lists update if outdated
    #[arg(long)]
    force_update: bool,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Name of the kernel package in the repository
    #[arg(long)]
    repo: Option<String>,

    /// Path to the kernel .deb package
    #[arg(long)]
    deb: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mutating = matches!(
        cli.command,
        Commands::Package(_) | Commands::Activate { .. } | Commands::Delete { .. }
    );
    if mutating && unsafe { libc::geteuid() } != 0 {
        emit_error(
            cli.json,
            "this command requires root privileges; run with sudo or through pkexec",
        );
        return ExitCode::from(1);
    }

    let config = match Config::load_default() {
        Ok(config) => config,
        Err(e) => {
            emit_error(cli.json, &format!("{e:#}"));
            return ExitCode::from(1);
        }
    };

    match cli.command {
        Commands::Package(args) => cmd_package(args, &config, cli.json),
        Commands::List => cmd_list(&config, cli.json),
        Commands::Activate { kernel_version } => cmd_activate(&kernel_version, &config, cli.json),
        Commands::Info { kernel_version } => cmd_info(kernel_version.as_deref(), &config, cli.json),
        Commands::Status => cmd_status(&config, cli.json),
        Commands::Delete { kernel_version } => cmd_delete(&kernel_version, &config, cli.json),
    }
}

#[derive(Serialize)]
struct ProgressRecord<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    percent: u8,
    message: &'a str,
}

#[derive(Serialize)]
struct OutcomeRecord {
    success: bool,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ErrorRecord<'a> {
    success: bool,
    error: &'a str,
}

#[derive(Serialize)]
struct KernelEntry {
    version: KernelVersion,
    is_active: bool,
    is_running: bool,
    status: &'static str,
}

#[derive(Serialize)]
struct ListRecord {
    kernels: Vec<KernelEntry>,
    active_kernel: Option<KernelVersion>,
    running_kernel: Option<KernelVersion>,
    minios_path: PathBuf,
}

#[derive(Serialize)]
struct ActivateRecord {
    success: bool,
    kernel_version: KernelVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_kernel: Option<KernelVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    already_active: Option<bool>,
    message: String,
}

#[derive(Serialize)]
struct ActivateErrorRecord {
    success: bool,
    error: String,
    available_kernels: Vec<KernelVersion>,
}

#[derive(Serialize)]
struct ArtifactInfo {
    name: String,
    size: String,
    size_bytes: u64,
    modified: String,
}

#[derive(Serialize)]
struct InfoRecord {
    kernel_version: KernelVersion,
    is_active: bool,
    is_running: bool,
    is_packaged: bool,
    minios_path: PathBuf,
    active_kernel: Option<KernelVersion>,
    available_kernels: Vec<KernelVersion>,
    files: Vec<ArtifactInfo>,
}

#[derive(Serialize)]
struct StatusRecord {
    success: bool,
    minios_path: PathBuf,
    found: bool,
    writable: bool,
    filesystem_type: String,
    system_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct DeleteRecord {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn print_json<T: Serialize>(record: &T) {
    match serde_json::to_string(record) {
        Ok(line) => println!("{line}"),
        Err(e) => eprintln!("E: failed to serialize output: {e}"),
    }
}

fn emit_error(json: bool, message: &str) {
    if json {
        match serde_json::to_string(&ErrorRecord {
            success: false,
            error: message,
        }) {
            Ok(line) => eprintln!("{line}"),
            Err(e) => eprintln!("E: failed to serialize error: {e}"),
        }
    } else {
        eprintln!("E: {message}");
    }
}

fn lookup_root(config: &Config) -> Option<MiniosRoot> {
    match &config.root {
        Some(path) => Some(MiniosRoot::at(path)),
        None => MiniosRoot::discover(),
    }
}

fn find_root(config: &Config, json: bool) -> Option<MiniosRoot> {
    let root = lookup_root(config);
    if root.is_none() {
        emit_error(json, "MiniOS directory not found");
    }
    root
}

fn parse_version(raw: &str, json: bool) -> Option<KernelVersion> {
    match KernelVersion::new(raw) {
        Ok(version) => Some(version),
        Err(e) => {
            emit_error(json, &e.to_string());
            None
        }
    }
}

fn cmd_package(args: PackageArgs, config: &Config, json: bool) -> ExitCode {
    let source = match (args.source.repo, args.source.deb) {
        (Some(package), None) => PackageSource::Repository {
            package,
            force_update: args.force_update,
        },
        (None, Some(deb)) => PackageSource::LocalDeb(deb),
        // clap enforces exactly one of --repo/--deb.
        _ => unreachable!(),
    };

    let request = PackageRequest::with_defaults(
        source,
        args.output,
        args.sqfs_comp,
        args.temp_dir,
        config,
        lookup_root(config),
    );

    let mut progress = |percent: u8, message: &str| {
        if json {
            print_json(&ProgressRecord {
                kind: "progress",
                percent,
                message,
            });
        }
    };

    match packaging::package(&request, &mut progress) {
        Ok(packaged) => {
            if json {
                print_json(&OutcomeRecord {
                    success: true,
                    kind: "success",
                    message: Some("Kernel packaging completed successfully".to_string()),
                    error: None,
                });
            } else {
                println!("Kernel {} packaged successfully", packaged.versions.display);
                if let Some(repo_dir) = &packaged.installed_to {
                    println!("Installed to repository: {}", repo_dir.display());
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            if json {
                match serde_json::to_string(&OutcomeRecord {
                    success: false,
                    kind: "error",
                    message: None,
                    error: Some(format!("{e:#}")),
                }) {
                    Ok(line) => eprintln!("{line}"),
                    Err(e) => eprintln!("E: failed to serialize error: {e}"),
                }
            } else {
                eprintln!("E: {e:#}");
            }
            ExitCode::from(1)
        }
    }
}

fn kernel_status(is_active: bool, is_running: bool) -> &'static str {
    match (is_active, is_running) {
        (true, _) => "active",
        (false, true) => "running",
        (false, false) => "available",
    }
}

fn cmd_list(config: &Config, json: bool) -> ExitCode {
    let Some(root) = find_root(config, json) else {
        return ExitCode::from(1);
    };
    let running = running::running_version();
    let active = repository::active_version(&root);
    let kernels = repository::list_all(&root, running.as_ref());

    if json {
        let entries: Vec<KernelEntry> = kernels
            .into_iter()
            .map(|version| {
                let is_active = active.as_ref() == Some(&version);
                let is_running = running.as_ref() == Some(&version);
                KernelEntry {
                    status: kernel_status(is_active, is_running),
                    version,
                    is_active,
                    is_running,
                }
            })
            .collect();
        print_json(&ListRecord {
            kernels: entries,
            active_kernel: active,
            running_kernel: running,
            minios_path: root.path().to_path_buf(),
        });
    } else {
        println!("Available kernels:");
        for version in &kernels {
            let mut notes = Vec::new();
            if active.as_ref() == Some(version) {
                notes.push("active");
            }
            if running.as_ref() == Some(version) {
                notes.push("running");
            }
            if notes.is_empty() {
                println!("  - {version}");
            } else {
                println!("  - {version} ({})", notes.join(", "));
            }
        }
        match &active {
            Some(active) => println!("\nCurrently active kernel: {active}"),
            None => println!("\nNo currently active kernel found"),
        }
    }
    ExitCode::SUCCESS
}

fn cmd_activate(raw_version: &str, config: &Config, json: bool) -> ExitCode {
    let Some(root) = find_root(config, json) else {
        return ExitCode::from(1);
    };
    let Some(version) = parse_version(raw_version, json) else {
        return ExitCode::from(1);
    };

    let engine = ActivationEngine::new(root);
    if !json {
        println!("Found MiniOS directory: {}", engine.root().path().display());
        if let Some(active) = engine.active() {
            println!("Currently active kernel: {active}");
        }
        println!("Activating kernel {version}...");
    }

    match engine.activate(&version) {
        Ok(Activation::AlreadyActive) => {
            if json {
                print_json(&ActivateRecord {
                    success: true,
                    message: format!("Kernel {version} is already active"),
                    kernel_version: version,
                    previous_kernel: None,
                    already_active: Some(true),
                });
            } else {
                println!("Kernel {version} is already active");
            }
            ExitCode::SUCCESS
        }
        Ok(Activation::Activated { previous }) => {
            if json {
                print_json(&ActivateRecord {
                    success: true,
                    message: format!("Kernel {version} activated successfully"),
                    kernel_version: version,
                    previous_kernel: previous,
                    already_active: None,
                });
            } else {
                println!("Kernel {version} activated successfully!");
            }
            ExitCode::SUCCESS
        }
        Err(KernelError::NotPackaged(version)) => {
            let available = repository::list_packaged(engine.root());
            if json {
                match serde_json::to_string(&ActivateErrorRecord {
                    success: false,
                    error: format!("Kernel {version} not found in repository"),
                    available_kernels: available,
                }) {
                    Ok(line) => eprintln!("{line}"),
                    Err(e) => eprintln!("E: failed to serialize error: {e}"),
                }
            } else {
                eprintln!("E: Kernel {version} not found in repository");
                let names: Vec<&str> = available.iter().map(|v| v.as_str()).collect();
                eprintln!("Available kernels: {}", names.join(", "));
            }
            ExitCode::from(1)
        }
        Err(e) => {
            emit_error(json, &e.to_string());
            ExitCode::from(1)
        }
    }
}

fn artifact_details(root: &MiniosRoot, version: &KernelVersion) -> Vec<ArtifactInfo> {
    let dir = root.kernel_dir(version);
    [
        version.module_image_name(),
        version.kernel_image_name(),
        version.initramfs_name(),
    ]
    .into_iter()
    .filter_map(|name| {
        let metadata = std::fs::metadata(dir.join(&name)).ok()?;
        let modified = metadata
            .modified()
            .map(format_timestamp)
            .unwrap_or_else(|_| "unknown".to_string());
        Some(ArtifactInfo {
            size: system::format_size(metadata.len()),
            size_bytes: metadata.len(),
            modified,
            name,
        })
    })
    .collect()
}

fn format_timestamp(time: SystemTime) -> String {
    let dt = OffsetDateTime::from(time);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}",
        dt.year(),
        dt.month() as u8,
        dt.day(),
        dt.hour(),
        dt.minute()
    )
}

fn cmd_info(raw_version: Option<&str>, config: &Config, json: bool) -> ExitCode {
    let Some(root) = find_root(config, json) else {
        return ExitCode::from(1);
    };
    let running = running::running_version();
    let active = repository::active_version(&root);
    let available = repository::list_all(&root, running.as_ref());

    let target = match raw_version {
        Some(raw) => {
            let Some(version) = parse_version(raw, json) else {
                return ExitCode::from(1);
            };
            if !available.contains(&version) {
                emit_error(json, &format!("Kernel {version} not found"));
                return ExitCode::from(1);
            }
            version
        }
        None => match &active {
            Some(active) => active.clone(),
            None => {
                emit_error(json, "No active kernel found");
                return ExitCode::from(1);
            }
        },
    };

    let is_active = active.as_ref() == Some(&target);
    let is_running = running.as_ref() == Some(&target);
    let is_packaged = repository::is_packaged(&root, &target);
    let files = artifact_details(&root, &target);

    if json {
        print_json(&InfoRecord {
            kernel_version: target,
            is_active,
            is_running,
            is_packaged,
            minios_path: root.path().to_path_buf(),
            active_kernel: active,
            available_kernels: available,
            files,
        });
    } else {
        println!("Kernel: {target}");
        let status = if is_active && is_running {
            "Active, running"
        } else if is_active {
            "Active"
        } else if is_running {
            "Running"
        } else {
            "Available"
        };
        println!("Status: {status}");
        println!("MiniOS path: {}", root.path().display());
        if let Some(active) = &active {
            println!("Current active kernel: {active}");
        }
        println!("Total available kernels: {}", available.len());
        if !files.is_empty() {
            println!("Repository files:");
            for file in &files {
                println!("  {} ({}, modified {})", file.name, file.size, file.modified);
            }
        }
    }
    ExitCode::SUCCESS
}

fn cmd_status(config: &Config, json: bool) -> ExitCode {
    let Some(root) = find_root(config, json) else {
        return ExitCode::from(1);
    };

    let fs_type = system::filesystem_type(root.path());
    let (writable, reason) = system::writability(root.path());
    let system_type = system::system_type();

    if json {
        print_json(&StatusRecord {
            success: true,
            minios_path: root.path().to_path_buf(),
            found: true,
            writable,
            filesystem_type: fs_type,
            system_type,
            error: reason,
        });
    } else {
        println!("MiniOS path: {}", root.path().display());
        println!("System: {system_type}");
        println!("Filesystem type: {fs_type}");
        if writable {
            println!("Status: Writable");
        } else {
            println!("Status: Read-only");
            if let Some(reason) = reason {
                println!("Reason: {reason}");
            }
        }
    }
    ExitCode::SUCCESS
}

fn cmd_delete(raw_version: &str, config: &Config, json: bool) -> ExitCode {
    let Some(root) = find_root(config, json) else {
        return ExitCode::from(1);
    };
    let Some(version) = parse_version(raw_version, json) else {
        return ExitCode::from(1);
    };

    let engine = ActivationEngine::new(root);
    match engine.delete(&version) {
        Ok(()) => {
            if json {
                print_json(&DeleteRecord {
                    success: true,
                    message: Some(format!("Kernel {version} deleted successfully")),
                    error: None,
                });
            } else {
                println!("Kernel {version} deleted successfully");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            if json {
                match serde_json::to_string(&DeleteRecord {
                    success: false,
                    message: None,
                    error: Some(e.to_string()),
                }) {
                    Ok(line) => eprintln!("{line}"),
                    Err(e) => eprintln!("E: failed to serialize error: {e}"),
                }
            } else {
                eprintln!("E: {e}");
            }
            ExitCode::from(1)
        }
    }
}
