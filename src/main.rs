//! sysforge - sysroot, initramfs and BTF header assembly.
//!
//! Each subcommand wraps one library operation:
//! - merged sysroots from a base plus ordered overlays
//! - compressed newc initramfs images, optionally staged from a rootfs
//! - vmlinux.h generation gated on kernel BTF data
//! - verification and extraction of built images

mod commands;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use sysforge::artifact::staging::DEFAULT_INIT_PATH;
use sysforge::config::Config;

#[derive(Parser)]
#[command(name = "sysforge")]
#[command(about = "Filesystem and image assembly for OS build pipelines")]
#[command(
    after_help = "EXAMPLES:\n  sysforge sysroot-merge --base base --overlay glibc --output-dir sysroot\n  sysforge initramfs --root-dir rootfs --output initramfs.cpio.gz\n  sysforge btf-headers --vmlinux vmlinux --output vmlinux.h"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Compression and reproducibility flags for image builds.
#[derive(Args)]
struct ImageFlags {
    /// Compression format: gz, xz, lz4, zstd or none (default: SYSFORGE_COMPRESSION or gz)
    #[arg(long)]
    compression: Option<String>,

    /// Compression level (default: SYSFORGE_GZIP_LEVEL / SYSFORGE_ZSTD_LEVEL)
    #[arg(long)]
    level: Option<i32>,

    /// Record every entry as owned by root:root
    #[arg(long)]
    root_owned: bool,

    /// Fixed mtime for every entry (default: SOURCE_DATE_EPOCH)
    #[arg(long)]
    source_date_epoch: Option<u32>,
}

impl From<ImageFlags> for commands::ImageArgs {
    fn from(flags: ImageFlags) -> Self {
        Self {
            compression: flags.compression,
            level: flags.level,
            root_owned: flags.root_owned,
            source_date_epoch: flags.source_date_epoch,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a base tree and ordered overlays into a sysroot
    SysrootMerge {
        /// Base tree copied first
        #[arg(long)]
        base: Option<PathBuf>,

        /// Overlay tree, applied in the order given (repeatable)
        #[arg(long = "overlay")]
        overlays: Vec<PathBuf>,

        /// Output directory (replaced wholesale)
        #[arg(long)]
        output_dir: PathBuf,
    },

    /// Pack a directory into a compressed newc initramfs
    Initramfs {
        /// Root directory of the image
        #[arg(long)]
        root_dir: PathBuf,

        /// Output image path
        #[arg(long)]
        output: PathBuf,

        #[command(flatten)]
        image: ImageFlags,
    },

    /// Stage a rootfs (lib64 merge, /init) and pack it into an initramfs
    InitramfsRootfs {
        /// Rootfs directory (not modified)
        #[arg(long)]
        rootfs_dir: PathBuf,

        /// Output image path
        #[arg(long)]
        output: PathBuf,

        /// Absolute path of the init program inside the image
        #[arg(long, default_value = DEFAULT_INIT_PATH)]
        init_path: String,

        /// Script to install as the init program
        #[arg(long)]
        init_script: Option<PathBuf>,

        #[command(flatten)]
        image: ImageFlags,
    },

    /// Generate vmlinux.h from a kernel's BTF data
    BtfHeaders {
        /// Kernel ELF image built with CONFIG_DEBUG_INFO_BTF=y
        #[arg(long)]
        vmlinux: PathBuf,

        /// Output header path
        #[arg(long)]
        output: PathBuf,

        /// bpftool name or path (default: BPFTOOL or bpftool from PATH)
        #[arg(long)]
        bpftool: Option<String>,
    },

    /// Verify a built initramfs image
    VerifyInitramfs {
        /// Image to verify
        file: PathBuf,

        /// Minimum plausible size in bytes (default: SYSFORGE_MIN_INITRAMFS_SIZE)
        #[arg(long)]
        min_size: Option<u64>,

        /// Require /init and scan embedded scripts for placeholders
        #[arg(long)]
        boot: bool,

        /// Variable /init must assign a concrete value (repeatable, implies --boot)
        #[arg(long = "require")]
        required_vars: Vec<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify a boot script has no unresolved placeholders
    VerifyBootScript {
        /// Script to verify
        file: PathBuf,

        /// Variable the script must assign a concrete value (repeatable)
        #[arg(long = "require")]
        required_vars: Vec<String>,
    },

    /// Extract an initramfs image for inspection
    ExtractInitramfs {
        /// Image to extract (gzip, xz, lz4, zstd or raw cpio)
        file: PathBuf,

        /// Directory to extract into
        #[arg(long)]
        output_dir: PathBuf,
    },

    /// Show current configuration
    ShowConfig,
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Never)
        .format(|buf, record| match record.level() {
            log::Level::Error => writeln!(buf, "error: {}", record.args()),
            log::Level::Warn => writeln!(buf, "warning: {}", record.args()),
            log::Level::Info => writeln!(buf, "{}", record.args()),
            level => writeln!(buf, "{}: {}", level.as_str().to_lowercase(), record.args()),
        })
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = Config::load(&base_dir);

    match cli.command {
        Commands::SysrootMerge {
            base,
            overlays,
            output_dir,
        } => {
            commands::cmd_sysroot_merge(base, overlays, &output_dir)?;
        }

        Commands::Initramfs {
            root_dir,
            output,
            image,
        } => {
            commands::cmd_initramfs(&root_dir, &output, &image.into(), &config)?;
        }

        Commands::InitramfsRootfs {
            rootfs_dir,
            output,
            init_path,
            init_script,
            image,
        } => {
            commands::cmd_initramfs_rootfs(
                &rootfs_dir,
                &output,
                init_path,
                init_script,
                &image.into(),
                &config,
            )?;
        }

        Commands::BtfHeaders {
            vmlinux,
            output,
            bpftool,
        } => {
            commands::cmd_btf_headers(&vmlinux, &output, bpftool, &config)?;
        }

        Commands::VerifyInitramfs {
            file,
            min_size,
            boot,
            required_vars,
            json,
        } => {
            let boot = boot || !required_vars.is_empty();
            commands::cmd_verify_initramfs(&file, min_size, boot, required_vars, json, &config)?;
        }

        Commands::VerifyBootScript {
            file,
            required_vars,
        } => {
            commands::cmd_verify_boot_script(&file, required_vars)?;
        }

        Commands::ExtractInitramfs { file, output_dir } => {
            commands::cmd_extract(&file, &output_dir)?;
        }

        Commands::ShowConfig => {
            commands::cmd_show_config(&config)?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
