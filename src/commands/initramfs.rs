//! Initramfs commands.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use sysforge::artifact::{
    build_initramfs, build_initramfs_from_rootfs, InitramfsOptions, InitramfsReport,
    StagingOptions,
};
use sysforge::config::Config;

/// Image options shared by both initramfs commands.
#[derive(Debug, Clone, Default)]
pub struct ImageArgs {
    pub compression: Option<String>,
    pub level: Option<i32>,
    pub root_owned: bool,
    pub source_date_epoch: Option<u32>,
}

impl ImageArgs {
    /// Combine command line flags with the loaded configuration.
    pub fn resolve(&self, config: &Config) -> Result<InitramfsOptions> {
        let compression = config.compression(self.compression.as_deref(), self.level)?;
        let mut opts = InitramfsOptions {
            compression,
            ..InitramfsOptions::default()
        };

        if let Some(epoch) = self.source_date_epoch.or(config.source_date_epoch) {
            opts.archive.fixed_mtime = Some(epoch);
        }
        if self.root_owned {
            opts.archive.fixed_uid = Some(0);
            opts.archive.fixed_gid = Some(0);
        }
        Ok(opts)
    }
}

fn print_report(report: &InitramfsReport) {
    println!("\n=== Initramfs Complete ===");
    println!("{}", report.artifact);
    println!("  Entries: {} ({})", report.entries, report.compression);
}

/// Execute the initramfs command.
pub fn cmd_initramfs(root_dir: &Path, output: &Path, args: &ImageArgs, config: &Config) -> Result<()> {
    let opts = args.resolve(config)?;
    let report = build_initramfs(root_dir, output, &opts)
        .with_context(|| format!("Failed to build initramfs from {}", root_dir.display()))?;
    print_report(&report);
    Ok(())
}

/// Execute the initramfs-rootfs command.
pub fn cmd_initramfs_rootfs(
    rootfs_dir: &Path,
    output: &Path,
    init_path: String,
    init_script: Option<PathBuf>,
    args: &ImageArgs,
    config: &Config,
) -> Result<()> {
    if !init_path.starts_with('/') {
        anyhow::bail!("--init-path must be absolute, got '{}'", init_path);
    }

    let opts = args.resolve(config)?;
    let staging = StagingOptions {
        init_path,
        init_script,
    };
    let report = build_initramfs_from_rootfs(rootfs_dir, output, &staging, &opts)
        .with_context(|| format!("Failed to build initramfs from rootfs {}", rootfs_dir.display()))?;
    print_report(&report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use sysforge::artifact::Compression;

    #[test]
    fn test_flags_override_config() {
        let config = Config {
            source_date_epoch: Some(100),
            ..Config::default()
        };
        let args = ImageArgs {
            compression: Some("zstd".into()),
            level: Some(3),
            root_owned: true,
            source_date_epoch: Some(200),
        };

        let opts = args.resolve(&config).unwrap();

        assert_eq!(opts.compression, Compression::Zstd(3));
        assert_eq!(opts.archive.fixed_mtime, Some(200));
        assert_eq!(opts.archive.fixed_uid, Some(0));
    }

    #[test]
    fn test_config_defaults_apply() {
        let config = Config::from_vars(&HashMap::from([(
            "SOURCE_DATE_EPOCH".to_string(),
            "315576000".to_string(),
        )]));

        let opts = ImageArgs::default().resolve(&config).unwrap();

        assert_eq!(opts.compression, Compression::Gzip(9));
        assert_eq!(opts.archive.fixed_mtime, Some(315576000));
        assert_eq!(opts.archive.fixed_uid, None);
    }
}
