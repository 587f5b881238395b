//! Configuration management for sysforge.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file, and command
//! line flags take precedence over both.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::artifact::compression::{
    Compression, DEFAULT_GZIP_LEVEL, DEFAULT_LZ4_LEVEL, DEFAULT_XZ_LEVEL, DEFAULT_ZSTD_LEVEL,
};
use crate::artifact::verify::DEFAULT_MIN_INITRAMFS_SIZE;
use crate::btf::{DEFAULT_BPFTOOL, DEFAULT_MIN_HEADER_SIZE};

/// Default compression format name.
pub const DEFAULT_COMPRESSION: &str = "gz";

/// sysforge configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Compression format for images (SYSFORGE_COMPRESSION: gz, xz, lz4, zstd, none)
    pub compression: String,
    /// gzip level (SYSFORGE_GZIP_LEVEL)
    pub gzip_level: u32,
    /// xz preset (SYSFORGE_XZ_LEVEL)
    pub xz_level: u32,
    /// lz4 level (SYSFORGE_LZ4_LEVEL)
    pub lz4_level: u32,
    /// zstd level (SYSFORGE_ZSTD_LEVEL)
    pub zstd_level: i32,
    /// bpftool name or path (BPFTOOL)
    pub bpftool: String,
    /// Smallest plausible generated BTF header (SYSFORGE_MIN_HEADER_SIZE)
    pub min_header_size: u64,
    /// Smallest plausible initramfs image (SYSFORGE_MIN_INITRAMFS_SIZE)
    pub min_initramfs_size: u64,
    /// Fixed archive mtime for reproducible builds (SOURCE_DATE_EPOCH)
    pub source_date_epoch: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compression: DEFAULT_COMPRESSION.to_string(),
            gzip_level: DEFAULT_GZIP_LEVEL,
            xz_level: DEFAULT_XZ_LEVEL,
            lz4_level: DEFAULT_LZ4_LEVEL,
            zstd_level: DEFAULT_ZSTD_LEVEL,
            bpftool: DEFAULT_BPFTOOL.to_string(),
            min_header_size: DEFAULT_MIN_HEADER_SIZE,
            min_initramfs_size: DEFAULT_MIN_INITRAMFS_SIZE,
            source_date_epoch: None,
        }
    }
}

/// Parse `key` if set, falling back to `default` with a warning when the
/// value doesn't parse.
fn parse_var<T: FromStr>(vars: &HashMap<String, String>, key: &str, default: T) -> T {
    match vars.get(key).map(|v| v.trim()) {
        None | Some("") => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            log::warn!("ignoring invalid {}={:?}, using default", key, value);
            default
        }),
    }
}

impl Config {
    /// Load configuration from `base_dir/.env` and the environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut env_vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            match dotenvy::from_path_iter(&env_path) {
                Ok(iter) => {
                    for item in iter {
                        match item {
                            Ok((key, value)) => {
                                env_vars.insert(key, value);
                            }
                            Err(e) => log::warn!("{}: {}", env_path.display(), e),
                        }
                    }
                }
                Err(e) => log::warn!("failed to read {}: {}", env_path.display(), e),
            }
        }

        // Environment variables override .env file. Non-UTF-8 entries can't
        // name a setting and are skipped.
        for (key, value) in std::env::vars_os() {
            if let (Ok(key), Ok(value)) = (key.into_string(), value.into_string()) {
                env_vars.insert(key, value);
            }
        }

        Self::from_vars(&env_vars)
    }

    /// Build a config from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let defaults = Self::default();

        let compression = match vars.get("SYSFORGE_COMPRESSION").map(|v| v.trim()) {
            None | Some("") => defaults.compression,
            Some(name) if Compression::parse(name, None).is_ok() => name.to_string(),
            Some(name) => {
                log::warn!("ignoring unknown SYSFORGE_COMPRESSION={:?}, using gz", name);
                defaults.compression
            }
        };

        let bpftool = vars
            .get("BPFTOOL")
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or(defaults.bpftool);

        let source_date_epoch = match vars.get("SOURCE_DATE_EPOCH").map(|v| v.trim()) {
            None | Some("") => None,
            Some(value) => match value.parse::<u32>() {
                Ok(epoch) => Some(epoch),
                Err(_) => {
                    log::warn!("ignoring invalid SOURCE_DATE_EPOCH={:?}", value);
                    None
                }
            },
        };

        Self {
            compression,
            gzip_level: parse_var(vars, "SYSFORGE_GZIP_LEVEL", defaults.gzip_level),
            xz_level: parse_var(vars, "SYSFORGE_XZ_LEVEL", defaults.xz_level),
            lz4_level: parse_var(vars, "SYSFORGE_LZ4_LEVEL", defaults.lz4_level),
            zstd_level: parse_var(vars, "SYSFORGE_ZSTD_LEVEL", defaults.zstd_level),
            bpftool,
            min_header_size: parse_var(vars, "SYSFORGE_MIN_HEADER_SIZE", defaults.min_header_size),
            min_initramfs_size: parse_var(
                vars,
                "SYSFORGE_MIN_INITRAMFS_SIZE",
                defaults.min_initramfs_size,
            ),
            source_date_epoch,
        }
    }

    /// Resolve the compression to use, with optional command line overrides
    /// for the format and level.
    pub fn compression(&self, name: Option<&str>, level: Option<i32>) -> crate::Result<Compression> {
        let name = name.unwrap_or(self.compression.as_str());
        let level = level.or(match name {
            "gz" | "gzip" => Some(self.gzip_level as i32),
            "xz" => Some(self.xz_level as i32),
            "lz4" => Some(self.lz4_level as i32),
            "zstd" => Some(self.zstd_level),
            _ => None,
        });
        Compression::parse(name, level)
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  SYSFORGE_COMPRESSION: {}", self.compression);
        println!("  SYSFORGE_GZIP_LEVEL: {}", self.gzip_level);
        println!("  SYSFORGE_XZ_LEVEL: {}", self.xz_level);
        println!("  SYSFORGE_LZ4_LEVEL: {}", self.lz4_level);
        println!("  SYSFORGE_ZSTD_LEVEL: {}", self.zstd_level);
        println!("  BPFTOOL: {}", self.bpftool);
        println!("  SYSFORGE_MIN_HEADER_SIZE: {}", self.min_header_size);
        println!("  SYSFORGE_MIN_INITRAMFS_SIZE: {}", self.min_initramfs_size);
        match self.source_date_epoch {
            Some(epoch) => println!("  SOURCE_DATE_EPOCH: {}", epoch),
            None => println!("  SOURCE_DATE_EPOCH: (unset, archive mtimes come from the tree)"),
        }
    }
}
