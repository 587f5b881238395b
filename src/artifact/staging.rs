//! Rootfs staging before packing.
//!
//! The rootfs a package build hands over is not always bootable as-is: some
//! toolchains install into `lib64`, and minimal roots ship without an
//! `/init`. Staging copies the rootfs into a private directory and fixes both
//! before the tree is packed. The source rootfs is never modified.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use super::initramfs::{build_initramfs, InitramfsOptions, InitramfsReport};
use crate::common::{copy_tree, write_file_mode};
use crate::error::{Error, IoContext, Result};

/// Fallback `/sbin/init` for roots that have a shell but no init.
pub const DEFAULT_INIT: &str = "\
#!/bin/sh
mount -t proc proc /proc
mount -t sysfs sysfs /sys
mount -t devtmpfs devtmpfs /dev 2>/dev/null || true
[ -x /etc/init.d/rcS ] && /etc/init.d/rcS
exec /bin/sh
";

pub const DEFAULT_INIT_PATH: &str = "/sbin/init";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingOptions {
    /// Absolute path of the init program inside the image.
    pub init_path: String,
    /// Script to install at `init_path`, replacing whatever the rootfs has.
    pub init_script: Option<PathBuf>,
}

impl Default for StagingOptions {
    fn default() -> Self {
        Self {
            init_path: DEFAULT_INIT_PATH.to_string(),
            init_script: None,
        }
    }
}

/// True if anything, including a dangling symlink, sits at `path`.
fn entry_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn is_real_dir(path: &Path) -> bool {
    fs::symlink_metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

fn is_file(path: &Path) -> bool {
    fs::symlink_metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Fold `lib64` into `lib` (and `usr/lib64` into `usr/lib`), leaving a
/// `lib64 -> lib` symlink behind. Entries already present in `lib` win.
pub fn fix_lib64(staging: &Path) -> io::Result<()> {
    for prefix in ["", "usr/"] {
        let lib64 = staging.join(format!("{}lib64", prefix));
        let lib = staging.join(format!("{}lib", prefix));
        if !is_real_dir(&lib64) {
            continue;
        }

        fs::create_dir_all(&lib)?;
        let mut names: Vec<_> = fs::read_dir(&lib64)?
            .map(|e| e.map(|e| e.file_name()))
            .collect::<io::Result<_>>()?;
        names.sort();

        for name in names {
            let dst = lib.join(&name);
            if entry_exists(&dst) {
                log::debug!("keeping {}, dropping lib64 copy", dst.display());
                continue;
            }
            fs::rename(lib64.join(&name), &dst)?;
        }

        fs::remove_dir_all(&lib64)?;
        symlink("lib", &lib64)?;
        log::info!("Merged {}lib64 into {}lib", prefix, prefix);
    }
    Ok(())
}

/// Install the init program and the `/init` entry point.
fn install_init(staging: &Path, opts: &StagingOptions) -> Result<()> {
    let rel_init = opts.init_path.trim_start_matches('/');
    if rel_init.is_empty() {
        return Err(Error::Configuration(format!(
            "invalid init path '{}'",
            opts.init_path
        )));
    }
    let init_dest = staging.join(rel_init);
    let sbin_init = staging.join("sbin/init");
    let has_sh = entry_exists(&staging.join("bin/sh"));

    match opts.init_script {
        Some(ref script) => {
            if !script.is_file() {
                return Err(Error::not_found("init script", script));
            }
            let content = fs::read(script)
                .archive_ctx(|| format!("Failed to read {}", script.display()))?;
            crate::common::clear_path(&init_dest)
                .archive_ctx(|| format!("Failed to replace {}", init_dest.display()))?;
            write_file_mode(&init_dest, content, 0o755)
                .archive_ctx(|| format!("Failed to install {}", init_dest.display()))?;
            log::info!("Installed init script at {}", opts.init_path);
        }
        None if !entry_exists(&init_dest) => {
            if is_file(&staging.join("bin/busybox")) {
                if !entry_exists(&sbin_init) {
                    fs::create_dir_all(staging.join("sbin"))
                        .and_then(|_| symlink("/bin/busybox", &sbin_init))
                        .archive_ctx(|| "Failed to link /sbin/init to busybox".to_string())?;
                    log::info!("Linked /sbin/init -> /bin/busybox");
                }
            } else if has_sh {
                write_file_mode(&sbin_init, DEFAULT_INIT, 0o755)
                    .archive_ctx(|| "Failed to write default /sbin/init".to_string())?;
                log::info!("Wrote default /sbin/init");
            } else {
                log::warn!("rootfs has no {} and no shell to fall back on", opts.init_path);
            }
        }
        None => {}
    }

    let init_link = staging.join("init");
    if entry_exists(&init_link) {
        return Ok(());
    }
    if entry_exists(&init_dest) {
        symlink(&opts.init_path, &init_link)
            .archive_ctx(|| "Failed to create /init".to_string())?;
    } else if entry_exists(&sbin_init) {
        symlink(DEFAULT_INIT_PATH, &init_link)
            .archive_ctx(|| "Failed to create /init".to_string())?;
    } else if has_sh {
        write_file_mode(&init_link, DEFAULT_INIT, 0o755)
            .archive_ctx(|| "Failed to write default /init".to_string())?;
    } else {
        log::warn!("image will have no /init; the kernel will not find an entry point");
    }
    Ok(())
}

/// Copy `rootfs` into `staging` and make it bootable.
pub fn stage_rootfs(rootfs: &Path, staging: &Path, opts: &StagingOptions) -> Result<()> {
    if !rootfs.is_dir() {
        return Err(Error::not_found("rootfs directory", rootfs));
    }

    copy_tree(rootfs, staging)
        .archive_ctx(|| format!("Failed to stage {}", rootfs.display()))?;
    fix_lib64(staging).archive_ctx(|| "Failed to merge lib64 into lib".to_string())?;
    install_init(staging, opts)
}

/// Stage `rootfs` in a temporary directory and pack it into `output`.
///
/// The staging directory is removed whether or not packing succeeds.
pub fn build_initramfs_from_rootfs(
    rootfs: &Path,
    output: &Path,
    staging_opts: &StagingOptions,
    opts: &InitramfsOptions,
) -> Result<InitramfsReport> {
    if !rootfs.is_dir() {
        return Err(Error::not_found("rootfs directory", rootfs));
    }

    let staging = tempfile::Builder::new()
        .prefix("sysforge-staging.")
        .tempdir()
        .archive_ctx(|| "Failed to create staging directory".to_string())?;
    let root = staging.path().join("root");

    stage_rootfs(rootfs, &root, staging_opts)?;
    build_initramfs(&root, output, opts)
}
