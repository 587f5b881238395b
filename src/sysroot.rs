//! Layered sysroot merging.
//!
//! A sysroot is built from an optional base tree plus an ordered list of
//! overlays (e.g. linux-headers, then glibc, then libstdc++). The base is
//! copied verbatim, then every overlay is laid on top in order:
//!
//! - symlinks always clobber whatever is at their path
//! - regular files always overwrite, so the last overlay wins
//! - directories merge with an existing directory at the same path
//!
//! The destination is rebuilt from scratch on every run, so merging the same
//! inputs twice yields the same tree.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::common::copy::{self, CopyStats, DeferredModes};
use crate::error::{Error, IoContext, Result};
use crate::timing::Timer;

/// Inputs for one sysroot merge.
#[derive(Debug, Clone, Default)]
pub struct SysrootSpec {
    pub base: Option<PathBuf>,
    pub overlays: Vec<PathBuf>,
}

impl SysrootSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn overlay(mut self, overlay: impl Into<PathBuf>) -> Self {
        self.overlays.push(overlay.into());
        self
    }

    /// Every source layer, base first.
    fn layers(&self) -> impl Iterator<Item = (&'static str, &Path)> {
        self.base
            .iter()
            .map(|b| ("base directory", b.as_path()))
            .chain(self.overlays.iter().map(|o| ("overlay directory", o.as_path())))
    }

    /// Check the request before anything on disk is touched.
    pub fn validate(&self, dest: &Path) -> Result<()> {
        if self.base.is_none() && self.overlays.is_empty() {
            return Err(Error::Configuration(
                "at least a base or one overlay must be specified".to_string(),
            ));
        }

        for (what, layer) in self.layers() {
            if !layer.is_dir() {
                return Err(Error::not_found(what, layer));
            }
        }

        // Rebuilding the destination deletes it; it must not overlap an input.
        let dest_abs = absolute(dest)?;
        for (what, layer) in self.layers() {
            let layer_abs = fs::canonicalize(layer)
                .merge_ctx(|| format!("Failed to resolve {}", layer.display()))?;
            if layer_abs.starts_with(&dest_abs) || dest_abs.starts_with(&layer_abs) {
                return Err(Error::Configuration(format!(
                    "output directory {} overlaps {} {}",
                    dest.display(),
                    what,
                    layer.display()
                )));
            }
        }

        Ok(())
    }
}

/// Outcome of a merge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MergeStats {
    pub base: CopyStats,
    pub overlays: CopyStats,
}

/// Build `dest` from `spec`, replacing any previous content.
///
/// On failure after the destination was cleared, the partial tree is
/// removed again.
pub fn merge_sysroot(spec: &SysrootSpec, dest: &Path) -> Result<MergeStats> {
    spec.validate(dest)?;

    let timer = Timer::start("sysroot merge");
    copy::clear_path(dest)
        .merge_ctx(|| format!("Failed to remove existing output {}", dest.display()))?;

    let result = build(spec, dest);
    match result {
        Ok(_) => {
            timer.finish();
        }
        Err(_) => {
            if let Err(e) = copy::clear_path(dest) {
                log::warn!("failed to clean up partial output {}: {}", dest.display(), e);
            }
        }
    }
    result
}

fn build(spec: &SysrootSpec, dest: &Path) -> Result<MergeStats> {
    let mut stats = MergeStats::default();

    match spec.base {
        Some(ref base) => {
            log::info!("Copying base {}", base.display());
            stats.base = copy::copy_tree(base, dest)
                .merge_ctx(|| format!("Failed to copy base {}", base.display()))?;
        }
        None => {
            fs::create_dir_all(dest)
                .merge_ctx(|| format!("Failed to create {}", dest.display()))?;
        }
    }

    // canonical root for the merge-through check on symlinked directories
    let root = fs::canonicalize(dest)
        .merge_ctx(|| format!("Failed to resolve {}", dest.display()))?;

    for overlay in &spec.overlays {
        log::info!("Applying overlay {}", overlay.display());
        apply_overlay(overlay, dest, &root, &mut stats.overlays)?;
    }

    Ok(stats)
}

/// Lay one overlay tree over `dest`.
fn apply_overlay(overlay: &Path, dest: &Path, root: &Path, stats: &mut CopyStats) -> Result<()> {
    let mut modes = DeferredModes::default();
    make_writable(dest, &mut modes)
        .merge_ctx(|| format!("Failed to open {} for merging", dest.display()))?;

    for entry in WalkDir::new(overlay)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
    {
        let entry = entry
            .map_err(io::Error::from)
            .merge_ctx(|| format!("Failed to walk overlay {}", overlay.display()))?;
        let rel = entry
            .path()
            .strip_prefix(overlay)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .merge_ctx(|| format!("Unexpected path {}", entry.path().display()))?;
        let dst = dest.join(rel);

        if entry.file_type().is_dir() {
            let created = merge_dir(&dst, root)
                .merge_ctx(|| format!("Failed to merge directory {}", rel.display()))?;
            if created {
                let mode = entry
                    .metadata()
                    .map_err(io::Error::from)
                    .merge_ctx(|| format!("Failed to stat {}", entry.path().display()))?
                    .permissions()
                    .mode();
                modes.push(dst, mode);
                stats.dirs += 1;
            } else {
                make_writable(&dst, &mut modes)
                    .merge_ctx(|| format!("Failed to open {} for merging", rel.display()))?;
            }
            continue;
        }

        let (kind, replaced) = copy::copy_entry(entry.path(), &dst)
            .merge_ctx(|| format!("Failed to copy {}", rel.display()))?;
        stats.record(kind);
        if replaced {
            stats.replaced += 1;
        }
    }

    modes
        .apply()
        .merge_ctx(|| format!("Failed to set directory modes from {}", overlay.display()))
}

/// Give an existing directory owner write and search bits for the
/// duration of an overlay, queueing its original mode for restore.
fn make_writable(dir: &Path, modes: &mut DeferredModes) -> io::Result<()> {
    let mode = fs::metadata(dir)?.permissions().mode() & 0o7777;
    if mode & 0o300 != 0o300 {
        fs::set_permissions(dir, fs::Permissions::from_mode(mode | 0o300))?;
        modes.push(dir.to_path_buf(), mode);
    }
    Ok(())
}

/// Make `dst` a directory the overlay can merge into.
///
/// An existing directory is reused. A symlink is reused only when it
/// resolves to a directory inside the merge root (e.g. `lib64 -> lib`);
/// anything else at the path is replaced. Returns true if a new directory
/// was created.
fn merge_dir(dst: &Path, root: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(dst) {
        Ok(md) if md.is_dir() => return Ok(false),
        Ok(md) if md.file_type().is_symlink() => {
            if let Ok(resolved) = fs::canonicalize(dst) {
                if resolved.starts_with(root) && resolved.is_dir() {
                    return Ok(false);
                }
            }
            log::debug!("replacing symlink {} with a directory", dst.display());
            fs::remove_file(dst)?;
        }
        Ok(_) => fs::remove_file(dst)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir(dst)?;
    Ok(true)
}

/// Absolute, symlink-resolved form of a path that may not exist yet.
fn absolute(path: &Path) -> Result<PathBuf> {
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .merge_ctx(|| "Failed to read current directory".to_string())?
            .join(path)
    };

    // resolve the deepest existing ancestor, keep the rest lexically
    let mut existing = abs.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = fs::canonicalize(existing).unwrap_or_else(|_| existing.to_path_buf());
    for name in tail.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
