//! Recreate an archive's tree on disk.

use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::reader::{ArchiveEntry, NewcReader};
use crate::common::copy::{clear_path, DeferredModes};
use crate::error::{Error, IoContext, Result};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ExtractStats {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub skipped: u64,
}

/// Turn an archive name into a path below the extraction root.
///
/// Absolute names and `..` components are refused.
fn safe_relative(name: &[u8]) -> Result<PathBuf> {
    let path = Path::new(OsStr::from_bytes(name));
    let mut rel = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::Validation(format!(
                    "refusing to extract unsafe path {}",
                    path.display()
                )))
            }
        }
    }
    Ok(rel)
}

/// Extract every entry of an uncompressed newc stream below `dest`.
///
/// Stops at the trailer. Regular files get their permission bits and mtime
/// back, symlinks their target verbatim; device nodes, fifos and sockets are
/// skipped.
pub fn extract_archive<R: Read>(reader: R, dest: &Path) -> Result<ExtractStats> {
    fs::create_dir_all(dest).archive_ctx(|| format!("Failed to create {}", dest.display()))?;
    let root = fs::canonicalize(dest)
        .archive_ctx(|| format!("Failed to resolve {}", dest.display()))?;

    let mut stats = ExtractStats::default();
    let mut modes = DeferredModes::default();

    for entry in NewcReader::new(reader) {
        let entry = entry.archive_ctx(|| "Failed to read archive".to_string())?;
        if entry.is_trailer() {
            break;
        }

        let rel = safe_relative(&entry.name)?;
        if let Some(parent) = rel.parent() {
            create_parents(&root, parent)?;
        }
        let target = root.join(&rel);

        extract_entry(&entry, &target, &mut stats, &mut modes)
            .archive_ctx(|| format!("Failed to extract {}", entry.name_lossy()))?;
    }

    modes
        .apply()
        .archive_ctx(|| format!("Failed to set directory modes in {}", dest.display()))?;
    Ok(stats)
}

/// Create `rel` below `root` one component at a time.
///
/// A component that already exists must be a directory, or a symlink
/// resolving to a directory inside `root`, so an earlier symlink entry can't
/// redirect later entries out of the tree.
fn create_parents(root: &Path, rel: &Path) -> Result<()> {
    let mut dir = root.to_path_buf();
    for component in rel.components() {
        dir.push(component);
        match fs::symlink_metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(meta) if meta.file_type().is_symlink() => {
                let inside = fs::canonicalize(&dir)
                    .map(|resolved| resolved.starts_with(root) && resolved.is_dir())
                    .unwrap_or(false);
                if !inside {
                    return Err(Error::Validation(format!(
                        "refusing to extract below {}: symlink leaves the tree",
                        dir.display()
                    )));
                }
            }
            Ok(_) => {
                return Err(Error::Validation(format!(
                    "refusing to extract below {}: not a directory",
                    dir.display()
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(&dir).archive_ctx(|| format!("Failed to create {}", dir.display()))?;
            }
            Err(e) => {
                return Err(e).archive_ctx(|| format!("Failed to inspect {}", dir.display()))
            }
        }
    }

    let resolved =
        fs::canonicalize(&dir).archive_ctx(|| format!("Failed to resolve {}", dir.display()))?;
    if !resolved.starts_with(root) {
        return Err(Error::Validation(format!(
            "refusing to extract below {}: outside the tree",
            dir.display()
        )));
    }
    Ok(())
}

fn extract_entry(
    entry: &ArchiveEntry,
    target: &Path,
    stats: &mut ExtractStats,
    modes: &mut DeferredModes,
) -> io::Result<()> {
    if entry.is_dir() {
        if !fs::symlink_metadata(target).map(|m| m.is_dir()).unwrap_or(false) {
            clear_path(target)?;
            fs::create_dir(target)?;
        }
        modes.push(target.to_path_buf(), entry.meta.permissions());
        stats.dirs += 1;
    } else if entry.is_symlink() {
        clear_path(target)?;
        std::os::unix::fs::symlink(OsStr::from_bytes(&entry.data), target)?;
        stats.symlinks += 1;
    } else if entry.is_file() {
        clear_path(target)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(target)?;
        file.write_all(&entry.data)?;
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(entry.meta.mtime.into()))?;
        drop(file);
        fs::set_permissions(target, fs::Permissions::from_mode(entry.meta.permissions()))?;
        stats.files += 1;
    } else {
        log::warn!("skipping special entry {} (mode {:o})", entry.name_lossy(), entry.meta.mode);
        stats.skipped += 1;
    }
    Ok(())
}
