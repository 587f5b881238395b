//! Symlink-aware copying of single tree entries and whole trees.
//!
//! Symlinks are recreated with their target string untouched and are never
//! followed, so nothing copied here can alias outside the tree it came from.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// What kind of entry was copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    /// fifo, socket or device node; never copied.
    Special,
}

impl EntryKind {
    pub fn of(file_type: fs::FileType) -> Self {
        if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Special
        }
    }
}

/// Counters for a copy or merge pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CopyStats {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub skipped: u64,
    /// Existing destination entries that were removed to make room.
    pub replaced: u64,
}

impl CopyStats {
    pub fn record(&mut self, kind: EntryKind) {
        match kind {
            EntryKind::File => self.files += 1,
            EntryKind::Dir => self.dirs += 1,
            EntryKind::Symlink => self.symlinks += 1,
            EntryKind::Special => self.skipped += 1,
        }
    }
}

/// Remove whatever sits at `path` without following a symlink there.
///
/// Returns true if something was removed.
pub fn clear_path(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(md) if md.is_dir() => {
            fs::remove_dir_all(path)?;
            Ok(true)
        }
        Ok(_) => {
            fs::remove_file(path)?;
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Recreate the symlink at `src` as `dst`, clobbering any existing entry.
pub fn copy_symlink(src: &Path, dst: &Path) -> io::Result<bool> {
    let target = fs::read_link(src)?;
    let replaced = clear_path(dst)?;
    std::os::unix::fs::symlink(&target, dst)?;
    Ok(replaced)
}

/// Copy a regular file, keeping permission bits and mtime.
///
/// Any existing entry at `dst` is removed first, so a symlink there is
/// replaced rather than written through and read-only files don't block
/// the copy.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<bool> {
    let md = fs::metadata(src)?;
    let replaced = clear_path(dst)?;

    let mut reader = File::open(src)?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(dst)?;
    io::copy(&mut reader, &mut writer)?;
    writer.set_modified(md.modified()?)?;
    drop(writer);

    fs::set_permissions(dst, fs::Permissions::from_mode(md.permissions().mode() & 0o7777))?;
    Ok(replaced)
}

/// Copy one non-directory entry from `src` to `dst`.
///
/// Directories are the caller's business since they merge rather than
/// replace. Special files are reported and left alone.
pub fn copy_entry(src: &Path, dst: &Path) -> io::Result<(EntryKind, bool)> {
    let kind = EntryKind::of(fs::symlink_metadata(src)?.file_type());
    let replaced = match kind {
        EntryKind::Symlink => copy_symlink(src, dst)?,
        EntryKind::File => copy_file(src, dst)?,
        EntryKind::Dir => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", src.display()),
            ))
        }
        EntryKind::Special => {
            log::warn!("skipping special file {}", src.display());
            false
        }
    };
    Ok((kind, replaced))
}

/// Directory modes to apply once a directory's contents are in place.
///
/// Applying them last lets read-only source directories be copied.
#[derive(Debug, Default)]
pub struct DeferredModes(Vec<(PathBuf, u32)>);

impl DeferredModes {
    pub fn push(&mut self, dir: PathBuf, mode: u32) {
        self.0.push((dir, mode & 0o7777));
    }

    /// Apply innermost directories first.
    pub fn apply(self) -> io::Result<()> {
        for (dir, mode) in self.0.into_iter().rev() {
            fs::set_permissions(&dir, fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }
}

/// Recursively copy a directory, preserving symlinks.
///
/// `dst` is created if needed and must not already hold conflicting
/// entries of a different kind; existing files are overwritten.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<CopyStats> {
    let mut stats = CopyStats::default();
    let mut modes = DeferredModes::default();

    for entry in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let dst_path = dst.join(rel);

        if entry.file_type().is_dir() {
            if !fs::symlink_metadata(&dst_path).map(|m| m.is_dir()).unwrap_or(false) {
                clear_path(&dst_path)?;
                fs::create_dir_all(&dst_path)?;
            }
            modes.push(dst_path, entry.metadata().map_err(io::Error::from)?.permissions().mode());
            if entry.depth() > 0 {
                stats.dirs += 1;
            }
            continue;
        }

        let (kind, replaced) = copy_entry(entry.path(), &dst_path)?;
        stats.record(kind);
        if replaced {
            stats.replaced += 1;
        }
    }

    modes.apply()?;
    Ok(stats)
}
