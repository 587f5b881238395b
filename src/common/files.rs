//! File writing helpers: permissioned writes and atomic artifacts.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Write a file with specific Unix permissions, creating parent directories
/// as needed.
pub fn write_file_mode<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
    mode: u32,
) -> io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// An output file that only appears at its final path once committed.
///
/// Data goes to a hidden temporary file next to the destination (same
/// filesystem, so the final rename is atomic). Dropping an uncommitted
/// `AtomicOutput` deletes the temporary file, so a failed build never leaves
/// a half-written artifact behind.
pub struct AtomicOutput {
    dest: PathBuf,
    temp: NamedTempFile,
}

impl AtomicOutput {
    /// Create the temporary file, and the destination's parent directory if
    /// it does not exist yet.
    pub fn create(dest: &Path) -> io::Result<Self> {
        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let prefix = format!(
            ".{}.",
            dest.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "artifact".to_string())
        );
        let temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(&parent)?;

        Ok(Self {
            dest: dest.to_path_buf(),
            temp,
        })
    }

    pub fn file(&mut self) -> &mut fs::File {
        self.temp.as_file_mut()
    }

    /// Current size of the data written so far.
    pub fn written(&self) -> io::Result<u64> {
        Ok(self.temp.as_file().metadata()?.len())
    }

    /// Flush, fsync, set `mode` and rename into place.
    pub fn commit(mut self, mode: u32) -> io::Result<PathBuf> {
        self.temp.as_file_mut().flush()?;
        self.temp.as_file().sync_all()?;
        fs::set_permissions(self.temp.path(), fs::Permissions::from_mode(mode))?;
        self.temp.persist(&self.dest).map_err(|e| e.error)?;
        Ok(self.dest)
    }
}

impl Write for AtomicOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}
