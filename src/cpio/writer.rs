//! newc serializer.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use walkdir::WalkDir;

use super::{padlen, EntryMeta, NEWC_HDR_LEN, PATH_MAX, S_IFBLK, S_IFCHR, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, TRAILER_NAME};

macro_rules! NEWC_HDR_FMT {
    () => {
        concat!(
            "070701{ino:08X}{mode:08X}{uid:08X}{gid:08X}{nlink:08X}",
            "{mtime:08X}{filesize:08X}{major:08X}{minor:08X}{rmajor:08X}",
            "{rminor:08X}{namesize:08X}{chksum:08X}"
        )
    };
}

const ZEROS: [u8; 4] = [0; 4];

/// Knobs for how source metadata lands in archive headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// First inode number; each entry takes the next one, so the archive
    /// doesn't depend on source inode numbers.
    pub initial_ino: u32,
    /// mtime, uid and gid to record instead of the values reported by stat.
    pub fixed_mtime: Option<u32>,
    pub fixed_uid: Option<u32>,
    pub fixed_gid: Option<u32>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            initial_ino: 0, // match GNU cpio numbering
            fixed_mtime: None,
            fixed_uid: None,
            fixed_gid: None,
        }
    }
}

impl ArchiveOptions {
    /// Header metadata for a file with the given stat result.
    pub fn entry_meta(&self, md: &fs::Metadata) -> io::Result<EntryMeta> {
        let mtime = match self.fixed_mtime {
            Some(t) => t,
            // check for 2106 epoch overflow
            None => u32::try_from(md.mtime()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "mtime does not fit in a newc header")
            })?,
        };

        let mode = md.mode();
        let nlink = match mode & S_IFMT {
            // hardlinks are archived as independent files
            S_IFREG => 1,
            _ => u32::try_from(md.nlink())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "nlink too large"))?,
        };

        let filesize = match mode & S_IFMT {
            S_IFREG | S_IFLNK => u32::try_from(md.len()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "file too large for newc")
            })?,
            _ => 0,
        };

        Ok(EntryMeta {
            mode,
            uid: self.fixed_uid.unwrap_or_else(|| md.uid()),
            gid: self.fixed_gid.unwrap_or_else(|| md.gid()),
            nlink,
            mtime,
            filesize,
        })
    }
}

/// Streaming newc writer.
///
/// Entries are written in the order they are appended; [`NewcWriter::finish`]
/// appends the trailer and hands back the inner writer.
pub struct NewcWriter<W: Write> {
    inner: W,
    opts: ArchiveOptions,
    // offset from the start of this archive
    off: u64,
    // next inode number to hand out
    ino: u32,
    entries: u64,
}

impl<W: Write> NewcWriter<W> {
    pub fn new(inner: W, opts: ArchiveOptions) -> Self {
        Self {
            inner,
            off: 0,
            ino: opts.initial_ino,
            opts,
            entries: 0,
        }
    }

    /// Entries written so far, not counting the trailer.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    fn pad(&mut self) -> io::Result<()> {
        let n = padlen(self.off, 4) as usize;
        self.inner.write_all(&ZEROS[..n])?;
        self.off += n as u64;
        Ok(())
    }

    fn write_header(&mut self, name: &[u8], ino: u32, md: &EntryMeta) -> io::Result<()> {
        if name.is_empty() || name.contains(&0) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid entry name"));
        }
        if name.len() + 1 >= PATH_MAX {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "path too long"));
        }

        write!(
            self.inner,
            NEWC_HDR_FMT!(),
            ino = ino,
            mode = md.mode,
            uid = md.uid,
            gid = md.gid,
            nlink = md.nlink,
            mtime = md.mtime,
            filesize = md.filesize,
            major = 0,
            minor = 0,
            rmajor = 0,
            rminor = 0,
            namesize = name.len() + 1,
            chksum = 0
        )?;
        self.inner.write_all(name)?;
        self.inner.write_all(&[0])?;
        self.off += NEWC_HDR_LEN + name.len() as u64 + 1;
        self.pad()
    }

    fn next_ino(&mut self) -> u32 {
        let ino = self.ino;
        self.ino = self.ino.wrapping_add(1);
        ino
    }

    fn check_type(md: &EntryMeta, expected: u32) -> io::Result<()> {
        if md.file_type() != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("mode {:o} does not match entry kind", md.mode),
            ));
        }
        Ok(())
    }

    /// Append a header-only entry (directory, fifo, socket, device).
    pub fn append_dir(&mut self, name: &[u8], md: &EntryMeta) -> io::Result<()> {
        Self::check_type(md, S_IFDIR)?;
        self.append_special(name, md)
    }

    /// Append an entry without data. Device numbers are always written as 0.
    pub fn append_special(&mut self, name: &[u8], md: &EntryMeta) -> io::Result<()> {
        if matches!(md.file_type(), S_IFREG | S_IFLNK) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "data-bearing entries need append_file or append_symlink",
            ));
        }
        let md = EntryMeta { filesize: 0, ..*md };
        let ino = self.next_ino();
        self.write_header(name, ino, &md)?;
        self.entries += 1;
        Ok(())
    }

    /// Append a symlink; the target is stored verbatim, without terminator.
    pub fn append_symlink(&mut self, name: &[u8], md: &EntryMeta, target: &[u8]) -> io::Result<()> {
        Self::check_type(md, S_IFLNK)?;
        if target.len() >= PATH_MAX {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "symlink path too long"));
        }
        let md = EntryMeta {
            filesize: target.len() as u32,
            ..*md
        };
        let ino = self.next_ino();
        self.write_header(name, ino, &md)?;
        self.inner.write_all(target)?;
        self.off += target.len() as u64;
        self.pad()?;
        self.entries += 1;
        Ok(())
    }

    /// Append a regular file whose content is exactly `md.filesize` bytes of
    /// `reader`. A short or long reader is an error, never a silently
    /// truncated entry.
    pub fn append_file<R: Read>(&mut self, name: &[u8], md: &EntryMeta, mut reader: R) -> io::Result<()> {
        Self::check_type(md, S_IFREG)?;
        let ino = self.next_ino();
        self.write_header(name, ino, md)?;

        let len = u64::from(md.filesize);
        let copied = io::copy(&mut (&mut reader).take(len), &mut self.inner)?;
        if copied != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file shrank while archiving ({} of {} bytes)", copied, len),
            ));
        }
        let mut extra = [0u8; 1];
        if reader.read(&mut extra)? != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "file grew while archiving",
            ));
        }
        self.off += len;
        self.pad()?;
        self.entries += 1;
        Ok(())
    }

    /// stat `path` (without following symlinks) and append it as `name`.
    pub fn append_path(&mut self, name: &[u8], path: &Path) -> io::Result<()> {
        let stat = fs::symlink_metadata(path)?;
        let md = self.opts.entry_meta(&stat)?;

        match md.file_type() {
            S_IFREG => {
                if stat.nlink() > 1 {
                    log::warn!(
                        "{} (nlink={}) hardlink file data will be duplicated",
                        path.display(),
                        stat.nlink()
                    );
                }
                self.append_file(name, &md, File::open(path)?)
            }
            S_IFLNK => {
                let target = fs::read_link(path)?;
                self.append_symlink(name, &md, target.as_os_str().as_bytes())
            }
            S_IFDIR => self.append_dir(name, &md),
            S_IFBLK | S_IFCHR => {
                log::warn!("{}: device numbers are not archived, writing 0:0", path.display());
                self.append_special(name, &md)
            }
            _ => self.append_special(name, &md),
        }
    }

    /// Append the `TRAILER!!!` entry and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        let md = EntryMeta {
            mode: 0,
            uid: 0,
            gid: 0,
            nlink: 1,
            mtime: 0,
            filesize: 0,
        };
        self.write_header(TRAILER_NAME.as_bytes(), 0, &md)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Archive name for a path relative to the archive root: `.` for the root
/// itself, otherwise the relative path without any `./` prefix.
pub fn entry_name(rel: &Path) -> &[u8] {
    let rel = rel.strip_prefix(".").unwrap_or(rel);
    let bytes = rel.as_os_str().as_bytes();
    if bytes.is_empty() {
        b"."
    } else {
        bytes
    }
}

/// Serialize the tree under `root` depth-first, children in lexical order,
/// followed by the trailer. Returns the inner writer and the entry count.
///
/// A symlinked `root` is resolved first, so `.` is always the directory it
/// points at.
pub fn archive_tree<W: Write>(root: &Path, writer: W, opts: ArchiveOptions) -> io::Result<(W, u64)> {
    let root = &fs::canonicalize(root)?;
    let mut archive = NewcWriter::new(writer, opts);

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let name = entry_name(rel);

        archive.append_path(name, entry.path()).map_err(|e| {
            io::Error::new(e.kind(), format!("{}: {}", entry.path().display(), e))
        })?;
    }

    let entries = archive.entries();
    Ok((archive.finish()?, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpio::reader::NewcReader;
    use std::io::Cursor;
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::TempDir;

    fn dir_meta() -> EntryMeta {
        EntryMeta {
            mode: S_IFDIR | 0o755,
            uid: 1,
            gid: 2,
            nlink: 2,
            mtime: 3,
            filesize: 0,
        }
    }

    #[test]
    fn test_header_layout() {
        let mut w = NewcWriter::new(Vec::new(), ArchiveOptions::default());
        w.append_dir(b"hello", &dir_meta()).unwrap();
        let out = w.finish().unwrap();

        let hdr = std::str::from_utf8(&out[..NEWC_HDR_LEN as usize]).unwrap();
        assert_eq!(
            hdr,
            concat!(
                "070701", "00000000", "000041ED", "00000001", "00000002", "00000002",
                "00000003", "00000000", "00000000", "00000000", "00000000", "00000000",
                "00000006", "00000000"
            )
        );
        // 110 + "hello\0" = 116, already aligned
        assert_eq!(&out[110..116], b"hello\0");
        assert_eq!(&out[116..122], b"070701");
    }

    #[test]
    fn test_trailer_terminates_archive() {
        let out = NewcWriter::new(Vec::new(), ArchiveOptions::default()).finish().unwrap();

        // 110 + 11 name bytes, padded to 124
        assert_eq!(out.len(), 124);
        assert_eq!(&out[110..121], b"TRAILER!!!\0");
        assert!(out[121..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_symlink_and_file_padding() {
        let mut w = NewcWriter::new(Vec::new(), ArchiveOptions::default());
        let link = EntryMeta { mode: S_IFLNK | 0o777, nlink: 1, ..dir_meta() };
        let file = EntryMeta { mode: S_IFREG | 0o644, nlink: 1, filesize: 5, ..dir_meta() };

        w.append_symlink(b"sh", &link, b"busybox").unwrap();
        w.append_file(b"a", &file, Cursor::new(b"hello")).unwrap();
        assert_eq!(w.entries(), 2);

        let out = w.finish().unwrap();
        // 110 + "sh\0" -> 116, + 7 data bytes -> 124
        assert_eq!(&out[124..130], b"070701");
        // 124 + 110 + "a\0" = 236, + 5 data bytes -> 244
        assert_eq!(&out[244..250], b"070701");
        assert_eq!(out.len() % 4, 0);
        let entries: Vec<_> = NewcReader::new(Cursor::new(out))
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(entries[0].data, b"busybox");
        assert_eq!(entries[0].ino, 0);
        assert_eq!(entries[1].data, b"hello");
        assert_eq!(entries[1].ino, 1);
        assert!(entries[2].is_trailer());
    }

    #[test]
    fn test_short_file_is_error() {
        let mut w = NewcWriter::new(Vec::new(), ArchiveOptions::default());
        let file = EntryMeta { mode: S_IFREG | 0o644, nlink: 1, filesize: 10, ..dir_meta() };
        let err = w.append_file(b"a", &file, Cursor::new(b"short")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_long_file_is_error() {
        let mut w = NewcWriter::new(Vec::new(), ArchiveOptions::default());
        let file = EntryMeta { mode: S_IFREG | 0o644, nlink: 1, filesize: 2, ..dir_meta() };
        assert!(w.append_file(b"a", &file, Cursor::new(b"longer")).is_err());
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut w = NewcWriter::new(Vec::new(), ArchiveOptions::default());
        let file = EntryMeta { mode: S_IFREG | 0o644, ..dir_meta() };
        assert!(w.append_dir(b"a", &file).is_err());
        assert!(w.append_special(b"a", &file).is_err());
        assert!(w.append_symlink(b"a", &dir_meta(), b"x").is_err());
    }

    #[test]
    fn test_entry_name() {
        assert_eq!(entry_name(Path::new("")), b".");
        assert_eq!(entry_name(Path::new(".")), b".");
        assert_eq!(entry_name(Path::new("./bin/sh")), b"bin/sh");
        assert_eq!(entry_name(Path::new("bin/sh")), b"bin/sh");
    }

    #[test]
    fn test_archive_tree_order_and_fixed_metadata() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("a/z"), "z").unwrap();
        fs::write(root.join("a/y"), "y").unwrap();
        symlink("a/y", root.join("c")).unwrap();
        fs::set_permissions(root.join("a/y"), fs::Permissions::from_mode(0o600)).unwrap();

        let opts = ArchiveOptions {
            fixed_mtime: Some(42),
            fixed_uid: Some(0),
            fixed_gid: Some(0),
            ..ArchiveOptions::default()
        };
        let (out, count) = archive_tree(root, Vec::new(), opts).unwrap();
        assert_eq!(count, 6);

        let entries: Vec<_> = NewcReader::new(Cursor::new(out))
            .collect::<io::Result<_>>()
            .unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name_lossy().into_owned()).collect();
        assert_eq!(names, [".", "a", "a/y", "a/z", "b", "c", "TRAILER!!!"]);
        assert!(entries.iter().all(|e| e.meta.mtime == 42 || e.is_trailer()));
        assert!(entries.iter().all(|e| e.meta.uid == 0 && e.meta.gid == 0));
        assert_eq!(entries[2].meta.permissions(), 0o600);
    }

    #[test]
    fn test_archive_tree_resolves_symlinked_root() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("real/bin")).unwrap();
        fs::write(temp.path().join("real/bin/x"), "x").unwrap();
        let root = temp.path().join("root");
        symlink("real", &root).unwrap();

        let (out, count) = archive_tree(&root, Vec::new(), ArchiveOptions::default()).unwrap();
        assert_eq!(count, 3);

        let entries: Vec<_> = NewcReader::new(Cursor::new(out))
            .collect::<io::Result<_>>()
            .unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name_lossy().into_owned()).collect();
        assert_eq!(names, [".", "bin", "bin/x", "TRAILER!!!"]);
        assert!(entries[0].is_dir());
        assert!(!entries.iter().any(|e| e.is_symlink()));
    }
}
