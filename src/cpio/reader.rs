//! newc stream reader.

use std::borrow::Cow;
use std::io::{self, Read};
use std::str;

use super::{padlen, EntryMeta, NEWC_HDR_LEN, NEWC_MAGIC, PATH_MAX, S_IFDIR, S_IFLNK, S_IFREG, TRAILER_NAME};

/// One decoded archive entry, data included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub ino: u32,
    pub meta: EntryMeta,
    pub devmajor: u32,
    pub devminor: u32,
    pub rdevmajor: u32,
    pub rdevminor: u32,
    pub check: u32,
    /// Name without its NUL terminator.
    pub name: Vec<u8>,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    pub fn is_trailer(&self) -> bool {
        self.name == TRAILER_NAME.as_bytes()
    }

    pub fn is_dir(&self) -> bool {
        self.meta.file_type() == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.meta.file_type() == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.meta.file_type() == S_IFLNK
    }
}

/// Iterator over the entries of an uncompressed newc stream.
///
/// The trailer is yielded like any other entry so callers can check that it
/// is present. Zero padding between entries (e.g. block padding after a
/// trailer, or between concatenated archives) is skipped the way the kernel
/// does it, one 4 byte word at a time.
pub struct NewcReader<R: Read> {
    inner: R,
    failed: bool,
}

impl<R: Read> NewcReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            failed: false,
        }
    }

    /// Read up to `buf.len()` bytes; returns how many were read before EOF.
    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn skip(&mut self, n: u64) -> io::Result<()> {
        let skipped = io::copy(&mut (&mut self.inner).take(n), &mut io::sink())?;
        if skipped != n {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated padding"));
        }
        Ok(())
    }

    fn next_entry(&mut self) -> io::Result<Option<ArchiveEntry>> {
        let mut hdr = [0u8; NEWC_HDR_LEN as usize];

        // skip zero words until a header starts
        loop {
            let n = self.read_full(&mut hdr[..4])?;
            if n == 0 {
                return Ok(None);
            }
            if n < 4 {
                if hdr[..n].iter().all(|b| *b == 0) {
                    return Ok(None);
                }
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated header"));
            }
            if hdr[..4] != [0u8; 4] {
                break;
            }
        }

        if self.read_full(&mut hdr[4..])? != hdr.len() - 4 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated header"));
        }
        if &hdr[..6] != NEWC_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid newc magic"));
        }

        // 13 fields of 8 hex chars after the magic
        let mut fields = [0u32; 13];
        for (i, chunk) in hdr[6..].chunks_exact(8).enumerate() {
            fields[i] = str::from_utf8(chunk)
                .ok()
                .and_then(|s| u32::from_str_radix(s, 16).ok())
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid hdr field"))?;
        }
        let [ino, mode, uid, gid, nlink, mtime, filesize, devmajor, devminor, rdevmajor, rdevminor, namesize, check] =
            fields;

        if namesize == 0 || namesize as usize > PATH_MAX + 1 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid namesize"));
        }

        let mut name = vec![0u8; namesize as usize];
        if self.read_full(&mut name)? != name.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated name"));
        }
        if name.pop() != Some(0) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "name not NUL terminated"));
        }
        self.skip(padlen(NEWC_HDR_LEN + u64::from(namesize), 4))?;

        // filesize is untrusted, so grow the buffer as data actually arrives
        let mut data = Vec::new();
        (&mut self.inner).take(u64::from(filesize)).read_to_end(&mut data)?;
        if data.len() != filesize as usize {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated entry data"));
        }
        self.skip(padlen(u64::from(filesize), 4))?;

        Ok(Some(ArchiveEntry {
            ino,
            meta: EntryMeta {
                mode,
                uid,
                gid,
                nlink,
                mtime,
                filesize,
            },
            devmajor,
            devminor,
            rdevmajor,
            rdevminor,
            check,
            name,
            data,
        }))
    }
}

impl<R: Read> Iterator for NewcReader<R> {
    type Item = io::Result<ArchiveEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
