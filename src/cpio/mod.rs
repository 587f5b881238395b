//! Native cpio "newc" archive support.
//!
//! newc is the ASCII-hex header format the Linux kernel unpacks initramfs
//! images from. Each entry is a 110 byte header, a NUL-terminated name and
//! the entry data, with the header+name block and the data block each padded
//! to a 4 byte boundary. Every archive ends with a zero-size `TRAILER!!!`
//! entry.
//!
//! - [`writer`] - serialize a directory tree
//! - [`reader`] - iterate over the entries of an archive stream
//! - [`extract`] - recreate an archive's tree on disk

pub mod extract;
pub mod reader;
pub mod writer;

pub use extract::{extract_archive, ExtractStats};
pub use reader::{ArchiveEntry, NewcReader};
pub use writer::{archive_tree, ArchiveOptions, NewcWriter};

pub const NEWC_MAGIC: &[u8; 6] = b"070701";
pub const NEWC_HDR_LEN: u64 = 110;
pub const TRAILER_NAME: &str = "TRAILER!!!";
pub const PATH_MAX: usize = 4096;

// format: octal posix mode bits
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFMT: u32 = 0o170000;

/// Header metadata of one archive entry.
///
/// Device numbers are not carried: this crate always writes them as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u32,
    pub filesize: u32,
}

impl EntryMeta {
    pub fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }

    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Bytes of zero padding needed to bring `off` to a multiple of `alignment`.
pub fn padlen(off: u64, alignment: u64) -> u64 {
    (alignment - (off & (alignment - 1))) % alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padlen() {
        assert_eq!(padlen(0, 4), 0);
        assert_eq!(padlen(1, 4), 3);
        assert_eq!(padlen(2, 4), 2);
        assert_eq!(padlen(3, 4), 1);
        assert_eq!(padlen(4, 4), 0);
        // header + "TRAILER!!!\0"
        assert_eq!(padlen(NEWC_HDR_LEN + 11, 4), 3);
    }

    #[test]
    fn test_entry_meta_accessors() {
        let md = EntryMeta {
            mode: S_IFREG | 0o4755,
            uid: 0,
            gid: 0,
            nlink: 1,
            mtime: 0,
            filesize: 0,
        };
        assert_eq!(md.file_type(), S_IFREG);
        assert_eq!(md.permissions(), 0o4755);
    }
}
