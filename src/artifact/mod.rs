//! Build artifacts: compressed initramfs images and their verification.
//!
//! - `compression` - gzip/zstd encoders and magic-sniffing decoders
//! - `initramfs` - pack a root directory into a compressed newc archive
//! - `staging` - prepare a rootfs (lib64, /init) before packing
//! - `verify` - size, trailer and placeholder checks for built images

pub mod compression;
pub mod initramfs;
pub mod staging;
pub mod verify;

pub use compression::{open_decompressed, Compression};
pub use initramfs::{build_initramfs, InitramfsOptions, InitramfsReport};
pub use staging::{build_initramfs_from_rootfs, stage_rootfs, StagingOptions};
pub use verify::{verify_boot_script, verify_initramfs, ArchiveReport, VerifyOptions};

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Where an artifact landed, how big it is and its digest.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ArtifactReport {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

impl ArtifactReport {
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;

        Ok(Self {
            path: path.to_path_buf(),
            size,
            sha256: format!("{:x}", hasher.finalize()),
        })
    }
}

impl fmt::Display for ArtifactReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Output: {}", self.path.display())?;
        writeln!(f, "  Size: {} KB", self.size / 1024)?;
        write!(f, "  SHA256: {}", self.sha256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_artifact_report_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a");
        std::fs::write(&path, "abc").unwrap();

        let report = ArtifactReport::from_path(&path).unwrap();

        assert_eq!(report.size, 3);
        assert_eq!(
            report.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
