//! Initramfs image builder.
//!
//! Serializes a root directory into a newc cpio stream, pipes it through the
//! configured compressor and writes the result atomically: the image is
//! assembled in a hidden temp file next to the destination, fsynced and
//! renamed into place only once the trailer and compressor footer are out.
//! A failed build leaves nothing at the destination.

use std::path::Path;

use super::compression::{Compression, Encoder};
use super::ArtifactReport;
use crate::common::AtomicOutput;
use crate::cpio::{archive_tree, ArchiveOptions};
use crate::error::{Error, IoContext, Result};
use crate::timing::Timer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitramfsOptions {
    pub compression: Compression,
    pub archive: ArchiveOptions,
}

impl InitramfsOptions {
    /// Record every entry as owned by root with the given mtime, for
    /// reproducible images built by unprivileged users.
    pub fn reproducible(mut self, mtime: u32) -> Self {
        self.archive.fixed_mtime = Some(mtime);
        self.archive.fixed_uid = Some(0);
        self.archive.fixed_gid = Some(0);
        self
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct InitramfsReport {
    #[serde(flatten)]
    pub artifact: ArtifactReport,
    /// Archive entries, trailer excluded.
    pub entries: u64,
    pub compression: &'static str,
}

/// Pack `root` into a compressed newc archive at `output`.
pub fn build_initramfs(root: &Path, output: &Path, opts: &InitramfsOptions) -> Result<InitramfsReport> {
    if !root.is_dir() {
        return Err(Error::not_found("initramfs root", root));
    }

    let timer = Timer::start("initramfs archive");
    log::info!(
        "Packing {} ({})",
        root.display(),
        opts.compression
    );

    let mut out = AtomicOutput::create(output)
        .archive_ctx(|| format!("Failed to create temporary file for {}", output.display()))?;

    let encoder = Encoder::new(out.file(), opts.compression)
        .archive_ctx(|| format!("Failed to start {} compressor", opts.compression.name()))?;
    let (encoder, entries) = archive_tree(root, encoder, opts.archive)
        .archive_ctx(|| format!("Failed to archive {}", root.display()))?;
    encoder
        .finish()
        .archive_ctx(|| format!("Failed to finish {} stream", opts.compression.name()))?;

    let path = out
        .commit(0o644)
        .archive_ctx(|| format!("Failed to write {}", output.display()))?;
    let artifact = ArtifactReport::from_path(&path)
        .archive_ctx(|| format!("Failed to read back {}", path.display()))?;

    timer.finish();
    Ok(InitramfsReport {
        artifact,
        entries,
        compression: opts.compression.name(),
    })
}
