//! Extract command - unpacks an image for inspection.

use anyhow::{Context, Result};
use std::path::Path;

use sysforge::artifact::open_decompressed;
use sysforge::cpio::extract_archive;

/// Execute the extract-initramfs command.
pub fn cmd_extract(image: &Path, output_dir: &Path) -> Result<()> {
    if !image.is_file() {
        anyhow::bail!("Image not found: {}", image.display());
    }

    let (format, reader) = open_decompressed(image)
        .with_context(|| format!("Failed to open {}", image.display()))?;
    println!("Extracting {} ({}) to {}...", image.display(), format, output_dir.display());

    let stats = extract_archive(reader, output_dir)
        .with_context(|| format!("Failed to extract {}", image.display()))?;

    println!(
        "Extracted {} files, {} symlinks, {} directories",
        stats.files, stats.symlinks, stats.dirs
    );
    if stats.skipped > 0 {
        println!("  Skipped {} device/fifo/socket entries", stats.skipped);
    }
    Ok(())
}
