//! Sysroot merge command.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use sysforge::sysroot::{merge_sysroot, SysrootSpec};

/// Execute the sysroot-merge command.
pub fn cmd_sysroot_merge(base: Option<PathBuf>, overlays: Vec<PathBuf>, output_dir: &Path) -> Result<()> {
    let spec = SysrootSpec { base, overlays };
    let stats = merge_sysroot(&spec, output_dir)
        .with_context(|| format!("Failed to merge sysroot into {}", output_dir.display()))?;

    let total = stats.base.files + stats.overlays.files;
    println!("Merged sysroot: {}", output_dir.display());
    println!(
        "  {} files, {} symlinks, {} directories ({} replaced by overlays)",
        total,
        stats.base.symlinks + stats.overlays.symlinks,
        stats.base.dirs + stats.overlays.dirs,
        stats.overlays.replaced
    );
    Ok(())
}
