//! Verification commands.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use sysforge::artifact::verify::inspect_initramfs;
use sysforge::artifact::{verify_boot_script, VerifyOptions};
use sysforge::config::Config;

/// Execute the verify-initramfs command.
pub fn cmd_verify_initramfs(
    image: &Path,
    min_size: Option<u64>,
    boot: bool,
    required_vars: Vec<String>,
    json: bool,
    config: &Config,
) -> Result<()> {
    let opts = VerifyOptions {
        min_size: min_size.unwrap_or(config.min_initramfs_size),
        boot,
        required_vars,
    };

    let report = inspect_initramfs(image, &opts)
        .with_context(|| format!("Failed to inspect {}", image.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Verifying {} ({}, {} bytes)", image.display(), report.compression, report.size);
        println!(
            "  {} entries: {} files, {} directories, {} symlinks, {} special",
            report.entries, report.files, report.dirs, report.symlinks, report.special
        );
        if boot {
            println!("  /init present: {}", if report.has_init { "yes" } else { "no" });
            println!("  Scripts checked: {}", report.scripts_checked);
        }
    }

    report.into_result()?;
    if !json {
        println!("  [OK] {}", image.display());
    }
    Ok(())
}

/// Execute the verify-boot-script command.
pub fn cmd_verify_boot_script(script: &Path, required_vars: Vec<String>) -> Result<()> {
    let content = fs::read_to_string(script)
        .with_context(|| format!("Failed to read boot script {}", script.display()))?;

    verify_boot_script(&content, &required_vars)
        .with_context(|| format!("{} has unresolved references", script.display()))?;

    println!("  [OK] {}", script.display());
    Ok(())
}
