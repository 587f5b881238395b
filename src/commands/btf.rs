//! BTF header command.

use anyhow::{Context, Result};
use std::path::Path;

use sysforge::btf::{generate_btf_header, DumpOptions};
use sysforge::config::Config;
use sysforge::process::ToolEnv;

/// Execute the btf-headers command.
pub fn cmd_btf_headers(vmlinux: &Path, output: &Path, bpftool: Option<String>, config: &Config) -> Result<()> {
    let opts = DumpOptions {
        bpftool: bpftool.unwrap_or_else(|| config.bpftool.clone()),
        min_size: config.min_header_size,
        env: ToolEnv::from_host(),
    };

    let report = generate_btf_header(vmlinux, output, &opts)
        .with_context(|| format!("Failed to generate {} from {}", output.display(), vmlinux.display()))?;

    println!("\n=== BTF Header Complete ===");
    println!("{}", report);
    Ok(())
}
