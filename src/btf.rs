//! Kernel BTF to C header extraction.
//!
//! BPF CO-RE programs are compiled against a `vmlinux.h` generated from the
//! kernel's BTF type information. The kernel only carries that information
//! when built with `CONFIG_DEBUG_INFO_BTF=y`, and a header generated from a
//! kernel without it is useless, so extraction is gated:
//!
//! ```text
//! KernelImage --validate()--> BtfKernel --dump_header()--> vmlinux.h
//!             \-> Error::Validation (no .BTF section, not ELF)
//! ```
//!
//! The header is written through a temp file and only renamed into place
//! once bpftool succeeded and the result is plausibly sized.

use std::fs::File;
use std::path::{Path, PathBuf};

use elf::endian::AnyEndian;
use elf::ElfStream;

use crate::artifact::ArtifactReport;
use crate::common::AtomicOutput;
use crate::error::{Error, IoContext, Result};
use crate::process::{resolve_tool, Cmd, ToolEnv};

pub const BTF_SECTION: &str = ".BTF";
pub const DEFAULT_BPFTOOL: &str = "bpftool";
pub const DEFAULT_MIN_HEADER_SIZE: u64 = 1024;

/// A kernel image whose BTF data has not been checked yet.
#[derive(Debug, Clone)]
pub struct KernelImage {
    path: PathBuf,
}

/// A kernel image known to carry a non-empty `.BTF` section.
#[derive(Debug, Clone)]
pub struct BtfKernel {
    path: PathBuf,
    btf_size: u64,
}

impl KernelImage {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::not_found("kernel image", path));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look for the `.BTF` section in the ELF section headers.
    pub fn validate(self) -> Result<BtfKernel> {
        let file = File::open(&self.path)
            .archive_ctx(|| format!("Failed to open {}", self.path.display()))?;

        let mut elf = ElfStream::<AnyEndian, _>::open_stream(file).map_err(|e| {
            Error::Validation(format!("{} is not an ELF file: {}", self.path.display(), e))
        })?;

        let section = elf.section_header_by_name(BTF_SECTION).map_err(|e| {
            Error::Validation(format!(
                "failed to read section headers of {}: {}",
                self.path.display(),
                e
            ))
        })?;

        match section {
            Some(shdr) if shdr.sh_size > 0 => {
                log::info!("  BTF data present in {} ({} bytes)", self.path.display(), shdr.sh_size);
                Ok(BtfKernel {
                    btf_size: shdr.sh_size,
                    path: self.path,
                })
            }
            Some(_) => Err(Error::Validation(format!(
                "{} has an empty {} section",
                self.path.display(),
                BTF_SECTION
            ))),
            None => Err(Error::Validation(format!(
                "{} has no {} section. The kernel must be built with CONFIG_DEBUG_INFO_BTF=y",
                self.path.display(),
                BTF_SECTION
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Tool name looked up on PATH, or an explicit path.
    pub bpftool: String,
    /// Headers smaller than this are treated as a silently empty dump.
    pub min_size: u64,
    pub env: ToolEnv,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            bpftool: DEFAULT_BPFTOOL.to_string(),
            min_size: DEFAULT_MIN_HEADER_SIZE,
            env: ToolEnv::from_host(),
        }
    }
}

impl BtfKernel {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn btf_size(&self) -> u64 {
        self.btf_size
    }

    /// Run `bpftool btf dump file <kernel> format c` into `output`.
    pub fn dump_header(&self, output: &Path, opts: &DumpOptions) -> Result<ArtifactReport> {
        let bpftool = resolve_tool(&opts.bpftool)?;

        let mut out = AtomicOutput::create(output)
            .archive_ctx(|| format!("Failed to create temporary file for {}", output.display()))?;
        let stdout = out
            .file()
            .try_clone()
            .archive_ctx(|| "Failed to duplicate output handle".to_string())?;

        log::info!("Generating {} from {}", output.display(), self.path.display());
        Cmd::new(bpftool)
            .args(["btf", "dump", "file"])
            .arg_path(&self.path)
            .args(["format", "c"])
            .env(&opts.env)
            .stdout_to(stdout)
            .run()?;

        // an uncommitted AtomicOutput removes its temp file on drop
        let size = out
            .written()
            .archive_ctx(|| format!("Failed to stat output for {}", output.display()))?;
        if size < opts.min_size {
            return Err(Error::Validation(format!(
                "{} is suspiciously small ({} bytes, expected at least {})",
                output.display(),
                size,
                opts.min_size
            )));
        }

        let path = out
            .commit(0o644)
            .archive_ctx(|| format!("Failed to write {}", output.display()))?;
        ArtifactReport::from_path(&path)
            .archive_ctx(|| format!("Failed to read back {}", path.display()))
    }
}

/// Validate `vmlinux` and generate its C header at `output`.
pub fn generate_btf_header(vmlinux: &Path, output: &Path, opts: &DumpOptions) -> Result<ArtifactReport> {
    KernelImage::open(vmlinux)?.validate()?.dump_header(output, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_kernel_is_input_not_found() {
        let temp = TempDir::new().unwrap();
        let err = KernelImage::open(&temp.path().join("vmlinux")).unwrap_err();
        assert!(matches!(err, Error::InputNotFound { what: "kernel image", .. }));
    }

    #[test]
    fn test_non_elf_rejected() {
        let temp = TempDir::new().unwrap();
        let vmlinux = temp.path().join("vmlinux");
        fs::write(&vmlinux, "definitely not an ELF file").unwrap();

        let err = KernelImage::open(&vmlinux).unwrap().validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_missing_tool_leaves_no_output() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("vmlinux.h");
        let kernel = BtfKernel {
            path: temp.path().join("vmlinux"),
            btf_size: 1,
        };
        let opts = DumpOptions {
            bpftool: temp.path().join("no-such-bpftool").display().to_string(),
            ..DumpOptions::default()
        };

        let err = kernel.dump_header(&output, &opts).unwrap_err();

        assert!(matches!(err, Error::InputNotFound { what: "tool", .. }));
        assert!(!output.exists());
    }
}
