//! Post-build verification of initramfs images and boot scripts.
//!
//! A build tool exiting 0 doesn't mean the artifact is usable. These checks
//! catch the failures that have actually bitten: truncated or empty images,
//! archives missing their trailer, and boot scripts that still reference
//! build-system placeholders instead of resolved paths.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;

use super::compression::open_decompressed;
use crate::cpio::NewcReader;
use crate::error::{Error, IoContext, Result};

pub const DEFAULT_MIN_INITRAMFS_SIZE: u64 = 1024;

/// Tokens left behind by the build system when an artifact reference was
/// never substituted.
pub const PLACEHOLDER_TOKENS: &[&str] = &["<build artifact", "PLACEHOLDER", "{{"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOptions {
    pub min_size: u64,
    /// Treat the image as bootable: require `/init` and scan scripts.
    pub boot: bool,
    /// Variables `/init` must assign a concrete value (e.g. `KERNEL`).
    pub required_vars: Vec<String>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_INITRAMFS_SIZE,
            boot: false,
            required_vars: Vec::new(),
        }
    }
}

/// What an image contains and everything wrong with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ArchiveReport {
    pub path: PathBuf,
    pub size: u64,
    pub compression: &'static str,
    /// Entries before the trailer.
    pub entries: u64,
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub special: u64,
    pub trailers: u64,
    pub scripts_checked: u64,
    pub has_init: bool,
    pub problems: Vec<String>,
}

impl ArchiveReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }

    /// Turn collected problems into a validation error.
    pub fn into_result(self) -> Result<Self> {
        if self.is_ok() {
            return Ok(self);
        }
        Err(Error::Validation(format!(
            "{} failed verification:\n  {}",
            self.path.display(),
            self.problems.join("\n  ")
        )))
    }
}

/// Read `path` and collect everything wrong with it.
///
/// Only a missing or unreadable file is an error here; archive defects end
/// up in [`ArchiveReport::problems`].
pub fn inspect_initramfs(path: &Path, opts: &VerifyOptions) -> Result<ArchiveReport> {
    if !path.is_file() {
        return Err(Error::not_found("initramfs", path));
    }

    let mut report = ArchiveReport {
        path: path.to_path_buf(),
        ..ArchiveReport::default()
    };
    report.size = path
        .metadata()
        .archive_ctx(|| format!("Failed to stat {}", path.display()))?
        .len();
    if report.size < opts.min_size {
        report.problems.push(format!(
            "suspiciously small: {} bytes (expected at least {})",
            report.size, opts.min_size
        ));
    }

    let (format, reader) =
        open_decompressed(path).archive_ctx(|| format!("Failed to open {}", path.display()))?;
    report.compression = format;

    let mut scripts: BTreeMap<String, String> = BTreeMap::new();
    let mut links: BTreeMap<String, String> = BTreeMap::new();
    let mut after_trailer = false;

    for entry in NewcReader::new(reader) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                report.problems.push(format!("not a valid newc archive: {}", e));
                break;
            }
        };

        if entry.is_trailer() {
            report.trailers += 1;
            after_trailer = true;
            continue;
        }
        if after_trailer {
            report.problems.push(format!(
                "entry {} follows the trailer",
                entry.name_lossy()
            ));
            after_trailer = false;
        }

        report.entries += 1;
        let name = entry.name_lossy().trim_start_matches("./").to_string();
        if name == "init" {
            report.has_init = true;
        }

        if entry.is_file() {
            report.files += 1;
            if opts.boot && (name == "init" || entry.data.starts_with(b"#!")) {
                scripts.insert(name, String::from_utf8_lossy(&entry.data).into_owned());
            }
        } else if entry.is_dir() {
            report.dirs += 1;
        } else if entry.is_symlink() {
            report.symlinks += 1;
            links.insert(name, String::from_utf8_lossy(&entry.data).into_owned());
        } else {
            report.special += 1;
        }
    }

    if report.trailers != 1 {
        report.problems.push(format!(
            "expected exactly one {} entry, found {}",
            crate::cpio::TRAILER_NAME,
            report.trailers
        ));
    }

    if opts.boot {
        check_boot_content(&mut report, &scripts, &links, &opts.required_vars);
    }

    Ok(report)
}

fn check_boot_content(
    report: &mut ArchiveReport,
    scripts: &BTreeMap<String, String>,
    links: &BTreeMap<String, String>,
    required_vars: &[String],
) {
    if !report.has_init {
        report.problems.push("no /init entry point".to_string());
    }

    for (name, content) in scripts {
        report.scripts_checked += 1;
        for line in placeholder_lines(content) {
            report.problems.push(format!("/{}: {}", name, line));
        }
    }

    if required_vars.is_empty() {
        return;
    }
    // /init is often a symlink to the real script
    let mut init = "init".to_string();
    for _ in 0..8 {
        match links.get(&init) {
            Some(target) => init = target.trim_start_matches('/').to_string(),
            None => break,
        }
    }
    match scripts.get(&init) {
        Some(content) => {
            for var in required_vars {
                if let Err(e) = check_var(content, var) {
                    report.problems.push(format!("/{}: {}", init, e));
                }
            }
        }
        None => report.problems.push(format!(
            "cannot check {}: /init does not resolve to a script",
            required_vars.join(", ")
        )),
    }
}

/// Lines containing an unresolved placeholder, prefixed with line numbers.
fn placeholder_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| PLACEHOLDER_TOKENS.iter().any(|t| line.contains(t)))
        .map(|(i, line)| format!("line {}: unresolved placeholder: {}", i + 1, line.trim()))
        .collect()
}

/// Strip one level of matching single or double quotes.
fn unquote(value: &str) -> &str {
    let value = value.trim();
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// `var` must be assigned, non-empty and free of placeholders.
fn check_var(content: &str, var: &str) -> std::result::Result<(), String> {
    let pattern = format!(r"(?m)^\s*(?:export\s+)?{}=(.*)$", regex::escape(var));
    let re = Regex::new(&pattern).map_err(|e| format!("invalid variable name {}: {}", var, e))?;

    let Some(caps) = re.captures(content) else {
        return Err(format!("{} is not assigned", var));
    };
    let value = unquote(caps.get(1).map_or("", |m| m.as_str()));
    if value.is_empty() {
        return Err(format!("{} is empty", var));
    }
    if PLACEHOLDER_TOKENS.iter().any(|t| value.contains(t)) {
        return Err(format!("{} is unresolved: {}", var, value));
    }
    Ok(())
}

/// Verify an initramfs image; any problem is a validation failure.
pub fn verify_initramfs(path: &Path, opts: &VerifyOptions) -> Result<ArchiveReport> {
    inspect_initramfs(path, opts)?.into_result()
}

/// Verify a standalone boot script.
pub fn verify_boot_script(content: &str, required_vars: &[String]) -> Result<()> {
    let mut problems = placeholder_lines(content);
    for var in required_vars {
        if let Err(e) = check_var(content, var) {
            problems.push(e);
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "boot script failed verification:\n  {}",
            problems.join("\n  ")
        )))
    }
}
