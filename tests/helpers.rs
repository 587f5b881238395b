//! Shared test utilities for sysforge tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Test environment with a temporary directory for inputs and outputs.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Root of the temporary directory
    pub base_dir: PathBuf,
}

impl TestEnv {
    /// Create a new test environment with a temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();
        Self {
            _temp_dir: temp_dir,
            base_dir,
        }
    }

    /// Path of `name` inside the environment (not created).
    pub fn path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Create and return directory `name` inside the environment.
    pub fn dir(&self, name: &str) -> PathBuf {
        let dir = self.path(name);
        fs::create_dir_all(&dir).expect("Failed to create dir");
        dir
    }
}

/// Write a file, creating parent directories as needed.
pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write file");
}

/// Write a file with specific permissions.
pub fn write_file_mode(path: &Path, content: &str, mode: u32) {
    write_file(path, content);
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("Failed to set permissions");
}

/// Create a mock executable binary file.
pub fn create_mock_binary(path: &Path) {
    write_file_mode(path, "#!/bin/sh\necho mock\n", 0o755);
}

/// Create a symlink, creating parent directories as needed.
pub fn create_symlink(target: &str, link: &Path) {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    std::os::unix::fs::symlink(target, link).expect("Failed to create symlink");
}

/// Assert that a symlink exists and points to the expected target.
pub fn assert_symlink(path: &Path, expected_target: &str) {
    assert!(
        path.is_symlink(),
        "Expected symlink at {}, but it's not a symlink",
        path.display()
    );
    let target = fs::read_link(path).expect("Failed to read symlink");
    assert_eq!(
        target.to_string_lossy(),
        expected_target,
        "Symlink {} points to {:?}, expected {}",
        path.display(),
        target,
        expected_target
    );
}

/// Assert that a file has exactly the expected content.
pub fn assert_file_content(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read file {}: {}", path.display(), e));
    assert_eq!(content, expected, "Unexpected content in {}", path.display());
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read file {}: {}", path.display(), e));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}

/// Assert that a directory exists.
pub fn assert_dir_exists(path: &Path) {
    assert!(path.is_dir(), "Expected directory to exist: {}", path.display());
}

/// Permission bits of a path (not following symlinks).
pub fn mode_of(path: &Path) -> u32 {
    fs::symlink_metadata(path)
        .expect("Failed to stat")
        .permissions()
        .mode()
        & 0o7777
}

/// One node of a tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Dir(u32),
    File(u32, Vec<u8>),
    Symlink(PathBuf),
}

/// Every entry below `root`, keyed by relative path.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Node> {
    let mut tree = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.expect("Failed to walk tree");
        let rel = entry.path().strip_prefix(root).unwrap().to_path_buf();
        let ft = entry.file_type();
        let node = if ft.is_symlink() {
            Node::Symlink(fs::read_link(entry.path()).unwrap())
        } else if ft.is_dir() {
            Node::Dir(mode_of(entry.path()))
        } else {
            Node::File(mode_of(entry.path()), fs::read(entry.path()).unwrap())
        };
        tree.insert(rel, node);
    }
    tree
}

/// A minimal little-endian ELF64 file with one data section per name
/// (plus the null section and `.shstrtab`).
pub fn minimal_elf(section_names: &[&str]) -> Vec<u8> {
    const EHDR: usize = 64;
    const SHDR: usize = 64;
    let payload = b"\x9f\xeb\x01\x00BTF!";

    // section data
    let mut body = Vec::new();
    let mut data_offsets = Vec::new();
    for _ in section_names {
        data_offsets.push(EHDR + body.len());
        body.extend_from_slice(payload);
    }

    // string table
    let mut strtab = vec![0u8];
    let mut name_offsets = Vec::new();
    for name in section_names {
        name_offsets.push(strtab.len() as u32);
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
    }
    let shstrtab_name = strtab.len() as u32;
    strtab.extend_from_slice(b".shstrtab\0");
    let strtab_offset = EHDR + body.len();
    body.extend_from_slice(&strtab);
    while body.len() % 8 != 0 {
        body.push(0);
    }

    let shnum = section_names.len() + 2;
    let shoff = EHDR + body.len();

    let mut out = Vec::new();
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&2u16.to_le_bytes()); // e_type: EXEC
    out.extend_from_slice(&62u16.to_le_bytes()); // e_machine: x86_64
    out.extend_from_slice(&1u32.to_le_bytes()); // e_version
    out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
    out.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
    out.extend_from_slice(&(shoff as u64).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHDR as u16).to_le_bytes());
    out.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&(SHDR as u16).to_le_bytes());
    out.extend_from_slice(&(shnum as u16).to_le_bytes());
    out.extend_from_slice(&((shnum - 1) as u16).to_le_bytes()); // e_shstrndx
    assert_eq!(out.len(), EHDR);
    out.extend_from_slice(&body);

    let mut shdr = |name: u32, sh_type: u32, offset: usize, size: usize| {
        out.extend_from_slice(&name.to_le_bytes());
        out.extend_from_slice(&sh_type.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_flags
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
        out.extend_from_slice(&(offset as u64).to_le_bytes());
        out.extend_from_slice(&(size as u64).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // sh_link
        out.extend_from_slice(&0u32.to_le_bytes()); // sh_info
        out.extend_from_slice(&1u64.to_le_bytes()); // sh_addralign
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_entsize
    };

    shdr(0, 0, 0, 0);
    for (i, off) in data_offsets.iter().enumerate() {
        shdr(name_offsets[i], 1, *off, payload.len());
    }
    shdr(shstrtab_name, 3, strtab_offset, strtab.len());

    out
}

/// Write an executable shell script standing in for an external tool.
pub fn fake_tool(path: &Path, body: &str) {
    write_file_mode(path, &format!("#!/bin/sh\n{}\n", body), 0o755);
}
