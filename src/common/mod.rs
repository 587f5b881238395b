//! Shared filesystem primitives.

pub mod copy;
pub mod files;

pub use copy::{clear_path, copy_entry, copy_tree, CopyStats, EntryKind};
pub use files::{write_file_mode, AtomicOutput};
