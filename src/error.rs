//! Error kinds shared by every assembly operation.
//!
//! The library returns [`Error`]; the command layer wraps it in `anyhow`
//! with call-site context before it reaches the terminal.

use std::io;
use std::path::{Path, PathBuf};

/// Library result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request itself is unusable (e.g. no inputs at all).
    #[error("{0}")]
    Configuration(String),

    /// A declared input does not exist.
    #[error("{what} not found: {}", .path.display())]
    InputNotFound { what: &'static str, path: PathBuf },

    /// Filesystem failure while building a merged tree.
    #[error("{context}")]
    MergeConstruction {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Enumeration, serialization or compression failure.
    #[error("{context}")]
    ArchiveConstruction {
        context: String,
        #[source]
        source: io::Error,
    },

    /// An external tool ran but did not succeed.
    #[error("{tool} failed (exit code {code}){}", stderr_suffix(.stderr))]
    ToolFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    /// A produced or consumed artifact failed a correctness gate.
    #[error("{0}")]
    Validation(String),
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(":\n{}", stderr)
    }
}

impl Error {
    pub fn not_found(what: &'static str, path: &Path) -> Self {
        Error::InputNotFound {
            what,
            path: path.to_path_buf(),
        }
    }

    pub(crate) fn merge(context: impl Into<String>, source: io::Error) -> Self {
        Error::MergeConstruction {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn archive(context: impl Into<String>, source: io::Error) -> Self {
        Error::ArchiveConstruction {
            context: context.into(),
            source,
        }
    }
}

/// Attach a path-bearing message to an `io::Result`, producing the
/// construction error appropriate for the caller.
pub(crate) trait IoContext<T> {
    fn merge_ctx<F: FnOnce() -> String>(self, f: F) -> Result<T>;
    fn archive_ctx<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn merge_ctx<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::merge(f(), e))
    }

    fn archive_ctx<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::archive(f(), e))
    }
}
