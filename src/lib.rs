//! sysforge - filesystem and image assembly for OS build pipelines.
//!
//! Turns independently built trees into deployable artifacts:
//! - merged sysroots for later compilation stages (`sysroot`)
//! - compressed newc initramfs images (`artifact`, `cpio`)
//! - `vmlinux.h` headers generated from kernel BTF data (`btf`)

pub mod artifact;
pub mod btf;
pub mod common;
pub mod config;
pub mod cpio;
pub mod error;
pub mod process;
pub mod sysroot;
pub mod timing;

pub use error::{Error, Result};
