//! CLI command handlers.
//!
//! Each submodule handles one family of CLI commands:
//! - `merge` - Build a sysroot from a base and overlays
//! - `initramfs` - Pack a directory or staged rootfs into an image
//! - `btf` - Generate vmlinux.h from kernel BTF data
//! - `verify` - Check images and boot scripts
//! - `extract` - Unpack an image for inspection
//! - `show` - Display configuration

pub mod btf;
pub mod extract;
pub mod initramfs;
pub mod merge;
pub mod show;
pub mod verify;

pub use btf::cmd_btf_headers;
pub use extract::cmd_extract;
pub use initramfs::{cmd_initramfs, cmd_initramfs_rootfs, ImageArgs};
pub use merge::cmd_sysroot_merge;
pub use show::cmd_show_config;
pub use verify::{cmd_verify_boot_script, cmd_verify_initramfs};
