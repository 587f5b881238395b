//! Archive compression, both directions.
//!
//! gzip, xz and zstd run in-process. lz4 goes through the external `lz4`
//! tool, which is the only thing that writes the legacy frame the kernel's
//! initramfs unpacker accepts.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;
use xz2::read::XzDecoder;
use xz2::stream::{Check, Stream};
use xz2::write::XzEncoder;

use crate::error::{Error, Result};
use crate::process::{resolve_tool, Cmd, ToolEnv};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const LZ4_LEGACY_MAGIC: &[u8] = &[0x02, 0x21, 0x4c, 0x18];
const LZ4_FRAME_MAGIC: &[u8] = &[0x04, 0x22, 0x4d, 0x18];

pub const DEFAULT_GZIP_LEVEL: u32 = 9;
pub const DEFAULT_XZ_LEVEL: u32 = 9;
pub const DEFAULT_LZ4_LEVEL: u32 = 9;
pub const DEFAULT_ZSTD_LEVEL: i32 = 19;

/// lz4 command line tool.
pub const LZ4_TOOL: &str = "lz4";

/// Compression applied to the cpio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip(u32),
    /// xz with a CRC32 check, the only check the kernel verifies.
    Xz(u32),
    /// Legacy lz4 frame, written by the `lz4` tool.
    Lz4(u32),
    Zstd(i32),
    /// Raw cpio, mostly useful for debugging.
    None,
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Gzip(DEFAULT_GZIP_LEVEL)
    }
}

impl Compression {
    /// Parse `gz`, `xz`, `lz4`, `zstd` or `none`, with an optional level.
    /// Without a level the format's default is used.
    pub fn parse(name: &str, level: Option<i32>) -> Result<Self> {
        match name {
            "gz" | "gzip" => {
                let level = check_level("gzip", level.unwrap_or(DEFAULT_GZIP_LEVEL as i32), 0, 9)?;
                Ok(Compression::Gzip(level))
            }
            "xz" => {
                let level = check_level("xz", level.unwrap_or(DEFAULT_XZ_LEVEL as i32), 0, 9)?;
                Ok(Compression::Xz(level))
            }
            "lz4" => {
                let level = check_level("lz4", level.unwrap_or(DEFAULT_LZ4_LEVEL as i32), 1, 12)?;
                Ok(Compression::Lz4(level))
            }
            "zstd" => {
                let level = level.unwrap_or(DEFAULT_ZSTD_LEVEL);
                if !zstd::compression_level_range().contains(&level) {
                    return Err(Error::Configuration(format!(
                        "zstd level {} is out of range",
                        level
                    )));
                }
                Ok(Compression::Zstd(level))
            }
            "none" => Ok(Compression::None),
            other => Err(Error::Configuration(format!(
                "unknown compression '{}' (expected gz, xz, lz4, zstd or none)",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Compression::Gzip(_) => "gz",
            Compression::Xz(_) => "xz",
            Compression::Lz4(_) => "lz4",
            Compression::Zstd(_) => "zstd",
            Compression::None => "none",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Gzip(level) => write!(f, "gz (level {})", level),
            Compression::Xz(level) => write!(f, "xz (level {})", level),
            Compression::Lz4(level) => write!(f, "lz4 (level {})", level),
            Compression::Zstd(level) => write!(f, "zstd (level {})", level),
            Compression::None => f.write_str("none"),
        }
    }
}

fn check_level(format: &str, level: i32, min: i32, max: i32) -> Result<u32> {
    if !(min..=max).contains(&level) {
        return Err(Error::Configuration(format!(
            "{} level must be between {} and {}, got {}",
            format, min, max, level
        )));
    }
    Ok(level as u32)
}

fn tool_error(err: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

/// Run `cmd` over `input` and return its stdout, rewound.
fn run_to_file(cmd: Cmd, input: &Path) -> io::Result<File> {
    let mut output = tempfile::tempfile()?;
    cmd.arg_path(input)
        .env(&ToolEnv::from_host())
        .stdout_to(output.try_clone()?)
        .run()
        .map_err(tool_error)?;
    output.seek(SeekFrom::Start(0))?;
    Ok(output)
}

/// Uncompressed stream staged for the lz4 tool.
pub struct Lz4Stage<W: Write> {
    inner: W,
    raw: NamedTempFile,
    tool: PathBuf,
    level: u32,
}

impl<W: Write> Lz4Stage<W> {
    fn finish(mut self) -> io::Result<W> {
        self.raw.as_file_mut().flush()?;
        let cmd = Cmd::new(&self.tool).arg("-l").arg(format!("-{}", self.level)).arg("-c");
        let mut compressed = run_to_file(cmd, self.raw.path())?;
        io::copy(&mut compressed, &mut self.inner)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// A writer that compresses into `W`.
pub enum Encoder<W: Write> {
    Gzip(GzEncoder<W>),
    Xz(XzEncoder<W>),
    Lz4(Lz4Stage<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
    None(W),
}

impl<W: Write> Encoder<W> {
    pub fn new(inner: W, compression: Compression) -> io::Result<Self> {
        Ok(match compression {
            // GzEncoder leaves the header mtime at 0, so output is reproducible
            Compression::Gzip(level) => {
                Encoder::Gzip(GzEncoder::new(inner, flate2::Compression::new(level)))
            }
            Compression::Xz(level) => {
                let stream = Stream::new_easy_encoder(level, Check::Crc32)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Encoder::Xz(XzEncoder::new_stream(inner, stream))
            }
            Compression::Lz4(level) => Encoder::Lz4(Lz4Stage {
                inner,
                raw: NamedTempFile::new()?,
                tool: resolve_tool(LZ4_TOOL).map_err(tool_error)?,
                level,
            }),
            Compression::Zstd(level) => {
                let mut enc = zstd::stream::write::Encoder::new(inner, level)?;
                enc.include_checksum(true)?;
                Encoder::Zstd(enc)
            }
            Compression::None => Encoder::None(inner),
        })
    }

    /// Write the compressed stream's footer and return the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Gzip(enc) => enc.finish(),
            Encoder::Xz(enc) => enc.finish(),
            Encoder::Lz4(stage) => stage.finish(),
            Encoder::Zstd(enc) => enc.finish(),
            Encoder::None(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Gzip(enc) => enc.write(buf),
            Encoder::Xz(enc) => enc.write(buf),
            Encoder::Lz4(stage) => stage.raw.write(buf),
            Encoder::Zstd(enc) => enc.write(buf),
            Encoder::None(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Gzip(enc) => enc.flush(),
            Encoder::Xz(enc) => enc.flush(),
            Encoder::Lz4(stage) => stage.raw.flush(),
            Encoder::Zstd(enc) => enc.flush(),
            Encoder::None(inner) => inner.flush(),
        }
    }
}

/// Name the compression format whose magic bytes start `head`.
pub fn detect(head: &[u8]) -> &'static str {
    if head.starts_with(GZIP_MAGIC) {
        "gz"
    } else if head.starts_with(XZ_MAGIC) {
        "xz"
    } else if head.starts_with(ZSTD_MAGIC) {
        "zstd"
    } else if head.starts_with(LZ4_LEGACY_MAGIC) || head.starts_with(LZ4_FRAME_MAGIC) {
        "lz4"
    } else {
        "none"
    }
}

/// Wrap `inner` in the decoder matching its magic bytes, or a raw
/// pass-through. Returns the detected format name with the reader.
pub fn decompress<R: Read + 'static>(inner: R) -> io::Result<(&'static str, Box<dyn Read>)> {
    let mut buf = BufReader::new(inner);
    let format = detect(buf.fill_buf()?);

    let reader: Box<dyn Read> = match format {
        // initramfs images may be several concatenated gzip members
        "gz" => Box::new(MultiGzDecoder::new(buf)),
        "xz" => Box::new(XzDecoder::new_multi_decoder(buf)),
        "zstd" => Box::new(zstd::stream::read::Decoder::with_buffer(buf)?),
        "lz4" => {
            let tool = resolve_tool(LZ4_TOOL).map_err(tool_error)?;
            let mut staged = NamedTempFile::new()?;
            io::copy(&mut buf, &mut staged)?;
            staged.as_file_mut().flush()?;
            let cmd = Cmd::new(&tool).arg("-d").arg("-c");
            Box::new(BufReader::new(run_to_file(cmd, staged.path())?))
        }
        _ => Box::new(buf),
    };
    Ok((format, reader))
}

/// Open `path` and return a reader over its decompressed content.
pub fn open_decompressed(path: &Path) -> io::Result<(&'static str, Box<dyn Read>)> {
    decompress(File::open(path)?)
}
