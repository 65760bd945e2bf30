//! Transparent compression for document files.
//!
//! A compressed document file cannot be split: there is no way to seek to a
//! byte offset of the decompressed stream without decompressing everything in
//! front of it. The planner therefore emits a single `[0, EOF)` partition for
//! such files, and readers and writers wrap the raw file with the codec picked
//! from the file extension.
//!
//! ## Codecs
//!
//! Each codec is behind its own cargo feature:
//! - **Gzip** (`.gz`, `.gzip`) via `flate2` (feature: `compression-gzip`)
//! - **Zstd** (`.zst`, `.zstd`) via `zstd` (feature: `compression-zstd`)
//! - **Bzip2** (`.bz2`, `.bzip2`) via `bzip2` (feature: `compression-bzip2`)
//! - **Xz** (`.xz`) via `xz2` (feature: `compression-xz`)
//!
//! Detection is by extension only. An uncompressed document file starts with an
//! arbitrary little-endian length, so sniffing magic bytes would misclassify
//! some plain files. [`Compression::magic`] is still exposed for callers that
//! want to verify a file's header.
//!
//! ```
//! use docsplit::io::compression::Compression;
//!
//! assert_eq!(Compression::from_path("part-0001.bson"), Compression::None);
//! # #[cfg(feature = "compression-gzip")]
//! assert_eq!(Compression::from_path("part-0001.BSON.GZ"), Compression::Gzip);
//! ```

use anyhow::{Result, bail};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Compression applied to a document file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
    Bzip2,
    Xz,
}

/// Boxed decompressing reader.
pub type DynRead = Box<dyn Read + Send>;
/// Boxed compressing writer. Dropping it finishes the compressed stream.
pub type DynWrite = Box<dyn Write + Send>;

impl Compression {
    /// Every codec compiled into this build, in detection order.
    pub fn enabled() -> &'static [Compression] {
        &[
            #[cfg(feature = "compression-gzip")]
            Compression::Gzip,
            #[cfg(feature = "compression-zstd")]
            Compression::Zstd,
            #[cfg(feature = "compression-bzip2")]
            Compression::Bzip2,
            #[cfg(feature = "compression-xz")]
            Compression::Xz,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
            Compression::Bzip2 => "bzip2",
            Compression::Xz => "xz",
        }
    }

    /// Lowercase extensions with the leading dot.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Compression::None => &[],
            Compression::Gzip => &[".gz", ".gzip"],
            Compression::Zstd => &[".zst", ".zstd"],
            Compression::Bzip2 => &[".bz2", ".bzip2"],
            Compression::Xz => &[".xz"],
        }
    }

    /// Header bytes every stream of this codec starts with.
    pub fn magic(self) -> Option<&'static [u8]> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some(&[0x1f, 0x8b]),
            Compression::Zstd => Some(&[0x28, 0xb5, 0x2f, 0xfd]),
            Compression::Bzip2 => Some(b"BZh"),
            Compression::Xz => Some(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]),
        }
    }

    /// Pick a codec from the path's extension; case-insensitive.
    ///
    /// Extensions of codecs whose feature is disabled are not recognized, so
    /// such a file is treated as plain and will fail to decode.
    pub fn from_path(path: impl AsRef<Path>) -> Compression {
        let name = path.as_ref().to_string_lossy().to_lowercase();
        Self::enabled()
            .iter()
            .copied()
            .find(|codec| codec.extensions().iter().any(|ext| name.ends_with(ext)))
            .unwrap_or(Compression::None)
    }

    pub fn is_compressed(self) -> bool {
        self != Compression::None
    }

    /// Wrap `reader` with the matching decompressor. Plain streams are buffered.
    pub fn wrap_reader<R: Read + Send + 'static>(self, reader: R) -> Result<DynRead> {
        let wrapped: DynRead = match self {
            Compression::None => Box::new(BufReader::new(reader)),
            #[cfg(feature = "compression-gzip")]
            Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            #[cfg(feature = "compression-zstd")]
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
            #[cfg(feature = "compression-bzip2")]
            Compression::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
            #[cfg(feature = "compression-xz")]
            Compression::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
            #[allow(unreachable_patterns)]
            other => bail!("{other} support is not compiled in"),
        };
        Ok(wrapped)
    }

    /// Wrap `writer` with the matching compressor. Plain streams are buffered.
    pub fn wrap_writer<W: Write + Send + 'static>(self, writer: W) -> Result<DynWrite> {
        let wrapped: DynWrite = match self {
            Compression::None => Box::new(BufWriter::new(writer)),
            #[cfg(feature = "compression-gzip")]
            Compression::Gzip => Box::new(flate2::write::GzEncoder::new(
                writer,
                flate2::Compression::default(),
            )),
            #[cfg(feature = "compression-zstd")]
            Compression::Zstd => Box::new(zstd::stream::write::Encoder::new(writer, 3)?.auto_finish()),
            #[cfg(feature = "compression-bzip2")]
            Compression::Bzip2 => Box::new(bzip2::write::BzEncoder::new(
                writer,
                bzip2::Compression::default(),
            )),
            #[cfg(feature = "compression-xz")]
            Compression::Xz => Box::new(xz2::write::XzEncoder::new(writer, 6)),
            #[allow(unreachable_patterns)]
            other => bail!("{other} support is not compiled in"),
        };
        Ok(wrapped)
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_are_uncompressed() {
        assert_eq!(Compression::from_path("a/b/data.bson"), Compression::None);
        assert_eq!(Compression::from_path("gz"), Compression::None);
        assert!(!Compression::None.is_compressed());
    }

    #[cfg(feature = "compression-zstd")]
    #[test]
    fn extension_match_ignores_case() {
        assert_eq!(Compression::from_path("x.BSON.ZST"), Compression::Zstd);
        assert_eq!(Compression::from_path("x.zstd"), Compression::Zstd);
    }

    #[test]
    fn every_codec_declares_magic() {
        for codec in Compression::enabled() {
            assert!(codec.magic().is_some(), "{codec}");
        }
    }
}
