//! Streaming compression wrappers.

use crate::Compression;
use crate::error::{ErrorKind, Result};
use bzip2::{Compression as BzCompression, read::BzDecoder, write::BzEncoder};
use exn::ResultExt;
use flate2::{Compression as GzCompression, read::GzDecoder, write::GzEncoder};
use std::io::{Read, Write};
#[cfg(feature = "xz")]
use xz2::{read::XzDecoder, write::XzEncoder};
#[cfg(feature = "zstd")]
use zstd::stream::{read::Decoder as ZstdDecoder, write::Encoder as ZstdEncoder};

// Layer archives are written once per capture and read once per prefix
// creation, so favour a balanced level over the maximum.
const BZIP2_LEVEL: u32 = 6;
const GZIP_LEVEL: u32 = 6;
#[cfg(feature = "xz")]
const XZ_LEVEL: u32 = 6;
#[cfg(feature = "zstd")]
const ZSTD_LEVEL: i32 = 9;

/// A compressing writer that must be explicitly [finished](Encoder::finish)
/// so trailing frames are flushed and errors surface.
pub enum Encoder<W: Write> {
    None(W),
    Bzip2(BzEncoder<W>),
    Gzip(GzEncoder<W>),
    #[cfg(feature = "xz")]
    Xz(XzEncoder<W>),
    #[cfg(feature = "zstd")]
    Zstd(ZstdEncoder<'static, W>),
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Encoder::None(w) => w.write(buf),
            Encoder::Bzip2(w) => w.write(buf),
            Encoder::Gzip(w) => w.write(buf),
            #[cfg(feature = "xz")]
            Encoder::Xz(w) => w.write(buf),
            #[cfg(feature = "zstd")]
            Encoder::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Encoder::None(w) => w.flush(),
            Encoder::Bzip2(w) => w.flush(),
            Encoder::Gzip(w) => w.flush(),
            #[cfg(feature = "xz")]
            Encoder::Xz(w) => w.flush(),
            #[cfg(feature = "zstd")]
            Encoder::Zstd(w) => w.flush(),
        }
    }
}

impl<W: Write> Encoder<W> {
    /// Write any trailing compression frames and hand back the inner writer.
    pub fn finish(self) -> Result<W> {
        let mut inner = match self {
            Encoder::None(w) => w,
            Encoder::Bzip2(w) => w.finish().or_raise(|| ErrorKind::Io)?,
            Encoder::Gzip(w) => w.finish().or_raise(|| ErrorKind::Io)?,
            #[cfg(feature = "xz")]
            Encoder::Xz(w) => w.finish().or_raise(|| ErrorKind::Io)?,
            #[cfg(feature = "zstd")]
            Encoder::Zstd(w) => w.finish().or_raise(|| ErrorKind::Io)?,
        };
        inner.flush().or_raise(|| ErrorKind::Io)?;
        Ok(inner)
    }
}

impl Compression {
    /// Wrap a reader with the appropriate decompression layer.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::io::{Cursor, Read, Write};
    /// use cellar_compress::Compression;
    ///
    /// let mut encoder = Compression::Gzip.wrap_writer(Vec::new()).unwrap();
    /// encoder.write_all(b"REGEDIT4").unwrap();
    /// let compressed = encoder.finish().unwrap();
    ///
    /// let mut reader = Compression::Gzip.wrap_reader(Cursor::new(compressed)).unwrap();
    /// let mut plain = String::new();
    /// reader.read_to_string(&mut plain).unwrap();
    /// assert_eq!(plain, "REGEDIT4");
    /// ```
    pub fn wrap_reader<'a, R: Read + 'a>(&self, reader: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => Box::new(reader),
            Compression::Bzip2 => Box::new(BzDecoder::new(reader)),
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
            #[cfg(feature = "xz")]
            Compression::Xz => Box::new(XzDecoder::new(reader)),
            #[cfg(feature = "zstd")]
            Compression::Zstd => Box::new(ZstdDecoder::new(reader).or_raise(|| ErrorKind::Encoder)?),
        })
    }

    /// Wrap a writer with the appropriate compression layer.
    ///
    /// The returned [`Encoder`] must be [finished](Encoder::finish); dropping
    /// it may silently truncate the output.
    pub fn wrap_writer<W: Write>(&self, writer: W) -> Result<Encoder<W>> {
        Ok(match self {
            Compression::None => Encoder::None(writer),
            Compression::Bzip2 => Encoder::Bzip2(BzEncoder::new(writer, BzCompression::new(BZIP2_LEVEL))),
            Compression::Gzip => Encoder::Gzip(GzEncoder::new(writer, GzCompression::new(GZIP_LEVEL))),
            #[cfg(feature = "xz")]
            Compression::Xz => Encoder::Xz(XzEncoder::new(writer, XZ_LEVEL)),
            #[cfg(feature = "zstd")]
            Compression::Zstd => Encoder::Zstd(ZstdEncoder::new(writer, ZSTD_LEVEL).or_raise(|| ErrorKind::Encoder)?),
        })
    }
}
