//! Compression formats and tar archives for layer payloads.
//!
//! A captured layer may carry a whole tree of changed files. Rather than
//! keeping thousands of loose files in every layer folder, the tree is packed
//! into a single (optionally compressed) tar archive:
//!
//! - **Format detection** from archive file names ([`Compression::from_path`])
//!   or magic bytes ([`Compression::from_magic_bytes`])
//! - **Streaming** via wrapped readers/writers ([`Compression::wrap_reader`],
//!   [`Compression::wrap_writer`])
//! - **Archives** of whole directories ([`archive::pack`], [`archive::unpack`])
//!
//! Bzip2 and Gzip are always available. XZ and Zstd are behind feature flags.

pub mod archive;
mod construct;
pub mod error;
mod ops;
mod util;

/// A supported compression format for layer archives.
///
/// Defaults to [`Gzip`](Self::Gzip): file trees from installers compress
/// well and gzip is fast enough to not dominate a capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Plain tar, uncompressed
    None,
    /// Bzip2 compression (.bz2)
    Bzip2,
    /// Gzip compression (.gz)
    #[default]
    Gzip,
    /// XZ/LZMA compression (.xz)
    #[cfg(feature = "xz")]
    Xz,
    /// Zstd compression (.zst)
    #[cfg(feature = "zstd")]
    Zstd,
}

impl Compression {
    /// Every format compiled into this build, in detection order.
    pub const ALL: &'static [Compression] = &[
        Compression::Gzip,
        Compression::Bzip2,
        #[cfg(feature = "xz")]
        Compression::Xz,
        #[cfg(feature = "zstd")]
        Compression::Zstd,
        Compression::None,
    ];
}
