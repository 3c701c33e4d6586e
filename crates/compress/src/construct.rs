use crate::Compression;
use crate::error::{Error, ErrorKind};
use std::{path::Path, str::FromStr};

/// Leading bytes of each compressed stream. Plain tar has nothing at offset
/// zero to match on.
const SIGNATURES: &[(&[u8], Compression)] = &[
    (&[0x42, 0x5A, 0x68], Compression::Bzip2),
    (&[0x1F, 0x8B], Compression::Gzip),
    #[cfg(feature = "xz")]
    (&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00], Compression::Xz),
    #[cfg(feature = "zstd")]
    (&[0x28, 0xB5, 0x2F, 0xFD], Compression::Zstd),
];
/// Longest signature above.
pub(crate) const SIGNATURE_LEN: usize = 6;

impl FromStr for Compression {
    type Err = Error;

    /// Accepts the configuration names and the usual file suffixes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "tar" => Ok(Compression::None),
            "bz2" | "bzip2" => Ok(Compression::Bzip2),
            "gz" | "gzip" => Ok(Compression::Gzip),
            #[cfg(feature = "xz")]
            "xz" | "lzma" => Ok(Compression::Xz),
            #[cfg(feature = "zstd")]
            "zst" | "zstd" => Ok(Compression::Zstd),
            #[cfg(not(feature = "xz"))]
            "xz" | "lzma" => exn::bail!(ErrorKind::DisabledFormat(s.to_string())),
            #[cfg(not(feature = "zstd"))]
            "zst" | "zstd" => exn::bail!(ErrorKind::DisabledFormat(s.to_string())),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

impl Compression {
    /// Detect compression from an archive file name (`files.tar.gz`, ...).
    ///
    /// Anything without a recognised compression suffix is treated as a
    /// plain tar archive.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let Some(extension) = path.as_ref().extension().and_then(|ext| ext.to_str()) else {
            return Compression::None;
        };
        match extension.to_ascii_lowercase().as_str() {
            "tgz" => Compression::Gzip,
            other => Compression::ALL
                .iter()
                .copied()
                .find(|format| format.extension().strip_prefix('.') == Some(other))
                .unwrap_or(Compression::None),
        }
    }

    /// Detect compression format from the leading bytes of a stream.
    ///
    /// Returns [`None`](Compression::None) when no signature matches or the
    /// input is too short to tell.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        SIGNATURES
            .iter()
            .find(|(signature, _)| bytes.starts_with(signature))
            .map(|(_, format)| *format)
            .unwrap_or(Compression::None)
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use rstest::rstest;

    #[rstest]
    #[case("none", Compression::None)]
    #[case("tar", Compression::None)]
    #[case("bzip2", Compression::Bzip2)]
    #[case("GZIP", Compression::Gzip)]
    #[case(" gz ", Compression::Gzip)]
    #[cfg_attr(feature = "xz", case("xz", Compression::Xz))]
    #[cfg_attr(feature = "zstd", case("zstd", Compression::Zstd))]
    fn test_from_str(#[case] test: &str, #[case] expected: Compression) {
        assert_eq!(test.parse::<Compression>().unwrap(), expected);
    }

    #[rstest]
    #[case("rar")]
    #[case("")]
    fn test_from_str_invalid(#[case] test: &str) {
        assert!(test.parse::<Compression>().is_err());
    }

    #[rstest]
    #[case("files.tar", Compression::None)]
    #[case("files.tar.gz", Compression::Gzip)]
    #[case("files.tgz", Compression::Gzip)]
    #[case("files.tar.bz2", Compression::Bzip2)]
    #[case("layer-3/files.tar.gz", Compression::Gzip)]
    #[case("layer-3/FILES.TAR.GZ", Compression::Gzip)]
    #[case("layer-3/files", Compression::None)]
    #[cfg_attr(feature = "zstd", case("files.tar.zst", Compression::Zstd))]
    fn test_from_path(#[case] test: &str, #[case] expected: Compression) {
        assert_eq!(Compression::from_path(test), expected);
    }

    #[rstest]
    #[case(b"ustar", Compression::None)]
    #[case(b"", Compression::None)]
    #[case(&[0x42, 0x5A, 0x68, 0x39], Compression::Bzip2)]
    #[case(&[0x1F, 0x8B, 0x08, 0x00], Compression::Gzip)]
    fn test_from_magic_bytes(#[case] bytes: &[u8], #[case] expected: Compression) {
        assert_eq!(Compression::from_magic_bytes(bytes), expected);
    }
}
