use crate::Compression;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Base name of every layer archive, before the compression suffix.
pub(crate) const ARCHIVE_STEM: &str = "files.tar";

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl Compression {
    /// Returns the file extension suffix for this compression format.
    #[inline]
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Bzip2 => ".bz2",
            Compression::Gzip => ".gz",
            #[cfg(feature = "xz")]
            Compression::Xz => ".xz",
            #[cfg(feature = "zstd")]
            Compression::Zstd => ".zst",
        }
    }

    /// Returns the short name used in configuration.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Bzip2 => "bzip2",
            Compression::Gzip => "gzip",
            #[cfg(feature = "xz")]
            Compression::Xz => "xz",
            #[cfg(feature = "zstd")]
            Compression::Zstd => "zstd",
        }
    }

    /// File name of a layer archive packed with this format.
    #[must_use]
    pub fn archive_name(&self) -> String {
        format!("{ARCHIVE_STEM}{}", self.extension())
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use rstest::rstest;

    #[rstest]
    #[case(Compression::None, "files.tar")]
    #[case(Compression::Bzip2, "files.tar.bz2")]
    #[case(Compression::Gzip, "files.tar.gz")]
    #[cfg_attr(feature = "xz", case(Compression::Xz, "files.tar.xz"))]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd, "files.tar.zst"))]
    fn test_archive_name(#[case] format: Compression, #[case] expected: &str) {
        assert_eq!(format.archive_name(), expected);
        assert_eq!(Compression::from_path(expected), format);
    }
}
