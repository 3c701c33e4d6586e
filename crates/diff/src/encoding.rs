use crate::error::{ErrorKind, Result};
use std::fmt::{Display, Formatter, Result as FmtResult};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];

/// Text encoding of a file handed to the differ.
///
/// Registry exports are UTF-16LE with a byte order mark, manifests are UTF-8.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Encoding {
    #[default]
    Utf8,
    Utf16Le,
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Utf16Le => "utf-16le",
        }
    }

    /// Decode raw bytes, dropping a leading byte order mark if present.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            Encoding::Utf8 => {
                let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                match std::str::from_utf8(bytes) {
                    Ok(s) => Ok(s.to_string()),
                    Err(_) => exn::bail!(ErrorKind::Encoding(self.as_str())),
                }
            },
            Encoding::Utf16Le => {
                let bytes = bytes.strip_prefix(UTF16LE_BOM).unwrap_or(bytes);
                if bytes.len() % 2 != 0 {
                    exn::bail!(ErrorKind::Encoding(self.as_str()));
                }
                let units: Vec<u16> = bytes.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]])).collect();
                match String::from_utf16(&units) {
                    Ok(s) => Ok(s),
                    Err(_) => exn::bail!(ErrorKind::Encoding(self.as_str())),
                }
            },
        }
    }

    /// Encode text for writing to disk. UTF-16LE output always starts with
    /// a byte order mark, which regedit requires.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Utf16Le => {
                let mut out = Vec::with_capacity(UTF16LE_BOM.len() + text.len() * 2);
                out.extend_from_slice(UTF16LE_BOM);
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
                out
            },
        }
    }
}

/// Split text into lines on `\n` or `\r\n`.
///
/// Line numbers match those a line-oriented diff tool reports: a trailing
/// newline does not produce an extra empty line.
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}
