//! Named text encodings used for archive entry names and CSV contents.

use std::fmt;

use encoding_rs::Encoding;

use crate::error::ArchiveError;

/// Encodings offered to the user by the encoding and charset prompts.
pub const OFFERED_CHARSETS: &[&str] = &[
    "ISO-8859-1",
    "US-ASCII",
    "UTF-8",
    "UTF-16",
    "UTF-16BE",
    "UTF-16LE",
];

/// A text encoding together with the label the user picked for it.
///
/// The label is kept because several labels resolve to the same encoding
/// (`ISO-8859-1` and `US-ASCII` both decode as windows-1252) and error
/// messages should name what the user chose.
#[derive(Clone, Copy)]
pub struct Charset {
    label: &'static str,
    encoding: &'static Encoding,
}

impl Charset {
    pub fn utf8() -> Self {
        Self {
            label: "UTF-8",
            encoding: encoding_rs::UTF_8,
        }
    }

    pub fn for_label(label: &str) -> Result<Self, ArchiveError> {
        let trimmed = label.trim();
        let encoding = Encoding::for_label(trimmed.as_bytes())
            .ok_or_else(|| ArchiveError::UnknownCharset(label.to_string()))?;
        let label = OFFERED_CHARSETS
            .iter()
            .find(|offered| offered.eq_ignore_ascii_case(trimmed))
            .copied()
            .unwrap_or_else(|| encoding.name());
        Ok(Self { label, encoding })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Strictly decodes `bytes`, returning `None` on malformed input.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        if self.encoding == encoding_rs::UTF_8 {
            return std::str::from_utf8(bytes).ok().map(str::to_owned);
        }
        let (text, _, had_errors) = self.encoding.decode(bytes);
        if had_errors {
            None
        } else {
            Some(text.into_owned())
        }
    }

    /// Decodes a raw archive entry name.
    pub fn decode_name(&self, raw: &[u8]) -> Result<String, ArchiveError> {
        self.decode(raw).ok_or_else(|| ArchiveError::WrongCharset {
            charset: self.label.to_string(),
        })
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self::utf8()
    }
}

impl fmt::Debug for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Charset")
            .field("label", &self.label)
            .field("encoding", &self.encoding.name())
            .finish()
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label)
    }
}

impl PartialEq for Charset {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
    }
}
