use std::fmt;

use webproof_common::{Result, WebProofError};

use crate::encoded::{EncodedString, Encoding};
use crate::range::ByteRange;

const HEAD_SEPARATOR: &str = "\r\n\r\n";

/// Raw bytes of one captured HTTP message (request or response).
///
/// Owned by whoever captured it and never mutated afterwards; every range
/// this crate computes indexes into these bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Transcript {
    message: EncodedString,
}

impl Transcript {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self::with_encoding(bytes, Encoding::Utf8)
    }

    pub fn with_encoding(bytes: impl Into<Vec<u8>>, encoding: Encoding) -> Self {
        Self {
            message: EncodedString::from_bytes(bytes, encoding),
        }
    }

    pub fn encoded(&self) -> &EncodedString {
        &self.message
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.message.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.message.len()
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }

    /// The first line, without its terminator. Line breaks are searched in
    /// the transcript's own encoding.
    pub fn first_line(&self) -> &[u8] {
        let encoding = self.message.encoding();
        let bytes = self.as_bytes();
        let end = self
            .message
            .find(&encoding.ascii("\n"), 0)
            .unwrap_or(bytes.len());
        let line = &bytes[..end];
        let cr = encoding.ascii("\r");
        line.strip_suffix(cr.as_slice()).unwrap_or(line)
    }

    /// Offset of the `\r\n\r\n` that ends the head.
    pub fn head_end(&self) -> Option<usize> {
        let separator = self.message.encoding().ascii(HEAD_SEPARATOR);
        self.message.find(&separator, 0)
    }

    /// Offset of the first body byte, if the head is terminated.
    pub fn body_offset(&self) -> Option<usize> {
        let separator_len = HEAD_SEPARATOR.len() * self.message.encoding().unit_len();
        self.head_end().map(|pos| pos + separator_len)
    }

    /// The message body, or an error when the head never ends.
    pub fn body(&self) -> Result<&[u8]> {
        let offset = self
            .body_offset()
            .ok_or_else(|| WebProofError::MalformedBody("message head is not terminated".into()))?;
        Ok(&self.as_bytes()[offset..])
    }

    /// Value of the first header named `name` (ASCII case-insensitive), trimmed.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        let head_end = self.body_offset().unwrap_or(self.len());
        self.as_bytes()[..head_end]
            .split(|&b| b == b'\n')
            .skip(1)
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .find_map(|line| {
                let colon = memchr::memchr(b':', line)?;
                let (key, rest) = line.split_at(colon);
                key.eq_ignore_ascii_case(name.as_bytes())
                    .then(|| rest[1..].trim_ascii())
            })
    }

    /// Borrow the bytes of `range`, reporting out-of-bounds ranges.
    pub fn bytes_in(&self, range: ByteRange) -> Result<&[u8]> {
        self.as_bytes()
            .get(range.start..range.end)
            .ok_or(WebProofError::OutOfBounds {
                start: range.start,
                end: range.end,
                len: self.len(),
            })
    }

    /// blake3 digest of the bytes, hex encoded. Safe to log.
    pub fn digest(&self) -> String {
        blake3::hash(self.as_bytes()).to_hex().to_string()
    }
}

impl fmt::Debug for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcript")
            .field("len", &self.len())
            .field("digest", &&self.digest()[..16])
            .finish()
    }
}
