use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;

use memchr::memmem;
use serde::{Deserialize, Serialize};
use webproof_common::{Result, WebProofError};

/// Byte encoding a captured string was produced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Utf8,
    Utf16Le,
    Latin1,
}

impl Encoding {
    /// Encode `s` into this encoding's bytes.
    pub fn encode(self, s: &str) -> Result<Vec<u8>> {
        match self {
            Encoding::Utf8 => Ok(s.as_bytes().to_vec()),
            Encoding::Utf16Le => Ok(s.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Encoding::Latin1 => s
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        WebProofError::Encoding(format!("{c:?} has no latin-1 representation"))
                    })
                })
                .collect(),
        }
    }

    /// Encode ASCII delimiter text, which every encoding can represent.
    pub fn ascii(self, s: &str) -> Vec<u8> {
        debug_assert!(s.is_ascii());
        match self {
            Encoding::Utf16Le => s.bytes().flat_map(|b| [b, 0]).collect(),
            Encoding::Utf8 | Encoding::Latin1 => s.as_bytes().to_vec(),
        }
    }

    /// Width of one code unit in bytes. Matches only count at multiples of it.
    pub fn unit_len(self) -> usize {
        match self {
            Encoding::Utf16Le => 2,
            Encoding::Utf8 | Encoding::Latin1 => 1,
        }
    }

    fn decode_lossy(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Utf16Le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            Encoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

/// A string held as the exact bytes it was captured with.
///
/// Equality, ordering and hashing look only at the bytes. Two spellings of
/// the "same" text (`%41` vs `A`, `é` vs `é`) are different values, which
/// is what range computation over a raw transcript needs.
#[derive(Clone, Serialize, Deserialize)]
pub struct EncodedString {
    bytes: Vec<u8>,
    encoding: Encoding,
}

impl EncodedString {
    /// Encode `s` with `encoding`.
    ///
    /// ```
    /// use webproof_transcript::{EncodedString, Encoding};
    ///
    /// let utf8 = EncodedString::encode("é", Encoding::Utf8).unwrap();
    /// let latin1 = EncodedString::encode("é", Encoding::Latin1).unwrap();
    /// assert_eq!(utf8.len(), 2);
    /// assert_eq!(latin1.len(), 1);
    /// assert_ne!(utf8, latin1);
    /// ```
    pub fn encode(s: &str, encoding: Encoding) -> Result<Self> {
        Ok(Self {
            bytes: encoding.encode(s)?,
            encoding,
        })
    }

    /// Shorthand for UTF-8, which cannot fail.
    pub fn utf8(s: &str) -> Self {
        Self {
            bytes: s.as_bytes().to_vec(),
            encoding: Encoding::Utf8,
        }
    }

    /// Wrap bytes that were already produced with `encoding`.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, encoding: Encoding) -> Self {
        Self {
            bytes: bytes.into(),
            encoding,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Length in bytes, not characters.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte offset of the first `needle` at or after `from` that starts on a
    /// code-unit boundary.
    ///
    /// ```
    /// use webproof_transcript::{EncodedString, Encoding};
    ///
    /// // U+2661 U+0100 is `61 26 00 01`: bytes 1..3 look like `&` but straddle two units.
    /// let s = EncodedString::encode("\u{2661}\u{100}&", Encoding::Utf16Le).unwrap();
    /// assert_eq!(s.find(&Encoding::Utf16Le.ascii("&"), 0), Some(4));
    /// ```
    pub fn find(&self, needle: &[u8], from: usize) -> Option<usize> {
        let unit = self.encoding.unit_len();
        let mut at = from;
        loop {
            let hay = self.bytes.get(at..)?;
            let pos = memmem::find(hay, needle)? + at;
            if pos % unit == 0 {
                return Some(pos);
            }
            at = pos + 1;
        }
    }

    /// Like [`find`](Self::find) but encodes `needle` with this string's encoding first.
    pub fn find_str(&self, needle: &str, from: usize) -> Result<Option<usize>> {
        let needle = self.encoding.encode(needle)?;
        Ok(self.find(&needle, from))
    }

    /// Every non-overlapping, code-unit aligned occurrence of `needle`, in order.
    pub fn find_all(&self, needle: &[u8]) -> Vec<usize> {
        let mut out = Vec::new();
        if needle.is_empty() {
            return out;
        }
        let mut at = 0;
        while let Some(pos) = self.find(needle, at) {
            out.push(pos);
            at = pos + needle.len();
        }
        out
    }

    /// Spans of `[start, end)` separated by `delim`, delimiters excluded.
    ///
    /// ```
    /// use webproof_transcript::EncodedString;
    ///
    /// let s = EncodedString::utf8("?a=1&&b");
    /// assert_eq!(s.fields(1, s.len(), b"&"), vec![1..4, 5..5, 6..7]);
    /// ```
    pub fn fields(&self, start: usize, end: usize, delim: &[u8]) -> Vec<Range<usize>> {
        if delim.is_empty() {
            return vec![start..end];
        }
        let mut out = Vec::new();
        let mut at = start;
        while let Some(pos) = self
            .find(delim, at)
            .filter(|&pos| pos + delim.len() <= end)
        {
            out.push(at..pos);
            at = pos + delim.len();
        }
        out.push(at..end);
        out
    }

    /// Copy of `[start, end)`. Out-of-bounds requests are errors, never clamped.
    pub fn slice(&self, start: usize, end: usize) -> Result<EncodedString> {
        let bytes = self.bytes.get(start..end).ok_or(WebProofError::OutOfBounds {
            start,
            end,
            len: self.bytes.len(),
        })?;
        Ok(Self::from_bytes(bytes, self.encoding))
    }

    /// Best-effort text for display and logging of non-sensitive values.
    pub fn decode_lossy(&self) -> String {
        self.encoding.decode_lossy(&self.bytes)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl PartialEq for EncodedString {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for EncodedString {}

impl Hash for EncodedString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl PartialOrd for EncodedString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EncodedString {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl fmt::Debug for EncodedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedString")
            .field("text", &self.decode_lossy())
            .field("encoding", &self.encoding)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl fmt::Display for EncodedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.decode_lossy())
    }
}

impl From<&str> for EncodedString {
    fn from(s: &str) -> Self {
        Self::utf8(s)
    }
}
