//! Turn a disclosure policy into the final list of withheld byte ranges.
//!
//! The output always lists bytes to *withhold*. A redact policy withholds the
//! union of its tokens' values; a reveal policy withholds the complement of
//! the union of its tokens' values over the whole transcript.

use serde::{Deserialize, Serialize};
use tracing::debug;
use webproof_common::Result;

use crate::paths::json_value_range;
use crate::range::{ranges_in_request, ByteRange};
use crate::transcript::Transcript;

/// A named element to locate within a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Token {
    /// Query parameter of the request line's URL.
    QueryParam(String),
    /// Dot-path of a string leaf in a JSON body.
    JsonPath(String),
}

impl Token {
    /// Every range this token's value occupies. Missing tokens are errors.
    pub fn resolve(&self, transcript: &Transcript) -> Result<Vec<ByteRange>> {
        match self {
            Token::QueryParam(name) => Ok(ranges_in_request(transcript, [name])?
                .into_iter()
                .map(|r| r.range)
                .collect()),
            Token::JsonPath(path) => Ok(vec![json_value_range(transcript, path)?]),
        }
    }
}

/// Which tokens a notarization discloses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "tokens", rename_all = "snake_case")]
pub enum DisclosurePolicy {
    /// Reveal only these tokens' values; withhold everything else.
    Reveal(Vec<Token>),
    /// Withhold these tokens' values; reveal everything else.
    Redact(Vec<Token>),
}

impl DisclosurePolicy {
    pub fn tokens(&self) -> &[Token] {
        match self {
            DisclosurePolicy::Reveal(tokens) | DisclosurePolicy::Redact(tokens) => tokens,
        }
    }
}

/// Sorted, non-overlapping ranges of a transcript to withhold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionSet {
    transcript_len: usize,
    ranges: Vec<ByteRange>,
}

impl RedactionSet {
    /// Nothing withheld.
    pub fn empty(transcript_len: usize) -> Self {
        Self {
            transcript_len,
            ranges: Vec::new(),
        }
    }

    /// Resolve every token of `policy` against `transcript` and assemble the set.
    ///
    /// ```
    /// use webproof_transcript::{ByteRange, DisclosurePolicy, RedactionSet, Token, Transcript};
    ///
    /// let request = Transcript::new("GET /p?a=1&secret=xyz HTTP/1.1\r\n\r\n");
    /// let policy = DisclosurePolicy::Redact(vec![Token::QueryParam("secret".into())]);
    /// let set = RedactionSet::build(&request, &policy).unwrap();
    /// assert_eq!(set.ranges(), &[ByteRange { start: 18, end: 21 }]);
    /// ```
    pub fn build(transcript: &Transcript, policy: &DisclosurePolicy) -> Result<Self> {
        let mut located = Vec::new();
        for token in policy.tokens() {
            located.extend(token.resolve(transcript)?);
        }
        let merged = merge_ranges(located);

        let ranges = match policy {
            DisclosurePolicy::Redact(_) => merged,
            DisclosurePolicy::Reveal(_) => complement(&merged, transcript.len()),
        };
        debug!(
            transcript_len = transcript.len(),
            tokens = policy.tokens().len(),
            ranges = ranges.len(),
            "redaction.build"
        );
        Ok(Self {
            transcript_len: transcript.len(),
            ranges,
        })
    }

    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    pub fn transcript_len(&self) -> usize {
        self.transcript_len
    }

    /// Total number of withheld bytes.
    pub fn redacted_len(&self) -> usize {
        self.ranges.iter().map(ByteRange::len).sum()
    }

    /// Ranges that stay visible, i.e. the complement of the withheld ones.
    pub fn revealed(&self) -> Vec<ByteRange> {
        complement(&self.ranges, self.transcript_len)
    }

    /// Copy of `transcript` with every withheld byte replaced by `fill`.
    pub fn apply(&self, transcript: &Transcript, fill: u8) -> Result<Vec<u8>> {
        let mut out = transcript.as_bytes().to_vec();
        for range in &self.ranges {
            let len = out.len();
            out.get_mut(range.start..range.end)
                .ok_or(webproof_common::WebProofError::OutOfBounds {
                    start: range.start,
                    end: range.end,
                    len,
                })?
                .fill(fill);
        }
        Ok(out)
    }
}

/// Sort and coalesce overlapping or touching ranges; empty ranges vanish.
///
/// ```
/// use webproof_transcript::{redaction::merge_ranges, ByteRange};
///
/// let r = |start, end| ByteRange { start, end };
/// assert_eq!(
///     merge_ranges(vec![r(8, 9), r(0, 3), r(2, 5), r(5, 6), r(7, 7)]),
///     vec![r(0, 6), r(8, 9)]
/// );
/// ```
pub fn merge_ranges(mut ranges: Vec<ByteRange>) -> Vec<ByteRange> {
    ranges.retain(|r| !r.is_empty());
    ranges.sort_unstable();

    let mut merged: Vec<ByteRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

/// Gaps between sorted, merged `ranges` over `[0, len)`.
pub fn complement(ranges: &[ByteRange], len: usize) -> Vec<ByteRange> {
    let mut gaps = Vec::with_capacity(ranges.len() + 1);
    let mut cursor = 0;
    for range in ranges {
        if range.start > cursor {
            gaps.push(ByteRange {
                start: cursor,
                end: range.start,
            });
        }
        cursor = cursor.max(range.end);
    }
    if cursor < len {
        gaps.push(ByteRange {
            start: cursor,
            end: len,
        });
    }
    gaps
}
