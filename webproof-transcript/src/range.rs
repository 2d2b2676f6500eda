//! Byte ranges of query-parameter values inside raw request bytes.
//!
//! The query starts after the first `?` of the URL and is split on `&` into
//! fields. A parameter is a field that begins with `name=`, never a bare
//! substring, so `id` can't match inside `userid`, a `?id=` nested inside
//! another parameter's value is just part of that value, and a value that
//! happens to recur elsewhere in the transcript is not confused with the
//! parameter itself.
//!
//! Every occurrence of a repeated parameter yields its own range, so a
//! repeated sensitive value cannot be left half-redacted.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use webproof_common::{Result, WebProofError};

use crate::encoded::{EncodedString, Encoding};
use crate::query::find_url_in_request;
use crate::redaction::Token;
use crate::transcript::Transcript;

/// Half-open `[start, end)` byte interval into a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    /// Build a range that must fit inside `len` bytes.
    ///
    /// ```
    /// use webproof_transcript::ByteRange;
    ///
    /// assert!(ByteRange::checked(2, 5, 5).is_ok());
    /// assert!(ByteRange::checked(2, 6, 5).is_err());
    /// assert!(ByteRange::checked(4, 3, 5).is_err());
    /// ```
    pub fn checked(start: usize, end: usize, len: usize) -> Result<Self> {
        if start > end || end > len {
            return Err(WebProofError::OutOfBounds { start, end, len });
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A located token and where its value sits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRange {
    pub token: Token,
    pub range: ByteRange,
}

/// Delimiters encoded with the haystack's encoding.
struct Delimiters {
    question: Vec<u8>,
    amp: Vec<u8>,
    eq: Vec<u8>,
    hash: Vec<u8>,
    space: Vec<u8>,
    cr: Vec<u8>,
    lf: Vec<u8>,
}

impl Delimiters {
    fn for_encoding(encoding: Encoding) -> Self {
        Self {
            question: encoding.ascii("?"),
            amp: encoding.ascii("&"),
            eq: encoding.ascii("="),
            hash: encoding.ascii("#"),
            space: encoding.ascii(" "),
            cr: encoding.ascii("\r"),
            lf: encoding.ascii("\n"),
        }
    }

    /// `[start, end)` of the query: after the first `?` before `limit`, up to
    /// the nearest terminator.
    fn query(&self, hay: &EncodedString, limit: usize, terminators: &[&[u8]]) -> Option<Range<usize>> {
        let question = hay.find(&self.question, 0).filter(|&pos| pos < limit)?;
        let start = question + self.question.len();
        let end = nearest(hay, start, limit, terminators).unwrap_or(limit);
        Some(start..end)
    }

    /// Value spans of every `name=` field of `query`, ascending.
    fn values(&self, hay: &EncodedString, query: Range<usize>, name: &[u8]) -> Vec<Range<usize>> {
        let needle = [name, self.eq.as_slice()].concat();
        hay.fields(query.start, query.end, &self.amp)
            .into_iter()
            .filter(|field| hay.as_bytes()[field.clone()].starts_with(&needle))
            .map(|field| field.start + needle.len()..field.end)
            .collect()
    }
}

fn nearest(hay: &EncodedString, from: usize, limit: usize, needles: &[&[u8]]) -> Option<usize> {
    needles
        .iter()
        .filter_map(|needle| hay.find(needle, from))
        .filter(|&pos| pos < limit)
        .min()
}

fn not_found(name: &str) -> WebProofError {
    WebProofError::TokenNotFound(format!("query parameter `{name}`"))
}

/// Absolute-in-line mode: `line` is an isolated request line (or URL).
///
/// The query runs from the first `?` of the line to the next space, `#` or
/// line break. A value ends at the next `&`, else at the end of the query.
///
/// ```
/// use webproof_transcript::{range::ranges_in_line, EncodedString};
///
/// let line = EncodedString::utf8("GET /api?userid=5&id=9 HTTP/1.1");
/// let ranges = ranges_in_line(&line, ["id"]).unwrap();
/// assert_eq!(ranges.len(), 1);
/// assert_eq!(&line.as_bytes()[ranges[0].range.start..ranges[0].range.end], b"9");
/// ```
pub fn ranges_in_line<I, S>(line: &EncodedString, names: I) -> Result<Vec<TokenRange>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let delims = Delimiters::for_encoding(line.encoding());
    let line_breaks = [delims.cr.as_slice(), delims.lf.as_slice()];
    let line_end = nearest(line, 0, line.len(), &line_breaks).unwrap_or(line.len());
    let query_ends = [delims.space.as_slice(), delims.hash.as_slice()];
    let query = delims.query(line, line_end, &query_ends);

    let mut out = Vec::new();
    for name in names {
        let name = name.as_ref();
        let encoded = line.encoding().encode(name)?;
        let spans = query
            .clone()
            .map(|query| delims.values(line, query, &encoded))
            .unwrap_or_default();
        if spans.is_empty() {
            return Err(not_found(name));
        }
        for span in spans {
            out.push(TokenRange {
                token: Token::QueryParam(name.to_string()),
                range: ByteRange::checked(span.start, span.end, line.len())?,
            });
        }
    }
    Ok(out)
}

/// Offset-in-transcript mode: locate the URL inside the request line, search
/// within it, and shift every position by the URL's offset.
///
/// A value ends at the next `&` inside the URL, else at the end of the URL
/// token (or its `#` fragment).
///
/// ```
/// use webproof_transcript::{range::ranges_in_request, Transcript};
///
/// let request = Transcript::new("SUBSCRIBE /search?a=1&b=2 HTTP/1.1\r\n\r\n");
/// let ranges = ranges_in_request(&request, ["a", "b"]).unwrap();
/// assert_eq!((ranges[0].range.start, ranges[0].range.end), (20, 21));
/// assert_eq!((ranges[1].range.start, ranges[1].range.end), (24, 25));
/// ```
pub fn ranges_in_request<I, S>(transcript: &Transcript, names: I) -> Result<Vec<TokenRange>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let (url, offset) = find_url_in_request(transcript)?;
    let delims = Delimiters::for_encoding(url.encoding());
    let query = delims.query(&url, url.len(), &[delims.hash.as_slice()]);

    let mut out = Vec::new();
    for name in names {
        let name = name.as_ref();
        let encoded = url.encoding().encode(name)?;
        let spans = query
            .clone()
            .map(|query| delims.values(&url, query, &encoded))
            .unwrap_or_default();
        if spans.is_empty() {
            return Err(not_found(name));
        }
        for span in spans {
            out.push(TokenRange {
                token: Token::QueryParam(name.to_string()),
                range: ByteRange::checked(offset + span.start, offset + span.end, transcript.len())?,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values<'a>(hay: &'a [u8], ranges: &[TokenRange]) -> Vec<&'a [u8]> {
        ranges
            .iter()
            .map(|r| &hay[r.range.start..r.range.end])
            .collect()
    }

    #[test]
    fn line_mode_reads_values_up_to_delimiters() {
        let line = EncodedString::utf8("GET /p?a=1&bb=22&c=333 HTTP/1.1");
        let ranges = ranges_in_line(&line, ["a", "bb", "c"]).unwrap();
        assert_eq!(
            values(line.as_bytes(), &ranges),
            vec![&b"1"[..], &b"22"[..], &b"333"[..]]
        );
    }

    #[test]
    fn line_mode_without_trailing_space_runs_to_end_of_line() {
        let line = EncodedString::utf8("/p?a=1&tail=xyz\r\nHost: h");
        let ranges = ranges_in_line(&line, ["tail"]).unwrap();
        assert_eq!(values(line.as_bytes(), &ranges), vec![&b"xyz"[..]]);
    }

    #[test]
    fn first_parameter_is_anchored_on_question_mark() {
        let line = EncodedString::utf8("GET /p?first=1&second=2 HTTP/1.1");
        let ranges = ranges_in_line(&line, ["first"]).unwrap();
        assert_eq!(values(line.as_bytes(), &ranges), vec![&b"1"[..]]);
    }

    #[test]
    fn suffix_names_do_not_match() {
        let request = Transcript::new("GET /x?userid=5&id=9 HTTP/1.1\r\n\r\n");
        let ranges = ranges_in_request(&request, ["id"]).unwrap();
        assert_eq!(values(request.as_bytes(), &ranges), vec![&b"9"[..]]);

        let only_suffix = Transcript::new("GET /x?userid=5 HTTP/1.1\r\n\r\n");
        let err = ranges_in_request(&only_suffix, ["id"]).unwrap_err();
        assert!(matches!(err, WebProofError::TokenNotFound(_)));
    }

    #[test]
    fn repeated_parameters_get_one_range_each() {
        let request = Transcript::new("GET /x?tag=a&other=1&tag=b HTTP/1.1\r\n\r\n");
        let ranges = ranges_in_request(&request, ["tag"]).unwrap();
        assert_eq!(values(request.as_bytes(), &ranges), vec![&b"a"[..], &b"b"[..]]);
    }

    #[test]
    fn value_recurring_elsewhere_is_not_confused() {
        let request = Transcript::new("GET /9?id=9 HTTP/1.1\r\nX-Id: 9\r\n\r\n");
        let ranges = ranges_in_request(&request, ["id"]).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].range, ByteRange { start: 10, end: 11 });
    }

    #[test]
    fn offset_mode_ends_at_url_end() {
        // "SUBSCRIBE " puts the URL at offset 10.
        let request = Transcript::new("SUBSCRIBE /search?a=1&b=2 HTTP/1.1\r\nHost: h\r\n\r\n");
        let ranges = ranges_in_request(&request, ["a", "b"]).unwrap();
        let amp_b = 10 + "/search?a=1".len();
        assert_eq!(ranges[0].range, ByteRange { start: 20, end: amp_b });
        assert_eq!(ranges[1].range.end, 10 + "/search?a=1&b=2".len());
        assert!(!ranges[0].range.overlaps(&ranges[1].range));
    }

    #[test]
    fn empty_value_yields_empty_range() {
        let request = Transcript::new("GET /x?a=&b=2 HTTP/1.1\r\n\r\n");
        let ranges = ranges_in_request(&request, ["a"]).unwrap();
        assert!(ranges[0].range.is_empty());
    }

    #[test]
    fn percent_encoded_names_match_only_their_raw_bytes() {
        let request = Transcript::new("GET /x?user%20id=1 HTTP/1.1\r\n\r\n");
        assert!(ranges_in_request(&request, ["user id"]).is_err());
        let ranges = ranges_in_request(&request, ["user%20id"]).unwrap();
        assert_eq!(values(request.as_bytes(), &ranges), vec![&b"1"[..]]);
    }

    #[test]
    fn utf16_line_uses_encoded_delimiters() {
        let line = EncodedString::encode("/p?k=v&z=1", Encoding::Utf16Le).unwrap();
        let ranges = ranges_in_line(&line, ["k"]).unwrap();
        assert_eq!(ranges[0].range, ByteRange { start: 10, end: 12 });
    }

    #[test]
    fn names_nested_in_another_value_are_not_parameters() {
        let request = Transcript::new("GET /login?next=/cb?id=LEAK&id=9 HTTP/1.1\r\n\r\n");
        let ranges = ranges_in_request(&request, ["id"]).unwrap();
        assert_eq!(values(request.as_bytes(), &ranges), vec![&b"9"[..]]);
        let next = ranges_in_request(&request, ["next"]).unwrap();
        assert_eq!(values(request.as_bytes(), &next), vec![&b"/cb?id=LEAK"[..]]);

        let line = EncodedString::utf8("GET /login?next=/cb?id=LEAK&id=9 HTTP/1.1");
        let ranges = ranges_in_line(&line, ["id"]).unwrap();
        assert_eq!(values(line.as_bytes(), &ranges), vec![&b"9"[..]]);
    }

    #[test]
    fn name_only_nested_in_a_value_is_not_found() {
        let request = Transcript::new("GET /login?next=/cb?id=LEAK HTTP/1.1\r\n\r\n");
        let err = ranges_in_request(&request, ["id"]).unwrap_err();
        assert!(matches!(err, WebProofError::TokenNotFound(_)));

        let line = EncodedString::utf8("/login?next=/cb?id=LEAK");
        let err = ranges_in_line(&line, ["id"]).unwrap_err();
        assert!(matches!(err, WebProofError::TokenNotFound(_)));
    }

    #[test]
    fn fragment_ends_the_query() {
        let line = EncodedString::utf8("/p?a=1#&b=2");
        assert_eq!(values(line.as_bytes(), &ranges_in_line(&line, ["a"]).unwrap()), vec![&b"1"[..]]);
        assert!(ranges_in_line(&line, ["b"]).is_err());
    }

    #[test]
    fn utf16_request_ranges_are_shifted_by_the_encoded_method() {
        let bytes = Encoding::Utf16Le
            .encode("GET /p?ab=1 HTTP/1.1\r\n\r\n")
            .unwrap();
        let request = Transcript::with_encoding(bytes, Encoding::Utf16Le);
        let ranges = ranges_in_request(&request, ["ab"]).unwrap();
        // "GET /p?ab=" is ten code units.
        assert_eq!(ranges[0].range, ByteRange { start: 20, end: 22 });
        assert_eq!(values(request.as_bytes(), &ranges), vec![&[b'1', 0][..]]);
    }

    /// Deterministic generator so failures reproduce by seed.
    struct Lcg(u64);

    impl Lcg {
        fn below(&mut self, n: usize) -> usize {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 33) as usize % n
        }

        fn word(&mut self, alphabet: &[u8], min: usize, max: usize) -> String {
            let len = min + self.below(max - min + 1);
            (0..len)
                .map(|_| char::from(alphabet[self.below(alphabet.len())]))
                .collect()
        }
    }

    #[test]
    fn generated_queries_give_one_disjoint_range_per_name() {
        for seed in 0..300 {
            let mut rng = Lcg(seed);
            // Short names over two letters overlap as prefixes and suffixes;
            // values may carry `?` and `=` and look like nested parameters.
            let mut params: Vec<(String, String)> = Vec::new();
            for _ in 0..1 + rng.below(6) {
                let name = rng.word(b"ab", 1, 3);
                if params.iter().any(|(n, _)| *n == name) {
                    continue;
                }
                params.push((name, rng.word(b"ab?=/", 0, 5)));
            }
            let query: Vec<String> = params.iter().map(|(n, v)| format!("{n}={v}")).collect();
            let line = format!("GET /p?{} HTTP/1.1", query.join("&"));
            let request = Transcript::new(format!("{line}\r\nHost: h\r\n\r\n"));
            let names: Vec<&str> = params.iter().map(|(n, _)| n.as_str()).collect();

            let in_request = ranges_in_request(&request, &names).unwrap();
            let in_line = ranges_in_line(&EncodedString::utf8(&line), &names).unwrap();
            assert_eq!(in_request.len(), params.len(), "seed {seed}: {line}");
            assert_eq!(in_request, in_line, "seed {seed}: {line}");

            for (found, (_, value)) in in_request.iter().zip(&params) {
                assert_eq!(request.bytes_in(found.range).unwrap(), value.as_bytes(), "seed {seed}: {line}");
            }
            for (i, a) in in_request.iter().enumerate() {
                for b in &in_request[i + 1..] {
                    assert!(!a.range.overlaps(&b.range), "seed {seed}: {line}");
                }
            }
        }
    }
}
