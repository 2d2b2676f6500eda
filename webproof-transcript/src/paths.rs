//! Dot-paths of string leaves in JSON documents, and where those strings sit
//! inside a captured message.
//!
//! Paths join object keys with `.`; array elements contribute their index
//! (`items.0.name`). Keys that themselves contain a `.` cannot be addressed.

use std::collections::HashMap;

use serde_json::value::RawValue;
use serde_json::Value;
use webproof_common::{Result, WebProofError};

use crate::encoded::Encoding;
use crate::range::{ByteRange, TokenRange};
use crate::redaction::Token;
use crate::transcript::Transcript;

/// Every string-valued leaf's dot-path, depth-first in document order.
///
/// ```
/// use webproof_transcript::paths::get_string_paths;
///
/// let paths = get_string_paths(r#"{"a":{"b":"x","c":1},"d":"y"}"#).unwrap();
/// assert_eq!(paths, vec!["a.b", "d"]);
/// ```
pub fn get_string_paths(json_text: &str) -> Result<Vec<String>> {
    let doc: Value = serde_json::from_str(json_text)
        .map_err(|e| WebProofError::MalformedBody(format!("invalid JSON: {e}")))?;
    let mut paths = Vec::new();
    collect_string_paths(&doc, None, &mut paths);
    Ok(paths)
}

fn collect_string_paths(value: &Value, prefix: Option<&str>, out: &mut Vec<String>) {
    let join = |segment: &str| match prefix {
        Some(p) => format!("{p}.{segment}"),
        None => segment.to_string(),
    };
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                visit_child(child, join(key), out);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                visit_child(child, join(&idx.to_string()), out);
            }
        }
        _ => {}
    }
}

fn visit_child(child: &Value, path: String, out: &mut Vec<String>) {
    match child {
        Value::String(_) => out.push(path),
        Value::Object(_) | Value::Array(_) => collect_string_paths(child, Some(&path), out),
        _ => {}
    }
}

/// String leaf paths of a captured message's JSON body.
pub fn body_string_paths(transcript: &Transcript) -> Result<Vec<String>> {
    get_string_paths(json_body(transcript)?)
}

/// Byte range of the string value at `path` inside the message body.
///
/// The range covers the raw bytes between the quotes, escapes included, so
/// it can be revealed or withheld exactly as it went over the wire.
///
/// ```
/// use webproof_transcript::{paths::json_value_range, Transcript};
///
/// let response = Transcript::new("HTTP/1.1 200 OK\r\n\r\n{\"user\":{\"name\":\"ana\"}}");
/// let range = json_value_range(&response, "user.name").unwrap();
/// assert_eq!(&response.as_bytes()[range.start..range.end], b"ana");
/// ```
pub fn json_value_range(transcript: &Transcript, path: &str) -> Result<ByteRange> {
    let body_offset = transcript
        .body_offset()
        .ok_or_else(|| WebProofError::MalformedBody("message head is not terminated".into()))?;
    let text = json_body(transcript)?;

    let mut current: &RawValue = serde_json::from_str(text)
        .map_err(|e| WebProofError::MalformedBody(format!("invalid JSON: {e}")))?;
    for segment in path.split('.') {
        current = descend(current, segment).ok_or_else(|| not_found(path))?;
    }

    let raw = current.get();
    if !raw.starts_with('"') {
        return Err(WebProofError::TokenNotFound(format!(
            "JSON path `{path}` is not a string"
        )));
    }
    // `raw` borrows from `text`, so its address gives its position in the body.
    let offset = raw.as_ptr() as usize - text.as_ptr() as usize;
    debug_assert!(offset + raw.len() <= text.len());

    let start = body_offset + offset + 1;
    let end = body_offset + offset + raw.len() - 1;
    ByteRange::checked(start, end, transcript.len())
}

/// The unescaped string at `path`, read back from the bytes its range covers.
///
/// ```
/// use webproof_transcript::{paths::json_string_value, Transcript};
///
/// let response = Transcript::new("HTTP/1.1 200 OK\r\n\r\n{\"q\":\"a\\\"b\"}");
/// assert_eq!(json_string_value(&response, "q").unwrap(), "a\"b");
/// ```
pub fn json_string_value(transcript: &Transcript, path: &str) -> Result<String> {
    let range = json_value_range(transcript, path)?;
    let raw = transcript.bytes_in(range)?;
    let mut quoted = Vec::with_capacity(raw.len() + 2);
    quoted.push(b'"');
    quoted.extend_from_slice(raw);
    quoted.push(b'"');
    serde_json::from_slice(&quoted)
        .map_err(|e| WebProofError::MalformedBody(format!("JSON path `{path}`: {e}")))
}

/// Ranges for several JSON paths; fails on the first one that is missing.
pub fn json_value_ranges<I, S>(transcript: &Transcript, paths: I) -> Result<Vec<TokenRange>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    paths
        .into_iter()
        .map(|path| {
            let path = path.as_ref();
            Ok(TokenRange {
                token: Token::JsonPath(path.to_string()),
                range: json_value_range(transcript, path)?,
            })
        })
        .collect()
}

fn descend<'a>(node: &'a RawValue, segment: &str) -> Option<&'a RawValue> {
    let raw = node.get();
    match raw.as_bytes().first()? {
        b'{' => {
            let fields: HashMap<String, &'a RawValue> = serde_json::from_str(raw).ok()?;
            fields.get(segment).copied()
        }
        b'[' => {
            let idx: usize = segment.parse().ok()?;
            let items: Vec<&'a RawValue> = serde_json::from_str(raw).ok()?;
            items.get(idx).copied()
        }
        _ => None,
    }
}

fn json_body(transcript: &Transcript) -> Result<&str> {
    if transcript.encoded().encoding() != Encoding::Utf8 {
        return Err(WebProofError::Encoding(
            "JSON bodies must be captured as UTF-8".into(),
        ));
    }
    std::str::from_utf8(transcript.body()?)
        .map_err(|e| WebProofError::MalformedBody(format!("body is not UTF-8: {e}")))
}

fn not_found(path: &str) -> WebProofError {
    WebProofError::TokenNotFound(format!("JSON path `{path}`"))
}
