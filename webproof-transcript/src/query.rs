use std::collections::BTreeSet;

use webproof_common::{Result, WebProofError};

use crate::encoded::EncodedString;
use crate::transcript::Transcript;

/// Find the URL token of a request line (`METHOD URL VERSION`) and its byte
/// offset in the transcript.
///
/// ```
/// use webproof_transcript::{query::find_url_in_request, Transcript};
///
/// let request = Transcript::new("GET /search?q=rust HTTP/1.1\r\nHost: example.com\r\n\r\n");
/// let (url, offset) = find_url_in_request(&request).unwrap();
/// assert_eq!(url.as_bytes(), b"/search?q=rust");
/// assert_eq!(offset, 4);
/// ```
pub fn find_url_in_request(transcript: &Transcript) -> Result<(EncodedString, usize)> {
    let message = transcript.encoded();
    let line_len = transcript.first_line().len();
    let space = message.encoding().ascii(" ");
    let mut fields = message
        .fields(0, line_len, &space)
        .into_iter()
        .filter(|field| !field.is_empty());

    let method = fields
        .next()
        .ok_or_else(|| WebProofError::MalformedRequestLine("missing method".into()))?;
    let url = fields.next().ok_or_else(|| {
        let method = message
            .slice(method.start, method.end)
            .map(|m| m.decode_lossy())
            .unwrap_or_default();
        WebProofError::MalformedRequestLine(format!("missing URL after `{method}`"))
    })?;

    Ok((message.slice(url.start, url.end)?, url.start))
}

/// Parameter names of the URL's query component, de-duplicated.
///
/// Names are kept as raw bytes (no percent-decoding) so they can be located
/// again inside the transcript.
///
/// ```
/// use webproof_transcript::{query::find_all_query_params, EncodedString};
///
/// let names = find_all_query_params(&EncodedString::utf8("/p?b=1&a=2&b=3&flag#frag=1"));
/// let names: Vec<String> = names.iter().map(|n| n.decode_lossy()).collect();
/// assert_eq!(names, vec!["a", "b", "flag"]);
/// ```
pub fn find_all_query_params(url: &EncodedString) -> BTreeSet<EncodedString> {
    let encoding = url.encoding();
    let question = encoding.ascii("?");
    let Some(query_start) = url.find(&question, 0).map(|pos| pos + question.len()) else {
        return BTreeSet::new();
    };
    let query_end = url
        .find(&encoding.ascii("#"), query_start)
        .unwrap_or(url.len());
    let eq = encoding.ascii("=");

    url.fields(query_start, query_end, &encoding.ascii("&"))
        .into_iter()
        .filter_map(|segment| {
            let name_end = url
                .find(&eq, segment.start)
                .filter(|&pos| pos < segment.end)
                .unwrap_or(segment.end);
            (name_end > segment.start)
                .then(|| EncodedString::from_bytes(&url.as_bytes()[segment.start..name_end], encoding))
        })
        .collect()
}

/// Absolute URL a request targets: the request-target itself when it is
/// already absolute, else `https://<Host><path>`.
///
/// ```
/// use webproof_transcript::{query::request_target_url, Transcript};
///
/// let request = Transcript::new("GET /home?x=1 HTTP/1.1\r\nhost: x.com\r\n\r\n");
/// assert_eq!(request_target_url(&request).unwrap(), "https://x.com/home?x=1");
/// ```
pub fn request_target_url(transcript: &Transcript) -> Result<String> {
    let (url, _) = find_url_in_request(transcript)?;
    let target = url.decode_lossy();
    if target.starts_with("https://") || target.starts_with("http://") {
        return Ok(target);
    }
    let host = transcript
        .header("host")
        .ok_or_else(|| WebProofError::MalformedRequestLine("missing Host header".into()))?;
    Ok(format!("https://{}{}", String::from_utf8_lossy(host), target))
}
