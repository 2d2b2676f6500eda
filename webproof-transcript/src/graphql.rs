//! GraphQL requests name their operation in the JSON body (`POST`) or in the
//! query string (`GET`).
use webproof_common::{Result, WebProofError};

use crate::paths::json_string_value;
use crate::range::ranges_in_request;
use crate::transcript::Transcript;

pub const OPERATION_NAME: &str = "operationName";

/// The request's `operationName`. The JSON body wins; a request without one
/// falls back to the first `operationName` query parameter, whose bytes are
/// returned as sent.
///
/// ```
/// use webproof_transcript::{graphql::operation_name, Transcript};
///
/// let post = Transcript::new("POST /gql HTTP/1.1\r\n\r\n{\"operationName\":\"Viewer\"}");
/// assert_eq!(operation_name(&post).unwrap(), b"Viewer");
/// let get = Transcript::new("GET /gql?operationName=Feed HTTP/1.1\r\n\r\n");
/// assert_eq!(operation_name(&get).unwrap(), b"Feed");
/// ```
pub fn operation_name(request: &Transcript) -> Result<Vec<u8>> {
    match json_string_value(request, OPERATION_NAME) {
        Ok(name) => Ok(name.into_bytes()),
        Err(WebProofError::TokenNotFound(_) | WebProofError::MalformedBody(_)) => {
            let ranges = ranges_in_request(request, [OPERATION_NAME])?;
            let first = ranges
                .first()
                .ok_or_else(|| WebProofError::TokenNotFound(OPERATION_NAME.into()))?;
            Ok(request.bytes_in(first.range)?.to_vec())
        }
        Err(e) => Err(e),
    }
}
