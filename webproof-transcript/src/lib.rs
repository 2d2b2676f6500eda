//! Byte-level views over captured HTTP transcripts.
//!
//! Everything here works on the exact bytes that went over the wire: where a
//! query parameter's value sits in the request line, where a JSON string sits
//! in a response body, and which ranges a disclosure policy withholds. Ranges
//! are always positions into the transcript they were computed from.
//!
//! ```
//! use webproof_transcript::{DisclosurePolicy, RedactionSet, Token, Transcript};
//!
//! let response = Transcript::new("HTTP/1.1 200 OK\r\n\r\n{\"user\":\"ana\",\"id\":\"1\"}");
//! let policy = DisclosurePolicy::Reveal(vec![Token::JsonPath("user".into())]);
//! let set = RedactionSet::build(&response, &policy).unwrap();
//! let masked = set.apply(&response, b'*').unwrap();
//! assert!(String::from_utf8(masked).unwrap().contains("ana"));
//! ```

pub mod encoded;
pub mod graphql;
pub mod paths;
pub mod query;
pub mod range;
pub mod redaction;
pub mod transcript;

pub use encoded::{EncodedString, Encoding};
pub use range::{ByteRange, TokenRange};
pub use redaction::{DisclosurePolicy, RedactionSet, Token};
pub use transcript::Transcript;
