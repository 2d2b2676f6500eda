//! Common types shared across the web proof workspace.
//!
//! This crate holds the error taxonomy every other crate reports into and the
//! observability helpers binaries and tests use to install `tracing`. It stays
//! dependency-light so the pure transcript crate can depend on it.
//!
//! # Overview
//!
//! - [`WebProofError`] and [`Result`]: shared error handling
//! - [`observability`]: centralised tracing/logging initialisation
//!
//! # Examples
//!
//! ```rust
//! use webproof_common::WebProofError;
//!
//! let err = WebProofError::TokenNotFound("query parameter `id`".into());
//! assert_eq!(err.to_string(), "token not found in transcript: query parameter `id`");
//! ```
use std::time::Duration;

pub mod observability;

/// Error types used across the web proof system.
#[derive(thiserror::Error, Debug)]
pub enum WebProofError {
    /// The first line of a request did not carry both a method and a URL.
    #[error("malformed request line: {0}")]
    MalformedRequestLine(String),

    /// A declared query parameter or JSON path is absent from the transcript.
    #[error("token not found in transcript: {0}")]
    TokenNotFound(String),

    /// Navigation never matched an `expectUrl` pattern within the caller's deadline.
    #[error("navigation did not match `{pattern}` within {waited:?}")]
    PatternMismatch { pattern: String, waited: Duration },

    /// The notarization collaborator reported an error.
    #[error("notarization failed: {0}")]
    NotarizationFailed(String),

    /// The UI surface was torn down while a step was still running.
    #[error("session closed before step {step} completed")]
    SessionClosedPrematurely { step: usize },

    /// A computed range falls outside the transcript. Never clamped.
    #[error("range {start}..{end} is out of bounds for {len} bytes")]
    OutOfBounds { start: usize, end: usize, len: usize },

    /// The message body could not be read as the expected document.
    #[error("malformed message body: {0}")]
    MalformedBody(String),

    /// A string cannot be represented in the requested byte encoding.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A captured GraphQL request names a different operation than configured.
    #[error("graphql operation mismatch: expected `{expected}`, found `{found}`")]
    GraphQlOperationMismatch { expected: String, found: String },

    /// Configuration was incomplete or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A driver or other collaborator (browser, capture, transport) reported an error.
    #[error("driver error: {0}")]
    Driver(#[from] anyhow::Error),
}

/// Convenient alias for results that use [`WebProofError`].
pub type Result<T> = std::result::Result<T, WebProofError>;
