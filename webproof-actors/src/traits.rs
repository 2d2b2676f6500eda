//! Seams to the world outside the engine: the browser, whatever captures
//! HTTP exchanges, and the notary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use webproof_config::UrlPattern;
use webproof_transcript::{RedactionSet, Transcript};

/// The browsing context a session drives.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Instruct the context to open `url`; returns once the instruction is issued.
    async fn open(&self, url: &str) -> anyhow::Result<()>;

    async fn current_url(&self) -> anyhow::Result<String>;

    /// A fresh subscription to top-level URL changes.
    fn navigations(&self) -> broadcast::Receiver<String>;
}

/// Which exchange a step wants.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub step: usize,
    pub url: UrlPattern,
    /// For GraphQL steps, the `operationName` to prefer among exchanges
    /// sharing one endpoint.
    pub graphql_operation: Option<String>,
}

/// A captured request/response pair. The bytes stay with whoever holds this.
#[derive(Debug, Clone)]
pub struct CapturedExchange {
    pub url: String,
    pub request: Transcript,
    pub response: Transcript,
}

#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Wait for the first exchange matching `request`.
    async fn capture(&self, request: &CaptureRequest) -> anyhow::Result<CapturedExchange>;
}

#[derive(Debug, Clone)]
pub struct NotarizationRequest {
    pub request: Transcript,
    pub response: Transcript,
    pub request_redactions: RedactionSet,
    pub response_redactions: RedactionSet,
    pub notary_public_key: String,
}

/// Whatever the notary hands back; opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofArtifact {
    #[serde(default)]
    pub id: Option<String>,
    pub presentation: String,
}

#[async_trait]
pub trait Notarizer: Send + Sync {
    async fn notarize(&self, request: NotarizationRequest) -> anyhow::Result<ProofArtifact>;
}
