//! [`Notarizer`] backed by a notary's HTTP API.
use crate::traits::{NotarizationRequest, Notarizer, ProofArtifact};
use anyhow::Context as _;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use webproof_config::NotaryConfig;
use webproof_http::{HttpClient, HttpError};
use webproof_transcript::{ByteRange, RedactionSet, Transcript};

const NOTARIZE_PATH: &str = "v1/notarize";

#[derive(Serialize)]
struct NotarizeBody<'a> {
    notary_public_key: &'a str,
    request: MessageBody<'a>,
    response: MessageBody<'a>,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    /// Hex of the raw bytes.
    transcript: String,
    redactions: &'a [ByteRange],
}

impl<'a> MessageBody<'a> {
    fn new(transcript: &Transcript, redactions: &'a RedactionSet) -> Self {
        Self {
            transcript: hex::encode(transcript.as_bytes()),
            redactions: redactions.ranges(),
        }
    }
}

pub struct HttpNotary {
    client: HttpClient,
}

impl HttpNotary {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: &NotaryConfig) -> Result<Self, HttpError> {
        let mut client = HttpClient::new(&config.url)?;
        if let Some(timeout) = config.timeout() {
            client = client.with_timeout(timeout);
        }
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Notarizer for HttpNotary {
    async fn notarize(&self, request: NotarizationRequest) -> anyhow::Result<ProofArtifact> {
        let body = NotarizeBody {
            notary_public_key: &request.notary_public_key,
            request: MessageBody::new(&request.request, &request.request_redactions),
            response: MessageBody::new(&request.response, &request.response_redactions),
        };
        info!(
            notary = %self.client.base(),
            request_digest = %request.request.digest(),
            response_digest = %request.response.digest(),
            "notary.request"
        );
        let proof: ProofArtifact = self
            .client
            .post_json(NOTARIZE_PATH, None, &body)
            .await
            .context("notary rejected the transcript")?;
        Ok(proof)
    }
}
