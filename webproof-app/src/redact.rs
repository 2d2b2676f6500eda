//! Offline redaction: what a notarize step would withhold from a captured pair.
use anyhow::{bail, Result};
use serde::Serialize;
use webproof_config::{DisclosureConfig, StepKind, WebProofConfig};
use webproof_transcript::{ByteRange, DisclosurePolicy, RedactionSet, Transcript};

const FILL: u8 = b'*';

#[derive(Debug, Serialize)]
pub struct MessagePreview {
    pub len: usize,
    pub digest: String,
    pub redacted: Vec<ByteRange>,
    pub preview: String,
}

#[derive(Debug, Serialize)]
pub struct RedactionReport {
    pub request: MessagePreview,
    pub response: MessagePreview,
}

/// Disclosure of step `step` in `cfg`, which must be a notarize step.
pub fn step_disclosure(cfg: &WebProofConfig, step: usize) -> Result<DisclosureConfig> {
    let Some(config) = cfg.request.steps.get(step) else {
        bail!("no step {step}; the request declares {}", cfg.request.steps.len());
    };
    match &config.kind {
        StepKind::Notarize { disclosure, .. } | StepKind::NotarizeGql { disclosure, .. } => {
            Ok(disclosure.clone())
        }
        other => bail!("step {step} is `{}`, not a notarize step", other.name()),
    }
}

pub fn redact(
    request: &Transcript,
    response: &Transcript,
    disclosure: &DisclosureConfig,
) -> Result<RedactionReport> {
    Ok(RedactionReport {
        request: preview(request, disclosure.request.as_ref())?,
        response: preview(response, disclosure.response.as_ref())?,
    })
}

fn preview(transcript: &Transcript, policy: Option<&DisclosurePolicy>) -> Result<MessagePreview> {
    let set = match policy {
        Some(policy) => RedactionSet::build(transcript, policy)?,
        None => RedactionSet::empty(transcript.len()),
    };
    let masked = set.apply(transcript, FILL)?;
    Ok(MessagePreview {
        len: transcript.len(),
        digest: transcript.digest(),
        redacted: set.ranges().to_vec(),
        preview: String::from_utf8_lossy(&masked).into_owned(),
    })
}
