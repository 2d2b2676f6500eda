//! The step engine: one actor per proving session driving the configured
//! steps in order.
//!
//! Each step kind has its own handler. Navigation waits are message driven:
//! a feeder task forwards the browser's navigation events into the mailbox, so
//! the engine never polls. Every transition is mirrored into session storage
//! and announced as `StepsUpdated`.
use crate::actor::{spawn_actor, Actor, ActorHandle, Addr, Context};
use crate::channel::{ExtensionMessage, SessionChannel};
use crate::steps::{Advance, StepsView, Steps};
use crate::storage::StorageKey;
use crate::traits::{
    BrowserContext, CaptureRequest, CapturedExchange, NotarizationRequest, Notarizer,
    TranscriptSource,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webproof_common::{Result, WebProofError};
use webproof_config::{DisclosureConfig, StepKind, UrlMatcher, UrlPattern, WebProofRequestConfig};
use webproof_transcript::graphql::operation_name;
use webproof_transcript::paths::{body_string_paths, json_string_value};
use webproof_transcript::{DisclosurePolicy, RedactionSet, Transcript};

const MAILBOX: usize = 32;

/// The engine's collaborators.
#[derive(Clone)]
pub struct EngineDeps {
    pub browser: Arc<dyn BrowserContext>,
    pub capture: Arc<dyn TranscriptSource>,
    pub notarizer: Arc<dyn Notarizer>,
}

pub enum EngineMsg {
    Start,
    Navigated(String),
    NavigationTimeout { step: usize },
    Close,
    Snapshot { reply: oneshot::Sender<StepsView> },
}

enum Activation {
    Completed,
    Waiting,
}

struct UrlWait {
    step: usize,
    pattern: String,
    matcher: UrlMatcher,
    since: Instant,
}

pub struct StepEngine {
    steps: Steps,
    deps: EngineDeps,
    notary_public_key: String,
    expect_url_timeout: Option<Duration>,
    channel: SessionChannel,
    cancel: CancellationToken,
    waiting: Option<UrlWait>,
    variables: BTreeMap<String, String>,
}

impl StepEngine {
    pub fn new(
        request: WebProofRequestConfig,
        deps: EngineDeps,
        channel: SessionChannel,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let steps = Steps::new(request.steps).map_err(|e| WebProofError::Config(e.to_string()))?;
        Ok(Self {
            steps,
            deps,
            notary_public_key: request.notary_public_key,
            expect_url_timeout: None,
            channel,
            cancel,
            waiting: None,
            variables: BTreeMap::new(),
        })
    }

    /// Give up on an `expectUrl` step after `timeout`. Without one the engine
    /// waits until the session is closed.
    pub fn with_expect_url_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.expect_url_timeout = timeout;
        self
    }

    /// Run steps until one has to wait or the session ends.
    async fn drive(&mut self, ctx: &mut Context<Self>) {
        while let Some(idx) = self.steps.current() {
            if self.cancel.is_cancelled() {
                self.end(idx, WebProofError::SessionClosedPrematurely { step: idx }, ctx)
                    .await;
                return;
            }
            match self.activate(idx, ctx).await {
                Ok(Activation::Completed) => self.complete(idx, ctx).await,
                Ok(Activation::Waiting) => return,
                Err(e) => {
                    self.end(idx, e, ctx).await;
                    return;
                }
            }
        }
    }

    async fn activate(&mut self, idx: usize, ctx: &mut Context<Self>) -> Result<Activation> {
        let Some(step) = self.steps.step(idx).cloned() else {
            return Err(WebProofError::Config(format!("no step at index {idx}")));
        };
        info!(step = idx, kind = step.kind.name(), label = %step.label, "engine.step.activated");
        match &step.kind {
            StepKind::StartPage { link } => {
                self.until_cancelled(idx, self.deps.browser.open(link)).await?;
                Ok(Activation::Completed)
            }
            StepKind::ExpectUrl { link } => self.expect_url(idx, link, ctx).await,
            StepKind::Notarize {
                link, disclosure, ..
            } => self.notarize(idx, link, None, disclosure).await,
            StepKind::NotarizeGql {
                link,
                operation,
                disclosure,
                ..
            } => self.notarize(idx, link, Some(operation.as_str()), disclosure).await,
            StepKind::ExtractVariables { link, variables } => {
                self.extract_variables(idx, link, variables).await
            }
        }
    }

    async fn expect_url(
        &mut self,
        idx: usize,
        link: &UrlPattern,
        ctx: &mut Context<Self>,
    ) -> Result<Activation> {
        let matcher = link
            .matcher()
            .map_err(|e| WebProofError::Config(format!("url pattern `{link}`: {e}")))?;
        let current = self
            .until_cancelled(idx, self.deps.browser.current_url())
            .await?;
        if matcher.is_match(&current) {
            return Ok(Activation::Completed);
        }

        debug!(step = idx, pattern = %link, "engine.expect_url.waiting");
        self.waiting = Some(UrlWait {
            step: idx,
            pattern: link.to_string(),
            matcher,
            since: Instant::now(),
        });
        if let (Some(timeout), Some(addr)) = (self.expect_url_timeout, ctx.addr()) {
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = addr.send(EngineMsg::NavigationTimeout { step: idx }).await;
            });
        }
        Ok(Activation::Waiting)
    }

    async fn notarize(
        &mut self,
        idx: usize,
        link: &UrlPattern,
        operation: Option<&str>,
        disclosure: &DisclosureConfig,
    ) -> Result<Activation> {
        let exchange = self.capture(idx, link, operation).await?;
        if let Some(expected) = operation {
            check_graphql_operation(&exchange.request, expected)?;
        }

        let request_redactions = redactions_for(&exchange.request, disclosure.request.as_ref())?;
        let response_redactions =
            redactions_for(&exchange.response, disclosure.response.as_ref())?;
        info!(
            step = idx,
            request_redacted = request_redactions.redacted_len(),
            response_redacted = response_redactions.redacted_len(),
            "engine.notarize.start"
        );

        // In-flight notarization is left to finish; only the collaborator can abort it.
        let proof = self
            .deps
            .notarizer
            .notarize(NotarizationRequest {
                request: exchange.request,
                response: exchange.response,
                request_redactions,
                response_redactions,
                notary_public_key: self.notary_public_key.clone(),
            })
            .await
            .map_err(|e| WebProofError::NotarizationFailed(format!("{e:#}")))?;

        info!(step = idx, proof_id = ?proof.id, "engine.notarize.done");
        self.channel
            .publish(ExtensionMessage::ProofDone { step: idx, proof });
        Ok(Activation::Completed)
    }

    async fn extract_variables(
        &mut self,
        idx: usize,
        link: &UrlPattern,
        declared: &[String],
    ) -> Result<Activation> {
        let exchange = self.capture(idx, link, None).await?;
        let paths = if declared.is_empty() {
            body_string_paths(&exchange.response)?
        } else {
            declared.to_vec()
        };

        let mut extracted = BTreeMap::new();
        for path in paths {
            let value = json_string_value(&exchange.response, &path)?;
            extracted.insert(path, value);
        }
        info!(step = idx, count = extracted.len(), "engine.variables.extracted");

        self.variables.extend(extracted.clone());
        self.channel
            .store(StorageKey::ExtractedVariables, &self.variables)
            .await;
        self.channel.publish(ExtensionMessage::VariablesExtracted {
            step: idx,
            variables: extracted,
        });
        Ok(Activation::Completed)
    }

    async fn capture(
        &self,
        idx: usize,
        link: &UrlPattern,
        operation: Option<&str>,
    ) -> Result<CapturedExchange> {
        let request = CaptureRequest {
            step: idx,
            url: link.clone(),
            graphql_operation: operation.map(str::to_owned),
        };
        let exchange = self
            .until_cancelled(idx, self.deps.capture.capture(&request))
            .await?;
        debug!(
            step = idx,
            url = %exchange.url,
            request_len = exchange.request.len(),
            response_len = exchange.response.len(),
            response_digest = %exchange.response.digest(),
            "engine.capture.done"
        );
        Ok(exchange)
    }

    /// Await a collaborator unless the session is closed first.
    async fn until_cancelled<T>(
        &self,
        step: usize,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(WebProofError::SessionClosedPrematurely { step }),
            res = fut => res.map_err(WebProofError::Driver),
        }
    }

    async fn complete(&mut self, idx: usize, ctx: &mut Context<Self>) {
        match self.steps.complete_current() {
            Ok(Advance::Promoted(next)) => {
                info!(step = idx, next, "engine.step.completed");
            }
            Ok(Advance::Finished) => {
                info!(step = idx, "engine.session.completed");
                ctx.stop();
            }
            Err(e) => {
                warn!(step = idx, error = %e, "engine.step.complete_rejected");
                return;
            }
        }
        self.mirror().await;
    }

    /// Terminal transition: `Closed` for a premature close, `Error` otherwise.
    async fn end(&mut self, idx: usize, err: WebProofError, ctx: &mut Context<Self>) {
        self.waiting = None;
        let transition = match &err {
            WebProofError::SessionClosedPrematurely { .. } => {
                info!(step = idx, "engine.session.closed");
                self.steps.close()
            }
            _ => {
                let reason = err.to_string();
                warn!(step = idx, error = %reason, "engine.step.failed");
                let res = self.steps.fail(reason.clone());
                if res.is_ok() {
                    self.channel.publish(ExtensionMessage::ProofError {
                        step: Some(idx),
                        error: reason,
                    });
                }
                res
            }
        };
        ctx.stop();
        if let Err(e) = transition {
            debug!(step = idx, error = %e, "engine.end.ignored");
            return;
        }
        self.mirror().await;
    }

    async fn mirror(&self) {
        let view = self.steps.view();
        self.channel
            .store(StorageKey::CurrentStep, &view.current_step)
            .await;
        self.channel
            .store(StorageKey::StepStatuses, &view.step_statuses)
            .await;
        self.channel
            .store(StorageKey::SessionState, &view.session_state)
            .await;
        self.channel.publish(ExtensionMessage::StepsUpdated(view));
    }
}

#[async_trait::async_trait]
impl Actor for StepEngine {
    type Msg = EngineMsg;

    async fn handle(&mut self, msg: Self::Msg, ctx: &mut Context<Self>) -> anyhow::Result<()> {
        match msg {
            EngineMsg::Start => {
                info!(session = %self.channel.session(), steps = self.steps.len(), "engine.started");
                self.mirror().await;
                self.drive(ctx).await;
            }
            EngineMsg::Navigated(url) => {
                if let Some(wait) = self.waiting.take_if(|wait| wait.matcher.is_match(&url)) {
                    debug!(step = wait.step, url = %url, "engine.expect_url.matched");
                    self.complete(wait.step, ctx).await;
                    self.drive(ctx).await;
                }
            }
            EngineMsg::NavigationTimeout { step } => {
                if let Some(wait) = self.waiting.take_if(|wait| wait.step == step) {
                    let err = WebProofError::PatternMismatch {
                        pattern: wait.pattern,
                        waited: wait.since.elapsed(),
                    };
                    self.end(step, err, ctx).await;
                }
            }
            EngineMsg::Close => match self.steps.current() {
                Some(idx) => {
                    self.end(idx, WebProofError::SessionClosedPrematurely { step: idx }, ctx)
                        .await
                }
                None => ctx.stop(),
            },
            EngineMsg::Snapshot { reply } => {
                let _ = reply.send(self.steps.view());
            }
        }
        Ok(())
    }
}

fn redactions_for(transcript: &Transcript, policy: Option<&DisclosurePolicy>) -> Result<RedactionSet> {
    match policy {
        Some(policy) => RedactionSet::build(transcript, policy),
        None => Ok(RedactionSet::empty(transcript.len())),
    }
}

/// Compare the request's `operationName` with `expected`, byte for byte.
fn check_graphql_operation(request: &Transcript, expected: &str) -> Result<()> {
    let found = operation_name(request)?;
    if found == expected.as_bytes() {
        Ok(())
    } else {
        Err(WebProofError::GraphQlOperationMismatch {
            expected: expected.to_string(),
            found: String::from_utf8_lossy(&found).into_owned(),
        })
    }
}

/// Spawn `engine`, forward its browser's navigations and the cancellation
/// token into its mailbox, and start it.
///
/// The navigation subscription is taken before `Start` is sent, so no event
/// after activation can be missed.
pub async fn spawn_engine(engine: StepEngine) -> anyhow::Result<ActorHandle<StepEngine>> {
    let navigations = engine.deps.browser.navigations();
    let cancel = engine.cancel.clone();
    let handle = spawn_actor(engine, MAILBOX);

    tokio::spawn(feed_navigations(handle.addr.clone(), navigations, cancel));

    handle
        .addr
        .send(EngineMsg::Start)
        .await
        .map_err(|_| anyhow::anyhow!("engine stopped before start"))?;
    Ok(handle)
}

async fn feed_navigations(
    addr: Addr<StepEngine>,
    mut navigations: broadcast::Receiver<String>,
    cancel: CancellationToken,
) {
    let mut browser_open = true;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = addr.send(EngineMsg::Close).await;
                break;
            }
            _ = addr.closed() => break,
            nav = navigations.recv(), if browser_open => match nav {
                Ok(url) => {
                    if addr.send(EngineMsg::Navigated(url)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "engine.navigation.lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("engine.navigation.source_closed");
                    browser_open = false;
                }
            },
        }
    }
}
