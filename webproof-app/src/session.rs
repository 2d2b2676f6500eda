use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use webproof_actors::system::ActorSystem;
use webproof_actors::{
    spawn_coordinator, spawn_engine, EngineDeps, ExtensionMessage, ProofArtifact, SessionChannel,
    SessionState, SessionStorage, SidePanel, StepEngine,
};
use webproof_config::WebProofConfig;

const STORAGE_MAILBOX: usize = 256;

#[derive(Debug, Serialize)]
pub struct StepProof {
    pub step: usize,
    pub label: String,
    pub proof: ProofArtifact,
}

/// What a finished session produced.
#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub state: SessionState,
    pub proofs: Vec<StepProof>,
    pub variables: BTreeMap<String, String>,
}

/// Run one proving session to its end, or until Ctrl-C closes the panel.
pub async fn run_session(cfg: &WebProofConfig, deps: EngineDeps) -> Result<SessionReport> {
    let mut system = ActorSystem::new();
    let storage = system.spawn(SessionStorage::new(), STORAGE_MAILBOX);
    let channel = SessionChannel::open(storage);
    let cancel = CancellationToken::new();

    let coordinator = spawn_coordinator(&channel, cancel.clone());
    let panel = SidePanel::attach(channel.clone());
    let mut events = channel.subscribe();

    let labels: Vec<String> = cfg.request.steps.iter().map(|s| s.label.clone()).collect();
    let engine = StepEngine::new(cfg.request.clone(), deps, channel.clone(), cancel)?
        .with_expect_url_timeout(cfg.session.expect_url_timeout());
    let engine = spawn_engine(engine).await?;

    let mut report = SessionReport {
        state: SessionState::Running,
        proofs: Vec::new(),
        variables: BTreeMap::new(),
    };
    let mut close_requested = false;
    loop {
        let msg = tokio::select! {
            msg = events.recv() => msg,
            _ = tokio::signal::ctrl_c(), if !close_requested => {
                info!("session.interrupted");
                close_requested = true;
                panel.request_close();
                continue;
            }
        };
        let Some(msg) = msg else { break };
        match msg {
            ExtensionMessage::ProofDone { step, proof } => report.proofs.push(StepProof {
                step,
                label: labels.get(step).cloned().unwrap_or_default(),
                proof,
            }),
            ExtensionMessage::VariablesExtracted { variables, .. } => {
                report.variables.extend(variables)
            }
            ExtensionMessage::ProofError { step, error } => {
                warn!(?step, error = %error, "session.proof_error");
            }
            ExtensionMessage::StepsUpdated(view) => {
                if view.session_state.is_terminal() {
                    report.state = view.session_state;
                    break;
                }
            }
            _ => {}
        }
    }

    if let Err(e) = engine.task.await? {
        warn!(error = %e, "session.engine_failed");
    }
    panel.unload().await;
    coordinator.await?;
    drop(channel);
    system.graceful_shutdown().await?;
    info!(state = ?report.state, proofs = report.proofs.len(), "session.finished");
    Ok(report)
}

/// Collaborators for a live session: the WebDriver browser, the spool
/// directory and the HTTP notary.
pub async fn live_deps(cfg: &WebProofConfig) -> Result<(EngineDeps, Arc<webproof_drivers::WebDriverBrowser>)> {
    let browser = Arc::new(webproof_drivers::WebDriverBrowser::connect(&cfg.browser).await?);
    let deps = EngineDeps {
        browser: browser.clone(),
        capture: Arc::new(crate::capture::SpoolCapture::from_config(&cfg.capture)),
        notarizer: Arc::new(webproof_actors::HttpNotary::from_config(&cfg.notary)?),
    };
    Ok((deps, browser))
}
