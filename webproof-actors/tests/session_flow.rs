mod common;

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use webproof_actors::actor::spawn_actor;
use webproof_actors::{
    spawn_coordinator, spawn_engine, BrowserContext, CaptureRequest, CapturedExchange,
    EngineDeps, ExtensionMessage, NotarizationRequest, Notarizer, ProofArtifact, SessionChannel,
    SessionState, SessionStorage, SidePanel, StepEngine, StepStatus, StepsView, Subscription,
    TranscriptSource,
};
use webproof_config::{DisclosureConfig, StepConfig, StepKind, UrlPattern, WebProofRequestConfig};
use webproof_transcript::{DisclosurePolicy, Token, Transcript};

use StepStatus::{Completed, Current, Further};

struct FakeBrowser {
    url: Mutex<String>,
    nav: broadcast::Sender<String>,
}

impl FakeBrowser {
    fn at(url: &str) -> Arc<Self> {
        let (nav, _) = broadcast::channel(16);
        Arc::new(Self {
            url: Mutex::new(url.to_string()),
            nav,
        })
    }

    fn navigate(&self, url: &str) {
        *self.url.lock().unwrap() = url.to_string();
        let _ = self.nav.send(url.to_string());
    }
}

#[async_trait]
impl BrowserContext for FakeBrowser {
    async fn open(&self, url: &str) -> anyhow::Result<()> {
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> anyhow::Result<String> {
        Ok(self.url.lock().unwrap().clone())
    }

    fn navigations(&self) -> broadcast::Receiver<String> {
        self.nav.subscribe()
    }
}

struct FixedCapture(CapturedExchange);

#[async_trait]
impl TranscriptSource for FixedCapture {
    async fn capture(&self, _request: &CaptureRequest) -> anyhow::Result<CapturedExchange> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct RecordingNotary {
    fail: bool,
    seen: Mutex<Vec<NotarizationRequest>>,
}

#[async_trait]
impl Notarizer for RecordingNotary {
    async fn notarize(&self, request: NotarizationRequest) -> anyhow::Result<ProofArtifact> {
        self.seen.lock().unwrap().push(request);
        if self.fail {
            anyhow::bail!("notary unavailable");
        }
        Ok(ProofArtifact {
            id: Some("p1".into()),
            presentation: "cafe".into(),
        })
    }
}

const REQUEST: &str = "GET /api/settings?auth=secret&lang=en HTTP/1.1\r\nHost: a.test\r\n\r\n";
const RESPONSE: &str =
    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"screen_name\":\"ana\",\"email\":\"ana@a.test\"}";

fn exchange() -> CapturedExchange {
    CapturedExchange {
        url: "https://a.test/api/settings?auth=secret&lang=en".into(),
        request: Transcript::new(REQUEST),
        response: Transcript::new(RESPONSE),
    }
}

fn step(label: &str, kind: StepKind) -> StepConfig {
    StepConfig {
        label: label.into(),
        kind,
    }
}

fn api() -> UrlPattern {
    UrlPattern::Glob {
        pattern: "https://a.test/api/*".into(),
    }
}

fn request(steps: Vec<StepConfig>) -> WebProofRequestConfig {
    WebProofRequestConfig {
        notary_public_key: "notary-key".into(),
        logo_url: None,
        steps,
    }
}

fn open_channel() -> SessionChannel {
    SessionChannel::open(spawn_actor(SessionStorage::new(), 32).addr)
}

async fn next(sub: &mut Subscription) -> ExtensionMessage {
    tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("bus closed")
}

async fn next_view(sub: &mut Subscription) -> StepsView {
    match next(sub).await {
        ExtensionMessage::StepsUpdated(view) => view,
        other => panic!("expected StepsUpdated, got {other:?}"),
    }
}

#[tokio::test]
async fn navigation_promotes_and_notary_failure_ends_the_session() {
    common::init_test_tracing();
    let browser = FakeBrowser::at("about:blank");
    let deps = EngineDeps {
        browser: browser.clone(),
        capture: Arc::new(FixedCapture(exchange())),
        notarizer: Arc::new(RecordingNotary {
            fail: true,
            ..Default::default()
        }),
    };
    let steps = vec![
        step(
            "open",
            StepKind::StartPage {
                link: "https://a.test/login".into(),
            },
        ),
        step(
            "log in",
            StepKind::ExpectUrl {
                link: UrlPattern::Exact("https://a.test/home".into()),
            },
        ),
        step(
            "prove",
            StepKind::Notarize {
                link: api(),
                button_text: None,
                disclosure: DisclosureConfig::default(),
            },
        ),
    ];
    let channel = open_channel();
    let mut sub = channel.subscribe();
    let engine = StepEngine::new(request(steps), deps, channel.clone(), CancellationToken::new())
        .unwrap();
    let handle = spawn_engine(engine).await.unwrap();

    let initial = next_view(&mut sub).await;
    assert_eq!(initial.current_step, Some(0));
    assert_eq!(initial.step_statuses, vec![Current, Further, Further]);

    let waiting = next_view(&mut sub).await;
    assert_eq!(waiting.current_step, Some(1));
    assert_eq!(waiting.step_statuses, vec![Completed, Current, Further]);

    browser.navigate("https://a.test/home?tab=1");
    browser.navigate("https://a.test/home");

    let notarizing = next_view(&mut sub).await;
    assert_eq!(notarizing.current_step, Some(2));
    assert_eq!(notarizing.step_statuses, vec![Completed, Completed, Current]);

    match next(&mut sub).await {
        ExtensionMessage::ProofError { step, error } => {
            assert_eq!(step, Some(2));
            assert!(error.contains("notary unavailable"), "{error}");
        }
        other => panic!("expected ProofError, got {other:?}"),
    }
    let failed = next_view(&mut sub).await;
    assert!(matches!(failed.session_state, SessionState::Error(_)));
    assert_eq!(failed.current_step, None);
    assert_eq!(failed.step_statuses, vec![Completed, Completed, Current]);

    handle.task.await.unwrap().unwrap();
    let stored = channel.snapshot().await;
    let session = channel.session();
    assert_eq!(stored[&format!("{session}:currentStep")], json!(null));
    assert_eq!(stored[&format!("{session}:sessionState")]["state"], "error");
}

#[tokio::test]
async fn notarize_then_extract_completes_the_session() {
    common::init_test_tracing();
    let notary = Arc::new(RecordingNotary::default());
    let deps = EngineDeps {
        browser: FakeBrowser::at("https://a.test/home"),
        capture: Arc::new(FixedCapture(exchange())),
        notarizer: notary.clone(),
    };
    let steps = vec![
        step(
            "prove",
            StepKind::Notarize {
                link: api(),
                button_text: Some("Generate proof".into()),
                disclosure: DisclosureConfig {
                    request: Some(DisclosurePolicy::Redact(vec![Token::QueryParam(
                        "auth".into(),
                    )])),
                    response: Some(DisclosurePolicy::Reveal(vec![Token::JsonPath(
                        "screen_name".into(),
                    )])),
                },
            },
        ),
        step(
            "read handle",
            StepKind::ExtractVariables {
                link: api(),
                variables: vec!["screen_name".into()],
            },
        ),
    ];
    let channel = open_channel();
    let mut sub = channel.subscribe();
    let engine = StepEngine::new(request(steps), deps, channel.clone(), CancellationToken::new())
        .unwrap();
    let handle = spawn_engine(engine).await.unwrap();

    assert_eq!(next_view(&mut sub).await.current_step, Some(0));
    match next(&mut sub).await {
        ExtensionMessage::ProofDone { step, proof } => {
            assert_eq!(step, 0);
            assert_eq!(proof.id.as_deref(), Some("p1"));
        }
        other => panic!("expected ProofDone, got {other:?}"),
    }
    assert_eq!(next_view(&mut sub).await.current_step, Some(1));
    match next(&mut sub).await {
        ExtensionMessage::VariablesExtracted { step, variables } => {
            assert_eq!(step, 1);
            assert_eq!(
                variables,
                BTreeMap::from([("screen_name".to_string(), "ana".to_string())])
            );
        }
        other => panic!("expected VariablesExtracted, got {other:?}"),
    }
    let done = next_view(&mut sub).await;
    assert_eq!(done.session_state, SessionState::Completed);
    assert_eq!(done.step_statuses, vec![Completed, Completed]);
    handle.task.await.unwrap().unwrap();

    let seen = notary.seen.lock().unwrap();
    let sent = &seen[0];
    assert_eq!(sent.notary_public_key, "notary-key");
    let withheld: Vec<&[u8]> = sent
        .request_redactions
        .ranges()
        .iter()
        .map(|r| &REQUEST.as_bytes()[r.start..r.end])
        .collect();
    assert_eq!(withheld, vec![b"secret".as_slice()]);
    let revealed: Vec<&[u8]> = sent
        .response_redactions
        .revealed()
        .iter()
        .map(|r| &RESPONSE.as_bytes()[r.start..r.end])
        .collect();
    assert_eq!(revealed, vec![b"ana".as_slice()]);

    let key = format!("{}:extractedVariables", channel.session());
    assert_eq!(
        channel.snapshot().await[&key],
        json!({ "screen_name": "ana" })
    );
}

#[tokio::test]
async fn expect_url_timeout_is_a_pattern_mismatch() {
    common::init_test_tracing();
    let deps = EngineDeps {
        browser: FakeBrowser::at("https://a.test/login"),
        capture: Arc::new(FixedCapture(exchange())),
        notarizer: Arc::new(RecordingNotary::default()),
    };
    let steps = vec![step(
        "log in",
        StepKind::ExpectUrl {
            link: UrlPattern::Glob {
                pattern: "https://a.test/home*".into(),
            },
        },
    )];
    let channel = open_channel();
    let mut sub = channel.subscribe();
    let engine = StepEngine::new(request(steps), deps, channel, CancellationToken::new())
        .unwrap()
        .with_expect_url_timeout(Some(Duration::from_millis(50)));
    let handle = spawn_engine(engine).await.unwrap();

    assert_eq!(next_view(&mut sub).await.current_step, Some(0));
    match next(&mut sub).await {
        ExtensionMessage::ProofError { step, error } => {
            assert_eq!(step, Some(0));
            assert!(error.contains("https://a.test/home*"), "{error}");
        }
        other => panic!("expected ProofError, got {other:?}"),
    }
    handle.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn close_then_unload_leaves_no_session_keys() {
    common::init_test_tracing();
    let deps = EngineDeps {
        browser: FakeBrowser::at("https://a.test/login"),
        capture: Arc::new(FixedCapture(exchange())),
        notarizer: Arc::new(RecordingNotary::default()),
    };
    let steps = vec![step(
        "log in",
        StepKind::ExpectUrl {
            link: UrlPattern::Exact("https://a.test/home".into()),
        },
    )];
    let channel = open_channel();
    let cancel = CancellationToken::new();
    let coordinator = spawn_coordinator(&channel, cancel.clone());
    let panel = SidePanel::attach(channel.clone());
    let mut sub = channel.subscribe();
    let engine = StepEngine::new(request(steps), deps, channel.clone(), cancel).unwrap();
    let handle = spawn_engine(engine).await.unwrap();

    assert_eq!(next_view(&mut sub).await.current_step, Some(0));
    assert!(!channel.snapshot().await.is_empty());

    panel.request_close();
    handle.task.await.unwrap().unwrap();
    panel.unload().await;
    coordinator.await.unwrap();

    let mut closed = None;
    while let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(100), sub.recv()).await {
        if let ExtensionMessage::StepsUpdated(view) = msg {
            closed = Some(view.session_state);
        }
    }
    assert_eq!(closed, Some(SessionState::Closed));
    assert!(channel.snapshot().await.is_empty());
}

/// Run `first` followed by an extraction step and return the failure the
/// engine reports for step 0 together with the final view.
async fn first_step_failure(
    first: StepKind,
    captured: CapturedExchange,
    notary: Arc<RecordingNotary>,
) -> (String, StepsView) {
    let deps = EngineDeps {
        browser: FakeBrowser::at("https://a.test/home"),
        capture: Arc::new(FixedCapture(captured)),
        notarizer: notary,
    };
    let steps = vec![
        step("prove", first),
        step(
            "read handle",
            StepKind::ExtractVariables {
                link: api(),
                variables: vec!["screen_name".into()],
            },
        ),
    ];
    let channel = open_channel();
    let mut sub = channel.subscribe();
    let engine = StepEngine::new(request(steps), deps, channel, CancellationToken::new())
        .unwrap();
    let handle = spawn_engine(engine).await.unwrap();

    let initial = next_view(&mut sub).await;
    assert_eq!(initial.step_statuses, vec![Current, Further]);
    let error = match next(&mut sub).await {
        ExtensionMessage::ProofError { step, error } => {
            assert_eq!(step, Some(0));
            error
        }
        other => panic!("expected ProofError, got {other:?}"),
    };
    let view = next_view(&mut sub).await;
    handle.task.await.unwrap().unwrap();
    (error, view)
}

#[tokio::test]
async fn absent_tokens_fail_the_notarize_step_before_the_notary() {
    common::init_test_tracing();
    let disclosures = [
        DisclosureConfig {
            request: Some(DisclosurePolicy::Redact(vec![Token::QueryParam(
                "session".into(),
            )])),
            response: None,
        },
        DisclosureConfig {
            request: None,
            response: Some(DisclosurePolicy::Reveal(vec![Token::JsonPath(
                "profile.phone".into(),
            )])),
        },
    ];
    for disclosure in disclosures {
        let notary = Arc::new(RecordingNotary::default());
        let (error, view) = first_step_failure(
            StepKind::Notarize {
                link: api(),
                button_text: None,
                disclosure,
            },
            exchange(),
            notary.clone(),
        )
        .await;

        assert!(error.contains("token not found"), "{error}");
        assert!(matches!(view.session_state, SessionState::Error(_)));
        assert_eq!(view.current_step, None);
        assert_eq!(view.step_statuses, vec![Current, Further]);
        assert!(notary.seen.lock().unwrap().is_empty());
    }
}

#[tokio::test]
async fn graphql_step_rejects_a_different_operation() {
    common::init_test_tracing();
    let captured = CapturedExchange {
        url: "https://a.test/api/graphql".into(),
        request: Transcript::new(
            "POST /api/graphql HTTP/1.1\r\nHost: a.test\r\n\r\n\
             {\"operationName\":\"Viewer\",\"query\":\"{ viewer { id } }\"}",
        ),
        response: Transcript::new(RESPONSE),
    };
    let notary = Arc::new(RecordingNotary::default());
    let (error, view) = first_step_failure(
        StepKind::NotarizeGql {
            link: api(),
            button_text: None,
            operation: "Timeline".into(),
            disclosure: DisclosureConfig::default(),
        },
        captured,
        notary.clone(),
    )
    .await;

    assert!(error.contains("graphql operation mismatch"), "{error}");
    assert!(error.contains("`Viewer`"), "{error}");
    assert!(matches!(view.session_state, SessionState::Error(_)));
    assert_eq!(view.step_statuses, vec![Current, Further]);
    assert!(notary.seen.lock().unwrap().is_empty());
}
