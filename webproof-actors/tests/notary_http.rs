mod common;

use serde_json::json;
use webproof_actors::{HttpNotary, NotarizationRequest, Notarizer};
use webproof_config::NotaryConfig;
use webproof_transcript::{DisclosurePolicy, RedactionSet, Token, Transcript};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn notarization() -> NotarizationRequest {
    let request = Transcript::new("GET /a?k=v HTTP/1.1\r\n\r\n");
    let response = Transcript::new("HTTP/1.1 200 OK\r\n\r\n");
    let redact_k = DisclosurePolicy::Redact(vec![Token::QueryParam("k".into())]);
    NotarizationRequest {
        request_redactions: RedactionSet::build(&request, &redact_k).unwrap(),
        response_redactions: RedactionSet::empty(response.len()),
        request,
        response,
        notary_public_key: "pk".into(),
    }
}

fn notary(server: &MockServer) -> HttpNotary {
    HttpNotary::from_config(&NotaryConfig {
        url: server.uri(),
        timeout_secs: Some(5),
    })
    .unwrap()
}

#[tokio::test]
async fn posts_hex_transcripts_and_redactions() {
    common::init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/notarize"))
        .and(body_partial_json(json!({
            "notary_public_key": "pk",
            "request": {
                "transcript": hex::encode("GET /a?k=v HTTP/1.1\r\n\r\n"),
                "redactions": [ { "start": 9, "end": 10 } ]
            },
            "response": { "redactions": [] }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "p-1", "presentation": "beef" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let proof = notary(&server).notarize(notarization()).await.unwrap();
    assert_eq!(proof.id.as_deref(), Some("p-1"));
    assert_eq!(proof.presentation, "beef");
}

#[tokio::test]
async fn rejected_transcripts_surface_the_notary_message() {
    common::init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "error": "bad redactions" })),
        )
        .mount(&server)
        .await;

    let err = notary(&server).notarize(notarization()).await.unwrap_err();
    let text = format!("{err:#}");
    assert!(text.contains("notary rejected the transcript"), "{text}");
    assert!(text.contains("bad redactions"), "{text}");
}
