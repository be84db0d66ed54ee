// Integration tests for `ThingsClient` using wiremock.

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use thingly_api::{Error, ThingsClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, ThingsClient) {
    let server = MockServer::start().await;
    let client = ThingsClient::from_base_url(&server.uri(), reqwest::Client::new()).unwrap();
    (server, client)
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_get_property() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/things/lamp/properties/level"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "level": 42 })))
        .mount(&server)
        .await;

    let map = client
        .get_property("/things/lamp/properties/level")
        .await
        .unwrap();

    assert_eq!(map.len(), 1);
    assert_eq!(map["level"], json!(42));
}

#[tokio::test]
async fn test_put_property_sends_single_key_body() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/things/lamp/properties/level"))
        .and(body_json(json!({ "level": 3.5 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "level": 3.5 })))
        .expect(1)
        .mount(&server)
        .await;

    let echoed = client
        .put_property("/things/lamp/properties/level", "level", &json!(3.5))
        .await
        .unwrap();

    assert_eq!(echoed["level"], json!(3.5));
}

#[tokio::test]
async fn test_get_events() {
    let (server, client) = setup().await;

    let body = json!([
        { "overheated": { "data": 102, "timestamp": "2026-08-26T12:00:00Z" } },
        { "motion": {} },
    ]);

    Mock::given(method("GET"))
        .and(path("/things/lamp/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let events = client.get_events("/things/lamp/events").await.unwrap();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["overheated"]["data"], json!(102));
    assert_eq!(events[1]["motion"], json!({}));
}

#[tokio::test]
async fn test_update_thing() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/things/lamp"))
        .and(body_json(json!({ "name": "Porch lamp" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client
        .update_thing("/things/lamp", &json!({ "name": "Porch lamp" }))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_remove_thing() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/things/lamp"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client.remove_thing("/things/lamp").await.unwrap();
}

#[tokio::test]
async fn test_authorized_client_sends_bearer_and_accept() {
    let server = MockServer::start().await;

    let transport = thingly_api::TransportConfig {
        tls: thingly_api::TlsMode::System,
        ..Default::default()
    };
    let http = transport
        .build_authorized_client(&secrecy::SecretString::from("tok123".to_string()))
        .unwrap();
    let client = ThingsClient::from_base_url(&server.uri(), http).unwrap();

    Mock::given(method("GET"))
        .and(path("/things/lamp/properties/level"))
        .and(header("authorization", "Bearer tok123"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "level": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    client
        .get_property("/things/lamp/properties/level")
        .await
        .unwrap();
}

// ── Failure tests ───────────────────────────────────────────────────

#[tokio::test]
async fn test_put_property_rejected_status() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/things/lamp/properties/level"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let err = client
        .put_property("/things/lamp/properties/level", "level", &json!(7))
        .await
        .unwrap_err();

    match err {
        Error::Status { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Bad Request");
        }
        other => panic!("expected Status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remove_thing_failure_carries_reason() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/things/lamp"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = client.remove_thing("/things/lamp").await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(err.to_string().contains("Internal Server Error"));
}

#[tokio::test]
async fn test_not_found_predicate() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/things/gone/properties/level"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client
        .get_property("/things/gone/properties/level")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_malformed_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/things/lamp/properties/level"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client
        .get_property("/things/lamp/properties/level")
        .await
        .unwrap_err();

    match err {
        Error::Deserialization { body, .. } => assert_eq!(body, "not json"),
        other => panic!("expected Deserialization error, got {other:?}"),
    }
}
