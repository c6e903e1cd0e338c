use charter_sync::{
    ActivityNote, ContactDraft, CrmBackend, HttpCrmBackend, OpportunityDraft, OpportunityStage,
    OpportunityUpdate, SyncConfig, SyncError,
};
use charter_types::{ContactId, OpportunityId, Properties};
use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> HttpCrmBackend {
    HttpCrmBackend::new(&SyncConfig::new(server.uri(), "anon-key")).unwrap()
}

fn ok(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": data }))
}

// ── Construction ────────────────────────────────────────────────

#[test]
fn endpoint_joins_base_and_proxy_path() {
    let backend = HttpCrmBackend::new(&SyncConfig::new("https://api.example.com/v1/", "k")).unwrap();
    assert_eq!(backend.endpoint(), "https://api.example.com/v1/crm-proxy");
}

#[test]
fn empty_base_url_is_config_error() {
    let result = HttpCrmBackend::new(&SyncConfig::new("  ", "k"));
    assert!(matches!(result, Err(SyncError::Config(_))));
}

// ── Contacts ────────────────────────────────────────────────────

#[tokio::test]
async fn find_contact_sends_action_and_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crm-proxy"))
        .and(header("authorization", "Bearer anon-key"))
        .and(body_partial_json(json!({
            "action": "find_contact",
            "payload": { "email": "a@b.com" }
        })))
        .respond_with(ok(json!({ "id": "hs-42" })))
        .expect(1)
        .mount(&server)
        .await;

    let found = backend(&server).find_contact("a@b.com").await.unwrap();
    assert_eq!(found, Some(ContactId::new("hs-42")));
}

#[tokio::test]
async fn find_contact_without_match_returns_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crm-proxy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&server)
        .await;

    let found = backend(&server).find_contact("nobody@b.com").await.unwrap();
    assert_eq!(found, None);
}

#[tokio::test]
async fn create_contact_returns_new_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crm-proxy"))
        .and(body_partial_json(json!({
            "action": "create_contact",
            "payload": { "email": "a@b.com", "app_user_id": "u1" }
        })))
        .respond_with(ok(json!({ "id": "c1" })))
        .mount(&server)
        .await;

    let draft = ContactDraft {
        email: "a@b.com".to_string(),
        app_user_id: Some("u1".to_string()),
        ..Default::default()
    };
    let id = backend(&server).create_contact(&draft).await.unwrap();
    assert_eq!(id, ContactId::new("c1"));
}

#[tokio::test]
async fn create_contact_without_record_is_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&server)
        .await;

    let draft = ContactDraft {
        email: "a@b.com".to_string(),
        ..Default::default()
    };
    let result = backend(&server).create_contact(&draft).await;
    assert!(matches!(result, Err(SyncError::Backend { .. })));
}

// ── Activity & opportunities ────────────────────────────────────

#[tokio::test]
async fn add_note_posts_note_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "action": "add_note",
            "payload": { "contact_id": "c1", "title": "Screen viewed: search" }
        })))
        .respond_with(ok(json!(null)))
        .expect(1)
        .mount(&server)
        .await;

    let note = ActivityNote {
        contact_id: ContactId::new("c1"),
        company_id: None,
        title: "Screen viewed: search".to_string(),
        body: "screen: search\n".to_string(),
        occurred_at: Utc::now(),
    };
    backend(&server).add_note(&note).await.unwrap();
}

#[tokio::test]
async fn create_opportunity_returns_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "action": "create_opportunity",
            "payload": { "stage": "requested", "amount": 42000.0 }
        })))
        .respond_with(ok(json!({ "id": "deal-9" })))
        .mount(&server)
        .await;

    let draft = OpportunityDraft {
        contact_id: ContactId::new("c1"),
        company_id: None,
        name: "Charter TEB-MIA".to_string(),
        stage: OpportunityStage::Requested,
        amount: Some(42000.0),
        properties: Properties::new(),
    };
    let id = backend(&server).create_opportunity(&draft).await.unwrap();
    assert_eq!(id, OpportunityId::new("deal-9"));
}

#[tokio::test]
async fn update_opportunity_wraps_id_and_update() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "action": "update_opportunity",
            "payload": { "opportunity_id": "deal-9", "update": { "stage": "booked" } }
        })))
        .respond_with(ok(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let update = OpportunityUpdate {
        stage: Some(OpportunityStage::Booked),
        ..Default::default()
    };
    backend(&server)
        .update_opportunity(&OpportunityId::new("deal-9"), &update)
        .await
        .unwrap();
}

// ── Failures ────────────────────────────────────────────────────

#[tokio::test]
async fn failure_envelope_maps_to_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "rate limited",
            "statusCode": 429
        })))
        .mount(&server)
        .await;

    let err = backend(&server).find_contact("a@b.com").await.unwrap_err();
    match err {
        SyncError::Backend { status, message } => {
            assert_eq!(status, Some(429));
            assert_eq!(message, "rate limited");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn http_status_fills_missing_status_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_json(json!({
            "success": false,
            "error": "upstream down"
        })))
        .mount(&server)
        .await;

    let err = backend(&server).find_contact("a@b.com").await.unwrap_err();
    assert!(matches!(err, SyncError::Backend { status: Some(502), .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn non_json_error_body_keeps_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let err = backend(&server).find_contact("a@b.com").await.unwrap_err();
    match err {
        SyncError::Backend { status, message } => {
            assert_eq!(status, Some(401));
            assert_eq!(message, "unauthorized");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_success_body_is_serialization_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = backend(&server).find_contact("a@b.com").await.unwrap_err();
    assert!(matches!(err, SyncError::Serialization(_)));
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    let backend = HttpCrmBackend::new(&SyncConfig::new("http://127.0.0.1:1", "k")).unwrap();

    let err = backend.find_contact("a@b.com").await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
    assert!(err.is_transient());
}
