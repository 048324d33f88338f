//! Cloud fleet against a mocked vendor API.

use chrono::{Duration, Utc};
use printinator_core::cloud::CloudFleet;
use printinator_core::config::CloudConfig;
use printinator_core::fleet::FleetAggregator;
use printinator_core::{CredentialStore, FleetError};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{any, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> CloudConfig {
    CloudConfig {
        api_url: server.uri(),
        client_id: "test-client".to_string(),
        client_secret: "test-secret".to_string(),
        ..CloudConfig::default()
    }
}

fn token_body(access: &str, refresh: &str) -> serde_json::Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": 3600,
        "token_type": "Bearer",
        "scope": "developer-api"
    })
}

fn printing_fl001() -> serde_json::Value {
    json!([{
        "serial": "FL001",
        "machine_type_id": "FORM-3-0",
        "printer_status": {
            "status": "PRINTING",
            "last_pinged_at": "2021-02-23T07:33:31.403593-05:00",
            "current_print_run": {
                "guid": "run-1",
                "name": "bracket",
                "status": "PRINTING",
                "layer_count": 200,
                "currently_printing_layer": 50,
                "print_started_at": "2021-02-23T06:00:00.000+00:00"
            }
        }
    }])
}

fn logged_in_store() -> CredentialStore {
    let store = CredentialStore::in_memory();
    store.set_login("maker@example.com", "hunter2");
    store
}

#[tokio::test]
async fn test_missing_token_is_acquired_once_for_concurrent_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/o/token/"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("client_id=test-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "r1")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/printers/"))
        .and(header("Authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(printing_fl001()))
        .expect(2)
        .mount(&server)
        .await;

    let store = logged_in_store();
    let fleet = CloudFleet::new(&config(&server), store.clone());

    let before = Utc::now();
    let (first, second) = tokio::join!(fleet.fetch_printers(), fleet.fetch_printers());
    first.unwrap();
    second.unwrap();

    let creds = store.credentials();
    assert_eq!(creds.access_token, "a1");
    assert_eq!(creds.refresh_token, "r1");
    let expiry = creds.token_expiry.unwrap();
    assert!(expiry >= before + Duration::seconds(3600));
    assert!(expiry <= Utc::now() + Duration::seconds(3600));
    assert_eq!(fleet.printers().len(), 1);
}

#[tokio::test]
async fn test_expired_token_triggers_refresh_not_password_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/o/token/"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a2", "r2")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/o/token/"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("bad", "bad")))
        .expect(0)
        .mount(&server)
        .await;

    let store = logged_in_store();
    store.set_tokens("a1", "r1", Utc::now() - Duration::seconds(5));
    let fleet = CloudFleet::new(&config(&server), store.clone());

    fleet.ensure_valid_token().await.unwrap();
    // Second call sees a valid token and stays offline
    fleet.ensure_valid_token().await.unwrap();

    let creds = store.credentials();
    assert_eq!(creds.access_token, "a2");
    assert_eq!(creds.refresh_token, "r2");
}

#[tokio::test]
async fn test_password_grant_never_sends_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/o/token/"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("password=hunter2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "r1")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/o/token/"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("bad", "bad")))
        .expect(0)
        .mount(&server)
        .await;

    let fleet = CloudFleet::new(&config(&server), logged_in_store());
    fleet.acquire_token().await.unwrap();
}

#[tokio::test]
async fn test_rejected_grant_keeps_prior_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/o/token/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid credentials given."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in_store();
    let fleet = CloudFleet::new(&config(&server), store.clone());

    let err = fleet.acquire_token().await.unwrap_err();
    assert!(matches!(err, FleetError::Auth(ref msg) if msg.contains("invalid_grant")));
    assert!(store.credentials().access_token.is_empty());
    assert!(store.credentials().token_expiry.is_none());
}

#[tokio::test]
async fn test_acquire_without_password_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let store = CredentialStore::in_memory();
    store.set_login("maker@example.com", "");
    let fleet = CloudFleet::new(&config(&server), store);

    fleet.acquire_token().await.unwrap();
    fleet.sync_printers().await;
}

#[tokio::test]
async fn test_revoke_empty_token_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let fleet = CloudFleet::new(&config(&server), logged_in_store());
    fleet.revoke_token().await.unwrap();
}

#[tokio::test]
async fn test_revoke_clears_token_and_printers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/printers/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(printing_fl001()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/o/revoke_token/"))
        .and(body_string_contains("token=a1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in_store();
    store.set_tokens("a1", "r1", Utc::now() + Duration::hours(1));
    let fleet = CloudFleet::new(&config(&server), store.clone());

    fleet.fetch_printers().await.unwrap();
    assert_eq!(fleet.printers().len(), 1);

    fleet.revoke_token().await.unwrap();
    assert!(store.credentials().access_token.is_empty());
    assert!(fleet.printers().is_empty());
}

#[tokio::test]
async fn test_failed_revoke_keeps_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/o/revoke_token/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = logged_in_store();
    store.set_tokens("a1", "r1", Utc::now() + Duration::hours(1));
    let fleet = CloudFleet::new(&config(&server), store.clone());

    assert!(fleet.revoke_token().await.is_err());
    assert_eq!(store.credentials().access_token, "a1");
}

#[tokio::test]
async fn test_failed_fetch_keeps_previous_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/printers/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(printing_fl001()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/printers/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let store = logged_in_store();
    store.set_tokens("a1", "r1", Utc::now() + Duration::hours(1));
    let fleet = CloudFleet::new(&config(&server), store);

    fleet.fetch_printers().await.unwrap();
    let err = fleet.fetch_printers().await.unwrap_err();
    assert!(matches!(err, FleetError::Network(_)));
    assert_eq!(fleet.printers()[0].serial, "FL001");
}

#[tokio::test]
async fn test_printing_progress_reaches_fleet_view() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/printers/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(printing_fl001()))
        .mount(&server)
        .await;

    let store = logged_in_store();
    store.set_tokens("a1", "r1", Utc::now() + Duration::hours(1));

    let (aggregator, sink) = FleetAggregator::new();
    let mut views = aggregator.subscribe();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(aggregator.run(cancel.clone()));

    let fleet = CloudFleet::new(&config(&server), store).with_sink(sink);
    fleet.sync_printers().await;

    views.changed().await.unwrap();
    {
        let view = views.borrow_and_update();
        let printer = view.cloud_printer("FL001").unwrap();
        assert_eq!(printer.status().as_str(), "PRINTING");
        assert_eq!(printer.progress(), Some(0.25));
    }

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_password_change_resets_session_and_resyncs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/o/revoke_token/"))
        .and(body_string_contains("token=a1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/o/token/"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("password=correct-horse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a2", "r2")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/printers/"))
        .and(header("Authorization", "Bearer a2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(printing_fl001()))
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in_store();
    store.set_tokens("a1", "r1", Utc::now() + Duration::hours(1));
    let fleet = CloudFleet::new(&config(&server), store.clone());

    store.set_login("maker@example.com", "correct-horse");
    fleet.on_credentials_changed(store.credentials().login()).await;

    let creds = store.credentials();
    assert_eq!(creds.access_token, "a2");
    assert_eq!(creds.refresh_token, "r2");
    assert_eq!(fleet.printers().len(), 1);
}

#[tokio::test]
async fn test_username_change_keeps_session() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let store = logged_in_store();
    store.set_tokens("a1", "r1", Utc::now() + Duration::hours(1));
    let fleet = CloudFleet::new(&config(&server), store.clone());

    store.set_login("other@example.com", "hunter2");
    fleet.on_credentials_changed(store.credentials().login()).await;

    assert_eq!(store.credentials().access_token, "a1");
}

#[tokio::test]
async fn test_logout_forgets_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/o/revoke_token/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in_store();
    store.set_tokens("a1", "r1", Utc::now() + Duration::hours(1));
    let fleet = CloudFleet::new(&config(&server), store.clone());

    fleet.logout().await;
    let creds = store.credentials();
    assert!(!creds.has_login());
    assert!(creds.refresh_token.is_empty());
}
