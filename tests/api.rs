//! Router-level tests: requests go through `api::router` with `oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use broome::config::{BillingPolicy, Config, Environment};
use broome::metrics::PrometheusRecorder;
use broome::models::developer::{Developer, NewDeveloper};
use broome::notification::{MemoryNotifier, NotifierHub};
use broome::payment::stripe::StripeClient;
use broome::store::memory::MemoryStore;
use broome::store::DeveloperStore;
use broome::{api, AppState};

const ADMIN_KEY: &str = "test-admin-key";

fn config(stripe_api_base: &str) -> Config {
    Config {
        port: 0,
        environment: Environment::Development,
        database_url: "memory://".into(),
        admin_key: ADMIN_KEY.into(),
        stripe_secret_key: "sk_test_123".into(),
        stripe_public_key: "pk_test_123".into(),
        stripe_api_base: stripe_api_base.into(),
        slack_webhook_url: None,
        webhook_urls: Vec::new(),
        webhook_secret: None,
        internal_email_domain: None,
        billing: BillingPolicy {
            charge_timeout: Duration::from_millis(500),
            ..BillingPolicy::default()
        },
    }
}

struct Harness {
    app: Router,
    store: MemoryStore,
    events: MemoryNotifier,
}

fn harness(stripe_api_base: &str) -> Harness {
    let cfg = config(stripe_api_base);
    let store = MemoryStore::new();
    let events = MemoryNotifier::new();
    let metrics = Arc::new(PrometheusRecorder::new().unwrap());
    let hub = NotifierHub::new()
        .with(metrics.clone())
        .with(Arc::new(events.clone()));
    let gateway = StripeClient::new(stripe_api_base, &cfg.stripe_secret_key, cfg.billing.charge_timeout).unwrap();

    let state = AppState::new(cfg, Arc::new(store.clone()), Arc::new(gateway), Arc::new(hub), metrics);
    Harness {
        app: api::router(Arc::new(state)),
        store,
        events,
    }
}

async fn seed(store: &MemoryStore, days_left: i64, payment_method: Option<&str>) -> Developer {
    store
        .insert(NewDeveloper {
            id: Uuid::new_v4(),
            name: "Byrd".into(),
            email: format!("{}@example.com", Uuid::new_v4()),
            token: broome::auth::generate_token(),
            password_hash: String::new(),
            salt: String::new(),
            expiration: Utc::now() + chrono::Duration::days(days_left),
            payment_method_token: payment_method.map(String::from),
            is_paid: false,
            is_admin: false,
            integration_engineer: None,
        })
        .await
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn stripe_charge_responds(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/v1/charges"))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_healthz() {
    let h = harness("http://127.0.0.1:1");
    let resp = h.app.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn test_session_found_hides_token() {
    let h = harness("http://127.0.0.1:1");
    let dev = seed(&h.store, 10, None).await;

    let (status, body) = send(&h.app, get(&format!("/session/{}", dev.id))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "found");
    assert_eq!(body["developer"]["id"], dev.id.to_string());
    assert!(body["developer"].get("token").is_none());
}

#[tokio::test]
async fn test_session_expired() {
    let h = harness("http://127.0.0.1:1");
    let dev = seed(&h.store, -1, None).await;

    let (status, body) = send(&h.app, get(&format!("/session/{}", dev.id))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "expired");
}

#[tokio::test]
async fn test_session_unknown_and_malformed_ids() {
    let h = harness("http://127.0.0.1:1");

    let (status, body) = send(&h.app, get(&format!("/session/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "failed");

    let (status, _) = send(&h.app, get("/session/not-a-uuid")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_session_renewal_statuses_follow_gateway_outcome() {
    let cases = [
        (
            ResponseTemplate::new(402).set_body_json(json!({
                "error": { "code": "card_declined", "message": "declined" }
            })),
            StatusCode::PAYMENT_REQUIRED,
            "payment_declined",
        ),
        (
            ResponseTemplate::new(429),
            StatusCode::SERVICE_UNAVAILABLE,
            "gateway_unavailable",
        ),
        (
            ResponseTemplate::new(502),
            StatusCode::GATEWAY_TIMEOUT,
            "gateway_indeterminate",
        ),
    ];

    for (template, expected, code) in cases {
        let server = MockServer::start().await;
        stripe_charge_responds(&server, template).await;
        let h = harness(&server.uri());
        let dev = seed(&h.store, -1, Some("cus_123")).await;

        let resp = h
            .app
            .clone()
            .oneshot(get(&format!("/session/{}", dev.id)))
            .await
            .unwrap();
        assert_eq!(
            resp.headers().contains_key("retry-after"),
            expected == StatusCode::SERVICE_UNAVAILABLE
        );
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(status, expected);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["code"], code);
        assert_eq!(body["developer"]["id"], dev.id.to_string());
        assert_eq!(h.store.get_by_id(dev.id).await.unwrap().unwrap(), dev);
    }
}

#[tokio::test]
async fn test_session_renewal_success() {
    let server = MockServer::start().await;
    stripe_charge_responds(&server, ResponseTemplate::new(200).set_body_json(json!({ "id": "ch_ok" }))).await;
    let h = harness(&server.uri());
    let dev = seed(&h.store, -1, Some("cus_123")).await;

    let (status, body) = send(&h.app, get(&format!("/session/{}", dev.id))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "found");
    assert_eq!(body["developer"]["is_paid"], true);
    let stored = h.store.get_by_id(dev.id).await.unwrap().unwrap();
    assert!(stored.expiration.unwrap() > Utc::now() + chrono::Duration::days(364));
}

#[tokio::test]
async fn test_register_login_and_lookup() {
    let h = harness("http://127.0.0.1:1");
    let creds = json!({ "name": "Larz", "email": "larz@example.com", "password": "pw" });

    let (status, body) = send(&h.app, json_request("POST", "/developers", creds.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "created");
    let first_token = body["developer"]["token"].as_str().unwrap().to_string();
    let id = body["developer"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(&h.app, json_request("POST", "/developers", creds.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&h.app, json_request("POST", "/developers/token", creds)).await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();
    assert_ne!(token, first_token);

    let (status, body) = send(&h.app, get(&format!("/developers/me?token={}", token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["developer"]["email"], "larz@example.com");

    let (status, body) = send(&h.app, get(&format!("/developers/{}?token=someone-else", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["developer"]["email"], "larz@example.com");
    assert!(body["developer"].get("id").is_none());

    let (status, _) = send(
        &h.app,
        json_request(
            "POST",
            "/developers/token",
            json!({ "email": "larz@example.com", "password": "wrong" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_update_and_reset_password() {
    let h = harness("http://127.0.0.1:1");
    let (_, body) = send(
        &h.app,
        json_request(
            "POST",
            "/developers",
            json!({ "name": "Kal", "email": "kal@example.com", "password": "old" }),
        ),
    )
    .await;
    let token = body["developer"]["token"].as_str().unwrap().to_string();
    let id = body["developer"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &h.app,
        json_request("PUT", &format!("/developers/{}", token), json!({ "name": "Kaliski" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "updated");
    assert_eq!(body["developer"]["name"], "Kaliski");

    let (status, _) = send(
        &h.app,
        json_request(
            "PUT",
            &format!("/developers/reset/{}", token),
            json!({ "id": id, "new": "fresh" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &h.app,
        json_request(
            "POST",
            "/developers/token",
            json!({ "email": "kal@example.com", "password": "fresh" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_developer_token_cannot_change_license_fields() {
    let h = harness("http://127.0.0.1:1");
    let (_, body) = send(
        &h.app,
        json_request("POST", "/signup", json!({ "name": "Nash", "email": "nash@example.com" })),
    )
    .await;
    let token = body["developer"]["token"].as_str().unwrap().to_string();
    let id: Uuid = body["developer"]["id"].as_str().unwrap().parse().unwrap();
    let before = h.store.get_by_id(id).await.unwrap().unwrap();

    for expiration in ["2099-01-01T00:00:00Z", "2000-01-01T00:00:00Z"] {
        let (status, _) = send(
            &h.app,
            json_request(
                "PUT",
                &format!("/developers/{}", token),
                json!({ "expiration": expiration, "nextPaymentTime": expiration, "is_admin": true }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let stored = h.store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.expiration, before.expiration);
        assert!(!stored.is_admin);
    }

    let (status, _) = send(
        &h.app,
        json_request(
            "PUT",
            &format!("/admin/developers/{}", token),
            json!({ "is_admin": true }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!h.store.get_by_id(id).await.unwrap().unwrap().is_admin);
}

#[tokio::test]
async fn test_admin_sets_expiration_and_flag() {
    let h = harness("http://127.0.0.1:1");
    let dev = seed(&h.store, 3, None).await;

    let req = Request::builder()
        .method("PUT")
        .uri(format!("/admin/developers/{}", dev.token))
        .header("x-admin-key", ADMIN_KEY)
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "expiration": "2030-06-01T00:00:00Z", "is_admin": true }).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&h.app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "updated");
    let stored = h.store.get_by_id(dev.id).await.unwrap().unwrap();
    assert!(stored.is_admin);
    assert_eq!(stored.expiration.unwrap().to_rfc3339(), "2030-06-01T00:00:00+00:00");
}

#[tokio::test]
async fn test_trial_signup_then_session_found() {
    let h = harness("http://127.0.0.1:1");
    let id = Uuid::new_v4();

    let (status, body) = send(
        &h.app,
        json_request(
            "POST",
            "/signup",
            json!({ "id": id, "name": "Crosby", "stripeEmail": "crosby@example.com" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "created");
    assert_eq!(body["developer"]["email"], "crosby@example.com");
    assert_eq!(body["developer"]["is_paid"], false);

    let (status, body) = send(&h.app, get(&format!("/session/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "found");
}

#[tokio::test]
async fn test_attach_payment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cus_new" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/charges"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "ch_first" })))
        .expect(1)
        .mount(&server)
        .await;
    let h = harness(&server.uri());
    let dev = seed(&h.store, 5, None).await;

    let (status, body) = send(
        &h.app,
        json_request(
            "POST",
            &format!("/developers/{}/pay", dev.token),
            json!({ "stripeToken": "tok_visa" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["developer"]["has_payment_method"], true);
    let stored = h.store.get_by_id(dev.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_method(), Some("cus_new"));
    assert_eq!(
        stored.expiration,
        dev.expiration
            .map(|e| broome::license::period_end(e, chrono::Duration::days(365)))
    );
}

#[tokio::test]
async fn test_admin_routes_require_key() {
    let h = harness("http://127.0.0.1:1");
    let dev = seed(&h.store, 10, None).await;

    let (status, _) = send(&h.app, get("/admin/developers")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .uri("/admin/developers")
        .header("x-admin-key", "not-the-key")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let ok = Request::builder()
        .uri("/admin/developers")
        .header("x-admin-key", ADMIN_KEY)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, ok).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["developers"].as_array().unwrap().len(), 1);

    let detail = Request::builder()
        .uri(format!("/admin/developers/{}", dev.token))
        .header("authorization", format!("Bearer {}", ADMIN_KEY))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, detail).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["developer"]["id"], dev.id.to_string());
}

#[tokio::test]
async fn test_metrics_count_session_outcomes() {
    let h = harness("http://127.0.0.1:1");
    let dev = seed(&h.store, 10, None).await;
    send(&h.app, get(&format!("/session/{}", dev.id))).await;

    let resp = h.app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains(r#"broome_license_events_total{event_type="session_found"} 1"#));
    assert_eq!(h.events.kinds().len(), 1);
}
