use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use circulation_auth::{JwtClaims, PrincipalId, Role};
use circulation_infra::config::CirculationConfig;
use circulation_loans::InMemoryItemLocations;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(jwt_secret: &str) -> Self {
        let config = CirculationConfig {
            jwt_secret: jwt_secret.to_string(),
            ..CirculationConfig::default()
        };
        let locations = InMemoryItemLocations::new()
            .with("item-1", "lib-a")
            .with("item-2", "lib-b");

        // Same router as prod, bound to an ephemeral port.
        let app = circulation_api::app::build_app(&config, Arc::new(locations))
            .expect("default transition table is valid");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(jwt_secret: &str, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: PrincipalId::new(),
        roles,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn create_loan(client: &reqwest::Client, base_url: &str, token: &str) -> String {
    let res = client
        .post(format!("{}/circulation/loan/", base_url))
        .bearer_auth(token)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["metadata"]["state"], "CREATED");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn("test-secret").await;

    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_loan_endpoints() {
    let srv = TestServer::spawn("test-secret").await;

    let client = reqwest::Client::new();
    let res = client
        .post(format!("{}/circulation/loan/", srv.base_url))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Signed with a different secret.
    let forged = mint_jwt("other-secret", vec![Role::new("admin")]);
    let res = client
        .post(format!("{}/circulation/loan/", srv.base_url))
        .bearer_auth(forged)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn checkout_returns_accepted_with_updated_loan() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let token = mint_jwt(jwt_secret, vec![Role::new("librarian")]);
    let client = reqwest::Client::new();

    let id = create_loan(&client, &srv.base_url, &token).await;

    let res = client
        .post(format!("{}/circulation/loan/{}/checkout", srv.base_url, id))
        .bearer_auth(&token)
        .json(&json!({
            "patron_pid": "patron-1",
            "item_pid": "item-1",
            "transaction_user_pid": "librarian-1",
            "transaction_location_pid": "lib-a"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["revision"], 2);
    assert_eq!(body["metadata"]["state"], "ITEM_ON_LOAN");
    assert_eq!(body["metadata"]["patron_pid"], "patron-1");
    assert!(body["metadata"]["start_date"].is_string());
    assert!(body["metadata"]["end_date"].is_string());

    // The committed loan is what later reads see.
    let res = client
        .get(format!("{}/circulation/loan/{}", srv.base_url, id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let stored: serde_json::Value = res.json().await.unwrap();
    assert_eq!(stored, body);
}

#[tokio::test]
async fn invalid_action_for_state_is_method_not_allowed() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let token = mint_jwt(jwt_secret, vec![Role::new("librarian")]);
    let client = reqwest::Client::new();

    let id = create_loan(&client, &srv.base_url, &token).await;

    let res = client
        .post(format!("{}/circulation/loan/{}/validate_request", srv.base_url, id))
        .bearer_auth(&token)
        .json(&json!({ "item_pid": "item-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_action");
    assert!(body["message"].as_str().unwrap().contains("validate_request"));

    // Loan untouched.
    let res = client
        .get(format!("{}/circulation/loan/{}", srv.base_url, id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let stored: serde_json::Value = res.json().await.unwrap();
    assert_eq!(stored["revision"], 1);
    assert_eq!(stored["metadata"]["state"], "CREATED");
}

#[tokio::test]
async fn patron_without_checkout_permission_is_forbidden() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let librarian = mint_jwt(jwt_secret, vec![Role::new("librarian")]);
    let patron = mint_jwt(jwt_secret, vec![Role::new("patron")]);
    let client = reqwest::Client::new();

    let id = create_loan(&client, &srv.base_url, &librarian).await;

    let res = client
        .post(format!("{}/circulation/loan/{}/checkout", srv.base_url, id))
        .bearer_auth(&patron)
        .json(&json!({ "patron_pid": "patron-1", "item_pid": "item-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Patrons may request.
    let res = client
        .post(format!("{}/circulation/loan/{}/request", srv.base_url, id))
        .bearer_auth(&patron)
        .json(&json!({
            "patron_pid": "patron-1",
            "item_pid": "item-1",
            "transaction_location_pid": "lib-b",
            "pickup_location_pid": "lib-b"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["metadata"]["state"], "PENDING");
}

#[tokio::test]
async fn unknown_role_cannot_create_loans() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let token = mint_jwt(jwt_secret, vec![Role::new("viewer")]);

    let client = reqwest::Client::new();
    let res = client
        .post(format!("{}/circulation/loan/", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn request_at_home_library_lands_at_desk() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let token = mint_jwt(jwt_secret, vec![Role::new("librarian")]);
    let client = reqwest::Client::new();

    let id = create_loan(&client, &srv.base_url, &token).await;

    let res = client
        .post(format!("{}/circulation/loan/{}/request", srv.base_url, id))
        .bearer_auth(&token)
        .json(&json!({
            "patron_pid": "patron-1",
            "item_pid": "item-2",
            "transaction_location_pid": "lib-b",
            "pickup_location_pid": "lib-b"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["metadata"]["state"], "ITEM_AT_DESK");
    assert_eq!(body["metadata"]["pickup_location_pid"], "lib-b");
    assert!(body["metadata"]["request_expire_date"].is_string());
}

#[tokio::test]
async fn unknown_action_and_unknown_loan_are_not_found() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let token = mint_jwt(jwt_secret, vec![Role::new("admin")]);
    let client = reqwest::Client::new();

    let id = create_loan(&client, &srv.base_url, &token).await;

    let res = client
        .post(format!("{}/circulation/loan/{}/renew", srv.base_url, id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_trigger");

    let res = client
        .get(format!(
            "{}/circulation/loan/{}",
            srv.base_url, "018f3b1e-0000-7000-8000-000000000000"
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(format!("{}/circulation/loan/not-a-uuid", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
