#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tower::ServiceExt;
use uuid::Uuid;

use kith::app::notifications::RecordingDispatcher;
use kith::config::AppConfig;
use kith::infra::store::memory::MemoryStore;
use kith::AppState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

// 32 bytes base64-encoded (test-only key — NOT used in production)
// "0123456789abcdef0123456789abcdef" (32 bytes)
const TEST_PASETO_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";
pub const DEFAULT_PASSWORD: &str = "testpassword123";

/// The follower cap the test app runs with. Small so cap tests stay cheap.
pub const TEST_FOLLOWER_LIMIT: usize = 5;

// ---------------------------------------------------------------------------
// TestApp — shared, lazily initialized once per test binary
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub events: Arc<RecordingDispatcher>,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: bytes::Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }
}

pub struct TestAccount {
    pub id: Uuid,
    pub handle: String,
    pub email: String,
    pub access_token: String,
}

static TEST_APP: OnceCell<TestApp> = OnceCell::const_new();

/// Get (or lazily create) the shared TestApp instance.
pub async fn app() -> &'static TestApp {
    TEST_APP
        .get_or_init(|| async { TestApp::setup().await })
        .await
}

impl TestApp {
    // ------------------------------------------------------------------
    // Setup — runs once per test binary
    // ------------------------------------------------------------------
    async fn setup() -> Self {
        // Ensure the 32-byte key decodes correctly
        assert_eq!(STANDARD.decode(TEST_PASETO_KEY).unwrap().len(), 32);

        // The test app runs against the in-memory store driver, so no
        // external infrastructure is needed. Config still flows through
        // AppConfig::from_env, the same code path as production.
        std::env::set_var("HTTP_ADDR", "127.0.0.1:0");
        std::env::set_var("STORE_DRIVER", "memory");
        std::env::set_var("PASETO_KEY", TEST_PASETO_KEY);
        std::env::set_var("FOLLOWER_LIMIT", TEST_FOLLOWER_LIMIT.to_string());
        std::env::set_var("TXN_MAX_ATTEMPTS", "4");
        std::env::set_var("TXN_BACKOFF_MS", "5");

        let config = AppConfig::from_env().expect("failed to build AppConfig");

        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(RecordingDispatcher::new());

        let state = AppState::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            events.clone(),
            &config,
        );

        let router = kith::http::router(state.clone());

        TestApp {
            router,
            state,
            store,
            events,
        }
    }

    // ------------------------------------------------------------------
    // Low-level request helper
    // ------------------------------------------------------------------
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");

        for &(key, value) in headers {
            builder = builder.header(key, value);
        }

        let request = if let Some(body) = body {
            builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap()
        } else {
            builder.body(Body::empty()).unwrap()
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();

        TestResponse { status, body_bytes }
    }

    // ------------------------------------------------------------------
    // Convenience HTTP helpers
    // ------------------------------------------------------------------
    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::GET, path, None, &headers).await
    }

    pub async fn post_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::POST, path, Some(body), &headers).await
    }

    pub async fn patch_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::PATCH, path, Some(body), &headers)
            .await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::DELETE, path, None, &headers).await
    }

    // ------------------------------------------------------------------
    // Test data helpers
    // ------------------------------------------------------------------

    /// Sign up a public account through the API and keep its access token.
    pub async fn create_account(&self, suffix: &str) -> TestAccount {
        self.create_account_with_privacy(suffix, "public").await
    }

    /// Sign up a private account through the API.
    pub async fn create_private_account(&self, suffix: &str) -> TestAccount {
        self.create_account_with_privacy(suffix, "private").await
    }

    pub async fn create_account_with_privacy(&self, suffix: &str, privacy: &str) -> TestAccount {
        let handle = format!("testacct_{}", suffix);
        let email = format!("test_{}@example.com", suffix);

        let resp = self
            .post_json(
                "/v1/accounts",
                json!({
                    "handle": handle,
                    "email": email,
                    "display_name": format!("Test Account {}", suffix),
                    "password": DEFAULT_PASSWORD,
                    "privacy": privacy,
                }),
                None,
            )
            .await;
        assert_eq!(
            resp.status,
            StatusCode::OK,
            "signup for {} failed: {}",
            handle,
            resp.error_message()
        );

        let body = resp.json();
        let id = body["account"]["id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .expect("signup response missing account id");
        let access_token = body["access_token"]
            .as_str()
            .expect("signup response missing access token")
            .to_string();

        TestAccount {
            id,
            handle,
            email,
            access_token,
        }
    }
}
