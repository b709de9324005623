//! Test helpers for cla-service integration tests.
//!
//! Everything runs against the in-memory stores, the recording email provider
//! and a manual clock, so no MongoDB or SMTP server is needed.

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use chrono::{TimeZone, Utc};
use cla_service::{
    AppState, build_router,
    config::{
        ClaConfig, Environment, JwtConfig, MongoConfig, RateLimitConfig, SecurityConfig,
        SigningConfig, SmtpConfig,
    },
    models::OrgKey,
    services::{
        CorpSigningService, EmailTemplate, ManagerService, ManualClock, MemoryCodeStore,
        MemorySigningStore, MockEmailService,
    },
    utils::Password,
};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_ADMIN_API_KEY: &str = "test-admin-key-12345";

pub fn test_config() -> ClaConfig {
    let mut signing = SigningConfig {
        invalid_corp_email_domain: "gmail.com,qq.com".to_string(),
        ..SigningConfig::default()
    };
    signing.set_default();

    ClaConfig {
        common: Default::default(),
        environment: Environment::Dev,
        service_name: "cla-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        cla_platform_url: "https://cla.example.org".to_string(),
        mongodb: MongoConfig {
            uri: "mongodb://localhost:27017".to_string(),
            database: "cla_test".to_string(),
            timeout_seconds: 5,
        },
        jwt: JwtConfig {
            secret: "integration-test-secret-integration-test".to_string(),
            access_token_expiry_seconds: 3600,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 2525,
            user: String::new(),
            password: String::new(),
            from_email: "noreply@example.org".to_string(),
            from_name: "CLA".to_string(),
            enabled: false,
        },
        security: SecurityConfig {
            admin_api_key: TEST_ADMIN_API_KEY.to_string(),
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        signing,
        rate_limit: RateLimitConfig {
            login_attempts: 100,
            login_window_seconds: 60,
            password_retrieval_attempts: 100,
            password_retrieval_window_seconds: 60,
        },
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemorySigningStore>,
    pub codes: Arc<MemoryCodeStore>,
    pub email: Arc<MockEmailService>,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ClaConfig) -> Self {
        let store = Arc::new(MemorySigningStore::new());
        let codes = Arc::new(MemoryCodeStore::new());
        let email = Arc::new(MockEmailService::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));

        let state = AppState::new(
            config,
            store.clone(),
            codes.clone(),
            email.clone(),
            clock.clone(),
        );

        Self {
            state,
            store,
            codes,
            email,
            clock,
        }
    }

    pub fn managers(&self) -> &ManagerService {
        &self.state.manager_service
    }

    pub fn signings(&self) -> &CorpSigningService {
        &self.state.signing_service
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Opens `key`, signs it for example.com and creates admin@example.com.
    /// Returns the admin's one-time password.
    pub async fn signed_link(&self, key: &OrgKey) -> Password {
        self.signings().open_link(key).await.unwrap();
        self.signings()
            .sign_as_corporation(key, "Example Inc", "admin@example.com", "Alice")
            .await
            .unwrap();
        self.managers()
            .create_admin(key, "admin@example.com")
            .await
            .unwrap();

        self.password_sent_to("admin@example.com")
    }

    /// One-time password from the latest account email sent to `email`.
    pub fn password_sent_to(&self, email: &str) -> Password {
        let msg = self
            .email
            .sent_to(email)
            .into_iter()
            .rev()
            .find(|m| {
                matches!(
                    m.template,
                    EmailTemplate::AddingCorpAdmin | EmailTemplate::AddingCorpManager
                )
            })
            .expect("no account email sent");

        let password = msg
            .content
            .lines()
            .find_map(|line| line.strip_prefix("Password: "))
            .expect("account email without password");
        Password::new(password.trim())
    }

    /// Code from the latest email of `template` sent to `email`.
    pub fn code_sent_to(&self, email: &str, template: EmailTemplate) -> String {
        let msg = self
            .email
            .sent_to(email)
            .into_iter()
            .rev()
            .find(|m| m.template == template)
            .expect("no code email sent");

        msg.content
            .split_whitespace()
            .skip_while(|w| *w != "code")
            .nth(1)
            .expect("email without code")
            .to_string()
    }
}

pub fn org_key() -> OrgKey {
    OrgKey::new("github", "acme", "")
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn admin_request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-admin-api-key", TEST_ADMIN_API_KEY);

    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn bearer_request(
    method: &str,
    uri: &str,
    token: &str,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token));

    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}
