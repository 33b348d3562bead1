/// Common test utilities for API tests
///
/// The router runs over the in-memory core, so no database is needed.
/// Tests that want enhancements to finish start the embedded worker with
/// its mock provider; the others keep the job channel parked.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use retouch_api::app::{build_router, AppState};
use retouch_api::config::Config;
use retouch_shared::context::CoreServices;
use retouch_shared::lifecycle::EnhancementJob;
use retouch_shared::payments::{HmacSignatureVerifier, SIGNATURE_HEADER};
use retouch_worker::config::WorkerConfig;
use retouch_worker::WorkerHandle;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tower::Service as _;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_0123456789abcdef0123456789abcdef";

pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

/// Test context containing the router and the core behind it
pub struct TestContext {
    pub app: Router,
    pub services: CoreServices,
    jobs: Option<UnboundedReceiver<EnhancementJob>>,
}

impl TestContext {
    /// Creates a context with default configuration
    pub fn new() -> Self {
        Self::with_env(&[])
    }

    /// Creates a context with extra environment overrides
    pub fn with_env(vars: &[(&str, &str)]) -> Self {
        let mut env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env.insert("RETOUCH_WEBHOOK_SECRET".to_string(), WEBHOOK_SECRET.to_string());

        let config = Config::from_lookup(move |key| env.get(key).cloned()).unwrap();
        let (services, jobs) = CoreServices::in_memory(config.core.clone(), WEBHOOK_SECRET);
        let app = build_router(AppState::new(services.clone(), config));

        Self {
            app,
            services,
            jobs: Some(jobs),
        }
    }

    /// Starts the embedded worker with the mock provider
    pub fn start_worker(&mut self) -> WorkerHandle {
        let jobs = self.jobs.take().expect("worker already started");
        retouch_worker::start(self.services.clone(), jobs, &WorkerConfig::default(), false)
    }

    /// Sends a request and returns status and JSON body
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().call(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, user: Uuid, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .uri(uri)
                .header("x-user-id", user.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post(&self, user: Uuid, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("x-user-id", user.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn upload(
        &self,
        user: Uuid,
        bytes: &'static [u8],
        content_type: &str,
        mode: &str,
    ) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(format!("/v1/photos?mode={}", mode))
                .header("x-user-id", user.to_string())
                .header("content-type", content_type)
                .body(Body::from(bytes))
                .unwrap(),
        )
        .await
    }

    /// Uploads a JPEG and returns its id
    pub async fn upload_jpeg(&self, user: Uuid) -> Uuid {
        let (status, body) = self.upload(user, JPEG, "image/jpeg", "restore").await;
        assert_eq!(status, StatusCode::CREATED, "upload failed: {}", body);
        photo_id(&body)
    }

    /// Delivers a payment event signed with the configured secret
    pub async fn deliver_payment(&self, event: &Value) -> (StatusCode, Value) {
        let body = event.to_string();
        let signature = HmacSignatureVerifier::new(WEBHOOK_SECRET).sign(body.as_bytes());
        self.deliver_raw(body, Some(signature)).await
    }

    pub async fn deliver_raw(&self, body: String, signature: Option<String>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/webhooks/payments")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }
}

pub fn photo_id(body: &Value) -> Uuid {
    body["id"].as_str().unwrap().parse().unwrap()
}

/// Polls a photo until it leaves `processing`
pub async fn settled(ctx: &TestContext, user: Uuid, id: Uuid) -> Value {
    let uri = format!("/v1/photos/{}", id);
    let start = std::time::Instant::now();

    loop {
        let (status, body) = ctx.get(user, &uri).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] != "processing" {
            return body;
        }

        if start.elapsed() > std::time::Duration::from_secs(5) {
            panic!("photo {} never settled", id);
        }

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
