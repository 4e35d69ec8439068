#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use serde_json::Value;
use storefront_api::{
    app_router,
    auth::{AuthConfig, AuthService, PermissionAuthorizer, TokenSubject},
    config::AppConfig,
    errors::ServiceError,
    models::User,
    notifications::{NotificationError, NotificationSender},
    payments::{CheckoutLineItem, CheckoutSession, PaymentGateway, PaymentStatus},
    repositories::{InMemoryOrderStore, InMemoryUserDirectory},
    services::{OrderLifecycleService, OrderPolicy},
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Gateway double: hands out sequential session ids and reports whatever
/// status the test assigned to a reference (pending by default).
#[derive(Default)]
pub struct FakeGateway {
    next_session: AtomicUsize,
    fail_create: AtomicBool,
    statuses: Mutex<HashMap<String, PaymentStatus>>,
    created: Mutex<Vec<Vec<CheckoutLineItem>>>,
    status_lookups: AtomicUsize,
}

impl FakeGateway {
    pub fn set_status(&self, reference: &str, status: PaymentStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(reference.to_string(), status);
    }

    pub fn fail_session_creation(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn sessions_created(&self) -> Vec<Vec<CheckoutLineItem>> {
        self.created.lock().unwrap().clone()
    }

    pub fn status_lookups(&self) -> usize {
        self.status_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        line_items: &[CheckoutLineItem],
        _success_url: &str,
        _cancel_url: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayUnavailable("card network down".into()));
        }
        self.created.lock().unwrap().push(line_items.to_vec());
        let n = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CheckoutSession {
            session_id: format!("cs_test_{n}"),
        })
    }

    async fn get_payment_status(&self, reference: &str) -> Result<PaymentStatus, ServiceError> {
        self.status_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or(PaymentStatus::Pending))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Notification double that records every message and can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMail>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Rejected(503));
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}

/// Router wired to in-memory stores and test doubles.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub orders: Arc<InMemoryOrderStore>,
    pub users: Arc<InMemoryUserDirectory>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub auth: Arc<AuthService>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_policy(OrderPolicy::default())
    }

    pub fn with_policy(policy: OrderPolicy) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.order_store_backend = "in-memory".to_string();

        let orders = Arc::new(InMemoryOrderStore::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let service = OrderLifecycleService::new(
            orders.clone(),
            users.clone(),
            gateway.clone(),
            notifier.clone(),
            policy,
        );
        let auth = Arc::new(AuthService::new(AuthConfig::from_app_config(&cfg)));

        let state = AppState {
            config: cfg,
            orders: Arc::new(service),
            auth: auth.clone(),
            authorizer: Arc::new(PermissionAuthorizer),
            db: None,
            gateway_configured: true,
        };

        Self {
            router: app_router(state.clone()),
            state,
            orders,
            users,
            gateway,
            notifier,
            auth,
        }
    }

    pub fn seed_user(&self, name: &str, email: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
        };
        self.users.insert(user.clone());
        user
    }

    pub fn token_for(&self, user_id: Uuid, roles: &[&str]) -> String {
        self.auth
            .issue_token(TokenSubject {
                user_id: user_id.to_string(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
                ..Default::default()
            })
            .expect("issue test token")
    }

    pub fn admin_token(&self) -> String {
        self.token_for(Uuid::new_v4(), &["admin"])
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
