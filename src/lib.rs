//! Storefront API Library
//!
//! Order lifecycle and payment reconciliation for a storefront: checkout
//! sessions, gateway-confirmed payments, delivery tracking and order listing.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod notifications;
pub mod openapi;
pub mod payments;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{routing::get, Extension, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::timeout::TimeoutLayer;

use crate::auth::{AuthConfig, AuthService, Authorizer, PermissionAuthorizer};
use crate::config::{AppConfig, OrderStoreBackend, StockDeduction};
use crate::errors::ServiceError;
use crate::models::User;
use crate::notifications::{HttpMailer, LogOnlyNotifier, MailerConfig, NotificationSender};
use crate::payments::{
    stripe::{StripeConfig, StripeGateway},
    PaymentGateway, UnconfiguredGateway,
};
use crate::repositories::{
    InMemoryInventoryLedger, InMemoryOrderStore, InMemoryUserDirectory, InventoryLedger,
    NoopInventoryLedger, OrderStore, SeaOrmInventoryLedger, SeaOrmOrderStore,
    SeaOrmUserDirectory, UserDirectory,
};
use crate::services::{OrderLifecycleService, OrderPolicy};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub orders: Arc<OrderLifecycleService>,
    pub auth: Arc<AuthService>,
    pub authorizer: Arc<dyn Authorizer>,
    /// Present when orders live in the relational database
    pub db: Option<Arc<DatabaseConnection>>,
    pub gateway_configured: bool,
}

/// Full HTTP surface with the shared middleware stack applied.
pub fn app_router(state: AppState) -> Router {
    let auth_service = state.auth.clone();
    let authorizer = state.authorizer.clone();
    let request_timeout = state.config.request_timeout();

    Router::new()
        .route("/", get(|| async { "storefront-api up" }))
        .merge(handlers::health_routes())
        .merge(openapi::docs_routes())
        .nest("/api/orders", handlers::order_routes())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(request_timeout))
        // Auth middleware reads these from request extensions
        .layer(Extension(auth_service))
        .layer(Extension(authorizer))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

/// Wires stores, gateway, mailer and auth from configuration.
pub async fn build_state_from_config(cfg: &AppConfig) -> Result<AppState, ServiceError> {
    let (orders, users, inventory, db): (
        Arc<dyn OrderStore>,
        Arc<dyn UserDirectory>,
        Arc<dyn InventoryLedger>,
        Option<Arc<DatabaseConnection>>,
    ) = match cfg.order_store_backend() {
        OrderStoreBackend::Database => {
            let pool = db::establish_connection_from_app_config(cfg).await?;
            if cfg.auto_migrate {
                db::run_migrations(&pool).await?;
            }
            let pool = Arc::new(pool);
            let inventory: Arc<dyn InventoryLedger> = match cfg.stock_deduction() {
                StockDeduction::Disabled => Arc::new(NoopInventoryLedger),
                _ => Arc::new(SeaOrmInventoryLedger::new(pool.clone())),
            };
            (
                Arc::new(SeaOrmOrderStore::new(pool.clone())),
                Arc::new(SeaOrmUserDirectory::new(pool.clone())),
                inventory,
                Some(pool),
            )
        }
        OrderStoreBackend::InMemory => {
            ::tracing::warn!("using in-memory order store; orders are lost on restart");
            if cfg.seed_users.is_empty() {
                ::tracing::warn!("no seed_users configured; every checkout will fail with an unknown buyer");
            }

            let users = InMemoryUserDirectory::new();
            for seed in &cfg.seed_users {
                users.insert(User {
                    id: seed.id,
                    name: seed.name.clone(),
                    email: seed.email.clone(),
                });
            }
            let inventory = InMemoryInventoryLedger::new();
            for seed in &cfg.seed_stock {
                inventory.set_stock(seed.product_id, seed.count);
            }
            ::tracing::info!(
                users = cfg.seed_users.len(),
                products = cfg.seed_stock.len(),
                "in-memory backend seeded"
            );

            (
                Arc::new(InMemoryOrderStore::new()),
                Arc::new(users),
                Arc::new(inventory),
                None,
            )
        }
    };

    let (gateway, gateway_configured): (Arc<dyn PaymentGateway>, bool) =
        match StripeConfig::from_app_config(cfg) {
            Some(stripe) => (Arc::new(StripeGateway::new(stripe)?), true),
            None => {
                ::tracing::warn!("stripe_secret_key not set; checkout and confirmation will fail");
                (Arc::new(UnconfiguredGateway), false)
            }
        };

    let notifier: Arc<dyn NotificationSender> = match MailerConfig::from_app_config(cfg) {
        Some(mailer) => Arc::new(
            HttpMailer::new(mailer).map_err(|e| ServiceError::InternalError(e.to_string()))?,
        ),
        None => Arc::new(LogOnlyNotifier),
    };

    let service = OrderLifecycleService::new(
        orders,
        users,
        gateway,
        notifier,
        OrderPolicy::from_app_config(cfg),
    )
    .with_inventory(inventory);

    Ok(AppState {
        config: cfg.clone(),
        orders: Arc::new(service),
        auth: Arc::new(AuthService::new(AuthConfig::from_app_config(cfg))),
        authorizer: Arc::new(PermissionAuthorizer),
        db,
        gateway_configured,
    })
}
