use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;
use utoipa::ToSchema;

use crate::AppState;

/// Component health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

/// Individual component health details
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: String,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub order_store: ComponentHealth,
    pub payment_gateway: ComponentHealth,
}

/// Tracks application start time for uptime calculation
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

/// Liveness plus a check of the order store
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "A dependency is down", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let order_store = match &state.db {
        Some(db) => {
            let started = Instant::now();
            let result = crate::db::check_connection(db).await;
            let latency_ms = Some(started.elapsed().as_millis() as u64);
            match result {
                Ok(()) => ComponentHealth {
                    status: ComponentStatus::Up,
                    message: "Database connection successful".to_string(),
                    latency_ms,
                },
                Err(e) => {
                    tracing::warn!(error = %e, "health check: database unreachable");
                    ComponentHealth {
                        status: ComponentStatus::Down,
                        message: "Database connection failed".to_string(),
                        latency_ms,
                    }
                }
            }
        }
        None => ComponentHealth {
            status: ComponentStatus::Up,
            message: "In-memory order store".to_string(),
            latency_ms: None,
        },
    };

    let payment_gateway = ComponentHealth {
        status: if state.gateway_configured {
            ComponentStatus::Up
        } else {
            ComponentStatus::Down
        },
        message: if state.gateway_configured {
            "Payment gateway configured".to_string()
        } else {
            "No payment gateway credentials".to_string()
        },
        latency_ms: None,
    };

    // Gateway credentials are optional outside production
    let status = order_store.status;
    let code = match status {
        ComponentStatus::Up => StatusCode::OK,
        ComponentStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_secs: get_uptime_secs(),
            order_store,
            payment_gateway,
        }),
    )
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
