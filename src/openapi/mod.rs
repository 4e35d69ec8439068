use axum::{response::Json, routing::get, Router};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront Order API

Checkout, payment confirmation and delivery tracking for storefront orders.

## Authentication

Checkout and confirmation are open to the storefront client. Listing and
delivery endpoints require a bearer JWT:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

Failures share one body shape:

```json
{
  "error": "Bad Request",
  "message": "Payment not confirmed: Payment not confirmed or failed",
  "requestId": "4f1c...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    tags(
        (name = "orders", description = "Order lifecycle endpoints"),
        (name = "reconciliation", description = "Checkout sessions awaiting manual reconciliation"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::orders::create_checkout,
        crate::handlers::orders::confirm_payment,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::list_all_orders,
        crate::handlers::orders::mark_delivered,
        crate::handlers::orders::list_orphaned_sessions,
        crate::handlers::orders::resolve_orphaned_session,
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::handlers::orders::CheckoutRequest,
            crate::handlers::orders::CheckoutItemRequest,
            crate::handlers::orders::ConfirmPaymentRequest,
            crate::services::CheckoutOutcome,
            crate::services::OrphanedSession,
            crate::models::Order,
            crate::models::OrderItem,
            crate::models::OrderWithOwner,
            crate::models::OwnerSummary,
            crate::models::PaymentState,
            crate::handlers::health::HealthResponse,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn docs_routes() -> Router<AppState> {
    Router::new().route("/api-docs/openapi.json", get(openapi_json))
}
