use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{AuthRouterExt, AuthUser, Capability};
use crate::errors::ServiceError;
use crate::models::{Order, OrderItem, OrderWithOwner};
use crate::services::{CheckoutOutcome, OrphanedSession};
use crate::AppState;

/// One line of a checkout request
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItemRequest {
    #[serde(alias = "product")]
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 200, message = "Item name is required"))]
    pub name: String,
    #[serde(alias = "price")]
    #[schema(value_type = String, example = "100.00")]
    pub unit_price: Decimal,
    #[serde(alias = "qty")]
    #[validate(range(min = 1, max = 10000, message = "Quantity must be between 1 and 10000"))]
    pub quantity: i64,
}

impl CheckoutItemRequest {
    fn into_item(self) -> Result<OrderItem, ServiceError> {
        let quantity = u32::try_from(self.quantity).map_err(|_| {
            ServiceError::ValidationError("Quantity must be between 1 and 10000".to_string())
        })?;
        Ok(OrderItem {
            product_id: self.product_id,
            name: self.name,
            unit_price: self.unit_price,
            quantity,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default, alias = "user")]
    pub user_id: Option<Uuid>,
    #[serde(default, alias = "orderItems")]
    pub items: Vec<CheckoutItemRequest>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    /// Gateway session id returned by checkout
    #[serde(alias = "paymentIntentId", alias = "sessionId")]
    #[validate(length(min = 1, max = 255, message = "Payment reference is required"))]
    pub payment_reference: String,
    pub order_id: Uuid,
}

/// Open a hosted checkout session for a buyer's cart
#[utoipa::path(
    post,
    path = "/api/orders/checkout",
    summary = "Create checkout session",
    description = "Creates a hosted payment session and a pending order tied to it",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutOutcome),
        (status = 400, description = "No items or invalid input", body = crate::errors::ErrorResponse),
        (status = 404, description = "Buyer not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway or store failure", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutOutcome>, ServiceError> {
    if request.items.is_empty() {
        return Err(ServiceError::ValidationError(
            "No order items provided".to_string(),
        ));
    }
    let user_id = request
        .user_id
        .ok_or_else(|| ServiceError::ValidationError("userId is required".to_string()))?;

    let items = request
        .items
        .into_iter()
        .map(|item| -> Result<OrderItem, ServiceError> {
            item.validate()?;
            item.into_item()
        })
        .collect::<Result<Vec<_>, ServiceError>>()?;

    let outcome = state.orders.create_checkout(user_id, items).await?;
    Ok(Json(outcome))
}

/// Confirm a payment with the gateway and mark the order paid
#[utoipa::path(
    post,
    path = "/api/orders/confirm",
    summary = "Confirm payment",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Order is paid", body = Order),
        (status = 400, description = "Payment not confirmed or reference mismatch", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway or store failure", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<Order>, ServiceError> {
    request.validate()?;
    let order = state
        .orders
        .confirm_payment(&request.payment_reference, request.order_id)
        .await?;
    Ok(Json(order))
}

/// Orders owned by the authenticated caller, newest first
#[utoipa::path(
    get,
    path = "/api/orders/mine",
    summary = "List my orders",
    responses(
        (status = 200, description = "Caller's orders", body = [Order]),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Order>>, ServiceError> {
    let user_id = user.user_uuid()?;
    let orders = state.orders.list_for_user(user_id).await?;
    Ok(Json(orders))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    summary = "List all orders",
    description = "Every order with its owner's id and name",
    responses(
        (status = 200, description = "All orders", body = [OrderWithOwner]),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_all_orders(
    State(state): State<AppState>,
) -> Result<Json<Vec<OrderWithOwner>>, ServiceError> {
    let orders = state.orders.list_all_with_owners().await?;
    Ok(Json(orders))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/deliver",
    summary = "Mark order delivered",
    params(("id" = String, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order marked delivered", body = Order),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order has not been paid", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn mark_delivered(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ServiceError> {
    // A malformed id cannot name an existing order
    let order_id =
        Uuid::parse_str(&id).map_err(|_| ServiceError::NotFound("Order not found".to_string()))?;
    let order = state.orders.mark_delivered(order_id).await?;
    Ok(Json(order))
}

#[utoipa::path(
    get,
    path = "/api/orders/orphaned-sessions",
    summary = "List orphaned checkout sessions",
    description = "Gateway sessions whose order could not be persisted",
    responses(
        (status = 200, description = "Sessions awaiting reconciliation", body = [OrphanedSession]),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "reconciliation"
)]
pub async fn list_orphaned_sessions(State(state): State<AppState>) -> Json<Vec<OrphanedSession>> {
    Json(state.orders.orphaned_sessions())
}

#[utoipa::path(
    delete,
    path = "/api/orders/orphaned-sessions/{session_id}",
    summary = "Resolve an orphaned checkout session",
    params(("session_id" = String, Path, description = "Gateway session id")),
    responses(
        (status = 204, description = "Session removed from the registry"),
        (status = 404, description = "Unknown session", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "reconciliation"
)]
pub async fn resolve_orphaned_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    state.orders.resolve_orphaned_session(&session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Routes mounted under `/api/orders`
pub fn order_routes() -> Router<AppState> {
    let public = Router::new()
        .route("/checkout", post(create_checkout))
        .route("/create-payment-intent", post(create_checkout))
        .route("/confirm", post(confirm_payment));

    let buyer = Router::new()
        .route("/mine", get(list_my_orders))
        .route("/myorders", get(list_my_orders))
        .with_auth();

    let admin_list = Router::new()
        .route("/", get(list_all_orders))
        .with_capability(Capability::ViewAllOrders);

    let delivery = Router::new()
        .route("/:id/deliver", post(mark_delivered).put(mark_delivered))
        .with_capability(Capability::MarkDelivered);

    let reconciliation = Router::new()
        .route("/orphaned-sessions", get(list_orphaned_sessions))
        .route(
            "/orphaned-sessions/:session_id",
            delete(resolve_orphaned_session),
        )
        .with_capability(Capability::ViewOrphanedSessions);

    public
        .merge(buyer)
        .merge(admin_list)
        .merge(delivery)
        .merge(reconciliation)
}
