use crate::{
    config::{AppConfig, StockDeduction},
    errors::ServiceError,
    models::{
        money::{fits_minor_unit, max_unit_price, to_minor_units},
        Order, OrderItem, OrderWithOwner, OwnerSummary,
    },
    notifications::{templates, NotificationSender},
    payments::{CheckoutLineItem, PaymentGateway},
    repositories::{InventoryLedger, NoopInventoryLedger, OrderStore, UserDirectory},
    services::reconciliation::{OrphanedSession, OrphanedSessions},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use serde::Serialize;
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Business rules and limits applied by [`OrderLifecycleService`]
#[derive(Clone, Debug)]
pub struct OrderPolicy {
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub store_timeout: Duration,
    pub gateway_timeout: Duration,
    pub require_payment_before_delivery: bool,
    pub stock_deduction: StockDeduction,
}

impl OrderPolicy {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.payment_currency.to_ascii_lowercase(),
            success_url: cfg.success_url(),
            cancel_url: cfg.cancel_url(),
            store_timeout: cfg.store_timeout(),
            gateway_timeout: cfg.gateway_timeout(),
            require_payment_before_delivery: cfg.require_payment_before_delivery,
            stock_deduction: cfg.stock_deduction(),
        }
    }
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            currency: "inr".to_string(),
            success_url: "http://localhost:3000/paymentsuccess".to_string(),
            cancel_url: "http://localhost:3000/paymentfailure".to_string(),
            store_timeout: Duration::from_secs(5),
            gateway_timeout: Duration::from_secs(10),
            require_payment_before_delivery: true,
            stock_deduction: StockDeduction::Disabled,
        }
    }
}

/// Result of a successful checkout
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutOutcome {
    pub session_id: String,
    pub order_id: Uuid,
}

/// Owns every order state transition: checkout, payment confirmation and delivery.
#[derive(Clone)]
pub struct OrderLifecycleService {
    orders: Arc<dyn OrderStore>,
    users: Arc<dyn UserDirectory>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationSender>,
    inventory: Arc<dyn InventoryLedger>,
    orphans: Arc<OrphanedSessions>,
    policy: OrderPolicy,
}

impl OrderLifecycleService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        users: Arc<dyn UserDirectory>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationSender>,
        policy: OrderPolicy,
    ) -> Self {
        Self {
            orders,
            users,
            gateway,
            notifier,
            inventory: Arc::new(NoopInventoryLedger),
            orphans: Arc::new(OrphanedSessions::new()),
            policy,
        }
    }

    pub fn with_inventory(mut self, inventory: Arc<dyn InventoryLedger>) -> Self {
        self.inventory = inventory;
        self
    }

    pub fn with_orphan_registry(mut self, orphans: Arc<OrphanedSessions>) -> Self {
        self.orphans = orphans;
        self
    }

    pub fn policy(&self) -> &OrderPolicy {
        &self.policy
    }

    async fn store_call<T, F>(&self, op: &'static str, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        match tokio::time::timeout(self.policy.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                error!(op, timeout = ?self.policy.store_timeout, "order store call timed out");
                Err(ServiceError::StoreUnavailable(format!("{} timed out", op)))
            }
        }
    }

    async fn gateway_call<T, F>(&self, op: &'static str, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        match tokio::time::timeout(self.policy.gateway_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                error!(op, timeout = ?self.policy.gateway_timeout, "payment gateway call timed out");
                Err(ServiceError::GatewayUnavailable(format!("{} timed out", op)))
            }
        }
    }

    /// Best effort: failures are logged and counted, never returned.
    async fn notify(&self, to: &str, message: templates::EmailMessage) {
        if let Err(e) = self.notifier.send(to, message.subject, &message.html).await {
            counter!("storefront.notifications.failed", 1);
            warn!(error = %e, subject = message.subject, "notification failed");
        }
    }

    fn validate_items(&self, items: &[OrderItem]) -> Result<(), ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "No order items provided".to_string(),
            ));
        }

        for (index, item) in items.iter().enumerate() {
            if item.name.trim().is_empty() {
                return Err(ServiceError::ValidationError(format!(
                    "item {} has no name",
                    index
                )));
            }
            if item.quantity == 0 {
                return Err(ServiceError::ValidationError(format!(
                    "item {} must have a quantity of at least 1",
                    index
                )));
            }
            if item.unit_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "item {} has a negative price",
                    index
                )));
            }
            if item.unit_price > max_unit_price() {
                return Err(ServiceError::ValidationError(format!(
                    "item {} price exceeds the maximum of {}",
                    index,
                    max_unit_price()
                )));
            }
            if !fits_minor_unit(item.unit_price, &self.policy.currency) {
                return Err(ServiceError::ValidationError(format!(
                    "item {} price {} has more precision than {} supports",
                    index, item.unit_price, self.policy.currency
                )));
            }
        }

        Ok(())
    }

    /// Opens a hosted checkout session and records a pending order for it.
    #[instrument(skip(self, items), fields(user_id = %user_id, lines = items.len()))]
    pub async fn create_checkout(
        &self,
        user_id: Uuid,
        items: Vec<OrderItem>,
    ) -> Result<CheckoutOutcome, ServiceError> {
        self.validate_items(&items)?;

        let buyer = self
            .store_call("find_user", self.users.find_by_id(user_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

        if self.policy.stock_deduction == StockDeduction::AtCheckout {
            self.store_call("deduct_stock", self.inventory.deduct(&items))
                .await?;
        }

        let line_items = items
            .iter()
            .map(|item| {
                Ok(CheckoutLineItem {
                    name: item.name.clone(),
                    unit_amount_minor: to_minor_units(item.unit_price, &self.policy.currency)?,
                    quantity: item.quantity,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        let session = self
            .gateway_call(
                "create_checkout_session",
                self.gateway.create_checkout_session(
                    &line_items,
                    &self.policy.success_url,
                    &self.policy.cancel_url,
                ),
            )
            .await
            .map_err(|e| {
                counter!("storefront.checkouts.failed", 1);
                e
            })?;

        let order = Order::new_pending(
            buyer.id,
            items,
            self.policy.currency.clone(),
            session.session_id.clone(),
            Utc::now(),
        );
        let total_price = order.total_price;

        let order = match self
            .store_call("create_order", self.orders.create(order))
            .await
        {
            Ok(order) => order,
            Err(e) => {
                counter!("storefront.checkouts.orphaned", 1);
                self.orphans.record(OrphanedSession {
                    session_id: session.session_id.clone(),
                    user_id: buyer.id,
                    total_price,
                    currency: self.policy.currency.clone(),
                    reason: e.to_string(),
                    recorded_at: Utc::now(),
                });
                return Err(e);
            }
        };

        info!(order_id = %order.id, total = %order.total_price, "order created for checkout session");
        counter!("storefront.checkouts.created", 1);

        self.notify(&buyer.email, templates::order_placed(&order))
            .await;

        Ok(CheckoutOutcome {
            session_id: session.session_id,
            order_id: order.id,
        })
    }

    /// Marks an order paid once the gateway reports the payment as succeeded.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn confirm_payment(
        &self,
        payment_reference: &str,
        order_id: Uuid,
    ) -> Result<Order, ServiceError> {
        let payment_reference = payment_reference.trim();
        if payment_reference.is_empty() {
            return Err(ServiceError::ValidationError(
                "Payment reference is required".to_string(),
            ));
        }

        // The reference must belong to the order before the gateway is asked about it
        let existing = self
            .store_call("find_order", self.orders.find_by_id(order_id))
            .await?;
        if let Some(order) = &existing {
            if order.payment_reference != payment_reference {
                warn!(
                    expected = %order.payment_reference,
                    "payment reference does not belong to order"
                );
                return Err(ServiceError::ValidationError(
                    "Payment reference does not match order".to_string(),
                ));
            }
        }

        let status = self
            .gateway_call(
                "get_payment_status",
                self.gateway.get_payment_status(payment_reference),
            )
            .await?;

        if !status.is_succeeded() {
            counter!("storefront.payments.not_confirmed", 1);
            info!(status = status.as_str(), "payment not confirmed");
            return Err(ServiceError::PaymentNotConfirmed(
                "Payment not confirmed or failed".to_string(),
            ));
        }

        let order = existing.ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if order.is_paid {
            info!("order already paid; confirmation is a no-op");
            return Ok(order);
        }

        let updated = self
            .store_call(
                "mark_paid",
                self.orders.mark_paid_if_unpaid(order.id, Utc::now()),
            )
            .await?;

        let Some(updated) = updated else {
            // A concurrent confirmation applied the transition first
            return self
                .store_call("find_order", self.orders.find_by_id(order_id))
                .await?
                .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()));
        };

        counter!("storefront.payments.confirmed", 1);
        info!("order marked paid");

        if self.policy.stock_deduction == StockDeduction::AtConfirmation {
            if let Err(e) = self
                .store_call("deduct_stock", self.inventory.deduct(&updated.items))
                .await
            {
                error!(error = %e, "stock deduction failed for paid order");
            }
        }

        match self
            .store_call("find_user", self.users.find_by_id(updated.user_id))
            .await
        {
            Ok(Some(owner)) => {
                self.notify(&owner.email, templates::payment_received(&updated))
                    .await
            }
            Ok(None) => warn!(user_id = %updated.user_id, "order owner not found; skipping notification"),
            Err(e) => warn!(error = %e, "owner lookup failed; skipping notification"),
        }

        Ok(updated)
    }

    /// Flags an order as handed over to the buyer.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        let mut order = self
            .store_call("find_order", self.orders.find_by_id(order_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if self.policy.require_payment_before_delivery && !order.is_paid {
            return Err(ServiceError::Conflict(
                "Order has not been paid yet".to_string(),
            ));
        }

        if !order.mark_delivered(Utc::now()) {
            return Ok(order);
        }

        let saved = self.store_call("save_order", self.orders.save(order)).await?;
        counter!("storefront.orders.delivered", 1);
        info!("order marked delivered");
        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        self.store_call("find_orders_by_user", self.orders.find_by_user(user_id))
            .await
    }

    /// Every order with its owner's id and name attached.
    #[instrument(skip(self))]
    pub async fn list_all_with_owners(&self) -> Result<Vec<OrderWithOwner>, ServiceError> {
        let orders = self
            .store_call("find_all_orders", self.orders.find_all())
            .await?;

        let mut owner_ids: Vec<Uuid> = orders.iter().map(|order| order.user_id).collect();
        owner_ids.sort_unstable();
        owner_ids.dedup();

        let owners: HashMap<Uuid, OwnerSummary> = self
            .store_call("find_users", self.users.find_by_ids(&owner_ids))
            .await?
            .into_iter()
            .map(|user| {
                (
                    user.id,
                    OwnerSummary {
                        id: user.id,
                        name: user.name,
                    },
                )
            })
            .collect();

        Ok(orders
            .into_iter()
            .map(|order| OrderWithOwner {
                user: owners.get(&order.user_id).cloned(),
                order,
            })
            .collect())
    }

    pub fn orphaned_sessions(&self) -> Vec<OrphanedSession> {
        self.orphans.list()
    }

    /// Drops a session from the registry once it has been settled by hand.
    pub fn resolve_orphaned_session(&self, session_id: &str) -> Result<OrphanedSession, ServiceError> {
        let session = self
            .orphans
            .resolve(session_id)
            .ok_or_else(|| ServiceError::NotFound("Orphaned session not found".to_string()))?;
        info!(session_id, "orphaned session resolved");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::notifications::MockNotificationSender;
    use crate::payments::{CheckoutSession, MockPaymentGateway, PaymentStatus};
    use crate::repositories::{
        InMemoryInventoryLedger, InMemoryOrderStore, InMemoryUserDirectory, MockOrderStore,
    };
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct Fixture {
        orders: Arc<InMemoryOrderStore>,
        users: Arc<InMemoryUserDirectory>,
        buyer: User,
    }

    fn fixture() -> Fixture {
        let users = Arc::new(InMemoryUserDirectory::new());
        let buyer = User {
            id: Uuid::new_v4(),
            name: "Asha".into(),
            email: "asha@example.com".into(),
        };
        users.insert(buyer.clone());
        Fixture {
            orders: Arc::new(InMemoryOrderStore::new()),
            users,
            buyer,
        }
    }

    fn item(price: Decimal, quantity: u32) -> OrderItem {
        OrderItem {
            product_id: Uuid::new_v4(),
            name: "Kettle".into(),
            unit_price: price,
            quantity,
        }
    }

    fn service(
        fx: &Fixture,
        gateway: MockPaymentGateway,
        notifier: MockNotificationSender,
        policy: OrderPolicy,
    ) -> OrderLifecycleService {
        OrderLifecycleService::new(
            fx.orders.clone(),
            fx.users.clone(),
            Arc::new(gateway),
            Arc::new(notifier),
            policy,
        )
    }

    fn gateway_returning_session(id: &'static str) -> MockPaymentGateway {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_checkout_session()
            .times(1)
            .returning(move |_, _, _| {
                Ok(CheckoutSession {
                    session_id: id.to_string(),
                })
            });
        gateway
    }

    fn gateway_with_status(status: PaymentStatus) -> MockPaymentGateway {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_get_payment_status()
            .returning(move |_| Ok(status.clone()));
        gateway
    }

    fn quiet_notifier() -> MockNotificationSender {
        let mut notifier = MockNotificationSender::new();
        notifier.expect_send().returning(|_, _, _| Ok(()));
        notifier
    }

    async fn seed_order(fx: &Fixture, reference: &str) -> Order {
        fx.orders
            .create(Order::new_pending(
                fx.buyer.id,
                vec![item(dec!(100), 2)],
                "inr",
                reference,
                Utc::now(),
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn checkout_persists_pending_order_with_session_reference() {
        let fx = fixture();
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_checkout_session()
            .withf(|items, success, cancel| {
                items.len() == 1
                    && items[0].unit_amount_minor == 10_000
                    && items[0].quantity == 2
                    && success.ends_with("/paymentsuccess")
                    && cancel.ends_with("/paymentfailure")
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(CheckoutSession {
                    session_id: "cs_test_1".into(),
                })
            });
        let mut notifier = MockNotificationSender::new();
        notifier
            .expect_send()
            .withf(|to, subject, _| {
                to == "asha@example.com" && subject.starts_with("Order Confirmation")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let svc = service(&fx, gateway, notifier, OrderPolicy::default());
        let outcome = svc
            .create_checkout(fx.buyer.id, vec![item(dec!(100), 2)])
            .await
            .unwrap();

        assert_eq!(outcome.session_id, "cs_test_1");
        let order = fx.orders.find_by_id(outcome.order_id).await.unwrap().unwrap();
        assert_eq!(order.total_price, dec!(200));
        assert_eq!(order.payment_reference, "cs_test_1");
        assert!(!order.is_paid);
    }

    #[tokio::test]
    async fn empty_checkout_has_no_side_effects() {
        let fx = fixture();
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_checkout_session().times(0);
        let mut notifier = MockNotificationSender::new();
        notifier.expect_send().times(0);

        let svc = service(&fx, gateway, notifier, OrderPolicy::default());
        let err = svc.create_checkout(fx.buyer.id, vec![]).await.unwrap_err();

        assert_matches!(err, ServiceError::ValidationError(_));
        assert!(fx.orders.is_empty());
    }

    #[tokio::test]
    async fn unknown_buyer_fails_before_the_gateway() {
        let fx = fixture();
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_checkout_session().times(0);

        let svc = service(&fx, gateway, quiet_notifier(), OrderPolicy::default());
        let err = svc
            .create_checkout(Uuid::new_v4(), vec![item(dec!(10), 1)])
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::NotFound(_));
        assert!(fx.orders.is_empty());
    }

    #[tokio::test]
    async fn sub_minor_unit_prices_are_rejected() {
        let fx = fixture();
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_checkout_session().times(0);

        let svc = service(&fx, gateway, quiet_notifier(), OrderPolicy::default());
        let err = svc
            .create_checkout(fx.buyer.id, vec![item(dec!(10.005), 1)])
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_checkout() {
        let fx = fixture();
        let mut notifier = MockNotificationSender::new();
        notifier.expect_send().times(1).returning(|_, _, _| {
            Err(crate::notifications::NotificationError::Transport(
                "smtp down".into(),
            ))
        });

        let svc = service(
            &fx,
            gateway_returning_session("cs_mail"),
            notifier,
            OrderPolicy::default(),
        );
        let outcome = svc
            .create_checkout(fx.buyer.id, vec![item(dec!(5), 1)])
            .await
            .unwrap();
        assert_eq!(outcome.session_id, "cs_mail");
        assert_eq!(fx.orders.len(), 1);
    }

    #[tokio::test]
    async fn failed_persistence_records_an_orphaned_session() {
        let fx = fixture();
        let mut store = MockOrderStore::new();
        store
            .expect_create()
            .returning(|_| Err(ServiceError::StoreUnavailable("connection reset".into())));
        let mut notifier = MockNotificationSender::new();
        notifier.expect_send().times(0);

        let svc = OrderLifecycleService::new(
            Arc::new(store),
            fx.users.clone(),
            Arc::new(gateway_returning_session("cs_orphan")),
            Arc::new(notifier),
            OrderPolicy::default(),
        );

        let err = svc
            .create_checkout(fx.buyer.id, vec![item(dec!(40), 1)])
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::StoreUnavailable(_));
        let orphans = svc.orphaned_sessions();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].session_id, "cs_orphan");
        assert_eq!(orphans[0].total_price, dec!(40));
    }

    struct StalledGateway;

    #[async_trait]
    impl PaymentGateway for StalledGateway {
        async fn create_checkout_session(
            &self,
            _line_items: &[CheckoutLineItem],
            _success_url: &str,
            _cancel_url: &str,
        ) -> Result<CheckoutSession, ServiceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(CheckoutSession {
                session_id: "never".into(),
            })
        }

        async fn get_payment_status(&self, _reference: &str) -> Result<PaymentStatus, ServiceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(PaymentStatus::Succeeded)
        }
    }

    #[tokio::test]
    async fn slow_gateway_surfaces_as_unavailable() {
        let fx = fixture();
        let policy = OrderPolicy {
            gateway_timeout: Duration::from_millis(50),
            ..OrderPolicy::default()
        };
        let svc = OrderLifecycleService::new(
            fx.orders.clone(),
            fx.users.clone(),
            Arc::new(StalledGateway),
            Arc::new(quiet_notifier()),
            policy,
        );
        let order = seed_order(&fx, "cs_slow").await;

        let err = svc.confirm_payment("cs_slow", order.id).await.unwrap_err();
        assert_matches!(err, ServiceError::GatewayUnavailable(_));
        assert!(err.is_retryable());

        let stored = fx.orders.find_by_id(order.id).await.unwrap().unwrap();
        assert!(!stored.is_paid);
    }

    #[tokio::test]
    async fn stock_is_checked_at_checkout_when_configured() {
        let fx = fixture();
        let ledger = Arc::new(InMemoryInventoryLedger::new());
        let line = item(dec!(30), 3);
        ledger.set_stock(line.product_id, 2);

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_checkout_session().times(0);
        let policy = OrderPolicy {
            stock_deduction: StockDeduction::AtCheckout,
            ..OrderPolicy::default()
        };
        let svc = service(&fx, gateway, quiet_notifier(), policy).with_inventory(ledger.clone());

        let err = svc
            .create_checkout(fx.buyer.id, vec![line.clone()])
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InsufficientStock(_));
        assert_eq!(ledger.stock_of(line.product_id), Some(2));
    }

    #[tokio::test]
    async fn pending_status_leaves_order_unpaid() {
        let fx = fixture();
        let order = seed_order(&fx, "cs_pending").await;
        let mut notifier = MockNotificationSender::new();
        notifier.expect_send().times(0);

        let svc = service(
            &fx,
            gateway_with_status(PaymentStatus::Pending),
            notifier,
            OrderPolicy::default(),
        );
        let err = svc
            .confirm_payment("cs_pending", order.id)
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::PaymentNotConfirmed(_));
        let stored = fx.orders.find_by_id(order.id).await.unwrap().unwrap();
        assert!(!stored.is_paid);
        assert!(stored.paid_at.is_none());
    }

    #[tokio::test]
    async fn repeated_confirmation_notifies_once() {
        let fx = fixture();
        let order = seed_order(&fx, "cs_paid").await;
        let mut notifier = MockNotificationSender::new();
        notifier
            .expect_send()
            .withf(|_, subject, _| subject.starts_with("Payment Confirmation"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let svc = service(
            &fx,
            gateway_with_status(PaymentStatus::Succeeded),
            notifier,
            OrderPolicy::default(),
        );

        let first = svc.confirm_payment("cs_paid", order.id).await.unwrap();
        let second = svc.confirm_payment("cs_paid", order.id).await.unwrap();

        assert!(first.is_paid);
        assert!(first.paid_at.unwrap() >= first.created_at);
        assert_eq!(first.paid_at, second.paid_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_confirmations_apply_one_transition() {
        let fx = fixture();
        let order = seed_order(&fx, "cs_race").await;
        let mut notifier = MockNotificationSender::new();
        notifier
            .expect_send()
            .withf(|_, subject, _| subject.starts_with("Payment Confirmation"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let svc = service(
            &fx,
            gateway_with_status(PaymentStatus::Succeeded),
            notifier,
            OrderPolicy::default(),
        );

        let order_id = order.id;
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..12 {
            let svc = svc.clone();
            tasks.spawn(async move { svc.confirm_payment("cs_race", order_id).await });
        }

        let mut paid_at = Vec::new();
        while let Some(result) = tasks.join_next().await {
            let confirmed = result.unwrap().unwrap();
            assert!(confirmed.is_paid);
            paid_at.push(confirmed.paid_at);
        }

        let stored = fx.orders.find_by_id(order_id).await.unwrap().unwrap();
        assert!(stored.paid_at.is_some());
        assert!(paid_at.iter().all(|at| *at == stored.paid_at));
    }

    #[tokio::test]
    async fn mismatched_reference_is_rejected() {
        let fx = fixture();
        let order = seed_order(&fx, "cs_mine").await;

        let svc = service(
            &fx,
            gateway_with_status(PaymentStatus::Succeeded),
            quiet_notifier(),
            OrderPolicy::default(),
        );
        let err = svc
            .confirm_payment("cs_someone_else", order.id)
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::ValidationError(_));
        assert!(!fx.orders.find_by_id(order.id).await.unwrap().unwrap().is_paid);
    }

    #[tokio::test]
    async fn foreign_reference_never_reaches_the_gateway() {
        let fx = fixture();
        let order = seed_order(&fx, "cs_mine").await;
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_get_payment_status().times(0);

        let svc = service(&fx, gateway, quiet_notifier(), OrderPolicy::default());
        let err = svc
            .confirm_payment("cs_x/../../../payment_intents/pi_other", order.id)
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn whitespace_reference_is_rejected_without_a_lookup() {
        let fx = fixture();
        let order = seed_order(&fx, "cs_blank").await;
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_get_payment_status().times(0);

        let svc = service(&fx, gateway, quiet_notifier(), OrderPolicy::default());
        let err = svc.confirm_payment("   ", order.id).await.unwrap_err();

        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn surrounding_whitespace_is_ignored_when_matching() {
        let fx = fixture();
        let order = seed_order(&fx, "cs_trim").await;
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_get_payment_status()
            .withf(|reference| reference == "cs_trim")
            .times(1)
            .returning(|_| Ok(PaymentStatus::Succeeded));

        let svc = service(&fx, gateway, quiet_notifier(), OrderPolicy::default());
        let paid = svc.confirm_payment(" cs_trim\n", order.id).await.unwrap();

        assert!(paid.is_paid);
    }

    #[tokio::test]
    async fn confirmation_of_missing_order_is_not_found() {
        let fx = fixture();
        let svc = service(
            &fx,
            gateway_with_status(PaymentStatus::Succeeded),
            quiet_notifier(),
            OrderPolicy::default(),
        );
        let err = svc
            .confirm_payment("cs_x", Uuid::new_v4())
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::NotFound(_));
    }

    #[tokio::test]
    async fn stock_is_deducted_after_confirmation_when_configured() {
        let fx = fixture();
        let order = seed_order(&fx, "cs_stock").await;
        let ledger = Arc::new(InMemoryInventoryLedger::new());
        ledger.set_stock(order.items[0].product_id, 10);

        let policy = OrderPolicy {
            stock_deduction: StockDeduction::AtConfirmation,
            ..OrderPolicy::default()
        };
        let svc = service(
            &fx,
            gateway_with_status(PaymentStatus::Succeeded),
            quiet_notifier(),
            policy,
        )
        .with_inventory(ledger.clone());

        svc.confirm_payment("cs_stock", order.id).await.unwrap();
        svc.confirm_payment("cs_stock", order.id).await.unwrap();

        assert_eq!(ledger.stock_of(order.items[0].product_id), Some(8));
    }

    #[tokio::test]
    async fn unpaid_orders_cannot_be_delivered_by_default() {
        let fx = fixture();
        let order = seed_order(&fx, "cs_unpaid").await;
        let svc = service(
            &fx,
            MockPaymentGateway::new(),
            quiet_notifier(),
            OrderPolicy::default(),
        );

        let err = svc.mark_delivered(order.id).await.unwrap_err();
        assert_matches!(err, ServiceError::Conflict(_));
    }

    #[tokio::test]
    async fn delivery_without_payment_when_policy_allows() {
        let fx = fixture();
        let order = seed_order(&fx, "cs_cod").await;
        let policy = OrderPolicy {
            require_payment_before_delivery: false,
            ..OrderPolicy::default()
        };
        let svc = service(&fx, MockPaymentGateway::new(), quiet_notifier(), policy);

        let delivered = svc.mark_delivered(order.id).await.unwrap();
        assert!(delivered.is_delivered);
        let first_at = delivered.delivered_at;
        assert!(first_at.is_some());

        let again = svc.mark_delivered(order.id).await.unwrap();
        assert_eq!(again.delivered_at, first_at);
    }

    #[tokio::test]
    async fn delivering_a_missing_order_is_not_found() {
        let fx = fixture();
        let svc = service(
            &fx,
            MockPaymentGateway::new(),
            quiet_notifier(),
            OrderPolicy::default(),
        );
        let err = svc.mark_delivered(Uuid::new_v4()).await.unwrap_err();
        assert_matches!(err, ServiceError::NotFound(_));
    }

    #[tokio::test]
    async fn admin_listing_attaches_owner_fields() {
        let fx = fixture();
        seed_order(&fx, "cs_a").await;
        fx.orders
            .create(Order::new_pending(
                Uuid::new_v4(),
                vec![item(dec!(1), 1)],
                "inr",
                "cs_ghost",
                Utc::now(),
            ))
            .await
            .unwrap();

        let svc = service(
            &fx,
            MockPaymentGateway::new(),
            quiet_notifier(),
            OrderPolicy::default(),
        );
        let listed = svc.list_all_with_owners().await.unwrap();

        assert_eq!(listed.len(), 2);
        let owned = listed
            .iter()
            .find(|entry| entry.order.payment_reference == "cs_a")
            .unwrap();
        assert_eq!(owned.user.as_ref().map(|u| u.name.as_str()), Some("Asha"));
        let ghost = listed
            .iter()
            .find(|entry| entry.order.payment_reference == "cs_ghost")
            .unwrap();
        assert!(ghost.user.is_none());
    }
}
