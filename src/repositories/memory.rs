//! DashMap-backed implementations used by the `in-memory` store backend and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Mutex;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{Order, OrderItem, User};
use crate::repositories::{InventoryLedger, OrderStore, UserDirectory};

#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<Uuid, Order>,
    /// Payment reference → order id, the unique index
    references: DashMap<String, Uuid>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

fn newest_first(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    orders
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: Order) -> Result<Order, ServiceError> {
        // The reference entry stays locked until the order is in place
        let reference = match self.references.entry(order.payment_reference.clone()) {
            Entry::Occupied(_) => {
                return Err(ServiceError::Conflict(format!(
                    "payment reference {} already recorded",
                    order.payment_reference
                )))
            }
            Entry::Vacant(reference) => reference,
        };
        match self.orders.entry(order.id) {
            Entry::Occupied(_) => Err(ServiceError::Conflict(format!(
                "order {} already exists",
                order.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                reference.insert(order.id);
                Ok(order)
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        Ok(newest_first(
            self.orders
                .iter()
                .filter(|entry| entry.user_id == user_id)
                .map(|entry| entry.value().clone())
                .collect(),
        ))
    }

    async fn find_all(&self) -> Result<Vec<Order>, ServiceError> {
        Ok(newest_first(
            self.orders
                .iter()
                .map(|entry| entry.value().clone())
                .collect(),
        ))
    }

    async fn save(&self, order: Order) -> Result<Order, ServiceError> {
        let mut stored = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order.id)))?;

        stored.payment_status = order.payment_status;
        stored.is_paid = order.is_paid;
        stored.paid_at = order.paid_at;
        stored.is_delivered = order.is_delivered;
        stored.delivered_at = order.delivered_at;
        stored.updated_at = order.updated_at;
        Ok(stored.clone())
    }

    async fn mark_paid_if_unpaid(
        &self,
        id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<Option<Order>, ServiceError> {
        // The shard lock held by get_mut makes check-and-set atomic
        Ok(self.orders.get_mut(&id).and_then(|mut entry| {
            if entry.mark_paid(paid_at) {
                Some(entry.clone())
            } else {
                None
            }
        }))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<Uuid, User>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.insert(user.id, user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(self.users.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>, ServiceError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.users.get(id).map(|entry| entry.value().clone()))
            .collect())
    }
}

/// Stock counters keyed by product id
#[derive(Debug, Default)]
pub struct InMemoryInventoryLedger {
    stock: Mutex<std::collections::HashMap<Uuid, u32>>,
}

impl InMemoryInventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stock(&self, product_id: Uuid, count: u32) {
        if let Ok(mut stock) = self.stock.lock() {
            stock.insert(product_id, count);
        }
    }

    pub fn stock_of(&self, product_id: Uuid) -> Option<u32> {
        self.stock
            .lock()
            .ok()
            .and_then(|stock| stock.get(&product_id).copied())
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    async fn deduct(&self, items: &[OrderItem]) -> Result<(), ServiceError> {
        let mut stock = self
            .stock
            .lock()
            .map_err(|_| ServiceError::InternalError("inventory lock poisoned".into()))?;

        // Check every line before touching any counter
        for item in items {
            let available = stock
                .get(&item.product_id)
                .ok_or_else(|| ServiceError::NotFound(format!("product {}", item.product_id)))?;
            let requested: u32 = items
                .iter()
                .filter(|other| other.product_id == item.product_id)
                .map(|other| other.quantity)
                .sum();
            if *available < requested {
                return Err(ServiceError::InsufficientStock(format!(
                    "{} is out of stock",
                    item.name
                )));
            }
        }

        for item in items {
            if let Some(count) = stock.get_mut(&item.product_id) {
                *count -= item.quantity;
            }
        }
        Ok(())
    }
}
