use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{Order, OrderItem, User};

pub mod inventory_repository;
pub mod memory;
pub mod order_repository;
pub mod user_repository;

pub use inventory_repository::{NoopInventoryLedger, SeaOrmInventoryLedger};
pub use memory::{InMemoryInventoryLedger, InMemoryOrderStore, InMemoryUserDirectory};
pub use order_repository::SeaOrmOrderStore;
pub use user_repository::SeaOrmUserDirectory;

/// Repository trait for common database operations
pub trait Repository {
    fn get_db(&self) -> &DatabaseConnection;
}

#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl Repository for BaseRepository {
    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// Persistence of orders and their line items.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create(&self, order: Order) -> Result<Order, ServiceError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError>;

    /// Orders owned by `user_id`, newest first
    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, ServiceError>;

    /// Every order, newest first
    async fn find_all(&self) -> Result<Vec<Order>, ServiceError>;

    /// Persists the payment and delivery state of an existing order.
    /// Items, total and payment reference are never rewritten.
    async fn save(&self, order: Order) -> Result<Order, ServiceError>;

    /// Atomically flips an unpaid order to paid.
    ///
    /// Returns the updated order when this call applied the transition and
    /// `None` when the order is missing or was already paid.
    async fn mark_paid_if_unpaid(
        &self,
        id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<Option<Order>, ServiceError>;
}

/// Read-only account lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, ServiceError>;

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>, ServiceError>;
}

/// Product stock bookkeeping.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Decrements stock for every item or for none of them.
    async fn deduct(&self, items: &[OrderItem]) -> Result<(), ServiceError>;
}
