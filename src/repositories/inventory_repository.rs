use async_trait::async_trait;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::entities::product::{self, Entity as ProductEntity};
use crate::errors::ServiceError;
use crate::models::OrderItem;
use crate::repositories::{BaseRepository, InventoryLedger, Repository};

/// Decrements `products.count_in_stock` inside one transaction
#[derive(Debug, Clone)]
pub struct SeaOrmInventoryLedger {
    base: BaseRepository,
}

impl SeaOrmInventoryLedger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

#[async_trait]
impl InventoryLedger for SeaOrmInventoryLedger {
    #[instrument(skip(self, items), fields(lines = items.len()))]
    async fn deduct(&self, items: &[OrderItem]) -> Result<(), ServiceError> {
        let txn = self.base.get_db().begin().await?;

        for item in items {
            let quantity = i32::try_from(item.quantity).map_err(|_| {
                ServiceError::ValidationError(format!("quantity {} is too large", item.quantity))
            })?;

            let result = ProductEntity::update_many()
                .col_expr(
                    product::Column::CountInStock,
                    Expr::col(product::Column::CountInStock).sub(quantity),
                )
                .filter(product::Column::Id.eq(item.product_id))
                .filter(product::Column::CountInStock.gte(quantity))
                .exec(&txn)
                .await?;

            if result.rows_affected == 0 {
                // Dropping the transaction rolls back earlier lines
                let exists = ProductEntity::find_by_id(item.product_id)
                    .one(&txn)
                    .await?
                    .is_some();
                return Err(if exists {
                    ServiceError::InsufficientStock(format!("{} is out of stock", item.name))
                } else {
                    ServiceError::NotFound(format!("product {}", item.product_id))
                });
            }
        }

        txn.commit().await?;
        info!("stock deducted");
        Ok(())
    }
}

/// Ledger used while stock deduction is disabled
#[derive(Debug, Clone, Default)]
pub struct NoopInventoryLedger;

#[async_trait]
impl InventoryLedger for NoopInventoryLedger {
    async fn deduct(&self, _items: &[OrderItem]) -> Result<(), ServiceError> {
        Ok(())
    }
}
