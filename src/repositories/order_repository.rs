use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::entities::order::{self, Column, Entity as OrderEntity};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::errors::ServiceError;
use crate::models::{Order, OrderItem, PaymentState};
use crate::repositories::{BaseRepository, OrderStore, Repository};

/// Order store backed by the relational database
#[derive(Debug, Clone)]
pub struct SeaOrmOrderStore {
    base: BaseRepository,
}

impl SeaOrmOrderStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    async fn load_items(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Position)
            .all(self.base.get_db())
            .await?)
    }
}

fn into_domain(
    model: order::Model,
    mut items: Vec<order_item::Model>,
) -> Result<Order, ServiceError> {
    items.sort_by_key(|item| item.position);
    let items = items
        .into_iter()
        .map(|item| {
            let quantity = u32::try_from(item.quantity).map_err(|_| {
                ServiceError::InternalError(format!(
                    "order item {} has negative quantity",
                    item.id
                ))
            })?;
            Ok(OrderItem {
                product_id: item.product_id,
                name: item.name,
                unit_price: item.unit_price,
                quantity,
            })
        })
        .collect::<Result<Vec<_>, ServiceError>>()?;

    let payment_status = PaymentState::parse(&model.payment_status).unwrap_or(if model.is_paid {
        PaymentState::Paid
    } else {
        PaymentState::Pending
    });

    Ok(Order {
        id: model.id,
        user_id: model.user_id,
        items,
        total_price: model.total_price,
        currency: model.currency,
        payment_reference: model.payment_reference,
        payment_status,
        is_paid: model.is_paid,
        paid_at: model.paid_at,
        is_delivered: model.is_delivered,
        delivered_at: model.delivered_at,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

#[async_trait]
impl OrderStore for SeaOrmOrderStore {
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn create(&self, order: Order) -> Result<Order, ServiceError> {
        let txn = self.base.get_db().begin().await?;

        order::ActiveModel {
            id: Set(order.id),
            user_id: Set(order.user_id),
            total_price: Set(order.total_price),
            currency: Set(order.currency.clone()),
            payment_reference: Set(order.payment_reference.clone()),
            payment_status: Set(order.payment_status.as_str().to_string()),
            is_paid: Set(order.is_paid),
            paid_at: Set(order.paid_at),
            is_delivered: Set(order.is_delivered),
            delivered_at: Set(order.delivered_at),
            created_at: Set(order.created_at),
            updated_at: Set(order.updated_at),
        }
        .insert(&txn)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            let quantity = i32::try_from(item.quantity).map_err(|_| {
                ServiceError::ValidationError(format!("quantity {} is too large", item.quantity))
            })?;
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                position: Set(position as i32),
                product_id: Set(item.product_id),
                name: Set(item.name.clone()),
                unit_price: Set(item.unit_price),
                quantity: Set(quantity),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;
        debug!(items = order.items.len(), "order persisted");
        Ok(order)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        let Some(model) = OrderEntity::find_by_id(id)
            .one(self.base.get_db())
            .await?
        else {
            return Ok(None);
        };
        let items = self.load_items(id).await?;
        into_domain(model, items).map(Some)
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        OrderEntity::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_desc(Column::CreatedAt)
            .find_with_related(OrderItemEntity)
            .all(self.base.get_db())
            .await?
            .into_iter()
            .map(|(model, items)| into_domain(model, items))
            .collect()
    }

    async fn find_all(&self) -> Result<Vec<Order>, ServiceError> {
        OrderEntity::find()
            .order_by_desc(Column::CreatedAt)
            .find_with_related(OrderItemEntity)
            .all(self.base.get_db())
            .await?
            .into_iter()
            .map(|(model, items)| into_domain(model, items))
            .collect()
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn save(&self, order: Order) -> Result<Order, ServiceError> {
        let active = order::ActiveModel {
            id: Set(order.id),
            payment_status: Set(order.payment_status.as_str().to_string()),
            is_paid: Set(order.is_paid),
            paid_at: Set(order.paid_at),
            is_delivered: Set(order.is_delivered),
            delivered_at: Set(order.delivered_at),
            updated_at: Set(order.updated_at),
            ..Default::default()
        };

        let updated = active.update(self.base.get_db()).await.map_err(|e| match e {
            DbErr::RecordNotUpdated => ServiceError::NotFound(format!("order {}", order.id)),
            other => ServiceError::DatabaseError(other),
        })?;

        Ok(Order {
            updated_at: updated.updated_at,
            ..order
        })
    }

    #[instrument(skip(self))]
    async fn mark_paid_if_unpaid(
        &self,
        id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<Option<Order>, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(Column::IsPaid, Expr::value(true))
            .col_expr(
                Column::PaymentStatus,
                Expr::value(PaymentState::Paid.as_str()),
            )
            .col_expr(Column::PaidAt, Expr::value(paid_at))
            .col_expr(Column::UpdatedAt, Expr::value(paid_at))
            .filter(Column::Id.eq(id))
            .filter(Column::IsPaid.eq(false))
            .exec(self.base.get_db())
            .await?;

        if result.rows_affected == 0 {
            debug!("order missing or already paid");
            return Ok(None);
        }

        self.find_by_id(id).await
    }
}
