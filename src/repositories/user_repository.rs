use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::user::{self, Entity as UserEntity};
use crate::errors::ServiceError;
use crate::models::User;
use crate::repositories::{BaseRepository, Repository, UserDirectory};

/// Account lookup against the shared `users` table
#[derive(Debug, Clone)]
pub struct SeaOrmUserDirectory {
    base: BaseRepository,
}

impl SeaOrmUserDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

impl From<user::Model> for User {
    fn from(model: user::Model) -> Self {
        User {
            id: model.id,
            name: model.name,
            email: model.email,
        }
    }
}

#[async_trait]
impl UserDirectory for SeaOrmUserDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(UserEntity::find_by_id(id)
            .one(self.base.get_db())
            .await?
            .map(User::from))
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(UserEntity::find()
            .filter(user::Column::Id.is_in(ids.iter().copied()))
            .all(self.base.get_db())
            .await?
            .into_iter()
            .map(User::from)
            .collect())
    }
}
