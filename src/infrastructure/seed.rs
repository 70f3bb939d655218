use crate::entities::{prelude::*, users};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::{info, warn};
use uuid::Uuid;

/// Create the bootstrap admin account if configured and absent.
pub async fn seed_initial_data(db: &DatabaseConnection) -> anyhow::Result<()> {
    let Ok(password) = std::env::var("ADMIN_PASSWORD") else {
        return Ok(());
    };

    let username = std::env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string());

    let exists = Users::find()
        .filter(users::Column::Username.eq(&username))
        .one(db)
        .await?;

    if exists.is_some() {
        return Ok(());
    }

    let hash = match crate::utils::password::hash_password(&password) {
        Ok(h) => h,
        Err(e) => {
            warn!("Skipping admin seed, could not hash password: {}", e);
            return Ok(());
        }
    };

    let admin = users::ActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        username: Set(username.clone()),
        password_hash: Set(Some(hash)),
        email: Set(None),
        is_active: Set(true),
        is_admin: Set(true),
        created_at: Set(Some(chrono::Utc::now())),
    };
    admin.insert(db).await?;

    info!("🌱 Seeded admin account '{}'", username);
    Ok(())
}
