use crate::api::error::AppError;
use crate::entities::{audit_logs, prelude::*};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

/// Append-only recorder for permission-relevant actions. Persistence is
/// best-effort: a failed write is reported to the operator log and never
/// fails the operation that triggered it.
#[derive(Clone)]
pub struct AuditService {
    db: DatabaseConnection,
}

impl AuditService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        actor_session_id: Option<String>,
        entity_type: &str,
        entity_id: &str,
        action: &str,
        old_state: Option<Value>,
        new_state: Option<Value>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) {
        let entity_type = entity_type.to_string();
        let entity_id = entity_id.to_string();
        let action = action.to_string();
        let db = self.db.clone();

        // Log to the operator channel immediately
        info!(
            target: "audit",
            entity_type = %entity_type,
            entity_id = %entity_id,
            action = %action,
            actor_session_id = ?actor_session_id,
            "Audit Event Occurred"
        );

        // Persist to DB asynchronously
        tokio::spawn(async move {
            let log = audit_logs::ActiveModel {
                id: Set(Uuid::new_v4().to_string()),
                actor_session_id: Set(actor_session_id),
                entity_type: Set(entity_type),
                entity_id: Set(entity_id),
                action: Set(action),
                old_state: Set(old_state.map(|v| v.to_string())),
                new_state: Set(new_state.map(|v| v.to_string())),
                ip_address: Set(ip_address),
                user_agent: Set(user_agent),
                created_at: Set(chrono::Utc::now()),
            };

            if let Err(e) = log.insert(&db).await {
                error!("Failed to persist audit log: {}", e);
            }
        });
    }

    /// Entries for one entity, oldest first, suitable for history
    /// reconstruction.
    pub async fn history(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<audit_logs::Model>, AppError> {
        let entries = AuditLogs::find()
            .filter(audit_logs::Column::EntityType.eq(entity_type))
            .filter(audit_logs::Column::EntityId.eq(entity_id))
            .order_by_asc(audit_logs::Column::CreatedAt)
            .all(&self.db)
            .await?;

        Ok(entries)
    }
}
