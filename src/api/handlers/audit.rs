use crate::api::error::AppError;
use crate::models::AuthContext;
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct AuditEntryResponse {
    pub id: String,
    pub actor_session_id: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub old_state: Option<String>,
    pub new_state: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// History of one entity, oldest entry first (admin)
#[utoipa::path(
    get,
    path = "/audit/{entity_type}/{entity_id}",
    params(
        ("entity_type" = String, Path, description = "Entity type"),
        ("entity_id" = String, Path, description = "Entity ID")
    ),
    responses(
        (status = 200, description = "Audit history", body = Vec<AuditEntryResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin required")
    ),
    security(("bearer" = [])),
    tag = "audit"
)]
pub async fn get_audit_history(
    State(state): State<crate::AppState>,
    Extension(context): Extension<AuthContext>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<Json<Vec<AuditEntryResponse>>, AppError> {
    if !context.is_admin {
        return Err(AppError::Forbidden("Admin required".to_string()));
    }

    let entries = state.audit.history(&entity_type, &entity_id).await?;

    let result: Vec<AuditEntryResponse> = entries
        .into_iter()
        .map(|entry| AuditEntryResponse {
            id: entry.id,
            actor_session_id: entry.actor_session_id,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            action: entry.action,
            old_state: entry.old_state,
            new_state: entry.new_state,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            created_at: entry.created_at,
        })
        .collect();

    Ok(Json(result))
}
