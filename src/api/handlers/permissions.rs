use crate::api::error::AppError;
use crate::entities::permission_grants;
use crate::models::{AuthContext, CapabilityFlags, EffectivePermission, PermissionLevel};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ── Request / Response Types ──────────────────────────────────────────

#[derive(Deserialize, ToSchema)]
pub struct GrantPermissionRequest {
    /// "user" or "role"
    pub subject_type: String,
    pub subject_id: String,
    pub level: PermissionLevel,
    pub flags: CapabilityFlags,
    pub expires_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdatePermissionRequest {
    /// The version the caller read; a mismatch returns 409
    pub expected_version: i64,
    pub level: Option<PermissionLevel>,
    pub flags: Option<CapabilityFlags>,
    pub expires_at: Option<chrono::DateTime<Utc>>,
    /// Set true to remove an existing expiry
    #[serde(default)]
    pub clear_expiry: bool,
}

#[derive(Deserialize)]
pub struct RevokeQuery {
    pub reason: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct GrantResponse {
    pub id: String,
    pub file_id: String,
    pub subject_type: String,
    pub subject_id: String,
    pub level: PermissionLevel,
    pub flags: CapabilityFlags,
    pub expires_at: Option<chrono::DateTime<Utc>>,
    pub granted_by: String,
    pub granted_at: chrono::DateTime<Utc>,
    pub is_active: bool,
    pub version: i64,
}

#[derive(Serialize, ToSchema)]
pub struct UpdatePermissionResponse {
    pub id: String,
    pub version: i64,
}

impl From<permission_grants::Model> for GrantResponse {
    fn from(grant: permission_grants::Model) -> Self {
        Self {
            id: grant.id,
            file_id: grant.file_id,
            subject_type: grant.subject_type,
            subject_id: grant.subject_id,
            level: PermissionLevel::from_i16(grant.level),
            flags: CapabilityFlags(grant.flags),
            expires_at: grant.expires_at,
            granted_by: grant.granted_by,
            granted_at: grant.granted_at,
            is_active: grant.is_active,
            version: grant.version,
        }
    }
}

// ── Endpoints ─────────────────────────────────────────────────────────

/// Compute the caller's effective permission on a file
#[utoipa::path(
    get,
    path = "/files/{id}/permissions/effective",
    params(("id" = String, Path, description = "File ID")),
    responses(
        (status = 200, description = "Effective permission", body = EffectivePermission),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "File not found")
    ),
    security(("bearer" = [])),
    tag = "permissions"
)]
pub async fn get_effective_permission(
    State(state): State<crate::AppState>,
    Extension(context): Extension<AuthContext>,
    Path(file_id): Path<String>,
) -> Result<Json<EffectivePermission>, AppError> {
    let effective = state
        .permissions
        .effective(&context.user_id, &file_id)
        .await?;
    Ok(Json(effective))
}

/// List grant rows for a file, including revoked history
#[utoipa::path(
    get,
    path = "/files/{id}/permissions",
    params(("id" = String, Path, description = "File ID")),
    responses(
        (status = 200, description = "Grants", body = Vec<GrantResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Manage capability required")
    ),
    security(("bearer" = [])),
    tag = "permissions"
)]
pub async fn list_permissions(
    State(state): State<crate::AppState>,
    Extension(context): Extension<AuthContext>,
    Path(file_id): Path<String>,
) -> Result<Json<Vec<GrantResponse>>, AppError> {
    let grants = state.permissions.list_for_file(&context, &file_id).await?;
    Ok(Json(grants.into_iter().map(GrantResponse::from).collect()))
}

/// Grant a capability on a file to a user or role
#[utoipa::path(
    post,
    path = "/files/{id}/permissions",
    params(("id" = String, Path, description = "File ID")),
    request_body = GrantPermissionRequest,
    responses(
        (status = 201, description = "Grant created", body = GrantResponse),
        (status = 400, description = "Bad request"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Manage capability required")
    ),
    security(("bearer" = [])),
    tag = "permissions"
)]
pub async fn grant_permission(
    State(state): State<crate::AppState>,
    Extension(context): Extension<AuthContext>,
    Path(file_id): Path<String>,
    Json(req): Json<GrantPermissionRequest>,
) -> Result<(StatusCode, Json<GrantResponse>), AppError> {
    let grant = state
        .permissions
        .grant(
            &context,
            &file_id,
            &req.subject_type,
            &req.subject_id,
            req.level,
            req.flags,
            req.expires_at,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(GrantResponse::from(grant))))
}

/// Update an existing grant; requires the version the caller read
#[utoipa::path(
    put,
    path = "/permissions/{id}",
    params(("id" = String, Path, description = "Grant ID")),
    request_body = UpdatePermissionRequest,
    responses(
        (status = 200, description = "Grant updated", body = UpdatePermissionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Manage capability required"),
        (status = 404, description = "Grant not found"),
        (status = 409, description = "Version conflict")
    ),
    security(("bearer" = [])),
    tag = "permissions"
)]
pub async fn update_permission(
    State(state): State<crate::AppState>,
    Extension(context): Extension<AuthContext>,
    Path(grant_id): Path<String>,
    Json(req): Json<UpdatePermissionRequest>,
) -> Result<Json<UpdatePermissionResponse>, AppError> {
    let expires_at = if req.clear_expiry {
        Some(None)
    } else {
        req.expires_at.map(Some)
    };

    let version = state
        .permissions
        .update(
            &context,
            &grant_id,
            req.expected_version,
            req.level,
            req.flags,
            expires_at,
        )
        .await?;

    Ok(Json(UpdatePermissionResponse {
        id: grant_id,
        version,
    }))
}

/// Revoke a grant; revoked rows stay behind for history
#[utoipa::path(
    delete,
    path = "/permissions/{id}",
    params(
        ("id" = String, Path, description = "Grant ID"),
        ("reason" = Option<String>, Query, description = "Revocation reason")
    ),
    responses(
        (status = 204, description = "Grant revoked"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Manage capability required"),
        (status = 404, description = "Grant not found")
    ),
    security(("bearer" = [])),
    tag = "permissions"
)]
pub async fn revoke_permission(
    State(state): State<crate::AppState>,
    Extension(context): Extension<AuthContext>,
    Path(grant_id): Path<String>,
    Query(query): Query<RevokeQuery>,
) -> Result<StatusCode, AppError> {
    let reason = query.reason.as_deref().unwrap_or("revoked");
    state.permissions.revoke(&context, &grant_id, reason).await?;
    Ok(StatusCode::NO_CONTENT)
}
