use crate::api::error::AppError;
use crate::models::{AuthContext, ShareAccess, ShareDenial, ShareOperation};
use crate::services::share_service::CreateShareParams;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

// ── Request / Response Types ──────────────────────────────────────────

#[derive(Deserialize, Validate, ToSchema)]
pub struct CreateShareRequest {
    pub file_id: String,
    /// "public", "email" or "internal"
    pub share_type: String,
    #[validate(length(max = 512))]
    pub password: Option<String>,
    #[serde(default)]
    pub allow_download: bool,
    #[serde(default = "default_true")]
    pub allow_preview: bool,
    #[serde(default)]
    pub allow_comment: bool,
    #[serde(default)]
    pub allow_print: bool,
    /// 0 = unlimited
    #[serde(default)]
    pub max_downloads: i32,
    /// 0 = unlimited
    #[serde(default)]
    pub max_views: i32,
    /// Must be > 0
    pub expires_in_hours: i64,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, ToSchema)]
pub struct ShareResponse {
    pub id: String,
    pub file_id: String,
    pub share_token: String,
    pub share_type: String,
    pub has_password: bool,
    pub allow_download: bool,
    pub allow_preview: bool,
    pub allow_comment: bool,
    pub allow_print: bool,
    pub max_downloads: i32,
    pub current_downloads: i32,
    pub max_views: i32,
    pub current_views: i32,
    pub expires_at: chrono::DateTime<Utc>,
    pub is_active: bool,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<crate::entities::share_links::Model> for ShareResponse {
    fn from(share: crate::entities::share_links::Model) -> Self {
        Self {
            id: share.id,
            file_id: share.file_id,
            share_token: share.share_token,
            share_type: share.share_type,
            has_password: share.password_hash.is_some(),
            allow_download: share.allow_download,
            allow_preview: share.allow_preview,
            allow_comment: share.allow_comment,
            allow_print: share.allow_print,
            max_downloads: share.max_downloads,
            current_downloads: share.current_downloads,
            max_views: share.max_views,
            current_views: share.current_views,
            expires_at: share.expires_at,
            is_active: share.is_active,
            created_at: share.created_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ShareAccessLogResponse {
    pub id: String,
    pub action: String,
    pub success: bool,
    pub denial_reason: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub accessed_at: chrono::DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct PublicShareInfoResponse {
    pub file_name: String,
    pub share_type: String,
    pub requires_password: bool,
    pub allow_download: bool,
    pub allow_preview: bool,
    pub allow_comment: bool,
    pub allow_print: bool,
    pub expires_at: chrono::DateTime<Utc>,
}

#[derive(Deserialize, ToSchema)]
pub struct ShareAccessRequest {
    pub operation: ShareOperation,
    /// Submitted in the body, never in the URL
    pub password: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ShareAccessResponse {
    pub granted: bool,
    pub file_id: String,
    pub operation: ShareOperation,
    pub allow_download: bool,
    pub allow_preview: bool,
    pub allow_comment: bool,
    pub allow_print: bool,
}

#[derive(Deserialize)]
pub struct SharesForFileQuery {
    pub file_id: Option<String>,
}

// ── Authenticated Endpoints ───────────────────────────────────────────

/// Create a share link
#[utoipa::path(
    post,
    path = "/shares",
    request_body = CreateShareRequest,
    responses(
        (status = 201, description = "Share link created", body = ShareResponse),
        (status = 400, description = "Bad request"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Share capability required")
    ),
    security(("bearer" = [])),
    tag = "shares"
)]
pub async fn create_share(
    State(state): State<crate::AppState>,
    Extension(context): Extension<AuthContext>,
    Json(req): Json<CreateShareRequest>,
) -> Result<(StatusCode, Json<ShareResponse>), AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    if req.expires_in_hours <= 0 {
        return Err(AppError::BadRequest("Expiry must be positive".to_string()));
    }

    let share = state
        .shares
        .create_share(
            &context,
            &req.file_id,
            CreateShareParams {
                share_type: req.share_type,
                password: req.password,
                allow_download: req.allow_download,
                allow_preview: req.allow_preview,
                allow_comment: req.allow_comment,
                allow_print: req.allow_print,
                max_downloads: req.max_downloads,
                max_views: req.max_views,
                expires_at: Utc::now() + chrono::Duration::hours(req.expires_in_hours),
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ShareResponse::from(share))))
}

/// List shares (optionally filtered by file)
#[utoipa::path(
    get,
    path = "/shares",
    params(
        ("file_id" = Option<String>, Query, description = "Filter by file ID")
    ),
    responses(
        (status = 200, description = "List of shares", body = Vec<ShareResponse>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer" = [])),
    tag = "shares"
)]
pub async fn list_shares(
    State(state): State<crate::AppState>,
    Extension(context): Extension<AuthContext>,
    Query(query): Query<SharesForFileQuery>,
) -> Result<Json<Vec<ShareResponse>>, AppError> {
    let shares = if let Some(ref file_id) = query.file_id {
        state.shares.get_shares_for_file(&context, file_id).await?
    } else {
        state
            .shares
            .list_user_shares(&context.user_id)
            .await?
            .into_iter()
            .map(|(share, _)| share)
            .collect()
    };

    Ok(Json(shares.into_iter().map(ShareResponse::from).collect()))
}

/// Revoke a share link
#[utoipa::path(
    delete,
    path = "/shares/{id}",
    params(("id" = String, Path, description = "Share ID")),
    responses(
        (status = 204, description = "Share revoked"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Share not found")
    ),
    security(("bearer" = [])),
    tag = "shares"
)]
pub async fn revoke_share(
    State(state): State<crate::AppState>,
    Extension(context): Extension<AuthContext>,
    Path(share_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.shares.revoke_share(&context, &share_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Get access logs for a share link
#[utoipa::path(
    get,
    path = "/shares/{id}/logs",
    params(("id" = String, Path, description = "Share ID")),
    responses(
        (status = 200, description = "Access logs", body = Vec<ShareAccessLogResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Share not found")
    ),
    security(("bearer" = [])),
    tag = "shares"
)]
pub async fn get_share_logs(
    State(state): State<crate::AppState>,
    Extension(context): Extension<AuthContext>,
    Path(share_id): Path<String>,
) -> Result<Json<Vec<ShareAccessLogResponse>>, AppError> {
    let logs = state.shares.get_access_logs(&context, &share_id).await?;

    let result: Vec<ShareAccessLogResponse> = logs
        .into_iter()
        .map(|log| ShareAccessLogResponse {
            id: log.id,
            action: log.action,
            success: log.success,
            denial_reason: log.denial_reason,
            ip_address: log.ip_address,
            user_agent: log.user_agent,
            accessed_at: log.accessed_at,
        })
        .collect();

    Ok(Json(result))
}

// ── Public Endpoints ──────────────────────────────────────────────────

fn extract_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or("").trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
}

fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Every denial except an exhausted quota collapses to the same body so
/// an unauthenticated caller cannot tell missing from revoked from
/// expired from a wrong password.
fn denial_to_error(denial: ShareDenial) -> AppError {
    match denial {
        ShareDenial::LimitReached => {
            AppError::LimitReached("Share link limit reached".to_string())
        }
        _ => AppError::Forbidden("Access denied".to_string()),
    }
}

/// Get shared item info (public, consumes no quota)
#[utoipa::path(
    get,
    path = "/share/{token}",
    params(("token" = String, Path, description = "Share token")),
    responses(
        (status = 200, description = "Share info", body = PublicShareInfoResponse),
        (status = 403, description = "Access denied")
    ),
    tag = "shares"
)]
pub async fn get_public_share(
    State(state): State<crate::AppState>,
    Path(token): Path<String>,
) -> Result<Json<PublicShareInfoResponse>, AppError> {
    let (share, file) = state
        .shares
        .link_info(&token)
        .await?
        .map_err(denial_to_error)?;

    Ok(Json(PublicShareInfoResponse {
        file_name: file.name,
        share_type: share.share_type,
        requires_password: share.password_hash.is_some(),
        allow_download: share.allow_download,
        allow_preview: share.allow_preview,
        allow_comment: share.allow_comment,
        allow_print: share.allow_print,
        expires_at: share.expires_at,
    }))
}

/// Resolve a share token for one operation, consuming quota on success
#[utoipa::path(
    post,
    path = "/share/{token}/access",
    params(("token" = String, Path, description = "Share token")),
    request_body = ShareAccessRequest,
    responses(
        (status = 200, description = "Access granted", body = ShareAccessResponse),
        (status = 403, description = "Access denied"),
        (status = 410, description = "Share link limit reached")
    ),
    tag = "shares"
)]
pub async fn access_share(
    State(state): State<crate::AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ShareAccessRequest>,
) -> Result<Json<ShareAccessResponse>, AppError> {
    let outcome = state
        .shares
        .resolve_access(
            &token,
            req.operation,
            req.password.as_deref(),
            extract_ip(&headers),
            extract_user_agent(&headers),
        )
        .await?;

    match outcome {
        ShareAccess::Granted(share) => Ok(Json(ShareAccessResponse {
            granted: true,
            file_id: share.file_id,
            operation: req.operation,
            allow_download: share.allow_download,
            allow_preview: share.allow_preview,
            allow_comment: share.allow_comment,
            allow_print: share.allow_print,
        })),
        ShareAccess::Denied(denial) => Err(denial_to_error(denial)),
    }
}
