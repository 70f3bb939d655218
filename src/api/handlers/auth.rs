use crate::api::error::AppError;
use crate::entities::{prelude::*, *};
use crate::models::AuthContext;
use axum::{Extension, Json, extract::Path, extract::State, http::StatusCode};
use chrono::Utc;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 128))]
    pub username: String,
    #[validate(length(min = 1, max = 512))]
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct SessionInfoResponse {
    pub session_id: String,
    pub user_id: String,
    pub issued_at: chrono::DateTime<Utc>,
    pub expires_at: chrono::DateTime<Utc>,
    pub last_activity_at: chrono::DateTime<Utc>,
    pub activity_count: i64,
    pub is_admin: bool,
    pub roles: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ForceLogoutResponse {
    pub terminated_sessions: u64,
}

/// Authenticate with username/password and obtain a bearer session token
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<crate::AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let user = Users::find()
        .filter(users::Column::Username.eq(&req.username))
        .one(&state.db)
        .await?;

    // Same rejection for unknown user, disabled user and wrong password.
    let Some(user) = user.filter(|u| u.is_active) else {
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    };

    let Some(stored_hash) = &user.password_hash else {
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    };

    if !crate::utils::password::verify_password(&req.password, stored_hash)? {
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    let session = state.sessions.issue(&user.id).await?;

    Ok(Json(LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
    }))
}

/// Terminate the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Session terminated"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<crate::AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<StatusCode, AppError> {
    state.sessions.deactivate(&context.session_id, "logout").await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Introspect the current session
#[utoipa::path(
    get,
    path = "/auth/session",
    responses(
        (status = 200, description = "Session info", body = SessionInfoResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn get_session(
    State(state): State<crate::AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<SessionInfoResponse>, AppError> {
    let session = state.sessions.get(&context.session_id).await?;

    Ok(Json(SessionInfoResponse {
        session_id: session.id,
        user_id: session.user_id,
        issued_at: session.issued_at,
        expires_at: session.expires_at,
        last_activity_at: session.last_activity_at,
        activity_count: session.activity_count,
        is_admin: context.is_admin,
        roles: context.roles,
    }))
}

/// Force-terminate every active session of a user (admin)
#[utoipa::path(
    post,
    path = "/auth/users/{id}/logout",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Sessions terminated", body = ForceLogoutResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin required")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn force_logout(
    State(state): State<crate::AppState>,
    Extension(context): Extension<AuthContext>,
    Path(user_id): Path<String>,
) -> Result<Json<ForceLogoutResponse>, AppError> {
    if !context.is_admin {
        return Err(AppError::Forbidden("Admin required".to_string()));
    }

    let terminated = state
        .sessions
        .deactivate_all_for_user(&user_id, "forced")
        .await?;

    Ok(Json(ForceLogoutResponse {
        terminated_sessions: terminated,
    }))
}
