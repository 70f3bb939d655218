pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::AccessConfig;
use crate::services::audit_service::AuditService;
use crate::services::permission_service::PermissionService;
use crate::services::session_service::SessionService;
use crate::services::share_service::ShareService;
use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::auth::get_session,
        api::handlers::auth::force_logout,
        api::handlers::permissions::get_effective_permission,
        api::handlers::permissions::list_permissions,
        api::handlers::permissions::grant_permission,
        api::handlers::permissions::update_permission,
        api::handlers::permissions::revoke_permission,
        api::handlers::shares::create_share,
        api::handlers::shares::list_shares,
        api::handlers::shares::revoke_share,
        api::handlers::shares::get_share_logs,
        api::handlers::shares::get_public_share,
        api::handlers::shares::access_share,
        api::handlers::audit::get_audit_history,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::auth::LoginRequest,
            api::handlers::auth::LoginResponse,
            api::handlers::auth::SessionInfoResponse,
            api::handlers::auth::ForceLogoutResponse,
            api::handlers::permissions::GrantPermissionRequest,
            api::handlers::permissions::UpdatePermissionRequest,
            api::handlers::permissions::GrantResponse,
            api::handlers::permissions::UpdatePermissionResponse,
            api::handlers::shares::CreateShareRequest,
            api::handlers::shares::ShareResponse,
            api::handlers::shares::ShareAccessLogResponse,
            api::handlers::shares::PublicShareInfoResponse,
            api::handlers::shares::ShareAccessRequest,
            api::handlers::shares::ShareAccessResponse,
            api::handlers::audit::AuditEntryResponse,
            api::handlers::health::HealthResponse,
            models::EffectivePermission,
            models::PermissionLevel,
            models::PermissionSource,
            models::CapabilityFlags,
            models::ShareOperation,
        )
    ),
    tags(
        (name = "auth", description = "Session issuance and termination"),
        (name = "permissions", description = "Per-file permission grants and resolution"),
        (name = "shares", description = "Token-based share links"),
        (name = "audit", description = "Audit history"),
        (name = "system", description = "Health and diagnostics")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: AccessConfig,
    pub sessions: Arc<SessionService>,
    pub permissions: Arc<PermissionService>,
    pub shares: Arc<ShareService>,
    pub audit: Arc<AuditService>,
}

impl AppState {
    /// Wire up the service graph with explicit dependency injection; no
    /// process-wide mutable state beyond the connection pool.
    pub fn new(db: DatabaseConnection, config: AccessConfig) -> Self {
        let audit = AuditService::new(db.clone());
        let sessions = SessionService::new(db.clone(), config.clone(), audit.clone());
        let permissions = PermissionService::new(db.clone(), audit.clone());
        let shares = ShareService::new(
            db.clone(),
            config.clone(),
            permissions.clone(),
            audit.clone(),
        );

        Self {
            db,
            config,
            sessions: Arc::new(sessions),
            permissions: Arc::new(permissions),
            shares: Arc::new(shares),
            audit: Arc::new(audit),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .route("/auth/login", post(api::handlers::auth::login))
        .route(
            "/auth/logout",
            post(api::handlers::auth::logout).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/auth/session",
            get(api::handlers::auth::get_session).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/auth/users/:id/logout",
            post(api::handlers::auth::force_logout).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/files/:id/permissions/effective",
            get(api::handlers::permissions::get_effective_permission).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/files/:id/permissions",
            get(api::handlers::permissions::list_permissions)
                .post(api::handlers::permissions::grant_permission)
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/permissions/:id",
            put(api::handlers::permissions::update_permission)
                .delete(api::handlers::permissions::revoke_permission)
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/shares",
            get(api::handlers::shares::list_shares)
                .post(api::handlers::shares::create_share)
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/shares/:id",
            axum::routing::delete(api::handlers::shares::revoke_share).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/shares/:id/logs",
            get(api::handlers::shares::get_share_logs).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route("/share/:token", get(api::handlers::shares::get_public_share))
        .route(
            "/share/:token/access",
            post(api::handlers::shares::access_share),
        )
        .route(
            "/audit/:entity_type/:entity_id",
            get(api::handlers::audit::get_audit_history).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}
