use crate::api::error::AppError;
use crate::config::AccessConfig;
use crate::entities::{prelude::*, *};
use crate::models::{AuthContext, SessionRejection, SessionValidation};
use crate::services::audit_service::AuditService;
use crate::services::version_guard::{VersionCheck, update_with_version};
use crate::utils::token;
use chrono::{Duration, Utc};
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, Set,
};
use uuid::Uuid;

/// Issues, validates and terminates bearer sessions. Expiry is detected
/// lazily at validation time from the stored `expires_at`; no background
/// sweeper is required for correctness.
#[derive(Clone)]
pub struct SessionService {
    db: DatabaseConnection,
    config: AccessConfig,
    audit: AuditService,
}

impl SessionService {
    pub fn new(db: DatabaseConnection, config: AccessConfig, audit: AuditService) -> Self {
        Self { db, config, audit }
    }

    /// Create a session for an already-authenticated user.
    pub async fn issue(&self, user_id: &str) -> Result<sessions::Model, AppError> {
        let now = Utc::now();
        let session = sessions::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            user_id: Set(user_id.to_string()),
            token: Set(token::generate_token(token::SESSION_PREFIX)),
            issued_at: Set(now),
            expires_at: Set(now + Duration::hours(self.config.session_lifetime_hours)),
            last_activity_at: Set(now),
            activity_count: Set(0),
            is_active: Set(true),
            deactivation_reason: Set(None),
            version: Set(1),
        };

        let session = session.insert(&self.db).await?;

        self.audit.record(
            Some(session.id.clone()),
            "session",
            &session.id,
            "issued",
            None,
            Some(serde_json::json!({
                "user_id": session.user_id,
                "token_fingerprint": token::fingerprint(&session.token),
                "expires_at": session.expires_at,
            })),
            None,
            None,
        );

        Ok(session)
    }

    /// Validate a bearer token. Checks run in a strict order: unknown
    /// token, deactivated, expired, disabled user. Only then is the
    /// session touched. Storage failures surface as errors, never as an
    /// `Invalid` outcome, so infrastructure trouble cannot masquerade
    /// as an auth decision.
    pub async fn validate(&self, raw_token: &str) -> Result<SessionValidation, AppError> {
        let now = Utc::now();

        let session = Sessions::find()
            .filter(sessions::Column::Token.eq(raw_token))
            .one(&self.db)
            .await?;

        let Some(session) = session else {
            return Ok(SessionValidation::Invalid(SessionRejection::NotFound));
        };

        if !session.is_active {
            return Ok(SessionValidation::Invalid(SessionRejection::Deactivated));
        }

        if session.expires_at <= now {
            // Lazy expiry. Losing the CAS race means another request
            // already flipped the row, which is the same end state.
            let outcome = update_with_version::<Sessions, _, _>(
                &self.db,
                &session.id,
                session.version,
                |update| {
                    update
                        .col_expr(sessions::Column::IsActive, Expr::value(false))
                        .col_expr(
                            sessions::Column::DeactivationReason,
                            Expr::value(Some("expired".to_string())),
                        )
                },
            )
            .await?;

            if matches!(outcome, VersionCheck::Applied { .. }) {
                self.audit.record(
                    Some(session.id.clone()),
                    "session",
                    &session.id,
                    "expired",
                    Some(serde_json::json!({ "is_active": true })),
                    Some(serde_json::json!({ "is_active": false, "reason": "expired" })),
                    None,
                    None,
                );
            }

            return Ok(SessionValidation::Invalid(SessionRejection::Expired));
        }

        let user = Users::find_by_id(&session.user_id).one(&self.db).await?;
        let Some(user) = user.filter(|u| u.is_active) else {
            return Ok(SessionValidation::Invalid(SessionRejection::UserDisabled));
        };

        self.touch(&session, now).await?;

        let roles: Vec<String> = UserRoles::find()
            .select_only()
            .column(user_roles::Column::Role)
            .filter(user_roles::Column::UserId.eq(&session.user_id))
            .into_tuple()
            .all(&self.db)
            .await?;

        Ok(SessionValidation::Valid(AuthContext {
            session_id: session.id,
            user_id: user.id,
            is_admin: user.is_admin,
            roles,
        }))
    }

    /// Persist the activity touch for a validated session. Plain touches
    /// are throttled by `session_touch_interval_secs`; a touch that also
    /// extends the expiry is always written. A CAS conflict here means a
    /// concurrent request touched the same session and is ignored.
    async fn touch(
        &self,
        session: &sessions::Model,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), AppError> {
        let extend = session.expires_at - now
            <= Duration::minutes(self.config.session_extension_window_mins);
        let interval_elapsed = now - session.last_activity_at
            >= Duration::seconds(self.config.session_touch_interval_secs);

        if !extend && !interval_elapsed {
            return Ok(());
        }

        let new_expiry = now + Duration::hours(self.config.session_extension_hours);

        let _ = update_with_version::<Sessions, _, _>(
            &self.db,
            &session.id,
            session.version,
            |update| {
                let update = update
                    .col_expr(sessions::Column::LastActivityAt, Expr::value(now))
                    .col_expr(
                        sessions::Column::ActivityCount,
                        Expr::col(sessions::Column::ActivityCount).add(1),
                    );
                if extend {
                    update.col_expr(sessions::Column::ExpiresAt, Expr::value(new_expiry))
                } else {
                    update
                }
            },
        )
        .await?;

        Ok(())
    }

    /// Terminate a session. Terminal and irreversible; calling it on an
    /// already-inactive session is a no-op.
    pub async fn deactivate(&self, session_id: &str, reason: &str) -> Result<(), AppError> {
        let mut last_seen_version = 0;
        for _ in 0..3 {
            let session = Sessions::find_by_id(session_id).one(&self.db).await?;
            let Some(session) = session else {
                return Err(AppError::NotFound("Session not found".to_string()));
            };

            if !session.is_active {
                return Ok(());
            }

            let outcome = update_with_version::<Sessions, _, _>(
                &self.db,
                &session.id,
                session.version,
                |update| {
                    update
                        .col_expr(sessions::Column::IsActive, Expr::value(false))
                        .col_expr(
                            sessions::Column::DeactivationReason,
                            Expr::value(Some(reason.to_string())),
                        )
                },
            )
            .await?;

            match outcome {
                VersionCheck::Applied { .. } => {
                    self.audit.record(
                        Some(session.id.clone()),
                        "session",
                        &session.id,
                        "deactivated",
                        Some(serde_json::json!({ "is_active": true })),
                        Some(serde_json::json!({ "is_active": false, "reason": reason })),
                        None,
                        None,
                    );
                    return Ok(());
                }
                VersionCheck::Conflict { current } => {
                    last_seen_version = current;
                    continue;
                }
                VersionCheck::Missing => {
                    return Err(AppError::NotFound("Session not found".to_string()));
                }
            }
        }

        Err(AppError::Conflict {
            current: last_seen_version,
        })
    }

    /// Terminate every active session a user holds, e.g. after a
    /// security event or an admin force-logout. A storage failure on any
    /// session aborts the sweep and surfaces; a session another request
    /// already terminated counts as done.
    pub async fn deactivate_all_for_user(
        &self,
        user_id: &str,
        reason: &str,
    ) -> Result<u64, AppError> {
        let sessions = Sessions::find()
            .filter(sessions::Column::UserId.eq(user_id))
            .filter(sessions::Column::IsActive.eq(true))
            .all(&self.db)
            .await?;

        let mut terminated = 0u64;
        for session in sessions {
            self.deactivate(&session.id, reason).await?;
            terminated += 1;
        }

        Ok(terminated)
    }

    /// Look up a session row by id, active or not.
    pub async fn get(&self, session_id: &str) -> Result<sessions::Model, AppError> {
        Sessions::find_by_id(session_id)
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound("Session not found".to_string()))
    }
}
