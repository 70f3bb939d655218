use crate::api::error::AppError;
use crate::config::AccessConfig;
use crate::entities::{prelude::*, *};
use crate::models::{AuthContext, CapabilityFlags, ShareAccess, ShareDenial, ShareOperation};
use crate::services::audit_service::AuditService;
use crate::services::permission_service::PermissionService;
use crate::services::version_guard::{VersionCheck, update_with_version};
use crate::utils::{password, token};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

/// Parameters for creating a share link.
#[derive(Debug, Clone)]
pub struct CreateShareParams {
    pub share_type: String,
    pub password: Option<String>,
    pub allow_download: bool,
    pub allow_preview: bool,
    pub allow_comment: bool,
    pub allow_print: bool,
    /// 0 = unlimited
    pub max_downloads: i32,
    /// 0 = unlimited
    pub max_views: i32,
    pub expires_at: DateTime<Utc>,
}

/// Issues and resolves token-based share links with expiry, password and
/// usage-cap semantics, independent of the session machinery.
#[derive(Clone)]
pub struct ShareService {
    db: DatabaseConnection,
    config: AccessConfig,
    permissions: PermissionService,
    audit: AuditService,
}

impl ShareService {
    pub fn new(
        db: DatabaseConnection,
        config: AccessConfig,
        permissions: PermissionService,
        audit: AuditService,
    ) -> Self {
        Self {
            db,
            config,
            permissions,
            audit,
        }
    }

    /// Create a new share link. The actor must own the file or hold the
    /// Share capability on it.
    pub async fn create_share(
        &self,
        actor: &AuthContext,
        file_id: &str,
        params: CreateShareParams,
    ) -> Result<share_links::Model, AppError> {
        if !["public", "email", "internal"].contains(&params.share_type.as_str()) {
            return Err(AppError::BadRequest(
                "share_type must be public, email or internal".to_string(),
            ));
        }
        let now = Utc::now();
        if params.expires_at <= now {
            return Err(AppError::BadRequest("Expiry must be in the future".to_string()));
        }
        if params.expires_at > now + chrono::Duration::hours(self.config.max_share_expiry_hours) {
            return Err(AppError::BadRequest("Expiry cannot exceed 1 year".to_string()));
        }
        if params.max_downloads < 0 || params.max_views < 0 {
            return Err(AppError::BadRequest("Limits cannot be negative".to_string()));
        }

        let effective = self.permissions.effective(&actor.user_id, file_id).await?;
        if !actor.is_admin
            && !effective.flags.contains(CapabilityFlags::SHARE)
            && !effective.level.can_manage()
        {
            return Err(AppError::Forbidden(
                "Share capability required".to_string(),
            ));
        }

        let password_hash = match params.password {
            Some(ref p) if !p.is_empty() => Some(password::hash_password(p)?),
            _ => None,
        };

        let share = share_links::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            file_id: Set(file_id.to_string()),
            created_by: Set(actor.user_id.clone()),
            share_token: Set(token::generate_token(token::SHARE_PREFIX)),
            share_type: Set(params.share_type),
            password_hash: Set(password_hash),
            allow_download: Set(params.allow_download),
            allow_preview: Set(params.allow_preview),
            allow_comment: Set(params.allow_comment),
            allow_print: Set(params.allow_print),
            max_downloads: Set(params.max_downloads),
            current_downloads: Set(0),
            max_views: Set(params.max_views),
            current_views: Set(0),
            expires_at: Set(params.expires_at),
            last_accessed_at: Set(None),
            is_active: Set(true),
            revoked_at: Set(None),
            created_at: Set(Some(now)),
            version: Set(1),
        };

        let share = share.insert(&self.db).await?;

        self.audit.record(
            Some(actor.session_id.clone()),
            "share_link",
            &share.id,
            "created",
            None,
            Some(serde_json::json!({
                "file_id": share.file_id,
                "share_type": share.share_type,
                "token_fingerprint": token::fingerprint(&share.share_token),
                "max_downloads": share.max_downloads,
                "max_views": share.max_views,
                "expires_at": share.expires_at,
            })),
            None,
            None,
        );

        Ok(share)
    }

    /// Resolve a share token for one operation, consuming quota on
    /// success.
    ///
    /// Checks run in order: unknown token, revoked link or deleted file,
    /// expiry, usage cap, password. The counter increment and the access
    /// event append commit in one transaction guarded by the version
    /// check, with a bounded retry; exhausting the retries fails closed
    /// so a link with remaining quota N can never hand out more than N
    /// grants.
    pub async fn resolve_access(
        &self,
        raw_token: &str,
        operation: ShareOperation,
        supplied_password: Option<&str>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<ShareAccess, AppError> {
        let mut last_seen_version = 0;

        for _ in 0..self.config.share_increment_retries {
            let share = ShareLinks::find()
                .filter(share_links::Column::ShareToken.eq(raw_token))
                .one(&self.db)
                .await?;

            let Some(share) = share else {
                tracing::warn!(
                    token_fingerprint = %token::fingerprint(raw_token),
                    "share access attempt with unknown token"
                );
                return Ok(ShareAccess::Denied(ShareDenial::NotFound));
            };

            if let Some(denial) = self.precheck(&share, operation).await? {
                self.log_event(&share.id, operation, false, Some(denial), &ip_address, &user_agent)
                    .await;
                return Ok(ShareAccess::Denied(denial));
            }

            if let Some(hash) = &share.password_hash {
                let ok = match supplied_password {
                    Some(p) => password::verify_password(p, hash)?,
                    None => false,
                };
                if !ok {
                    self.log_password_attempt(&share.id, &ip_address, &user_agent).await;
                    return Ok(ShareAccess::Denied(ShareDenial::BadPassword));
                }
            }

            // All checks passed against this snapshot. Consume quota and
            // append the access event atomically; a version conflict
            // means another request moved the counters first, so re-read
            // and re-check from scratch.
            let now = Utc::now();
            let txn = self.db.begin().await?;

            let counter_column = match operation {
                ShareOperation::View => share_links::Column::CurrentViews,
                ShareOperation::Download => share_links::Column::CurrentDownloads,
            };

            let outcome = update_with_version::<ShareLinks, _, _>(
                &txn,
                &share.id,
                share.version,
                |update| {
                    update
                        .col_expr(counter_column, Expr::col(counter_column).add(1))
                        .col_expr(
                            share_links::Column::LastAccessedAt,
                            Expr::value(Some(now)),
                        )
                },
            )
            .await?;

            match outcome {
                VersionCheck::Applied { new_version } => {
                    let event = share_access_logs::ActiveModel {
                        id: Set(Uuid::new_v4().to_string()),
                        share_link_id: Set(share.id.clone()),
                        action: Set(operation.as_str().to_string()),
                        success: Set(true),
                        denial_reason: Set(None),
                        ip_address: Set(ip_address.clone()),
                        user_agent: Set(user_agent.clone()),
                        accessed_at: Set(now),
                    };
                    event.insert(&txn).await?;
                    txn.commit().await?;

                    let mut granted = share;
                    granted.version = new_version;
                    granted.last_accessed_at = Some(now);
                    match operation {
                        ShareOperation::View => granted.current_views += 1,
                        ShareOperation::Download => granted.current_downloads += 1,
                    }

                    return Ok(ShareAccess::Granted(granted));
                }
                VersionCheck::Conflict { current } => {
                    txn.rollback().await?;
                    last_seen_version = current;
                    continue;
                }
                VersionCheck::Missing => {
                    txn.rollback().await?;
                    return Ok(ShareAccess::Denied(ShareDenial::NotFound));
                }
            }
        }

        // Retries exhausted under contention: fail closed rather than
        // risk overshooting the cap.
        Err(AppError::Conflict {
            current: last_seen_version,
        })
    }

    /// The ordered non-password checks against one snapshot of the row.
    async fn precheck(
        &self,
        share: &share_links::Model,
        operation: ShareOperation,
    ) -> Result<Option<ShareDenial>, AppError> {
        if !share.is_active {
            return Ok(Some(ShareDenial::Revoked));
        }

        let file = Files::find_by_id(&share.file_id).one(&self.db).await?;
        if !file.map(|f| !f.is_deleted).unwrap_or(false) {
            return Ok(Some(ShareDenial::Revoked));
        }

        if share.expires_at <= Utc::now() {
            // Expired links are permanently inert; flip the flag lazily.
            // Losing this CAS race changes nothing observable.
            let _ = update_with_version::<ShareLinks, _, _>(
                &self.db,
                &share.id,
                share.version,
                |update| update.col_expr(share_links::Column::IsActive, Expr::value(false)),
            )
            .await?;
            return Ok(Some(ShareDenial::Expired));
        }

        let allowed = match operation {
            ShareOperation::View => share.allow_preview,
            ShareOperation::Download => share.allow_download,
        };
        if !allowed {
            return Ok(Some(ShareDenial::OperationNotAllowed));
        }

        let (max, current) = match operation {
            ShareOperation::View => (share.max_views, share.current_views),
            ShareOperation::Download => (share.max_downloads, share.current_downloads),
        };
        if max > 0 && current >= max {
            return Ok(Some(ShareDenial::LimitReached));
        }

        Ok(None)
    }

    /// Link metadata for the public landing page. Runs the same ordered
    /// checks as access resolution but consumes no quota.
    pub async fn link_info(
        &self,
        raw_token: &str,
    ) -> Result<Result<(share_links::Model, files::Model), ShareDenial>, AppError> {
        let share = ShareLinks::find()
            .filter(share_links::Column::ShareToken.eq(raw_token))
            .one(&self.db)
            .await?;

        let Some(share) = share else {
            return Ok(Err(ShareDenial::NotFound));
        };

        if !share.is_active {
            return Ok(Err(ShareDenial::Revoked));
        }

        let file = Files::find_by_id(&share.file_id).one(&self.db).await?;
        let Some(file) = file.filter(|f| !f.is_deleted) else {
            return Ok(Err(ShareDenial::Revoked));
        };

        if share.expires_at <= Utc::now() {
            return Ok(Err(ShareDenial::Expired));
        }

        Ok(Ok((share, file)))
    }

    /// Revoke a share link. Irreversible; a replacement link must be
    /// created instead. Revoking twice is a no-op.
    pub async fn revoke_share(&self, actor: &AuthContext, share_id: &str) -> Result<(), AppError> {
        let share = ShareLinks::find_by_id(share_id)
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound("Share not found".to_string()))?;

        if share.created_by != actor.user_id && !actor.is_admin {
            return Err(AppError::NotFound("Share not found".to_string()));
        }

        let mut last_seen_version = share.version;

        for attempt in 0..3 {
            let current = if attempt == 0 {
                share.clone()
            } else {
                match ShareLinks::find_by_id(share_id).one(&self.db).await? {
                    Some(s) if s.is_active => s,
                    Some(_) => return Ok(()),
                    None => return Err(AppError::NotFound("Share not found".to_string())),
                }
            };

            if !current.is_active {
                return Ok(());
            }

            let outcome = update_with_version::<ShareLinks, _, _>(
                &self.db,
                share_id,
                current.version,
                |update| {
                    update
                        .col_expr(share_links::Column::IsActive, Expr::value(false))
                        .col_expr(
                            share_links::Column::RevokedAt,
                            Expr::value(Some(Utc::now())),
                        )
                },
            )
            .await?;

            match outcome {
                VersionCheck::Applied { .. } => {
                    self.audit.record(
                        Some(actor.session_id.clone()),
                        "share_link",
                        share_id,
                        "revoked",
                        serde_json::to_value(&current).ok(),
                        Some(serde_json::json!({ "is_active": false })),
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
                    return Err(AppError::NotFound("Share not found".to_string()));
                }
            }
        }

        Err(AppError::Conflict {
            current: last_seen_version,
        })
    }

    /// List all live shares created by a user.
    pub async fn list_user_shares(
        &self,
        user_id: &str,
    ) -> Result<Vec<(share_links::Model, Option<files::Model>)>, AppError> {
        let shares = ShareLinks::find()
            .filter(share_links::Column::CreatedBy.eq(user_id))
            .filter(share_links::Column::IsActive.eq(true))
            .filter(share_links::Column::ExpiresAt.gt(Utc::now()))
            .find_also_related(Files)
            .order_by_desc(share_links::Column::CreatedAt)
            .all(&self.db)
            .await?;

        Ok(shares)
    }

    /// All live shares for a specific file owned by the caller.
    pub async fn get_shares_for_file(
        &self,
        actor: &AuthContext,
        file_id: &str,
    ) -> Result<Vec<share_links::Model>, AppError> {
        let shares = ShareLinks::find()
            .filter(
                Condition::all()
                    .add(share_links::Column::FileId.eq(file_id))
                    .add(share_links::Column::CreatedBy.eq(&actor.user_id))
                    .add(share_links::Column::IsActive.eq(true))
                    .add(share_links::Column::ExpiresAt.gt(Utc::now())),
            )
            .order_by_desc(share_links::Column::CreatedAt)
            .all(&self.db)
            .await?;

        Ok(shares)
    }

    /// Access events for a share link, newest first. Only the creator
    /// (or an admin) may read them.
    pub async fn get_access_logs(
        &self,
        actor: &AuthContext,
        share_id: &str,
    ) -> Result<Vec<share_access_logs::Model>, AppError> {
        let share = ShareLinks::find_by_id(share_id)
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound("Share not found".to_string()))?;

        if share.created_by != actor.user_id && !actor.is_admin {
            return Err(AppError::NotFound("Share not found".to_string()));
        }

        let logs = ShareAccessLogs::find()
            .filter(share_access_logs::Column::ShareLinkId.eq(share_id))
            .order_by_desc(share_access_logs::Column::AccessedAt)
            .all(&self.db)
            .await?;

        Ok(logs)
    }

    async fn log_event(
        &self,
        share_link_id: &str,
        operation: ShareOperation,
        success: bool,
        denial: Option<ShareDenial>,
        ip_address: &Option<String>,
        user_agent: &Option<String>,
    ) {
        let event = share_access_logs::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            share_link_id: Set(share_link_id.to_string()),
            action: Set(operation.as_str().to_string()),
            success: Set(success),
            denial_reason: Set(denial.map(|d| d.to_string())),
            ip_address: Set(ip_address.clone()),
            user_agent: Set(user_agent.clone()),
            accessed_at: Set(Utc::now()),
        };

        if let Err(e) = event.insert(&self.db).await {
            tracing::error!("Failed to log share access: {}", e);
        }
    }

    async fn log_password_attempt(
        &self,
        share_link_id: &str,
        ip_address: &Option<String>,
        user_agent: &Option<String>,
    ) {
        let event = share_access_logs::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            share_link_id: Set(share_link_id.to_string()),
            action: Set("password_attempt".to_string()),
            success: Set(false),
            denial_reason: Set(Some(ShareDenial::BadPassword.to_string())),
            ip_address: Set(ip_address.clone()),
            user_agent: Set(user_agent.clone()),
            accessed_at: Set(Utc::now()),
        };

        if let Err(e) = event.insert(&self.db).await {
            tracing::error!("Failed to log share password attempt: {}", e);
        }
    }
}
