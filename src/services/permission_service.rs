use crate::api::error::AppError;
use crate::entities::{prelude::*, *};
use crate::models::{
    AuthContext, CapabilityFlags, EffectivePermission, PermissionLevel, PermissionSource,
};
use crate::services::audit_service::AuditService;
use crate::services::version_guard::{VersionCheck, update_with_version};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr,
};
use uuid::Uuid;

/// Computes the effective capability set a user holds on a file and
/// manages the underlying grants. Precedence is first-match-wins:
/// ownership/admin, direct grant, role grants, public default, deny.
#[derive(Clone)]
pub struct PermissionService {
    db: DatabaseConnection,
    audit: AuditService,
}

impl PermissionService {
    pub fn new(db: DatabaseConnection, audit: AuditService) -> Self {
        Self { db, audit }
    }

    /// Resolve the effective permission for (user, file).
    ///
    /// A missing file is an error; a soft-deleted file resolves to
    /// deny-all before any grant is consulted, so stale grants on
    /// deleted files are inert.
    pub async fn effective(
        &self,
        user_id: &str,
        file_id: &str,
    ) -> Result<EffectivePermission, AppError> {
        let file = Files::find_by_id(file_id)
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound("File not found".to_string()))?;

        if file.is_deleted {
            return Ok(EffectivePermission::deny_all());
        }

        let user = Users::find_by_id(user_id).one(&self.db).await?;
        let is_admin = user.as_ref().map(|u| u.is_active && u.is_admin).unwrap_or(false);

        if file.owner_id == user_id || is_admin {
            return Ok(EffectivePermission::owner());
        }

        let now = Utc::now();
        let unexpired = Condition::any()
            .add(permission_grants::Column::ExpiresAt.is_null())
            .add(permission_grants::Column::ExpiresAt.gt(now));

        // Step 2: an active direct grant for this user wins outright.
        let direct = PermissionGrants::find()
            .filter(permission_grants::Column::FileId.eq(file_id))
            .filter(permission_grants::Column::SubjectType.eq("user"))
            .filter(permission_grants::Column::SubjectId.eq(user_id))
            .filter(permission_grants::Column::IsActive.eq(true))
            .filter(unexpired.clone())
            .one(&self.db)
            .await?;

        if let Some(grant) = direct {
            return Ok(EffectivePermission {
                level: PermissionLevel::from_i16(grant.level),
                flags: CapabilityFlags(grant.flags),
                source: PermissionSource::Direct,
                expires_at: grant.expires_at,
            });
        }

        // Step 3: role grants combine — max level, union of flags.
        let roles: Vec<String> = UserRoles::find()
            .select_only()
            .column(user_roles::Column::Role)
            .filter(user_roles::Column::UserId.eq(user_id))
            .into_tuple()
            .all(&self.db)
            .await?;

        if !roles.is_empty() {
            let matches = PermissionGrants::find()
                .filter(permission_grants::Column::FileId.eq(file_id))
                .filter(permission_grants::Column::SubjectType.eq("role"))
                .filter(permission_grants::Column::SubjectId.is_in(roles))
                .filter(permission_grants::Column::IsActive.eq(true))
                .filter(unexpired)
                .all(&self.db)
                .await?;

            if !matches.is_empty() {
                let mut level = PermissionLevel::None;
                let mut flags = CapabilityFlags::none();
                let mut expires_at: Option<DateTime<Utc>> = None;

                for grant in &matches {
                    level = level.max(PermissionLevel::from_i16(grant.level));
                    flags |= CapabilityFlags(grant.flags);
                    // Report the earliest expiry among contributors: the
                    // first moment the computed set may shrink.
                    if let Some(e) = grant.expires_at {
                        expires_at = Some(expires_at.map_or(e, |cur: DateTime<Utc>| cur.min(e)));
                    }
                }

                return Ok(EffectivePermission {
                    level,
                    flags,
                    source: PermissionSource::Role,
                    expires_at,
                });
            }
        }

        // Step 4: public files default to read-only.
        if file.is_public {
            return Ok(EffectivePermission {
                level: PermissionLevel::Reader,
                flags: CapabilityFlags::read_only(),
                source: PermissionSource::Public,
                expires_at: None,
            });
        }

        Ok(EffectivePermission::deny_all())
    }

    /// Grant a capability to a user or role on a file. The actor must
    /// hold Manage on the file. An existing active grant for the same
    /// subject is revoked and replaced, keeping at most one active row
    /// per (file, subject).
    #[allow(clippy::too_many_arguments)]
    pub async fn grant(
        &self,
        actor: &AuthContext,
        file_id: &str,
        subject_type: &str,
        subject_id: &str,
        level: PermissionLevel,
        flags: CapabilityFlags,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<permission_grants::Model, AppError> {
        if !matches!(subject_type, "user" | "role") {
            return Err(AppError::BadRequest(
                "subject_type must be \"user\" or \"role\"".to_string(),
            ));
        }
        if let Some(e) = expires_at {
            if e <= Utc::now() {
                return Err(AppError::BadRequest("Expiry must be in the future".to_string()));
            }
        }

        self.require_manage(actor, file_id).await?;

        for _ in 0..3 {
            // Supersede the previous active grant for this subject, if any.
            let existing = PermissionGrants::find()
                .filter(permission_grants::Column::FileId.eq(file_id))
                .filter(permission_grants::Column::SubjectType.eq(subject_type))
                .filter(permission_grants::Column::SubjectId.eq(subject_id))
                .filter(permission_grants::Column::IsActive.eq(true))
                .one(&self.db)
                .await?;

            if let Some(previous) = existing {
                self.revoke_row(actor, &previous, "superseded").await?;
            }

            let grant = permission_grants::ActiveModel {
                id: Set(Uuid::new_v4().to_string()),
                file_id: Set(file_id.to_string()),
                subject_type: Set(subject_type.to_string()),
                subject_id: Set(subject_id.to_string()),
                level: Set(level.as_i16()),
                flags: Set(flags.0),
                expires_at: Set(expires_at),
                granted_by: Set(actor.user_id.clone()),
                granted_at: Set(Utc::now()),
                is_active: Set(true),
                revoked_at: Set(None),
                revoked_by: Set(None),
                revoke_reason: Set(None),
                version: Set(1),
            };

            // The partial unique index on active (file, subject) rows
            // backs the supersede check: a concurrent grant that landed
            // after our read fails this insert, so re-read and supersede
            // the winner instead.
            let grant = match grant.insert(&self.db).await {
                Ok(grant) => grant,
                Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            self.audit.record(
                Some(actor.session_id.clone()),
                "permission_grant",
                &grant.id,
                "granted",
                None,
                serde_json::to_value(&grant).ok(),
                None,
                None,
            );

            return Ok(grant);
        }

        let current = PermissionGrants::find()
            .filter(permission_grants::Column::FileId.eq(file_id))
            .filter(permission_grants::Column::SubjectType.eq(subject_type))
            .filter(permission_grants::Column::SubjectId.eq(subject_id))
            .filter(permission_grants::Column::IsActive.eq(true))
            .one(&self.db)
            .await?;

        Err(AppError::Conflict {
            current: current.map_or(0, |g| g.version),
        })
    }

    /// Update level/flags/expiry of an existing grant. Goes through the
    /// version guard; a stale `expected_version` surfaces as Conflict
    /// and leaves the row untouched.
    pub async fn update(
        &self,
        actor: &AuthContext,
        grant_id: &str,
        expected_version: i64,
        level: Option<PermissionLevel>,
        flags: Option<CapabilityFlags>,
        expires_at: Option<Option<DateTime<Utc>>>,
    ) -> Result<i64, AppError> {
        let grant = PermissionGrants::find_by_id(grant_id)
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound("Grant not found".to_string()))?;

        self.require_manage(actor, &grant.file_id).await?;

        if let Some(Some(e)) = expires_at {
            if e <= Utc::now() {
                return Err(AppError::BadRequest("Expiry must be in the future".to_string()));
            }
        }

        let old_snapshot = serde_json::to_value(&grant).ok();

        let outcome = update_with_version::<PermissionGrants, _, _>(
            &self.db,
            grant_id,
            expected_version,
            |mut update| {
                if let Some(level) = level {
                    update = update
                        .col_expr(permission_grants::Column::Level, Expr::value(level.as_i16()));
                }
                if let Some(flags) = flags {
                    update =
                        update.col_expr(permission_grants::Column::Flags, Expr::value(flags.0));
                }
                if let Some(expires_at) = expires_at {
                    update = update
                        .col_expr(permission_grants::Column::ExpiresAt, Expr::value(expires_at));
                }
                update
            },
        )
        .await?;

        match outcome {
            VersionCheck::Applied { new_version } => {
                self.audit.record(
                    Some(actor.session_id.clone()),
                    "permission_grant",
                    grant_id,
                    "updated",
                    old_snapshot,
                    serde_json::json!({
                        "level": level.map(|l| l.as_i16()),
                        "flags": flags.map(|f| f.0),
                        "expires_at": expires_at,
                        "version": new_version,
                    })
                    .into(),
                    None,
                    None,
                );
                Ok(new_version)
            }
            VersionCheck::Conflict { current } => Err(AppError::Conflict { current }),
            VersionCheck::Missing => Err(AppError::NotFound("Grant not found".to_string())),
        }
    }

    /// Revoke a grant. Rows are never deleted; revoking an already
    /// revoked grant is a no-op.
    pub async fn revoke(
        &self,
        actor: &AuthContext,
        grant_id: &str,
        reason: &str,
    ) -> Result<(), AppError> {
        let grant = PermissionGrants::find_by_id(grant_id)
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound("Grant not found".to_string()))?;

        self.require_manage(actor, &grant.file_id).await?;

        if !grant.is_active {
            return Ok(());
        }

        self.revoke_row(actor, &grant, reason).await
    }

    async fn revoke_row(
        &self,
        actor: &AuthContext,
        grant: &permission_grants::Model,
        reason: &str,
    ) -> Result<(), AppError> {
        let mut last_seen_version = grant.version;

        for attempt in 0..3 {
            let current = if attempt == 0 {
                grant.clone()
            } else {
                match PermissionGrants::find_by_id(&grant.id).one(&self.db).await? {
                    Some(g) if g.is_active => g,
                    // Already revoked by a concurrent caller.
                    Some(_) => return Ok(()),
                    None => return Err(AppError::NotFound("Grant not found".to_string())),
                }
            };

            let outcome = update_with_version::<PermissionGrants, _, _>(
                &self.db,
                &current.id,
                current.version,
                |update| {
                    update
                        .col_expr(permission_grants::Column::IsActive, Expr::value(false))
                        .col_expr(
                            permission_grants::Column::RevokedAt,
                            Expr::value(Some(Utc::now())),
                        )
                        .col_expr(
                            permission_grants::Column::RevokedBy,
                            Expr::value(Some(actor.user_id.clone())),
                        )
                        .col_expr(
                            permission_grants::Column::RevokeReason,
                            Expr::value(Some(reason.to_string())),
                        )
                },
            )
            .await?;

            match outcome {
                VersionCheck::Applied { .. } => {
                    self.audit.record(
                        Some(actor.session_id.clone()),
                        "permission_grant",
                        &current.id,
                        "revoked",
                        serde_json::to_value(&current).ok(),
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
                    return Err(AppError::NotFound("Grant not found".to_string()));
                }
            }
        }

        Err(AppError::Conflict {
            current: last_seen_version,
        })
    }

    /// List every grant row for a file, active and revoked, newest first.
    pub async fn list_for_file(
        &self,
        actor: &AuthContext,
        file_id: &str,
    ) -> Result<Vec<permission_grants::Model>, AppError> {
        self.require_manage(actor, file_id).await?;

        let grants = PermissionGrants::find()
            .filter(permission_grants::Column::FileId.eq(file_id))
            .order_by_desc(permission_grants::Column::GrantedAt)
            .all(&self.db)
            .await?;

        Ok(grants)
    }

    async fn require_manage(&self, actor: &AuthContext, file_id: &str) -> Result<(), AppError> {
        if actor.is_admin {
            return Ok(());
        }
        let effective = self.effective(&actor.user_id, file_id).await?;
        if effective.level.can_manage() || effective.flags.contains(CapabilityFlags::MANAGE) {
            return Ok(());
        }
        Err(AppError::Forbidden(
            "Manage capability required".to_string(),
        ))
    }
}
