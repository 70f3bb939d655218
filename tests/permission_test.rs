use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    QueryFilter, Set,
};
use workdesk_access::api::error::AppError;
use workdesk_access::entities::{prelude::*, *};
use workdesk_access::infrastructure::database;
use workdesk_access::models::{
    AuthContext, CapabilityFlags, PermissionLevel, PermissionSource,
};
use workdesk_access::services::audit_service::AuditService;
use workdesk_access::services::permission_service::PermissionService;

async fn setup_test_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    database::run_migrations(&db).await.unwrap();
    db
}

fn permission_service(db: &DatabaseConnection) -> PermissionService {
    PermissionService::new(db.clone(), AuditService::new(db.clone()))
}

fn ctx(user_id: &str, is_admin: bool) -> AuthContext {
    AuthContext {
        session_id: format!("sess-{}", user_id),
        user_id: user_id.to_string(),
        is_admin,
        roles: vec![],
    }
}

async fn insert_user(db: &DatabaseConnection, id: &str, is_admin: bool) {
    users::ActiveModel {
        id: Set(id.to_string()),
        username: Set(format!("user-{}", id)),
        password_hash: Set(None),
        email: Set(None),
        is_active: Set(true),
        is_admin: Set(is_admin),
        created_at: Set(Some(Utc::now())),
    }
    .insert(db)
    .await
    .unwrap();
}

async fn insert_file(db: &DatabaseConnection, id: &str, owner_id: &str, is_public: bool) {
    files::ActiveModel {
        id: Set(id.to_string()),
        owner_id: Set(owner_id.to_string()),
        name: Set(format!("{}.pdf", id)),
        is_public: Set(is_public),
        is_deleted: Set(false),
        created_at: Set(Some(Utc::now())),
    }
    .insert(db)
    .await
    .unwrap();
}

async fn assign_role(db: &DatabaseConnection, id: &str, user_id: &str, role: &str) {
    user_roles::ActiveModel {
        id: Set(id.to_string()),
        user_id: Set(user_id.to_string()),
        role: Set(role.to_string()),
        assigned_at: Set(Some(Utc::now())),
    }
    .insert(db)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_owner_gets_full_access() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_file(&db, "f1", "alice", false).await;

    let effective = service.effective("alice", "f1").await.unwrap();
    assert_eq!(effective.level, PermissionLevel::Manager);
    assert_eq!(effective.flags, CapabilityFlags::full());
    assert_eq!(effective.source, PermissionSource::Owner);
    assert_eq!(effective.expires_at, None);
}

#[tokio::test]
async fn test_ownership_beats_a_narrower_direct_grant() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_file(&db, "f1", "alice", false).await;

    // A stray Reader grant targeting the owner must not narrow her
    // access.
    permission_grants::ActiveModel {
        id: Set("g1".to_string()),
        file_id: Set("f1".to_string()),
        subject_type: Set("user".to_string()),
        subject_id: Set("alice".to_string()),
        level: Set(PermissionLevel::Reader.as_i16()),
        flags: Set(CapabilityFlags::READ.0),
        expires_at: Set(None),
        granted_by: Set("alice".to_string()),
        granted_at: Set(Utc::now()),
        is_active: Set(true),
        revoked_at: Set(None),
        revoked_by: Set(None),
        revoke_reason: Set(None),
        version: Set(1),
    }
    .insert(&db)
    .await
    .unwrap();

    let effective = service.effective("alice", "f1").await.unwrap();
    assert_eq!(effective.source, PermissionSource::Owner);
    assert_eq!(effective.level, PermissionLevel::Manager);
    assert_eq!(effective.flags, CapabilityFlags::full());
}

#[tokio::test]
async fn test_admin_gets_full_access_to_any_file() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "root", true).await;
    insert_file(&db, "f1", "alice", false).await;

    let effective = service.effective("root", "f1").await.unwrap();
    assert_eq!(effective.source, PermissionSource::Owner);
    assert_eq!(effective.level, PermissionLevel::Manager);
}

#[tokio::test]
async fn test_missing_file_is_an_error() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;

    let err = service.effective("alice", "nope").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_soft_deleted_file_denies_everyone_including_owner() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_file(&db, "f1", "alice", true).await;

    let actor = ctx("alice", false);
    service
        .grant(
            &actor,
            "f1",
            "user",
            "bob",
            PermissionLevel::Writer,
            CapabilityFlags::READ | CapabilityFlags::WRITE,
            None,
        )
        .await
        .unwrap();

    let file = Files::find_by_id("f1").one(&db).await.unwrap().unwrap();
    let mut deleted: files::ActiveModel = file.into();
    deleted.is_deleted = Set(true);
    deleted.update(&db).await.unwrap();

    for user in ["alice", "bob"] {
        let effective = service.effective(user, "f1").await.unwrap();
        assert_eq!(effective.level, PermissionLevel::None);
        assert!(effective.flags.is_empty());
        assert_eq!(effective.source, PermissionSource::None);
    }
}

#[tokio::test]
async fn test_direct_grant_beats_role_grant() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_file(&db, "f1", "alice", false).await;
    assign_role(&db, "r1", "bob", "editor").await;

    let actor = ctx("alice", false);
    service
        .grant(
            &actor,
            "f1",
            "role",
            "editor",
            PermissionLevel::Writer,
            CapabilityFlags::READ | CapabilityFlags::WRITE,
            None,
        )
        .await
        .unwrap();
    service
        .grant(
            &actor,
            "f1",
            "user",
            "bob",
            PermissionLevel::Reader,
            CapabilityFlags::READ,
            None,
        )
        .await
        .unwrap();

    // The weaker direct grant still wins over the role grant.
    let effective = service.effective("bob", "f1").await.unwrap();
    assert_eq!(effective.source, PermissionSource::Direct);
    assert_eq!(effective.level, PermissionLevel::Reader);
    assert_eq!(effective.flags, CapabilityFlags::READ);
}

#[tokio::test]
async fn test_revoked_direct_grant_falls_through_to_role() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_file(&db, "f1", "alice", false).await;
    assign_role(&db, "r1", "bob", "editor").await;

    let actor = ctx("alice", false);
    service
        .grant(
            &actor,
            "f1",
            "role",
            "editor",
            PermissionLevel::Writer,
            CapabilityFlags::READ | CapabilityFlags::WRITE,
            None,
        )
        .await
        .unwrap();
    let direct = service
        .grant(
            &actor,
            "f1",
            "user",
            "bob",
            PermissionLevel::Reader,
            CapabilityFlags::READ,
            None,
        )
        .await
        .unwrap();

    service.revoke(&actor, &direct.id, "cleanup").await.unwrap();

    let effective = service.effective("bob", "f1").await.unwrap();
    assert_eq!(effective.source, PermissionSource::Role);
    assert_eq!(effective.level, PermissionLevel::Writer);
}

#[tokio::test]
async fn test_role_grants_combine_max_level_union_flags() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_file(&db, "f1", "alice", false).await;
    assign_role(&db, "r1", "bob", "viewer").await;
    assign_role(&db, "r2", "bob", "editor").await;

    let soon = Utc::now() + Duration::hours(1);
    let later = Utc::now() + Duration::hours(24);

    let actor = ctx("alice", false);
    service
        .grant(
            &actor,
            "f1",
            "role",
            "viewer",
            PermissionLevel::Reader,
            CapabilityFlags::READ | CapabilityFlags::DOWNLOAD,
            Some(later),
        )
        .await
        .unwrap();
    service
        .grant(
            &actor,
            "f1",
            "role",
            "editor",
            PermissionLevel::Writer,
            CapabilityFlags::READ | CapabilityFlags::WRITE,
            Some(soon),
        )
        .await
        .unwrap();

    let effective = service.effective("bob", "f1").await.unwrap();
    assert_eq!(effective.source, PermissionSource::Role);
    assert_eq!(effective.level, PermissionLevel::Writer);
    assert_eq!(
        effective.flags,
        CapabilityFlags::READ | CapabilityFlags::WRITE | CapabilityFlags::DOWNLOAD
    );
    // Earliest contributor expiry: the first moment the set may shrink.
    let reported = effective.expires_at.expect("expiry expected");
    assert!((reported - soon).num_seconds().abs() < 2);
    assert!(reported < later);
}

#[tokio::test]
async fn test_expired_grant_is_inert() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_file(&db, "f1", "alice", false).await;

    let actor = ctx("alice", false);
    let grant = service
        .grant(
            &actor,
            "f1",
            "user",
            "bob",
            PermissionLevel::Writer,
            CapabilityFlags::READ | CapabilityFlags::WRITE,
            Some(Utc::now() + Duration::hours(1)),
        )
        .await
        .unwrap();

    // Push the expiry into the past directly.
    let mut stale: permission_grants::ActiveModel =
        PermissionGrants::find_by_id(&grant.id)
            .one(&db)
            .await
            .unwrap()
            .unwrap()
            .into();
    stale.expires_at = Set(Some(Utc::now() - Duration::minutes(1)));
    stale.update(&db).await.unwrap();

    let effective = service.effective("bob", "f1").await.unwrap();
    assert_eq!(effective.source, PermissionSource::None);
    assert_eq!(effective.level, PermissionLevel::None);
}

#[tokio::test]
async fn test_public_file_grants_read_only() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_file(&db, "f1", "alice", true).await;

    let effective = service.effective("bob", "f1").await.unwrap();
    assert_eq!(effective.source, PermissionSource::Public);
    assert_eq!(effective.level, PermissionLevel::Reader);
    assert_eq!(effective.flags, CapabilityFlags::read_only());
    assert!(!effective.flags.contains(CapabilityFlags::WRITE));
    assert!(!effective.flags.contains(CapabilityFlags::SHARE));
}

#[tokio::test]
async fn test_private_file_defaults_to_deny() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_file(&db, "f1", "alice", false).await;

    let effective = service.effective("bob", "f1").await.unwrap();
    assert_eq!(effective.source, PermissionSource::None);
    assert_eq!(effective.level, PermissionLevel::None);
    assert!(effective.flags.is_empty());
}

#[tokio::test]
async fn test_granting_requires_manage() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_user(&db, "carol", false).await;
    insert_file(&db, "f1", "alice", false).await;

    let err = service
        .grant(
            &ctx("bob", false),
            "f1",
            "user",
            "carol",
            PermissionLevel::Reader,
            CapabilityFlags::READ,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_grant_rejects_past_expiry_and_bad_subject_type() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_file(&db, "f1", "alice", false).await;
    let actor = ctx("alice", false);

    let err = service
        .grant(
            &actor,
            "f1",
            "user",
            "bob",
            PermissionLevel::Reader,
            CapabilityFlags::READ,
            Some(Utc::now() - Duration::minutes(5)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = service
        .grant(
            &actor,
            "f1",
            "group",
            "bob",
            PermissionLevel::Reader,
            CapabilityFlags::READ,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn test_regrant_supersedes_previous_active_grant() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_file(&db, "f1", "alice", false).await;
    let actor = ctx("alice", false);

    let first = service
        .grant(
            &actor,
            "f1",
            "user",
            "bob",
            PermissionLevel::Reader,
            CapabilityFlags::READ,
            None,
        )
        .await
        .unwrap();
    let second = service
        .grant(
            &actor,
            "f1",
            "user",
            "bob",
            PermissionLevel::Writer,
            CapabilityFlags::READ | CapabilityFlags::WRITE,
            None,
        )
        .await
        .unwrap();
    assert_ne!(first.id, second.id);

    // Exactly one active row per (file, subject); the first is revoked
    // history, not deleted.
    let active = PermissionGrants::find()
        .filter(permission_grants::Column::FileId.eq("f1"))
        .filter(permission_grants::Column::SubjectId.eq("bob"))
        .filter(permission_grants::Column::IsActive.eq(true))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.id);

    let old = PermissionGrants::find_by_id(&first.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert!(!old.is_active);
    assert_eq!(old.revoke_reason.as_deref(), Some("superseded"));

    let effective = service.effective("bob", "f1").await.unwrap();
    assert_eq!(effective.level, PermissionLevel::Writer);
}

#[tokio::test]
async fn test_concurrent_grants_leave_one_active_row() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_file(&db, "f1", "alice", false).await;
    let actor = ctx("alice", false);

    // Two racing grants for the same (file, subject). Whichever lands
    // second must supersede the first, never sit beside it.
    let (a, b) = tokio::join!(
        service.grant(
            &actor,
            "f1",
            "user",
            "bob",
            PermissionLevel::Reader,
            CapabilityFlags::READ,
            None,
        ),
        service.grant(
            &actor,
            "f1",
            "user",
            "bob",
            PermissionLevel::Writer,
            CapabilityFlags::READ | CapabilityFlags::WRITE,
            None,
        ),
    );

    let mut granted = 0;
    for outcome in [a, b] {
        match outcome {
            Ok(_) => granted += 1,
            Err(e) => assert!(matches!(e, AppError::Conflict { .. })),
        }
    }
    assert!(granted >= 1);

    let active = PermissionGrants::find()
        .filter(permission_grants::Column::FileId.eq("f1"))
        .filter(permission_grants::Column::SubjectType.eq("user"))
        .filter(permission_grants::Column::SubjectId.eq("bob"))
        .filter(permission_grants::Column::IsActive.eq(true))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn test_revoke_is_idempotent() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_file(&db, "f1", "alice", false).await;
    let actor = ctx("alice", false);

    let grant = service
        .grant(
            &actor,
            "f1",
            "user",
            "bob",
            PermissionLevel::Reader,
            CapabilityFlags::READ,
            None,
        )
        .await
        .unwrap();

    service.revoke(&actor, &grant.id, "cleanup").await.unwrap();
    service.revoke(&actor, &grant.id, "again").await.unwrap();

    let stored = PermissionGrants::find_by_id(&grant.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.is_active);
    assert_eq!(stored.revoke_reason.as_deref(), Some("cleanup"));
}

#[tokio::test]
async fn test_update_with_stale_version_conflicts_and_leaves_row_unchanged() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_file(&db, "f1", "alice", false).await;
    let actor = ctx("alice", false);

    let grant = service
        .grant(
            &actor,
            "f1",
            "user",
            "bob",
            PermissionLevel::Reader,
            CapabilityFlags::READ,
            None,
        )
        .await
        .unwrap();
    assert_eq!(grant.version, 1);

    // First update succeeds and bumps the version.
    let new_version = service
        .update(
            &actor,
            &grant.id,
            1,
            Some(PermissionLevel::Commenter),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(new_version, 2);

    // A writer still holding version 1 must lose.
    let err = service
        .update(
            &actor,
            &grant.id,
            1,
            Some(PermissionLevel::Manager),
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict { current: 2 }));

    let stored = PermissionGrants::find_by_id(&grant.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.level, PermissionLevel::Commenter.as_i16());
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn test_update_can_clear_expiry() {
    let db = setup_test_db().await;
    let service = permission_service(&db);
    insert_user(&db, "alice", false).await;
    insert_user(&db, "bob", false).await;
    insert_file(&db, "f1", "alice", false).await;
    let actor = ctx("alice", false);

    let grant = service
        .grant(
            &actor,
            "f1",
            "user",
            "bob",
            PermissionLevel::Reader,
            CapabilityFlags::READ,
            Some(Utc::now() + Duration::hours(1)),
        )
        .await
        .unwrap();

    service
        .update(&actor, &grant.id, 1, None, None, Some(None))
        .await
        .unwrap();

    let stored = PermissionGrants::find_by_id(&grant.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.expires_at, None);
}
