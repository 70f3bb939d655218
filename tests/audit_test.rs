use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use workdesk_access::entities::audit_logs;
use workdesk_access::infrastructure::database;
use workdesk_access::services::audit_service::AuditService;

async fn setup_test_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    database::run_migrations(&db).await.unwrap();
    db
}

async fn insert_entry(db: &DatabaseConnection, id: &str, action: &str, age_mins: i64) {
    audit_logs::ActiveModel {
        id: Set(id.to_string()),
        actor_session_id: Set(None),
        entity_type: Set("session".to_string()),
        entity_id: Set("s1".to_string()),
        action: Set(action.to_string()),
        old_state: Set(None),
        new_state: Set(None),
        ip_address: Set(None),
        user_agent: Set(None),
        created_at: Set(Utc::now() - Duration::minutes(age_mins)),
    }
    .insert(db)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_history_is_ordered_oldest_first() {
    let db = setup_test_db().await;
    let service = AuditService::new(db.clone());

    // Inserted out of chronological order on purpose.
    insert_entry(&db, "a2", "deactivated", 10).await;
    insert_entry(&db, "a1", "issued", 60).await;
    insert_entry(&db, "a3", "expired", 1).await;

    let entries = service.history("session", "s1").await.unwrap();
    let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["issued", "deactivated", "expired"]);
}

#[tokio::test]
async fn test_history_is_scoped_to_one_entity() {
    let db = setup_test_db().await;
    let service = AuditService::new(db.clone());

    insert_entry(&db, "a1", "issued", 5).await;
    audit_logs::ActiveModel {
        id: Set("other".to_string()),
        actor_session_id: Set(None),
        entity_type: Set("share_link".to_string()),
        entity_id: Set("s1".to_string()),
        action: Set("created".to_string()),
        old_state: Set(None),
        new_state: Set(None),
        ip_address: Set(None),
        user_agent: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(&db)
    .await
    .unwrap();

    let entries = service.history("session", "s1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "issued");
}
