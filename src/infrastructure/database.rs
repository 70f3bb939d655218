use crate::entities::{
    audit_logs, files, permission_grants, sessions, share_access_logs, share_links, user_roles,
    users,
};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::env;
use std::time::Duration;
use tracing::info;

pub async fn setup_database() -> anyhow::Result<DatabaseConnection> {
    let db_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    info!("📂 Database: {}", db_url);

    let mut opt = ConnectOptions::new(&db_url);
    opt.max_connections(100)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;

    info!("✅ Database connected successfully");

    run_migrations(&db).await?;
    crate::infrastructure::seed::seed_initial_data(&db).await?;

    Ok(db)
}

pub async fn run_migrations(db: &DatabaseConnection) -> anyhow::Result<()> {
    info!("🔄 Creating schema from entities...");

    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let stmts = vec![
        schema
            .create_table_from_entity(users::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(user_roles::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(files::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(sessions::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(permission_grants::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(share_links::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(share_access_logs::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(audit_logs::Entity)
            .if_not_exists()
            .to_owned(),
    ];

    for stmt in stmts {
        let stmt = builder.build(&stmt);
        let _ = db.execute(stmt).await;
    }

    // Indexes the entity derive does not generate. The partial unique
    // index is load-bearing: it is what holds "at most one active grant
    // per (file, subject)" against concurrent writers.
    let _ = db
        .execute(sea_orm::Statement::from_string(
            builder,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_permission_grants_subject ON permission_grants(file_id, subject_type, subject_id) WHERE is_active = TRUE;".to_string(),
        ))
        .await;

    let _ = db
        .execute(sea_orm::Statement::from_string(
            builder,
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_entity ON audit_logs(entity_type, entity_id, created_at);".to_string(),
        ))
        .await;

    Ok(())
}
