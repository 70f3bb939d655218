use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "share_links")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub file_id: String,
    pub created_by: String,
    #[sea_orm(unique)]
    pub share_token: String,
    /// "public", "email" or "internal"
    pub share_type: String,
    pub password_hash: Option<String>,
    pub allow_download: bool,
    pub allow_preview: bool,
    pub allow_comment: bool,
    pub allow_print: bool,
    /// 0 = unlimited
    pub max_downloads: i32,
    pub current_downloads: i32,
    /// 0 = unlimited
    pub max_views: i32,
    pub current_views: i32,
    pub expires_at: DateTimeUtc,
    pub last_accessed_at: Option<DateTimeUtc>,
    pub is_active: bool,
    pub revoked_at: Option<DateTimeUtc>,
    pub created_at: Option<DateTimeUtc>,
    pub version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::files::Entity",
        from = "Column::FileId",
        to = "super::files::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Files,
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::CreatedBy",
        to = "super::users::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Creator,
    #[sea_orm(has_many = "super::share_access_logs::Entity")]
    ShareAccessLogs,
}

impl Related<super::files::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Files.def()
    }
}

impl Related<super::share_access_logs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ShareAccessLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
