use crate::api::error::AppError;
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, UpdateMany};

/// Entities that carry an explicit optimistic-concurrency version column.
pub trait Versioned: EntityTrait {
    fn id_column() -> Self::Column;
    fn version_column() -> Self::Column;
    fn version_of(model: &<Self as EntityTrait>::Model) -> i64;
}

/// Outcome of a guarded conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// The mutation was applied; the row now carries this version.
    Applied { new_version: i64 },
    /// The stored version no longer matches what the caller read.
    /// Nothing was written.
    Conflict { current: i64 },
    /// No row with that id exists.
    Missing,
}

/// Apply `set` to the row with the given id only if its stored version
/// equals `expected_version`, bumping the version in the same statement.
///
/// This is a single conditional UPDATE; there is no window between the
/// check and the write, so concurrent writers cannot both succeed
/// against the same version. Conflicts are reported, never merged.
pub async fn update_with_version<E, C, F>(
    db: &C,
    id: &str,
    expected_version: i64,
    set: F,
) -> Result<VersionCheck, AppError>
where
    E: Versioned,
    C: ConnectionTrait,
    F: FnOnce(UpdateMany<E>) -> UpdateMany<E>,
{
    let update = E::update_many()
        .filter(E::id_column().eq(id))
        .filter(E::version_column().eq(expected_version))
        .col_expr(E::version_column(), Expr::col(E::version_column()).add(1));

    let result = set(update).exec(db).await?;

    if result.rows_affected > 0 {
        return Ok(VersionCheck::Applied {
            new_version: expected_version + 1,
        });
    }

    // The conditional write matched nothing: either the row is gone or
    // someone else moved the version. Re-read to tell the two apart.
    let current = E::find()
        .filter(E::id_column().eq(id))
        .one(db)
        .await?;

    match current {
        Some(model) => Ok(VersionCheck::Conflict {
            current: E::version_of(&model),
        }),
        None => Ok(VersionCheck::Missing),
    }
}

impl Versioned for crate::entities::sessions::Entity {
    fn id_column() -> Self::Column {
        crate::entities::sessions::Column::Id
    }

    fn version_column() -> Self::Column {
        crate::entities::sessions::Column::Version
    }

    fn version_of(model: &crate::entities::sessions::Model) -> i64 {
        model.version
    }
}

impl Versioned for crate::entities::permission_grants::Entity {
    fn id_column() -> Self::Column {
        crate::entities::permission_grants::Column::Id
    }

    fn version_column() -> Self::Column {
        crate::entities::permission_grants::Column::Version
    }

    fn version_of(model: &crate::entities::permission_grants::Model) -> i64 {
        model.version
    }
}

impl Versioned for crate::entities::share_links::Entity {
    fn id_column() -> Self::Column {
        crate::entities::share_links::Column::Id
    }

    fn version_column() -> Self::Column {
        crate::entities::share_links::Column::Version
    }

    fn version_of(model: &crate::entities::share_links::Model) -> i64 {
        model.version
    }
}
