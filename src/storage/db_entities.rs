//! SeaORM entity model used by the database storage backend.
//!
//! Maps the single `sessions` table created by `database_storage`.

use sea_orm::entity::prelude::*;

/// Sessions table entity model.
///
/// One row per session: the opaque serialized record and the time of the
/// last write, which drives garbage collection.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    /// Raw session identifier
    #[sea_orm(primary_key, auto_increment = false, column_type = "String(StringLen::N(128))")]
    pub id: String,
    /// Serialized session record
    #[sea_orm(column_type = "Text")]
    pub contents: String,
    /// Refreshed on every write
    pub last_active: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
