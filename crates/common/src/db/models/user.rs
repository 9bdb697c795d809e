//! Community member entity (only the columns the donation engine touches)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Habbo nickname, also used to derive the avatar image
    #[sea_orm(unique)]
    pub nickname: String,

    pub points: i32,

    /// Only ever incremented
    pub donation_participations: i32,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::queue_entry::Entity")]
    QueueEntries,
}

impl Related<super::queue_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QueueEntries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
