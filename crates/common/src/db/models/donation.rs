//! Donation session entity
//!
//! One row per donation event. At most one row may have `is_active = true`;
//! the `donations_single_active` partial index enforces it.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "donations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub start_time: DateTimeWithTimeZone,

    pub end_time: Option<DateTimeWithTimeZone>,

    pub is_active: bool,

    /// Single-use redemption code, cleared once redeemed
    #[sea_orm(nullable)]
    pub current_code: Option<String>,

    pub queue_stopped: bool,

    pub queue_paused: bool,

    /// Standings frozen when the queue was stopped
    #[sea_orm(column_type = "Json", nullable)]
    pub queue_results: Option<Json>,
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
