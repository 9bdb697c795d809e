//! SeaORM entity models
//!
//! Database entities for the donation queue

mod donation;
mod queue_entry;
mod user;

pub use donation::{
    Entity as DonationEntity,
    Model as Donation,
    ActiveModel as DonationActiveModel,
    Column as DonationColumn,
};

pub use queue_entry::{
    Entity as QueueEntryEntity,
    Model as QueueEntry,
    ActiveModel as QueueEntryActiveModel,
    Column as QueueEntryColumn,
};

pub use user::{
    Entity as UserEntity,
    Model as User,
    ActiveModel as UserActiveModel,
    Column as UserColumn,
};
