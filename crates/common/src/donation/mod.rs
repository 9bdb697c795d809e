//! Donation queue engine
//!
//! - `accrual`: pure reward arithmetic over join timestamps
//! - `code`: redemption code generation and matching
//! - `engine`: session lifecycle (start, code, pause, join, leave, redeem, stop, end)
//! - `status`: read-only projections consumed by polling clients

pub mod accrual;
pub mod code;
mod engine;
pub mod status;

pub use accrual::{accrual_at, Accrual, REWARD_INTERVAL_SECS};
pub use engine::DonationEngine;
pub use status::{AvatarResolver, DonationStatus, QueueEntryView, Standing};
