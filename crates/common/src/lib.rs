//! T513 Common Library
//!
//! Shared code for the T513 community services including:
//! - The donation queue engine (sessions, queue accrual, redemption codes)
//! - Database models and repository patterns
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities
//! - Metrics and observability

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod donation;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use donation::DonationEngine;
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
