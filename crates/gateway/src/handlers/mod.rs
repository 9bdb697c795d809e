//! API handlers module

pub mod donations;
pub mod health;
