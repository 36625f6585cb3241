//! API handlers module

pub mod attachments;
pub mod health;
pub mod snapshots;
