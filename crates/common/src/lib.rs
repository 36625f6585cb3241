//! Placement Common Library
//!
//! Shared code for the Placement services including:
//! - Polymorphic attachments (links, files, invitations, ...)
//! - Audit snapshots of saved entities
//! - Field encryption
//! - Database models and repository
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod clock;
pub mod config;
pub mod crypto;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod rel;
pub mod tasks;
pub mod validity;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};
pub use rel::{AttachmentService, EntityKind, EntityRef, EntityService};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
