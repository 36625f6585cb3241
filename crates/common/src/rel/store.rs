//! Storage seams
//!
//! The services only talk to these traits. [`crate::db::Repository`] backs
//! them with Postgres, [`crate::rel::MemoryStore`] keeps everything in
//! process for tests and tooling.

use crate::errors::Result;
use crate::rel::attachment::{Attachment, AttachmentPayload, AttachmentType};
use crate::rel::reference::{EntityRef, Trackable};
use crate::rel::snapshot::Snapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Resolves and persists owning entities
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Whether the referenced entity currently exists
    async fn exists(&self, entity: &EntityRef) -> Result<bool>;

    /// Insert or update the entity's stored state
    async fn write(&self, entity: &dyn Trackable) -> Result<()>;

    /// Remove the entity; `false` when it was not there
    async fn remove(&self, entity: &EntityRef) -> Result<bool>;
}

/// Persistence for attachments of every family
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Insert a new attachment.
    ///
    /// Fails with `Conflict` when another attachment of the same owner and
    /// family carries the same discriminant.
    async fn insert(&self, owner: &EntityRef, payload: AttachmentPayload) -> Result<Attachment>;

    async fn get(&self, id: Uuid) -> Result<Option<Attachment>>;

    /// All attachments of `owner`, oldest first
    async fn list(&self, owner: &EntityRef) -> Result<Vec<Attachment>>;

    async fn remove(&self, id: Uuid) -> Result<bool>;

    /// Remove every attachment of `owner`, returning how many went
    async fn remove_owner(&self, owner: &EntityRef) -> Result<u64>;

    /// Remove attachments of `family` created strictly before `cutoff`
    async fn remove_created_before(
        &self,
        family: AttachmentType,
        cutoff: DateTime<Utc>,
    ) -> Result<u64>;
}

/// Append-only audit log
#[async_trait]
pub trait SnapshotLog: Send + Sync {
    async fn append(
        &self,
        subject: &EntityRef,
        data: Option<serde_json::Value>,
        created_by: Option<Uuid>,
    ) -> Result<Snapshot>;

    /// Snapshots of `subject` ordered by creation time, then sequence
    async fn list(&self, subject: &EntityRef) -> Result<Vec<Snapshot>>;
}
