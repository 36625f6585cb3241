//! In-process stores
//!
//! Same contracts as the Postgres repository, held behind one lock. Entity
//! state is tracked by reference only; field documents live in snapshots.

use crate::clock::{system_clock, SharedClock};
use crate::errors::Result;
use crate::rel::attachment::{Attachment, AttachmentPayload, AttachmentType};
use crate::rel::reference::{EntityRef, Trackable};
use crate::rel::snapshot::Snapshot;
use crate::rel::store::{AttachmentStore, EntityStore, SnapshotLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct EntityState {
    revision: u64,
    updated_at: DateTime<Utc>,
    updated_by: Option<Uuid>,
}

#[derive(Default)]
struct State {
    entities: HashMap<EntityRef, EntityState>,
    attachments: Vec<Attachment>,
    snapshots: Vec<Snapshot>,
    next_sequence: i64,
}

/// Memory-backed [`EntityStore`], [`AttachmentStore`] and [`SnapshotLog`]
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    clock: SharedClock,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            clock,
        }
    }

    /// Register an entity without going through a save
    pub async fn seed(&self, entity: EntityRef) {
        let now = self.clock.now();
        self.state.write().await.entities.insert(
            entity,
            EntityState {
                revision: 0,
                updated_at: now,
                updated_by: None,
            },
        );
    }

    /// Number of writes seen for `entity`
    pub async fn revision(&self, entity: &EntityRef) -> Option<u64> {
        self.state
            .read()
            .await
            .entities
            .get(entity)
            .map(|state| state.revision)
    }

    pub async fn last_updated_by(&self, entity: &EntityRef) -> Option<Uuid> {
        self.state
            .read()
            .await
            .entities
            .get(entity)
            .and_then(|state| state.updated_by)
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn exists(&self, entity: &EntityRef) -> Result<bool> {
        Ok(self.state.read().await.entities.contains_key(entity))
    }

    async fn write(&self, entity: &dyn Trackable) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let entry = state
            .entities
            .entry(entity.entity_ref())
            .or_insert_with(|| EntityState {
                revision: 0,
                updated_at: now,
                updated_by: None,
            });
        entry.revision += 1;
        entry.updated_at = now;
        entry.updated_by = entity.updated_by();
        Ok(())
    }

    async fn remove(&self, entity: &EntityRef) -> Result<bool> {
        Ok(self.state.write().await.entities.remove(entity).is_some())
    }
}

#[async_trait]
impl AttachmentStore for MemoryStore {
    async fn insert(&self, owner: &EntityRef, payload: AttachmentPayload) -> Result<Attachment> {
        let mut state = self.state.write().await;

        if state
            .attachments
            .iter()
            .any(|existing| existing.collides_with(owner, &payload))
        {
            return Err(payload.conflict(owner));
        }

        let attachment = Attachment {
            id: Uuid::now_v7(),
            owner: *owner,
            payload,
            created_at: self.clock.now(),
        };
        state.attachments.push(attachment.clone());
        Ok(attachment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Attachment>> {
        Ok(self
            .state
            .read()
            .await
            .attachments
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn list(&self, owner: &EntityRef) -> Result<Vec<Attachment>> {
        let state = self.state.read().await;
        let mut attachments: Vec<Attachment> = state
            .attachments
            .iter()
            .filter(|a| a.owner == *owner)
            .cloned()
            .collect();
        // stable: equal stamps keep insertion order
        attachments.sort_by_key(|a| a.created_at);
        Ok(attachments)
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.attachments.len();
        state.attachments.retain(|a| a.id != id);
        Ok(state.attachments.len() != before)
    }

    async fn remove_owner(&self, owner: &EntityRef) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.attachments.len();
        state.attachments.retain(|a| a.owner != *owner);
        Ok((before - state.attachments.len()) as u64)
    }

    async fn remove_created_before(
        &self,
        family: AttachmentType,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.attachments.len();
        state
            .attachments
            .retain(|a| !(a.family() == family && a.created_at < cutoff));
        Ok((before - state.attachments.len()) as u64)
    }
}

#[async_trait]
impl SnapshotLog for MemoryStore {
    async fn append(
        &self,
        subject: &EntityRef,
        data: Option<serde_json::Value>,
        created_by: Option<Uuid>,
    ) -> Result<Snapshot> {
        let mut state = self.state.write().await;
        state.next_sequence += 1;
        let snapshot = Snapshot {
            id: Uuid::now_v7(),
            sequence: state.next_sequence,
            subject: *subject,
            data,
            created_by,
            created_at: self.clock.now(),
        };
        state.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn list(&self, subject: &EntityRef) -> Result<Vec<Snapshot>> {
        let state = self.state.read().await;
        let mut snapshots: Vec<Snapshot> = state
            .snapshots
            .iter()
            .filter(|s| s.subject == *subject)
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| (s.created_at, s.sequence));
        Ok(snapshots)
    }
}
