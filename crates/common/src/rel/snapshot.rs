//! Audit snapshots
//!
//! Every successful save of a tracked entity appends a structural copy of
//! its fields to the [`SnapshotLog`]. Recording is best effort: the save
//! has already happened when listeners run, and their failures are reported
//! next to the save result instead of undoing it.

use crate::errors::{AppError, Result};
use crate::metrics;
use crate::rel::reference::{EntityKind, EntityRef, Trackable, Tracked};
use crate::rel::store::{AttachmentStore, EntityStore, SnapshotLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Stored copy of an entity's state at one save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    /// Monotonic, breaks ties between equal `created_at`
    pub sequence: i64,
    pub subject: EntityRef,
    /// `None` when the state could not be serialized
    pub data: Option<serde_json::Value>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Tracked for Snapshot {
    const KIND: EntityKind = EntityKind::Snapshot;

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_by(&self) -> Option<Uuid> {
        self.created_by
    }
}

/// Hook run after an entity has been written
#[async_trait]
pub trait SaveListener: Send + Sync {
    async fn after_save(&self, entity: &dyn Trackable) -> Result<()>;
}

/// Appends a snapshot for every save
#[derive(Clone)]
pub struct SnapshotRecorder {
    log: Arc<dyn SnapshotLog>,
}

impl SnapshotRecorder {
    pub fn new(log: Arc<dyn SnapshotLog>) -> Self {
        Self { log }
    }

    /// Record the current state of `entity`.
    ///
    /// Snapshots themselves are never snapshotted (`Ok(None)`). When the
    /// state cannot be serialized an empty snapshot still marks the save and
    /// the serialization error is returned.
    pub async fn record(&self, entity: &dyn Trackable) -> Result<Option<Snapshot>> {
        let subject = entity.entity_ref();
        if subject.kind == EntityKind::Snapshot {
            debug!(subject = %subject, "Skipping snapshot of a snapshot");
            return Ok(None);
        }

        match entity.to_document() {
            Ok(data) => {
                let snapshot = self
                    .log
                    .append(&subject, Some(data), entity.updated_by())
                    .await?;
                metrics::record_snapshot(subject.kind.as_str(), true);
                debug!(subject = %subject, sequence = snapshot.sequence, "Snapshot recorded");
                Ok(Some(snapshot))
            }
            Err(e) => {
                metrics::record_snapshot(subject.kind.as_str(), false);
                error!(
                    subject = %subject,
                    error = %e,
                    "Unable to serialize entity state, recording empty snapshot"
                );
                if let Err(append_err) = self.log.append(&subject, None, entity.updated_by()).await {
                    error!(subject = %subject, error = %append_err, "Unable to record empty snapshot");
                }
                Err(AppError::Serialization(e))
            }
        }
    }
}

#[async_trait]
impl SaveListener for SnapshotRecorder {
    async fn after_save(&self, entity: &dyn Trackable) -> Result<()> {
        self.record(entity).await.map(|_| ())
    }
}

/// Result of [`EntityService::save`]
#[derive(Debug)]
pub struct SaveOutcome {
    pub subject: EntityRef,
    /// Listener failures; the entity itself was stored
    pub audit_errors: Vec<AppError>,
}

impl SaveOutcome {
    pub fn is_clean(&self) -> bool {
        self.audit_errors.is_empty()
    }
}

/// Saves and deletes owning entities, keeping attachments and the audit
/// log in step
#[derive(Clone)]
pub struct EntityService {
    entities: Arc<dyn EntityStore>,
    attachments: Arc<dyn AttachmentStore>,
    snapshots: Arc<dyn SnapshotLog>,
    listeners: Vec<Arc<dyn SaveListener>>,
}

impl EntityService {
    /// Service with the snapshot recorder installed
    pub fn new(
        entities: Arc<dyn EntityStore>,
        attachments: Arc<dyn AttachmentStore>,
        snapshots: Arc<dyn SnapshotLog>,
    ) -> Self {
        let recorder: Arc<dyn SaveListener> = Arc::new(SnapshotRecorder::new(snapshots.clone()));
        Self {
            entities,
            attachments,
            snapshots,
            listeners: vec![recorder],
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn SaveListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Persist `entity`, then notify every listener.
    ///
    /// Only a failed write is an error. Listener failures end up in
    /// [`SaveOutcome::audit_errors`].
    pub async fn save(&self, entity: &dyn Trackable) -> Result<SaveOutcome> {
        let subject = entity.entity_ref();
        self.entities.write(entity).await?;

        let results = join_all(self.listeners.iter().map(|l| l.after_save(entity))).await;
        let audit_errors: Vec<AppError> = results.into_iter().filter_map(|r| r.err()).collect();

        for e in &audit_errors {
            warn!(subject = %subject, error = %e, "Save listener failed");
        }
        debug!(subject = %subject, "Entity saved");

        Ok(SaveOutcome {
            subject,
            audit_errors,
        })
    }

    /// Delete the entity and every attachment it owns. Snapshots stay.
    pub async fn delete(&self, subject: &EntityRef) -> Result<()> {
        if !self.entities.remove(subject).await? {
            return Err(AppError::NotFound {
                resource_type: subject.kind.to_string(),
                id: subject.id.to_string(),
            });
        }

        let removed = self.attachments.remove_owner(subject).await?;
        if removed > 0 {
            metrics::record_attachments_deleted("owner_deleted", removed);
        }
        info!(subject = %subject, attachments = removed, "Entity deleted");
        Ok(())
    }

    /// Audit history of `subject`, oldest first
    pub async fn list_snapshots(&self, subject: &EntityRef) -> Result<Vec<Snapshot>> {
        self.snapshots.list(subject).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rel::attachment::{AttachmentPayload, Link, LinkType};
    use crate::rel::memory::MemoryStore;
    use crate::rel::service::AttachmentService;
    use serde::Serializer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Serialize)]
    struct Place {
        id: Uuid,
        name: String,
        updated_by: Option<Uuid>,
    }

    impl Tracked for Place {
        const KIND: EntityKind = EntityKind::Place;

        fn id(&self) -> Uuid {
            self.id
        }

        fn updated_by(&self) -> Option<Uuid> {
            self.updated_by
        }
    }

    /// Entity whose state never serializes
    struct Broken {
        id: Uuid,
    }

    impl Serialize for Broken {
        fn serialize<S: Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("unsupported field"))
        }
    }

    impl Tracked for Broken {
        const KIND: EntityKind = EntityKind::Program;

        fn id(&self) -> Uuid {
            self.id
        }
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl SaveListener for Counting {
        async fn after_save(&self, _: &dyn Trackable) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service(store: &MemoryStore) -> EntityService {
        EntityService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        )
    }

    fn place(name: &str) -> Place {
        Place {
            id: Uuid::new_v4(),
            name: name.into(),
            updated_by: None,
        }
    }

    #[tokio::test]
    async fn test_each_save_appends_a_snapshot() {
        let store = MemoryStore::with_clock(Arc::new(ManualClock::new(Utc::now())));
        let service = service(&store);
        let editor = Uuid::new_v4();
        let mut p = place("UZ Gent");

        assert!(service.save(&p).await.unwrap().is_clean());
        p.name = "UZ Gent - Pediatrie".into();
        p.updated_by = Some(editor);
        service.save(&p).await.unwrap();

        let history = service.list_snapshots(&p.entity_ref()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].data.as_ref().unwrap()["name"], "UZ Gent");
        assert_eq!(history[1].data.as_ref().unwrap()["name"], "UZ Gent - Pediatrie");
        assert_eq!(history[1].created_by, Some(editor));
        assert!(history[0].sequence < history[1].sequence);
        assert_eq!(store.revision(&p.entity_ref()).await, Some(2));
    }

    #[tokio::test]
    async fn test_snapshots_are_not_snapshotted() {
        let store = MemoryStore::new();
        let recorder = SnapshotRecorder::new(Arc::new(store.clone()));
        let p = place("AZ Sint-Jan");
        let snapshot = recorder.record(&p).await.unwrap().unwrap();

        assert!(recorder.record(&snapshot).await.unwrap().is_none());
        assert!(SnapshotLog::list(&store, &snapshot.entity_ref())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_serialization_failure_keeps_save() {
        let store = MemoryStore::new();
        let service = service(&store);
        let broken = Broken { id: Uuid::new_v4() };

        let outcome = service.save(&broken).await.unwrap();
        assert_eq!(outcome.audit_errors.len(), 1);
        assert!(matches!(outcome.audit_errors[0], AppError::Serialization(_)));

        let subject = broken.entity_ref();
        assert!(EntityStore::exists(&store, &subject).await.unwrap());
        let history = service.list_snapshots(&subject).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].data.is_none());
    }

    /// Log that refuses every write
    struct ReadOnlyLog;

    #[async_trait]
    impl SnapshotLog for ReadOnlyLog {
        async fn append(
            &self,
            _: &EntityRef,
            _: Option<serde_json::Value>,
            _: Option<Uuid>,
        ) -> Result<Snapshot> {
            Err(AppError::Internal {
                message: "snapshot log is read-only".into(),
            })
        }

        async fn list(&self, _: &EntityRef) -> Result<Vec<Snapshot>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_serialization_error_survives_failed_empty_snapshot() {
        let recorder = SnapshotRecorder::new(Arc::new(ReadOnlyLog));
        let err = recorder.record(&Broken { id: Uuid::new_v4() }).await.unwrap_err();
        assert!(matches!(err, AppError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_extra_listeners_run() {
        let store = MemoryStore::new();
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let service = service(&store).with_listener(counter.clone());

        service.save(&place("Jan Palfijn")).await.unwrap();
        service.save(&place("Maria Middelares")).await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delete_cascades_attachments_and_keeps_history() {
        let store = MemoryStore::new();
        let service = service(&store);
        let attachments = AttachmentService::new(Arc::new(store.clone()), Arc::new(store.clone()));
        let p = place("AZ Groeninge");
        let subject = p.entity_ref();

        service.save(&p).await.unwrap();
        let link = attachments
            .attach(
                &subject,
                AttachmentPayload::Link(Link {
                    link_type: LinkType::Website,
                    url: "https://www.azgroeninge.be".into(),
                }),
            )
            .await
            .unwrap();

        service.delete(&subject).await.unwrap();

        assert!(attachments.list(&subject).await.unwrap().is_empty());
        assert!(AttachmentStore::get(&store, link.id).await.unwrap().is_none());
        assert_eq!(service.list_snapshots(&subject).await.unwrap().len(), 1);

        let err = service.delete(&subject).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }
}
