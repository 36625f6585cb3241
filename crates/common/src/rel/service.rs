//! Attachment operations on behalf of an owner

use crate::errors::{AppError, Result};
use crate::metrics;
use crate::rel::attachment::{Attachment, AttachmentKind, AttachmentPayload, AttachmentType};
use crate::rel::cache::AttachmentCache;
use crate::rel::reference::EntityRef;
use crate::rel::snapshot::Snapshot;
use crate::rel::store::{AttachmentStore, EntityStore, SnapshotLog};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attach, look up and detach records on any owning entity
#[derive(Clone)]
pub struct AttachmentService {
    entities: Arc<dyn EntityStore>,
    attachments: Arc<dyn AttachmentStore>,
    snapshots: Option<Arc<dyn SnapshotLog>>,
}

impl AttachmentService {
    pub fn new(entities: Arc<dyn EntityStore>, attachments: Arc<dyn AttachmentStore>) -> Self {
        Self {
            entities,
            attachments,
            snapshots: None,
        }
    }

    /// Snapshot the owner whenever a remark is attached
    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotLog>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Validate `payload` and bind it to `owner`
    pub async fn attach(&self, owner: &EntityRef, mut payload: AttachmentPayload) -> Result<Attachment> {
        payload.normalize();
        payload.issue_identifiers();
        payload.validate()?;

        if !self.entities.exists(owner).await? {
            return Err(AppError::OwnerNotFound {
                owner: owner.to_string(),
            });
        }

        let family = payload.family();
        let attachment = match self.attachments.insert(owner, payload).await {
            Ok(attachment) => attachment,
            Err(e @ AppError::Conflict { .. }) => {
                metrics::record_attachment_conflict(family.as_str());
                warn!(owner = %owner, family = %family, error = %e, "Attachment rejected");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        metrics::record_attachment_created(family.as_str());
        info!(
            owner = %owner,
            attachment_id = %attachment.id,
            kind = %attachment.kind(),
            "Attachment created"
        );

        if let AttachmentPayload::Remark(remark) = &attachment.payload {
            self.snapshot_owner(owner, remark.created_by).await;
        }

        Ok(attachment)
    }

    /// Record the owner's last known state again, attributed to `created_by`.
    ///
    /// Best effort: the remark is already stored.
    async fn snapshot_owner(&self, owner: &EntityRef, created_by: Option<Uuid>) {
        let Some(log) = &self.snapshots else {
            return;
        };

        let result: Result<Snapshot> = async {
            let latest = log.list(owner).await?.pop().and_then(|s| s.data);
            log.append(owner, latest, created_by).await
        }
        .await;

        match result {
            Ok(snapshot) => {
                metrics::record_snapshot(owner.kind.as_str(), true);
                debug!(owner = %owner, sequence = snapshot.sequence, "Owner snapshot after remark");
            }
            Err(e) => {
                metrics::record_snapshot(owner.kind.as_str(), false);
                warn!(owner = %owner, error = %e, "Unable to snapshot owner after remark");
            }
        }
    }

    /// Every attachment of `owner`, oldest first.
    ///
    /// An owner that no longer exists has no attachments.
    pub async fn list(&self, owner: &EntityRef) -> Result<Vec<Attachment>> {
        if !self.entities.exists(owner).await? {
            debug!(owner = %owner, "Listing attachments of missing owner");
            return Ok(Vec::new());
        }
        self.attachments.list(owner).await
    }

    pub async fn list_family(&self, owner: &EntityRef, family: AttachmentType) -> Result<Vec<Attachment>> {
        Ok(self
            .list(owner)
            .await?
            .into_iter()
            .filter(|a| a.family() == family)
            .collect())
    }

    /// First attachment of `kind`, read through a fresh [`AttachmentCache`]
    pub async fn find_by_kind(&self, owner: &EntityRef, kind: AttachmentKind) -> Result<Option<Attachment>> {
        let mut cache = AttachmentCache::new(*owner);
        Ok(cache.find(self, kind).await?.cloned())
    }

    pub async fn get(&self, id: Uuid) -> Result<Attachment> {
        self.attachments
            .get(id)
            .await?
            .ok_or_else(|| AppError::AttachmentNotFound { id: id.to_string() })
    }

    /// File of `owner` carrying `code`
    pub async fn get_file(&self, owner: &EntityRef, code: &str) -> Result<Option<Attachment>> {
        Ok(self.list_family(owner, AttachmentType::File).await?.into_iter().find(|a| {
            a.as_file()
                .and_then(|f| f.code.as_deref())
                .is_some_and(|c| c == code)
        }))
    }

    /// Newest version of the text entry `code`
    pub async fn get_text(&self, owner: &EntityRef, code: &str) -> Result<Option<Attachment>> {
        Ok(self
            .list_family(owner, AttachmentType::Text)
            .await?
            .into_iter()
            .filter(|a| a.as_text().is_some_and(|t| t.code == code))
            .max_by_key(|a| a.as_text().map(|t| t.version)))
    }

    /// Remove one attachment. Signatures are append-only.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let attachment = self.get(id).await?;
        if attachment.payload.is_immutable() {
            return Err(AppError::Immutable {
                resource: attachment.family().to_string(),
            });
        }

        if !self.attachments.remove(id).await? {
            return Err(AppError::AttachmentNotFound { id: id.to_string() });
        }
        metrics::record_attachments_deleted("explicit", 1);
        info!(attachment_id = %id, "Attachment deleted");
        Ok(())
    }

    /// Drop every attachment of `family` created before `cutoff`
    pub async fn purge_created_before(&self, family: AttachmentType, cutoff: DateTime<Utc>) -> Result<u64> {
        if family == AttachmentType::Signature {
            return Err(AppError::Immutable {
                resource: family.to_string(),
            });
        }
        let removed = self.attachments.remove_created_before(family, cutoff).await?;
        if removed > 0 {
            metrics::record_attachments_deleted("expired", removed);
        }
        Ok(removed)
    }
}
