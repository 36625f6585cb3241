//! Repository pattern for database operations
//!
//! Backs the entity registry, attachment store and snapshot log with
//! Postgres through SeaORM.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::rel::{
    Attachment, AttachmentPayload, AttachmentStore, AttachmentType, EntityRef, EntityStore,
    Snapshot, SnapshotLog, Trackable,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbBackend,
    DbErr, EntityTrait, NotSet, QueryFilter, QueryOrder, Set, SqlErr, Statement,
    TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

fn unique_violation(err: DbErr, conflict: impl FnOnce() -> AppError) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => conflict(),
        _ => AppError::Database(err),
    }
}

/// Rows an insert of `payload` on `owner` would collide with, if any can
fn collision_filter(owner: &EntityRef, payload: &AttachmentPayload) -> Option<Condition> {
    let mut clash = Condition::any();
    let mut bounded = false;

    if let Some(discriminant) = payload.discriminant() {
        clash = clash.add(
            Condition::all()
                .add(AttachmentColumn::OwnerKind.eq(owner.kind.as_str()))
                .add(AttachmentColumn::OwnerId.eq(owner.id))
                .add(AttachmentColumn::Family.eq(payload.family().as_str()))
                .add(AttachmentColumn::Discriminant.eq(discriminant)),
        );
        bounded = true;
    }

    if let Some(key) = payload.global_key() {
        clash = clash.add(
            Condition::all()
                .add(AttachmentColumn::Family.is_in([
                    AttachmentType::Invitation.as_str(),
                    AttachmentType::Signature.as_str(),
                ]))
                .add(Expr::cust_with_values("payload ->> 'uuid' = $1", [key.to_string()])),
        );
        bounded = true;
    }

    bounded.then_some(clash)
}

// ============================================================================
// Entity Operations
// ============================================================================

#[async_trait]
impl EntityStore for Repository {
    async fn exists(&self, entity: &EntityRef) -> Result<bool> {
        // primary: an attach right after a save must see the row
        let found = EntityRecordEntity::find_by_id((entity.kind.as_str().to_string(), entity.id))
            .one(self.write_conn())
            .await?;
        Ok(found.is_some())
    }

    async fn write(&self, entity: &dyn Trackable) -> Result<()> {
        let subject = entity.entity_ref();
        let now = Utc::now();

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO entities (kind, id, revision, updated_by, created_at, updated_at)
            VALUES ($1, $2, 1, $3, $4, $4)
            ON CONFLICT (kind, id) DO UPDATE SET
                revision = entities.revision + 1,
                updated_by = EXCLUDED.updated_by,
                updated_at = EXCLUDED.updated_at
            "#,
            vec![
                subject.kind.as_str().into(),
                subject.id.into(),
                entity.updated_by().into(),
                now.into(),
            ],
        );

        self.write_conn().execute(stmt).await?;
        debug!(subject = %subject, "Entity row written");
        Ok(())
    }

    async fn remove(&self, entity: &EntityRef) -> Result<bool> {
        let txn = self.write_conn().begin().await?;

        AttachmentEntity::delete_many()
            .filter(AttachmentColumn::OwnerKind.eq(entity.kind.as_str()))
            .filter(AttachmentColumn::OwnerId.eq(entity.id))
            .exec(&txn)
            .await?;

        let result = EntityRecordEntity::delete_by_id((entity.kind.as_str().to_string(), entity.id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(result.rows_affected > 0)
    }
}

// ============================================================================
// Attachment Operations
// ============================================================================

#[async_trait]
impl AttachmentStore for Repository {
    async fn insert(&self, owner: &EntityRef, payload: AttachmentPayload) -> Result<Attachment> {
        let row = AttachmentActiveModel {
            id: Set(Uuid::now_v7()),
            owner_kind: Set(owner.kind.as_str().to_string()),
            owner_id: Set(owner.id),
            family: Set(payload.family().as_str().to_string()),
            kind: Set(payload.kind().to_string()),
            discriminant: Set(payload.discriminant()),
            payload: Set(serde_json::to_value(&payload)?),
            created_at: Set(Utc::now().into()),
        };

        let txn = self.write_conn().begin().await?;

        // The unique indexes still catch inserts racing past this check
        if let Some(clash) = collision_filter(owner, &payload) {
            let existing = AttachmentEntity::find().filter(clash).one(&txn).await?;
            if existing.is_some() {
                return Err(payload.conflict(owner));
            }
        }

        let inserted = row
            .insert(&txn)
            .await
            .map_err(|e| unique_violation(e, || payload.conflict(owner)))?;
        txn.commit().await?;

        inserted.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Attachment>> {
        AttachmentEntity::find_by_id(id)
            .one(self.read_conn())
            .await?
            .map(Attachment::try_from)
            .transpose()
    }

    async fn list(&self, owner: &EntityRef) -> Result<Vec<Attachment>> {
        AttachmentEntity::find()
            .filter(AttachmentColumn::OwnerKind.eq(owner.kind.as_str()))
            .filter(AttachmentColumn::OwnerId.eq(owner.id))
            .order_by_asc(AttachmentColumn::CreatedAt)
            .order_by_asc(AttachmentColumn::Id)
            .all(self.read_conn())
            .await?
            .into_iter()
            .map(Attachment::try_from)
            .collect()
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let result = AttachmentEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn remove_owner(&self, owner: &EntityRef) -> Result<u64> {
        let result = AttachmentEntity::delete_many()
            .filter(AttachmentColumn::OwnerKind.eq(owner.kind.as_str()))
            .filter(AttachmentColumn::OwnerId.eq(owner.id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected)
    }

    async fn remove_created_before(
        &self,
        family: AttachmentType,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let result = AttachmentEntity::delete_many()
            .filter(AttachmentColumn::Family.eq(family.as_str()))
            .filter(AttachmentColumn::CreatedAt.lt(cutoff))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected)
    }
}

// ============================================================================
// Snapshot Operations
// ============================================================================

#[async_trait]
impl SnapshotLog for Repository {
    async fn append(
        &self,
        subject: &EntityRef,
        data: Option<serde_json::Value>,
        created_by: Option<Uuid>,
    ) -> Result<Snapshot> {
        let row = SnapshotActiveModel {
            id: Set(Uuid::now_v7()),
            sequence: NotSet,
            subject_kind: Set(subject.kind.as_str().to_string()),
            subject_id: Set(subject.id),
            data: Set(data),
            created_by: Set(created_by),
            created_at: Set(Utc::now().into()),
        };

        row.insert(self.write_conn()).await?.try_into()
    }

    async fn list(&self, subject: &EntityRef) -> Result<Vec<Snapshot>> {
        SnapshotEntity::find()
            .filter(SnapshotColumn::SubjectKind.eq(subject.kind.as_str()))
            .filter(SnapshotColumn::SubjectId.eq(subject.id))
            .order_by_asc(SnapshotColumn::CreatedAt)
            .order_by_asc(SnapshotColumn::Sequence)
            .all(self.read_conn())
            .await?
            .into_iter()
            .map(Snapshot::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rel::{EntityKind, Invitation, InvitationType, Link, LinkType};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn repository(db: DatabaseConnection) -> Repository {
        Repository::new(DbPool::from_connection(db))
    }

    fn row(owner: &EntityRef, payload: &AttachmentPayload) -> AttachmentRow {
        AttachmentRow {
            id: Uuid::now_v7(),
            owner_kind: owner.kind.as_str().into(),
            owner_id: owner.id,
            family: payload.family().as_str().into(),
            kind: payload.kind().to_string(),
            discriminant: payload.discriminant(),
            payload: serde_json::to_value(payload).unwrap(),
            created_at: Utc::now().into(),
        }
    }

    fn link_row(owner: &EntityRef, url: &str) -> AttachmentRow {
        row(
            owner,
            &AttachmentPayload::Link(Link {
                link_type: LinkType::Website,
                url: url.into(),
            }),
        )
    }

    fn invitation(email: &str) -> AttachmentPayload {
        AttachmentPayload::Invitation(Invitation::new(InvitationType::Contact, "Mentor", email, None))
    }

    #[tokio::test]
    async fn test_insert_reports_existing_row_as_conflict() {
        let owner = EntityRef::new(EntityKind::Place, Uuid::new_v4());
        let other = EntityRef::new(EntityKind::Project, Uuid::new_v4());
        let payload = invitation("mentor@example.org");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![row(&other, &payload)]])
            .into_connection();

        let err = repository(db).insert(&owner, payload).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_insert_without_clash_stores_row() {
        let owner = EntityRef::new(EntityKind::Place, Uuid::new_v4());
        let payload = invitation("mentor@example.org");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<AttachmentRow>::new(), vec![row(&owner, &payload)]])
            .into_connection();

        let attachment = repository(db).insert(&owner, payload.clone()).await.unwrap();
        assert_eq!(attachment.owner, owner);
        assert_eq!(attachment.payload, payload);
    }

    #[tokio::test]
    async fn test_remove_entity_clears_attachments_first() {
        let subject = EntityRef::new(EntityKind::Place, Uuid::new_v4());
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 2,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
            ])
            .into_connection();
        assert!(EntityStore::remove(&repository(db), &subject).await.unwrap());

        // Orphaned attachments are still swept when the entity row is gone
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 3,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                },
            ])
            .into_connection();
        assert!(!EntityStore::remove(&repository(db), &subject).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_maps_rows() {
        let owner = EntityRef::new(EntityKind::Place, Uuid::new_v4());
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![
                link_row(&owner, "https://a.example"),
                link_row(&owner, "https://b.example"),
            ]])
            .into_connection();

        let attachments = AttachmentStore::list(&repository(db), &owner).await.unwrap();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].owner, owner);
        assert_eq!(attachments[1].as_link().unwrap().url, "https://b.example");
    }

    #[tokio::test]
    async fn test_unknown_owner_kind_is_rejected() {
        let owner = EntityRef::new(EntityKind::Place, Uuid::new_v4());
        let mut row = link_row(&owner, "https://a.example");
        row.owner_kind = "planet".into();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![row]])
            .into_connection();

        let err = AttachmentStore::get(&repository(db), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidFormat { .. }));
    }

    #[tokio::test]
    async fn test_append_snapshot_returns_sequence() {
        let subject = EntityRef::new(EntityKind::Program, Uuid::new_v4());
        let row = SnapshotRow {
            id: Uuid::now_v7(),
            sequence: 42,
            subject_kind: "program".into(),
            subject_id: subject.id,
            data: Some(serde_json::json!({ "name": "Bachelor Verpleegkunde" })),
            created_by: None,
            created_at: Utc::now().into(),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![row]])
            .into_connection();

        let snapshot = repository(db)
            .append(&subject, Some(serde_json::json!({ "name": "Bachelor Verpleegkunde" })), None)
            .await
            .unwrap();
        assert_eq!(snapshot.sequence, 42);
        assert_eq!(snapshot.subject, subject);
    }

    #[tokio::test]
    async fn test_missing_entity() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<EntityRecord>::new()])
            .into_connection();

        let subject = EntityRef::new(EntityKind::Track, Uuid::new_v4());
        assert!(!repository(db).exists(&subject).await.unwrap());
    }
}
