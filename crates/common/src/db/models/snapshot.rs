//! Audit snapshot row

use crate::errors::AppError;
use crate::rel::{EntityRef, Snapshot};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rel_snapshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Assigned by the database (BIGSERIAL)
    pub sequence: i64,

    #[sea_orm(column_type = "Text")]
    pub subject_kind: String,

    pub subject_id: Uuid,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub data: Option<serde_json::Value>,

    pub created_by: Option<Uuid>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Snapshot {
    type Error = AppError;

    fn try_from(row: Model) -> std::result::Result<Self, AppError> {
        Ok(Snapshot {
            id: row.id,
            sequence: row.sequence,
            subject: EntityRef::new(row.subject_kind.parse()?, row.subject_id),
            data: row.data,
            created_by: row.created_by,
            created_at: row.created_at.into(),
        })
    }
}
