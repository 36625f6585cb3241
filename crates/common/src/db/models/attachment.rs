//! Attachment row

use crate::errors::AppError;
use crate::rel::{Attachment, AttachmentPayload, EntityRef};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rel_attachments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub owner_kind: String,

    pub owner_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub family: String,

    /// e.g. `link:website`
    #[sea_orm(column_type = "Text")]
    pub kind: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub discriminant: Option<String>,

    /// Family-tagged payload as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: serde_json::Value,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Attachment {
    type Error = AppError;

    fn try_from(row: Model) -> std::result::Result<Self, AppError> {
        let payload: AttachmentPayload = serde_json::from_value(row.payload)?;
        Ok(Attachment {
            id: row.id,
            owner: EntityRef::new(row.owner_kind.parse()?, row.owner_id),
            payload,
            created_at: row.created_at.into(),
        })
    }
}
