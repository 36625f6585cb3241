//! SeaORM entity models
//!
//! Database entities for the relation tables

mod attachment;
mod entity_record;
mod snapshot;

pub use entity_record::{
    Entity as EntityRecordEntity,
    Model as EntityRecord,
    ActiveModel as EntityRecordActiveModel,
    Column as EntityRecordColumn,
};

pub use attachment::{
    Entity as AttachmentEntity,
    Model as AttachmentRow,
    ActiveModel as AttachmentActiveModel,
    Column as AttachmentColumn,
};

pub use snapshot::{
    Entity as SnapshotEntity,
    Model as SnapshotRow,
    ActiveModel as SnapshotActiveModel,
    Column as SnapshotColumn,
};
