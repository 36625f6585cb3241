//! Generic relations
//!
//! Attachments and audit snapshots that can hang off any owning entity.

pub mod attachment;
pub mod cache;
pub mod memory;
pub mod reference;
pub mod service;
pub mod snapshot;
pub mod store;

pub use attachment::{
    Address, Attachment, AttachmentKind, AttachmentPayload, AttachmentType, FileRef, Invitation,
    InvitationType, Link, LinkType, Permission, PhoneNumber, PhoneType, Remark, Signature,
    TextEntry,
};
pub use cache::AttachmentCache;
pub use memory::MemoryStore;
pub use reference::{EntityKind, EntityRef, Trackable, Tracked};
pub use service::AttachmentService;
pub use snapshot::{EntityService, SaveListener, SaveOutcome, Snapshot, SnapshotRecorder};
pub use store::{AttachmentStore, EntityStore, SnapshotLog};
