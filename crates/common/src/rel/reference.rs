//! Polymorphic references
//!
//! An [`EntityRef`] names any owning entity by `(kind, id)`. Attachments and
//! snapshots point at their owner through one of these instead of a foreign
//! key, so the kind set is closed and checked at compile time.

use crate::errors::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Type of an owning entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Education,
    Place,
    EducationPlace,
    Institution,
    Project,
    ProjectPlace,
    Program,
    Track,
    Internship,
    Student,
    Contact,
    User,
    Snapshot,
}

impl EntityKind {
    pub const ALL: [EntityKind; 13] = [
        EntityKind::Education,
        EntityKind::Place,
        EntityKind::EducationPlace,
        EntityKind::Institution,
        EntityKind::Project,
        EntityKind::ProjectPlace,
        EntityKind::Program,
        EntityKind::Track,
        EntityKind::Internship,
        EntityKind::Student,
        EntityKind::Contact,
        EntityKind::User,
        EntityKind::Snapshot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Education => "education",
            EntityKind::Place => "place",
            EntityKind::EducationPlace => "education_place",
            EntityKind::Institution => "institution",
            EntityKind::Project => "project",
            EntityKind::ProjectPlace => "project_place",
            EntityKind::Program => "program",
            EntityKind::Track => "track",
            EntityKind::Internship => "internship",
            EntityKind::Student => "student",
            EntityKind::Contact => "contact",
            EntityKind::User => "user",
            EntityKind::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::InvalidFormat {
                message: format!("unknown entity kind '{}'", s),
            })
    }
}

/// Reference to one owning entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: Uuid) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A persisted entity with a static kind
///
/// Everything saved through [`crate::rel::EntityService`] implements this;
/// [`Trackable`] comes for free.
pub trait Tracked: Serialize + Send + Sync {
    const KIND: EntityKind;

    fn id(&self) -> Uuid;

    /// User responsible for the latest change, if known
    fn updated_by(&self) -> Option<Uuid> {
        None
    }
}

/// Object-safe view of a tracked entity, handed to stores and listeners
pub trait Trackable: Send + Sync {
    fn entity_ref(&self) -> EntityRef;

    fn updated_by(&self) -> Option<Uuid>;

    /// Structural copy of the current field values
    fn to_document(&self) -> serde_json::Result<serde_json::Value>;
}

impl<T: Tracked> Trackable for T {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(T::KIND, self.id())
    }

    fn updated_by(&self) -> Option<Uuid> {
        Tracked::updated_by(self)
    }

    fn to_document(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
