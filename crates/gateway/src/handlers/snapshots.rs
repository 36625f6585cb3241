//! Audit history handlers

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::AppState;
use placement_common::{
    errors::Result,
    rel::{EntityKind, EntityRef, Snapshot},
};

/// Snapshots of an entity, oldest first
pub async fn list_snapshots(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> Result<Json<Vec<Snapshot>>> {
    let subject = EntityRef::new(kind.parse::<EntityKind>()?, id);
    let snapshots = state.entities.list_snapshots(&subject).await?;

    tracing::debug!(subject = %subject, count = snapshots.len(), "Snapshots listed");

    Ok(Json(snapshots))
}
