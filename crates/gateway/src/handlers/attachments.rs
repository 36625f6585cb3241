//! Attachment handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use placement_common::{
    crypto::EncryptedText,
    errors::{AppError, Result},
    rel::{
        Attachment, AttachmentCache, AttachmentKind, AttachmentPayload, AttachmentType,
        EntityKind, EntityRef, LinkType, Remark, Signature,
    },
};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Restrict to one family, e.g. `file`
    pub family: Option<String>,
}

/// Remarks arrive as plaintext and are sealed on the way in
#[derive(Debug, Deserialize)]
struct RemarkInput {
    text: String,
    #[serde(default)]
    created_by: Option<Uuid>,
}

/// Signed text is sealed the same way
#[derive(Debug, Deserialize)]
struct SignatureInput {
    user_id: Uuid,
    signed_text: String,
}

#[derive(Serialize)]
pub struct AttachmentResponse {
    pub id: Uuid,
    pub owner: EntityRef,
    pub kind: AttachmentKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Invitation link, only on creation and only with a configured secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

#[derive(Serialize)]
pub struct LinkResponse {
    pub link_type: LinkType,
    pub url: String,
}

fn owner_ref(kind: &str, id: Uuid) -> Result<EntityRef> {
    Ok(EntityRef::new(kind.parse::<EntityKind>()?, id))
}

fn parse_body<T: serde::de::DeserializeOwned>(body: serde_json::Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| AppError::InvalidFormat {
        message: e.to_string(),
    })
}

fn payload_from_request(body: serde_json::Value) -> Result<AttachmentPayload> {
    let family = body.get("family").and_then(|f| f.as_str()).map(str::to_string);
    match family.as_deref() {
        Some(f) if f == AttachmentType::Remark.as_str() => {
            let input: RemarkInput = parse_body(body)?;
            Ok(AttachmentPayload::Remark(Remark {
                text: EncryptedText::new(input.text),
                created_by: input.created_by,
            }))
        }
        Some(f) if f == AttachmentType::Signature.as_str() => {
            let input: SignatureInput = parse_body(body)?;
            Ok(AttachmentPayload::Signature(Signature {
                user_id: input.user_id,
                signed_text: EncryptedText::new(input.signed_text),
                uuid: Uuid::new_v4(),
            }))
        }
        _ => parse_body(body),
    }
}

impl TryFrom<Attachment> for AttachmentResponse {
    type Error = AppError;

    fn try_from(attachment: Attachment) -> Result<Self> {
        let kind = attachment.kind();
        let payload = match &attachment.payload {
            AttachmentPayload::Remark(remark) => serde_json::json!({
                "family": AttachmentType::Remark.as_str(),
                "text": remark.text.reveal().ok(),
                "created_by": remark.created_by,
            }),
            AttachmentPayload::Signature(signature) => serde_json::json!({
                "family": AttachmentType::Signature.as_str(),
                "uuid": signature.uuid,
                "user_id": signature.user_id,
                "signed_text": signature.signed_text.reveal().ok(),
            }),
            other => serde_json::to_value(other)?,
        };

        Ok(Self {
            id: attachment.id,
            owner: attachment.owner,
            kind,
            payload,
            created_at: attachment.created_at,
            link: None,
        })
    }
}

/// List the attachments of an entity
pub async fn list_attachments(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AttachmentResponse>>> {
    let owner = owner_ref(&kind, id)?;

    let attachments = match query.family {
        Some(family) => {
            state
                .attachments
                .list_family(&owner, family.parse::<AttachmentType>()?)
                .await?
        }
        None => state.attachments.list(&owner).await?,
    };

    let response = attachments
        .into_iter()
        .map(AttachmentResponse::try_from)
        .collect::<Result<Vec<_>>>()?;

    Ok(Json(response))
}

/// Attach a new record to an entity
pub async fn create_attachment(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<AttachmentResponse>)> {
    let owner = owner_ref(&kind, id)?;
    let payload = payload_from_request(body)?;

    let attachment = state.attachments.attach(&owner, payload).await?;

    let link = match (attachment.as_invitation(), state.config.invitation_secret_key()) {
        (Some(invitation), Some(key)) => Some(invitation.link(key)),
        _ => None,
    };
    let mut response = AttachmentResponse::try_from(attachment)?;
    response.link = link;

    Ok((StatusCode::CREATED, Json(response)))
}

/// First link of the given type
pub async fn get_link(
    State(state): State<AppState>,
    Path((kind, id, link_type)): Path<(String, Uuid, String)>,
) -> Result<Json<LinkResponse>> {
    let owner = owner_ref(&kind, id)?;
    let link_type: LinkType = serde_json::from_value(serde_json::Value::String(link_type.clone()))
        .map_err(|_| AppError::InvalidFormat {
            message: format!("unknown link type '{}'", link_type),
        })?;

    let mut cache = AttachmentCache::new(owner);
    let url = cache
        .link(&state.attachments, link_type)
        .await?
        .map(str::to_string)
        .ok_or_else(|| AppError::NotFound {
            resource_type: format!("link:{}", link_type.as_str()),
            id: owner.to_string(),
        })?;

    Ok(Json(LinkResponse { link_type, url }))
}

/// File attachment carrying `code`
pub async fn get_file(
    State(state): State<AppState>,
    Path((kind, id, code)): Path<(String, Uuid, String)>,
) -> Result<Json<AttachmentResponse>> {
    let owner = owner_ref(&kind, id)?;

    let file = state
        .attachments
        .get_file(&owner, &code)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource_type: "file".to_string(),
            id: code.clone(),
        })?;

    Ok(Json(file.try_into()?))
}

/// Newest version of the text entry `code`
pub async fn get_text(
    State(state): State<AppState>,
    Path((kind, id, code)): Path<(String, Uuid, String)>,
) -> Result<Json<AttachmentResponse>> {
    let owner = owner_ref(&kind, id)?;

    let text = state
        .attachments
        .get_text(&owner, &code)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource_type: "text".to_string(),
            id: code.clone(),
        })?;

    Ok(Json(text.try_into()?))
}

pub async fn delete_attachment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.attachments.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
