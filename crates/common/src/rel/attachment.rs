//! Attachment records
//!
//! Links, addresses, permissions, files, invitations, phone numbers,
//! remarks, signatures and text entries all hang off an owning entity
//! through an [`EntityRef`]. One tagged payload type covers every family so
//! a single store can hold them.

use crate::crypto::EncryptedText;
use crate::errors::{AppError, Result};
use crate::rel::reference::EntityRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use uuid::Uuid;
use validator::Validate;

/// Attachment family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    Link,
    Address,
    Permission,
    File,
    Invitation,
    PhoneNumber,
    Remark,
    Signature,
    Text,
}

impl AttachmentType {
    pub const ALL: [AttachmentType; 9] = [
        AttachmentType::Link,
        AttachmentType::Address,
        AttachmentType::Permission,
        AttachmentType::File,
        AttachmentType::Invitation,
        AttachmentType::PhoneNumber,
        AttachmentType::Remark,
        AttachmentType::Signature,
        AttachmentType::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentType::Link => "link",
            AttachmentType::Address => "address",
            AttachmentType::Permission => "permission",
            AttachmentType::File => "file",
            AttachmentType::Invitation => "invitation",
            AttachmentType::PhoneNumber => "phone_number",
            AttachmentType::Remark => "remark",
            AttachmentType::Signature => "signature",
            AttachmentType::Text => "text",
        }
    }
}

impl fmt::Display for AttachmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttachmentType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        AttachmentType::ALL
            .into_iter()
            .find(|family| family.as_str() == s)
            .ok_or_else(|| AppError::InvalidFormat {
                message: format!("unknown attachment type '{}'", s),
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    #[default]
    Website,
    Linkedin,
    Other,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Website => "website",
            LinkType::Linkedin => "linkedin",
            LinkType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationType {
    /// Contact already in the database that never logged in
    ExistingContact,
    /// New contact, joins the owning place on acceptance
    Contact,
    /// New student, joins the owning project on acceptance
    Student,
}

impl InvitationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationType::ExistingContact => "existing_contact",
            InvitationType::Contact => "contact",
            InvitationType::Student => "student",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneType {
    Mobile,
    Landline,
}

impl PhoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhoneType::Mobile => "mobile",
            PhoneType::Landline => "landline",
        }
    }
}

/// Online account or other link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Link {
    #[serde(default)]
    pub link_type: LinkType,

    #[validate(url)]
    pub url: String,
}

/// Physical address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1, max = 160))]
    pub address: String,

    #[validate(length(min = 1, max = 40))]
    pub city: String,

    #[validate(length(min = 1, max = 16))]
    pub postcode: String,

    /// ISO 3166-1 alpha-2
    #[validate(length(equal = 2))]
    pub country: String,
}

/// Per-object access grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Permission {
    pub user_id: Uuid,
}

/// Uploaded file descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct FileRef {
    /// Storage object key
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(length(min = 1, max = 32))]
    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub position: i16,

    #[serde(default)]
    pub description: String,
}

impl FileRef {
    /// Object key for an upload owned by `owner`
    pub fn upload_path(owner: &EntityRef, filename: &str) -> String {
        format!("private/{}/{}/{}", owner.kind, owner.id, filename).to_lowercase()
    }

    pub fn is_public(&self) -> bool {
        self.name.starts_with("public/")
    }
}

/// Invitation to join the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Invitation {
    pub invitation_type: InvitationType,

    /// Issued by the server, unique across all owners
    #[serde(default = "Uuid::new_v4")]
    pub uuid: Uuid,

    #[validate(length(min = 1, max = 160))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl Invitation {
    pub fn new(
        invitation_type: InvitationType,
        name: impl Into<String>,
        email: &str,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            invitation_type,
            uuid: Uuid::new_v4(),
            name: name.into(),
            email: normalize_email(email),
            data,
        }
    }

    /// Secret embedded in the invitation link
    pub fn secret(&self, secret_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.uuid.to_string().as_bytes());
        hasher.update(secret_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify_secret(&self, secret_key: &str, candidate: &str) -> bool {
        let Ok(candidate) = hex::decode(candidate.trim()) else {
            return false;
        };
        let mut hasher = Sha256::new();
        hasher.update(self.uuid.to_string().as_bytes());
        hasher.update(secret_key.as_bytes());
        hasher.finalize().as_slice().ct_eq(&candidate).into()
    }

    /// Relative link the invitee follows to accept
    pub fn link(&self, secret_key: &str) -> String {
        format!("/invitations/{}/{}", self.uuid, self.secret(secret_key))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PhoneNumber {
    pub phone_type: PhoneType,

    #[validate(length(min = 1, max = 24))]
    pub number: String,
}

/// Administrator remark, sealed at rest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remark {
    pub text: EncryptedText,

    #[serde(default)]
    pub created_by: Option<Uuid>,
}

/// Signed statement; stored once and never changed or removed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub user_id: Uuid,

    pub signed_text: EncryptedText,

    /// Issued by the server, unique across all owners
    #[serde(default = "Uuid::new_v4")]
    pub uuid: Uuid,
}

fn first_version() -> u16 {
    1
}

/// Versioned text (information, notes); the newest version of a code wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct TextEntry {
    #[validate(length(min = 1, max = 32))]
    pub code: String,

    #[serde(default = "first_version")]
    #[validate(range(min = 1))]
    pub version: u16,

    #[validate(length(min = 1, max = 160))]
    pub title: String,

    pub text: String,

    #[serde(default)]
    pub created_by: Option<Uuid>,
}

/// Family-specific attachment data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum AttachmentPayload {
    Link(Link),
    Address(Address),
    Permission(Permission),
    File(FileRef),
    Invitation(Invitation),
    PhoneNumber(PhoneNumber),
    Remark(Remark),
    Signature(Signature),
    Text(TextEntry),
}

impl AttachmentPayload {
    pub fn family(&self) -> AttachmentType {
        match self {
            AttachmentPayload::Link(_) => AttachmentType::Link,
            AttachmentPayload::Address(_) => AttachmentType::Address,
            AttachmentPayload::Permission(_) => AttachmentType::Permission,
            AttachmentPayload::File(_) => AttachmentType::File,
            AttachmentPayload::Invitation(_) => AttachmentType::Invitation,
            AttachmentPayload::PhoneNumber(_) => AttachmentType::PhoneNumber,
            AttachmentPayload::Remark(_) => AttachmentType::Remark,
            AttachmentPayload::Signature(_) => AttachmentType::Signature,
            AttachmentPayload::Text(_) => AttachmentType::Text,
        }
    }

    pub fn kind(&self) -> AttachmentKind {
        match self {
            AttachmentPayload::Link(link) => AttachmentKind::Link(link.link_type),
            AttachmentPayload::Address(_) => AttachmentKind::Address,
            AttachmentPayload::Permission(_) => AttachmentKind::Permission,
            AttachmentPayload::File(_) => AttachmentKind::File,
            AttachmentPayload::Invitation(inv) => AttachmentKind::Invitation(inv.invitation_type),
            AttachmentPayload::PhoneNumber(phone) => AttachmentKind::PhoneNumber(phone.phone_type),
            AttachmentPayload::Remark(_) => AttachmentKind::Remark,
            AttachmentPayload::Signature(_) => AttachmentKind::Signature,
            AttachmentPayload::Text(_) => AttachmentKind::Text,
        }
    }

    /// Value that must be unique per owner and family; `None` never collides
    pub fn discriminant(&self) -> Option<String> {
        match self {
            AttachmentPayload::Permission(p) => Some(p.user_id.to_string()),
            AttachmentPayload::File(f) => f.code.clone(),
            AttachmentPayload::Invitation(inv) => {
                Some(format!("{}:{}", inv.invitation_type.as_str(), inv.email))
            }
            AttachmentPayload::Text(t) => Some(format!("{}:{}", t.code, t.version)),
            AttachmentPayload::Link(_)
            | AttachmentPayload::Address(_)
            | AttachmentPayload::PhoneNumber(_)
            | AttachmentPayload::Remark(_)
            | AttachmentPayload::Signature(_) => None,
        }
    }

    /// Identifier that must be unique across every owner
    pub fn global_key(&self) -> Option<Uuid> {
        match self {
            AttachmentPayload::Invitation(inv) => Some(inv.uuid),
            AttachmentPayload::Signature(sig) => Some(sig.uuid),
            _ => None,
        }
    }

    /// Replace caller-supplied identifiers with server-issued ones
    pub fn issue_identifiers(&mut self) {
        match self {
            AttachmentPayload::Invitation(inv) => inv.uuid = Uuid::new_v4(),
            AttachmentPayload::Signature(sig) => sig.uuid = Uuid::new_v4(),
            _ => {}
        }
    }

    /// Append-only families
    pub fn is_immutable(&self) -> bool {
        matches!(self, AttachmentPayload::Signature(_))
    }

    pub(crate) fn conflict(&self, owner: &EntityRef) -> AppError {
        let family = self.family();
        match (self.discriminant(), self.global_key()) {
            (Some(discriminant), _) => AppError::conflict(format!(
                "{} '{}' already attached to {}",
                family, discriminant, owner
            )),
            (None, Some(key)) => AppError::conflict(format!("{} {} already exists", family, key)),
            (None, None) => AppError::conflict(format!("{} already attached to {}", family, owner)),
        }
    }

    /// Canonicalize fields that take part in uniqueness
    pub fn normalize(&mut self) {
        match self {
            AttachmentPayload::Invitation(inv) => inv.email = normalize_email(&inv.email),
            AttachmentPayload::File(f) => {
                if f.code.as_deref().is_some_and(|c| c.trim().is_empty()) {
                    f.code = None;
                }
            }
            AttachmentPayload::Text(t) => t.code = t.code.trim().to_string(),
            _ => {}
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            AttachmentPayload::Link(link) => {
                link.validate()?;
                if !(link.url.starts_with("http://") || link.url.starts_with("https://")) {
                    return Err(AppError::validation("url", "must be an http(s) URL"));
                }
            }
            AttachmentPayload::Address(address) => address.validate()?,
            AttachmentPayload::Permission(permission) => permission.validate()?,
            AttachmentPayload::File(file) => file.validate()?,
            AttachmentPayload::Invitation(inv) => inv.validate()?,
            AttachmentPayload::PhoneNumber(phone) => phone.validate()?,
            AttachmentPayload::Remark(remark) => {
                if remark.text.reveal().map(str::trim).unwrap_or_default().is_empty() {
                    return Err(AppError::validation("text", "remark text is required"));
                }
            }
            AttachmentPayload::Signature(sig) => {
                if sig.signed_text.reveal().map(str::trim).unwrap_or_default().is_empty() {
                    return Err(AppError::validation("signed_text", "signed text is required"));
                }
            }
            AttachmentPayload::Text(text) => text.validate()?,
        }
        Ok(())
    }
}

/// Closed kind tag of an attachment, e.g. `link:website`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    Link(LinkType),
    Address,
    Permission,
    File,
    Invitation(InvitationType),
    PhoneNumber(PhoneType),
    Remark,
    Signature,
    Text,
}

impl AttachmentKind {
    pub const WEBSITE: AttachmentKind = AttachmentKind::Link(LinkType::Website);

    pub fn family(&self) -> AttachmentType {
        match self {
            AttachmentKind::Link(_) => AttachmentType::Link,
            AttachmentKind::Address => AttachmentType::Address,
            AttachmentKind::Permission => AttachmentType::Permission,
            AttachmentKind::File => AttachmentType::File,
            AttachmentKind::Invitation(_) => AttachmentType::Invitation,
            AttachmentKind::PhoneNumber(_) => AttachmentType::PhoneNumber,
            AttachmentKind::Remark => AttachmentType::Remark,
            AttachmentKind::Signature => AttachmentType::Signature,
            AttachmentKind::Text => AttachmentType::Text,
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentKind::Link(t) => write!(f, "link:{}", t.as_str()),
            AttachmentKind::Invitation(t) => write!(f, "invitation:{}", t.as_str()),
            AttachmentKind::PhoneNumber(t) => write!(f, "phone_number:{}", t.as_str()),
            other => f.write_str(other.family().as_str()),
        }
    }
}

impl FromStr for AttachmentKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || AppError::InvalidFormat {
            message: format!("unknown attachment kind '{}'", s),
        };
        let (family, tag) = match s.split_once(':') {
            Some((family, tag)) => (family, Some(tag)),
            None => (s, None),
        };
        let tag_value = |tag: Option<&str>| -> Result<serde_json::Value> {
            tag.map(|t| serde_json::Value::String(t.to_string()))
                .ok_or_else(invalid)
        };

        let kind = match (family.parse::<AttachmentType>()?, tag) {
            (AttachmentType::Link, tag) => {
                AttachmentKind::Link(serde_json::from_value(tag_value(tag)?).map_err(|_| invalid())?)
            }
            (AttachmentType::Invitation, tag) => AttachmentKind::Invitation(
                serde_json::from_value(tag_value(tag)?).map_err(|_| invalid())?,
            ),
            (AttachmentType::PhoneNumber, tag) => AttachmentKind::PhoneNumber(
                serde_json::from_value(tag_value(tag)?).map_err(|_| invalid())?,
            ),
            (AttachmentType::Address, None) => AttachmentKind::Address,
            (AttachmentType::Permission, None) => AttachmentKind::Permission,
            (AttachmentType::File, None) => AttachmentKind::File,
            (AttachmentType::Remark, None) => AttachmentKind::Remark,
            (AttachmentType::Signature, None) => AttachmentKind::Signature,
            (AttachmentType::Text, None) => AttachmentKind::Text,
            _ => return Err(invalid()),
        };
        Ok(kind)
    }
}

impl Serialize for AttachmentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AttachmentKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An attachment bound to its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub owner: EntityRef,
    pub payload: AttachmentPayload,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub fn family(&self) -> AttachmentType {
        self.payload.family()
    }

    pub fn kind(&self) -> AttachmentKind {
        self.payload.kind()
    }

    pub fn discriminant(&self) -> Option<String> {
        self.payload.discriminant()
    }

    pub fn as_link(&self) -> Option<&Link> {
        match &self.payload {
            AttachmentPayload::Link(link) => Some(link),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileRef> {
        match &self.payload {
            AttachmentPayload::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_invitation(&self) -> Option<&Invitation> {
        match &self.payload {
            AttachmentPayload::Invitation(inv) => Some(inv),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextEntry> {
        match &self.payload {
            AttachmentPayload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// True when `other` would violate this record's uniqueness slot
    pub fn collides_with(&self, owner: &EntityRef, payload: &AttachmentPayload) -> bool {
        if let (Some(mine), Some(theirs)) = (self.payload.global_key(), payload.global_key()) {
            if mine == theirs {
                return true;
            }
        }
        if self.owner != *owner || self.family() != payload.family() {
            return false;
        }
        match (self.discriminant(), payload.discriminant()) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rel::reference::EntityKind;

    fn owner() -> EntityRef {
        EntityRef::new(EntityKind::EducationPlace, Uuid::new_v4())
    }

    fn file(code: Option<&str>) -> AttachmentPayload {
        AttachmentPayload::File(FileRef {
            name: "private/agreement.pdf".into(),
            code: code.map(String::from),
            position: 0,
            description: String::new(),
        })
    }

    #[test]
    fn test_kind_strings_round_trip() {
        let kinds = [
            AttachmentKind::WEBSITE,
            AttachmentKind::Link(LinkType::Linkedin),
            AttachmentKind::Address,
            AttachmentKind::Permission,
            AttachmentKind::File,
            AttachmentKind::Invitation(InvitationType::ExistingContact),
            AttachmentKind::PhoneNumber(PhoneType::Landline),
            AttachmentKind::Remark,
            AttachmentKind::Signature,
            AttachmentKind::Text,
        ];
        for kind in kinds {
            assert_eq!(kind.to_string().parse::<AttachmentKind>().unwrap(), kind);
        }
        assert_eq!(AttachmentKind::WEBSITE.to_string(), "link:website");
        assert_eq!(
            AttachmentKind::Invitation(InvitationType::ExistingContact).to_string(),
            "invitation:existing_contact"
        );
    }

    #[test]
    fn test_bad_kind_strings() {
        for s in ["link", "link:blog", "file:x", "nothing", "address:home"] {
            assert!(s.parse::<AttachmentKind>().is_err(), "{s} should not parse");
        }
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = AttachmentPayload::Link(Link {
            link_type: LinkType::Website,
            url: "https://example.org".into(),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["family"], "link");
        assert_eq!(json["link_type"], "website");

        let back: AttachmentPayload =
            serde_json::from_value(serde_json::json!({"family": "link", "url": "https://x.be"}))
                .unwrap();
        assert_eq!(back.kind(), AttachmentKind::WEBSITE);
    }

    #[test]
    fn test_null_codes_never_collide() {
        let owner = owner();
        let existing = Attachment {
            id: Uuid::new_v4(),
            owner,
            payload: file(None),
            created_at: Utc::now(),
        };
        assert!(!existing.collides_with(&owner, &file(None)));
        assert!(!existing.collides_with(&owner, &file(Some("agreement"))));

        let coded = Attachment {
            payload: file(Some("agreement")),
            ..existing
        };
        assert!(coded.collides_with(&owner, &file(Some("agreement"))));
        assert!(!coded.collides_with(&owner, &file(Some("insurance"))));
        assert!(!coded.collides_with(&self::owner(), &file(Some("agreement"))));
    }

    #[test]
    fn test_blank_code_normalizes_to_none() {
        let mut payload = file(Some("  "));
        payload.normalize();
        assert_eq!(payload.discriminant(), None);
    }

    #[test]
    fn test_invitation_email_is_lowercased() {
        let inv = Invitation::new(InvitationType::Contact, "UZ Contact", " Contact@UZGent.be ", None);
        assert_eq!(inv.email, "contact@uzgent.be");

        let payload = AttachmentPayload::Invitation(inv);
        assert_eq!(
            payload.discriminant().as_deref(),
            Some("contact:contact@uzgent.be")
        );
    }

    #[test]
    fn test_invitation_secret() {
        let inv = Invitation::new(InvitationType::Student, "Student", "s@ugent.be", None);
        let secret = inv.secret("server-secret");
        assert_eq!(secret.len(), 64);
        assert!(inv.verify_secret("server-secret", &secret));
        assert!(inv.verify_secret("server-secret", &secret.to_uppercase()));
        assert!(!inv.verify_secret("other-secret", &secret));
        assert!(!inv.verify_secret("server-secret", &secret[..32]));
        assert!(!inv.verify_secret("server-secret", "not hex"));
        assert_eq!(
            inv.link("server-secret"),
            format!("/invitations/{}/{}", inv.uuid, secret)
        );
    }

    #[test]
    fn test_invitation_uuid_is_issued_by_server() {
        let chosen = Uuid::new_v4();
        let json = serde_json::json!({
            "family": "invitation",
            "invitation_type": "contact",
            "uuid": chosen,
            "name": "Mentor",
            "email": "mentor@example.org",
        });
        let mut payload: AttachmentPayload = serde_json::from_value(json).unwrap();
        payload.issue_identifiers();
        assert_ne!(payload.global_key(), Some(chosen));

        let omitted: AttachmentPayload = serde_json::from_value(serde_json::json!({
            "family": "invitation",
            "invitation_type": "student",
            "name": "Student",
            "email": "student@example.org",
        }))
        .unwrap();
        assert!(omitted.global_key().is_some());
    }

    #[test]
    fn test_shared_uuid_collides_across_owners() {
        let inv = Invitation::new(InvitationType::Contact, "Mentor", "a@example.org", None);
        let existing = Attachment {
            id: Uuid::new_v4(),
            owner: owner(),
            payload: AttachmentPayload::Invitation(inv.clone()),
            created_at: Utc::now(),
        };
        let copy = AttachmentPayload::Invitation(Invitation {
            email: "b@example.org".into(),
            ..inv
        });
        assert!(existing.collides_with(&owner(), &copy));
    }

    #[test]
    fn test_text_entry_versions() {
        let text = |version| {
            AttachmentPayload::Text(TextEntry {
                code: " intro ".into(),
                version,
                title: "Introduction".into(),
                text: "Welcome to the internship".into(),
                created_by: None,
            })
        };
        let mut first = text(1);
        first.normalize();
        assert_eq!(first.discriminant().as_deref(), Some("intro:1"));
        assert!(first.validate().is_ok());

        let existing = Attachment {
            id: Uuid::new_v4(),
            owner: owner(),
            payload: first,
            created_at: Utc::now(),
        };
        let mut second = text(2);
        second.normalize();
        assert!(!existing.collides_with(&existing.owner, &second));
        let mut again = text(1);
        again.normalize();
        assert!(existing.collides_with(&existing.owner, &again));

        assert!(text(0).validate().is_err());
    }

    #[test]
    fn test_validation() {
        let bad_url = AttachmentPayload::Link(Link {
            link_type: LinkType::Other,
            url: "not a url".into(),
        });
        assert!(matches!(bad_url.validate(), Err(AppError::Validation { .. })));

        let ftp = AttachmentPayload::Link(Link {
            link_type: LinkType::Other,
            url: "ftp://files.example.org".into(),
        });
        assert!(ftp.validate().is_err());

        let bad_email = AttachmentPayload::Invitation(Invitation::new(
            InvitationType::Contact,
            "Someone",
            "not-an-email",
            None,
        ));
        assert!(bad_email.validate().is_err());

        let bad_country = AttachmentPayload::Address(Address {
            address: "De Pintelaan 185".into(),
            city: "Gent".into(),
            postcode: "9000".into(),
            country: "BEL".into(),
        });
        assert!(bad_country.validate().is_err());

        assert!(file(Some("agreement")).validate().is_ok());
    }

    #[test]
    fn test_remark_is_sealed_in_json() {
        crate::crypto::install_test_cipher();
        let payload = AttachmentPayload::Remark(Remark {
            text: "Needs a second supervisor".into(),
            created_by: None,
        });

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["family"], "remark");
        assert_ne!(json["text"], "Needs a second supervisor");

        let back: AttachmentPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);

        let blank = AttachmentPayload::Remark(Remark {
            text: "   ".into(),
            created_by: None,
        });
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_upload_path_is_lowercased() {
        let owner = EntityRef::new(EntityKind::Place, Uuid::nil());
        let path = FileRef::upload_path(&owner, "Agreement.PDF");
        assert_eq!(path, format!("private/place/{}/agreement.pdf", Uuid::nil()));
    }
}
