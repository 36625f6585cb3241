//! Per-owner attachment cache
//!
//! Loads an owner's attachments on first lookup and answers later lookups
//! from memory. Writes made after the load are not seen until
//! [`AttachmentCache::refresh`].

use crate::errors::Result;
use crate::metrics;
use crate::rel::attachment::{Attachment, AttachmentKind, AttachmentPayload, LinkType};
use crate::rel::reference::EntityRef;
use crate::rel::service::AttachmentService;

const CACHE_NAME: &str = "attachments";

#[derive(Debug, Clone)]
pub struct AttachmentCache {
    owner: EntityRef,
    loaded: Option<Vec<Attachment>>,
}

impl AttachmentCache {
    pub fn new(owner: EntityRef) -> Self {
        Self {
            owner,
            loaded: None,
        }
    }

    pub fn owner(&self) -> &EntityRef {
        &self.owner
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    async fn load(&mut self, service: &AttachmentService) -> Result<&[Attachment]> {
        if self.loaded.is_none() {
            metrics::record_cache(false, CACHE_NAME);
            let attachments = service.list(&self.owner).await?;
            self.loaded = Some(attachments);
        } else {
            metrics::record_cache(true, CACHE_NAME);
        }
        Ok(self.loaded.as_deref().unwrap_or_default())
    }

    /// First attachment of `kind`, if any
    pub async fn find(
        &mut self,
        service: &AttachmentService,
        kind: AttachmentKind,
    ) -> Result<Option<&Attachment>> {
        Ok(self.load(service).await?.iter().find(|a| a.kind() == kind))
    }

    /// Payload of the first attachment of `kind`
    pub async fn get(
        &mut self,
        service: &AttachmentService,
        kind: AttachmentKind,
    ) -> Result<Option<&AttachmentPayload>> {
        Ok(self.find(service, kind).await?.map(|a| &a.payload))
    }

    pub async fn link(
        &mut self,
        service: &AttachmentService,
        link_type: LinkType,
    ) -> Result<Option<&str>> {
        Ok(self
            .find(service, AttachmentKind::Link(link_type))
            .await?
            .and_then(Attachment::as_link)
            .map(|link| link.url.as_str()))
    }

    /// URL of the owner's website link
    pub async fn website(&mut self, service: &AttachmentService) -> Result<Option<String>> {
        Ok(self
            .link(service, LinkType::Website)
            .await?
            .map(str::to_string))
    }

    /// Forget the loaded set; the next lookup reads through again
    pub fn refresh(&mut self) {
        self.loaded = None;
    }
}
