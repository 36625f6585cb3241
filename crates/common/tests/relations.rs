//! End-to-end behavior of the relation layer over the in-memory store

use chrono::{Duration, Utc};
use placement_common::clock::{Clock, ManualClock};
use placement_common::rel::{
    AttachmentCache, AttachmentKind, AttachmentPayload, AttachmentService, EntityKind, EntityRef,
    EntityService, FileRef, Invitation, InvitationType, Link, LinkType, MemoryStore, Tracked,
};
use placement_common::tasks::clear_expired_invitations;
use placement_common::AppError;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Serialize)]
struct Project {
    id: Uuid,
    name: String,
    year: i32,
}

impl Tracked for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn id(&self) -> Uuid {
        self.id
    }
}

struct Fixture {
    store: MemoryStore,
    clock: ManualClock,
    attachments: AttachmentService,
    entities: EntityService,
}

fn fixture() -> Fixture {
    let clock = ManualClock::new(Utc::now());
    let store = MemoryStore::with_clock(Arc::new(clock.clone()));
    let shared = Arc::new(store.clone());
    Fixture {
        attachments: AttachmentService::new(shared.clone(), shared.clone()),
        entities: EntityService::new(shared.clone(), shared.clone(), shared),
        store,
        clock,
    }
}

async fn saved_project(f: &Fixture) -> EntityRef {
    let project = Project {
        id: Uuid::new_v4(),
        name: "Bachelor Verpleegkunde".into(),
        year: 2025,
    };
    f.entities.save(&project).await.unwrap();
    EntityRef::new(EntityKind::Project, project.id)
}

fn website(url: &str) -> AttachmentPayload {
    AttachmentPayload::Link(Link {
        link_type: LinkType::Website,
        url: url.into(),
    })
}

fn file(name: &str, code: Option<&str>) -> AttachmentPayload {
    AttachmentPayload::File(FileRef {
        name: name.into(),
        code: code.map(str::to_string),
        position: 0,
        description: String::new(),
    })
}

#[tokio::test]
async fn website_appears_and_disappears() {
    let f = fixture();
    let owner = saved_project(&f).await;

    let link = f
        .attachments
        .attach(&owner, website("https://example.org"))
        .await
        .unwrap();

    let mut cache = AttachmentCache::new(owner);
    assert_eq!(
        cache.website(&f.attachments).await.unwrap().as_deref(),
        Some("https://example.org")
    );

    f.attachments.delete(link.id).await.unwrap();

    // Loaded set is kept until refreshed
    assert!(cache.website(&f.attachments).await.unwrap().is_some());
    cache.refresh();
    assert!(cache.website(&f.attachments).await.unwrap().is_none());
}

#[tokio::test]
async fn attached_record_is_found_by_kind() {
    let f = fixture();
    let owner = saved_project(&f).await;

    let payload = AttachmentPayload::Link(Link {
        link_type: LinkType::Other,
        url: "https://intranet.example.org/projects".into(),
    });
    f.attachments.attach(&owner, payload.clone()).await.unwrap();

    let found = f
        .attachments
        .find_by_kind(&owner, AttachmentKind::Link(LinkType::Other))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.payload, payload);
}

#[tokio::test]
async fn files_without_code_never_conflict() {
    let f = fixture();
    let owner = saved_project(&f).await;

    f.attachments
        .attach(&owner, file("private/project/a.pdf", None))
        .await
        .unwrap();
    f.attachments
        .attach(&owner, file("private/project/b.pdf", None))
        .await
        .unwrap();
    f.attachments
        .attach(&owner, file("private/project/agreement.pdf", Some("agreement")))
        .await
        .unwrap();

    let err = f
        .attachments
        .attach(&owner, file("private/project/agreement-v2.pdf", Some("agreement")))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict { .. }));
    assert_eq!(f.attachments.list(&owner).await.unwrap().len(), 3);
}

#[tokio::test]
async fn every_save_leaves_one_snapshot() {
    let f = fixture();
    let mut project = Project {
        id: Uuid::new_v4(),
        name: "Stage 1".into(),
        year: 2024,
    };
    let subject = EntityRef::new(EntityKind::Project, project.id);

    for year in 2024..2029 {
        project.year = year;
        let outcome = f.entities.save(&project).await.unwrap();
        assert!(outcome.is_clean());
    }

    let history = f.entities.list_snapshots(&subject).await.unwrap();
    let years: Vec<_> = history
        .iter()
        .map(|s| s.data.as_ref().unwrap()["year"].as_i64().unwrap())
        .collect();
    assert_eq!(years, vec![2024, 2025, 2026, 2027, 2028]);

    // Saving a snapshot records nothing about it
    f.entities.save(&history[0]).await.unwrap();
    let nested = EntityRef::new(EntityKind::Snapshot, history[0].id);
    assert!(f.entities.list_snapshots(&nested).await.unwrap().is_empty());
}

#[tokio::test]
async fn deleted_owner_has_no_attachments() {
    let f = fixture();
    let owner = saved_project(&f).await;
    f.attachments
        .attach(&owner, website("https://example.org"))
        .await
        .unwrap();

    f.entities.delete(&owner).await.unwrap();

    assert!(f.attachments.list(&owner).await.unwrap().is_empty());
    assert!(f
        .attachments
        .find_by_kind(&owner, AttachmentKind::WEBSITE)
        .await
        .unwrap()
        .is_none());
    assert!(!f.entities.list_snapshots(&owner).await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_invitations_are_cleared_once() {
    let f = fixture();
    let owner = saved_project(&f).await;
    let invite = |email: &str| {
        AttachmentPayload::Invitation(Invitation::new(
            InvitationType::Contact,
            "Mentor",
            email,
            None,
        ))
    };

    f.attachments.attach(&owner, invite("old@example.org")).await.unwrap();
    f.clock.advance(Duration::days(3));
    f.attachments.attach(&owner, invite("new@example.org")).await.unwrap();

    let now = f.clock.now();
    let removed = clear_expired_invitations(&f.store, now, Duration::days(2))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(
        clear_expired_invitations(&f.store, now, Duration::days(2))
            .await
            .unwrap(),
        0
    );

    let left = f.attachments.list(&owner).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].as_invitation().unwrap().email, "new@example.org");
}
