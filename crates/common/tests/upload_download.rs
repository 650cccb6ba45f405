//! Integration tests for orchestrated upload and download

mod common;

use std::sync::Arc;
use std::time::Duration;

use ::common::content_index::ContentIndex;
use ::common::crypto::{CryptoEngine, TAG_SIZE};
use ::common::database::Database;
use ::common::error::TesseraError;
use ::common::keyring::Keyring;
use ::common::orchestrator::{DownloadRequest, Orchestrator, UploadRequest, UploadState};
use ::common::storage::{BackendKind, StorageAdapter};
use ::common::visibility::Visibility;
use tokio::sync::watch;

use crate::common::{payload, FakeSeeder, MemoryAdapter, TestEnv};

#[tokio::test]
async fn test_private_round_trip_2mb() {
    let env = TestEnv::new().await;
    let orchestrator = env.orchestrator();
    let plaintext = payload(2 * 1024 * 1024);

    let result = orchestrator
        .upload(
            UploadRequest::new(plaintext.clone(), "report.pdf", Visibility::Private).owner("alice"),
        )
        .await
        .unwrap();

    assert_eq!(result.visibility, Visibility::Private);
    assert!(!result.deduplicated);

    let stored = env.primary.object(&result.id).unwrap();
    assert_eq!(stored.len(), plaintext.len() + TAG_SIZE);
    assert_ne!(&stored[..64], &plaintext[..64]);

    let entry = env.keyring().get_key(&result.id, Some("alice")).await.unwrap().unwrap();
    assert_eq!(entry.owner_id.as_deref(), Some("alice"));
    assert_eq!(entry.mime_type, "application/pdf");

    let downloaded = orchestrator
        .download(&DownloadRequest::new(&result.id).owner("alice"))
        .await
        .unwrap();
    assert_eq!(downloaded.data.as_ref(), plaintext.as_slice());
    assert_eq!(downloaded.visibility, Visibility::Private);
    assert_eq!(downloaded.file_name.as_deref(), Some("report.pdf"));
}

#[tokio::test]
async fn test_private_download_is_owner_scoped() {
    let env = TestEnv::new().await;
    let orchestrator = env.orchestrator();

    let result = orchestrator
        .upload(
            UploadRequest::new(b"diary".to_vec(), "diary.txt", Visibility::Private).owner("alice"),
        )
        .await
        .unwrap();

    let denied = orchestrator
        .download(&DownloadRequest::new(&result.id).owner("bob"))
        .await;
    assert!(matches!(denied, Err(TesseraError::AccessDenied(_))));

    // callers that supply no owner are not scoped
    let unscoped = orchestrator
        .download(&DownloadRequest::new(&result.id))
        .await
        .unwrap();
    assert_eq!(unscoped.data.as_ref(), b"diary");
}

#[tokio::test]
async fn test_password_round_trip() {
    let env = TestEnv::new().await;
    let orchestrator = env.orchestrator();

    let result = orchestrator
        .upload(
            UploadRequest::new(b"shared secret plans".to_vec(), "plans.txt", Visibility::Password)
                .password("correct horse"),
        )
        .await
        .unwrap();

    let entry = env.keyring().get_key(&result.id, None).await.unwrap().unwrap();
    assert!(entry.is_password_protected);
    assert!(entry.key.is_none());

    let downloaded = orchestrator
        .download(&DownloadRequest::new(&result.id).password("correct horse"))
        .await
        .unwrap();
    assert_eq!(downloaded.data.as_ref(), b"shared secret plans");

    let wrong = orchestrator
        .download(&DownloadRequest::new(&result.id).password("battery staple"))
        .await;
    assert!(matches!(wrong, Err(TesseraError::DecryptionFailed)));

    let missing = orchestrator.download(&DownloadRequest::new(&result.id)).await;
    assert!(matches!(missing, Err(TesseraError::AccessDenied(_))));
}

#[tokio::test]
async fn test_password_file_opens_without_keyring_entry() {
    let env = TestEnv::new().await;
    let result = env
        .orchestrator()
        .upload(
            UploadRequest::new(b"for the recipient".to_vec(), "note.txt", Visibility::Password)
                .password("pw"),
        )
        .await
        .unwrap();

    // another device: same backend, empty keyring
    let db = Database::in_memory().await.unwrap();
    let recipient = Orchestrator::builder(
        CryptoEngine::spawn().unwrap(),
        Keyring::new(db.clone()),
        ContentIndex::new(db),
        env.primary.clone(),
    )
    .build();

    let downloaded = recipient
        .download(
            &DownloadRequest::new(&result.id)
                .visibility(Visibility::Password)
                .password("pw"),
        )
        .await
        .unwrap();
    assert_eq!(downloaded.data.as_ref(), b"for the recipient");
    assert!(downloaded.file_name.is_none());

    let private = recipient
        .download(&DownloadRequest::new(&result.id).visibility(Visibility::Private))
        .await;
    assert!(matches!(private, Err(TesseraError::AccessDenied(_))));
}

#[tokio::test]
async fn test_indexed_visibility_applies_when_key_is_missing() {
    let env = TestEnv::new().await;
    let orchestrator = env.orchestrator();

    let private = orchestrator
        .upload(UploadRequest::new(b"keyless".to_vec(), "k.txt", Visibility::Private))
        .await
        .unwrap();
    env.keyring().delete_key(&private.id).await.unwrap();

    // no hint: the index still knows the file is private
    let denied = orchestrator.download(&DownloadRequest::new(&private.id)).await;
    assert!(matches!(denied, Err(TesseraError::AccessDenied(_))));

    // a wrong hint does not turn ciphertext into plaintext
    let hinted = orchestrator
        .download(&DownloadRequest::new(&private.id).visibility(Visibility::Public))
        .await;
    assert!(matches!(hinted, Err(TesseraError::AccessDenied(_))));

    let password = orchestrator
        .upload(
            UploadRequest::new(b"keyless pw".to_vec(), "p.txt", Visibility::Password)
                .password("pw"),
        )
        .await
        .unwrap();
    env.keyring().delete_key(&password.id).await.unwrap();

    let missing = orchestrator.download(&DownloadRequest::new(&password.id)).await;
    assert!(matches!(missing, Err(TesseraError::AccessDenied(_))));

    let opened = orchestrator
        .download(&DownloadRequest::new(&password.id).password("pw"))
        .await
        .unwrap();
    assert_eq!(opened.data.as_ref(), b"keyless pw");
    assert_eq!(opened.visibility, Visibility::Password);
}

#[tokio::test]
async fn test_indexed_object_lost_everywhere_is_unavailable() {
    let env = TestEnv::new().await;
    let orchestrator = env.orchestrator();

    let uploaded = orchestrator
        .upload(UploadRequest::new(b"vanishing".to_vec(), "v.txt", Visibility::Public))
        .await
        .unwrap();
    env.primary.delete(&uploaded.id).await.unwrap();

    let result = orchestrator.download(&DownloadRequest::new(&uploaded.id)).await;
    assert!(matches!(result, Err(TesseraError::BackendUnavailable(_))));
}

#[tokio::test]
async fn test_public_upload_is_plaintext() {
    let env = TestEnv::new().await;
    let orchestrator = env.orchestrator();

    let result = orchestrator
        .upload(UploadRequest::new(b"hello world".to_vec(), "hello.txt", Visibility::Public))
        .await
        .unwrap();

    assert_eq!(env.primary.object(&result.id).unwrap().as_ref(), b"hello world");
    assert!(!env.keyring().has_key(&result.id).await.unwrap());

    let downloaded = orchestrator
        .download(&DownloadRequest::new(&result.id))
        .await
        .unwrap();
    assert_eq!(downloaded.data.as_ref(), b"hello world");
    assert_eq!(downloaded.visibility, Visibility::Public);
}

#[tokio::test]
async fn test_validation_happens_before_any_upload() {
    let env = TestEnv::new().await;
    let orchestrator = env.orchestrator();

    let oversized = orchestrator
        .upload(UploadRequest::new(payload(11 * 1024 * 1024), "big.png", Visibility::Public))
        .await;
    assert!(matches!(oversized, Err(TesseraError::Validation(_))));

    let blocked = orchestrator
        .upload(
            UploadRequest::new(b"MZ".to_vec(), "setup.exe", Visibility::Public)
                .mime_type("application/x-msdownload"),
        )
        .await;
    assert!(matches!(blocked, Err(TesseraError::Validation(_))));

    assert_eq!(env.primary.uploads(), 0);
}

#[tokio::test]
async fn test_upload_states_end_completed() {
    let env = TestEnv::new().await;
    let seeder = Arc::new(FakeSeeder::default());
    let orchestrator = env.builder().seeder(seeder).build();

    let (tx, mut rx) = watch::channel(UploadState::Pending);
    let watcher = tokio::spawn(async move {
        let mut seen = vec![*rx.borrow_and_update()];
        while rx.changed().await.is_ok() {
            seen.push(*rx.borrow_and_update());
        }
        seen
    });

    orchestrator
        .upload(
            UploadRequest::new(b"watched".to_vec(), "w.txt", Visibility::Private).progress(tx),
        )
        .await
        .unwrap();

    let seen = watcher.await.unwrap();
    assert_eq!(seen.last(), Some(&UploadState::Completed));
    assert!(!seen.contains(&UploadState::Failed));
}

#[tokio::test]
async fn test_seeding_adds_locator() {
    let env = TestEnv::new().await;
    let seeder = Arc::new(FakeSeeder::default());
    let orchestrator = env.builder().seeder(seeder.clone()).build();

    let result = orchestrator
        .upload(UploadRequest::new(b"seed me".to_vec(), "s.txt", Visibility::Public))
        .await
        .unwrap();

    assert_eq!(result.backend, BackendKind::Node);
    let locator = result.locator.unwrap();
    assert!(locator.starts_with("magnet:?xt=urn:blake3:"));
    assert_eq!(seeder.seeded().len(), 1);
}

#[tokio::test]
async fn test_slow_seeding_does_not_fail_upload() {
    let env = TestEnv::new().await;
    let orchestrator = env
        .builder()
        .seeder(Arc::new(FakeSeeder::slow(Duration::from_secs(30))))
        .seed_timeout(Duration::from_millis(100))
        .build();

    let result = orchestrator
        .upload(UploadRequest::new(b"no seed".to_vec(), "n.txt", Visibility::Public))
        .await
        .unwrap();

    assert!(result.locator.is_none());
    assert_eq!(env.primary.object_count(), 1);
}

#[tokio::test]
async fn test_primary_failure_surfaces_and_stores_nothing() {
    let env = TestEnv::with_primary(MemoryAdapter::failing(BackendKind::Pinning)).await;
    let orchestrator = env.orchestrator();

    let result = orchestrator
        .upload(UploadRequest::new(b"lost".to_vec(), "lost.txt", Visibility::Private))
        .await;
    assert!(matches!(result, Err(TesseraError::BackendUnavailable(_))));

    assert_eq!(env.keyring().get_stats().await.unwrap().total, 0);
    assert_eq!(env.index().count().await.unwrap(), 0);
}
