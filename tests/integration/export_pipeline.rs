//! Export requests end to end: provider fan-out, archive layout, storage and links

use super::support::*;
use chrono::Utc;
use dataprivacy::error::PrivacyError;
use dataprivacy::privacy::archive::ArchiveKey;
use dataprivacy::privacy::ArchiveIndex;
use dataprivacy::queue::JobState;
use dataprivacy::request::ProcessOutcome;
use dataprivacy::{RequestStatus, RequestType};
use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use std::sync::atomic::Ordering;

fn read_archive(bytes: Vec<u8>) -> (ArchiveIndex, BTreeSet<String>) {
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let names: BTreeSet<String> = zip.file_names().map(str::to_string).collect();
    let mut body = String::new();
    zip.by_name("index.json")
        .unwrap()
        .read_to_string(&mut body)
        .unwrap();
    (serde_json::from_str(&body).unwrap(), names)
}

#[tokio::test]
async fn test_export_writes_every_approved_context() {
    let fx = fixture();
    let id = fx.approved(RequestType::Export).await;
    let summary = fx.drain().await;
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);

    let request = fx.pipeline.stores().requests.require(id).unwrap();
    assert_eq!(request.status, RequestStatus::Complete);
    assert_eq!(request.dpo, Some(DANA));

    let key = ArchiveKey::export(ALICE_CONTEXT, id);
    let bytes = fx.pipeline.stores().archives.get(&key).unwrap();
    let (index, names) = read_archive(bytes);

    assert_eq!(index.user, ALICE);
    let entries: BTreeSet<(u64, String)> = index
        .entries
        .iter()
        .map(|e| (e.context.as_u64(), e.component.clone()))
        .collect();
    let expected: BTreeSet<(u64, String)> = [
        (10, "core_grades"),
        (11, "mod_forum"),
        (12, "core_grades"),
        (20, "mod_forum"),
    ]
    .into_iter()
    .map(|(c, n)| (c, n.to_string()))
    .collect();
    assert_eq!(entries, expected);

    assert!(names.contains("System _.1/Biology 101 _.10/Course forum _.11/mod_forum/data.json"));
    assert!(names.contains("System _.1/Biology 101 _.10/Course forum _.11/mod_forum/metadata.json"));
    assert!(names.contains("System _.1/Biology 101 _.10/core_grades/data.json"));
    assert!(names.contains("System _.1/User 2 _.20/mod_forum/data.json"));
}

#[tokio::test]
async fn test_export_link_verifies_against_stored_archive() {
    let fx = fixture();
    let id = fx.approved(RequestType::Export).await;

    let outcome = fx.pipeline.processor().process(id).await.unwrap();
    let ProcessOutcome::Exported {
        archive,
        link,
        notified,
    } = outcome
    else {
        panic!("expected an export outcome, got {:?}", outcome);
    };
    assert!(notified.subject_notified);
    assert!(archive.size > 0);
    assert_eq!(archive.sha256.len(), 64);
    assert!(link.url.starts_with("https://lms.example/pluginfile.php/privacy_export/20/export/"));

    let verified = fx.pipeline.signer().verify(&link.url, Utc::now()).unwrap();
    assert_eq!(verified, ArchiveKey::export(ALICE_CONTEXT, id));
    assert!(fx.pipeline.stores().archives.exists(&verified).unwrap());

    let tampered = link.url.replace("/20/", "/30/");
    assert!(fx.pipeline.signer().verify(&tampered, Utc::now()).is_none());
    let later = link.expires_at + chrono::Duration::seconds(1);
    assert!(fx.pipeline.signer().verify(&link.url, later).is_none());

    // The queued job finds the request already complete.
    let summary = fx.drain().await;
    assert_eq!(summary.completed, 1);
    assert_eq!(fx.forum.export_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_write_outside_approved_contexts_fails_the_request() {
    let fx = fixture();
    *fx.grades.stray_write.lock() = Some(DANA_CONTEXT);
    let id = fx.approved(RequestType::Export).await;

    let summary = fx.drain().await;
    assert_eq!(summary.failed, 1);

    let request = fx.pipeline.stores().requests.require(id).unwrap();
    assert_eq!(request.status, RequestStatus::Processing);
    assert!(!fx
        .pipeline
        .stores()
        .archives
        .exists(&ArchiveKey::export(ALICE_CONTEXT, id))
        .unwrap());

    let jobs = fx.pipeline.stores().queue.list().unwrap();
    assert_eq!(jobs.len(), 1);
    match &jobs[0].state {
        JobState::Failed { error } => assert!(error.contains("outside its approved list"), "{}", error),
        other => panic!("expected failed job, got {:?}", other),
    }

    let direct = fx.pipeline.processor().process(id).await;
    assert!(matches!(
        direct,
        Err(PrivacyError::ContextNotApproved { ref component, context }) if component == "core_grades" && context == DANA_CONTEXT
    ));
}

#[tokio::test]
async fn test_failed_export_can_be_requeued() {
    let fx = fixture();
    fx.forum.fail_export.store(true, Ordering::SeqCst);
    let id = fx.approved(RequestType::Export).await;

    assert_eq!(fx.drain().await.failed, 1);
    assert_eq!(
        fx.pipeline.stores().requests.require(id).unwrap().status,
        RequestStatus::Processing
    );
    assert!(fx
        .sink
        .named("datarequestprocessingresults")
        .is_empty());

    fx.forum.fail_export.store(false, Ordering::SeqCst);
    let job = fx.pipeline.stores().queue.list().unwrap().remove(0);
    fx.pipeline.stores().queue.requeue(job.id).unwrap().unwrap();

    assert_eq!(fx.drain().await.completed, 1);
    assert_eq!(
        fx.pipeline.stores().requests.require(id).unwrap().status,
        RequestStatus::Complete
    );
    assert!(fx
        .pipeline
        .stores()
        .archives
        .exists(&ArchiveKey::export(ALICE_CONTEXT, id))
        .unwrap());
    assert_eq!(fx.sink.named("datarequestprocessingresults").len(), 1);
}

#[tokio::test]
async fn test_stale_archive_is_replaced() {
    let fx = fixture();
    let id = fx.approved(RequestType::Export).await;
    let key = ArchiveKey::export(ALICE_CONTEXT, id);
    fx.pipeline
        .stores()
        .archives
        .put(&key, b"partial archive from a crashed attempt")
        .unwrap();

    fx.drain().await;

    let bytes = fx.pipeline.stores().archives.get(&key).unwrap();
    let (index, _) = read_archive(bytes);
    assert_eq!(index.entries.len(), 4);
}

#[tokio::test]
async fn test_context_no_longer_discoverable_blocks_processing() {
    let fx = fixture();
    let id = fx.approved(RequestType::Export).await;
    fx.forum.forget(ALICE, FORUM);

    let result = fx.pipeline.processor().process(id).await;
    assert!(matches!(
        result,
        Err(PrivacyError::ApprovalExceedsDiscovery { ref component, context }) if component == "mod_forum" && context == FORUM
    ));
    assert_eq!(
        fx.pipeline.stores().requests.require(id).unwrap().status,
        RequestStatus::Approved
    );
    assert_eq!(fx.forum.export_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_disabled_component_is_left_out_of_the_export() {
    let fx = fixture_with(FixtureOptions {
        configure: |config| config.providers.disabled = vec!["core_grades".to_string()],
        ..FixtureOptions::default()
    });
    let id = fx.approved(RequestType::Export).await;
    fx.drain().await;

    let contexts = fx.pipeline.stores().requests.contexts_for(id).unwrap();
    assert!(contexts.iter().all(|c| c.component == "mod_forum"));

    let bytes = fx
        .pipeline
        .stores()
        .archives
        .get(&ArchiveKey::export(ALICE_CONTEXT, id))
        .unwrap();
    let (index, _) = read_archive(bytes);
    assert!(index.entries.iter().all(|e| e.component == "mod_forum"));
    assert_eq!(fx.grades.export_calls.load(Ordering::SeqCst), 0);
}
