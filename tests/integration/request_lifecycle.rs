//! Request filing, preprocessing, approval, denial and cancellation

use super::support::*;
use dataprivacy::error::PrivacyError;
use dataprivacy::queue::JobKind;
use dataprivacy::request::ContextStatus;
use dataprivacy::types::UserId;
use dataprivacy::{RequestStatus, RequestType};

#[tokio::test]
async fn test_new_request_is_preprocessed_and_sent_to_the_dpo() {
    let fx = fixture();
    let service = fx.pipeline.service();
    let request = service
        .create_data_request(ALICE, ALICE, RequestType::Export, "for my records")
        .unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.dpo, None);

    let jobs = fx.pipeline.stores().queue.list().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::InitiateDataRequest);

    fx.drain().await;
    let request = fx.pipeline.stores().requests.require(request.id).unwrap();
    assert_eq!(request.status, RequestStatus::AwaitingApproval);

    let contexts = fx.pipeline.stores().requests.contexts_for(request.id).unwrap();
    assert_eq!(contexts.len(), 4);
    assert!(contexts.iter().all(|c| c.status == ContextStatus::Pending));

    let to_dpo = fx.sink.named("contactdataprotectionofficer");
    assert_eq!(to_dpo.len(), 1);
    let message = to_dpo[0].message();
    assert_eq!(message.to, DANA);
    assert_eq!(message.from, Some(ALICE));
    assert_eq!(message.subject, "Data request: Export all of my personal data");
    assert!(message.text.contains("Comments: for my records"));
}

#[tokio::test]
async fn test_who_may_file_for_a_subject() {
    let fx = fixture();
    let service = fx.pipeline.service();

    let by_parent = service
        .create_data_request(BOB, ALICE, RequestType::Export, "")
        .unwrap();
    assert_eq!(by_parent.requested_by, BOB);
    assert_eq!(by_parent.dpo, None);

    let stranger = service.create_data_request(MALLORY, ALICE, RequestType::Delete, "");
    assert!(matches!(stranger, Err(PrivacyError::Unauthorized(_))));

    let by_dpo = service
        .create_data_request(DANA, ALICE, RequestType::Delete, "")
        .unwrap();
    assert_eq!(by_dpo.dpo, Some(DANA));

    let unknown = service.create_data_request(DANA, UserId(77), RequestType::Export, "");
    assert!(matches!(unknown, Err(PrivacyError::InvalidSubject(UserId(77)))));
}

#[tokio::test]
async fn test_one_ongoing_request_per_type() {
    let fx = fixture();
    let service = fx.pipeline.service();
    service
        .create_data_request(ALICE, ALICE, RequestType::Export, "")
        .unwrap();

    let duplicate = service.create_data_request(BOB, ALICE, RequestType::Export, "");
    assert!(matches!(duplicate, Err(PrivacyError::OngoingRequest { subject, .. }) if subject == ALICE));

    service
        .create_data_request(ALICE, ALICE, RequestType::Delete, "")
        .unwrap();
}

#[tokio::test]
async fn test_deny_rejects_every_context_and_schedules_nothing() {
    let fx = fixture();
    let service = fx.pipeline.service();
    let request = service
        .create_data_request(ALICE, ALICE, RequestType::Delete, "")
        .unwrap();
    fx.drain().await;

    let not_dpo = service.deny_data_request(BOB, request.id);
    assert!(matches!(not_dpo, Err(PrivacyError::Unauthorized(_))));

    let denied = service.deny_data_request(DANA, request.id).unwrap();
    assert_eq!(denied.status, RequestStatus::Rejected);
    assert_eq!(denied.dpo, Some(DANA));
    assert!(fx
        .pipeline
        .stores()
        .requests
        .contexts_for(request.id)
        .unwrap()
        .iter()
        .all(|c| c.status == ContextStatus::Rejected));
    assert!(fx.pipeline.stores().queue.list().unwrap().is_empty());

    let approve_after = service.approve_data_request(DANA, request.id);
    assert!(matches!(approve_after, Err(PrivacyError::InvalidTransition { .. })));
    assert!(fx.forum.deleted.lock().is_empty());
}

#[tokio::test]
async fn test_approval_requires_preprocessing_to_finish() {
    let fx = fixture();
    let service = fx.pipeline.service();
    let request = service
        .create_data_request(ALICE, ALICE, RequestType::Export, "")
        .unwrap();

    let early = service.approve_data_request(DANA, request.id);
    assert!(matches!(
        early,
        Err(PrivacyError::InvalidTransition {
            from: RequestStatus::Pending,
            to: RequestStatus::Approved,
            ..
        })
    ));
}

#[tokio::test]
async fn test_cancellation_rules() {
    let fx = fixture();
    let service = fx.pipeline.service();
    let request = service
        .create_data_request(BOB, ALICE, RequestType::Export, "")
        .unwrap();

    let stranger = service.cancel_data_request(MALLORY, request.id);
    assert!(matches!(stranger, Err(PrivacyError::Unauthorized(_))));

    let cancelled = service.cancel_data_request(BOB, request.id).unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);

    // Preprocessing finds a terminal request and leaves it alone.
    fx.drain().await;
    assert_eq!(
        fx.pipeline.stores().requests.require(request.id).unwrap().status,
        RequestStatus::Cancelled
    );
    assert!(fx.sink.named("contactdataprotectionofficer").is_empty());

    // A cancelled request no longer blocks a new one.
    service
        .create_data_request(ALICE, ALICE, RequestType::Export, "")
        .unwrap();
}

#[tokio::test]
async fn test_cancel_after_approval_wins_over_processing() {
    let fx = fixture();
    let id = fx.approved(RequestType::Export).await;
    fx.pipeline
        .service()
        .cancel_data_request(ALICE, id)
        .unwrap();

    assert_eq!(fx.drain().await.completed, 1);
    assert_eq!(
        fx.pipeline.stores().requests.require(id).unwrap().status,
        RequestStatus::Cancelled
    );
    assert_eq!(
        fx.forum
            .export_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
    assert!(fx.sink.named("datarequestprocessingresults").is_empty());
}

#[tokio::test]
async fn test_processing_request_cannot_be_cancelled() {
    let fx = fixture();
    fx.forum
        .fail_export
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let id = fx.approved(RequestType::Export).await;
    fx.drain().await;

    let result = fx.pipeline.service().cancel_data_request(DANA, id);
    assert!(matches!(
        result,
        Err(PrivacyError::InvalidTransition {
            from: RequestStatus::Processing,
            to: RequestStatus::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn test_request_visibility() {
    let fx = fixture();
    let service = fx.pipeline.service();
    service
        .create_data_request(BOB, ALICE, RequestType::Export, "")
        .unwrap();
    service
        .create_data_request(BOB, BOB, RequestType::Delete, "")
        .unwrap();

    assert_eq!(service.get_data_requests(DANA).unwrap().len(), 2);
    assert_eq!(service.get_data_requests(BOB).unwrap().len(), 2);
    assert_eq!(service.get_data_requests(ALICE).unwrap().len(), 1);
    assert!(service.get_data_requests(MALLORY).unwrap().is_empty());
}

#[tokio::test]
async fn test_approved_contexts_reflect_the_approval() {
    let fx = fixture();
    let id = fx.approved(RequestType::Delete).await;
    let approved = fx.pipeline.service().approved_contexts(id).unwrap();

    assert_eq!(approved.user(), ALICE);
    assert_eq!(
        approved.get("mod_forum").unwrap().context_ids(),
        &[FORUM, ALICE_CONTEXT]
    );
    assert_eq!(approved.get("core_grades").unwrap().context_ids(), &[COURSE]);
    assert!(approved.get("core_cache").is_none());
}

#[tokio::test]
async fn test_requests_and_jobs_survive_restart() {
    let fx = fixture();
    let request = fx
        .pipeline
        .service()
        .create_data_request(ALICE, ALICE, RequestType::Export, "")
        .unwrap();

    let fx = fx.reopen();
    let stored = fx.pipeline.stores().requests.require(request.id).unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);

    fx.drain().await;
    let id = request.id;
    fx.pipeline.service().approve_data_request(DANA, id).unwrap();
    fx.drain().await;
    assert_eq!(
        fx.pipeline.stores().requests.require(id).unwrap().status,
        RequestStatus::Complete
    );
}

#[tokio::test]
async fn test_revoked_delegate_no_longer_sees_the_request() {
    let fx = fixture();
    let service = fx.pipeline.service();
    let filed = service
        .create_data_request(BOB, ALICE, RequestType::Export, "")
        .unwrap();
    let own = service
        .create_data_request(BOB, BOB, RequestType::Delete, "")
        .unwrap();
    let by_dpo = service
        .create_data_request(DANA, ALICE, RequestType::Delete, "")
        .unwrap();

    let visible: Vec<_> = service.get_data_requests(BOB).unwrap().iter().map(|r| r.id).collect();
    assert_eq!(visible, vec![filed.id, own.id, by_dpo.id]);

    fx.users.revoke_delegation(BOB, ALICE);
    let visible: Vec<_> = service.get_data_requests(BOB).unwrap().iter().map(|r| r.id).collect();
    assert_eq!(visible, vec![own.id]);
    assert_eq!(service.get_data_requests(ALICE).unwrap().len(), 2);
}
